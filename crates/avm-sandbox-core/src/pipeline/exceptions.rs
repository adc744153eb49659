use super::helper::{self, UNWRAP_THROWABLE, WRAP_THROWABLE};
use super::rewrite::{instrumentation_mask, MethodPatch};
use super::{ClassPass, PassContext};
use crate::errors::TransformError;
use avm_types::{
    ClassFile, Instruction, MethodDecl, EXCEPTION_WRAPPER_PREFIX, SHADOW_OBJECT, SHADOW_THROWABLE,
};
use std::collections::BTreeSet;

/// Field of the root exception wrapper holding the wrapped shadow throwable.
pub const UNDERLYING_FIELD: &str = "underlying";

/// Routes every throw and catch through the exception wrapping boundary.
///
/// Thrown shadow objects are wrapped before `athrow` and unwrapped at handler
/// entry, and catch clauses name wrapper classes. Energy and stack exhaustion
/// are not exceptions and never reach a handler.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExceptionInterception;

impl ClassPass for ExceptionInterception {
    fn name(&self) -> &'static str {
        "exception-interception"
    }

    fn transform(&self, mut class: ClassFile, _ctx: &PassContext<'_>) -> Result<ClassFile, TransformError> {
        for method in class.methods.iter_mut().filter(|m| m.has_body()) {
            instrument(method);
        }
        Ok(class)
    }
}

fn instrument(method: &mut MethodDecl) {
    let mask = instrumentation_mask(&method.code);
    let mut patch = MethodPatch::new();

    for (i, instruction) in method.code.iter().enumerate() {
        let wrapped = i > 0 && helper::is_call(&method.code[i - 1], WRAP_THROWABLE);
        if *instruction == Instruction::AThrow && !wrapped {
            patch.insert_before(i, [helper::call(WRAP_THROWABLE)]);
        }
    }

    let entries: BTreeSet<usize> = method.handlers.iter().map(|h| h.handler as usize).collect();
    for entry in entries {
        let already = method.code[entry..]
            .iter()
            .zip(&mask[entry..])
            .take_while(|(_, instrumented)| **instrumented)
            .any(|(i, _)| helper::is_call(i, UNWRAP_THROWABLE));
        if !already {
            patch.insert_before(entry, [helper::call(UNWRAP_THROWABLE)]);
        }
    }

    for handler in &mut method.handlers {
        if let Some(catch_type) = &mut handler.catch_type {
            if !catch_type.starts_with(EXCEPTION_WRAPPER_PREFIX) {
                *catch_type = exception_wrapper_name(catch_type);
            }
        }
    }
    patch.apply(method);
}

pub fn exception_wrapper_name(class: &str) -> String {
    format!("{}{}", EXCEPTION_WRAPPER_PREFIX, class)
}

/// Build the wrapper class for shadow throwable `wrapped`.
///
/// Wrappers mirror the shadow hierarchy so catch clauses keep their
/// subtype semantics. The wrapper of the root throwable holds the payload.
pub fn generate_exception_wrapper(wrapped: &str, wrapped_super: Option<&str>) -> ClassFile {
    let name = exception_wrapper_name(wrapped);
    match wrapped_super {
        Some(parent) if wrapped != SHADOW_THROWABLE => {
            ClassFile::new(name, Some(exception_wrapper_name(parent).as_str()))
        }
        _ => ClassFile::new(name, Some(SHADOW_OBJECT)).with_field(
            UNDERLYING_FIELD,
            "Ls/java/lang/Object;",
            false,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use avm_types::ExceptionHandler;

    fn guarded() -> MethodDecl {
        MethodDecl::new("m", "()I").with_code(
            vec![
                Instruction::New("s/java/lang/RuntimeException".into()),
                Instruction::AThrow,
                Instruction::Pop,
                Instruction::IConst(1),
                Instruction::IReturn,
            ],
            vec![ExceptionHandler {
                start: 0,
                end: 2,
                handler: 2,
                catch_type: Some("s/java/lang/RuntimeException".into()),
            }],
        )
    }

    #[test]
    fn test_throw_and_catch_wrapped() {
        let mut method = guarded();
        instrument(&mut method);
        assert_eq!(method.code[1], helper::call(WRAP_THROWABLE));
        assert_eq!(method.code[2], Instruction::AThrow);
        let h = &method.handlers[0];
        assert_eq!(method.code[h.handler as usize], helper::call(UNWRAP_THROWABLE));
        assert_eq!(
            h.catch_type.as_deref(),
            Some("avm/exceptionwrapper/s/java/lang/RuntimeException")
        );
        assert_eq!(h.end, 3);

        let snapshot = method.clone();
        instrument(&mut method);
        assert_eq!(method, snapshot);
    }

    #[test]
    fn test_catch_all_stays_catch_all() {
        let mut method = guarded();
        method.handlers[0].catch_type = None;
        instrument(&mut method);
        assert!(method.handlers[0].catch_type.is_none());
    }

    #[test]
    fn test_wrapper_generation() {
        let root = generate_exception_wrapper(SHADOW_THROWABLE, Some(SHADOW_OBJECT));
        assert_eq!(root.name, "avm/exceptionwrapper/s/java/lang/Throwable");
        assert_eq!(root.super_name.as_deref(), Some(SHADOW_OBJECT));
        assert_eq!(root.fields[0].name, UNDERLYING_FIELD);

        let child = generate_exception_wrapper("com/MyError", Some("s/java/lang/Exception"));
        assert_eq!(
            child.super_name.as_deref(),
            Some("avm/exceptionwrapper/s/java/lang/Exception")
        );
        assert!(child.fields.is_empty());
    }
}
