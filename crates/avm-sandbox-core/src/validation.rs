//! Pre-acceptance checks on a submitted package.
//!
//! Validation runs on the classes exactly as submitted, before anything is
//! rewritten. Everything the later stages assume about their input is
//! checked here: well-formed descriptors, resolvable type references, no
//! reserved namespaces, in-bounds jumps, handlers and locals.

use crate::config::SandboxConfig;
use crate::errors::ValidationError;
use crate::hierarchy::ExternalClasses;
use crate::naming::shadow_class_name;
use avm_types::descriptor::{map_class_names, type_operand};
use avm_types::{
    ClassFile, ContractPackage, ElementType, FieldType, Instruction, MethodDecl, MethodDescriptor,
    API_PREFIX, JDK_PREFIX, RUNTIME_PREFIX, SHADOW_PREFIX, SHADOW_THROWABLE,
};
use std::cell::RefCell;
use std::collections::BTreeMap;

/// Decode and check every class of `package`.
pub fn validate_package(
    package: &ContractPackage,
    config: &SandboxConfig,
    library: &dyn ExternalClasses,
) -> Result<BTreeMap<String, ClassFile>, ValidationError> {
    if package.classes.len() > config.max_class_count {
        return Err(ValidationError::TooManyClasses {
            count: package.classes.len(),
            limit: config.max_class_count,
        });
    }
    let size = package.code_size();
    if size > config.max_code_size {
        return Err(ValidationError::CodeTooLarge {
            size,
            limit: config.max_code_size,
        });
    }

    let mut classes = BTreeMap::new();
    for (key, bytes) in &package.classes {
        let class = ClassFile::decode(bytes)?;
        if &class.name != key {
            return Err(ValidationError::NameMismatch {
                key: key.clone(),
                name: class.name,
            });
        }
        classes.insert(key.clone(), class);
    }

    let validator = Validator {
        classes: &classes,
        library,
    };
    for class in classes.values() {
        validator.check_class(class)?;
    }
    tracing::debug!(classes = classes.len(), size, "package validated");
    Ok(classes)
}

struct Validator<'a> {
    classes: &'a BTreeMap<String, ClassFile>,
    library: &'a dyn ExternalClasses,
}

impl Validator<'_> {
    fn check_class(&self, class: &ClassFile) -> Result<(), ValidationError> {
        let name = &class.name;
        if is_reserved(name) || name.starts_with(JDK_PREFIX) || name.starts_with(API_PREFIX) {
            return Err(ValidationError::ReservedNamespace(name.clone()));
        }
        let super_name = class
            .super_name
            .as_deref()
            .ok_or_else(|| ValidationError::MissingSuperclass(name.clone()))?;
        self.check_type_name(name, super_name)?;
        for interface in &class.interfaces {
            self.check_type_name(name, interface)?;
        }

        for field in &class.fields {
            FieldType::parse(&field.descriptor).map_err(|source| ValidationError::Descriptor {
                class: name.clone(),
                source,
            })?;
            self.check_descriptor_names(name, &field.descriptor)?;
        }
        for method in &class.methods {
            self.check_method(class, method)?;
        }
        Ok(())
    }

    fn check_method(&self, class: &ClassFile, method: &MethodDecl) -> Result<(), ValidationError> {
        let name = &class.name;
        let malformed = |reason: String| ValidationError::MalformedCode {
            class: name.clone(),
            method: method.signature(),
            reason,
        };

        if method.flags.is_native {
            return Err(ValidationError::NativeMethod {
                class: name.clone(),
                method: method.signature(),
            });
        }
        let descriptor =
            MethodDescriptor::parse(&method.descriptor).map_err(|source| ValidationError::Descriptor {
                class: name.clone(),
                source,
            })?;
        self.check_descriptor_names(name, &method.descriptor)?;

        if method.flags.is_abstract {
            if !method.code.is_empty() || !method.handlers.is_empty() {
                return Err(malformed("abstract method has a body".into()));
            }
            return Ok(());
        }
        let Some(last) = method.code.last() else {
            return Err(malformed("empty body".into()));
        };
        if !last.is_unconditional_exit() {
            return Err(malformed("control falls off the end of the body".into()));
        }

        let receiver = usize::from(!method.flags.is_static);
        if usize::from(method.max_locals) < descriptor.params.len() + receiver {
            return Err(malformed(format!(
                "max_locals {} cannot hold the arguments",
                method.max_locals
            )));
        }

        let len = method.code.len();
        for (i, instruction) in method.code.iter().enumerate() {
            if let Some(target) = instruction.branch_target() {
                if target as usize >= len {
                    return Err(malformed(format!("jump at {} targets {} out of range", i, target)));
                }
            }
            if let Some(slot) = local_slot(instruction) {
                if slot >= method.max_locals {
                    return Err(malformed(format!("local {} out of range at {}", slot, i)));
                }
            }
            self.check_instruction(name, instruction)
                .map_err(|e| match e {
                    ValidationError::Descriptor { .. }
                    | ValidationError::UnknownType { .. }
                    | ValidationError::ReservedNamespace(_) => e,
                    other => malformed(other.to_string()),
                })?;
        }

        for handler in &method.handlers {
            let (start, end, entry) = (handler.start as usize, handler.end as usize, handler.handler as usize);
            if start >= end || end > len || entry >= len {
                return Err(malformed(format!(
                    "handler range [{}, {}) -> {} out of bounds",
                    start, end, entry
                )));
            }
            if let Some(catch_type) = &handler.catch_type {
                self.check_type_name(name, catch_type)?;
                if !self.is_throwable(catch_type) {
                    return Err(ValidationError::NotThrowable {
                        class: name.clone(),
                        catch_type: catch_type.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    fn check_instruction(&self, class: &str, instruction: &Instruction) -> Result<(), ValidationError> {
        let descriptor_error = |source| ValidationError::Descriptor {
            class: class.to_string(),
            source,
        };
        match instruction {
            Instruction::New(n) | Instruction::CheckCast(n) | Instruction::InstanceOf(n) => {
                type_operand(n).map_err(descriptor_error)?;
                self.check_type_name(class, n)
            }
            Instruction::ANewArray(component) => {
                type_operand(component).map_err(descriptor_error)?;
                self.check_type_name(class, component)
            }
            Instruction::MultiANewArray(descriptor, dims) => {
                match FieldType::parse(descriptor).map_err(descriptor_error)? {
                    FieldType::Array { dimensions, .. } if *dims >= 1 && *dims <= dimensions => {}
                    _ => {
                        return Err(ValidationError::MalformedCode {
                            class: class.to_string(),
                            method: String::new(),
                            reason: format!("bad multianewarray {} / {}", descriptor, dims),
                        })
                    }
                }
                self.check_descriptor_names(class, descriptor)
            }
            Instruction::GetField(m)
            | Instruction::PutField(m)
            | Instruction::GetStatic(m)
            | Instruction::PutStatic(m) => {
                FieldType::parse(&m.descriptor).map_err(descriptor_error)?;
                self.check_type_name(class, &m.owner)?;
                self.check_descriptor_names(class, &m.descriptor)
            }
            Instruction::Invoke(_, m) => {
                MethodDescriptor::parse(&m.descriptor).map_err(descriptor_error)?;
                self.check_type_name(class, &m.owner)?;
                self.check_descriptor_names(class, &m.descriptor)
            }
            _ => Ok(()),
        }
    }

    fn check_descriptor_names(&self, class: &str, descriptor: &str) -> Result<(), ValidationError> {
        let first_error = RefCell::new(None);
        map_class_names(descriptor, |name| {
            if first_error.borrow().is_none() {
                if let Err(e) = self.check_type_name(class, name) {
                    *first_error.borrow_mut() = Some(e);
                }
            }
            name.to_string()
        });
        match first_error.into_inner() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// A referenced type must be a submitted class, a library class, or an
    /// array of either.
    fn check_type_name(&self, class: &str, referenced: &str) -> Result<(), ValidationError> {
        if referenced.starts_with('[') {
            return match type_operand(referenced) {
                Ok(FieldType::Array {
                    element: ElementType::Object(element),
                    ..
                }) => self.check_type_name(class, &element),
                Ok(_) => Ok(()),
                Err(source) => Err(ValidationError::Descriptor {
                    class: class.to_string(),
                    source,
                }),
            };
        }
        if is_reserved(referenced) {
            return Err(ValidationError::ReservedNamespace(referenced.to_string()));
        }
        let known = self.classes.contains_key(referenced)
            || self.library.external_class(&shadow_class_name(referenced)).is_some();
        if known {
            Ok(())
        } else {
            Err(ValidationError::UnknownType {
                class: class.to_string(),
                referenced: referenced.to_string(),
            })
        }
    }

    fn is_throwable(&self, name: &str) -> bool {
        let mut cursor = Some(name.to_string());
        let mut steps = 0;
        while let Some(current) = cursor {
            if shadow_class_name(&current) == SHADOW_THROWABLE {
                return true;
            }
            // Guards against cyclic input; the hierarchy reports cycles later.
            steps += 1;
            if steps > self.classes.len() + 64 {
                return false;
            }
            cursor = match self.classes.get(&current) {
                Some(c) => c.super_name.clone(),
                None => self
                    .library
                    .external_class(&shadow_class_name(&current))
                    .and_then(|c| c.super_name.clone()),
            };
        }
        false
    }
}

/// Names user code may not define or mention directly.
fn is_reserved(name: &str) -> bool {
    name.starts_with(SHADOW_PREFIX) || (name.starts_with(RUNTIME_PREFIX) && !name.starts_with(API_PREFIX))
}

fn local_slot(instruction: &Instruction) -> Option<u16> {
    match instruction {
        Instruction::ILoad(s)
        | Instruction::LLoad(s)
        | Instruction::ALoad(s)
        | Instruction::IStore(s)
        | Instruction::LStore(s)
        | Instruction::AStore(s)
        | Instruction::IInc(s, _) => Some(*s),
        _ => None,
    }
}
