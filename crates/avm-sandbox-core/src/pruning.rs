//! Dead-code pruning driven by a reachability report.

use crate::reachability::ReachabilityReport;
use avm_types::descriptor::map_class_names;
use avm_types::{ClassFile, Instruction};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};

/// Reduce `classes` to what reachable code can touch.
///
/// Kept: classes owning a reachable method, classes named by reachable code
/// or by a kept class's fields, and every user ancestor of a kept class.
/// Within kept classes, concrete methods that are not reachable are dropped;
/// abstract declarations stay so the class shape is unchanged.
pub fn prune_unreachable(
    classes: &BTreeMap<String, ClassFile>,
    report: &ReachabilityReport,
) -> BTreeMap<String, ClassFile> {
    let mut keep: BTreeSet<String> = report.reachable_classes().into_iter().map(str::to_string).collect();
    for key in report.reachable_methods() {
        let Some(method) = classes
            .get(&key.class)
            .and_then(|c| c.methods.iter().find(|m| m.signature() == key.signature))
        else {
            continue;
        };
        keep.extend(names_in_descriptor(&method.descriptor));
        for instruction in &method.code {
            keep.extend(names_in_instruction(instruction));
        }
        keep.extend(method.handlers.iter().filter_map(|h| h.catch_type.clone()));
    }

    // Close over ancestors and field types until nothing new appears.
    let mut pending: Vec<String> = keep.iter().cloned().collect();
    while let Some(name) = pending.pop() {
        let Some(class) = classes.get(&name) else {
            continue;
        };
        let related = class
            .super_name
            .iter()
            .chain(&class.interfaces)
            .cloned()
            .chain(class.fields.iter().flat_map(|f| names_in_descriptor(&f.descriptor)));
        for other in related {
            if classes.contains_key(&other) && keep.insert(other.clone()) {
                pending.push(other);
            }
        }
    }

    let pruned: BTreeMap<String, ClassFile> = classes
        .iter()
        .filter(|(name, _)| keep.contains(*name))
        .map(|(name, class)| {
            let mut class = class.clone();
            class
                .methods
                .retain(|m| !m.has_body() || report.is_reachable(name, &m.signature()));
            (name.clone(), class)
        })
        .collect();

    tracing::debug!(
        before = classes.len(),
        after = pruned.len(),
        "pruned unreachable code"
    );
    pruned
}

fn names_in_descriptor(descriptor: &str) -> Vec<String> {
    let names = RefCell::new(Vec::new());
    map_class_names(descriptor, |name| {
        names.borrow_mut().push(name.to_string());
        name.to_string()
    });
    names.into_inner()
}

fn names_in_instruction(instruction: &Instruction) -> Vec<String> {
    match instruction {
        Instruction::New(name)
        | Instruction::ANewArray(name)
        | Instruction::CheckCast(name)
        | Instruction::InstanceOf(name) => {
            let mut names = names_in_descriptor(name);
            names.push(name.clone());
            names
        }
        Instruction::MultiANewArray(descriptor, _) => names_in_descriptor(descriptor),
        Instruction::GetField(m)
        | Instruction::PutField(m)
        | Instruction::GetStatic(m)
        | Instruction::PutStatic(m)
        | Instruction::Invoke(_, m) => {
            let mut names = names_in_descriptor(&m.descriptor);
            names.push(m.owner.clone());
            names
        }
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reachability::analyze;
    use avm_types::{InvokeKind, MethodDecl};

    #[test]
    fn test_prune_keeps_reachable_and_ancestors() {
        let ret = || vec![Instruction::Return];
        let classes: BTreeMap<String, ClassFile> = [
            ClassFile::new("Main", Some("java/lang/Object")).with_method(
                MethodDecl::new("main", "()V").with_static().with_code(
                    vec![
                        Instruction::AConstNull,
                        Instruction::invoke(InvokeKind::Virtual, "Child", "go", "()V"),
                        Instruction::Return,
                    ],
                    vec![],
                ),
            ),
            ClassFile::new("Base", Some("java/lang/Object"))
                .with_field("payload", "LPayload;", false)
                .with_method(MethodDecl::new("helper", "()V").with_code(ret(), vec![])),
            ClassFile::new("Payload", Some("java/lang/Object")),
            ClassFile::new("Child", Some("Base"))
                .with_method(MethodDecl::new("go", "()V").with_code(ret(), vec![]))
                .with_method(MethodDecl::new("dead", "()V").with_code(ret(), vec![])),
            ClassFile::new("Orphan", Some("java/lang/Object"))
                .with_method(MethodDecl::new("never", "()V").with_code(ret(), vec![])),
        ]
        .into_iter()
        .map(|c| (c.name.clone(), c))
        .collect();

        let library: BTreeMap<String, ClassFile> = BTreeMap::new();
        let report = analyze(&classes, &library, "Main", "main").unwrap();
        let pruned = prune_unreachable(&classes, &report);

        let names: Vec<&str> = pruned.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["Base", "Child", "Main", "Payload"]);
        let child = &pruned["Child"];
        assert!(child.method("go", "()V").is_some());
        assert!(child.method("dead", "()V").is_none());
        assert!(pruned["Base"].methods.is_empty());
    }

    #[test]
    fn test_names_in_descriptor() {
        assert_eq!(
            names_in_descriptor("(ILcom/A;[Lcom/B;)Lcom/C;"),
            vec!["com/A", "com/B", "com/C"]
        );
    }
}
