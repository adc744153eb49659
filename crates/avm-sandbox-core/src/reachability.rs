//! Method reachability over the static call graph.
//!
//! Mark-and-sweep from the entry method: every method starts unreached and
//! is marked at most once, after which its call sites are queued. Dispatch
//! decides which declarations a call site can land on:
//!
//! ```text
//! special           -> the resolved declaration only
//! static            -> the declaring class, found by walking supertypes
//! virtual/interface -> the declaration, plus every override (or inherited
//! /dynamic             concrete implementation) in transitive subtypes
//! ```
//!
//! Call sites into the library or into arrays are not followed. A call site
//! whose target cannot be resolved means the class set is corrupt and fails
//! the analysis.

use crate::errors::AnalysisError;
use crate::hierarchy::ExternalClasses;
use crate::naming::{shadow_class_name, shadow_descriptor};
use crate::pipeline::wrap_descriptor;
use avm_types::{ClassFile, Instruction, InvokeKind};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

/// Methods the runtime itself may call on any object.
pub const ALWAYS_REACHABLE: [&str; 3] = ["<clinit>()V", "hashCode()I", "equals(Ljava/lang/Object;)Z"];

/// (owning class, `name + descriptor`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodKey {
    pub class: String,
    pub signature: String,
}

impl MethodKey {
    pub fn new(class: impl Into<String>, signature: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            signature: signature.into(),
        }
    }
}

impl std::fmt::Display for MethodKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.class, self.signature)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSite {
    pub owner: String,
    pub signature: String,
    pub kind: InvokeKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodInfo {
    pub key: MethodKey,
    pub is_static: bool,
    pub is_abstract: bool,
    /// Monotonic: once set it is never cleared.
    pub reachable: bool,
    pub call_sites: Vec<CallSite>,
}

/// Outcome of one analysis run.
#[derive(Debug, Clone, Default)]
pub struct ReachabilityReport {
    methods: BTreeMap<MethodKey, MethodInfo>,
}

impl ReachabilityReport {
    pub fn is_reachable(&self, class: &str, signature: &str) -> bool {
        self.methods
            .get(&MethodKey::new(class, signature))
            .is_some_and(|m| m.reachable)
    }

    pub fn method(&self, class: &str, signature: &str) -> Option<&MethodInfo> {
        self.methods.get(&MethodKey::new(class, signature))
    }

    pub fn reachable_methods(&self) -> impl Iterator<Item = &MethodKey> {
        self.methods.values().filter(|m| m.reachable).map(|m| &m.key)
    }

    pub fn unreachable_methods(&self) -> impl Iterator<Item = &MethodKey> {
        self.methods.values().filter(|m| !m.reachable).map(|m| &m.key)
    }

    /// Classes owning at least one reachable method.
    pub fn reachable_classes(&self) -> BTreeSet<&str> {
        self.reachable_methods().map(|k| k.class.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

/// Where a declaration lookup ended.
enum Resolution {
    User(MethodKey),
    Library,
}

pub struct MethodReachabilityAnalyzer<'a> {
    classes: &'a BTreeMap<String, ClassFile>,
    library: &'a dyn ExternalClasses,
    /// Direct subclasses and implementors, by supertype name.
    subtypes: HashMap<&'a str, Vec<&'a str>>,
    methods: BTreeMap<MethodKey, MethodInfo>,
    queue: VecDeque<MethodKey>,
}

impl<'a> MethodReachabilityAnalyzer<'a> {
    /// `classes` are the user classes as submitted; `library` answers for
    /// shadow-namespace ancestors.
    pub fn new(classes: &'a BTreeMap<String, ClassFile>, library: &'a dyn ExternalClasses) -> Self {
        let mut subtypes: HashMap<&str, Vec<&str>> = HashMap::new();
        let mut methods = BTreeMap::new();
        for class in classes.values() {
            for parent in class.super_name.iter().chain(&class.interfaces) {
                subtypes.entry(parent.as_str()).or_default().push(class.name.as_str());
            }
            for method in &class.methods {
                let key = MethodKey::new(&class.name, method.signature());
                let call_sites = method
                    .code
                    .iter()
                    .filter_map(|i| match i {
                        Instruction::Invoke(kind, m) => Some(CallSite {
                            owner: m.owner.clone(),
                            signature: m.signature(),
                            kind: *kind,
                        }),
                        _ => None,
                    })
                    .collect();
                methods.insert(
                    key.clone(),
                    MethodInfo {
                        key,
                        is_static: method.flags.is_static,
                        is_abstract: method.flags.is_abstract,
                        reachable: false,
                        call_sites,
                    },
                );
            }
        }
        Self {
            classes,
            library,
            subtypes,
            methods,
            queue: VecDeque::new(),
        }
    }

    /// Run to a fixed point from the static method `entry_method` of
    /// `entry_class`.
    pub fn analyze(mut self, entry_class: &str, entry_method: &str) -> Result<ReachabilityReport, AnalysisError> {
        let class = self
            .classes
            .get(entry_class)
            .ok_or_else(|| AnalysisError::MissingEntryClass(entry_class.to_string()))?;
        let entries: Vec<MethodKey> = class
            .methods
            .iter()
            .filter(|m| m.name == entry_method && m.flags.is_static)
            .map(|m| MethodKey::new(entry_class, m.signature()))
            .collect();
        if entries.is_empty() {
            return Err(AnalysisError::MissingEntryMethod {
                class: entry_class.to_string(),
                method: entry_method.to_string(),
            });
        }
        for key in entries {
            self.mark(key);
        }
        let always: Vec<MethodKey> = self
            .methods
            .keys()
            .filter(|k| ALWAYS_REACHABLE.contains(&k.signature.as_str()))
            .cloned()
            .collect();
        for key in always {
            self.mark(key);
        }

        while let Some(key) = self.queue.pop_front() {
            let call_sites = self
                .methods
                .get(&key)
                .map(|m| m.call_sites.clone())
                .unwrap_or_default();
            for site in call_sites {
                self.visit(&site)?;
            }
        }

        let report = ReachabilityReport { methods: self.methods };
        tracing::debug!(
            methods = report.len(),
            reachable = report.reachable_methods().count(),
            "reachability analysis finished"
        );
        Ok(report)
    }

    fn mark(&mut self, key: MethodKey) {
        if let Some(info) = self.methods.get_mut(&key) {
            if !info.reachable {
                info.reachable = true;
                tracing::trace!(method = %key, "reached");
                self.queue.push_back(key);
            }
        }
    }

    fn visit(&mut self, site: &CallSite) -> Result<(), AnalysisError> {
        if !self.classes.contains_key(&site.owner) {
            return Ok(());
        }
        if let Resolution::User(key) = self.resolve_declaration(&site.owner, &site.signature)? {
            self.mark(key);
        }
        match site.kind {
            InvokeKind::Special | InvokeKind::Static => Ok(()),
            InvokeKind::Virtual | InvokeKind::Interface | InvokeKind::Dynamic => {
                self.visit_overrides(&site.owner, &site.signature)
            }
        }
    }

    fn visit_overrides(&mut self, owner: &str, signature: &str) -> Result<(), AnalysisError> {
        let classes = self.classes;
        let owner_is_interface = classes.get(owner).is_some_and(ClassFile::is_interface);
        for descendant in self.descendants(owner) {
            let Some(class) = classes.get(descendant) else {
                continue;
            };
            let declares = class.methods.iter().any(|m| m.signature() == signature);
            if declares {
                self.mark(MethodKey::new(descendant, signature));
            } else if owner_is_interface && !class.is_interface() && !class.flags.is_abstract {
                match self.resolve_implementation(descendant, signature)? {
                    Resolution::User(key) => self.mark(key),
                    Resolution::Library => {}
                }
            }
        }
        Ok(())
    }

    /// Every transitive subclass and implementor of `class`.
    fn descendants(&self, class: &str) -> Vec<&'a str> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<&str> = self.subtypes.get(class).cloned().unwrap_or_default().into();
        let mut out = Vec::new();
        while let Some(next) = queue.pop_front() {
            if seen.insert(next) {
                out.push(next);
                queue.extend(self.subtypes.get(next).into_iter().flatten().copied());
            }
        }
        out
    }

    /// Find the declaration a call site on `class` binds to: the class, its
    /// superclasses, then its super-interfaces.
    fn resolve_declaration(&self, class: &str, signature: &str) -> Result<Resolution, AnalysisError> {
        let mut cursor = Some(class.to_string());
        let mut interfaces = Vec::new();
        while let Some(name) = cursor {
            let Some(c) = self.classes.get(&name) else {
                return if self.library_declares(&name, signature) {
                    Ok(Resolution::Library)
                } else {
                    Err(missing_declaration(class, signature))
                };
            };
            if c.methods.iter().any(|m| m.signature() == signature) {
                return Ok(Resolution::User(MethodKey::new(&name, signature)));
            }
            interfaces.extend(c.interfaces.iter().cloned());
            cursor = c.super_name.clone();
        }
        self.resolve_in_interfaces(interfaces, signature)?
            .ok_or_else(|| missing_declaration(class, signature))
    }

    fn resolve_in_interfaces(
        &self,
        mut pending: Vec<String>,
        signature: &str,
    ) -> Result<Option<Resolution>, AnalysisError> {
        let mut seen = BTreeSet::new();
        while let Some(name) = pending.pop() {
            if !seen.insert(name.clone()) {
                continue;
            }
            match self.classes.get(&name) {
                Some(i) if i.methods.iter().any(|m| m.signature() == signature) => {
                    return Ok(Some(Resolution::User(MethodKey::new(&name, signature))));
                }
                Some(i) => pending.extend(i.interfaces.iter().cloned()),
                None if self.library_declares(&name, signature) => return Ok(Some(Resolution::Library)),
                None => {}
            }
        }
        Ok(None)
    }

    /// The concrete implementation concrete class `class` inherits.
    fn resolve_implementation(&self, class: &str, signature: &str) -> Result<Resolution, AnalysisError> {
        let mut cursor = Some(class.to_string());
        let mut interfaces = Vec::new();
        while let Some(name) = cursor {
            let Some(c) = self.classes.get(&name) else {
                if self.library_declares(&name, signature) {
                    return Ok(Resolution::Library);
                }
                break;
            };
            if c.methods.iter().any(|m| m.signature() == signature && m.has_body()) {
                return Ok(Resolution::User(MethodKey::new(&name, signature)));
            }
            interfaces.extend(c.interfaces.iter().cloned());
            cursor = c.super_name.clone();
        }
        // Default methods.
        let mut seen = BTreeSet::new();
        while let Some(name) = interfaces.pop() {
            if !seen.insert(name.clone()) {
                continue;
            }
            if let Some(i) = self.classes.get(&name) {
                if i.methods.iter().any(|m| m.signature() == signature && m.has_body()) {
                    return Ok(Resolution::User(MethodKey::new(&name, signature)));
                }
                interfaces.extend(i.interfaces.iter().cloned());
            }
        }
        Err(AnalysisError::MissingImplementation {
            class: class.to_string(),
            signature: signature.to_string(),
        })
    }

    /// Whether library class `name` or one of its library ancestors declares
    /// `signature`. Names and descriptors are compared in the shadow namespace.
    fn library_declares(&self, name: &str, signature: &str) -> bool {
        let Some(paren) = signature.find('(') else {
            return false;
        };
        let (method_name, descriptor) = signature.split_at(paren);
        let shadowed = shadow_descriptor(descriptor);
        // Runtime API classes are declared with array types already wrapped.
        let wrapped = wrap_descriptor(&shadowed).unwrap_or_else(|_| shadowed.clone());

        let mut pending = vec![shadow_class_name(name)];
        let mut seen = BTreeSet::new();
        while let Some(current) = pending.pop() {
            if !seen.insert(current.clone()) {
                continue;
            }
            let Some(class) = self.library.external_class(&current) else {
                continue;
            };
            if class.method(method_name, &shadowed).is_some()
                || class.method(method_name, &wrapped).is_some()
            {
                return true;
            }
            pending.extend(class.super_name.iter().cloned());
            pending.extend(class.interfaces.iter().cloned());
        }
        false
    }
}

fn missing_declaration(class: &str, signature: &str) -> AnalysisError {
    AnalysisError::MissingDeclaration {
        class: class.to_string(),
        signature: signature.to_string(),
    }
}

/// Convenience wrapper over [`MethodReachabilityAnalyzer`].
pub fn analyze(
    classes: &BTreeMap<String, ClassFile>,
    library: &dyn ExternalClasses,
    entry_class: &str,
    entry_method: &str,
) -> Result<ReachabilityReport, AnalysisError> {
    MethodReachabilityAnalyzer::new(classes, library).analyze(entry_class, entry_method)
}

#[cfg(test)]
mod tests {
    use super::*;
    use avm_types::MethodDecl;

    fn library() -> BTreeMap<String, ClassFile> {
        let object = ClassFile::new("s/java/lang/Object", None)
            .with_method(MethodDecl::new("<init>", "()V").with_code(vec![Instruction::Return], vec![]))
            .with_method(MethodDecl::new("hashCode", "()I").with_native());
        BTreeMap::from([(object.name.clone(), object)])
    }

    fn body(calls: Vec<Instruction>) -> Vec<Instruction> {
        calls.into_iter().chain([Instruction::Return]).collect()
    }

    fn classes(list: Vec<ClassFile>) -> BTreeMap<String, ClassFile> {
        list.into_iter().map(|c| (c.name.clone(), c)).collect()
    }

    fn entry_calling(owner: &str, kind: InvokeKind, name: &str) -> ClassFile {
        ClassFile::new("A", Some("java/lang/Object")).with_method(
            MethodDecl::new("main", "()V").with_static().with_code(
                body(vec![
                    Instruction::AConstNull,
                    Instruction::invoke(kind, owner, name, "()V"),
                ]),
                vec![],
            ),
        )
    }

    #[test]
    fn test_virtual_call_reaches_overrides() {
        let set = classes(vec![
            entry_calling("B", InvokeKind::Virtual, "bar"),
            ClassFile::new("B", Some("java/lang/Object"))
                .with_method(MethodDecl::new("bar", "()V").with_code(body(vec![]), vec![]))
                .with_method(MethodDecl::new("unused", "()V").with_code(body(vec![]), vec![])),
            ClassFile::new("C", Some("B"))
                .with_method(MethodDecl::new("bar", "()V").with_code(body(vec![]), vec![])),
        ]);
        let lib = library();
        let report = analyze(&set, &lib, "A", "main").unwrap();
        assert!(report.is_reachable("A", "main()V"));
        assert!(report.is_reachable("B", "bar()V"));
        assert!(report.is_reachable("C", "bar()V"));
        assert!(!report.is_reachable("B", "unused()V"));
    }

    #[test]
    fn test_special_call_marks_only_target() {
        let set = classes(vec![
            entry_calling("B", InvokeKind::Special, "bar"),
            ClassFile::new("B", Some("java/lang/Object"))
                .with_method(MethodDecl::new("bar", "()V").with_code(body(vec![]), vec![])),
            ClassFile::new("C", Some("B"))
                .with_method(MethodDecl::new("bar", "()V").with_code(body(vec![]), vec![])),
        ]);
        let lib = library();
        let report = analyze(&set, &lib, "A", "main").unwrap();
        assert!(report.is_reachable("B", "bar()V"));
        assert!(!report.is_reachable("C", "bar()V"));
    }

    #[test]
    fn test_static_call_resolves_declaring_class() {
        let set = classes(vec![
            entry_calling("Sub", InvokeKind::Static, "util"),
            ClassFile::new("Base", Some("java/lang/Object")).with_method(
                MethodDecl::new("util", "()V").with_static().with_code(body(vec![]), vec![]),
            ),
            ClassFile::new("Sub", Some("Base")),
        ]);
        let lib = library();
        let report = analyze(&set, &lib, "A", "main").unwrap();
        assert!(report.is_reachable("Base", "util()V"));
    }

    #[test]
    fn test_interface_call_marks_inherited_implementation() {
        // Abstract class implements the interface without declaring run();
        // the concrete subclass inherits run() from an unrelated base.
        let set = classes(vec![
            entry_calling("Task", InvokeKind::Interface, "run"),
            ClassFile::new("Task", Some("java/lang/Object"))
                .with_interface_flag()
                .with_method(MethodDecl::new("run", "()V").with_abstract()),
            ClassFile::new("Runner", Some("java/lang/Object"))
                .with_method(MethodDecl::new("run", "()V").with_code(body(vec![]), vec![])),
            ClassFile::new("AbstractTask", Some("Runner"))
                .with_abstract()
                .with_interfaces(["Task"]),
            ClassFile::new("Concrete", Some("AbstractTask")),
        ]);
        let lib = library();
        let report = analyze(&set, &lib, "A", "main").unwrap();
        assert!(report.is_reachable("Runner", "run()V"));
    }

    #[test]
    fn test_missing_implementation_fails() {
        let set = classes(vec![
            entry_calling("Task", InvokeKind::Interface, "run"),
            ClassFile::new("Task", Some("java/lang/Object"))
                .with_interface_flag()
                .with_method(MethodDecl::new("run", "()V").with_abstract()),
            ClassFile::new("Broken", Some("java/lang/Object")).with_interfaces(["Task"]),
        ]);
        let lib = library();
        let err = analyze(&set, &lib, "A", "main").unwrap_err();
        assert!(matches!(err, AnalysisError::MissingImplementation { class, .. } if class == "Broken"));
    }

    #[test]
    fn test_missing_declaration_fails() {
        let set = classes(vec![
            entry_calling("B", InvokeKind::Virtual, "ghost"),
            ClassFile::new("B", Some("java/lang/Object")),
        ]);
        let lib = library();
        assert!(matches!(
            analyze(&set, &lib, "A", "main"),
            Err(AnalysisError::MissingDeclaration { .. })
        ));
    }

    #[test]
    fn test_library_declaration_accepted_and_seeds() {
        let set = classes(vec![
            ClassFile::new("A", Some("java/lang/Object")).with_method(
                MethodDecl::new("main", "()V").with_static().with_code(
                    body(vec![Instruction::invoke(InvokeKind::Special, "A", "<init>", "()V")]),
                    vec![],
                ),
            )
            .with_method(MethodDecl::new("<clinit>", "()V").with_static().with_code(body(vec![]), vec![]))
            .with_method(MethodDecl::new("hashCode", "()I").with_code(
                vec![Instruction::IConst(1), Instruction::IReturn],
                vec![],
            )),
        ]);
        let lib = library();
        let report = analyze(&set, &lib, "A", "main").unwrap();
        assert!(report.is_reachable("A", "<clinit>()V"));
        assert!(report.is_reachable("A", "hashCode()I"));
    }

    #[test]
    fn test_entry_errors() {
        let set = classes(vec![ClassFile::new("A", Some("java/lang/Object"))]);
        let lib = library();
        assert_eq!(
            analyze(&set, &lib, "Missing", "main").unwrap_err(),
            AnalysisError::MissingEntryClass("Missing".into())
        );
        assert!(matches!(
            analyze(&set, &lib, "A", "main").unwrap_err(),
            AnalysisError::MissingEntryMethod { .. }
        ));
    }
}
