//! Class loading for one invocation.
//!
//! Definitions come from an ordered chain of providers: the contract's own
//! transformed classes, the shadow library, generated array wrappers and
//! generated exception wrappers. The first provider that knows a name wins.
//! [`ClassTable`] links what the chain returns into [`LoadedClass`]es with
//! resolved field layouts and supertype sets.

use super::{invariant, shadow::ShadowLibrary, Unwind};
use crate::arraywrap::{ElementShape, TypeResolver, WrapperCache};
use crate::pipeline::generate_exception_wrapper;
use anyhow::Context;
use avm_types::{ArrayKind, ClassFile, FieldType, MethodDecl, EXCEPTION_WRAPPER_PREFIX};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

// =============================================================================
// Providers
// =============================================================================

/// One source of class definitions.
pub trait ClassProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Look up `class_name`. `chain` answers questions about other classes,
    /// for providers that synthesize definitions from existing ones.
    fn provide(&self, class_name: &str, chain: &ProviderChain<'_>) -> anyhow::Result<Option<ClassFile>>;

    /// Definitions from this provider belong to the contract.
    fn is_user(&self) -> bool {
        false
    }
}

/// The contract's transformed classes.
#[derive(Debug, Clone, Copy)]
pub struct UserClasses<'a>(pub &'a BTreeMap<String, ClassFile>);

impl ClassProvider for UserClasses<'_> {
    fn name(&self) -> &'static str {
        "user"
    }

    fn provide(&self, class_name: &str, _chain: &ProviderChain<'_>) -> anyhow::Result<Option<ClassFile>> {
        Ok(self.0.get(class_name).cloned())
    }

    fn is_user(&self) -> bool {
        true
    }
}

impl ClassProvider for ShadowLibrary {
    fn name(&self) -> &'static str {
        "shadow"
    }

    fn provide(&self, class_name: &str, _chain: &ProviderChain<'_>) -> anyhow::Result<Option<ClassFile>> {
        Ok(self.class(class_name).cloned())
    }
}

/// Array wrappers, generated on first request through the shared cache.
#[derive(Debug, Clone, Copy)]
pub struct ArrayWrappers<'a>(pub &'a WrapperCache);

impl ClassProvider for ArrayWrappers<'_> {
    fn name(&self) -> &'static str {
        "array-wrappers"
    }

    fn provide(&self, class_name: &str, chain: &ProviderChain<'_>) -> anyhow::Result<Option<ClassFile>> {
        let generated = self
            .0
            .resolve(class_name, &ChainResolver(chain))
            .with_context(|| format!("generating array wrapper {class_name}"))?;
        Ok(generated.map(|g| g.class.clone()))
    }
}

/// Wrappers around throwable classes, generated from the wrapped class.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExceptionWrappers;

impl ClassProvider for ExceptionWrappers {
    fn name(&self) -> &'static str {
        "exception-wrappers"
    }

    fn provide(&self, class_name: &str, chain: &ProviderChain<'_>) -> anyhow::Result<Option<ClassFile>> {
        let Some(wrapped) = class_name.strip_prefix(EXCEPTION_WRAPPER_PREFIX) else {
            return Ok(None);
        };
        let Some((class, _)) = chain.lookup(wrapped)? else {
            anyhow::bail!("exception wrapper for unknown class {wrapped}");
        };
        Ok(Some(generate_exception_wrapper(
            wrapped,
            class.super_name.as_deref(),
        )))
    }
}

/// Providers in lookup order.
pub struct ProviderChain<'a> {
    providers: Vec<&'a dyn ClassProvider>,
}

impl std::fmt::Debug for ProviderChain<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.providers.iter().map(|p| p.name()))
            .finish()
    }
}

impl<'a> ProviderChain<'a> {
    pub fn new(providers: Vec<&'a dyn ClassProvider>) -> Self {
        Self { providers }
    }

    /// The definition of `class_name` and whether it is a contract class.
    pub fn lookup(&self, class_name: &str) -> anyhow::Result<Option<(ClassFile, bool)>> {
        for provider in &self.providers {
            if let Some(class) = provider.provide(class_name, self)? {
                tracing::trace!(class = class_name, provider = provider.name(), "class provided");
                return Ok(Some((class, provider.is_user())));
            }
        }
        Ok(None)
    }
}

struct ChainResolver<'c, 'a>(&'c ProviderChain<'a>);

impl TypeResolver for ChainResolver<'_, '_> {
    fn element_shape(&self, class_name: &str) -> Option<ElementShape> {
        let (class, _) = self.0.lookup(class_name).ok().flatten()?;
        Some(ElementShape {
            is_interface: class.is_interface(),
            super_name: class.super_name,
            interfaces: class.interfaces,
        })
    }
}

// =============================================================================
// Linked classes
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSlot {
    /// Declaring class.
    pub owner: String,
    pub name: String,
    pub ty: FieldType,
}

/// A class linked for execution.
#[derive(Debug)]
pub struct LoadedClass {
    pub name: String,
    pub file: ClassFile,
    /// Defined by the contract rather than the runtime.
    pub user: bool,
    /// Instance fields of the class and all its ancestors, root first.
    pub instance_fields: Vec<FieldSlot>,
    pub static_fields: Vec<FieldSlot>,
    /// The class itself, its superclasses and every interface they implement.
    pub supertypes: BTreeSet<String>,
    /// Storage kind, for array wrappers and storage bases.
    pub array_kind: Option<ArrayKind>,
    /// Field name visible from each class in the chain -> slot.
    field_index: HashMap<String, HashMap<String, usize>>,
}

impl LoadedClass {
    /// Slot of field `name` as referenced through class `owner`.
    pub fn field_slot(&self, owner: &str, name: &str) -> Option<usize> {
        self.field_index.get(owner)?.get(name).copied()
    }

    pub fn static_index(&self, name: &str) -> Option<usize> {
        self.static_fields.iter().position(|f| f.name == name)
    }

    pub fn is_subtype_of(&self, class_name: &str) -> bool {
        self.supertypes.contains(class_name)
    }

    pub fn is_instantiable(&self) -> bool {
        !self.file.flags.is_abstract && !self.file.flags.is_interface
    }

    pub fn method(&self, index: usize) -> Option<&MethodDecl> {
        self.file.methods.get(index)
    }
}

/// Per-invocation cache of linked classes.
#[derive(Debug)]
pub struct ClassTable<'a> {
    chain: ProviderChain<'a>,
    loaded: HashMap<String, Arc<LoadedClass>>,
    loading: HashSet<String>,
}

impl<'a> ClassTable<'a> {
    pub fn new(chain: ProviderChain<'a>) -> Self {
        Self {
            chain,
            loaded: HashMap::new(),
            loading: HashSet::new(),
        }
    }

    pub fn loaded_count(&self) -> usize {
        self.loaded.len()
    }

    pub fn load(&mut self, class_name: &str) -> Result<Arc<LoadedClass>, Unwind> {
        if let Some(class) = self.loaded.get(class_name) {
            return Ok(Arc::clone(class));
        }
        if !self.loading.insert(class_name.to_string()) {
            return Err(invariant(format!("circular definition of {class_name}")));
        }
        let linked = self.link(class_name);
        self.loading.remove(class_name);
        let linked = Arc::new(linked?);
        self.loaded
            .insert(class_name.to_string(), Arc::clone(&linked));
        Ok(linked)
    }

    fn link(&mut self, class_name: &str) -> Result<LoadedClass, Unwind> {
        let (file, user) = self
            .chain
            .lookup(class_name)
            .map_err(|e| invariant(format!("loading {class_name}: {e:#}")))?
            .ok_or_else(|| invariant(format!("class {class_name} not found")))?;

        let parent = match &file.super_name {
            Some(parent) => Some(self.load(parent)?),
            None => None,
        };
        let mut supertypes = parent
            .as_ref()
            .map(|p| p.supertypes.clone())
            .unwrap_or_default();
        supertypes.insert(class_name.to_string());
        for interface in &file.interfaces {
            supertypes.extend(self.load(interface)?.supertypes.iter().cloned());
        }

        let mut instance_fields = parent
            .as_ref()
            .map(|p| p.instance_fields.clone())
            .unwrap_or_default();
        let mut field_index = parent
            .as_ref()
            .map(|p| p.field_index.clone())
            .unwrap_or_default();
        let mut visible = parent
            .as_ref()
            .and_then(|p| p.field_index.get(&p.name).cloned())
            .unwrap_or_default();
        for field in file.instance_fields() {
            visible.insert(field.name.clone(), instance_fields.len());
            instance_fields.push(FieldSlot {
                owner: class_name.to_string(),
                name: field.name.clone(),
                ty: parse_field(class_name, &field.descriptor)?,
            });
        }
        field_index.insert(class_name.to_string(), visible);

        let static_fields = file
            .static_fields()
            .map(|f| {
                Ok(FieldSlot {
                    owner: class_name.to_string(),
                    name: f.name.clone(),
                    ty: parse_field(class_name, &f.descriptor)?,
                })
            })
            .collect::<Result<Vec<_>, Unwind>>()?;

        let array_kind = super::shadow::storage_kind(class_name)
            .or_else(|| parent.as_ref().and_then(|p| p.array_kind));

        tracing::trace!(class = class_name, user, fields = instance_fields.len(), "class linked");
        Ok(LoadedClass {
            name: class_name.to_string(),
            file,
            user,
            instance_fields,
            static_fields,
            supertypes,
            array_kind,
            field_index,
        })
    }

    /// Non-dispatching lookup: the class, its superclasses, then default
    /// methods of its interfaces.
    pub fn resolve_method(
        &mut self,
        class_name: &str,
        name: &str,
        descriptor: &str,
    ) -> Result<Option<(Arc<LoadedClass>, usize)>, Unwind> {
        let start = self.load(class_name)?;
        if let Some(found) = self.find_in_superclasses(&start, name, descriptor, false)? {
            return Ok(Some(found));
        }
        self.find_default(&start, name, descriptor)
    }

    /// Dispatch on the runtime class of a receiver: the first concrete
    /// declaration up the superclass chain, then interface defaults.
    pub fn resolve_virtual(
        &mut self,
        receiver: &Arc<LoadedClass>,
        name: &str,
        descriptor: &str,
    ) -> Result<Option<(Arc<LoadedClass>, usize)>, Unwind> {
        if let Some(found) = self.find_in_superclasses(receiver, name, descriptor, true)? {
            return Ok(Some(found));
        }
        self.find_default(receiver, name, descriptor)
    }

    fn find_in_superclasses(
        &mut self,
        start: &Arc<LoadedClass>,
        name: &str,
        descriptor: &str,
        concrete_only: bool,
    ) -> Result<Option<(Arc<LoadedClass>, usize)>, Unwind> {
        let mut cursor = Some(Arc::clone(start));
        while let Some(class) = cursor {
            if let Some(index) = class.file.method_index(name, descriptor) {
                if !concrete_only || !class.file.methods[index].flags.is_abstract {
                    return Ok(Some((class, index)));
                }
            }
            cursor = match &class.file.super_name {
                Some(parent) => Some(self.load(parent)?),
                None => None,
            };
        }
        Ok(None)
    }

    fn find_default(
        &mut self,
        start: &Arc<LoadedClass>,
        name: &str,
        descriptor: &str,
    ) -> Result<Option<(Arc<LoadedClass>, usize)>, Unwind> {
        for supertype in &start.supertypes {
            let class = self.load(supertype)?;
            if !class.file.is_interface() {
                continue;
            }
            if let Some(index) = class.file.method_index(name, descriptor) {
                if class.file.methods[index].has_body() {
                    return Ok(Some((class, index)));
                }
            }
        }
        Ok(None)
    }
}

fn parse_field(class_name: &str, descriptor: &str) -> Result<FieldType, Unwind> {
    FieldType::parse(descriptor)
        .map_err(|e| invariant(format!("field descriptor in {class_name}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arraywrap::{INT_ARRAY, OBJECT_ARRAY};
    use avm_types::SHADOW_OBJECT;

    fn user_classes() -> BTreeMap<String, ClassFile> {
        let base = ClassFile::new("com/Base", Some(SHADOW_OBJECT))
            .with_field("x", "I", false)
            .with_field("count", "J", true)
            .with_method(MethodDecl::new("size", "()I").with_abstract());
        let child = ClassFile::new("com/Child", Some("com/Base"))
            .with_interfaces(["com/Shape"])
            .with_field("x", "J", false)
            .with_field("y", "Ls/java/lang/Object;", false);
        let shape = ClassFile::new("com/Shape", Some(SHADOW_OBJECT)).with_interface_flag();
        [base, child, shape]
            .into_iter()
            .map(|c| (c.name.clone(), c))
            .collect()
    }

    fn with_table<R>(f: impl FnOnce(&mut ClassTable<'_>) -> R) -> R {
        let classes = user_classes();
        let library = ShadowLibrary::new().unwrap();
        let cache = WrapperCache::new();
        let user = UserClasses(&classes);
        let wrappers = ArrayWrappers(&cache);
        let exceptions = ExceptionWrappers;
        let chain = ProviderChain::new(vec![&user, &library, &wrappers, &exceptions]);
        let mut table = ClassTable::new(chain);
        f(&mut table)
    }

    #[test]
    fn test_layout_with_shadowed_field() {
        with_table(|table| {
            let child = table.load("com/Child").unwrap();
            assert!(child.user);
            assert_eq!(child.instance_fields.len(), 3);
            assert_eq!(child.field_slot("com/Base", "x"), Some(0));
            assert_eq!(child.field_slot("com/Child", "x"), Some(1));
            assert_eq!(child.field_slot("com/Child", "y"), Some(2));
            assert_eq!(child.static_fields.len(), 0);
            assert!(child.is_subtype_of("com/Shape"));
            assert!(child.is_subtype_of(SHADOW_OBJECT));
            assert!(!child.is_subtype_of("com/Other"));
        });
    }

    #[test]
    fn test_wrapper_classes_load_through_chain() {
        with_table(|table| {
            let ints = table.load("avm/arraywrapper/$I").unwrap();
            assert!(!ints.user);
            assert_eq!(ints.array_kind, Some(ArrayKind::Int));
            assert!(ints.is_subtype_of(INT_ARRAY));

            let children = table.load("avm/arraywrapper/$Lcom/Child").unwrap();
            assert_eq!(children.array_kind, Some(ArrayKind::Reference));
            assert!(children.is_subtype_of("avm/arraywrapper/$Lcom/Base"));
            assert!(children.is_subtype_of("avm/arraywrapper/interface/_Lcom/Shape"));
            assert!(children.is_subtype_of(OBJECT_ARRAY));
        });
    }

    #[test]
    fn test_exception_wrapper_hierarchy() {
        with_table(|table| {
            let wrapper = table
                .load("avm/exceptionwrapper/s/java/lang/ArithmeticException")
                .unwrap();
            assert!(wrapper.is_subtype_of("avm/exceptionwrapper/s/java/lang/RuntimeException"));
            assert!(wrapper.is_subtype_of("avm/exceptionwrapper/s/java/lang/Throwable"));
            assert_eq!(
                wrapper.field_slot("avm/exceptionwrapper/s/java/lang/Throwable", "underlying"),
                Some(0)
            );
        });
    }

    #[test]
    fn test_method_resolution() {
        with_table(|table| {
            let (class, index) = table
                .resolve_method("com/Child", "hashCode", "()I")
                .unwrap()
                .unwrap();
            assert_eq!(class.name, SHADOW_OBJECT);
            assert!(class.file.methods[index].flags.is_native);

            let child = table.load("com/Child").unwrap();
            assert!(table.resolve_virtual(&child, "size", "()I").unwrap().is_none());
            assert!(table.resolve_method("com/Child", "size", "()I").unwrap().is_some());
        });
    }

    #[test]
    fn test_unknown_class_is_invariant() {
        with_table(|table| {
            assert!(matches!(
                table.load("com/Missing"),
                Err(Unwind::Abort(super::super::Abort::Invariant(_)))
            ));
        });
    }
}
