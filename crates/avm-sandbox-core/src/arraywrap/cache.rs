//! Shared, thread-safe memo of generated wrappers.

use super::descriptor::WrapperDescriptor;
use super::generator::{generate_class, generate_interface, ElementShape, TypeResolver};
use crate::errors::WrapperError;
use avm_types::{ClassFile, ElementType};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum WrapperKind {
    Class,
    Interface,
}

/// Generation is a function of all three parts; two requests that agree on
/// them always get the same bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    kind: WrapperKind,
    descriptor: WrapperDescriptor,
    shape: Option<ElementShape>,
}

/// A generated wrapper together with its encoded bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedClass {
    pub name: String,
    pub class: ClassFile,
    pub bytes: Vec<u8>,
}

/// Memoizes wrapper generation. Owned by the engine and shared across
/// invocations; never a process-wide global.
#[derive(Debug, Default)]
pub struct WrapperCache {
    entries: RwLock<HashMap<CacheKey, Arc<GeneratedClass>>>,
}

impl WrapperCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn class_wrapper(
        &self,
        descriptor: &WrapperDescriptor,
        resolver: &dyn TypeResolver,
    ) -> Result<Arc<GeneratedClass>, WrapperError> {
        self.get_or_generate(WrapperKind::Class, descriptor, resolver)
    }

    pub fn interface_wrapper(
        &self,
        descriptor: &WrapperDescriptor,
        resolver: &dyn TypeResolver,
    ) -> Result<Arc<GeneratedClass>, WrapperError> {
        self.get_or_generate(WrapperKind::Interface, descriptor, resolver)
    }

    /// Produce the wrapper named `name`, or `None` if it is not a wrapper name.
    pub fn resolve(
        &self,
        name: &str,
        resolver: &dyn TypeResolver,
    ) -> Result<Option<Arc<GeneratedClass>>, WrapperError> {
        if let Some(descriptor) = WrapperDescriptor::from_interface_name(name) {
            return self.interface_wrapper(&descriptor, resolver).map(Some);
        }
        if let Some(descriptor) = WrapperDescriptor::from_class_name(name) {
            return self.class_wrapper(&descriptor, resolver).map(Some);
        }
        Ok(None)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn get_or_generate(
        &self,
        kind: WrapperKind,
        descriptor: &WrapperDescriptor,
        resolver: &dyn TypeResolver,
    ) -> Result<Arc<GeneratedClass>, WrapperError> {
        let shape = match &descriptor.element {
            ElementType::Primitive(_) => None,
            ElementType::Object(name) => Some(
                resolver
                    .element_shape(name)
                    .ok_or_else(|| WrapperError::UnresolvableElement(name.clone()))?,
            ),
        };
        let key = CacheKey {
            kind,
            descriptor: descriptor.clone(),
            shape,
        };
        if let Some(hit) = self.entries.read().get(&key) {
            return Ok(Arc::clone(hit));
        }

        let class = match kind {
            WrapperKind::Class => generate_class(descriptor, key.shape.as_ref())?,
            WrapperKind::Interface => generate_interface(descriptor, key.shape.as_ref())?,
        };
        let bytes = class.encode()?;
        let generated = Arc::new(GeneratedClass {
            name: class.name.clone(),
            class,
            bytes,
        });

        let mut entries = self.entries.write();
        let entry = Arc::clone(entries.entry(key).or_insert(generated));
        tracing::debug!(wrapper = %entry.name, cached = entries.len(), "array wrapper cached");
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    struct Shapes(BTreeMap<String, ElementShape>);

    impl TypeResolver for Shapes {
        fn element_shape(&self, class_name: &str) -> Option<ElementShape> {
            self.0.get(class_name).cloned()
        }
    }

    fn shapes() -> Shapes {
        Shapes(BTreeMap::from([(
            "com/Foo".to_string(),
            ElementShape {
                is_interface: false,
                super_name: Some("s/java/lang/Object".into()),
                interfaces: vec![],
            },
        )]))
    }

    #[test]
    fn test_cache_returns_same_instance() {
        let cache = WrapperCache::new();
        let d = WrapperDescriptor::from_array_descriptor("[[I").unwrap();
        let a = cache.class_wrapper(&d, &shapes()).unwrap();
        let b = cache.class_wrapper(&d, &shapes()).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_resolve_by_name() {
        let cache = WrapperCache::new();
        let hit = cache
            .resolve("avm/arraywrapper/$Lcom/Foo", &shapes())
            .unwrap()
            .unwrap();
        assert_eq!(hit.class.super_name.as_deref(), Some("avm/arraywrapper/$Ls/java/lang/Object"));
        assert!(cache.resolve("com/Foo", &shapes()).unwrap().is_none());
        assert_eq!(
            cache.resolve("avm/arraywrapper/$Lcom/Ghost", &shapes()),
            Err(WrapperError::UnresolvableElement("com/Ghost".into()))
        );
    }

    #[test]
    fn test_shape_is_part_of_the_key() {
        let cache = WrapperCache::new();
        let d = WrapperDescriptor::from_array_descriptor("[Lcom/Foo;").unwrap();
        let first = cache.class_wrapper(&d, &shapes()).unwrap();

        let mut other = shapes();
        other.0.get_mut("com/Foo").unwrap().interfaces.push("com/Named".into());
        let second = cache.class_wrapper(&d, &other).unwrap();
        assert_ne!(first.bytes, second.bytes);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_concurrent_generation_agrees() {
        let cache = Arc::new(WrapperCache::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    let d = WrapperDescriptor::from_array_descriptor("[[[J").unwrap();
                    cache.class_wrapper(&d, &shapes()).unwrap().bytes.clone()
                })
            })
            .collect();
        let results: Vec<Vec<u8>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(results.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(cache.len(), 1);
    }
}
