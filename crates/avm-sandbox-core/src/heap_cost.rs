//! Per-class heap size table.
//!
//! An instance's size is its parent's size plus the widths of the instance
//! fields the class declares. The table is computed once per hierarchy and
//! feeds the allocation charge the metering pass emits for `new`.

use crate::errors::HierarchyError;
use crate::hierarchy::ClassHierarchy;
use std::collections::BTreeMap;

/// Size of the root object header.
pub const OBJECT_HEADER_SIZE: u32 = 8;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeapCostTable {
    sizes: BTreeMap<String, u32>,
}

impl HeapCostTable {
    /// Walk `hierarchy` parents-first, seeding sizes from `base`.
    ///
    /// Classes present in `base` keep their base size. A non-user class
    /// missing from `base` means the hierarchy is broken.
    pub fn build(
        hierarchy: &ClassHierarchy,
        base: &BTreeMap<String, u32>,
    ) -> Result<Self, HierarchyError> {
        let forest = hierarchy.forest();
        let mut sizes = base.clone();

        for name in forest.topological_order() {
            if sizes.contains_key(name) {
                continue;
            }
            let Some(info) = forest.get(name) else {
                continue;
            };
            if !info.user {
                return Err(HierarchyError::UnknownParent {
                    class: name.to_string(),
                    ancestor: name.to_string(),
                });
            }
            let parent_size = match forest.parent_of(name) {
                Some(parent) => *sizes.get(parent).ok_or_else(|| HierarchyError::UnknownParent {
                    class: name.to_string(),
                    ancestor: parent.to_string(),
                })?,
                None => 0,
            };
            let own: u32 = info.instance_fields.iter().map(|(_, ty)| ty.width()).sum();
            let size = parent_size.saturating_add(own);
            tracing::trace!(class = name, size, "instance size computed");
            sizes.insert(name.to_string(), size);
        }

        Ok(Self { sizes })
    }

    pub fn instance_size(&self, class: &str) -> Option<u32> {
        self.sizes.get(class).copied()
    }

    pub fn len(&self) -> usize {
        self.sizes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sizes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.sizes.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use avm_types::ClassFile;

    fn base() -> BTreeMap<String, u32> {
        BTreeMap::from([("s/java/lang/Object".to_string(), OBJECT_HEADER_SIZE)])
    }

    fn library() -> BTreeMap<String, ClassFile> {
        BTreeMap::from([(
            "s/java/lang/Object".to_string(),
            ClassFile::new("s/java/lang/Object", None),
        )])
    }

    #[test]
    fn test_sizes_accumulate_down_the_chain() {
        let a = ClassFile::new("com/A", Some("java/lang/Object"))
            .with_field("x", "I", false)
            .with_field("counter", "J", true);
        let b = ClassFile::new("com/B", Some("com/A"))
            .with_field("flag", "Z", false)
            .with_field("next", "Lcom/B;", false);
        let classes = BTreeMap::from([(a.name.clone(), a), (b.name.clone(), b)]);

        let hierarchy = ClassHierarchy::build(&classes, &library()).unwrap();
        let table = HeapCostTable::build(&hierarchy, &base()).unwrap();
        assert_eq!(table.instance_size("s/java/lang/Object"), Some(8));
        assert_eq!(table.instance_size("com/A"), Some(12));
        assert_eq!(table.instance_size("com/B"), Some(12 + 1 + 8));
    }

    #[test]
    fn test_base_entries_override() {
        let a = ClassFile::new("com/A", Some("java/lang/Object")).with_field("x", "I", false);
        let classes = BTreeMap::from([(a.name.clone(), a)]);
        let hierarchy = ClassHierarchy::build(&classes, &library()).unwrap();
        let mut base = base();
        base.insert("com/A".to_string(), 100);
        let table = HeapCostTable::build(&hierarchy, &base).unwrap();
        assert_eq!(table.instance_size("com/A"), Some(100));
    }

    #[test]
    fn test_unknown_external_root_is_an_error() {
        let a = ClassFile::new("com/A", Some("org/Unknown"));
        let classes = BTreeMap::from([(a.name.clone(), a)]);
        let hierarchy = ClassHierarchy::build(&classes, &library()).unwrap();
        let err = HeapCostTable::build(&hierarchy, &base()).unwrap_err();
        assert!(matches!(err, HierarchyError::UnknownParent { class, .. } if class == "org/Unknown"));
    }
}
