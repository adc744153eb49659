//! Class hierarchy forest.
//!
//! [`Forest`] is an arena of nodes linked by slot indices. Nodes are created
//! lazily as edges are discovered; a node first seen as a parent starts life
//! as a root and is re-parented in place if its own parent shows up later.
//!
//! [`ClassHierarchy`] populates a forest from a set of submitted classes,
//! pulling external ancestors (the shadow library) in as non-user nodes.

use crate::errors::HierarchyError;
use crate::naming::{shadow_class_name, shadow_descriptor};
use avm_types::{ClassFile, DescriptorError, FieldType};
use std::collections::{BTreeMap, HashMap, VecDeque};

// =============================================================================
// Forest
// =============================================================================

#[derive(Debug, Clone)]
struct Slot<C> {
    id: String,
    content: C,
    parent: Option<usize>,
    children: Vec<usize>,
}

/// Arena-backed forest keyed by string id.
#[derive(Debug, Clone)]
pub struct Forest<C> {
    slots: Vec<Slot<C>>,
    index: HashMap<String, usize>,
    roots: Vec<usize>,
}

impl<C> Default for Forest<C> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            index: HashMap::new(),
            roots: Vec::new(),
        }
    }
}

impl<C> Forest<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `child_id` extends `parent_id`.
    ///
    /// Content is only used for nodes not seen before.
    pub fn add_edge(
        &mut self,
        parent_id: &str,
        parent: C,
        child_id: &str,
        child: C,
    ) -> Result<(), HierarchyError> {
        if parent_id == child_id {
            return Err(HierarchyError::SelfParent(child_id.to_string()));
        }

        let child_slot = self.index.get(child_id).copied();
        if let Some(c) = child_slot {
            if let Some(existing) = self.slots[c].parent {
                if self.slots[existing].id == parent_id {
                    return Ok(());
                }
                return Err(HierarchyError::ParentConflict {
                    child: child_id.to_string(),
                    existing: self.slots[existing].id.clone(),
                    requested: parent_id.to_string(),
                });
            }
            if let Some(p) = self.index.get(parent_id).copied() {
                if self.is_ancestor_or_self(c, p) {
                    return Err(HierarchyError::Cycle {
                        child: child_id.to_string(),
                        parent: parent_id.to_string(),
                    });
                }
            }
        }

        let p = self.get_or_insert_root(parent_id, parent);
        let c = match child_slot {
            Some(c) => {
                self.roots.retain(|&r| r != c);
                c
            }
            None => self.insert(child_id, child),
        };
        self.slots[c].parent = Some(p);
        self.slots[p].children.push(c);
        Ok(())
    }

    /// Insert a standalone root if `id` is unknown.
    pub fn add_root(&mut self, id: &str, content: C) {
        self.get_or_insert_root(id, content);
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&C> {
        self.index.get(id).map(|&i| &self.slots[i].content)
    }

    pub fn parent_of(&self, id: &str) -> Option<&str> {
        let slot = &self.slots[*self.index.get(id)?];
        slot.parent.map(|p| self.slots[p].id.as_str())
    }

    pub fn children_of(&self, id: &str) -> Vec<&str> {
        self.index
            .get(id)
            .map(|&i| {
                self.slots[i]
                    .children
                    .iter()
                    .map(|&c| self.slots[c].id.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn roots(&self) -> Vec<&str> {
        self.roots.iter().map(|&r| self.slots[r].id.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Ancestors from the direct parent up to the root.
    pub fn ancestors(&self, id: &str) -> Vec<&str> {
        let mut out = Vec::new();
        let mut cursor = self.index.get(id).and_then(|&i| self.slots[i].parent);
        while let Some(p) = cursor {
            out.push(self.slots[p].id.as_str());
            cursor = self.slots[p].parent;
        }
        out
    }

    /// Every node, parents before children; roots and siblings in insertion order.
    pub fn topological_order(&self) -> Vec<&str> {
        let mut order = Vec::with_capacity(self.slots.len());
        let mut queue: VecDeque<usize> = self.roots.iter().copied().collect();
        while let Some(i) = queue.pop_front() {
            order.push(self.slots[i].id.as_str());
            queue.extend(self.slots[i].children.iter().copied());
        }
        order
    }

    fn insert(&mut self, id: &str, content: C) -> usize {
        let slot = self.slots.len();
        self.slots.push(Slot {
            id: id.to_string(),
            content,
            parent: None,
            children: Vec::new(),
        });
        self.index.insert(id.to_string(), slot);
        slot
    }

    fn get_or_insert_root(&mut self, id: &str, content: C) -> usize {
        if let Some(&i) = self.index.get(id) {
            return i;
        }
        let i = self.insert(id, content);
        self.roots.push(i);
        i
    }

    /// Whether `ancestor` is `node` or lies on the parent chain above it.
    fn is_ancestor_or_self(&self, ancestor: usize, node: usize) -> bool {
        let mut cursor = Some(node);
        while let Some(i) = cursor {
            if i == ancestor {
                return true;
            }
            cursor = self.slots[i].parent;
        }
        false
    }
}

// =============================================================================
// Class hierarchy
// =============================================================================

/// Shape of one class as the hierarchy sees it. Names are shadow-normalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassInfo {
    pub name: String,
    pub super_name: Option<String>,
    pub interfaces: Vec<String>,
    pub is_interface: bool,
    pub is_abstract: bool,
    /// Declared (not inherited) instance fields.
    pub instance_fields: Vec<(String, FieldType)>,
    /// False for placeholder nodes outside the submitted set.
    pub user: bool,
}

impl ClassInfo {
    pub fn from_class(class: &ClassFile, user: bool) -> Result<Self, DescriptorError> {
        let instance_fields = class
            .instance_fields()
            .map(|f| Ok((f.name.clone(), FieldType::parse(&shadow_descriptor(&f.descriptor))?)))
            .collect::<Result<Vec<_>, DescriptorError>>()?;
        Ok(Self {
            name: shadow_class_name(&class.name),
            super_name: class.super_name.as_deref().map(shadow_class_name),
            interfaces: class.interfaces.iter().map(|i| shadow_class_name(i)).collect(),
            is_interface: class.flags.is_interface,
            is_abstract: class.flags.is_abstract,
            instance_fields,
            user,
        })
    }

    /// Placeholder for an ancestor whose definition is not available.
    pub fn external(name: &str) -> Self {
        Self {
            name: name.to_string(),
            super_name: None,
            interfaces: Vec::new(),
            is_interface: false,
            is_abstract: false,
            instance_fields: Vec::new(),
            user: false,
        }
    }
}

/// Source of class definitions outside the submitted set.
pub trait ExternalClasses {
    fn external_class(&self, name: &str) -> Option<&ClassFile>;
}

impl ExternalClasses for BTreeMap<String, ClassFile> {
    fn external_class(&self, name: &str) -> Option<&ClassFile> {
        self.get(name)
    }
}

/// Superclass forest over user classes and their external ancestors.
#[derive(Debug, Clone, Default)]
pub struct ClassHierarchy {
    forest: Forest<ClassInfo>,
}

impl ClassHierarchy {
    pub fn build(
        classes: &BTreeMap<String, ClassFile>,
        external: &dyn ExternalClasses,
    ) -> Result<Self, crate::errors::DeploymentError> {
        let mut forest = Forest::new();
        let infos = classes
            .values()
            .map(|c| {
                ClassInfo::from_class(c, true).map_err(|source| {
                    crate::errors::ValidationError::Descriptor {
                        class: c.name.clone(),
                        source,
                    }
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let by_name: HashMap<&str, &ClassInfo> =
            infos.iter().map(|i| (i.name.as_str(), i)).collect();

        for info in &infos {
            match &info.super_name {
                Some(parent) => {
                    let parent_info = match by_name.get(parent.as_str()) {
                        Some(p) => (*p).clone(),
                        None => external_info(parent, external),
                    };
                    forest.add_edge(parent, parent_info, &info.name, info.clone())?;
                }
                None => forest.add_root(&info.name, info.clone()),
            }
        }

        // Pull in the external ancestor chains so heap costs and lookups
        // can see the whole path to the root.
        let external_roots: Vec<String> = forest
            .roots()
            .into_iter()
            .filter(|r| !by_name.contains_key(r))
            .map(str::to_string)
            .collect();
        for root in external_roots {
            let mut cursor = root;
            loop {
                let Some(super_name) = forest.get(&cursor).and_then(|i| i.super_name.clone())
                else {
                    break;
                };
                let parent_info = external_info(&super_name, external);
                forest.add_edge(&super_name, parent_info, &cursor, ClassInfo::external(&cursor))?;
                cursor = super_name;
            }
        }

        tracing::debug!(
            classes = classes.len(),
            nodes = forest.len(),
            roots = forest.roots().len(),
            "class hierarchy built"
        );
        Ok(Self { forest })
    }

    pub fn forest(&self) -> &Forest<ClassInfo> {
        &self.forest
    }

    pub fn get(&self, name: &str) -> Option<&ClassInfo> {
        self.forest.get(name)
    }

    /// Whether `name` is `ancestor` or inherits from it through superclasses.
    pub fn is_subclass_of(&self, name: &str, ancestor: &str) -> bool {
        name == ancestor || self.forest.ancestors(name).contains(&ancestor)
    }
}

fn external_info(name: &str, external: &dyn ExternalClasses) -> ClassInfo {
    external
        .external_class(name)
        .and_then(|c| ClassInfo::from_class(c, false).ok())
        .unwrap_or_else(|| ClassInfo::external(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge(f: &mut Forest<u32>, parent: &str, child: &str) -> Result<(), HierarchyError> {
        f.add_edge(parent, 0, child, 0)
    }

    #[test]
    fn test_new_parent_becomes_root() {
        let mut f = Forest::new();
        edge(&mut f, "A", "B").unwrap();
        assert_eq!(f.roots(), vec!["A"]);
        assert_eq!(f.parent_of("B"), Some("A"));
        assert_eq!(f.children_of("A"), vec!["B"]);
    }

    #[test]
    fn test_reparenting_preserves_children() {
        let mut f = Forest::new();
        edge(&mut f, "B", "C").unwrap();
        edge(&mut f, "B", "D").unwrap();
        assert_eq!(f.roots(), vec!["B"]);

        edge(&mut f, "A", "B").unwrap();
        assert_eq!(f.roots(), vec!["A"]);
        assert_eq!(f.children_of("B"), vec!["C", "D"]);
        assert_eq!(f.ancestors("D"), vec!["B", "A"]);
        assert_eq!(f.topological_order(), vec!["A", "B", "C", "D"]);
    }

    #[test]
    fn test_self_parent_rejected() {
        let mut f = Forest::new();
        assert_eq!(
            edge(&mut f, "A", "A"),
            Err(HierarchyError::SelfParent("A".into()))
        );
        assert!(f.is_empty());
    }

    #[test]
    fn test_parent_immutable() {
        let mut f = Forest::new();
        edge(&mut f, "A", "C").unwrap();
        edge(&mut f, "A", "C").unwrap();
        assert_eq!(f.children_of("A").len(), 1);
        assert!(matches!(
            edge(&mut f, "B", "C"),
            Err(HierarchyError::ParentConflict { .. })
        ));
    }

    #[test]
    fn test_cycle_rejected() {
        let mut f = Forest::new();
        edge(&mut f, "A", "B").unwrap();
        edge(&mut f, "B", "C").unwrap();
        assert!(matches!(
            edge(&mut f, "C", "A"),
            Err(HierarchyError::Cycle { .. })
        ));
        assert_eq!(f.roots(), vec!["A"]);
    }

    #[test]
    fn test_existing_content_kept() {
        let mut f = Forest::new();
        f.add_edge("A", 1, "B", 2).unwrap();
        f.add_edge("B", 99, "C", 3).unwrap();
        assert_eq!(f.get("B"), Some(&2));
        assert_eq!(f.get("missing"), None);
    }

    #[test]
    fn test_class_hierarchy_pulls_external_chain() {
        let mut library = BTreeMap::new();
        library.insert(
            "s/java/lang/Object".to_string(),
            ClassFile::new("s/java/lang/Object", None),
        );
        library.insert(
            "s/java/lang/Throwable".to_string(),
            ClassFile::new("s/java/lang/Throwable", Some("s/java/lang/Object")),
        );

        let mut classes = BTreeMap::new();
        let err = ClassFile::new("com/Err", Some("java/lang/Throwable"))
            .with_field("code", "I", false);
        let point = ClassFile::new("com/Point", Some("java/lang/Object"))
            .with_field("x", "I", false)
            .with_field("origin", "Ljava/lang/Object;", false);
        classes.insert(err.name.clone(), err);
        classes.insert(point.name.clone(), point);

        let h = ClassHierarchy::build(&classes, &library).unwrap();
        assert_eq!(h.forest().roots(), vec!["s/java/lang/Object"]);
        assert!(h.is_subclass_of("com/Err", "s/java/lang/Object"));
        assert!(!h.get("s/java/lang/Throwable").unwrap().user);
        let point = h.get("com/Point").unwrap();
        assert!(point.user);
        assert_eq!(
            point.instance_fields[1].1,
            FieldType::Object("s/java/lang/Object".into())
        );
    }
}
