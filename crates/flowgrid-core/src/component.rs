//! The component tree: an arena of stable-id components whose leaves are
//! store-backed fields.
//!
//! Components are addressed by [`ComponentId`]s equal to their path's
//! interned id, so an id is simultaneously a stable arena key and a
//! persistent address. Leaf components own exactly one primitive (a
//! *field*): its default value and a cached copy of the stored value,
//! refreshed by the dispatcher after each commit.

use std::collections::HashMap;

use crate::error::{CoreError, Result};
use crate::path::{Path, PathId};
use crate::primitive::Primitive;
use crate::store::Store;

/// Stable 32-bit component identifier (the component path's id).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentId(pub u32);

impl From<PathId> for ComponentId {
    fn from(id: PathId) -> Self {
        ComponentId(id.raw())
    }
}

impl std::fmt::Display for ComponentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// A leaf component's primitive slot.
#[derive(Clone, Debug)]
pub struct FieldSlot {
    /// Value used when the store holds nothing at the field's path.
    pub default: Primitive,
    /// Cached copy of the effective value, refreshed after each commit.
    pub cached: Primitive,
}

/// One node in the component arena.
#[derive(Debug)]
pub struct ComponentNode {
    /// This node's id (equal to `path.id()`).
    pub id: ComponentId,
    /// Parent id; `None` only for the root.
    pub parent: Option<ComponentId>,
    /// The path segment this node contributes.
    pub segment: String,
    /// Full path from the root.
    pub path: Path,
    /// Display name.
    pub name: String,
    /// Optional help text.
    pub help: Option<String>,
    /// Child ids in creation order.
    pub children: Vec<ComponentId>,
    /// Present iff this node is a field (leaf).
    pub field: Option<FieldSlot>,
}

/// Arena of components plus the process-wide field indices.
#[derive(Debug)]
pub struct ComponentTree {
    nodes: HashMap<ComponentId, ComponentNode>,
    field_by_path: HashMap<PathId, ComponentId>,
    root: ComponentId,
}

impl Default for ComponentTree {
    fn default() -> Self {
        ComponentTree::new()
    }
}

impl ComponentTree {
    /// A tree containing only the root component.
    pub fn new() -> Self {
        let root_path = Path::root();
        let root = ComponentId::from(root_path.id());
        let mut nodes = HashMap::new();
        nodes.insert(
            root,
            ComponentNode {
                id: root,
                parent: None,
                segment: String::new(),
                path: root_path,
                name: "Root".to_owned(),
                help: None,
                children: Vec::new(),
                field: None,
            },
        );
        ComponentTree {
            nodes,
            field_by_path: HashMap::new(),
            root,
        }
    }

    /// The root component's id.
    pub fn root(&self) -> ComponentId {
        self.root
    }

    /// Looks up a component.
    pub fn get(&self, id: ComponentId) -> Option<&ComponentNode> {
        self.nodes.get(&id)
    }

    /// Looks up a component, failing with `ComponentNotFound`.
    pub fn require(&self, id: ComponentId) -> Result<&ComponentNode> {
        self.nodes
            .get(&id)
            .ok_or(CoreError::ComponentNotFound(id.0))
    }

    /// The component's full path.
    pub fn path_of(&self, id: ComponentId) -> Option<&Path> {
        self.nodes.get(&id).map(|n| &n.path)
    }

    /// Adds an interior (non-field) component under `parent`.
    ///
    /// # Panics
    ///
    /// Panics if `parent` is missing or the derived path is already taken;
    /// both indicate a broken tree build.
    pub fn add_component(
        &mut self,
        parent: ComponentId,
        segment: impl Into<String>,
        name: impl Into<String>,
    ) -> ComponentId {
        self.insert_node(parent, segment.into(), name.into(), None, None)
    }

    /// Adds a field (leaf) component under `parent` and registers it in the
    /// field indices.
    ///
    /// # Panics
    ///
    /// Panics on a duplicate field path; field paths are unique for the
    /// lifetime of the field.
    pub fn add_field(
        &mut self,
        parent: ComponentId,
        segment: impl Into<String>,
        name: impl Into<String>,
        default: impl Into<Primitive>,
    ) -> ComponentId {
        let default = default.into();
        let slot = FieldSlot {
            cached: default.clone(),
            default,
        };
        self.insert_node(parent, segment.into(), name.into(), None, Some(slot))
    }

    fn insert_node(
        &mut self,
        parent: ComponentId,
        segment: String,
        name: String,
        help: Option<String>,
        field: Option<FieldSlot>,
    ) -> ComponentId {
        let parent_path = self
            .nodes
            .get(&parent)
            .unwrap_or_else(|| panic!("component tree: unknown parent {parent}"))
            .path
            .clone();
        let path = parent_path.child(segment.clone());
        let id = ComponentId::from(path.id());
        assert!(
            !self.nodes.contains_key(&id),
            "component tree: path '{path}' registered twice"
        );
        if field.is_some() {
            self.field_by_path.insert(path.id(), id);
        }
        self.nodes.insert(
            id,
            ComponentNode {
                id,
                parent: Some(parent),
                segment,
                path,
                name,
                help,
                children: Vec::new(),
                field,
            },
        );
        self.nodes
            .get_mut(&parent)
            .expect("parent checked above")
            .children
            .push(id);
        id
    }

    /// Removes a component and its whole subtree, unregistering any fields.
    pub fn remove(&mut self, id: ComponentId) {
        let Some(node) = self.nodes.remove(&id) else {
            return;
        };
        self.field_by_path.remove(&node.path.id());
        if let Some(parent) = node.parent
            && let Some(parent_node) = self.nodes.get_mut(&parent)
        {
            parent_node.children.retain(|c| *c != id);
        }
        for child in node.children {
            self.remove_subtree(child);
        }
    }

    fn remove_subtree(&mut self, id: ComponentId) {
        let Some(node) = self.nodes.remove(&id) else {
            return;
        };
        self.field_by_path.remove(&node.path.id());
        for child in node.children {
            self.remove_subtree(child);
        }
    }

    /// Finds the field owning `path`.
    ///
    /// Container fields store their elements under child paths, so the
    /// lookup falls back to the parent and grandparent paths before giving
    /// up.
    pub fn find_field_for(&self, path: &Path) -> Option<ComponentId> {
        if let Some(id) = self.field_by_path.get(&path.id()) {
            return Some(*id);
        }
        let parent = path.parent()?;
        if let Some(id) = self.field_by_path.get(&parent.id()) {
            return Some(*id);
        }
        let grandparent = parent.parent()?;
        self.field_by_path.get(&grandparent.id()).copied()
    }

    /// The field's cached value.
    pub fn field_value(&self, id: ComponentId) -> Option<&Primitive> {
        self.nodes.get(&id)?.field.as_ref().map(|f| &f.cached)
    }

    /// Refreshes one field's cache from `store`; returns true if it changed.
    pub fn refresh_field(&mut self, id: ComponentId, store: &Store) -> bool {
        let Some(node) = self.nodes.get_mut(&id) else {
            return false;
        };
        let Some(slot) = node.field.as_mut() else {
            return false;
        };
        let effective = store.get(&node.path).cloned().unwrap_or_else(|| slot.default.clone());
        if slot.cached == effective {
            return false;
        }
        slot.cached = effective;
        true
    }

    /// Refreshes every field cache. Used once at startup and after loads.
    pub fn refresh_all(&mut self, store: &Store) {
        let ids: Vec<ComponentId> = self
            .nodes
            .values()
            .filter(|n| n.field.is_some())
            .map(|n| n.id)
            .collect();
        for id in ids {
            self.refresh_field(id, store);
        }
    }

    /// All ancestors of `id`, nearest first, ending at the root.
    pub fn ancestors(&self, id: ComponentId) -> Vec<ComponentId> {
        let mut out = Vec::new();
        let mut cursor = self.nodes.get(&id).and_then(|n| n.parent);
        while let Some(current) = cursor {
            out.push(current);
            cursor = self.nodes.get(&current).and_then(|n| n.parent);
        }
        out
    }

    /// Ids of every registered field.
    pub fn field_ids(&self) -> impl Iterator<Item = ComponentId> + '_ {
        self.field_by_path.values().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::AppStore;

    #[test]
    fn field_registration_and_lookup() {
        let mut tree = ComponentTree::new();
        let audio = tree.add_component(tree.root(), "audio", "Audio");
        let muted = tree.add_field(audio, "muted", "Muted", false);

        let path = Path::parse("/audio/muted").unwrap();
        assert_eq!(tree.find_field_for(&path), Some(muted));
        assert_eq!(tree.path_of(muted), Some(&path));
        assert_eq!(tree.ancestors(muted), vec![audio, tree.root()]);
    }

    #[test]
    fn container_lookup_falls_back_to_parent() {
        let mut tree = ComponentTree::new();
        let graph = tree.add_component(tree.root(), "graph", "Graph");
        let connections = tree.add_field(graph, "connections", "Connections", 0u32);

        // Elements of a container field live under child paths.
        let element = Path::parse("/graph/connections/3").unwrap();
        assert_eq!(tree.find_field_for(&element), Some(connections));
        let nested = Path::parse("/graph/connections/3/0").unwrap();
        assert_eq!(tree.find_field_for(&nested), Some(connections));
    }

    #[test]
    fn refresh_uses_store_value_or_default() {
        let mut tree = ComponentTree::new();
        let field = tree.add_field(tree.root(), "gain", "Gain", 1.0f32);

        let mut app = AppStore::new();
        app.begin_transient();
        app.set(Path::parse("/gain").unwrap(), 0.5f32);
        app.end_transient(true);

        assert!(tree.refresh_field(field, app.snapshot()));
        assert_eq!(tree.field_value(field), Some(&Primitive::Float(0.5)));
        // Unchanged refresh reports false.
        assert!(!tree.refresh_field(field, app.snapshot()));

        // Erasing falls back to the default.
        app.begin_transient();
        app.erase(&Path::parse("/gain").unwrap());
        app.end_transient(true);
        assert!(tree.refresh_field(field, app.snapshot()));
        assert_eq!(tree.field_value(field), Some(&Primitive::Float(1.0)));
    }

    #[test]
    fn remove_unregisters_subtree() {
        let mut tree = ComponentTree::new();
        let group = tree.add_component(tree.root(), "group", "Group");
        let a = tree.add_field(group, "a", "A", 0u32);
        tree.remove(group);
        assert!(tree.get(group).is_none());
        assert!(tree.get(a).is_none());
        assert_eq!(tree.find_field_for(&Path::parse("/group/a").unwrap()), None);
    }
}
