use std::collections::{BTreeMap, HashMap, HashSet};

use super::identity::{CladeKey, NodeKey};
use super::layout::TreeLayout;
use super::{NodeId, Tree};

/// Everything needed to undo a merge: the identifiers the collapse absorbed,
/// a Newick snapshot of the replaced subtree (branch length included), and the
/// slot it came out of.
#[derive(Debug, Clone)]
pub struct MergeRecord {
    pub children: HashSet<NodeKey>,
    pub subtree_newick: String,
    pub parent: NodeKey,
    pub sibling_index: usize,
}

/// User edits layered over the tree: which nodes are collapsed, what they were
/// renamed to, and which collapses were made permanent by merging.
///
/// Keys are [`NodeKey`]s rather than arena indices so the state survives the
/// rebuild-from-Newick cycle that structural edits go through.
#[derive(Debug, Default)]
pub struct CollapseState {
    pub collapsed: HashSet<NodeKey>,
    pub renamed: HashMap<NodeKey, String>,
    pub merged: BTreeMap<CladeKey, MergeRecord>,
}

impl CollapseState {
    pub fn clear(&mut self) {
        self.collapsed.clear();
        self.renamed.clear();
        self.merged.clear();
    }

    pub fn toggle_collapse(&mut self, key: NodeKey) {
        if !self.collapsed.remove(&key) {
            self.collapsed.insert(key);
        }
    }

    pub fn is_collapsed(&self, key: NodeKey) -> bool {
        self.collapsed.contains(&key)
    }

    /// Label to draw for a node, rename taking precedence over the tree name.
    pub fn display_name<'a>(&'a self, key: NodeKey, tree_name: Option<&'a str>) -> Option<&'a str> {
        self.renamed.get(&key).map(String::as_str).or(tree_name)
    }
}

/// Ids of every strict descendant of a collapsed node. Collapsed nodes
/// themselves stay visible as their triangle glyph.
pub fn hidden_branches(
    tree: &Tree,
    layout: &TreeLayout,
    collapsed: &HashSet<NodeKey>,
) -> HashSet<NodeId> {
    fn walk(
        tree: &Tree,
        layout: &TreeLayout,
        collapsed: &HashSet<NodeKey>,
        id: NodeId,
        under_collapsed: bool,
        hidden: &mut HashSet<NodeId>,
    ) {
        if under_collapsed {
            hidden.insert(id);
        }
        let next = under_collapsed
            || layout.key_of(id).is_some_and(|key| collapsed.contains(&key));
        for &child in &tree.nodes[id].children {
            walk(tree, layout, collapsed, child, next, hidden);
        }
    }

    let mut hidden = HashSet::new();
    if let Some(root) = tree.root {
        walk(tree, layout, collapsed, root, false, &mut hidden);
    }
    hidden
}

/// True iff a strict ancestor of `id` is collapsed. A collapsed node is not
/// inside its own collapse.
pub fn is_inside_collapsed(
    tree: &Tree,
    layout: &TreeLayout,
    id: NodeId,
    collapsed: &HashSet<NodeKey>,
) -> bool {
    let mut cursor = tree.nodes[id].parent;
    while let Some(ancestor) = cursor {
        if layout.key_of(ancestor).is_some_and(|key| collapsed.contains(&key)) {
            return true;
        }
        cursor = tree.nodes[ancestor].parent;
    }
    false
}

/// Collapse every internal node at or beyond `threshold` on the x axis,
/// skipping the subtree below each selected node. The result is the union
/// with `existing`; selection never un-collapses anything.
pub fn select_by_threshold(
    tree: &Tree,
    layout: &TreeLayout,
    threshold: f64,
    existing: &HashSet<NodeKey>,
) -> HashSet<NodeKey> {
    let mut selected = existing.clone();
    tree.visit(|id| {
        if !tree.is_leaf(id) && layout.positions[id].0 >= threshold {
            if let Some(key) = layout.key_of(id) {
                selected.insert(key);
            }
            return false;
        }
        true
    });
    selected
}

/// Keys of every strict descendant of `id`.
pub fn descendant_keys(tree: &Tree, layout: &TreeLayout, id: NodeId) -> HashSet<NodeKey> {
    let mut keys = HashSet::new();
    fn walk(tree: &Tree, layout: &TreeLayout, id: NodeId, keys: &mut HashSet<NodeKey>) {
        for &child in &tree.nodes[id].children {
            if let Some(key) = layout.key_of(child) {
                keys.insert(key);
            }
            walk(tree, layout, child, keys);
        }
    }
    walk(tree, layout, id, &mut keys);
    keys
}
