use std::collections::BTreeMap;

use super::collapse::MergeRecord;
use super::identity::{self, CladeKey, NodeKey, ThresholdRegistry};
use super::{NodeId, Tree, TreeNode};

/// Reads the branch length driving the x sweep. Overridable so a tree can be
/// laid out by an attribute other than the stored length.
pub type BranchAccessor = fn(&TreeNode) -> Option<f64>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// Knobs for a layout pass.
#[derive(Debug, Clone, Default)]
pub struct LayoutOptions {
    /// Resort children by subtree depth rank before placement.
    pub sort: Option<SortDirection>,
    /// Give internal nodes their own row instead of centering them between
    /// their children.
    pub internal_labels: bool,
    /// Branch-length reader; `None` reads the node's stored length.
    pub branch_length: Option<BranchAccessor>,
}

/// Result of one layout pass: abstract coordinates plus the identifier each
/// node carries for the duration of this pass.
///
/// Coordinates are unitless. `x` grows with cumulative branch length (or tree
/// depth when lengths are absent), `y` with vertical display order. Scaling to
/// pixels is the exporter's business.
#[derive(Debug, Clone)]
pub struct TreeLayout {
    pub positions: Vec<(f64, f64)>,
    pub keys: Vec<Option<NodeKey>>,
    pub max_x: f64,
    pub max_y: f64,
    pub has_branch_lengths: bool,
}

impl TreeLayout {
    pub fn key_of(&self, id: NodeId) -> Option<NodeKey> {
        self.keys.get(id).copied().flatten()
    }

    pub fn node_by_key(&self, key: NodeKey) -> Option<NodeId> {
        self.keys.iter().position(|k| *k == Some(key))
    }
}

/// Lay the tree out as a rectangular phylogram and assign node identifiers.
///
/// Branch-length mode is decided once, from the first tip: a missing, zero or
/// NaN length there switches the whole pass to unit depths.
pub fn place_nodes(
    tree: &mut Tree,
    options: &LayoutOptions,
    registry: &mut ThresholdRegistry,
    merged: &BTreeMap<CladeKey, MergeRecord>,
) -> TreeLayout {
    if let Some(direction) = options.sort {
        tree.order_by_depth_rank(direction);
    }

    let accessor: BranchAccessor = options.branch_length.unwrap_or(|node| node.length);
    let use_lengths = tree
        .tips()
        .first()
        .and_then(|&id| accessor(&tree.nodes[id]))
        .is_some_and(|len| len != 0.0 && !len.is_nan());

    let mut positions = vec![(0.0f64, 0.0f64); tree.nodes.len()];
    assign_x(tree, accessor, use_lengths, &mut positions);
    if options.internal_labels {
        assign_y_rows(tree, &mut positions);
    } else {
        assign_y_tip_driven(tree, &mut positions);
    }

    let mut max_x = 0.0f64;
    let mut max_y = 0.0f64;
    tree.visit(|id| {
        let (x, y) = positions[id];
        max_x = max_x.max(x);
        max_y = max_y.max(y);
        true
    });

    let keys = identity::assign_keys(tree, &positions, registry, merged);

    TreeLayout {
        positions,
        keys,
        max_x,
        max_y,
        has_branch_lengths: use_lengths,
    }
}

fn assign_x(tree: &Tree, accessor: BranchAccessor, use_lengths: bool, positions: &mut [(f64, f64)]) {
    tree.visit(|id| {
        let node = &tree.nodes[id];
        positions[id].0 = match node.parent {
            Some(parent) => {
                let step = if use_lengths {
                    accessor(node).unwrap_or(0.0)
                } else {
                    1.0
                };
                positions[parent].0 + step
            }
            None => 0.0,
        };
        true
    });
}

/// Tips take consecutive rows in traversal order; each internal node sits at
/// the unweighted mean of its children.
fn assign_y_tip_driven(tree: &Tree, positions: &mut [(f64, f64)]) {
    fn place(tree: &Tree, id: NodeId, next_row: &mut f64, positions: &mut [(f64, f64)]) -> f64 {
        let y = if tree.is_leaf(id) {
            let row = *next_row;
            *next_row += 1.0;
            row
        } else {
            let children = &tree.nodes[id].children;
            let sum: f64 = children
                .iter()
                .map(|&child| place(tree, child, next_row, positions))
                .sum();
            sum / children.len() as f64
        };
        positions[id].1 = y;
        y
    }

    if let Some(root) = tree.root {
        let mut next_row = 0.0;
        place(tree, root, &mut next_row, positions);
    }
}

/// Every node takes its own row. Leaves claim the next row when visited; an
/// internal node claims the row right after its first child's subtree is
/// placed, so its label row sits between its children. The root (and any node
/// literally named "root") is excluded from the row count and centered on its
/// children instead.
fn assign_y_rows(tree: &Tree, positions: &mut [(f64, f64)]) {
    fn suppressed(tree: &Tree, id: NodeId) -> bool {
        tree.nodes[id].is_root() || tree.nodes[id].name.as_deref() == Some("root")
    }

    fn place(
        tree: &Tree,
        id: NodeId,
        next_row: &mut f64,
        assigned: &mut [bool],
        positions: &mut [(f64, f64)],
    ) {
        if tree.is_leaf(id) {
            if !suppressed(tree, id) {
                positions[id].1 = *next_row;
                *next_row += 1.0;
                assigned[id] = true;
            }
            return;
        }
        for &child in &tree.nodes[id].children {
            place(tree, child, next_row, assigned, positions);
            if !assigned[id] && !suppressed(tree, id) {
                positions[id].1 = *next_row;
                *next_row += 1.0;
                assigned[id] = true;
            }
        }
    }

    let Some(root) = tree.root else { return };
    let mut next_row = 0.0;
    let mut assigned = vec![false; tree.nodes.len()];
    place(tree, root, &mut next_row, &mut assigned, positions);

    let children = &tree.nodes[root].children;
    if !children.is_empty() {
        let sum: f64 = children.iter().map(|&child| positions[child].1).sum();
        positions[root].1 = sum / children.len() as f64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io;

    fn layout(newick: &str, options: &LayoutOptions) -> (Tree, TreeLayout) {
        let mut tree = io::tree_from_newick(newick).expect("valid test newick");
        let mut registry = ThresholdRegistry::default();
        let layout = place_nodes(&mut tree, options, &mut registry, &BTreeMap::new());
        (tree, layout)
    }

    fn pos(tree: &Tree, layout: &TreeLayout, name: &str) -> (f64, f64) {
        layout.positions[tree.get_by_name(name).unwrap()]
    }

    #[test]
    fn branch_lengths_accumulate_along_paths() {
        let (tree, layout) = layout("(A:1,(B:1,C:1):2):0;", &LayoutOptions::default());
        assert_eq!(pos(&tree, &layout, "A"), (1.0, 0.0));
        assert_eq!(pos(&tree, &layout, "B"), (3.0, 1.0));
        assert_eq!(pos(&tree, &layout, "C"), (3.0, 2.0));

        let inner = tree.get_by_name("B").and_then(|id| tree.nodes[id].parent).unwrap();
        assert_eq!(layout.positions[inner], (2.0, 1.5));
        let root = tree.root.unwrap();
        assert_eq!(layout.positions[root], (0.0, 0.75));
        assert_eq!(layout.max_x, 3.0);
        assert_eq!(layout.max_y, 2.0);
    }

    #[test]
    fn missing_lengths_fall_back_to_unit_depth() {
        let (tree, layout) = layout("(A,(B,C));", &LayoutOptions::default());
        assert_eq!(pos(&tree, &layout, "A").0, 1.0);
        assert_eq!(pos(&tree, &layout, "B").0, 2.0);
        assert_eq!(layout.max_x, 2.0);
    }

    #[test]
    fn internal_label_mode_gives_internal_nodes_rows() {
        let (tree, layout) = layout(
            "(A:1,(B:1,C:1)BC:2)root:0;",
            &LayoutOptions {
                internal_labels: true,
                ..Default::default()
            },
        );
        // Rows interleave: A=0, B=1, then BC claims row 2 ahead of C=3.
        // The root is suppressed and centered on A and BC.
        assert_eq!(pos(&tree, &layout, "A").1, 0.0);
        assert_eq!(pos(&tree, &layout, "B").1, 1.0);
        assert_eq!(pos(&tree, &layout, "BC").1, 2.0);
        assert_eq!(pos(&tree, &layout, "C").1, 3.0);
        assert_eq!(layout.positions[tree.root.unwrap()].1, 1.0);
        assert_eq!(layout.max_y, 3.0);
    }

    #[test]
    fn single_tip_tree_has_zero_extent() {
        let (_, layout) = layout("A;", &LayoutOptions::default());
        assert_eq!(layout.max_x, 0.0);
        assert_eq!(layout.max_y, 0.0);
    }

    #[test]
    fn sort_pass_reorders_before_placement() {
        let (tree, layout) = layout(
            "(A:1,(B:1,C:1):2):0;",
            &LayoutOptions {
                sort: Some(SortDirection::Descending),
                ..Default::default()
            },
        );
        // Descending puts the deeper (B,C) clade first, so B takes row 0.
        assert_eq!(pos(&tree, &layout, "B").1, 0.0);
        assert_eq!(pos(&tree, &layout, "A").1, 2.0);
    }

    #[test]
    fn custom_accessor_overrides_stored_lengths() {
        let (tree, layout) = layout(
            "(A:1,(B:1,C:1):2):0;",
            &LayoutOptions {
                branch_length: Some(|_| Some(1.0)),
                ..Default::default()
            },
        );
        assert_eq!(pos(&tree, &layout, "B").0, 2.0);
        assert_eq!(layout.max_x, 2.0);
    }

    #[test]
    fn key_lookup_round_trips() {
        let (tree, layout) = layout("(A:1,(B:1,C:1):2):0;", &LayoutOptions::default());
        let a = tree.get_by_name("A").unwrap();
        let key = layout.key_of(a).unwrap();
        assert_eq!(layout.node_by_key(key), Some(a));
    }
}
