use phylotree::tree::{Node as PhyloNode, Tree as PhyloTree};

pub mod collapse;
pub mod identity;
pub mod layout;
pub mod newick;

pub use layout::SortDirection;

pub type NodeId = phylotree::tree::NodeId;

/// Rooted phylogenetic tree stored as an arena of nodes.
///
/// Parsing is delegated to the `phylotree` crate; this type only keeps the
/// parent/children wiring plus per-node name and branch length, which is all
/// the layout and serialization passes need.
#[derive(Debug, Clone)]
pub struct Tree {
    pub newick: String,
    pub root: Option<NodeId>,
    pub nodes: Vec<TreeNode>,
}

impl Tree {
    pub fn new(newick: String, phylo: &PhyloTree) -> Self {
        let root = phylo.get_root().ok();
        let nodes = Self::build_nodes_from_phylo(phylo);
        Self { newick, root, nodes }
    }

    fn build_nodes_from_phylo(phylo: &PhyloTree) -> Vec<TreeNode> {
        let mut nodes = Vec::with_capacity(phylo.size());
        for idx in 0..phylo.size() {
            match phylo.get(&idx) {
                Ok(node) => nodes.push(TreeNode::from_phylo(node)),
                Err(_) => nodes.push(TreeNode::new(idx, None, None)),
            }
        }
        nodes
    }

    pub fn is_leaf(&self, id: NodeId) -> bool {
        self.nodes.get(id).map_or(true, |node| node.children.is_empty())
    }

    pub fn leaf_count(&self) -> usize {
        self.nodes.iter().filter(|node| node.is_leaf()).count()
    }

    /// Pre-order traversal. Returning `false` from the callback prunes the
    /// node's subtree (its children are not visited).
    pub fn visit<F>(&self, mut f: F)
    where
        F: FnMut(NodeId) -> bool,
    {
        fn walk<F: FnMut(NodeId) -> bool>(tree: &Tree, id: NodeId, f: &mut F) {
            if !f(id) {
                return;
            }
            for &child in &tree.nodes[id].children {
                walk(tree, child, f);
            }
        }

        if let Some(root) = self.root {
            walk(self, root, &mut f);
        }
    }

    /// Leaf ids in left-to-right display order.
    pub fn tips(&self) -> Vec<NodeId> {
        let mut tips = Vec::new();
        self.visit(|id| {
            if self.is_leaf(id) {
                tips.push(id);
            }
            true
        });
        tips
    }

    pub fn get_by_name(&self, name: &str) -> Option<NodeId> {
        let mut found = None;
        self.visit(|id| {
            if found.is_some() {
                return false;
            }
            if self.nodes[id].name.as_deref() == Some(name) {
                found = Some(id);
                return false;
            }
            true
        });
        found
    }

    /// Stable in-place resort of every node's children list.
    pub fn reorder_children<F>(&mut self, mut cmp: F)
    where
        F: FnMut(&TreeNode, &TreeNode) -> std::cmp::Ordering,
    {
        for idx in 0..self.nodes.len() {
            let mut children = std::mem::take(&mut self.nodes[idx].children);
            children.sort_by(|&a, &b| cmp(&self.nodes[a], &self.nodes[b]));
            self.nodes[idx].children = children;
        }
    }

    /// Reorder every node's children by subtree depth rank: a leaf ranks 1,
    /// an internal node 1 + the maximum rank among its children. Ties keep
    /// their original order.
    pub fn order_by_depth_rank(&mut self, direction: SortDirection) {
        fn rank_of(tree: &Tree, id: NodeId, ranks: &mut [usize]) -> usize {
            let mut deepest = 0;
            for &child in &tree.nodes[id].children {
                deepest = deepest.max(rank_of(tree, child, ranks));
            }
            ranks[id] = 1 + deepest;
            ranks[id]
        }

        let mut ranks = vec![1usize; self.nodes.len()];
        if let Some(root) = self.root {
            rank_of(self, root, &mut ranks);
        }

        let ascending = direction == SortDirection::Ascending;
        self.reorder_children(|a, b| {
            let ord = ranks[a.id].cmp(&ranks[b.id]);
            if ascending {
                ord
            } else {
                ord.reverse()
            }
        });
    }
}

/// Node within a phylogenetic tree.
#[derive(Debug, Clone)]
pub struct TreeNode {
    pub id: NodeId,
    pub name: Option<String>,
    pub length: Option<f64>,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
}

impl TreeNode {
    pub fn new(id: NodeId, name: Option<String>, length: Option<f64>) -> Self {
        Self {
            id,
            name,
            length,
            parent: None,
            children: Vec::new(),
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub(crate) fn from_phylo(node: &PhyloNode) -> Self {
        let mut tree_node = TreeNode::new(node.id, node.name.clone(), node.parent_edge);
        tree_node.parent = node.parent;
        tree_node.children = node.children.clone();
        tree_node
    }
}
