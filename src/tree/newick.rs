use std::collections::{HashMap, HashSet};

use super::identity::NodeKey;
use super::layout::TreeLayout;
use super::{NodeId, Tree};

/// Characters with structural meaning in the Newick grammar. A name containing
/// any of them gets single-quoted on output.
const QUOTE_TRIGGERS: &[char] = &[',', ';', ':', '(', ')', '[', ']'];

/// Serialize the displayed tree: a node that is both collapsed and renamed is
/// written as a leaf carrying its display name, everything else round-trips.
pub fn to_newick(
    tree: &Tree,
    layout: &TreeLayout,
    collapsed: &HashSet<NodeKey>,
    renamed: &HashMap<NodeKey, String>,
) -> String {
    to_newick_with_overrides(tree, layout, collapsed, renamed, &HashMap::new())
}

/// Like [`to_newick`], but a node listed in `overrides` is replaced verbatim
/// by the given snippet (name, structure and branch length included). This is
/// how a merged subtree is spliced back: the stored snapshot is written in
/// place of the merged leaf and the whole text reparsed.
pub fn to_newick_with_overrides(
    tree: &Tree,
    layout: &TreeLayout,
    collapsed: &HashSet<NodeKey>,
    renamed: &HashMap<NodeKey, String>,
    overrides: &HashMap<NodeId, String>,
) -> String {
    let mut out = String::new();
    if let Some(root) = tree.root {
        write_node(tree, layout, collapsed, renamed, overrides, root, 0, &mut out);
    }
    out.push(';');
    out
}

/// Newick snapshot of the subtree rooted at `id`, branch length included and
/// free of any display-state substitution.
pub fn subtree_snippet(tree: &Tree, id: NodeId) -> String {
    let mut out = String::new();
    write_plain(tree, id, 1, &mut out);
    out
}

#[allow(clippy::too_many_arguments)]
fn write_node(
    tree: &Tree,
    layout: &TreeLayout,
    collapsed: &HashSet<NodeKey>,
    renamed: &HashMap<NodeKey, String>,
    overrides: &HashMap<NodeId, String>,
    id: NodeId,
    depth: usize,
    out: &mut String,
) {
    if let Some(snippet) = overrides.get(&id) {
        out.push_str(snippet);
        return;
    }

    let node = &tree.nodes[id];
    let merged_label = layout
        .key_of(id)
        .filter(|key| collapsed.contains(key))
        .and_then(|key| renamed.get(&key));

    if let Some(label) = merged_label {
        out.push_str(&quote_if_needed(label));
        push_length(node.length, depth, out);
        return;
    }

    if node.is_leaf() {
        if let Some(name) = &node.name {
            out.push_str(&quote_if_needed(name));
        }
        push_length(node.length, depth, out);
        return;
    }

    out.push('(');
    for (index, &child) in node.children.iter().enumerate() {
        if index > 0 {
            out.push(',');
        }
        write_node(tree, layout, collapsed, renamed, overrides, child, depth + 1, out);
    }
    out.push(')');
    if let Some(name) = &node.name {
        out.push_str(&quote_if_needed(name));
    }
    push_length(node.length, depth, out);
}

fn write_plain(tree: &Tree, id: NodeId, depth: usize, out: &mut String) {
    let node = &tree.nodes[id];
    if !node.is_leaf() {
        out.push('(');
        for (index, &child) in node.children.iter().enumerate() {
            if index > 0 {
                out.push(',');
            }
            write_plain(tree, child, depth + 1, out);
        }
        out.push(')');
    }
    if let Some(name) = &node.name {
        out.push_str(&quote_if_needed(name));
    }
    push_length(node.length, depth, out);
}

// The root's edge carries no information, so its length is never emitted.
fn push_length(length: Option<f64>, depth: usize, out: &mut String) {
    if depth == 0 {
        return;
    }
    if let Some(length) = length {
        out.push(':');
        out.push_str(&length.to_string());
    }
}

fn quote_if_needed(name: &str) -> String {
    if name.contains(QUOTE_TRIGGERS) {
        format!("'{name}'")
    } else {
        name.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io;
    use crate::tree::identity::ThresholdRegistry;
    use crate::tree::layout::{place_nodes, LayoutOptions};
    use std::collections::BTreeMap;

    fn fixture(newick: &str) -> (Tree, TreeLayout) {
        let mut tree = io::tree_from_newick(newick).expect("valid test newick");
        let mut registry = ThresholdRegistry::default();
        let layout = place_nodes(&mut tree, &LayoutOptions::default(), &mut registry, &BTreeMap::new());
        (tree, layout)
    }

    #[test]
    fn plain_tree_round_trips_without_root_length() {
        let (tree, layout) = fixture("(A:1,(B:1,C:1):2):0;");
        let text = to_newick(&tree, &layout, &HashSet::new(), &HashMap::new());
        assert_eq!(text, "(A:1,(B:1,C:1):2);");
    }

    #[test]
    fn merged_node_serializes_as_a_named_leaf() {
        let (tree, layout) = fixture("(A:1,(B:1,C:1):2):0;");
        let inner = tree.get_by_name("B").and_then(|id| tree.nodes[id].parent).unwrap();
        let key = layout.key_of(inner).unwrap();

        let collapsed: HashSet<NodeKey> = [key].into_iter().collect();
        let renamed: HashMap<NodeKey, String> = [(key, "BC".to_string())].into_iter().collect();
        let text = to_newick(&tree, &layout, &collapsed, &renamed);
        assert_eq!(text, "(A:1,BC:2);");
    }

    #[test]
    fn structural_characters_in_names_are_quoted() {
        let (tree, layout) = fixture("(A:1,(B:1,C:1):2):0;");
        let inner = tree.get_by_name("B").and_then(|id| tree.nodes[id].parent).unwrap();
        let key = layout.key_of(inner).unwrap();

        let collapsed: HashSet<NodeKey> = [key].into_iter().collect();
        let renamed: HashMap<NodeKey, String> =
            [(key, "B,C group".to_string())].into_iter().collect();
        let text = to_newick(&tree, &layout, &collapsed, &renamed);
        assert_eq!(text, "(A:1,'B,C group':2);");
    }

    #[test]
    fn integral_lengths_drop_the_decimal_point() {
        let (tree, layout) = fixture("(A:1.5,B:2.0):0;");
        let text = to_newick(&tree, &layout, &HashSet::new(), &HashMap::new());
        assert_eq!(text, "(A:1.5,B:2);");
    }

    #[test]
    fn overrides_replace_a_node_verbatim() {
        let (tree, layout) = fixture("(A:1,BC:2):0;");
        let bc = tree.get_by_name("BC").unwrap();
        let overrides: HashMap<NodeId, String> =
            [(bc, "(B:1,C:1):2".to_string())].into_iter().collect();
        let text =
            to_newick_with_overrides(&tree, &layout, &HashSet::new(), &HashMap::new(), &overrides);
        assert_eq!(text, "(A:1,(B:1,C:1):2);");
    }

    #[test]
    fn subtree_snippet_keeps_the_branch_length() {
        let (tree, _) = fixture("(A:1,(B:1,C:1):2):0;");
        let inner = tree.get_by_name("B").and_then(|id| tree.nodes[id].parent).unwrap();
        assert_eq!(subtree_snippet(&tree, inner), "(B:1,C:1):2");
    }

    #[test]
    fn serialization_is_idempotent() {
        let (tree, layout) = fixture("(A:1,(B:1,C:1):2):0;");
        let once = to_newick(&tree, &layout, &HashSet::new(), &HashMap::new());
        let (tree2, layout2) = fixture(&once);
        let twice = to_newick(&tree2, &layout2, &HashSet::new(), &HashMap::new());
        assert_eq!(once, twice);
    }
}
