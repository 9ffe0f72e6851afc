use std::collections::{BTreeMap, HashSet};
use std::fmt;

use log::warn;

use super::collapse::MergeRecord;
use super::{NodeId, Tree};

/// Grouping key for internal-node identity: the exact abstract x-coordinate a
/// node had when its group was first numbered. Stored bit-exact so equal
/// coordinates computed by identical arithmetic always land in the same group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Threshold(u64);

impl Threshold {
    pub fn from_x(x: f64) -> Self {
        Self(x.to_bits())
    }

    pub fn value(self) -> f64 {
        f64::from_bits(self.0)
    }
}

impl Ord for Threshold {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.value().total_cmp(&other.value())
    }
}

impl PartialOrd for Threshold {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value())
    }
}

/// Content-stable identifier of an internal node: its threshold group plus its
/// 0-based rank among same-threshold nodes ordered by abstract y.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CladeKey {
    pub threshold: Threshold,
    pub rank: usize,
}

impl CladeKey {
    pub fn new(threshold: Threshold, rank: usize) -> Self {
        Self { threshold, rank }
    }
}

impl fmt::Display for CladeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.threshold, self.rank)
    }
}

/// Identifier of any node in the displayed tree.
///
/// Tips carry a dense counter reassigned on every layout pass; internal nodes
/// carry a [`CladeKey`] that survives re-layout as long as their branch-length
/// position is unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKey {
    Tip(usize),
    Clade(CladeKey),
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKey::Tip(index) => write!(f, "{index}"),
            NodeKey::Clade(clade) => write!(f, "{clade}"),
        }
    }
}

/// Session-owned pools of clade identifiers, one ordered pool per threshold.
///
/// A pool is written once, when its threshold group is first numbered, and on
/// later passes merely filtered against identifiers absorbed by merge records.
/// The registry must be reset before the first layout of a newly loaded tree;
/// [`crate::app::TreeSession::load`] upholds that ordering.
#[derive(Debug, Default)]
pub struct ThresholdRegistry {
    pools: BTreeMap<Threshold, Vec<CladeKey>>,
}

impl ThresholdRegistry {
    pub fn reset(&mut self) {
        self.pools.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    pub fn pool(&self, threshold: Threshold) -> &[CladeKey] {
        self.pools.get(&threshold).map(Vec::as_slice).unwrap_or(&[])
    }

    fn pool_mut(&mut self, threshold: Threshold) -> &mut Vec<CladeKey> {
        self.pools.entry(threshold).or_default()
    }
}

/// Assign every node its identifier for this layout pass.
///
/// Tips are renumbered 1..N in traversal order unconditionally. Internal nodes
/// get clade keys: dense per-group ranks on a fresh tree, or identifiers
/// reclaimed from the persisted pools when merge records exist. Each merge
/// record's node is forced to participate as an internal node (it is a literal
/// leaf in the rebuilt arena) so it recovers its own stable key.
pub fn assign_keys(
    tree: &Tree,
    positions: &[(f64, f64)],
    registry: &mut ThresholdRegistry,
    merged: &BTreeMap<CladeKey, MergeRecord>,
) -> Vec<Option<NodeKey>> {
    let mut keys: Vec<Option<NodeKey>> = vec![None; tree.nodes.len()];

    let mut next_tip = 0usize;
    tree.visit(|id| {
        if tree.is_leaf(id) {
            next_tip += 1;
            keys[id] = Some(NodeKey::Tip(next_tip));
        }
        true
    });

    // Without merge state there is nothing to reconcile against, so the pools
    // are rebuilt from scratch; the numbering is deterministic either way.
    if merged.is_empty() {
        registry.reset();
    }

    if registry.is_empty() {
        for (threshold, members) in group_by_threshold(tree, positions, &HashSet::new()) {
            let pool: Vec<CladeKey> = (0..members.len())
                .map(|rank| CladeKey::new(threshold, rank))
                .collect();
            for (&id, &key) in members.iter().zip(&pool) {
                keys[id] = Some(NodeKey::Clade(key));
            }
            *registry.pool_mut(threshold) = pool;
        }
        return keys;
    }

    // Identifiers absorbed into a collapse stay reserved so unrelated nodes
    // in the same group do not shift identity.
    let absorbed: HashSet<NodeKey> = merged
        .values()
        .flat_map(|record| record.children.iter().copied())
        .collect();

    let mut forced: HashSet<NodeId> = HashSet::new();
    reassign_groups(tree, positions, registry, &absorbed, &forced, &mut keys);

    // BTreeMap iteration gives records ordered by (threshold, rank).
    for record in merged.values() {
        let Some(parent_id) = keys.iter().position(|key| *key == Some(record.parent)) else {
            warn!("merge record parent {} not found in current tree", record.parent);
            continue;
        };
        let Some(&node_id) = tree.nodes[parent_id].children.get(record.sibling_index) else {
            warn!(
                "merge record sibling index {} out of range under {}",
                record.sibling_index, record.parent
            );
            continue;
        };
        forced.insert(node_id);
        reassign_groups(tree, positions, registry, &absorbed, &forced, &mut keys);
    }

    keys
}

fn group_by_threshold(
    tree: &Tree,
    positions: &[(f64, f64)],
    forced: &HashSet<NodeId>,
) -> BTreeMap<Threshold, Vec<NodeId>> {
    let mut groups: BTreeMap<Threshold, Vec<NodeId>> = BTreeMap::new();
    tree.visit(|id| {
        if !tree.is_leaf(id) || forced.contains(&id) {
            groups
                .entry(Threshold::from_x(positions[id].0))
                .or_default()
                .push(id);
        }
        true
    });
    for members in groups.values_mut() {
        members.sort_by(|&a, &b| positions[a].1.total_cmp(&positions[b].1));
    }
    groups
}

fn reassign_groups(
    tree: &Tree,
    positions: &[(f64, f64)],
    registry: &mut ThresholdRegistry,
    absorbed: &HashSet<NodeKey>,
    forced: &HashSet<NodeId>,
    keys: &mut [Option<NodeKey>],
) {
    for (threshold, members) in group_by_threshold(tree, positions, forced) {
        let available: Vec<CladeKey> = registry
            .pool(threshold)
            .iter()
            .copied()
            .filter(|key| !absorbed.contains(&NodeKey::Clade(*key)))
            .collect();

        for (index, &id) in members.iter().enumerate() {
            if let Some(&key) = available.get(index) {
                keys[id] = Some(NodeKey::Clade(key));
            } else {
                // Pool shortfall: hand out a fresh identifier past the original
                // range and persist it so the node keeps it on later passes.
                let pool = registry.pool_mut(threshold);
                let fresh = CladeKey::new(threshold, pool.len());
                pool.push(fresh);
                warn!("identifier pool for threshold {threshold} exhausted; extended with {fresh}");
                keys[id] = Some(NodeKey::Clade(fresh));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::layout::{place_nodes, LayoutOptions};
    use crate::io;

    fn clade(x: f64, rank: usize) -> NodeKey {
        NodeKey::Clade(CladeKey::new(Threshold::from_x(x), rank))
    }

    #[test]
    fn keys_render_as_threshold_dash_rank() {
        assert_eq!(clade(2.0, 0).to_string(), "2-0");
        assert_eq!(clade(0.5, 3).to_string(), "0.5-3");
        assert_eq!(NodeKey::Tip(7).to_string(), "7");
    }

    #[test]
    fn fresh_assignment_is_dense_and_ordered_by_y() {
        let mut tree = io::tree_from_newick("((A:1,B:1):1,(C:1,D:1):1):0;").unwrap();
        let mut registry = ThresholdRegistry::default();
        let layout = place_nodes(&mut tree, &LayoutOptions::default(), &mut registry, &BTreeMap::new());

        let upper = tree.get_by_name("A").and_then(|id| tree.nodes[id].parent).unwrap();
        let lower = tree.get_by_name("C").and_then(|id| tree.nodes[id].parent).unwrap();
        assert_eq!(layout.keys[upper], Some(clade(1.0, 0)));
        assert_eq!(layout.keys[lower], Some(clade(1.0, 1)));
        assert_eq!(layout.keys[tree.root.unwrap()], Some(clade(0.0, 0)));
        assert_eq!(registry.pool(Threshold::from_x(1.0)).len(), 2);
    }

    #[test]
    fn absorbed_identifiers_stay_reserved() {
        let mut tree = io::tree_from_newick("((A:1,B:1):1,(C:1,D:1):1):0;").unwrap();
        let mut registry = ThresholdRegistry::default();
        let options = LayoutOptions::default();
        place_nodes(&mut tree, &options, &mut registry, &BTreeMap::new());

        // Pretend "1-1" was absorbed by a merge while both groups stay live:
        // the second group member must not reuse it.
        let mut merged = BTreeMap::new();
        let NodeKey::Clade(key) = clade(1.0, 1) else { unreachable!() };
        merged.insert(
            key,
            MergeRecord {
                children: [clade(1.0, 1)].into_iter().collect(),
                subtree_newick: String::new(),
                parent: clade(0.0, 0),
                sibling_index: 0,
            },
        );

        let layout = place_nodes(&mut tree, &options, &mut registry, &merged);
        let lower = tree.get_by_name("C").and_then(|id| tree.nodes[id].parent).unwrap();
        assert_eq!(layout.keys[lower], Some(clade(1.0, 2)));
        assert_eq!(registry.pool(Threshold::from_x(1.0)).len(), 3);

        // The extended identifier is stable on the next pass.
        let layout = place_nodes(&mut tree, &options, &mut registry, &merged);
        assert_eq!(layout.keys[lower], Some(clade(1.0, 2)));
    }

    #[test]
    fn relayout_without_edits_is_idempotent() {
        let mut tree = io::tree_from_newick("(A:1,(B:1,C:1):2):0;").unwrap();
        let mut registry = ThresholdRegistry::default();
        let options = LayoutOptions::default();

        let first = place_nodes(&mut tree, &options, &mut registry, &BTreeMap::new());
        let second = place_nodes(&mut tree, &options, &mut registry, &BTreeMap::new());
        assert_eq!(first.keys, second.keys);
    }

    #[test]
    fn tip_keys_are_a_dense_range_from_one() {
        let mut tree = io::tree_from_newick("((A:1,B:1):1,(C:1,(D:1,E:1):1):1):0;").unwrap();
        let mut registry = ThresholdRegistry::default();
        let layout = place_nodes(&mut tree, &LayoutOptions::default(), &mut registry, &BTreeMap::new());

        let mut tip_indices: Vec<usize> = tree
            .tips()
            .iter()
            .map(|&id| match layout.keys[id] {
                Some(NodeKey::Tip(index)) => index,
                other => panic!("tip carries {other:?}"),
            })
            .collect();
        tip_indices.sort_unstable();
        assert_eq!(tip_indices, vec![1, 2, 3, 4, 5]);
    }
}
