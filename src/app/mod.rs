use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use log::{info, warn};

use crate::export;
use crate::io;
use crate::tree::collapse::{self, CollapseState, MergeRecord};
use crate::tree::identity::{NodeKey, ThresholdRegistry};
use crate::tree::layout::{place_nodes, LayoutOptions, TreeLayout};
use crate::tree::newick;
use crate::tree::{SortDirection, Tree};

#[derive(Debug, Clone, Parser)]
#[command(
    name = "nwktree",
    about = "Lays out phylogenetic trees from Newick files and exports them as SVG."
)]
pub struct AppConfig {
    /// Tree file to load (Newick).
    #[arg(value_name = "TREE_FILE")]
    pub tree_path: PathBuf,

    /// Reorder children by subtree depth before layout.
    #[arg(long, value_name = "DIRECTION")]
    pub sort: Option<SortOrder>,

    /// Give every internal node label its own display row.
    #[arg(long)]
    pub internal_labels: bool,

    /// Collapse every internal node at or beyond this distance from the root.
    #[arg(long, value_name = "X")]
    pub collapse_threshold: Option<f64>,

    /// Export path for the rendered SVG.
    #[arg(short, long, value_name = "OUTPUT")]
    pub output: Option<PathBuf>,

    /// Export path for the displayed tree as Newick.
    #[arg(long, value_name = "FILE")]
    pub export_newick: Option<PathBuf>,

    /// Canvas width in pixels
    #[arg(long, default_value_t = 1100)]
    pub width: u32,

    /// Canvas height in pixels
    #[arg(long, default_value_t = 760)]
    pub height: u32,
}

impl AppConfig {
    fn layout_options(&self) -> LayoutOptions {
        LayoutOptions {
            sort: self.sort.map(Into::into),
            internal_labels: self.internal_labels,
            ..Default::default()
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
pub enum SortOrder {
    Ascending,
    Descending,
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortOrder::Ascending => write!(f, "ascending"),
            SortOrder::Descending => write!(f, "descending"),
        }
    }
}

impl From<SortOrder> for SortDirection {
    fn from(order: SortOrder) -> Self {
        match order {
            SortOrder::Ascending => SortDirection::Ascending,
            SortOrder::Descending => SortDirection::Descending,
        }
    }
}

/// One loaded tree plus everything layered on top of it: layout options, the
/// identifier registry that persists across layout passes, and the user's
/// collapse/rename/merge state.
///
/// Structural edits go through a rebuild cycle: serialize the displayed tree,
/// reparse it, and only then commit the new arena and state. A failed reparse
/// aborts the edit with the previous state untouched.
pub struct TreeSession {
    options: LayoutOptions,
    registry: ThresholdRegistry,
    state: CollapseState,
    tree: Option<Tree>,
    layout: Option<TreeLayout>,
}

impl TreeSession {
    pub fn new(options: LayoutOptions) -> Self {
        Self {
            options,
            registry: ThresholdRegistry::default(),
            state: CollapseState::default(),
            tree: None,
            layout: None,
        }
    }

    pub fn tree(&self) -> Option<&Tree> {
        self.tree.as_ref()
    }

    pub fn layout(&self) -> Option<&TreeLayout> {
        self.layout.as_ref()
    }

    pub fn state(&self) -> &CollapseState {
        &self.state
    }

    pub fn load(&mut self, path: &Path) -> Result<()> {
        let mut trees = io::load_trees(path)?;
        if trees.len() > 1 {
            warn!("file holds {} trees; only the first is displayed", trees.len());
        }
        self.install(trees.remove(0));
        Ok(())
    }

    pub fn load_newick(&mut self, raw: &str) -> Result<()> {
        let tree = io::tree_from_newick(raw)?;
        self.install(tree);
        Ok(())
    }

    // Registry and edit state are cleared before the new tree's first layout,
    // so identifier pools never leak between trees.
    fn install(&mut self, tree: Tree) {
        self.registry.reset();
        self.state.clear();
        self.tree = Some(tree);
        self.relayout();
    }

    pub fn relayout(&mut self) {
        if let Some(tree) = self.tree.as_mut() {
            self.layout = Some(place_nodes(
                tree,
                &self.options,
                &mut self.registry,
                &self.state.merged,
            ));
        }
    }

    pub fn toggle_collapse(&mut self, key: NodeKey) {
        if self.tree.is_none() {
            warn!("collapse toggled with no tree loaded");
            return;
        }
        self.state.toggle_collapse(key);
    }

    pub fn collapse_by_threshold(&mut self, threshold: f64) {
        let (Some(tree), Some(layout)) = (&self.tree, &self.layout) else {
            warn!("threshold collapse requested with no tree loaded");
            return;
        };
        let selected = collapse::select_by_threshold(tree, layout, threshold, &self.state.collapsed);
        self.state.collapsed = selected;
    }

    /// Newick text of the displayed tree, merges and renames applied. Without
    /// a layout there are no node identifiers to apply state against, so the
    /// tree's stored canonical text is returned as is.
    pub fn export_newick(&self) -> Option<String> {
        let tree = self.tree.as_ref()?;
        let Some(layout) = self.layout.as_ref() else {
            return Some(tree.newick.clone());
        };
        Some(newick::to_newick(
            tree,
            layout,
            &self.state.collapsed,
            &self.state.renamed,
        ))
    }

    /// Set or clear a node's name.
    ///
    /// A non-blank name on a collapsed, not-yet-merged internal node turns the
    /// collapse into a merge: the subtree is recorded for later restoration
    /// and replaced in the tree by a single leaf carrying the name. A blank
    /// name clears the rename and, if a merge record exists, splices the
    /// recorded subtree back. Every other case only updates the name table.
    pub fn rename(&mut self, key: NodeKey, name: &str) -> Result<()> {
        let (Some(tree), Some(layout)) = (&self.tree, &self.layout) else {
            warn!("rename requested with no tree loaded");
            return Ok(());
        };

        let trimmed = name.trim();
        if trimmed.is_empty() {
            let snapshot = match key {
                NodeKey::Clade(clade) => self
                    .state
                    .merged
                    .get(&clade)
                    .map(|record| record.subtree_newick.clone()),
                NodeKey::Tip(_) => None,
            };
            let Some(snapshot) = snapshot else {
                self.state.renamed.remove(&key);
                return Ok(());
            };
            let Some(node_id) = layout.node_by_key(key) else {
                warn!("merged node {key} not present in the current layout");
                return Ok(());
            };
            let overrides = HashMap::from([(node_id, snapshot)]);
            let text = newick::to_newick_with_overrides(
                tree,
                layout,
                &HashSet::new(),
                &HashMap::new(),
                &overrides,
            );
            let rebuilt = io::tree_from_newick(&text)
                .with_context(|| format!("failed to rebuild the tree after unmerging {key}"))?;
            if let NodeKey::Clade(clade) = key {
                self.state.merged.remove(&clade);
            }
            self.state.renamed.remove(&key);
            self.tree = Some(rebuilt);
            self.relayout();
            return Ok(());
        }

        let NodeKey::Clade(clade) = key else {
            self.state.renamed.insert(key, trimmed.to_string());
            return Ok(());
        };
        if self.state.merged.contains_key(&clade) || !self.state.collapsed.contains(&key) {
            self.state.renamed.insert(key, trimmed.to_string());
            return Ok(());
        }

        let Some(node_id) = layout.node_by_key(key) else {
            warn!("rename target {key} not present in the current layout");
            self.state.renamed.insert(key, trimmed.to_string());
            return Ok(());
        };
        let Some(parent_id) = tree.nodes[node_id].parent else {
            warn!("the root cannot be merged; keeping the name only");
            self.state.renamed.insert(key, trimmed.to_string());
            return Ok(());
        };
        let Some(parent_key) = layout.key_of(parent_id) else {
            warn!("parent of {key} carries no identifier; keeping the name only");
            self.state.renamed.insert(key, trimmed.to_string());
            return Ok(());
        };
        let sibling_index = tree.nodes[parent_id]
            .children
            .iter()
            .position(|&child| child == node_id)
            .unwrap_or_default();

        let children = collapse::descendant_keys(tree, layout, node_id);
        let subtree_newick = newick::subtree_snippet(tree, node_id);
        let merge_target = HashSet::from([key]);
        let merge_name = HashMap::from([(key, trimmed.to_string())]);
        let text = newick::to_newick(tree, layout, &merge_target, &merge_name);
        let rebuilt = io::tree_from_newick(&text)
            .with_context(|| format!("failed to rebuild the tree after merging {key}"))?;

        self.state.merged.insert(
            clade,
            MergeRecord {
                children,
                subtree_newick,
                parent: parent_key,
                sibling_index,
            },
        );
        self.state.renamed.insert(key, trimmed.to_string());
        self.tree = Some(rebuilt);
        self.relayout();
        Ok(())
    }

    /// Un-collapse a node, restoring its recorded subtree if it was merged.
    pub fn expand(&mut self, key: NodeKey) -> Result<()> {
        let (Some(tree), Some(layout)) = (&self.tree, &self.layout) else {
            warn!("expand requested with no tree loaded");
            return Ok(());
        };

        let record = match key {
            NodeKey::Clade(clade) => self.state.merged.get(&clade).cloned(),
            NodeKey::Tip(_) => None,
        };
        let Some(record) = record else {
            self.state.collapsed.remove(&key);
            return Ok(());
        };
        let Some(node_id) = layout.node_by_key(key) else {
            warn!("merged node {key} not present in the current layout");
            self.state.collapsed.remove(&key);
            return Ok(());
        };

        let overrides = HashMap::from([(node_id, record.subtree_newick)]);
        let text = newick::to_newick_with_overrides(
            tree,
            layout,
            &HashSet::new(),
            &HashMap::new(),
            &overrides,
        );
        let rebuilt = io::tree_from_newick(&text)
            .with_context(|| format!("failed to restore the subtree merged at {key}"))?;

        if let NodeKey::Clade(clade) = key {
            self.state.merged.remove(&clade);
        }
        self.state.collapsed.remove(&key);
        self.state.renamed.remove(&key);
        self.tree = Some(rebuilt);
        self.relayout();
        Ok(())
    }
}

pub fn run(config: &AppConfig) -> Result<()> {
    let mut session = TreeSession::new(config.layout_options());
    session.load(&config.tree_path)?;

    if let Some(threshold) = config.collapse_threshold {
        session.collapse_by_threshold(threshold);
        info!(
            "collapsed {} nodes at threshold {threshold}",
            session.state().collapsed.len()
        );
    }

    if let Some(path) = &config.export_newick {
        let text = session
            .export_newick()
            .context("no tree available for newick export")?;
        fs::write(path, text)
            .with_context(|| format!("failed to write newick export: {}", path.display()))?;
        info!("wrote newick export to {}", path.display());
    }

    if let Some(path) = &config.output {
        export::svg::export_svg(&session, path, config.width, config.height)?;
        info!("wrote SVG export to {}", path.display());
    }

    if let (Some(tree), Some(layout)) = (session.tree(), session.layout()) {
        println!(
            "{}: {} tips, depth {}",
            config.tree_path.display(),
            tree.leaf_count(),
            layout.max_x
        );
    }

    Ok(())
}
