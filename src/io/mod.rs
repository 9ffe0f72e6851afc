use std::fs;
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use phylotree::tree::{NewickFormat, Tree as PhyloTree};

use crate::tree::{Tree, TreeNode};

/// Load one or more Newick trees from a file. A single malformed tree fails
/// the whole load; no partial result escapes.
pub fn load_trees(path: &Path) -> Result<Vec<Tree>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read tree file: {}", path.display()))?;

    let trees = parse_newick(&raw)?;
    if trees.is_empty() {
        bail!("tree file did not contain any trees");
    }
    Ok(trees)
}

pub fn parse_newick(raw: &str) -> Result<Vec<Tree>> {
    let mut trees = Vec::new();

    for chunk in raw.split_inclusive(';') {
        let candidate = chunk.trim();
        if candidate.is_empty() || !candidate.ends_with(';') {
            continue;
        }

        let index = trees.len();
        let tree = tree_from_newick(candidate)
            .with_context(|| format!("failed to parse tree #{}", index + 1))?;
        trees.push(tree);
    }

    Ok(trees)
}

/// Parse a single Newick string into an arena tree. The stored source text is
/// the parser's canonical form with comments stripped.
pub fn tree_from_newick(raw: &str) -> Result<Tree> {
    let newick = normalise_newick(raw);
    // The parser rejects a tree with no parenthesized clade, so a bare
    // "name;" (root is the only tip) is built directly.
    if !newick.contains('(') {
        return single_taxon_tree(&newick);
    }
    let phylo = PhyloTree::from_newick(&newick)
        .map_err(|err| anyhow!("failed to parse newick tree: {err}"))?;
    let canonical_newick = phylo
        .to_formatted_newick(NewickFormat::NoComments)
        .unwrap_or_else(|_| newick.clone());

    Ok(Tree::new(canonical_newick, &phylo))
}

fn single_taxon_tree(newick: &str) -> Result<Tree> {
    let body = newick.trim_end_matches(';').trim();
    if body.is_empty() {
        bail!("newick tree is empty");
    }

    let (name, length) = match body.rsplit_once(':') {
        Some((name, value)) => {
            let value: f64 = value
                .trim()
                .parse()
                .map_err(|_| anyhow!("invalid branch length in newick tree: {value}"))?;
            (name.trim(), Some(value))
        }
        None => (body, None),
    };
    let name = name.trim_matches('\'');
    let name = (!name.is_empty()).then(|| name.to_string());

    Ok(Tree {
        newick: newick.to_string(),
        root: Some(0),
        nodes: vec![TreeNode::new(0, name, length)],
    })
}

fn normalise_newick(raw: &str) -> String {
    let mut cleaned = raw.trim().trim_end_matches(';').trim().to_owned();
    cleaned.push(';');
    cleaned
}
