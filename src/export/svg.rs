use std::path::Path;

use anyhow::{bail, Context, Result};
use svg::node::element::{Circle, Group, Line, Polygon, Rectangle, Text};
use svg::Document;

use crate::app::TreeSession;
use crate::tree::collapse::{self, CollapseState};
use crate::tree::layout::TreeLayout;
use crate::tree::{NodeId, Tree};

const BRANCH_COLOR: &str = "#2b2b2b";
const LABEL_COLOR: &str = "#1a1a1a";
const MARKER_COLOR: &str = "#5a7d9a";
const AXIS_COLOR: &str = "#9aa4ad";
const GLYPH_WIDTH: f64 = 14.0;
const GLYPH_HEIGHT: f64 = 10.0;

/// Render the session's visible tree to an SVG file.
pub fn export_svg(session: &TreeSession, path: &Path, width: u32, height: u32) -> Result<()> {
    let (Some(tree), Some(layout)) = (session.tree(), session.layout()) else {
        bail!("no tree available for SVG export");
    };
    let document = render_document(tree, layout, session.state(), width as f64, height as f64);
    svg::save(path, &document)
        .with_context(|| format!("failed to save SVG: {}", path.display()))
}

/// Build the SVG document: background, branches, collapsed-clade glyphs,
/// labels, and a branch-length axis when lengths are in use.
pub fn render_document(
    tree: &Tree,
    layout: &TreeLayout,
    state: &CollapseState,
    width: f64,
    height: f64,
) -> Document {
    let margin_x = (width * 0.05).clamp(20.0, 60.0);
    let margin_y = (height * 0.05).clamp(20.0, 40.0);
    let inner_width = width - 2.0 * margin_x;
    let inner_height = height - 2.0 * margin_y;

    let scale_x = if layout.max_x <= f64::EPSILON {
        inner_width.max(1.0)
    } else {
        inner_width.max(1.0) / layout.max_x
    };
    let scale_y = if layout.max_y <= f64::EPSILON {
        inner_height.max(1.0)
    } else {
        inner_height.max(1.0) / layout.max_y
    };

    let to_svg = |pos: (f64, f64)| -> (f64, f64) {
        (margin_x + pos.0 * scale_x, margin_y + pos.1 * scale_y)
    };

    let hidden = collapse::hidden_branches(tree, layout, &state.collapsed);
    let is_collapsed =
        |id: NodeId| layout.key_of(id).is_some_and(|key| state.is_collapsed(key));

    let mut document = Document::new()
        .set("width", width)
        .set("height", height)
        .set("viewBox", (0, 0, width as i32, height as i32));

    let background = Rectangle::new()
        .set("width", "100%")
        .set("height", "100%")
        .set("fill", "white");
    document = document.add(background);

    let mut tree_group = Group::new().set("id", "tree");

    // Horizontal branch per visible non-root node.
    for node in &tree.nodes {
        if hidden.contains(&node.id) {
            continue;
        }
        let Some(parent) = node.parent else { continue };
        let (parent_x, _) = to_svg(layout.positions[parent]);
        let (x, y) = to_svg(layout.positions[node.id]);
        let line = Line::new()
            .set("x1", parent_x)
            .set("y1", y)
            .set("x2", x)
            .set("y2", y)
            .set("stroke", BRANCH_COLOR)
            .set("stroke-width", 1.5);
        tree_group = tree_group.add(line);
    }

    // Vertical connector per visible, non-collapsed internal node, clipped to
    // its visible children.
    for node in &tree.nodes {
        if node.is_leaf() || hidden.contains(&node.id) || is_collapsed(node.id) {
            continue;
        }
        let visible_rows: Vec<f64> = node
            .children
            .iter()
            .filter(|child| !hidden.contains(*child))
            .map(|&child| to_svg(layout.positions[child]).1)
            .collect();
        let (Some(top), Some(bottom)) = (
            visible_rows.iter().copied().reduce(f64::min),
            visible_rows.iter().copied().reduce(f64::max),
        ) else {
            continue;
        };
        let (x, _) = to_svg(layout.positions[node.id]);
        let line = Line::new()
            .set("x1", x)
            .set("y1", top)
            .set("x2", x)
            .set("y2", bottom)
            .set("stroke", BRANCH_COLOR)
            .set("stroke-width", 1.5);
        tree_group = tree_group.add(line);
    }

    for node in &tree.nodes {
        if hidden.contains(&node.id) {
            continue;
        }
        let (x, y) = to_svg(layout.positions[node.id]);
        let key = layout.key_of(node.id);
        let label = key.and_then(|key| state.display_name(key, node.name.as_deref()));

        if is_collapsed(node.id) {
            // Collapsed clade: filled triangle pointing back at the node.
            let points = format!(
                "{},{} {},{} {},{}",
                x,
                y,
                x + GLYPH_WIDTH,
                y - GLYPH_HEIGHT * 0.5,
                x + GLYPH_WIDTH,
                y + GLYPH_HEIGHT * 0.5
            );
            let glyph = Polygon::new()
                .set("points", points)
                .set("fill", MARKER_COLOR)
                .set("stroke", "none");
            tree_group = tree_group.add(glyph);

            if let Some(label) = label {
                tree_group = tree_group.add(label_text(label, x + GLYPH_WIDTH + 4.0, y));
            }
            continue;
        }

        if node.is_leaf() {
            if let Some(label) = label {
                tree_group = tree_group.add(label_text(label, x + 4.0, y));
            }
            continue;
        }

        // Internal marker, suppressed inside collapsed clades (redundant with
        // the hidden set for descendants, but cheap to keep symmetric).
        if !collapse::is_inside_collapsed(tree, layout, node.id, &state.collapsed) {
            let marker = Circle::new()
                .set("cx", x)
                .set("cy", y)
                .set("r", 2.5)
                .set("fill", MARKER_COLOR);
            tree_group = tree_group.add(marker);
            if let Some(label) = label {
                tree_group = tree_group.add(label_text(label, x + 6.0, y));
            }
        }
    }

    document = document.add(tree_group);

    if layout.has_branch_lengths {
        if let Some(tick) = nice_tick_span(layout.max_x) {
            document = document.add(axis_group(tick, layout.max_x, scale_x, margin_x, margin_y));
        }
    }

    document
}

fn label_text(label: &str, x: f64, y: f64) -> Text {
    Text::new("")
        .set("x", x)
        .set("y", y)
        .set("font-size", 10.0)
        .set("fill", LABEL_COLOR)
        .set("dominant-baseline", "middle")
        .set("text-anchor", "start")
        .add(svg::node::Text::new(label))
}

fn axis_group(tick: f64, max_x: f64, scale_x: f64, margin_x: f64, margin_y: f64) -> Group {
    let baseline = margin_y - 8.0;
    let mut group = Group::new().set("id", "axis");

    let axis_line = Line::new()
        .set("x1", margin_x)
        .set("y1", baseline)
        .set("x2", margin_x + max_x * scale_x)
        .set("y2", baseline)
        .set("stroke", AXIS_COLOR)
        .set("stroke-width", 1.0);
    group = group.add(axis_line);

    let mut value = 0.0;
    while value <= max_x + tick * 1e-6 {
        let x = margin_x + value * scale_x;
        let mark = Line::new()
            .set("x1", x)
            .set("y1", baseline)
            .set("x2", x)
            .set("y2", baseline + 4.0)
            .set("stroke", AXIS_COLOR)
            .set("stroke-width", 1.0);
        group = group.add(mark);

        let text = Text::new("")
            .set("x", x)
            .set("y", baseline - 3.0)
            .set("font-size", 9.0)
            .set("fill", AXIS_COLOR)
            .set("text-anchor", "middle")
            .set("dominant-baseline", "auto")
            .add(svg::node::Text::new(format_tick(value)));
        group = group.add(text);

        value += tick;
    }

    group
}

fn nice_tick_span(total: f64) -> Option<f64> {
    if total <= f64::EPSILON {
        return None;
    }

    let magnitude = 10.0f64.powf(total.log10().floor());
    let normalized = total / magnitude;

    let nice = if normalized < 2.0 {
        0.5
    } else if normalized < 5.0 {
        1.0
    } else {
        2.0
    };

    Some(nice * magnitude)
}

fn format_tick(value: f64) -> String {
    let text = format!("{value:.3}");
    text.trim_end_matches('0').trim_end_matches('.').to_string()
}
