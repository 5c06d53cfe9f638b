//! Read-only queries over finished event trees.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use lifeline_core::DateSpec;
use serde::Serialize;

use crate::model::EventNode;

/// A node seen during a pre-order walk.
#[derive(Debug, Clone, Copy)]
pub struct FlatEvent<'a> {
    pub event_id: &'a str,
    pub depth: usize,
    pub node: &'a EventNode,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TreeStats {
    pub total: usize,
    pub roots: usize,
    pub leaves: usize,
    /// Nodes still flagged for decomposition.
    pub pending: usize,
    pub max_depth: usize,
    pub by_depth: BTreeMap<usize, usize>,
    pub by_type: BTreeMap<String, usize>,
}

pub fn flatten_events(roots: &[EventNode]) -> Vec<FlatEvent<'_>> {
    let mut out = Vec::new();
    for root in roots {
        walk(root, 0, &mut out);
    }
    out
}

fn walk<'a>(node: &'a EventNode, depth: usize, out: &mut Vec<FlatEvent<'a>>) {
    out.push(FlatEvent {
        event_id: &node.event_id,
        depth,
        node,
    });
    for child in &node.subevent {
        walk(child, depth + 1, out);
    }
}

pub fn leaf_events(roots: &[EventNode]) -> Vec<&EventNode> {
    flatten_events(roots)
        .into_iter()
        .filter(|entry| entry.node.is_leaf())
        .map(|entry| entry.node)
        .collect()
}

/// Nodes with at least one date entry overlapping `[start, end]`.
pub fn events_in_window(roots: &[EventNode], start: NaiveDate, end: NaiveDate) -> Vec<&EventNode> {
    let window = DateSpec::from_bounds(start.min(end), start.max(end));
    flatten_events(roots)
        .into_iter()
        .filter(|entry| entry.node.date_specs().iter().any(|spec| spec.overlaps(&window)))
        .map(|entry| entry.node)
        .collect()
}

pub fn find_event<'a>(roots: &'a [EventNode], event_id: &str) -> Option<&'a EventNode> {
    flatten_events(roots)
        .into_iter()
        .find(|entry| entry.event_id == event_id)
        .map(|entry| entry.node)
}

pub fn tree_stats(roots: &[EventNode]) -> TreeStats {
    let mut stats = TreeStats {
        roots: roots.len(),
        ..TreeStats::default()
    };
    for entry in flatten_events(roots) {
        stats.total += 1;
        stats.max_depth = stats.max_depth.max(entry.depth);
        *stats.by_depth.entry(entry.depth).or_default() += 1;
        *stats
            .by_type
            .entry(entry.node.event_type.label().to_string())
            .or_default() += 1;
        if entry.node.is_leaf() {
            stats.leaves += 1;
        }
        if entry.node.decompose {
            stats.pending += 1;
        }
    }
    stats
}
