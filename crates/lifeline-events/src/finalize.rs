//! Ordering and display-id pass run once decomposition is done.

use crate::model::EventNode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinalizeOptions {
    /// Stable-sort every `subevent` list by start date.
    pub sort_children: bool,
    /// Stable-sort the root list by start date.
    pub sort_roots: bool,
    /// Replace root ids with `1..n` instead of keeping input ids.
    pub renumber_roots: bool,
}

impl Default for FinalizeOptions {
    fn default() -> Self {
        Self {
            sort_children: true,
            sort_roots: false,
            renumber_roots: false,
        }
    }
}

pub fn finalize_tree(roots: &mut [EventNode], options: FinalizeOptions) {
    if options.sort_roots {
        sort_by_start(roots);
    }
    for (index, root) in roots.iter_mut().enumerate() {
        if options.renumber_roots || root.event_id.trim().is_empty() {
            root.event_id = (index + 1).to_string();
        }
        finalize_children(root, options.sort_children);
    }
}

fn finalize_children(node: &mut EventNode, sort: bool) {
    if sort {
        sort_by_start(&mut node.subevent);
    }
    for (index, child) in node.subevent.iter_mut().enumerate() {
        child.event_id = format!("{}-{}", node.event_id, index + 1);
        finalize_children(child, sort);
    }
}

/// Unparseable dates sort last; ties keep their current order.
fn sort_by_start(nodes: &mut [EventNode]) {
    nodes.sort_by_key(|node| match node.start_date() {
        Some(start) => (0, Some(start)),
        None => (1, None),
    });
}
