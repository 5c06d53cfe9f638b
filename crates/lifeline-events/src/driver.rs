//! Level-by-level decomposition of whole event trees on top of the frontier expander.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

use crate::decomposer::TreeDecomposer;
use crate::frontier::{
    expand_frontier, ExpansionTask, Expanded, FrontierExpander, FrontierOptions, LevelReport,
    TreeNode,
};
use crate::model::EventNode;

pub const DEFAULT_MAX_DEPTH: usize = 2;

pub fn default_max_workers() -> usize {
    std::thread::available_parallelism()
        .map(|count| count.get() * 2)
        .unwrap_or(8)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverOptions {
    pub max_workers: usize,
    pub max_depth: usize,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DecompositionReport {
    pub attempted: usize,
    pub expanded: usize,
    pub failed: usize,
    pub children_created: usize,
    pub dropped_children: usize,
    pub out_of_range_children: usize,
    pub forced_terminal_at_cap: usize,
    pub levels: Vec<LevelReport>,
}

impl fmt::Display for DecompositionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "decomposed {} of {} nodes ({} failed, {} children, {} dropped)",
            self.expanded, self.attempted, self.failed, self.children_created, self.dropped_children
        )
    }
}

impl TreeNode for EventNode {
    fn children(&self) -> &[Self] {
        &self.subevent
    }

    fn children_mut(&mut self) -> &mut Vec<Self> {
        &mut self.subevent
    }

    fn needs_expansion(&self) -> bool {
        self.decompose
    }

    fn mark_terminal(&mut self) {
        self.force_terminal();
    }

    fn detached(&self) -> Self {
        EventNode::detached(self)
    }
}

#[async_trait]
impl FrontierExpander<EventNode> for TreeDecomposer {
    async fn expand(&self, task: ExpansionTask<EventNode>) -> Result<Expanded<EventNode>, String> {
        let background = if task.depth == 0 {
            String::new()
        } else {
            serde_json::to_string_pretty(task.siblings.as_slice()).map_err(|error| error.to_string())?
        };
        let outcome = self
            .try_decompose_node(&task.node, task.depth, &background)
            .await
            .map_err(|error| format!("{}: {error}", task.node.event_id))?;
        Ok(Expanded {
            children: outcome.children,
            rejected: outcome.invalid,
            flagged: outcome.out_of_range,
        })
    }
}

/// Expands a list of root events level by level with a bounded worker pool per level.
pub struct ParallelDfsDriver {
    decomposer: Arc<TreeDecomposer>,
    options: DriverOptions,
}

impl ParallelDfsDriver {
    pub fn new(decomposer: Arc<TreeDecomposer>, options: DriverOptions) -> Self {
        Self {
            decomposer,
            options,
        }
    }

    pub fn options(&self) -> DriverOptions {
        self.options
    }

    pub async fn decompose_tree(&self, roots: Vec<EventNode>) -> Vec<EventNode> {
        self.decompose_tree_with_report(roots).await.0
    }

    pub async fn decompose_tree_with_report(
        &self,
        mut roots: Vec<EventNode>,
    ) -> (Vec<EventNode>, DecompositionReport) {
        info!(
            roots = roots.len(),
            max_workers = self.options.max_workers,
            max_depth = self.options.max_depth,
            "starting decomposition"
        );
        let frontier = expand_frontier(
            &mut roots,
            Arc::clone(&self.decomposer),
            FrontierOptions {
                max_depth: self.options.max_depth,
                max_workers: self.options.max_workers,
            },
        )
        .await;
        let report = DecompositionReport {
            attempted: frontier.attempted,
            expanded: frontier.expanded,
            failed: frontier.failed,
            children_created: frontier.children_created,
            dropped_children: frontier.rejected_children,
            out_of_range_children: frontier.flagged_children,
            forced_terminal_at_cap: frontier.forced_terminal_at_cap,
            levels: frontier.levels,
        };
        info!(%report, "decomposition finished");
        (roots, report)
    }
}
