//! Level-by-level parallel expansion of a tree frontier.
//!
//! Every level gets its own bounded worker pool. Nodes are addressed by their
//! index path from the root list while a level is in flight, so results can be
//! attached in a deterministic order no matter which worker finishes first.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Index sequence from the root list down to a node.
pub type TreePath = Vec<usize>;

/// Tree shape the frontier walker needs from a node type.
pub trait TreeNode: Clone + Send + Sync + 'static {
    fn children(&self) -> &[Self];
    fn children_mut(&mut self) -> &mut Vec<Self>;
    fn needs_expansion(&self) -> bool;
    /// Clears the expansion flag and any children.
    fn mark_terminal(&mut self);
    /// Clone without descendants.
    fn detached(&self) -> Self;
}

/// One unit of work handed to a worker.
#[derive(Debug, Clone)]
pub struct ExpansionTask<T> {
    pub depth: usize,
    pub path: TreePath,
    pub node: T,
    /// Detached copies of the node's siblings, the node itself included.
    pub siblings: Arc<Vec<T>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expanded<T> {
    pub children: Vec<T>,
    /// Candidates the expander discarded.
    pub rejected: usize,
    /// Children kept but noted as suspicious by the expander.
    pub flagged: usize,
}

impl<T> Expanded<T> {
    pub fn new(children: Vec<T>) -> Self {
        Self {
            children,
            rejected: 0,
            flagged: 0,
        }
    }
}

#[async_trait]
pub trait FrontierExpander<T: TreeNode>: Send + Sync + 'static {
    async fn expand(&self, task: ExpansionTask<T>) -> Result<Expanded<T>, String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrontierOptions {
    /// Number of expansion rounds; the frontier left after the last round is forced terminal.
    pub max_depth: usize,
    pub max_workers: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LevelReport {
    pub depth: usize,
    pub attempted: usize,
    pub expanded: usize,
    pub empty: usize,
    pub failed: usize,
    pub children_created: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FrontierReport {
    pub attempted: usize,
    pub expanded: usize,
    pub failed: usize,
    pub children_created: usize,
    pub rejected_children: usize,
    pub flagged_children: usize,
    pub forced_terminal_at_cap: usize,
    pub levels: Vec<LevelReport>,
}

/// Expands every flagged node breadth-first, one bounded pool per level.
///
/// Expansion failures never escape: a node whose expansion fails, panics or
/// returns no children is marked terminal and counted.
pub async fn expand_frontier<T, E>(
    roots: &mut [T],
    expander: Arc<E>,
    options: FrontierOptions,
) -> FrontierReport
where
    T: TreeNode,
    E: FrontierExpander<T> + ?Sized,
{
    let mut report = FrontierReport::default();
    let mut frontier: Vec<TreePath> = roots
        .iter()
        .enumerate()
        .filter(|(_, node)| node.needs_expansion())
        .map(|(index, _)| vec![index])
        .collect();
    let mut depth = 0;

    while !frontier.is_empty() {
        if depth >= options.max_depth {
            for path in &frontier {
                if let Some(node) = node_at_mut(roots, path) {
                    node.mark_terminal();
                }
            }
            report.forced_terminal_at_cap = frontier.len();
            info!(
                depth,
                nodes = frontier.len(),
                "depth cap reached, remaining frontier marked terminal"
            );
            break;
        }

        let mut results = run_level(roots, &frontier, depth, &expander, options.max_workers).await;
        let mut level = LevelReport {
            depth,
            attempted: frontier.len(),
            ..LevelReport::default()
        };
        let mut next = Vec::new();

        for path in frontier {
            let Some(node) = node_at_mut(roots, &path) else {
                continue;
            };
            match results.remove(&path) {
                Some(Ok(expanded)) if !expanded.children.is_empty() => {
                    report.rejected_children += expanded.rejected;
                    report.flagged_children += expanded.flagged;
                    level.expanded += 1;
                    level.children_created += expanded.children.len();
                    for (index, child) in expanded.children.iter().enumerate() {
                        if child.needs_expansion() {
                            let mut child_path = path.clone();
                            child_path.push(index);
                            next.push(child_path);
                        }
                    }
                    *node.children_mut() = expanded.children;
                }
                Some(Ok(expanded)) => {
                    report.rejected_children += expanded.rejected;
                    level.empty += 1;
                    node.mark_terminal();
                }
                Some(Err(error)) => {
                    warn!(?path, depth, %error, "expansion failed");
                    level.failed += 1;
                    node.mark_terminal();
                }
                None => {
                    warn!(?path, depth, "expansion worker did not report back");
                    level.failed += 1;
                    node.mark_terminal();
                }
            }
        }

        info!(
            depth,
            attempted = level.attempted,
            expanded = level.expanded,
            failed = level.failed,
            children = level.children_created,
            "level complete"
        );
        report.attempted += level.attempted;
        report.expanded += level.expanded;
        report.failed += level.failed;
        report.children_created += level.children_created;
        report.levels.push(level);

        frontier = next;
        depth += 1;
    }

    report
}

async fn run_level<T, E>(
    roots: &[T],
    frontier: &[TreePath],
    depth: usize,
    expander: &Arc<E>,
    max_workers: usize,
) -> HashMap<TreePath, Result<Expanded<T>, String>>
where
    T: TreeNode,
    E: FrontierExpander<T> + ?Sized,
{
    let permits = Arc::new(Semaphore::new(max_workers.max(1)));
    let mut sibling_cache: HashMap<TreePath, Arc<Vec<T>>> = HashMap::new();
    let mut workers = JoinSet::new();

    for path in frontier {
        let Some(node) = node_at(roots, path) else {
            continue;
        };
        let parent_path = path[..path.len() - 1].to_vec();
        let siblings = sibling_cache
            .entry(parent_path.clone())
            .or_insert_with(|| Arc::new(siblings_of(roots, &parent_path)))
            .clone();
        let task = ExpansionTask {
            depth,
            path: path.clone(),
            node: node.detached(),
            siblings,
        };
        let expander = Arc::clone(expander);
        let permits = Arc::clone(&permits);
        workers.spawn(async move {
            let path = task.path.clone();
            let Ok(_permit) = permits.acquire_owned().await else {
                return (path, Err("worker pool closed".to_string()));
            };
            debug!(?path, depth, "expanding node");
            let result = expander.expand(task).await;
            (path, result)
        });
    }

    let mut results = HashMap::with_capacity(frontier.len());
    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok((path, result)) => {
                results.insert(path, result);
            }
            Err(error) => warn!(depth, %error, "expansion worker panicked"),
        }
    }
    results
}

fn siblings_of<T: TreeNode>(roots: &[T], parent_path: &[usize]) -> Vec<T> {
    let list = if parent_path.is_empty() {
        roots
    } else {
        match node_at(roots, parent_path) {
            Some(parent) => parent.children(),
            None => return Vec::new(),
        }
    };
    list.iter().map(TreeNode::detached).collect()
}

pub fn node_at<'a, T: TreeNode>(roots: &'a [T], path: &[usize]) -> Option<&'a T> {
    let (first, rest) = path.split_first()?;
    let mut node = roots.get(*first)?;
    for index in rest {
        node = node.children().get(*index)?;
    }
    Some(node)
}

pub fn node_at_mut<'a, T: TreeNode>(roots: &'a mut [T], path: &[usize]) -> Option<&'a mut T> {
    let (first, rest) = path.split_first()?;
    let mut node = roots.get_mut(*first)?;
    for index in rest {
        node = node.children_mut().get_mut(*index)?;
    }
    Some(node)
}
