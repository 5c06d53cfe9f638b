//! Event-tree decomposition: the event record, tolerant JSON extraction from
//! model output, prompt templates, single-node decomposition and the
//! level-parallel driver that grows a whole tree.

pub mod decomposer;
pub mod driver;
pub mod extract;
pub mod finalize;
pub mod frontier;
pub mod model;
pub mod prompts;
pub mod query;

pub use decomposer::{
    ChildDatePolicy, DecomposeError, DecomposerConfig, NodeOutcome, TreeDecomposer,
};
pub use driver::{
    default_max_workers, DecompositionReport, DriverOptions, ParallelDfsDriver, DEFAULT_MAX_DEPTH,
};
pub use extract::{extract_array, extract_as, extract_object, extract_structured, JsonShape, ParseError};
pub use finalize::{finalize_tree, FinalizeOptions};
pub use frontier::{
    expand_frontier, ExpansionTask, Expanded, FrontierExpander, FrontierOptions, FrontierReport,
    LevelReport, TreeNode, TreePath,
};
pub use model::{EventNode, EventType, Participant, ValidationError, REQUIRED_CHILD_FIELDS};
pub use prompts::{
    PromptStage, PromptTemplates, PromptVars, TemplateError, DEFAULT_SYSTEM_CONTEXT,
    PHASE_TEMPLATE_FILE, ROOT_TEMPLATE_FILE,
};
pub use query::{
    events_in_window, find_event, flatten_events, leaf_events, tree_stats, FlatEvent, TreeStats,
};

/// Reads a root event list, accepting either a bare array or `{"events": [...]}`.
pub fn parse_event_list(text: &str) -> Result<Vec<EventNode>, serde_json::Error> {
    #[derive(serde::Deserialize)]
    #[serde(untagged)]
    enum EventList {
        Bare(Vec<EventNode>),
        Wrapped { events: Vec<EventNode> },
    }

    Ok(match serde_json::from_str::<EventList>(text)? {
        EventList::Bare(events) => events,
        EventList::Wrapped { events } => events,
    })
}
