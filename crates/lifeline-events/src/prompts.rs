//! Prompt templates for the two decomposition stages.
//!
//! Templates are minijinja sources rendered with `persona`, `parent_event`,
//! `background`, `date_range`, `depth`, `min_children`, `max_children`,
//! `event_types` and `json_object` (true when the provider is held to a JSON
//! object, so the list has to arrive as `{"events": [...]}`). Built-in English templates can be replaced per stage by
//! dropping `decompose_root.j2` / `decompose_phase.j2` into a directory.

use std::path::Path;

use minijinja::{context, Environment};
use thiserror::Error;

pub const ROOT_TEMPLATE_FILE: &str = "decompose_root.j2";
pub const PHASE_TEMPLATE_FILE: &str = "decompose_phase.j2";

pub const DEFAULT_SYSTEM_CONTEXT: &str = "You write realistic, internally consistent life \
events for a simulated person. Answer with JSON only, in exactly the shape the request asks for.";

/// Key holding the event list when replies must be JSON objects.
pub const EVENT_LIST_KEY: &str = "events";

const BUILTIN_ROOT_TEMPLATE: &str = r#"The person you are simulating:
{{ persona }}

Below is one event from this person's year. Split it into {{ min_children }}-{{ max_children }} sub-events in chronological order.
Each sub-event is either
- a phase spanning several days ("decompose": 1, "date" holds one range "YYYY-MM-DD至YYYY-MM-DD"), or
- an atomic event lasting at most one day ("decompose": 0, "date" holds single days "YYYY-MM-DD").
All dates must fall within {{ date_range }}. Sub-events should not overlap in time.

Event:
{{ parent_event }}

{% if json_object %}Return only a JSON object {"events": [...]} whose "events" array holds the sub-events.{% else %}Return only a JSON array of the sub-events.{% endif %}
Every sub-event must have exactly these fields:
"name" (string), "date" (array of strings), "type" (one of: {{ event_types }}),
"description" (string), "participant" (array of {"name", "relation"}),
"location" (string, "city-place"), "decompose" (0 or 1)."#;

const BUILTIN_PHASE_TEMPLATE: &str = r#"The person you are simulating:
{{ persona }}

The phase below belongs to a larger event that has already been split into these sibling sub-events:
{{ background }}

Split the phase into {{ min_children }}-{{ max_children }} atomic events, each lasting at most one day.
Every date must be a single day "YYYY-MM-DD" inside {{ date_range }}, and the events must stay consistent with the siblings above.

Phase:
{{ parent_event }}

{% if json_object %}Return only a JSON object {"events": [...]} whose "events" array holds the atomic events.{% else %}Return only a JSON array of the atomic events.{% endif %}
Every event must have exactly these fields:
"name" (string), "date" (array of strings), "type" (one of: {{ event_types }}),
"description" (string), "participant" (array of {"name", "relation"}),
"location" (string, "city-place"), "decompose" (0)."#;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("failed to read template {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("template {name} is invalid: {source}")]
    Syntax {
        name: &'static str,
        #[source]
        source: minijinja::Error,
    },
    #[error("failed to render {name}: {source}")]
    Render {
        name: &'static str,
        #[source]
        source: minijinja::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptStage {
    /// Depth 0: split a raw event into phases or atomic events.
    Root,
    /// Depth >= 1: split a phase into day-granularity events.
    Phase,
}

impl PromptStage {
    pub fn for_depth(depth: usize) -> Self {
        if depth == 0 {
            Self::Root
        } else {
            Self::Phase
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Root => "decompose_root",
            Self::Phase => "decompose_phase",
        }
    }
}

/// Values substituted into a stage template.
#[derive(Debug, Clone)]
pub struct PromptVars<'a> {
    pub persona: &'a str,
    pub parent_event: &'a str,
    pub background: &'a str,
    pub date_range: &'a str,
    pub depth: usize,
    pub min_children: usize,
    pub max_children: usize,
    pub json_object: bool,
}

#[derive(Debug, Clone)]
pub struct PromptTemplates {
    root: String,
    phase: String,
}

impl Default for PromptTemplates {
    fn default() -> Self {
        Self {
            root: BUILTIN_ROOT_TEMPLATE.to_string(),
            phase: BUILTIN_PHASE_TEMPLATE.to_string(),
        }
    }
}

impl PromptTemplates {
    pub fn from_sources(
        root: impl Into<String>,
        phase: impl Into<String>,
    ) -> Result<Self, TemplateError> {
        let templates = Self {
            root: root.into(),
            phase: phase.into(),
        };
        templates.check()?;
        Ok(templates)
    }

    /// Built-ins, overridden by whichever stage files exist in `dir`.
    pub fn from_dir(dir: &Path) -> Result<Self, TemplateError> {
        let defaults = Self::default();
        let root = read_override(dir, ROOT_TEMPLATE_FILE)?.unwrap_or(defaults.root);
        let phase = read_override(dir, PHASE_TEMPLATE_FILE)?.unwrap_or(defaults.phase);
        Self::from_sources(root, phase)
    }

    pub fn render(&self, stage: PromptStage, vars: &PromptVars<'_>) -> Result<String, TemplateError> {
        let env = Environment::new();
        let event_types = crate::EventType::ALL
            .iter()
            .map(|kind| kind.label())
            .collect::<Vec<_>>()
            .join(", ");
        env.render_str(
            self.source(stage),
            context! {
                persona => vars.persona,
                parent_event => vars.parent_event,
                background => vars.background,
                date_range => vars.date_range,
                depth => vars.depth,
                min_children => vars.min_children,
                max_children => vars.max_children,
                event_types => event_types,
                json_object => vars.json_object,
            },
        )
        .map_err(|source| TemplateError::Render {
            name: stage.name(),
            source,
        })
    }

    fn source(&self, stage: PromptStage) -> &str {
        match stage {
            PromptStage::Root => &self.root,
            PromptStage::Phase => &self.phase,
        }
    }

    fn check(&self) -> Result<(), TemplateError> {
        let env = Environment::new();
        for stage in [PromptStage::Root, PromptStage::Phase] {
            env.template_from_str(self.source(stage))
                .map_err(|source| TemplateError::Syntax {
                    name: stage.name(),
                    source,
                })?;
        }
        Ok(())
    }
}

fn read_override(dir: &Path, file_name: &str) -> Result<Option<String>, TemplateError> {
    let path = dir.join(file_name);
    if !path.is_file() {
        return Ok(None);
    }
    std::fs::read_to_string(&path)
        .map(Some)
        .map_err(|source| TemplateError::Read {
            path: path.display().to_string(),
            source,
        })
}
