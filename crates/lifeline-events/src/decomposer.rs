//! Single-node decomposition: prompt, extract, validate, normalize.

use std::sync::Arc;

use lifeline_ai::{PromptCallError, PromptClient};
use lifeline_core::{bounding_span, covered_by_any, DateSpec};
use thiserror::Error;
use tracing::{debug, warn};

use crate::extract::{extract_array, extract_object, ParseError};
use crate::model::EventNode;
use crate::prompts::{
    PromptStage, PromptTemplates, PromptVars, TemplateError, DEFAULT_SYSTEM_CONTEXT, EVENT_LIST_KEY,
};

/// What to do with children whose dates fall outside the parent's dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChildDatePolicy {
    /// Keep them; they are counted and logged.
    #[default]
    Accept,
    DropOutOfRange,
}

#[derive(Debug, Clone)]
pub struct DecomposerConfig {
    /// Persona document, used only as prompt context.
    pub persona: String,
    pub system_context: String,
    pub min_children: usize,
    pub max_children: usize,
    pub child_date_policy: ChildDatePolicy,
    /// The provider only returns JSON objects; prompts ask for `{"events": [...]}`.
    pub json_object: bool,
}

impl DecomposerConfig {
    pub fn new(persona: impl Into<String>) -> Self {
        Self {
            persona: persona.into(),
            system_context: DEFAULT_SYSTEM_CONTEXT.to_string(),
            min_children: 3,
            max_children: 10,
            child_date_policy: ChildDatePolicy::default(),
            json_object: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum DecomposeError {
    #[error("prompt rendering failed: {0}")]
    Template(#[from] TemplateError),
    #[error("prompt call failed: {0}")]
    Prompt(#[from] PromptCallError),
    #[error("model output unusable: {0}")]
    Parse(#[from] ParseError),
    #[error("failed to serialize prompt context: {0}")]
    Context(#[from] serde_json::Error),
}

/// Children produced for one node plus what was discarded along the way.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeOutcome {
    pub children: Vec<EventNode>,
    /// Candidates dropped for missing or malformed fields.
    pub invalid: usize,
    /// Children whose dates leave the parent's dates (kept or dropped per policy).
    pub out_of_range: usize,
}

pub struct TreeDecomposer {
    client: Arc<dyn PromptClient>,
    templates: PromptTemplates,
    config: DecomposerConfig,
}

impl TreeDecomposer {
    pub fn new(
        client: Arc<dyn PromptClient>,
        templates: PromptTemplates,
        config: DecomposerConfig,
    ) -> Self {
        Self {
            client,
            templates,
            config,
        }
    }

    pub fn config(&self) -> &DecomposerConfig {
        &self.config
    }

    /// Best-effort decomposition: any failure is logged and yields no children.
    pub async fn decompose_node(
        &self,
        node: &EventNode,
        depth: usize,
        background: &str,
    ) -> Vec<EventNode> {
        match self.try_decompose_node(node, depth, background).await {
            Ok(outcome) => outcome.children,
            Err(error) => {
                warn!(event_id = %node.event_id, depth, %error, "decomposition failed");
                Vec::new()
            }
        }
    }

    pub async fn try_decompose_node(
        &self,
        node: &EventNode,
        depth: usize,
        background: &str,
    ) -> Result<NodeOutcome, DecomposeError> {
        let prompt = self.render_prompt(node, depth, background)?;
        debug!(event_id = %node.event_id, depth, "requesting decomposition");
        let raw = self
            .client
            .call(&prompt, &self.config.system_context)
            .await?;
        let candidates = self.candidate_list(&raw)?;
        Ok(self.collect_children(node, candidates))
    }

    fn render_prompt(
        &self,
        node: &EventNode,
        depth: usize,
        background: &str,
    ) -> Result<String, DecomposeError> {
        let parent_event = serde_json::to_string_pretty(&node.detached())?;
        let date_range = bounding_span(&node.date_specs())
            .map(|span| span.to_string())
            .unwrap_or_else(|| node.date.join(", "));
        let vars = PromptVars {
            persona: &self.config.persona,
            parent_event: &parent_event,
            background,
            date_range: &date_range,
            depth,
            min_children: self.config.min_children,
            max_children: self.config.max_children,
            json_object: self.config.json_object,
        };
        Ok(self.templates.render(PromptStage::for_depth(depth), &vars)?)
    }

    /// In object mode the list is read from the envelope; a bare array is accepted either way.
    fn candidate_list(&self, raw: &str) -> Result<Vec<serde_json::Value>, ParseError> {
        if self.config.json_object {
            if let Ok(mut envelope) = extract_object(raw) {
                if let Some(serde_json::Value::Array(items)) = envelope.remove(EVENT_LIST_KEY) {
                    return Ok(items);
                }
            }
        }
        extract_array(raw)
    }

    fn collect_children(&self, parent: &EventNode, candidates: Vec<serde_json::Value>) -> NodeOutcome {
        let parent_dates = parent.date_specs();
        let mut outcome = NodeOutcome::default();

        for (position, candidate) in candidates.iter().enumerate() {
            let child = match EventNode::from_llm_value(candidate) {
                Ok(child) => child,
                Err(error) => {
                    warn!(
                        event_id = %parent.event_id,
                        position,
                        %error,
                        "dropping malformed child"
                    );
                    outcome.invalid += 1;
                    continue;
                }
            };

            if !within_parent(&parent_dates, &child) {
                outcome.out_of_range += 1;
                debug!(
                    event_id = %parent.event_id,
                    child = %child.name,
                    dates = ?child.date,
                    "child dates fall outside parent"
                );
                if self.config.child_date_policy == ChildDatePolicy::DropOutOfRange {
                    continue;
                }
            }
            outcome.children.push(child);
        }

        for (index, child) in outcome.children.iter_mut().enumerate() {
            child.event_id = format!("{}-{}", parent.event_id, index + 1);
        }
        outcome
    }
}

/// Children with unparseable dates, or under a parent without parseable dates, pass.
fn within_parent(parent_dates: &[DateSpec], child: &EventNode) -> bool {
    if parent_dates.is_empty() {
        return true;
    }
    child
        .date_specs()
        .iter()
        .all(|spec| covered_by_any(parent_dates, spec))
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use lifeline_ai::{PromptCallError, PromptClient};
    use serde_json::json;

    use super::{ChildDatePolicy, DecomposeError, DecomposerConfig, TreeDecomposer};
    use crate::model::EventNode;
    use crate::prompts::PromptTemplates;

    struct CannedClient {
        replies: Mutex<VecDeque<Result<String, PromptCallError>>>,
        prompts: Mutex<Vec<(String, String)>>,
    }

    impl CannedClient {
        fn new(replies: Vec<Result<String, PromptCallError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(VecDeque::from(replies)),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl PromptClient for CannedClient {
        async fn call(&self, prompt: &str, system_context: &str) -> Result<String, PromptCallError> {
            self.prompts
                .lock()
                .expect("prompts")
                .push((prompt.to_string(), system_context.to_string()));
            self.replies
                .lock()
                .expect("replies")
                .pop_front()
                .unwrap_or(Err(PromptCallError::EmptyResponse))
        }
    }

    fn trip() -> EventNode {
        serde_json::from_value(json!({
            "event_id": "1",
            "name": "Trip",
            "date": ["2025-01-01至2025-01-10"],
            "type": "Personal Life",
            "description": "Winter trip",
            "participant": [],
            "location": "Harbin",
            "decompose": 1
        }))
        .expect("trip")
    }

    fn child(name: &str, date: &str, decompose: u8) -> serde_json::Value {
        json!({
            "name": name,
            "date": [date],
            "type": "Personal Life",
            "description": name,
            "participant": [],
            "location": "Harbin-hotel",
            "decompose": decompose
        })
    }

    fn decomposer(client: Arc<CannedClient>, policy: ChildDatePolicy) -> TreeDecomposer {
        let mut config = DecomposerConfig::new("{\"name\": \"Li Ming\"}");
        config.child_date_policy = policy;
        TreeDecomposer::new(client, PromptTemplates::default(), config)
    }

    #[tokio::test]
    async fn assigns_hierarchical_ids_and_drops_malformed_children() {
        let reply = json!([
            child("Fly out", "2025-01-01", 0),
            { "name": "No dates", "type": "Other" },
            child("Ice festival", "2025-01-02至2025-01-05", 1),
        ])
        .to_string();
        let client = CannedClient::new(vec![Ok(format!("```json\n{reply}\n```"))]);
        let outcome = decomposer(client.clone(), ChildDatePolicy::Accept)
            .try_decompose_node(&trip(), 0, "")
            .await
            .expect("outcome");

        assert_eq!(outcome.invalid, 1);
        let ids = outcome
            .children
            .iter()
            .map(|child| child.event_id.as_str())
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["1-1", "1-2"]);
        assert!(!outcome.children[0].decompose);
        assert!(outcome.children[1].decompose);

        let prompts = client.prompts.lock().expect("prompts");
        assert!(prompts[0].0.contains("Li Ming"));
        assert!(prompts[0].0.contains("2025-01-01至2025-01-10"));
        assert!(!prompts[0].1.is_empty());
    }

    #[tokio::test]
    async fn phase_prompts_carry_background() {
        let client = CannedClient::new(vec![Ok(json!([child("Skate", "2025-01-03", 0)]).to_string())]);
        let mut phase = trip();
        phase.event_id = "1-2".to_string();
        decomposer(client.clone(), ChildDatePolicy::Accept)
            .try_decompose_node(&phase, 1, "[{\"name\": \"Fly out\"}]")
            .await
            .expect("outcome");
        assert!(client.prompts.lock().expect("prompts")[0].0.contains("Fly out"));
    }

    #[tokio::test]
    async fn out_of_range_children_follow_policy() {
        let reply = json!([
            child("Inside", "2025-01-03", 0),
            child("Outside", "2025-02-01", 0),
        ])
        .to_string();

        let accepted = decomposer(CannedClient::new(vec![Ok(reply.clone())]), ChildDatePolicy::Accept)
            .try_decompose_node(&trip(), 0, "")
            .await
            .expect("accept");
        assert_eq!(accepted.children.len(), 2);
        assert_eq!(accepted.out_of_range, 1);

        let dropped = decomposer(
            CannedClient::new(vec![Ok(reply)]),
            ChildDatePolicy::DropOutOfRange,
        )
        .try_decompose_node(&trip(), 0, "")
        .await
        .expect("drop");
        assert_eq!(dropped.children.len(), 1);
        assert_eq!(dropped.children[0].name, "Inside");
        assert_eq!(dropped.children[0].event_id, "1-1");
    }

    #[tokio::test]
    async fn object_mode_reads_the_events_envelope() {
        let envelope = json!({
            "events": [
                child("Fly out", "2025-01-01", 0),
                child("Fly home", "2025-01-10", 0),
            ]
        })
        .to_string();
        let bare = json!([child("Skate", "2025-01-03", 0)]).to_string();
        let client = CannedClient::new(vec![Ok(envelope), Ok(bare)]);
        let mut config = DecomposerConfig::new("{\"name\": \"Li Ming\"}");
        config.json_object = true;
        let decomposer = TreeDecomposer::new(client.clone(), PromptTemplates::default(), config);

        let first = decomposer
            .try_decompose_node(&trip(), 0, "")
            .await
            .expect("envelope");
        let names = first.children.iter().map(|child| child.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["Fly out", "Fly home"]);
        assert!(client.prompts.lock().expect("prompts")[0].0.contains("{\"events\": [...]}"));

        let second = decomposer
            .try_decompose_node(&trip(), 0, "")
            .await
            .expect("bare array");
        assert_eq!(second.children.len(), 1);
        assert_eq!(second.children[0].name, "Skate");
    }

    #[tokio::test]
    async fn failures_surface_as_typed_errors() {
        let client = CannedClient::new(vec![
            Err(PromptCallError::EmptyResponse),
            Ok("no json here".to_string()),
        ]);
        let decomposer = decomposer(client, ChildDatePolicy::Accept);
        assert!(matches!(
            decomposer.try_decompose_node(&trip(), 0, "").await,
            Err(DecomposeError::Prompt(_))
        ));
        assert!(matches!(
            decomposer.try_decompose_node(&trip(), 0, "").await,
            Err(DecomposeError::Parse(_))
        ));
    }

    #[tokio::test]
    async fn best_effort_entry_point_swallows_failures() {
        let client = CannedClient::new(vec![Ok("[not, valid".to_string())]);
        let children = decomposer(client, ChildDatePolicy::Accept)
            .decompose_node(&trip(), 0, "")
            .await;
        assert!(children.is_empty());
    }
}
