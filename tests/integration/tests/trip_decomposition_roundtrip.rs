use std::fs;
use std::sync::Arc;

use async_trait::async_trait;
use lifeline_ai::{
    ChatPromptClient, ChatPromptOptions, ChatRequest, ChatResponse, ChatUsage, LlmClient,
    LlmError, Message, MessageRole,
};
use lifeline_core::write_json_atomic;
use lifeline_events::{
    finalize_tree, find_event, parse_event_list, tree_stats, DecomposerConfig, DriverOptions,
    EventNode, FinalizeOptions, ParallelDfsDriver, PromptTemplates, TreeDecomposer,
};
use lifeline_memory::{EventMemoryIndex, SearchOptions};
use serde_json::json;
use tokio::sync::Mutex;

/// Answers by looking at which event the prompt is about.
#[derive(Default)]
struct TripPlanner {
    seen: Mutex<Vec<ChatRequest>>,
}

fn phase_children() -> serde_json::Value {
    json!([
        {
            "name": "Check in at the hotel",
            "date": ["2025-01-02"],
            "type": "Personal Life",
            "description": "Drop bags near Central Street",
            "participant": [{"name": "Lin", "relation": "partner"}],
            "location": "Harbin-Central Street",
            "decompose": 0
        },
        {
            "name": "Ice and Snow World",
            "date": ["2025-01-04"],
            "type": "Personal Life",
            "description": "Evening among the ice sculptures",
            "participant": [{"name": "Lin", "relation": "partner"}],
            "location": "Harbin-Ice and Snow World",
            "decompose": 1
        }
    ])
}

fn root_children() -> serde_json::Value {
    json!([
        {
            "name": "Fly home",
            "date": ["2025-01-10"],
            "type": "Personal Life",
            "description": "Evening flight back",
            "participant": [],
            "location": "Harbin-Taiping Airport",
            "decompose": 0
        },
        {
            "name": "Fly out",
            "date": ["2025-01-01"],
            "type": "Personal Life",
            "description": "Morning flight north",
            "participant": [],
            "location": "Shanghai-Hongqiao Airport",
            "decompose": 0
        },
        {
            "name": "Ice festival days",
            "date": ["2025-01-02至2025-01-05"],
            "type": "Personal Life",
            "description": "Sightseeing around the festival",
            "participant": [{"name": "Lin", "relation": "partner"}],
            "location": "Harbin",
            "decompose": 1
        }
    ])
}

#[async_trait]
impl LlmClient for TripPlanner {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, LlmError> {
        let prompt = request
            .messages
            .iter()
            .find(|message| message.role == MessageRole::User)
            .map(|message| message.content.clone())
            .unwrap_or_default();
        self.seen.lock().await.push(request);

        let content = if prompt.contains("Ice festival days") {
            format!("```json\n{}\n```", phase_children())
        } else {
            format!("Sure, the phases are:\n{}", root_children())
        };
        Ok(ChatResponse {
            message: Message::assistant(content),
            finish_reason: Some("stop".to_string()),
            usage: ChatUsage::default(),
        })
    }
}

fn trip_root() -> EventNode {
    serde_json::from_value(json!({
        "event_id": "1",
        "name": "Trip",
        "date": ["2025-01-01至2025-01-10"],
        "type": "Personal Life",
        "description": "Winter holiday in Harbin",
        "participant": [{"name": "Lin", "relation": "partner"}],
        "location": "Harbin",
        "decompose": 1
    }))
    .expect("trip root")
}

#[tokio::test]
async fn integration_trip_decomposes_two_levels_and_round_trips_through_disk() {
    let workspace = tempfile::tempdir().expect("tempdir");
    let llm = Arc::new(TripPlanner::default());
    let prompt_client = Arc::new(ChatPromptClient::new(
        llm.clone(),
        ChatPromptOptions::new("scripted-model"),
    ));
    let decomposer = TreeDecomposer::new(
        prompt_client,
        PromptTemplates::default(),
        DecomposerConfig::new(r#"{"name": "Li Ming", "age": 31}"#),
    );
    let driver = ParallelDfsDriver::new(
        Arc::new(decomposer),
        DriverOptions {
            max_workers: 4,
            max_depth: 2,
        },
    );

    let (mut tree, report) = driver.decompose_tree_with_report(vec![trip_root()]).await;
    assert_eq!(llm.seen.lock().await.len(), 2);
    assert_eq!(report.attempted, 2);
    assert_eq!(report.expanded, 2);
    assert_eq!(report.children_created, 5);
    assert_eq!(report.forced_terminal_at_cap, 1);
    assert_eq!(report.failed, 0);

    finalize_tree(&mut tree, FinalizeOptions::default());
    let output = workspace.path().join("event_decompose_dfs.json");
    write_json_atomic(&output, &tree).expect("write tree");
    let reloaded = parse_event_list(&fs::read_to_string(&output).expect("read tree")).expect("parse");
    assert_eq!(reloaded, tree);

    let names = reloaded[0]
        .subevent
        .iter()
        .map(|child| (child.event_id.as_str(), child.name.as_str()))
        .collect::<Vec<_>>();
    assert_eq!(
        names,
        vec![
            ("1-1", "Fly out"),
            ("1-2", "Ice festival days"),
            ("1-3", "Fly home")
        ]
    );

    let sculptures = find_event(&reloaded, "1-2-2").expect("depth-2 node");
    assert_eq!(sculptures.name, "Ice and Snow World");
    assert!(!sculptures.decompose);
    assert!(sculptures.subevent.is_empty());

    let stats = tree_stats(&reloaded);
    assert_eq!(stats.total, 6);
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.max_depth, 2);

    let index = EventMemoryIndex::from_tree(&reloaded, 256);
    let hits = index.search(
        "ice sculptures",
        &SearchOptions {
            leaves_only: true,
            ..SearchOptions::default()
        },
    );
    assert_eq!(hits.first().map(|hit| hit.event_id.as_str()), Some("1-2-2"));
}
