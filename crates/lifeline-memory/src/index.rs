use chrono::NaiveDate;
use lifeline_core::DateSpec;
use lifeline_events::{flatten_events, EventNode};
use serde::Serialize;
use tracing::debug;

use crate::ranking::{rank_bm25, rank_by_embedding, reciprocal_rank_fuse, TermBag, WeightedText};

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 256;
const BM25_K1: f32 = 1.2;
const BM25_B: f32 = 0.75;

const NAME_WEIGHT: f32 = 3.0;
const LOCATION_WEIGHT: f32 = 2.0;
const PARTICIPANT_WEIGHT: f32 = 2.0;
const DESCRIPTION_WEIGHT: f32 = 1.0;
const TYPE_WEIGHT: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchOptions {
    pub limit: usize,
    /// Only events with a date overlapping this inclusive window.
    pub window: Option<(NaiveDate, NaiveDate)>,
    pub vector_weight: f32,
    pub lexical_weight: f32,
    pub rrf_k: usize,
    pub min_similarity: f32,
    pub leaves_only: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: 5,
            window: None,
            vector_weight: 1.0,
            lexical_weight: 1.0,
            rrf_k: 60,
            min_similarity: 0.05,
            leaves_only: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub event_id: String,
    pub name: String,
    pub date: Vec<String>,
    #[serde(rename = "type")]
    pub event_type: String,
    pub location: String,
    pub depth: usize,
    pub score: f32,
}

#[derive(Debug, Clone)]
struct MemoryRecord {
    event_id: String,
    name: String,
    date: Vec<String>,
    event_type: String,
    location: String,
    depth: usize,
    leaf: bool,
    dates: Vec<DateSpec>,
    terms: TermBag,
    embedding: Vec<f32>,
}

/// In-memory retrieval index over every node of a decomposed tree.
#[derive(Debug, Clone)]
pub struct EventMemoryIndex {
    dimensions: usize,
    records: Vec<MemoryRecord>,
}

impl EventMemoryIndex {
    pub fn from_tree(roots: &[EventNode], dimensions: usize) -> Self {
        let dimensions = dimensions.max(1);
        let records = flatten_events(roots)
            .into_iter()
            .map(|entry| {
                let terms = event_terms(entry.node);
                MemoryRecord {
                    event_id: entry.event_id.to_string(),
                    name: entry.node.name.clone(),
                    date: entry.node.date.clone(),
                    event_type: entry.node.event_type.label().to_string(),
                    location: entry.node.location.clone(),
                    depth: entry.depth,
                    leaf: entry.node.is_leaf(),
                    dates: entry.node.date_specs(),
                    embedding: terms.embed(dimensions),
                    terms,
                }
            })
            .collect();
        Self {
            dimensions,
            records,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn search(&self, query: &str, options: &SearchOptions) -> Vec<SearchHit> {
        let query = query.trim();
        if query.is_empty() || options.limit == 0 {
            return Vec::new();
        }
        let window = options
            .window
            .map(|(start, end)| DateSpec::from_bounds(start.min(end), start.max(end)));
        let pool = self
            .records
            .iter()
            .filter(|record| !options.leaves_only || record.leaf)
            .filter(|record| match &window {
                Some(window) => record.dates.iter().any(|spec| spec.overlaps(window)),
                None => true,
            })
            .collect::<Vec<_>>();

        let query_terms = TermBag::from_text(query);
        let embeddings = pool.iter().map(|record| record.embedding.as_slice()).collect::<Vec<_>>();
        let vector_ranked = rank_by_embedding(
            &query_terms.embed(self.dimensions),
            &embeddings,
            options.min_similarity,
        );
        let bags = pool.iter().map(|record| &record.terms).collect::<Vec<_>>();
        let lexical_ranked = rank_bm25(&query_terms, &bags, BM25_K1, BM25_B);

        let mut fused = reciprocal_rank_fuse(
            &[
                (&vector_ranked[..], options.vector_weight),
                (&lexical_ranked[..], options.lexical_weight),
            ],
            pool.len(),
            options.rrf_k,
        );
        fused.truncate(options.limit);
        debug!(
            query,
            pool = pool.len(),
            vector = vector_ranked.len(),
            lexical = lexical_ranked.len(),
            hits = fused.len(),
            "memory search"
        );

        fused
            .into_iter()
            .filter_map(|ranked| {
                let record = pool.get(ranked.doc)?;
                Some(SearchHit {
                    event_id: record.event_id.clone(),
                    name: record.name.clone(),
                    date: record.date.clone(),
                    event_type: record.event_type.clone(),
                    location: record.location.clone(),
                    depth: record.depth,
                    score: ranked.score,
                })
            })
            .collect()
    }
}

fn event_terms(node: &EventNode) -> TermBag {
    let participants = node
        .participant
        .iter()
        .map(|participant| participant.name.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    TermBag::from_fields(&[
        WeightedText::new(&node.name, NAME_WEIGHT),
        WeightedText::new(&node.location, LOCATION_WEIGHT),
        WeightedText::new(&participants, PARTICIPANT_WEIGHT),
        WeightedText::new(&node.description, DESCRIPTION_WEIGHT),
        WeightedText::new(node.event_type.label(), TYPE_WEIGHT),
    ])
}
