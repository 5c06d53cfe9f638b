//! Scoring primitives for event retrieval.
//!
//! Documents are bags of weighted terms built from an event's fields, so a
//! match in the event name counts for more than one buried in its description.
//! Rankings refer to documents by their position in the slice they were
//! ranked from; callers map positions back to their own records.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "at", "by", "for", "from", "in", "of", "on", "the", "to", "with",
];

/// One field of an event with its relevance weight.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightedText<'a> {
    pub text: &'a str,
    pub weight: f32,
}

impl<'a> WeightedText<'a> {
    pub fn new(text: &'a str, weight: f32) -> Self {
        Self { text, weight }
    }
}

/// Weighted term frequencies of one document or query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TermBag {
    terms: HashMap<String, f32>,
    length: f32,
}

impl TermBag {
    pub fn from_fields(fields: &[WeightedText<'_>]) -> Self {
        let mut bag = Self::default();
        for field in fields.iter().filter(|field| field.weight > 0.0) {
            for term in tokenize_text(field.text) {
                *bag.terms.entry(term).or_default() += field.weight;
                bag.length += field.weight;
            }
        }
        bag
    }

    pub fn from_text(text: &str) -> Self {
        Self::from_fields(&[WeightedText::new(text, 1.0)])
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn frequency(&self, term: &str) -> f32 {
        self.terms.get(term).copied().unwrap_or(0.0)
    }

    /// Distinct terms in a stable order.
    pub fn terms(&self) -> Vec<&str> {
        let mut terms = self.terms.keys().map(String::as_str).collect::<Vec<_>>();
        terms.sort_unstable();
        terms
    }

    /// Signed feature hashing into a unit vector; weights carry over from the fields.
    pub fn embed(&self, dimensions: usize) -> Vec<f32> {
        let dimensions = dimensions.max(1);
        let mut vector = vec![0.0f32; dimensions];
        for (term, weight) in &self.terms {
            let hash = stable_hash(term);
            let slot = (hash % dimensions as u64) as usize;
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            vector[slot] += sign * weight;
        }
        let norm = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }
        vector
    }
}

/// A document position and its score, best first once sorted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankedMatch {
    pub doc: usize,
    pub score: f32,
}

/// Dot product of two unit vectors; mismatched lengths score zero.
pub fn cosine_similarity(left: &[f32], right: &[f32]) -> f32 {
    if left.len() != right.len() {
        return 0.0;
    }
    left.iter().zip(right).map(|(left, right)| left * right).sum()
}

pub fn rank_by_embedding(query: &[f32], documents: &[&[f32]], min_similarity: f32) -> Vec<RankedMatch> {
    let mut ranked = documents
        .iter()
        .enumerate()
        .map(|(doc, embedding)| RankedMatch {
            doc,
            score: cosine_similarity(query, embedding),
        })
        .filter(|entry| entry.score > 0.0 && entry.score >= min_similarity)
        .collect::<Vec<_>>();
    sort_best_first(&mut ranked);
    ranked
}

/// BM25 over weighted term frequencies (field-weighted BM25F with shared `b`).
pub fn rank_bm25(query: &TermBag, documents: &[&TermBag], k1: f32, b: f32) -> Vec<RankedMatch> {
    if query.is_empty() || documents.is_empty() {
        return Vec::new();
    }
    let k1 = k1.max(0.1);
    let b = b.clamp(0.0, 1.0);
    let count = documents.len() as f32;
    let average_length = (documents.iter().map(|doc| doc.length).sum::<f32>() / count).max(1.0);

    let idf = query
        .terms()
        .into_iter()
        .map(|term| {
            let containing = documents.iter().filter(|doc| doc.frequency(term) > 0.0).count() as f32;
            (term, ((count - containing + 0.5) / (containing + 0.5)).ln_1p())
        })
        .collect::<Vec<_>>();

    let mut ranked = Vec::new();
    for (position, document) in documents.iter().enumerate() {
        let saturation = k1 * (1.0 - b + b * document.length / average_length);
        let score = idf
            .iter()
            .map(|(term, weight)| {
                let frequency = document.frequency(term);
                weight * frequency * (k1 + 1.0) / (frequency + saturation).max(f32::EPSILON)
            })
            .sum::<f32>();
        if score > 0.0 {
            ranked.push(RankedMatch { doc: position, score });
        }
    }
    sort_best_first(&mut ranked);
    ranked
}

/// Weighted reciprocal-rank fusion of rankings over the same `doc_count` documents.
pub fn reciprocal_rank_fuse(rankings: &[(&[RankedMatch], f32)], doc_count: usize, rrf_k: usize) -> Vec<RankedMatch> {
    let offset = rrf_k.max(1) as f32 + 1.0;
    let mut totals = vec![0.0f32; doc_count];
    for (ranking, weight) in rankings {
        let weight = weight.max(0.0);
        for (rank, entry) in ranking.iter().enumerate() {
            if let Some(total) = totals.get_mut(entry.doc) {
                *total += weight / (offset + rank as f32);
            }
        }
    }
    let mut fused = totals
        .into_iter()
        .enumerate()
        .filter(|(_, score)| *score > 0.0)
        .map(|(doc, score)| RankedMatch { doc, score })
        .collect::<Vec<_>>();
    sort_best_first(&mut fused);
    fused
}

/// Ties keep document order.
fn sort_best_first(ranked: &mut [RankedMatch]) {
    ranked.sort_by(|left, right| right.score.total_cmp(&left.score).then(left.doc.cmp(&right.doc)));
}

/// Lowercased words without stopwords. Runs of CJK ideographs yield each
/// character plus each adjacent pair, so both `滨` and `尔滨` can match.
pub fn tokenize_text(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut word = String::new();
    let mut ideographs = Vec::new();
    for character in text.chars() {
        if is_cjk(character) {
            push_word(&mut word, &mut tokens);
            ideographs.push(character);
            continue;
        }
        push_ideographs(&mut ideographs, &mut tokens);
        if character.is_alphanumeric() {
            word.extend(character.to_lowercase());
        } else {
            push_word(&mut word, &mut tokens);
        }
    }
    push_word(&mut word, &mut tokens);
    push_ideographs(&mut ideographs, &mut tokens);
    tokens
}

fn push_word(word: &mut String, tokens: &mut Vec<String>) {
    let finished = std::mem::take(word);
    if !finished.is_empty() && !STOPWORDS.contains(&finished.as_str()) {
        tokens.push(finished);
    }
}

fn push_ideographs(run: &mut Vec<char>, tokens: &mut Vec<String>) {
    tokens.extend(run.iter().map(char::to_string));
    tokens.extend(run.windows(2).map(|pair| pair.iter().collect::<String>()));
    run.clear();
}

fn is_cjk(character: char) -> bool {
    matches!(
        character as u32,
        0x3400..=0x4DBF | 0x4E00..=0x9FFF | 0xF900..=0xFAFF | 0x20000..=0x2A6DF
    )
}

/// Fixed-key SipHash, stable for the life of the process.
fn stable_hash(term: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    term.hash(&mut hasher);
    hasher.finish()
}
