//! Retrieval over decomposed event trees.
//!
//! Each node becomes one record whose fields are weighted into a term bag
//! (name above location and participants, those above description). Records
//! are ranked by cosine similarity of hashed embeddings and by BM25, and the
//! two rankings are merged with weighted reciprocal-rank fusion.

pub mod index;
pub mod ranking;

pub use index::{EventMemoryIndex, SearchHit, SearchOptions, DEFAULT_EMBEDDING_DIMENSIONS};
pub use ranking::{
    cosine_similarity, rank_bm25, rank_by_embedding, reciprocal_rank_fuse, tokenize_text,
    RankedMatch, TermBag, WeightedText,
};
