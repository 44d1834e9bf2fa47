//! Candidate retrieval and context ranking for queries

pub mod ranker;
pub mod retriever;

pub use ranker::{ContextRanker, RankedChunk, RankedContext};
pub use retriever::{Candidate, Retrieval, Retriever};
