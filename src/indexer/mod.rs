//! File listing, text extraction and chunking
//!
//! Provides functionality to enumerate a tenant's file root, decode or
//! extract document text and split it into overlapping chunks for embedding.

mod chunker;
mod extract;
mod file_walker;
mod glob_filter;

pub use chunker::{Chunker, TextChunk, chunk_text, reassemble};
pub use extract::{extract_text, is_pdf};
pub use file_walker::{FileWalker, ListedFile};
pub use glob_filter::PathFilter;
