//! Document loading and chunking.
//!
//! A [`DocumentLoader`] turns a stored file into per-page text; [`chunk_pages`]
//! turns those pages into the [`DocumentChunk`]s that get embedded.

pub mod pdf;

pub use pdf::{PdfLoader, pdfium_available};

use async_trait::async_trait;
use std::path::Path;

use crate::config::ChunkingConfig;
use crate::db::DocumentChunk;
use crate::error::LoadError;

/// Text of one page. Page numbers are 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageText {
    pub page_number: u32,
    pub text: String,
}

#[async_trait]
pub trait DocumentLoader: Send + Sync {
    async fn load(&self, path: &Path) -> Result<Vec<PageText>, LoadError>;
}

/// Split loaded pages into chunks attributed to `source_file`.
///
/// Blank pages produce nothing. With `max_words == 0` every page is one chunk;
/// otherwise each page is cut into word windows that share `overlap_words`.
pub fn chunk_pages(
    pages: &[PageText],
    source_file: &str,
    config: &ChunkingConfig,
) -> Vec<DocumentChunk> {
    let mut chunks = Vec::new();

    for page in pages {
        let text = page.text.trim();
        if text.is_empty() {
            continue;
        }

        let page_number = (page.page_number > 0).then_some(page.page_number);

        if config.max_words == 0 {
            chunks.push(DocumentChunk {
                text: text.to_string(),
                source_file: source_file.to_string(),
                page_number,
            });
            continue;
        }

        for window in word_windows(text, config.max_words, config.overlap_words) {
            chunks.push(DocumentChunk {
                text: window,
                source_file: source_file.to_string(),
                page_number,
            });
        }
    }

    chunks
}

/// Split text into overlapping runs of at most `size` words
fn word_windows(text: &str, size: usize, overlap: usize) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();

    if words.len() <= size {
        return vec![words.join(" ")];
    }

    // overlap >= size would never advance
    let step = size.saturating_sub(overlap).max(1);
    let mut windows = Vec::new();
    let mut start = 0;

    loop {
        let end = (start + size).min(words.len());
        windows.push(words[start..end].join(" "));
        if end == words.len() {
            break;
        }
        start += step;
    }

    windows
}
