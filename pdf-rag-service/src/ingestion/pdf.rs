//! PDF text extraction through PDFium.

use async_trait::async_trait;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::{DocumentLoader, PageText};
use crate::error::LoadError;

/// Loads PDFs page by page.
///
/// PDFium is synchronous, so extraction runs on the blocking pool.
#[derive(Debug, Default, Clone)]
pub struct PdfLoader;

impl PdfLoader {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DocumentLoader for PdfLoader {
    async fn load(&self, path: &Path) -> Result<Vec<PageText>, LoadError> {
        let display = path.display().to_string();

        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Err(LoadError::NotFound { path: display });
        }

        let owned: PathBuf = path.to_path_buf();
        let pages = tokio::task::spawn_blocking(move || extract_pages(&owned))
            .await
            .map_err(|e| LoadError::Unreadable {
                path: display.clone(),
                message: format!("extraction task failed: {}", e),
            })??;

        if pages.iter().all(|p| p.text.trim().is_empty()) {
            return Err(LoadError::NoText { path: display });
        }

        Ok(pages)
    }
}

/// Check that a PDFium library can be bound.
pub fn pdfium_available() -> Result<(), LoadError> {
    create_pdfium().map(|_| ())
}

/// Bind PDFium, preferring a copy shipped next to the binary.
fn create_pdfium() -> Result<Pdfium, LoadError> {
    let bindings = Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
        .or_else(|_| {
            Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(
                "./vendor/pdfium/lib/",
            ))
        })
        .or_else(|_| Pdfium::bind_to_system_library())
        .map_err(|e| LoadError::ExtractorUnavailable {
            message: format!("PDFium library not available: {:?}", e),
        })?;

    Ok(Pdfium::new(bindings))
}

fn extract_pages(path: &Path) -> Result<Vec<PageText>, LoadError> {
    let unreadable = |message: String| LoadError::Unreadable {
        path: path.display().to_string(),
        message,
    };

    let pdfium = create_pdfium()?;
    let document = pdfium
        .load_pdf_from_file(path, None)
        .map_err(|e| unreadable(format!("failed to open PDF: {:?}", e)))?;

    info!(path = %path.display(), pages = document.pages().len(), "Extracting PDF text");

    let mut pages = Vec::new();
    for (page_index, page) in document.pages().iter().enumerate() {
        let page_number = page_index as u32 + 1;

        let text = match page.text() {
            Ok(text) => text.all(),
            Err(e) => {
                // One bad page should not sink the rest of the document
                warn!(page = page_number, error = ?e, "Failed to read page text");
                continue;
            }
        };

        debug!(page = page_number, chars = text.len(), "Extracted page");
        pages.push(PageText { page_number, text });
    }

    Ok(pages)
}
