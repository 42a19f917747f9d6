use crate::error::IngestError;
use lopdf::Document;
use std::path::Path;

/// One page of raw extracted text.
#[derive(Debug, Clone)]
pub struct PageText {
    pub number: u32,
    pub text: String,
}

pub trait PdfExtractor: Send + Sync {
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfExtractor;

impl PdfExtractor for LopdfExtractor {
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError> {
        let document =
            Document::load(path).map_err(|error| IngestError::PdfParse(error.to_string()))?;

        // Pages that fail text extraction (scans, odd encodings) are
        // dropped; the file only fails when nothing at all is readable.
        let mut pages = Vec::new();
        for (page_no, _page_id) in document.get_pages() {
            let Ok(text) = document.extract_text(&[page_no]) else {
                continue;
            };
            if text.trim().is_empty() {
                continue;
            }
            pages.push(PageText {
                number: page_no,
                text,
            });
        }

        if pages.is_empty() {
            return Err(IngestError::PdfParse(format!(
                "pdf had no readable page text: {}",
                path.display()
            )));
        }

        Ok(pages)
    }
}
