use crate::error::IngestError;
use crate::extractor::PdfExtractor;
use crate::models::PageRecord;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// A PDF that could not be read during a load pass.
#[derive(Debug)]
pub struct SkippedPdf {
    pub path: PathBuf,
    pub reason: String,
}

/// Result of loading one folder: page records in document order, plus the
/// files that were skipped as unreadable. A folder with zero PDFs yields an
/// empty report, not an error.
#[derive(Debug)]
pub struct LoadReport {
    pub pages: Vec<PageRecord>,
    pub document_count: usize,
    pub skipped: Vec<SkippedPdf>,
}

/// Recursively finds `.pdf` files under `folder`, sorted for a
/// deterministic chunk order. A missing or unreadable folder is a load
/// failure.
pub fn discover_pdf_files(folder: &Path) -> Result<Vec<PathBuf>, IngestError> {
    if !folder.is_dir() {
        return Err(IngestError::Load(format!(
            "document folder missing: {}",
            folder.display()
        )));
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(folder) {
        let entry = entry.map_err(|error| IngestError::Load(error.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let is_pdf = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));

        if is_pdf {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    Ok(files)
}

pub fn load_pages(folder: &Path, extractor: &dyn PdfExtractor) -> Result<LoadReport, IngestError> {
    let files = discover_pdf_files(folder)?;

    let mut pages = Vec::new();
    let mut skipped = Vec::new();
    let mut document_count = 0usize;

    for path in files {
        match load_document_pages(&path, extractor) {
            Ok(mut document_pages) => {
                document_count += 1;
                pages.append(&mut document_pages);
            }
            Err(error) => skipped.push(SkippedPdf {
                path,
                reason: error.to_string(),
            }),
        }
    }

    Ok(LoadReport {
        pages,
        document_count,
        skipped,
    })
}

fn load_document_pages(
    path: &Path,
    extractor: &dyn PdfExtractor,
) -> Result<Vec<PageRecord>, IngestError> {
    let title = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| IngestError::MissingFileName(path.display().to_string()))?
        .to_string();

    let document_id = document_id_for(path);
    let source_path = path.to_string_lossy().to_string();

    let extracted = extractor.extract_pages(path)?;
    Ok(extracted
        .into_iter()
        .map(|page| PageRecord {
            document_id: document_id.clone(),
            document_title: title.clone(),
            source_path: source_path.clone(),
            page_number: page.number,
            text: page.text,
        })
        .collect())
}

pub fn document_id_for(path: &Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.to_string_lossy().as_bytes());
    format!("{:x}", hasher.finalize())
}
