use crate::error::IngestError;
use crate::models::{ChunkingOptions, DocumentChunk, PageRecord};
use sha2::{Digest, Sha256};

/// Separator inserted between consecutive pages when a document's text is
/// joined for splitting. It matches the default highest-priority boundary
/// marker, so page breaks are preferred split points.
pub const PAGE_SEPARATOR: &str = "\n\n";

/// Char range of one page inside the joined document text. The trailing
/// page separator is attributed to the page before it, so spans tile the
/// joined text with no gaps.
struct PageSpan {
    start: usize,
    end: usize,
    page_number: u32,
}

pub fn validate_options(options: &ChunkingOptions) -> Result<(), IngestError> {
    if options.max_chars == 0 {
        return Err(IngestError::InvalidChunkConfig(
            "max_chars must be positive".to_string(),
        ));
    }
    if options.overlap_chars >= options.max_chars {
        return Err(IngestError::InvalidChunkConfig(format!(
            "overlap_chars {} must be smaller than max_chars {}",
            options.overlap_chars, options.max_chars
        )));
    }
    Ok(())
}

/// Splits the pages of one document into overlapping chunks.
///
/// The page texts are joined with [`PAGE_SEPARATOR`], then a cursor walks
/// the joined text: each chunk ends at the latest boundary marker inside
/// the size window, or at a hard cut when no marker lands there. The cursor
/// then backs up by `overlap_chars`, clamped so it always moves forward.
/// Every input char lands in at least one chunk and chunks come out in
/// source order.
pub fn chunk_document(
    pages: &[PageRecord],
    options: &ChunkingOptions,
    start_index: u64,
) -> Result<Vec<DocumentChunk>, IngestError> {
    validate_options(options)?;

    let Some(first) = pages.first() else {
        return Ok(Vec::new());
    };

    let (joined, spans) = join_pages(pages);
    let chars: Vec<char> = joined.chars().collect();
    let markers: Vec<Vec<char>> = options
        .boundary_markers
        .iter()
        .filter(|marker| !marker.is_empty())
        .map(|marker| marker.chars().collect())
        .collect();

    let mut chunks = Vec::new();
    let mut cursor = 0usize;
    let mut index = start_index;

    while cursor < chars.len() {
        let split = next_split(&chars, cursor, options.max_chars, &markers);
        let text: String = chars[cursor..split].iter().collect();
        let (page_start, page_end) = page_range(&spans, cursor, split);

        chunks.push(DocumentChunk {
            chunk_id: make_chunk_id(&first.document_id, index, &text),
            document_id: first.document_id.clone(),
            document_title: first.document_title.clone(),
            source_path: first.source_path.clone(),
            page_start,
            page_end,
            chunk_index: index,
            text,
        });
        index = index.saturating_add(1);

        if split >= chars.len() {
            break;
        }
        cursor = split.saturating_sub(options.overlap_chars).max(cursor + 1);
    }

    Ok(chunks)
}

fn join_pages(pages: &[PageRecord]) -> (String, Vec<PageSpan>) {
    let mut joined = String::new();
    let mut starts = Vec::with_capacity(pages.len());
    let mut offset = 0usize;

    for (position, page) in pages.iter().enumerate() {
        if position > 0 {
            joined.push_str(PAGE_SEPARATOR);
            offset += PAGE_SEPARATOR.chars().count();
        }
        starts.push(offset);
        joined.push_str(&page.text);
        offset += page.text.chars().count();
    }

    let total = offset;
    let spans = pages
        .iter()
        .enumerate()
        .map(|(position, page)| PageSpan {
            start: starts[position],
            end: starts.get(position + 1).copied().unwrap_or(total),
            page_number: page.page_number,
        })
        .collect();

    (joined, spans)
}

/// End position of the next chunk starting at `cursor`. Everything that
/// fits goes into one final chunk; otherwise markers are tried in priority
/// order and the window boundary is the hard-cut fallback.
fn next_split(chars: &[char], cursor: usize, max_chars: usize, markers: &[Vec<char>]) -> usize {
    let remaining = chars.len() - cursor;
    if remaining <= max_chars {
        return chars.len();
    }

    let window_end = cursor + max_chars;
    for marker in markers {
        if let Some(split) = last_marker_end(chars, cursor, window_end, marker) {
            return split;
        }
    }
    window_end
}

/// Latest position in `(cursor, window_end]` where `marker` ends, so the
/// chunk keeps the marker text. `None` when the marker does not occur
/// inside the window.
fn last_marker_end(
    chars: &[char],
    cursor: usize,
    window_end: usize,
    marker: &[char],
) -> Option<usize> {
    let mut end = window_end;
    while end >= cursor + marker.len() && end >= marker.len() {
        let start = end - marker.len();
        if chars[start..end] == *marker {
            return Some(end);
        }
        end -= 1;
    }
    None
}

fn page_range(spans: &[PageSpan], start: usize, end: usize) -> (u32, u32) {
    let mut first = None;
    let mut last = None;
    for span in spans {
        if span.start < end && span.end > start {
            first.get_or_insert(span.page_number);
            last = Some(span.page_number);
        }
    }
    (first.unwrap_or(0), last.unwrap_or(0))
}

fn make_chunk_id(document_id: &str, index: u64, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(document_id.as_bytes());
    hasher.update(index.to_le_bytes());
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
