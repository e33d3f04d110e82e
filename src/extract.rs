//! Text extraction for binary paper formats (PDF, DOCX).
//!
//! The corpus loader hands over raw bytes and a content type; this module
//! returns plain UTF-8 text. PDFs are returned page by page so every page can
//! be cited on its own.

use std::io::Read;
use std::path::Path;
use thiserror::Error;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_MARKDOWN: &str = "text/markdown";
pub const MIME_TEXT: &str = "text/plain";

/// Upper bound on the decompressed `word/document.xml` (zip-bomb guard).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported content-type: {0}")]
    UnsupportedContentType(String),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("DOCX extraction failed: {0}")]
    Docx(String),
}

/// Guess a content type from the file extension.
pub fn content_type_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "pdf" => MIME_PDF,
        "docx" => MIME_DOCX,
        "md" | "markdown" => MIME_MARKDOWN,
        _ => MIME_TEXT,
    }
}

/// Whether the content type needs [`extract_pages`] rather than a UTF-8 read.
pub fn is_binary(content_type: &str) -> bool {
    matches!(content_type, MIME_PDF | MIME_DOCX)
}

/// Extract text as a list of pages. Formats without pages yield one entry.
pub fn extract_pages(bytes: &[u8], content_type: &str) -> Result<Vec<String>, ExtractError> {
    match content_type {
        MIME_PDF => catch_pdf_panic(|| {
            pdf_extract::extract_text_from_mem_by_pages(bytes)
                .map_err(|e| ExtractError::Pdf(e.to_string()))
        }),
        MIME_DOCX => extract_docx(bytes).map(|text| vec![text]),
        other => Err(ExtractError::UnsupportedContentType(other.to_string())),
    }
}

/// `pdf-extract` panics on some malformed files; report that as a failed
/// extraction so the caller can skip the file.
fn catch_pdf_panic<T>(
    extract: impl FnOnce() -> Result<T, ExtractError>,
) -> Result<T, ExtractError> {
    std::panic::catch_unwind(std::panic::AssertUnwindSafe(extract)).unwrap_or_else(|payload| {
        let reason = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        Err(ExtractError::Pdf(format!("parser panicked: {}", reason)))
    })
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|_| ExtractError::Docx("word/document.xml not found".to_string()))?;

    let mut xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut xml)
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    if xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Docx(
            "word/document.xml exceeds size limit".to_string(),
        ));
    }
    paragraphs_from_document_xml(&xml)
}

/// Collect `<w:t>` runs, separating `<w:p>` paragraphs with blank lines so the
/// chunker can split on them.
fn paragraphs_from_document_xml(xml: &[u8]) -> Result<String, ExtractError> {
    use quick_xml::events::Event;

    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut paragraphs: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    let para = current.trim();
                    if !para.is_empty() {
                        paragraphs.push(para.to_string());
                    }
                    current.clear();
                }
                _ => {}
            },
            Ok(Event::Text(te)) if in_text => {
                let text = te
                    .unescape()
                    .map_err(|e| ExtractError::Docx(e.to_string()))?;
                current.push_str(&text);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Docx(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    let tail = current.trim();
    if !tail.is_empty() {
        paragraphs.push(tail.to_string());
    }
    Ok(paragraphs.join("\n\n"))
}
