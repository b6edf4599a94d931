//! Text extraction for uploaded documents (PDF, DOCX, plain text).
//!
//! The server and CLI supply bytes plus a content type (or a filename to
//! infer it from); this module returns the raw UTF-8 text handed to the
//! session. Nothing here panics on malformed input.

use std::io::Read;
use std::path::Path;

use crate::error::{RagError, Result};

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_TEXT: &str = "text/plain";
pub const MIME_MARKDOWN: &str = "text/markdown";

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Content type for a filename's extension, if it is one we extract.
pub fn content_type_for(filename: &str) -> Option<&'static str> {
    let ext = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())?
        .to_ascii_lowercase();
    match ext.as_str() {
        "pdf" => Some(MIME_PDF),
        "docx" => Some(MIME_DOCX),
        "txt" | "text" => Some(MIME_TEXT),
        "md" | "markdown" => Some(MIME_MARKDOWN),
        _ => None,
    }
}

/// Pick the content type to extract with.
///
/// A specific declared type wins; generic ones (`application/octet-stream`,
/// missing) fall back to the filename extension.
pub fn resolve_content_type(declared: Option<&str>, filename: &str) -> Result<&'static str> {
    let declared = declared
        .map(|ct| ct.split(';').next().unwrap_or(ct).trim().to_ascii_lowercase())
        .filter(|ct| !ct.is_empty() && ct != "application/octet-stream");

    if let Some(ct) = declared {
        return match ct.as_str() {
            MIME_PDF => Ok(MIME_PDF),
            MIME_DOCX => Ok(MIME_DOCX),
            MIME_TEXT => Ok(MIME_TEXT),
            MIME_MARKDOWN | "text/x-markdown" => Ok(MIME_MARKDOWN),
            _ => content_type_for(filename).ok_or_else(|| RagError::UnsupportedFormat(ct.clone())),
        };
    }

    content_type_for(filename).ok_or_else(|| {
        RagError::UnsupportedFormat(format!(
            "{} (supported: .pdf, .docx, .txt, .md)",
            filename
        ))
    })
}

/// Extract plain text from `bytes` of the given content type.
pub fn extract_text(bytes: &[u8], content_type: &str) -> Result<String> {
    match content_type {
        MIME_PDF => extract_pdf(bytes),
        MIME_DOCX => extract_docx(bytes),
        MIME_TEXT | MIME_MARKDOWN => Ok(String::from_utf8_lossy(bytes).into_owned()),
        other => Err(RagError::UnsupportedFormat(other.to_string())),
    }
}

/// Resolve the content type and extract in one step.
pub fn extract_file(bytes: &[u8], declared: Option<&str>, filename: &str) -> Result<String> {
    let content_type = resolve_content_type(declared, filename)?;
    tracing::debug!(file = %filename, content_type, bytes = bytes.len(), "extracting text");
    extract_text(bytes, content_type)
}

fn extract_pdf(bytes: &[u8]) -> Result<String> {
    pdf_extract::extract_text_from_mem(bytes)
        .map_err(|e| RagError::Extraction(format!("PDF: {}", e)))
}

fn ooxml_err(e: impl std::fmt::Display) -> RagError {
    RagError::Extraction(format!("DOCX: {}", e))
}

fn extract_docx(bytes: &[u8]) -> Result<String> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(ooxml_err)?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|_| ooxml_err("word/document.xml not found"))?;
    let mut doc_xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut doc_xml)
        .map_err(ooxml_err)?;
    if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ooxml_err("word/document.xml exceeds size limit"));
    }
    docx_paragraphs(&doc_xml)
}

/// Text of each `w:p` on its own line. Runs inside a paragraph are
/// concatenated; `w:tab` becomes a space and `w:br` a line break.
fn docx_paragraphs(xml: &[u8]) -> Result<String> {
    use quick_xml::events::Event;

    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::Text(te)) if in_text => {
                out.push_str(te.unescape().map_err(ooxml_err)?.as_ref());
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => out.push(' '),
                b"br" | b"cr" => out.push('\n'),
                b"p" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ooxml_err(e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}
