//! Plain-text extraction for downloaded Drive files.
//!
//! Native Google Docs are exported as text by Drive itself. Everything else
//! arrives as raw bytes and is turned into text here, keyed on the file's
//! MIME type:
//!
//! | MIME type | Extraction |
//! |-----------|------------|
//! | `application/pdf` | `pdf-extract` |
//! | Word `.docx` | `word/document.xml` text runs, one line per paragraph |
//! | `text/*`, JSON, XML, YAML | lossy UTF-8 |
//! | anything else | strict UTF-8, otherwise unsupported |

use std::io::Read;
use thiserror::Error;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

const TEXT_LIKE: [&str; 4] = [
    "application/json",
    "application/xml",
    "application/x-yaml",
    "application/javascript",
];

/// Decompressed size cap for `word/document.xml`.
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported content type: {0}")]
    Unsupported(String),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("DOCX extraction failed: {0}")]
    Docx(String),
}

/// Extract plain text from `bytes` according to `mime_type`.
pub fn extract_text(bytes: &[u8], mime_type: &str) -> Result<String, ExtractError> {
    match mime_type {
        MIME_PDF => extract_pdf(bytes),
        MIME_DOCX => extract_docx(bytes),
        m if is_text_mime(m) => Ok(String::from_utf8_lossy(bytes).into_owned()),
        m => String::from_utf8(bytes.to_vec()).map_err(|_| ExtractError::Unsupported(m.to_string())),
    }
}

pub fn is_text_mime(mime_type: &str) -> bool {
    mime_type.starts_with("text/") || TEXT_LIKE.contains(&mime_type)
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    // pdf-extract panics on some malformed input
    match std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem(bytes)) {
        Ok(result) => result.map_err(|e| ExtractError::Pdf(e.to_string())),
        Err(_) => Err(ExtractError::Pdf("parser panicked".to_string())),
    }
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|e| ExtractError::Docx(format!("word/document.xml: {}", e)))?;
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
    docx_paragraphs(&xml).map(|p| p.join("\n"))
}

/// Collect the `w:t` runs of every `w:p`, one string per paragraph.
fn docx_paragraphs(xml: &[u8]) -> Result<Vec<String>, ExtractError> {
    use quick_xml::events::Event;

    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut paragraphs = Vec::new();
    let mut current: Option<String> = None;
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"p" => current = Some(String::new()),
                b"t" => in_text = true,
                _ => {}
            },
            Ok(Event::Empty(e)) => match (e.local_name().as_ref(), current.as_mut()) {
                (b"tab", Some(p)) => p.push('\t'),
                (b"br", Some(p)) => p.push('\n'),
                (b"p", _) => paragraphs.push(String::new()),
                _ => {}
            },
            Ok(Event::Text(te)) if in_text => {
                let text = te.unescape().map_err(|e| ExtractError::Docx(e.to_string()))?;
                current.get_or_insert_with(String::new).push_str(&text);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => paragraphs.extend(current.take()),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Docx(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(paragraphs)
}
