//! Text extraction for downloaded Drive files: Word documents become text,
//! PDFs and binaries that yield no text are skipped.

use std::io::Write;

use drive_rag::connector_drive::decode_content;
use drive_rag::extract::{extract_text, ExtractError, MIME_DOCX, MIME_PDF};
use drive_rag::models::DriveFile;

/// Minimal docx (ZIP) whose `word/document.xml` holds one paragraph per entry.
fn minimal_docx(paragraphs: &[&str]) -> Vec<u8> {
    let body: String = paragraphs
        .iter()
        .map(|p| format!("<w:p><w:r><w:t>{}</w:t></w:r></w:p>", p))
        .collect();
    let xml = format!(
        "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body>{}</w:body></w:document>",
        body
    );
    zip_with_entry("word/document.xml", &xml)
}

fn zip_with_entry(name: &str, content: &str) -> Vec<u8> {
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        zip.start_file(name, zip::write::SimpleFileOptions::default())
            .unwrap();
        zip.write_all(content.as_bytes()).unwrap();
        zip.finish().unwrap();
    }
    buf
}

#[test]
fn file_support_docx_paragraphs() {
    let bytes = minimal_docx(&["Profile of npub1abc", "Posts about zaps &amp; relays"]);
    let text = extract_text(&bytes, MIME_DOCX).unwrap();
    assert_eq!(text, "Profile of npub1abc\nPosts about zaps & relays");
}

#[test]
fn file_support_docx_downloaded_from_drive() {
    let file = DriveFile::new("f1", "profile.docx", MIME_DOCX);
    let text = decode_content(&file, &minimal_docx(&["office test phrase"]));
    assert_eq!(text.as_deref(), Some("office test phrase"));
}

#[test]
fn file_support_docx_without_document_xml_skipped() {
    let bytes = zip_with_entry("word/styles.xml", "<w:styles/>");
    let err = extract_text(&bytes, MIME_DOCX).unwrap_err();
    assert!(matches!(err, ExtractError::Docx(_)));

    let file = DriveFile::new("f1", "broken.docx", MIME_DOCX);
    assert_eq!(decode_content(&file, &bytes), None);
}

#[test]
fn file_support_empty_docx_has_no_content() {
    let file = DriveFile::new("f1", "empty.docx", MIME_DOCX);
    assert_eq!(decode_content(&file, &minimal_docx(&[])), None);
}

#[test]
fn file_support_broken_pdf_skipped() {
    let bytes = b"%PDF-1.4\n1 0 obj<</Length 20>>stream\n\xff\xd8\x11BT /F1 12 Tf (Hello) Tj ET";
    let file = DriveFile::new("f1", "scan.pdf", MIME_PDF);
    assert_eq!(decode_content(&file, bytes), None);
}

#[test]
fn file_support_binary_skipped() {
    let file = DriveFile::new("f1", "photo.jpg", "image/jpeg");
    assert_eq!(decode_content(&file, b"\xff\xd8\xff\xe0\x00\x10JFIF"), None);
}

#[test]
fn file_support_plain_text_kept() {
    let file = DriveFile::new("f1", "notes.md", "text/markdown");
    assert_eq!(
        decode_content(&file, b"# Notes\n\nzaps").as_deref(),
        Some("# Notes\n\nzaps")
    );
}
