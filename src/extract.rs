//! Text extraction for uploaded files (PDF, DOCX, plain text, images).
//!
//! The file kind is decided by extension first, then by the declared
//! content type. PDF and DOCX parsing run on the blocking pool; images are
//! handed to the configured [`OcrEngine`].

use std::io::Read;
use std::path::Path;
use thiserror::Error;

use crate::ocr::OcrEngine;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_TEXT: &str = "text/plain";

/// Image extensions routed to OCR.
pub const IMAGE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "gif", "bmp"];

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("failed to read file: {0}")]
    Io(#[from] std::io::Error),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("DOCX extraction failed: {0}")]
    Ooxml(String),
    #[error("text file is not valid UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("OCR failed: {0}")]
    Ocr(String),
    #[error("extraction task failed: {0}")]
    Task(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Docx,
    Text,
    Image,
    Unsupported,
}

impl DocumentKind {
    /// Picks the extractor for a file; the extension wins over the declared
    /// content type.
    pub fn detect(path: &Path, content_type: Option<&str>) -> Self {
        let ext = extension(path);
        match ext.as_str() {
            "pdf" => return DocumentKind::Pdf,
            "docx" => return DocumentKind::Docx,
            "txt" => return DocumentKind::Text,
            e if IMAGE_EXTENSIONS.contains(&e) => return DocumentKind::Image,
            _ => {}
        }

        match content_type.map(|ct| ct.trim().to_lowercase()) {
            Some(ct) if ct == MIME_PDF => DocumentKind::Pdf,
            Some(ct) if ct == MIME_DOCX => DocumentKind::Docx,
            Some(ct) if ct.starts_with(MIME_TEXT) => DocumentKind::Text,
            Some(ct) if ct.starts_with("image/") => DocumentKind::Image,
            _ => DocumentKind::Unsupported,
        }
    }
}

/// Lowercased extension without the dot, or empty.
pub fn extension(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

/// Result of a successful extraction.
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    Text(String),
    /// A PDF whose pages carry no text layer.
    ScannedPdf,
}

pub async fn extract(
    path: &Path,
    kind: DocumentKind,
    ocr: &dyn OcrEngine,
) -> Result<Extraction, ExtractError> {
    match kind {
        DocumentKind::Pdf => {
            let bytes = tokio::fs::read(path).await?;
            let text = blocking(move || extract_pdf(&bytes)).await?;
            if text.trim().is_empty() {
                Ok(Extraction::ScannedPdf)
            } else {
                Ok(Extraction::Text(text))
            }
        }
        DocumentKind::Docx => {
            let bytes = tokio::fs::read(path).await?;
            Ok(Extraction::Text(blocking(move || extract_docx(&bytes)).await?))
        }
        DocumentKind::Text => {
            let bytes = tokio::fs::read(path).await?;
            Ok(Extraction::Text(String::from_utf8(bytes)?))
        }
        DocumentKind::Image => ocr
            .extract_text(path)
            .await
            .map(Extraction::Text)
            .map_err(|e| ExtractError::Ocr(e.to_string())),
        DocumentKind::Unsupported => Ok(Extraction::Text(String::new())),
    }
}

async fn blocking<F>(f: F) -> Result<String, ExtractError>
where
    F: FnOnce() -> Result<String, ExtractError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ExtractError::Task(e.to_string()))?
}

/// Concatenates the text of every page.
pub fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    let pages = pdf_extract::extract_text_from_mem_by_pages(bytes)
        .map_err(|e| ExtractError::Pdf(e.to_string()))?;
    Ok(pages.concat())
}

/// Paragraph texts of `word/document.xml`, in document order, one per line.
pub fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|_| ExtractError::Ooxml("word/document.xml not found".to_string()))?;

    let mut doc_xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut doc_xml)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Ooxml(
            "word/document.xml exceeds size limit".to_string(),
        ));
    }

    extract_paragraphs(&doc_xml).map(|paragraphs| paragraphs.join("\n"))
}

fn extract_paragraphs(xml: &[u8]) -> Result<Vec<String>, ExtractError> {
    use quick_xml::events::Event;

    let mut paragraphs = Vec::new();
    // One buffer per open <w:p>; text boxes nest paragraphs inside paragraphs.
    let mut open: Vec<String> = Vec::new();
    let mut in_text = false;

    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(false);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"p" => open.push(String::new()),
                b"t" => in_text = true,
                b"tab" => push_to_open(&mut open, "\t"),
                b"br" | b"cr" => push_to_open(&mut open, "\n"),
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"p" => paragraphs.push(String::new()),
                b"tab" => push_to_open(&mut open, "\t"),
                b"br" | b"cr" => push_to_open(&mut open, "\n"),
                _ => {}
            },
            Ok(Event::Text(te)) if in_text => {
                let text = te
                    .unescape()
                    .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
                push_to_open(&mut open, &text);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    if let Some(paragraph) = open.pop() {
                        paragraphs.push(paragraph);
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(paragraphs)
}

fn push_to_open(open: &mut [String], text: &str) {
    if let Some(current) = open.last_mut() {
        current.push_str(text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn docx_with_body(body: &str) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            zip.start_file("word/document.xml", zip::write::SimpleFileOptions::default())
                .unwrap();
            let xml = format!(
                "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body>{}</w:body></w:document>",
                body
            );
            zip.write_all(xml.as_bytes()).unwrap();
            zip.finish().unwrap();
        }
        buf
    }

    #[test]
    fn detect_prefers_extension() {
        assert_eq!(
            DocumentKind::detect(Path::new("a.PDF"), Some("text/plain")),
            DocumentKind::Pdf
        );
        assert_eq!(DocumentKind::detect(Path::new("scan.jpeg"), None), DocumentKind::Image);
        assert_eq!(DocumentKind::detect(Path::new("notes.txt"), None), DocumentKind::Text);
    }

    #[test]
    fn detect_falls_back_to_content_type() {
        assert_eq!(
            DocumentKind::detect(Path::new("upload"), Some("image/webp")),
            DocumentKind::Image
        );
        assert_eq!(
            DocumentKind::detect(Path::new("upload"), Some(MIME_DOCX)),
            DocumentKind::Docx
        );
        assert_eq!(
            DocumentKind::detect(Path::new("archive.tar"), Some("application/x-tar")),
            DocumentKind::Unsupported
        );
    }

    #[test]
    fn docx_paragraphs_are_joined_by_newlines() {
        let bytes = docx_with_body(
            "<w:p><w:r><w:t xml:space=\"preserve\">Hello </w:t></w:r><w:r><w:t>world</w:t></w:r></w:p>\
             <w:p/>\
             <w:p><w:r><w:t>Second &amp; last</w:t></w:r></w:p>",
        );
        assert_eq!(extract_docx(&bytes).unwrap(), "Hello world\n\nSecond & last");
    }

    #[test]
    fn text_box_paragraph_does_not_clear_enclosing_paragraph() {
        let bytes = docx_with_body(
            "<w:p><w:r><w:t xml:space=\"preserve\">Before </w:t></w:r>\
             <w:r><w:txbxContent><w:p><w:r><w:t>Boxed</w:t></w:r></w:p></w:txbxContent></w:r>\
             <w:r><w:t>after</w:t></w:r></w:p>",
        );
        assert_eq!(extract_docx(&bytes).unwrap(), "Boxed\nBefore after");
    }

    #[test]
    fn invalid_zip_returns_error_for_docx() {
        let err = extract_docx(b"not a zip").unwrap_err();
        assert!(matches!(err, ExtractError::Ooxml(_)));
    }

    #[test]
    fn invalid_pdf_returns_error() {
        let err = extract_pdf(b"not a pdf").unwrap_err();
        assert!(matches!(err, ExtractError::Pdf(_)));
    }
}
