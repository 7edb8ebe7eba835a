//! Plain-text extraction from `.docx` (WordprocessingML) documents.
//!
//! Body paragraphs come first, in document order, followed by table rows.
//! Table rows join their non-empty cell texts with `" | "`. Empty
//! paragraphs and rows are skipped; the result is newline-joined.

use std::io::Read;
use std::path::Path;

use quick_xml::events::Event;

use crate::error::{ExtractError, RagError};

/// Maximum decompressed bytes to read from `word/document.xml` (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

const DOCUMENT_XML: &str = "word/document.xml";

/// Read and extract a `.docx` file from disk.
pub fn extract_file(path: &Path) -> Result<String, RagError> {
    let wrap = |source: ExtractError| RagError::Extraction {
        path: path.to_path_buf(),
        source,
    };
    let bytes = std::fs::read(path).map_err(|e| wrap(e.into()))?;
    extract_docx(&bytes).map_err(wrap)
}

/// Extract plain text from the bytes of a `.docx` archive.
pub fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Archive(e.to_string()))?;
    let entry = archive
        .by_name(DOCUMENT_XML)
        .map_err(|e| ExtractError::Archive(format!("{}: {}", DOCUMENT_XML, e)))?;

    let mut xml = Vec::new();
    entry.take(MAX_XML_ENTRY_BYTES).read_to_end(&mut xml)?;
    if xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Archive(format!(
            "{} exceeds size limit ({} bytes)",
            DOCUMENT_XML, MAX_XML_ENTRY_BYTES
        )));
    }

    let body = parse_body(&xml)?;
    let parts: Vec<String> = body.paragraphs.into_iter().chain(body.rows).collect();
    Ok(parts.join("\n").trim().to_string())
}

#[derive(Default)]
struct Body {
    paragraphs: Vec<String>,
    rows: Vec<String>,
}

fn parse_body(xml: &[u8]) -> Result<Body, ExtractError> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(false);

    let mut body = Body::default();
    let mut buf = Vec::new();

    let mut table_depth = 0usize;
    let mut in_text = false;
    let mut paragraph = String::new();
    let mut cell_paragraphs: Vec<String> = Vec::new();
    let mut row_cells: Vec<String> = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"t" => in_text = true,
                b"tbl" => table_depth += 1,
                b"p" => paragraph.clear(),
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => paragraph.push('\t'),
                b"br" | b"cr" => paragraph.push('\n'),
                _ => {}
            },
            Ok(Event::Text(te)) if in_text => {
                let text = te.unescape().map_err(|e| ExtractError::Xml(e.to_string()))?;
                paragraph.push_str(&text);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    let text = paragraph.trim().to_string();
                    paragraph.clear();
                    if table_depth > 0 {
                        cell_paragraphs.push(text);
                    } else if !text.is_empty() {
                        body.paragraphs.push(text);
                    }
                }
                // Nested tables fold into the enclosing cell.
                b"tc" if table_depth == 1 => {
                    let cell = cell_paragraphs.join("\n").trim().to_string();
                    cell_paragraphs.clear();
                    if !cell.is_empty() {
                        row_cells.push(cell);
                    }
                }
                b"tr" if table_depth == 1 => {
                    if !row_cells.is_empty() {
                        body.rows.push(row_cells.join(" | "));
                    }
                    row_cells.clear();
                }
                b"tbl" => table_depth = table_depth.saturating_sub(1),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Xml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    Ok(body)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;

    const W_NS: &str = "http://schemas.openxmlformats.org/wordprocessingml/2006/main";

    /// Build a minimal `.docx` archive around the given `<w:body>` content.
    pub(crate) fn docx_with_body(body_xml: &str) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            zip.start_file(DOCUMENT_XML, zip::write::SimpleFileOptions::default())
                .unwrap();
            let xml = format!(
                "<?xml version=\"1.0\"?><w:document xmlns:w=\"{}\"><w:body>{}</w:body></w:document>",
                W_NS, body_xml
            );
            zip.write_all(xml.as_bytes()).unwrap();
            zip.finish().unwrap();
        }
        buf
    }

    fn para(text: &str) -> String {
        format!("<w:p><w:r><w:t xml:space=\"preserve\">{}</w:t></w:r></w:p>", text)
    }

    fn cell(text: &str) -> String {
        format!("<w:tc>{}</w:tc>", para(text))
    }

    #[test]
    fn paragraphs_are_newline_joined() {
        let body = format!("{}{}{}", para("First"), para("   "), para("Second"));
        let text = extract_docx(&docx_with_body(&body)).unwrap();
        assert_eq!(text, "First\nSecond");
    }

    #[test]
    fn runs_within_paragraph_concatenate() {
        let body = "<w:p><w:r><w:t xml:space=\"preserve\">Hello </w:t></w:r><w:r><w:t>world</w:t></w:r></w:p>";
        let text = extract_docx(&docx_with_body(body)).unwrap();
        assert_eq!(text, "Hello world");
    }

    #[test]
    fn table_rows_follow_paragraphs() {
        let table = format!(
            "<w:tbl><w:tr>{}{}{}</w:tr><w:tr>{}{}</w:tr><w:tr>{}</w:tr></w:tbl>",
            cell("Plan"),
            cell(""),
            cell("Price"),
            cell("Basic"),
            cell("10"),
            cell(" ")
        );
        let body = format!("{}{}{}", table, para("Intro"), para("Outro"));
        let text = extract_docx(&docx_with_body(&body)).unwrap();
        assert_eq!(text, "Intro\nOutro\nPlan | Price\nBasic | 10");
    }

    #[test]
    fn escaped_entities_are_decoded() {
        let text = extract_docx(&docx_with_body(&para("Fish &amp; Chips"))).unwrap();
        assert_eq!(text, "Fish & Chips");
    }

    #[test]
    fn invalid_zip_is_archive_error() {
        let err = extract_docx(b"not a zip").unwrap_err();
        assert!(matches!(err, ExtractError::Archive(_)));
    }

    #[test]
    fn missing_document_xml_is_archive_error() {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            zip.start_file("other.xml", zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(b"<x/>").unwrap();
            zip.finish().unwrap();
        }
        let err = extract_docx(&buf).unwrap_err();
        assert!(matches!(err, ExtractError::Archive(_)));
    }

    #[test]
    fn extract_file_reports_path() {
        let err = extract_file(Path::new("/nonexistent/report.docx")).unwrap_err();
        match err {
            RagError::Extraction { path, .. } => assert!(path.ends_with("report.docx")),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
