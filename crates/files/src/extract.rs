//! Bytes-to-text extraction.
//!
//! Extraction never fails: anything that cannot be read becomes a bracketed
//! placeholder such as `[skip error: report.pdf]`, which is treated as
//! ordinary (low-value) content downstream.

use std::io::Read;
use std::sync::Arc;

use quick_xml::events::Event;
use tracing::warn;

/// Format inferred from a file name's extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatHint {
    Text,
    Pdf,
    Docx,
    /// Office formats we do not parse
    Binary,
    Unknown,
}

impl FormatHint {
    pub fn from_name(name: &str) -> Self {
        let ext = name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "txt" | "md" | "markdown" | "rst" | "log" | "json" | "csv" | "tsv" | "yaml"
            | "yml" => Self::Text,
            "pdf" => Self::Pdf,
            "docx" => Self::Docx,
            "xlsx" | "pptx" => Self::Binary,
            _ => Self::Unknown,
        }
    }
}

/// Converts raw document bytes into text.
///
/// Implementations are synchronous; callers run them on the blocking pool
/// through [`extract_blocking`].
pub trait Extractor: Send + Sync {
    fn extract(&self, name: &str, bytes: &[u8], hint: FormatHint) -> String;
}

pub(crate) fn placeholder(kind: &str, name: &str) -> String {
    format!("[skip {kind}: {name}]")
}

/// Plain text, PDF and DOCX extraction.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultExtractor;

impl Extractor for DefaultExtractor {
    fn extract(&self, name: &str, bytes: &[u8], hint: FormatHint) -> String {
        let result = match hint {
            FormatHint::Text => Ok(String::from_utf8_lossy(bytes).into_owned()),
            FormatHint::Pdf => extract_pdf(bytes).map(|text| {
                if text.trim().is_empty() {
                    placeholder("pdf", name)
                } else {
                    text
                }
            }),
            FormatHint::Docx => extract_docx(bytes),
            FormatHint::Binary => Ok(placeholder("binary", name)),
            FormatHint::Unknown => Ok(match std::str::from_utf8(bytes) {
                Ok(text) => text.to_string(),
                Err(_) => placeholder("unsupported", name),
            }),
        };

        result.unwrap_or_else(|reason| {
            warn!(file = name, %reason, "Document extraction failed");
            placeholder("error", name)
        })
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<String, String> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| e.to_string())
}

/// Paragraph text from `word/document.xml`, one paragraph per line.
fn extract_docx(bytes: &[u8]) -> Result<String, String> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| format!("not a zip archive: {e}"))?;

    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .map_err(|_| "missing word/document.xml".to_string())?
        .read_to_string(&mut xml)
        .map_err(|e| format!("failed to read document.xml: {e}"))?;

    let mut reader = quick_xml::Reader::from_str(&xml);
    let mut paragraphs = Vec::new();
    let mut current = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"p" => current.clear(),
                b"t" => in_text = true,
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => current.push('\t'),
                b"br" => current.push('\n'),
                _ => {}
            },
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"p" => {
                    if !current.trim().is_empty() {
                        paragraphs.push(std::mem::take(&mut current));
                    }
                }
                b"t" => in_text = false,
                _ => {}
            },
            Ok(Event::Text(t)) if in_text => {
                let text = t.unescape().map_err(|e| format!("bad XML text: {e}"))?;
                current.push_str(&text);
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(format!("XML parse error: {e}")),
        }
    }

    Ok(paragraphs.join("\n"))
}

/// Run an extractor on the blocking pool.
///
/// Parser panics (some PDF inputs trigger them) surface as the error
/// placeholder instead of tearing down the turn.
pub async fn extract_blocking(extractor: Arc<dyn Extractor>, name: String, bytes: Vec<u8>) -> String {
    let hint = FormatHint::from_name(&name);
    let task_name = name.clone();
    match tokio::task::spawn_blocking(move || extractor.extract(&task_name, &bytes, hint)).await {
        Ok(text) => text,
        Err(e) => {
            warn!(file = %name, error = %e, "Extraction task failed");
            placeholder("error", &name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn docx_bytes(document_xml: &str) -> Vec<u8> {
        let mut buf = std::io::Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut buf);
            let options = zip::write::SimpleFileOptions::default()
                .compression_method(zip::CompressionMethod::Stored);
            zip.start_file("word/document.xml", options).unwrap();
            zip.write_all(document_xml.as_bytes()).unwrap();
            zip.finish().unwrap();
        }
        buf.into_inner()
    }

    #[test]
    fn format_hint_from_extension() {
        assert_eq!(FormatHint::from_name("notes.TXT"), FormatHint::Text);
        assert_eq!(FormatHint::from_name("data.yml"), FormatHint::Text);
        assert_eq!(FormatHint::from_name("report.pdf"), FormatHint::Pdf);
        assert_eq!(FormatHint::from_name("model card.docx"), FormatHint::Docx);
        assert_eq!(FormatHint::from_name("sheet.xlsx"), FormatHint::Binary);
        assert_eq!(FormatHint::from_name("Makefile"), FormatHint::Unknown);
    }

    #[test]
    fn text_is_decoded_lossily() {
        let text = DefaultExtractor.extract("a.txt", b"caf\xff ok", FormatHint::Text);
        assert!(text.starts_with("caf"));
        assert!(text.ends_with(" ok"));
    }

    #[test]
    fn unknown_binary_is_unsupported() {
        let text = DefaultExtractor.extract("blob.bin", &[0xff, 0xfe, 0x00], FormatHint::Unknown);
        assert_eq!(text, "[skip unsupported: blob.bin]");

        let text = DefaultExtractor.extract("script.py", b"print(1)", FormatHint::Unknown);
        assert_eq!(text, "print(1)");
    }

    #[test]
    fn office_binaries_are_skipped() {
        let text = DefaultExtractor.extract("deck.pptx", b"PK..", FormatHint::Binary);
        assert_eq!(text, "[skip binary: deck.pptx]");
    }

    #[tokio::test]
    async fn corrupt_pdf_becomes_error_placeholder() {
        let text = extract_blocking(
            Arc::new(DefaultExtractor),
            "report.pdf".into(),
            b"not a pdf".to_vec(),
        )
        .await;
        assert_eq!(text, "[skip error: report.pdf]");
    }

    #[test]
    fn docx_paragraphs_are_extracted() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
  <w:body>
    <w:p><w:r><w:t>Metrics:</w:t></w:r><w:r><w:tab/><w:t xml:space="preserve"> ROC AUC &amp; KS</w:t></w:r></w:p>
    <w:p></w:p>
    <w:p><w:r><w:t>Limitations documented.</w:t></w:r></w:p>
  </w:body>
</w:document>"#;
        let text = DefaultExtractor.extract("card.docx", &docx_bytes(xml), FormatHint::Docx);
        assert_eq!(text, "Metrics:\t ROC AUC & KS\nLimitations documented.");
    }

    #[test]
    fn docx_without_document_xml_is_error() {
        let mut buf = std::io::Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut buf);
            zip.start_file("other.xml", zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(b"<x/>").unwrap();
            zip.finish().unwrap();
        }
        let text = DefaultExtractor.extract("bad.docx", &buf.into_inner(), FormatHint::Docx);
        assert_eq!(text, "[skip error: bad.docx]");
    }

    struct PanickingExtractor;

    impl Extractor for PanickingExtractor {
        fn extract(&self, _: &str, _: &[u8], _: FormatHint) -> String {
            panic!("parser blew up")
        }
    }

    #[tokio::test]
    async fn panics_become_error_placeholder() {
        let text = extract_blocking(Arc::new(PanickingExtractor), "x.pdf".into(), vec![1]).await;
        assert_eq!(text, "[skip error: x.pdf]");
    }
}
