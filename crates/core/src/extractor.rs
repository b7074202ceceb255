use crate::error::ExtractionError;
use crate::models::{Document, DocumentFormat};
use crate::traits::DocumentExtractor;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::fs::{self, File};
use std::io::Read;
use std::path::Path;
use zip::ZipArchive;

pub const SUPPORTED_EXTENSIONS: [&str; 3] = ["txt", "pdf", "docx"];

#[derive(Debug, Default, Clone, Copy)]
pub struct FileExtractor;

impl FileExtractor {
    pub fn load_document(&self, path: &Path) -> Result<Document, ExtractionError> {
        let format = detect_format(path)?;
        let raw_text = self.extract(path)?;
        Ok(Document {
            source_path: path.to_path_buf(),
            raw_text,
            format,
        })
    }
}

impl DocumentExtractor for FileExtractor {
    fn supports(&self, path: &Path) -> bool {
        DocumentFormat::from_path(path).is_some()
    }

    fn extract(&self, path: &Path) -> Result<String, ExtractionError> {
        if !path.exists() {
            return Err(ExtractionError::NotFound(path.to_path_buf()));
        }

        match detect_format(path)? {
            DocumentFormat::Text => Ok(fs::read_to_string(path)?),
            DocumentFormat::Pdf => extract_pdf_text(path),
            DocumentFormat::Docx => extract_docx_text(path),
        }
    }
}

fn detect_format(path: &Path) -> Result<DocumentFormat, ExtractionError> {
    DocumentFormat::from_path(path).ok_or_else(|| {
        let ext = path
            .extension()
            .map(|ext| ext.to_string_lossy().to_string())
            .unwrap_or_default();
        ExtractionError::UnsupportedFormat(format!("{ext:?} ({})", path.display()))
    })
}

fn extract_pdf_text(path: &Path) -> Result<String, ExtractionError> {
    let document =
        lopdf::Document::load(path).map_err(|error| ExtractionError::PdfParse(error.to_string()))?;

    let mut pages = Vec::new();
    for (page_no, _page_id) in document.get_pages() {
        let text = document
            .extract_text(&[page_no])
            .map_err(|error| ExtractionError::PdfParse(error.to_string()))?;
        pages.push(text);
    }

    let text = pages.concat();
    if text.trim().is_empty() {
        return Err(ExtractionError::PdfParse(format!(
            "pdf had no readable page text: {}",
            path.display()
        )));
    }

    Ok(text)
}

fn extract_docx_text(path: &Path) -> Result<String, ExtractionError> {
    let file = File::open(path)?;
    let mut archive =
        ZipArchive::new(file).map_err(|error| ExtractionError::DocxParse(error.to_string()))?;

    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .map_err(|error| ExtractionError::DocxParse(error.to_string()))?
        .read_to_string(&mut xml)?;

    docx_paragraphs(&xml).map(|paragraphs| paragraphs.join("\n"))
}

fn docx_paragraphs(xml: &str) -> Result<Vec<String>, ExtractionError> {
    let mut reader = Reader::from_str(xml);
    let mut paragraphs = Vec::new();
    let mut current = String::new();
    let mut in_text_run = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"w:p" => current.clear(),
                b"w:t" => in_text_run = true,
                _ => {}
            },
            Ok(Event::End(ref e)) => match e.name().as_ref() {
                b"w:p" => paragraphs.push(std::mem::take(&mut current)),
                b"w:t" => in_text_run = false,
                _ => {}
            },
            Ok(Event::Empty(ref e)) => match e.name().as_ref() {
                b"w:tab" => current.push('\t'),
                b"w:br" => current.push('\n'),
                _ => {}
            },
            Ok(Event::Text(e)) if in_text_run => {
                let text = e
                    .unescape()
                    .map_err(|error| ExtractionError::DocxParse(error.to_string()))?;
                current.push_str(&text);
            }
            Ok(Event::Eof) => break,
            Err(error) => return Err(ExtractionError::DocxParse(error.to_string())),
            _ => {}
        }
    }

    Ok(paragraphs)
}
