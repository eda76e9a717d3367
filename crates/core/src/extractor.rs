use crate::error::ExtractError;
use crate::models::FileType;
use base64::{engine::general_purpose::STANDARD, Engine};
use lopdf::Document;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

const PAGE_BREAK: char = '\u{000c}';

#[derive(Debug, Clone)]
pub struct PageText {
    pub number: u32,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct OcrEndpointConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl OcrEndpointConfig {
    /// Returns `None` for a blank endpoint.
    pub fn new(endpoint: &str, api_key: Option<String>) -> Option<Self> {
        let endpoint = endpoint.trim();
        if endpoint.is_empty() {
            return None;
        }

        Some(Self {
            endpoint: endpoint.to_string(),
            api_key: api_key
                .map(|key| key.trim().to_string())
                .filter(|key| !key.is_empty()),
            timeout: Duration::from_secs(120),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
struct OcrRequest {
    pdf_base64: String,
    source_path: String,
}

#[derive(Debug, Clone, Deserialize)]
struct OcrResponse {
    pages: Option<Vec<OcrPage>>,
    text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct OcrPage {
    #[serde(default)]
    page: Option<u32>,
    #[serde(default)]
    text: Option<String>,
}

/// Reads a PDF or CSV file into plain text ready for normalization.
pub async fn extract_text(
    path: &Path,
    file_type: FileType,
    ocr: Option<&OcrEndpointConfig>,
) -> Result<String, ExtractError> {
    match file_type {
        FileType::Pdf => {
            let pages = extract_pdf_pages(path, ocr).await?;
            Ok(join_pages(&pages))
        }
        FileType::Csv => {
            let owned = path.to_path_buf();
            run_blocking(move || {
                let file = std::fs::File::open(&owned)?;
                csv_to_text(file)
            })
            .await
        }
    }
}

/// Page texts of a PDF, falling back to the OCR endpoint when the document
/// cannot be parsed locally and one is configured.
pub async fn extract_pdf_pages(
    path: &Path,
    ocr: Option<&OcrEndpointConfig>,
) -> Result<Vec<PageText>, ExtractError> {
    let owned = path.to_path_buf();
    let extracted = run_blocking(move || read_pdf_pages(&owned)).await;

    match (extracted, ocr) {
        (Ok(pages), _) => Ok(pages),
        (Err(ExtractError::PdfParse(parse_error)), Some(config)) => {
            warn!(path = %path.display(), error = %parse_error, "pdf parse failed, trying OCR endpoint");
            extract_with_ocr(path, config).await.map_err(|ocr_error| {
                ExtractError::PdfParse(format!(
                    "{parse_error}; multimodal OCR fallback failed: {ocr_error}"
                ))
            })
        }
        (Err(error), _) => Err(error),
    }
}

fn read_pdf_pages(path: &Path) -> Result<Vec<PageText>, ExtractError> {
    let document =
        Document::load(path).map_err(|error| ExtractError::PdfParse(error.to_string()))?;

    let mut pages = Vec::new();
    for (page_no, _page_id) in document.get_pages() {
        let text = document
            .extract_text(&[page_no])
            .map_err(|error| ExtractError::PdfParse(error.to_string()))?;

        if !text.trim().is_empty() {
            pages.push(PageText {
                number: page_no,
                text,
            });
        }
    }

    if pages.is_empty() {
        return Err(ExtractError::PdfParse(format!(
            "pdf had no readable page text: {}",
            path.display()
        )));
    }

    debug!(path = %path.display(), pages = pages.len(), "pdf text extracted");
    Ok(pages)
}

fn join_pages(pages: &[PageText]) -> String {
    pages
        .iter()
        .map(|page| page.text.as_str())
        .collect::<Vec<_>>()
        .join(&PAGE_BREAK.to_string())
}

async fn run_blocking<T, F>(work: F) -> Result<T, ExtractError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ExtractError> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|error| ExtractError::Io(std::io::Error::other(error.to_string())))?
}

async fn extract_with_ocr(
    path: &Path,
    config: &OcrEndpointConfig,
) -> Result<Vec<PageText>, ExtractError> {
    let pdf = tokio::fs::read(path).await?;
    let payload = OcrRequest {
        pdf_base64: STANDARD.encode(pdf),
        source_path: path.to_string_lossy().to_string(),
    };

    let client = Client::builder()
        .timeout(config.timeout)
        .build()
        .map_err(|error| ExtractError::OcrFailed(error.to_string()))?;

    let mut request = client.post(&config.endpoint).json(&payload);
    if let Some(api_key) = &config.api_key {
        request = request.bearer_auth(api_key);
    }

    let response = request
        .send()
        .await
        .map_err(|error| ExtractError::OcrFailed(error.to_string()))?;

    if !response.status().is_success() {
        return Err(ExtractError::OcrFailed(format!(
            "multimodal OCR request to {} returned {}",
            config.endpoint,
            response.status()
        )));
    }

    let payload: OcrResponse = response
        .json()
        .await
        .map_err(|error| ExtractError::OcrFailed(error.to_string()))?;

    payload_to_pages(&payload, path)
}

fn payload_to_pages(payload: &OcrResponse, path: &Path) -> Result<Vec<PageText>, ExtractError> {
    if let Some(listed) = &payload.pages {
        let listed = listed
            .iter()
            .filter_map(|page| {
                let text = page.text.as_deref().map(str::trim).unwrap_or_default();
                (!text.is_empty()).then(|| PageText {
                    number: page.page.unwrap_or(1),
                    text: text.to_string(),
                })
            })
            .collect::<Vec<_>>();

        if !listed.is_empty() {
            return Ok(listed);
        }
    }

    if let Some(raw_text) = &payload.text {
        let pages = raw_text
            .split(PAGE_BREAK)
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .enumerate()
            .map(|(index, text)| PageText {
                number: (index + 1) as u32,
                text: text.to_string(),
            })
            .collect::<Vec<_>>();

        if !pages.is_empty() {
            return Ok(pages);
        }
    }

    Err(ExtractError::OcrFailed(format!(
        "multimodal OCR response was empty for {}",
        path.display()
    )))
}

/// Renders CSV rows as labelled text blocks, one block per row.
///
/// The first record is the header. Rows shorter than the header leave the
/// missing values empty.
pub fn csv_to_text<R: Read>(reader: R) -> Result<String, ExtractError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_reader(reader);

    let headers = reader.headers()?.clone();
    let mut rows = Vec::new();
    for record in reader.records() {
        rows.push(record?);
    }

    if rows.is_empty() {
        return Ok(String::new());
    }

    let columns = headers.iter().collect::<Vec<_>>();
    let mut text = format!("CSV Data with columns: {}\n\n", columns.join(", "));
    for (index, row) in rows.iter().enumerate() {
        text.push_str(&format!("Row {}:\n", index + 1));
        for (position, column) in columns.iter().enumerate() {
            let value = row.get(position).unwrap_or_default();
            text.push_str(&format!("{column}: {value}\n"));
        }
        text.push('\n');
    }

    Ok(text)
}
