use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("csv parse error: {0}")]
    Csv(#[from] csv::Error),

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error("unsupported file type: {0} (only .pdf and .csv are accepted)")]
    UnsupportedFileType(String),

    #[error("multimodal OCR failed: {0}")]
    OcrFailed(String),
}

#[derive(Debug, Error)]
pub enum RagError {
    #[error("invalid input: {0}")]
    Input(String),

    #[error("provider {provider} failed: {details}")]
    Provider { provider: String, details: String },

    #[error("store {backend} failed: {details}")]
    Store { backend: String, details: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("extraction failed: {0}")]
    Extract(#[from] ExtractError),

    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),
}

impl RagError {
    pub fn provider(provider: &str, details: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.to_string(),
            details: details.into(),
        }
    }

    pub fn store(backend: &str, details: impl Into<String>) -> Self {
        Self::Store {
            backend: backend.to_string(),
            details: details.into(),
        }
    }
}

pub type Result<T, E = RagError> = std::result::Result<T, E>;
