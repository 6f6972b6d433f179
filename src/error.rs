use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CareSheetError {
    #[error("Mapping not loaded: the schema for this write is empty")]
    MappingNotLoaded,

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Rate limited: {message}")]
    RateLimited {
        message: String,
        /// Backoff suggested by the server, if it sent one.
        retry_after: Option<Duration>,
    },

    #[error("Could not parse model output as JSON: {0}")]
    Parse(String),

    #[error("Extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("Spreadsheet error: {0}")]
    Spreadsheet(String),

    #[error("Worksheet '{worksheet}' not found in spreadsheet {spreadsheet_id}")]
    WorksheetNotFound {
        spreadsheet_id: String,
        worksheet: String,
    },

    #[error("Worksheet '{0}' has no header row to align the appended row with")]
    MissingHeader(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[cfg(any(feature = "gemini", feature = "google"))]
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl CareSheetError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}

pub type Result<T> = std::result::Result<T, CareSheetError>;
