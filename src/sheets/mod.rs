//! Spreadsheet writes: fixed-cell batches, header-aligned row appends and the
//! backend seam they run against.

pub mod a1;
pub mod cells;
#[cfg(feature = "google")]
pub mod google;
pub mod rows;

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use cells::{resolve_cells, CellWriteReport, CellWriter};
#[cfg(feature = "google")]
pub use google::GoogleWorkspaceClient;
pub use rows::{RowOverrides, RowWriter, DEFAULT_WORKSHEET, MANAGEMENT_LOG_HEADERS, SERVICE_LOG_HEADERS};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpreadsheetInfo {
    pub id: String,
    pub url: String,
    pub worksheets: Vec<String>,
}

impl SpreadsheetInfo {
    pub fn has_worksheet(&self, title: &str) -> bool {
        self.worksheets.iter().any(|w| w == title)
    }

    /// First worksheet, the one a freshly copied template opens on.
    pub fn primary_worksheet(&self) -> Option<&str> {
        self.worksheets.first().map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellWrite {
    /// A1 address, e.g. `C5`.
    pub cell: String,
    pub value: String,
}

impl CellWrite {
    pub fn new(cell: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            cell: cell.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopiedFile {
    pub id: String,
    pub url: String,
}

/// Outcome of one logical write request, returned to callers as JSON.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteResult {
    pub success: bool,
    pub sheet_url: Option<String>,
    pub write_count: usize,
    pub error: Option<String>,
    pub spreadsheet_id: Option<String>,
}

impl WriteResult {
    pub fn ok(spreadsheet_id: impl Into<String>, sheet_url: impl Into<String>, write_count: usize) -> Self {
        Self {
            success: true,
            sheet_url: Some(sheet_url.into()),
            write_count,
            error: None,
            spreadsheet_id: Some(spreadsheet_id.into()),
        }
    }

    pub fn failure(error: impl ToString) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
            ..Self::default()
        }
    }

    /// Appends to `error`, joining with `; `.
    pub fn push_error(&mut self, error: impl AsRef<str>) {
        self.error = Some(match self.error.take() {
            Some(existing) => format!("{}; {}", existing, error.as_ref()),
            None => error.as_ref().to_string(),
        });
    }
}

#[async_trait]
pub trait SpreadsheetBackend: Send + Sync {
    async fn open(&self, spreadsheet_id: &str) -> Result<SpreadsheetInfo>;

    /// Adds a worksheet, writing `header` into row 1 when it is not empty.
    async fn create_worksheet(&self, spreadsheet_id: &str, title: &str, header: &[String]) -> Result<()>;

    /// Values of a 1-based row, trailing empty cells trimmed.
    async fn read_row(&self, spreadsheet_id: &str, worksheet: &str, row: u32) -> Result<Vec<String>>;

    async fn batch_write(&self, spreadsheet_id: &str, worksheet: &str, cells: &[CellWrite]) -> Result<()>;

    async fn write_cell(&self, spreadsheet_id: &str, worksheet: &str, cell: &CellWrite) -> Result<()>;

    async fn append_row(&self, spreadsheet_id: &str, worksheet: &str, values: &[String]) -> Result<()>;

    /// Copies a file (a template) under `name`, optionally into `folder_id`.
    async fn copy_file(&self, template_id: &str, name: &str, folder_id: Option<&str>) -> Result<CopiedFile>;

    /// Removes data-validation rules from the given A1 cells.
    async fn clear_validation(&self, spreadsheet_id: &str, worksheet: &str, cells: &[String]) -> Result<()>;
}
