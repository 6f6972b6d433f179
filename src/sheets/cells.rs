use crate::error::{CareSheetError, Result};
use crate::mapping::MappingSchema;
use crate::record::{is_blank, FlatRecord};
use crate::sheets::{CellWrite, SpreadsheetBackend};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Matches every schema entry, in declaration order, to a record value: the
/// exact key first, then the first key in record order related by
/// containment. Blank values are skipped.
pub fn resolve_cells(record: &FlatRecord, schema: &MappingSchema) -> Vec<CellWrite> {
    schema
        .iter()
        .filter_map(|entry| {
            let value = record.resolve(&entry.field_name)?;
            if is_blank(value) {
                return None;
            }
            Some(CellWrite::new(&entry.cell_address, value))
        })
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellWriteReport {
    pub queued: usize,
    /// Cells that still failed after the per-cell fallback.
    pub failed_cells: Vec<String>,
}

impl CellWriteReport {
    pub fn written(&self) -> usize {
        self.queued.saturating_sub(self.failed_cells.len())
    }

    pub fn merge(&mut self, other: CellWriteReport) {
        self.queued += other.queued;
        self.failed_cells.extend(other.failed_cells);
    }
}

#[derive(Clone)]
pub struct CellWriter {
    backend: Arc<dyn SpreadsheetBackend>,
}

impl CellWriter {
    pub fn new(backend: Arc<dyn SpreadsheetBackend>) -> Self {
        Self { backend }
    }

    /// Writes a raw JSON record (nested or flat) at the schema's cells.
    pub async fn write(
        &self,
        spreadsheet_id: &str,
        worksheet: &str,
        record: &Value,
        schema: &MappingSchema,
    ) -> Result<CellWriteReport> {
        self.write_record(spreadsheet_id, worksheet, &FlatRecord::from_value(record), schema)
            .await
    }

    pub async fn write_record(
        &self,
        spreadsheet_id: &str,
        worksheet: &str,
        record: &FlatRecord,
        schema: &MappingSchema,
    ) -> Result<CellWriteReport> {
        if schema.is_empty() {
            return Err(CareSheetError::MappingNotLoaded);
        }
        self.ensure_worksheet(spreadsheet_id, worksheet).await?;

        let cells = resolve_cells(record, schema);
        debug!(
            "Resolved {} of {} mapped fields for '{}'",
            cells.len(),
            schema.len(),
            worksheet
        );
        Ok(self.write_cells(spreadsheet_id, worksheet, &cells).await)
    }

    pub async fn ensure_worksheet(&self, spreadsheet_id: &str, worksheet: &str) -> Result<()> {
        let info = self.backend.open(spreadsheet_id).await?;
        if info.has_worksheet(worksheet) {
            Ok(())
        } else {
            Err(CareSheetError::WorksheetNotFound {
                spreadsheet_id: spreadsheet_id.to_string(),
                worksheet: worksheet.to_string(),
            })
        }
    }

    /// One batch call; if it fails, one call per cell. Never fails as a
    /// whole: cells that still fail are listed in the report.
    pub async fn write_cells(
        &self,
        spreadsheet_id: &str,
        worksheet: &str,
        cells: &[CellWrite],
    ) -> CellWriteReport {
        let mut report = CellWriteReport {
            queued: cells.len(),
            failed_cells: Vec::new(),
        };
        if cells.is_empty() {
            return report;
        }

        match self.backend.batch_write(spreadsheet_id, worksheet, cells).await {
            Ok(()) => {
                info!("Wrote {} cells to '{}'", cells.len(), worksheet);
                return report;
            }
            Err(e) => warn!(
                "Batch write of {} cells to '{}' failed, writing cell by cell: {}",
                cells.len(),
                worksheet,
                e
            ),
        }

        for cell in cells {
            if let Err(e) = self.backend.write_cell(spreadsheet_id, worksheet, cell).await {
                warn!("Write to {} failed: {}", cell.cell, e);
                report.failed_cells.push(cell.cell.clone());
            }
        }
        info!(
            "Wrote {} of {} cells to '{}' individually",
            report.written(),
            report.queued,
            worksheet
        );
        report
    }
}
