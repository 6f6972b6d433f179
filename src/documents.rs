//! Per-record documents created from templates, and the meeting fan-out that
//! pairs a master-log append with a standalone minutes document.

use crate::error::{CareSheetError, Result};
use crate::mapping::MappingSchema;
use crate::record::FlatRecord;
use crate::sheets::a1::to_a1;
use crate::sheets::rows::{management_row, MANAGEMENT_LOG_HEADERS};
use crate::sheets::{resolve_cells, CellWrite, CellWriteReport, CellWriter, RowOverrides, RowWriter, SpreadsheetBackend, WriteResult};
use crate::utils::{day_stamp, parse_date, timestamp};
use chrono::{Local, NaiveDateTime};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

const SUBJECT_KEYS: &[&str] = &["利用者氏名", "氏名", "利用者名"];
const DATE_KEYS: &[&str] = &["開催日", "meeting_date", "作成日", "相談日"];
const ATTENDANCE_MARK: &str = "○";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Assessment,
    ServiceMeeting,
    ManagementMeeting,
}

impl DocumentKind {
    pub fn prefix(self) -> &'static str {
        match self {
            DocumentKind::Assessment => "アセスメントシート",
            DocumentKind::ServiceMeeting => "サービス担当者会議",
            DocumentKind::ManagementMeeting => "運営会議",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeetingType {
    ServiceMeeting,
    ManagementMeeting,
}

impl MeetingType {
    pub fn document_kind(self) -> DocumentKind {
        match self {
            MeetingType::ServiceMeeting => DocumentKind::ServiceMeeting,
            MeetingType::ManagementMeeting => DocumentKind::ManagementMeeting,
        }
    }
}

/// `<prefix>_<subject>_<YYYYMMDD>`, or `<prefix>_<YYYYMMDD_HHMMSS>` when the
/// record names no subject. The date is taken from the record when one of its
/// date fields parses, otherwise from `now`.
pub fn document_name(kind: DocumentKind, record: &FlatRecord, now: NaiveDateTime) -> String {
    let subject = SUBJECT_KEYS
        .iter()
        .filter_map(|k| record.get(k))
        .map(str::trim)
        .find(|v| !v.is_empty());

    match subject {
        Some(subject) => {
            let date = DATE_KEYS
                .iter()
                .filter_map(|k| record.get(k))
                .find_map(parse_date)
                .unwrap_or_else(|| now.date());
            format!("{}_{}_{}", kind.prefix(), subject, day_stamp(date))
        }
        None => format!("{}_{}", kind.prefix(), timestamp(now)),
    }
}

/// One positional write pass. `worksheet: None` targets the first worksheet.
#[derive(Debug, Clone)]
pub struct WriteTarget {
    pub worksheet: Option<String>,
    pub schema: Arc<MappingSchema>,
}

#[derive(Debug, Clone)]
pub struct DocumentPlan {
    pub kind: DocumentKind,
    pub template_id: String,
    pub folder_id: Option<String>,
    pub record: Value,
    /// Executed in order. Only the first target's failure fails the write.
    pub targets: Vec<WriteTarget>,
}

#[derive(Clone)]
pub struct DocumentBuilder {
    backend: Arc<dyn SpreadsheetBackend>,
    cells: CellWriter,
}

impl DocumentBuilder {
    pub fn new(backend: Arc<dyn SpreadsheetBackend>) -> Self {
        Self {
            cells: CellWriter::new(Arc::clone(&backend)),
            backend,
        }
    }

    pub async fn create_and_write(&self, plan: &DocumentPlan) -> WriteResult {
        self.create_and_write_at(plan, Local::now().naive_local()).await
    }

    /// Copies the template under a name derived from the record and runs
    /// every write target against the copy.
    pub async fn create_and_write_at(&self, plan: &DocumentPlan, now: NaiveDateTime) -> WriteResult {
        if plan.targets.first().map_or(true, |t| t.schema.is_empty()) {
            return WriteResult::failure(CareSheetError::MappingNotLoaded);
        }

        let record = FlatRecord::from_value(&plan.record);
        let name = document_name(plan.kind, &record, now);
        let copy = match self
            .backend
            .copy_file(&plan.template_id, &name, plan.folder_id.as_deref())
            .await
        {
            Ok(copy) => copy,
            Err(e) => {
                warn!("Copying template {} failed: {}", plan.template_id, e);
                return WriteResult::failure(e);
            }
        };
        info!("Created '{}' ({})", name, copy.id);

        let mut result = WriteResult::ok(&copy.id, &copy.url, 0);
        for (i, target) in plan.targets.iter().enumerate() {
            match self.write_target(&copy.id, target, &record).await {
                Ok(report) => {
                    result.write_count += report.queued;
                    if !report.failed_cells.is_empty() {
                        result.push_error(format!("failed cells: {}", report.failed_cells.join(", ")));
                    }
                }
                Err(e) if i == 0 => {
                    warn!("Primary write to {} failed: {}", copy.id, e);
                    result.success = false;
                    result.push_error(e.to_string());
                    return result;
                }
                Err(e) => {
                    let worksheet = target.worksheet.as_deref().unwrap_or("(primary)");
                    warn!("Secondary write to '{}' failed: {}", worksheet, e);
                    result.push_error(format!("{}: {}", worksheet, e));
                }
            }
        }
        result
    }

    async fn write_target(
        &self,
        spreadsheet_id: &str,
        target: &WriteTarget,
        record: &FlatRecord,
    ) -> Result<CellWriteReport> {
        let worksheet = match &target.worksheet {
            Some(w) => w.clone(),
            None => primary_worksheet(self.backend.as_ref(), spreadsheet_id).await?,
        };
        self.cells
            .write_record(spreadsheet_id, &worksheet, record, &target.schema)
            .await
    }
}

async fn primary_worksheet(backend: &dyn SpreadsheetBackend, spreadsheet_id: &str) -> Result<String> {
    let info = backend.open(spreadsheet_id).await?;
    info.primary_worksheet()
        .map(str::to_string)
        .ok_or_else(|| CareSheetError::Spreadsheet(format!("spreadsheet {} has no worksheets", spreadsheet_id)))
}

/// Row of participant names in the standalone template and the row the
/// attendance marks go into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceMatrix {
    pub header_row: u32,
    pub mark_row: u32,
}

impl Default for AttendanceMatrix {
    fn default() -> Self {
        Self {
            header_row: 6,
            mark_row: 7,
        }
    }
}

/// Where one meeting type is written.
#[derive(Debug, Clone, Default)]
pub struct MeetingTarget {
    pub master_log_id: Option<String>,
    pub master_worksheet: Option<String>,
    pub template_id: Option<String>,
    pub folder_id: Option<String>,
    pub schema: Arc<MappingSchema>,
    pub attendance: Option<AttendanceMatrix>,
}

#[derive(Clone)]
pub struct MeetingFanOut {
    backend: Arc<dyn SpreadsheetBackend>,
    rows: RowWriter,
    cells: CellWriter,
    service_meeting: MeetingTarget,
    management_meeting: MeetingTarget,
}

impl MeetingFanOut {
    pub fn new(
        backend: Arc<dyn SpreadsheetBackend>,
        service_meeting: MeetingTarget,
        management_meeting: MeetingTarget,
    ) -> Self {
        Self {
            rows: RowWriter::new(Arc::clone(&backend)),
            cells: CellWriter::new(Arc::clone(&backend)),
            backend,
            service_meeting,
            management_meeting,
        }
    }

    pub fn target(&self, meeting_type: MeetingType) -> &MeetingTarget {
        match meeting_type {
            MeetingType::ServiceMeeting => &self.service_meeting,
            MeetingType::ManagementMeeting => &self.management_meeting,
        }
    }

    pub async fn write(&self, meeting_type: MeetingType, record: &Value, overrides: &RowOverrides) -> WriteResult {
        self.write_at(meeting_type, record, overrides, Local::now().naive_local())
            .await
    }

    /// Appends to the master log and creates the standalone document, each
    /// independently, then merges the two outcomes.
    pub async fn write_at(
        &self,
        meeting_type: MeetingType,
        record: &Value,
        overrides: &RowOverrides,
        now: NaiveDateTime,
    ) -> WriteResult {
        let target = self.target(meeting_type);

        let master = match &target.master_log_id {
            Some(log_id) => {
                let appended = match meeting_type {
                    MeetingType::ServiceMeeting => {
                        self.rows
                            .append_row(log_id, target.master_worksheet.as_deref(), record, overrides)
                            .await
                    }
                    MeetingType::ManagementMeeting => {
                        self.rows
                            .append_management_row(log_id, target.master_worksheet.as_deref(), record, overrides)
                            .await
                    }
                };
                Some(appended.unwrap_or_else(|e| {
                    warn!("Master log append failed: {}", e);
                    WriteResult::failure(format!("master log: {}", e))
                }))
            }
            None => None,
        };

        let standalone = match &target.template_id {
            Some(template_id) => Some(
                self.write_standalone(meeting_type, target, template_id, record, overrides, now)
                    .await
                    .unwrap_or_else(|e| {
                        warn!("Standalone document failed: {}", e);
                        WriteResult::failure(format!("standalone document: {}", e))
                    }),
            ),
            None => None,
        };

        match (master, standalone) {
            (None, None) => WriteResult::failure(CareSheetError::InvalidRequest(format!(
                "no master log or template configured for {:?}",
                meeting_type
            ))),
            (Some(only), None) | (None, Some(only)) => only,
            (Some(master), Some(standalone)) => merge_results(master, standalone),
        }
    }

    async fn write_standalone(
        &self,
        meeting_type: MeetingType,
        target: &MeetingTarget,
        template_id: &str,
        record: &Value,
        overrides: &RowOverrides,
        now: NaiveDateTime,
    ) -> Result<WriteResult> {
        if target.schema.is_empty() {
            return Err(CareSheetError::MappingNotLoaded);
        }
        let record = meeting_display_record(meeting_type, &FlatRecord::from_value(record), overrides);

        let name = document_name(meeting_type.document_kind(), &record, now);
        let copy = self
            .backend
            .copy_file(template_id, &name, target.folder_id.as_deref())
            .await?;
        info!("Created standalone minutes '{}' ({})", name, copy.id);
        let worksheet = primary_worksheet(self.backend.as_ref(), &copy.id).await?;

        let mut cells: Vec<CellWrite> = resolve_cells(&record, &target.schema)
            .into_iter()
            .map(|cell| render_checkbox_cell(cell, &target.schema))
            .collect();

        let mut attendance_error = None;
        if let Some(matrix) = target.attendance {
            let participants = record.text("参加者");
            if !participants.trim().is_empty() {
                match self
                    .backend
                    .read_row(&copy.id, &worksheet, matrix.header_row)
                    .await
                {
                    Ok(header) => cells.extend(attendance_cells(&header, participants, matrix.mark_row)),
                    Err(e) => {
                        warn!("Reading the attendance header of {} failed: {}", copy.id, e);
                        attendance_error = Some(format!("attendance: {}", e));
                    }
                }
            }
        }

        let report = self.cells.write_cells(&copy.id, &worksheet, &cells).await;

        let written: Vec<String> = cells.iter().map(|c| c.cell.clone()).collect();
        if !written.is_empty() {
            if let Err(e) = self
                .backend
                .clear_validation(&copy.id, &worksheet, &written)
                .await
            {
                warn!("Clearing validation on {} failed: {}", copy.id, e);
            }
        }

        let mut result = WriteResult::ok(&copy.id, &copy.url, report.queued);
        if !report.failed_cells.is_empty() {
            result.push_error(format!("failed cells: {}", report.failed_cells.join(", ")));
        }
        if let Some(error) = attendance_error {
            result.push_error(error);
        }
        Ok(result)
    }
}

/// Record as the standalone template expects it: Japanese keys with the
/// caller's overrides applied.
pub fn meeting_display_record(meeting_type: MeetingType, record: &FlatRecord, overrides: &RowOverrides) -> FlatRecord {
    match meeting_type {
        MeetingType::ManagementMeeting => {
            let header: Vec<String> = MANAGEMENT_LOG_HEADERS.iter().map(|h| h.to_string()).collect();
            let values = management_row(&header, record, overrides);
            header.into_iter().zip(values).collect()
        }
        MeetingType::ServiceMeeting => {
            let mut display = record.clone();
            let slots = [
                ("開催日", overrides.date.as_deref()),
                ("開催時間", overrides.time.as_deref()),
                ("開催場所", overrides.place.as_deref()),
                ("参加者", overrides.participants.as_deref()),
            ];
            for (key, value) in slots {
                if let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) {
                    display.insert(key, value);
                }
            }
            display
        }
    }
}

/// `■自宅 □事業所 □病院` for option fields whose value names one of the
/// options. Values matching no option are written as they are.
pub fn render_checkbox(value: &str, options: &[String]) -> Option<String> {
    let value = value.trim();
    let selected = options
        .iter()
        .position(|o| o == value)
        .or_else(|| options.iter().position(|o| value.contains(o.as_str())))?;
    Some(
        options
            .iter()
            .enumerate()
            .map(|(i, o)| format!("{}{}", if i == selected { "■" } else { "□" }, o))
            .collect::<Vec<_>>()
            .join(" "),
    )
}

fn render_checkbox_cell(cell: CellWrite, schema: &MappingSchema) -> CellWrite {
    let rendered = schema
        .iter()
        .find(|e| e.cell_address == cell.cell && e.has_options())
        .and_then(|e| render_checkbox(&cell.value, &e.options));
    match rendered {
        Some(value) => CellWrite { value, ..cell },
        None => cell,
    }
}

/// Splits a participant list on `、`, `,`, `，` and whitespace.
pub fn participant_tokens(participants: &str) -> Vec<&str> {
    participants
        .split(|c: char| matches!(c, '、' | ',' | '，') || c.is_whitespace())
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect()
}

/// `○` under every header cell that a participant token names, matched by
/// containment either way.
pub fn attendance_cells(header: &[String], participants: &str, mark_row: u32) -> Vec<CellWrite> {
    let tokens = participant_tokens(participants);
    header
        .iter()
        .enumerate()
        .filter(|(_, h)| {
            let h = h.trim();
            !h.is_empty() && tokens.iter().any(|t| h.contains(t) || t.contains(h))
        })
        .map(|(col, _)| CellWrite::new(to_a1(mark_row.saturating_sub(1), col as u32), ATTENDANCE_MARK))
        .collect()
}

/// Standalone wins the URL and id when it succeeded; counts add up.
fn merge_results(master: WriteResult, standalone: WriteResult) -> WriteResult {
    let mut merged = WriteResult {
        success: master.success || standalone.success,
        write_count: master.write_count + standalone.write_count,
        ..WriteResult::default()
    };
    if standalone.success {
        merged.sheet_url = standalone.sheet_url;
        merged.spreadsheet_id = standalone.spreadsheet_id;
    } else {
        merged.sheet_url = master.sheet_url;
        merged.spreadsheet_id = master.spreadsheet_id;
    }
    for error in [master.error, standalone.error].into_iter().flatten() {
        merged.push_error(error);
    }
    merged
}
