use crate::error::{CareSheetError, Result};
use crate::record::FlatRecord;
use crate::sheets::{SpreadsheetBackend, WriteResult};
use crate::utils::normalize_date;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

pub const DEFAULT_WORKSHEET: &str = "貼り付け用";

pub const SERVICE_LOG_HEADERS: &[&str] = &[
    "開催日",
    "開催場所",
    "開催時間",
    "開催回数",
    "担当者名",
    "利用者名",
    "検討した項目",
    "検討内容",
    "結論",
];

pub const MANAGEMENT_LOG_HEADERS: &[&str] = &["日時", "場所", "参加者", "議題", "24時間対応", "共有事項"];

/// Values entered by a person alongside the request. A non-empty override
/// wins over whatever was extracted for the same column.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowOverrides {
    #[serde(default, alias = "date_str")]
    pub date: Option<String>,
    #[serde(default, alias = "time_str")]
    pub time: Option<String>,
    #[serde(default)]
    pub place: Option<String>,
    #[serde(default)]
    pub participants: Option<String>,
}

impl RowOverrides {
    fn date(&self) -> Option<&str> {
        non_empty(self.date.as_deref())
    }

    fn time(&self) -> Option<&str> {
        non_empty(self.time.as_deref())
    }

    fn place(&self) -> Option<&str> {
        non_empty(self.place.as_deref())
    }

    fn participants(&self) -> Option<&str> {
        non_empty(self.participants.as_deref())
    }

    /// Normalized date and time joined by a space, or whichever is present.
    fn date_time(&self) -> Option<String> {
        join_date_time(self.date().map(normalize_date), self.time().map(str::to_string))
    }

    /// Override for a generic header, if one applies.
    fn for_header(&self, header: &str) -> Option<String> {
        if header.contains("日時") {
            self.date_time()
        } else if header.contains("開催日") || header.contains("日付") {
            self.date().map(normalize_date)
        } else if header.contains("開催時間") || header.trim() == "時間" {
            self.time().map(str::to_string)
        } else if header.contains("場所") {
            self.place().map(str::to_string)
        } else if header.contains("参加者") || header.contains("出席者") {
            self.participants().map(str::to_string)
        } else {
            None
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn join_date_time(date: Option<String>, time: Option<String>) -> Option<String> {
    match (date, time) {
        (Some(date), Some(time)) => Some(format!("{} {}", date, time)),
        (Some(only), None) | (None, Some(only)) => Some(only),
        (None, None) => None,
    }
}

/// Aligns a record to `header`: override slot first, then the first key
/// related to the header by containment, else an empty cell.
pub fn align_row(header: &[String], record: &FlatRecord, overrides: &RowOverrides) -> Vec<String> {
    header
        .iter()
        .map(|h| {
            if h.trim().is_empty() {
                return String::new();
            }
            overrides
                .for_header(h)
                .or_else(|| record.find_related(h).map(|(_, v)| v.to_string()))
                .unwrap_or_default()
        })
        .collect()
}

/// First non-empty value among `keys`, exact keys only.
fn first_of<'a>(record: &'a FlatRecord, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|k| non_empty(record.get(k)))
}

/// Management-meeting row. Columns are picked by a fixed keyword table
/// instead of generic containment; the record may use the English keys of
/// the management summary or their Japanese display names.
pub fn management_row(header: &[String], record: &FlatRecord, overrides: &RowOverrides) -> Vec<String> {
    let place = overrides
        .place()
        .or_else(|| first_of(record, &["place", "場所"]))
        .unwrap_or("");
    let sharing = first_of(record, &["sharing_matters", "共有事項"]).unwrap_or("");
    let participants = overrides
        .participants()
        .or_else(|| first_of(record, &["participants", "参加者"]))
        .unwrap_or("");
    let date = overrides
        .date()
        .or_else(|| first_of(record, &["meeting_date", "日時", "開催日"]))
        .map(normalize_date);
    let date_time = join_date_time(date, overrides.time().map(str::to_string)).unwrap_or_default();

    header
        .iter()
        .map(|h| {
            if h.contains("場所") && h.contains("共有") {
                match (place.is_empty(), sharing.is_empty()) {
                    (false, false) => format!("{}\n\n{}", place, sharing),
                    (false, true) => place.to_string(),
                    _ => sharing.to_string(),
                }
            } else if h.contains("日時") || h.contains("開催日") || h.contains("日付") {
                date_time.clone()
            } else if h.contains("参加者") || h.contains("出席者") {
                participants.to_string()
            } else if h.contains("場所") {
                place.to_string()
            } else if h.contains("議題") {
                first_of(record, &["agenda", "議題"]).unwrap_or("").to_string()
            } else if h.contains("24時間") {
                first_of(record, &["support_24h", "24時間対応"]).unwrap_or("").to_string()
            } else if h.contains("共有") {
                sharing.to_string()
            } else {
                String::new()
            }
        })
        .collect()
}

#[derive(Clone)]
pub struct RowWriter {
    backend: Arc<dyn SpreadsheetBackend>,
}

impl RowWriter {
    pub fn new(backend: Arc<dyn SpreadsheetBackend>) -> Self {
        Self { backend }
    }

    /// Appends one row aligned to the worksheet's header. A missing worksheet
    /// is created with the service-meeting log header.
    pub async fn append_row(
        &self,
        spreadsheet_id: &str,
        worksheet: Option<&str>,
        record: &Value,
        overrides: &RowOverrides,
    ) -> Result<WriteResult> {
        let record = FlatRecord::from_value(record);
        self.append_with(spreadsheet_id, worksheet, SERVICE_LOG_HEADERS, |header| {
            align_row(header, &record, overrides)
        })
        .await
    }

    /// Management-meeting append through the keyword table.
    pub async fn append_management_row(
        &self,
        spreadsheet_id: &str,
        worksheet: Option<&str>,
        record: &Value,
        overrides: &RowOverrides,
    ) -> Result<WriteResult> {
        let record = FlatRecord::from_value(record);
        self.append_with(spreadsheet_id, worksheet, MANAGEMENT_LOG_HEADERS, |header| {
            management_row(header, &record, overrides)
        })
        .await
    }

    async fn append_with<F>(
        &self,
        spreadsheet_id: &str,
        worksheet: Option<&str>,
        default_header: &[&str],
        build_row: F,
    ) -> Result<WriteResult>
    where
        F: FnOnce(&[String]) -> Vec<String>,
    {
        let worksheet = worksheet
            .map(str::trim)
            .filter(|w| !w.is_empty())
            .unwrap_or(DEFAULT_WORKSHEET);

        let info = self.backend.open(spreadsheet_id).await?;
        if !info.has_worksheet(worksheet) {
            info!("Creating worksheet '{}' with the default header", worksheet);
            let header: Vec<String> = default_header.iter().map(|h| h.to_string()).collect();
            self.backend
                .create_worksheet(spreadsheet_id, worksheet, &header)
                .await?;
        }

        let header = self.backend.read_row(spreadsheet_id, worksheet, 1).await?;
        if header.iter().all(|h| h.trim().is_empty()) {
            return Err(CareSheetError::MissingHeader(worksheet.to_string()));
        }

        let row = build_row(&header);
        debug!("Appending row {:?} to '{}'", row, worksheet);
        self.backend.append_row(spreadsheet_id, worksheet, &row).await?;

        let filled = row.iter().filter(|v| !v.is_empty()).count();
        Ok(WriteResult::ok(&info.id, &info.url, filled))
    }
}
