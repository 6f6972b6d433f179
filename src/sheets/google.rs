use crate::error::{CareSheetError, Result};
use crate::sheets::a1::{parse_a1, qualified};
use crate::sheets::{CellWrite, CopiedFile, SpreadsheetBackend, SpreadsheetInfo};
use crate::storage::FileArchive;
use async_trait::async_trait;
use log::{debug, info};
use reqwest::{Client, RequestBuilder, Response, Url};
use serde_json::{json, Value};

const SHEETS_BASE_URL: &str = "https://sheets.googleapis.com/v4/spreadsheets";
const DRIVE_BASE_URL: &str = "https://www.googleapis.com/drive/v3/files";
const DRIVE_UPLOAD_URL: &str = "https://www.googleapis.com/upload/drive/v3/files";
const USER_ENTERED: (&str, &str) = ("valueInputOption", "USER_ENTERED");

/// Sheets v4 and Drive v3 over REST with a bearer token.
#[derive(Clone)]
pub struct GoogleWorkspaceClient {
    client: Client,
    access_token: String,
    sheets_url: String,
    drive_url: String,
    drive_upload_url: String,
}

impl GoogleWorkspaceClient {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            access_token: access_token.into(),
            sheets_url: SHEETS_BASE_URL.to_string(),
            drive_url: DRIVE_BASE_URL.to_string(),
            drive_upload_url: DRIVE_UPLOAD_URL.to_string(),
        }
    }

    /// Serves Sheets and Drive from one host, for local fakes.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        let base = base_url.into();
        let base = base.trim_end_matches('/');
        self.sheets_url = format!("{}/v4/spreadsheets", base);
        self.drive_url = format!("{}/drive/v3/files", base);
        self.drive_upload_url = format!("{}/upload/drive/v3/files", base);
        self
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.bearer_auth(&self.access_token)
    }

    /// `…/spreadsheets/{id}/values/{range}{suffix}` with the range encoded as
    /// one path segment.
    fn values_url(&self, spreadsheet_id: &str, range: &str, suffix: &str) -> Result<Url> {
        let mut url = Url::parse(&self.sheets_url)
            .map_err(|e| CareSheetError::Spreadsheet(format!("bad Sheets URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| CareSheetError::Spreadsheet("Sheets URL cannot take a path".to_string()))?
            .push(spreadsheet_id)
            .push("values")
            .push(&format!("{}{}", range, suffix));
        Ok(url)
    }

    async fn batch_update(&self, spreadsheet_id: &str, requests: Value) -> Result<Value> {
        let url = format!("{}/{}:batchUpdate", self.sheets_url, spreadsheet_id);
        let res = self
            .authorized(self.client.post(&url))
            .json(&json!({ "requests": requests }))
            .send()
            .await?;
        Ok(check_status(res, "Spreadsheet batchUpdate").await?.json().await?)
    }

    async fn worksheet_id(&self, spreadsheet_id: &str, worksheet: &str) -> Result<i64> {
        let body = self.spreadsheet_properties(spreadsheet_id).await?;
        let sheet_id = sheet_properties(&body)
            .find(|p| p.get("title").and_then(Value::as_str) == Some(worksheet))
            .and_then(|p| p.get("sheetId").and_then(Value::as_i64));
        sheet_id.ok_or_else(|| CareSheetError::WorksheetNotFound {
            spreadsheet_id: spreadsheet_id.to_string(),
            worksheet: worksheet.to_string(),
        })
    }

    async fn spreadsheet_properties(&self, spreadsheet_id: &str) -> Result<Value> {
        let url = format!("{}/{}", self.sheets_url, spreadsheet_id);
        let res = self
            .authorized(self.client.get(&url))
            .query(&[("fields", "spreadsheetId,spreadsheetUrl,sheets.properties(sheetId,title)")])
            .send()
            .await?;
        Ok(check_status(res, "Spreadsheet open").await?.json().await?)
    }
}

#[async_trait]
impl SpreadsheetBackend for GoogleWorkspaceClient {
    async fn open(&self, spreadsheet_id: &str) -> Result<SpreadsheetInfo> {
        let body = self.spreadsheet_properties(spreadsheet_id).await?;
        let worksheets = sheet_properties(&body)
            .filter_map(|p| p.get("title").and_then(Value::as_str))
            .map(str::to_string)
            .collect();
        let url = body
            .get("spreadsheetUrl")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| spreadsheet_url(spreadsheet_id));

        Ok(SpreadsheetInfo {
            id: spreadsheet_id.to_string(),
            url,
            worksheets,
        })
    }

    async fn create_worksheet(&self, spreadsheet_id: &str, title: &str, header: &[String]) -> Result<()> {
        self.batch_update(
            spreadsheet_id,
            json!([{ "addSheet": { "properties": { "title": title } } }]),
        )
        .await?;
        info!("Added worksheet '{}' to {}", title, spreadsheet_id);

        if header.is_empty() {
            return Ok(());
        }
        let url = self.values_url(spreadsheet_id, &qualified(title, "A1"), "")?;
        let res = self
            .authorized(self.client.put(url))
            .query(&[USER_ENTERED])
            .json(&json!({ "values": [header] }))
            .send()
            .await?;
        check_status(res, "Header write").await?;
        Ok(())
    }

    async fn read_row(&self, spreadsheet_id: &str, worksheet: &str, row: u32) -> Result<Vec<String>> {
        let range = qualified(worksheet, &format!("{}:{}", row, row));
        let url = self.values_url(spreadsheet_id, &range, "")?;
        let res = self.authorized(self.client.get(url)).send().await?;
        let body: Value = check_status(res, "Row read").await?.json().await?;

        let cells = body
            .get("values")
            .and_then(Value::as_array)
            .and_then(|rows| rows.first())
            .and_then(Value::as_array)
            .map(|cells| cells.iter().map(cell_text).collect())
            .unwrap_or_default();
        Ok(trim_trailing_empty(cells))
    }

    async fn batch_write(&self, spreadsheet_id: &str, worksheet: &str, cells: &[CellWrite]) -> Result<()> {
        let data: Vec<Value> = cells
            .iter()
            .map(|c| json!({ "range": qualified(worksheet, &c.cell), "values": [[c.value]] }))
            .collect();
        let url = format!("{}/{}/values:batchUpdate", self.sheets_url, spreadsheet_id);
        let res = self
            .authorized(self.client.post(&url))
            .json(&json!({ "valueInputOption": "USER_ENTERED", "data": data }))
            .send()
            .await?;
        check_status(res, "Batch write").await?;
        debug!("Wrote {} cells to '{}'", cells.len(), worksheet);
        Ok(())
    }

    async fn write_cell(&self, spreadsheet_id: &str, worksheet: &str, cell: &CellWrite) -> Result<()> {
        let url = self.values_url(spreadsheet_id, &qualified(worksheet, &cell.cell), "")?;
        let res = self
            .authorized(self.client.put(url))
            .query(&[USER_ENTERED])
            .json(&json!({ "values": [[cell.value]] }))
            .send()
            .await?;
        check_status(res, "Cell write").await?;
        Ok(())
    }

    async fn append_row(&self, spreadsheet_id: &str, worksheet: &str, values: &[String]) -> Result<()> {
        let url = self.values_url(spreadsheet_id, &qualified(worksheet, "A1"), ":append")?;
        let res = self
            .authorized(self.client.post(url))
            .query(&[USER_ENTERED, ("insertDataOption", "INSERT_ROWS")])
            .json(&json!({ "values": [values] }))
            .send()
            .await?;
        check_status(res, "Row append").await?;
        Ok(())
    }

    async fn copy_file(&self, template_id: &str, name: &str, folder_id: Option<&str>) -> Result<CopiedFile> {
        let mut metadata = json!({ "name": name });
        if let Some(folder_id) = folder_id {
            metadata["parents"] = json!([folder_id]);
        }

        let url = format!("{}/{}/copy", self.drive_url, template_id);
        let res = self
            .authorized(self.client.post(&url))
            .query(&[("supportsAllDrives", "true"), ("fields", "id")])
            .json(&metadata)
            .send()
            .await?;
        let body: Value = check_status(res, "Template copy").await?.json().await?;
        let id = body
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| CareSheetError::Spreadsheet("Copy response missing 'id'".to_string()))?
            .to_string();

        info!("Copied template {} to '{}' ({})", template_id, name, id);
        Ok(CopiedFile {
            url: spreadsheet_url(&id),
            id,
        })
    }

    async fn clear_validation(&self, spreadsheet_id: &str, worksheet: &str, cells: &[String]) -> Result<()> {
        let sheet_id = self.worksheet_id(spreadsheet_id, worksheet).await?;
        let requests: Vec<Value> = cells
            .iter()
            .filter_map(|cell| grid_range(sheet_id, cell))
            .map(|range| json!({ "setDataValidation": { "range": range } }))
            .collect();
        if requests.is_empty() {
            return Ok(());
        }
        self.batch_update(spreadsheet_id, Value::Array(requests)).await?;
        Ok(())
    }
}

#[async_trait]
impl FileArchive for GoogleWorkspaceClient {
    async fn archive(
        &self,
        data: &[u8],
        file_name: &str,
        mime_type: &str,
        folder_id: &str,
    ) -> Result<Option<String>> {
        let init = self
            .authorized(self.client.post(&self.drive_upload_url))
            .query(&[("uploadType", "resumable"), ("supportsAllDrives", "true")])
            .header("X-Upload-Content-Type", mime_type)
            .header("X-Upload-Content-Length", data.len().to_string())
            .json(&json!({ "name": file_name, "parents": [folder_id] }))
            .send()
            .await?;
        let init = check_status(init, "Drive upload init").await?;

        let session_url = init
            .headers()
            .get("location")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| CareSheetError::Storage("No resumable session URL in headers".to_string()))?
            .to_string();

        let res = self
            .client
            .put(&session_url)
            .header("Content-Type", mime_type)
            .body(data.to_vec())
            .send()
            .await?;
        let body: Value = check_status(res, "Drive upload").await?.json().await?;

        info!("Archived '{}' to folder {}", file_name, folder_id);
        Ok(body
            .get("webViewLink")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| {
                body.get("id")
                    .and_then(Value::as_str)
                    .map(|id| format!("https://drive.google.com/file/d/{}/view", id))
            }))
    }
}

fn spreadsheet_url(id: &str) -> String {
    format!("https://docs.google.com/spreadsheets/d/{}/edit", id)
}

fn sheet_properties(body: &Value) -> impl Iterator<Item = &Value> {
    body.get("sheets")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|s| s.get("properties"))
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn trim_trailing_empty(mut cells: Vec<String>) -> Vec<String> {
    while cells.last().is_some_and(|c| c.is_empty()) {
        cells.pop();
    }
    cells
}

/// Single-cell `GridRange` for an A1 address.
fn grid_range(sheet_id: i64, cell: &str) -> Option<Value> {
    let (row, column) = parse_a1(cell)?;
    Some(json!({
        "sheetId": sheet_id,
        "startRowIndex": row,
        "endRowIndex": row + 1,
        "startColumnIndex": column,
        "endColumnIndex": column + 1,
    }))
}

async fn check_status(res: Response, context: &str) -> Result<Response> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }
    let body = res.text().await.unwrap_or_default();
    Err(CareSheetError::Spreadsheet(format!(
        "{} failed ({}): {}",
        context, status, body
    )))
}
