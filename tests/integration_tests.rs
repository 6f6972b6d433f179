use async_trait::async_trait;
use care_sheet_builder::schema::MANDATORY_CONCLUSION;
use care_sheet_builder::*;
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ---------------------------------------------------------------------------
// In-memory backends
// ---------------------------------------------------------------------------

/// Answers phase prompts with every listed field, and the fixed prompts with
/// canned JSON.
#[derive(Default)]
struct FakeModel {
    staged: AtomicUsize,
    released: AtomicUsize,
    answers: HashMap<String, String>,
    fail_labels: Vec<&'static str>,
    fail_all_phases: bool,
    schemas: Mutex<Vec<Option<Value>>>,
}

impl FakeModel {
    fn with_answers(answers: &[(&str, &str)]) -> Self {
        Self {
            answers: answers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            ..Default::default()
        }
    }

    fn phase_answer(&self, prompt: &str) -> Result<String> {
        if self.fail_all_phases || self.fail_labels.iter().any(|l| prompt.contains(&format!("【{}】", l))) {
            return Err(CareSheetError::BackendUnavailable("model overloaded".to_string()));
        }
        let fields: Map<String, Value> = prompt
            .split("## 抽出項目リスト\n")
            .nth(1)
            .unwrap_or("")
            .lines()
            .filter_map(|line| line.strip_prefix("- "))
            .map(|line| line.split(" (選択肢").next().unwrap().to_string())
            .map(|name| {
                let value = self.answers.get(&name).cloned().unwrap_or_else(|| "値".to_string());
                (name, Value::String(value))
            })
            .collect();
        Ok(Value::Object(fields).to_string())
    }
}

#[async_trait]
impl ExtractionBackend for FakeModel {
    async fn stage(&self, path: &Path, mime_type: &str, display_name: &str) -> Result<RemoteDocument> {
        assert!(path.exists(), "staged file must exist on disk");
        let n = self.staged.fetch_add(1, Ordering::SeqCst);
        Ok(RemoteDocument {
            uri: format!("mem://files/{}", n),
            name: format!("files/{}", n),
            display_name: display_name.to_string(),
            mime_type: mime_type.to_string(),
            state: "ACTIVE".to_string(),
        })
    }

    async fn generate(&self, _files: &[RemoteDocument], prompt: &str, schema: Option<&Value>) -> Result<String> {
        self.schemas.lock().unwrap().push(schema.cloned());
        let answer = if prompt.contains("## 抽出項目リスト") {
            return self.phase_answer(prompt);
        } else if prompt.contains("ジェノグラム") {
            json!({"nodes": [{"id": "1", "name": "山田花子", "relation": "本人"}], "edges": []})
        } else if prompt.contains("身体状況") {
            json!({"findings": [{"part": "右膝", "condition": "関節痛", "note": "歩行時"}]})
        } else if prompt.contains("qa_pairs") {
            json!({"qa_pairs": [{"question": "食事は取れていますか", "answer": "はい"}]})
        } else if prompt.contains("meeting_date") {
            json!({
                "meeting_date": "2025年10月6日 8:30～8:40",
                "place": "第一会議室",
                "participants": "武島、加藤",
                "agenda": "①現に抱える処遇困難ケースについて●",
                "support_24h": "特になし",
                "sharing_matters": "■利用者情報共有\n〇宮城様 退所後の生活"
            })
        } else {
            json!({
                "開催日": "2025-10-06",
                "開催場所": "自宅",
                "利用者名": "山田花子",
                "参加者": "本人、長女",
                "結論": "・通所介護を週2回継続"
            })
        };
        Ok(format!("```json\n{}\n```", answer))
    }

    async fn release(&self, _document: &RemoteDocument) -> Result<()> {
        self.released.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
struct FakeSpreadsheet {
    /// Worksheet title → cell → value. Titles keep their order.
    worksheets: Vec<(String, HashMap<String, String>)>,
    /// Worksheet title → rows, 1-based row n at index n - 1.
    rows: HashMap<String, Vec<Vec<String>>>,
}

impl FakeSpreadsheet {
    fn with_worksheets(titles: &[&str]) -> Self {
        Self {
            worksheets: titles.iter().map(|t| (t.to_string(), HashMap::new())).collect(),
            rows: HashMap::new(),
        }
    }

    fn with_row(mut self, worksheet: &str, row: u32, values: &[&str]) -> Self {
        let rows = self.rows.entry(worksheet.to_string()).or_default();
        while rows.len() < row as usize {
            rows.push(Vec::new());
        }
        rows[row as usize - 1] = values.iter().map(|v| v.to_string()).collect();
        self
    }

    fn cells_mut(&mut self, worksheet: &str) -> Result<&mut HashMap<String, String>> {
        self.worksheets
            .iter_mut()
            .find(|(title, _)| title == worksheet)
            .map(|(_, cells)| cells)
            .ok_or_else(|| CareSheetError::Spreadsheet(format!("no worksheet {}", worksheet)))
    }
}

#[derive(Default)]
struct SheetsState {
    spreadsheets: HashMap<String, FakeSpreadsheet>,
    copies: Vec<(String, String, Option<String>)>,
    batch_calls: usize,
    cell_calls: usize,
    cleared: Vec<String>,
    fail_batch: bool,
    fail_cells: HashSet<String>,
    fail_read_row: Option<u32>,
}

#[derive(Default)]
struct FakeSheets {
    state: Mutex<SheetsState>,
}

impl FakeSheets {
    fn with(spreadsheets: Vec<(&str, FakeSpreadsheet)>) -> Self {
        let sheets = Self::default();
        sheets.state.lock().unwrap().spreadsheets = spreadsheets
            .into_iter()
            .map(|(id, s)| (id.to_string(), s))
            .collect();
        sheets
    }

    fn cell(&self, id: &str, worksheet: &str, cell: &str) -> Option<String> {
        let state = self.state.lock().unwrap();
        let spreadsheet = state.spreadsheets.get(id)?;
        let (_, cells) = spreadsheet.worksheets.iter().find(|(t, _)| t == worksheet)?;
        cells.get(cell).cloned()
    }

    fn rows(&self, id: &str, worksheet: &str) -> Vec<Vec<String>> {
        let state = self.state.lock().unwrap();
        state
            .spreadsheets
            .get(id)
            .and_then(|s| s.rows.get(worksheet))
            .cloned()
            .unwrap_or_default()
    }

    fn copy_ids(&self) -> Vec<String> {
        (1..=self.state.lock().unwrap().copies.len())
            .map(|n| format!("copy-{}", n))
            .collect()
    }
}

#[async_trait]
impl SpreadsheetBackend for FakeSheets {
    async fn open(&self, spreadsheet_id: &str) -> Result<SpreadsheetInfo> {
        let state = self.state.lock().unwrap();
        let spreadsheet = state
            .spreadsheets
            .get(spreadsheet_id)
            .ok_or_else(|| CareSheetError::Spreadsheet(format!("no spreadsheet {}", spreadsheet_id)))?;
        Ok(SpreadsheetInfo {
            id: spreadsheet_id.to_string(),
            url: format!("https://sheets.test/{}", spreadsheet_id),
            worksheets: spreadsheet.worksheets.iter().map(|(t, _)| t.clone()).collect(),
        })
    }

    async fn create_worksheet(&self, spreadsheet_id: &str, title: &str, header: &[String]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let spreadsheet = state.spreadsheets.entry(spreadsheet_id.to_string()).or_default();
        spreadsheet.worksheets.push((title.to_string(), HashMap::new()));
        if !header.is_empty() {
            spreadsheet.rows.insert(title.to_string(), vec![header.to_vec()]);
        }
        Ok(())
    }

    async fn read_row(&self, spreadsheet_id: &str, worksheet: &str, row: u32) -> Result<Vec<String>> {
        if self.state.lock().unwrap().fail_read_row == Some(row) {
            return Err(CareSheetError::Spreadsheet("read timed out".to_string()));
        }
        Ok(self
            .rows(spreadsheet_id, worksheet)
            .get(row as usize - 1)
            .cloned()
            .unwrap_or_default())
    }

    async fn batch_write(&self, spreadsheet_id: &str, worksheet: &str, cells: &[CellWrite]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.batch_calls += 1;
        if state.fail_batch {
            return Err(CareSheetError::Spreadsheet("quota exceeded".to_string()));
        }
        let spreadsheet = state
            .spreadsheets
            .get_mut(spreadsheet_id)
            .ok_or_else(|| CareSheetError::Spreadsheet("no spreadsheet".to_string()))?;
        let target = spreadsheet.cells_mut(worksheet)?;
        for cell in cells {
            target.insert(cell.cell.clone(), cell.value.clone());
        }
        Ok(())
    }

    async fn write_cell(&self, spreadsheet_id: &str, worksheet: &str, cell: &CellWrite) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.cell_calls += 1;
        if state.fail_cells.contains(&cell.cell) {
            return Err(CareSheetError::Spreadsheet(format!("protected cell {}", cell.cell)));
        }
        let spreadsheet = state
            .spreadsheets
            .get_mut(spreadsheet_id)
            .ok_or_else(|| CareSheetError::Spreadsheet("no spreadsheet".to_string()))?;
        spreadsheet
            .cells_mut(worksheet)?
            .insert(cell.cell.clone(), cell.value.clone());
        Ok(())
    }

    async fn append_row(&self, spreadsheet_id: &str, worksheet: &str, values: &[String]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let spreadsheet = state
            .spreadsheets
            .get_mut(spreadsheet_id)
            .ok_or_else(|| CareSheetError::Spreadsheet("no spreadsheet".to_string()))?;
        spreadsheet
            .rows
            .entry(worksheet.to_string())
            .or_default()
            .push(values.to_vec());
        Ok(())
    }

    async fn copy_file(&self, template_id: &str, name: &str, folder_id: Option<&str>) -> Result<CopiedFile> {
        let mut state = self.state.lock().unwrap();
        let template = state
            .spreadsheets
            .get(template_id)
            .cloned()
            .ok_or_else(|| CareSheetError::Spreadsheet(format!("no template {}", template_id)))?;
        state
            .copies
            .push((template_id.to_string(), name.to_string(), folder_id.map(str::to_string)));
        let id = format!("copy-{}", state.copies.len());
        state.spreadsheets.insert(id.clone(), template);
        Ok(CopiedFile {
            url: format!("https://sheets.test/{}", id),
            id,
        })
    }

    async fn clear_validation(&self, _spreadsheet_id: &str, _worksheet: &str, cells: &[String]) -> Result<()> {
        self.state.lock().unwrap().cleared.extend(cells.iter().cloned());
        Ok(())
    }
}

#[derive(Default)]
struct FakeArchive {
    archived: Mutex<Vec<(String, String)>>,
    fail: bool,
}

#[async_trait]
impl FileArchive for FakeArchive {
    async fn archive(&self, _data: &[u8], file_name: &str, _mime_type: &str, folder_id: &str) -> Result<Option<String>> {
        if self.fail {
            return Err(CareSheetError::Storage("drive is read-only".to_string()));
        }
        self.archived
            .lock()
            .unwrap()
            .push((file_name.to_string(), folder_id.to_string()));
        Ok(Some(format!("https://drive.test/{}", file_name)))
    }
}

fn recording(name: &str) -> InputFile {
    InputFile::new(vec![0, 1, 2, 3], None, name)
}

fn mapping_file(text: &str) -> tempfile::NamedTempFile {
    let file = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(file.path(), text).unwrap();
    file
}

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

const SEVEN_PHASE_MAPPING: &str =
    "利用者氏名：C5\n主治医：C20\n歩行：D30\n認知症の有無：D40\nサービス利用状況：E50\n家族の意向：F60\n備考：G70";

#[tokio::test]
async fn test_phase_failure_keeps_sibling_fields() {
    let model = Arc::new(FakeModel {
        fail_labels: vec!["身体機能・ADL"],
        ..Default::default()
    });
    let extractor = Extractor::new(model.clone()).with_retry_policy(RetryPolicy::immediate(1));
    let schema = MappingSchema::parse(SEVEN_PHASE_MAPPING);

    let report = extractor
        .extract(&[recording("a.m4a"), recording("b.pdf")], &schema)
        .await
        .unwrap();

    assert_eq!(report.phases.len(), 7);
    assert_eq!(report.failed_phases(), 1);
    assert!(!report.all_failed());
    assert_eq!(report.record.get("歩行"), None);
    for field in ["利用者氏名", "主治医", "認知症の有無", "サービス利用状況", "家族の意向", "備考"] {
        assert_eq!(report.record.get(field), Some("値"), "{}", field);
    }
    assert_eq!(model.staged.load(Ordering::SeqCst), 2);
    assert_eq!(model.released.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_every_staged_file_released_when_all_phases_fail() {
    let model = Arc::new(FakeModel {
        fail_all_phases: true,
        ..Default::default()
    });
    let extractor = Extractor::new(model.clone()).with_retry_policy(RetryPolicy::immediate(1));

    let report = extractor
        .extract(
            &[recording("a.m4a"), recording("b.jpg"), recording("c.pdf")],
            &MappingSchema::parse(SEVEN_PHASE_MAPPING),
        )
        .await
        .unwrap();

    assert!(report.all_failed());
    assert!(report.record.is_empty());
    assert_eq!(model.staged.load(Ordering::SeqCst), 3);
    assert_eq!(model.released.load(Ordering::SeqCst), 3);
}

// ---------------------------------------------------------------------------
// Cell writes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_end_to_end_mapping_write() {
    let sheets = Arc::new(FakeSheets::with(vec![("s1", FakeSpreadsheet::with_worksheets(&["シート1"]))]));
    let writer = CellWriter::new(sheets.clone());
    let schema = MappingSchema::parse("開催場所：B2（会議室A、会議室B）\n担当者：C2");

    let report = writer
        .write("s1", "シート1", &json!({"開催場所": "会議室A", "担当者": "山田"}), &schema)
        .await
        .unwrap();

    assert_eq!(report.queued, 2);
    assert!(report.failed_cells.is_empty());
    assert_eq!(sheets.cell("s1", "シート1", "B2").as_deref(), Some("会議室A"));
    assert_eq!(sheets.cell("s1", "シート1", "C2").as_deref(), Some("山田"));
    assert_eq!(sheets.state.lock().unwrap().batch_calls, 1);
}

#[tokio::test]
async fn test_batch_failure_falls_back_to_each_cell() {
    let sheets = Arc::new(FakeSheets::with(vec![("s1", FakeSpreadsheet::with_worksheets(&["シート1"]))]));
    {
        let mut state = sheets.state.lock().unwrap();
        state.fail_batch = true;
        state.fail_cells.insert("D4".to_string());
    }
    let writer = CellWriter::new(sheets.clone());
    let schema = MappingSchema::parse("氏名：B2\n住所：B3\n電話番号：D4");

    let report = writer
        .write(
            "s1",
            "シート1",
            &json!({"氏名": "山田花子", "住所": "仙台市", "電話番号": "022-000-0000"}),
            &schema,
        )
        .await
        .unwrap();

    assert_eq!(report.queued, 3);
    assert_eq!(report.written(), 2);
    assert_eq!(report.failed_cells, vec!["D4"]);
    let state = sheets.state.lock().unwrap();
    assert_eq!(state.batch_calls, 1);
    assert_eq!(state.cell_calls, 3);
}

#[tokio::test]
async fn test_write_to_missing_worksheet_is_rejected() {
    let sheets = Arc::new(FakeSheets::with(vec![("s1", FakeSpreadsheet::with_worksheets(&["シート1"]))]));
    let writer = CellWriter::new(sheets.clone());

    let result = writer
        .write("s1", "存在しない", &json!({"氏名": "山田"}), &MappingSchema::parse("氏名：B2"))
        .await;
    assert!(matches!(result, Err(CareSheetError::WorksheetNotFound { .. })));

    let result = writer
        .write("s1", "シート1", &json!({"氏名": "山田"}), &MappingSchema::default())
        .await;
    assert!(matches!(result, Err(CareSheetError::MappingNotLoaded)));
}

// ---------------------------------------------------------------------------
// Row appends
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_missing_log_worksheet_created_with_default_header() {
    let sheets = Arc::new(FakeSheets::with(vec![("log", FakeSpreadsheet::with_worksheets(&["Sheet1"]))]));
    let writer = RowWriter::new(sheets.clone());

    let result = writer
        .append_row(
            "log",
            None,
            &json!({"開催場所": "自宅", "利用者名": "山田花子"}),
            &RowOverrides {
                date: Some("2025/10/06".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert!(result.success);
    let rows = sheets.rows("log", DEFAULT_WORKSHEET);
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0][0], "開催日");
    assert_eq!(rows[1][0], "2025年10月6日（月）");
    assert_eq!(rows[1][1], "自宅");
    assert_eq!(rows[1][5], "山田花子");
    assert_eq!(result.write_count, 3);
}

#[tokio::test]
async fn test_worksheet_without_header_is_an_error() {
    let sheets = Arc::new(FakeSheets::with(vec![(
        "log",
        FakeSpreadsheet::with_worksheets(&["記録"]),
    )]));
    let writer = RowWriter::new(sheets.clone());

    let result = writer
        .append_row("log", Some("記録"), &json!({"開催場所": "自宅"}), &RowOverrides::default())
        .await;
    assert!(matches!(result, Err(CareSheetError::MissingHeader(ref w)) if w == "記録"));
    assert!(sheets.rows("log", "記録").is_empty());
}

#[tokio::test]
async fn test_management_row_prefers_explicit_date() {
    let sheets = Arc::new(FakeSheets::with(vec![(
        "log",
        FakeSpreadsheet::with_worksheets(&[DEFAULT_WORKSHEET]).with_row(
            DEFAULT_WORKSHEET,
            1,
            &["日時", "場所", "参加者", "議題"],
        ),
    )]));
    let writer = RowWriter::new(sheets.clone());

    writer
        .append_management_row(
            "log",
            None,
            &json!({"meeting_date": "令和7年10月1日", "place": "第一会議室", "participants": "武島、加藤"}),
            &RowOverrides {
                date: Some("2025-10-06".to_string()),
                time: Some("8:30～8:40".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let rows = sheets.rows("log", DEFAULT_WORKSHEET);
    assert_eq!(
        rows[1],
        vec!["2025年10月6日（月） 8:30～8:40", "第一会議室", "武島、加藤", ""]
    );
}

// ---------------------------------------------------------------------------
// Documents and the service facade
// ---------------------------------------------------------------------------

struct Fixture {
    service: CareSheetService,
    model: Arc<FakeModel>,
    sheets: Arc<FakeSheets>,
    archive: Arc<FakeArchive>,
    _mappings: (tempfile::NamedTempFile, tempfile::NamedTempFile),
}

fn fixture(model: FakeModel, archive: FakeArchive, spreadsheets: Vec<(&str, FakeSpreadsheet)>) -> Fixture {
    let part_one = mapping_file("利用者氏名：C5\n性別：H5（男、女）\n主治医：C20");
    let part_two = mapping_file("課題_ADL：D6\n課題_認知：D8");

    let config = ServiceConfig {
        assessment_mapping: Some(part_one.path().to_path_buf()),
        assessment_mapping_part_two: Some(part_two.path().to_path_buf()),
        assessment_template_id: Some("tmpl-assessment".to_string()),
        assessment_folder_id: Some("folder-a".to_string()),
        service_meeting: MeetingDocumentConfig {
            folder_id: Some("folder-s".to_string()),
            template_id: Some("tmpl-service".to_string()),
            log_id: Some("log-service".to_string()),
        },
        management_meeting: MeetingDocumentConfig {
            folder_id: Some("folder-m".to_string()),
            template_id: None,
            log_id: Some("log-management".to_string()),
        },
        ..ServiceConfig::default()
    };

    let model = Arc::new(model);
    let sheets = Arc::new(FakeSheets::with(spreadsheets));
    let archive = Arc::new(archive);
    let service = CareSheetService::new(config, model.clone(), sheets.clone(), Arc::new(MemoryObjectStore::new()))
        .with_archive(archive.clone());

    Fixture {
        service,
        model,
        sheets,
        archive,
        _mappings: (part_one, part_two),
    }
}

fn standard_spreadsheets() -> Vec<(&'static str, FakeSpreadsheet)> {
    vec![
        (
            "tmpl-assessment",
            FakeSpreadsheet::with_worksheets(&["アセスメントシート", "課題分析"]),
        ),
        (
            "tmpl-service",
            FakeSpreadsheet::with_worksheets(&["要点"]).with_row("要点", 6, &["", "本人", "長女", "訪問介護 田中"]),
        ),
        ("log-service", FakeSpreadsheet::with_worksheets(&["Sheet1"])),
        ("log-management", FakeSpreadsheet::with_worksheets(&["Sheet1"])),
    ]
}

async fn wait_for_artifact(service: &CareSheetService, id: uuid::Uuid, kind: ArtifactKind) -> Option<Value> {
    for _ in 0..100 {
        if let Some(value) = service.artifact(id, kind).await.unwrap() {
            return Some(value);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    None
}

#[tokio::test]
async fn test_assessment_analysis_with_background_artifacts() {
    let fx = fixture(
        FakeModel::with_answers(&[("利用者氏名", "山田花子"), ("性別", "女")]),
        FakeArchive::default(),
        standard_spreadsheets(),
    );

    let response = fx
        .service
        .analyze(vec![recording("面談.m4a")], AnalysisType::Assessment)
        .await;

    assert!(response.success, "{:?}", response.error);
    let data = response.data.unwrap();
    assert_eq!(data["利用者氏名"], "山田花子");
    assert_eq!(data["課題_ADL"], "値");
    assert_eq!(fx.model.staged.load(Ordering::SeqCst), fx.model.released.load(Ordering::SeqCst));
    // assessments are never archived
    assert!(fx.archive.archived.lock().unwrap().is_empty());

    let id = response.artifact_id.unwrap();
    let genogram = wait_for_artifact(&fx.service, id, ArtifactKind::Genogram).await.unwrap();
    assert_eq!(genogram["nodes"][0]["name"], "山田花子");
    let bodymap = wait_for_artifact(&fx.service, id, ArtifactKind::BodyMap).await.unwrap();
    assert_eq!(bodymap["findings"][0]["part"], "右膝");
}

#[tokio::test]
async fn test_assessment_fails_when_every_phase_fails() {
    let fx = fixture(
        FakeModel {
            fail_all_phases: true,
            ..Default::default()
        },
        FakeArchive::default(),
        standard_spreadsheets(),
    );

    let response = fx
        .service
        .analyze(vec![recording("面談.m4a")], AnalysisType::Assessment)
        .await;

    assert!(!response.success);
    assert!(response.error.unwrap().contains("model overloaded"));
    assert!(response.artifact_id.is_none());
}

#[tokio::test]
async fn test_service_meeting_analysis_archives_and_adds_conclusion() {
    let fx = fixture(FakeModel::default(), FakeArchive::default(), standard_spreadsheets());

    let response = fx
        .service
        .analyze(vec![recording("会議.m4a")], AnalysisType::ServiceMeeting)
        .await;

    assert!(response.success, "{:?}", response.error);
    let conclusion = response.data.unwrap()["結論"].as_str().unwrap().to_string();
    assert!(conclusion.starts_with("・通所介護を週2回継続"));
    assert!(conclusion.ends_with(MANDATORY_CONCLUSION));

    let archived = fx.archive.archived.lock().unwrap();
    assert_eq!(archived.len(), 1);
    assert!(archived[0].0.ends_with("_会議.m4a"));
    assert_eq!(archived[0].1, "folder-s");
}

#[tokio::test]
async fn test_archive_failure_does_not_fail_analysis() {
    let fx = fixture(
        FakeModel::default(),
        FakeArchive {
            fail: true,
            ..Default::default()
        },
        standard_spreadsheets(),
    );

    let response = fx
        .service
        .analyze(vec![recording("運営会議.m4a")], AnalysisType::ManagementMeeting)
        .await;

    assert!(response.success);
    assert_eq!(response.data.unwrap()["place"], "第一会議室");
}

#[tokio::test]
async fn test_qa_and_direct_derivations() {
    let fx = fixture(FakeModel::default(), FakeArchive::default(), standard_spreadsheets());

    let qa = fx.service.analyze(vec![recording("相談.pdf")], AnalysisType::Qa).await;
    let pairs: QaPairs = serde_json::from_value(qa.data.unwrap()).unwrap();
    assert_eq!(pairs.qa_pairs[0].answer, "はい");
    let schemas = fx.model.schemas.lock().unwrap().clone();
    let qa_schema = schemas.last().cloned().flatten().expect("Q&A call carries a response schema");
    assert!(qa_schema["properties"]["qa_pairs"].is_object());

    let genogram = fx.service.generate_genogram("長女と同居").await;
    assert!(genogram.success);
    assert!(genogram.data.unwrap()["edges"].as_array().unwrap().is_empty());

    let empty = fx.service.analyze(Vec::new(), AnalysisType::Qa).await;
    assert!(!empty.success);
}

#[tokio::test]
async fn test_stored_upload_can_be_analyzed() {
    let fx = fixture(FakeModel::default(), FakeArchive::default(), standard_spreadsheets());

    let key = fx
        .service
        .upload_direct(vec![9, 9, 9], "相談記録.pdf", Some("application/pdf"))
        .await
        .unwrap();
    assert!(key.starts_with("uploads/") && key.ends_with(".pdf"));

    let response = fx.service.analyze_stored(&key, AnalysisType::Qa).await;
    assert!(response.success);

    let missing = fx.service.analyze_stored("uploads/none.pdf", AnalysisType::Qa).await;
    assert!(!missing.success);
}

#[tokio::test]
async fn test_assessment_document_writes_both_worksheets() {
    let fx = fixture(FakeModel::default(), FakeArchive::default(), standard_spreadsheets());

    let mut request = WriteRequest::new(
        json!({"利用者氏名": "山田花子", "性別": "女", "課題_ADL": "入浴に介助が必要", "課題_認知": "（空白）"}),
        WriteMode::Document,
    );
    request.mapping_type = MappingType::Assessment;
    let result = fx.service.write(request).await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.spreadsheet_id.as_deref(), Some("copy-1"));
    assert_eq!(result.write_count, 3);
    assert_eq!(fx.sheets.cell("copy-1", "アセスメントシート", "C5").as_deref(), Some("山田花子"));
    assert_eq!(fx.sheets.cell("copy-1", "課題分析", "D6").as_deref(), Some("入浴に介助が必要"));
    assert_eq!(fx.sheets.cell("copy-1", "課題分析", "D8"), None);

    let state = fx.sheets.state.lock().unwrap();
    let (template, name, folder) = &state.copies[0];
    assert_eq!(template, "tmpl-assessment");
    assert!(name.starts_with("アセスメントシート_山田花子_"));
    assert_eq!(folder.as_deref(), Some("folder-a"));
}

#[tokio::test]
async fn test_second_worksheet_failure_keeps_document() {
    let mut spreadsheets = standard_spreadsheets();
    spreadsheets[0].1 = FakeSpreadsheet::with_worksheets(&["アセスメントシート"]);
    let fx = fixture(FakeModel::default(), FakeArchive::default(), spreadsheets);

    let result = fx
        .service
        .write(WriteRequest::new(
            json!({"利用者氏名": "山田花子", "課題_ADL": "入浴に介助が必要"}),
            WriteMode::Document,
        ))
        .await;

    assert!(result.success);
    assert_eq!(result.sheet_url.as_deref(), Some("https://sheets.test/copy-1"));
    assert!(result.error.unwrap().contains("課題分析"));
    assert_eq!(fx.sheets.cell("copy-1", "アセスメントシート", "C5").as_deref(), Some("山田花子"));
}

#[tokio::test]
async fn test_service_meeting_fans_out_to_log_and_document() {
    let fx = fixture(FakeModel::default(), FakeArchive::default(), standard_spreadsheets());

    let mut request = WriteRequest::new(
        json!({
            "利用者名": "山田花子",
            "開催日": "2025-10-01",
            "開催場所": "事業所",
            "参加者": "本人、長女、訪問介護",
            "結論": "・通所介護を週2回継続"
        }),
        WriteMode::Document,
    );
    request.meeting_type = Some(MeetingType::ServiceMeeting);
    request.overrides.date = Some("2025-10-06".to_string());
    let result = fx.service.write(request).await;

    assert!(result.success, "{:?}", result.error);
    let copy = fx.sheets.copy_ids().pop().unwrap();
    assert_eq!(result.spreadsheet_id.as_deref(), Some(copy.as_str()));
    assert_eq!(result.sheet_url, Some(format!("https://sheets.test/{}", copy)));

    let log = fx.sheets.rows("log-service", DEFAULT_WORKSHEET);
    assert_eq!(log.len(), 2);
    assert_eq!(log[1][0], "2025年10月6日（月）");

    assert_eq!(fx.sheets.cell(&copy, "要点", "C4").as_deref(), Some("2025-10-06"));
    assert_eq!(
        fx.sheets.cell(&copy, "要点", "H4").as_deref(),
        Some("□自宅 ■事業所 □病院 □その他")
    );
    for cell in ["B7", "C7", "D7"] {
        assert_eq!(fx.sheets.cell(&copy, "要点", cell).as_deref(), Some("○"), "{}", cell);
    }
    assert!(fx.sheets.state.lock().unwrap().cleared.contains(&"H4".to_string()));
}

#[tokio::test]
async fn test_unreadable_attendance_header_still_returns_copy() {
    let fx = fixture(FakeModel::default(), FakeArchive::default(), standard_spreadsheets());
    fx.sheets.state.lock().unwrap().fail_read_row = Some(6);

    let mut request = WriteRequest::new(
        json!({
            "利用者名": "山田花子",
            "開催日": "2025-10-01",
            "開催場所": "事業所",
            "参加者": "本人、長女"
        }),
        WriteMode::Document,
    );
    request.meeting_type = Some(MeetingType::ServiceMeeting);
    let result = fx.service.write(request).await;

    assert!(result.success, "{:?}", result.error);
    let copy = fx.sheets.copy_ids().pop().unwrap();
    assert_eq!(result.spreadsheet_id.as_deref(), Some(copy.as_str()));
    assert_eq!(result.sheet_url, Some(format!("https://sheets.test/{}", copy)));
    assert!(result.error.unwrap().contains("attendance"));

    assert_eq!(
        fx.sheets.cell(&copy, "要点", "H4").as_deref(),
        Some("□自宅 ■事業所 □病院 □その他")
    );
    assert_ne!(fx.sheets.cell(&copy, "要点", "B7").as_deref(), Some("○"));
}

#[tokio::test]
async fn test_management_meeting_without_template_appends_only() {
    let fx = fixture(FakeModel::default(), FakeArchive::default(), standard_spreadsheets());

    let mut request = WriteRequest::new(
        json!({"meeting_date": "2025-10-06", "place": "第一会議室", "participants": "武島、加藤"}),
        WriteMode::Document,
    );
    request.meeting_type = Some(MeetingType::ManagementMeeting);
    let result = fx.service.write(request).await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.spreadsheet_id.as_deref(), Some("log-management"));
    assert!(fx.sheets.copy_ids().is_empty());
    let log = fx.sheets.rows("log-management", DEFAULT_WORKSHEET);
    assert_eq!(log[0], MANAGEMENT_LOG_HEADERS.iter().map(|h| h.to_string()).collect::<Vec<_>>());
    assert_eq!(log[1][1], "第一会議室");
}

#[tokio::test]
async fn test_mapping_write_requires_target() {
    let fx = fixture(FakeModel::default(), FakeArchive::default(), standard_spreadsheets());

    let result = fx
        .service
        .write(WriteRequest::new(json!({"利用者氏名": "山田花子"}), WriteMode::Mapping))
        .await;
    assert!(!result.success);
    assert!(result.error.unwrap().contains("spreadsheet_id"));
}
