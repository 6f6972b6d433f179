//! The two request contracts: "files + analysis type → result" and
//! "record + target → write result".

use crate::config::ServiceConfig;
use crate::documents::{AttendanceMatrix, DocumentBuilder, DocumentKind, DocumentPlan, MeetingFanOut, MeetingTarget, MeetingType, WriteTarget};
use crate::error::{CareSheetError, Result};
use crate::llm::extractor::{ExtractionBackend, Extractor, InputFile};
use crate::llm::prompts::{MANAGEMENT_MEETING_PROMPT, MEETING_SUMMARY_PROMPT, QA_PROMPT, SERVICE_MEETING_PROMPT};
use crate::mapping::MappingSchema;
use crate::schema::{ensure_mandatory_conclusion, gemini_response_schema, ManagementMeetingSummary, QaPairs, ServiceMeetingSummary};
use crate::sheets::{CellWriter, RowOverrides, RowWriter, SpreadsheetBackend, WriteResult};
use crate::storage::{archive_name, spawn_derivations, ArtifactKind, ArtifactStore, FileArchive, ObjectStore, PresignedUpload};
use chrono::Local;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

/// Worksheet the second assessment schema is written to.
pub const ASSESSMENT_PART_TWO_WORKSHEET: &str = "課題分析";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisType {
    Assessment,
    Meeting,
    ServiceMeeting,
    ManagementMeeting,
    Qa,
}

impl AnalysisType {
    /// Meeting analyses archive their source files.
    pub fn meeting_type(self) -> Option<MeetingType> {
        match self {
            AnalysisType::Meeting | AnalysisType::ServiceMeeting => Some(MeetingType::ServiceMeeting),
            AnalysisType::ManagementMeeting => Some(MeetingType::ManagementMeeting),
            AnalysisType::Assessment | AnalysisType::Qa => None,
        }
    }
}

impl FromStr for AnalysisType {
    type Err = CareSheetError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "assessment" => Ok(AnalysisType::Assessment),
            "meeting" => Ok(AnalysisType::Meeting),
            "service_meeting" => Ok(AnalysisType::ServiceMeeting),
            "management_meeting" => Ok(AnalysisType::ManagementMeeting),
            "qa" => Ok(AnalysisType::Qa),
            other => Err(CareSheetError::InvalidRequest(format!("Unknown analysis type: {}", other))),
        }
    }
}

impl fmt::Display for AnalysisType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AnalysisType::Assessment => "assessment",
            AnalysisType::Meeting => "meeting",
            AnalysisType::ServiceMeeting => "service_meeting",
            AnalysisType::ManagementMeeting => "management_meeting",
            AnalysisType::Qa => "qa",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalyzeResponse {
    pub success: bool,
    pub data: Option<Value>,
    pub error: Option<String>,
    /// Id under which background artifacts will appear.
    pub artifact_id: Option<Uuid>,
}

impl AnalyzeResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            ..Self::default()
        }
    }

    pub fn failure(error: impl ToString) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingType {
    #[default]
    Assessment,
    AssessmentPartTwo,
    ServiceMeeting,
    ManagementMeeting,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Fixed cells of an existing spreadsheet.
    #[default]
    Mapping,
    /// One row appended to a log.
    Append,
    /// A new document copied from a template.
    Document,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteRequest {
    #[serde(default)]
    pub spreadsheet_id: Option<String>,
    #[serde(default)]
    pub sheet_name: Option<String>,
    pub data: Value,
    #[serde(default)]
    pub mapping_type: MappingType,
    #[serde(default)]
    pub write_mode: WriteMode,
    #[serde(default)]
    pub meeting_type: Option<MeetingType>,
    #[serde(flatten)]
    pub overrides: RowOverrides,
}

impl WriteRequest {
    pub fn new(data: Value, write_mode: WriteMode) -> Self {
        Self {
            spreadsheet_id: None,
            sheet_name: None,
            data,
            mapping_type: MappingType::default(),
            write_mode,
            meeting_type: None,
            overrides: RowOverrides::default(),
        }
    }
}

struct Schemas {
    assessment: Arc<MappingSchema>,
    assessment_part_two: Arc<MappingSchema>,
    /// Both assessment sheets, the field set extraction asks for.
    extraction: Arc<MappingSchema>,
    service_meeting: Arc<MappingSchema>,
    management_meeting: Arc<MappingSchema>,
}

pub struct CareSheetService {
    config: ServiceConfig,
    extractor: Extractor,
    sheets: Arc<dyn SpreadsheetBackend>,
    objects: Arc<dyn ObjectStore>,
    archive: Option<Arc<dyn FileArchive>>,
    artifacts: ArtifactStore,
    schemas: Schemas,
    cells: CellWriter,
    rows: RowWriter,
    documents: DocumentBuilder,
    meetings: MeetingFanOut,
}

impl CareSheetService {
    pub fn new(
        config: ServiceConfig,
        extraction: Arc<dyn ExtractionBackend>,
        sheets: Arc<dyn SpreadsheetBackend>,
        objects: Arc<dyn ObjectStore>,
    ) -> Self {
        let assessment = Arc::new(config.assessment_schema());
        let assessment_part_two = Arc::new(config.assessment_part_two_schema());
        let schemas = Schemas {
            extraction: Arc::new(assessment.merged(&assessment_part_two)),
            assessment,
            assessment_part_two,
            service_meeting: Arc::new(MappingSchema::service_meeting_document()),
            management_meeting: Arc::new(MappingSchema::management_meeting_document()),
        };

        let meeting_target = |meeting_type: MeetingType, schema: &Arc<MappingSchema>| {
            let located = config.meeting(meeting_type);
            MeetingTarget {
                master_log_id: located.log_id.clone(),
                master_worksheet: None,
                template_id: located.template_id.clone(),
                folder_id: located.folder_id.clone(),
                schema: Arc::clone(schema),
                attendance: match meeting_type {
                    MeetingType::ServiceMeeting => Some(AttendanceMatrix::default()),
                    MeetingType::ManagementMeeting => None,
                },
            }
        };
        let meetings = MeetingFanOut::new(
            Arc::clone(&sheets),
            meeting_target(MeetingType::ServiceMeeting, &schemas.service_meeting),
            meeting_target(MeetingType::ManagementMeeting, &schemas.management_meeting),
        );

        Self {
            extractor: Extractor::new(extraction).with_concurrency(config.extraction_concurrency),
            cells: CellWriter::new(Arc::clone(&sheets)),
            rows: RowWriter::new(Arc::clone(&sheets)),
            documents: DocumentBuilder::new(Arc::clone(&sheets)),
            meetings,
            sheets,
            objects,
            archive: None,
            artifacts: ArtifactStore::new(),
            schemas,
            config,
        }
    }

    pub fn with_archive(mut self, archive: Arc<dyn FileArchive>) -> Self {
        self.archive = Some(archive);
        self
    }

    /// Replaces the extractor, e.g. to change its retry policy.
    pub fn with_extractor(mut self, extractor: Extractor) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    pub fn spreadsheets(&self) -> Arc<dyn SpreadsheetBackend> {
        Arc::clone(&self.sheets)
    }

    /// Analyzes uploaded files. Never fails: errors are reported in the
    /// response.
    pub async fn analyze(&self, files: Vec<InputFile>, analysis: AnalysisType) -> AnalyzeResponse {
        if files.is_empty() {
            return AnalyzeResponse::failure(CareSheetError::InvalidRequest("no files supplied".to_string()));
        }
        info!("Analyzing {} file(s) as {}", files.len(), analysis);

        match analysis.meeting_type() {
            Some(meeting_type) => {
                let (_, response) = tokio::join!(
                    self.archive_sources(meeting_type, &files),
                    self.run_analysis(&files, analysis)
                );
                response
            }
            None => self.run_analysis(&files, analysis).await,
        }
    }

    /// Analyzes a file previously uploaded to the object store.
    pub async fn analyze_stored(&self, file_key: &str, analysis: AnalysisType) -> AnalyzeResponse {
        let data = match self.objects.get(file_key).await {
            Ok(data) => data,
            Err(e) => return AnalyzeResponse::failure(e),
        };
        let file_name = file_key.rsplit('/').next().unwrap_or(file_key).to_string();
        self.analyze(vec![InputFile::new(data, None, file_name)], analysis)
            .await
    }

    async fn run_analysis(&self, files: &[InputFile], analysis: AnalysisType) -> AnalyzeResponse {
        let result = match analysis {
            AnalysisType::Assessment => return self.analyze_assessment(files).await,
            AnalysisType::Meeting => self.extractor.run_prompt(files, MEETING_SUMMARY_PROMPT, None).await,
            AnalysisType::ServiceMeeting => self.analyze_service_meeting(files).await,
            AnalysisType::ManagementMeeting => {
                match gemini_response_schema::<ManagementMeetingSummary>() {
                    Ok(schema) => {
                        self.extractor
                            .run_prompt(files, MANAGEMENT_MEETING_PROMPT, Some(&schema))
                            .await
                    }
                    Err(e) => Err(e.into()),
                }
            }
            AnalysisType::Qa => match gemini_response_schema::<QaPairs>() {
                Ok(schema) => self.extractor.run_prompt(files, QA_PROMPT, Some(&schema)).await,
                Err(e) => Err(e.into()),
            },
        };

        match result {
            Ok(data) => AnalyzeResponse::ok(data),
            Err(e) => {
                warn!("{} analysis failed: {}", analysis, e);
                AnalyzeResponse::failure(e)
            }
        }
    }

    async fn analyze_assessment(&self, files: &[InputFile]) -> AnalyzeResponse {
        let report = match self.extractor.extract(files, &self.schemas.extraction).await {
            Ok(report) => report,
            Err(e) => return AnalyzeResponse::failure(e),
        };
        if report.all_failed() {
            return AnalyzeResponse::failure(CareSheetError::ExtractionFailed(
                report.error_summary().unwrap_or_default(),
            ));
        }

        let data = report.record.to_value();
        let derivations = spawn_derivations(self.extractor.clone(), self.artifacts.clone(), data.to_string());
        AnalyzeResponse {
            success: true,
            data: Some(data),
            error: report.error_summary(),
            artifact_id: Some(derivations.id),
        }
    }

    async fn analyze_service_meeting(&self, files: &[InputFile]) -> Result<Value> {
        let schema = gemini_response_schema::<ServiceMeetingSummary>()?;
        let mut data = self
            .extractor
            .run_prompt(files, SERVICE_MEETING_PROMPT, Some(&schema))
            .await?;
        if let Value::Object(map) = &mut data {
            ensure_mandatory_conclusion(map);
        }
        Ok(data)
    }

    /// Copies meeting sources to the meeting type's folder. Failures are
    /// logged and never affect the analysis.
    async fn archive_sources(&self, meeting_type: MeetingType, files: &[InputFile]) -> Vec<String> {
        let (Some(archive), Some(folder_id)) = (&self.archive, self.config.meeting(meeting_type).folder_id.as_deref()) else {
            return Vec::new();
        };

        let now = Local::now().naive_local();
        let mut links = Vec::new();
        for file in files {
            let name = archive_name(&file.file_name, now);
            match archive.archive(&file.data, &name, &file.mime_type, folder_id).await {
                Ok(Some(link)) => links.push(link),
                Ok(None) => {}
                Err(e) => warn!("Archiving '{}' failed: {}", file.file_name, e),
            }
        }
        info!("Archived {} of {} source file(s)", links.len(), files.len());
        links
    }

    pub async fn generate_genogram(&self, text: &str) -> AnalyzeResponse {
        self.derive_now(ArtifactKind::Genogram, text).await
    }

    pub async fn generate_bodymap(&self, text: &str) -> AnalyzeResponse {
        self.derive_now(ArtifactKind::BodyMap, text).await
    }

    async fn derive_now(&self, kind: ArtifactKind, text: &str) -> AnalyzeResponse {
        match self.extractor.run_text_prompt(&kind.prompt(text)).await {
            Ok(data) => AnalyzeResponse::ok(data),
            Err(e) => AnalyzeResponse::failure(e),
        }
    }

    /// `Ok(None)` until the background derivation has finished.
    pub async fn artifact(&self, id: Uuid, kind: ArtifactKind) -> Result<Option<Value>> {
        self.artifacts.get(id, kind).await
    }

    /// Upload URL for the browser. Unlike the other operations this fails
    /// outright.
    pub async fn presign(&self, file_name: &str, content_type: &str) -> Result<PresignedUpload> {
        self.objects.presign(file_name, content_type).await
    }

    /// Stores an upload passed through the backend and returns its key.
    pub async fn upload_direct(&self, data: Vec<u8>, file_name: &str, content_type: Option<&str>) -> Result<String> {
        let content_type = content_type
            .filter(|c| !c.trim().is_empty())
            .unwrap_or("application/octet-stream");
        let presigned = self.objects.presign(file_name, content_type).await?;
        self.objects
            .put(&presigned.file_key, data, content_type)
            .await?;
        Ok(presigned.file_key)
    }

    /// Writes a record. Never fails: errors are reported in the result.
    pub async fn write(&self, request: WriteRequest) -> WriteResult {
        let outcome = match request.write_mode {
            WriteMode::Mapping => self.write_mapped(&request).await,
            WriteMode::Append => self.write_append(&request).await,
            WriteMode::Document => Ok(self.write_document(&request).await),
        };
        outcome.unwrap_or_else(|e| {
            warn!("{:?} write failed: {}", request.write_mode, e);
            WriteResult::failure(e)
        })
    }

    fn mapping_schema(&self, mapping_type: MappingType) -> &Arc<MappingSchema> {
        match mapping_type {
            MappingType::Assessment => &self.schemas.assessment,
            MappingType::AssessmentPartTwo => &self.schemas.assessment_part_two,
            MappingType::ServiceMeeting => &self.schemas.service_meeting,
            MappingType::ManagementMeeting => &self.schemas.management_meeting,
        }
    }

    async fn write_mapped(&self, request: &WriteRequest) -> Result<WriteResult> {
        let spreadsheet_id = required(&request.spreadsheet_id, "spreadsheet_id")?;
        let worksheet = required(&request.sheet_name, "sheet_name")?;
        let schema = self.mapping_schema(request.mapping_type);

        let report = self
            .cells
            .write(spreadsheet_id, worksheet, &request.data, schema)
            .await?;

        let mut result = WriteResult {
            success: true,
            write_count: report.queued,
            spreadsheet_id: Some(spreadsheet_id.to_string()),
            ..WriteResult::default()
        };
        if !report.failed_cells.is_empty() {
            result.push_error(format!("failed cells: {}", report.failed_cells.join(", ")));
        }
        Ok(result)
    }

    async fn write_append(&self, request: &WriteRequest) -> Result<WriteResult> {
        let meeting_type = request.meeting_type.unwrap_or(MeetingType::ServiceMeeting);
        let spreadsheet_id = match non_empty(&request.spreadsheet_id) {
            Some(id) => id,
            None => self
                .config
                .meeting(meeting_type)
                .log_id
                .as_deref()
                .ok_or_else(|| CareSheetError::InvalidRequest("spreadsheet_id is required".to_string()))?,
        };
        let worksheet = non_empty(&request.sheet_name);

        match meeting_type {
            MeetingType::ServiceMeeting => {
                self.rows
                    .append_row(spreadsheet_id, worksheet, &request.data, &request.overrides)
                    .await
            }
            MeetingType::ManagementMeeting => {
                self.rows
                    .append_management_row(spreadsheet_id, worksheet, &request.data, &request.overrides)
                    .await
            }
        }
    }

    async fn write_document(&self, request: &WriteRequest) -> WriteResult {
        if let Some(meeting_type) = request.meeting_type {
            return self
                .meetings
                .write(meeting_type, &request.data, &request.overrides)
                .await;
        }

        let Some(template_id) = self.config.assessment_template_id.clone() else {
            return WriteResult::failure(CareSheetError::InvalidRequest(
                "no assessment template configured".to_string(),
            ));
        };
        let mut targets = vec![WriteTarget {
            worksheet: None,
            schema: Arc::clone(&self.schemas.assessment),
        }];
        if !self.schemas.assessment_part_two.is_empty() {
            targets.push(WriteTarget {
                worksheet: Some(ASSESSMENT_PART_TWO_WORKSHEET.to_string()),
                schema: Arc::clone(&self.schemas.assessment_part_two),
            });
        }

        let plan = DocumentPlan {
            kind: DocumentKind::Assessment,
            template_id,
            folder_id: self.config.assessment_folder_id.clone(),
            record: request.data.clone(),
            targets,
        };
        self.documents.create_and_write(&plan).await
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn required<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str> {
    non_empty(value).ok_or_else(|| CareSheetError::InvalidRequest(format!("{} is required", name)))
}
