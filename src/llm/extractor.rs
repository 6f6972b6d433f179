use crate::categorize::{categorize, FieldGroup, Phase};
use crate::error::{CareSheetError, Result};
use crate::llm::json::parse_model_json;
use crate::llm::prompts::synthesize;
use crate::llm::retry::{with_rate_limit_retry, RetryPolicy};
use crate::llm::types::*;
use crate::mapping::MappingSchema;
use crate::record::FlatRecord;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempPath;
use tokio::sync::mpsc::{error::TrySendError, Sender};

pub const DEFAULT_CONCURRENCY: usize = 3;

/// Generative backend that accepts staged files and answers prompts about them.
#[async_trait]
pub trait ExtractionBackend: Send + Sync {
    async fn stage(&self, path: &Path, mime_type: &str, display_name: &str)
        -> Result<RemoteDocument>;

    async fn generate(
        &self,
        files: &[RemoteDocument],
        prompt: &str,
        response_schema: Option<&Value>,
    ) -> Result<String>;

    async fn release(&self, document: &RemoteDocument) -> Result<()>;
}

/// One uploaded input: raw bytes plus its MIME type and original name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputFile {
    pub data: Vec<u8>,
    pub mime_type: String,
    pub file_name: String,
}

impl InputFile {
    /// Builds an input, inferring the MIME type from the file name when none
    /// (or `application/octet-stream`) was supplied. Unknown images fall back
    /// to `image/jpeg`.
    pub fn new(data: Vec<u8>, mime_type: Option<&str>, file_name: impl Into<String>) -> Self {
        let file_name = file_name.into();
        let mime_type = match mime_type.map(str::trim) {
            Some(m) if !m.is_empty() && m != "application/octet-stream" => m.to_string(),
            _ => infer_mime_type(&file_name),
        };
        Self {
            data,
            mime_type,
            file_name,
        }
    }

    fn staging_suffix(&self) -> &'static str {
        if self.mime_type.contains("audio") {
            ".m4a"
        } else if self.mime_type.contains("pdf") {
            ".pdf"
        } else if self.mime_type.contains("image") {
            ".jpg"
        } else {
            ".bin"
        }
    }
}

fn infer_mime_type(file_name: &str) -> String {
    match mime_guess::from_path(file_name).first() {
        Some(mime) => mime.essence_str().to_string(),
        None => "image/jpeg".to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PhaseStatus {
    Succeeded { extracted: usize },
    Failed { error: String },
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseReport {
    pub phase: Phase,
    pub label: String,
    pub field_count: usize,
    pub status: PhaseStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionReport {
    pub record: FlatRecord,
    pub phases: Vec<PhaseReport>,
}

impl ExtractionReport {
    pub fn failed_phases(&self) -> usize {
        self.phases
            .iter()
            .filter(|p| matches!(p.status, PhaseStatus::Failed { .. }))
            .count()
    }

    /// True when no phase was attempted successfully.
    pub fn all_failed(&self) -> bool {
        let attempted = self
            .phases
            .iter()
            .filter(|p| p.status != PhaseStatus::Skipped)
            .count();
        attempted > 0 && self.failed_phases() == attempted
    }

    /// Phase errors joined for display, if any.
    pub fn error_summary(&self) -> Option<String> {
        let errors: Vec<String> = self
            .phases
            .iter()
            .filter_map(|p| match &p.status {
                PhaseStatus::Failed { error } => Some(format!("{}: {}", p.label, error)),
                _ => None,
            })
            .collect();
        if errors.is_empty() {
            None
        } else {
            Some(errors.join("; "))
        }
    }
}

/// A file staged with the backend and its local temporary copy.
pub struct StagedHandle {
    document: RemoteDocument,
    local: Option<TempPath>,
    released: bool,
}

impl StagedHandle {
    pub fn document(&self) -> &RemoteDocument {
        &self.document
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Removes the local copy and the remote file. Calling it again is a no-op.
    pub async fn release(&mut self, backend: &dyn ExtractionBackend) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        if let Some(local) = self.local.take() {
            if let Err(e) = local.close() {
                warn!("Failed to remove temp file for {}: {}", self.document.display_name, e);
            }
        }
        backend.release(&self.document).await
    }
}

/// Owns every handle staged for one request. Handles still held when the
/// guard is dropped are released on a spawned task.
struct StagingGuard {
    backend: Arc<dyn ExtractionBackend>,
    handles: Vec<StagedHandle>,
}

impl StagingGuard {
    fn new(backend: Arc<dyn ExtractionBackend>) -> Self {
        Self {
            backend,
            handles: Vec::new(),
        }
    }

    fn documents(&self) -> Vec<RemoteDocument> {
        self.handles.iter().map(|h| h.document.clone()).collect()
    }

    async fn release_all(mut self) {
        for handle in &mut self.handles {
            if let Err(e) = handle.release(self.backend.as_ref()).await {
                warn!("Failed to release {}: {}", handle.document.name, e);
            }
        }
    }
}

impl Drop for StagingGuard {
    fn drop(&mut self) {
        let pending: Vec<RemoteDocument> = self
            .handles
            .iter()
            .filter(|h| !h.released)
            .map(|h| h.document.clone())
            .collect();
        if pending.is_empty() {
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let backend = Arc::clone(&self.backend);
                runtime.spawn(async move {
                    for document in pending {
                        if let Err(e) = backend.release(&document).await {
                            warn!("Failed to release {} after cancellation: {}", document.name, e);
                        }
                    }
                });
            }
            Err(_) => warn!(
                "No runtime to release {} staged file(s); they will expire remotely",
                pending.len()
            ),
        }
    }
}

/// Runs the phased extraction and single-prompt analyses against a backend.
#[derive(Clone)]
pub struct Extractor {
    backend: Arc<dyn ExtractionBackend>,
    retry: RetryPolicy,
    concurrency: usize,
}

impl Extractor {
    pub fn new(backend: Arc<dyn ExtractionBackend>) -> Self {
        Self {
            backend,
            retry: RetryPolicy::default(),
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Maximum number of phases in flight. Values below 1 are raised to 1.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn backend(&self) -> Arc<dyn ExtractionBackend> {
        Arc::clone(&self.backend)
    }

    pub async fn extract(&self, files: &[InputFile], schema: &MappingSchema) -> Result<ExtractionReport> {
        self.extract_with_progress(files, schema, None).await
    }

    /// Stages every file once, runs one generation per non-empty phase and
    /// merges the results in phase order. A failing phase is reported, not
    /// propagated. Staged files are always released.
    pub async fn extract_with_progress(
        &self,
        files: &[InputFile],
        schema: &MappingSchema,
        progress: Option<Sender<ExtractionEvent>>,
    ) -> Result<ExtractionReport> {
        if schema.is_empty() {
            return Err(CareSheetError::MappingNotLoaded);
        }
        let groups = categorize(&schema.field_names());

        let guard = self.stage_all(files, &progress).await?;
        let documents = guard.documents();

        let outcomes: Vec<(PhaseReport, Option<Map<String, Value>>)> = stream::iter(
            groups
                .iter()
                .map(|group| self.run_phase(group, schema, &documents, &progress)),
        )
        .buffered(self.concurrency)
        .collect()
        .await;

        guard.release_all().await;

        let mut record = FlatRecord::new();
        let mut phases = Vec::with_capacity(outcomes.len());
        for (report, fields) in outcomes {
            if let Some(fields) = fields {
                record.merge_value(&Value::Object(fields));
            }
            phases.push(report);
        }

        let report = ExtractionReport { record, phases };
        info!(
            "Extraction finished: {} fields, {} failed phase(s)",
            report.record.len(),
            report.failed_phases()
        );
        send_event(
            &progress,
            ExtractionEvent::Finished {
                fields: report.record.len(),
                failed_phases: report.failed_phases(),
            },
        );
        Ok(report)
    }

    /// Single generation over all files with a fixed prompt. The parsed JSON
    /// object is returned as is.
    pub async fn run_prompt(
        &self,
        files: &[InputFile],
        prompt: &str,
        response_schema: Option<&Value>,
    ) -> Result<Value> {
        let guard = self.stage_all(files, &None).await?;
        let documents = guard.documents();

        let raw = with_rate_limit_retry(&self.retry, || {
            self.backend.generate(&documents, prompt, response_schema)
        })
        .await;

        guard.release_all().await;
        Ok(Value::Object(parse_model_json(&raw?)?))
    }

    /// Prompt without files, used by the text-only derivations.
    pub async fn run_text_prompt(&self, prompt: &str) -> Result<Value> {
        let raw = with_rate_limit_retry(&self.retry, || self.backend.generate(&[], prompt, None))
            .await?;
        Ok(Value::Object(parse_model_json(&raw)?))
    }

    async fn stage_all(
        &self,
        files: &[InputFile],
        progress: &Option<Sender<ExtractionEvent>>,
    ) -> Result<StagingGuard> {
        let mut guard = StagingGuard::new(Arc::clone(&self.backend));

        for file in files {
            send_event(
                progress,
                ExtractionEvent::Staging {
                    filename: file.file_name.clone(),
                },
            );

            match self.stage_one(file).await {
                Ok(handle) => guard.handles.push(handle),
                Err(e) => {
                    warn!("Staging '{}' failed: {}", file.file_name, e);
                    guard.release_all().await;
                    return Err(e);
                }
            }
        }

        debug!("Staged {} file(s)", guard.handles.len());
        Ok(guard)
    }

    async fn stage_one(&self, file: &InputFile) -> Result<StagedHandle> {
        let local = tempfile::Builder::new()
            .prefix("care-sheet-")
            .suffix(file.staging_suffix())
            .tempfile()?
            .into_temp_path();
        tokio::fs::write(&local, &file.data).await?;

        let display_name = if file.file_name.is_empty() {
            "upload"
        } else {
            file.file_name.as_str()
        };
        let document = self
            .backend
            .stage(&local, &file.mime_type, display_name)
            .await?;

        Ok(StagedHandle {
            document,
            local: Some(local),
            released: false,
        })
    }

    async fn run_phase(
        &self,
        group: &FieldGroup,
        schema: &MappingSchema,
        documents: &[RemoteDocument],
        progress: &Option<Sender<ExtractionEvent>>,
    ) -> (PhaseReport, Option<Map<String, Value>>) {
        let mut report = PhaseReport {
            phase: group.phase,
            label: group.label.clone(),
            field_count: group.fields.len(),
            status: PhaseStatus::Skipped,
        };
        if group.is_empty() {
            return (report, None);
        }

        let number = group.phase.number();
        info!(
            "Phase {} ({}): extracting {} fields",
            number,
            group.label,
            group.fields.len()
        );
        send_event(
            progress,
            ExtractionEvent::PhaseStarted {
                phase: number,
                label: group.label.clone(),
                fields: group.fields.len(),
            },
        );

        let prompt = synthesize(&group.fields, schema, &group.label);
        let result = async {
            let raw = with_rate_limit_retry(&self.retry, || {
                self.backend.generate(documents, &prompt, None)
            })
            .await?;
            parse_model_json(&raw)
        }
        .await;

        match result {
            Ok(fields) => {
                let extracted = fields.len();
                debug!("Phase {} returned {} keys", number, extracted);
                report.status = PhaseStatus::Succeeded { extracted };
                send_event(
                    progress,
                    ExtractionEvent::PhaseSucceeded {
                        phase: number,
                        extracted,
                    },
                );
                (report, Some(fields))
            }
            Err(e) => {
                warn!("Phase {} ({}) failed: {}", number, group.label, e);
                report.status = PhaseStatus::Failed {
                    error: e.to_string(),
                };
                send_event(
                    progress,
                    ExtractionEvent::PhaseFailed {
                        phase: number,
                        error: e.to_string(),
                    },
                );
                (report, None)
            }
        }
    }
}

/// Best effort: a full channel drops the event.
fn send_event(sender: &Option<Sender<ExtractionEvent>>, event: ExtractionEvent) {
    if let Some(tx) = sender {
        if let Err(TrySendError::Full(event)) = tx.try_send(event) {
            debug!("Progress channel full, dropped {:?}", event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Answers each phase with every listed field set to "値", except the
    /// phase whose label appears in `fail_label`.
    #[derive(Default)]
    struct ScriptedBackend {
        staged: AtomicUsize,
        released: AtomicUsize,
        fail_label: Option<&'static str>,
        fail_stage_at: Option<usize>,
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ExtractionBackend for ScriptedBackend {
        async fn stage(&self, path: &Path, mime_type: &str, display_name: &str) -> Result<RemoteDocument> {
            assert!(path.exists());
            let n = self.staged.load(Ordering::SeqCst);
            if self.fail_stage_at == Some(n) {
                return Err(CareSheetError::BackendUnavailable("upload refused".to_string()));
            }
            self.staged.fetch_add(1, Ordering::SeqCst);
            Ok(RemoteDocument {
                uri: format!("mem://{}", n),
                name: format!("files/{}", n),
                display_name: display_name.to_string(),
                mime_type: mime_type.to_string(),
                state: "ACTIVE".to_string(),
            })
        }

        async fn generate(&self, _files: &[RemoteDocument], prompt: &str, _schema: Option<&Value>) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            if let Some(label) = self.fail_label {
                if prompt.contains(&format!("【{}】", label)) {
                    return Ok("これはJSONではありません".to_string());
                }
            }
            let fields: Map<String, Value> = prompt
                .split("## 抽出項目リスト\n")
                .nth(1)
                .unwrap_or("")
                .lines()
                .filter_map(|line| line.strip_prefix("- "))
                .map(|line| line.split(" (選択肢").next().unwrap().to_string())
                .map(|name| (name, Value::String("値".to_string())))
                .collect();
            Ok(format!("```json\n{}\n```", Value::Object(fields)))
        }

        async fn release(&self, _document: &RemoteDocument) -> Result<()> {
            self.released.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn files(n: usize) -> Vec<InputFile> {
        (0..n)
            .map(|i| InputFile::new(vec![1, 2, 3], Some("audio/mp4"), format!("rec{}.m4a", i)))
            .collect()
    }

    fn schema() -> MappingSchema {
        MappingSchema::parse(
            "利用者氏名：C5\n主治医：C20\n歩行：D30\n認知症の有無：D40\nサービス利用状況：E50\n家族の意向：F60\n備考：G70",
        )
    }

    #[tokio::test]
    async fn test_failed_phase_does_not_abort_siblings() {
        let backend = Arc::new(ScriptedBackend {
            fail_label: Some("身体機能・ADL"),
            ..Default::default()
        });
        let extractor = Extractor::new(backend.clone()).with_retry_policy(RetryPolicy::immediate(1));

        let report = extractor.extract(&files(2), &schema()).await.unwrap();

        assert_eq!(report.phases.len(), 7);
        assert_eq!(report.failed_phases(), 1);
        assert!(matches!(report.phases[2].status, PhaseStatus::Failed { .. }));
        assert_eq!(report.record.get("歩行"), None);
        assert_eq!(report.record.text("利用者氏名"), "値");
        assert_eq!(report.record.text("備考"), "値");
        assert_eq!(report.record.len(), 6);
        assert_eq!(backend.staged.load(Ordering::SeqCst), 2);
        assert_eq!(backend.released.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_empty_groups_are_skipped() {
        let backend = Arc::new(ScriptedBackend::default());
        let extractor = Extractor::new(backend.clone()).with_concurrency(0);
        let report = extractor
            .extract(&files(1), &MappingSchema::parse("氏名：B2"))
            .await
            .unwrap();

        assert_eq!(backend.prompts.lock().unwrap().len(), 1);
        assert_eq!(report.phases[0].status, PhaseStatus::Succeeded { extracted: 1 });
        assert!(report.phases[1..].iter().all(|p| p.status == PhaseStatus::Skipped));
    }

    #[tokio::test]
    async fn test_staging_failure_releases_staged_files() {
        let backend = Arc::new(ScriptedBackend {
            fail_stage_at: Some(2),
            ..Default::default()
        });
        let extractor = Extractor::new(backend.clone());

        let err = extractor.extract(&files(3), &schema()).await.unwrap_err();

        assert!(matches!(err, CareSheetError::BackendUnavailable(_)));
        assert_eq!(backend.staged.load(Ordering::SeqCst), 2);
        assert_eq!(backend.released.load(Ordering::SeqCst), 2);
        assert!(backend.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_schema_is_rejected() {
        let extractor = Extractor::new(Arc::new(ScriptedBackend::default()));
        let err = extractor.extract(&files(1), &MappingSchema::default()).await.unwrap_err();
        assert!(matches!(err, CareSheetError::MappingNotLoaded));
    }

    #[tokio::test]
    async fn test_progress_events() {
        let backend = Arc::new(ScriptedBackend::default());
        let extractor = Extractor::new(backend);
        let (tx, mut rx) = tokio::sync::mpsc::channel(64);

        extractor
            .extract_with_progress(&files(1), &MappingSchema::parse("氏名：B2"), Some(tx))
            .await
            .unwrap();

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert!(matches!(events.first(), Some(ExtractionEvent::Staging { .. })));
        assert!(matches!(
            events.last(),
            Some(ExtractionEvent::Finished { fields: 1, failed_phases: 0 })
        ));
    }

    #[tokio::test]
    async fn test_full_progress_channel_does_not_stall() {
        let backend = Arc::new(ScriptedBackend::default());
        let extractor = Extractor::new(backend);
        let (tx, mut rx) = tokio::sync::mpsc::channel(1);

        let report = tokio::time::timeout(
            Duration::from_secs(5),
            extractor.extract_with_progress(&files(2), &schema(), Some(tx)),
        )
        .await
        .expect("extraction finished with an undrained channel")
        .unwrap();

        assert_eq!(report.phases.len(), 7);
        assert!(matches!(rx.try_recv(), Ok(ExtractionEvent::Staging { .. })));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_input_mime_inference() {
        assert_eq!(InputFile::new(vec![], None, "scan.PDF").mime_type, "application/pdf");
        assert_eq!(
            InputFile::new(vec![], Some("application/octet-stream"), "photo.png").mime_type,
            "image/png"
        );
        assert_eq!(InputFile::new(vec![], Some(""), "no_extension").mime_type, "image/jpeg");
        assert_eq!(InputFile::new(vec![], Some("audio/webm"), "a.bin").mime_type, "audio/webm");
    }
}
