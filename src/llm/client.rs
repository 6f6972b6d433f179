use crate::error::{CareSheetError, Result};
use crate::llm::extractor::ExtractionBackend;
use crate::llm::retry::parse_retry_after;
use crate::llm::types::*;
use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest::{Client, Response, StatusCode};
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tokio::time::sleep;

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const GEMINI_UPLOAD_URL: &str = "https://generativelanguage.googleapis.com/upload/v1beta/files";
pub const DEFAULT_MODEL: &str = "gemini-3-flash-preview";

#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    api_key: String,
    base_url: String,
    upload_url: String,
    model: String,
    generation_config: GenerationConfig,
    poll_interval: Duration,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: GEMINI_BASE_URL.to_string(),
            upload_url: GEMINI_UPLOAD_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            generation_config: GenerationConfig::default(),
            poll_interval: Duration::from_secs(2),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Points both the REST and the upload endpoints at another host.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        self.upload_url = format!("{}/upload/v1beta/files", base_url.trim_end_matches('/'));
        self.base_url = format!("{}/v1beta", base_url.trim_end_matches('/'));
        self
    }

    pub fn with_generation_config(mut self, config: GenerationConfig) -> Self {
        self.generation_config = config;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Resumable upload, then polls until the file is `ACTIVE`.
    pub async fn upload_document(
        &self,
        path: &Path,
        mime_type: &str,
        display_name: &str,
    ) -> Result<RemoteDocument> {
        let file_size = fs::metadata(path).await?.len();
        let file_bytes = fs::read(path).await?;

        let start_url = format!("{}?key={}", self.upload_url, self.api_key);
        let metadata = json!({ "file": { "display_name": display_name } });

        let init_res = self
            .client
            .post(&start_url)
            .header("X-Goog-Upload-Protocol", "resumable")
            .header("X-Goog-Upload-Command", "start")
            .header("X-Goog-Upload-Header-Content-Length", file_size.to_string())
            .header("X-Goog-Upload-Header-Content-Type", mime_type)
            .header("Content-Type", "application/json")
            .json(&metadata)
            .send()
            .await?;
        let init_res = check_status(init_res, "Upload init").await?;

        let upload_url = init_res
            .headers()
            .get("x-goog-upload-url")
            .ok_or_else(|| CareSheetError::ExtractionFailed("No upload URL in headers".to_string()))?
            .to_str()
            .map_err(|e| CareSheetError::ExtractionFailed(e.to_string()))?
            .to_string();

        let upload_res = self
            .client
            .post(&upload_url)
            .header("Content-Length", file_size.to_string())
            .header("X-Goog-Upload-Offset", "0")
            .header("X-Goog-Upload-Command", "upload, finalize")
            .body(file_bytes)
            .send()
            .await?;
        let upload_res = check_status(upload_res, "File upload").await?;

        let upload_body: Value = upload_res.json().await?;
        let file_obj = upload_body.get("file").ok_or_else(|| {
            CareSheetError::ExtractionFailed("Upload response missing 'file'".to_string())
        })?;

        let uri = required_str(file_obj, "uri")?;
        let name = required_str(file_obj, "name")?;
        let mut state = file_obj
            .get("state")
            .and_then(|v| v.as_str())
            .unwrap_or("PROCESSING")
            .to_string();

        while state != "ACTIVE" {
            sleep(self.poll_interval).await;
            let check_url = format!("{}/{}?key={}", self.base_url, name, self.api_key);
            let check_res = self.client.get(&check_url).send().await?;
            let check_json: Value = check_status(check_res, "File status").await?.json().await?;
            let file_obj = check_json.get("file").unwrap_or(&check_json);
            state = file_obj
                .get("state")
                .and_then(|v| v.as_str())
                .unwrap_or("PROCESSING")
                .to_string();
            debug!("File {} is {}", name, state);

            if state == "FAILED" {
                return Err(CareSheetError::ExtractionFailed(format!(
                    "Google failed to process the file '{}'",
                    display_name
                )));
            }
        }

        info!("Uploaded '{}' as {}", display_name, name);
        Ok(RemoteDocument {
            uri,
            name,
            display_name: display_name.to_string(),
            mime_type: mime_type.to_string(),
            state,
        })
    }

    pub async fn delete_document(&self, document: &RemoteDocument) -> Result<()> {
        let url = format!("{}/{}?key={}", self.base_url, document.name, self.api_key);
        let res = self.client.delete(&url).send().await?;
        check_status(res, "File delete").await?;
        debug!("Deleted remote file {}", document.name);
        Ok(())
    }

    pub async fn generate_content(
        &self,
        messages: Vec<Content>,
        response_schema: Option<Value>,
    ) -> Result<String> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );

        let payload = GenerateContentRequest {
            contents: messages,
            generation_config: GenerationConfig {
                response_schema,
                ..self.generation_config.clone()
            },
            safety_settings: SafetySetting::block_none(),
        };

        let res = self.client.post(&url).json(&payload).send().await?;
        let res = check_status(res, "Gemini API").await?;
        let body: GenerateContentResponse = res.json().await?;

        let parts = body
            .candidates
            .ok_or_else(|| CareSheetError::ExtractionFailed("No candidates returned".to_string()))?
            .into_iter()
            .next()
            .ok_or_else(|| CareSheetError::ExtractionFailed("Empty candidates list".to_string()))?
            .content
            .parts;

        let text: String = parts
            .into_iter()
            .filter_map(|part| match part {
                Part::Text { text } => Some(text),
                Part::FileData { .. } => None,
            })
            .collect();

        if text.is_empty() {
            return Err(CareSheetError::ExtractionFailed(
                "Model returned non-text content".to_string(),
            ));
        }
        Ok(text)
    }
}

#[async_trait]
impl ExtractionBackend for GeminiClient {
    async fn stage(
        &self,
        path: &Path,
        mime_type: &str,
        display_name: &str,
    ) -> Result<RemoteDocument> {
        self.upload_document(path, mime_type, display_name).await
    }

    async fn generate(
        &self,
        files: &[RemoteDocument],
        prompt: &str,
        response_schema: Option<&Value>,
    ) -> Result<String> {
        let messages = vec![Content::user_with_files(prompt, files)];
        self.generate_content(messages, response_schema.cloned())
            .await
    }

    async fn release(&self, document: &RemoteDocument) -> Result<()> {
        self.delete_document(document).await
    }
}

/// Passes successful responses through. 429 and quota errors become
/// `RateLimited`; everything else becomes `ExtractionFailed`.
async fn check_status(res: Response, context: &str) -> Result<Response> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }
    let error_text = res.text().await?;
    if status == StatusCode::TOO_MANY_REQUESTS || error_text.to_lowercase().contains("quota") {
        warn!("{} rate limited (status {})", context, status);
        return Err(CareSheetError::RateLimited {
            retry_after: parse_retry_after(&error_text),
            message: format!("{} (status {}): {}", context, status, error_text),
        });
    }
    Err(CareSheetError::ExtractionFailed(format!(
        "{} failed (status {}): {}",
        context, status, error_text
    )))
}

fn required_str(obj: &Value, key: &str) -> Result<String> {
    obj.get(key)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| {
            CareSheetError::ExtractionFailed(format!("Upload response missing {}", key))
        })
}
