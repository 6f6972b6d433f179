//! Transient storage: uploaded drafts, archived meeting sources and
//! background-derived artifacts.

use crate::error::{CareSheetError, Result};
use crate::llm::extractor::Extractor;
use crate::llm::prompts::{bodymap_prompt, genogram_prompt};
use crate::utils::timestamp;
use async_trait::async_trait;
use chrono::{Local, NaiveDateTime};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// `uploads/YYYYMMDD_HHMMSS_<8 hex>.<ext>`. Names without an extension get no
/// trailing dot.
pub fn storage_key(file_name: &str, now: NaiveDateTime) -> String {
    let unique = Uuid::new_v4().simple().to_string();
    let unique = &unique[..8];
    match Path::new(file_name).extension().and_then(|e| e.to_str()) {
        Some(ext) if !ext.is_empty() => format!("uploads/{}_{}.{}", timestamp(now), unique, ext),
        _ => format!("uploads/{}_{}", timestamp(now), unique),
    }
}

/// `YYYYMMDD_HHMMSS_<name>`
pub fn archive_name(file_name: &str, now: NaiveDateTime) -> String {
    format!("{}_{}", timestamp(now), file_name)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresignedUpload {
    pub upload_url: String,
    pub file_key: String,
}

/// Draft storage the browser uploads into before analysis.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, data: Vec<u8>, content_type: &str) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Vec<u8>>;

    async fn presign(&self, file_name: &str, content_type: &str) -> Result<PresignedUpload>;
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    content_type: String,
}

/// In-process [`ObjectStore`] for tests and single-node deployments.
#[derive(Debug, Clone, Default)]
pub struct MemoryObjectStore {
    objects: Arc<RwLock<HashMap<String, StoredObject>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn content_type(&self, key: &str) -> Option<String> {
        self.objects
            .read()
            .await
            .get(key)
            .map(|o| o.content_type.clone())
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, key: &str, data: Vec<u8>, content_type: &str) -> Result<()> {
        debug!("Storing {} bytes at {}", data.len(), key);
        self.objects.write().await.insert(
            key.to_string(),
            StoredObject {
                data,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.objects
            .read()
            .await
            .get(key)
            .map(|o| o.data.clone())
            .ok_or_else(|| CareSheetError::Storage(format!("no object at '{}'", key)))
    }

    async fn presign(&self, file_name: &str, _content_type: &str) -> Result<PresignedUpload> {
        let file_key = storage_key(file_name, Local::now().naive_local());
        Ok(PresignedUpload {
            upload_url: format!("memory://{}", file_key),
            file_key,
        })
    }
}

/// Long-term home for meeting source files.
#[async_trait]
pub trait FileArchive: Send + Sync {
    /// Stores `data` as `file_name` in `folder_id`; returns a link to it when
    /// the archive provides one.
    async fn archive(
        &self,
        data: &[u8],
        file_name: &str,
        mime_type: &str,
        folder_id: &str,
    ) -> Result<Option<String>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Genogram,
    BodyMap,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 2] = [ArtifactKind::Genogram, ArtifactKind::BodyMap];

    pub fn prompt(self, text: &str) -> String {
        match self {
            ArtifactKind::Genogram => genogram_prompt(text),
            ArtifactKind::BodyMap => bodymap_prompt(text),
        }
    }
}

/// Derived artifacts keyed by request id. Entries appear once their
/// background task finishes; a failed derivation never appears.
#[derive(Debug, Clone, Default)]
pub struct ArtifactStore {
    artifacts: Arc<RwLock<HashMap<(Uuid, ArtifactKind), Value>>>,
}

impl ArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put(&self, id: Uuid, kind: ArtifactKind, value: Value) {
        self.artifacts.write().await.insert((id, kind), value);
    }

    /// `Ok(None)` while the artifact is not ready.
    pub async fn get(&self, id: Uuid, kind: ArtifactKind) -> Result<Option<Value>> {
        Ok(self.artifacts.read().await.get(&(id, kind)).cloned())
    }

    pub async fn len(&self) -> usize {
        self.artifacts.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.artifacts.read().await.is_empty()
    }
}

/// Background derivations started for one analysis.
pub struct Derivations {
    pub id: Uuid,
    tasks: Vec<JoinHandle<()>>,
}

impl Derivations {
    /// Waits for every derivation to finish or fail.
    pub async fn join(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!("Derivation task for {} aborted: {}", self.id, e);
            }
        }
    }
}

/// Starts one task per [`ArtifactKind`] deriving from `source_text` and
/// returns at once. Failures are logged and leave the artifact absent.
pub fn spawn_derivations(extractor: Extractor, store: ArtifactStore, source_text: String) -> Derivations {
    let id = Uuid::new_v4();
    let source_text = Arc::new(source_text);

    let tasks = ArtifactKind::ALL
        .iter()
        .map(|&kind| {
            let extractor = extractor.clone();
            let store = store.clone();
            let source_text = Arc::clone(&source_text);
            tokio::spawn(async move {
                match extractor.run_text_prompt(&kind.prompt(&source_text)).await {
                    Ok(value) => {
                        info!("Derived {:?} for {}", kind, id);
                        store.put(id, kind, value).await;
                    }
                    Err(e) => warn!("Deriving {:?} for {} failed: {}", kind, id, e),
                }
            })
        })
        .collect();

    Derivations { id, tasks }
}
