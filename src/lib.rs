//! # Care Sheet Builder
//!
//! A library for turning care-facility recordings, scans and photographs into
//! structured records, and writing those records into pre-formatted
//! spreadsheet templates at exact cell coordinates.
//!
//! ## Core Concepts
//!
//! - **Mapping Schema**: `名前：CELL（選択肢、…）` lines naming every field a
//!   template carries, where it lives and which choices it accepts
//! - **Phases**: fields are split into seven ordered groups, each extracted by
//!   its own model call over the same staged files
//! - **Flat Record**: the merged extraction result, field name → text
//! - **Writers**: fixed-cell batches, header-aligned row appends and
//!   template-copy documents
//!
//! ## Example
//!
//! ```rust,ignore
//! use care_sheet_builder::*;
//! use std::sync::Arc;
//!
//! let config = ServiceConfig::from_env();
//! let gemini = Arc::new(GeminiClient::new(config.gemini_api_key.clone().unwrap()));
//! let google = Arc::new(GoogleWorkspaceClient::new(config.google_access_token.clone().unwrap()));
//!
//! let service = CareSheetService::new(config, gemini, google.clone(), Arc::new(MemoryObjectStore::new()))
//!     .with_archive(google);
//!
//! let file = InputFile::new(std::fs::read("intake.m4a")?, None, "intake.m4a");
//! let response = service.analyze(vec![file], AnalysisType::Assessment).await;
//! ```

pub mod categorize;
pub mod config;
pub mod documents;
pub mod error;
pub mod llm;
pub mod mapping;
pub mod record;
pub mod schema;
pub mod service;
pub mod sheets;
pub mod storage;
pub mod utils;

pub use categorize::{categorize, classify, FieldGroup, Phase};
pub use config::{MeetingDocumentConfig, ServiceConfig};
pub use documents::{
    AttendanceMatrix, DocumentBuilder, DocumentKind, DocumentPlan, MeetingFanOut, MeetingTarget,
    MeetingType, WriteTarget,
};
pub use error::{CareSheetError, Result};
pub use llm::{
    ExtractionBackend, ExtractionEvent, ExtractionReport, Extractor, InputFile, PhaseReport,
    PhaseStatus, RemoteDocument, RetryPolicy,
};
#[cfg(feature = "gemini")]
pub use llm::GeminiClient;
pub use mapping::{MappingEntry, MappingSchema};
pub use record::{flatten, FlatRecord, BLANK_PLACEHOLDER};
pub use schema::{ManagementMeetingSummary, QaPair, QaPairs, ServiceMeetingSummary};
pub use service::{
    AnalysisType, AnalyzeResponse, CareSheetService, MappingType, WriteMode, WriteRequest,
};
pub use sheets::{
    CellWrite, CellWriteReport, CellWriter, CopiedFile, RowOverrides, RowWriter,
    SpreadsheetBackend, SpreadsheetInfo, WriteResult, DEFAULT_WORKSHEET, MANAGEMENT_LOG_HEADERS,
    SERVICE_LOG_HEADERS,
};
#[cfg(feature = "google")]
pub use sheets::GoogleWorkspaceClient;
pub use storage::{
    ArtifactKind, ArtifactStore, FileArchive, MemoryObjectStore, ObjectStore, PresignedUpload,
};
