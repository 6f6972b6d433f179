use crate::documents::MeetingType;
use crate::llm::extractor::DEFAULT_CONCURRENCY;
use crate::mapping::MappingSchema;
use log::warn;
use std::env;
use std::path::PathBuf;

/// Drive and Sheets locations for one meeting type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MeetingDocumentConfig {
    /// Folder receiving archived source files and standalone documents.
    pub folder_id: Option<String>,
    pub template_id: Option<String>,
    /// Master log spreadsheet rows are appended to.
    pub log_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub gemini_api_key: Option<String>,
    pub gemini_model: Option<String>,
    pub google_access_token: Option<String>,
    pub assessment_mapping: Option<PathBuf>,
    pub assessment_mapping_part_two: Option<PathBuf>,
    pub assessment_template_id: Option<String>,
    pub assessment_folder_id: Option<String>,
    pub service_meeting: MeetingDocumentConfig,
    pub management_meeting: MeetingDocumentConfig,
    pub extraction_concurrency: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            gemini_api_key: None,
            gemini_model: None,
            google_access_token: None,
            assessment_mapping: None,
            assessment_mapping_part_two: None,
            assessment_template_id: None,
            assessment_folder_id: None,
            service_meeting: MeetingDocumentConfig::default(),
            management_meeting: MeetingDocumentConfig::default(),
            extraction_concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

impl ServiceConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let extraction_concurrency = match get("CARE_EXTRACTION_CONCURRENCY") {
            Some(raw) => match raw.parse::<usize>() {
                Ok(n) => n.max(1),
                Err(_) => {
                    warn!(
                        "CARE_EXTRACTION_CONCURRENCY='{}' is not a number, using {}",
                        raw, DEFAULT_CONCURRENCY
                    );
                    DEFAULT_CONCURRENCY
                }
            },
            None => DEFAULT_CONCURRENCY,
        };

        Self {
            gemini_api_key: get("GEMINI_API_KEY"),
            gemini_model: get("GEMINI_MODEL"),
            google_access_token: get("GOOGLE_ACCESS_TOKEN"),
            assessment_mapping: get("CARE_ASSESSMENT_MAPPING").map(PathBuf::from),
            assessment_mapping_part_two: get("CARE_ASSESSMENT_MAPPING_2").map(PathBuf::from),
            assessment_template_id: get("GOOGLE_SHEETS_ASSESSMENT_TEMPLATE_ID"),
            assessment_folder_id: get("GOOGLE_DRIVE_ASSESSMENT_FOLDER_ID"),
            service_meeting: MeetingDocumentConfig {
                folder_id: get("GOOGLE_DRIVE_SERVICE_MEETING_FOLDER_ID"),
                template_id: get("GOOGLE_SHEETS_SERVICE_MEETING_TEMPLATE_ID"),
                log_id: get("GOOGLE_SHEETS_SERVICE_MEETING_LOG_ID"),
            },
            management_meeting: MeetingDocumentConfig {
                folder_id: get("GOOGLE_DRIVE_MANAGEMENT_MEETING_FOLDER_ID"),
                template_id: get("GOOGLE_SHEETS_MANAGEMENT_MEETING_TEMPLATE_ID"),
                log_id: get("GOOGLE_SHEETS_MANAGEMENT_MEETING_LOG_ID"),
            },
            extraction_concurrency,
        }
    }

    pub fn meeting(&self, meeting_type: MeetingType) -> &MeetingDocumentConfig {
        match meeting_type {
            MeetingType::ServiceMeeting => &self.service_meeting,
            MeetingType::ManagementMeeting => &self.management_meeting,
        }
    }

    /// Assessment sheet 1 schema: the configured file, else the built-in one.
    pub fn assessment_schema(&self) -> MappingSchema {
        match &self.assessment_mapping {
            Some(path) => MappingSchema::load(path),
            None => MappingSchema::assessment(),
        }
    }

    pub fn assessment_part_two_schema(&self) -> MappingSchema {
        match &self.assessment_mapping_part_two {
            Some(path) => MappingSchema::load(path),
            None => MappingSchema::assessment_part_two(),
        }
    }
}
