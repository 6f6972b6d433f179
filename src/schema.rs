use schemars::schema::RootSchema;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Sentence every service-meeting conclusion must carry.
pub const MANDATORY_CONCLUSION: &str = "サービス担当へ、個別援助計画書の提出を依頼する";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
pub struct ServiceMeetingSummary {
    #[serde(rename = "開催日", default)]
    #[schemars(description = "Meeting date only")]
    pub date: String,

    #[serde(rename = "開催場所", default)]
    #[schemars(description = "Meeting place only")]
    pub place: String,

    #[serde(rename = "開催時間", default)]
    #[schemars(description = "Meeting time only")]
    pub time: String,

    #[serde(rename = "開催回数", default)]
    #[schemars(description = "Meeting count only")]
    pub count: String,

    #[serde(rename = "担当者名", default)]
    #[schemars(description = "Care manager name only")]
    pub care_manager: String,

    #[serde(rename = "利用者名", default)]
    #[schemars(description = "Service user name only")]
    pub client_name: String,

    #[serde(rename = "参加者", default)]
    #[schemars(description = "Attendees with affiliation, separated by 、")]
    pub participants: String,

    #[serde(rename = "検討内容", default)]
    #[schemars(description = "Detailed minutes following the five-section format")]
    pub discussion: String,

    #[serde(rename = "検討した項目", default)]
    #[schemars(description = "Purpose of the meeting, provisional plan and key points")]
    pub topics: String,

    #[serde(rename = "結論", default)]
    #[schemars(description = "Decisions, future policy and monitoring points as 6-8 bullet lines")]
    pub conclusion: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
pub struct ManagementMeetingSummary {
    #[serde(default)]
    #[schemars(description = "Date and time of the meeting (日時)")]
    pub meeting_date: String,

    #[serde(default)]
    #[schemars(description = "Meeting place (開催場所)")]
    pub place: String,

    #[serde(default)]
    #[schemars(description = "Participants (参加者)")]
    pub participants: String,

    #[serde(default)]
    #[schemars(description = "Agenda checklist ①-⑦, discussed items marked with ● at line end")]
    pub agenda: String,

    #[serde(default)]
    #[schemars(description = "24-hour on-call events (24時間対応)")]
    pub support_24h: String,

    #[serde(default)]
    #[schemars(description = "Shared matters under ■利用者情報共有 and ■その他共有事項")]
    pub sharing_matters: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
pub struct QaPair {
    pub question: String,
    pub answer: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
pub struct QaPairs {
    #[serde(default)]
    pub qa_pairs: Vec<QaPair>,
}

/// Appends the mandatory sentence to a service-meeting `結論` that lacks it.
/// An empty conclusion becomes the sentence alone; a record without `結論`
/// is left untouched.
pub fn ensure_mandatory_conclusion(data: &mut Map<String, Value>) {
    let line = format!("・{}", MANDATORY_CONCLUSION);
    match data.get_mut("結論") {
        Some(Value::String(text)) if text.contains(MANDATORY_CONCLUSION) => {}
        Some(Value::String(text)) if !text.trim().is_empty() => {
            text.push('\n');
            text.push_str(&line);
        }
        Some(Value::Array(items)) => {
            let present = items
                .iter()
                .any(|i| i.as_str().is_some_and(|s| s.contains(MANDATORY_CONCLUSION)));
            if !present {
                items.push(Value::String(line));
            }
        }
        Some(slot) if slot.is_string() || slot.is_null() => *slot = Value::String(line),
        _ => {}
    }
}

/// Generates a Gemini-compatible JSON schema (no $ref, $schema, or definitions)
pub fn gemini_response_schema<T: JsonSchema>() -> serde_json::Result<Value> {
    clean_schema(schemars::schema_for!(T))
}

fn clean_schema(root: RootSchema) -> serde_json::Result<Value> {
    let mut value = serde_json::to_value(root)?;
    let definitions = match value.as_object_mut() {
        Some(obj) => {
            obj.remove("$schema");
            obj.remove("definitions").unwrap_or(Value::Null)
        }
        None => Value::Null,
    };
    inline_refs(&mut value, &definitions);
    strip_unsupported(&mut value);
    Ok(value)
}

fn inline_refs(value: &mut Value, definitions: &Value) {
    match value {
        Value::Object(obj) => {
            let target = obj
                .get("$ref")
                .and_then(Value::as_str)
                .and_then(|r| r.strip_prefix("#/definitions/"))
                .and_then(|name| definitions.get(name))
                .cloned();
            if let Some(mut resolved) = target {
                inline_refs(&mut resolved, definitions);
                *value = resolved;
                return;
            }
            for child in obj.values_mut() {
                inline_refs(child, definitions);
            }
        }
        Value::Array(items) => {
            for item in items {
                inline_refs(item, definitions);
            }
        }
        _ => {}
    }
}

/// Gemini rejects these keywords in a response schema.
fn strip_unsupported(value: &mut Value) {
    match value {
        Value::Object(obj) => {
            for key in ["title", "default", "additionalProperties", "$ref"] {
                obj.remove(key);
            }
            // Property names are data, not keywords.
            for (key, child) in obj.iter_mut() {
                if key == "properties" {
                    if let Value::Object(props) = child {
                        props.values_mut().for_each(strip_unsupported);
                    }
                } else {
                    strip_unsupported(child);
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(strip_unsupported),
        _ => {}
    }
}
