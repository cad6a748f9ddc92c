//! Print job descriptors.
//!
//! A job is created at the moment a caller asks for output, consumed once by
//! the lifecycle controller and then dropped. Payload records come from the
//! host backend as loose JSON, so every accessor here is lenient: a missing,
//! null, empty or oddly-typed field simply reads as absent.

use crate::error::PrintError;
use isoprint_job_contract as contract;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Label,
    Report,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Label => contract::JOB_KIND_LABEL,
            JobKind::Report => contract::JOB_KIND_REPORT,
        }
    }
}

impl FromStr for JobKind {
    type Err = PrintError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            contract::JOB_KIND_LABEL => Ok(JobKind::Label),
            contract::JOB_KIND_REPORT => Ok(JobKind::Report),
            other => Err(PrintError::Payload(format!("unknown job kind `{other}`"))),
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LabelPayload {
    pub title: Option<String>,
    pub date: Option<String>,
    pub producer: Option<String>,
    pub code: Option<String>,
    #[serde(alias = "qrValue")]
    pub encoded_value: Option<String>,
    /// Certification mark printed under the scannable code.
    pub badge: Option<String>,
}

impl LabelPayload {
    pub fn from_record(record: &Value) -> Self {
        Self {
            title: field_text(record, contract::LABEL_FIELD_TITLE),
            date: field_text(record, contract::LABEL_FIELD_DATE),
            producer: field_text(record, contract::LABEL_FIELD_PRODUCER),
            code: field_text(record, contract::LABEL_FIELD_CODE),
            encoded_value: field_text(record, contract::LABEL_FIELD_ENCODED_VALUE)
                .or_else(|| field_text(record, contract::LABEL_FIELD_ENCODED_VALUE_LEGACY)),
            badge: field_text(record, contract::LABEL_FIELD_BADGE),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = non_blank(title.into());
        self
    }

    pub fn with_date(mut self, date: impl Into<String>) -> Self {
        self.date = non_blank(date.into());
        self
    }

    pub fn with_producer(mut self, producer: impl Into<String>) -> Self {
        self.producer = non_blank(producer.into());
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = non_blank(code.into());
        self
    }

    pub fn with_encoded_value(mut self, value: impl Into<String>) -> Self {
        self.encoded_value = non_blank(value.into());
        self
    }

    pub fn with_badge(mut self, badge: impl Into<String>) -> Self {
        self.badge = non_blank(badge.into());
        self
    }

    /// The value carried by the scannable code: the explicit encoded value,
    /// else the human-readable code, else the placeholder.
    pub fn scannable_value(&self) -> &str {
        self.encoded_value
            .as_deref()
            .or(self.code.as_deref())
            .unwrap_or(contract::PLACEHOLDER)
    }

    pub fn to_record(&self) -> Value {
        let mut map = Map::new();
        for (key, value) in [
            (contract::LABEL_FIELD_TITLE, &self.title),
            (contract::LABEL_FIELD_DATE, &self.date),
            (contract::LABEL_FIELD_PRODUCER, &self.producer),
            (contract::LABEL_FIELD_CODE, &self.code),
            (contract::LABEL_FIELD_ENCODED_VALUE, &self.encoded_value),
            (contract::LABEL_FIELD_BADGE, &self.badge),
        ] {
            if let Some(value) = value {
                map.insert(key.to_string(), Value::String(value.clone()));
            }
        }
        Value::Object(map)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportPayload {
    pub title: Option<String>,
    pub content: Option<String>,
}

impl ReportPayload {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: non_blank(title.into()),
            content: Some(content.into()),
        }
    }

    pub fn from_record(record: &Value) -> Self {
        Self {
            title: field_text(record, contract::REPORT_FIELD_TITLE),
            content: record
                .get(contract::REPORT_FIELD_CONTENT)
                .and_then(Value::as_str)
                .map(str::to_string),
        }
    }

    pub fn to_record(&self) -> Value {
        let mut map = Map::new();
        if let Some(title) = &self.title {
            map.insert(contract::REPORT_FIELD_TITLE.to_string(), Value::String(title.clone()));
        }
        if let Some(content) = &self.content {
            map.insert(
                contract::REPORT_FIELD_CONTENT.to_string(),
                Value::String(content.clone()),
            );
        }
        Value::Object(map)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobPayload {
    Label(LabelPayload),
    Report(ReportPayload),
}

impl JobPayload {
    pub fn from_record(kind: JobKind, record: &Value) -> Self {
        match kind {
            JobKind::Label => JobPayload::Label(LabelPayload::from_record(record)),
            JobKind::Report => JobPayload::Report(ReportPayload::from_record(record)),
        }
    }

    pub fn kind(&self) -> JobKind {
        match self {
            JobPayload::Label(_) => JobKind::Label,
            JobPayload::Report(_) => JobKind::Report,
        }
    }

    pub fn to_record(&self) -> Value {
        match self {
            JobPayload::Label(label) => label.to_record(),
            JobPayload::Report(report) => report.to_record(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PrintJob {
    pub id: JobId,
    pub payload: JobPayload,
    pub fingerprint: String,
    pub submitted_at: Instant,
}

impl PrintJob {
    pub fn new(id: JobId, payload: JobPayload) -> Self {
        let fingerprint =
            contract::job_fingerprint_sha256(payload.kind().as_str(), &payload.to_record());
        Self {
            id,
            payload,
            fingerprint,
            submitted_at: Instant::now(),
        }
    }

    pub fn kind(&self) -> JobKind {
        self.payload.kind()
    }
}

/// Text for a display slot, or the placeholder when the field is absent.
pub fn field_or_placeholder(value: Option<&str>) -> &str {
    match value {
        Some(text) if !text.trim().is_empty() => text,
        _ => contract::PLACEHOLDER,
    }
}

fn field_text(record: &Value, key: &str) -> Option<String> {
    match record.get(key)? {
        Value::String(text) => non_blank(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

fn non_blank(text: String) -> Option<String> {
    if text.trim().is_empty() { None } else { Some(text) }
}
