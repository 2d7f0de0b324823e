use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use strum::{Display, EnumIter, EnumString};

/// Analyses the backend knows how to run.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, EnumString, EnumIter, Display, PartialEq, Eq, Hash,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AnalysisType {
    ColorAnalysis,
    ObjectDetection,
    VegetationIndex,
}

/// Status of an analysis job as reported by the backend.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Display, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    #[serde(alias = "pending")]
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Position along `queued -> processing -> terminal`.
    pub fn stage(self) -> u8 {
        match self {
            JobStatus::Queued => 0,
            JobStatus::Processing => 1,
            JobStatus::Completed | JobStatus::Failed => 2,
        }
    }

    /// Whether moving from `self` to `next` respects the job lifecycle.
    pub fn can_advance_to(self, next: JobStatus) -> bool {
        if self.is_terminal() {
            return self == next;
        }
        next.stage() >= self.stage()
    }
}

/// A server-tracked analysis job. The client only ever reads these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisJob {
    pub id: String,
    pub status: JobStatus,

    #[serde(default, alias = "image_path")]
    pub image_ref: Option<String>,

    #[serde(default, deserialize_with = "lenient_analysis_type")]
    pub analysis_type: Option<AnalysisType>,

    #[serde(default, alias = "results")]
    pub result: Option<serde_json::Value>,

    #[serde(default)]
    pub error: Option<String>,

    #[serde(default, deserialize_with = "flexible_timestamp")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl AnalysisJob {
    /// The result payload, only when the job completed with a non-empty one.
    pub fn completed_result(&self) -> Option<&serde_json::Value> {
        if self.status != JobStatus::Completed {
            return None;
        }
        match &self.result {
            Some(serde_json::Value::Null) | None => None,
            Some(serde_json::Value::Object(map)) if map.is_empty() => None,
            Some(value) => Some(value),
        }
    }

    /// The backend's failure message, only when the job failed.
    pub fn failure_message(&self) -> Option<&str> {
        if self.status != JobStatus::Failed {
            return None;
        }
        Some(self.error.as_deref().unwrap_or("analysis failed without a message"))
    }
}

// Unknown tags become `None` so a newer backend does not break job listing.
fn lenient_analysis_type<'de, D>(deserializer: D) -> Result<Option<AnalysisType>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.and_then(|tag| tag.parse().ok()))
}

// Accepts RFC 3339 as well as naive ISO-8601 timestamps, which are read as UTC.
fn flexible_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    let Some(raw) = raw else {
        return Ok(None);
    };

    if let Ok(parsed) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(Some(parsed.with_timezone(&Utc)));
    }

    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| Some(naive.and_utc()))
        .map_err(serde::de::Error::custom)
}
