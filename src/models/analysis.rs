use garde::Validate;
use serde::{Deserialize, Serialize};

use crate::models::job::{AnalysisType, JobStatus};

/// An image accepted by `POST /analysis/upload`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UploadedAsset {
    pub filename: String,

    #[serde(alias = "storedPath", alias = "file_path")]
    pub stored_path: String,

    #[serde(default)]
    pub size: Option<u64>,

    #[serde(default)]
    pub dimensions: Option<String>,
}

/// Body of `POST /analysis/analyze`.
#[derive(Debug, Clone, Serialize, Validate)]
pub struct AnalyzeRequest {
    #[garde(length(min = 1, max = 255))]
    pub filename: String,

    #[garde(skip)]
    pub analysis_type: AnalysisType,

    #[garde(skip)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

/// A freshly created job, as returned by the analyze endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CreatedJob {
    #[serde(rename = "analysis_id", alias = "id")]
    pub id: String,
    pub status: JobStatus,
}
