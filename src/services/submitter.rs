use std::path::Path;
use std::sync::Arc;

use garde::Validate;
use image::ImageFormat;
use reqwest::multipart::{Form, Part};
use tracing::info;

use crate::error::ClientError;
use crate::models::analysis::{AnalyzeRequest, CreatedJob, UploadedAsset};
use crate::models::job::AnalysisType;
use crate::services::api::ApiClient;

/// Largest image the backend accepts (10 MB).
pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Formats the analysis backend can decode.
const ACCEPTED_FORMATS: &[ImageFormat] = &[
    ImageFormat::Jpeg,
    ImageFormat::Png,
    ImageFormat::Gif,
    ImageFormat::Bmp,
    ImageFormat::Tiff,
    ImageFormat::WebP,
];

/// An image the user picked for upload.
#[derive(Debug, Clone)]
pub struct ImageFile {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl ImageFile {
    pub fn new(
        file_name: impl Into<String>,
        content_type: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: content_type.into(),
            bytes,
        }
    }

    /// Read an image from disk, taking its MIME type from the extension.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, ClientError> {
        let path = path.as_ref();
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| ClientError::validation(format!("{} has no file name", path.display())))?
            .to_string();

        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| ClientError::validation(format!("cannot read {}: {e}", path.display())))?;
        if metadata.len() > MAX_UPLOAD_BYTES as u64 {
            return Err(too_large(&file_name, metadata.len()));
        }

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| ClientError::validation(format!("cannot read {}: {e}", path.display())))?;

        let content_type = ImageFormat::from_path(path)
            .map(|format| format.to_mime_type().to_string())
            .unwrap_or_else(|_| "application/octet-stream".to_string());

        Ok(Self::new(file_name, content_type, bytes))
    }

    /// Local checks run before anything is sent to the backend.
    pub fn validate(&self) -> Result<(), ClientError> {
        if !self.content_type.starts_with("image/") {
            return Err(ClientError::validation(format!(
                "{} is {}, not an image",
                self.file_name, self.content_type
            )));
        }

        if self.bytes.is_empty() {
            return Err(ClientError::validation(format!("{} is empty", self.file_name)));
        }

        if self.bytes.len() > MAX_UPLOAD_BYTES {
            return Err(too_large(&self.file_name, self.bytes.len() as u64));
        }

        let format = image::guess_format(&self.bytes).map_err(|_| {
            ClientError::validation(format!("{} does not contain image data", self.file_name))
        })?;
        if !ACCEPTED_FORMATS.contains(&format) {
            return Err(ClientError::validation(format!(
                "{} is a {:?} image, which the backend cannot analyze",
                self.file_name, format
            )));
        }

        Ok(())
    }
}

fn too_large(file_name: &str, size: u64) -> ClientError {
    ClientError::validation(format!(
        "{file_name} is {size} bytes, larger than the {MAX_UPLOAD_BYTES} byte limit"
    ))
}

/// Uploads images and asks the backend to analyze them.
pub struct JobSubmitter {
    api: Arc<ApiClient>,
}

impl JobSubmitter {
    pub fn new(api: Arc<ApiClient>) -> Self {
        Self { api }
    }

    /// Validate locally, then upload via multipart `POST /analysis/upload`.
    pub async fn upload_image(&self, file: &ImageFile) -> Result<UploadedAsset, ClientError> {
        file.validate()?;

        let part = Part::bytes(file.bytes.clone())
            .file_name(file.file_name.clone())
            .mime_str(&file.content_type)
            .map_err(|e| ClientError::validation(format!("invalid content type: {e}")))?;
        let form = Form::new().part("file", part);

        let asset: UploadedAsset = self.api.post_multipart("/analysis/upload", form).await?;

        info!(
            filename = %asset.filename,
            stored_path = %asset.stored_path,
            bytes = file.bytes.len(),
            "Image uploaded"
        );
        Ok(asset)
    }

    /// Create an analysis job for an uploaded image.
    pub async fn request_analysis(
        &self,
        filename: &str,
        analysis_type: AnalysisType,
        parameters: Option<serde_json::Value>,
    ) -> Result<CreatedJob, ClientError> {
        let request = AnalyzeRequest {
            filename: filename.to_string(),
            analysis_type,
            parameters,
        };
        request.validate()?;

        let created: CreatedJob = self.api.post_json("/analysis/analyze", &request).await?;

        metrics::counter!(
            "analysis_jobs_submitted_total",
            "analysis_type" => analysis_type.to_string()
        )
        .increment(1);
        info!(
            job_id = %created.id,
            status = %created.status,
            analysis_type = %analysis_type,
            "Analysis job created"
        );
        Ok(created)
    }

    /// Same as [`request_analysis`](Self::request_analysis) for a type name
    /// typed by the user.
    pub async fn request_analysis_named(
        &self,
        filename: &str,
        analysis_type: &str,
    ) -> Result<CreatedJob, ClientError> {
        let analysis_type = parse_analysis_type(analysis_type)?;
        self.request_analysis(filename, analysis_type, None).await
    }
}

pub fn parse_analysis_type(raw: &str) -> Result<AnalysisType, ClientError> {
    raw.parse().map_err(|_| {
        ClientError::validation(format!(
            "unknown analysis type '{raw}', expected color_analysis, object_detection or vegetation_index"
        ))
    })
}
