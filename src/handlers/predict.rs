//! # Prediction Handler
//!
//! The main endpoint of the service: accepts a multipart audio upload, runs
//! the feature-extraction pipeline and the classifier, and returns the
//! predicted emotion with per-class probabilities.
//!
//! ## Upload contract:
//! - Form field name: `file`
//! - Accepted extensions come from the upload configuration; a filename with
//!   no extension is treated as a webm blob (browser MediaRecorder uploads)
//! - Size is capped while streaming, so an oversized upload is rejected
//!   without buffering the whole body

use crate::error::AppError;
use crate::state::AppState;
use actix_multipart::{Field, Multipart};
use actix_web::{web, HttpResponse};
use futures_util::stream::StreamExt;
use serde_json::json;
use std::path::PathBuf;
use tracing::{info, warn};
use uuid::Uuid;

/// Deletes the uploaded temp file when the request finishes, on every exit
/// path including errors.
struct TempUpload {
    path: PathBuf,
}

impl Drop for TempUpload {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!("failed to remove temp upload {}: {}", self.path.display(), e);
        }
    }
}

/// Classify the emotion in an uploaded audio clip.
///
/// ## Endpoint: `POST /predict`
///
/// ## Response:
/// ```json
/// {
///   "emotion": "Happy",
///   "confidence": 0.8731,
///   "probabilities": {
///     "Angry": 0.0312, "Disgust": 0.0141, "Happy": 0.8731, "Sad": 0.0816
///   },
///   "timestamp": "2025-01-01T12:00:00Z"
/// }
/// ```
///
/// ## Errors:
/// - **400**: No file field, disallowed extension, or oversized upload
/// - **422**: The clip decoded but is unusable (too short after trimming)
/// - **500**: Decode or inference failure
pub async fn predict(
    state: web::Data<AppState>,
    mut payload: Multipart,
) -> Result<HttpResponse, AppError> {
    let upload_config = state.get_config().upload;

    let mut audio_data: Option<Vec<u8>> = None;
    let mut filename: Option<String> = None;

    while let Some(item) = payload.next().await {
        let mut field: Field =
            item.map_err(|e| AppError::ValidationError(format!("Multipart error: {}", e)))?;

        let content_disposition = field
            .content_disposition()
            .ok_or_else(|| AppError::ValidationError("Missing content disposition".to_string()))?;

        let field_name = content_disposition
            .get_name()
            .ok_or_else(|| AppError::ValidationError("Missing field name".to_string()))?;

        if field_name == "file" {
            filename = content_disposition.get_filename().map(|s| s.to_string());

            // Enforce the size cap while streaming so an oversized upload is
            // rejected as soon as it crosses the line
            let mut bytes = Vec::new();
            while let Some(chunk) = field.next().await {
                let chunk =
                    chunk.map_err(|e| AppError::ValidationError(format!("Chunk error: {}", e)))?;
                if bytes.len() + chunk.len() > upload_config.max_upload_bytes {
                    return Err(AppError::ValidationError(format!(
                        "File too large (max: {} bytes)",
                        upload_config.max_upload_bytes
                    )));
                }
                bytes.extend_from_slice(&chunk);
            }

            audio_data = Some(bytes);
        }
    }

    let audio_bytes = audio_data
        .ok_or_else(|| AppError::ValidationError("No audio file provided".to_string()))?;
    if audio_bytes.is_empty() {
        return Err(AppError::ValidationError("Uploaded file is empty".to_string()));
    }

    let extension = resolve_extension(filename.as_deref(), &upload_config.allowed_extensions)?;

    // Spool to a temp file for the decoder; removed by the guard on all paths
    let temp_path = std::env::temp_dir().join(format!("emotion-{}.{}", Uuid::new_v4(), extension));
    std::fs::write(&temp_path, &audio_bytes)?;
    let _guard = TempUpload {
        path: temp_path.clone(),
    };

    info!(
        "Predicting emotion for '{}' ({} bytes)",
        filename.as_deref().unwrap_or("<unnamed>"),
        audio_bytes.len()
    );

    // Feature extraction and inference are CPU-bound; run them off the
    // async executor threads
    let extractor = state.extractor.clone();
    let predictor = state.predictor.clone();
    let result = web::block(move || {
        let features = extractor.extract(&temp_path)?;
        predictor.predict(&features)
    })
    .await
    .map_err(|_| AppError::Internal("prediction task was cancelled".to_string()))??;

    state.record_prediction(&result.emotion);

    Ok(HttpResponse::Ok().json(json!({
        "emotion": result.emotion,
        "confidence": result.confidence,
        "probabilities": result.probabilities,
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}

/// Determine the effective file extension for an upload.
///
/// An empty filename is rejected outright. A missing extension defaults to
/// "webm" (browser recorder blobs arrive with bare names like "blob");
/// anything outside the allow-list is rejected.
fn resolve_extension(filename: Option<&str>, allowed: &[String]) -> Result<String, AppError> {
    if filename == Some("") {
        return Err(AppError::ValidationError(
            "Uploaded file has an empty filename".to_string(),
        ));
    }

    let extension = filename
        .and_then(|name| name.rsplit_once('.').map(|(_, ext)| ext.to_lowercase()))
        .unwrap_or_else(|| "webm".to_string());

    if !allowed.iter().any(|a| a == &extension) {
        return Err(AppError::ValidationError(format!(
            "File type '{}' is not supported (allowed: {})",
            extension,
            allowed.join(", ")
        )));
    }
    Ok(extension)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allowed() -> Vec<String> {
        vec!["wav".to_string(), "mp3".to_string(), "webm".to_string()]
    }

    #[test]
    fn test_resolve_extension_from_filename() {
        assert_eq!(resolve_extension(Some("clip.WAV"), &allowed()).unwrap(), "wav");
        assert_eq!(
            resolve_extension(Some("take.2.mp3"), &allowed()).unwrap(),
            "mp3"
        );
    }

    #[test]
    fn test_resolve_extension_defaults_to_webm() {
        // Browser MediaRecorder blobs upload with bare names
        assert_eq!(resolve_extension(Some("blob"), &allowed()).unwrap(), "webm");
        assert_eq!(resolve_extension(None, &allowed()).unwrap(), "webm");
    }

    #[test]
    fn test_resolve_extension_rejects_empty_filename() {
        let err = resolve_extension(Some(""), &allowed()).unwrap_err();
        assert!(matches!(err, AppError::ValidationError(_)));
    }

    #[test]
    fn test_resolve_extension_rejects_unknown() {
        let err = resolve_extension(Some("notes.txt"), &allowed()).unwrap_err();
        assert!(matches!(err, AppError::ValidationError(_)));
    }

    #[test]
    fn test_temp_upload_guard_removes_file() {
        let path = std::env::temp_dir().join(format!("emotion-test-{}.wav", Uuid::new_v4()));
        std::fs::write(&path, b"data").unwrap();
        assert!(path.exists());

        drop(TempUpload { path: path.clone() });
        assert!(!path.exists());
    }
}
