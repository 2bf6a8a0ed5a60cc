//! # Configuration Management
//!
//! This module handles loading and managing application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Environment variables (APP_SERVER_HOST, APP_MODEL_MODEL_PATH, etc.)
//! 2. Configuration file (config.toml)
//! 3. Default values (defined in the Default impl)
//!
//! ## A note on the model section:
//! The artifact paths and the label table are frozen for the process lifetime.
//! They can be set through any configuration source at startup, but there is
//! deliberately no way to change them on a running server - the predictor is
//! loaded exactly once and has no reload path.

use anyhow::Result;              // Better error handling with context
use serde::{Deserialize, Serialize};  // For converting to/from TOML, JSON, etc.
use std::env;                    // For reading environment variables

/// Main application configuration that contains all settings.
///
/// ## Why separate config structs:
/// Breaking configuration into logical groups (server, model, upload)
/// makes it easier to understand and maintain as the application grows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub model: ModelConfig,
    pub upload: UploadConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (production)
/// - `port = 5000`: Matches the port the frontend expects
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Model and scaler artifact configuration.
///
/// ## Fields:
/// - `model_path`: Path to the trained classifier weights (safetensors)
/// - `scaler_path`: Path to the fitted per-channel mean/std scaler (JSON)
/// - `labels`: Ordinal-to-label table, in the exact order the model's output
///   layer was trained with. Versioned alongside the model artifact - any
///   reordering is a breaking contract change.
/// - `device`: Inference device preference ("auto", "cpu", "cuda", "metal")
/// - `lstm_hidden_size` / `dense_size`: Architecture hyperparameters of the
///   trained network; must match the shapes stored in the artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub model_path: String,
    pub scaler_path: String,
    pub labels: Vec<String>,
    pub device: String,
    pub lstm_hidden_size: usize,
    pub dense_size: usize,
}

/// Upload handling configuration.
///
/// ## Fields:
/// - `max_upload_bytes`: Maximum accepted audio file size
/// - `allowed_extensions`: File extensions accepted by /predict. Files with no
///   extension at all are also accepted (browser MediaRecorder blobs).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    pub max_upload_bytes: usize,
    pub allowed_extensions: Vec<String>,
}

/// Provides default configuration values.
///
/// ## Why defaults matter:
/// Default values ensure the application can start even if no configuration file
/// exists. They also serve as documentation of reasonable starting values.
impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),  // Localhost only (safe for development)
                port: 5000,                     // Port the original API served on
            },
            model: ModelConfig {
                model_path: "model/ser_model.safetensors".to_string(),
                scaler_path: "model/scaler.json".to_string(),
                // Must match the training-time label encoding exactly
                labels: vec![
                    "Angry".to_string(),
                    "Happy".to_string(),
                    "Sad".to_string(),
                    "Disgust".to_string(),
                ],
                device: "auto".to_string(),
                lstm_hidden_size: 128,
                dense_size: 64,
            },
            upload: UploadConfig {
                max_upload_bytes: 10 * 1024 * 1024,  // 10 MB
                allowed_extensions: vec![
                    "wav".to_string(),
                    "mp3".to_string(),
                    "webm".to_string(),
                    "ogg".to_string(),
                    "flac".to_string(),
                    "m4a".to_string(),
                ],
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Configuration Loading Process:
    /// 1. Start with built-in defaults
    /// 2. Override with values from config.toml (if it exists)
    /// 3. Override with environment variables prefixed with APP_
    /// 4. Handle special cases for HOST and PORT environment variables
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER_HOST=0.0.0.0`: Override server host
    /// - `APP_MODEL_MODEL_PATH=/srv/model/ser.safetensors`: Override model path
    /// - `HOST=0.0.0.0` / `PORT=3000`: Special cases for deployment platforms
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            // 1. Start with defaults - converts our Default impl to config format
            .add_source(config::Config::try_from(&AppConfig::default())?)
            // 2. Load from config.toml file (if it exists)
            .add_source(config::File::with_name("config").required(false))
            // 3. Load from environment variables with APP_ prefix
            // Example: APP_SERVER_HOST becomes server.host in the config
            .add_source(config::Environment::with_prefix("APP").separator("_"));

        // Handle special environment variables used by deployment platforms
        // These don't follow the APP_ prefix convention but are commonly used
        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        // Build the final configuration and convert it back to our AppConfig struct
        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## What this checks:
    /// - Server port is not 0 (port 0 is reserved and can't be used)
    /// - The label table is non-empty (the class map drives the output layer check)
    /// - Upload size cap is greater than 0
    /// - Architecture hyperparameters are non-zero
    ///
    /// ## Why validate:
    /// Catching configuration errors early prevents runtime failures and
    /// provides clear error messages about what's wrong.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.model.labels.is_empty() {
            return Err(anyhow::anyhow!("Emotion label table cannot be empty"));
        }

        if self.upload.max_upload_bytes == 0 {
            return Err(anyhow::anyhow!("Max upload size must be greater than 0"));
        }

        if self.model.lstm_hidden_size == 0 || self.model.dense_size == 0 {
            return Err(anyhow::anyhow!("Model layer sizes must be greater than 0"));
        }

        Ok(())  // All validation passed
    }

    /// Update configuration from a JSON string (used for runtime config updates).
    ///
    /// ## Partial updates:
    /// Only the upload section can change at runtime - for example,
    /// `{"upload": {"max_upload_bytes": 20971520}}` raises the size cap.
    /// Artifact paths, the label table, and server binding are load-time-only:
    /// the predictor has no reload path, so accepting changes here would
    /// silently desynchronize configuration from the artifacts actually
    /// serving predictions.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        // Parse the JSON string into a generic value
        let partial_config: serde_json::Value = serde_json::from_str(json_str)?;

        // Update upload configuration if provided
        if let Some(upload) = partial_config.get("upload") {
            if let Some(max_bytes) = upload.get("max_upload_bytes").and_then(|v| v.as_u64()) {
                self.upload.max_upload_bytes = max_bytes as usize;
            }
            if let Some(exts) = upload.get("allowed_extensions").and_then(|v| v.as_array()) {
                self.upload.allowed_extensions = exts
                    .iter()
                    .filter_map(|v| v.as_str())
                    .map(|s| s.to_lowercase())
                    .collect();
            }
        }

        // Reject attempts to mutate load-time-only sections instead of silently
        // ignoring them
        if partial_config.get("model").is_some() {
            return Err(anyhow::anyhow!(
                "Model configuration is fixed for the process lifetime; restart with new settings"
            ));
        }

        // Validate the updated configuration to ensure it's still valid
        self.validate()?;
        Ok(())
    }
}
