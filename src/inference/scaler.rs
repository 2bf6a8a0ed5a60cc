//! # Feature Standardization
//!
//! Applies the per-channel standardization that was fitted on the training
//! set: `(x - mean) / std` for each of the 120 feature channels, applied to
//! every frame. The mean/std vectors are a versioned artifact produced by
//! training, loaded from JSON at startup, and frozen for the process lifetime.

use crate::error::{AppError, AppResult};
use crate::features::N_FEATURES;
use ndarray::Array2;
use serde::Deserialize;
use std::path::Path;
use tracing::info;

/// Fitted per-channel standardization parameters.
///
/// ## Artifact format:
/// A JSON object with two arrays of length 120:
/// `{"mean": [...], "std": [...]}`
#[derive(Debug, Clone, Deserialize)]
pub struct StandardScaler {
    mean: Vec<f32>,
    std: Vec<f32>,
}

impl StandardScaler {
    /// Load the scaler artifact from disk.
    ///
    /// ## Returns:
    /// - **Ok(scaler)**: Parsed and shape-validated scaler
    /// - **Err(AppError::ArtifactNotFound)**: The file does not exist
    /// - **Err(AppError::Internal)**: The file exists but is malformed
    pub fn load(path: &Path) -> AppResult<Self> {
        if !path.exists() {
            return Err(AppError::ArtifactNotFound(format!(
                "scaler artifact not found: {}",
                path.display()
            )));
        }

        let contents = std::fs::read_to_string(path)?;
        let scaler: StandardScaler = serde_json::from_str(&contents)?;
        scaler.validate()?;

        info!(
            "Loaded scaler with {} feature channels from {}",
            scaler.mean.len(),
            path.display()
        );
        Ok(scaler)
    }

    /// Build a scaler directly from mean/std vectors (used by tests).
    pub fn from_parts(mean: Vec<f32>, std: Vec<f32>) -> AppResult<Self> {
        let scaler = Self { mean, std };
        scaler.validate()?;
        Ok(scaler)
    }

    fn validate(&self) -> AppResult<()> {
        if self.mean.len() != N_FEATURES || self.std.len() != N_FEATURES {
            return Err(AppError::Internal(format!(
                "scaler artifact has {} mean / {} std channels, expected {}",
                self.mean.len(),
                self.std.len(),
                N_FEATURES
            )));
        }
        if self.std.iter().any(|&s| s == 0.0 || !s.is_finite()) {
            return Err(AppError::Internal(
                "scaler artifact contains zero or non-finite std values".to_string(),
            ));
        }
        Ok(())
    }

    /// Standardize a (frames, 120) matrix in place, channel by channel.
    ///
    /// The padding rows are standardized too - the model was trained on
    /// matrices scaled exactly this way, zero padding included.
    pub fn transform(&self, features: &mut Array2<f32>) {
        for mut row in features.rows_mut() {
            for (f, value) in row.iter_mut().enumerate() {
                *value = (*value - self.mean[f]) / self.std[f];
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn identity_scaler() -> StandardScaler {
        StandardScaler::from_parts(vec![0.0; N_FEATURES], vec![1.0; N_FEATURES]).unwrap()
    }

    #[test]
    fn test_identity_scaler_is_noop() {
        let scaler = identity_scaler();
        let mut features = Array2::<f32>::from_elem((10, N_FEATURES), 2.5);
        let original = features.clone();
        scaler.transform(&mut features);
        assert_eq!(features, original);
    }

    #[test]
    fn test_transform_applies_per_channel() {
        let mut mean = vec![0.0f32; N_FEATURES];
        let mut std = vec![1.0f32; N_FEATURES];
        mean[3] = 2.0;
        std[3] = 4.0;
        let scaler = StandardScaler::from_parts(mean, std).unwrap();

        let mut features = Array2::<f32>::from_elem((5, N_FEATURES), 10.0);
        scaler.transform(&mut features);

        for t in 0..5 {
            assert_eq!(features[[t, 3]], 2.0); // (10 - 2) / 4
            assert_eq!(features[[t, 0]], 10.0); // untouched channel
        }
    }

    #[test]
    fn test_load_missing_file_is_artifact_error() {
        let err = StandardScaler::load(Path::new("/nonexistent/scaler.json")).unwrap_err();
        assert!(matches!(err, AppError::ArtifactNotFound(_)));
    }

    #[test]
    fn test_load_rejects_wrong_channel_count() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scaler.json");
        std::fs::write(&path, r#"{"mean": [0.0, 0.0], "std": [1.0, 1.0]}"#).unwrap();

        let err = StandardScaler::load(&path).unwrap_err();
        assert!(matches!(err, AppError::Internal(_)));
    }

    #[test]
    fn test_load_rejects_zero_std() {
        let mean = vec![0.0f32; N_FEATURES];
        let mut std = vec![1.0f32; N_FEATURES];
        std[7] = 0.0;
        assert!(StandardScaler::from_parts(mean, std).is_err());
    }

    #[test]
    fn test_load_valid_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scaler.json");
        let artifact = serde_json::json!({
            "mean": vec![0.5f32; N_FEATURES],
            "std": vec![2.0f32; N_FEATURES],
        });
        std::fs::write(&path, artifact.to_string()).unwrap();

        let scaler = StandardScaler::load(&path).unwrap();
        let mut features = Array2::<f32>::from_elem((2, N_FEATURES), 4.5);
        scaler.transform(&mut features);
        assert_eq!(features[[0, 0]], 2.0); // (4.5 - 0.5) / 2
    }
}
