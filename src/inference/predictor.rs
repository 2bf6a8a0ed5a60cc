//! # Emotion Predictor
//!
//! Ties the inference pieces together: standardize the feature matrix, run the
//! classifier, and turn the probability vector into the response the API
//! serves. Loaded exactly once at startup from the configured artifacts; a
//! missing artifact aborts startup rather than producing a server that fails
//! every request.

use crate::config::ModelConfig;
use crate::error::{AppError, AppResult};
use crate::features::{MAX_FRAMES, N_FEATURES};
use crate::inference::model::EmotionClassifier;
use crate::inference::scaler::StandardScaler;
use candle_core::{Device, Tensor};
use ndarray::Array2;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

/// A single classification result, serialized directly into the API response.
#[derive(Debug, Clone, Serialize)]
pub struct PredictionResult {
    /// The label of the most probable class
    pub emotion: String,
    /// Probability of the predicted class, rounded to 4 decimal places
    pub confidence: f32,
    /// Label -> probability for every class, rounded to 4 decimal places
    pub probabilities: BTreeMap<String, f32>,
}

/// The full inference stack: scaler + classifier + label table on one device.
#[derive(Debug)]
pub struct EmotionPredictor {
    scaler: StandardScaler,
    model: EmotionClassifier,
    labels: Vec<String>,
    device: Device,
}

impl EmotionPredictor {
    /// Load scaler and model artifacts per the model configuration.
    ///
    /// Called once at startup. Either artifact missing surfaces as
    /// `AppError::ArtifactNotFound`, which main() treats as fatal.
    pub fn load(config: &ModelConfig, device: Device) -> AppResult<Self> {
        let scaler = StandardScaler::load(Path::new(&config.scaler_path))?;
        let model = EmotionClassifier::load(
            Path::new(&config.model_path),
            N_FEATURES,
            config.lstm_hidden_size,
            config.dense_size,
            config.labels.len(),
            &device,
        )?;

        info!(
            "Emotion predictor ready with labels: {}",
            config.labels.join(", ")
        );

        Ok(Self {
            scaler,
            model,
            labels: config.labels.clone(),
            device,
        })
    }

    /// Build a predictor from already-constructed parts (used by tests).
    pub fn from_parts(
        scaler: StandardScaler,
        model: EmotionClassifier,
        labels: Vec<String>,
        device: Device,
    ) -> Self {
        Self {
            scaler,
            model,
            labels,
            device,
        }
    }

    /// Classify a (400, 120) feature matrix.
    ///
    /// ## Process:
    /// 1. Standardize every channel with the fitted scaler
    /// 2. Run the network as a batch of one
    /// 3. Argmax -> label, round all probabilities for the response
    ///
    /// A matrix of any other shape is a bug in the extraction pipeline, not a
    /// client error, and fails loudly as an internal error.
    pub fn predict(&self, features: &Array2<f32>) -> AppResult<PredictionResult> {
        if features.dim() != (MAX_FRAMES, N_FEATURES) {
            return Err(AppError::Internal(format!(
                "feature matrix has shape {:?}, expected ({}, {})",
                features.dim(),
                MAX_FRAMES,
                N_FEATURES
            )));
        }

        let mut standardized = features.clone();
        self.scaler.transform(&mut standardized);

        // Row-major (frames, channels) flattens directly into the tensor layout
        let flat: Vec<f32> = standardized.iter().copied().collect();
        let input = Tensor::from_vec(flat, (1, MAX_FRAMES, N_FEATURES), &self.device)?;

        let probabilities = self.model.forward(&input)?;
        let probabilities: Vec<f32> = probabilities.squeeze(0)?.to_vec1()?;

        if probabilities.len() != self.labels.len() {
            return Err(AppError::Internal(format!(
                "model produced {} probabilities for {} labels",
                probabilities.len(),
                self.labels.len()
            )));
        }

        // Argmax over the class probabilities
        let (best_index, best_prob) = probabilities
            .iter()
            .copied()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .ok_or_else(|| AppError::Internal("model produced no probabilities".to_string()))?;

        let result = PredictionResult {
            emotion: self.labels[best_index].clone(),
            confidence: round4(best_prob),
            probabilities: self
                .labels
                .iter()
                .cloned()
                .zip(probabilities.iter().map(|&p| round4(p)))
                .collect(),
        };

        debug!(
            "Predicted '{}' with confidence {:.4}",
            result.emotion, result.confidence
        );
        Ok(result)
    }

    /// The configured label table, in model output order.
    pub fn labels(&self) -> &[String] {
        &self.labels
    }
}

/// Round to 4 decimal places for presentation.
fn round4(value: f32) -> f32 {
    (value * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::DType;
    use candle_nn::{VarBuilder, VarMap};

    const HIDDEN: usize = 16;
    const DENSE: usize = 8;

    fn test_labels() -> Vec<String> {
        vec![
            "Angry".to_string(),
            "Happy".to_string(),
            "Sad".to_string(),
            "Disgust".to_string(),
        ]
    }

    fn test_predictor() -> EmotionPredictor {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let model = EmotionClassifier::new(vb, N_FEATURES, HIDDEN, DENSE, 4).unwrap();
        let scaler =
            StandardScaler::from_parts(vec![0.0; N_FEATURES], vec![1.0; N_FEATURES]).unwrap();
        EmotionPredictor::from_parts(scaler, model, test_labels(), device)
    }

    #[test]
    fn test_predict_result_contract() {
        let predictor = test_predictor();
        let features = Array2::<f32>::from_elem((MAX_FRAMES, N_FEATURES), 0.1);

        let result = predictor.predict(&features).unwrap();

        // Label comes from the configured table
        assert!(test_labels().contains(&result.emotion));
        // Every class appears in the probability map
        assert_eq!(result.probabilities.len(), 4);
        for label in test_labels() {
            assert!(result.probabilities.contains_key(&label));
        }
        // Confidence is the probability of the predicted class
        assert_eq!(result.confidence, result.probabilities[&result.emotion]);
        // Rounded probabilities still sum to ~1
        let sum: f32 = result.probabilities.values().sum();
        assert!((sum - 1.0).abs() < 1e-2, "probabilities sum to {}", sum);
    }

    #[test]
    fn test_predict_is_deterministic() {
        let predictor = test_predictor();
        let features = Array2::<f32>::from_elem((MAX_FRAMES, N_FEATURES), 0.25);

        let a = predictor.predict(&features).unwrap();
        let b = predictor.predict(&features).unwrap();
        assert_eq!(a.emotion, b.emotion);
        assert_eq!(a.probabilities, b.probabilities);
    }

    #[test]
    fn test_predict_rejects_wrong_shape() {
        let predictor = test_predictor();
        let features = Array2::<f32>::zeros((100, N_FEATURES));

        let err = predictor.predict(&features).unwrap_err();
        assert!(matches!(err, AppError::Internal(_)));
    }

    #[test]
    fn test_load_from_saved_artifacts() {
        let device = Device::Cpu;
        let dir = tempfile::tempdir().unwrap();

        // Write a random model artifact
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let _ = EmotionClassifier::new(vb, N_FEATURES, HIDDEN, DENSE, 4).unwrap();
        let model_path = dir.path().join("model.safetensors");
        varmap.save(&model_path).unwrap();

        // And a matching scaler artifact
        let scaler_path = dir.path().join("scaler.json");
        let artifact = serde_json::json!({
            "mean": vec![0.0f32; N_FEATURES],
            "std": vec![1.0f32; N_FEATURES],
        });
        std::fs::write(&scaler_path, artifact.to_string()).unwrap();

        let config = ModelConfig {
            model_path: model_path.to_string_lossy().to_string(),
            scaler_path: scaler_path.to_string_lossy().to_string(),
            labels: test_labels(),
            device: "cpu".to_string(),
            lstm_hidden_size: HIDDEN,
            dense_size: DENSE,
        };

        let predictor = EmotionPredictor::load(&config, device).unwrap();
        let features = Array2::<f32>::zeros((MAX_FRAMES, N_FEATURES));
        let result = predictor.predict(&features).unwrap();
        assert_eq!(result.probabilities.len(), 4);
    }

    #[test]
    fn test_load_missing_artifacts_fails() {
        let config = ModelConfig {
            model_path: "/nonexistent/model.safetensors".to_string(),
            scaler_path: "/nonexistent/scaler.json".to_string(),
            labels: test_labels(),
            device: "cpu".to_string(),
            lstm_hidden_size: HIDDEN,
            dense_size: DENSE,
        };

        let err = EmotionPredictor::load(&config, Device::Cpu).unwrap_err();
        assert!(matches!(err, AppError::ArtifactNotFound(_)));
    }

    #[test]
    fn test_end_to_end_wav_prediction() {
        use crate::features::FeatureExtractor;
        use std::f32::consts::PI;

        // 2s of sine + mild noise written as a 16kHz WAV
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.wav");
        let mut state: u32 = 0x1234_5678;
        let samples: Vec<i16> = (0..32_000)
            .map(|i| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                let noise = (state as f32 / u32::MAX as f32 - 0.5) * 0.02;
                let s = (2.0 * PI * 330.0 * i as f32 / 16_000.0).sin() * 0.4 + noise;
                (s * i16::MAX as f32 * 0.8) as i16
            })
            .collect();
        let header = wav::Header::new(wav::header::WAV_FORMAT_PCM, 1, 16_000, 16);
        let mut file = std::fs::File::create(&path).unwrap();
        wav::write(header, &wav::BitDepth::Sixteen(samples), &mut file).unwrap();

        let extractor = FeatureExtractor::new();
        let features = extractor.extract(&path).unwrap();

        let predictor = test_predictor();
        let result = predictor.predict(&features).unwrap();
        assert!(test_labels().contains(&result.emotion));
        assert_eq!(result.probabilities.len(), 4);
    }

    #[test]
    fn test_round4() {
        assert_eq!(round4(0.123456), 0.1235);
        assert_eq!(round4(0.99999), 1.0);
        assert_eq!(round4(0.0), 0.0);
    }
}
