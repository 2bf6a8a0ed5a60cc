//! # Emotion Classifier Network
//!
//! The trained network that maps a standardized (400, 120) feature matrix to
//! class probabilities, implemented with Candle-rs. Architecture (fixed by the
//! training run, parameterized only by layer sizes):
//!
//! 1. Bidirectional LSTM over the 400 time steps
//! 2. Concatenated final hidden states (forward ++ backward)
//! 3. Dense layer with ReLU
//! 4. Linear output layer + softmax over the emotion classes
//!
//! ## Weight Artifact:
//! Weights are stored as safetensors under the names Candle's LSTM/linear
//! builders expect (`bilstm.weight_ih_l0`, `bilstm.weight_ih_l0_reverse`,
//! `dense.*`, `classifier.*`). The output layer width is checked against the
//! configured label table at load time, so a model/label mismatch fails at
//! startup instead of mislabeling predictions at runtime.

use crate::error::{AppError, AppResult};
use candle_core::{DType, Device, Tensor, D};
use candle_nn::rnn::Direction;
use candle_nn::{Linear, LSTMConfig, Module, VarBuilder, LSTM, RNN};
use std::path::Path;
use tracing::info;

/// The bidirectional LSTM emotion classifier.
#[derive(Debug)]
pub struct EmotionClassifier {
    forward_lstm: LSTM,
    backward_lstm: LSTM,
    dense: Linear,
    classifier: Linear,
    device: Device,
}

impl EmotionClassifier {
    /// Build the network graph from a variable source.
    ///
    /// ## Parameters:
    /// - **vb**: Variable builder backed by either a weight artifact (serving)
    ///   or a fresh VarMap (tests)
    /// - **n_features**: Input channels per time step (120)
    /// - **hidden_size**: LSTM hidden size per direction
    /// - **dense_size**: Width of the post-LSTM dense layer
    /// - **n_classes**: Output layer width (length of the label table)
    pub fn new(
        vb: VarBuilder,
        n_features: usize,
        hidden_size: usize,
        dense_size: usize,
        n_classes: usize,
    ) -> AppResult<Self> {
        let device = vb.device().clone();

        // The two LSTM directions share the "bilstm" prefix; the Backward
        // config gives the second set of weights the "_reverse" name suffix
        let forward_lstm = candle_nn::lstm(
            n_features,
            hidden_size,
            LSTMConfig::default(),
            vb.pp("bilstm"),
        )?;
        let backward_config = LSTMConfig {
            direction: Direction::Backward,
            ..LSTMConfig::default()
        };
        let backward_lstm =
            candle_nn::lstm(n_features, hidden_size, backward_config, vb.pp("bilstm"))?;

        let dense = candle_nn::linear(2 * hidden_size, dense_size, vb.pp("dense"))?;
        let classifier = candle_nn::linear(dense_size, n_classes, vb.pp("classifier"))?;

        Ok(Self {
            forward_lstm,
            backward_lstm,
            dense,
            classifier,
            device,
        })
    }

    /// Load the classifier from a safetensors weight artifact.
    ///
    /// ## Returns:
    /// - **Ok(model)**: Weights loaded and output width verified
    /// - **Err(AppError::ArtifactNotFound)**: The file does not exist
    /// - **Err(AppError::Internal)**: Corrupt artifact, missing tensors, or an
    ///   output layer whose width does not match the label table
    pub fn load(
        path: &Path,
        n_features: usize,
        hidden_size: usize,
        dense_size: usize,
        n_classes: usize,
        device: &Device,
    ) -> AppResult<Self> {
        if !path.exists() {
            return Err(AppError::ArtifactNotFound(format!(
                "model artifact not found: {}",
                path.display()
            )));
        }

        let tensors = candle_core::safetensors::load(path, device)?;

        // Fail at startup if the artifact was trained with a different class
        // count than the configured label table
        let output_weight = tensors.get("classifier.weight").ok_or_else(|| {
            AppError::Internal("model artifact is missing the output layer weights".to_string())
        })?;
        let output_width = output_weight.dim(0)?;
        if output_width != n_classes {
            return Err(AppError::Internal(format!(
                "model has {} output classes but {} labels are configured",
                output_width, n_classes
            )));
        }

        let vb = VarBuilder::from_tensors(tensors, DType::F32, device);
        let model = Self::new(vb, n_features, hidden_size, dense_size, n_classes)?;

        info!(
            "Loaded emotion classifier ({} classes, hidden={}) from {}",
            n_classes,
            hidden_size,
            path.display()
        );
        Ok(model)
    }

    /// Run the network on a batch of feature tensors.
    ///
    /// ## Parameters:
    /// - **input**: Tensor of shape (batch, frames, n_features)
    ///
    /// ## Returns:
    /// Softmax probabilities of shape (batch, n_classes), each row summing to 1.
    pub fn forward(&self, input: &Tensor) -> AppResult<Tensor> {
        let (_, seq_len, _) = input.dims3()?;

        // Forward pass over time; keep only the final hidden state
        let forward_states = self.forward_lstm.seq(input)?;
        let h_forward = forward_states
            .last()
            .ok_or_else(|| AppError::Internal("empty input sequence".to_string()))?
            .h()
            .clone();

        // The backward direction reads the sequence in reverse, so its final
        // hidden state summarizes the clip from the end toward the start
        let reversed = self.reverse_time(input, seq_len)?;
        let backward_states = self.backward_lstm.seq(&reversed)?;
        let h_backward = backward_states
            .last()
            .ok_or_else(|| AppError::Internal("empty input sequence".to_string()))?
            .h()
            .clone();

        let hidden = Tensor::cat(&[&h_forward, &h_backward], 1)?;
        let dense_out = self.dense.forward(&hidden)?.relu()?;
        let logits = self.classifier.forward(&dense_out)?;
        let probabilities = candle_nn::ops::softmax(&logits, D::Minus1)?;
        Ok(probabilities)
    }

    /// Reverse a (batch, seq, features) tensor along the time axis.
    fn reverse_time(&self, input: &Tensor, seq_len: usize) -> AppResult<Tensor> {
        let indices: Vec<u32> = (0..seq_len as u32).rev().collect();
        let index_tensor = Tensor::from_vec(indices, seq_len, &self.device)?;
        Ok(input.index_select(&index_tensor, 1)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_nn::VarMap;

    const N_FEATURES: usize = 120;
    const HIDDEN: usize = 16;
    const DENSE: usize = 8;
    const CLASSES: usize = 4;

    fn random_model(varmap: &VarMap, device: &Device) -> EmotionClassifier {
        let vb = VarBuilder::from_varmap(varmap, DType::F32, device);
        EmotionClassifier::new(vb, N_FEATURES, HIDDEN, DENSE, CLASSES).unwrap()
    }

    #[test]
    fn test_forward_output_shape_and_sum() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let model = random_model(&varmap, &device);

        let input = Tensor::randn(0.0f32, 1.0, (1, 50, N_FEATURES), &device).unwrap();
        let probs = model.forward(&input).unwrap();

        assert_eq!(probs.dims(), &[1, CLASSES]);
        let row: Vec<f32> = probs.squeeze(0).unwrap().to_vec1().unwrap();
        let sum: f32 = row.iter().sum();
        assert!((sum - 1.0).abs() < 1e-4, "probabilities sum to {}", sum);
        assert!(row.iter().all(|&p| (0.0..=1.0).contains(&p)));
    }

    #[test]
    fn test_forward_is_deterministic() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let model = random_model(&varmap, &device);

        let input = Tensor::ones((1, 30, N_FEATURES), DType::F32, &device).unwrap();
        let a: Vec<f32> = model
            .forward(&input)
            .unwrap()
            .squeeze(0)
            .unwrap()
            .to_vec1()
            .unwrap();
        let b: Vec<f32> = model
            .forward(&input)
            .unwrap()
            .squeeze(0)
            .unwrap()
            .to_vec1()
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_save_and_reload_roundtrip() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let model = random_model(&varmap, &device);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.safetensors");
        varmap.save(&path).unwrap();

        let reloaded =
            EmotionClassifier::load(&path, N_FEATURES, HIDDEN, DENSE, CLASSES, &device).unwrap();

        let input = Tensor::ones((1, 20, N_FEATURES), DType::F32, &device).unwrap();
        let original: Vec<f32> = model
            .forward(&input)
            .unwrap()
            .squeeze(0)
            .unwrap()
            .to_vec1()
            .unwrap();
        let restored: Vec<f32> = reloaded
            .forward(&input)
            .unwrap()
            .squeeze(0)
            .unwrap()
            .to_vec1()
            .unwrap();
        assert_eq!(original, restored);
    }

    #[test]
    fn test_load_missing_file_is_artifact_error() {
        let err = EmotionClassifier::load(
            Path::new("/nonexistent/model.safetensors"),
            N_FEATURES,
            HIDDEN,
            DENSE,
            CLASSES,
            &Device::Cpu,
        )
        .unwrap_err();
        assert!(matches!(err, AppError::ArtifactNotFound(_)));
    }

    #[test]
    fn test_load_rejects_label_count_mismatch() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let _model = random_model(&varmap, &device);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.safetensors");
        varmap.save(&path).unwrap();

        // Artifact has 4 output classes; configuring 6 labels must fail
        let err =
            EmotionClassifier::load(&path, N_FEATURES, HIDDEN, DENSE, 6, &device).unwrap_err();
        assert!(matches!(err, AppError::Internal(_)));
    }
}
