//! # Inference Module
//!
//! Runs the trained emotion classifier over extracted feature matrices using
//! the Candle-rs framework. All pieces are loaded once at startup from
//! versioned artifacts and shared immutably across request handlers.
//!
//! ## Key Components:
//! - **Standard Scaler**: Per-channel standardization fitted at training time
//! - **Emotion Classifier**: Bidirectional LSTM network (Candle-rs)
//! - **Emotion Predictor**: Scaler + model + label table, producing the final
//!   label/confidence/probability response

pub mod model;      // BiLSTM network definition and artifact loading
pub mod predictor;  // End-to-end classification of feature matrices
pub mod scaler;     // Per-channel standardization

pub use predictor::{EmotionPredictor, PredictionResult};
pub use scaler::StandardScaler;
