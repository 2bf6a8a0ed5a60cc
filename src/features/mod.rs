//! # Feature Extraction Module
//!
//! Converts uploaded audio clips into the fixed-shape matrices the emotion
//! classifier consumes. The numeric pipeline here mirrors the training-time
//! preprocessing exactly - same frame sizes, same mel scale, same derivative
//! estimator - because the model has never seen anything else.
//!
//! ## Key Components:
//! - **Audio Conditioning**: Decode any supported container, resample to 16kHz
//!   mono, trim edge silence
//! - **MFCC Processor**: STFT, Slaney-style mel filterbank, log compression,
//!   and orthonormal DCT-II
//! - **Feature Extractor**: Assembles MFCC + delta + delta² channels and
//!   normalizes the clip to exactly 400 frames
//!
//! ## Output Contract:
//! Every successful extraction yields a (400, 120) f32 matrix, rows ordered by
//! time, channels ordered [40 MFCC | 40 delta | 40 delta²].

pub mod audio;      // Decoding, resampling, silence trimming
pub mod extractor;  // Pipeline assembly and frame-count normalization
pub mod mel;        // STFT, mel filterbank, DCT

pub use extractor::{FeatureExtractor, MAX_FRAMES, N_FEATURES, SAMPLE_RATE};
