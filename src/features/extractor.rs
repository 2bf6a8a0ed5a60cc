//! # Feature Extraction Pipeline
//!
//! Turns a raw audio file into the fixed-shape feature matrix the emotion
//! classifier was trained on. The constants in this module are frozen training
//! parameters, not tuning knobs - any change here silently degrades model
//! accuracy without raising an error:
//!
//! - Resample to 16kHz mono, trim silence
//! - 40 MFCCs (n_fft = 400, hop_length = 160)
//! - Delta + delta-delta → 120 channels per frame
//! - Pad / truncate to exactly 400 frames
//!
//! Output shape is invariantly (400, 120), row-major by time.

use crate::error::{AppError, AppResult};
use crate::features::audio;
use crate::features::mel::MfccProcessor;
use ndarray::{s, Array2};
use std::path::Path;
use tracing::{debug, info};

// ── Constants (must match the training pipeline) ──────────────
pub const SAMPLE_RATE: u32 = 16_000;
pub const N_MFCC: usize = 40;
pub const N_FFT: usize = 400;
pub const HOP_LENGTH: usize = 160;
pub const MAX_FRAMES: usize = 400;
pub const N_FEATURES: usize = 120; // 40 MFCC + 40 delta + 40 delta²

/// Minimum usable signal length after trimming: 0.1s at 16kHz
pub const MIN_SAMPLES: usize = SAMPLE_RATE as usize / 10;

/// Mel bands feeding the DCT
const N_MELS: usize = 128;

/// Silence trimmer parameters (dB below peak frame, frame/hop in samples)
const TRIM_TOP_DB: f32 = 60.0;
const TRIM_FRAME_LENGTH: usize = 2048;
const TRIM_HOP_LENGTH: usize = 512;

/// Half-width of the delta regression window (9 frames total)
const DELTA_HALF_WIDTH: usize = 4;

/// Extracts MFCC + delta + delta² features from audio files.
///
/// ## Thread Safety:
/// The FFT plan, window, and filterbank inside are built once and read-only;
/// every `extract` call uses its own scratch buffers, so a single extractor
/// can be shared behind `Arc` across concurrent request handlers.
pub struct FeatureExtractor {
    mfcc: MfccProcessor,
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl FeatureExtractor {
    /// Create an extractor with the frozen training-time parameters.
    pub fn new() -> Self {
        Self {
            mfcc: MfccProcessor::new(SAMPLE_RATE, N_FFT, HOP_LENGTH, N_MELS, N_MFCC),
        }
    }

    /// Extract the (400, 120) feature matrix from an audio file.
    ///
    /// ## Process:
    /// 1. Decode and resample to 16kHz mono
    /// 2. Trim leading/trailing silence
    /// 3. Validate minimum duration (0.1s after trimming)
    /// 4. MFCC + delta + delta², padded/truncated to 400 frames
    ///
    /// ## Returns:
    /// - **Ok(matrix)**: Feature matrix of shape (MAX_FRAMES, N_FEATURES)
    /// - **Err(AppError::InvalidAudio)**: Trimmed audio shorter than 0.1s
    /// - **Err(AppError::Internal)**: The file could not be decoded at all
    pub fn extract(&self, path: &Path) -> AppResult<Array2<f32>> {
        info!("Extracting features from: {}", path.display());

        let (samples, source_rate) = audio::decode_to_mono(path)?;
        let samples = audio::resample(&samples, source_rate, SAMPLE_RATE)?;

        let trimmed = audio::trim_silence(&samples, TRIM_TOP_DB, TRIM_FRAME_LENGTH, TRIM_HOP_LENGTH);
        debug!(
            "Trimmed {} -> {} samples",
            samples.len(),
            trimmed.len()
        );

        if trimmed.len() < MIN_SAMPLES {
            return Err(AppError::InvalidAudio(
                "audio too short after trimming silence (< 0.1s)".to_string(),
            ));
        }

        let features = self.features_from_samples(trimmed);
        debug!("Feature shape: {:?}", features.dim());
        Ok(features)
    }

    /// Compute the padded/truncated feature matrix from conditioned samples.
    ///
    /// Exposed within the crate so tests can drive the numeric pipeline
    /// without an audio file on disk.
    pub fn features_from_samples(&self, samples: &[f32]) -> Array2<f32> {
        pad_or_truncate(&self.assemble_features(samples))
    }

    /// MFCC + delta + delta² stacked to (n_frames, 120), before frame-count
    /// normalization.
    fn assemble_features(&self, samples: &[f32]) -> Array2<f32> {
        let mfcc = self.mfcc.compute(samples); // (40, T)
        let delta = delta(&mfcc);
        let delta2 = delta_second(&mfcc);

        let t = mfcc.ncols();
        let mut features = Array2::<f32>::zeros((t, N_FEATURES));
        // Channel layout matches training: [mfcc | delta | delta²]
        features
            .slice_mut(s![.., 0..N_MFCC])
            .assign(&mfcc.t());
        features
            .slice_mut(s![.., N_MFCC..2 * N_MFCC])
            .assign(&delta.t());
        features
            .slice_mut(s![.., 2 * N_MFCC..N_FEATURES])
            .assign(&delta2.t());
        features
    }
}

/// First-order temporal derivative via local linear regression.
///
/// ## Method:
/// For each frame t, fits the slope over a 9-frame window:
/// `delta[t] = Σ n·(x[t+n] − x[t−n]) / (2·Σ n²)` for n in 1..=4, with edge
/// frames replicated. Channel count is preserved.
fn delta(x: &Array2<f32>) -> Array2<f32> {
    let (channels, frames) = x.dim();
    let denom: f32 = 2.0 * (1..=DELTA_HALF_WIDTH).map(|n| (n * n) as f32).sum::<f32>();

    let mut out = Array2::<f32>::zeros((channels, frames));
    for c in 0..channels {
        for t in 0..frames {
            let mut acc = 0.0f32;
            for n in 1..=DELTA_HALF_WIDTH {
                // Replicate edge frames beyond the sequence boundaries
                let ahead = (t + n).min(frames - 1);
                let behind = t.saturating_sub(n);
                acc += n as f32 * (x[[c, ahead]] - x[[c, behind]]);
            }
            out[[c, t]] = acc / denom;
        }
    }
    out
}

/// Second-order temporal derivative via local quadratic regression.
///
/// ## Method:
/// Fits a parabola over the same 9-frame window and takes twice its leading
/// coefficient: `delta2[t] = 2 · Σ (n² − S2/S0)·x[t+n] / (S4 − S2²/S0)` for
/// n in -4..=4, with window moments S0 = 9, S2 = 60, S4 = 708 (denominator
/// 308). This is a single quadratic fit, not the slope estimator applied
/// twice - the two are different operators with different kernels. Edge
/// frames replicate, as in `delta`.
fn delta_second(x: &Array2<f32>) -> Array2<f32> {
    let (channels, frames) = x.dim();
    let w = DELTA_HALF_WIDTH as i64;
    let s0 = (2 * w + 1) as f32;
    let s2: f32 = 2.0 * (1..=DELTA_HALF_WIDTH).map(|n| (n * n) as f32).sum::<f32>();
    let s4: f32 = 2.0
        * (1..=DELTA_HALF_WIDTH)
            .map(|n| (n * n * n * n) as f32)
            .sum::<f32>();
    let denom = s4 - s2 * s2 / s0;

    let mut out = Array2::<f32>::zeros((channels, frames));
    for c in 0..channels {
        for t in 0..frames {
            let mut acc = 0.0f32;
            for n in -w..=w {
                let idx = (t as i64 + n).clamp(0, frames as i64 - 1) as usize;
                acc += ((n * n) as f32 - s2 / s0) * x[[c, idx]];
            }
            out[[c, t]] = 2.0 * acc / denom;
        }
    }
    out
}

/// Normalize the frame count to exactly MAX_FRAMES rows.
///
/// Extra trailing frames are discarded; missing frames are zero-filled. No
/// scaling or interpolation - the model expects real frames followed by
/// silence padding, exactly as during training.
fn pad_or_truncate(features: &Array2<f32>) -> Array2<f32> {
    let rows = features.nrows().min(MAX_FRAMES);
    let mut out = Array2::<f32>::zeros((MAX_FRAMES, N_FEATURES));
    out.slice_mut(s![0..rows, ..])
        .assign(&features.slice(s![0..rows, ..]));
    out
}
