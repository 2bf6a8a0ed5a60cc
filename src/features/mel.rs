//! # MFCC Computation
//!
//! Short-time spectral analysis producing Mel-frequency cepstral coefficients.
//! Every step reproduces the transform the model was trained with:
//!
//! 1. Center the signal (zero-pad by n_fft/2 on each side)
//! 2. Periodic Hann window, real FFT, power spectrum per frame
//! 3. 128-band Slaney-style mel filterbank with area normalization
//! 4. Power-to-dB (amin = 1e-10, clamped to 80 dB below the peak)
//! 5. Orthonormal DCT-II along the mel axis, keeping the first n_mfcc rows
//!
//! The filterbank, window, and FFT plan are built once and shared read-only;
//! per-call scratch buffers keep `compute` safe for concurrent callers.

use ndarray::Array2;
use realfft::{num_complex::Complex, RealFftPlanner, RealToComplex};
use std::f32::consts::PI;
use std::sync::Arc;

/// MFCC processor with pre-computed filterbank, window, and FFT plan.
pub struct MfccProcessor {
    n_fft: usize,
    hop_length: usize,
    n_mfcc: usize,
    n_mels: usize,
    fft: Arc<dyn RealToComplex<f32>>,
    window: Vec<f32>,
    /// n_mels rows of n_fft/2 + 1 weights each
    mel_filterbank: Vec<Vec<f32>>,
    /// n_mfcc rows of n_mels cosine-basis weights each
    dct_basis: Vec<Vec<f32>>,
}

impl MfccProcessor {
    /// Build a processor for the given analysis parameters.
    pub fn new(
        sample_rate: u32,
        n_fft: usize,
        hop_length: usize,
        n_mels: usize,
        n_mfcc: usize,
    ) -> Self {
        // Periodic Hann window (denominator N, not N-1)
        let window: Vec<f32> = (0..n_fft)
            .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / n_fft as f32).cos()))
            .collect();

        let mel_filterbank = mel_filterbank(n_mels, n_fft, sample_rate as f32);
        let dct_basis = dct_basis(n_mfcc, n_mels);

        let mut planner = RealFftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(n_fft);

        Self {
            n_fft,
            hop_length,
            n_mfcc,
            n_mels,
            fft,
            window,
            mel_filterbank,
            dct_basis,
        }
    }

    /// Compute MFCCs for a mono signal.
    ///
    /// ## Returns:
    /// An (n_mfcc, n_frames) matrix where n_frames = 1 + len / hop_length
    /// (centered framing).
    pub fn compute(&self, samples: &[f32]) -> Array2<f32> {
        // Zero padding centers each frame on a hop multiple
        let pad = self.n_fft / 2;
        let mut padded = vec![0.0f32; samples.len() + 2 * pad];
        padded[pad..pad + samples.len()].copy_from_slice(samples);
        let n_frames = if padded.len() >= self.n_fft {
            1 + (padded.len() - self.n_fft) / self.hop_length
        } else {
            1
        };
        let n_bins = self.n_fft / 2 + 1;

        // Per-call scratch so `compute` can run concurrently across requests
        let mut fft_input = vec![0.0f32; self.n_fft];
        let mut fft_output = vec![Complex::new(0.0f32, 0.0); n_bins];
        let mut power_spec = vec![0.0f32; n_bins];

        // Log-mel energies, (n_mels, n_frames)
        let mut log_mel = Array2::<f32>::zeros((self.n_mels, n_frames));

        for frame_idx in 0..n_frames {
            let start = frame_idx * self.hop_length;
            let end = (start + self.n_fft).min(padded.len());

            // Windowed frame, zero-filled past the signal end
            fft_input.fill(0.0);
            for (i, &sample) in padded[start..end].iter().enumerate() {
                fft_input[i] = sample * self.window[i];
            }

            // realfft scratch buffers are provided per call, the plan is immutable
            self.fft
                .process(&mut fft_input, &mut fft_output)
                .expect("FFT buffer sizes are fixed by construction");

            for (p, c) in power_spec.iter_mut().zip(fft_output.iter()) {
                *p = c.re * c.re + c.im * c.im;
            }

            // Mel filterbank energies in dB (amin floor keeps log finite)
            for (m, filter) in self.mel_filterbank.iter().enumerate() {
                let energy: f32 = filter
                    .iter()
                    .zip(power_spec.iter())
                    .map(|(w, p)| w * p)
                    .sum();
                log_mel[[m, frame_idx]] = 10.0 * energy.max(1e-10).log10();
            }
        }

        // Clamp the dynamic range to 80 dB below the loudest bin
        let peak = log_mel.iter().cloned().fold(f32::MIN, f32::max);
        let floor = peak - 80.0;
        log_mel.mapv_inplace(|v| v.max(floor));

        // DCT-II along the mel axis
        let mut mfcc = Array2::<f32>::zeros((self.n_mfcc, n_frames));
        for t in 0..n_frames {
            for (k, basis) in self.dct_basis.iter().enumerate() {
                let mut acc = 0.0f32;
                for (m, &b) in basis.iter().enumerate() {
                    acc += b * log_mel[[m, t]];
                }
                mfcc[[k, t]] = acc;
            }
        }

        mfcc
    }
}

/// Convert frequency to the Slaney mel scale (linear below 1 kHz, log above).
fn hz_to_mel(hz: f32) -> f32 {
    const F_SP: f32 = 200.0 / 3.0;
    const MIN_LOG_HZ: f32 = 1000.0;
    const MIN_LOG_MEL: f32 = MIN_LOG_HZ / F_SP;
    let logstep = 6.4f32.ln() / 27.0;

    if hz >= MIN_LOG_HZ {
        MIN_LOG_MEL + (hz / MIN_LOG_HZ).ln() / logstep
    } else {
        hz / F_SP
    }
}

/// Convert the Slaney mel scale back to frequency.
fn mel_to_hz(mel: f32) -> f32 {
    const F_SP: f32 = 200.0 / 3.0;
    const MIN_LOG_HZ: f32 = 1000.0;
    const MIN_LOG_MEL: f32 = MIN_LOG_HZ / F_SP;
    let logstep = 6.4f32.ln() / 27.0;

    if mel >= MIN_LOG_MEL {
        MIN_LOG_HZ * (logstep * (mel - MIN_LOG_MEL)).exp()
    } else {
        F_SP * mel
    }
}

/// Create a Slaney-normalized triangular mel filterbank.
///
/// ## Construction:
/// n_mels + 2 points are spaced evenly on the mel scale between 0 Hz and the
/// Nyquist frequency; each filter ramps linearly in frequency (not bin index)
/// between its neighbors and is scaled by 2 / bandwidth so filters integrate
/// to roughly equal area.
fn mel_filterbank(n_mels: usize, n_fft: usize, sample_rate: f32) -> Vec<Vec<f32>> {
    let n_bins = n_fft / 2 + 1;
    let mel_min = hz_to_mel(0.0);
    let mel_max = hz_to_mel(sample_rate / 2.0);

    // Band edge frequencies in Hz
    let hz_points: Vec<f32> = (0..n_mels + 2)
        .map(|i| mel_to_hz(mel_min + (mel_max - mel_min) * i as f32 / (n_mels + 1) as f32))
        .collect();

    // Center frequency of each FFT bin
    let fft_freqs: Vec<f32> = (0..n_bins)
        .map(|k| k as f32 * sample_rate / n_fft as f32)
        .collect();

    let mut filterbank = Vec::with_capacity(n_mels);
    for i in 0..n_mels {
        let lower = hz_points[i];
        let center = hz_points[i + 1];
        let upper = hz_points[i + 2];

        // Slaney area normalization
        let enorm = 2.0 / (upper - lower);

        let filter: Vec<f32> = fft_freqs
            .iter()
            .map(|&f| {
                let rising = (f - lower) / (center - lower);
                let falling = (upper - f) / (upper - center);
                rising.min(falling).max(0.0) * enorm
            })
            .collect();
        filterbank.push(filter);
    }

    filterbank
}

/// Orthonormal DCT-II basis: n_mfcc rows over n_mels input bands.
fn dct_basis(n_mfcc: usize, n_mels: usize) -> Vec<Vec<f32>> {
    let mut basis = Vec::with_capacity(n_mfcc);
    for k in 0..n_mfcc {
        let scale = if k == 0 {
            (1.0 / n_mels as f32).sqrt()
        } else {
            (2.0 / n_mels as f32).sqrt()
        };
        let row: Vec<f32> = (0..n_mels)
            .map(|m| scale * (PI / n_mels as f32 * (m as f32 + 0.5) * k as f32).cos())
            .collect();
        basis.push(row);
    }
    basis
}
