//! # Audio Loading and Conditioning
//!
//! Turns an uploaded audio file into the mono 16kHz waveform the feature
//! pipeline was trained on. Three stages, all of which must match the
//! training-time preprocessing:
//!
//! - **Decode**: symphonia probes the container (WAV, MP3, OGG, FLAC, M4A, ...)
//!   and decodes whatever track it finds to f32 samples, downmixed to mono.
//! - **Resample**: rubato's FFT resampler converts the source rate to 16kHz.
//! - **Trim**: leading/trailing low-energy regions are removed with a frame-RMS
//!   threshold relative to the clip's loudest frame.

use anyhow::{anyhow, Context, Result};
use rubato::{FftFixedIn, Resampler};
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::debug;

/// Decode an audio file to mono f32 samples at its native sample rate.
///
/// ## Process:
/// 1. Probe the container format (the file extension is only a hint)
/// 2. Decode every packet of the first decodable track
/// 3. Downmix interleaved channels to mono by averaging
///
/// ## Returns:
/// - **Ok((samples, sample_rate))**: Mono samples and the source rate
/// - **Err**: The file is not decodable audio
pub fn decode_to_mono(path: &Path) -> Result<(Vec<f32>, u32)> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("could not open audio file: {}", path.display()))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    // Give the probe the file extension as a hint, if there is one
    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .context("unrecognized audio format")?;
    let mut format = probed.format;

    // Pick the first track symphonia knows how to decode
    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| anyhow!("no decodable audio track found"))?;
    let track_id = track.id;
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| anyhow!("source sample rate unknown"))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .context("could not create audio decoder")?;

    let mut mono: Vec<f32> = Vec::new();
    let mut sample_buf: Option<SampleBuffer<f32>> = None;
    let mut channels = 1usize;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            // End of stream
            Err(SymphoniaError::IoError(ref e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(anyhow!("error reading audio packet: {}", e)),
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                // Allocate the conversion buffer on the first decoded frame,
                // once the signal spec is known
                if sample_buf.is_none() {
                    let spec = *decoded.spec();
                    channels = spec.channels.count().max(1);
                    sample_buf = Some(SampleBuffer::<f32>::new(decoded.capacity() as u64, spec));
                }

                let buf = sample_buf.as_mut().unwrap();
                buf.copy_interleaved_ref(decoded);

                // Downmix interleaved frames to mono by averaging channels
                if channels == 1 {
                    mono.extend_from_slice(buf.samples());
                } else {
                    for frame in buf.samples().chunks_exact(channels) {
                        mono.push(frame.iter().sum::<f32>() / channels as f32);
                    }
                }
            }
            // Skip over corrupt packets rather than abandoning the whole clip
            Err(SymphoniaError::DecodeError(e)) => {
                debug!("skipping undecodable packet: {}", e);
            }
            Err(e) => return Err(anyhow!("audio decode failed: {}", e)),
        }
    }

    if mono.is_empty() {
        return Err(anyhow!("audio stream contained no samples"));
    }

    debug!(
        "Decoded {} samples at {} Hz ({} channel(s))",
        mono.len(),
        sample_rate,
        channels
    );

    Ok((mono, sample_rate))
}

/// Resample a mono signal from `from_rate` to `to_rate`.
///
/// ## Process:
/// Feeds the signal through rubato's `FftFixedIn` in fixed 1024-sample chunks
/// (zero-padding the final partial chunk), then flushes the resampler's
/// internal latency with silence until the expected output length is reached.
///
/// ## Why fixed output length:
/// The feature pipeline's frame count depends directly on sample count, so the
/// output is clipped to `round(len * to_rate / from_rate)` samples - the same
/// signal length every run for the same input (determinism contract).
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    if from_rate == to_rate {
        return Ok(samples.to_vec());
    }

    const CHUNK_SIZE: usize = 1024;

    debug!(
        "Resampling {} Hz -> {} Hz ({} samples)",
        from_rate,
        to_rate,
        samples.len()
    );

    let mut resampler = FftFixedIn::<f32>::new(
        from_rate as usize,
        to_rate as usize,
        CHUNK_SIZE,
        2, // sub_chunks for quality
        1, // mono
    )
    .context("failed to create resampler")?;

    let ratio = to_rate as f64 / from_rate as f64;
    let expected_len = (samples.len() as f64 * ratio).round() as usize;

    let mut input_buffer = vec![vec![0.0f32; CHUNK_SIZE]];
    let mut output_buffer = resampler.output_buffer_allocate(true);
    let mut output: Vec<f32> = Vec::with_capacity(expected_len + CHUNK_SIZE);

    for chunk in samples.chunks(CHUNK_SIZE) {
        input_buffer[0][..chunk.len()].copy_from_slice(chunk);
        input_buffer[0][chunk.len()..].fill(0.0); // zero-pad the final partial chunk

        let (_, out_frames) = resampler
            .process_into_buffer(&input_buffer, &mut output_buffer, None)
            .context("resampling failed")?;
        output.extend_from_slice(&output_buffer[0][..out_frames]);
    }

    // Flush the resampler's latency with silence
    input_buffer[0].fill(0.0);
    while output.len() < expected_len {
        let (_, out_frames) = resampler
            .process_into_buffer(&input_buffer, &mut output_buffer, None)
            .context("resampler flush failed")?;
        if out_frames == 0 {
            break;
        }
        output.extend_from_slice(&output_buffer[0][..out_frames]);
    }

    output.truncate(expected_len);
    Ok(output)
}

/// Trim leading and trailing silence from a signal.
///
/// ## Method:
/// Computes RMS energy over `frame_length`-sample windows centered on
/// multiples of `hop_length` (signal edges zero-padded, divisor fixed at
/// `frame_length`), then keeps the span between the first and last frames
/// whose RMS exceeds `peak_rms * 10^(-top_db / 20)` - i.e., frames within
/// `top_db` decibels of the loudest frame.
///
/// ## Returns:
/// The non-silent sub-slice. A digitally silent input yields an empty slice
/// (the caller's minimum-duration check turns that into a validation error).
pub fn trim_silence(
    samples: &[f32],
    top_db: f32,
    frame_length: usize,
    hop_length: usize,
) -> &[f32] {
    if samples.is_empty() {
        return samples;
    }

    // RMS per centered frame; frame f covers [f*hop - half, f*hop + half)
    let half = frame_length / 2;
    let n_frames = 1 + samples.len() / hop_length;
    let mut rms: Vec<f32> = Vec::with_capacity(n_frames);
    for f in 0..n_frames {
        let center = f * hop_length;
        let start = center.saturating_sub(half);
        let end = (center + half).min(samples.len());
        let sum_sq: f32 = samples[start..end].iter().map(|s| s * s).sum();
        rms.push((sum_sq / frame_length as f32).sqrt());
    }

    let peak = rms.iter().cloned().fold(0.0f32, f32::max);
    if peak <= 0.0 {
        // Pure digital silence
        return &samples[0..0];
    }

    let threshold = peak * 10f32.powf(-top_db / 20.0);
    let first = rms.iter().position(|&r| r > threshold);
    let last = rms.iter().rposition(|&r| r > threshold);

    match (first, last) {
        (Some(first), Some(last)) => {
            let begin = first * hop_length;
            let end = ((last + 1) * hop_length).min(samples.len());
            &samples[begin..end]
        }
        _ => &samples[0..0],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn sine(freq: f32, rate: u32, seconds: f32) -> Vec<f32> {
        let n = (rate as f32 * seconds) as usize;
        (0..n)
            .map(|i| (2.0 * PI * freq * i as f32 / rate as f32).sin() * 0.5)
            .collect()
    }

    #[test]
    fn test_resample_48k_to_16k_length() {
        let input = sine(440.0, 48000, 1.0);
        let output = resample(&input, 48000, 16000).expect("resampling failed");

        // Output length is pinned to round(len * ratio)
        assert_eq!(output.len(), 16000);
    }

    #[test]
    fn test_resample_identity() {
        let input = sine(440.0, 16000, 0.5);
        let output = resample(&input, 16000, 16000).unwrap();
        assert_eq!(input, output);
    }

    #[test]
    fn test_trim_removes_edge_silence() {
        // 0.5s silence + 1s tone + 0.5s silence at 16kHz
        let mut samples = vec![0.0f32; 8000];
        samples.extend(sine(440.0, 16000, 1.0));
        samples.extend(vec![0.0f32; 8000]);

        let trimmed = trim_silence(&samples, 60.0, 2048, 512);

        // The tone should survive; the frame granularity of the trimmer allows
        // up to one hop of slack on each side
        assert!(trimmed.len() >= 16000 - 2 * 2048);
        assert!(trimmed.len() < samples.len() - 8000);
    }

    #[test]
    fn test_trim_pure_silence_is_empty() {
        let samples = vec![0.0f32; 800]; // 0.05s of digital silence
        let trimmed = trim_silence(&samples, 60.0, 2048, 512);
        assert!(trimmed.is_empty());
    }

    #[test]
    fn test_trim_frames_are_centered() {
        // 8192 samples of silence, then a flat 0.5 tone. The first frame whose
        // centered window [f*512 - 1024, f*512 + 1024) reaches the tone is
        // f = 15, so trimming starts at exactly 15 * 512 = 7680.
        let mut samples = vec![0.0f32; 8192];
        samples.extend(vec![0.5f32; 8192]);

        let trimmed = trim_silence(&samples, 60.0, 2048, 512);
        assert_eq!(trimmed.len(), samples.len() - 7680);
    }

    #[test]
    fn test_trim_keeps_loud_signal() {
        let samples = sine(440.0, 16000, 1.0);
        let trimmed = trim_silence(&samples, 60.0, 2048, 512);
        // A uniformly loud clip should be kept essentially whole
        assert!(trimmed.len() > samples.len() - 2048);
    }
}
