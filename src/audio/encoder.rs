//! Clip encoding: resample to the preset rate, then MP3 (ffmpeg) or WAV (hound)
//!
//! Runs on the blocking pool; nothing here is async.

use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use hound::{WavSpec, WavWriter};
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

use super::backend::{AudioFormat, AudioQuality};
use crate::error::CaptureError;

/// Sinc filter length in input samples; the filter delays output by half of it.
const SINC_LEN: usize = 256;

/// A located encoder, ready to turn mono i16 PCM into a container.
#[derive(Debug, Clone)]
pub struct Encoder {
    format: AudioFormat,
    ffmpeg: Option<PathBuf>,
}

impl Encoder {
    /// Find what `format` needs. MP3 requires an `ffmpeg` binary with libmp3lame.
    pub fn locate(format: AudioFormat) -> Result<Self, CaptureError> {
        let ffmpeg = match format {
            AudioFormat::Mp3 => {
                let path = which::which("ffmpeg")
                    .map_err(|e| CaptureError::EncoderUnavailable(format!("ffmpeg: {}", e)))?;
                log::info!("Using ffmpeg for MP3 encoding: {:?}", path);
                Some(path)
            }
            AudioFormat::Wav => None,
        };
        Ok(Self { format, ffmpeg })
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    /// Encode mono samples captured at `source_rate` using the `quality` preset.
    pub fn encode(
        &self,
        samples: &[i16],
        source_rate: u32,
        quality: AudioQuality,
    ) -> Result<Vec<u8>, CaptureError> {
        let target_rate = quality.sample_rate();
        let resampled = resample(samples, source_rate, target_rate)?;

        match (self.format, &self.ffmpeg) {
            (AudioFormat::Wav, _) => encode_wav(&resampled, target_rate),
            (AudioFormat::Mp3, Some(ffmpeg)) => {
                encode_mp3(ffmpeg, &resampled, target_rate, quality.bit_rate_kbps())
            }
            (AudioFormat::Mp3, None) => Err(CaptureError::EncoderUnavailable(
                "ffmpeg not located".to_string(),
            )),
        }
    }
}

/// Resample mono i16 PCM. Returns the input unchanged when rates match.
pub fn resample(samples: &[i16], source_rate: u32, target_rate: u32) -> Result<Vec<i16>, CaptureError> {
    if source_rate == target_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let params = SincInterpolationParameters {
        sinc_len: SINC_LEN,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let ratio = target_rate as f64 / source_rate as f64;

    // Zero tail so the filter delay doesn't eat the last input samples
    let mut input: Vec<f32> = samples.iter().map(|&s| s as f32 / i16::MAX as f32).collect();
    input.resize(samples.len() + SINC_LEN, 0.0);

    let mut resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, input.len(), 1)
        .map_err(|e| CaptureError::EncodeFailed(format!("resampler: {}", e)))?;

    let output = resampler
        .process(&[input], None)
        .map_err(|e| CaptureError::EncodeFailed(format!("resample: {}", e)))?;

    let delay = (SINC_LEN as f64 * ratio / 2.0).round() as usize;
    let expected = (samples.len() as f64 * ratio).round() as usize;

    Ok(output
        .into_iter()
        .next()
        .unwrap_or_default()
        .into_iter()
        .skip(delay)
        .take(expected)
        .map(|s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
        .collect())
}

fn encode_wav(samples: &[i16], sample_rate: u32) -> Result<Vec<u8>, CaptureError> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut cursor, spec)
            .map_err(|e| CaptureError::EncodeFailed(e.to_string()))?;
        for &sample in samples {
            writer
                .write_sample(sample)
                .map_err(|e| CaptureError::EncodeFailed(e.to_string()))?;
        }
        writer
            .finalize()
            .map_err(|e| CaptureError::EncodeFailed(e.to_string()))?;
    }
    Ok(cursor.into_inner())
}

fn encode_mp3(
    ffmpeg: &Path,
    samples: &[i16],
    sample_rate: u32,
    bit_rate_kbps: u32,
) -> Result<Vec<u8>, CaptureError> {
    let mut child = Command::new(ffmpeg)
        .args([
            "-hide_banner",
            "-loglevel",
            "error",
            "-f",
            "s16le",
            "-ar",
            &sample_rate.to_string(),
            "-ac",
            "1",
            "-i",
            "pipe:0",
            "-c:a",
            "libmp3lame",
            "-b:a",
            &format!("{}k", bit_rate_kbps),
            "-f",
            "mp3",
            "pipe:1",
        ])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| CaptureError::EncodeFailed(format!("failed to start ffmpeg: {}", e)))?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| CaptureError::EncodeFailed("ffmpeg stdin unavailable".to_string()))?;

    let pcm: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();

    // Feed stdin from another thread so a full stdout pipe can't deadlock us
    let feeder = std::thread::spawn(move || -> std::io::Result<()> {
        stdin.write_all(&pcm)?;
        stdin.flush()
    });

    let output = child
        .wait_with_output()
        .map_err(|e| CaptureError::EncodeFailed(format!("ffmpeg: {}", e)))?;

    match feeder.join() {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Err(CaptureError::EncodeFailed(format!("ffmpeg stdin: {}", e))),
        Err(_) => return Err(CaptureError::EncodeFailed("ffmpeg feeder panicked".to_string())),
    }

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(CaptureError::EncodeFailed(format!(
            "ffmpeg exited with {}: {}",
            output.status,
            stderr.trim()
        )));
    }

    log::debug!(
        "Encoded {} samples to {} bytes of MP3 ({} Hz, {} kbps)",
        samples.len(),
        output.stdout.len(),
        sample_rate,
        bit_rate_kbps
    );
    Ok(output.stdout)
}
