//! Microphone capture using CPAL
//!
//! `CpalBackend` captures from the default input device, downmixes to mono
//! i16, runs each new chunk through the gain processor and keeps the clip in
//! memory until `stop()` encodes it. The CPAL stream is not `Send`, so it
//! lives on a dedicated audio thread for the duration of a capture.

use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, InputCallbackInfo, SampleFormat, Stream, StreamConfig, StreamInstant};
use tokio::sync::oneshot;

use super::backend::{CaptureBackend, CaptureSettings, FaultSender, RecordingResult};
use super::encoder::Encoder;
use super::gain::{apply_gain, Gain};
use super::gap_fill::GapFiller;
use crate::error::CaptureError;

type SampleStore = Arc<Mutex<Vec<i16>>>;

struct OpenDevice {
    device: Device,
    config: StreamConfig,
    sample_format: SampleFormat,
    settings: CaptureSettings,
    encoder: Encoder,
}

struct ActiveCapture {
    stop_tx: std_mpsc::Sender<()>,
    thread: JoinHandle<()>,
    samples: SampleStore,
}

impl ActiveCapture {
    /// Signal the audio thread and wait for it to drop the stream.
    async fn shutdown(self) -> SampleStore {
        let _ = self.stop_tx.send(());
        let thread = self.thread;
        if let Err(e) = tokio::task::spawn_blocking(move || thread.join()).await {
            log::warn!("Audio thread join task failed: {}", e);
        }
        self.samples
    }
}

/// Capture backend for the default input device.
pub struct CpalBackend {
    open: Option<OpenDevice>,
    capture: Option<ActiveCapture>,
}

impl CpalBackend {
    pub fn new() -> Self {
        Self {
            open: None,
            capture: None,
        }
    }
}

impl Default for CpalBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CaptureBackend for CpalBackend {
    fn name(&self) -> &str {
        "cpal"
    }

    fn is_open(&self) -> bool {
        self.open.is_some()
    }

    async fn open(&mut self, settings: &CaptureSettings) -> Result<(), CaptureError> {
        if self.open.is_some() {
            log::debug!("CpalBackend already open");
            return Ok(());
        }

        let format = settings.format;
        let encoder = tokio::task::spawn_blocking(move || Encoder::locate(format))
            .await
            .map_err(|e| CaptureError::EncoderUnavailable(e.to_string()))??;

        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or(CaptureError::NoInputDevice)?;

        log::info!("Using audio input device: {:?}", device.name());

        let supported_config = device
            .default_input_config()
            .map_err(|_| CaptureError::NoSupportedConfig)?;

        log::info!(
            "Audio config: {} Hz, {} channels, {:?} (gain {}x, stutter compensation {})",
            supported_config.sample_rate().0,
            supported_config.channels(),
            supported_config.sample_format(),
            settings.gain.factor(),
            if settings.stutter_compensation { "on" } else { "off" }
        );

        let sample_format = supported_config.sample_format();
        let config: StreamConfig = supported_config.into();

        self.open = Some(OpenDevice {
            device,
            config,
            sample_format,
            settings: *settings,
            encoder,
        });
        Ok(())
    }

    async fn start(&mut self, faults: FaultSender) -> Result<(), CaptureError> {
        if self.capture.is_some() {
            log::warn!("CpalBackend start ignored: already capturing");
            return Ok(());
        }

        let samples: SampleStore = Arc::new(Mutex::new(Vec::new()));
        let (device, config, sample_format, sink) = {
            let open = self.open.as_ref().ok_or(CaptureError::NotOpen)?;
            let sink = ChunkSink::new(
                samples.clone(),
                open.config.channels,
                open.settings.gain,
                open.settings
                    .stutter_compensation
                    .then(|| GapFiller::new(open.config.sample_rate.0)),
            );
            (open.device.clone(), open.config.clone(), open.sample_format, sink)
        };

        let (ready_tx, ready_rx) = oneshot::channel::<Result<(), CaptureError>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        let thread = std::thread::Builder::new()
            .name("voice-recorder-audio".to_string())
            .spawn(move || {
                let stream = match build_stream(&device, &config, sample_format, sink, faults)
                    .and_then(|stream| {
                        stream.play().map_err(|e| {
                            CaptureError::StreamCreationFailed(format!(
                                "Failed to start stream: {}",
                                e
                            ))
                        })?;
                        Ok(stream)
                    }) {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                // Runs until stop() signals or the backend is dropped
                let _ = stop_rx.recv();
                drop(stream);
                log::debug!("Audio thread exiting");
            })
            .map_err(|e| CaptureError::StreamCreationFailed(e.to_string()))?;

        match ready_rx.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => {
                return Err(CaptureError::StreamCreationFailed(
                    "audio thread exited before the stream started".to_string(),
                ))
            }
        }

        log::info!("Capture started");
        self.capture = Some(ActiveCapture {
            stop_tx,
            thread,
            samples,
        });
        Ok(())
    }

    async fn stop(&mut self) -> Result<RecordingResult, CaptureError> {
        let (source_rate, quality, encoder) = {
            let open = self.open.as_ref().ok_or(CaptureError::NotOpen)?;
            (open.config.sample_rate.0, open.settings.quality, open.encoder.clone())
        };
        let capture = self.capture.take().ok_or(CaptureError::NotCapturing)?;

        let store = capture.shutdown().await;
        let samples = std::mem::take(&mut *store.lock().unwrap_or_else(PoisonError::into_inner));

        let duration = Duration::from_secs_f64(samples.len() as f64 / source_rate as f64);
        let format = encoder.format();

        log::info!(
            "Capture stopped: {} samples ({:?}), encoding {:?} at {} Hz",
            samples.len(),
            duration,
            format,
            quality.sample_rate()
        );

        let audio = tokio::task::spawn_blocking(move || encoder.encode(&samples, source_rate, quality))
            .await
            .map_err(|e| CaptureError::EncodeFailed(e.to_string()))??;

        Ok(RecordingResult {
            audio,
            file_name: format.file_name().to_string(),
            mime_type: format.mime_type().to_string(),
            duration,
        })
    }

    async fn close(&mut self) {
        if let Some(capture) = self.capture.take() {
            capture.shutdown().await;
            log::info!("Capture aborted by close");
        }
        if self.open.take().is_some() {
            log::info!("CpalBackend closed, input device released");
        }
    }
}

/// Receives raw device chunks on the audio thread.
struct ChunkSink {
    samples: SampleStore,
    channels: usize,
    gain: Gain,
    gap_filler: Option<GapFiller>,
    first_capture: Option<StreamInstant>,
}

impl ChunkSink {
    fn new(samples: SampleStore, channels: u16, gain: Gain, gap_filler: Option<GapFiller>) -> Self {
        Self {
            samples,
            channels: channels.max(1) as usize,
            gain,
            gap_filler,
            first_capture: None,
        }
    }

    fn push<T>(&mut self, data: &[T], info: &InputCallbackInfo)
    where
        T: cpal::Sample,
        i16: FromSample<T>,
    {
        let mut chunk = downmix(data, self.channels);

        let silence = match self.gap_filler.as_mut() {
            Some(filler) => {
                let captured = info.timestamp().capture;
                let first = *self.first_capture.get_or_insert(captured);
                let offset = captured.duration_since(&first).unwrap_or_default();
                filler.silence_before(offset, chunk.len())
            }
            None => 0,
        };

        // Only the new chunk is processed; earlier chunks are already final
        apply_gain(&mut chunk, self.gain);

        let mut store = self.samples.lock().unwrap_or_else(PoisonError::into_inner);
        if silence > 0 {
            log::debug!("Stutter compensation: inserting {} silent samples", silence);
            let len = store.len();
            store.resize(len + silence, 0);
        }
        store.extend_from_slice(&chunk);
    }
}

/// Average interleaved frames down to mono i16.
fn downmix<T>(data: &[T], channels: usize) -> Vec<i16>
where
    T: cpal::Sample,
    i16: FromSample<T>,
{
    if channels <= 1 {
        return data.iter().map(|&s| s.to_sample::<i16>()).collect();
    }
    data.chunks(channels)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| s.to_sample::<i16>() as i32).sum();
            (sum / frame.len() as i32) as i16
        })
        .collect()
}

fn build_stream(
    device: &Device,
    config: &StreamConfig,
    sample_format: SampleFormat,
    sink: ChunkSink,
    faults: FaultSender,
) -> Result<Stream, CaptureError> {
    match sample_format {
        SampleFormat::I16 => build_stream_typed::<i16>(device, config, sink, faults),
        SampleFormat::U16 => build_stream_typed::<u16>(device, config, sink, faults),
        SampleFormat::F32 => build_stream_typed::<f32>(device, config, sink, faults),
        _ => Err(CaptureError::NoSupportedConfig),
    }
}

fn build_stream_typed<T>(
    device: &Device,
    config: &StreamConfig,
    mut sink: ChunkSink,
    faults: FaultSender,
) -> Result<Stream, CaptureError>
where
    T: cpal::SizedSample + Send + 'static,
    i16: FromSample<T>,
{
    let err_fn = move |err: cpal::StreamError| {
        log::error!("Audio stream error: {}", err);
        let _ = faults.send(CaptureError::Stream(err.to_string()));
    };

    device
        .build_input_stream(
            config,
            move |data: &[T], info: &InputCallbackInfo| sink.push(data, info),
            err_fn,
            None,
        )
        .map_err(|e| CaptureError::StreamCreationFailed(e.to_string()))
}
