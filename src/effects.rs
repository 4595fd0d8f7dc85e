//! Effect runner for the voice recorder
//!
//! Executes effects produced by the state machine. Backend commands go to a
//! single worker task that owns the capture backend, so open/start/stop/close
//! run strictly in the order the reducer issued them. Timers, uploads and
//! notifications are spawned as independent tasks; uploads and notifications
//! are tracked so shutdown waits for them. Completions are sent back to the
//! state loop as events.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

use crate::audio::{CaptureBackend, CaptureSettings};
use crate::error::{CaptureError, RecorderError};
use crate::notify::{Notification, Notifier};
use crate::state_machine::{Effect, Event};
use crate::upload::Uploader;

/// Trait for running effects asynchronously.
/// Completion events are sent back via the provided channel.
pub trait EffectRunner: Send + Sync + 'static {
    fn spawn(&self, effect: Effect, tx: mpsc::Sender<Event>);
}

enum BackendCommand {
    Start {
        id: Uuid,
        settings: CaptureSettings,
        tx: mpsc::Sender<Event>,
    },
    Stop {
        id: Uuid,
        tx: mpsc::Sender<Event>,
    },
    Release,
}

/// Effect runner for one card instance.
pub struct CardEffectRunner {
    backend_tx: Mutex<Option<mpsc::UnboundedSender<BackendCommand>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    timer: Mutex<Option<CancellationToken>>,
    /// In-flight uploads and notifications
    tasks: TaskTracker,
    uploader: Arc<dyn Uploader>,
    notifier: Arc<dyn Notifier>,
}

impl CardEffectRunner {
    /// Must be called from within a tokio runtime; spawns the backend worker.
    pub fn new(
        backend: Box<dyn CaptureBackend>,
        uploader: Arc<dyn Uploader>,
        notifier: Arc<dyn Notifier>,
    ) -> Arc<Self> {
        let (backend_tx, backend_rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_backend_worker(backend, backend_rx));

        Arc::new(Self {
            backend_tx: Mutex::new(Some(backend_tx)),
            worker: Mutex::new(Some(worker)),
            timer: Mutex::new(None),
            tasks: TaskTracker::new(),
            uploader,
            notifier,
        })
    }

    fn send_backend(&self, command: BackendCommand) {
        let guard = self.backend_tx.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(backend_tx) => {
                if backend_tx.send(command).is_err() {
                    log::error!("Backend worker is gone, command dropped");
                }
            }
            None => log::warn!("Backend command after shutdown, dropped"),
        }
    }

    fn cancel_timer(&self) {
        let token = self.timer.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(token) = token {
            token.cancel();
        }
    }

    /// Stop accepting backend commands, wait for the worker to close the
    /// backend, then wait for pending uploads and notifications.
    pub async fn shutdown(&self) {
        self.cancel_timer();
        drop(
            self.backend_tx
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        );
        let worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                log::error!("Backend worker failed: {}", e);
            }
        }

        self.tasks.close();
        if !self.tasks.is_empty() {
            log::info!("Waiting for {} pending upload/notification task(s)", self.tasks.len());
        }
        self.tasks.wait().await;
    }
}

impl EffectRunner for CardEffectRunner {
    fn spawn(&self, effect: Effect, tx: mpsc::Sender<Event>) {
        match effect {
            Effect::StartCapture { id, settings } => {
                self.send_backend(BackendCommand::Start { id, settings, tx });
            }

            Effect::StopCapture { id } => {
                self.send_backend(BackendCommand::Stop { id, tx });
            }

            Effect::ReleaseBackend => {
                self.send_backend(BackendCommand::Release);
            }

            Effect::ArmDurationTimer { id, duration } => {
                let token = CancellationToken::new();
                let previous = self
                    .timer
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .replace(token.clone());
                if let Some(previous) = previous {
                    previous.cancel();
                }

                tokio::spawn(async move {
                    tokio::select! {
                        _ = token.cancelled() => {
                            log::debug!("Duration timer cancelled for id={}", id);
                        }
                        _ = tokio::time::sleep(duration) => {
                            log::debug!("Duration timer elapsed for id={}", id);
                            let _ = tx.send(Event::DurationElapsed { id }).await;
                        }
                    }
                });
            }

            Effect::CancelDurationTimer => self.cancel_timer(),

            Effect::Upload {
                id,
                recording,
                event_name,
            } => {
                let uploader = self.uploader.clone();
                let notifier = self.notifier.clone();
                self.tasks.spawn(async move {
                    let result = uploader.upload(&recording, &event_name).await;
                    if let Err(e) = &result {
                        log::error!("Upload for session {} failed: {}", id, e);
                    }
                    // The state loop is gone after exit; report failures directly
                    if let Err(mpsc::error::SendError(Event::UploadFinished {
                        result: Err(err),
                        ..
                    })) = tx.send(Event::UploadFinished { id, result }).await
                    {
                        notifier
                            .notify(&Notification::error(&RecorderError::Upload(err)))
                            .await;
                    }
                });
            }

            Effect::Notify(notification) => {
                let notifier = self.notifier.clone();
                self.tasks.spawn(async move {
                    notifier.notify(&notification).await;
                });
            }

            Effect::EmitStatus => {
                // Handled in the main loop, not here
                log::warn!("EmitStatus reached the effect runner; ignoring");
            }
        }
    }
}

/// Owns the backend; runs commands one at a time in arrival order.
async fn run_backend_worker(
    mut backend: Box<dyn CaptureBackend>,
    mut rx: mpsc::UnboundedReceiver<BackendCommand>,
) {
    log::debug!("Backend worker started ({})", backend.name());

    while let Some(command) = rx.recv().await {
        match command {
            BackendCommand::Start { id, settings, tx } => {
                let result = async {
                    if !backend.is_open() {
                        log::info!("Opening capture backend {}", backend.name());
                        backend.open(&settings).await?;
                    }

                    let (fault_tx, mut fault_rx) = mpsc::unbounded_channel();
                    backend.start(fault_tx).await?;

                    // Forward the first mid-capture fault, tagged with this session
                    let fault_events = tx.clone();
                    tokio::spawn(async move {
                        if let Some(err) = fault_rx.recv().await {
                            let _ = fault_events.send(Event::CaptureFault { id, err }).await;
                        }
                    });
                    Ok::<(), CaptureError>(())
                }
                .await;

                let event = match result {
                    Ok(()) => Event::CaptureStartOk { id },
                    Err(err) => {
                        log::error!("Failed to start capture: {}", err);
                        Event::CaptureStartFail { id, err }
                    }
                };
                let _ = tx.send(event).await;
            }

            BackendCommand::Stop { id, tx } => {
                let event = match backend.stop().await {
                    Ok(recording) => {
                        log::info!(
                            "Capture finalized: {} ({} bytes, {}ms)",
                            recording.file_name,
                            recording.audio.len(),
                            recording.duration_ms()
                        );
                        Event::CaptureStopOk { id, recording }
                    }
                    Err(err) => {
                        log::error!("Failed to stop capture: {}", err);
                        Event::CaptureStopFail { id, err }
                    }
                };
                let _ = tx.send(event).await;
            }

            BackendCommand::Release => {
                backend.close().await;
            }
        }
    }

    backend.close().await;
    log::debug!("Backend worker stopped");
}
