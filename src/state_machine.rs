//! Recording session state machine
//!
//! Single-writer pattern: all transitions go through `reduce()`, which returns
//! the next state and the effects to run. The reducer never performs I/O.
//! Every in-flight operation carries the session id it was issued for, and
//! completions for any other session are dropped.

use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::audio::{CaptureSettings, RecordingResult};
use crate::error::{CaptureError, RecorderError, UploadError};
use crate::notify::Notification;
use crate::upload::UploadReceipt;

/// Duration bounds for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionLimits {
    /// Shorter recordings are discarded, never uploaded
    pub min_duration: Duration,
    /// Recording is force-stopped once this elapses
    pub max_duration: Duration,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            min_duration: Duration::from_millis(200),
            max_duration: Duration::from_millis(300_000),
        }
    }
}

/// Per-card values the reducer reads but never changes.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub limits: SessionLimits,
    pub capture: CaptureSettings,
    /// Announce successful saves
    pub notify: bool,
    /// Currently selected event name, attached at upload time
    pub event_name: String,
}

#[derive(Debug, Clone, Default)]
pub enum State {
    #[default]
    Idle,
    /// Waiting for the backend to open and start
    Arming {
        session_id: Uuid,
        /// A stop arrived before capture began (hold-mode release)
        stop_requested: bool,
    },
    Recording {
        session_id: Uuid,
        started_at: Instant,
    },
    /// Waiting for the backend to finalize the clip
    Stopping {
        session_id: Uuid,
    },
}

impl State {
    pub fn session_id(&self) -> Option<Uuid> {
        match self {
            State::Idle => None,
            State::Arming { session_id, .. }
            | State::Recording { session_id, .. }
            | State::Stopping { session_id } => Some(*session_id),
        }
    }

    pub fn is_recording(&self) -> bool {
        matches!(self, State::Recording { .. })
    }
}

#[derive(Debug, Clone)]
pub enum Event {
    /// Begin a session (hold-mode press)
    Start,
    /// End the session (hold-mode release)
    Stop,
    /// Click-mode press: start when idle, stop when recording
    Toggle,
    /// Change the event name attached to future uploads
    SelectEventName { name: String },
    /// The card was removed; release everything
    Teardown,
    /// Shut the state loop down
    Exit,

    // Backend completions
    CaptureStartOk { id: Uuid },
    CaptureStartFail { id: Uuid, err: CaptureError },
    CaptureStopOk { id: Uuid, recording: RecordingResult },
    CaptureStopFail { id: Uuid, err: CaptureError },
    /// Backend reported an error while capturing
    CaptureFault { id: Uuid, err: CaptureError },

    /// The duration timer armed for `id` expired
    DurationElapsed { id: Uuid },

    /// An upload finished. Uploads outlive their session, so this is accepted in any state.
    UploadFinished {
        id: Uuid,
        result: Result<UploadReceipt, UploadError>,
    },
}

#[derive(Debug, Clone)]
pub enum Effect {
    /// Open the backend if needed, then start capturing
    StartCapture { id: Uuid, settings: CaptureSettings },
    StopCapture { id: Uuid },
    /// Close the backend and drop the device
    ReleaseBackend,
    /// Arm the duration timer, replacing any pending one
    ArmDurationTimer { id: Uuid, duration: Duration },
    CancelDurationTimer,
    Upload {
        id: Uuid,
        recording: RecordingResult,
        event_name: String,
    },
    Notify(Notification),
    /// Publish the current state to status subscribers
    EmitStatus,
}

fn report(error: RecorderError) -> Effect {
    Effect::Notify(Notification::error(&error))
}

/// Reducer function: (state, event) -> (next_state, effects)
pub fn reduce(state: &State, event: Event, ctx: &SessionContext) -> (State, Vec<Effect>) {
    use Effect::*;
    use Event::*;
    use State::*;

    match (state, event) {
        // -----------------
        // Idle
        // -----------------
        (Idle, Start) | (Idle, Toggle) => {
            let id = Uuid::new_v4();
            (
                Arming {
                    session_id: id,
                    stop_requested: false,
                },
                vec![
                    StartCapture {
                        id,
                        settings: ctx.capture,
                    },
                    EmitStatus,
                ],
            )
        }
        (Idle, Stop) => (Idle, vec![]),

        // -----------------
        // Arming
        // -----------------
        (Arming { .. }, Start) | (Arming { .. }, Toggle) => (state.clone(), vec![]),
        (Arming { session_id, .. }, Stop) => (
            Arming {
                session_id: *session_id,
                stop_requested: true,
            },
            vec![],
        ),
        (
            Arming {
                session_id,
                stop_requested,
            },
            CaptureStartOk { id },
        ) if *session_id == id => {
            if *stop_requested {
                log::info!("Session {} released before capture began, stopping", id);
                (
                    Stopping { session_id: id },
                    vec![StopCapture { id }, EmitStatus],
                )
            } else {
                (
                    Recording {
                        session_id: id,
                        started_at: Instant::now(),
                    },
                    vec![
                        ArmDurationTimer {
                            id,
                            duration: ctx.limits.max_duration,
                        },
                        EmitStatus,
                    ],
                )
            }
        }
        (Arming { session_id, .. }, CaptureStartFail { id, err }) if *session_id == id => (
            Idle,
            vec![
                ReleaseBackend,
                report(RecorderError::CaptureInit(err)),
                EmitStatus,
            ],
        ),

        // -----------------
        // Recording
        // -----------------
        (Recording { .. }, Start) => (state.clone(), vec![]),
        (Recording { session_id, .. }, Stop) | (Recording { session_id, .. }, Toggle) => (
            Stopping {
                session_id: *session_id,
            },
            vec![
                CancelDurationTimer,
                StopCapture { id: *session_id },
                EmitStatus,
            ],
        ),
        (
            Recording {
                session_id,
                started_at,
                ..
            },
            DurationElapsed { id },
        ) if *session_id == id => {
            log::warn!(
                "Session {} auto-stopped after {:?} (max duration reached)",
                id,
                started_at.elapsed()
            );
            (
                Stopping { session_id: id },
                vec![
                    CancelDurationTimer,
                    StopCapture { id },
                    Notify(Notification::info(format!(
                        "Record time limit reached ({} s)",
                        ctx.limits.max_duration.as_secs()
                    ))),
                    EmitStatus,
                ],
            )
        }
        (Recording { session_id, .. }, CaptureFault { id, err }) if *session_id == id => (
            Idle,
            vec![
                CancelDurationTimer,
                ReleaseBackend,
                report(RecorderError::CaptureRuntime(err)),
                EmitStatus,
            ],
        ),

        // -----------------
        // Stopping
        // -----------------
        (Stopping { .. }, Start) | (Stopping { .. }, Stop) | (Stopping { .. }, Toggle) => {
            (state.clone(), vec![])
        }
        (Stopping { session_id }, CaptureStopOk { id, recording }) if *session_id == id => {
            let duration_ms = recording.duration_ms();
            let min_duration_ms = ctx.limits.min_duration.as_millis() as u64;

            if recording.duration < ctx.limits.min_duration {
                log::info!(
                    "Discarding session {}: too short ({}ms < {}ms)",
                    id,
                    duration_ms,
                    min_duration_ms
                );
                (
                    Idle,
                    vec![
                        report(RecorderError::TooShortRecording {
                            duration_ms,
                            min_duration_ms,
                        }),
                        EmitStatus,
                    ],
                )
            } else {
                (
                    Idle,
                    vec![
                        Upload {
                            id,
                            recording,
                            event_name: ctx.event_name.trim().to_string(),
                        },
                        EmitStatus,
                    ],
                )
            }
        }
        (Stopping { session_id }, CaptureStopFail { id, err }) if *session_id == id => (
            Idle,
            vec![report(RecorderError::CaptureRuntime(err)), EmitStatus],
        ),

        // -----------------
        // Any state
        // -----------------
        (_, Teardown) => (
            Idle,
            vec![CancelDurationTimer, ReleaseBackend, EmitStatus],
        ),
        (_, UploadFinished { id, result }) => match result {
            Ok(receipt) if ctx.notify => (state.clone(), vec![Notify(Notification::saved(&receipt))]),
            Ok(receipt) => {
                log::info!(
                    "Upload for session {} saved as {:?} (notifications off)",
                    id,
                    receipt.filename
                );
                (state.clone(), vec![])
            }
            Err(err) => (state.clone(), vec![report(RecorderError::Upload(err))]),
        },

        // -----------------
        // Stale or unexpected events (drop silently)
        // -----------------
        (_, event) => {
            log::debug!("Ignoring {:?} in state {:?}", event, state);
            (state.clone(), vec![])
        }
    }
}
