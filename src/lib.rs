pub mod audio;
pub mod effects;
pub mod error;
pub mod notify;
pub mod settings;
pub mod state_machine;
pub mod upload;

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use audio::CaptureBackend;
use effects::{CardEffectRunner, EffectRunner};
use error::SessionError;
use notify::Notifier;
use settings::{ButtonMode, CardConfig};
use state_machine::{reduce, Effect, Event, SessionContext, State};
use upload::Uploader;

/// Status published to whoever renders the card.
/// Uses tagged union format: { "status": "idle" } or { "status": "recording", "elapsedSecs": 5 }
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum SessionStatus {
    Idle,
    Arming,
    Recording {
        #[serde(rename = "elapsedSecs")]
        elapsed_secs: u64,
    },
    Stopping,
}

/// Convert internal State to the published status
pub fn state_to_status(state: &State) -> SessionStatus {
    match state {
        State::Idle => SessionStatus::Idle,
        State::Arming { .. } => SessionStatus::Arming,
        State::Recording { started_at, .. } => SessionStatus::Recording {
            elapsed_secs: started_at.elapsed().as_secs(),
        },
        State::Stopping { .. } => SessionStatus::Stopping,
    }
}

fn emit_status(status_tx: &watch::Sender<SessionStatus>, state: &State) {
    let status = state_to_status(state);
    log::debug!("Emitting status: {:?}", serde_json::to_string(&status));
    status_tx.send_replace(status);
}

/// Run the main state loop
pub async fn run_state_loop(
    mut ctx: SessionContext,
    mut rx: mpsc::Receiver<Event>,
    tx: mpsc::Sender<Event>,
    effect_runner: Arc<dyn EffectRunner>,
    status_tx: watch::Sender<SessionStatus>,
) {
    let mut state = State::default();

    emit_status(&status_tx, &state);
    log::info!("State loop started");

    while let Some(event) = rx.recv().await {
        log::debug!("Received event: {:?}", event);

        // Handle Exit and event selection at the edge
        let event = match event {
            Event::Exit => {
                log::info!("Exit requested, tearing down and shutting down state loop");
                let (next, effects) = reduce(&state, Event::Teardown, &ctx);
                state = next;
                run_effects(effects, &state, &tx, effect_runner.as_ref(), &status_tx);

                // Later upload results are reported by the upload task itself
                rx.close();
                while let Ok(event) = rx.try_recv() {
                    if let Event::UploadFinished { .. } = event {
                        let (next, effects) = reduce(&state, event, &ctx);
                        state = next;
                        run_effects(effects, &state, &tx, effect_runner.as_ref(), &status_tx);
                    }
                }
                break;
            }
            Event::SelectEventName { name } => {
                log::info!("Event name set to {:?}", name);
                ctx.event_name = name;
                continue;
            }
            other => other,
        };

        let old_discriminant = std::mem::discriminant(&state);
        let (next, effects) = reduce(&state, event, &ctx);
        let new_discriminant = std::mem::discriminant(&next);

        // Log state transitions
        if old_discriminant != new_discriminant {
            log::info!("State transition: {:?} -> {:?}", state, next);
        }

        state = next;
        run_effects(effects, &state, &tx, effect_runner.as_ref(), &status_tx);
    }

    log::info!("State loop ended");
}

fn run_effects(
    effects: Vec<Effect>,
    state: &State,
    tx: &mpsc::Sender<Event>,
    effect_runner: &dyn EffectRunner,
    status_tx: &watch::Sender<SessionStatus>,
) {
    for eff in effects {
        match eff {
            Effect::EmitStatus => emit_status(status_tx, state),
            other => effect_runner.spawn(other, tx.clone()),
        }
    }
}

/// Handle to one running card: sends input events and reads status.
pub struct SessionHandle {
    tx: mpsc::Sender<Event>,
    status: watch::Receiver<SessionStatus>,
    config: CardConfig,
    task: JoinHandle<()>,
}

impl SessionHandle {
    /// Send an event to the state machine
    pub async fn send(&self, event: Event) -> Result<(), SessionError> {
        self.tx.send(event).await.map_err(|_| SessionError::Closed)
    }

    /// Button pressed. Click mode toggles; hold mode starts.
    pub async fn press(&self) -> Result<(), SessionError> {
        match self.config.button_mode {
            ButtonMode::Click => self.send(Event::Toggle).await,
            ButtonMode::Hold => self.send(Event::Start).await,
        }
    }

    /// Button released. Only meaningful in hold mode.
    pub async fn release(&self) -> Result<(), SessionError> {
        match self.config.button_mode {
            ButtonMode::Click => Ok(()),
            ButtonMode::Hold => self.send(Event::Stop).await,
        }
    }

    pub async fn start(&self) -> Result<(), SessionError> {
        self.send(Event::Start).await
    }

    pub async fn stop(&self) -> Result<(), SessionError> {
        self.send(Event::Stop).await
    }

    pub async fn toggle(&self) -> Result<(), SessionError> {
        self.send(Event::Toggle).await
    }

    /// Choose the event name attached to the next upload.
    pub async fn select_event_name(&self, name: &str) -> Result<(), SessionError> {
        let name = self.config.check_event_name(name)?;
        self.send(Event::SelectEventName { name }).await
    }

    /// Release the backend and cancel the timer; the card stays usable.
    pub async fn teardown(&self) -> Result<(), SessionError> {
        self.send(Event::Teardown).await
    }

    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }

    pub fn config(&self) -> &CardConfig {
        &self.config
    }

    /// Tear down, stop the loop and wait until the backend is closed and
    /// pending uploads have finished.
    pub async fn shutdown(self) {
        if self.tx.send(Event::Exit).await.is_err() {
            log::warn!("State loop already gone at shutdown");
        }
        if let Err(e) = self.task.await {
            log::error!("State loop task failed: {}", e);
        }
    }
}

/// Start a card: spawns the state loop and the backend worker on the current runtime.
pub fn spawn_session(
    config: &CardConfig,
    backend: Box<dyn CaptureBackend>,
    uploader: Arc<dyn Uploader>,
    notifier: Arc<dyn Notifier>,
) -> SessionHandle {
    let (tx, rx) = mpsc::channel::<Event>(32);
    let (status_tx, status_rx) = watch::channel(SessionStatus::Idle);

    let ctx = SessionContext {
        limits: config.limits,
        capture: config.capture,
        notify: config.notify,
        event_name: config.initial_event_name(),
    };

    log::info!(
        "Starting card {:?} ({:?} mode, gain {}, {:?}/{:?}, event {:?})",
        config.name.as_deref().unwrap_or("voice recorder"),
        config.button_mode,
        config.capture.gain.factor(),
        config.capture.quality,
        config.capture.format,
        ctx.event_name
    );

    let runner = CardEffectRunner::new(backend, uploader, notifier);
    let loop_runner: Arc<dyn EffectRunner> = runner.clone();
    let loop_tx = tx.clone();

    let task = tokio::spawn(async move {
        run_state_loop(ctx, rx, loop_tx, loop_runner, status_tx).await;
        runner.shutdown().await;
    });

    SessionHandle {
        tx,
        status: status_rx,
        config: config.clone(),
        task,
    }
}
