//! End-to-end session tests
//!
//! Drives a card through `SessionHandle` with a scripted capture backend, a
//! scripted uploader and a notifier that records everything it is asked to
//! show. Timer scenarios run on a paused clock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use voice_recorder::audio::{CaptureBackend, CaptureSettings, FaultSender, RecordingResult};
use voice_recorder::error::{CaptureError, ConfigError, SessionError, UploadError};
use voice_recorder::notify::{Notification, NotificationKind, Notifier};
use voice_recorder::settings::CardSettings;
use voice_recorder::upload::{UploadReceipt, Uploader};
use voice_recorder::{spawn_session, SessionHandle, SessionStatus};

// ============================================================================
// Fakes
// ============================================================================

#[derive(Default)]
struct BackendLog {
    opens: usize,
    starts: usize,
    stops: usize,
    closes: usize,
    open: bool,
    faults: Option<FaultSender>,
}

struct FakeBackend {
    log: Arc<Mutex<BackendLog>>,
    fail_open: bool,
    clip_duration: Duration,
}

#[async_trait]
impl CaptureBackend for FakeBackend {
    fn name(&self) -> &str {
        "fake"
    }

    fn is_open(&self) -> bool {
        self.log.lock().unwrap().open
    }

    async fn open(&mut self, _settings: &CaptureSettings) -> Result<(), CaptureError> {
        let mut log = self.log.lock().unwrap();
        log.opens += 1;
        if self.fail_open {
            return Err(CaptureError::NoInputDevice);
        }
        log.open = true;
        Ok(())
    }

    async fn start(&mut self, faults: FaultSender) -> Result<(), CaptureError> {
        let mut log = self.log.lock().unwrap();
        if !log.open {
            return Err(CaptureError::NotOpen);
        }
        log.starts += 1;
        log.faults = Some(faults);
        Ok(())
    }

    async fn stop(&mut self) -> Result<RecordingResult, CaptureError> {
        let mut log = self.log.lock().unwrap();
        log.stops += 1;
        log.faults = None;
        Ok(RecordingResult {
            audio: vec![0xFF; 64],
            file_name: "recording.mp3".to_string(),
            mime_type: "audio/mpeg".to_string(),
            duration: self.clip_duration,
        })
    }

    async fn close(&mut self) {
        let mut log = self.log.lock().unwrap();
        log.closes += 1;
        log.open = false;
        log.faults = None;
    }
}

struct FakeUploader {
    result: Result<UploadReceipt, UploadError>,
    delay: Duration,
    seen: mpsc::UnboundedSender<String>,
    finished: Arc<AtomicBool>,
}

#[async_trait]
impl Uploader for FakeUploader {
    async fn upload(
        &self,
        recording: &RecordingResult,
        event_name: &str,
    ) -> Result<UploadReceipt, UploadError> {
        assert_eq!(recording.file_name, "recording.mp3");
        let _ = self.seen.send(event_name.to_string());
        tokio::time::sleep(self.delay).await;
        self.finished.store(true, Ordering::SeqCst);
        self.result.clone()
    }
}

struct RecordingNotifier {
    seen: mpsc::UnboundedSender<Notification>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: &Notification) {
        let _ = self.seen.send(notification.clone());
    }
}

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    handle: SessionHandle,
    backend: Arc<Mutex<BackendLog>>,
    uploads: mpsc::UnboundedReceiver<String>,
    notes: mpsc::UnboundedReceiver<Notification>,
    status: watch::Receiver<SessionStatus>,
    upload_finished: Arc<AtomicBool>,
}

struct Script {
    settings: CardSettings,
    fail_open: bool,
    clip_duration: Duration,
    upload: Result<UploadReceipt, UploadError>,
    upload_delay: Duration,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            settings: CardSettings {
                token: Some("token".to_string()),
                event_options: Some(vec!["doorbell".to_string(), "kitchen".to_string()]),
                ..CardSettings::default()
            },
            fail_open: false,
            clip_duration: Duration::from_millis(1500),
            upload: Ok(saved_receipt()),
            upload_delay: Duration::ZERO,
        }
    }
}

fn saved_receipt() -> UploadReceipt {
    UploadReceipt {
        success: true,
        msg: Some("Recording saved".to_string()),
        filename: Some("a.mp3".to_string()),
        path: Some("/x/a.mp3".to_string()),
        event_name: Some("doorbell".to_string()),
        browser_id: None,
    }
}

fn start_card(script: Script) -> Harness {
    let config = script.settings.validate().unwrap();
    let backend = Arc::new(Mutex::new(BackendLog::default()));
    let (upload_tx, uploads) = mpsc::unbounded_channel();
    let (note_tx, notes) = mpsc::unbounded_channel();
    let upload_finished = Arc::new(AtomicBool::new(false));

    let handle = spawn_session(
        &config,
        Box::new(FakeBackend {
            log: backend.clone(),
            fail_open: script.fail_open,
            clip_duration: script.clip_duration,
        }),
        Arc::new(FakeUploader {
            result: script.upload,
            delay: script.upload_delay,
            seen: upload_tx,
            finished: upload_finished.clone(),
        }),
        Arc::new(RecordingNotifier { seen: note_tx }),
    );
    let status = handle.subscribe();

    Harness {
        handle,
        backend,
        uploads,
        notes,
        status,
        upload_finished,
    }
}

async fn wait_until(
    status: &mut watch::Receiver<SessionStatus>,
    pred: impl FnMut(&SessionStatus) -> bool,
) {
    tokio::time::timeout(Duration::from_secs(5), status.wait_for(pred))
        .await
        .expect("timed out waiting for status")
        .expect("status channel closed");
}

async fn wait_recording(status: &mut watch::Receiver<SessionStatus>) {
    wait_until(status, |s| matches!(s, SessionStatus::Recording { .. })).await;
}

async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for message")
        .expect("channel closed")
}

/// Let spawned tasks run.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn click_mode_records_and_uploads_with_selected_event() {
    let mut h = start_card(Script::default());

    h.handle.press().await.unwrap();
    h.handle.release().await.unwrap();
    wait_recording(&mut h.status).await;

    h.handle.press().await.unwrap();
    assert_eq!(next(&mut h.uploads).await, "doorbell");
    wait_until(&mut h.status, |s| *s == SessionStatus::Idle).await;

    // notify is off: a confirmed save stays silent
    settle().await;
    assert!(h.notes.try_recv().is_err());

    let log = h.backend.lock().unwrap();
    assert_eq!((log.opens, log.starts, log.stops), (1, 1, 1));
}

#[tokio::test]
async fn repeated_start_opens_the_backend_once() {
    let mut h = start_card(Script::default());

    for _ in 0..3 {
        h.handle.start().await.unwrap();
    }
    wait_recording(&mut h.status).await;
    h.handle.start().await.unwrap();
    settle().await;
    {
        let log = h.backend.lock().unwrap();
        assert_eq!(log.opens, 1);
        assert_eq!(log.starts, 1);
    }

    h.handle.stop().await.unwrap();
    next(&mut h.uploads).await;

    // The backend stays open between sessions
    h.handle.start().await.unwrap();
    wait_recording(&mut h.status).await;
    let log = h.backend.lock().unwrap();
    assert_eq!(log.opens, 1);
    assert_eq!(log.starts, 2);
}

#[tokio::test]
async fn hold_mode_records_while_pressed() {
    let mut script = Script::default();
    script.settings.button_mode = Some("hold".to_string());
    let mut h = start_card(script);

    h.handle.press().await.unwrap();
    wait_recording(&mut h.status).await;

    h.handle.release().await.unwrap();
    assert_eq!(next(&mut h.uploads).await, "doorbell");
    wait_until(&mut h.status, |s| *s == SessionStatus::Idle).await;
}

#[tokio::test]
async fn stop_while_idle_does_nothing() {
    let mut h = start_card(Script::default());

    h.handle.stop().await.unwrap();
    settle().await;

    assert_eq!(h.handle.status(), SessionStatus::Idle);
    assert!(h.uploads.try_recv().is_err());
    assert!(h.notes.try_recv().is_err());
    let log = h.backend.lock().unwrap();
    assert_eq!((log.opens, log.stops), (0, 0));
}

#[tokio::test]
async fn short_recording_is_reported_and_never_uploaded() {
    let mut h = start_card(Script {
        clip_duration: Duration::from_millis(120),
        ..Script::default()
    });

    h.handle.toggle().await.unwrap();
    wait_recording(&mut h.status).await;
    h.handle.toggle().await.unwrap();

    let note = next(&mut h.notes).await;
    assert_eq!(note.kind, NotificationKind::Error);
    assert_eq!(note.message, "Recording too short (120ms < 200ms)");

    settle().await;
    assert!(h.uploads.try_recv().is_err());
    assert_eq!(h.handle.status(), SessionStatus::Idle);
}

#[tokio::test(start_paused = true)]
async fn duration_limit_stops_once_with_info_message() {
    let mut script = Script::default();
    script.settings.max_duration_ms = 1_000;
    let mut h = start_card(script);

    h.handle.toggle().await.unwrap();
    wait_recording(&mut h.status).await;

    let note = next(&mut h.notes).await;
    assert_eq!(note.kind, NotificationKind::Info);
    assert_eq!(note.message, "Record time limit reached (1 s)");

    next(&mut h.uploads).await;
    wait_until(&mut h.status, |s| *s == SessionStatus::Idle).await;

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(h.notes.try_recv().is_err());
    assert!(h.uploads.try_recv().is_err());
    assert_eq!(h.backend.lock().unwrap().stops, 1);
}

#[tokio::test(start_paused = true)]
async fn teardown_mid_session_releases_backend_and_cancels_timer() {
    let mut script = Script::default();
    script.settings.max_duration_ms = 1_000;
    let mut h = start_card(script);

    h.handle.toggle().await.unwrap();
    wait_recording(&mut h.status).await;

    h.handle.teardown().await.unwrap();
    wait_until(&mut h.status, |s| *s == SessionStatus::Idle).await;

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(h.notes.try_recv().is_err());
    assert!(h.uploads.try_recv().is_err());

    let log = h.backend.lock().unwrap();
    assert_eq!(log.closes, 1);
    assert_eq!(log.stops, 0);
    assert!(!log.open);
}

#[tokio::test]
async fn open_failure_reports_error_and_returns_to_idle() {
    let mut h = start_card(Script {
        fail_open: true,
        ..Script::default()
    });

    h.handle.toggle().await.unwrap();

    let note = next(&mut h.notes).await;
    assert_eq!(note.kind, NotificationKind::Error);
    assert_eq!(note.message, "Recording failed: No audio input device found");

    settle().await;
    assert_eq!(h.handle.status(), SessionStatus::Idle);
    assert_eq!(h.backend.lock().unwrap().closes, 1);
}

#[tokio::test]
async fn mid_capture_fault_reports_error_and_releases_backend() {
    let mut h = start_card(Script::default());

    h.handle.toggle().await.unwrap();
    wait_recording(&mut h.status).await;

    let faults = h.backend.lock().unwrap().faults.clone().unwrap();
    faults
        .send(CaptureError::Stream("device unplugged".to_string()))
        .unwrap();

    let note = next(&mut h.notes).await;
    assert_eq!(note.kind, NotificationKind::Error);
    assert_eq!(note.message, "Recorder error: Audio stream error: device unplugged");

    wait_until(&mut h.status, |s| *s == SessionStatus::Idle).await;
    settle().await;
    assert!(h.uploads.try_recv().is_err());
    let log = h.backend.lock().unwrap();
    assert_eq!(log.stops, 0);
    assert_eq!(log.closes, 1);
}

#[tokio::test]
async fn confirmed_save_is_announced_when_notify_is_on() {
    let mut script = Script::default();
    script.settings.notify = true;
    let mut h = start_card(script);

    h.handle.toggle().await.unwrap();
    wait_recording(&mut h.status).await;
    h.handle.toggle().await.unwrap();

    let note = next(&mut h.notes).await;
    assert_eq!(note.kind, NotificationKind::Success);
    assert_eq!(
        note.message,
        "BrowserID: null\nEventName: doorbell\nFileName: a.mp3\nPath: /x/a.mp3"
    );
}

#[tokio::test]
async fn upload_failure_is_reported_as_error() {
    let mut script = Script::default();
    script.settings.notify = true;
    script.upload = Err(UploadError::Transport {
        status: 500,
        body: "server error".to_string(),
    });
    let mut h = start_card(script);

    h.handle.toggle().await.unwrap();
    wait_recording(&mut h.status).await;
    h.handle.toggle().await.unwrap();

    let note = next(&mut h.notes).await;
    assert_eq!(note.kind, NotificationKind::Error);
    assert_eq!(
        note.message,
        "Failed to save recording: Upload failed (500): server error"
    );
    settle().await;
    assert!(h.notes.try_recv().is_err());
}

#[tokio::test]
async fn event_selection_is_limited_to_configured_options() {
    let mut h = start_card(Script::default());

    let err = h.handle.select_event_name("garage").await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::Config(ConfigError::UnknownEventName(name)) if name == "garage"
    ));

    h.handle.select_event_name(" kitchen ").await.unwrap();
    h.handle.toggle().await.unwrap();
    wait_recording(&mut h.status).await;
    h.handle.toggle().await.unwrap();

    assert_eq!(next(&mut h.uploads).await, "kitchen");
}

#[tokio::test]
async fn shutdown_closes_the_backend() {
    let Harness {
        handle,
        backend,
        mut status,
        ..
    } = start_card(Script::default());

    handle.toggle().await.unwrap();
    wait_recording(&mut status).await;

    handle.shutdown().await;

    let log = backend.lock().unwrap();
    assert!(log.closes >= 1);
    assert!(!log.open);
    assert_eq!(log.stops, 0);
}

#[tokio::test]
async fn shutdown_waits_for_upload_and_reports_its_failure() {
    let mut script = Script::default();
    script.upload_delay = Duration::from_millis(300);
    script.upload = Err(UploadError::Transport {
        status: 500,
        body: "server error".to_string(),
    });
    let Harness {
        handle,
        mut uploads,
        mut notes,
        mut status,
        upload_finished,
        ..
    } = start_card(script);

    handle.toggle().await.unwrap();
    wait_recording(&mut status).await;
    handle.toggle().await.unwrap();
    next(&mut uploads).await;
    wait_until(&mut status, |s| *s == SessionStatus::Idle).await;

    handle.shutdown().await;

    assert!(upload_finished.load(Ordering::SeqCst));
    let note = notes.try_recv().expect("upload failure was not reported");
    assert_eq!(note.kind, NotificationKind::Error);
    assert_eq!(
        note.message,
        "Failed to save recording: Upload failed (500): server error"
    );
}
