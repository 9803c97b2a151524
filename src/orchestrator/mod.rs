//! Session orchestrator
//!
//! Owns the lifecycle of exactly two provider sessions ("mine" and
//! "theirs"), wires their normalized event streams into the turn debouncer,
//! runs the system-audio capture pipeline, and fans speaker-labeled
//! transcript events out to subscribers.
//!
//! All utterance-buffer mutations happen inside one event-processing loop
//! per run: both sessions' event streams and both debounce deadlines are
//! consumed by a single `select!`, so per-channel ordering is preserved and
//! the cross-channel interruption rule runs in one critical section.

use chrono::Utc;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::audio::SystemAudioCapture;
use crate::config::{CaptureConfig, SttConfig};
use crate::error::SttError;
use crate::speaker::{MeetingWindowTitles, ScreenContentSource, SpeakerRegistry};
use crate::stt::{
    AudioPayload, Channel, CompletedUtterance, SttBackend, SttEvent, SttSession, TranscriptUpdate,
};
use crate::turns::{TurnDebouncer, TurnEvent};

/// Event broadcast to all presentation surfaces.
#[derive(Debug, Clone)]
pub enum OrchestratorEvent {
    /// Partial or final speaker-labeled transcript text
    Transcript(TranscriptUpdate),
    /// One base64-encoded mono audio chunk, for visualization
    SystemAudio { data: String },
    /// UI state indicator text
    Status(String),
}

struct ActiveRun {
    run_id: String,
    mine: SttSession,
    theirs: SttSession,
    loop_task: JoinHandle<()>,
}

/// Dual-channel STT session orchestrator.
///
/// One constructed instance per embedding; no process-wide state. Created
/// idle, activated with [`initialize`](Self::initialize), torn down with
/// [`close`](Self::close) (idempotent, safe from error paths).
pub struct SttOrchestrator {
    backend: Arc<dyn SttBackend>,
    stt_config: SttConfig,
    capture: SystemAudioCapture,
    registry: Arc<Mutex<SpeakerRegistry>>,
    screen_source: Arc<dyn ScreenContentSource>,
    active: Mutex<Option<ActiveRun>>,
    events_tx: broadcast::Sender<OrchestratorEvent>,
    completed_tx: mpsc::Sender<CompletedUtterance>,
    completed_rx: Mutex<Option<mpsc::Receiver<CompletedUtterance>>>,
}

impl SttOrchestrator {
    pub fn new(backend: Arc<dyn SttBackend>, stt: SttConfig, capture: CaptureConfig) -> Self {
        let (events_tx, _) = broadcast::channel(256);
        let (completed_tx, completed_rx) = mpsc::channel(64);

        Self {
            backend,
            stt_config: stt,
            capture: SystemAudioCapture::new(&capture.binary_path),
            registry: Arc::new(Mutex::new(SpeakerRegistry::new())),
            screen_source: Arc::new(MeetingWindowTitles),
            active: Mutex::new(None),
            events_tx,
            completed_tx,
            completed_rx: Mutex::new(Some(completed_rx)),
        }
    }

    /// Replace the window-title source (used by tests and non-default
    /// embeddings).
    pub fn with_screen_source(mut self, source: Arc<dyn ScreenContentSource>) -> Self {
        self.screen_source = source;
        self
    }

    /// Subscribe to transcript, audio-visualization, and status events.
    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.events_tx.subscribe()
    }

    /// Take the completed-utterance stream. One receiver per orchestrator;
    /// returns `None` after the first call.
    pub fn completed_utterances(&self) -> Option<mpsc::Receiver<CompletedUtterance>> {
        self.completed_rx.lock().unwrap().take()
    }

    /// Open both provider sessions concurrently and start the event loop.
    ///
    /// On partial failure the session that did open is closed before the
    /// error is returned, so no session leaks.
    pub async fn initialize(&self, language: Option<&str>) -> Result<(), SttError> {
        let api_key = self
            .stt_config
            .resolve_api_key()
            .ok_or(SttError::NoCredential)?;
        let language = self.stt_config.effective_language(language);
        let kind = self.stt_config.provider;

        if self.is_active() {
            info!("Replacing active transcription run");
            self.close().await;
        }

        info!("Initializing transcription sessions (provider={kind}, language={language})");

        let (mine_res, theirs_res) = futures::join!(
            SttSession::open(
                self.backend.as_ref(),
                kind,
                Channel::Mine,
                &api_key,
                &language
            ),
            SttSession::open(
                self.backend.as_ref(),
                kind,
                Channel::Theirs,
                &api_key,
                &language
            ),
        );

        let ((mine, my_rx), (theirs, their_rx)) = match (mine_res, theirs_res) {
            (Ok(m), Ok(t)) => (m, t),
            (Ok((mine, _)), Err(e)) => {
                mine.close().await;
                return Err(SttError::ProviderInit {
                    channel: Channel::Theirs,
                    reason: format!("{e:#}"),
                });
            }
            (Err(e), Ok((theirs, _))) => {
                theirs.close().await;
                return Err(SttError::ProviderInit {
                    channel: Channel::Mine,
                    reason: format!("{e:#}"),
                });
            }
            (Err(e), Err(their_err)) => {
                return Err(SttError::ProviderInit {
                    channel: Channel::Mine,
                    reason: format!("{e:#} (theirs also failed: {their_err:#})"),
                });
            }
        };

        let event_loop = EventLoop {
            debouncer: TurnDebouncer::new(),
            my_rx: Some(my_rx),
            their_rx: Some(their_rx),
            registry: Arc::clone(&self.registry),
            events_tx: self.events_tx.clone(),
            completed_tx: self.completed_tx.clone(),
        };
        let loop_task = tokio::spawn(event_loop.run());

        let run_id = format!("run-{}", Uuid::new_v4());
        info!("Both transcription sessions initialized ({run_id})");

        *self.active.lock().unwrap() = Some(ActiveRun {
            run_id,
            mine,
            theirs,
            loop_task,
        });

        let _ = self
            .events_tx
            .send(OrchestratorEvent::Status("Listening...".to_string()));

        Ok(())
    }

    /// Route one audio payload (base64 PCM, optional format hint) to the
    /// named channel's session.
    pub async fn send_audio(
        &self,
        channel: Channel,
        data: String,
        mime_type: Option<String>,
    ) -> Result<(), SttError> {
        let tx = {
            let guard = self.active.lock().unwrap();
            let run = guard.as_ref().ok_or(SttError::SessionNotActive(channel))?;
            match channel {
                Channel::Mine => run.mine.audio_sender(),
                Channel::Theirs => run.theirs.audio_sender(),
            }
        };

        tx.send(AudioPayload::with_mime(data, mime_type))
            .await
            .map_err(|_| SttError::SessionNotActive(channel))
    }

    /// Start the system-audio capture pipeline feeding the "theirs"
    /// channel. macOS only; a no-op returning `false` elsewhere, and
    /// `false` (not an error) when the helper cannot be spawned.
    pub async fn start_system_capture(&self) -> bool {
        if !cfg!(target_os = "macos") {
            debug!("System audio capture is only supported on macOS");
            return false;
        }

        let theirs_tx = {
            let guard = self.active.lock().unwrap();
            match guard.as_ref() {
                Some(run) => run.theirs.audio_sender(),
                None => {
                    warn!("Cannot start capture: theirs session not active");
                    return false;
                }
            }
        };

        let (chunk_tx, mut chunk_rx) = mpsc::channel::<String>(64);
        let events_tx = self.events_tx.clone();
        tokio::spawn(async move {
            while let Some(data) = chunk_rx.recv().await {
                let _ = events_tx.send(OrchestratorEvent::SystemAudio { data: data.clone() });
                if theirs_tx.send(AudioPayload::pcm(data)).await.is_err() {
                    error!("Error sending system audio: theirs session closed");
                    break;
                }
            }
        });

        self.capture.start(chunk_tx).await
    }

    /// Terminate the capture subprocess; safe when not running.
    pub async fn stop_system_capture(&self) {
        self.capture.stop().await;
    }

    /// True while the capture subprocess is running.
    pub fn is_capturing(&self) -> bool {
        self.capture.is_running()
    }

    /// Tear down the run: stop capture, cancel pending debounce timers
    /// (pending text is discarded, not force-finalized), close both
    /// sessions in parallel, and reset per-run state. Idempotent.
    pub async fn close(&self) {
        self.capture.stop().await;

        let run = self.active.lock().unwrap().take();
        if let Some(run) = run {
            // Dropping the loop drops the debouncer: timers die unfired
            run.loop_task.abort();
            let _ = run.loop_task.await;

            futures::join!(run.mine.close(), run.theirs.close());
            info!("All transcription sessions closed ({})", run.run_id);
        }

        self.registry.lock().unwrap().reset();
    }

    /// True iff both channel sessions are currently open.
    pub fn is_active(&self) -> bool {
        self.active.lock().unwrap().is_some()
    }

    /// Run one pass of the speaker naming heuristic. Invoked by an
    /// external poll; best-effort, never fails the pipeline.
    pub async fn detect_speaker_names(&self) {
        match self.screen_source.snapshot().await {
            Ok(content) => {
                let names = self.registry.lock().unwrap().observe_screen(&content);
                if !names.is_empty() {
                    info!("Detected speaker names: {:?}", names);
                }
            }
            Err(e) => warn!("Speaker name detection failed: {e:#}"),
        }
    }

    /// Current display label for a channel.
    pub fn speaker_label(&self, channel: Channel) -> String {
        self.registry.lock().unwrap().label_for(channel).to_string()
    }
}

/// Per-run event loop: the only mutator of the two utterance buffers.
struct EventLoop {
    debouncer: TurnDebouncer,
    my_rx: Option<mpsc::Receiver<SttEvent>>,
    their_rx: Option<mpsc::Receiver<SttEvent>>,
    registry: Arc<Mutex<SpeakerRegistry>>,
    events_tx: broadcast::Sender<OrchestratorEvent>,
    completed_tx: mpsc::Sender<CompletedUtterance>,
}

async fn recv_opt(rx: &mut Option<mpsc::Receiver<SttEvent>>) -> Option<SttEvent> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

fn deadline_or_far(deadline: Option<Instant>) -> Instant {
    deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(86_400))
}

impl EventLoop {
    async fn run(mut self) {
        loop {
            let my_deadline = self.debouncer.deadline(Channel::Mine);
            let their_deadline = self.debouncer.deadline(Channel::Theirs);

            tokio::select! {
                ev = recv_opt(&mut self.my_rx) => {
                    self.on_stream_event(Channel::Mine, ev);
                }
                ev = recv_opt(&mut self.their_rx) => {
                    self.on_stream_event(Channel::Theirs, ev);
                }
                _ = tokio::time::sleep_until(deadline_or_far(my_deadline)),
                    if my_deadline.is_some() =>
                {
                    let events = self.debouncer.on_deadline(Channel::Mine);
                    self.emit(events);
                }
                _ = tokio::time::sleep_until(deadline_or_far(their_deadline)),
                    if their_deadline.is_some() =>
                {
                    let events = self.debouncer.on_deadline(Channel::Theirs);
                    self.emit(events);
                }
            }

            let streams_done = self.my_rx.is_none() && self.their_rx.is_none();
            if streams_done
                && !self.debouncer.is_armed(Channel::Mine)
                && !self.debouncer.is_armed(Channel::Theirs)
            {
                break;
            }
        }
        debug!("Orchestrator event loop ended");
    }

    fn on_stream_event(&mut self, channel: Channel, event: Option<SttEvent>) {
        match event {
            None => {
                warn!("{channel} event stream closed");
                match channel {
                    Channel::Mine => self.my_rx = None,
                    Channel::Theirs => self.their_rx = None,
                }
            }
            Some(SttEvent::Partial(text)) => {
                let events = self.debouncer.on_partial(channel, &text);
                self.emit(events);
            }
            Some(SttEvent::Final(text)) => {
                let events = self
                    .debouncer
                    .on_finalized(channel, &text, Instant::now());
                self.emit(events);
            }
            Some(SttEvent::Error(message)) => {
                // Contained: the channel keeps running, the erroring
                // message just produces no transcript output
                error!("[{channel}] {}", SttError::ProviderStream(message));
            }
        }
    }

    fn emit(&mut self, events: Vec<TurnEvent>) {
        for event in events {
            match event {
                TurnEvent::Partial { channel, text } => {
                    let _ = self
                        .events_tx
                        .send(OrchestratorEvent::Transcript(TranscriptUpdate {
                            speaker: self.label(channel),
                            text,
                            is_partial: true,
                            is_final: false,
                            timestamp: Utc::now(),
                        }));
                }
                TurnEvent::Final { channel, text } => {
                    let speaker = self.label(channel);
                    let _ = self
                        .events_tx
                        .send(OrchestratorEvent::Transcript(TranscriptUpdate {
                            speaker: speaker.clone(),
                            text: text.clone(),
                            is_partial: false,
                            is_final: true,
                            timestamp: Utc::now(),
                        }));
                    // Never await the utterance consumer: a slow or absent
                    // one must not stall transcript delivery
                    if let Err(e) = self
                        .completed_tx
                        .try_send(CompletedUtterance { speaker, text })
                    {
                        warn!("Dropping completed utterance, consumer not keeping up: {e}");
                    }
                    let _ = self
                        .events_tx
                        .send(OrchestratorEvent::Status("Listening...".to_string()));
                }
            }
        }
    }

    fn label(&self, channel: Channel) -> String {
        self.registry.lock().unwrap().label_for(channel).to_string()
    }
}
