// Integration tests for the session orchestrator
//
// These drive the full pipeline (backend session -> normalizer -> event
// loop -> debouncer -> broadcast) against an in-memory scripted backend,
// under tokio's paused clock so the 2s debounce window resolves instantly.

use anyhow::{bail, Result};
use base64::Engine;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

use duoscribe::orchestrator::OrchestratorEvent;
use duoscribe::{
    AudioPayload, CaptureConfig, Channel, ProviderKind, RawSession, ScreenContentSource,
    SttBackend, SttConfig, SttError, SttOrchestrator, TranscriptUpdate,
};

struct SessionTap {
    messages: mpsc::Sender<String>,
    // Held so session audio senders stay connected
    audio: mpsc::Receiver<AudioPayload>,
}

/// In-memory backend: test code injects raw provider JSON and observes
/// audio payloads, exactly at the boundary a network transport would sit.
#[derive(Default)]
struct ScriptedBackend {
    sessions: Mutex<Vec<SessionTap>>,
    opens: AtomicUsize,
    fail_open_index: Option<usize>,
}

impl ScriptedBackend {
    fn failing_on(index: usize) -> Self {
        Self {
            fail_open_index: Some(index),
            ..Default::default()
        }
    }

    async fn inject(&self, session: usize, raw: &str) {
        let tx = self.sessions.lock().unwrap()[session].messages.clone();
        tx.send(raw.to_string()).await.expect("session closed");
    }

    fn try_recv_audio(&self, session: usize) -> Option<AudioPayload> {
        self.sessions.lock().unwrap()[session].audio.try_recv().ok()
    }
}

#[async_trait::async_trait]
impl SttBackend for ScriptedBackend {
    async fn open(&self, _api_key: &str, _language: &str) -> Result<RawSession> {
        let index = self.opens.fetch_add(1, Ordering::SeqCst);
        if self.fail_open_index == Some(index) {
            bail!("scripted backend refused session {index}");
        }

        let (msg_tx, msg_rx) = mpsc::channel(64);
        let (audio_tx, audio_rx) = mpsc::channel(64);
        self.sessions.lock().unwrap().push(SessionTap {
            messages: msg_tx,
            audio: audio_rx,
        });

        Ok(RawSession {
            audio_tx,
            messages: msg_rx,
        })
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

const MINE: usize = 0;
const THEIRS: usize = 1;

fn orchestrator(backend: Arc<ScriptedBackend>, provider: ProviderKind) -> SttOrchestrator {
    let stt = SttConfig {
        provider,
        api_key: Some("test-key".to_string()),
        ..Default::default()
    };
    SttOrchestrator::new(backend, stt, CaptureConfig::default())
}

fn delta(fragment: &str) -> String {
    serde_json::json!({
        "type": "conversation.item.input_audio_transcription.delta",
        "delta": fragment,
    })
    .to_string()
}

fn completed(text: &str) -> String {
    serde_json::json!({
        "type": "conversation.item.input_audio_transcription.completed",
        "transcript": text,
    })
    .to_string()
}

fn single_shot(text: &str) -> String {
    serde_json::json!({
        "serverContent": { "inputTranscription": { "text": text } }
    })
    .to_string()
}

async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

async fn next_transcript(
    rx: &mut tokio::sync::broadcast::Receiver<OrchestratorEvent>,
) -> TranscriptUpdate {
    loop {
        let event = timeout(Duration::from_secs(30), rx.recv())
            .await
            .expect("no event before timeout")
            .expect("event channel closed");
        if let OrchestratorEvent::Transcript(update) = event {
            return update;
        }
    }
}

#[tokio::test]
async fn initialize_without_credentials_fails() {
    std::env::remove_var("GEMINI_API_KEY");

    let backend = Arc::new(ScriptedBackend::default());
    let stt = SttConfig {
        provider: ProviderKind::Gemini,
        api_key: None,
        ..Default::default()
    };
    let orch = SttOrchestrator::new(backend, stt, CaptureConfig::default());

    let err = orch.initialize(None).await.unwrap_err();
    assert!(matches!(err, SttError::NoCredential));
    assert!(!orch.is_active());
}

#[tokio::test]
async fn partial_open_failure_rolls_back_the_opened_session() {
    let backend = Arc::new(ScriptedBackend::failing_on(1));
    let orch = orchestrator(Arc::clone(&backend), ProviderKind::OpenAi);

    let err = orch.initialize(None).await.unwrap_err();
    assert!(matches!(
        err,
        SttError::ProviderInit {
            channel: Channel::Theirs,
            ..
        }
    ));
    assert!(!orch.is_active());

    // The mine session that did open was closed: its message sink is gone
    settle().await;
    let tx = backend.sessions.lock().unwrap()[MINE].messages.clone();
    assert!(tx.send("{}".to_string()).await.is_err() || tx.is_closed());
}

#[tokio::test(start_paused = true)]
async fn delta_flow_emits_partials_then_one_final() {
    let backend = Arc::new(ScriptedBackend::default());
    let orch = orchestrator(Arc::clone(&backend), ProviderKind::OpenAi);
    let mut events = orch.subscribe();
    let mut completed_rx = orch.completed_utterances().expect("first take");

    orch.initialize(None).await.unwrap();
    assert!(orch.is_active());

    backend.inject(MINE, &delta("Hel")).await;
    backend.inject(MINE, &delta("lo")).await;

    let first = next_transcript(&mut events).await;
    assert!(first.is_partial && !first.is_final);
    assert_eq!(first.speaker, "Me");
    assert_eq!(first.text, "Hel");

    let second = next_transcript(&mut events).await;
    assert!(second.is_partial);
    assert_eq!(second.text, "Hello");

    backend.inject(MINE, &completed("Hello")).await;

    // The debounce window elapses (paused clock auto-advances)
    let turn = next_transcript(&mut events).await;
    assert!(turn.is_final && !turn.is_partial);
    assert_eq!(turn.speaker, "Me");
    assert_eq!(turn.text, "Hello");

    let utterance = timeout(Duration::from_secs(30), completed_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(utterance.speaker, "Me");
    assert_eq!(utterance.text, "Hello");

    orch.close().await;
}

#[tokio::test(start_paused = true)]
async fn finalized_fragments_within_window_coalesce_into_one_turn() {
    let backend = Arc::new(ScriptedBackend::default());
    let orch = orchestrator(Arc::clone(&backend), ProviderKind::Gemini);
    let mut events = orch.subscribe();

    orch.initialize(None).await.unwrap();

    backend.inject(THEIRS, &single_shot("How are")).await;
    settle().await;
    backend.inject(THEIRS, &single_shot("you today?")).await;

    let turn = next_transcript(&mut events).await;
    assert!(turn.is_final);
    assert_eq!(turn.speaker, "Them");
    assert_eq!(turn.text, "How are you today?");

    orch.close().await;
}

#[tokio::test(start_paused = true)]
async fn interruption_emits_stale_turn_before_new_speaker() {
    let backend = Arc::new(ScriptedBackend::default());
    let orch = orchestrator(Arc::clone(&backend), ProviderKind::Gemini);
    let mut events = orch.subscribe();

    orch.initialize(None).await.unwrap();

    backend.inject(THEIRS, &single_shot("hi there")).await;
    settle().await;
    backend.inject(MINE, &single_shot("hello back")).await;

    let first = next_transcript(&mut events).await;
    assert!(first.is_final);
    assert_eq!(first.speaker, "Them");
    assert_eq!(first.text, "hi there");

    let second = next_transcript(&mut events).await;
    assert!(second.is_final);
    assert_eq!(second.speaker, "Me");
    assert_eq!(second.text, "hello back");

    orch.close().await;
}

#[tokio::test(start_paused = true)]
async fn noise_only_messages_produce_no_events() {
    let backend = Arc::new(ScriptedBackend::default());
    let orch = orchestrator(Arc::clone(&backend), ProviderKind::Gemini);
    let mut events = orch.subscribe();

    orch.initialize(None).await.unwrap();
    // Drain the initial status broadcast
    while let Ok(event) = events.try_recv() {
        assert!(matches!(event, OrchestratorEvent::Status(_)));
    }

    backend.inject(THEIRS, &single_shot(" . ")).await;
    backend.inject(THEIRS, &single_shot("<noise>")).await;
    settle().await;

    assert!(events.try_recv().is_err());

    orch.close().await;
}

#[tokio::test(start_paused = true)]
async fn close_discards_pending_text_and_is_idempotent() {
    let backend = Arc::new(ScriptedBackend::default());
    let orch = orchestrator(Arc::clone(&backend), ProviderKind::Gemini);
    let mut events = orch.subscribe();
    let mut completed_rx = orch.completed_utterances().expect("first take");

    orch.initialize(None).await.unwrap();

    backend.inject(THEIRS, &single_shot("never flushed")).await;
    settle().await;

    // Close before the debounce window elapses, twice
    orch.close().await;
    orch.close().await;
    assert!(!orch.is_active());

    // Pending text was discarded, not force-finalized
    while let Ok(event) = events.try_recv() {
        assert!(
            !matches!(event, OrchestratorEvent::Transcript(t) if t.is_final),
            "discarded buffer must not flush on close"
        );
    }
    assert!(completed_rx.try_recv().is_err());

    let err = orch
        .send_audio(Channel::Theirs, "AAAA".to_string(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, SttError::SessionNotActive(Channel::Theirs)));
}

#[tokio::test]
async fn send_audio_routes_to_the_named_channel() {
    let backend = Arc::new(ScriptedBackend::default());
    let orch = orchestrator(Arc::clone(&backend), ProviderKind::OpenAi);
    orch.initialize(None).await.unwrap();

    let mic = base64::engine::general_purpose::STANDARD.encode([1u8, 2, 3, 4]);
    orch.send_audio(Channel::Mine, mic.clone(), None)
        .await
        .unwrap();
    orch.send_audio(
        Channel::Theirs,
        "c3lz".to_string(),
        Some("audio/pcm;rate=16000".to_string()),
    )
    .await
    .unwrap();
    settle().await;

    let mine_payload = backend.try_recv_audio(MINE).expect("mine audio");
    assert_eq!(mine_payload.data, mic);
    assert_eq!(mine_payload.mime_type, "audio/pcm;rate=24000");

    let theirs_payload = backend.try_recv_audio(THEIRS).expect("theirs audio");
    assert_eq!(theirs_payload.data, "c3lz");
    assert_eq!(theirs_payload.mime_type, "audio/pcm;rate=16000");

    assert!(backend.try_recv_audio(MINE).is_none());

    orch.close().await;
}

struct FakeScreen(&'static str);

#[async_trait::async_trait]
impl ScreenContentSource for FakeScreen {
    async fn snapshot(&self) -> Result<String> {
        Ok(self.0.to_string())
    }
}

#[tokio::test(start_paused = true)]
async fn detected_speaker_name_labels_their_turns_until_reset() {
    let backend = Arc::new(ScriptedBackend::default());
    let orch = orchestrator(Arc::clone(&backend), ProviderKind::Gemini)
        .with_screen_source(Arc::new(FakeScreen("zoom.us: Jane Doe (Host)")));
    let mut events = orch.subscribe();

    orch.initialize(None).await.unwrap();
    orch.detect_speaker_names().await;
    assert_eq!(orch.speaker_label(Channel::Theirs), "Jane Doe");
    assert_eq!(orch.speaker_label(Channel::Mine), "Me");

    backend.inject(THEIRS, &single_shot("good morning")).await;
    let turn = next_transcript(&mut events).await;
    assert!(turn.is_final);
    assert_eq!(turn.speaker, "Jane Doe");

    // close() restores the default label for the next run
    orch.close().await;
    assert_eq!(orch.speaker_label(Channel::Theirs), "Them");
}

#[tokio::test(start_paused = true)]
async fn transcripts_keep_flowing_when_completed_stream_is_never_taken() {
    let backend = Arc::new(ScriptedBackend::default());
    let orch = orchestrator(Arc::clone(&backend), ProviderKind::Gemini);
    let mut events = orch.subscribe();

    orch.initialize(None).await.unwrap();

    // Well past the completed-utterance channel capacity; an embedder that
    // only watches the broadcast surface must still see every turn
    for i in 0..70 {
        backend
            .inject(THEIRS, &single_shot(&format!("turn {i}")))
            .await;
        let turn = next_transcript(&mut events).await;
        assert!(turn.is_final);
        assert_eq!(turn.text, format!("turn {i}"));
    }

    // The buffered prefix is still there for a late consumer; overflow
    // turns were dropped rather than stalling the loop
    let mut completed_rx = orch.completed_utterances().expect("first take");
    let first = completed_rx.try_recv().expect("buffered utterance");
    assert_eq!(first.text, "turn 0");

    orch.close().await;
}

#[tokio::test(start_paused = true)]
async fn provider_error_message_does_not_interrupt_the_stream() {
    let backend = Arc::new(ScriptedBackend::default());
    let orch = orchestrator(Arc::clone(&backend), ProviderKind::OpenAi);
    let mut events = orch.subscribe();

    orch.initialize(None).await.unwrap();
    while let Ok(event) = events.try_recv() {
        assert!(matches!(event, OrchestratorEvent::Status(_)));
    }

    backend
        .inject(
            MINE,
            r#"{"type":"x","error":{"message":"quota exceeded"}}"#,
        )
        .await;
    settle().await;

    // The erroring message produced no transcript output
    assert!(events.try_recv().is_err());

    // ...and the channel keeps transcribing afterwards
    backend.inject(MINE, &delta("Hi")).await;
    let partial = next_transcript(&mut events).await;
    assert!(partial.is_partial);
    assert_eq!(partial.text, "Hi");

    backend.inject(MINE, &completed("Hi")).await;
    let turn = next_transcript(&mut events).await;
    assert!(turn.is_final);
    assert_eq!(turn.text, "Hi");

    orch.close().await;
}
