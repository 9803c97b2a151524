// Message normalization for the two upstream provider shapes
//
// The orchestrator never sees raw provider JSON. Each session runs its
// messages through one of these normalizers, which reduce both shapes to
// the canonical `SttEvent` type:
//
// - Incremental-delta (OpenAI realtime style): ".delta" messages carry a
//   fragment of the in-flight utterance, ".completed" messages carry the
//   finished utterance text.
// - Single-shot (Gemini live style): each message carries one complete
//   candidate utterance with no partial phase.

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::event::SttEvent;
use super::provider::ProviderKind;

/// Noise marker embedded in single-shot transcription text.
pub const NOISE_MARKER: &str = "<noise>";

/// Internal audio tag that sometimes leaks into delta fragments.
const DELTA_NOISE_TAG: &str = "vq_lbr_audio_";

const DELTA_KIND: &str = "conversation.item.input_audio_transcription.delta";
const COMPLETED_KIND: &str = "conversation.item.input_audio_transcription.completed";

#[derive(Debug, Deserialize)]
struct DeltaShapeMessage {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    delta: Option<String>,
    #[serde(default)]
    transcript: Option<String>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct SingleShotMessage {
    #[serde(rename = "serverContent", default)]
    server_content: Option<ServerContent>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ServerContent {
    #[serde(rename = "inputTranscription", default)]
    input_transcription: Option<InputTranscription>,
}

#[derive(Debug, Deserialize)]
struct InputTranscription {
    #[serde(default)]
    text: String,
}

/// Reduces one raw provider message to zero or more canonical events.
pub trait MessageNormalizer: Send {
    fn normalize(&mut self, raw: &str) -> Vec<SttEvent>;
}

pub fn normalizer_for(kind: ProviderKind) -> Box<dyn MessageNormalizer> {
    match kind {
        ProviderKind::OpenAi => Box::new(DeltaNormalizer),
        ProviderKind::Gemini => Box::new(SingleShotNormalizer),
    }
}

/// Normalizer for the incremental-delta shape.
pub struct DeltaNormalizer;

impl MessageNormalizer for DeltaNormalizer {
    fn normalize(&mut self, raw: &str) -> Vec<SttEvent> {
        let msg: DeltaShapeMessage = match serde_json::from_str(raw) {
            Ok(m) => m,
            Err(e) => {
                debug!("unparseable delta-shape message: {e}");
                return Vec::new();
            }
        };

        let mut events = Vec::new();

        if let Some(err) = &msg.error {
            events.push(SttEvent::Error(err.to_string()));
            return events;
        }

        match msg.kind.as_str() {
            DELTA_KIND => {
                let fragment = msg.delta.or(msg.transcript).unwrap_or_default();
                if !fragment.is_empty() && !fragment.contains(DELTA_NOISE_TAG) {
                    events.push(SttEvent::Partial(fragment));
                }
            }
            COMPLETED_KIND => {
                let text = msg.transcript.or(msg.delta).unwrap_or_default();
                let text = text.trim();
                if !text.is_empty() {
                    events.push(SttEvent::Final(text.to_string()));
                }
            }
            _ => {}
        }

        events
    }
}

/// Normalizer for the single-shot shape.
///
/// This shape has no native partial phase, so it only ever emits `Final`.
pub struct SingleShotNormalizer;

impl MessageNormalizer for SingleShotNormalizer {
    fn normalize(&mut self, raw: &str) -> Vec<SttEvent> {
        let msg: SingleShotMessage = match serde_json::from_str(raw) {
            Ok(m) => m,
            Err(e) => {
                debug!("unparseable single-shot message: {e}");
                return Vec::new();
            }
        };

        let mut events = Vec::new();

        if let Some(err) = &msg.error {
            events.push(SttEvent::Error(err.to_string()));
            return events;
        }

        let text = msg
            .server_content
            .and_then(|c| c.input_transcription)
            .map(|t| t.text)
            .unwrap_or_default();

        let cleaned = text.replace(NOISE_MARKER, "");
        let cleaned = cleaned.trim();
        if !cleaned.is_empty() && cleaned != "." {
            events.push(SttEvent::Final(cleaned.to_string()));
        }

        events
    }
}
