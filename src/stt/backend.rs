use anyhow::Result;
use tokio::sync::mpsc;

/// Default format hint for raw PCM pushed to a provider.
pub const DEFAULT_PCM_MIME: &str = "audio/pcm;rate=24000";

/// One audio frame pushed to a provider session: base64 PCM plus a format
/// hint for providers that want one.
#[derive(Debug, Clone)]
pub struct AudioPayload {
    /// Base64-encoded PCM bytes
    pub data: String,
    /// MIME/format string, e.g. "audio/pcm;rate=24000"
    pub mime_type: String,
}

impl AudioPayload {
    pub fn pcm(data: String) -> Self {
        Self {
            data,
            mime_type: DEFAULT_PCM_MIME.to_string(),
        }
    }

    pub fn with_mime(data: String, mime_type: Option<String>) -> Self {
        Self {
            data,
            mime_type: mime_type.unwrap_or_else(|| DEFAULT_PCM_MIME.to_string()),
        }
    }
}

/// A raw provider session as handed back by a backend: an audio sink and a
/// stream of raw provider messages (JSON text, not yet normalized).
///
/// Dropping `audio_tx` signals the backend to shut the session down.
pub struct RawSession {
    pub audio_tx: mpsc::Sender<AudioPayload>,
    pub messages: mpsc::Receiver<String>,
}

/// Streaming transcription backend.
///
/// Concrete network transports (websocket clients etc.) live outside this
/// crate; embedders and tests supply implementations. The orchestrator only
/// depends on this capability surface.
#[async_trait::async_trait]
pub trait SttBackend: Send + Sync {
    /// Open one streaming session for the given language.
    async fn open(&self, api_key: &str, language: &str) -> Result<RawSession>;

    /// Backend name for logging
    fn name(&self) -> &str;
}
