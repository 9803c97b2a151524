use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::backend::{AudioPayload, SttBackend};
use super::event::{Channel, SttEvent};
use super::normalize::normalizer_for;
use super::provider::ProviderKind;

/// One open provider session bound to a channel.
///
/// Wraps the raw backend session with a normalizer task that reduces raw
/// provider messages to `SttEvent`s. Owned exclusively by the orchestrator;
/// at most one exists per channel.
pub struct SttSession {
    channel: Channel,
    audio_tx: mpsc::Sender<AudioPayload>,
    normalizer_task: JoinHandle<()>,
}

impl SttSession {
    /// Open a session and spawn its normalizer task.
    ///
    /// Returns the session handle plus the receiver of normalized events.
    pub async fn open(
        backend: &dyn SttBackend,
        kind: ProviderKind,
        channel: Channel,
        api_key: &str,
        language: &str,
    ) -> Result<(SttSession, mpsc::Receiver<SttEvent>)> {
        let raw = backend
            .open(api_key, language)
            .await
            .with_context(|| format!("backend {} refused {channel} session", backend.name()))?;

        let (event_tx, event_rx) = mpsc::channel(256);
        let mut messages = raw.messages;
        let mut normalizer = normalizer_for(kind);

        let normalizer_task = tokio::spawn(async move {
            while let Some(raw_msg) = messages.recv().await {
                for event in normalizer.normalize(&raw_msg) {
                    if event_tx.send(event).await.is_err() {
                        // Orchestrator went away; stop normalizing
                        return;
                    }
                }
            }
            debug!("{channel} provider message stream ended");
        });

        info!("{channel} transcription session opened ({kind})");

        Ok((
            SttSession {
                channel,
                audio_tx: raw.audio_tx,
                normalizer_task,
            },
            event_rx,
        ))
    }

    /// Cloneable sender used to push audio frames into this session.
    pub fn audio_sender(&self) -> mpsc::Sender<AudioPayload> {
        self.audio_tx.clone()
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// Close the session: disconnect the audio sink (which signals the
    /// backend to shut down) and stop the normalizer task. Events still in
    /// flight are discarded.
    pub async fn close(self) {
        drop(self.audio_tx);
        self.normalizer_task.abort();
        let _ = self.normalizer_task.await;
        info!("{} transcription session closed", self.channel);
    }
}
