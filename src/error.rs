use thiserror::Error;

use crate::stt::Channel;

/// Errors surfaced by the transcription orchestrator.
///
/// Only `NoCredential` and `ProviderInit` are fatal to a run; the other
/// variants are recoverable at the call site or contained at the adapter
/// boundary.
#[derive(Error, Debug)]
pub enum SttError {
    #[error("no API key available in config or environment")]
    NoCredential,

    #[error("failed to open {channel} transcription session: {reason}")]
    ProviderInit { channel: Channel, reason: String },

    #[error("{0} transcription session is not active")]
    SessionNotActive(Channel),

    #[error("failed to start system audio capture: {0}")]
    CaptureSpawn(String),

    #[error("provider stream error: {0}")]
    ProviderStream(String),
}
