use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the two independent transcription tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// Local microphone ("me")
    Mine,
    /// System/meeting audio ("them")
    Theirs,
}

impl Channel {
    /// The opposite track, used by the cross-channel interruption rule.
    pub fn other(self) -> Channel {
        match self {
            Channel::Mine => Channel::Theirs,
            Channel::Theirs => Channel::Mine,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Mine => write!(f, "mine"),
            Channel::Theirs => write!(f, "theirs"),
        }
    }
}

/// Normalized transcription event produced by a provider session.
///
/// Both upstream message shapes (incremental-delta and single-shot) are
/// reduced to this one type before the orchestrator sees them.
#[derive(Debug, Clone, PartialEq)]
pub enum SttEvent {
    /// In-progress fragment of the current utterance
    Partial(String),
    /// Finished utterance text (just the utterance, not session history)
    Final(String),
    /// Mid-stream provider error; produces no transcript output
    Error(String),
}

/// Speaker-attributed transcript event emitted to presentation surfaces.
#[derive(Debug, Clone, Serialize)]
pub struct TranscriptUpdate {
    pub speaker: String,
    pub text: String,
    pub is_partial: bool,
    pub is_final: bool,
    pub timestamp: DateTime<Utc>,
}

/// One finalized turn, delivered to conversation-history consumers.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedUtterance {
    pub speaker: String,
    pub text: String,
}
