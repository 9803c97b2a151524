//! Provider adapter: one capability surface over two upstream
//! streaming-transcription shapes, normalized to a single event type.

pub mod backend;
pub mod event;
pub mod normalize;
pub mod provider;
pub mod session;

pub use backend::{AudioPayload, RawSession, SttBackend, DEFAULT_PCM_MIME};
pub use event::{Channel, CompletedUtterance, SttEvent, TranscriptUpdate};
pub use normalize::{normalizer_for, MessageNormalizer, NOISE_MARKER};
pub use provider::ProviderKind;
pub use session::SttSession;
