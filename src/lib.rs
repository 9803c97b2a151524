pub mod audio;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod speaker;
pub mod stt;
pub mod turns;

pub use audio::{ChunkBuffer, SystemAudioCapture, CHUNK_SIZE};
pub use config::{CaptureConfig, Config, ServiceConfig, SttConfig};
pub use error::SttError;
pub use orchestrator::{OrchestratorEvent, SttOrchestrator};
pub use speaker::{ScreenContentSource, SpeakerRegistry};
pub use stt::{
    AudioPayload, Channel, CompletedUtterance, ProviderKind, RawSession, SttBackend, SttEvent,
    SttSession, TranscriptUpdate,
};
pub use turns::{TurnDebouncer, TurnEvent, COMPLETION_DEBOUNCE};
