pub mod capture;
pub mod chunker;

pub use capture::SystemAudioCapture;
pub use chunker::{
    encode_chunk, stereo_to_mono_left, ChunkBuffer, BYTES_PER_SAMPLE, CAPTURE_CHANNELS,
    CHUNK_SIZE, SAMPLE_RATE,
};
