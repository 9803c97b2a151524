// Fixed-format PCM chunking and downmix for the system capture stream
//
// The capture helper emits interleaved 16-bit stereo PCM at 24kHz. We
// re-chunk its byte stream into 100ms blocks and keep only the left channel
// of each stereo frame before handing audio to the provider.

use base64::Engine;

/// Sample rate of the capture helper's output
pub const SAMPLE_RATE: u32 = 24_000;
/// 16-bit samples
pub const BYTES_PER_SAMPLE: usize = 2;
/// The helper emits interleaved stereo
pub const CAPTURE_CHANNELS: usize = 2;
/// One chunk holds 100ms of audio: 24000 * 2 * 2 / 10 = 9600 bytes
pub const CHUNK_SIZE: usize = SAMPLE_RATE as usize * BYTES_PER_SAMPLE * CAPTURE_CHANNELS / 10;

/// Rolling byte FIFO that slices fixed-size chunks off the front.
///
/// Bytes are never reordered or dropped; a partial chunk stays buffered
/// until enough bytes arrive to complete it.
#[derive(Debug)]
pub struct ChunkBuffer {
    buf: Vec<u8>,
    chunk_size: usize,
}

impl ChunkBuffer {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            buf: Vec::new(),
            chunk_size,
        }
    }

    /// Append incoming bytes and return every complete chunk now available,
    /// in arrival order.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        self.buf.extend_from_slice(bytes);

        let mut chunks = Vec::new();
        while self.buf.len() >= self.chunk_size {
            chunks.push(self.buf.drain(..self.chunk_size).collect());
        }
        chunks
    }

    /// Bytes currently buffered (always less than one chunk after `push`).
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

/// Downmix interleaved 16-bit stereo PCM to mono by keeping the left
/// sample of each stereo frame. Input of `4m` bytes yields `2m` bytes.
pub fn stereo_to_mono_left(stereo: &[u8]) -> Vec<u8> {
    let mut mono = Vec::with_capacity(stereo.len() / 2);
    for frame in stereo.chunks_exact(2 * BYTES_PER_SAMPLE) {
        mono.extend_from_slice(&frame[..BYTES_PER_SAMPLE]);
    }
    mono
}

/// Binary-safe encoding used for audio payloads leaving the pipeline.
pub fn encode_chunk(mono: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(mono)
}
