// System audio capture pipeline
//
// Bridges an external capture helper (SystemAudioDump-style binary) to the
// "theirs" transcription channel. The helper is spawned with no arguments
// and writes raw interleaved stereo PCM to stdout; we re-chunk that stream
// into 100ms blocks, downmix to mono, base64-encode, and forward each chunk
// to the consumer channel.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::chunker::{encode_chunk, stereo_to_mono_left, ChunkBuffer, CHUNK_SIZE};
use crate::error::SttError;

/// Grace period for stale-process cleanup and for shutdown before
/// escalating to a force kill.
const TERMINATE_GRACE: Duration = Duration::from_secs(2);

/// Owns the capture subprocess and its stdout pipeline.
///
/// The subprocess does not auto-restart: when it exits (cleanly or not) the
/// handle is cleared and a caller must explicitly start capture again.
pub struct SystemAudioCapture {
    binary_path: PathBuf,
    process_name: String,
    child: Arc<Mutex<Option<Child>>>,
}

impl SystemAudioCapture {
    pub fn new(binary_path: impl AsRef<Path>) -> Self {
        let binary_path = binary_path.as_ref().to_path_buf();
        let process_name = binary_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| binary_path.to_string_lossy().into_owned());

        Self {
            binary_path,
            process_name,
            child: Arc::new(Mutex::new(None)),
        }
    }

    /// Start the capture subprocess and its stdout pipeline.
    ///
    /// Each complete 100ms chunk is downmixed, base64-encoded, and sent on
    /// `chunk_tx`. Returns `false` (not an error) when the helper cannot be
    /// spawned; capture simply stays off.
    pub async fn start(&self, chunk_tx: mpsc::Sender<String>) -> bool {
        // A previous instance of ours, then orphans from crashed runs. The
        // helper holds exclusive audio-device access, so stale copies must
        // go before we spawn a fresh one.
        self.stop().await;
        self.kill_stale().await;

        info!("Starting system audio capture: {:?}", self.binary_path);

        let mut child = match Command::new(&self.binary_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                warn!("{}", SttError::CaptureSpawn(e.to_string()));
                return false;
            }
        };

        let Some(pid) = child.id() else {
            warn!("{} spawned without a pid, giving up", self.process_name);
            return false;
        };

        info!("{} started with pid {}", self.process_name, pid);

        if let Some(stderr) = child.stderr.take() {
            let process_name = self.process_name.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    warn!("{} stderr: {}", process_name, line);
                }
            });
        }

        let Some(mut stdout) = child.stdout.take() else {
            warn!("{} has no stdout pipe", self.process_name);
            return false;
        };

        *self.child.lock().unwrap() = Some(child);

        let slot = Arc::clone(&self.child);
        let process_name = self.process_name.clone();
        tokio::spawn(async move {
            let mut chunks = ChunkBuffer::new(CHUNK_SIZE);
            let mut read_buf = [0u8; 4096];

            'read: loop {
                match stdout.read(&mut read_buf).await {
                    Ok(0) => break 'read,
                    Ok(n) => {
                        for chunk in chunks.push(&read_buf[..n]) {
                            let mono = stereo_to_mono_left(&chunk);
                            if chunk_tx.send(encode_chunk(&mono)).await.is_err() {
                                debug!("audio chunk consumer gone, stopping pipeline");
                                break 'read;
                            }
                        }
                    }
                    Err(e) => {
                        warn!("Error reading {} stdout: {}", process_name, e);
                        break 'read;
                    }
                }
            }

            // Reap the subprocess and clear the handle; no auto-restart
            let child = slot.lock().unwrap().take();
            if let Some(mut child) = child {
                match child.wait().await {
                    Ok(status) => info!("{} exited: {}", process_name, status),
                    Err(e) => warn!("Failed to reap {}: {}", process_name, e),
                }
            }
        });

        true
    }

    /// Best-effort kill of stale helper instances by name. "Not found" is
    /// success; this only guards against orphans from a crashed run.
    async fn kill_stale(&self) {
        debug!("Checking for stale {} processes", self.process_name);

        let kill = Command::new("pkill")
            .arg("-f")
            .arg(&self.process_name)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();

        match tokio::time::timeout(TERMINATE_GRACE, kill).await {
            Ok(Ok(status)) if status.success() => {
                info!("Killed stale {} instance", self.process_name)
            }
            Ok(Ok(_)) => debug!("No stale {} instances found", self.process_name),
            Ok(Err(e)) => debug!("Stale process check failed (ignored): {}", e),
            Err(_) => debug!("Stale process check timed out (ignored)"),
        }
    }

    /// Terminate the subprocess if running; safe to call when it is not.
    ///
    /// Sends SIGTERM and waits a bounded grace period before force-killing.
    pub async fn stop(&self) {
        let child = self.child.lock().unwrap().take();
        let Some(mut child) = child else { return };

        info!("Stopping {}", self.process_name);

        if let Some(pid) = child.id() {
            let _ = Command::new("kill")
                .arg("-TERM")
                .arg(pid.to_string())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .await;
        }

        match tokio::time::timeout(TERMINATE_GRACE, child.wait()).await {
            Ok(Ok(status)) => info!("{} stopped: {}", self.process_name, status),
            Ok(Err(e)) => warn!("Error waiting for {}: {}", self.process_name, e),
            Err(_) => {
                warn!("{} ignored SIGTERM, force killing", self.process_name);
                let _ = child.start_kill();
                let _ = child.wait().await;
            }
        }
    }

    /// True while the capture subprocess handle is held.
    pub fn is_running(&self) -> bool {
        self.child.lock().unwrap().is_some()
    }
}
