// Integration tests for the system-audio capture pipeline
//
// These spawn a real subprocess standing in for the capture helper and
// verify the chunking, downmix, and encoding of its stdout stream.

#![cfg(unix)]

use base64::Engine;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

use duoscribe::{SystemAudioCapture, CHUNK_SIZE};

fn fake_helper(dir: &tempfile::TempDir, name: &str, body: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

#[tokio::test]
async fn stdout_stream_is_chunked_downmixed_and_encoded() {
    let dir = tempfile::tempdir().unwrap();
    // 2 whole chunks plus a 2400-byte remainder that never completes
    let byte_count = 2 * CHUNK_SIZE + 2400;
    let helper = fake_helper(&dir, "fake-capture-stream", &format!("head -c {byte_count} /dev/zero"));

    let capture = SystemAudioCapture::new(&helper);
    let (tx, mut rx) = mpsc::channel(16);
    assert!(capture.start(tx).await);

    for _ in 0..2 {
        let encoded = timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("chunk before timeout")
            .expect("pipeline ended early");
        let mono = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .unwrap();
        // Stereo chunk downmixed to left-channel mono: half the bytes
        assert_eq!(mono.len(), CHUNK_SIZE / 2);
        assert!(mono.iter().all(|&b| b == 0));
    }

    // The remainder is below one chunk; the stream ends without emitting it
    let end = timeout(Duration::from_secs(10), rx.recv()).await.unwrap();
    assert!(end.is_none());

    // Subprocess exit clears the handle, no auto-restart
    for _ in 0..100 {
        if !capture.is_running() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(!capture.is_running());
}

#[tokio::test]
async fn missing_binary_reports_failed_start_not_error() {
    let capture = SystemAudioCapture::new("/nonexistent/capture-helper");
    let (tx, _rx) = mpsc::channel(4);
    assert!(!capture.start(tx).await);
    assert!(!capture.is_running());
}

#[tokio::test]
async fn stop_is_safe_when_not_running_and_terminates_when_running() {
    let dir = tempfile::tempdir().unwrap();
    let helper = fake_helper(&dir, "fake-capture-idle", "sleep 60");

    let capture = SystemAudioCapture::new(&helper);
    capture.stop().await;
    assert!(!capture.is_running());

    let (tx, _rx) = mpsc::channel(4);
    assert!(capture.start(tx).await);
    assert!(capture.is_running());

    capture.stop().await;
    assert!(!capture.is_running());

    // Idempotent after termination too
    capture.stop().await;
}
