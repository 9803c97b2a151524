//! Speaker naming heuristic
//!
//! Best-effort extraction of human names from the window titles of meeting
//! apps, used to replace the default "Them" label. Never blocks or fails
//! the transcription pipeline; every error here is logged and swallowed by
//! the caller.

use anyhow::Result;
use regex::Regex;
use std::collections::HashMap;
use tracing::{debug, info};

use crate::stt::Channel;

pub const DEFAULT_MY_LABEL: &str = "Me";
pub const DEFAULT_THEIR_LABEL: &str = "Them";

/// Tokens that look like names but are meeting-app UI markers.
const EXCLUDED_TOKENS: [&str; 2] = ["You", "Host"];

/// Mapping from detected names to display labels for the two channels.
///
/// The "me" label is fixed; the "them" label is updated once, by the first
/// detected name, while it is still at its default. All detected names are
/// retained for potential future reuse.
pub struct SpeakerRegistry {
    my_label: String,
    their_label: String,
    detected: HashMap<String, String>,
    last_screen_content: String,
    patterns: Vec<Regex>,
}

impl SpeakerRegistry {
    pub fn new() -> Self {
        // Ordered: app-specific shapes first, generic prefix form last.
        let patterns = [
            // Zoom: "Jane Doe", "Jane Doe (Host)", "Jane Doe (You)"
            r"([A-Z][a-z]+ [A-Z][a-z]+)(?:\s*\([^)]*\))?",
            // Teams: "Jane Doe - Presenter"
            r"([A-Z][a-z]+ [A-Z][a-z]+)(?:\s*-\s*[^,]+)?",
            // Discord: "Jane#1234"
            r"([A-Z][a-z]+)#\d{4}",
            // Generic: "Speaking: Jane Doe"
            r"(?i:speaking|talking|presenter):\s*([A-Z][a-z]+ [A-Z][a-z]+)",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("static name pattern"))
        .collect();

        Self {
            my_label: DEFAULT_MY_LABEL.to_string(),
            their_label: DEFAULT_THEIR_LABEL.to_string(),
            detected: HashMap::new(),
            last_screen_content: String::new(),
            patterns,
        }
    }

    pub fn label_for(&self, channel: Channel) -> &str {
        match channel {
            Channel::Mine => &self.my_label,
            Channel::Theirs => &self.their_label,
        }
    }

    pub fn their_label(&self) -> &str {
        &self.their_label
    }

    /// Feed a fresh window-title snapshot. Identical snapshots are skipped
    /// (cheap equality check before any regex work). Returns the names
    /// newly considered in this snapshot.
    pub fn observe_screen(&mut self, content: &str) -> Vec<String> {
        if content == self.last_screen_content {
            return Vec::new();
        }
        self.last_screen_content = content.to_string();
        self.analyze(content)
    }

    fn analyze(&mut self, content: &str) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();

        for pattern in &self.patterns {
            for caps in pattern.captures_iter(content) {
                let Some(m) = caps.get(1) else { continue };
                let name = m.as_str().trim();
                if name.len() <= 2 {
                    continue;
                }
                if EXCLUDED_TOKENS.iter().any(|t| name.contains(t)) {
                    continue;
                }
                if !names.iter().any(|n| n == name) {
                    names.push(name.to_string());
                }
            }
        }

        if !names.is_empty() {
            debug!("Detected speaker names: {:?}", names);

            // First detected name becomes "them" while still at default
            if self.their_label == DEFAULT_THEIR_LABEL {
                self.their_label = names[0].clone();
                info!("Updated \"Them\" label to: {}", self.their_label);
            }

            for name in &names {
                self.detected.insert(name.to_lowercase(), name.clone());
            }
        }

        names
    }

    /// Known detected names (lowercased key to display form).
    pub fn detected(&self) -> &HashMap<String, String> {
        &self.detected
    }

    /// Restore per-run defaults: label, detected names, snapshot cache.
    pub fn reset(&mut self) {
        self.my_label = DEFAULT_MY_LABEL.to_string();
        self.their_label = DEFAULT_THEIR_LABEL.to_string();
        self.detected.clear();
        self.last_screen_content.clear();
    }
}

impl Default for SpeakerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Source of the window-title snapshot the heuristic analyzes.
#[async_trait::async_trait]
pub trait ScreenContentSource: Send + Sync {
    async fn snapshot(&self) -> Result<String>;
}

/// Window titles of known meeting apps, via the System Events scripting
/// interface. Returns an empty snapshot off macOS.
pub struct MeetingWindowTitles;

#[async_trait::async_trait]
impl ScreenContentSource for MeetingWindowTitles {
    #[cfg(target_os = "macos")]
    async fn snapshot(&self) -> Result<String> {
        use anyhow::Context;

        const SCRIPT: &str = r#"
            tell application "System Events"
                set windowList to {}
                repeat with proc in (every process whose background only is false)
                    try
                        set procName to name of proc
                        if procName contains "zoom" or procName contains "Meet" or procName contains "Teams" or procName contains "Discord" or procName contains "Slack" then
                            repeat with win in (every window of proc)
                                try
                                    set windowTitle to name of win
                                    set end of windowList to (procName & ": " & windowTitle)
                                end try
                            end repeat
                        end if
                    end try
                end repeat
                return windowList as string
            end tell"#;

        let output = tokio::process::Command::new("osascript")
            .arg("-e")
            .arg(SCRIPT)
            .output()
            .await
            .context("failed to run osascript")?;

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    #[cfg(not(target_os = "macos"))]
    async fn snapshot(&self) -> Result<String> {
        Ok(String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_name_with_parenthetical_and_updates_label() {
        let mut reg = SpeakerRegistry::new();
        let names = reg.observe_screen("zoom.us: Jane Doe (Host)");
        assert!(names.contains(&"Jane Doe".to_string()));
        assert_eq!(reg.their_label(), "Jane Doe");
    }

    #[test]
    fn first_name_wins_and_label_is_sticky() {
        let mut reg = SpeakerRegistry::new();
        reg.observe_screen("Teams: Alice Smith - Presenter");
        assert_eq!(reg.their_label(), "Alice Smith");

        reg.observe_screen("Teams: Bob Jones - Presenter");
        assert_eq!(reg.their_label(), "Alice Smith");
        // ...but the new name is still retained
        assert!(reg.detected().contains_key("bob jones"));
    }

    #[test]
    fn generic_markers_are_excluded() {
        let mut reg = SpeakerRegistry::new();
        reg.observe_screen("zoom.us: You Host");
        assert_eq!(reg.their_label(), DEFAULT_THEIR_LABEL);
    }

    #[test]
    fn discord_handle_pattern() {
        let mut reg = SpeakerRegistry::new();
        let names = reg.observe_screen("Discord: Carol#1234");
        assert!(names.contains(&"Carol".to_string()));
    }

    #[test]
    fn speaking_prefix_pattern_is_case_insensitive() {
        let mut reg = SpeakerRegistry::new();
        let names = reg.observe_screen("SPEAKING: Dave Brown");
        assert!(names.contains(&"Dave Brown".to_string()));
    }

    #[test]
    fn identical_snapshot_is_not_reanalyzed() {
        let mut reg = SpeakerRegistry::new();
        let first = reg.observe_screen("zoom.us: Jane Doe");
        assert!(!first.is_empty());
        let second = reg.observe_screen("zoom.us: Jane Doe");
        assert!(second.is_empty());
    }

    #[test]
    fn reset_restores_defaults() {
        let mut reg = SpeakerRegistry::new();
        reg.observe_screen("zoom.us: Jane Doe");
        reg.reset();
        assert_eq!(reg.their_label(), DEFAULT_THEIR_LABEL);
        assert!(reg.detected().is_empty());
        // Snapshot cache cleared too, so the same content re-analyzes
        assert!(!reg.observe_screen("zoom.us: Jane Doe").is_empty());
    }
}
