//! Turn-completion debouncing
//!
//! Per-channel state machine that coalesces finalized transcription
//! fragments into whole conversational turns. A finalized fragment arms a
//! fixed inactivity timer; further fragments within the window extend the
//! buffer and re-arm it. A finalized fragment on the opposite channel is
//! treated as evidence that this speaker's turn ended and force-flushes the
//! pending buffer immediately (the interruption rule).
//!
//! The debouncer is pure state: deadlines are data, and the owner decides
//! when they fire. This keeps every transition testable without a runtime.

use std::time::Duration;
use tokio::time::Instant;

use crate::stt::Channel;

/// Inactivity window after a finalized fragment before the turn is emitted.
pub const COMPLETION_DEBOUNCE: Duration = Duration::from_millis(2000);

/// Pending-turn state for one channel.
///
/// `completion_buffer` holds finalized fragments awaiting flush;
/// `utterance` holds in-flight partial text not yet finalized. At most one
/// deadline is armed per channel at any time.
#[derive(Debug, Default)]
struct ChannelTurn {
    completion_buffer: String,
    utterance: String,
    deadline: Option<Instant>,
}

/// Event produced by a debouncer transition, still unlabeled; the
/// orchestrator attaches speaker names.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnEvent {
    /// Buffer-so-far display text for an utterance still in progress
    Partial { channel: Channel, text: String },
    /// One complete conversational turn
    Final { channel: Channel, text: String },
}

/// Dual-channel turn debouncer.
#[derive(Debug, Default)]
pub struct TurnDebouncer {
    mine: ChannelTurn,
    theirs: ChannelTurn,
}

impl TurnDebouncer {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&mut self, channel: Channel) -> &mut ChannelTurn {
        match channel {
            Channel::Mine => &mut self.mine,
            Channel::Theirs => &mut self.theirs,
        }
    }

    fn state_ref(&self, channel: Channel) -> &ChannelTurn {
        match channel {
            Channel::Mine => &self.mine,
            Channel::Theirs => &self.theirs,
        }
    }

    /// When this channel's armed timer should fire, if any.
    pub fn deadline(&self, channel: Channel) -> Option<Instant> {
        self.state_ref(channel).deadline
    }

    /// True iff the channel has a finalized fragment awaiting flush.
    pub fn is_armed(&self, channel: Channel) -> bool {
        self.state_ref(channel).deadline.is_some()
    }

    /// Pending-flush text for the channel (finalized fragments only).
    pub fn pending_text(&self, channel: Channel) -> &str {
        &self.state_ref(channel).completion_buffer
    }

    /// A partial fragment arrived: the utterance is still going, so any
    /// armed timer for this channel is cancelled (not the other channel's;
    /// partials alone are not turn-end evidence). Emits the buffer-so-far
    /// display text.
    pub fn on_partial(&mut self, channel: Channel, fragment: &str) -> Vec<TurnEvent> {
        let turn = self.state(channel);
        turn.deadline = None;
        turn.utterance.push_str(fragment);

        let text = if turn.completion_buffer.is_empty() {
            turn.utterance.clone()
        } else {
            format!("{} {}", turn.completion_buffer, turn.utterance)
        };

        vec![TurnEvent::Partial { channel, text }]
    }

    /// A finalized fragment arrived. Applies the interruption rule, then
    /// buffers the fragment and (re-)arms this channel's timer.
    ///
    /// Fragments that trim to nothing or to a lone period are noise: they
    /// neither start nor extend a buffer, do not reset the timer, and do
    /// not interrupt the other channel.
    pub fn on_finalized(&mut self, channel: Channel, text: &str, now: Instant) -> Vec<TurnEvent> {
        let cleaned = text.trim();
        if cleaned.is_empty() || cleaned == "." {
            return Vec::new();
        }

        let mut events = Vec::new();

        // Interruption rule: the other speaker finishing a fragment means
        // this one's turn ended. Flush the stale buffer before handling
        // the new fragment so display order matches speaking order.
        if self.state_ref(channel.other()).deadline.is_some() {
            events.extend(self.flush(channel.other()));
        }

        let turn = self.state(channel);
        if !turn.completion_buffer.is_empty() {
            turn.completion_buffer.push(' ');
        }
        turn.completion_buffer.push_str(cleaned);
        turn.utterance.clear();
        turn.deadline = Some(now + COMPLETION_DEBOUNCE);

        events
    }

    /// The channel's inactivity timer fired. Empty buffers are a no-op,
    /// which guards against a fire racing a cancellation.
    pub fn on_deadline(&mut self, channel: Channel) -> Vec<TurnEvent> {
        self.flush(channel)
    }

    /// Discard all pending text and disarm all timers, flushing nothing.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    fn flush(&mut self, channel: Channel) -> Vec<TurnEvent> {
        let turn = self.state(channel);
        turn.deadline = None;
        turn.utterance.clear();

        let text = std::mem::take(&mut turn.completion_buffer);
        let text = text.trim().to_string();
        if text.is_empty() {
            Vec::new()
        } else {
            vec![TurnEvent::Final { channel, text }]
        }
    }
}
