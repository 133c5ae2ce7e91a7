//! Send scheduler: decide whether an emit step sends, defers or does nothing, and keep
//! track of which scheduled emit is still live.

use std::time::Duration;

use crate::commands::StreamingState;

/// Pending unflushed bytes above which emitting is deferred.
pub const CONGESTION_THRESHOLD: usize = 64 * 1024; // 64 KiB

/// Retry delay while congested.
pub const CONGESTION_RETRY: Duration = Duration::from_millis(100);

/// Normal pacing bounds, inclusive.
pub const PACING_MIN: Duration = Duration::from_millis(10);
pub const PACING_MAX: Duration = Duration::from_millis(100);

/// Result of one emit step's checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitDecision {
    /// Not streaming or not connected. No reschedule.
    Skip,
    /// Write backlog too large; try again after the given delay.
    Defer(Duration),
    /// Generate and send one payload.
    Emit,
}

/// Checks run at the start of every emit step.
pub fn decide(streaming: StreamingState, connected: bool, pending_write: usize) -> EmitDecision {
    if !streaming.is_streaming() || !connected {
        return EmitDecision::Skip;
    }
    if pending_write > CONGESTION_THRESHOLD {
        return EmitDecision::Defer(CONGESTION_RETRY);
    }
    EmitDecision::Emit
}

/// Identifies one scheduled emit. A fired timer whose token is not the live one is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EmitToken(u64);

/// Single logical emit timer. Re-arming supersedes the previous token.
#[derive(Debug, Default)]
pub struct EmitTimer {
    generation: u64,
    armed: Option<EmitToken>,
}

impl EmitTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the timer and return the token the host must hand back when it fires.
    pub fn arm(&mut self) -> EmitToken {
        self.generation = self.generation.wrapping_add(1);
        let token = EmitToken(self.generation);
        self.armed = Some(token);
        token
    }

    /// Disarm. Returns true if something was pending.
    pub fn cancel(&mut self) -> bool {
        self.armed.take().is_some()
    }

    /// Consume `token` if it is the live one.
    pub fn fire(&mut self, token: EmitToken) -> bool {
        if self.armed == Some(token) {
            self.armed = None;
            true
        } else {
            false
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }
}
