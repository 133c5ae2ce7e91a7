//! Command processing: map inbound messages onto streaming state changes.

use crate::protocol::Message;

/// Whether the device is currently emitting telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamingState {
    #[default]
    Idle,
    Streaming,
}

impl StreamingState {
    pub fn is_streaming(self) -> bool {
        self == StreamingState::Streaming
    }
}

/// What the session must do after an inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandEffect {
    /// Nothing changes.
    None,
    /// Collector confirmed the connection.
    Acknowledged,
    /// Idle -> Streaming; run one emit step right away.
    StartStreaming,
    /// Streaming -> Idle; drop the pending emit.
    StopStreaming,
}

/// Apply one inbound message to `state`. Start while streaming and stop while idle are no-ops.
pub fn apply(state: &mut StreamingState, msg: &Message) -> CommandEffect {
    match (msg, *state) {
        (Message::Handshake, _) => CommandEffect::Acknowledged,
        (Message::CommandStart, StreamingState::Idle) => {
            *state = StreamingState::Streaming;
            CommandEffect::StartStreaming
        }
        (Message::CommandStop, StreamingState::Streaming) => {
            *state = StreamingState::Idle;
            CommandEffect::StopStreaming
        }
        _ => CommandEffect::None,
    }
}
