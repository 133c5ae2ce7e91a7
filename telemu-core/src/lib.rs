//! Telemetry emulator protocol engine.
//! Host-driven: no I/O; host passes connection, socket and timer events and receives actions.

pub mod commands;
pub mod generator;
pub mod protocol;
pub mod scheduler;
pub mod session;
pub mod wire;

pub use commands::StreamingState;
pub use generator::{Pacing, PayloadGenerator, RandomPacing, RandomPayloads};
pub use protocol::{Endpoint, Message, Severity, COLLECTOR_HOST, COLLECTOR_PORT};
pub use scheduler::EmitToken;
pub use session::{Action, ConnectionState, Session, SessionCounters, RECONNECT_DELAY};
pub use wire::{decode_frame, encode_frame, FrameDecodeError, FrameEncodeError, InboundBuffer};
