//! Host-driven API: Session receives connection, socket and timer events from the host
//! and returns actions for the host to perform.

use std::time::Duration;

use crate::commands::{self, CommandEffect, StreamingState};
use crate::generator::{Pacing, PayloadGenerator, RandomPacing, RandomPayloads};
use crate::protocol::{Endpoint, Message};
use crate::scheduler::{self, EmitDecision, EmitTimer, EmitToken};
use crate::wire::{self, DecodedFrame, InboundBuffer};

/// Delay between a disconnect and the next connection attempt. Constant; no backoff.
pub const RECONNECT_DELAY: Duration = Duration::from_millis(5000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Action for host to perform, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Open a stream connection; report back via `on_connected` or `on_transport_error`.
    Connect(Endpoint),
    /// Queue one whole frame for writing.
    Send(Vec<u8>),
    /// (Re)arm the single emit timer; pass `token` to `on_emit_timer` when it fires.
    ScheduleEmit { token: EmitToken, delay: Duration },
    CancelEmit,
    /// Arm the reconnect timer; call `on_reconnect_timer` when it fires.
    ScheduleReconnect(Duration),
    CancelReconnect,
    /// Drop the connection (or the pending connect) and discard unwritten bytes.
    Close,
}

/// Per-session traffic counters. Never reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionCounters {
    pub connect_attempts: u64,
    pub frames_sent: u64,
    pub bytes_sent: u64,
    pub frames_received: u64,
    pub frames_discarded: u64,
    pub deferrals: u64,
}

/// One emulated device talking to one collector.
pub struct Session<G = RandomPayloads, P = RandomPacing> {
    endpoint: Endpoint,
    state: ConnectionState,
    streaming: StreamingState,
    inbound: InboundBuffer,
    /// Bytes handed to the host via `Send` and not yet reported flushed.
    pending_write: usize,
    emit: EmitTimer,
    reconnect_armed: bool,
    generator: G,
    pacing: P,
    counters: SessionCounters,
}

impl Session {
    /// Session against the fixed collector with random payloads and pacing.
    pub fn new() -> Self {
        Self::with_parts(
            Endpoint::collector(),
            RandomPayloads::from_entropy(),
            RandomPacing::from_entropy(),
        )
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl<G: PayloadGenerator, P: Pacing> Session<G, P> {
    pub fn with_parts(endpoint: Endpoint, generator: G, pacing: P) -> Self {
        Self {
            endpoint,
            state: ConnectionState::Disconnected,
            streaming: StreamingState::Idle,
            inbound: InboundBuffer::new(),
            pending_write: 0,
            emit: EmitTimer::new(),
            reconnect_armed: false,
            generator,
            pacing,
            counters: SessionCounters::default(),
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state
    }

    pub fn streaming_state(&self) -> StreamingState {
        self.streaming
    }

    pub fn pending_write_bytes(&self) -> usize {
        self.pending_write
    }

    pub fn inbound_len(&self) -> usize {
        self.inbound.len()
    }

    pub fn reconnect_armed(&self) -> bool {
        self.reconnect_armed
    }

    pub fn counters(&self) -> &SessionCounters {
        &self.counters
    }

    /// First connection attempt. Later attempts are scheduled internally.
    pub fn start(&mut self) -> Vec<Action> {
        self.connect()
    }

    pub fn on_reconnect_timer(&mut self) -> Vec<Action> {
        self.reconnect_armed = false;
        self.connect()
    }

    pub fn on_connected(&mut self) -> Vec<Action> {
        if self.state != ConnectionState::Connecting {
            return vec![];
        }
        self.state = ConnectionState::Connected;
        self.inbound.clear();
        self.pending_write = 0;
        self.reconnect_armed = false;
        tracing::info!(endpoint = %self.endpoint, "connected to collector");
        vec![Action::CancelReconnect]
    }

    /// Connect failure, reset, timeout: all handled the same way.
    pub fn on_transport_error(&mut self, reason: &str) -> Vec<Action> {
        tracing::warn!(reason, state = ?self.state, "transport error");
        self.disconnect()
    }

    /// Peer closed the stream (read returned EOF).
    pub fn on_peer_closed(&mut self) -> Vec<Action> {
        tracing::info!("collector closed the connection");
        self.disconnect()
    }

    /// Feed bytes read from the socket. Complete frames are handled in arrival order.
    pub fn on_bytes_received(&mut self, data: &[u8]) -> Vec<Action> {
        if self.state != ConnectionState::Connected {
            return vec![];
        }
        self.inbound.extend(data);
        let mut actions = Vec::new();
        loop {
            match self.inbound.next_frame() {
                Ok(Some(DecodedFrame::Message(msg))) => {
                    self.counters.frames_received += 1;
                    actions.extend(self.on_message(msg));
                }
                Ok(Some(DecodedFrame::Malformed)) => {
                    self.counters.frames_discarded += 1;
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "protocol violation, dropping connection");
                    actions.extend(self.disconnect());
                    break;
                }
            }
        }
        actions
    }

    /// Host wrote `n` queued bytes to the transport.
    pub fn on_bytes_flushed(&mut self, n: usize) {
        self.pending_write = self.pending_write.saturating_sub(n);
    }

    /// Emit timer fired. Stale tokens (cancelled or superseded) do nothing.
    pub fn on_emit_timer(&mut self, token: EmitToken) -> Vec<Action> {
        if !self.emit.fire(token) {
            tracing::trace!(?token, "ignoring stale emit timer");
            return vec![];
        }
        self.emit_step()
    }

    fn connect(&mut self) -> Vec<Action> {
        if self.state != ConnectionState::Disconnected {
            return vec![];
        }
        self.state = ConnectionState::Connecting;
        self.counters.connect_attempts += 1;
        tracing::info!(endpoint = %self.endpoint, attempt = self.counters.connect_attempts, "connecting");
        vec![Action::Connect(self.endpoint.clone())]
    }

    fn disconnect(&mut self) -> Vec<Action> {
        let mut actions = Vec::new();
        if self.state != ConnectionState::Disconnected {
            actions.push(Action::Close);
            tracing::debug!(
                sent = self.counters.frames_sent,
                received = self.counters.frames_received,
                discarded = self.counters.frames_discarded,
                deferrals = self.counters.deferrals,
                "connection closed"
            );
        }
        self.state = ConnectionState::Disconnected;
        self.streaming = StreamingState::Idle;
        if self.emit.cancel() {
            actions.push(Action::CancelEmit);
        }
        self.inbound.clear();
        self.pending_write = 0;
        if !self.reconnect_armed {
            self.reconnect_armed = true;
            tracing::info!(delay_ms = RECONNECT_DELAY.as_millis() as u64, "retrying later");
            actions.push(Action::ScheduleReconnect(RECONNECT_DELAY));
        }
        actions
    }

    fn on_message(&mut self, msg: Message) -> Vec<Action> {
        tracing::debug!(kind = msg.kind(), "received");
        match commands::apply(&mut self.streaming, &msg) {
            CommandEffect::Acknowledged => {
                tracing::info!("collector confirmed connection");
                vec![]
            }
            CommandEffect::StartStreaming => {
                tracing::info!("streaming started");
                self.emit_step()
            }
            CommandEffect::StopStreaming => {
                tracing::info!("streaming stopped");
                if self.emit.cancel() {
                    vec![Action::CancelEmit]
                } else {
                    vec![]
                }
            }
            CommandEffect::None => vec![],
        }
    }

    fn emit_step(&mut self) -> Vec<Action> {
        let connected = self.state == ConnectionState::Connected;
        match scheduler::decide(self.streaming, connected, self.pending_write) {
            EmitDecision::Skip => vec![],
            EmitDecision::Defer(delay) => {
                self.counters.deferrals += 1;
                tracing::debug!(pending_bytes = self.pending_write, "write backlog over threshold, deferring");
                vec![self.schedule_emit(delay)]
            }
            EmitDecision::Emit => {
                let msg = self.generator.generate();
                let mut actions = Vec::with_capacity(2);
                match wire::encode_frame(&msg) {
                    Ok(frame) => {
                        self.pending_write += frame.len();
                        self.counters.frames_sent += 1;
                        self.counters.bytes_sent += frame.len() as u64;
                        tracing::debug!(kind = msg.kind(), bytes = frame.len(), "sent");
                        tracing::trace!(payload = ?msg);
                        actions.push(Action::Send(frame));
                    }
                    Err(e) => tracing::warn!(error = %e, kind = msg.kind(), "dropping unencodable payload"),
                }
                let delay = self.pacing.next_delay();
                actions.push(self.schedule_emit(delay));
                actions
            }
        }
    }

    fn schedule_emit(&mut self, delay: Duration) -> Action {
        let token = self.emit.arm();
        Action::ScheduleEmit { token, delay }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Severity;
    use crate::scheduler::{CONGESTION_THRESHOLD, PACING_MAX, PACING_MIN};
    use crate::wire::{decode_frame, encode_frame, MAX_FRAME_LEN};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const PACE: Duration = Duration::from_millis(42);

    struct FixedPayload(Message);

    impl PayloadGenerator for FixedPayload {
        fn generate(&mut self) -> Message {
            self.0.clone()
        }
    }

    struct FixedPacing(Duration);

    impl Pacing for FixedPacing {
        fn next_delay(&mut self) -> Duration {
            self.0
        }
    }

    fn status() -> Message {
        Message::DeviceStatus {
            uptime: 4200,
            cpu_usage: 17,
            memory_usage: 33,
        }
    }

    fn session_with(msg: Message) -> Session<FixedPayload, FixedPacing> {
        Session::with_parts(Endpoint::collector(), FixedPayload(msg), FixedPacing(PACE))
    }

    fn connected_session() -> Session<FixedPayload, FixedPacing> {
        let mut s = session_with(status());
        s.start();
        s.on_connected();
        s
    }

    fn frame(msg: &Message) -> Vec<u8> {
        encode_frame(msg).unwrap()
    }

    fn sends(actions: &[Action]) -> Vec<Message> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::Send(bytes) => Some(decode_frame(bytes).unwrap().0),
                _ => None,
            })
            .collect()
    }

    fn scheduled_emit(actions: &[Action]) -> Option<(EmitToken, Duration)> {
        actions.iter().rev().find_map(|a| match a {
            Action::ScheduleEmit { token, delay } => Some((*token, *delay)),
            _ => None,
        })
    }

    #[test]
    fn failed_connect_then_retry_succeeds() {
        let mut s = session_with(status());
        assert_eq!(s.connection_state(), ConnectionState::Disconnected);

        let actions = s.start();
        assert_eq!(actions, vec![Action::Connect(Endpoint::collector())]);
        assert_eq!(s.connection_state(), ConnectionState::Connecting);

        let actions = s.on_transport_error("connection refused");
        assert_eq!(
            actions,
            vec![Action::Close, Action::ScheduleReconnect(RECONNECT_DELAY)]
        );
        assert_eq!(s.connection_state(), ConnectionState::Disconnected);
        assert!(s.reconnect_armed());

        // A second error while the timer runs must not restart it.
        assert!(s.on_transport_error("connection refused").is_empty());

        let actions = s.on_reconnect_timer();
        assert_eq!(actions, vec![Action::Connect(Endpoint::collector())]);
        assert_eq!(s.connection_state(), ConnectionState::Connecting);

        let actions = s.on_connected();
        assert_eq!(actions, vec![Action::CancelReconnect]);
        assert_eq!(s.connection_state(), ConnectionState::Connected);
        assert!(!s.reconnect_armed());
        assert_eq!(s.counters().connect_attempts, 2);
    }

    #[test]
    fn connect_only_from_disconnected() {
        let mut s = session_with(status());
        assert_eq!(s.start().len(), 1);
        assert!(s.start().is_empty());
        s.on_connected();
        assert!(s.on_reconnect_timer().is_empty());
        assert!(s.on_connected().is_empty());
        assert_eq!(s.connection_state(), ConnectionState::Connected);
    }

    #[test]
    fn command_start_emits_once_immediately() {
        let mut s = connected_session();
        let actions = s.on_bytes_received(&frame(&Message::CommandStart));
        assert_eq!(s.streaming_state(), StreamingState::Streaming);
        assert_eq!(sends(&actions), vec![status()]);
        let (_, delay) = scheduled_emit(&actions).unwrap();
        assert_eq!(delay, PACE);
        assert_eq!(s.pending_write_bytes(), frame(&status()).len());
    }

    #[test]
    fn duplicate_start_in_one_read_sends_once() {
        let mut s = connected_session();
        let mut bytes = frame(&Message::CommandStart);
        bytes.extend(frame(&Message::CommandStart));
        let actions = s.on_bytes_received(&bytes);
        assert_eq!(sends(&actions).len(), 1);
        assert_eq!(s.counters().frames_received, 2);
    }

    #[test]
    fn emit_timer_sends_one_payload_and_reschedules_within_pacing() {
        let mut s = Session::with_parts(
            Endpoint::collector(),
            FixedPayload(status()),
            RandomPacing::with_rng(StdRng::seed_from_u64(3)),
        );
        s.start();
        s.on_connected();
        let actions = s.on_bytes_received(&frame(&Message::CommandStart));
        let (mut token, _) = scheduled_emit(&actions).unwrap();
        for _ in 0..50 {
            s.on_bytes_flushed(usize::MAX);
            let actions = s.on_emit_timer(token);
            assert_eq!(sends(&actions).len(), 1);
            let (next, delay) = scheduled_emit(&actions).unwrap();
            assert!(delay >= PACING_MIN && delay <= PACING_MAX);
            token = next;
        }
    }

    #[test]
    fn backlog_over_threshold_defers_then_resumes() {
        let big = Message::Log {
            severity: Severity::Error,
            message: "x".repeat(CONGESTION_THRESHOLD + 1),
        };
        let mut s = session_with(big.clone());
        s.start();
        s.on_connected();

        let actions = s.on_bytes_received(&frame(&Message::CommandStart));
        assert_eq!(sends(&actions), vec![big]);
        assert!(s.pending_write_bytes() > CONGESTION_THRESHOLD);
        let (token, _) = scheduled_emit(&actions).unwrap();

        let actions = s.on_emit_timer(token);
        assert!(sends(&actions).is_empty());
        let (token, delay) = scheduled_emit(&actions).unwrap();
        assert_eq!(actions.len(), 1);
        assert_eq!(delay, Duration::from_millis(100));
        assert_eq!(s.counters().deferrals, 1);

        s.on_bytes_flushed(s.pending_write_bytes());
        let actions = s.on_emit_timer(token);
        assert_eq!(sends(&actions).len(), 1);
        assert_eq!(scheduled_emit(&actions).unwrap().1, PACE);
    }

    #[test]
    fn stop_cancels_pending_emit() {
        let mut s = connected_session();
        let actions = s.on_bytes_received(&frame(&Message::CommandStart));
        let (token, _) = scheduled_emit(&actions).unwrap();

        let actions = s.on_bytes_received(&frame(&Message::CommandStop));
        assert_eq!(actions, vec![Action::CancelEmit]);
        assert_eq!(s.streaming_state(), StreamingState::Idle);
        assert!(s.on_emit_timer(token).is_empty());

        // Stop while idle is a no-op.
        assert!(s.on_bytes_received(&frame(&Message::CommandStop)).is_empty());
    }

    #[test]
    fn restart_does_not_revive_old_cadence() {
        let mut s = connected_session();
        let first = s.on_bytes_received(&frame(&Message::CommandStart));
        let (old, _) = scheduled_emit(&first).unwrap();
        s.on_bytes_received(&frame(&Message::CommandStop));
        let second = s.on_bytes_received(&frame(&Message::CommandStart));
        let (new, _) = scheduled_emit(&second).unwrap();

        assert!(s.on_emit_timer(old).is_empty());
        assert_eq!(sends(&s.on_emit_timer(new)).len(), 1);
    }

    #[test]
    fn disconnect_resets_streaming_and_buffers() {
        let mut s = connected_session();
        let actions = s.on_bytes_received(&frame(&Message::CommandStart));
        let (token, _) = scheduled_emit(&actions).unwrap();
        let partial = frame(&Message::Handshake);
        s.on_bytes_received(&partial[..5]);
        assert_eq!(s.inbound_len(), 5);
        assert!(s.pending_write_bytes() > 0);

        let actions = s.on_peer_closed();
        assert_eq!(
            actions,
            vec![
                Action::Close,
                Action::CancelEmit,
                Action::ScheduleReconnect(RECONNECT_DELAY)
            ]
        );
        assert_eq!(s.streaming_state(), StreamingState::Idle);
        assert_eq!(s.connection_state(), ConnectionState::Disconnected);
        assert_eq!(s.inbound_len(), 0);
        assert_eq!(s.pending_write_bytes(), 0);
        assert!(s.on_emit_timer(token).is_empty());
    }

    #[test]
    fn no_partial_frame_spans_reconnect() {
        let mut s = connected_session();
        let start = frame(&Message::CommandStart);
        s.on_bytes_received(&start[..3]);
        s.on_transport_error("connection reset");
        s.on_reconnect_timer();
        s.on_connected();
        assert_eq!(s.inbound_len(), 0);
        // The tail alone is garbage on the new connection; it must never start streaming.
        let actions = s.on_bytes_received(&start[3..]);
        assert!(sends(&actions).is_empty());
        assert_eq!(s.streaming_state(), StreamingState::Idle);
    }

    #[test]
    fn oversized_frame_drops_connection() {
        let mut s = connected_session();
        let mut bytes = frame(&Message::CommandStart);
        bytes.extend_from_slice(&(MAX_FRAME_LEN + 1).to_be_bytes());
        bytes.extend_from_slice(b"{\"type\":\"handshake\"}");

        let actions = s.on_bytes_received(&bytes);
        assert_eq!(sends(&actions).len(), 1);
        assert!(actions.contains(&Action::Close));
        assert!(actions.contains(&Action::ScheduleReconnect(RECONNECT_DELAY)));
        assert_eq!(s.connection_state(), ConnectionState::Disconnected);
        assert_eq!(s.streaming_state(), StreamingState::Idle);
        assert_eq!(s.inbound_len(), 0);
    }

    #[test]
    fn malformed_frame_does_not_affect_next() {
        let mut s = connected_session();
        let mut bytes = 9u32.to_be_bytes().to_vec();
        bytes.extend_from_slice(b"{\"type\":1");
        bytes.extend(frame(&Message::CommandStart));

        let actions = s.on_bytes_received(&bytes);
        assert_eq!(s.streaming_state(), StreamingState::Streaming);
        assert_eq!(sends(&actions).len(), 1);
        assert_eq!(s.counters().frames_discarded, 1);
        assert_eq!(s.connection_state(), ConnectionState::Connected);
    }

    #[test]
    fn handshake_and_unknown_types_change_nothing() {
        let mut s = connected_session();
        let mut bytes = frame(&Message::Handshake);
        let unknown = br#"{"type":"reboot"}"#;
        bytes.extend_from_slice(&(unknown.len() as u32).to_be_bytes());
        bytes.extend_from_slice(unknown);
        assert!(s.on_bytes_received(&bytes).is_empty());
        assert_eq!(s.streaming_state(), StreamingState::Idle);
        assert_eq!(s.counters().frames_received, 2);
    }

    #[test]
    fn bytes_ignored_unless_connected() {
        let mut s = session_with(status());
        s.start();
        assert!(s.on_bytes_received(&frame(&Message::CommandStart)).is_empty());
        assert_eq!(s.inbound_len(), 0);
        assert_eq!(s.streaming_state(), StreamingState::Idle);
    }
}
