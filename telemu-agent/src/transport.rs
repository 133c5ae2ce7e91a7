//! Host loop: drives a `Session` over one TCP connection and its two timers, all on the
//! current task. Socket readiness and timer expiry become session events; the returned
//! actions are applied before the next wait.

use std::future::{pending, Future};
use std::io;
use std::pin::Pin;

use telemu_core::{Action, EmitToken, Endpoint, Pacing, PayloadGenerator, Session, SessionCounters};
use tokio::net::TcpStream;
use tokio::time::{sleep_until, Instant};

const READ_CHUNK: usize = 8 * 1024;

type ConnectFuture = Pin<Box<dyn Future<Output = io::Result<TcpStream>>>>;

/// Socket, write queue and timers owned by the host side.
#[derive(Default)]
struct Host {
    connecting: Option<ConnectFuture>,
    stream: Option<TcpStream>,
    /// Frames queued by the session, not yet accepted by the socket.
    outbound: Vec<u8>,
    emit_at: Option<(Instant, EmitToken)>,
    reconnect_at: Option<Instant>,
}

impl Host {
    fn apply(&mut self, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::Connect(endpoint) => self.connecting = Some(Box::pin(connect(endpoint))),
                Action::Send(frame) => self.outbound.extend_from_slice(&frame),
                Action::ScheduleEmit { token, delay } => {
                    self.emit_at = Some((Instant::now() + delay, token));
                }
                Action::CancelEmit => self.emit_at = None,
                Action::ScheduleReconnect(delay) => self.reconnect_at = Some(Instant::now() + delay),
                Action::CancelReconnect => self.reconnect_at = None,
                Action::Close => {
                    self.connecting = None;
                    self.stream = None;
                    self.outbound.clear();
                }
            }
        }
    }
}

enum Event {
    Shutdown,
    Connected(io::Result<TcpStream>),
    Readable(io::Result<()>),
    Writable(io::Result<()>),
    EmitDue(EmitToken),
    ReconnectDue,
}

/// Run `session` until `shutdown` completes. Returns the session's counters.
pub async fn run<G, P>(mut session: Session<G, P>, shutdown: impl Future<Output = ()>) -> SessionCounters
where
    G: PayloadGenerator,
    P: Pacing,
{
    tokio::pin!(shutdown);
    let mut host = Host::default();
    let mut read_buf = vec![0u8; READ_CHUNK];
    host.apply(session.start());

    loop {
        let event = tokio::select! {
            _ = &mut shutdown => Event::Shutdown,
            res = connect_done(&mut host.connecting) => Event::Connected(res),
            res = readable(host.stream.as_ref()) => Event::Readable(res),
            res = writable(host.stream.as_ref()), if !host.outbound.is_empty() => Event::Writable(res),
            token = deadline(host.emit_at) => Event::EmitDue(token),
            _ = deadline(host.reconnect_at.map(|at| (at, ()))) => Event::ReconnectDue,
        };

        let actions = match event {
            Event::Shutdown => break,
            Event::Connected(res) => {
                host.connecting = None;
                match res {
                    Ok(stream) => {
                        host.stream = Some(stream);
                        session.on_connected()
                    }
                    Err(e) => session.on_transport_error(&e.to_string()),
                }
            }
            Event::Readable(Ok(())) => {
                let Some(stream) = host.stream.as_ref() else {
                    continue;
                };
                match stream.try_read(&mut read_buf) {
                    Ok(0) => session.on_peer_closed(),
                    Ok(n) => session.on_bytes_received(&read_buf[..n]),
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                    Err(e) => session.on_transport_error(&e.to_string()),
                }
            }
            Event::Writable(Ok(())) => {
                let Some(stream) = host.stream.as_ref() else {
                    continue;
                };
                match stream.try_write(&host.outbound) {
                    Ok(n) => {
                        host.outbound.drain(..n);
                        session.on_bytes_flushed(n);
                        continue;
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                    Err(e) => session.on_transport_error(&e.to_string()),
                }
            }
            Event::Readable(Err(e)) | Event::Writable(Err(e)) => {
                session.on_transport_error(&e.to_string())
            }
            Event::EmitDue(token) => {
                host.emit_at = None;
                session.on_emit_timer(token)
            }
            Event::ReconnectDue => {
                host.reconnect_at = None;
                session.on_reconnect_timer()
            }
        };
        host.apply(actions);
    }

    let counters = *session.counters();
    tracing::info!(
        attempts = counters.connect_attempts,
        sent = counters.frames_sent,
        bytes = counters.bytes_sent,
        received = counters.frames_received,
        "session finished"
    );
    counters
}

async fn connect(endpoint: Endpoint) -> io::Result<TcpStream> {
    let stream = TcpStream::connect((endpoint.host.as_str(), endpoint.port)).await?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

async fn connect_done(connecting: &mut Option<ConnectFuture>) -> io::Result<TcpStream> {
    match connecting.as_mut() {
        Some(fut) => fut.await,
        None => pending().await,
    }
}

async fn readable(stream: Option<&TcpStream>) -> io::Result<()> {
    match stream {
        Some(s) => s.readable().await,
        None => pending().await,
    }
}

async fn writable(stream: Option<&TcpStream>) -> io::Result<()> {
    match stream {
        Some(s) => s.writable().await,
        None => pending().await,
    }
}

async fn deadline<T>(at: Option<(Instant, T)>) -> T {
    match at {
        Some((when, value)) => {
            sleep_until(when).await;
            value
        }
        None => pending().await,
    }
}
