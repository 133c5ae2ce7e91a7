//! Telemetry wire protocol: message types and the collector endpoint.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Collector host. Fixed; the emulator always targets a local collector.
pub const COLLECTOR_HOST: &str = "localhost";

/// Collector TCP port.
pub const COLLECTOR_PORT: u16 = 5555;

/// Where the session connects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    /// The fixed collector endpoint used in production.
    pub fn collector() -> Self {
        Self {
            host: COLLECTOR_HOST.to_string(),
            port: COLLECTOR_PORT,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Severity tag carried by `log` messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// All wire message types. Encoding is a JSON object tagged by `type`; framing is a
/// length prefix (see wire module).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// Collector acknowledges the connection. Carries nothing we act on.
    Handshake,
    /// Begin streaming telemetry.
    CommandStart,
    /// Stop streaming telemetry.
    CommandStop,
    NetworkMetrics {
        bandwidth: f64,
        latency: f64,
        packet_loss: f64,
    },
    DeviceStatus {
        uptime: u32,
        cpu_usage: u32,
        memory_usage: u32,
    },
    Log {
        severity: Severity,
        message: String,
    },
    /// Any `type` this build does not know. Decodes fine, acted on by nobody.
    #[serde(other)]
    Unknown,
}

impl Message {
    /// The `type` discriminator as it appears on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Handshake => "handshake",
            Message::CommandStart => "command_start",
            Message::CommandStop => "command_stop",
            Message::NetworkMetrics { .. } => "network_metrics",
            Message::DeviceStatus { .. } => "device_status",
            Message::Log { .. } => "log",
            Message::Unknown => "unknown",
        }
    }
}
