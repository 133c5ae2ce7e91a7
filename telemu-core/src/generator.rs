//! Synthetic payloads and send pacing. Both sit behind traits so tests can script them.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::protocol::{Message, Severity};
use crate::scheduler::{PACING_MAX, PACING_MIN};

/// Produces the next outbound telemetry message.
pub trait PayloadGenerator {
    fn generate(&mut self) -> Message;
}

/// Produces the delay until the next emit step.
pub trait Pacing {
    fn next_delay(&mut self) -> Duration;
}

const SHORT_LOG: &str = "Short log info";
const MEDIUM_LOG: &str = "Medium log info message with some details about system state...";
const LONG_LOG_UNIT: &str = "Long log error details...";
const LONG_LOG_REPEAT: usize = 10;

pub fn network_metrics<R: Rng + ?Sized>(rng: &mut R) -> Message {
    Message::NetworkMetrics {
        bandwidth: rng.gen::<f64>() * 1000.0,
        latency: rng.gen::<f64>() * 50.0,
        packet_loss: rng.gen::<f64>() * 0.05,
    }
}

pub fn device_status<R: Rng + ?Sized>(rng: &mut R) -> Message {
    Message::DeviceStatus {
        uptime: rng.gen_range(1000..50_000),
        cpu_usage: rng.gen_range(0..=100),
        memory_usage: rng.gen_range(10..90),
    }
}

/// Short INFO, medium WARNING or long ERROR entry, equally likely.
pub fn log_entry<R: Rng + ?Sized>(rng: &mut R) -> Message {
    let (severity, message) = match rng.gen_range(0..3) {
        0 => (Severity::Info, SHORT_LOG.to_string()),
        1 => (Severity::Warning, MEDIUM_LOG.to_string()),
        _ => (Severity::Error, LONG_LOG_UNIT.repeat(LONG_LOG_REPEAT)),
    };
    Message::Log { severity, message }
}

/// Picks one of the three payload kinds uniformly.
pub struct RandomPayloads<R = StdRng> {
    rng: R,
}

impl RandomPayloads<StdRng> {
    pub fn from_entropy() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }
}

impl<R: Rng> RandomPayloads<R> {
    pub fn with_rng(rng: R) -> Self {
        Self { rng }
    }
}

impl<R: Rng> PayloadGenerator for RandomPayloads<R> {
    fn generate(&mut self) -> Message {
        match self.rng.gen_range(0..3) {
            0 => network_metrics(&mut self.rng),
            1 => device_status(&mut self.rng),
            _ => log_entry(&mut self.rng),
        }
    }
}

/// Uniform whole-millisecond delay in `[PACING_MIN, PACING_MAX]`.
pub struct RandomPacing<R = StdRng> {
    rng: R,
}

impl RandomPacing<StdRng> {
    pub fn from_entropy() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }
}

impl<R: Rng> RandomPacing<R> {
    pub fn with_rng(rng: R) -> Self {
        Self { rng }
    }
}

impl<R: Rng> Pacing for RandomPacing<R> {
    fn next_delay(&mut self) -> Duration {
        let min = PACING_MIN.as_millis() as u64;
        let max = PACING_MAX.as_millis() as u64;
        Duration::from_millis(self.rng.gen_range(min..=max))
    }
}
