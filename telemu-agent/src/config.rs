//! Load config from file and environment.
//!
//! Only process-level settings live here. The collector endpoint and the engine's
//! timing constants are fixed in `telemu-core`.

use serde::Deserialize;
use std::path::PathBuf;

/// Agent configuration. File: ~/.config/telemu/config.toml or /etc/telemu/config.toml.
/// Env overrides: TELEMU_LOG, TELEMU_ANSI.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// `tracing` filter directive (default "info"). `RUST_LOG` still wins when set.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    /// Colored log output (default true).
    #[serde(default = "default_ansi")]
    pub ansi: bool,
}

fn default_log_filter() -> String {
    "info".to_string()
}
fn default_ansi() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_filter: default_log_filter(),
            ansi: default_ansi(),
        }
    }
}

/// Load config: merge default, then config file (if present), then env vars.
pub fn load() -> Config {
    let c = load_file().unwrap_or_default();
    apply_env(c, |key| std::env::var(key).ok())
}

fn apply_env(mut c: Config, var: impl Fn(&str) -> Option<String>) -> Config {
    if let Some(s) = var("TELEMU_LOG") {
        if !s.trim().is_empty() {
            c.log_filter = s;
        }
    }
    if let Some(s) = var("TELEMU_ANSI") {
        match s.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => c.ansi = true,
            "0" | "false" | "no" | "off" => c.ansi = false,
            _ => {}
        }
    }
    c
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/telemu/config.toml"));
    }
    out.push(PathBuf::from("/etc/telemu/config.toml"));
    out
}

/// First existing file wins, even if it fails to parse (then defaults apply).
fn load_file() -> Option<Config> {
    let path = config_paths().into_iter().find(|p| p.exists())?;
    let s = std::fs::read_to_string(&path).ok()?;
    parse(&s).ok()
}

fn parse(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str(s)
}
