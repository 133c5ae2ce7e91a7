// Telemu agent: one emulated device streaming synthetic telemetry to the local collector.

mod config;
mod transport;

use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() -> anyhow::Result<()> {
    for arg in std::env::args().skip(1) {
        if arg == "--version" || arg == "-V" {
            println!("telemu-agent {}", VERSION);
            return Ok(());
        }
    }

    let cfg = config::load();
    init_logging(&cfg);
    tracing::info!(version = VERSION, endpoint = %telemu_core::Endpoint::collector(), "starting");

    // Everything runs as callbacks on one thread.
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    rt.block_on(async {
        let session = telemu_core::Session::new();
        transport::run(session, async {
            if let Err(e) = shutdown_signal().await {
                tracing::error!(error = %e, "signal handler failed, shutting down");
            }
        })
        .await;
    });
    Ok(())
}

/// `RUST_LOG` wins over the configured filter; an invalid directive falls back to "info".
fn init_logging(cfg: &config::Config) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cfg.log_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(cfg.ansi)
        .with_target(false)
        .init();
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    tracing::info!("shutdown requested");
    Ok(())
}
