mod affix;
mod api;
mod clock;
mod collector;
mod config;
mod context;
mod currency;
mod db;
mod error;
mod trade;
mod types;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::api::router;
use crate::config::Config;
use crate::context::AppContext;
use crate::error::Result;

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    if cfg.templates.is_empty() {
        info!("COLLECTOR_TEMPLATES not set; cycles will only run lifecycle reconciliation. Example: COLLECTOR_TEMPLATES=Hubris Circlet,Vaal Regalia");
    }
    info!(
        league = %cfg.league,
        game = %cfg.game,
        "Collector for {} ({}) every {}m over {} templates",
        cfg.league,
        cfg.game,
        cfg.interval_minutes,
        cfg.templates.len(),
    );

    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let mut ctx = AppContext::init(cfg).await?;
    ctx.start().await;

    // HTTP API server
    let app = router(ctx.api_state());
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    ctx.shutdown().await;
    served?;
    Ok(())
}

/// Resolves on ctrl-c or, on unix, SIGTERM (what docker and systemd send).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Shutdown signal received (ctrl-c)"),
        _ = terminate => info!("Shutdown signal received (SIGTERM)"),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn sigterm_triggers_shutdown() {
        let waiter = tokio::spawn(shutdown_signal());
        // Let the handler register before raising the signal.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        let status = std::process::Command::new("kill")
            .args(["-TERM", &std::process::id().to_string()])
            .status()
            .unwrap();
        assert!(status.success());

        tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .expect("shutdown_signal did not resolve on SIGTERM")
            .unwrap();
    }
}
