//! Streaming pass-through between chat clients and the LLM service.

pub mod error;
pub mod routes;
pub mod state;
pub mod trace;

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::core::config::Config;
use crate::relay::state::RelayState;

/// Bind and run the relay until Ctrl-C or SIGTERM.
pub async fn serve(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let addr = config.bind_addr()?;
    let state = Arc::new(RelayState::from_config(config)?);
    let app = routes::build(Arc::clone(&state));

    let listener = TcpListener::bind(addr).await?;
    info!(%addr, upstream = %state.generate_url, "relay listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("relay stopped");
    Ok(())
}

/// Resolves when SIGINT (Ctrl-C) or SIGTERM is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install CTRL+C signal handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => warn!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received; draining connections");
}
