//! API Server
//!
//! Router assembly, middleware stack, the background recovery loop and
//! graceful shutdown.

use super::{
    handlers::AppState,
    middleware::{create_cors_layer, request_context_middleware},
    routes::create_router,
};
use crate::factory::PayoutCore;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::{signal, task::JoinHandle};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{error, info, warn};

pub struct ApiServer {
    core: PayoutCore,
}

impl ApiServer {
    pub fn new(core: PayoutCore) -> Self {
        Self { core }
    }

    /// Serve until Ctrl+C or SIGTERM
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        let addr = self.get_socket_addr()?;
        let app = build_app(self.core.clone());

        // Settle anything left over from a previous run before taking traffic
        match self.core.run_recovery().await {
            Ok((created, report)) => info!(
                matches_created = created,
                credited = report.credited,
                missing_wallet = report.missing_wallet,
                "Startup recovery finished"
            ),
            Err(e) => warn!(error = %e, "Startup recovery failed"),
        }
        let recovery = spawn_recovery_loop(self.core.clone());

        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!(%addr, "PaperPayout API listening");
        self.log_server_info();

        let served = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await;

        if let Some(handle) = recovery {
            handle.abort();
        }
        served?;

        info!("API server stopped gracefully");
        Ok(())
    }

    fn get_socket_addr(&self) -> Result<SocketAddr, Box<dyn std::error::Error>> {
        let api = &self.core.config.api;
        Ok(SocketAddr::from((api.host.parse::<std::net::IpAddr>()?, api.port)))
    }

    fn log_server_info(&self) {
        let config = &self.core.config;
        info!(
            cors = ?config.api.cors_origins,
            timeout_secs = config.api.request_timeout_secs,
            max_players = config.matchmaking.max_players,
            fee_rate = %config.settlement.fee_rate,
            usd_per_sol = %config.settlement.settlement_currency_rate,
            "Server configuration"
        );
    }
}

/// The full application: routes plus middleware stack
pub fn build_app(core: PayoutCore) -> axum::Router {
    let timeout = core.config.api.request_timeout();
    let cors = create_cors_layer(&core.config.api.cors_origins);

    let state = Arc::new(AppState {
        core,
        version: env!("CARGO_PKG_VERSION").to_string(),
    });

    create_router(state)
        // Request context first so the id is set before any handler runs
        .layer(axum::middleware::from_fn(request_context_middleware))
        // CORS layer (before timeout to handle preflight)
        .layer(cors)
        .layer(TimeoutLayer::new(timeout))
        .layer(TraceLayer::new_for_http())
}

/// Periodic recovery passes; `None` when disabled by configuration
pub fn spawn_recovery_loop(core: PayoutCore) -> Option<JoinHandle<()>> {
    let secs = core.config.settlement.recovery_interval_secs;
    if secs == 0 {
        return None;
    }

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(secs));
        // The first tick completes immediately; startup already ran a pass
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match core.run_recovery().await {
                Ok((created, report)) if created > 0 || report.credited > 0 => info!(
                    matches_created = created,
                    credited = report.credited,
                    "Recovery pass repaired records"
                ),
                Ok(_) => {}
                Err(e) => error!(error = %e, "Recovery pass failed"),
            }
        }
    }))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }
}
