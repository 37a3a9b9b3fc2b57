//! A tunneling proxy gateway exposing two protocol cores behind a single
//! HTTP listener:
//!
//! - VLESS-over-WebSocket: WebSocket upgrade -> VLESS header parse -> TCP
//!   dial -> bidirectional bridge, with DNS queries redirected to DoH.
//! - H2 TCP Tunnel: a POST (v1), or a POST+GET pair keyed by a tunnel id
//!   (v2), dials a target and streams bytes over the HTTP bodies.
//!
//! A small router/load-balancer collaborator forwards any other traffic to
//! a configured set of backends.

pub mod common;
pub mod config;
pub mod dns;
pub mod h2tunnel;
pub mod hub;
pub mod router;
pub mod vless;

pub use common::error::{Error, Result};
pub use config::GatewayConfig;

use hub::AppState;
use std::net::SocketAddr;
use tracing::info;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Owns the bound listener and shared state; `run` drives the axum server
/// until a shutdown signal arrives.
pub struct Gateway {
    state: AppState,
    addr: SocketAddr,
}

impl Gateway {
    /// Builds a gateway from validated configuration: resolves the bind
    /// address, constructs the DNS resolver, and assembles the shared
    /// `AppState` the axum router is built from.
    pub async fn new(config: GatewayConfig) -> Result<Self> {
        info!("initializing gateway v{}", VERSION);

        let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
        let resolver = dns::Resolver::new()?;
        let state = AppState::new(config, resolver);

        Ok(Gateway { state, addr })
    }

    /// Serves the axum router on the configured port until the process
    /// receives a shutdown signal (Ctrl-C).
    pub async fn run(self) -> Result<()> {
        let app = hub::create_router(self.state);
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        info!("gateway listening on {}", self.addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("gateway stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("received shutdown signal");
}
