use std::{net::SocketAddr, str::FromStr};

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::info;

use crate::{error::HostError, AppState};

pub mod api;
pub mod auth;

/// Starts the backup host server; returns when the listener shuts down.
pub async fn serve(state: AppState, address: &str) -> anyhow::Result<()> {
    let addr = SocketAddr::from_str(address)
        .map_err(|_| HostError::InvalidAddress(address.to_string()))?;
    let listener = TcpListener::bind(addr).await?;

    info!("Listening on: {}", listener.local_addr()?);

    let router = api::create_router().with_state(state);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server couldn't serve")?;

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
