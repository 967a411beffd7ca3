//! NodePool Controller
//!
//! Emulates an O-RAN hardware manager. Watches `NodePool` requests, allocates
//! fake bare-metal nodes from the `nodelist` inventory ConfigMap, and
//! publishes each allocated node as a `Node` object with a BMC credential
//! Secret. Deleting a NodePool returns its nodes to the inventory.

mod backoff;
mod config;
mod controller;
mod error;
mod lifecycle;
mod pool_client;
mod reconciler;
#[cfg(test)]
mod test_utils;
mod watcher;

use crate::config::ControllerConfig;
use crate::controller::Controller;
use crate::error::ControllerError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // kube's rustls-tls needs a process-wide crypto provider
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        warn!("A rustls crypto provider was already installed");
    }

    info!("Starting NodePool Controller");

    let config = ControllerConfig::from_env()?;

    info!("Configuration:");
    info!("  Namespace: {}", config.namespace);
    info!("  Requeue interval: {:?}", config.requeue_interval);
    info!("  Allocation delay: {:?}", config.allocation_delay);
    info!("  Conflict retries: {}", config.conflict_retries);
    info!("  Concurrency: {}", config.concurrency);

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
