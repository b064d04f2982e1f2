//! virtusim-gateway binary: configuration, logging and the HTTP server.

use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use virtusim_gateway::cache::MemoryCache;
use virtusim_gateway::config::Config;
use virtusim_gateway::gateway::{self, BalanceHandler};
use virtusim_gateway::server::Server;
use virtusim_gateway::upstream::VirtusimClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // RUST_LOG wins; otherwise info for this crate only
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("virtusim_gateway=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Config::from_env().context("invalid configuration")?;
    info!(
        bind = %config.bind_addr,
        upstream = %config.upstream.base_url,
        timeout = ?config.upstream.timeout,
        cache = config.cache.is_some(),
        "configuration loaded"
    );

    let client = VirtusimClient::new(config.upstream.clone()).context("building upstream client")?;
    let mut handler = BalanceHandler::new(Arc::new(client), config.gateway.clone());
    if let Some(cache_config) = config.cache {
        handler = handler.with_cache(Arc::new(MemoryCache::new(cache_config)));
    }
    let router = Arc::new(gateway::router(Arc::new(handler)));

    let server = Server::bind(&config.bind_addr).await?;
    server
        .run_until(
            move |request| {
                let router = Arc::clone(&router);
                async move { router.route(request).await }
            },
            shutdown_signal(),
        )
        .await?;

    info!("gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
