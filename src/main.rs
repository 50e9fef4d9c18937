use clap::Parser;
use tracing::info;

use cacheproxy::{CachingProxy, OriginClient, Request, Server, cli::Cli, logging::configure_global_tracing};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = Cli::parse().into_config()?;
    configure_global_tracing(&config.log)?;

    let origin = OriginClient::new(config.origin_authority()?);
    let proxy = CachingProxy::new(origin);

    // Start cold regardless of what the store held before.
    proxy.flush_cache();

    let server = Server::bind(&config.listen).await?;
    info!(
        listen = %server.local_addr(),
        origin = %proxy.origin().authority(),
        version = env!("CARGO_PKG_VERSION"),
        "cache proxy started"
    );

    let handler = move |request: Request| {
        let proxy = proxy.clone();
        async move { proxy.handle(request).await }
    };

    tokio::select! {
        result = server.run(handler) => result?,
        _ = tokio::signal::ctrl_c() => info!("shutdown signal received"),
    }

    Ok(())
}
