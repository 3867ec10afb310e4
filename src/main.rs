use anyhow::Context;
use rustyrag::session::{PipelineServices, SessionRegistry};
use rustyrag::{api, config, logging};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = config::init_config().context("Invalid configuration")?;
    logging::init_tracing();

    let services =
        PipelineServices::from_config(config).context("Failed to initialise model providers")?;
    let sweep_every = services
        .settings
        .session_idle_timeout
        .min(Duration::from_secs(60));
    let registry = Arc::new(SessionRegistry::new(services));
    let _sweeper = registry.spawn_sweeper(sweep_every);
    let app = api::create_router(registry, config.max_upload_bytes);

    let (listener, port) = bind_listener().await.context("Failed to bind listener")?;
    tracing::info!("Listening on http://0.0.0.0:{}", port);
    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}

async fn bind_listener() -> Result<(TcpListener, u16), std::io::Error> {
    use std::net::Ipv4Addr;

    let config = config::get_config();
    if let Some(port) = config.server_port {
        return TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))
            .await
            .map(|listener| (listener, port));
    }

    const PORT_RANGE: std::ops::RangeInclusive<u16> = 4200..=4299;
    for port in PORT_RANGE {
        match TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await {
            Ok(listener) => {
                tracing::debug!(port, "Bound server port");
                return Ok((listener, port));
            }
            Err(err) if err.kind() == std::io::ErrorKind::AddrInUse => {
                tracing::debug!(port, "Port already in use; trying next");
                continue;
            }
            Err(err) => return Err(err),
        }
    }

    Err(std::io::Error::new(
        std::io::ErrorKind::AddrNotAvailable,
        "No available port found in range 4200-4299",
    ))
}
