//! chat-relay server binary.

use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};

use chat_relay::config::{api_key_from_env, Cli, Config, API_KEY_ENV};
use chat_relay::server::relay_api::{build_router, AppState};
use chat_relay::upstream::client::UpstreamClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments.
    let cli = Cli::parse();

    // Initialize tracing/logging.
    let filter = if cli.verbose {
        "chat_relay=debug,tower_http=debug"
    } else {
        "chat_relay=info,tower_http=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with_target(true)
        .init();

    info!("chat-relay v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration.
    let config = Config::load(&cli.config)?;
    let config = Arc::new(config);

    info!(
        endpoint = %config.upstream.endpoint,
        default_model = %config.upstream.default_model,
        "Configuration loaded"
    );

    // Load the upstream credential once; requests are rejected while it is absent.
    let api_key = api_key_from_env();
    if api_key.is_none() {
        warn!("{API_KEY_ENV} is not set; all requests will be rejected with 401");
    }

    // Build application state.
    let state = Arc::new(AppState {
        upstream: UpstreamClient::new(config.upstream.clone()),
        config: config.clone(),
        api_key,
    });

    // Build the HTTP router.
    let app = build_router(state);

    // Start the server.
    let listen_addr = cli.listen;
    info!(addr = %listen_addr, "Starting server");

    let listener = TcpListener::bind(&listen_addr).await?;
    info!("Listening on {listen_addr}");

    axum::serve(listener, app).await?;

    Ok(())
}
