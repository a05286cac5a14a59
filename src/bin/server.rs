//! Freelance Auto-Bidder Control Server
//!
//! HTTP service over the bid store, message templates and bidding policy,
//! with start/stop control of the bidder process.

use anyhow::Result;
use freelance_bidder::api::{create_app, AppState};
use freelance_bidder::Config;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Override with RUST_LOG, e.g. RUST_LOG=debug,tower_http=debug
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=warn,sqlx=warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    // Load configuration
    let config = Config::from_env()?;
    let port = config.port;

    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║       FREELANCE AUTO-BIDDER - CONTROL SERVER                 ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  Database: {:<49} ║", config.database_path);
    println!("║  Bid Sync: {:<49} ║", if config.freelancer_oauth_token.is_some() && config.bidder_id.is_some() { "ENABLED" } else { "DISABLED" });
    println!("║  Telegram: {:<49} ║", if config.telegram_enabled() { "ENABLED" } else { "DISABLED" });
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();

    info!("Initializing application state...");
    let state = AppState::new(config).await?;
    let app = create_app(state);

    // Bind to address
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;

    info!("Server listening on http://{}", addr);
    println!();
    println!("  API:       http://localhost:{}/api", port);
    println!("  Health:    http://localhost:{}/health", port);
    println!();

    axum::serve(listener, app).await?;

    Ok(())
}
