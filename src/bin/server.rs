//! REST server for the phone client.
//!
//! Environment variables:
//! - `HEALTHDW_PORT`: Port to listen on (default: 3000)
//! - `HEALTHDW_DB`: Database path (default: ~/.healthdw/healthdw.db)

use std::net::SocketAddr;

use healthdw::server::{router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let db = match std::env::var("HEALTHDW_DB") {
        Ok(path) => healthdw::Database::open_at(path).await?,
        Err(_) => healthdw::Database::open().await?,
    };

    let port: u16 = std::env::var("HEALTHDW_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(3000);

    let app = router(AppState { db });

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    log::info!("Listening on {addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
