use anyhow::Result;
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;

use argus::api;
use argus::app::App;
use argus::config;
use argus::db::memory::MemoryStore;
use argus::db::postgres::PgStore;
use argus::db::MetadataStore;
use argus::media::FfmpegDriver;

async fn run_app() -> Result<()> {
    env_logger::init();
    info!("Starting argus video management core");

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = config::load_config(config_path.as_deref())?;
    info!("Configuration loaded");

    let store: Arc<dyn MetadataStore> = if config.database.url == "memory" {
        warn!("Using the in-memory metadata store; nothing survives a restart");
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(PgStore::connect(&config.database).await?)
    };

    let driver = Arc::new(FfmpegDriver::new(config.media.clone()));
    if let Err(e) = driver.check_binary().await {
        // Cameras will park in Failed until the binary is available; the
        // control surface stays up either way
        error!("Transcoder binary check failed: {}", e);
    }

    let app = App::new(config.clone(), store, driver)?;
    app.bootstrap().await?;

    let addr = format!("{}:{}", config.api.address, config.api.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Control surface listening on {}", addr);

    let router = api::router(app.clone());
    tokio::select! {
        result = axum::serve(listener, router) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    app.shutdown().await;
    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(e) = run_app().await {
        eprintln!("Application error: {}", e);
        std::process::exit(1);
    }
}
