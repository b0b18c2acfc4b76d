//! Seed the metadata store with an admin user and optional demo cameras.
//!
//! Exit codes: 0 on success, 1 on any failure.

use anyhow::Result;
use clap::Parser;
use log::info;
use std::sync::Arc;

use argus::config::Config;
use argus::db::models::{Camera, UserRole};
use argus::db::postgres::PgStore;
use argus::db::MetadataStore;
use argus::security::AuthService;

#[derive(Parser, Debug)]
#[command(about = "Seed the argus metadata store")]
struct Args {
    /// Admin username
    #[arg(long, default_value = "admin")]
    username: String,

    /// Admin email
    #[arg(long, default_value = "admin@localhost")]
    email: String,

    /// Admin password
    #[arg(long)]
    password: String,

    /// Number of demo cameras to create
    #[arg(long, default_value_t = 0)]
    cameras: u32,
}

async fn run(args: Args) -> Result<()> {
    let config = Config::default();
    let store: Arc<dyn MetadataStore> = Arc::new(PgStore::connect(&config.database).await?);

    let auth = AuthService::new(store.clone(), &config.security);
    let user = auth
        .register(&args.username, &args.email, &args.password, UserRole::Admin)
        .await?;
    info!("Created admin user {} ({})", user.username, user.id);

    for i in 0..args.cameras {
        let camera = Camera::new(
            &format!("Demo camera {}", i + 1),
            &format!("rtsp://127.0.0.1:554/demo/{}", i + 1),
        );
        let created = store.put_camera(&camera).await?;
        info!("Created camera {} ({})", created.name, created.id);
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let args = Args::parse();

    if let Err(e) = run(args).await {
        eprintln!("Seed failed: {}", e);
        std::process::exit(1);
    }
}
