//! streetmeat: command-line client for the Street Meat community feed.
//!
//! Environment variables:
//!   STREETMEAT_API_URL - REST base URL (default: http://localhost:8000/api)
//!   STREETMEAT_WS_URL  - WebSocket base URL (default: ws://localhost:8000)
//!   STREETMEAT_TOKEN   - Bearer token for the signed-in user
//!   RUST_LOG           - Log filter (default: streetmeat=info)

use clap::Parser;
use streetmeat::cli::{Args, Session};
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() {
    // Load environment variables from .env if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("streetmeat=info"));
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(args).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = args.load_config()?;
    let session = Session::open(config, args.json).await?;
    session.run(&args.command, args.location.as_deref()).await
}
