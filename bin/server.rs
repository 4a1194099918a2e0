// Realty Portal - Web Server

use anyhow::Result;
use realty_portal::{server, Config};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("🌐 Realty Portal - Web Server");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let config = Config::load()?;
    info!(port = config.port, db = %config.db_path.display(), "configuration loaded");

    println!("\n🚀 Server starting on http://localhost:{}", config.port);
    println!("   API: http://localhost:{}/api/health", config.port);
    println!("\n   Press Ctrl+C to stop\n");

    server::serve(config).await
}
