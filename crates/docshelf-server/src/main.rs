//! Docshelf server - HTTP boundary around the docset pipeline

mod routes;

use clap::Parser;
use docshelf::StoreConfig;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Docshelf - acquire and serve documentation bundles
#[derive(Parser, Debug)]
#[command(name = "docshelf")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory holding one feed XML per library
    #[arg(long, default_value = "feeds")]
    feeds_dir: PathBuf,

    /// Directory docset bundles are extracted into
    #[arg(long, default_value = "docsets")]
    bundles_dir: PathBuf,

    /// Holding directory for in-flight archive downloads
    #[arg(long, default_value = "archives")]
    archives_dir: PathBuf,

    /// Port to listen on
    #[arg(long, short, default_value_t = 3000)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = StoreConfig::new(cli.feeds_dir, cli.bundles_dir, cli.archives_dir);
    let client = reqwest::Client::builder()
        .user_agent(docshelf::DEFAULT_USER_AGENT)
        .build()?;

    let state = routes::AppState::new(&config, client);
    let app = routes::router(state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", cli.port)).await?;
    tracing::info!(port = cli.port, feeds = %config.feeds_dir.display(), "docshelf listening");
    axum::serve(listener, app).await?;
    Ok(())
}
