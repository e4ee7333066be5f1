use std::{net::SocketAddr, sync::Arc};

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use voicedesk::{devserver, DevBackend};

#[derive(Parser)]
#[command(name = "dev-backend")]
#[command(about = "In-memory backend for exercising the voicedesk console locally")]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:8000")]
    listen: SocketAddr,

    /// Start without the sample configuration, calls and agents
    #[arg(long)]
    empty: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "info,voicedesk=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let backend = if args.empty {
        DevBackend::empty()
    } else {
        DevBackend::seeded()
    };

    let listener = tokio::net::TcpListener::bind(args.listen).await?;
    devserver::serve(listener, Arc::new(backend)).await?;
    Ok(())
}
