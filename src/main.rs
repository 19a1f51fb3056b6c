use tracing::info;

use oxbow::irc::server::{self, Config};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "0.0.0.0:6667".to_owned());
    let config = Config::from_env();

    info!("{} starting as {}", config.version, config.name);

    server::run(&addr, config).await
}
