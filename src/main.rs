use clap::Parser;
use textboard::config::{Cli, Config};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let config = match Config::resolve(cli) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "configuration error");
            std::process::exit(1);
        }
    };

    if let Err(e) = textboard::run(config).await {
        tracing::error!(error = %e, "fatal startup error");
        std::process::exit(1);
    }
}
