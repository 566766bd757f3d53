//! hg5k
//!
//! Provision and drive Hadoop clusters on Grid'5000.

use clap::Parser;
use tracing::error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use hg5k_cli::commands::hadoop::HadoopCli;

#[tokio::main]
async fn main() {
    let cli = HadoopCli::parse();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.actions.log_level())),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    if let Err(e) = cli.run().await {
        error!("{}", e);
        std::process::exit(e.exit_code());
    }
}
