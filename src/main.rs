use anyhow::Context;
use clap::Parser;

use sms_email_bridge::cli::{self, Cli};
use sms_email_bridge::config::BridgeConfig;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    // Quiet commands log warnings only
    let default_level = if cli.command.quiet() { "warn" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = BridgeConfig::from_env().context("Failed to load configuration from environment")?;

    let mut stdout = std::io::stdout().lock();
    cli::run(cli.command, &config, &mut stdout)
        .await
        .context("Failed to write output")?;
    Ok(())
}
