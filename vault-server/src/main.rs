//! Vault server binary.
//!
//! Configuration flows through the environment or a single JSON file
//! (`VAULT_CONFIG`); see `vault_core::config` for the recognized
//! variables. There is no command-line surface.

use vault_core::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load()?;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "vault_server=info,vault_core=info,vault_keystore=info".into());
    if config.log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let running = vault_server::start(config).await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");
    running.shutdown().await;
    Ok(())
}
