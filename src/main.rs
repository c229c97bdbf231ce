use anyhow::{Context, Result};
use colloquy::AppConfig;

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load().context("Failed to load configuration")?;
    colloquy::init_logging(&config);

    colloquy::run(config).await.context("Chat error")?;

    Ok(())
}
