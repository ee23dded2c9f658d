//! The `agora` binary: the demo catalogue served from `interface.json`.
//!
//! Configuration comes from `agora.toml` (optional), `.env` outside
//! production, `AGORA__SECTION__KEY` overrides, and `PORT` / `DB_URI`.

use std::sync::Arc;

use agora::config::{ConfigLoader, DEFAULT_ENV_PREFIX};
use agora::App;
use anyhow::Context;

mod demo;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ConfigLoader::new()
        .with_optional_file("agora.toml")?
        .with_dotenv()?
        .with_env_prefix(DEFAULT_ENV_PREFIX)
        .load()
        .context("loading configuration")?;

    agora::telemetry::init_telemetry(&config.telemetry).context("initializing logging")?;

    let service = config.telemetry.service_name.clone();
    App::new(config)
        .handlers(demo::handlers(Arc::new(demo::Catalogue::default())))
        .local("service", service)
        .run()
        .await?;

    tracing::info!("shut down cleanly");
    Ok(())
}
