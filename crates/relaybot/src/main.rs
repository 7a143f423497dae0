use std::sync::Arc;

use relaybot_ai::AiBackend;

use relaybot_core::{
    config::Config,
    store::{JsonFileStore, Store},
};

#[tokio::main]
async fn main() -> Result<(), relaybot_core::Error> {
    relaybot_core::logging::init("relaybot")?;

    let cfg = Arc::new(Config::load()?);

    let store: Arc<dyn Store> = Arc::new(JsonFileStore::open(cfg.data_path.clone())?);
    tracing::info!(path = %cfg.data_path.display(), "store opened");

    let provider = AiBackend::from_config(&cfg)?;
    if cfg.policy.autoreply_enabled && cfg.knowledge_base.is_none() {
        tracing::warn!("AUTOREPLY_ENABLED is set but KNOWLEDGE_BASE_PATH is not");
    }

    relaybot_telegram::router::run_polling(cfg, store, provider)
        .await
        .map_err(|e| relaybot_core::Error::External(format!("telegram bot failed: {e}")))?;

    Ok(())
}
