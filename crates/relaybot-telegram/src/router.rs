use std::sync::Arc;

use teloxide::{dispatching::Dispatcher, dptree, prelude::*};

use relaybot_core::{
    ai::AiProvider,
    config::Config,
    domain::ChatId,
    messaging::{
        port::ChatPlatform,
        throttled::{ThrottleConfig, ThrottledPlatform},
    },
    pipeline::RelayPipeline,
    review::ReviewBoard,
    store::Store,
};

use crate::handlers;
use crate::TelegramPlatform;

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub pipeline: Arc<RelayPipeline>,
    pub platform: Arc<dyn ChatPlatform>,
    pub review: Arc<ReviewBoard>,
}

impl AppState {
    pub fn is_admin(&self, user_id: i64) -> bool {
        self.cfg.is_admin(user_id)
    }
}

pub async fn run_polling(
    cfg: Arc<Config>,
    store: Arc<dyn Store>,
    provider: Option<Arc<dyn AiProvider>>,
) -> anyhow::Result<()> {
    let bot = Bot::new(cfg.bot_token.clone());

    match bot.get_me().await {
        Ok(me) => tracing::info!(username = %me.username(), "relaybot started"),
        Err(e) => tracing::warn!(error = %e, "get_me failed; continuing"),
    }
    tracing::info!(
        forum_group_id = cfg.forum_group_id,
        admins = cfg.admin_ids.len(),
        ai = provider.as_ref().map(|p| p.name()).unwrap_or("off"),
        "configuration loaded"
    );

    // Throttle outbound calls so bursts of users do not trip 429s. RetryAfter is
    // still retried once inside the Telegram adapter.
    let raw: Arc<dyn ChatPlatform> = Arc::new(TelegramPlatform::new(
        bot.clone(),
        ChatId(cfg.forum_group_id),
    ));
    let platform: Arc<dyn ChatPlatform> =
        Arc::new(ThrottledPlatform::new(raw, ThrottleConfig::default()));

    let review = Arc::new(ReviewBoard::new(store.clone()));
    let pipeline = Arc::new(RelayPipeline::new(
        cfg.policy(),
        platform.clone(),
        store,
        provider,
        cfg.knowledge_base.clone(),
    ));

    let state = Arc::new(AppState {
        cfg,
        pipeline,
        platform,
        review,
    });

    let handler = dptree::entry()
        .branch(Update::filter_callback_query().endpoint(handlers::handle_callback))
        .branch(Update::filter_message().endpoint(handlers::handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .build()
        .dispatch()
        .await;

    Ok(())
}
