use std::sync::Arc;

use chrono::Duration;

use super::{
    attribution::ScanAttributor,
    config::Config,
    database::init_redis,
    registry::Registry,
    session::IdentitySession,
    store::RedisScanStore,
    token::TokenCodec,
};

pub struct State {
    pub config: Config,
    pub codec: TokenCodec,
    pub sessions: IdentitySession,
    pub attributor: ScanAttributor<RedisScanStore>,
    pub registry: Registry,
}

impl State {
    pub async fn new() -> Arc<Self> {
        let config = Config::load();

        let redis_connection = init_redis(&config.redis_url).await;

        let window = Duration::hours(config.cooldown_hours);
        let store = RedisScanStore::new(
            redis_connection,
            window,
            Duration::days(config.retention_days),
        );

        let codec = TokenCodec::new(config.token_secret.as_bytes().to_vec());
        let sessions = IdentitySession::new(
            config.cookie_max_age_days * 24 * 60 * 60,
            config.production,
        );

        Arc::new(Self {
            config,
            codec,
            sessions,
            attributor: ScanAttributor::new(store, window),
            registry: Registry::with_defaults(),
        })
    }
}
