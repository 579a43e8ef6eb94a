use std::sync::Arc;

use anyhow::Error;
use posts::{FeedbackLedger, PriceStore, UserStore, memory::MemoryStore};
use tracing::info;

use super::{
    config::{Backend, Config},
    database::RedisStore,
};

pub struct State {
    pub config: Config,
    pub prices: Arc<dyn PriceStore>,
    pub users: Arc<dyn UserStore>,
    pub ledger: FeedbackLedger,
}

impl State {
    pub async fn new(config: Config) -> Result<Arc<Self>, Error> {
        match config.backend {
            Backend::Redis => {
                info!("Connecting to Redis...");
                let store = Arc::new(RedisStore::connect(&config.redis_url).await?);

                // other server processes may share this Redis
                let ledger = FeedbackLedger::new(store.clone(), store.clone())
                    .with_shared_locks(store.clone());

                Ok(Self::assemble(config, store.clone(), store, ledger))
            }
            Backend::Memory => {
                info!("Using in-memory store, data is lost on shutdown");
                let store = Arc::new(MemoryStore::new());

                Ok(Self::with_stores(config, store.clone(), store))
            }
        }
    }

    pub fn with_stores(
        config: Config,
        prices: Arc<dyn PriceStore>,
        users: Arc<dyn UserStore>,
    ) -> Arc<Self> {
        let ledger = FeedbackLedger::new(prices.clone(), users.clone());

        Self::assemble(config, prices, users, ledger)
    }

    fn assemble(
        config: Config,
        prices: Arc<dyn PriceStore>,
        users: Arc<dyn UserStore>,
        ledger: FeedbackLedger,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            prices,
            users,
            ledger,
        })
    }
}
