use crate::market::controller::RefreshController;
use crate::market::gateway::MarketGateway;
use crate::storage::KvStore;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Instant;

pub struct AppState {
    pub started_at: Instant,
    pub db_pool: Option<SqlitePool>,
    pub store: Arc<KvStore>,
    pub gateway: Arc<MarketGateway>,
    pub controller: Arc<RefreshController>,
}

impl AppState {
    pub fn new(
        db_pool: Option<SqlitePool>,
        store: Arc<KvStore>,
        gateway: Arc<MarketGateway>,
        controller: Arc<RefreshController>,
    ) -> Self {
        Self {
            started_at: Instant::now(),
            db_pool,
            store,
            gateway,
            controller,
        }
    }
}
