use crate::error::AppError;
use crate::market::coingecko::{fetch_market_assets, markets_endpoint};
use crate::market::controller::AssetFeed;
use crate::market::types::{AssetRecord, CACHE_WINDOW_SECS, FAILURE_CACHE_WINDOW_SECS};
use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
enum CachedOutcome {
    Assets(Arc<Vec<AssetRecord>>),
    Failed(String),
}

#[derive(Debug)]
struct CachedFetch {
    fetched_at: Instant,
    outcome: CachedOutcome,
}

/// Upstream market-data gateway with a fixed cache window.
///
/// The cache slot is an async mutex held across the upstream round trip, so
/// callers arriving while a request is in flight wait for it and then read
/// its result instead of issuing their own.
#[derive(Debug)]
pub struct MarketGateway {
    client: Client,
    endpoint: String,
    cache_window: Duration,
    failure_window: Duration,
    cache: Mutex<Option<CachedFetch>>,
}

impl MarketGateway {
    pub fn new(client: Client, base_url: &str) -> Self {
        Self::with_cache_windows(
            client,
            base_url,
            Duration::from_secs(CACHE_WINDOW_SECS),
            Duration::from_secs(FAILURE_CACHE_WINDOW_SECS),
        )
    }

    pub fn with_cache_windows(
        client: Client,
        base_url: &str,
        cache_window: Duration,
        failure_window: Duration,
    ) -> Self {
        Self {
            client,
            endpoint: markets_endpoint(base_url),
            cache_window,
            failure_window,
            cache: Mutex::new(None),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn cache_window(&self) -> Duration {
        self.cache_window
    }

    /// Never fails: upstream and payload errors are logged and collapse to an
    /// empty list. The controller and `/api/cryptos` use [`try_fetch_assets`]
    /// instead, since an empty list would hide the failure from the
    /// refresh-failed state and from the 500 response.
    ///
    /// [`try_fetch_assets`]: MarketGateway::try_fetch_assets
    pub async fn fetch_assets(&self) -> Vec<AssetRecord> {
        match self.try_fetch_assets().await {
            Ok(assets) => assets,
            Err(error) => {
                tracing::warn!(%error, "market data fetch failed, returning empty result");
                Vec::new()
            }
        }
    }

    pub async fn try_fetch_assets(&self) -> Result<Vec<AssetRecord>, AppError> {
        let mut slot = self.cache.lock().await;

        if let Some(cached) = slot.as_ref() {
            let window = match cached.outcome {
                CachedOutcome::Assets(_) => self.cache_window,
                CachedOutcome::Failed(_) => self.failure_window,
            };
            if cached.fetched_at.elapsed() < window {
                tracing::trace!("serving market data from cache");
                return outcome_to_result(&cached.outcome);
            }
        }

        let started_at = Instant::now();
        let outcome = match fetch_market_assets(&self.client, &self.endpoint).await {
            Ok(assets) => {
                tracing::debug!(
                    count = assets.len(),
                    elapsed_ms = started_at.elapsed().as_millis() as u64,
                    "fetched market data"
                );
                CachedOutcome::Assets(Arc::new(assets))
            }
            Err(error) => {
                tracing::warn!(%error, "market data request failed");
                let reason = match error {
                    AppError::Upstream(reason) => reason,
                    other => other.to_string(),
                };
                CachedOutcome::Failed(reason)
            }
        };

        let result = outcome_to_result(&outcome);
        *slot = Some(CachedFetch {
            fetched_at: Instant::now(),
            outcome,
        });
        result
    }
}

fn outcome_to_result(outcome: &CachedOutcome) -> Result<Vec<AssetRecord>, AppError> {
    match outcome {
        CachedOutcome::Assets(assets) => Ok(assets.as_ref().clone()),
        CachedOutcome::Failed(reason) => Err(AppError::Upstream(reason.clone())),
    }
}

#[async_trait]
impl AssetFeed for MarketGateway {
    async fn poll_assets(&self) -> Result<Vec<AssetRecord>, AppError> {
        self.try_fetch_assets().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_targets_markets_endpoint() {
        let gateway = MarketGateway::new(Client::new(), "http://127.0.0.1:1");
        assert_eq!(
            gateway.endpoint(),
            markets_endpoint("http://127.0.0.1:1")
        );
    }

    #[tokio::test]
    async fn unreachable_upstream_degrades_to_empty_list() {
        // Port 1 on loopback is never listening.
        let gateway = MarketGateway::new(Client::new(), "http://127.0.0.1:1");
        let assets = gateway.fetch_assets().await;
        assert!(assets.is_empty());
    }

    #[tokio::test]
    async fn failure_is_served_from_cache_inside_failure_window() {
        let gateway = MarketGateway::with_cache_windows(
            Client::new(),
            "http://127.0.0.1:1",
            Duration::from_secs(60),
            Duration::from_secs(60),
        );

        let first = gateway.try_fetch_assets().await;
        let second = gateway.try_fetch_assets().await;
        assert!(matches!(first, Err(AppError::Upstream(_))));
        assert!(matches!(second, Err(AppError::Upstream(_))));
    }
}
