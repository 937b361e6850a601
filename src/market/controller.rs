use crate::error::AppError;
use crate::market::now_unix_ms;
use crate::market::types::{
    AssetRecord, DashboardPhase, DashboardSnapshot, SortConfig, SortKey, FAVORITES_STORAGE_KEY,
    REFRESH_INTERVAL_MS,
};
use crate::market::view::{derive_view, toggle_favorite};
use crate::storage::{decode_value, KvStore, SubscriptionId};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Source of fresh asset lists for the controller.
#[async_trait]
pub trait AssetFeed: Send + Sync {
    async fn poll_assets(&self) -> Result<Vec<AssetRecord>, AppError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Applied(DashboardPhase),
    /// A later poll already replaced the list.
    Stale,
    /// The controller was stopped while the poll was in flight.
    Inactive,
}

#[derive(Debug)]
struct ControllerState {
    phase: DashboardPhase,
    error: Option<String>,
    assets: Vec<AssetRecord>,
    sort: SortConfig,
    search_term: String,
    favorites: BTreeSet<String>,
    view: Vec<AssetRecord>,
    last_applied_seq: u64,
    last_updated_at_ms: Option<i64>,
}

impl ControllerState {
    fn new(favorites: BTreeSet<String>) -> Self {
        Self {
            phase: DashboardPhase::Initial,
            error: None,
            assets: Vec::new(),
            sort: SortConfig::default(),
            search_term: String::new(),
            favorites,
            view: Vec::new(),
            last_applied_seq: 0,
            last_updated_at_ms: None,
        }
    }

    fn recompute_view(&mut self) {
        self.view = derive_view(
            &self.assets,
            self.sort,
            &self.favorites,
            &self.search_term,
        );
    }

    fn apply(&mut self, seq: u64, result: Result<Vec<AssetRecord>, AppError>) -> PollOutcome {
        if seq <= self.last_applied_seq {
            return PollOutcome::Stale;
        }

        let previous_phase = self.phase;
        match result {
            Ok(assets) => {
                self.last_applied_seq = seq;
                if !assets.is_empty() {
                    self.assets = assets;
                    self.phase = DashboardPhase::Ready;
                    self.error = None;
                    self.last_updated_at_ms = Some(now_unix_ms());
                    self.recompute_view();
                } else if self.assets.is_empty() {
                    self.phase = DashboardPhase::Empty;
                    self.error = None;
                }
            }
            Err(error) => {
                if self.assets.is_empty() {
                    self.phase = DashboardPhase::Loading;
                    self.error = Some(format!("Failed to load market data: {error}"));
                } else {
                    self.phase = DashboardPhase::RefreshFailed;
                }
                tracing::warn!(seq, %error, "market refresh failed");
            }
        }

        if previous_phase != self.phase {
            tracing::debug!(from = ?previous_phase, to = ?self.phase, seq, "dashboard phase changed");
        }
        PollOutcome::Applied(self.phase)
    }

    fn snapshot(&self) -> DashboardSnapshot {
        DashboardSnapshot {
            phase: self.phase,
            error: self.error.clone(),
            sort: self.sort,
            search_term: self.search_term.clone(),
            favorites: self.favorites.clone(),
            last_updated_at_ms: self.last_updated_at_ms,
            total_assets: self.assets.len(),
            rows: self.view.clone(),
        }
    }
}

/// Owns the authoritative asset list and the user's view state, keeps the
/// list fresh on a fixed timer and re-derives the visible rows after every
/// mutation.
pub struct RefreshController {
    feed: Arc<dyn AssetFeed>,
    store: Arc<KvStore>,
    state: Arc<Mutex<ControllerState>>,
    active: Arc<AtomicBool>,
    stopped: AtomicBool,
    issued_seq: AtomicU64,
    refresh_interval: Duration,
    cancel_token: CancellationToken,
    timer: Mutex<Option<JoinHandle<()>>>,
    subscription: Mutex<Option<SubscriptionId>>,
}

impl RefreshController {
    pub fn new(feed: Arc<dyn AssetFeed>, store: Arc<KvStore>) -> Arc<Self> {
        Self::with_refresh_interval(feed, store, Duration::from_millis(REFRESH_INTERVAL_MS))
    }

    pub fn with_refresh_interval(
        feed: Arc<dyn AssetFeed>,
        store: Arc<KvStore>,
        refresh_interval: Duration,
    ) -> Arc<Self> {
        let favorites: BTreeSet<String> = store.read(FAVORITES_STORAGE_KEY, BTreeSet::new());
        Arc::new(Self {
            feed,
            store,
            state: Arc::new(Mutex::new(ControllerState::new(favorites))),
            active: Arc::new(AtomicBool::new(true)),
            stopped: AtomicBool::new(false),
            issued_seq: AtomicU64::new(0),
            refresh_interval,
            cancel_token: CancellationToken::new(),
            timer: Mutex::new(None),
            subscription: Mutex::new(None),
        })
    }

    /// Mount: enter `Loading`, subscribe to favorites changes and arm the
    /// refresh timer. The timer's first tick fires immediately.
    pub fn start(self: &Arc<Self>) -> Result<(), AppError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(AppError::InvalidArgument(
                "controller has been stopped".to_string(),
            ));
        }

        let mut timer_slot = self.timer.lock();
        if timer_slot.is_some() {
            return Ok(());
        }

        {
            let mut state = self.state.lock();
            if state.phase == DashboardPhase::Initial {
                state.phase = DashboardPhase::Loading;
            }
        }

        *self.subscription.lock() = Some(self.subscribe_to_favorites());

        let controller = Arc::clone(self);
        let cancel_token = self.cancel_token.clone();
        let refresh_interval = self.refresh_interval;
        *timer_slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(refresh_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = cancel_token.cancelled() => break,
                    _ = ticker.tick() => controller.spawn_poll(),
                }
            }
            tracing::debug!("refresh timer stopped");
        }));

        tracing::info!(
            interval_ms = refresh_interval.as_millis() as u64,
            "refresh controller started"
        );
        Ok(())
    }

    /// Unmount: cancel the timer and clear the active guard. Polls already in
    /// flight still complete but their results are dropped.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        {
            let _state = self.state.lock();
            self.active.store(false, Ordering::SeqCst);
        }
        self.cancel_token.cancel();

        if let Some(id) = self.subscription.lock().take() {
            self.store.unsubscribe(id);
        }

        let timer = self.timer.lock().take();
        if let Some(handle) = timer {
            let _ = handle.await;
        }
        tracing::info!("refresh controller stopped");
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn refresh_interval(&self) -> Duration {
        self.refresh_interval
    }

    pub fn last_updated_at_ms(&self) -> Option<i64> {
        self.state.lock().last_updated_at_ms
    }

    fn next_seq(&self) -> u64 {
        self.issued_seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn spawn_poll(self: &Arc<Self>) {
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            controller.poll_once().await;
        });
    }

    /// One refresh cycle, identical to a timer tick.
    pub async fn poll_once(&self) -> PollOutcome {
        let seq = self.next_seq();
        let result = self.feed.poll_assets().await;
        self.apply_poll_result(seq, result)
    }

    pub fn apply_poll_result(
        &self,
        seq: u64,
        result: Result<Vec<AssetRecord>, AppError>,
    ) -> PollOutcome {
        // `stop` clears the flag under this lock, so no result lands after it.
        let mut state = self.state.lock();
        if !self.active.load(Ordering::SeqCst) {
            tracing::debug!(seq, "dropping poll result after stop");
            return PollOutcome::Inactive;
        }
        let outcome = state.apply(seq, result);
        drop(state);

        if outcome == PollOutcome::Stale {
            tracing::debug!(seq, "dropping out-of-order poll result");
        }
        outcome
    }

    pub fn set_search_term(&self, term: impl Into<String>) {
        let mut state = self.state.lock();
        state.search_term = term.into();
        state.recompute_view();
    }

    /// Column-header click. `None` clears sorting and restores upstream order.
    pub fn click_sort_column(&self, key: Option<SortKey>) -> SortConfig {
        let mut state = self.state.lock();
        state.sort = match key {
            Some(key) => state.sort.clicked(key),
            None => SortConfig::unsorted(),
        };
        state.recompute_view();
        state.sort
    }

    /// Returns whether `id` is a favorite after the toggle.
    pub fn toggle_favorite(&self, id: &str) -> Result<bool, AppError> {
        let id = id.trim();
        if id.is_empty() {
            return Err(AppError::InvalidArgument(
                "favorite id must be non-empty".to_string(),
            ));
        }

        // Toggle against the stored set inside the store's update step so
        // concurrent toggles, here or in another controller, never persist an
        // older set over a newer one. The state lock is released before the
        // store notifies subscribers, this controller included.
        let fallback = self.favorites();
        let is_favorite = self.store.update(
            FAVORITES_STORAGE_KEY,
            fallback,
            |favorites: &mut BTreeSet<String>| {
                let is_favorite = toggle_favorite(favorites, id);
                let mut state = self.state.lock();
                state.favorites = favorites.clone();
                state.recompute_view();
                is_favorite
            },
        );
        Ok(is_favorite)
    }

    pub fn favorites(&self) -> BTreeSet<String> {
        self.state.lock().favorites.clone()
    }

    pub fn sort_config(&self) -> SortConfig {
        self.state.lock().sort
    }

    pub fn phase(&self) -> DashboardPhase {
        self.state.lock().phase
    }

    pub fn view(&self) -> Vec<AssetRecord> {
        self.state.lock().view.clone()
    }

    pub fn snapshot(&self) -> DashboardSnapshot {
        self.state.lock().snapshot()
    }

    fn subscribe_to_favorites(&self) -> SubscriptionId {
        let state: Weak<Mutex<ControllerState>> = Arc::downgrade(&self.state);
        let active = Arc::clone(&self.active);

        self.store.subscribe(Arc::new(move |key: &str, raw: &str| {
            if key != FAVORITES_STORAGE_KEY {
                return;
            }
            let Some(state) = state.upgrade() else {
                return;
            };
            let Some(favorites) = decode_value::<BTreeSet<String>>(key, raw) else {
                return;
            };

            let mut state = state.lock();
            if !active.load(Ordering::SeqCst) {
                return;
            }
            if state.favorites != favorites {
                state.favorites = favorites;
                state.recompute_view();
            }
        }))
    }
}
