pub mod persistence;

use crate::error::AppError;
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

pub const CROSS_CONTEXT_SYNC_INTERVAL_MS: u64 = 5_000;

/// Called with `(key, raw_json)` after a value changes.
pub type StoreListener = Arc<dyn Fn(&str, &str) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

enum WriterCommand {
    Upsert { key: String, value_json: String },
    Flush(oneshot::Sender<()>),
}

type PendingWrites = Arc<Mutex<HashMap<String, usize>>>;

/// Process-wide key-value store holding JSON text per key.
///
/// Reads and writes hit an in-memory map and never fail. Same-process
/// subscribers are notified synchronously inside [`KvStore::write`]; rows are
/// persisted to SQLite by a single writer task in call order, and changes made
/// by other processes are picked up by [`KvStore::sync_from_disk`].
///
/// Writes are committed one at a time: the map update, listener calls and
/// writer hand-off for one value finish before the next value starts, so
/// listeners and the database see values in the same order. Listeners run
/// inside that section and must not write to the store.
pub struct KvStore {
    entries: RwLock<HashMap<String, String>>,
    write_order: Mutex<()>,
    listeners: Mutex<Vec<(SubscriptionId, StoreListener)>>,
    next_listener_id: AtomicU64,
    pending_writes: PendingWrites,
    writer: Option<mpsc::UnboundedSender<WriterCommand>>,
    pool: Option<SqlitePool>,
}

impl std::fmt::Debug for KvStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvStore")
            .field("keys", &self.entries.read().len())
            .field("listeners", &self.listeners.lock().len())
            .field("persistent", &self.pool.is_some())
            .finish()
    }
}

impl KvStore {
    /// Store with no backing database; values live for the process lifetime.
    pub fn in_memory() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            write_order: Mutex::new(()),
            listeners: Mutex::new(Vec::new()),
            next_listener_id: AtomicU64::new(1),
            pending_writes: Arc::new(Mutex::new(HashMap::new())),
            writer: None,
            pool: None,
        }
    }

    pub async fn open(pool: SqlitePool) -> Result<Self, AppError> {
        let rows = persistence::list_entries(&pool).await?;
        let entries = rows
            .into_iter()
            .map(|entry| (entry.key, entry.value_json))
            .collect::<HashMap<_, _>>();
        tracing::debug!(keys = entries.len(), "loaded persisted store entries");

        let pending_writes: PendingWrites = Arc::new(Mutex::new(HashMap::new()));
        let (writer_tx, writer_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(pool.clone(), writer_rx, Arc::clone(&pending_writes)));

        Ok(Self {
            entries: RwLock::new(entries),
            write_order: Mutex::new(()),
            listeners: Mutex::new(Vec::new()),
            next_listener_id: AtomicU64::new(1),
            pending_writes,
            writer: Some(writer_tx),
            pool: Some(pool),
        })
    }

    pub fn is_persistent(&self) -> bool {
        self.pool.is_some()
    }

    pub fn read<T: DeserializeOwned>(&self, key: &str, fallback: T) -> T {
        let raw = self.entries.read().get(key).cloned();
        match raw {
            Some(raw) => decode_value(key, &raw).unwrap_or(fallback),
            None => fallback,
        }
    }

    pub fn write<T: Serialize + ?Sized>(&self, key: &str, value: &T) {
        let Some(value_json) = encode_value(key, value) else {
            return;
        };
        let _order = self.write_order.lock();
        self.commit(key, value_json);
    }

    /// Read-modify-write of one key. The read, `apply` and the write happen
    /// as one step with respect to every other `write` and `update`, so
    /// concurrent callers never build on a value that is being replaced.
    pub fn update<T, R, F>(&self, key: &str, fallback: T, apply: F) -> R
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(&mut T) -> R,
    {
        let _order = self.write_order.lock();
        let mut value = self.read(key, fallback);
        let result = apply(&mut value);
        if let Some(value_json) = encode_value(key, &value) {
            self.commit(key, value_json);
        }
        result
    }

    /// Caller holds `write_order`.
    fn commit(&self, key: &str, value_json: String) {
        // Pending until the writer task persists it; sync_from_disk skips
        // pending keys instead of rolling them back to the older row.
        if self.writer.is_some() {
            *self
                .pending_writes
                .lock()
                .entry(key.to_string())
                .or_insert(0) += 1;
        }

        self.entries
            .write()
            .insert(key.to_string(), value_json.clone());
        self.notify(key, &value_json);

        if let Some(writer) = &self.writer {
            let command = WriterCommand::Upsert {
                key: key.to_string(),
                value_json,
            };
            if writer.send(command).is_err() {
                release_pending(&self.pending_writes, key);
                tracing::warn!(key, "store writer is gone, value kept in memory only");
            }
        }
    }

    pub fn subscribe(&self, listener: StoreListener) -> SubscriptionId {
        let id = SubscriptionId(self.next_listener_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().push((id, listener));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }

    pub fn notify(&self, key: &str, value_json: &str) {
        // Snapshot first so listeners may subscribe or unsubscribe re-entrantly.
        let listeners: Vec<StoreListener> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for listener in listeners {
            listener(key, value_json);
        }
    }

    /// Waits until every write issued before this call has reached SQLite.
    pub async fn flush(&self) {
        let Some(writer) = &self.writer else {
            return;
        };
        let (done_tx, done_rx) = oneshot::channel();
        if writer.send(WriterCommand::Flush(done_tx)).is_err() {
            return;
        }
        let _ = done_rx.await;
    }

    /// Reloads persisted rows and notifies subscribers for keys changed by
    /// another process. Keys with local writes still in flight are skipped.
    pub async fn sync_from_disk(&self) -> Result<usize, AppError> {
        let Some(pool) = &self.pool else {
            return Ok(0);
        };

        let rows = persistence::list_entries(pool).await?;
        let _order = self.write_order.lock();
        let mut changed = Vec::new();
        {
            let pending = self.pending_writes.lock();
            let mut entries = self.entries.write();
            for row in rows {
                if pending.get(&row.key).copied().unwrap_or(0) > 0 {
                    continue;
                }
                if entries.get(&row.key) != Some(&row.value_json) {
                    entries.insert(row.key.clone(), row.value_json.clone());
                    changed.push(row);
                }
            }
        }

        for entry in &changed {
            tracing::debug!(
                key = %entry.key,
                updated_at_ms = entry.updated_at_ms,
                "store value changed in another context"
            );
            self.notify(&entry.key, &entry.value_json);
        }
        Ok(changed.len())
    }
}

fn encode_value<T: Serialize + ?Sized>(key: &str, value: &T) -> Option<String> {
    match simd_json::serde::to_string(value) {
        Ok(json) => Some(json),
        Err(error) => {
            tracing::warn!(key, %error, "failed to encode store value, write skipped");
            None
        }
    }
}

pub fn decode_value<T: DeserializeOwned>(key: &str, raw: &str) -> Option<T> {
    let mut bytes = raw.as_bytes().to_vec();
    match simd_json::serde::from_slice::<T>(bytes.as_mut_slice()) {
        Ok(value) => Some(value),
        Err(error) => {
            tracing::warn!(key, %error, "stored value is unreadable, using fallback");
            None
        }
    }
}

fn release_pending(pending_writes: &PendingWrites, key: &str) {
    let mut pending = pending_writes.lock();
    if let Some(count) = pending.get_mut(key) {
        *count = count.saturating_sub(1);
        if *count == 0 {
            pending.remove(key);
        }
    }
}

async fn run_writer(
    pool: SqlitePool,
    mut commands: mpsc::UnboundedReceiver<WriterCommand>,
    pending_writes: PendingWrites,
) {
    while let Some(command) = commands.recv().await {
        match command {
            WriterCommand::Upsert { key, value_json } => {
                match persistence::upsert_entry(&pool, &key, &value_json).await {
                    Ok(entry) => tracing::trace!(
                        key = %entry.key,
                        updated_at_ms = entry.updated_at_ms,
                        "persisted store value"
                    ),
                    Err(error) => tracing::warn!(key = %key, %error, "failed to persist store value"),
                }
                release_pending(&pending_writes, &key);
            }
            WriterCommand::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    tracing::debug!("store writer stopped");
}

pub fn spawn_cross_context_sync(
    store: Arc<KvStore>,
    interval: Duration,
    cancel_token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick fires immediately and the store was just loaded.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(error) = store.sync_from_disk().await {
                        tracing::warn!(%error, "cross-context store sync failed");
                    }
                }
            }
        }
    })
}
