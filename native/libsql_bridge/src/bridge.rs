/// The synchronous/asynchronous execution bridge
///
/// [`Bridge`] owns the worker pool and the four handle registries. Public
/// operations are synchronous: each one resolves its handles, then hands a
/// future to [`Bridge::run`], which spawns it on the bounded tokio pool and
/// blocks the calling thread until it completes.
///
/// **Locking order**: a future first locks the owning session, then the child
/// entity (transaction, statement or cursor). Registry maps are only locked
/// briefly to resolve or store handles, never across an await point.
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio::time::Instant;
use tracing::Instrument;

use crate::config::BridgeConfig;
use crate::connection::ConnectionEntry;
use crate::constants::{BUSY_RETRY_INITIAL_MS, BUSY_RETRY_MAX_MS};
use crate::cursor::CursorEntry;
use crate::error::{is_busy, BridgeError};
use crate::handle::{ConnectionId, CursorId, Handle, StatementId, TransactionId};
use crate::registry::Registry;
use crate::statement::StatementEntry;
use crate::transaction::TransactionEntry;

pub(crate) type Locked<T> = tokio::sync::Mutex<T>;

/// All registries of one bridge.
#[derive(Default)]
pub(crate) struct Registries {
    pub connections: Registry<ConnectionId, ConnectionEntry>,
    pub transactions: Registry<TransactionId, Locked<TransactionEntry>>,
    pub statements: Registry<StatementId, StatementEntry>,
    pub cursors: Registry<CursorId, Locked<CursorEntry>>,
}

impl Registries {
    /// Resolve the connection that owns `child`.
    ///
    /// A child whose connection has disappeared reports `OwnerClosed`.
    pub fn owner_session(
        &self,
        conn_id: &ConnectionId,
        child: &impl std::fmt::Display,
    ) -> Result<Arc<ConnectionEntry>, BridgeError> {
        self.connections.resolve(conn_id).map_err(|e| match e {
            BridgeError::NotFound { .. } => BridgeError::owner_closed(child),
            other => other,
        })
    }
}

struct BridgeInner {
    runtime: Runtime,
    config: BridgeConfig,
    registries: Arc<Registries>,
}

/// Entry point for every operation on connections and their children.
///
/// Cheap to clone; clones share the worker pool and registries.
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<BridgeInner>,
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl Bridge {
    /// Start a bridge with its own worker pool.
    pub fn new(config: BridgeConfig) -> Result<Self, BridgeError> {
        config.validate()?;
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.worker_threads)
            .thread_name("libsql-bridge-worker")
            .enable_all()
            .build()
            .map_err(|e| BridgeError::Runtime(format!("Failed to start worker pool: {e}")))?;

        tracing::debug!(worker_threads = config.worker_threads, "bridge started");

        Ok(Self {
            inner: Arc::new(BridgeInner {
                runtime,
                config,
                registries: Arc::new(Registries::default()),
            }),
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    pub(crate) fn registries(&self) -> Arc<Registries> {
        self.inner.registries.clone()
    }

    /// Drive `future` to completion on the worker pool and return its result
    /// to the calling thread.
    ///
    /// Must not be called from inside an async context; doing so is reported
    /// as a `Runtime` error rather than blocking a runtime thread.
    pub(crate) fn run<T, F>(&self, operation: &'static str, future: F) -> Result<T, BridgeError>
    where
        F: Future<Output = Result<T, BridgeError>> + Send + 'static,
        T: Send + 'static,
    {
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(BridgeError::Runtime(format!(
                "{operation} called from within an async context"
            )));
        }

        let span = tracing::debug_span!("bridge", operation);
        let task = self.inner.runtime.spawn(future.instrument(span));
        self.inner
            .runtime
            .block_on(task)
            .map_err(|e| BridgeError::Runtime(format!("{operation} task failed: {e}")))?
    }

    /// Remove a child handle of `conn_id`.
    ///
    /// While the connection is open the child is finalized under its session
    /// lock, so it never disappears underneath a running operation. Unknown
    /// and orphaned handles are a no-op. Returns whether a live child was
    /// removed.
    pub(crate) fn close_child<K, T, F>(
        &self,
        operation: &'static str,
        conn_id: ConnectionId,
        child: K,
        select: F,
    ) -> Result<bool, BridgeError>
    where
        K: Handle,
        T: Send + Sync + 'static,
        F: Fn(&Registries) -> &Registry<K, T> + Send + 'static,
    {
        let registries = self.registries();
        let entry = match registries.connections.resolve(&conn_id) {
            Ok(entry) => entry,
            Err(BridgeError::NotFound { .. }) => {
                let detached = select(&registries).remove_owned(&child, &conn_id)?;
                let removed = detached.is_some();
                self.release(detached);
                return Ok(removed);
            }
            Err(e) => return Err(e),
        };

        self.run(operation, async move {
            let _session = entry.session.lock().await;
            let detached = select(&registries).remove_owned(&child, &conn_id)?;
            let removed = detached.is_some();
            drop(detached);
            Ok(removed)
        })
    }

    /// Drop detached entities inside the runtime context.
    ///
    /// Remote transactions and streams may need the runtime to shut down.
    pub(crate) fn release<T>(&self, detached: T) {
        let _enter = self.inner.runtime.enter();
        drop(detached);
    }
}

/// Backoff state for retrying lock contention.
pub(crate) struct BusyRetry {
    timeout: Duration,
    deadline: Instant,
    delay: Duration,
    attempts: u32,
}

impl BusyRetry {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            deadline: Instant::now() + timeout,
            delay: Duration::from_millis(BUSY_RETRY_INITIAL_MS),
            attempts: 1,
        }
    }

    /// Sleep and return `true` when `err` is lock contention and time remains.
    pub async fn backoff(&mut self, err: &libsql::Error) -> bool {
        if !is_busy(err) {
            return false;
        }
        let now = Instant::now();
        if now >= self.deadline {
            tracing::warn!(
                attempts = self.attempts,
                timeout_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
                "busy timeout elapsed"
            );
            return false;
        }
        tokio::time::sleep(self.delay.min(self.deadline - now)).await;
        self.delay = (self.delay * 2).min(Duration::from_millis(BUSY_RETRY_MAX_MS));
        self.attempts += 1;
        true
    }
}

/// Run `op` until it succeeds, fails with anything but lock contention, or
/// `timeout` elapses.
pub(crate) async fn retry_busy<T, F, Fut>(timeout: Duration, mut op: F) -> Result<T, libsql::Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, libsql::Error>>,
{
    let mut retry = BusyRetry::new(timeout);
    loop {
        match op().await {
            Err(err) if retry.backoff(&err).await => continue,
            other => return other,
        }
    }
}
