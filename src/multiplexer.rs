//! Fans one change feed per watched table into a single callback.

use crate::feed::{ChangeFeed, ChangePayload, Table};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub type EventCallback = Arc<dyn Fn(Table, ChangePayload) + Send + Sync>;

pub struct SubscriptionMultiplexer {
    feed: Arc<dyn ChangeFeed>,
}

impl SubscriptionMultiplexer {
    pub fn new(feed: Arc<dyn ChangeFeed>) -> Self {
        Self { feed }
    }

    /// Subscribes to every table for `school_id`, delivering each event to `on_event`.
    ///
    /// Events of one table arrive in the order the store emitted them; nothing is
    /// promised across tables. A table whose feed cannot be established is logged and
    /// left out, the others stay active. Must be called within a tokio runtime.
    pub async fn open<I, F>(&self, school_id: &str, tables: I, on_event: F) -> FeedHandle
    where
        I: IntoIterator<Item = Table>,
        F: Fn(Table, ChangePayload) + Send + Sync + 'static,
    {
        let on_event: EventCallback = Arc::new(on_event);
        let token = CancellationToken::new();
        let requested: BTreeSet<Table> = tables.into_iter().collect();
        let mut subscribed = Vec::with_capacity(requested.len());
        let mut tasks = Vec::with_capacity(requested.len());

        for table in requested {
            let mut subscription = match self.feed.subscribe(table, school_id).await {
                Ok(subscription) => subscription,
                Err(err) => {
                    tracing::warn!(%table, school_id, error = %err, "failed to open change feed");
                    continue;
                }
            };
            let callback = on_event.clone();
            let cancelled = token.clone();
            let school = school_id.to_string();
            tasks.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        biased;
                        _ = cancelled.cancelled() => break,
                        next = subscription.recv() => match next {
                            Some(payload) => callback(table, payload),
                            None => {
                                tracing::warn!(%table, school_id = %school, "change feed ended");
                                break;
                            }
                        },
                    }
                }
            }));
            subscribed.push(table);
        }

        tracing::debug!(school_id, tables = ?subscribed, "change feeds opened");
        FeedHandle {
            inner: Arc::new(HandleInner {
                school_id: school_id.to_string(),
                tables: subscribed,
                tasks: Mutex::new(tasks),
                token,
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn close(&self, handle: &FeedHandle) {
        handle.close();
    }
}

struct HandleInner {
    school_id: String,
    tables: Vec<Table>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    token: CancellationToken,
    closed: AtomicBool,
}

/// Explicit unsubscribe handle for the feeds opened by one `open` call.
#[derive(Clone)]
pub struct FeedHandle {
    inner: Arc<HandleInner>,
}

impl FeedHandle {
    pub fn school_id(&self) -> &str {
        &self.inner.school_id
    }

    /// Tables whose feed was established.
    pub fn subscribed_tables(&self) -> &[Table] {
        &self.inner.tables
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Cancelled once the handle is closed.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.token.clone()
    }

    /// Releases every feed of this handle. Idempotent.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.token.cancel();
        for task in self.inner.tasks.lock().drain(..) {
            task.abort();
        }
        tracing::debug!(school_id = %self.inner.school_id, "change feeds closed");
    }
}
