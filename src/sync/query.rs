//! Generic cache + retry wrapper for async data fetches.
//!
//! `OptimizedQuery` gives any async fetch function result caching with
//! separate stale and expiry thresholds, bounded retry with linear backoff,
//! supersession of in-flight requests, and an optional shutdown-aware
//! periodic refetch. Terminal failures surface through the outcome's error
//! field while last-known-good data stays available (stale-while-revalidate);
//! nothing here panics across the cache boundary.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;

use crate::sync::error::{Result, SyncError};

type FetchFn<T> = Box<dyn Fn() -> Pin<Box<dyn Future<Output = Result<T>> + Send>> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct QueryOptions {
    /// Whether the query runs at all. A disabled query only ever reports its
    /// stored state.
    pub enabled: bool,
    /// Entry lifetime before a cached result stops being returned.
    pub cache_time: Duration,
    /// Age after which a cached hit is still returned but flagged stale.
    pub stale_time: Duration,
    /// Total attempts per execution (1 = no retries).
    pub retry: u32,
    /// Base backoff unit; the sleep before attempt `n + 1` is
    /// `retry_delay * n` (linear, not exponential).
    pub retry_delay: Duration,
    /// Optional cadence for a spawned periodic refetch task.
    pub refetch_interval: Option<Duration>,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            cache_time: Duration::from_secs(5 * 60),
            stale_time: Duration::from_secs(30),
            retry: 3,
            retry_delay: Duration::from_secs(1),
            refetch_interval: None,
        }
    }
}

/// The observable state of a query after a call: data (possibly stale),
/// the terminal error of the last failed execution, and the stale flag.
#[derive(Debug, Clone)]
pub struct QueryOutcome<T> {
    pub data: Option<T>,
    pub error: Option<Arc<SyncError>>,
    pub is_stale: bool,
}

struct QueryState<T> {
    data: Option<T>,
    fetched_at: Option<DateTime<Utc>>,
    error: Option<Arc<SyncError>>,
}

pub struct OptimizedQuery<T> {
    key: String,
    fetch: FetchFn<T>,
    options: QueryOptions,
    state: Mutex<QueryState<T>>,
    /// Bumped at the start of every execution; a result belonging to an
    /// older generation is discarded even if it resolves late.
    generation: AtomicU64,
}

impl<T> OptimizedQuery<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Builds a query from ordered key segments, options, and a fetch
    /// closure.
    pub fn new<K, S, F, Fut>(key: K, options: QueryOptions, fetch: F) -> Self
    where
        K: IntoIterator<Item = S>,
        S: Into<String>,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let key = key
            .into_iter()
            .map(Into::into)
            .collect::<Vec<String>>()
            .join(":");
        Self {
            key,
            fetch: Box::new(move || Box::pin(fetch())),
            options,
            state: Mutex::new(QueryState {
                data: None,
                fetched_at: None,
                error: None,
            }),
            generation: AtomicU64::new(0),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Returns the cached result when fresh, otherwise executes the fetch.
    pub async fn run(&self) -> QueryOutcome<T> {
        if !self.options.enabled {
            return self.snapshot().await;
        }

        {
            let state = self.state.lock().await;
            if let (Some(data), Some(at)) = (&state.data, state.fetched_at) {
                let age = Utc::now() - at;
                if age < to_chrono(self.options.cache_time) {
                    return QueryOutcome {
                        data: Some(data.clone()),
                        error: state.error.clone(),
                        is_stale: age >= to_chrono(self.options.stale_time),
                    };
                }
            }
        }

        self.execute().await
    }

    /// Executes the fetch unconditionally, superseding any in-flight
    /// execution for this query.
    pub async fn refetch(&self) -> QueryOutcome<T> {
        self.execute().await
    }

    async fn execute(&self) -> QueryOutcome<T> {
        let my_generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let attempts = self.options.retry.max(1);
        let mut last_error: Option<Arc<SyncError>> = None;

        for attempt in 1..=attempts {
            match (self.fetch)().await {
                Ok(value) => {
                    let mut state = self.state.lock().await;
                    if self.generation.load(Ordering::SeqCst) != my_generation {
                        tracing::debug!(
                            target: "mstwins_sync::query",
                            key = %self.key,
                            "discarding superseded query result"
                        );
                        return Self::snapshot_locked(&state, &self.options);
                    }
                    state.data = Some(value.clone());
                    state.fetched_at = Some(Utc::now());
                    state.error = None;
                    return QueryOutcome {
                        data: Some(value),
                        error: None,
                        is_stale: false,
                    };
                }
                Err(err) => {
                    tracing::warn!(
                        target: "mstwins_sync::query",
                        key = %self.key,
                        attempt,
                        attempts,
                        "query attempt failed: {err}"
                    );
                    last_error = Some(Arc::new(err));
                    if attempt < attempts {
                        tokio::time::sleep(self.options.retry_delay * attempt).await;
                    }
                }
            }

            if self.generation.load(Ordering::SeqCst) != my_generation {
                return self.snapshot().await;
            }
        }

        let mut state = self.state.lock().await;
        if self.generation.load(Ordering::SeqCst) == my_generation {
            state.error = last_error.clone();
        }
        QueryOutcome {
            data: state.data.clone(),
            error: last_error,
            is_stale: state.data.is_some(),
        }
    }

    /// The stored state without fetching.
    pub async fn snapshot(&self) -> QueryOutcome<T> {
        let state = self.state.lock().await;
        Self::snapshot_locked(&state, &self.options)
    }

    fn snapshot_locked(state: &QueryState<T>, options: &QueryOptions) -> QueryOutcome<T> {
        let is_stale = match (&state.data, state.fetched_at) {
            (Some(_), Some(at)) => Utc::now() - at >= to_chrono(options.stale_time),
            _ => false,
        };
        QueryOutcome {
            data: state.data.clone(),
            error: state.error.clone(),
            is_stale,
        }
    }

    /// Spawns the periodic refetch task if `refetch_interval` is set. The
    /// task stops when `shutdown` flips to true or its sender is dropped.
    pub fn spawn_periodic(
        self: Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Option<JoinHandle<()>> {
        let interval = self.options.refetch_interval?;
        let query = self;
        Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        if !query.options.enabled {
                            continue;
                        }
                        let outcome = query.refetch().await;
                        if let Some(err) = outcome.error {
                            tracing::warn!(
                                target: "mstwins_sync::query",
                                key = %query.key,
                                "periodic refetch failed: {err}"
                            );
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            tracing::debug!(
                                target: "mstwins_sync::query",
                                key = %query.key,
                                "periodic refetch stopped"
                            );
                            break;
                        }
                    }
                }
            }
        }))
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    fn counting_query(
        counter: Arc<AtomicUsize>,
        options: QueryOptions,
    ) -> OptimizedQuery<usize> {
        OptimizedQuery::new(["test", "counting"], options, move || {
            let counter = counter.clone();
            async move { Ok(counter.fetch_add(1, Ordering::SeqCst) + 1) }
        })
    }

    #[tokio::test]
    async fn key_segments_join_in_order() {
        let query = OptimizedQuery::new(
            ["likes", "viewer-1", "page-0"],
            QueryOptions::default(),
            || async { Ok(1u32) },
        );
        assert_eq!(query.key(), "likes:viewer-1:page-0");
    }

    #[tokio::test]
    async fn fresh_hit_skips_the_fetch() {
        let calls = Arc::new(AtomicUsize::new(0));
        let query = counting_query(calls.clone(), QueryOptions::default());

        let first = query.run().await;
        let second = query.run().await;

        assert_eq!(first.data, Some(1));
        assert_eq!(second.data, Some(1));
        assert!(!second.is_stale);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stale_hit_is_returned_and_flagged() {
        let calls = Arc::new(AtomicUsize::new(0));
        let query = counting_query(
            calls.clone(),
            QueryOptions {
                stale_time: Duration::from_millis(5),
                cache_time: Duration::from_secs(300),
                ..QueryOptions::default()
            },
        );

        query.run().await;
        tokio::time::sleep(Duration::from_millis(15)).await;
        let outcome = query.run().await;

        assert_eq!(outcome.data, Some(1));
        assert!(outcome.is_stale);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn expired_entry_triggers_refetch() {
        let calls = Arc::new(AtomicUsize::new(0));
        let query = counting_query(
            calls.clone(),
            QueryOptions {
                cache_time: Duration::from_millis(5),
                ..QueryOptions::default()
            },
        );

        query.run().await;
        tokio::time::sleep(Duration::from_millis(15)).await;
        let outcome = query.run().await;

        assert_eq!(outcome.data, Some(2));
        assert!(!outcome.is_stale);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn refetch_bypasses_fresh_cache() {
        let calls = Arc::new(AtomicUsize::new(0));
        let query = counting_query(calls.clone(), QueryOptions::default());

        query.run().await;
        let outcome = query.refetch().await;

        assert_eq!(outcome.data, Some(2));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn disabled_query_never_fetches() {
        let calls = Arc::new(AtomicUsize::new(0));
        let query = counting_query(
            calls.clone(),
            QueryOptions {
                enabled: false,
                ..QueryOptions::default()
            },
        );

        let outcome = query.run().await;

        assert!(outcome.data.is_none());
        assert!(outcome.error.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failing_twice_then_succeeding_resolves_with_no_error() {
        let calls = Arc::new(AtomicUsize::new(0));
        let attempt_times: Arc<StdMutex<Vec<Instant>>> = Arc::new(StdMutex::new(Vec::new()));

        let calls_inner = calls.clone();
        let times_inner = attempt_times.clone();
        let query = OptimizedQuery::new(
            ["test", "retry"],
            QueryOptions {
                retry: 3,
                retry_delay: Duration::from_millis(30),
                ..QueryOptions::default()
            },
            move || {
                let calls = calls_inner.clone();
                let times = times_inner.clone();
                async move {
                    times.lock().unwrap().push(Instant::now());
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    if n <= 2 {
                        Err(SyncError::Realtime(format!("transient {n}")))
                    } else {
                        Ok(n)
                    }
                }
            },
        );

        let outcome = query.run().await;

        assert_eq!(outcome.data, Some(3));
        assert!(outcome.error.is_none());
        assert!(!outcome.is_stale);
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        // Linear backoff: the gap before attempt 3 (2 * retry_delay) is at
        // least the gap before attempt 2 (1 * retry_delay).
        let times = attempt_times.lock().unwrap();
        let gap1 = times[1] - times[0];
        let gap2 = times[2] - times[1];
        assert!(gap1 >= Duration::from_millis(30));
        assert!(gap2 >= gap1);
    }

    #[tokio::test]
    async fn terminal_failure_surfaces_error_and_keeps_old_data() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_inner = calls.clone();
        let query = OptimizedQuery::new(
            ["test", "terminal"],
            QueryOptions {
                cache_time: Duration::from_millis(1),
                retry: 2,
                retry_delay: Duration::from_millis(5),
                ..QueryOptions::default()
            },
            move || {
                let calls = calls_inner.clone();
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    if n == 1 {
                        Ok(n)
                    } else {
                        Err(SyncError::Realtime("down".to_string()))
                    }
                }
            },
        );

        let first = query.run().await;
        assert_eq!(first.data, Some(1));

        tokio::time::sleep(Duration::from_millis(10)).await;
        let second = query.run().await;

        // Two failed attempts, then the terminal error with stale data kept.
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(second.error.is_some());
        assert_eq!(second.data, Some(1));
        assert!(second.is_stale);
    }

    #[tokio::test]
    async fn superseded_request_result_is_discarded() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_inner = calls.clone();
        let query = Arc::new(OptimizedQuery::new(
            ["test", "supersede"],
            QueryOptions {
                retry: 1,
                ..QueryOptions::default()
            },
            move || {
                let calls = calls_inner.clone();
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    if n == 1 {
                        // The first call resolves late.
                        tokio::time::sleep(Duration::from_millis(80)).await;
                    }
                    Ok(n)
                }
            },
        ));

        let slow = {
            let query = Arc::clone(&query);
            tokio::spawn(async move { query.refetch().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        let fast = query.refetch().await;
        let slow = slow.await.unwrap();

        assert_eq!(fast.data, Some(2));
        // The slow call's own value (1) never lands; both observers see the
        // superseding result.
        assert_eq!(slow.data, Some(2));
        assert_eq!(query.snapshot().await.data, Some(2));
    }

    #[tokio::test]
    async fn periodic_refetch_runs_until_shutdown() {
        let calls = Arc::new(AtomicUsize::new(0));
        let query = Arc::new(counting_query(
            calls.clone(),
            QueryOptions {
                refetch_interval: Some(Duration::from_millis(20)),
                ..QueryOptions::default()
            },
        ));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = Arc::clone(&query)
            .spawn_periodic(shutdown_rx)
            .expect("interval set");

        tokio::time::sleep(Duration::from_millis(70)).await;
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        let after_stop = calls.load(Ordering::SeqCst);
        assert!(after_stop >= 2, "expected periodic refetches, got {after_stop}");

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), after_stop);
    }

    #[tokio::test]
    async fn no_interval_means_no_periodic_task() {
        let query = Arc::new(counting_query(
            Arc::new(AtomicUsize::new(0)),
            QueryOptions::default(),
        ));
        let (_tx, rx) = watch::channel(false);
        assert!(Arc::clone(&query).spawn_periodic(rx).is_none());
    }
}
