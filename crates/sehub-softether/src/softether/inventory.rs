//! Short-TTL inventory cache over broker + parser results.
//!
//! Each record kind has its own slot. A fresh entry is served without
//! touching the broker; a stale or missing entry triggers exactly one
//! refresh, and callers arriving during that refresh await the same
//! shared future instead of queueing duplicate `vpncmd` calls.
//! Invalidation detaches any refresh already running: its result is
//! still handed to the callers that joined it but never written back.

use crate::softether::broker::CommandBroker;
use crate::softether::parser;
use crate::softether::types::*;
use futures::future::{BoxFuture, FutureExt, Shared};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

/// Listing kinds held by the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InventoryKind {
    Accounts,
    Sessions,
    AccessRules,
}

impl InventoryKind {
    /// `vpncmd` command that lists this kind.
    pub fn command(self) -> &'static str {
        match self {
            Self::Accounts => "UserList",
            Self::Sessions => "SessionList",
            Self::AccessRules => "AccessList",
        }
    }
}

/// Value served from the cache, possibly stale after a failed refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot<T> {
    pub value: T,
    pub stale: bool,
    /// The refresh failure that forced a stale answer.
    pub error: Option<SoftEtherError>,
}

// ── Slot ────────────────────────────────────────────────────────────

type SharedFetch<T> = Shared<BoxFuture<'static, Result<T, SoftEtherError>>>;

struct CacheEntry<T> {
    value: T,
    fetched_at: Instant,
}

struct CacheSlot<T> {
    entry: Arc<RwLock<Option<CacheEntry<T>>>>,
    in_flight: Mutex<Option<(u64, SharedFetch<T>)>>,
    generation: AtomicU64,
    // Bumped by every invalidation.
    epoch: Arc<AtomicU64>,
    refreshes: AtomicU64,
}

impl<T> CacheSlot<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn new() -> Self {
        Self {
            entry: Arc::new(RwLock::new(None)),
            in_flight: Mutex::new(None),
            generation: AtomicU64::new(0),
            epoch: Arc::new(AtomicU64::new(0)),
            refreshes: AtomicU64::new(0),
        }
    }

    async fn fresh(&self, ttl: Duration) -> Option<T> {
        let entry = self.entry.read().await;
        entry
            .as_ref()
            .filter(|e| e.fetched_at.elapsed() < ttl)
            .map(|e| e.value.clone())
    }

    async fn last_known(&self) -> Option<T> {
        self.entry.read().await.as_ref().map(|e| e.value.clone())
    }

    async fn invalidate(&self) {
        let mut in_flight = self.in_flight.lock().await;
        let mut entry = self.entry.write().await;
        self.epoch.fetch_add(1, Ordering::SeqCst);
        *entry = None;
        *in_flight = None;
    }

    async fn get<F>(&self, ttl: Duration, fetch: F) -> Result<T, SoftEtherError>
    where
        F: FnOnce() -> BoxFuture<'static, Result<T, SoftEtherError>>,
    {
        if let Some(value) = self.fresh(ttl).await {
            return Ok(value);
        }

        let (generation, shared) = {
            let mut in_flight = self.in_flight.lock().await;
            match in_flight.as_ref() {
                Some((generation, shared)) => (*generation, shared.clone()),
                None => {
                    // A refresh may have landed between the first check and the lock.
                    if let Some(value) = self.fresh(ttl).await {
                        return Ok(value);
                    }
                    let generation = self.generation.fetch_add(1, Ordering::SeqCst);
                    self.refreshes.fetch_add(1, Ordering::SeqCst);
                    let entry = self.entry.clone();
                    let epoch = self.epoch.clone();
                    let started_in = epoch.load(Ordering::SeqCst);
                    let source = fetch();
                    let shared = async move {
                        let result = source.await;
                        if let Ok(ref value) = result {
                            let mut entry = entry.write().await;
                            if epoch.load(Ordering::SeqCst) == started_in {
                                *entry = Some(CacheEntry {
                                    value: value.clone(),
                                    fetched_at: Instant::now(),
                                });
                            } else {
                                debug!("Discarding refresh that started before an invalidation");
                            }
                        }
                        result
                    }
                    .boxed()
                    .shared();
                    *in_flight = Some((generation, shared.clone()));
                    (generation, shared)
                }
            }
        };

        let result = shared.await;

        let mut in_flight = self.in_flight.lock().await;
        if matches!(in_flight.as_ref(), Some((g, _)) if *g == generation) {
            *in_flight = None;
        }
        result
    }
}

// ── Cache ───────────────────────────────────────────────────────────

/// Cached accounts, sessions, and access rules.
pub struct InventoryCache {
    broker: CommandBroker,
    ttl: Duration,
    accounts: CacheSlot<Vec<Account>>,
    sessions: CacheSlot<Vec<Session>>,
    access_rules: CacheSlot<Vec<AccessRule>>,
}

impl InventoryCache {
    pub fn new(broker: CommandBroker, ttl: Duration) -> Self {
        Self {
            broker,
            ttl,
            accounts: CacheSlot::new(),
            sessions: CacheSlot::new(),
            access_rules: CacheSlot::new(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn fetcher<T, P>(&self, kind: InventoryKind, parse: P) -> impl FnOnce() -> BoxFuture<'static, Result<T, SoftEtherError>>
    where
        T: Send + 'static,
        P: Fn(&str) -> T + Send + 'static,
    {
        let broker = self.broker.clone();
        move || {
            async move {
                debug!("Refreshing {:?} inventory", kind);
                let raw = broker.run(kind.command(), &[] as &[&str]).await?;
                Ok::<T, SoftEtherError>(parse(&raw))
            }
            .boxed()
        }
    }

    pub async fn accounts(&self) -> Result<Vec<Account>, SoftEtherError> {
        let fetch = self.fetcher(InventoryKind::Accounts, parser::parse_accounts);
        self.accounts.get(self.ttl, fetch).await
    }

    pub async fn sessions(&self) -> Result<Vec<Session>, SoftEtherError> {
        let fetch = self.fetcher(InventoryKind::Sessions, parser::parse_sessions);
        self.sessions.get(self.ttl, fetch).await
    }

    pub async fn access_rules(&self) -> Result<Vec<AccessRule>, SoftEtherError> {
        let fetch = self.fetcher(InventoryKind::AccessRules, parser::parse_access_rules);
        self.access_rules.get(self.ttl, fetch).await
    }

    /// Like [`sessions`](Self::sessions) but falls back to the last good
    /// value when a refresh fails.
    pub async fn sessions_or_stale(&self) -> Result<Snapshot<Vec<Session>>, SoftEtherError> {
        let result = self.sessions().await;
        with_stale_fallback(result, self.sessions.last_known().await, InventoryKind::Sessions)
    }

    pub async fn accounts_or_stale(&self) -> Result<Snapshot<Vec<Account>>, SoftEtherError> {
        let result = self.accounts().await;
        with_stale_fallback(result, self.accounts.last_known().await, InventoryKind::Accounts)
    }

    /// Drop a cached listing so the next read refetches it.
    pub async fn invalidate(&self, kind: InventoryKind) {
        match kind {
            InventoryKind::Accounts => self.accounts.invalidate().await,
            InventoryKind::Sessions => self.sessions.invalidate().await,
            InventoryKind::AccessRules => self.access_rules.invalidate().await,
        }
    }

    /// Number of refreshes started for a kind.
    pub fn refresh_count(&self, kind: InventoryKind) -> u64 {
        let slot_count = match kind {
            InventoryKind::Accounts => &self.accounts.refreshes,
            InventoryKind::Sessions => &self.sessions.refreshes,
            InventoryKind::AccessRules => &self.access_rules.refreshes,
        };
        slot_count.load(Ordering::SeqCst)
    }
}

fn with_stale_fallback<T>(
    result: Result<T, SoftEtherError>,
    last_known: Option<T>,
    kind: InventoryKind,
) -> Result<Snapshot<T>, SoftEtherError> {
    match (result, last_known) {
        (Ok(value), _) => Ok(Snapshot {
            value,
            stale: false,
            error: None,
        }),
        (Err(e), Some(value)) => {
            warn!("{:?} refresh failed, serving last known value: {}", kind, e);
            Ok(Snapshot {
                value,
                stale: true,
                error: Some(e),
            })
        }
        (Err(e), None) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::softether::exec::CommandRunner;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex as StdMutex;

    struct CountingRunner {
        calls: AtomicUsize,
        replies: StdMutex<VecDeque<CommandOutput>>,
        fallback: String,
    }

    impl CountingRunner {
        fn new(fallback: &str, replies: Vec<CommandOutput>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                replies: StdMutex::new(replies.into()),
                fallback: fallback.to_string(),
            })
        }
    }

    #[async_trait]
    impl CommandRunner for CountingRunner {
        async fn run(&self, _invocation: &Invocation) -> Result<CommandOutput, SoftEtherError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            let next = self.replies.lock().unwrap().pop_front();
            Ok(next.unwrap_or_else(|| CommandOutput::success(self.fallback.clone())))
        }
    }

    fn cache_with(runner: Arc<CountingRunner>, ttl_ms: u64) -> Arc<InventoryCache> {
        let broker = CommandBroker::spawn(runner, RetryPolicy::none());
        Arc::new(InventoryCache::new(broker, Duration::from_millis(ttl_ms)))
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_misses_share_one_fetch() {
        let runner = CountingRunner::new("User Name|alice\n", vec![]);
        let cache = cache_with(runner.clone(), 5_000);

        let mut handles = Vec::new();
        for _ in 0..6 {
            let c = cache.clone();
            handles.push(tokio::spawn(async move { c.accounts().await }));
        }
        for h in handles {
            let accounts = h.await.unwrap().unwrap();
            assert_eq!(accounts[0].name, "alice");
        }

        assert_eq!(runner.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.refresh_count(InventoryKind::Accounts), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn entry_expires_after_ttl() {
        let runner = CountingRunner::new("User Name|alice\n", vec![]);
        let cache = cache_with(runner.clone(), 1_000);

        cache.accounts().await.unwrap();
        tokio::time::advance(Duration::from_millis(500)).await;
        cache.accounts().await.unwrap();
        assert_eq!(runner.calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_millis(600)).await;
        cache.accounts().await.unwrap();
        assert_eq!(runner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn kinds_are_cached_independently() {
        let runner = CountingRunner::new("", vec![]);
        let cache = cache_with(runner.clone(), 5_000);

        cache.accounts().await.unwrap();
        cache.sessions().await.unwrap();
        cache.access_rules().await.unwrap();
        cache.sessions().await.unwrap();
        assert_eq!(runner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn invalidate_forces_refetch() {
        let runner = CountingRunner::new("User Name|alice\n", vec![]);
        let cache = cache_with(runner.clone(), 5_000);

        cache.accounts().await.unwrap();
        cache.invalidate(InventoryKind::Accounts).await;
        cache.accounts().await.unwrap();
        assert_eq!(runner.calls.load(Ordering::SeqCst), 2);
    }

    fn spawn_listing(cache: &Arc<InventoryCache>) -> tokio::task::JoinHandle<Vec<String>> {
        let c = cache.clone();
        tokio::spawn(async move { c.accounts().await.unwrap().into_iter().map(|a| a.name).collect() })
    }

    async fn wait_for_call(runner: &CountingRunner) {
        while runner.calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_started_before_invalidate_is_not_cached() {
        let runner = CountingRunner::new(
            "User Name|alice\n",
            vec![CommandOutput::success("User Name|alice\nUser Name|bob\n")],
        );
        let cache = cache_with(runner.clone(), 5_000);

        let before = spawn_listing(&cache);
        wait_for_call(&runner).await;
        cache.invalidate(InventoryKind::Accounts).await;
        assert_eq!(before.await.unwrap(), vec!["alice", "bob"]);

        let names: Vec<String> = cache.accounts().await.unwrap().into_iter().map(|a| a.name).collect();
        assert_eq!(names, vec!["alice"]);
        assert_eq!(runner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn callers_after_invalidate_start_a_new_refresh() {
        let runner = CountingRunner::new(
            "User Name|alice\n",
            vec![CommandOutput::success("User Name|alice\nUser Name|bob\n")],
        );
        let cache = cache_with(runner.clone(), 5_000);

        let before = spawn_listing(&cache);
        wait_for_call(&runner).await;
        cache.invalidate(InventoryKind::Accounts).await;
        let after = spawn_listing(&cache);

        assert_eq!(before.await.unwrap(), vec!["alice", "bob"]);
        assert_eq!(after.await.unwrap(), vec!["alice"]);
        assert_eq!(cache.refresh_count(InventoryKind::Accounts), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_refresh_serves_stale_only_when_asked() {
        let runner = CountingRunner::new(
            "",
            vec![
                CommandOutput::success("Session Name|SID-A\nUser Name|alice\n"),
                CommandOutput::failure(1, "Error occurred. (Error code: 1)", ""),
                CommandOutput::failure(1, "Error occurred. (Error code: 1)", ""),
            ],
        );
        let cache = cache_with(runner.clone(), 100);

        let first = cache.sessions_or_stale().await.unwrap();
        assert!(!first.stale);

        tokio::time::advance(Duration::from_millis(200)).await;
        let stale = cache.sessions_or_stale().await.unwrap();
        assert!(stale.stale);
        assert_eq!(stale.value[0].name, "SID-A");
        assert!(stale.error.is_some());

        let strict = cache.sessions().await;
        assert!(strict.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn failure_without_history_propagates() {
        let runner = CountingRunner::new(
            "",
            vec![CommandOutput::failure(1, "Error occurred. (Error code: 1)", "")],
        );
        let cache = cache_with(runner, 100);
        assert!(cache.accounts_or_stale().await.is_err());
    }
}
