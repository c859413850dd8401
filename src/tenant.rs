use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{ApiError, StoreError};
use crate::limits::DEFAULT_TENANT_REFRESH;
use crate::model::TenantCacheEntry;
use crate::refresh;
use crate::store::DirectoryStore;

#[derive(Debug)]
pub enum CacheError {
    AlreadyRunning,
    InitialLoad(StoreError),
}

impl std::fmt::Display for CacheError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheError::AlreadyRunning => write!(f, "tenant cache already running"),
            CacheError::InitialLoad(e) => write!(f, "failed to load initial tenant cache: {e}"),
        }
    }
}

impl std::error::Error for CacheError {}

/// Domain-keyed snapshot shared between the cache handle and the refresher.
pub(crate) struct CacheState {
    directory: Arc<dyn DirectoryStore>,
    tenants: RwLock<HashMap<String, TenantCacheEntry>>,
}

impl CacheState {
    /// Full reload. The directory is queried without holding the lock; the
    /// new map then replaces the old one in a single write.
    pub(crate) async fn reload(&self) -> Result<usize, StoreError> {
        let records = self.directory.list_active_tenants().await?;
        let fresh: HashMap<String, TenantCacheEntry> = records
            .iter()
            .map(|r| (r.domain.clone(), r.to_entry()))
            .collect();
        let count = fresh.len();
        let stale = {
            let mut tenants = self.tenants.write().await;
            std::mem::replace(&mut *tenants, fresh)
        };
        drop(stale);
        metrics::gauge!(crate::observability::TENANTS_CACHED).set(count as f64);
        Ok(count)
    }
}

struct Refresher {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Read-through cache over the tenant directory with periodic full refresh.
///
/// `Stopped → Running` on [`start`](Self::start), back on [`stop`](Self::stop).
/// Lookups work in either state; a stopped cache simply never refreshes.
pub struct TenantCache {
    state: Arc<CacheState>,
    interval: Duration,
    refresher: Mutex<Option<Refresher>>,
}

impl TenantCache {
    /// A zero interval falls back to the five-minute default.
    pub fn new(directory: Arc<dyn DirectoryStore>, interval: Duration) -> Self {
        let interval = if interval.is_zero() {
            DEFAULT_TENANT_REFRESH
        } else {
            interval
        };
        Self {
            state: Arc::new(CacheState {
                directory,
                tenants: RwLock::new(HashMap::new()),
            }),
            interval,
            refresher: Mutex::new(None),
        }
    }

    pub fn refresh_interval(&self) -> Duration {
        self.interval
    }

    /// Load every active tenant, then spawn the background refresher.
    /// Fails without spawning anything if the initial load fails.
    pub async fn start(&self) -> Result<usize, CacheError> {
        let mut refresher = self.refresher.lock().await;
        if refresher.is_some() {
            return Err(CacheError::AlreadyRunning);
        }
        let count = self.state.reload().await.map_err(CacheError::InitialLoad)?;

        let (shutdown, rx) = watch::channel(false);
        let handle = tokio::spawn(refresh::run_refresher(self.state.clone(), self.interval, rx));
        *refresher = Some(Refresher { shutdown, handle });

        info!(
            "tenant cache started with {count} tenants, refresh interval {:?}",
            self.interval
        );
        Ok(count)
    }

    /// Stop the refresher and wait for it to exit. Safe to call repeatedly
    /// or on a cache that was never started.
    pub async fn stop(&self) {
        let Some(refresher) = self.refresher.lock().await.take() else {
            return;
        };
        let _ = refresher.shutdown.send(true);
        if let Err(e) = refresher.handle.await {
            warn!("tenant cache refresher ended abnormally: {e}");
        }
        info!("tenant cache stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.refresher.lock().await.is_some()
    }

    /// Reload the whole map now.
    pub async fn refresh(&self) -> Result<usize, StoreError> {
        self.state.reload().await
    }

    /// Resolve a normalized domain. Misses fall through to the directory and
    /// the result is cached; concurrent misses for one domain may each query
    /// the directory.
    pub async fn lookup(&self, domain: &str) -> Result<TenantCacheEntry, ApiError> {
        if let Some(entry) = self.state.tenants.read().await.get(domain) {
            metrics::counter!(crate::observability::TENANT_CACHE_HITS_TOTAL).increment(1);
            return Ok(entry.clone());
        }
        metrics::counter!(crate::observability::TENANT_CACHE_MISSES_TOTAL).increment(1);
        debug!("tenant cache miss for {domain}, querying directory");

        let record = self
            .state
            .directory
            .tenant_by_domain(domain)
            .await
            .map_err(|e| ApiError::Internal(format!("tenant directory lookup failed: {e}")))?
            .ok_or_else(|| ApiError::NotFound(format!("Tenant not found for domain: {domain}")))?;

        let entry = record.to_entry();
        let count = {
            let mut tenants = self.state.tenants.write().await;
            tenants.insert(entry.domain.clone(), entry.clone());
            tenants.len()
        };
        metrics::gauge!(crate::observability::TENANTS_CACHED).set(count as f64);
        info!("added tenant {} ({}) to cache", entry.domain, entry.schema);
        Ok(entry)
    }

    /// Entry count and sorted domain list, from one consistent snapshot.
    pub async fn stats(&self) -> (usize, Vec<String>) {
        let tenants = self.state.tenants.read().await;
        let mut domains: Vec<String> = tenants.keys().cloned().collect();
        domains.sort();
        (tenants.len(), domains)
    }

    /// Every cached entry, from one consistent snapshot.
    pub async fn snapshot(&self) -> Vec<TenantCacheEntry> {
        let tenants = self.state.tenants.read().await;
        let mut entries: Vec<TenantCacheEntry> = tenants.values().cloned().collect();
        entries.sort_by(|a, b| a.domain.cmp(&b.domain));
        entries
    }
}
