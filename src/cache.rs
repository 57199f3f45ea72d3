//! Catalog cache for application inventories and metric-name lists.
//!
//! Both collections are expensive to fetch and change slowly, so they are kept
//! across scrape cycles and refreshed only once their TTL has expired. A failed
//! refresh leaves the previous snapshot and its timestamp in place: the next
//! cycle serves the stale data and retries.

use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info};

use crate::api::{Application, MetricName, NewRelicApi};
use crate::config::Config;
use crate::fanout::scatter;

/// A snapshot plus the time of the last successful refresh.
#[derive(Debug)]
pub struct CacheEntry<T> {
    snapshot: Arc<T>,
    refreshed_at: Option<Instant>,
}

impl<T: Default> Default for CacheEntry<T> {
    fn default() -> Self {
        Self {
            snapshot: Arc::new(T::default()),
            refreshed_at: None,
        }
    }
}

impl<T> CacheEntry<T> {
    /// An entry that has never been refreshed is always due.
    pub fn is_due(&self, ttl: Duration, now: Instant) -> bool {
        self.refreshed_at
            .map_or(true, |at| now.saturating_duration_since(at) >= ttl)
    }

    fn replace(&mut self, snapshot: Arc<T>, now: Instant) {
        self.snapshot = snapshot;
        self.refreshed_at = Some(now);
    }
}

/// Result of a cache lookup.
#[derive(Debug, Clone)]
pub struct Cached<T> {
    pub value: Arc<T>,
    /// A refresh was attempted and failed; `value` is the previous snapshot.
    pub refresh_failed: bool,
}

impl<T> Cached<T> {
    fn hit(value: Arc<T>) -> Self {
        Self {
            value,
            refresh_failed: false,
        }
    }

    fn stale(value: Arc<T>) -> Self {
        Self {
            value,
            refresh_failed: true,
        }
    }
}

/// Application list and per-application metric-name catalogs.
pub struct CatalogCache {
    app_list_ttl: Duration,
    metric_names_ttl: Duration,
    static_apps: Option<Arc<Vec<Application>>>,
    metric_filters: Vec<String>,
    applications: RwLock<CacheEntry<Vec<Application>>>,
    metric_names: DashMap<u64, CacheEntry<Vec<MetricName>>>,
}

impl CatalogCache {
    pub fn new(config: &Config) -> Self {
        let static_apps = config.apps.as_ref().map(|apps| {
            Arc::new(
                apps.iter()
                    .map(|app| Application::bare(app.id, app.name.clone()))
                    .collect(),
            )
        });

        Self {
            app_list_ttl: config.app_list_cache_time(),
            metric_names_ttl: config.metric_names_cache_time(),
            static_apps,
            metric_filters: config.metric_filters().to_vec(),
            applications: RwLock::new(CacheEntry::default()),
            metric_names: DashMap::new(),
        }
    }

    /// Returns the application list, refreshing it first when its TTL expired.
    ///
    /// A statically configured list is returned as-is without any request.
    pub async fn applications(&self, api: &NewRelicApi) -> Cached<Vec<Application>> {
        if let Some(apps) = &self.static_apps {
            return Cached::hit(Arc::clone(apps));
        }

        let (snapshot, due) = {
            let entry = self
                .applications
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            (
                Arc::clone(&entry.snapshot),
                entry.is_due(self.app_list_ttl, Instant::now()),
            )
        };

        if !due {
            debug!("Applications list taken from cache");
            return Cached::hit(snapshot);
        }

        match api.applications().await {
            Ok(apps) => {
                let apps = Arc::new(apps);
                let now = Instant::now();
                self.applications
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .replace(Arc::clone(&apps), now);
                info!("Application list updated with {} applications", apps.len());
                Cached::hit(apps)
            }
            Err(e) => {
                error!("Error getting application list: {}", e);
                Cached::stale(snapshot)
            }
        }
    }

    /// Returns the metric-name catalog of one application, refreshing it
    /// first when its TTL expired.
    ///
    /// One request is issued per configured name filter, concurrently. Without
    /// filters a single unfiltered request is made. The refresh only counts as
    /// successful if every request succeeded.
    pub async fn metric_names(&self, api: &NewRelicApi, app_id: u64) -> Cached<Vec<MetricName>> {
        let (snapshot, due) = match self.metric_names.get(&app_id) {
            Some(entry) => (
                Arc::clone(&entry.snapshot),
                entry.is_due(self.metric_names_ttl, Instant::now()),
            ),
            None => (Arc::new(Vec::new()), true),
        };

        if !due {
            debug!("Metric names for app {} taken from cache", app_id);
            return Cached::hit(snapshot);
        }

        info!(
            "Requesting metric names for application id {} with {} filters",
            app_id,
            self.metric_filters.len()
        );

        let filters: Vec<Option<String>> = if self.metric_filters.is_empty() {
            vec![None]
        } else {
            self.metric_filters.iter().cloned().map(Some).collect()
        };

        let api = api.clone();
        let gather = scatter(filters, move |filter, tx| {
            let api = api.clone();
            async move {
                match api.metric_names(app_id, filter.as_deref()).await {
                    Ok(names) => {
                        for name in names {
                            if tx.send(name).await.is_err() {
                                return false;
                            }
                        }
                        true
                    }
                    Err(e) => {
                        error!(
                            "Error getting metric names for app {} and filter {:?}: {}",
                            app_id, filter, e
                        );
                        false
                    }
                }
            }
        });

        let (names, failed) = gather.collect().await;
        if failed > 0 {
            return Cached::stale(snapshot);
        }

        let names = Arc::new(dedup_by_name(names));
        self.metric_names
            .entry(app_id)
            .or_default()
            .replace(Arc::clone(&names), Instant::now());
        info!("Scraped {} metric names for app {}", names.len(), app_id);
        Cached::hit(names)
    }

    /// Time of the last successful application-list refresh.
    pub fn application_refreshed_at(&self) -> Option<Instant> {
        self.applications
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .refreshed_at
    }

    /// Current application-list snapshot.
    pub fn application_snapshot(&self) -> Arc<Vec<Application>> {
        let entry = self
            .applications
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&entry.snapshot)
    }

    /// Time of the last successful metric-name refresh of one application.
    pub fn metric_names_refreshed_at(&self, app_id: u64) -> Option<Instant> {
        self.metric_names
            .get(&app_id)
            .and_then(|entry| entry.refreshed_at)
    }

    /// Current metric-name snapshot of one application.
    pub fn metric_names_snapshot(&self, app_id: u64) -> Option<Arc<Vec<MetricName>>> {
        self.metric_names
            .get(&app_id)
            .map(|entry| Arc::clone(&entry.snapshot))
    }
}

/// Overlapping filters can return the same family more than once.
fn dedup_by_name(names: Vec<MetricName>) -> Vec<MetricName> {
    let mut seen = HashSet::with_capacity(names.len());
    names
        .into_iter()
        .filter(|name| seen.insert(name.name.clone()))
        .collect()
}
