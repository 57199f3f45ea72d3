//! Prometheus collector for New Relic metrics.
//!
//! [`Exporter`] mirrors the two-method collector protocol: `describe` lists
//! every known series, `collect` runs a full scrape cycle and returns the
//! gathered families. Both take the same lock, so at most one scrape runs at a
//! time and concurrent scrape requests queue behind it.

pub mod scrape;

use ahash::AHashMap as HashMap;
use chrono::Utc;
use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{Counter, Gauge, GaugeVec, Opts, Registry};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use crate::api::NewRelicApi;
use crate::cache::CatalogCache;
use crate::config::Config;
use scrape::{Sample, ScrapeHandle, ScrapeWindow, Scraper};

/// Prefix of every exported metric.
pub const NAMESPACE: &str = "newrelic";

/// Labels of every New Relic series.
pub const SERIES_LABELS: [&str; 2] = ["app", "component"];

/// Exporter self-metrics, shared between the collector and the scraper.
#[derive(Clone)]
pub struct Housekeeping {
    pub duration: Gauge,
    pub total_scrapes: Counter,
    pub error: Gauge,
}

impl Housekeeping {
    pub fn new() -> prometheus::Result<Self> {
        Ok(Self {
            duration: Gauge::with_opts(
                Opts::new("exporter_last_scrape_duration_seconds", "The last scrape duration.")
                    .namespace(NAMESPACE),
            )?,
            total_scrapes: Counter::with_opts(
                Opts::new("exporter_scrapes_total", "Total New Relic scrapes.").namespace(NAMESPACE),
            )?,
            error: Gauge::with_opts(
                Opts::new("exporter_last_scrape_error", "The last scrape error status.")
                    .namespace(NAMESPACE),
            )?,
        })
    }

    fn register(&self, registry: &Registry) -> prometheus::Result<()> {
        registry.register(Box::new(self.duration.clone()))?;
        registry.register(Box::new(self.total_scrapes.clone()))?;
        registry.register(Box::new(self.error.clone()))?;
        Ok(())
    }

    fn descs(&self) -> Vec<Desc> {
        [
            self.duration.desc(),
            self.total_scrapes.desc(),
            self.error.desc(),
        ]
        .into_iter()
        .flatten()
        .cloned()
        .collect()
    }
}

/// Maps an upstream value name onto the Prometheus metric-name charset.
pub fn sanitize_metric_name(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == ':' { c } else { '_' })
        .collect();
    if out.is_empty() || out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

/// Lazily grown set of labeled gauges, one per metric name. Never shrinks.
struct SeriesRegistry {
    registry: Registry,
    series: HashMap<String, GaugeVec>,
}

impl SeriesRegistry {
    fn observe(&mut self, sample: &Sample) -> prometheus::Result<()> {
        let fq_name = format!("{}_{}", NAMESPACE, sanitize_metric_name(&sample.name));

        if !self.series.contains_key(&fq_name) {
            let vec = GaugeVec::new(
                Opts::new(fq_name.clone(), format!("New Relic metric {}", sample.name)),
                &SERIES_LABELS,
            )?;
            self.registry.register(Box::new(vec.clone()))?;
            debug!("Created series {}", fq_name);
            self.series.insert(fq_name.clone(), vec);
        }

        if let Some(vec) = self.series.get(&fq_name) {
            vec.with_label_values(&[sample.app.as_str(), sample.component.as_str()])
                .set(sample.value);
        }
        Ok(())
    }

    /// Folds every sample of a cycle into the registry.
    async fn drain(&mut self, handle: &mut ScrapeHandle) -> usize {
        let mut received = 0;
        while let Some(sample) = handle.recv().await {
            received += 1;
            if let Err(e) = self.observe(&sample) {
                warn!("Skipping sample {} for app {}: {}", sample.name, sample.app, e);
            }
        }
        received
    }
}

/// The collection point exposed to the HTTP layer.
pub struct Exporter {
    series: Mutex<SeriesRegistry>,
    scraper: Arc<Scraper>,
    cache: Arc<CatalogCache>,
    housekeeping: Housekeeping,
    scrape_timeout: Option<Duration>,
}

impl Exporter {
    /// Creates an exporter with its own catalog cache and registry.
    pub fn new(config: &Config, api: NewRelicApi) -> prometheus::Result<Self> {
        let housekeeping = Housekeeping::new()?;
        let registry = Registry::new();
        housekeeping.register(&registry)?;

        let cache = Arc::new(CatalogCache::new(config));
        let scraper = Arc::new(Scraper::new(
            api,
            Arc::clone(&cache),
            config.value_filters().to_vec(),
            housekeeping.clone(),
        ));

        Ok(Self {
            series: Mutex::new(SeriesRegistry {
                registry,
                series: HashMap::new(),
            }),
            scraper,
            cache,
            housekeeping,
            scrape_timeout: config.scrape_timeout,
        })
    }

    pub fn cache(&self) -> &Arc<CatalogCache> {
        &self.cache
    }

    /// Descriptors of every known series plus the housekeeping metrics.
    pub async fn describe(&self) -> Vec<Desc> {
        let series = self.series.lock().await;
        let mut descs: Vec<Desc> = series
            .series
            .values()
            .flat_map(|vec| vec.desc().into_iter().cloned())
            .collect();
        descs.extend(self.housekeeping.descs());
        descs
    }

    /// Runs one scrape cycle and returns every family.
    ///
    /// Never fails: upstream problems show up as
    /// `newrelic_exporter_last_scrape_error 1` next to the last known values.
    #[instrument(skip(self))]
    pub async fn collect(&self) -> Vec<MetricFamily> {
        let mut series = self.series.lock().await;

        let window = ScrapeWindow::preceding_minute(Utc::now());
        let started = Instant::now();
        let mut handle = self.scraper.start(window);

        let received = match self.scrape_timeout {
            Some(limit) => match tokio::time::timeout(limit, series.drain(&mut handle)).await {
                Ok(received) => Some(received),
                Err(_) => {
                    warn!("Scrape exceeded {:?}, aborting in-flight requests", limit);
                    None
                }
            },
            None => Some(series.drain(&mut handle).await),
        };

        match received {
            Some(received) => match handle.join().await {
                Some(report) => debug!(
                    "Received {} samples from {} applications ({} failed, error: {})",
                    received, report.applications, report.failed_applications, report.had_error
                ),
                None => self.housekeeping.error.set(1.0),
            },
            None => {
                handle.abort();
                self.housekeeping.error.set(1.0);
                self.housekeeping.duration.set(started.elapsed().as_secs_f64());
            }
        }

        series.registry.gather()
    }

    /// Number of New Relic series created so far.
    pub async fn series_count(&self) -> usize {
        self.series.lock().await.series.len()
    }
}
