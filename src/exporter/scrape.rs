//! One scrape cycle: refresh catalogs, fan out per application, stream samples.

use chrono::{DateTime, DurationRound, SecondsFormat, Utc};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::Housekeeping;
use crate::api::{Application, NewRelicApi};
use crate::cache::CatalogCache;
use crate::fanout::{scatter, CHANNEL_CAPACITY};
use crate::fetcher;

/// Component label of application summary values.
pub const APPLICATION_SUMMARY: &str = "application_summary";
/// Component label of end-user summary values.
pub const END_USER_SUMMARY: &str = "end_user_summary";

/// Time range requested from the metric-data endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrapeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl ScrapeWindow {
    /// The last complete minute before `now`.
    ///
    /// Aligned to minute boundaries so that every scrape within the same
    /// minute asks for the same window.
    pub fn preceding_minute(now: DateTime<Utc>) -> Self {
        let minute = chrono::Duration::minutes(1);
        let end = now.duration_trunc(minute).unwrap_or(now);
        Self {
            start: end - minute,
            end,
        }
    }

    pub fn from_param(&self) -> String {
        self.start.to_rfc3339_opts(SecondsFormat::Secs, true)
    }

    pub fn to_param(&self) -> String {
        self.end.to_rfc3339_opts(SecondsFormat::Secs, true)
    }
}

/// One published value.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub app: String,
    pub name: String,
    pub value: f64,
    pub component: String,
}

/// Summary of a finished cycle.
#[derive(Debug, Clone, Default)]
pub struct ScrapeReport {
    pub applications: usize,
    pub failed_applications: usize,
    pub had_error: bool,
}

/// A running cycle: the sample stream and the coordinator task.
pub struct ScrapeHandle {
    rx: mpsc::Receiver<Sample>,
    task: JoinHandle<ScrapeReport>,
}

impl ScrapeHandle {
    /// Next sample; `None` once every producer of the cycle has returned.
    pub async fn recv(&mut self) -> Option<Sample> {
        self.rx.recv().await
    }

    /// Cancels the coordinator and with it every task it spawned.
    pub fn abort(&self) {
        self.task.abort();
    }

    pub async fn join(self) -> Option<ScrapeReport> {
        drop(self.rx);
        match self.task.await {
            Ok(report) => Some(report),
            Err(e) => {
                error!("Scrape coordinator failed: {}", e);
                None
            }
        }
    }
}

/// Drives scrape cycles against one API and one catalog cache.
pub struct Scraper {
    api: NewRelicApi,
    cache: Arc<CatalogCache>,
    value_filters: Vec<String>,
    housekeeping: Housekeeping,
}

impl Scraper {
    pub fn new(
        api: NewRelicApi,
        cache: Arc<CatalogCache>,
        value_filters: Vec<String>,
        housekeeping: Housekeeping,
    ) -> Self {
        Self {
            api,
            cache,
            value_filters,
            housekeeping,
        }
    }

    /// Starts a cycle for `window` on a fresh channel.
    pub fn start(self: &Arc<Self>, window: ScrapeWindow) -> ScrapeHandle {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let scraper = Arc::clone(self);
        let task = tokio::spawn(async move { scraper.run(window, tx).await });
        ScrapeHandle { rx, task }
    }

    async fn run(self: Arc<Self>, window: ScrapeWindow, tx: mpsc::Sender<Sample>) -> ScrapeReport {
        self.housekeeping.error.set(0.0);
        self.housekeeping.total_scrapes.inc();

        let started = Instant::now();
        info!(
            "Starting new scrape for period from {} to {}",
            window.from_param(),
            window.to_param()
        );

        let apps = self.cache.applications(&self.api).await;
        let mut had_error = apps.refresh_failed;
        if had_error {
            self.flag_error();
        }

        // Summaries come with the inventory and need no further requests.
        for app in apps.value.iter() {
            for sample in summary_samples(app) {
                if tx.send(sample).await.is_err() {
                    debug!("Sample receiver closed, stopping scrape");
                    return ScrapeReport {
                        applications: apps.value.len(),
                        failed_applications: 0,
                        had_error: true,
                    };
                }
            }
        }

        let scraper = Arc::clone(&self);
        let gather = scatter(apps.value.iter().cloned().collect::<Vec<_>>(), move |app, app_tx| {
            let scraper = Arc::clone(&scraper);
            async move { scraper.scrape_application(app, window, app_tx).await }
        });
        let failed_applications = gather.forward(&tx).await;
        drop(tx);

        had_error |= failed_applications > 0;

        let elapsed = started.elapsed();
        self.housekeeping.duration.set(elapsed.as_secs_f64());
        info!("Scrape finished in {:?}", elapsed);

        ScrapeReport {
            applications: apps.value.len(),
            failed_applications,
            had_error,
        }
    }

    /// Refreshes one application's catalog if due, fetches its data and
    /// emits every numeric value. Returns `false` if anything failed.
    async fn scrape_application(
        &self,
        app: Application,
        window: ScrapeWindow,
        tx: mpsc::Sender<Sample>,
    ) -> bool {
        let names = self.cache.metric_names(&self.api, app.id).await;
        let fetched = fetcher::fetch(&self.api, app.id, &names.value, &self.value_filters, window).await;
        info!("Scraped {} metric datas for app {}", fetched.samples.len(), app.id);

        let clean = !names.refresh_failed && fetched.failed_chunks == 0;
        if !clean {
            self.flag_error();
        }

        for metric in fetched.samples {
            for (name, value) in metric.values {
                let sample = Sample {
                    app: app.name.clone(),
                    name,
                    value,
                    component: metric.family.clone(),
                };
                if tx.send(sample).await.is_err() {
                    return false;
                }
            }
        }

        clean
    }

    fn flag_error(&self) {
        self.housekeeping.error.set(1.0);
    }
}

/// Samples carried by the inventory itself.
pub fn summary_samples(app: &Application) -> impl Iterator<Item = Sample> + '_ {
    let app_summary = app
        .app_summary
        .iter()
        .map(move |(name, value)| (name, *value, APPLICATION_SUMMARY));
    let user_summary = app
        .user_summary
        .iter()
        .map(move |(name, value)| (name, *value, END_USER_SUMMARY));

    app_summary
        .chain(user_summary)
        .map(move |(name, value, component)| Sample {
            app: app.name.clone(),
            name: name.clone(),
            value,
            component: component.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn window_is_the_preceding_whole_minute() {
        let now = Utc.with_ymd_and_hms(2026, 10, 15, 12, 34, 56).unwrap();
        let window = ScrapeWindow::preceding_minute(now);

        assert_eq!(window.start, Utc.with_ymd_and_hms(2026, 10, 15, 12, 33, 0).unwrap());
        assert_eq!(window.end, Utc.with_ymd_and_hms(2026, 10, 15, 12, 34, 0).unwrap());
        assert_eq!(window.from_param(), "2026-10-15T12:33:00Z");
        assert_eq!(window.to_param(), "2026-10-15T12:34:00Z");
    }

    #[test]
    fn windows_align_within_a_minute() {
        let early = Utc.with_ymd_and_hms(2026, 10, 15, 12, 34, 1).unwrap();
        let late = Utc.with_ymd_and_hms(2026, 10, 15, 12, 34, 59).unwrap();
        assert_eq!(
            ScrapeWindow::preceding_minute(early),
            ScrapeWindow::preceding_minute(late)
        );
    }

    #[test]
    fn summaries_carry_their_namespace() {
        let mut app = Application::bare(1, "svc");
        app.app_summary.insert("throughput".into(), 54.7);
        app.user_summary.insert("response_time".into(), 4.61);

        let samples: Vec<Sample> = summary_samples(&app).collect();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].component, APPLICATION_SUMMARY);
        assert_eq!(samples[0].name, "throughput");
        assert_eq!(samples[1].component, END_USER_SUMMARY);
        assert_eq!(samples[1].value, 4.61);
        assert!(samples.iter().all(|s| s.app == "svc"));
    }
}
