//! Shared helpers for integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use newrelic_exporter::{ApiError, Config, NewRelicApi, Pages, Transport};
use reqwest::StatusCode;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const APP_ID: u64 = 9045822;
pub const APPLICATIONS_PATH: &str = "/v2/applications.json";
pub const METRIC_NAMES_PATH: &str = "/v2/applications/9045822/metrics.json";
pub const METRIC_DATA_PATH: &str = "/v2/applications/9045822/metrics/data.json";

pub type Query = Vec<(String, String)>;
type Responder = Arc<dyn Fn(&[(String, String)]) -> Result<Vec<u8>, ApiError> + Send + Sync>;

/// Reads a file from `tests/fixtures`.
pub fn fixture(name: &str) -> Vec<u8> {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name);
    std::fs::read(&path).unwrap_or_else(|e| panic!("fixture {}: {}", path.display(), e))
}

/// Both metric-name pages concatenated, as the paginating transport returns them.
pub fn metric_names_body() -> Vec<u8> {
    let mut body = fixture("metric_names.json");
    body.extend_from_slice(&fixture("metric_names_2.json"));
    body
}

pub fn unavailable(path: &str) -> ApiError {
    ApiError::Status {
        status: StatusCode::SERVICE_UNAVAILABLE,
        url: format!("https://api.newrelic.com{}", path),
    }
}

/// In-memory transport keyed by request path.
///
/// Records every request, can be switched to failing or rate-limited per path
/// and can delay responses to simulate a slow upstream.
#[derive(Default)]
pub struct StubTransport {
    routes: Mutex<HashMap<String, Responder>>,
    failing: Mutex<HashMap<String, bool>>,
    rate_limited: Mutex<HashMap<String, bool>>,
    delays: Mutex<HashMap<String, Duration>>,
    calls: Mutex<Vec<(String, Query)>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl StubTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A transport serving the recorded fixtures for the test application.
    pub fn with_fixtures() -> Arc<Self> {
        let stub = Self::new();
        stub.route(APPLICATIONS_PATH, fixture("application_list.json"));
        stub.route(METRIC_NAMES_PATH, metric_names_body());
        stub.route(METRIC_DATA_PATH, fixture("metric_data.json"));
        stub
    }

    pub fn route(&self, path: &str, body: Vec<u8>) {
        self.respond(path, move |_| Ok(body.clone()));
    }

    pub fn respond<F>(&self, path: &str, responder: F)
    where
        F: Fn(&[(String, String)]) -> Result<Vec<u8>, ApiError> + Send + Sync + 'static,
    {
        self.routes
            .lock()
            .unwrap()
            .insert(path.to_string(), Arc::new(responder));
    }

    pub fn set_failing(&self, path: &str, failing: bool) {
        self.failing
            .lock()
            .unwrap()
            .insert(path.to_string(), failing);
    }

    /// Answers like a walk that hit HTTP 429 on its first page.
    pub fn set_rate_limited(&self, path: &str, rate_limited: bool) {
        self.rate_limited
            .lock()
            .unwrap()
            .insert(path.to_string(), rate_limited);
    }

    pub fn set_delay(&self, path: &str, delay: Duration) {
        self.delays.lock().unwrap().insert(path.to_string(), delay);
    }

    pub fn calls(&self) -> Vec<(String, Query)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, path: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _)| p == path)
            .count()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for StubTransport {
    async fn request(&self, path: &str, query: &[(String, String)]) -> Result<Pages, ApiError> {
        self.calls
            .lock()
            .unwrap()
            .push((path.to_string(), query.to_vec()));

        let active = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(active, Ordering::SeqCst);

        let delay = self.delays.lock().unwrap().get(path).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let failing = self
            .failing
            .lock()
            .unwrap()
            .get(path)
            .copied()
            .unwrap_or(false);
        if failing {
            return Err(unavailable(path));
        }

        let rate_limited = self
            .rate_limited
            .lock()
            .unwrap()
            .get(path)
            .copied()
            .unwrap_or(false);
        if rate_limited {
            return Ok(Pages {
                body: Vec::new(),
                rate_limited: true,
            });
        }

        let responder = self.routes.lock().unwrap().get(path).cloned();
        match responder {
            Some(responder) => responder(query).map(Pages::complete),
            None => Err(ApiError::Status {
                status: StatusCode::NOT_FOUND,
                url: path.to_string(),
            }),
        }
    }
}

pub fn api(stub: &Arc<StubTransport>) -> NewRelicApi {
    NewRelicApi::new(Arc::clone(stub) as Arc<dyn Transport>, "applications", 60)
}

/// A valid configuration for the fixture application.
pub fn config() -> Config {
    Config {
        api_key: Some("0123456789abcdef".to_string()),
        metric_filters: Some(vec!["Datastore/statement/JDBC/messages".to_string()]),
        ..Config::default()
    }
}

/// Values of `query` for `key`, in order.
pub fn params<'a>(query: &'a [(String, String)], key: &str) -> Vec<&'a str> {
    query
        .iter()
        .filter(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
        .collect()
}
