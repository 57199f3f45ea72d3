//! Typed access to the New Relic REST API (v2).
//!
//! This module provides the wire types returned by the application inventory,
//! metric-name catalog and metric-data endpoints, along with [`NewRelicApi`],
//! which turns raw transport bodies into those types.

pub mod pagination;
pub mod transport;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::ApiError;
use crate::exporter::scrape::ScrapeWindow;
pub use transport::{HttpTransport, Pages, Transport, TransportConfig};

/// An application as listed by the inventory endpoint.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Application {
    pub id: u64,
    pub name: String,
    #[serde(rename = "health_status", default = "unknown_health")]
    pub health: String,
    #[serde(rename = "application_summary", default)]
    pub app_summary: BTreeMap<String, f64>,
    #[serde(rename = "end_user_summary", default)]
    pub user_summary: BTreeMap<String, f64>,
}

fn unknown_health() -> String {
    "unknown".to_string()
}

impl Application {
    /// Builds an application with no health or summary data, as used for
    /// statically configured application lists.
    pub fn bare(id: u64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            health: unknown_health(),
            app_summary: BTreeMap::new(),
            user_summary: BTreeMap::new(),
        }
    }
}

/// A queryable metric family and the value fields it exposes.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MetricName {
    pub name: String,
    #[serde(rename = "values", default)]
    pub value_names: Vec<String>,
}

/// One metric family in a metric-data response.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricData {
    pub name: String,
    #[serde(default)]
    pub timeslices: Vec<Timeslice>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Timeslice {
    #[serde(default)]
    pub values: BTreeMap<String, SliceValue>,
}

/// A timeslice value, classified at decode time.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum SliceValue {
    Number(f64),
    Other(serde_json::Value),
}

impl SliceValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            SliceValue::Number(v) => Some(*v),
            SliceValue::Other(_) => None,
        }
    }
}

/// The numeric values of one metric family for one window.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    pub family: String,
    pub values: BTreeMap<String, f64>,
}

impl From<MetricData> for MetricSample {
    /// Keeps the numeric values of the first timeslice. With `summarize=true`
    /// the API returns exactly one.
    fn from(data: MetricData) -> Self {
        let mut values = BTreeMap::new();
        let mut dropped = 0usize;

        if let Some(slice) = data.timeslices.into_iter().next() {
            for (name, value) in slice.values {
                match value.as_number() {
                    Some(v) => {
                        values.insert(name, v);
                    }
                    None => dropped += 1,
                }
            }
        }

        if dropped > 0 {
            debug!("Dropped {} non-numeric values of {}", dropped, data.name);
        }

        Self {
            family: data.name,
            values,
        }
    }
}

#[derive(Deserialize)]
struct ApplicationsPage {
    #[serde(default)]
    applications: Vec<Application>,
}

#[derive(Deserialize)]
struct MetricNamesPage {
    #[serde(default)]
    metrics: Vec<MetricName>,
}

#[derive(Deserialize)]
struct MetricDataPage {
    metric_data: MetricDataBody,
}

#[derive(Deserialize)]
struct MetricDataBody {
    #[serde(default)]
    metrics: Vec<MetricData>,
}

/// Decodes a concatenation of JSON documents, one per page.
pub fn decode_pages<T: DeserializeOwned>(body: &[u8]) -> Result<Vec<T>, serde_json::Error> {
    serde_json::Deserializer::from_slice(body)
        .into_iter::<T>()
        .collect()
}

/// Typed client over a [`Transport`].
#[derive(Clone)]
pub struct NewRelicApi {
    transport: Arc<dyn Transport>,
    service: String,
    period: u64,
}

impl NewRelicApi {
    pub fn new(transport: Arc<dyn Transport>, service: impl Into<String>, period: u64) -> Self {
        Self {
            transport,
            service: service.into(),
            period,
        }
    }

    /// Walks every page of a listing. A listing cut short by the rate limit
    /// is incomplete and must not replace a cached one.
    async fn complete_listing(
        &self,
        path: &str,
        query: &[(String, String)],
    ) -> Result<Vec<u8>, ApiError> {
        let pages = self.transport.request(path, query).await?;
        if pages.rate_limited {
            return Err(ApiError::RateLimited {
                path: path.to_string(),
            });
        }
        Ok(pages.body)
    }

    /// Lists every application of the configured service, across all pages.
    pub async fn applications(&self) -> Result<Vec<Application>, ApiError> {
        info!("Requesting application list");
        let path = format!("/v2/{}.json", self.service);
        let body = self.complete_listing(&path, &[]).await?;

        let applications: Vec<Application> = decode_pages::<ApplicationsPage>(&body)?
            .into_iter()
            .flat_map(|page| page.applications)
            .collect();

        debug!("Found {} applications", applications.len());
        Ok(applications)
    }

    /// Lists the metric names of one application, optionally restricted to
    /// names matching `filter`.
    pub async fn metric_names(&self, app_id: u64, filter: Option<&str>) -> Result<Vec<MetricName>, ApiError> {
        let path = format!("/v2/{}/{}/metrics.json", self.service, app_id);
        let query: Vec<(String, String)> = filter
            .map(|f| vec![("name".to_string(), f.to_string())])
            .unwrap_or_default();

        let body = self.complete_listing(&path, &query).await?;
        let names: Vec<MetricName> = decode_pages::<MetricNamesPage>(&body)?
            .into_iter()
            .flat_map(|page| page.metrics)
            .collect();

        debug!(
            "Found {} metric names for app {} and filter {:?}",
            names.len(),
            app_id,
            filter
        );
        Ok(names)
    }

    /// Requests summarized values of `names` over `window`.
    pub async fn metric_data(
        &self,
        app_id: u64,
        names: &[String],
        value_names: &[String],
        window: &ScrapeWindow,
    ) -> Result<Vec<MetricData>, ApiError> {
        let path = format!("/v2/{}/{}/metrics/data.json", self.service, app_id);

        let mut query: Vec<(String, String)> = Vec::with_capacity(names.len() + value_names.len() + 5);
        query.extend(names.iter().map(|n| ("names[]".to_string(), n.clone())));
        query.extend(value_names.iter().map(|v| ("values[]".to_string(), v.clone())));
        query.push(("raw".to_string(), "true".to_string()));
        query.push(("summarize".to_string(), "true".to_string()));
        query.push(("period".to_string(), self.period.to_string()));
        query.push(("from".to_string(), window.from_param()));
        query.push(("to".to_string(), window.to_param()));

        let pages = self.transport.request(&path, &query).await?;
        if pages.rate_limited {
            debug!("Metric data for app {} cut short by the rate limit", app_id);
        }
        Ok(decode_pages::<MetricDataPage>(&pages.body)?
            .into_iter()
            .flat_map(|page| page.metric_data.metrics)
            .collect())
    }
}
