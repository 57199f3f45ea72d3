//! Chunked metric-data fetching.
//!
//! The metric-data endpoint rejects unbounded name lists, so the names of a
//! catalog are requested in fixed-size chunks, one concurrent request each.

use std::collections::BTreeSet;
use tracing::{debug, error};

use crate::api::{MetricName, MetricSample, NewRelicApi};
use crate::exporter::scrape::ScrapeWindow;
use crate::fanout::scatter;

/// Maximum number of metric names per metric-data request.
pub const CHUNK_SIZE: usize = 10;

/// Samples gathered for one application.
#[derive(Debug, Default)]
pub struct Fetched {
    pub samples: Vec<MetricSample>,
    pub failed_chunks: usize,
}

/// Value names to request: the configured filter if any, otherwise the union
/// of every value name the catalog exposes.
pub fn value_names(catalog: &[MetricName], value_filters: &[String]) -> Vec<String> {
    if !value_filters.is_empty() {
        return value_filters.to_vec();
    }

    catalog
        .iter()
        .flat_map(|name| name.value_names.iter().cloned())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Fetches the values of every family in `catalog` over `window`.
pub async fn fetch(
    api: &NewRelicApi,
    app_id: u64,
    catalog: &[MetricName],
    value_filters: &[String],
    window: ScrapeWindow,
) -> Fetched {
    if catalog.is_empty() {
        debug!("No metric names known for app {}, nothing to fetch", app_id);
        return Fetched::default();
    }

    let values = value_names(catalog, value_filters);
    let chunks: Vec<Vec<String>> = catalog
        .chunks(CHUNK_SIZE)
        .map(|chunk| chunk.iter().map(|name| name.name.clone()).collect())
        .collect();

    debug!(
        "Requesting {} metrics in {} chunks for app {}",
        catalog.len(),
        chunks.len(),
        app_id
    );

    let api = api.clone();
    let gather = scatter(chunks, move |names, tx| {
        let api = api.clone();
        let values = values.clone();
        async move {
            match api.metric_data(app_id, &names, &values, &window).await {
                Ok(data) => {
                    for metric in data {
                        if tx.send(MetricSample::from(metric)).await.is_err() {
                            return false;
                        }
                    }
                    true
                }
                Err(e) => {
                    error!("Error requesting metrics for app {}: {}", app_id, e);
                    false
                }
            }
        }
    });

    let (samples, failed_chunks) = gather.collect().await;
    Fetched {
        samples,
        failed_chunks,
    }
}
