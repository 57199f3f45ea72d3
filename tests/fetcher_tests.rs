//! Chunked metric-data fetching against a stub transport.

mod common;

use chrono::{TimeZone, Utc};
use common::*;
use newrelic_exporter::api::MetricName;
use newrelic_exporter::exporter::scrape::ScrapeWindow;
use newrelic_exporter::fetcher::{fetch, CHUNK_SIZE};
use serde_json::json;
use std::collections::HashSet;

fn catalog(len: usize) -> Vec<MetricName> {
    (0..len)
        .map(|i| MetricName {
            name: format!("Custom/metric/{}", i),
            value_names: vec!["call_count".to_string(), "average_value".to_string()],
        })
        .collect()
}

fn window() -> ScrapeWindow {
    ScrapeWindow::preceding_minute(Utc.with_ymd_and_hms(2026, 10, 15, 12, 34, 56).unwrap())
}

/// Answers with one family per requested name, `call_count` set to its index.
fn echo_names(query: &[(String, String)]) -> Vec<u8> {
    let metrics: Vec<_> = params(query, "names[]")
        .into_iter()
        .map(|name| {
            let index: f64 = name.rsplit('/').next().unwrap().parse().unwrap();
            json!({
                "name": name,
                "timeslices": [{ "values": { "call_count": index, "average_value": 0.5 } }]
            })
        })
        .collect();
    serde_json::to_vec(&json!({ "metric_data": { "metrics": metrics } })).unwrap()
}

#[tokio::test]
async fn names_are_requested_in_chunks() {
    let stub = StubTransport::new();
    stub.respond(METRIC_DATA_PATH, |q| Ok(echo_names(q)));

    let catalog = catalog(25);
    let fetched = fetch(&api(&stub), APP_ID, &catalog, &[], window()).await;

    assert_eq!(fetched.failed_chunks, 0);
    let calls = stub.calls();
    assert_eq!(calls.len(), 3);
    assert!(calls
        .iter()
        .all(|(_, q)| params(q, "names[]").len() <= CHUNK_SIZE));

    let requested: Vec<&str> = calls
        .iter()
        .flat_map(|(_, q)| params(q, "names[]"))
        .collect();
    let unique: HashSet<&str> = requested.iter().copied().collect();
    assert_eq!(requested.len(), 25);
    assert_eq!(unique.len(), 25);

    let families: HashSet<&str> = fetched.samples.iter().map(|s| s.family.as_str()).collect();
    assert_eq!(fetched.samples.len(), 25);
    assert_eq!(
        families,
        catalog.iter().map(|n| n.name.as_str()).collect::<HashSet<_>>()
    );

    let seventeen = fetched
        .samples
        .iter()
        .find(|s| s.family == "Custom/metric/17")
        .unwrap();
    assert_eq!(seventeen.values["call_count"], 17.0);
}

#[tokio::test]
async fn request_carries_window_and_summary_parameters() {
    let stub = StubTransport::new();
    stub.respond(METRIC_DATA_PATH, |q| Ok(echo_names(q)));

    fetch(&api(&stub), APP_ID, &catalog(3), &[], window()).await;

    let calls = stub.calls();
    assert_eq!(calls.len(), 1);
    let query = &calls[0].1;
    assert_eq!(params(query, "values[]"), vec!["average_value", "call_count"]);
    assert_eq!(params(query, "raw"), vec!["true"]);
    assert_eq!(params(query, "summarize"), vec!["true"]);
    assert_eq!(params(query, "period"), vec!["60"]);
    assert_eq!(params(query, "from"), vec!["2026-10-15T12:33:00Z"]);
    assert_eq!(params(query, "to"), vec!["2026-10-15T12:34:00Z"]);
}

#[tokio::test]
async fn value_filter_replaces_catalog_values() {
    let stub = StubTransport::new();
    stub.respond(METRIC_DATA_PATH, |q| Ok(echo_names(q)));

    let filter = vec!["max_response_time".to_string()];
    fetch(&api(&stub), APP_ID, &catalog(3), &filter, window()).await;

    assert_eq!(params(&stub.calls()[0].1, "values[]"), vec!["max_response_time"]);
}

#[tokio::test]
async fn failed_chunk_is_skipped_and_counted() {
    let stub = StubTransport::new();
    stub.respond(METRIC_DATA_PATH, |q| {
        if params(q, "names[]").contains(&"Custom/metric/7") {
            Err(unavailable(METRIC_DATA_PATH))
        } else {
            Ok(echo_names(q))
        }
    });

    let fetched = fetch(&api(&stub), APP_ID, &catalog(25), &[], window()).await;

    assert_eq!(fetched.failed_chunks, 1);
    assert_eq!(fetched.samples.len(), 15);
    assert!(fetched.samples.iter().all(|s| s.family != "Custom/metric/7"));
}

#[tokio::test]
async fn empty_catalog_makes_no_requests() {
    let stub = StubTransport::new();
    let fetched = fetch(&api(&stub), APP_ID, &[], &[], window()).await;

    assert!(fetched.samples.is_empty());
    assert_eq!(fetched.failed_chunks, 0);
    assert!(stub.calls().is_empty());
}

#[tokio::test]
async fn non_numeric_values_are_dropped() {
    let stub = StubTransport::new();
    stub.route(METRIC_DATA_PATH, fixture("metric_data.json"));

    let names: Vec<MetricName> = ["insert", "update"]
        .iter()
        .map(|op| MetricName {
            name: format!("Datastore/statement/JDBC/messages/{}", op),
            value_names: vec!["call_count".to_string()],
        })
        .collect();
    let fetched = fetch(&api(&stub), APP_ID, &names, &[], window()).await;

    let update = fetched
        .samples
        .iter()
        .find(|s| s.family.ends_with("/update"))
        .unwrap();
    assert_eq!(update.values.len(), 8);
    assert!(!update.values.contains_key("max_response_time"));
    assert_eq!(update.values["call_count"], 7.0);
}

#[tokio::test(start_paused = true)]
async fn chunks_are_requested_concurrently() {
    let stub = StubTransport::new();
    stub.respond(METRIC_DATA_PATH, |q| Ok(echo_names(q)));
    stub.set_delay(METRIC_DATA_PATH, std::time::Duration::from_millis(200));

    let fetched = fetch(&api(&stub), APP_ID, &catalog(25), &[], window()).await;

    assert_eq!(fetched.samples.len(), 25);
    assert_eq!(stub.calls().len(), 3);
    assert_eq!(stub.max_in_flight(), 3);
}

#[tokio::test]
async fn rate_limited_chunk_yields_no_data_this_cycle() {
    let stub = StubTransport::new();
    stub.respond(METRIC_DATA_PATH, |q| Ok(echo_names(q)));
    stub.set_rate_limited(METRIC_DATA_PATH, true);

    let fetched = fetch(&api(&stub), APP_ID, &catalog(5), &[], window()).await;

    assert!(fetched.samples.is_empty());
    assert_eq!(fetched.failed_chunks, 0);
    assert_eq!(stub.calls().len(), 1);
}
