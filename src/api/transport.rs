//! Authenticated HTTP transport with link-header pagination.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, LINK, USER_AGENT};
use reqwest::{Client, Proxy, StatusCode};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use super::pagination::{find_rel, last_page, next_page_query, parse_link_header, Query};
use crate::error::ApiError;

/// User-Agent sent with every request.
pub const USER_AGENT_VALUE: &str = concat!("Prometheus-NewRelic-Exporter/", env!("CARGO_PKG_VERSION"));

/// Header carrying the REST API key.
pub const API_KEY_HEADER: &str = "X-Api-Key";

/// Concatenated bodies of every page read for one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pages {
    pub body: Vec<u8>,
    /// The walk stopped on HTTP 429; `body` holds only the pages before it.
    pub rate_limited: bool,
}

impl Pages {
    pub fn complete(body: Vec<u8>) -> Self {
        Self {
            body,
            rate_limited: false,
        }
    }
}

/// Raw GET access to the upstream API.
///
/// Implementations follow every "next" page and return the concatenated
/// bodies of all pages. A rate-limited response ends the walk early; the pages
/// read so far are returned with [`Pages::rate_limited`] set.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn request(&self, path: &str, query: &[(String, String)]) -> Result<Pages, ApiError>;
}

/// Settings needed to build an [`HttpTransport`].
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub server: String,
    pub api_key: String,
    pub timeout: Duration,
    pub debug_proxy: Option<String>,
}

/// `reqwest`-backed transport.
pub struct HttpTransport {
    client: Client,
    server: Url,
}

impl HttpTransport {
    pub fn new(config: &TransportConfig) -> Result<Self, ApiError> {
        let server = Url::parse(&config.server)?;

        let mut key = HeaderValue::from_str(&config.api_key)
            .map_err(|_| ApiError::InvalidConfig("API key is not a valid header value".into()))?;
        key.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(API_KEY_HEADER, key);
        headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));

        let mut builder = Client::builder()
            .default_headers(headers)
            .timeout(config.timeout);

        if let Some(proxy) = config.debug_proxy.as_deref().filter(|p| !p.is_empty()) {
            warn!(
                "Routing API traffic through debug proxy {} with certificate validation disabled",
                proxy
            );
            builder = builder
                .proxy(Proxy::all(proxy)?)
                .danger_accept_invalid_certs(true);
        }

        Ok(Self {
            client: builder.build()?,
            server,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        let base = self.server.as_str().trim_end_matches('/');
        Ok(Url::parse(&format!("{}{}", base, path))?)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn request(&self, path: &str, query: &[(String, String)]) -> Result<Pages, ApiError> {
        let endpoint = self.endpoint(path)?;
        let mut query: Query = query.to_vec();
        let mut body = Vec::new();
        let mut pages = 0usize;

        loop {
            let mut url = endpoint.clone();
            if !query.is_empty() {
                url.query_pairs_mut().extend_pairs(query.iter());
            }

            debug!("Making API call: {}", url);
            let response = self.client.get(url.clone()).send().await?;
            let status = response.status();

            if status == StatusCode::TOO_MANY_REQUESTS {
                warn!(
                    "API limit exceeded for {} after {} page(s), keeping what was read",
                    path, pages
                );
                return Ok(Pages {
                    body,
                    rate_limited: true,
                });
            }
            if status != StatusCode::OK {
                return Err(ApiError::Status {
                    status,
                    url: url.to_string(),
                });
            }

            let link = response
                .headers()
                .get(LINK)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned);

            body.extend_from_slice(&response.bytes().await?);
            pages += 1;

            let Some(link) = link else { break };
            let links = parse_link_header(&link);

            if let Some(last) = last_page(&links) {
                debug!("Found {} pages for {}", last, path);
            }

            let Some(next) = find_rel(&links, "next") else { break };
            match next_page_query(&query, next) {
                Ok(Some(next_query)) if next_query != query => query = next_query,
                Ok(_) => break,
                Err(e) => {
                    warn!("Ignoring malformed 'next' link {:?} for {}: {}", next, path, e);
                    break;
                }
            }
        }

        if pages > 1 {
            info!("Read {} pages from {}", pages, path);
        }

        Ok(Pages::complete(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(server: &str) -> TransportConfig {
        TransportConfig {
            server: server.to_string(),
            api_key: "key".to_string(),
            timeout: Duration::from_secs(1),
            debug_proxy: None,
        }
    }

    #[test]
    fn endpoint_joins_without_double_slash() {
        let transport = HttpTransport::new(&config("https://api.example.com/")).unwrap();
        let url = transport.endpoint("/v2/applications.json").unwrap();
        assert_eq!(url.as_str(), "https://api.example.com/v2/applications.json");
    }

    #[test]
    fn rejects_relative_server() {
        assert!(matches!(
            HttpTransport::new(&config("api.example.com")),
            Err(ApiError::InvalidUrl(_))
        ));
    }

    #[test]
    fn rejects_unprintable_api_key() {
        let mut cfg = config("https://api.example.com");
        cfg.api_key = "bad\nkey".to_string();
        assert!(matches!(
            HttpTransport::new(&cfg),
            Err(ApiError::InvalidConfig(_))
        ));
    }
}
