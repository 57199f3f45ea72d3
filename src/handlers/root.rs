//! Root endpoint handler for the landing page.

use axum::{
    extract::State,
    response::{Html, IntoResponse},
};
use tracing::{debug, instrument};

use crate::state::SharedState;

/// Handler for the root `/` endpoint.
#[instrument(skip(state))]
pub async fn root_handler(State(state): State<SharedState>) -> impl IntoResponse {
    debug!("Processing / request");
    Html(landing_page(&state.telemetry_path))
}

fn landing_page(telemetry_path: &str) -> String {
    format!(
        r#"<html>
<head><title>NewRelic exporter</title></head>
<body>
<h1>NewRelic exporter</h1>
<p>Version {version}</p>
<p><a href='{path}'>Metrics</a></p>
</body>
</html>
"#,
        version = env!("CARGO_PKG_VERSION"),
        path = telemetry_path
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn links_to_telemetry_path() {
        let page = landing_page("/newrelic");
        assert!(page.contains("<a href='/newrelic'>Metrics</a>"));
    }
}
