//! Response synthesis from script maps
//!
//! `ctx.serve(#{ status_code: 403, header: #{ "X-Reason": "denied" }, body: "no" })`
//! builds a fresh response and hands it to the filter context, which
//! short-circuits the rest of the request path.

use crate::marshal;
use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::{Response, StatusCode};
use octopus_core::{Body, FilterContext};
use rhai::{Dynamic, Map};
use std::sync::Arc;
use tracing::{debug, warn};

/// Returned to scripts when `serve` gets something other than a map
pub const INVALID_SERVE_ARGUMENT: &str = "invalid type, need a map";

/// Builds and serves responses described by scripts
#[derive(Debug, Clone)]
pub struct ResponseSynthesizer {
    filter: Arc<dyn FilterContext>,
}

impl ResponseSynthesizer {
    pub(crate) fn new(filter: Arc<dyn FilterContext>) -> Self {
        Self { filter }
    }

    /// Serve the response described by `spec`
    ///
    /// Returns `()` once served, or an error message string when `spec` is
    /// not a map. The filter context is untouched in the latter case.
    pub fn serve(&self, spec: &Dynamic) -> Dynamic {
        let Some(map) = spec.read_lock::<Map>() else {
            debug!(got = spec.type_name(), "serve called without a map");
            return Dynamic::from(INVALID_SERVE_ARGUMENT.to_string());
        };
        let response = synthesize(&map);
        debug!(status = %response.status(), "Serving script response");
        self.filter.serve(response);
        Dynamic::UNIT
    }
}

/// Build a response from a script map
///
/// `status_code` defaults to 200 when absent or out of range. `header` entries
/// are set one value per name on a fresh header map. `body` is written
/// verbatim when a string and as JSON when a map or array.
pub fn synthesize(spec: &Map) -> Response<Body> {
    let status = spec
        .get("status_code")
        .and_then(marshal::as_number)
        .and_then(|code| u16::try_from(code).ok())
        .and_then(|code| StatusCode::from_u16(code).ok())
        .unwrap_or(StatusCode::OK);

    let mut headers = HeaderMap::new();
    if let Some(header) = spec.get("header").and_then(|h| h.read_lock::<Map>()) {
        for (name, value) in header.iter() {
            let Some(value) = marshal::display_string(value) else {
                continue;
            };
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(&value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.insert(name, value);
                }
                _ => warn!(header = %name, "Skipping invalid header in served response"),
            }
        }
    }

    let body = spec
        .get("body")
        .map(marshal::body_bytes)
        .unwrap_or_default();

    let mut response = Response::new(Body::new(body));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}
