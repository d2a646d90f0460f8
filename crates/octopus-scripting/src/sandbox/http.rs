//! `http` module
//!
//! Script functions are synchronous, so outbound requests run on the ambient
//! tokio runtime via `block_in_place`, or on a throwaway current-thread
//! runtime when none is running.

use super::url::build_query_string;
use super::{finish, FnResult};
use crate::marshal;
use rhai::{Dynamic, Map, Module, INT};
use std::future::Future;
use std::time::Duration;
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::{debug, warn};

const METHODS: &[(&str, &str)] = &[
    ("get", "GET"),
    ("post", "POST"),
    ("put", "PUT"),
    ("patch", "PATCH"),
    ("delete", "DELETE"),
    ("head", "HEAD"),
];

pub(super) fn module(default_timeout: Duration) -> Module {
    let client = reqwest::Client::new();
    let mut module = Module::new();

    for (name, method) in METHODS {
        let method = *method;

        let c = client.clone();
        module.set_native_fn(*name, move |url: &str| -> FnResult<Map> {
            perform(&c, default_timeout, method, url, &Map::new())
        });

        let c = client.clone();
        module.set_native_fn(*name, move |url: &str, opts: Map| -> FnResult<Map> {
            perform(&c, default_timeout, method, url, &opts)
        });
    }

    let c = client.clone();
    module.set_native_fn("request", move |method: &str, url: &str| -> FnResult<Map> {
        perform(&c, default_timeout, method, url, &Map::new())
    });
    module.set_native_fn(
        "request",
        move |method: &str, url: &str, opts: Map| -> FnResult<Map> {
            perform(&client, default_timeout, method, url, &opts)
        },
    );

    finish(module)
}

/// Outbound request assembled from script options
#[derive(Debug)]
struct OutboundRequest {
    method: reqwest::Method,
    url: String,
    headers: Vec<(String, String)>,
    body: Option<String>,
    timeout: Duration,
}

impl OutboundRequest {
    /// Read `headers`, `body`, `query` and `timeout` (milliseconds) from `opts`
    fn new(method: &str, url: &str, opts: &Map, default_timeout: Duration) -> FnResult<Self> {
        let method = reqwest::Method::from_bytes(method.to_ascii_uppercase().as_bytes())
            .map_err(|_| format!("invalid http method '{method}'"))?;

        let mut url = url.to_string();
        let query = match opts.get("query") {
            Some(q) if q.is_map() => q
                .read_lock::<Map>()
                .map(|q| build_query_string(&q))
                .unwrap_or_default(),
            Some(q) => marshal::display_string(q).unwrap_or_default(),
            None => String::new(),
        };
        if !query.is_empty() {
            url.push(if url.contains('?') { '&' } else { '?' });
            url.push_str(&query);
        }

        let headers = opts
            .get("headers")
            .and_then(|h| h.read_lock::<Map>())
            .map(|h| {
                h.iter()
                    .filter_map(|(k, v)| Some((k.to_string(), marshal::display_string(v)?)))
                    .collect()
            })
            .unwrap_or_default();

        let body = opts.get("body").and_then(marshal::display_string);

        let timeout = opts
            .get("timeout")
            .and_then(marshal::as_number)
            .filter(|ms| *ms > 0)
            .map(|ms| Duration::from_millis(ms as u64))
            .unwrap_or(default_timeout);

        Ok(Self {
            method,
            url,
            headers,
            body,
            timeout,
        })
    }

    async fn send(self, client: reqwest::Client) -> Result<Map, reqwest::Error> {
        let mut builder = client
            .request(self.method, &self.url)
            .timeout(self.timeout);
        for (name, value) in &self.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = self.body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let url = response.url().to_string();

        let mut headers = Map::new();
        for name in response.headers().keys() {
            let joined = response
                .headers()
                .get_all(name)
                .iter()
                .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
                .collect::<Vec<_>>()
                .join(", ");
            headers.insert(name.as_str().into(), joined.into());
        }

        let body = response.text().await?;

        let mut out = Map::new();
        out.insert("status_code".into(), Dynamic::from(status as INT));
        out.insert("body_size".into(), Dynamic::from(body.len() as INT));
        out.insert("body".into(), body.into());
        out.insert("headers".into(), Dynamic::from_map(headers));
        out.insert("url".into(), url.into());
        Ok(out)
    }
}

fn perform(
    client: &reqwest::Client,
    default_timeout: Duration,
    method: &str,
    url: &str,
    opts: &Map,
) -> FnResult<Map> {
    let request = OutboundRequest::new(method, url, opts, default_timeout)?;
    debug!(method = %request.method, url = %request.url, "Script http request");

    let response = block_on(request.send(client.clone()))?;
    response.map_err(|e| {
        warn!(url, error = %e, "Script http request failed");
        format!("http request to '{url}' failed: {e}").into()
    })
}

/// Drive a future to completion from synchronous script code
fn block_on<F: Future>(future: F) -> FnResult<F::Output> {
    match Handle::try_current() {
        Ok(handle) => match handle.runtime_flavor() {
            RuntimeFlavor::CurrentThread => {
                Err("http module needs a multi-threaded runtime".into())
            }
            _ => Ok(tokio::task::block_in_place(|| handle.block_on(future))),
        },
        Err(_) => {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(|e| format!("cannot start http runtime: {e}"))?;
            Ok(runtime.block_on(future))
        }
    }
}
