//! Default filter context over an in-memory HTTP exchange

use crate::filter::FilterContext;
use bytes::Bytes;
use http::{header, Request, Response};
use http_body_util::Full;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;

/// Body type alias
pub type Body = Full<Bytes>;

/// Per-request key/value store shared by the filters of a chain
pub type StateBag = HashMap<String, Box<dyn Any + Send + Sync>>;

/// Client address, attached to requests as an extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteAddr(pub SocketAddr);

/// Request host: the `Host` header, falling back to the URI authority
pub fn request_host<B>(req: &Request<B>) -> String {
    req.headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| req.uri().authority().map(|a| a.to_string()))
        .unwrap_or_default()
}

/// [`FilterContext`] over an owned request and response
pub struct HttpFilterContext {
    request: Mutex<Request<Body>>,
    response: Mutex<Response<Body>>,
    state_bag: Mutex<StateBag>,
    outgoing_host: Mutex<String>,
    backend_url: String,
    served: Mutex<Option<Response<Body>>>,
}

impl HttpFilterContext {
    /// Create a context for a request; the outgoing host starts as the request host
    pub fn new(request: Request<Body>) -> Self {
        let outgoing_host = request_host(&request);
        Self {
            request: Mutex::new(request),
            response: Mutex::new(Response::new(Body::new(Bytes::new()))),
            state_bag: Mutex::new(StateBag::new()),
            outgoing_host: Mutex::new(outgoing_host),
            backend_url: String::new(),
            served: Mutex::new(None),
        }
    }

    /// Set the backend URL
    pub fn with_backend_url(mut self, url: impl Into<String>) -> Self {
        self.backend_url = url.into();
        self
    }

    /// Set the backend response
    pub fn with_response(self, response: Response<Body>) -> Self {
        *self.response.lock() = response;
        self
    }

    /// Insert a state bag value
    pub fn with_state<V: Any + Send + Sync>(self, key: impl Into<String>, value: V) -> Self {
        self.state_bag.lock().insert(key.into(), Box::new(value));
        self
    }

    /// Replace the backend response after the round trip
    pub fn set_response(&self, response: Response<Body>) {
        *self.response.lock() = response;
    }

    /// Take the response produced by [`FilterContext::serve`]
    pub fn take_served(&self) -> Option<Response<Body>> {
        self.served.lock().take()
    }
}

impl fmt::Debug for HttpFilterContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpFilterContext")
            .field("uri", &self.request.lock().uri().to_string())
            .field("outgoing_host", &*self.outgoing_host.lock())
            .field("backend_url", &self.backend_url)
            .field("served", &self.served.lock().is_some())
            .finish()
    }
}

impl FilterContext for HttpFilterContext {
    fn request(&self) -> &Mutex<Request<Body>> {
        &self.request
    }

    fn response(&self) -> &Mutex<Response<Body>> {
        &self.response
    }

    fn state_bag(&self) -> &Mutex<StateBag> {
        &self.state_bag
    }

    fn outgoing_host(&self) -> String {
        self.outgoing_host.lock().clone()
    }

    fn set_outgoing_host(&self, host: String) {
        *self.outgoing_host.lock() = host;
    }

    fn backend_url(&self) -> String {
        self.backend_url.clone()
    }

    fn serve(&self, response: Response<Body>) {
        *self.served.lock() = Some(response);
    }

    fn is_served(&self) -> bool {
        self.served.lock().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outgoing_host_defaults_to_request_host() {
        let req = Request::builder()
            .uri("http://example.org/path")
            .header(header::HOST, "api.example.org")
            .body(Body::new(Bytes::new()))
            .unwrap();
        let ctx = HttpFilterContext::new(req);
        assert_eq!(ctx.outgoing_host(), "api.example.org");

        ctx.set_outgoing_host("backend.internal".to_string());
        assert_eq!(ctx.outgoing_host(), "backend.internal");
    }

    #[test]
    fn test_request_host_falls_back_to_authority() {
        let req = Request::builder()
            .uri("http://example.org:8080/path")
            .body(())
            .unwrap();
        assert_eq!(request_host(&req), "example.org:8080");
    }

    #[test]
    fn test_serve_and_take() {
        let req = Request::builder().uri("/").body(Body::new(Bytes::new())).unwrap();
        let ctx = HttpFilterContext::new(req).with_state("user", "alice".to_string());
        assert!(!ctx.is_served());
        assert!(ctx.state_bag().lock().contains_key("user"));

        ctx.serve(Response::new(Body::from("done")));
        assert!(ctx.is_served());
        assert!(ctx.take_served().is_some());
        assert!(!ctx.is_served());
    }
}
