//! Filter traits, registry and chain
//!
//! A filter is a route-attached unit of request/response logic. Specs are
//! registered by name; routes instantiate filters from a spec with positional
//! arguments. The chain runs request hooks in route order and response hooks
//! in reverse.

use crate::{Body, Error, Result, StateBag};
use http::{Request, Response};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

/// Per-request view of the live HTTP exchange handed to filters
///
/// All accessors take `&self`; implementations use interior mutability so a
/// context can be shared as `Arc<dyn FilterContext>` for the duration of a
/// request.
pub trait FilterContext: Send + Sync + fmt::Debug {
    /// The request being proxied
    fn request(&self) -> &Mutex<Request<Body>>;

    /// The backend response (empty before the backend round trip)
    fn response(&self) -> &Mutex<Response<Body>>;

    /// Per-request key/value store shared by all filters of the chain
    fn state_bag(&self) -> &Mutex<StateBag>;

    /// Host header value sent to the backend
    fn outgoing_host(&self) -> String;

    /// Override the host header value sent to the backend
    fn set_outgoing_host(&self, host: String);

    /// URL of the selected backend
    fn backend_url(&self) -> String;

    /// Short-circuit the chain with a complete response
    fn serve(&self, response: Response<Body>);

    /// Whether [`FilterContext::serve`] has been called
    fn is_served(&self) -> bool;
}

/// A filter instance attached to a route
pub trait Filter: Send + Sync + fmt::Debug {
    /// Run on the request path
    fn request(&self, ctx: &Arc<dyn FilterContext>);

    /// Run on the response path
    fn response(&self, ctx: &Arc<dyn FilterContext>);
}

/// Factory creating filters from route arguments
pub trait FilterSpec: Send + Sync + fmt::Debug {
    /// Registration name used in route definitions
    fn name(&self) -> &str;

    /// Create a filter from positional route arguments
    fn create_filter(&self, args: &[serde_json::Value]) -> Result<Arc<dyn Filter>>;
}

/// Registry of filter specs by name
#[derive(Debug, Default)]
pub struct FilterRegistry {
    specs: HashMap<String, Arc<dyn FilterSpec>>,
}

impl FilterRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a spec, replacing any spec with the same name
    pub fn register(&mut self, spec: Arc<dyn FilterSpec>) {
        debug!(filter = spec.name(), "Registering filter spec");
        self.specs.insert(spec.name().to_string(), spec);
    }

    /// Look up a spec by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn FilterSpec>> {
        self.specs.get(name).cloned()
    }

    /// Instantiate a filter by spec name
    pub fn create_filter(&self, name: &str, args: &[serde_json::Value]) -> Result<Arc<dyn Filter>> {
        let spec = self
            .get(name)
            .ok_or_else(|| Error::UnknownFilter(name.to_string()))?;
        spec.create_filter(args)
    }

    /// Number of registered specs
    pub fn len(&self) -> usize {
        self.specs.len()
    }

    /// Whether no spec is registered
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

/// Ordered filters of one route
#[derive(Debug, Clone, Default)]
pub struct FilterChain {
    filters: Vec<Arc<dyn Filter>>,
}

impl FilterChain {
    /// Create a chain from filters in route order
    pub fn new(filters: Vec<Arc<dyn Filter>>) -> Self {
        Self { filters }
    }

    /// Append a filter
    pub fn push(&mut self, filter: Arc<dyn Filter>) {
        self.filters.push(filter);
    }

    /// Number of filters
    pub fn len(&self) -> usize {
        self.filters.len()
    }

    /// Whether the chain has no filters
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Run request hooks in order
    ///
    /// Stops after the first filter that serves a response and returns how
    /// many filters ran; pass that count to [`FilterChain::response`].
    pub fn request(&self, ctx: &Arc<dyn FilterContext>) -> usize {
        for (i, filter) in self.filters.iter().enumerate() {
            filter.request(ctx);
            if ctx.is_served() {
                trace!(position = i, "Filter chain short-circuited");
                return i + 1;
            }
        }
        self.filters.len()
    }

    /// Run response hooks in reverse order for the first `ran` filters
    pub fn response(&self, ctx: &Arc<dyn FilterContext>, ran: usize) {
        let ran = ran.min(self.filters.len());
        for filter in self.filters[..ran].iter().rev() {
            filter.response(ctx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HttpFilterContext;
    use bytes::Bytes;

    #[derive(Debug)]
    struct TagFilter {
        tag: &'static str,
        serve: bool,
    }

    impl Filter for TagFilter {
        fn request(&self, ctx: &Arc<dyn FilterContext>) {
            let mut req = ctx.request().lock();
            let prev = req
                .headers()
                .get("x-trail")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string();
            req.headers_mut()
                .insert("x-trail", format!("{prev}{}", self.tag).parse().unwrap());
            drop(req);
            if self.serve {
                ctx.serve(Response::new(Body::from(Bytes::from_static(b"served"))));
            }
        }

        fn response(&self, ctx: &Arc<dyn FilterContext>) {
            let mut res = ctx.response().lock();
            let prev = res
                .headers()
                .get("x-trail")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string();
            res.headers_mut()
                .insert("x-trail", format!("{prev}{}", self.tag).parse().unwrap());
        }
    }

    #[derive(Debug)]
    struct TagSpec;

    impl FilterSpec for TagSpec {
        fn name(&self) -> &str {
            "tag"
        }

        fn create_filter(&self, args: &[serde_json::Value]) -> Result<Arc<dyn Filter>> {
            match args.first().and_then(|v| v.as_str()) {
                Some("a") => Ok(Arc::new(TagFilter { tag: "a", serve: false })),
                _ => Err(Error::InvalidFilterParameters),
            }
        }
    }

    fn context() -> Arc<dyn FilterContext> {
        let req = Request::builder().uri("/").body(Body::new(Bytes::new())).unwrap();
        Arc::new(HttpFilterContext::new(req))
    }

    #[test]
    fn test_chain_order() {
        let chain = FilterChain::new(vec![
            Arc::new(TagFilter { tag: "a", serve: false }) as Arc<dyn Filter>,
            Arc::new(TagFilter { tag: "b", serve: false }) as Arc<dyn Filter>,
        ]);
        let ctx = context();
        let ran = chain.request(&ctx);
        chain.response(&ctx, ran);

        assert_eq!(ran, 2);
        assert_eq!(ctx.request().lock().headers()["x-trail"], "ab");
        assert_eq!(ctx.response().lock().headers()["x-trail"], "ba");
    }

    #[test]
    fn test_chain_stops_after_serve() {
        let chain = FilterChain::new(vec![
            Arc::new(TagFilter { tag: "a", serve: true }) as Arc<dyn Filter>,
            Arc::new(TagFilter { tag: "b", serve: false }) as Arc<dyn Filter>,
        ]);
        let ctx = context();
        let ran = chain.request(&ctx);

        assert_eq!(ran, 1);
        assert!(ctx.is_served());
        assert_eq!(ctx.request().lock().headers()["x-trail"], "a");
    }

    #[test]
    fn test_registry() {
        let mut registry = FilterRegistry::new();
        registry.register(Arc::new(TagSpec));
        assert_eq!(registry.len(), 1);

        assert!(registry.create_filter("tag", &[serde_json::json!("a")]).is_ok());
        assert!(matches!(
            registry.create_filter("tag", &[serde_json::json!(1)]),
            Err(Error::InvalidFilterParameters)
        ));
        assert!(matches!(
            registry.create_filter("missing", &[]),
            Err(Error::UnknownFilter(_))
        ));
    }
}
