//! Script-visible views over the filter context
//!
//! Every hook call gets a fresh [`InvocationContext`]. Its fields (`request`,
//! `response`, `state_bag`, `serve`) and the `header` field of the request
//! and response views are created on first access and cached for the rest of
//! that call only.
//!
//! Objects with a fixed set of fields dispatch through a static table of
//! `(name, getter, setter)` entries. Unknown fields read as `()` and writes to
//! fields without a setter are ignored.

use crate::error::{Result, ScriptError};
use crate::marshal;
use crate::serve::ResponseSynthesizer;
use http::header::CONTENT_LENGTH;
use http::{HeaderMap, Uri};
use octopus_core::{request_host, FilterContext, RemoteAddr};
use rhai::{Dynamic, INT};
use std::fmt;
use std::sync::{Arc, OnceLock};
use tracing::{debug, trace};

/// Reads a field of `T`
pub type Getter<T> = fn(&T) -> Result<Dynamic>;

/// Writes a field of `T`
pub type Setter<T> = fn(&T, &Dynamic) -> Result<()>;

/// One entry of a dispatch table
pub struct Field<T: 'static> {
    /// Field name as seen by scripts
    pub name: &'static str,
    /// Accessor
    pub get: Getter<T>,
    /// Mutator, if the field is writable
    pub set: Option<Setter<T>>,
}

impl<T: 'static> fmt::Debug for Field<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field")
            .field("name", &self.name)
            .field("writable", &self.set.is_some())
            .finish()
    }
}

/// Script object backed by a dispatch table
pub trait Dispatch: Clone + Send + Sync + 'static {
    /// Type name shown to scripts
    const TYPE_NAME: &'static str;

    /// Field table
    fn fields() -> &'static [Field<Self>];

    /// Read a field; unknown fields are `()`
    fn get_field(&self, key: &str) -> Result<Dynamic> {
        match Self::fields().iter().find(|f| f.name == key) {
            Some(field) => (field.get)(self),
            None => Ok(Dynamic::UNIT),
        }
    }

    /// Write a field; fields without a setter ignore the write
    fn set_field(&self, key: &str, value: &Dynamic) -> Result<()> {
        match Self::fields()
            .iter()
            .find(|f| f.name == key)
            .and_then(|f| f.set)
        {
            Some(set) => set(self, value),
            None => {
                trace!(object = Self::TYPE_NAME, field = key, "Ignoring write to read-only field");
                Ok(())
            }
        }
    }
}

/// Top-level object passed to hooks
#[derive(Debug, Clone)]
pub struct InvocationContext {
    inner: Arc<Invocation>,
}

#[derive(Debug)]
struct Invocation {
    filter: Arc<dyn FilterContext>,
    request: OnceLock<RequestView>,
    response: OnceLock<ResponseView>,
    state_bag: OnceLock<StateBagView>,
    serve: OnceLock<ResponseSynthesizer>,
}

impl InvocationContext {
    /// Bind a filter context for a single hook call
    pub fn new(filter: Arc<dyn FilterContext>) -> Self {
        Self {
            inner: Arc::new(Invocation {
                filter,
                request: OnceLock::new(),
                response: OnceLock::new(),
                state_bag: OnceLock::new(),
                serve: OnceLock::new(),
            }),
        }
    }

    /// The bound filter context
    pub fn filter_context(&self) -> &Arc<dyn FilterContext> {
        &self.inner.filter
    }

    /// Request view
    pub fn request(&self) -> RequestView {
        self.inner
            .request
            .get_or_init(|| RequestView::new(Arc::clone(&self.inner.filter)))
            .clone()
    }

    /// Response view
    pub fn response(&self) -> ResponseView {
        self.inner
            .response
            .get_or_init(|| ResponseView::new(Arc::clone(&self.inner.filter)))
            .clone()
    }

    /// State bag view
    pub fn state_bag(&self) -> StateBagView {
        self.inner
            .state_bag
            .get_or_init(|| StateBagView::new(Arc::clone(&self.inner.filter)))
            .clone()
    }

    /// Response synthesizer
    pub fn synthesizer(&self) -> ResponseSynthesizer {
        self.inner
            .serve
            .get_or_init(|| ResponseSynthesizer::new(Arc::clone(&self.inner.filter)))
            .clone()
    }

    /// Serve a response described by a script map
    ///
    /// Returns `()` on success or an error message string.
    pub fn serve(&self, spec: &Dynamic) -> Dynamic {
        self.synthesizer().serve(spec)
    }

    fn get_request(&self) -> Result<Dynamic> {
        Ok(Dynamic::from(self.request()))
    }

    fn get_response(&self) -> Result<Dynamic> {
        Ok(Dynamic::from(self.response()))
    }

    fn get_state_bag(&self) -> Result<Dynamic> {
        Ok(Dynamic::from(self.state_bag()))
    }

    fn get_serve(&self) -> Result<Dynamic> {
        Ok(Dynamic::from(self.synthesizer()))
    }
}

static CONTEXT_FIELDS: &[Field<InvocationContext>] = &[
    Field { name: "request", get: InvocationContext::get_request, set: None },
    Field { name: "response", get: InvocationContext::get_response, set: None },
    Field { name: "state_bag", get: InvocationContext::get_state_bag, set: None },
    Field { name: "serve", get: InvocationContext::get_serve, set: None },
];

impl Dispatch for InvocationContext {
    const TYPE_NAME: &'static str = "Context";

    fn fields() -> &'static [Field<Self>] {
        CONTEXT_FIELDS
    }
}

/// Script view of the proxied request
#[derive(Debug, Clone)]
pub struct RequestView {
    inner: Arc<RequestInner>,
}

#[derive(Debug)]
struct RequestInner {
    filter: Arc<dyn FilterContext>,
    header: OnceLock<HeaderView>,
}

impl RequestView {
    fn new(filter: Arc<dyn FilterContext>) -> Self {
        Self {
            inner: Arc::new(RequestInner {
                filter,
                header: OnceLock::new(),
            }),
        }
    }

    fn filter(&self) -> &dyn FilterContext {
        self.inner.filter.as_ref()
    }

    /// Request header view
    pub fn headers(&self) -> HeaderView {
        self.inner
            .header
            .get_or_init(|| HeaderView::new(Arc::clone(&self.inner.filter), HeaderTarget::Request))
            .clone()
    }

    fn header(&self) -> Result<Dynamic> {
        Ok(Dynamic::from(self.headers()))
    }

    fn outgoing_host(&self) -> Result<Dynamic> {
        Ok(Dynamic::from(self.filter().outgoing_host()))
    }

    fn set_outgoing_host(&self, value: &Dynamic) -> Result<()> {
        let host = marshal::display_string(value).unwrap_or_default();
        self.filter().set_outgoing_host(host);
        Ok(())
    }

    fn backend_url(&self) -> Result<Dynamic> {
        Ok(Dynamic::from(self.filter().backend_url()))
    }

    fn host(&self) -> Result<Dynamic> {
        let req = self.filter().request().lock();
        Ok(Dynamic::from(request_host(&req)))
    }

    fn remote_addr(&self) -> Result<Dynamic> {
        let req = self.filter().request().lock();
        let addr = req
            .extensions()
            .get::<RemoteAddr>()
            .map(|addr| addr.0.to_string())
            .unwrap_or_default();
        Ok(Dynamic::from(addr))
    }

    /// `Content-Length` header, else the known body size, else -1
    fn content_length(&self) -> Result<Dynamic> {
        let req = self.filter().request().lock();
        let length = req
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<INT>().ok())
            .or_else(|| {
                http_body::Body::size_hint(req.body())
                    .exact()
                    .and_then(|n| INT::try_from(n).ok())
            })
            .unwrap_or(-1);
        Ok(Dynamic::from(length))
    }

    fn proto(&self) -> Result<Dynamic> {
        let req = self.filter().request().lock();
        Ok(Dynamic::from(format!("{:?}", req.version())))
    }

    fn method(&self) -> Result<Dynamic> {
        let req = self.filter().request().lock();
        Ok(Dynamic::from(req.method().to_string()))
    }

    fn url(&self) -> Result<Dynamic> {
        let req = self.filter().request().lock();
        Ok(Dynamic::from(req.uri().to_string()))
    }

    fn set_url(&self, value: &Dynamic) -> Result<()> {
        let text = marshal::display_string(value).unwrap_or_default();
        let uri: Uri = text
            .parse()
            .map_err(|e| ScriptError::runtime(format!("invalid url '{text}': {e}")))?;
        *self.filter().request().lock().uri_mut() = uri;
        Ok(())
    }
}

static REQUEST_FIELDS: &[Field<RequestView>] = &[
    Field { name: "header", get: RequestView::header, set: None },
    Field {
        name: "outgoing_host",
        get: RequestView::outgoing_host,
        set: Some(RequestView::set_outgoing_host),
    },
    Field { name: "backend_url", get: RequestView::backend_url, set: None },
    Field { name: "host", get: RequestView::host, set: None },
    Field { name: "remote_addr", get: RequestView::remote_addr, set: None },
    Field { name: "content_length", get: RequestView::content_length, set: None },
    Field { name: "proto", get: RequestView::proto, set: None },
    Field { name: "method", get: RequestView::method, set: None },
    Field { name: "url", get: RequestView::url, set: Some(RequestView::set_url) },
];

impl Dispatch for RequestView {
    const TYPE_NAME: &'static str = "Request";

    fn fields() -> &'static [Field<Self>] {
        REQUEST_FIELDS
    }
}

/// Script view of the backend response
#[derive(Debug, Clone)]
pub struct ResponseView {
    inner: Arc<ResponseInner>,
}

#[derive(Debug)]
struct ResponseInner {
    filter: Arc<dyn FilterContext>,
    header: OnceLock<HeaderView>,
}

impl ResponseView {
    fn new(filter: Arc<dyn FilterContext>) -> Self {
        Self {
            inner: Arc::new(ResponseInner {
                filter,
                header: OnceLock::new(),
            }),
        }
    }

    /// Response header view
    ///
    /// Read-only: header writes through `response.header` are ignored.
    pub fn headers(&self) -> HeaderView {
        self.inner
            .header
            .get_or_init(|| {
                HeaderView::new(Arc::clone(&self.inner.filter), HeaderTarget::Response)
                    .read_only()
            })
            .clone()
    }

    fn header(&self) -> Result<Dynamic> {
        Ok(Dynamic::from(self.headers()))
    }
}

static RESPONSE_FIELDS: &[Field<ResponseView>] = &[Field {
    name: "header",
    get: ResponseView::header,
    set: None,
}];

impl Dispatch for ResponseView {
    const TYPE_NAME: &'static str = "Response";

    fn fields() -> &'static [Field<Self>] {
        RESPONSE_FIELDS
    }
}

/// Which header map a [`HeaderView`] reads and writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderTarget {
    /// Request headers
    Request,
    /// Response headers
    Response,
}

/// Open mapping over a header map
#[derive(Debug, Clone)]
pub struct HeaderView {
    filter: Arc<dyn FilterContext>,
    target: HeaderTarget,
    writable: bool,
}

impl HeaderView {
    fn new(filter: Arc<dyn FilterContext>, target: HeaderTarget) -> Self {
        Self {
            filter,
            target,
            writable: true,
        }
    }

    fn read_only(mut self) -> Self {
        self.writable = false;
        self
    }

    fn with_headers<T>(&self, f: impl FnOnce(&mut HeaderMap) -> T) -> T {
        match self.target {
            HeaderTarget::Request => f(self.filter.request().lock().headers_mut()),
            HeaderTarget::Response => f(self.filter.response().lock().headers_mut()),
        }
    }

    /// Whether writes reach the underlying headers
    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// First value of a header, or an empty string
    pub fn get(&self, name: &str) -> Dynamic {
        self.with_headers(|headers| marshal::header_get(headers, name))
    }

    /// Replace or remove a header
    pub fn set(&self, name: &str, value: &Dynamic) -> Result<()> {
        if !self.writable {
            debug!(header = name, target = ?self.target, "Ignoring write to read-only headers");
            return Ok(());
        }
        self.with_headers(|headers| marshal::header_set(headers, name, value))
    }
}

/// Open mapping over the per-request state bag
#[derive(Debug, Clone)]
pub struct StateBagView {
    filter: Arc<dyn FilterContext>,
}

impl StateBagView {
    fn new(filter: Arc<dyn FilterContext>) -> Self {
        Self { filter }
    }

    /// Value for a key; missing or unconvertible values are `()`
    pub fn get(&self, key: &str) -> Dynamic {
        marshal::state_bag_get(&self.filter.state_bag().lock(), key)
    }

    /// Store a string or number
    pub fn set(&self, key: &str, value: &Dynamic) -> Result<()> {
        marshal::state_bag_set(&mut self.filter.state_bag().lock(), key, value)
    }
}
