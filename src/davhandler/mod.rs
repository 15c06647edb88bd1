//
// This module contains the main entry point of the library,
// DavHandler, and its builder.
//
use std::error::Error as StdError;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, Bytes};
use futures_util::stream::Stream;
use headers::HeaderMapExt;
use http::header::{HeaderValue, CONTENT_TYPE};
use http::{Request, Response, StatusCode};
use http_body::Body as HttpBody;

use crate::body::{Body, StreamBody};
use crate::condition::ConditionCode;
use crate::conditional::{http_preconditions, if_match_get_tokens};
use crate::config::{ConfigError, LocationConfig, LocationMatch, ServiceRegistry};
use crate::davheaders;
use crate::davpath::DavPath;
use crate::errors::DavError;
use crate::ls::DavLockSystem;
use crate::memls::MemLs;
use crate::props::{DavPropStore, MemPropStore};
use crate::service::{DavResource, DavService, EntityMetadata};
use crate::util::{dav_method, DavMethod, DavMethodSet};
use crate::DavResult;

mod handle_copymove;
mod handle_delete;
mod handle_gethead;
mod handle_lock;
mod handle_mkcol;
mod handle_options;
mod handle_post;
mod handle_props;
mod handle_put;

// XML request bodies are never larger than this.
const MAX_XML_BODY: usize = 65536;
const DEFAULT_MAX_BODY: usize = 1 << 30;
const DEFAULT_MAX_LOCK_TIMEOUT: Duration = Duration::from_secs(3600);

/// Lock system backend.
#[derive(Clone)]
pub enum LockSystem {
    /// A fresh [`MemLs`] per location.
    Mem,
    /// One lock system shared by all locations.
    Custom(Arc<dyn DavLockSystem>),
}

/// Dead property store backend.
#[derive(Clone)]
pub enum PropStore {
    /// A fresh [`MemPropStore`] per location.
    Mem,
    Custom(Arc<dyn DavPropStore>),
}

/// How much of a PROPPATCH request is applied when an instruction fails.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum PropPatchAtomicity {
    /// Nothing is applied.
    #[default]
    Request,
    /// Every `set`/`remove` block without failures is still applied.
    Block,
}

/// How PROPPATCH reports a property touched by several instructions.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum PropPatchReport {
    /// One propstat group per distinct status the property received.
    #[default]
    PerInstruction,
    /// Each property once, with its most severe status.
    Merged,
}

/// Configuration of the handler.
#[derive(Clone)]
pub struct DavBuilder {
    /// Locations in declaration order. A location either names a service
    /// type in the registry, or carries its service instance.
    locations: Vec<(LocationConfig, Option<Arc<dyn DavService>>)>,
    registry: ServiceRegistry,
    /// Locksystem backend. No locking if unset.
    ls: Option<LockSystem>,
    /// Dead property store. No dead properties if unset.
    props: Option<PropStore>,
    /// Set of allowed methods (Defaults to "all methods")
    allow: DavMethodSet,
    /// Principal is webdav speak for "user", used to give locks an owner.
    principal: Option<String>,
    /// Does GET on a collection return an index.
    autoindex: bool,
    max_body_size: usize,
    /// Upper bound for lock timeouts. `None` allows infinite locks.
    max_lock_timeout: Option<Duration>,
    proppatch_atomicity: PropPatchAtomicity,
    proppatch_report: PropPatchReport,
    /// Encode `%` in the paths the server generates.
    encode_percent: bool,
}

impl Default for DavBuilder {
    fn default() -> DavBuilder {
        DavBuilder::new()
    }
}

impl DavBuilder {
    /// Create a new configuration builder.
    pub fn new() -> DavBuilder {
        DavBuilder {
            locations: Vec::new(),
            registry: ServiceRegistry::new(),
            ls: None,
            props: Some(PropStore::Mem),
            allow: DavMethodSet::all(),
            principal: None,
            autoindex: false,
            max_body_size: DEFAULT_MAX_BODY,
            max_lock_timeout: Some(DEFAULT_MAX_LOCK_TIMEOUT),
            proppatch_atomicity: PropPatchAtomicity::default(),
            proppatch_report: PropPatchReport::default(),
            encode_percent: true,
        }
    }

    /// Add a location whose service is created from the registry.
    pub fn location(self, location: LocationConfig) -> Self {
        let mut this = self;
        this.locations.push((location, None));
        this
    }

    /// Serve `service` at `pattern`.
    pub fn mount(self, pattern: impl Into<String>, service: Arc<dyn DavService>) -> Self {
        let mut this = self;
        this.locations
            .push((LocationConfig::new(pattern, ""), Some(service)));
        this
    }

    /// Registry used to create the services of [`location`](Self::location)s.
    pub fn registry(self, registry: ServiceRegistry) -> Self {
        let mut this = self;
        this.registry = registry;
        this
    }

    /// Set the locksystem to use.
    pub fn locksystem(self, ls: LockSystem) -> Self {
        let mut this = self;
        this.ls = Some(ls);
        this
    }

    /// Set the dead property store, or `None` to refuse dead properties.
    pub fn propstore(self, props: Option<PropStore>) -> Self {
        let mut this = self;
        this.props = props;
        this
    }

    /// Which methods to allow (default is all methods).
    pub fn methods(self, allow: DavMethodSet) -> Self {
        let mut this = self;
        this.allow = allow;
        this
    }

    /// Set the name of the "webdav principal". This will be the owner of any created locks.
    pub fn principal(self, principal: impl Into<String>) -> Self {
        let mut this = self;
        this.principal = Some(principal.into());
        this
    }

    /// Does a GET on a collection produce an index.
    pub fn autoindex(self, autoindex: bool) -> Self {
        let mut this = self;
        this.autoindex = autoindex;
        this
    }

    /// Maximum size of a PUT or POST body.
    pub fn max_body_size(self, size: usize) -> Self {
        let mut this = self;
        this.max_body_size = size;
        this
    }

    pub fn max_lock_timeout(self, timeout: Option<Duration>) -> Self {
        let mut this = self;
        this.max_lock_timeout = timeout;
        this
    }

    pub fn proppatch_atomicity(self, atomicity: PropPatchAtomicity) -> Self {
        let mut this = self;
        this.proppatch_atomicity = atomicity;
        this
    }

    pub fn proppatch_report(self, report: PropPatchReport) -> Self {
        let mut this = self;
        this.proppatch_report = report;
        this
    }

    /// Encode `%` as `%25` in generated paths (default true).
    pub fn encode_percent(self, encode: bool) -> Self {
        let mut this = self;
        this.encode_percent = encode;
        this
    }

    /// Create the services and build the handler.
    pub fn build(self) -> Result<DavHandler, ConfigError> {
        let mut locations = Vec::with_capacity(self.locations.len());
        for (cfg, instance) in &self.locations {
            let matcher = LocationMatch::parse(&cfg.pattern, cfg.case_sensitive)?;
            if !cfg.enabled {
                debug!("location {} is disabled", cfg.pattern);
                locations.push(Location {
                    matcher,
                    service: None,
                    ls: None,
                    props: None,
                    allow_infinite_propfind: false,
                    max_lock_timeout: None,
                });
                continue;
            }
            let service = match instance {
                Some(s) => s.clone(),
                None => self.registry.create(&cfg.service, &cfg.params)?,
            };
            let allow_infinite_propfind = cfg.params.get_bool("allowInfinitePropFind", true)?;
            let max_lock_timeout = match cfg.params.get_u32("maxLockTimeout", 0, 0, 0)? {
                0 => self.max_lock_timeout,
                n => Some(Duration::from_secs(n as u64)),
            };
            let ls = self.ls.as_ref().map(|ls| match ls {
                LockSystem::Mem => MemLs::new() as Arc<dyn DavLockSystem>,
                LockSystem::Custom(ls) => ls.clone(),
            });
            let props = self.props.as_ref().map(|p| match p {
                PropStore::Mem => Arc::new(MemPropStore::new()) as Arc<dyn DavPropStore>,
                PropStore::Custom(p) => p.clone(),
            });
            debug!("location {} serves {:?}", cfg.pattern, service);
            locations.push(Location {
                matcher,
                service: Some(service),
                ls,
                props,
                allow_infinite_propfind,
                max_lock_timeout,
            });
        }
        Ok(DavHandler {
            locations: Arc::new(locations),
            allow: self.allow,
            principal: self.principal.map(Arc::new),
            autoindex: self.autoindex,
            max_body_size: self.max_body_size,
            proppatch_atomicity: self.proppatch_atomicity,
            proppatch_report: self.proppatch_report,
            encode_percent: self.encode_percent,
        })
    }
}

// A location with its backends.
struct Location {
    matcher: LocationMatch,
    // None if the location is disabled.
    service: Option<Arc<dyn DavService>>,
    ls: Option<Arc<dyn DavLockSystem>>,
    props: Option<Arc<dyn DavPropStore>>,
    allow_infinite_propfind: bool,
    max_lock_timeout: Option<Duration>,
}

/// The webdav handler struct.
///
/// The `builder` and `build` methods are used to instantiate a handler.
///
/// The `handle` and `handle_with` methods are the methods that do the actual work.
#[derive(Clone)]
pub struct DavHandler {
    locations: Arc<Vec<Location>>,
    allow: DavMethodSet,
    principal: Option<Arc<String>>,
    autoindex: bool,
    max_body_size: usize,
    proppatch_atomicity: PropPatchAtomicity,
    proppatch_report: PropPatchReport,
    encode_percent: bool,
}

// Everything a method processor needs for one request.
pub(crate) struct DavInner {
    pub service: Arc<dyn DavService>,
    pub ls: Option<Arc<dyn DavLockSystem>>,
    pub props: Option<Arc<dyn DavPropStore>>,
    pub prefix: String,
    pub allow: DavMethodSet,
    pub principal: Option<String>,
    pub autoindex: bool,
    pub max_body_size: usize,
    pub allow_infinite_propfind: bool,
    pub max_lock_timeout: Option<Duration>,
    pub proppatch_atomicity: PropPatchAtomicity,
    pub proppatch_report: PropPatchReport,
    pub encode_percent: bool,
}

impl DavHandler {
    /// Return a configuration builder.
    pub fn builder() -> DavBuilder {
        DavBuilder::new()
    }

    /// Handle a webdav request.
    pub async fn handle<ReqBody, ReqData, ReqError>(&self, req: Request<ReqBody>) -> Response<Body>
    where
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
    {
        self.handle_inner(req, None).await
    }

    /// Handle a webdav request on behalf of `principal`.
    pub async fn handle_with<ReqBody, ReqData, ReqError>(
        &self,
        req: Request<ReqBody>,
        principal: Option<String>,
    ) -> Response<Body>
    where
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
    {
        self.handle_inner(req, principal).await
    }

    /// Handles a request with a `Stream` body instead of a `HttpBody`.
    pub async fn handle_stream<ReqBody, ReqData, ReqError>(
        &self,
        req: Request<ReqBody>,
    ) -> Response<Body>
    where
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
        ReqBody: Stream<Item = Result<ReqData, ReqError>>,
    {
        let req = {
            let (parts, body) = req.into_parts();
            Request::from_parts(parts, StreamBody::new(body))
        };
        self.handle_inner(req, None).await
    }

    // pick the location and set up the per-request state.
    fn inner_for(&self, req: &Request<()>, principal: Option<String>) -> DavResult<DavInner> {
        let host = req
            .headers()
            .get(http::header::HOST)
            .and_then(|h| h.to_str().ok());
        let (loc, prefix) = self
            .locations
            .iter()
            .find_map(|loc| loc.matcher.matches(req.uri(), host).map(|p| (loc, p)))
            .ok_or_else(|| {
                debug!("no location for {}", req.uri());
                DavError::Status(StatusCode::NOT_FOUND)
            })?;
        let service = loc.service.clone().ok_or_else(|| {
            debug!("location for {} is disabled", req.uri());
            DavError::Status(StatusCode::NOT_FOUND)
        })?;
        Ok(DavInner {
            service,
            ls: loc.ls.clone(),
            props: loc.props.clone(),
            prefix: prefix.to_string(),
            allow: self.allow,
            principal: principal.or_else(|| self.principal.as_ref().map(|p| p.to_string())),
            autoindex: self.autoindex,
            max_body_size: self.max_body_size,
            allow_infinite_propfind: loc.allow_infinite_propfind,
            max_lock_timeout: loc.max_lock_timeout,
            proppatch_atomicity: self.proppatch_atomicity,
            proppatch_report: self.proppatch_report,
            encode_percent: self.encode_percent,
        })
    }

    // internal dispatcher.
    async fn handle_inner<ReqBody, ReqData, ReqError>(
        &self,
        req: Request<ReqBody>,
        principal: Option<String>,
    ) -> Response<Body>
    where
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
    {
        let is_ms = req
            .headers()
            .get("user-agent")
            .and_then(|s| s.to_str().ok())
            .map(|s| s.contains("Microsoft"))
            .unwrap_or(false);

        let (req, body) = {
            let (parts, body) = req.into_parts();
            (Request::from_parts(parts, ()), body)
        };

        let res = match self.inner_for(&req, principal) {
            Ok(inner) => inner.handle2(req, body).await,
            Err(e) => Err(e),
        };

        // Turn any DavError results into a HTTP error response.
        match res {
            Ok(resp) => {
                debug!("== END REQUEST result {}", resp.status());
                resp
            }
            Err(err) => {
                debug!("== END REQUEST result {:?}", err);
                let must_close = err.must_close();
                let mut resp = condition_response(&err.into_condition());
                let status = resp.status();
                let h = resp.headers_mut();
                if is_ms && status == StatusCode::NOT_FOUND {
                    // Try to convince Windows not to cache the 404, it does
                    // so case-insensitively.
                    h.insert(
                        "Cache-Control",
                        HeaderValue::from_static("no-store, no-cache, must-revalidate"),
                    );
                    h.insert("Pragma", HeaderValue::from_static("no-cache"));
                    h.insert("Expires", HeaderValue::from_static("0"));
                    h.insert("Vary", HeaderValue::from_static("*"));
                }
                if must_close {
                    h.insert("connection", HeaderValue::from_static("close"));
                }
                resp
            }
        }
    }
}

/// The response for a ConditionCode: an XML `DAV:error` body if it has an
/// error element, a text body if it has a message, else no body.
pub(crate) fn condition_response(cond: &ConditionCode) -> Response<Body> {
    let mut res = Response::new(Body::empty());
    *res.status_mut() = cond.status();
    let status = cond.status();
    if status == StatusCode::NO_CONTENT || status == StatusCode::NOT_MODIFIED {
        return res;
    }
    let h = res.headers_mut();
    if let Some(body) = cond.error_body() {
        h.insert(CONTENT_TYPE, HeaderValue::from_static("application/xml; charset=utf-8"));
        h.typed_insert(headers::ContentLength(body.len() as u64));
        *res.body_mut() = Body::from(body);
    } else if let Some(msg) = cond.message() {
        h.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
        h.typed_insert(headers::ContentLength(msg.len() as u64));
        *res.body_mut() = Body::from(msg.to_string());
    } else {
        h.typed_insert(headers::ContentLength(0));
    }
    res
}

/// A `207 Multi-Status` response with an XML body.
pub(crate) fn multistatus_response(body: Bytes) -> Response<Body> {
    let mut res = Response::new(Body::empty());
    *res.status_mut() = StatusCode::MULTI_STATUS;
    xml_body(&mut res, body);
    res
}

pub(crate) fn xml_body(res: &mut Response<Body>, body: Bytes) {
    let h = res.headers_mut();
    h.insert(CONTENT_TYPE, HeaderValue::from_static("application/xml; charset=utf-8"));
    h.typed_insert(headers::ContentLength(body.len() as u64));
    *res.body_mut() = Body::from(body);
}

impl DavInner {
    // drain request body.
    async fn read_request<ReqBody, ReqData, ReqError>(
        &self,
        body: ReqBody,
        max_size: usize,
    ) -> DavResult<Vec<u8>>
    where
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
    {
        let mut data = Vec::new();
        pin_utils::pin_mut!(body);
        while let Some(res) = body.data().await {
            let mut buf = res.map_err(|_| {
                DavError::IoError(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "UnexpectedEof",
                ))
            })?;
            while buf.has_remaining() {
                if data.len() + buf.remaining() > max_size {
                    return Err(StatusCode::PAYLOAD_TOO_LARGE.into());
                }
                let b = buf.chunk();
                let l = b.len();
                data.extend_from_slice(b);
                buf.advance(l);
            }
        }
        Ok(data)
    }

    // internal dispatcher part 2.
    async fn handle2<ReqBody, ReqData, ReqError>(
        self,
        req: Request<()>,
        body: ReqBody,
    ) -> DavResult<Response<Body>>
    where
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
    {
        // translate HTTP method to Webdav method. Unknown methods go to
        // the resource or the service.
        let method = match dav_method(req.method()) {
            Ok(m) => m,
            Err(_) => {
                let body = self.read_request(body, self.max_body_size).await?;
                return self.handle_generic(&req, Bytes::from(body)).await;
            }
        };

        // see if method is allowed.
        if !self.allow.contains(method) {
            debug!(
                "method {} not allowed on request {}",
                req.method(),
                req.uri()
            );
            return Err(DavError::StatusClose(StatusCode::METHOD_NOT_ALLOWED));
        }

        // make sure the request path is valid.
        let path = DavPath::from_uri_and_prefix(req.uri(), &self.prefix)?;
        if path.is_star() && method != DavMethod::OPTIONS {
            return Err(DavError::InvalidPath);
        }

        let max = if method.intersects(DavMethod::PUT | DavMethod::POST) {
            self.max_body_size
        } else {
            MAX_XML_BODY
        };
        let body = Bytes::from(self.read_request(body, max).await?);

        // Not all methods accept a body.
        let with_body = DavMethod::PUT
            | DavMethod::POST
            | DavMethod::PROPFIND
            | DavMethod::PROPPATCH
            | DavMethod::LOCK
            | DavMethod::MKCOL;
        if !with_body.contains(method) && !body.is_empty() {
            return Err(StatusCode::UNSUPPORTED_MEDIA_TYPE.into());
        }

        debug!("== START REQUEST {:?} {}", method, path);

        if method == DavMethod::OPTIONS {
            self.handle_options(&req, &path).await
        } else if method == DavMethod::PROPFIND {
            self.handle_propfind(&req, &path, &body).await
        } else if method == DavMethod::PROPPATCH {
            self.handle_proppatch(&req, &path, &body).await
        } else if method == DavMethod::MKCOL {
            self.handle_mkcol(&req, &path, &body).await
        } else if method == DavMethod::DELETE {
            self.handle_delete(&req, &path).await
        } else if method == DavMethod::LOCK {
            self.handle_lock(&req, &path, &body).await
        } else if method == DavMethod::UNLOCK {
            self.handle_unlock(&req, &path).await
        } else if method == DavMethod::HEAD || method == DavMethod::GET {
            self.handle_get(&req, &path).await
        } else if method == DavMethod::COPY || method == DavMethod::MOVE {
            self.handle_copymove(&req, &path, method).await
        } else if method == DavMethod::PUT {
            self.handle_put(&req, &path, body).await
        } else {
            self.handle_post(&req, &path, body).await
        }
    }

    // methods the engine does not know about.
    async fn handle_generic(&self, req: &Request<()>, body: Bytes) -> DavResult<Response<Body>> {
        let path = DavPath::from_uri_and_prefix(req.uri(), &self.prefix)?;
        debug!("== START REQUEST {} {}", req.method(), path);
        if !path.is_star() {
            if let Some(res) = self.service.resolve(&path).await? {
                if let Some(fut) = res.handle_generic(req, &body) {
                    return Ok(fut.await?);
                }
            }
        }
        if let Some(fut) = self.service.handle_generic(req, &body) {
            return Ok(fut.await?);
        }
        debug!("refusing method {} request {}", req.method(), req.uri());
        Err(DavError::UnknownDavMethod)
    }

    // resolve the request path and run the access check.
    pub(crate) async fn resolve(
        &self,
        path: &DavPath,
        method: DavMethod,
    ) -> DavResult<Option<Box<dyn DavResource>>> {
        let res = self.service.resolve(path).await?;
        if let Some(r) = res.as_ref() {
            r.check_access(method, self.principal.as_deref())?;
        }
        Ok(res)
    }

    // A collection URL must end in a slash. If it did not, fix up the
    // path and tell the client with Content-Location.
    pub(crate) fn fixpath(
        &self,
        res: &mut Response<Body>,
        path: &mut DavPath,
        resource: &dyn DavResource,
    ) {
        if resource.metadata().is_collection && !path.is_collection() {
            path.add_slash();
            let newloc = self.href(path);
            res.headers_mut()
                .typed_insert(davheaders::ContentLocation(newloc));
        }
    }

    /// The URL path of `path` as it appears in responses.
    pub(crate) fn href(&self, path: &DavPath) -> String {
        path.as_url_string_with(self.encode_percent)
    }

    pub(crate) fn preconditions(
        &self,
        req: &Request<()>,
        meta: Option<&EntityMetadata>,
    ) -> DavResult<()> {
        match http_preconditions(req, meta) {
            Some(cond) => Err(cond.into()),
            None => Ok(()),
        }
    }

    /// Evaluate the `If` header, returning the submitted lock tokens.
    pub(crate) async fn if_tokens(
        &self,
        req: &Request<()>,
        meta: Option<&EntityMetadata>,
        path: &DavPath,
    ) -> DavResult<Vec<String>> {
        let tokens =
            if_match_get_tokens(req, meta, &*self.service, self.ls.as_ref(), path).await?;
        Ok(tokens)
    }

    /// Check that the locks on `path` (and with `deep` below it) are held.
    pub(crate) fn check_locks(&self, path: &DavPath, deep: bool, tokens: &[String]) -> DavResult<()> {
        if let Some(ls) = self.ls.as_ref() {
            ls.check(path, self.principal.as_deref(), deep, tokens)?;
        }
        Ok(())
    }

    /// Adding or removing `path` changes the membership of its parent,
    /// so a lock on the parent must be held as well.
    pub(crate) fn check_member_locks(&self, path: &DavPath, tokens: &[String]) -> DavResult<()> {
        if !path.is_root() {
            self.check_locks(&path.parent(), false, tokens)?;
        }
        Ok(())
    }

    /// The timeout for a new or refreshed lock, bounded by the maximum.
    pub(crate) fn lock_timeout(&self, req: &Request<()>) -> DavResult<Option<Duration>> {
        let requested = match req.headers().typed_try_get::<davheaders::Timeout>() {
            Ok(Some(t)) => t.first(),
            Ok(None) => None,
            Err(_) => {
                return Err(ConditionCode::bad_request("The Timeout header is malformed.").into())
            }
        };
        Ok(match (requested, self.max_lock_timeout) {
            (Some(t), Some(max)) => Some(t.min(max)),
            (None, max) => max,
            (t, None) => t,
        })
    }

    /// Drop the locks and dead properties of a deleted subtree.
    pub(crate) fn forget(&self, path: &DavPath) -> DavResult<()> {
        if let Some(ls) = self.ls.as_ref() {
            ls.delete(path)?;
        }
        if let Some(props) = self.props.as_ref() {
            props.remove_props(path)?;
        }
        Ok(())
    }
}
