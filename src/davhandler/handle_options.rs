use headers::HeaderMapExt;
use http::header::HeaderValue;
use http::{Request, Response, StatusCode};

use crate::body::Body;
use crate::davhandler::DavInner;
use crate::davpath::DavPath;
use crate::errors::DavError;
use crate::util::DavMethod;
use crate::DavResult;

impl DavInner {
    pub(crate) async fn handle_options(
        &self,
        _req: &Request<()>,
        path: &DavPath,
    ) -> DavResult<Response<Body>> {
        let mut res = Response::new(Body::empty());

        let resource = if path.is_star() {
            None
        } else {
            self.resolve(path, DavMethod::OPTIONS).await?
        };

        // what the resource state allows, before the configured set
        // and the service get a say.
        let mut allow = match resource.as_deref() {
            _ if path.is_star() => DavMethod::all(),
            None => {
                DavMethod::OPTIONS
                    | DavMethod::MKCOL
                    | DavMethod::PUT
                    | DavMethod::LOCK
                    | DavMethod::POST
            }
            Some(r) => {
                let mut m = DavMethod::all() - DavMethod::MKCOL;
                if r.metadata().is_collection {
                    m -= DavMethod::PUT;
                    if !self.autoindex {
                        m -= DavMethod::GET | DavMethod::HEAD;
                    }
                }
                if path.is_root() {
                    m -= DavMethod::MOVE | DavMethod::DELETE;
                }
                m
            }
        };
        if self.ls.is_none() {
            allow -= DavMethod::LOCK | DavMethod::UNLOCK;
        }
        allow &= self.allow;
        let allow = self.service.allowed_methods(resource.as_deref(), allow) & self.allow;

        let h = res.headers_mut();
        let dav = if self.ls.is_some() { "1, 2" } else { "1" };
        h.insert("DAV", HeaderValue::from_static(dav));
        h.insert("MS-Author-Via", HeaderValue::from_static("DAV"));
        h.typed_insert(headers::ContentLength(0));
        let names = allow.names().join(", ");
        let value = HeaderValue::from_str(&names).map_err(|_| DavError::Status(StatusCode::INTERNAL_SERVER_ERROR))?;
        h.insert("Allow", value);
        if let Some(r) = resource.as_deref() {
            if !r.metadata().is_collection {
                h.insert("Accept-Ranges", HeaderValue::from_static("bytes"));
            }
        }
        Ok(res)
    }
}
