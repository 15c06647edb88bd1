use bytes::Bytes;
use headers::HeaderMapExt;
use http::header::CONTENT_ENCODING;
use http::{Request, Response, StatusCode};

use crate::body::Body;
use crate::condition::ConditionCode;
use crate::davhandler::DavInner;
use crate::davheaders::{self, ContentRange};
use crate::davpath::DavPath;
use crate::errors::DavError;
use crate::util::DavMethod;
use crate::DavResult;

impl DavInner {
    pub(crate) async fn handle_put(
        &self,
        req: &Request<()>,
        path: &DavPath,
        body: Bytes,
    ) -> DavResult<Response<Body>> {
        // we store what we get, so it had better not be encoded.
        if let Some(enc) = req.headers().get(CONTENT_ENCODING) {
            if !enc.as_bytes().eq_ignore_ascii_case(b"identity") {
                return Err(ConditionCode::with_message(
                    StatusCode::UNSUPPORTED_MEDIA_TYPE,
                    "Content encodings are not supported.",
                )
                .into());
            }
        }
        if path.is_collection() {
            return Err(ConditionCode::method_not_allowed().into());
        }

        let range = match req.headers().typed_try_get::<ContentRange>() {
            Ok(r) => r,
            Err(_) => {
                return Err(ConditionCode::bad_request("The Content-Range header is malformed.").into())
            }
        };
        if let Some(r) = range.as_ref() {
            if r.start().is_none() || r.length() != Some(body.len() as u64) {
                return Err(ConditionCode::bad_request(
                    "The Content-Range header does not match the request body.",
                )
                .into());
            }
        }

        let resource = self.resolve(path, DavMethod::PUT).await?;
        let meta = resource.as_ref().map(|r| r.metadata().clone());
        if meta.as_ref().map_or(false, |m| m.is_collection) {
            return Err(ConditionCode::method_not_allowed().into());
        }

        self.preconditions(req, meta.as_ref())?;
        let tokens = self.if_tokens(req, meta.as_ref(), path).await?;
        self.check_locks(path, false, &tokens)?;

        let mut res = Response::new(Body::empty());
        match resource {
            Some(r) => {
                r.write(body, range).await?;
                *res.status_mut() = StatusCode::NO_CONTENT;
            }
            None => {
                self.check_member_locks(path, &tokens)?;
                if range.and_then(|r| r.start()).unwrap_or(0) > 0 {
                    return Err(DavError::Status(StatusCode::RANGE_NOT_SATISFIABLE));
                }
                self.service.create(path, body).await?;
                *res.status_mut() = StatusCode::CREATED;
            }
        }

        // the new validator, if the service has one.
        if let Ok(Some(r)) = self.service.resolve(path).await {
            if let Some(etag) = r.metadata().etag.as_ref() {
                res.headers_mut().typed_insert(davheaders::ETag(etag.clone()));
            }
        }
        res.headers_mut().typed_insert(headers::ContentLength(0));
        Ok(res)
    }
}
