use bytes::Bytes;
use headers::HeaderMapExt;
use http::{Request, Response, StatusCode};

use crate::body::Body;
use crate::condition::ConditionCode;
use crate::davhandler::DavInner;
use crate::davpath::DavPath;
use crate::util::DavMethod;
use crate::DavResult;

impl DavInner {
    pub(crate) async fn handle_mkcol(
        &self,
        req: &Request<()>,
        path: &DavPath,
        body: &Bytes,
    ) -> DavResult<Response<Body>> {
        // no extended MKCOL.
        if !body.is_empty() {
            return Err(ConditionCode::with_message(
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                "MKCOL request bodies are not supported.",
            )
            .into());
        }

        let resource = self.resolve(path, DavMethod::MKCOL).await?;
        let meta = resource.as_ref().map(|r| r.metadata().clone());
        self.preconditions(req, meta.as_ref())?;
        if resource.is_some() {
            return Err(ConditionCode::method_not_allowed().into());
        }

        let tokens = self.if_tokens(req, None, path).await?;
        self.check_locks(path, false, &tokens)?;
        self.check_member_locks(path, &tokens)?;

        self.service.make_collection(path).await?;

        let mut res = Response::new(Body::empty());
        *res.status_mut() = StatusCode::CREATED;
        res.headers_mut().typed_insert(headers::ContentLength(0));
        Ok(res)
    }
}
