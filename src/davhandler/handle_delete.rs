use headers::HeaderMapExt;
use http::{Request, Response, StatusCode};

use crate::body::Body;
use crate::condition::ConditionCode;
use crate::davhandler::{multistatus_response, DavInner};
use crate::davheaders::Depth;
use crate::davpath::DavPath;
use crate::errors::DavError;
use crate::multistatus::MultiStatus;
use crate::util::DavMethod;
use crate::DavResult;

impl DavInner {
    pub(crate) async fn handle_delete(&self, req: &Request<()>, path: &DavPath) -> DavResult<Response<Body>> {
        // RFC4918 9.6.1: DELETE on a collection must act as if Depth: infinity.
        match req.headers().typed_try_get::<Depth>() {
            Ok(None) | Ok(Some(Depth::Infinity)) => {}
            _ => {
                return Err(ConditionCode::bad_request("DELETE requires Depth: infinity.").into())
            }
        }

        let resource = self
            .resolve(path, DavMethod::DELETE)
            .await?
            .ok_or(DavError::Status(StatusCode::NOT_FOUND))?;
        let mut res = Response::new(Body::empty());
        let mut path = path.clone();
        self.fixpath(&mut res, &mut path, &*resource);
        let meta = resource.metadata().clone();
        if path.is_root() {
            return Err(ConditionCode::forbidden("The root collection cannot be deleted.").into());
        }

        self.preconditions(req, Some(&meta))?;
        let tokens = self.if_tokens(req, Some(&meta), &path).await?;
        self.check_locks(&path, true, &tokens)?;
        self.check_member_locks(&path, &tokens)?;

        let failures = resource.delete().await?;
        if !failures.is_empty() {
            debug!("delete {}: {} members failed", path, failures.len());
            let mut ms = MultiStatus::new()?;
            for (p, cond) in &failures {
                ms.response_status(&self.href(p), cond)?;
            }
            return Ok(multistatus_response(ms.finish()?));
        }

        self.forget(&path)?;

        *res.status_mut() = StatusCode::NO_CONTENT;
        Ok(res)
    }
}
