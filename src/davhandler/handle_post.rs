use bytes::Bytes;
use http::{Request, Response};

use crate::body::Body;
use crate::davhandler::DavInner;
use crate::davpath::DavPath;
use crate::util::DavMethod;
use crate::DavResult;

impl DavInner {
    // POST means whatever the resource says it means.
    pub(crate) async fn handle_post(
        &self,
        req: &Request<()>,
        path: &DavPath,
        body: Bytes,
    ) -> DavResult<Response<Body>> {
        let resource = self.resolve(path, DavMethod::POST).await?;
        let meta = resource.as_ref().map(|r| r.metadata().clone());
        self.preconditions(req, meta.as_ref())?;
        let tokens = self.if_tokens(req, meta.as_ref(), path).await?;
        self.check_locks(path, false, &tokens)?;

        let res = match resource {
            Some(r) => r.post(req, body).await?,
            None => self.service.post(req, body).await?,
        };
        Ok(res)
    }
}
