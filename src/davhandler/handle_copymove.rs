use headers::HeaderMapExt;
use http::{Request, Response, StatusCode};

use crate::body::Body;
use crate::condition::ConditionCode;
use crate::davhandler::{multistatus_response, DavInner};
use crate::davheaders::{self, Depth};
use crate::davpath::DavPath;
use crate::errors::DavError;
use crate::multistatus::MultiStatus;
use crate::util::DavMethod;
use crate::DavResult;

fn bad_request(msg: &str) -> DavError {
    ConditionCode::bad_request(msg).into()
}

impl DavInner {
    // Parse the Destination header into a path in this location. A
    // different host or a path outside the location is a 502.
    fn destination(&self, req: &Request<()>) -> DavResult<DavPath> {
        let dest = match req.headers().typed_try_get::<davheaders::Destination>() {
            Ok(Some(d)) => d.0,
            _ => return Err(bad_request("The Destination header is missing or malformed.")),
        };
        let raw = if dest.starts_with('/') {
            dest
        } else {
            let url = url::Url::parse(&dest)
                .map_err(|_| bad_request("The Destination header is malformed."))?;
            let host = req
                .headers()
                .get(http::header::HOST)
                .and_then(|h| h.to_str().ok())
                .or_else(|| req.uri().authority().map(|a| a.as_str()));
            if let (Some(want), Some(have)) = (url.host_str(), host) {
                let have = match have.rsplit_once(':') {
                    Some((h, p)) if p.chars().all(|c| c.is_ascii_digit()) => h,
                    _ => have,
                };
                let brackets = |c: char| c == '[' || c == ']';
                if !have.trim_matches(brackets).eq_ignore_ascii_case(want.trim_matches(brackets)) {
                    debug!("destination {} is on another server", dest);
                    return Err(DavError::Status(StatusCode::BAD_GATEWAY));
                }
            }
            url.path().to_string()
        };
        DavPath::from_raw_and_prefix(&raw, &self.prefix)
    }

    // A delete result with failed members as a 207.
    fn failures_response(&self, failures: &[(DavPath, ConditionCode)]) -> DavResult<Response<Body>> {
        let mut ms = MultiStatus::new()?;
        for (p, cond) in failures {
            ms.response_status(&self.href(p), cond)?;
        }
        Ok(multistatus_response(ms.finish()?))
    }

    pub(crate) async fn handle_copymove(
        &self,
        req: &Request<()>,
        path: &DavPath,
        method: DavMethod,
    ) -> DavResult<Response<Body>> {
        let is_move = method == DavMethod::MOVE;

        // MOVE on a collection is always Depth: infinity.
        let deep = match req.headers().typed_try_get::<Depth>() {
            Ok(None) | Ok(Some(Depth::Infinity)) => true,
            Ok(Some(Depth::Zero)) if !is_move => false,
            _ => return Err(bad_request("The Depth header is not valid for this method.")),
        };
        let overwrite = match req.headers().typed_try_get::<davheaders::Overwrite>() {
            Ok(Some(o)) => o.0,
            Ok(None) => true,
            Err(_) => return Err(bad_request("The Overwrite header is malformed.")),
        };
        let mut dest = self.destination(req)?;

        let source = self
            .resolve(path, method)
            .await?
            .ok_or(DavError::Status(StatusCode::NOT_FOUND))?;
        let meta = source.metadata().clone();
        let mut path = path.clone();
        path.add_slash_if(meta.is_collection);
        dest.add_slash_if(meta.is_collection);

        if path.key() == dest.key() {
            return Err(ConditionCode::forbidden("The source and destination are the same.").into());
        }
        if (deep || is_move) && meta.is_collection && path.contains(&dest) {
            return Err(ConditionCode::forbidden(
                "The destination is inside the source collection.",
            )
            .into());
        }
        // overwriting an ancestor would delete the source first.
        if dest.contains(&path) {
            return Err(ConditionCode::forbidden("The destination is an ancestor of the source.").into());
        }

        self.preconditions(req, Some(&meta))?;
        let tokens = self.if_tokens(req, Some(&meta), &path).await?;
        if is_move {
            self.check_locks(&path, true, &tokens)?;
            self.check_member_locks(&path, &tokens)?;
        }

        // the destination's current state.
        let target = self.service.resolve(&dest).await?;
        if let Some(t) = target.as_ref() {
            t.check_access(method, self.principal.as_deref())?;
        }
        let existed = target.is_some();
        if existed && !overwrite {
            debug!("copymove: {} exists and Overwrite is F", dest);
            return Err(ConditionCode::precondition_failed().into());
        }
        self.check_locks(&dest, existed, &tokens)?;
        self.check_member_locks(&dest, &tokens)?;

        // an existing destination is deleted first (RFC4918 9.8.4, 9.9.3).
        if let Some(t) = target {
            let failures = t.delete().await?;
            if !failures.is_empty() {
                return self.failures_response(&failures);
            }
            self.forget(&dest)?;
        }

        let failures = self
            .service
            .copy_or_move(&path, &dest, is_move, deep)
            .await?;

        if let Some(props) = self.props.as_ref() {
            if is_move {
                props.move_props(&path, &dest)?;
            } else {
                props.copy_props(&path, &dest, deep)?;
            }
        }
        // locks do not travel with the resource.
        if is_move {
            if let Some(ls) = self.ls.as_ref() {
                ls.delete(&path)?;
            }
        }

        if !failures.is_empty() {
            return self.failures_response(&failures);
        }

        let mut res = Response::new(Body::empty());
        *res.status_mut() = if existed {
            StatusCode::NO_CONTENT
        } else {
            StatusCode::CREATED
        };
        res.headers_mut().typed_insert(headers::ContentLength(0));
        Ok(res)
    }
}
