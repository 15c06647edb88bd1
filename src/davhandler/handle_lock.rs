use std::time::{Duration, SystemTime};

use bytes::Bytes;
use headers::HeaderMapExt;
use http::{Request, Response, StatusCode};

use crate::body::Body;
use crate::condition::ConditionCode;
use crate::davhandler::{xml_body, DavInner};
use crate::davheaders::{self, Depth};
use crate::davpath::DavPath;
use crate::errors::DavError;
use crate::ls::DavLock;
use crate::util::DavMethod;
use crate::xmldom::{Element, NS_DAV_URI};
use crate::DavResult;

fn timeout_text(timeout: Option<Duration>) -> String {
    match timeout {
        Some(d) => format!("Second-{}", d.as_secs()),
        None => "Infinite".to_string(),
    }
}

/// `DAV:activelock` for a lock.
pub(crate) fn activelock(lock: &DavLock, encode_percent: bool, now: SystemTime) -> Element {
    let scope = if lock.shared { "shared" } else { "exclusive" };
    let mut e = Element::dav("activelock")
        .with_child(Element::dav("locktype").with_child(Element::dav("write")))
        .with_child(Element::dav("lockscope").with_child(Element::dav(scope)))
        .with_child(Element::dav("depth").with_text(if lock.deep { "infinity" } else { "0" }));
    if let Some(owner) = lock.owner.as_ref() {
        e.push(owner.clone());
    }
    let left = lock.seconds_left(now).map(Duration::from_secs);
    e.push(Element::dav("timeout").with_text(timeout_text(left)));
    e.push(Element::dav("locktoken").with_child(Element::dav("href").with_text(lock.token.as_str())));
    e.push(
        Element::dav("lockroot")
            .with_child(Element::dav("href").with_text(lock.path.as_url_string_with(encode_percent))),
    );
    e
}

/// `DAV:lockdiscovery` listing `locks`.
pub(crate) fn lockdiscovery(locks: &[DavLock], encode_percent: bool) -> Element {
    let now = SystemTime::now();
    let mut e = Element::dav("lockdiscovery");
    for l in locks {
        e.push(activelock(l, encode_percent, now));
    }
    e
}

/// `DAV:supportedlock`: exclusive and shared write locks.
pub(crate) fn supportedlock() -> Element {
    let entry = |scope: &str| {
        Element::dav("lockentry")
            .with_child(Element::dav("lockscope").with_child(Element::dav(scope)))
            .with_child(Element::dav("locktype").with_child(Element::dav("write")))
    };
    Element::dav("supportedlock")
        .with_child(entry("exclusive"))
        .with_child(entry("shared"))
}

// the lock scope and owner from a DAV:lockinfo body.
fn parse_lockinfo(body: &[u8]) -> DavResult<(bool, Option<Element>)> {
    let bad = |msg: &str| -> DavError { ConditionCode::bad_request(msg).into() };
    let tree = Element::parse(body)?;
    if !tree.is(NS_DAV_URI, "lockinfo") {
        return Err(bad("Expected a lockinfo element."));
    }
    let shared = match tree
        .find(NS_DAV_URI, "lockscope")
        .and_then(|s| s.child_elems().next())
    {
        Some(s) if s.is(NS_DAV_URI, "exclusive") => false,
        Some(s) if s.is(NS_DAV_URI, "shared") => true,
        _ => return Err(bad("The lock scope is missing or invalid.")),
    };
    match tree
        .find(NS_DAV_URI, "locktype")
        .and_then(|t| t.child_elems().next())
    {
        Some(t) if t.is(NS_DAV_URI, "write") => {}
        _ => return Err(bad("The lock type is missing or invalid.")),
    }
    Ok((shared, tree.find(NS_DAV_URI, "owner").cloned()))
}

impl DavInner {
    fn lock_response(&self, lock: &DavLock, status: StatusCode, new: bool) -> DavResult<Response<Body>> {
        let prop = Element::dav("prop").with_child(lockdiscovery(
            std::slice::from_ref(lock),
            self.encode_percent,
        ));
        let mut res = Response::new(Body::empty());
        *res.status_mut() = status;
        if new {
            res.headers_mut()
                .typed_insert(davheaders::LockToken(lock.token.clone()));
        }
        xml_body(&mut res, prop.to_document()?);
        Ok(res)
    }

    pub(crate) async fn handle_lock(
        &self,
        req: &Request<()>,
        path: &DavPath,
        body: &Bytes,
    ) -> DavResult<Response<Body>> {
        let ls = match self.ls.as_ref() {
            Some(ls) => ls.clone(),
            None => return Err(ConditionCode::method_not_allowed().into()),
        };

        let deep = match req.headers().typed_try_get::<Depth>() {
            Ok(None) | Ok(Some(Depth::Infinity)) => true,
            Ok(Some(Depth::Zero)) => false,
            _ => {
                return Err(ConditionCode::bad_request("LOCK requires Depth: 0 or infinity.").into())
            }
        };
        let timeout = self.lock_timeout(req)?;

        let resource = self.resolve(path, DavMethod::LOCK).await?;
        let mut path = path.clone();
        let meta = resource.as_ref().map(|r| r.metadata().clone());
        path.add_slash_if(meta.as_ref().map_or(false, |m| m.is_collection));
        self.preconditions(req, meta.as_ref())?;
        let tokens = self.if_tokens(req, meta.as_ref(), &path).await?;

        // an empty body refreshes a lock named in the If header.
        if body.is_empty() {
            let current = ls.discover(&path, true, false);
            let lock = tokens
                .iter()
                .find_map(|t| current.iter().find(|l| l.token == *t))
                .ok_or_else(ConditionCode::lock_token_matches_request_uri_412)?;
            let lock = ls
                .refresh(&lock.token, timeout)
                .map_err(|_| ConditionCode::lock_token_matches_request_uri_412())?;
            debug!("refreshed lock {} on {}", lock.token, path);
            return self.lock_response(&lock, StatusCode::OK, false);
        }

        let (shared, owner) = parse_lockinfo(body)?;
        match resource.as_ref() {
            Some(r) => r.lockable()?,
            // creating the empty resource adds a member to the parent.
            None => self.check_member_locks(&path, &tokens)?,
        }

        let lock = ls.lock(
            &path,
            self.principal.as_deref(),
            owner.as_ref(),
            timeout,
            shared,
            deep,
        )?;
        debug!("created lock {} on {}", lock.token, path);

        // LOCK on an unmapped URL creates an empty resource.
        if resource.is_none() {
            if let Err(e) = self.service.create_and_lock(&path).await {
                if let Err(e2) = ls.unlock(&lock) {
                    error!("could not remove lock {}: {}", lock.token, e2);
                }
                return Err(e.into());
            }
            return self.lock_response(&lock, StatusCode::CREATED, true);
        }
        self.lock_response(&lock, StatusCode::OK, true)
    }

    pub(crate) async fn handle_unlock(&self, req: &Request<()>, path: &DavPath) -> DavResult<Response<Body>> {
        let token = match req.headers().typed_try_get::<davheaders::LockToken>() {
            Ok(Some(t)) => t.0,
            _ => return Err(ConditionCode::bad_request("Expected a valid Lock-Token header.").into()),
        };

        let resource = self.resolve(path, DavMethod::UNLOCK).await?;
        let mut path = path.clone();
        let meta = resource.as_ref().map(|r| r.metadata().clone());
        path.add_slash_if(meta.as_ref().map_or(false, |m| m.is_collection));
        self.preconditions(req, meta.as_ref())?;

        let ls = match self.ls.as_ref() {
            Some(ls) => ls,
            None => return Err(ConditionCode::method_not_allowed().into()),
        };
        if resource.is_none() {
            self.service.unlock_unmapped(&path, &token).await?;
        }

        let lock = ls
            .get_lock(&token, &path)
            .ok_or_else(ConditionCode::lock_token_matches_request_uri)?;
        if let (Some(owner), Some(p)) = (lock.principal.as_deref(), self.principal.as_deref()) {
            if owner != p {
                return Err(ConditionCode::forbidden("You do not have permission to delete this lock.").into());
            }
        }
        ls.unlock(&lock)?;
        debug!("removed lock {} on {}", lock.token, path);

        let mut res = Response::new(Body::empty());
        *res.status_mut() = StatusCode::NO_CONTENT;
        Ok(res)
    }
}
