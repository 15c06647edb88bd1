use std::sync::Arc;
use std::time::SystemTime;

use headers::HeaderMapExt;
use http::{Method, Request};

use crate::condition::ConditionCode;
use crate::davheaders::{self, ETagList, IfItem, IfList};
use crate::davpath::DavPath;
use crate::ls::DavLockSystem;
use crate::service::{DavService, EntityMetadata};
use crate::util::truncate_secs;

// compare at HTTP-date resolution.
fn modified_secs(meta: &EntityMetadata) -> Option<SystemTime> {
    meta.modified.map(truncate_secs)
}

fn is_get_or_head(req: &Request<()>) -> bool {
    *req.method() == Method::GET || *req.method() == Method::HEAD
}

/// Evaluate If-Match, If-Unmodified-Since, If-None-Match and
/// If-Modified-Since, in that order. `meta` is `None` for an unmapped URL.
///
/// Returns the status to answer with, or `None` to go ahead.
pub(crate) fn http_preconditions(
    req: &Request<()>,
    meta: Option<&EntityMetadata>,
) -> Option<ConditionCode> {
    let etag = meta.and_then(|m| m.etag.as_ref());

    // If-Match
    if let Some(davheaders::IfMatch(list)) = req.headers().typed_get::<davheaders::IfMatch>() {
        let ok = match list {
            ETagList::Star => meta.is_some(),
            ETagList::Tags(tags) => etag.map_or(false, |e| tags.iter().any(|t| t.strong_eq(e))),
        };
        if !ok {
            trace!("precondition fail: If-Match");
            return Some(ConditionCode::precondition_failed());
        }
    }

    // If-Unmodified-Since
    if let Some(davheaders::IfUnmodifiedSince(date)) = req.headers().typed_get() {
        if let Some(modified) = meta.and_then(modified_secs) {
            if modified > truncate_secs(date) {
                trace!("precondition fail: If-Unmodified-Since");
                return Some(ConditionCode::precondition_failed());
            }
        }
    }

    // If-None-Match
    let inm = req.headers().typed_get::<davheaders::IfNoneMatch>();
    if let Some(davheaders::IfNoneMatch(list)) = inm.as_ref() {
        let matched = match list {
            ETagList::Star => meta.is_some(),
            ETagList::Tags(tags) => etag.map_or(false, |e| tags.iter().any(|t| t.weak_eq(e))),
        };
        if matched {
            trace!("precondition fail: If-None-Match");
            return Some(if is_get_or_head(req) {
                ConditionCode::not_modified()
            } else {
                ConditionCode::precondition_failed()
            });
        }
    }

    // If-Modified-Since, only if there was no If-None-Match.
    if inm.is_none() {
        if let Some(davheaders::IfModifiedSince(date)) = req.headers().typed_get() {
            if let Some(modified) = meta.and_then(modified_secs) {
                if modified <= truncate_secs(date) {
                    trace!("precondition fail: If-Modified-Since");
                    return Some(if is_get_or_head(req) {
                        ConditionCode::not_modified()
                    } else {
                        ConditionCode::precondition_failed()
                    });
                }
            }
        }
    }
    None
}

/// Does If-Range (if present) allow a partial response?
pub(crate) fn if_range_matches(req: &Request<()>, meta: &EntityMetadata) -> bool {
    match req.headers().typed_get::<davheaders::IfRange>() {
        None => true,
        Some(davheaders::IfRange::ETag(tag)) => {
            meta.etag.as_ref().map_or(false, |e| e.strong_eq(&tag))
        }
        Some(davheaders::IfRange::Date(date)) => {
            modified_secs(meta).map_or(false, |m| m == truncate_secs(date))
        }
    }
}

// evaluate one list of the If header against one resource.
fn list_matches(
    list: &IfList,
    path: &DavPath,
    meta: Option<&EntityMetadata>,
    ls: Option<&Arc<dyn DavLockSystem>>,
) -> bool {
    list.conditions.iter().all(|cond| {
        let hit = match &cond.item {
            IfItem::StateToken(token) => {
                // DAV:no-lock never names a lock.
                token != "DAV:no-lock"
                    && ls.map_or(false, |ls| {
                        ls.discover(path, true, false).iter().any(|l| l.token == *token)
                    })
            }
            IfItem::ETag(tag) => meta
                .and_then(|m| m.etag.as_ref())
                .map_or(false, |e| e.strong_eq(tag)),
        };
        hit != cond.not
    })
}

// the path part of a resource tag, as a path in this location.
fn tagged_path(tag: &str, prefix: &str) -> Option<DavPath> {
    let raw = if tag.starts_with('/') {
        tag.to_string()
    } else {
        url::Url::parse(tag).ok()?.path().to_string()
    };
    DavPath::from_raw_and_prefix(&raw, prefix).ok()
}

/// Evaluate the WebDAV `If` header.
///
/// Untagged lists apply to the request resource, tagged lists to the
/// resource they name. The header matches if any list matches. On a
/// match, all state tokens submitted in the header are returned so they
/// can be used to satisfy lock checks. A missing header always matches.
pub(crate) async fn if_match_get_tokens(
    req: &Request<()>,
    meta: Option<&EntityMetadata>,
    service: &dyn DavService,
    ls: Option<&Arc<dyn DavLockSystem>>,
    path: &DavPath,
) -> Result<Vec<String>, ConditionCode> {
    let lists = match req.headers().typed_try_get::<davheaders::If>() {
        Ok(Some(davheaders::If(lists))) => lists,
        Ok(None) => return Ok(Vec::new()),
        Err(_) => return Err(ConditionCode::bad_request("The If header is malformed.")),
    };

    let mut matched = false;
    for list in &lists {
        let ok = match list.resource_tag.as_deref() {
            None => list_matches(list, path, meta, ls),
            Some(tag) => match tagged_path(tag, path.prefix()) {
                Some(tpath) => {
                    let res = service.resolve(&tpath).await?;
                    list_matches(list, &tpath, res.as_ref().map(|r| r.metadata()), ls)
                }
                None => false,
            },
        };
        if ok {
            matched = true;
            break;
        }
    }
    if !matched {
        debug!("If header did not match for {}", path);
        return Err(ConditionCode::precondition_failed());
    }

    Ok(lists
        .iter()
        .flat_map(|l| l.tokens())
        .map(|t| t.to_string())
        .collect())
}
