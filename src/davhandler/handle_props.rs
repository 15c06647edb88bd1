//! PROPFIND and PROPPATCH.
use bytes::Bytes;
use headers::HeaderMapExt;
use http::{Request, Response, StatusCode};

use crate::body::Body;
use crate::condition::ConditionCode;
use crate::davhandler::handle_lock::{lockdiscovery, supportedlock};
use crate::davhandler::{multistatus_response, DavInner, PropPatchAtomicity, PropPatchReport};
use crate::davheaders::Depth;
use crate::davpath::DavPath;
use crate::errors::DavError;
use crate::multistatus::{MultiStatus, PropStat};
use crate::props::PropMap;
use crate::service::DavResource;
use crate::util::{systemtime_to_httpdate, systemtime_to_rfc3339, DavMethod};
use crate::xmldom::{Element, QName, NS_DAV_URI};
use crate::xmltype::coerce;
use crate::DavResult;

// Live properties computed from the resource. None of them can be set.
const LIVE_PROPS: &[&str] = &[
    "creationdate",
    "displayname",
    "getcontentlength",
    "getcontenttype",
    "getetag",
    "getlastmodified",
    "lockdiscovery",
    "resourcetype",
    "supportedlock",
];

// What a PROPFIND asks for.
enum PropFind {
    AllProp,
    PropName,
    Prop(Vec<QName>),
}

fn parse_propfind(body: &[u8]) -> DavResult<PropFind> {
    if body.is_empty() {
        return Ok(PropFind::AllProp);
    }
    let tree = Element::parse(body)?;
    if !tree.is(NS_DAV_URI, "propfind") {
        return Err(ConditionCode::bad_request("Expected a propfind element.").into());
    }
    // DAV:include only names properties that allprop returns anyway.
    for elem in tree.child_elems() {
        if elem.is(NS_DAV_URI, "allprop") {
            return Ok(PropFind::AllProp);
        }
        if elem.is(NS_DAV_URI, "propname") {
            return Ok(PropFind::PropName);
        }
        if elem.is(NS_DAV_URI, "prop") {
            let names = elem.child_elems().map(|e| e.name.clone()).collect();
            return Ok(PropFind::Prop(names));
        }
    }
    Err(ConditionCode::bad_request("Expected allprop, propname or prop.").into())
}

// One set or remove, as found in a PROPPATCH body.
enum Patch {
    Set(Element),
    Remove(QName),
}

struct Outcome {
    name: QName,
    status: ConditionCode,
    // what to apply, as long as the status is a success.
    patch: Option<Patch>,
}

// Which status wins when the outcomes of a property are merged.
fn severity(c: &ConditionCode) -> u8 {
    if !c.is_error() {
        0
    } else if c.status() == StatusCode::FAILED_DEPENDENCY {
        1
    } else {
        2
    }
}

// Group outcomes by status, in order of first appearance. A property
// appears at most once in each group.
fn group_outcomes<'a>(outcomes: impl Iterator<Item = (&'a QName, &'a ConditionCode)>) -> Vec<PropStat> {
    let mut groups: Vec<PropStat> = Vec::new();
    for (name, status) in outcomes {
        let idx = match groups.iter().position(|g| g.status == *status) {
            Some(i) => i,
            None => {
                groups.push(PropStat::new(status.clone()));
                groups.len() - 1
            }
        };
        let group = &mut groups[idx];
        if !group.props.iter().any(|p| p.name == *name) {
            group.props.push(Element::new(name.clone()));
        }
    }
    groups
}

impl DavInner {
    // All live properties this resource has a value for.
    fn live_props(&self, res: &dyn DavResource, path: &DavPath) -> Vec<Element> {
        let meta = res.metadata();
        let mut v = Vec::new();
        if let Some(created) = meta.created {
            v.push(Element::dav("creationdate").with_text(systemtime_to_rfc3339(created)));
        }
        v.push(Element::dav("displayname").with_text(res.member_name()));
        if !meta.is_collection {
            if let Some(len) = meta.length {
                v.push(Element::dav("getcontentlength").with_text(len.to_string()));
            }
            if let Some(ct) = meta.media_type.as_ref() {
                v.push(Element::dav("getcontenttype").with_text(ct.as_str()));
            }
        }
        if let Some(etag) = meta.etag.as_ref() {
            v.push(Element::dav("getetag").with_text(etag.to_string()));
        }
        if let Some(modified) = meta.modified {
            v.push(Element::dav("getlastmodified").with_text(systemtime_to_httpdate(modified)));
        }
        let mut rt = Element::dav("resourcetype");
        if meta.is_collection {
            rt.push(Element::dav("collection"));
        }
        v.push(rt);
        if let Some(ls) = self.ls.as_ref() {
            let locks = ls.discover(path, true, false);
            v.push(lockdiscovery(&locks, self.encode_percent));
            v.push(supportedlock());
        }
        v.extend(res.live_properties());
        v
    }

    fn dead_props(&self, path: &DavPath) -> DavResult<PropMap> {
        match self.props.as_ref() {
            Some(p) => Ok(p.get_props(path)?),
            None => Ok(PropMap::new()),
        }
    }

    // The DAV:response of one resource.
    fn propfind_one(
        &self,
        ms: &mut MultiStatus,
        res: &dyn DavResource,
        path: &DavPath,
        req: &PropFind,
    ) -> DavResult<()> {
        let href = self.href(path);
        let live = self.live_props(res, path);
        let dead = self.dead_props(path)?;

        let mut ok = PropStat::new(ConditionCode::ok());
        let mut missing = PropStat::new(ConditionCode::not_found());
        match req {
            PropFind::AllProp => {
                ok.props.extend(live);
                ok.props.extend(dead.into_values());
            }
            PropFind::PropName => {
                ok.props.extend(live.iter().map(|e| Element::new(e.name.clone())));
                ok.props.extend(dead.into_keys().map(Element::new));
            }
            PropFind::Prop(names) => {
                for name in names {
                    if let Some(e) = live.iter().find(|e| e.name == *name) {
                        ok.props.push(e.clone());
                    } else if let Some(e) = dead.get(name) {
                        ok.props.push(e.clone());
                    } else {
                        missing.props.push(Element::new(name.clone()));
                    }
                }
            }
        }

        let mut propstats = Vec::new();
        if !ok.props.is_empty() || missing.props.is_empty() {
            propstats.push(ok);
        }
        if !missing.props.is_empty() {
            propstats.push(missing);
        }
        ms.response_propstats(&href, &propstats)
    }

    pub(crate) async fn handle_propfind(
        &self,
        req: &Request<()>,
        path: &DavPath,
        body: &Bytes,
    ) -> DavResult<Response<Body>> {
        let depth = match req.headers().typed_try_get::<Depth>() {
            Ok(Some(d)) => d,
            Ok(None) => Depth::Infinity,
            Err(_) => return Err(ConditionCode::bad_request("The Depth header is malformed.").into()),
        };
        if depth == Depth::Infinity && !self.allow_infinite_propfind {
            debug!("refusing infinite depth PROPFIND on {}", path);
            return Err(ConditionCode::propfind_finite_depth().into());
        }
        let find = parse_propfind(body)?;

        let resource = self
            .resolve(path, DavMethod::PROPFIND)
            .await?
            .ok_or(DavError::Status(StatusCode::NOT_FOUND))?;
        let meta = resource.metadata().clone();
        let mut path = path.clone();
        path.add_slash_if(meta.is_collection);
        self.preconditions(req, Some(&meta))?;
        self.if_tokens(req, Some(&meta), &path).await?;

        let mut ms = MultiStatus::new()?;
        self.propfind_one(&mut ms, &*resource, &path, &find)?;

        if depth != Depth::Zero && meta.is_collection {
            let deep = depth == Depth::Infinity;
            let mut pending = resource.children().await?;
            pending.reverse();
            while let Some(child) = pending.pop() {
                let mut cpath = child.path().clone();
                cpath.add_slash_if(child.metadata().is_collection);
                if let Err(cond) = child.check_access(DavMethod::PROPFIND, self.principal.as_deref()) {
                    // a 404 hides the member entirely.
                    if cond.status() != StatusCode::NOT_FOUND {
                        ms.response_status(&self.href(&cpath), &cond)?;
                    }
                    continue;
                }
                self.propfind_one(&mut ms, &*child, &cpath, &find)?;
                if deep && child.metadata().is_collection {
                    let mut members = child.children().await?;
                    members.reverse();
                    pending.extend(members);
                }
            }
        }

        Ok(multistatus_response(ms.finish()?))
    }

    pub(crate) async fn handle_proppatch(
        &self,
        req: &Request<()>,
        path: &DavPath,
        body: &Bytes,
    ) -> DavResult<Response<Body>> {
        let resource = self
            .resolve(path, DavMethod::PROPPATCH)
            .await?
            .ok_or(DavError::Status(StatusCode::NOT_FOUND))?;
        let meta = resource.metadata().clone();
        let mut path = path.clone();
        path.add_slash_if(meta.is_collection);
        self.preconditions(req, Some(&meta))?;
        let tokens = self.if_tokens(req, Some(&meta), &path).await?;
        self.check_locks(&path, false, &tokens)?;

        let tree = Element::parse(body)?;
        if !tree.is(NS_DAV_URI, "propertyupdate") {
            return Err(ConditionCode::bad_request("Expected a propertyupdate element.").into());
        }

        let mut protected: Vec<QName> = LIVE_PROPS.iter().map(|n| QName::dav(*n)).collect();
        protected.extend(resource.live_properties().into_iter().map(|e| e.name));

        // evaluate every instruction in document order, one block per
        // set or remove element.
        let mut blocks: Vec<Vec<Outcome>> = Vec::new();
        for instr in tree.child_elems() {
            let is_set = if instr.is(NS_DAV_URI, "set") {
                true
            } else if instr.is(NS_DAV_URI, "remove") {
                false
            } else {
                continue;
            };
            let mut block = Vec::new();
            for prop in instr.child_elems().filter(|e| e.is(NS_DAV_URI, "prop")) {
                let lang = prop
                    .lang
                    .as_ref()
                    .or(instr.lang.as_ref())
                    .or(tree.lang.as_ref());
                for elem in prop.child_elems() {
                    let name = elem.name.clone();
                    let (status, patch) = if protected.contains(&name) {
                        (ConditionCode::cannot_modify_protected_property(), None)
                    } else if self.props.is_none() {
                        let msg = "This resource does not support dead properties.";
                        (ConditionCode::forbidden(msg), None)
                    } else if is_set {
                        let mut value = elem.clone();
                        if value.lang.is_none() {
                            value.lang = lang.cloned();
                        }
                        match coerce(&value) {
                            Ok(v) => (ConditionCode::ok(), Some(Patch::Set(v))),
                            Err(cond) => (cond, None),
                        }
                    } else {
                        (ConditionCode::ok(), Some(Patch::Remove(name.clone())))
                    };
                    block.push(Outcome {
                        name,
                        status,
                        patch,
                    });
                }
            }
            blocks.push(block);
        }

        // a failure dooms the rest of its block, or of the whole request.
        let failed: Vec<bool> = blocks
            .iter()
            .map(|b| b.iter().any(|o| o.status.is_error()))
            .collect();
        let any_failed = failed.iter().any(|f| *f);
        for (block, block_failed) in blocks.iter_mut().zip(failed) {
            let doomed = match self.proppatch_atomicity {
                PropPatchAtomicity::Request => any_failed,
                PropPatchAtomicity::Block => block_failed,
            };
            if doomed {
                for o in block.iter_mut().filter(|o| !o.status.is_error()) {
                    o.status = ConditionCode::failed_dependency();
                    o.patch = None;
                }
            }
        }

        let result = match self.props.as_ref() {
            Some(props) => {
                let patches: Vec<&Patch> = blocks
                    .iter()
                    .flatten()
                    .filter_map(|o| o.patch.as_ref())
                    .collect();
                if patches.is_empty() {
                    Ok(())
                } else {
                    props.patch_props(&path, &mut |map: &mut PropMap| {
                        for p in &patches {
                            match p {
                                Patch::Set(e) => {
                                    map.insert(e.name.clone(), e.clone());
                                }
                                Patch::Remove(n) => {
                                    map.remove(n);
                                }
                            }
                        }
                        true
                    })
                }
            }
            None => Ok(()),
        };
        if let Err(cond) = result {
            error!("proppatch {}: could not store properties: {}", path, cond);
            for o in blocks.iter_mut().flatten().filter(|o| o.patch.is_some()) {
                o.status = cond.clone();
            }
        }

        let outcomes: Vec<&Outcome> = blocks.iter().flatten().collect();
        let propstats = match self.proppatch_report {
            PropPatchReport::PerInstruction => {
                group_outcomes(outcomes.iter().map(|o| (&o.name, &o.status)))
            }
            PropPatchReport::Merged => {
                let mut merged: Vec<(&QName, &ConditionCode)> = Vec::new();
                for o in outcomes.iter().copied() {
                    match merged.iter_mut().find(|(n, _)| **n == o.name) {
                        Some(entry) => {
                            if severity(&o.status) > severity(entry.1) {
                                entry.1 = &o.status;
                            }
                        }
                        None => merged.push((&o.name, &o.status)),
                    }
                }
                group_outcomes(merged.into_iter())
            }
        };

        let mut ms = MultiStatus::new()?;
        ms.response_propstats(&self.href(&path), &propstats)?;
        Ok(multistatus_response(ms.finish()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q(name: &str) -> QName {
        QName::new("TEST:", name)
    }

    #[test]
    fn propfind_bodies() {
        assert!(matches!(parse_propfind(b"").unwrap(), PropFind::AllProp));
        let body = br#"<D:propfind xmlns:D="DAV:"><D:propname/></D:propfind>"#;
        assert!(matches!(parse_propfind(body).unwrap(), PropFind::PropName));
        let body = br#"<propfind xmlns="DAV:"><prop><resourcetype/><foo xmlns="TEST:"/></prop></propfind>"#;
        match parse_propfind(body).unwrap() {
            PropFind::Prop(names) => assert_eq!(names, vec![QName::dav("resourcetype"), q("foo")]),
            _ => panic!("expected prop"),
        }
        assert!(parse_propfind(b"<x xmlns=\"DAV:\"/>").is_err());
    }

    #[test]
    fn grouping_keeps_first_appearance() {
        let ok = ConditionCode::ok();
        let dep = ConditionCode::failed_dependency();
        let bad = ConditionCode::unprocessable("bad");
        let (a, b) = (q("a"), q("b"));
        let groups = group_outcomes(
            vec![(&a, &dep), (&b, &bad), (&a, &dep), (&b, &ok)].into_iter(),
        );
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0].status.status(), StatusCode::FAILED_DEPENDENCY);
        assert_eq!(groups[0].props.len(), 1);
        assert_eq!(groups[1].status.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(groups[2].status.status(), StatusCode::OK);
    }

    #[test]
    fn severity_order() {
        assert!(severity(&ConditionCode::unprocessable("x")) > severity(&ConditionCode::failed_dependency()));
        assert!(severity(&ConditionCode::failed_dependency()) > severity(&ConditionCode::ok()));
    }
}
