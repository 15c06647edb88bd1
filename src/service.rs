//! Contains the structs and traits that define a service backend.
//!
//! A [`DavService`] owns a part of the URL space and resolves paths to
//! [`DavResource`]s. The method processors only ever talk to these two
//! traits. Every operation has a default that answers with a fixed
//! status, so an implementation only overrides what it supports.
use std::fmt::Debug;
use std::time::SystemTime;

use bytes::Bytes;
use futures_util::future::{self, BoxFuture, FutureExt};
use http::{Request, Response, StatusCode};

use crate::body::Body;
use crate::condition::ConditionCode;
use crate::davheaders::{ContentRange, EntityTag};
use crate::davpath::DavPath;
use crate::util::{DavMethod, DavMethodSet};
use crate::xmldom::Element;

/// Future returned by service and resource operations.
pub type DavFuture<'a, T> = BoxFuture<'a, Result<T, ConditionCode>>;

fn fail<'a, T: Send + 'a>(code: ConditionCode) -> DavFuture<'a, T> {
    future::ready(Err(code)).boxed()
}

/// Metadata of an entity, used for the HTTP validators and the
/// `DAV:get*` properties.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EntityMetadata {
    pub length: Option<u64>,
    pub modified: Option<SystemTime>,
    pub created: Option<SystemTime>,
    pub etag: Option<EntityTag>,
    pub media_type: Option<String>,
    pub is_collection: bool,
}

/// A resolved resource.
pub trait DavResource: Send + Sync {
    /// The canonical path. Collections end in a slash.
    fn path(&self) -> &DavPath;

    fn metadata(&self) -> &EntityMetadata;

    /// Value of `DAV:displayname`.
    fn member_name(&self) -> String {
        self.path().file_name().to_string()
    }

    /// Members of a collection.
    fn children<'a>(&'a self) -> DavFuture<'a, Vec<Box<dyn DavResource>>> {
        future::ready(Ok(Vec::new())).boxed()
    }

    /// Read `count` bytes (or everything) starting at `start`.
    fn read<'a>(&'a self, _start: u64, _count: Option<u64>) -> DavFuture<'a, Bytes> {
        fail(ConditionCode::method_not_allowed())
    }

    /// Live properties beyond the standard `DAV:` set.
    fn live_properties(&self) -> Vec<Element> {
        Vec::new()
    }

    /// Authorization hook, called right after the resource is resolved.
    fn check_access(&self, _method: DavMethod, _principal: Option<&str>) -> Result<(), ConditionCode> {
        Ok(())
    }

    /// Delete the resource and its members. Returns the members that
    /// could not be deleted.
    fn delete<'a>(&'a self) -> DavFuture<'a, Vec<(DavPath, ConditionCode)>> {
        fail(ConditionCode::forbidden("This resource does not support deletion."))
    }

    /// Replace the content, or with `range` a part of it.
    fn write<'a>(&'a self, _data: Bytes, _range: Option<ContentRange>) -> DavFuture<'a, ()> {
        fail(ConditionCode::forbidden(
            "This resource does not support setting its content.",
        ))
    }

    /// Whether LOCK may be applied to this resource.
    fn lockable(&self) -> Result<(), ConditionCode> {
        Err(ConditionCode::forbidden("This resource cannot be locked."))
    }

    fn post<'a>(&'a self, _req: &'a Request<()>, _body: Bytes) -> DavFuture<'a, Response<Body>> {
        fail(ConditionCode::method_not_allowed())
    }

    /// Handle a method the engine does not know. `None` passes it on.
    fn handle_generic<'a>(
        &'a self,
        _req: &'a Request<()>,
        _body: &'a Bytes,
    ) -> Option<DavFuture<'a, Response<Body>>> {
        None
    }
}

/// A service serving one location.
pub trait DavService: Debug + Send + Sync {
    /// Resolve a path. `Ok(None)` means the URL is unmapped.
    fn resolve<'a>(&'a self, path: &'a DavPath) -> DavFuture<'a, Option<Box<dyn DavResource>>>;

    fn make_collection<'a>(&'a self, _path: &'a DavPath) -> DavFuture<'a, ()> {
        fail(ConditionCode::forbidden(
            "This service does not support the creation of new collections.",
        ))
    }

    /// Create a new entity at an unmapped URL.
    fn create<'a>(&'a self, _path: &'a DavPath, _data: Bytes) -> DavFuture<'a, ()> {
        fail(ConditionCode::forbidden(
            "This service does not support the creation or alteration of resource entities.",
        ))
    }

    /// Create an empty entity for a LOCK on an unmapped URL.
    fn create_and_lock<'a>(&'a self, _path: &'a DavPath) -> DavFuture<'a, ()> {
        fail(ConditionCode::forbidden(
            "This service does not support the locking of new resources.",
        ))
    }

    /// Copy or move `src` to `dst`, which is unmapped by the time this is
    /// called. Returns the members that failed.
    fn copy_or_move<'a>(
        &'a self,
        _src: &'a DavPath,
        _dst: &'a DavPath,
        _is_move: bool,
        _deep: bool,
    ) -> DavFuture<'a, Vec<(DavPath, ConditionCode)>> {
        fail(ConditionCode::forbidden(
            "This service does not support copying or moving resources.",
        ))
    }

    /// POST to an unmapped URL.
    fn post<'a>(&'a self, _req: &'a Request<()>, _body: Bytes) -> DavFuture<'a, Response<Body>> {
        fail(ConditionCode::new(StatusCode::NOT_FOUND))
    }

    /// Permission to remove a lock rooted at an unmapped URL. The lock
    /// itself is looked up and removed by canonical path afterwards.
    fn unlock_unmapped<'a>(&'a self, _path: &'a DavPath, _token: &'a str) -> DavFuture<'a, ()> {
        future::ready(Ok(())).boxed()
    }

    /// Handle a method the engine does not know. `None` means 501.
    fn handle_generic<'a>(
        &'a self,
        _req: &'a Request<()>,
        _body: &'a Bytes,
    ) -> Option<DavFuture<'a, Response<Body>>> {
        None
    }

    /// Methods to advertise in `Allow` for a resource (or an unmapped URL).
    fn allowed_methods(&self, _resource: Option<&dyn DavResource>, default: DavMethodSet) -> DavMethodSet {
        default
    }
}
