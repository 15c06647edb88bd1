//! ## WebDAV protocol engine
//!
//! [`Webdav`] (RFC4918) is defined as HTTP (GET/HEAD/PUT/DELETE) plus a
//! bunch of extension methods (PROPFIND, PROPPATCH, LOCK, etc). This
//! library is a `handler`: it takes a `http::Request`, works out which
//! service owns the URL, runs the method against that service, and
//! produces a `http::Response`.
//!
//! What the engine does itself:
//!
//! - conditional requests: `If-Match`, `If-None-Match`, `If-Modified-Since`,
//!   `If-Unmodified-Since`, `If-Range` and the WebDAV `If` header with
//!   lock token assertions.
//! - byte ranges, including `multipart/byteranges` responses.
//! - write locks (exclusive and shared, depth 0 and infinity, timeouts),
//!   through a [lock system][DavLockSystem].
//! - dead properties with XML Schema typed values (`xsi:type`), through a
//!   [property store][DavPropStore].
//! - `207 Multi-Status` responses for PROPFIND, PROPPATCH and partial
//!   failures of DELETE, COPY and MOVE.
//!
//! ## Backend interfaces.
//!
//! - a [service][DavService] owns a part of the URL space and resolves paths
//!   to [resources][DavResource]. Every operation has a default that answers
//!   with a fixed status, so a service only implements what it supports.
//! - a [lock system][DavLockSystem] keeps the lock table. [`MemLs`] keeps it
//!   in memory and can persist it to a [`DavLockStore`].
//! - a [property store][DavPropStore] keeps dead properties. [`MemPropStore`]
//!   keeps them in memory.
//!
//! Included is an in-memory service, [`MemFs`] (feature `memfs`, on by
//! default).
//!
//! ## Example.
//!
//! ```no_run
//! use davcore::{DavHandler, LocationConfig, LockSystem};
//!
//! # async fn run(req: http::Request<String>) {
//! let dav = DavHandler::builder()
//!     .location(LocationConfig::new("/dav", "memfs").param("allowInfinitePropFind", "false"))
//!     .locksystem(LockSystem::Mem)
//!     .build()
//!     .expect("valid configuration");
//! let resp = dav.handle(req).await;
//! # }
//! ```
//!
//! [`Webdav`]: https://tools.ietf.org/html/rfc4918

#![cfg_attr(docsrs, feature(doc_cfg))]

#[macro_use]
extern crate log;
#[macro_use]
extern crate lazy_static;

mod conditional;
mod davhandler;
mod errors;
mod multistatus;
mod util;

pub mod body;
pub mod condition;
pub mod config;
pub mod davheaders;
pub mod davpath;
pub mod ls;
pub mod memls;
pub mod props;
pub mod service;
pub mod xmldom;
pub mod xmltype;

#[cfg(any(docsrs, feature = "memfs"))]
#[cfg_attr(docsrs, doc(cfg(feature = "memfs")))]
pub mod memfs;

use crate::errors::DavResult;

pub use crate::body::Body;
pub use crate::condition::ConditionCode;
pub use crate::config::{ConfigError, LocationConfig, Params, ServiceFactory, ServiceRegistry};
pub use crate::davhandler::{
    DavBuilder, DavHandler, LockSystem, PropPatchAtomicity, PropPatchReport, PropStore,
};
pub use crate::davheaders::{ContentRange, EntityTag};
pub use crate::davpath::DavPath;
pub use crate::ls::{DavLock, DavLockStore, DavLockSystem, MemLockStore};
#[cfg(any(docsrs, feature = "memfs"))]
pub use crate::memfs::MemFs;
pub use crate::memls::MemLs;
pub use crate::props::{DavPropStore, MemPropStore, PropMap};
pub use crate::service::{DavFuture, DavResource, DavService, EntityMetadata};
pub use crate::util::{DavMethod, DavMethodSet};
pub use crate::xmltype::{XsType, XsValue};
