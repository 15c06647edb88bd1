//! Contains the structs and traits that define a `locksystem` backend.
//!
//! Note that the methods DO NOT return futures, they are sychronous.
//! Every lock table mutation happens under one lock, so that the
//! conflict check and the insert of a new lock are a single step.
//!
//! The only implementation in this crate is [`MemLs`](crate::memls::MemLs),
//! which can persist its table through a [`DavLockStore`].
use std::fmt::Debug;
use std::io;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;

use crate::condition::ConditionCode;
use crate::davpath::DavPath;
use crate::xmldom::Element;

/// Type of the locks returned by DavLockSystem methods.
#[derive(Debug, Clone, PartialEq)]
pub struct DavLock {
    /// Lock token, an `urn:uuid:` URI.
    pub token: String,
    /// Root of the lock.
    pub path: DavPath,
    /// Principal that created the lock, if known.
    pub principal: Option<String>,
    /// The `DAV:owner` element the client submitted.
    pub owner: Option<Element>,
    /// When the lock expires. `None` is never.
    pub timeout_at: Option<SystemTime>,
    /// The timeout the lock was created or last refreshed with.
    pub timeout: Option<Duration>,
    pub shared: bool,
    /// Depth infinity.
    pub deep: bool,
}

impl DavLock {
    pub fn is_expired(&self, now: SystemTime) -> bool {
        matches!(self.timeout_at, Some(t) if t <= now)
    }

    /// The lock applies to `path`: it is rooted there, or it is a
    /// depth-infinity lock on an ancestor.
    pub fn covers(&self, path: &DavPath) -> bool {
        if self.path.key() == path.key() {
            return true;
        }
        self.deep && self.path.contains(path)
    }

    /// Seconds left before expiry, for the `DAV:timeout` element.
    pub fn seconds_left(&self, now: SystemTime) -> Option<u64> {
        self.timeout_at.map(|t| {
            t.duration_since(now)
                .map(|d| d.as_secs())
                .unwrap_or_default()
        })
    }
}

/// The trait that defines a locksystem.
pub trait DavLockSystem: Debug + Send + Sync {
    /// Lock a node. Returns the new lock, or a `423 Locked` condition
    /// (with `DAV:no-conflicting-lock`) if a conflicting lock exists.
    fn lock(
        &self,
        path: &DavPath,
        principal: Option<&str>,
        owner: Option<&Element>,
        timeout: Option<Duration>,
        shared: bool,
        deep: bool,
    ) -> Result<DavLock, ConditionCode>;

    /// Refresh the lock with this token. `404` if there is no such lock.
    fn refresh(&self, token: &str, timeout: Option<Duration>) -> Result<DavLock, ConditionCode>;

    /// The lock with this token, if it is rooted at `path`.
    fn get_lock(&self, token: &str, path: &DavPath) -> Option<DavLock>;

    /// Remove a lock.
    fn unlock(&self, lock: &DavLock) -> Result<(), ConditionCode>;

    /// Locks that apply to `path`. With `ancestors`, also the
    /// depth-infinity locks on its ancestors; with `descendants`, also
    /// the locks rooted anywhere below it.
    fn discover(&self, path: &DavPath, ancestors: bool, descendants: bool) -> Vec<DavLock>;

    /// Check if `path` may be modified by someone holding `tokens`.
    ///
    /// With `deep`, the check includes everything below `path`. For
    /// every lock root in the way, at least one of its locks must be
    /// held. Fails with `423 Locked` listing the roots that are not.
    fn check(
        &self,
        path: &DavPath,
        principal: Option<&str>,
        deep: bool,
        tokens: &[String],
    ) -> Result<(), ConditionCode>;

    /// Remove all locks at or below `path` (after a DELETE or MOVE).
    fn delete(&self, path: &DavPath) -> Result<(), ConditionCode>;

    /// Remove expired locks. Returns how many were removed.
    fn sweep(&self) -> usize {
        0
    }
}

/// Durable storage for the lock table.
///
/// `save` is called with the complete table after every change and
/// must replace the stored table atomically.
pub trait DavLockStore: Debug + Send + Sync {
    fn load(&self) -> io::Result<Vec<DavLock>>;
    fn save(&self, locks: &[DavLock]) -> io::Result<()>;
}

/// Keeps the "persisted" lock table in memory.
#[derive(Debug, Default)]
pub struct MemLockStore {
    locks: Mutex<Vec<DavLock>>,
}

impl MemLockStore {
    pub fn new() -> MemLockStore {
        MemLockStore::default()
    }
}

impl DavLockStore for MemLockStore {
    fn load(&self) -> io::Result<Vec<DavLock>> {
        Ok(self.locks.lock().clone())
    }

    fn save(&self, locks: &[DavLock]) -> io::Result<()> {
        *self.locks.lock() = locks.to_vec();
        Ok(())
    }
}
