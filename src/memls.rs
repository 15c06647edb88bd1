//! Simple in-memory locksystem.
//!
//! All locks live in one table behind a mutex. Changes are made to a
//! copy of the table, which is handed to the [`DavLockStore`] (if any)
//! and only replaces the live table once the store accepted it.
//! Expired locks are invisible to lookups and are removed by the next
//! change or by [`MemLs::sweep`].
use std::collections::BTreeMap;
use std::io;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use uuid::Uuid;

use crate::condition::ConditionCode;
use crate::davpath::DavPath;
use crate::ls::*;
use crate::xmldom::Element;

type Table = BTreeMap<String, DavLock>;

/// Ephemeral in-memory LockSystem, optionally backed by a [`DavLockStore`].
#[derive(Debug)]
pub struct MemLs {
    table: Mutex<Table>,
    store: Option<Arc<dyn DavLockStore>>,
}

impl MemLs {
    /// Create a new "memls" locksystem.
    pub fn new() -> Arc<MemLs> {
        Arc::new(MemLs {
            table: Mutex::new(Table::new()),
            store: None,
        })
    }

    /// Create a locksystem that persists its table in `store`, starting
    /// with the locks that were saved there (minus the expired ones).
    pub fn with_store(store: Arc<dyn DavLockStore>) -> io::Result<Arc<MemLs>> {
        let now = SystemTime::now();
        let saved = store.load()?;
        let count = saved.len();
        let table: Table = saved
            .into_iter()
            .filter(|l| !l.is_expired(now))
            .map(|l| (l.token.clone(), l))
            .collect();
        if table.len() != count {
            let locks: Vec<DavLock> = table.values().cloned().collect();
            store.save(&locks)?;
        }
        debug!("memls: loaded {} locks", table.len());
        Ok(Arc::new(MemLs {
            table: Mutex::new(table),
            store: Some(store),
        }))
    }

    /// Start a task that sweeps expired locks every `interval`. It stops
    /// once the locksystem is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            // the first tick completes immediately.
            tick.tick().await;
            loop {
                tick.tick().await;
                let ls = match weak.upgrade() {
                    Some(ls) => ls,
                    None => break,
                };
                let n = ls.sweep();
                if n > 0 {
                    debug!("memls: swept {} expired locks", n);
                }
            }
        })
    }

    // persist the new table, then make it the live one.
    fn commit(&self, table: &mut Table, new: Table) -> Result<(), ConditionCode> {
        if let Some(store) = self.store.as_ref() {
            let locks: Vec<DavLock> = new.values().cloned().collect();
            if let Err(e) = store.save(&locks) {
                error!("memls: saving lock table: {}", e);
                return Err(ConditionCode::internal("The lock table could not be saved."));
            }
        }
        *table = new;
        Ok(())
    }

    // a copy of the table without the expired locks.
    fn staged(table: &Table, now: SystemTime) -> Table {
        table
            .iter()
            .filter(|(_, l)| !l.is_expired(now))
            .map(|(k, l)| (k.clone(), l.clone()))
            .collect()
    }
}

fn principal_matches(lock: &DavLock, principal: Option<&str>) -> bool {
    match (lock.principal.as_deref(), principal) {
        (Some(p), Some(q)) => p == q,
        _ => true,
    }
}

impl DavLockSystem for MemLs {
    fn lock(
        &self,
        path: &DavPath,
        principal: Option<&str>,
        owner: Option<&Element>,
        timeout: Option<Duration>,
        shared: bool,
        deep: bool,
    ) -> Result<DavLock, ConditionCode> {
        let now = SystemTime::now();
        let mut table = self.table.lock();

        let mut conflicts: Vec<String> = table
            .values()
            .filter(|l| !l.is_expired(now))
            .filter(|l| l.covers(path) || (deep && path.contains(&l.path)))
            .filter(|l| !(shared && l.shared))
            .map(|l| l.path.as_url_string())
            .collect();
        if !conflicts.is_empty() {
            conflicts.sort();
            conflicts.dedup();
            trace!("memls: lock {} conflicts with {:?}", path, conflicts);
            return Err(ConditionCode::conflicting_lock(&conflicts));
        }

        let lock = DavLock {
            token: format!("urn:uuid:{}", Uuid::new_v4().hyphenated()),
            path: path.clone(),
            principal: principal.map(|s| s.to_string()),
            owner: owner.cloned(),
            timeout_at: timeout.map(|d| now + d),
            timeout,
            shared,
            deep,
        };
        let mut new = MemLs::staged(&table, now);
        new.insert(lock.token.clone(), lock.clone());
        self.commit(&mut table, new)?;
        trace!("memls: lock {} created on {}", lock.token, path);
        Ok(lock)
    }

    fn refresh(&self, token: &str, timeout: Option<Duration>) -> Result<DavLock, ConditionCode> {
        let now = SystemTime::now();
        let mut table = self.table.lock();
        let mut new = MemLs::staged(&table, now);
        let lock = match new.get_mut(token) {
            Some(lock) => {
                lock.timeout = timeout;
                lock.timeout_at = timeout.map(|d| now + d);
                lock.clone()
            }
            None => return Err(ConditionCode::not_found()),
        };
        self.commit(&mut table, new)?;
        trace!("memls: lock {} refreshed", token);
        Ok(lock)
    }

    fn get_lock(&self, token: &str, path: &DavPath) -> Option<DavLock> {
        let now = SystemTime::now();
        let table = self.table.lock();
        table
            .get(token)
            .filter(|l| !l.is_expired(now) && l.path.key() == path.key())
            .cloned()
    }

    fn unlock(&self, lock: &DavLock) -> Result<(), ConditionCode> {
        let now = SystemTime::now();
        let mut table = self.table.lock();
        let mut new = MemLs::staged(&table, now);
        if new.remove(&lock.token).is_none() {
            return Err(ConditionCode::conflict("The resource is not locked."));
        }
        self.commit(&mut table, new)?;
        trace!("memls: lock {} removed", lock.token);
        Ok(())
    }

    fn discover(&self, path: &DavPath, ancestors: bool, descendants: bool) -> Vec<DavLock> {
        let now = SystemTime::now();
        let table = self.table.lock();
        table
            .values()
            .filter(|l| !l.is_expired(now))
            .filter(|l| {
                l.path.key() == path.key()
                    || (ancestors && l.deep && l.path.contains(path))
                    || (descendants && path.contains(&l.path))
            })
            .cloned()
            .collect()
    }

    fn check(
        &self,
        path: &DavPath,
        principal: Option<&str>,
        deep: bool,
        tokens: &[String],
    ) -> Result<(), ConditionCode> {
        let now = SystemTime::now();
        let table = self.table.lock();

        // lock root -> (held, href)
        let mut roots: BTreeMap<String, (bool, String)> = BTreeMap::new();
        for l in table.values().filter(|l| !l.is_expired(now)) {
            if !(l.covers(path) || (deep && path.contains(&l.path))) {
                continue;
            }
            let held = tokens.iter().any(|t| *t == l.token) && principal_matches(l, principal);
            let entry = roots
                .entry(l.path.key().to_string())
                .or_insert_with(|| (false, l.path.as_url_string()));
            entry.0 |= held;
        }
        let missing: Vec<String> = roots
            .into_values()
            .filter(|(held, _)| !held)
            .map(|(_, href)| href)
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ConditionCode::locked(&missing))
        }
    }

    fn delete(&self, path: &DavPath) -> Result<(), ConditionCode> {
        let now = SystemTime::now();
        let mut table = self.table.lock();
        let mut new = MemLs::staged(&table, now);
        new.retain(|_, l| !path.contains(&l.path));
        if new.len() == table.len() {
            return Ok(());
        }
        self.commit(&mut table, new)
    }

    fn sweep(&self) -> usize {
        let now = SystemTime::now();
        let mut table = self.table.lock();
        let new = MemLs::staged(&table, now);
        let n = table.len() - new.len();
        if n == 0 {
            return 0;
        }
        match self.commit(&mut table, new) {
            Ok(()) => n,
            Err(_) => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;

    #[derive(Debug, Default)]
    struct FailingStore;

    impl DavLockStore for FailingStore {
        fn load(&self) -> io::Result<Vec<DavLock>> {
            Ok(Vec::new())
        }
        fn save(&self, _: &[DavLock]) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::Other, "disk full"))
        }
    }

    fn p(s: &str) -> DavPath {
        DavPath::new(s)
    }

    #[test]
    fn exclusive_excludes_everything() {
        let ls = MemLs::new();
        ls.lock(&p("/a"), None, None, None, false, false).unwrap();
        let e = ls.lock(&p("/a"), None, None, None, true, false).unwrap_err();
        assert_eq!(e.status(), StatusCode::LOCKED);
        assert!(ls.lock(&p("/a"), None, None, None, false, false).is_err());
        // depth 0 lock does not cover children.
        assert!(ls.lock(&p("/a/b"), None, None, None, false, false).is_ok());
    }

    #[test]
    fn shared_locks_coexist() {
        let ls = MemLs::new();
        ls.lock(&p("/a"), None, None, None, true, true).unwrap();
        ls.lock(&p("/a"), None, None, None, true, false).unwrap();
        assert!(ls.lock(&p("/a/x"), None, None, None, true, false).is_ok());
        assert!(ls.lock(&p("/a/x"), None, None, None, false, false).is_err());
        assert_eq!(ls.discover(&p("/a"), false, false).len(), 2);
        assert_eq!(ls.discover(&p("/a/x"), true, false).len(), 2);
    }

    #[test]
    fn deep_lock_blocks_descendants_and_ancestors() {
        let ls = MemLs::new();
        ls.lock(&p("/a/"), None, None, None, false, true).unwrap();
        assert!(ls.lock(&p("/a/b/c"), None, None, None, true, false).is_err());
        let ls = MemLs::new();
        ls.lock(&p("/a/b/c"), None, None, None, true, false).unwrap();
        let e = ls.lock(&p("/a"), None, None, None, false, true).unwrap_err();
        let cond = e.error_element().unwrap();
        assert!(cond.is(crate::xmldom::NS_DAV_URI, "no-conflicting-lock"));
        assert!(ls.lock(&p("/a"), None, None, None, false, false).is_ok());
    }

    #[test]
    fn conflicts_are_listed_once() {
        let ls = MemLs::new();
        for path in ["/a/x", "/a/y", "/a/x", "/a/y", "/a/x"] {
            ls.lock(&p(path), None, None, None, true, false).unwrap();
        }
        let e = ls.lock(&p("/a"), None, None, None, false, true).unwrap_err();
        let hrefs: Vec<String> = e
            .error_element()
            .unwrap()
            .child_elems()
            .map(|h| h.text())
            .collect();
        assert_eq!(hrefs, vec!["/a/x".to_string(), "/a/y".to_string()]);
    }

    #[test]
    fn check_needs_token() {
        let ls = MemLs::new();
        let l = ls.lock(&p("/a/"), Some("joe"), None, None, false, true).unwrap();
        let e = ls.check(&p("/a/b"), None, false, &[]).unwrap_err();
        assert_eq!(e.status(), StatusCode::LOCKED);
        assert!(ls.check(&p("/a/b"), None, false, &[l.token.clone()]).is_ok());
        assert!(ls.check(&p("/a/b"), Some("ann"), false, &[l.token.clone()]).is_err());
        assert!(ls.check(&p("/"), None, false, &[]).is_ok());
        assert!(ls.check(&p("/"), None, true, &[]).is_err());
    }

    #[test]
    fn get_lock_wants_root() {
        let ls = MemLs::new();
        let l = ls.lock(&p("/a/"), None, None, None, false, true).unwrap();
        assert!(ls.get_lock(&l.token, &p("/a")).is_some());
        assert!(ls.get_lock(&l.token, &p("/a/b")).is_none());
        assert!(ls.get_lock("urn:uuid:nope", &p("/a")).is_none());
    }

    #[test]
    fn expired_locks_vanish() {
        let ls = MemLs::new();
        let l = ls
            .lock(&p("/a"), None, None, Some(Duration::from_secs(0)), false, false)
            .unwrap();
        assert!(ls.get_lock(&l.token, &p("/a")).is_none());
        assert!(ls.lock(&p("/a"), None, None, None, false, false).is_ok());
        assert!(ls.refresh(&l.token, None).is_err());
    }

    #[test]
    fn refresh_and_unlock() {
        let ls = MemLs::new();
        let l = ls
            .lock(&p("/a"), None, None, Some(Duration::from_secs(10)), false, false)
            .unwrap();
        let r = ls.refresh(&l.token, Some(Duration::from_secs(100))).unwrap();
        assert!(r.seconds_left(SystemTime::now()).unwrap() > 10);
        ls.unlock(&r).unwrap();
        assert_eq!(ls.unlock(&r).unwrap_err().status(), StatusCode::CONFLICT);
    }

    #[test]
    fn delete_removes_subtree() {
        let ls = MemLs::new();
        ls.lock(&p("/a/b"), None, None, None, false, false).unwrap();
        ls.lock(&p("/c"), None, None, None, false, false).unwrap();
        ls.delete(&p("/a")).unwrap();
        assert!(ls.discover(&p("/a"), false, true).is_empty());
        assert_eq!(ls.discover(&p("/"), false, true).len(), 1);
    }

    #[test]
    fn store_failure_changes_nothing() {
        let ls = MemLs::with_store(Arc::new(FailingStore)).unwrap();
        let e = ls.lock(&p("/a"), None, None, None, false, false).unwrap_err();
        assert_eq!(e.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(ls.discover(&p("/"), false, true).is_empty());
    }

    #[test]
    fn store_roundtrip() {
        let store = Arc::new(MemLockStore::new());
        let ls = MemLs::with_store(store.clone()).unwrap();
        let l = ls.lock(&p("/a"), None, None, None, false, false).unwrap();
        drop(ls);
        let ls = MemLs::with_store(store).unwrap();
        assert_eq!(ls.get_lock(&l.token, &p("/a")), Some(l));
    }
}
