//! Simple in-memory service.
//!
//! This implementation has state, so if you create a
//! new instance in a handler(), it will be empty every time.
//!
//! This means you have to create the instance once, using `MemFs::new`, store
//! it in your handler struct, and clone() it every time you pass
//! it to the DavHandler. As a MemFs struct is just a handle, cloning is cheap.
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::{Bytes, BytesMut};
use futures_util::future::{self, FutureExt};
use http::StatusCode;
use parking_lot::Mutex;

use crate::condition::ConditionCode;
use crate::davheaders::{ContentRange, EntityTag};
use crate::davpath::{is_ancestor_or_self, DavPath};
use crate::service::*;

#[derive(Debug, Clone)]
struct MemNode {
    is_dir: bool,
    data: Bytes,
    created: SystemTime,
    modified: SystemTime,
    revision: u64,
}

#[derive(Debug)]
struct MemTree {
    nodes: BTreeMap<String, MemNode>,
    revision: u64,
}

impl MemTree {
    fn new_node(&mut self, is_dir: bool, data: Bytes) -> MemNode {
        self.revision += 1;
        let now = SystemTime::now();
        MemNode {
            is_dir,
            data,
            created: now,
            modified: now,
            revision: self.revision,
        }
    }

    fn parent_is_dir(&self, path: &DavPath) -> bool {
        let parent = path.parent();
        self.nodes.get(parent.key()).map_or(false, |n| n.is_dir)
    }

    // keys of `key` and everything below it.
    fn subtree(&self, key: &str) -> Vec<String> {
        self.nodes
            .keys()
            .filter(|k| is_ancestor_or_self(key, k))
            .cloned()
            .collect()
    }
}

/// Ephemeral in-memory service.
#[derive(Debug, Clone)]
pub struct MemFs {
    tree: Arc<Mutex<MemTree>>,
}

struct MemResource {
    fs: MemFs,
    path: DavPath,
    meta: EntityMetadata,
}

fn entity_tag(node: &MemNode) -> Option<EntityTag> {
    let mtime = node
        .modified
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros())
        .unwrap_or_default();
    EntityTag::new(
        false,
        format!("{:x}-{:x}-{:x}", node.data.len(), mtime, node.revision),
    )
}

fn fail<'a, T: Send + 'a>(code: ConditionCode) -> DavFuture<'a, T> {
    future::ready(Err(code)).boxed()
}

fn not_found() -> ConditionCode {
    ConditionCode::not_found()
}

fn no_parent() -> ConditionCode {
    ConditionCode::conflict("The parent collection does not exist.")
}

impl MemFs {
    /// Create a new "memfs" service with an empty root collection.
    pub fn new() -> Arc<MemFs> {
        let mut tree = MemTree {
            nodes: BTreeMap::new(),
            revision: 0,
        };
        let root = tree.new_node(true, Bytes::new());
        tree.nodes.insert("/".to_string(), root);
        Arc::new(MemFs {
            tree: Arc::new(Mutex::new(tree)),
        })
    }

    fn resource(&self, path: &DavPath, node: &MemNode) -> MemResource {
        let mut path = path.clone();
        path.add_slash_if(node.is_dir);
        let meta = EntityMetadata {
            length: if node.is_dir {
                None
            } else {
                Some(node.data.len() as u64)
            },
            modified: Some(node.modified),
            created: Some(node.created),
            etag: if node.is_dir { None } else { entity_tag(node) },
            media_type: if node.is_dir {
                None
            } else {
                Some(
                    mime_guess::from_path(path.file_name())
                        .first_or_octet_stream()
                        .to_string(),
                )
            },
            is_collection: node.is_dir,
        };
        MemResource {
            fs: self.clone(),
            path,
            meta,
        }
    }

    fn do_create(&self, path: &DavPath, data: Bytes) -> Result<(), ConditionCode> {
        let mut tree = self.tree.lock();
        if !tree.parent_is_dir(path) {
            return Err(no_parent());
        }
        if tree.nodes.get(path.key()).map_or(false, |n| n.is_dir) {
            return Err(ConditionCode::method_not_allowed());
        }
        trace!("memfs: create {}", path);
        let node = tree.new_node(false, data);
        tree.nodes.insert(path.key().to_string(), node);
        Ok(())
    }

    fn do_copy_or_move(
        &self,
        src: &DavPath,
        dst: &DavPath,
        is_move: bool,
        deep: bool,
    ) -> Result<Vec<(DavPath, ConditionCode)>, ConditionCode> {
        let mut tree = self.tree.lock();
        if !tree.nodes.contains_key(src.key()) {
            return Err(not_found());
        }
        if !tree.parent_is_dir(dst) {
            return Err(no_parent());
        }
        let keys = if deep || is_move {
            tree.subtree(src.key())
        } else {
            vec![src.key().to_string()]
        };
        let mut moved = Vec::new();
        for key in &keys {
            let node = match tree.nodes.get(key) {
                Some(n) => n.clone(),
                None => continue,
            };
            let to = match DavPath::new(key).rebase(src, dst) {
                Some(p) => p.key().to_string(),
                None => continue,
            };
            let node = if is_move {
                node
            } else {
                let mut copy = tree.new_node(node.is_dir, node.data.clone());
                copy.modified = node.modified;
                copy
            };
            moved.push((to, node));
        }
        if is_move {
            for key in &keys {
                tree.nodes.remove(key);
            }
        }
        trace!("memfs: {} {} -> {} ({} nodes)", if is_move { "move" } else { "copy" }, src, dst, moved.len());
        tree.nodes.extend(moved);
        Ok(Vec::new())
    }
}

impl DavService for MemFs {
    fn resolve<'a>(&'a self, path: &'a DavPath) -> DavFuture<'a, Option<Box<dyn DavResource>>> {
        let tree = self.tree.lock();
        let res = tree
            .nodes
            .get(path.key())
            .map(|node| Box::new(self.resource(path, node)) as Box<dyn DavResource>);
        future::ready(Ok(res)).boxed()
    }

    fn make_collection<'a>(&'a self, path: &'a DavPath) -> DavFuture<'a, ()> {
        let mut tree = self.tree.lock();
        let res = if tree.nodes.contains_key(path.key()) {
            Err(ConditionCode::method_not_allowed())
        } else if !tree.parent_is_dir(path) {
            Err(no_parent())
        } else {
            trace!("memfs: mkcol {}", path);
            let node = tree.new_node(true, Bytes::new());
            tree.nodes.insert(path.key().to_string(), node);
            Ok(())
        };
        future::ready(res).boxed()
    }

    fn create<'a>(&'a self, path: &'a DavPath, data: Bytes) -> DavFuture<'a, ()> {
        future::ready(self.do_create(path, data)).boxed()
    }

    fn create_and_lock<'a>(&'a self, path: &'a DavPath) -> DavFuture<'a, ()> {
        future::ready(self.do_create(path, Bytes::new())).boxed()
    }

    fn copy_or_move<'a>(
        &'a self,
        src: &'a DavPath,
        dst: &'a DavPath,
        is_move: bool,
        deep: bool,
    ) -> DavFuture<'a, Vec<(DavPath, ConditionCode)>> {
        future::ready(self.do_copy_or_move(src, dst, is_move, deep)).boxed()
    }
}

impl DavResource for MemResource {
    fn path(&self) -> &DavPath {
        &self.path
    }

    fn metadata(&self) -> &EntityMetadata {
        &self.meta
    }

    fn children<'a>(&'a self) -> DavFuture<'a, Vec<Box<dyn DavResource>>> {
        let tree = self.fs.tree.lock();
        let base = self.path.key();
        let children = tree
            .nodes
            .iter()
            .filter(|(k, _)| {
                k.as_str() != base
                    && is_ancestor_or_self(base, k)
                    && !k[base.trim_end_matches('/').len() + 1..].contains('/')
            })
            .map(|(k, node)| {
                let mut path = self.path.join(&k[base.trim_end_matches('/').len() + 1..]);
                path.add_slash_if(node.is_dir);
                Box::new(self.fs.resource(&path, node)) as Box<dyn DavResource>
            })
            .collect();
        future::ready(Ok(children)).boxed()
    }

    fn read<'a>(&'a self, start: u64, count: Option<u64>) -> DavFuture<'a, Bytes> {
        let tree = self.fs.tree.lock();
        let res = match tree.nodes.get(self.path.key()) {
            Some(node) if !node.is_dir => {
                let len = node.data.len();
                let start = (start as usize).min(len);
                let end = match count {
                    Some(c) => start.saturating_add(c as usize).min(len),
                    None => len,
                };
                Ok(node.data.slice(start..end))
            }
            Some(_) => Err(ConditionCode::method_not_allowed()),
            None => Err(not_found()),
        };
        future::ready(res).boxed()
    }

    fn delete<'a>(&'a self) -> DavFuture<'a, Vec<(DavPath, ConditionCode)>> {
        let mut tree = self.fs.tree.lock();
        let res = if self.path.is_root() {
            Err(ConditionCode::forbidden("The root collection cannot be deleted."))
        } else {
            let keys = tree.subtree(self.path.key());
            if keys.is_empty() {
                Err(not_found())
            } else {
                trace!("memfs: delete {} ({} nodes)", self.path, keys.len());
                for k in keys {
                    tree.nodes.remove(&k);
                }
                Ok(Vec::new())
            }
        };
        future::ready(res).boxed()
    }

    fn write<'a>(&'a self, data: Bytes, range: Option<ContentRange>) -> DavFuture<'a, ()> {
        let mut tree = self.fs.tree.lock();
        tree.revision += 1;
        let revision = tree.revision;
        let node = match tree.nodes.get_mut(self.path.key()) {
            Some(node) if node.is_dir => return fail(ConditionCode::method_not_allowed()),
            Some(node) => node,
            None => return fail(not_found()),
        };
        match range.and_then(|r| r.start()) {
            None => node.data = data,
            Some(start) if start as usize > node.data.len() => {
                return fail(ConditionCode::new(StatusCode::RANGE_NOT_SATISFIABLE));
            }
            Some(start) => {
                let start = start as usize;
                let end = start + data.len();
                let mut buf = BytesMut::from(&node.data[..]);
                if end > buf.len() {
                    buf.resize(end, 0);
                }
                buf[start..end].copy_from_slice(&data);
                node.data = buf.freeze();
            }
        }
        node.modified = SystemTime::now();
        node.revision = revision;
        future::ready(Ok(())).boxed()
    }

    fn lockable(&self) -> Result<(), ConditionCode> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> DavPath {
        DavPath::new(s)
    }

    #[tokio::test]
    async fn tree_operations() {
        let fs = MemFs::new();
        fs.make_collection(&p("/dir")).await.unwrap();
        fs.create(&p("/dir/file.txt"), Bytes::from("hello")).await.unwrap();
        assert_eq!(
            fs.create(&p("/nodir/x"), Bytes::new()).await.unwrap_err().status(),
            StatusCode::CONFLICT
        );

        let dir = fs.resolve(&p("/dir")).await.unwrap().unwrap();
        assert_eq!(dir.path().as_str(), "/dir/");
        assert!(dir.metadata().etag.is_none());
        let children = dir.children().await.unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].path().as_str(), "/dir/file.txt");
        assert_eq!(children[0].metadata().media_type.as_deref(), Some("text/plain"));
        assert_eq!(children[0].read(1, Some(3)).await.unwrap(), Bytes::from("ell"));

        fs.copy_or_move(&p("/dir"), &p("/copy"), false, true).await.unwrap();
        let f = fs.resolve(&p("/copy/file.txt")).await.unwrap().unwrap();
        assert_eq!(f.read(0, None).await.unwrap(), Bytes::from("hello"));

        fs.copy_or_move(&p("/dir"), &p("/moved"), true, true).await.unwrap();
        assert!(fs.resolve(&p("/dir/file.txt")).await.unwrap().is_none());
        assert!(fs.resolve(&p("/moved/file.txt")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn partial_write_changes_etag() {
        let fs = MemFs::new();
        fs.create(&p("/f"), Bytes::from("0123456789")).await.unwrap();
        let f = fs.resolve(&p("/f")).await.unwrap().unwrap();
        let etag = f.metadata().etag.clone().unwrap();
        let range = ContentRange::new(2, 3, None);
        f.write(Bytes::from("abc"), range).await.unwrap();
        let f = fs.resolve(&p("/f")).await.unwrap().unwrap();
        assert_eq!(f.read(0, None).await.unwrap(), Bytes::from("01abc56789"));
        assert!(!f.metadata().etag.as_ref().unwrap().strong_eq(&etag));
        let range = ContentRange::new(20, 1, None);
        assert!(f.write(Bytes::from("x"), range).await.is_err());
    }
}
