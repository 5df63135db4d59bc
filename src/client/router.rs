//! Request Router
//!
//! Client-side entry point for every filesystem call. Decides, per call,
//! whether it goes to one owning node or to the whole fleet, and decodes
//! the signed replies into `Result`s.
//!
//! ## Routing Rules
//! - **Owner only**: file I/O, attribute reads, chmod/chown/truncate/access/utimens and xattr reads or removal, even on directories.
//! - **Broadcast**: mkdir, rmdir, listings, fsyncdir, export, plus rename/symlink/link/setxattr when the path is a directory.
//! - **Broadcast results**: every node is called in ring order; the first non-zero code is reported and nothing is rolled back.
//! - **Virtual links**: attribute, readlink and unlink calls probe `<path><suffix>` for both link kinds before the plain path.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use super::prefetch::PrefetchPool;
use super::rpc::{HttpTransport, RpcClient, RpcTransport};
use super::types::{ClientError, FileHandle, PathClass};
use crate::config::{ClientConfig, ConfigError};
use crate::error::Errno;
use crate::fleet::router::HashRouter;
use crate::fleet::types::Node;
use crate::service::protocol::{Arg, Method, Reply, RpcRequest};
use crate::tier::types::{DirEntry, DirScope, FileStat, StatVfs, TimeSpec};
use crate::tier::vlink::LinkKind;

pub struct RequestRouter {
    ring: HashRouter,
    rpc: RpcClient,
    prefetch: Option<PrefetchPool>,
}

fn s(value: &str) -> Arg {
    Arg::Str(value.to_string())
}

fn int(value: impl Into<i64>) -> Arg {
    Arg::Int(value.into())
}

fn check(reply: &Reply) -> Result<i64, ClientError> {
    Ok(Errno::check(reply.code())?)
}

impl RequestRouter {
    /// Builds a router talking HTTP to the configured fleet. Must be called
    /// from within a tokio runtime when read-ahead is enabled.
    pub fn connect(config: &ClientConfig) -> Result<Arc<Self>, ClientError> {
        let transport = Arc::new(HttpTransport::new(config.timeout()));
        Self::with_transport(config, transport)
    }

    pub fn with_transport(
        config: &ClientConfig,
        transport: Arc<dyn RpcTransport>,
    ) -> Result<Arc<Self>, ClientError> {
        if config.nodes.is_empty() {
            return Err(ConfigError::Invalid("fleet must list at least one node".to_string()).into());
        }

        let ring = HashRouter::new(config.nodes.clone(), config.hash.hasher());
        let rpc = RpcClient::new(transport, config.retry, config.fatal);
        let prefetch = config.prefetch;

        Ok(Arc::new_cyclic(|weak| Self {
            ring,
            rpc,
            prefetch: (prefetch.workers > 0)
                .then(|| PrefetchPool::start(weak.clone(), prefetch.workers, prefetch.queue_depth)),
        }))
    }

    pub fn ring(&self) -> &HashRouter {
        &self.ring
    }

    // --- Plumbing ---

    pub fn owner(&self, path: &str) -> Result<&Node, ClientError> {
        self.ring
            .lookup(path)
            .ok_or_else(|| ClientError::NoRoute(path.to_string()))
    }

    async fn call_owner(&self, path: &str, method: Method, params: Vec<Arg>) -> Result<Reply, ClientError> {
        let node = self.owner(path)?;
        self.rpc.call(node, &RpcRequest::new(method, params)).await
    }

    async fn call_node(&self, node: &Node, method: Method, params: Vec<Arg>) -> Result<Reply, ClientError> {
        self.rpc.call(node, &RpcRequest::new(method, params)).await
    }

    /// Calls every node and returns all replies in ring order.
    async fn broadcast(&self, method: Method, params: Vec<Arg>) -> Result<Vec<Reply>, ClientError> {
        let request = RpcRequest::new(method, params);
        let mut replies = Vec::with_capacity(self.ring.len());
        for node in self.ring.nodes() {
            replies.push(self.rpc.call(node, &request).await?);
        }
        Ok(replies)
    }

    /// Broadcast whose outcome is the first non-zero code seen.
    async fn broadcast_code(&self, method: Method, params: Vec<Arg>) -> Result<(), ClientError> {
        let replies = self.broadcast(method, params).await?;
        match replies
            .iter()
            .map(|reply| Errno::check(reply.code()))
            .find_map(Result::err)
        {
            Some(errno) => Err(errno.into()),
            None => Ok(()),
        }
    }

    /// Attributes of exactly `path` on its owner, without link probing.
    async fn raw_attr(&self, path: &str) -> Result<(FileStat, Option<String>), ClientError> {
        let reply = self.call_owner(path, Method::GetAttr, vec![s(path)]).await?;
        check(&reply)?;
        match reply {
            Reply::Attr { stat, link, .. } => Ok((stat, link)),
            _ => Err(ClientError::UnexpectedReply("GetAttr")),
        }
    }

    /// Directory or file owned by one node. Missing paths count as files.
    pub async fn classify(&self, path: &str) -> Result<PathClass, ClientError> {
        match self.get_attr(path).await {
            Ok((stat, _)) if stat.is_dir() => Ok(PathClass::Directory),
            Ok(_) | Err(ClientError::Fs(_)) => Ok(PathClass::File(self.owner(path)?.clone())),
            Err(e) => Err(e),
        }
    }

    // --- Attributes and links ---

    /// Attributes of `path`, resolving virtual links: a virtual symlink
    /// reports link type and target, a virtual hard link reports the
    /// attributes of the file it points to.
    pub async fn get_attr(&self, path: &str) -> Result<(FileStat, Option<String>), ClientError> {
        match self.raw_attr(&LinkKind::Symbolic.decorate(path)).await {
            Ok(found) => return Ok(found),
            Err(ClientError::Fs(_)) => {}
            Err(e) => return Err(e),
        }

        match self.raw_attr(&LinkKind::Hard.decorate(path)).await {
            Ok((_, Some(target))) => {
                let (stat, _) = self.raw_attr(&target).await?;
                return Ok((stat, Some(target)));
            }
            Ok(_) | Err(ClientError::Fs(_)) => {}
            Err(e) => return Err(e),
        }

        self.raw_attr(path).await
    }

    pub async fn read_link(&self, path: &str, size: usize) -> Result<String, ClientError> {
        match self.raw_attr(&LinkKind::Symbolic.decorate(path)).await {
            Ok((_, Some(target))) => return Ok(target),
            Ok(_) | Err(ClientError::Fs(_)) => {}
            Err(e) => return Err(e),
        }

        let reply = self
            .call_owner(path, Method::ReadLink, vec![s(path), int(size as i64)])
            .await?;
        check(&reply)?;
        match reply {
            Reply::Data { bytes, .. } => Ok(String::from_utf8_lossy(&bytes).into_owned()),
            _ => Err(ClientError::UnexpectedReply("ReadLink")),
        }
    }

    pub async fn symlink(&self, target: &str, link: &str) -> Result<(), ClientError> {
        self.make_link(LinkKind::Symbolic, Method::Symlink, target, link).await
    }

    pub async fn link(&self, target: &str, link: &str) -> Result<(), ClientError> {
        self.make_link(LinkKind::Hard, Method::Link, target, link).await
    }

    /// Directory targets are linked natively on every node; anything else
    /// becomes a virtual link on the owner of the decorated link path.
    async fn make_link(&self, kind: LinkKind, method: Method, target: &str, link: &str) -> Result<(), ClientError> {
        match self.classify(target).await? {
            PathClass::Directory => self.broadcast_code(method, vec![s(target), s(link)]).await,
            PathClass::File(_) => {
                let vlink = kind.decorate(link);
                let reply = self
                    .call_owner(&vlink, method, vec![s(target), s(&vlink)])
                    .await?;
                check(&reply).map(|_| ())
            }
        }
    }

    // --- Namespace ---

    pub async fn mkdir(&self, path: &str, mode: u32) -> Result<(), ClientError> {
        self.broadcast_code(Method::MkDir, vec![s(path), int(mode)]).await
    }

    pub async fn rmdir(&self, path: &str) -> Result<(), ClientError> {
        self.broadcast_code(Method::RmDir, vec![s(path)]).await
    }

    /// Removes a virtual link if one exists under `path`, otherwise
    /// unlinks `path` on every node.
    pub async fn unlink(&self, path: &str) -> Result<(), ClientError> {
        for kind in [LinkKind::Symbolic, LinkKind::Hard] {
            let vlink = kind.decorate(path);
            match self.raw_attr(&vlink).await {
                Ok(_) => {
                    let reply = self.call_owner(&vlink, Method::Unlink, vec![s(&vlink)]).await?;
                    return check(&reply).map(|_| ());
                }
                Err(ClientError::Fs(_)) => {}
                Err(e) => return Err(e),
            }
        }

        self.broadcast_code(Method::Unlink, vec![s(path)]).await
    }

    pub async fn rename(&self, old: &str, new: &str) -> Result<(), ClientError> {
        match self.classify(old).await? {
            PathClass::Directory => self.broadcast_code(Method::Rename, vec![s(old), s(new)]).await,
            PathClass::File(node) => {
                let reply = self.call_node(&node, Method::Rename, vec![s(old), s(new)]).await?;
                check(&reply).map(|_| ())
            }
        }
    }

    /// Union of every node's listing; the first node to report a name wins.
    pub async fn read_dir(&self, path: &str, offset: usize) -> Result<Vec<DirEntry>, ClientError> {
        self.read_dir_scoped(path, offset, DirScope::All).await
    }

    pub async fn read_dir_scoped(
        &self,
        path: &str,
        offset: usize,
        scope: DirScope,
    ) -> Result<Vec<DirEntry>, ClientError> {
        let replies = self
            .broadcast(
                Method::ReadDir,
                vec![s(path), int(offset as i64), int(scope.to_wire())],
            )
            .await?;

        let mut seen = HashSet::new();
        let mut merged = Vec::new();
        let mut first_error = None;
        let mut any_ok = false;

        for reply in replies {
            match reply {
                Reply::Dir { code: 0, entries } => {
                    any_ok = true;
                    for entry in entries {
                        if seen.insert(entry.name.clone()) {
                            merged.push(entry);
                        }
                    }
                }
                Reply::Dir { code, .. } => {
                    first_error.get_or_insert(code);
                }
                _ => return Err(ClientError::UnexpectedReply("ReadDir")),
            }
        }

        match (any_ok, first_error) {
            (false, Some(code)) => Err(Errno::check(code).err().unwrap_or(Errno::EIO).into()),
            _ => Ok(merged),
        }
    }

    pub async fn fsync_dir(&self, path: &str, datasync: bool) -> Result<(), ClientError> {
        self.broadcast_code(Method::FSyncDir, vec![s(path), int(datasync)]).await
    }

    /// Triggers an immediate write-back sweep on every node.
    pub async fn local_file_export(&self) -> Result<(), ClientError> {
        self.broadcast_code(Method::LocalFileExport, Vec::new()).await
    }

    // --- Owner-only metadata ---

    async fn owner_code(&self, path: &str, method: Method, params: Vec<Arg>) -> Result<i64, ClientError> {
        let reply = self.call_owner(path, method, params).await?;
        check(&reply)
    }

    pub async fn chmod(&self, path: &str, mode: u32) -> Result<(), ClientError> {
        self.owner_code(path, Method::Chmod, vec![s(path), int(mode)]).await.map(|_| ())
    }

    /// `None` leaves the id unchanged.
    pub async fn chown(&self, path: &str, uid: Option<u32>, gid: Option<u32>) -> Result<(), ClientError> {
        let uid = uid.map(i64::from).unwrap_or(-1);
        let gid = gid.map(i64::from).unwrap_or(-1);
        self.owner_code(path, Method::Chown, vec![s(path), int(uid), int(gid)])
            .await
            .map(|_| ())
    }

    pub async fn truncate(&self, path: &str, size: u64) -> Result<(), ClientError> {
        self.owner_code(path, Method::Truncate, vec![s(path), int(size as i64)])
            .await
            .map(|_| ())
    }

    pub async fn access(&self, path: &str, mode: i32) -> Result<(), ClientError> {
        self.owner_code(path, Method::Access, vec![s(path), int(mode)]).await.map(|_| ())
    }

    pub async fn utimens(&self, path: &str, atime: TimeSpec, mtime: TimeSpec) -> Result<(), ClientError> {
        self.owner_code(path, Method::Utimens, vec![s(path), Arg::Time(atime), Arg::Time(mtime)])
            .await
            .map(|_| ())
    }

    pub async fn statfs(&self, path: &str) -> Result<StatVfs, ClientError> {
        let reply = self.call_owner(path, Method::StatFs, vec![s(path)]).await?;
        check(&reply)?;
        match reply {
            Reply::StatFs { stat, .. } => Ok(stat),
            _ => Err(ClientError::UnexpectedReply("StatFs")),
        }
    }

    // --- Extended attributes ---

    pub async fn set_xattr(&self, path: &str, name: &str, value: &[u8], flags: i32) -> Result<(), ClientError> {
        let params = vec![s(path), s(name), Arg::Bytes(value.to_vec()), int(flags)];
        match self.classify(path).await? {
            PathClass::Directory => self.broadcast_code(Method::SetXAttr, params).await,
            PathClass::File(node) => {
                let reply = self.call_node(&node, Method::SetXAttr, params).await?;
                check(&reply).map(|_| ())
            }
        }
    }

    /// Returns `(length, value)`; with `size == 0` only the length is filled.
    pub async fn get_xattr(&self, path: &str, name: &str, size: usize) -> Result<(usize, Vec<u8>), ClientError> {
        let reply = self
            .call_owner(path, Method::GetXAttr, vec![s(path), s(name), int(size as i64)])
            .await?;
        xattr_value(reply, "GetXAttr")
    }

    pub async fn list_xattr(&self, path: &str, size: usize) -> Result<(usize, Vec<u8>), ClientError> {
        let reply = self
            .call_owner(path, Method::ListXAttr, vec![s(path), int(size as i64)])
            .await?;
        xattr_value(reply, "ListXAttr")
    }

    pub async fn remove_xattr(&self, path: &str, name: &str) -> Result<(), ClientError> {
        self.owner_code(path, Method::RemoveXAttr, vec![s(path), s(name)])
            .await
            .map(|_| ())
    }

    // --- File I/O ---

    /// Opens `path` on its owner and queues read-ahead of its siblings.
    pub async fn open(&self, path: &str, flags: i32) -> Result<FileHandle, ClientError> {
        let node = self.owner(path)?.clone();
        let reply = self.call_node(&node, Method::Open, vec![s(path), int(flags)]).await?;
        let fd = check(&reply)? as i32;

        if let Some(pool) = &self.prefetch {
            pool.submit(path);
        }

        Ok(FileHandle {
            path: path.to_string(),
            node,
            fd,
        })
    }

    pub async fn create(&self, path: &str, flags: i32, mode: u32) -> Result<FileHandle, ClientError> {
        let node = self.owner(path)?.clone();
        let reply = self
            .call_node(&node, Method::Create, vec![s(path), int(flags), int(mode)])
            .await?;
        let fd = check(&reply)? as i32;
        Ok(FileHandle {
            path: path.to_string(),
            node,
            fd,
        })
    }

    async fn handle_code(&self, handle: &FileHandle, method: Method, extra: Vec<Arg>) -> Result<i64, ClientError> {
        let mut params = vec![s(&handle.path), int(handle.fd)];
        params.extend(extra);
        let reply = self.call_node(&handle.node, method, params).await?;
        check(&reply)
    }

    pub async fn read(&self, handle: &FileHandle, size: usize, offset: u64) -> Result<Vec<u8>, ClientError> {
        let reply = self
            .call_node(
                &handle.node,
                Method::Read,
                vec![s(&handle.path), int(handle.fd), int(size as i64), int(offset as i64)],
            )
            .await?;
        check(&reply)?;
        match reply {
            Reply::Data { bytes, .. } => Ok(bytes),
            _ => Err(ClientError::UnexpectedReply("Read")),
        }
    }

    pub async fn write(&self, handle: &FileHandle, offset: u64, data: &[u8]) -> Result<usize, ClientError> {
        self.handle_code(handle, Method::Write, vec![int(offset as i64), Arg::Bytes(data.to_vec())])
            .await
            .map(|n| n as usize)
    }

    pub async fn flush(&self, handle: &FileHandle) -> Result<(), ClientError> {
        self.handle_code(handle, Method::Flush, Vec::new()).await.map(|_| ())
    }

    pub async fn release(&self, handle: &FileHandle) -> Result<(), ClientError> {
        self.handle_code(handle, Method::Release, Vec::new()).await.map(|_| ())
    }

    pub async fn fsync(&self, handle: &FileHandle, datasync: bool) -> Result<(), ClientError> {
        self.handle_code(handle, Method::FSync, vec![int(datasync)]).await.map(|_| ())
    }

    pub async fn ftruncate(&self, handle: &FileHandle, size: u64) -> Result<(), ClientError> {
        self.handle_code(handle, Method::FTruncate, vec![int(size as i64)])
            .await
            .map(|_| ())
    }

    pub async fn lock(&self, handle: &FileHandle, cmd: i32) -> Result<(), ClientError> {
        self.handle_code(handle, Method::Lock, vec![int(cmd)]).await.map(|_| ())
    }

    pub async fn fget_attr(&self, handle: &FileHandle) -> Result<FileStat, ClientError> {
        let reply = self
            .call_node(&handle.node, Method::FGetAttr, vec![s(&handle.path), int(handle.fd)])
            .await?;
        check(&reply)?;
        match reply {
            Reply::Attr { stat, .. } => Ok(stat),
            _ => Err(ClientError::UnexpectedReply("FGetAttr")),
        }
    }

    // --- Cache control ---

    /// Promotes `path` into its owner's local tier.
    pub async fn file_prev_read(&self, path: &str) -> Result<(), ClientError> {
        self.owner_code(path, Method::FilePrevRead, vec![s(path)]).await.map(|_| ())
    }

    /// Drops export tracking and open descriptors of `path` on its owner.
    pub async fn file_flush(&self, path: &str) -> Result<(), ClientError> {
        self.owner_code(path, Method::FileFlush, vec![s(path)]).await.map(|_| ())
    }

    /// Promotes every secondary-tier sibling of `opened`. Errors are
    /// swallowed. Returns how many promotions were requested successfully.
    pub async fn prefetch_siblings(&self, opened: &str) -> usize {
        let opened_path = Path::new(opened);
        let parent = match opened_path.parent() {
            Some(parent) => parent.to_string_lossy().into_owned(),
            None => return 0,
        };
        let own_name = opened_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let entries = match self.read_dir_scoped(&parent, 0, DirScope::Secondary).await {
            Ok(entries) => entries,
            Err(_) => return 0,
        };

        let mut promoted = 0;
        for entry in entries {
            if entry.name == "." || entry.name == ".." || entry.name == own_name {
                continue;
            }
            if entry.mode == libc::S_IFDIR {
                continue;
            }
            let sibling = if parent.ends_with('/') {
                format!("{}{}", parent, entry.name)
            } else {
                format!("{}/{}", parent, entry.name)
            };
            if self.file_prev_read(&sibling).await.is_ok() {
                promoted += 1;
            }
        }
        promoted
    }
}

fn xattr_value(reply: Reply, method: &'static str) -> Result<(usize, Vec<u8>), ClientError> {
    let len = check(&reply)?;
    match reply {
        Reply::XAttr { value, .. } => Ok((len as usize, value)),
        _ => Err(ClientError::UnexpectedReply(method)),
    }
}
