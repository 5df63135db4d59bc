//! Burst Buffer Service
//!
//! Per-node request dispatcher. Decoded requests are routed to the tiered
//! storage manager, with the cross-tier special cases handled here:
//!
//! ## Responsibilities
//! - **Export Bookkeeping**: Writers are untracked while a file is open for writing and re-tracked on release.
//! - **Rename**: Directory renames flush local content to secondary before renaming there; file renames move content through secondary.
//! - **Links**: Directory targets get native links, everything else becomes a virtual link file.
//! - **Maintenance**: Prefetch, forced close and on-demand export sweeps.

use std::fs;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::protocol::{Arg, Method, Params, Reply, RpcError, RpcRequest, RpcResponse};
use crate::error::{Errno, FsResult, to_code};
use crate::exporter::exporter::WriteBackExporter;
use crate::tier::layout;
use crate::tier::manager::{TieredStorageManager, has_write_intent};
use crate::tier::types::{DirScope, FileStat, StatVfs};
use crate::tier::vlink::{self, LinkKind};

pub struct BurstBufferService {
    storage: Arc<TieredStorageManager>,
    exporter: Arc<WriteBackExporter>,
}

fn code(result: FsResult<()>) -> i64 {
    to_code(result.map(|_| 0))
}

impl BurstBufferService {
    pub fn new(storage: Arc<TieredStorageManager>, exporter: Arc<WriteBackExporter>) -> Arc<Self> {
        Arc::new(Self { storage, exporter })
    }

    pub fn storage(&self) -> &Arc<TieredStorageManager> {
        &self.storage
    }

    pub fn exporter(&self) -> &Arc<WriteBackExporter> {
        &self.exporter
    }

    /// Startup work: mirror the secondary directory tree locally and track
    /// every file already sitting in the local tier.
    pub fn prepare(&self) -> FsResult<()> {
        let mirrored = self.storage.mirror_directories("/")?;
        let tracked = self.exporter.rescan();
        info!(
            "Local tier ready: {} directories mirrored, {} files tracked for export",
            mirrored, tracked
        );
        Ok(())
    }

    pub fn dispatch(&self, request: &RpcRequest) -> RpcResponse {
        let method = Method::from_name(&request.method)
            .ok_or_else(|| RpcError::NoMethod(request.method.clone()))?;
        let name = method.name();
        let args = request.params.as_slice();

        debug!("[{}] {:?}", name, args.first());

        if let Err(e) = check_paths(method, args) {
            warn!("[{}] rejected path {:?}", name, args.first());
            return Ok(error_reply(method, e));
        }

        let reply = match method {
            Method::GetAttr => {
                let p = Params::new(name, args, 1)?;
                attr_reply(self.storage.get_attr(p.str(0)?))
            }
            Method::ReadLink => {
                let p = Params::new(name, args, 2)?;
                match self.storage.read_link(p.str(0)?, p.unsigned(1)? as usize) {
                    Ok(target) => Reply::Data {
                        code: 0,
                        bytes: target.into_bytes(),
                    },
                    Err(e) => Reply::Data {
                        code: e.to_code(),
                        bytes: Vec::new(),
                    },
                }
            }
            Method::MkDir => {
                let p = Params::new(name, args, 2)?;
                Reply::Code(code(self.storage.mkdir(p.str(0)?, p.int(1)? as u32)))
            }
            Method::Unlink => {
                let p = Params::new(name, args, 1)?;
                Reply::Code(code(self.unlink(p.str(0)?)))
            }
            Method::RmDir => {
                let p = Params::new(name, args, 1)?;
                Reply::Code(code(self.storage.rmdir(p.str(0)?)))
            }
            Method::Symlink => {
                let p = Params::new(name, args, 2)?;
                Reply::Code(code(self.link(LinkKind::Symbolic, p.str(0)?, p.str(1)?)))
            }
            Method::Rename => {
                let p = Params::new(name, args, 2)?;
                Reply::Code(code(self.rename(p.str(0)?, p.str(1)?)))
            }
            Method::Link => {
                let p = Params::new(name, args, 2)?;
                Reply::Code(code(self.link(LinkKind::Hard, p.str(0)?, p.str(1)?)))
            }
            Method::Chmod => {
                let p = Params::new(name, args, 2)?;
                Reply::Code(code(self.storage.chmod(p.str(0)?, p.int(1)? as u32)))
            }
            Method::Chown => {
                let p = Params::new(name, args, 3)?;
                let uid = u32::try_from(p.int(1)?).ok();
                let gid = u32::try_from(p.int(2)?).ok();
                Reply::Code(code(self.storage.chown(p.str(0)?, uid, gid)))
            }
            Method::Truncate => {
                let p = Params::new(name, args, 2)?;
                Reply::Code(code(self.storage.truncate(p.str(0)?, p.unsigned(1)?)))
            }
            Method::Open => {
                let p = Params::new(name, args, 2)?;
                Reply::Code(to_code(self.open(p.str(0)?, p.int(1)? as i32)))
            }
            Method::Read => {
                let p = Params::new(name, args, 4)?;
                let read =
                    self.storage
                        .read(p.str(0)?, p.fd(1)?, p.unsigned(2)? as usize, p.unsigned(3)?);
                match read {
                    Ok(bytes) => Reply::Data {
                        code: bytes.len() as i64,
                        bytes,
                    },
                    Err(e) => Reply::Data {
                        code: e.to_code(),
                        bytes: Vec::new(),
                    },
                }
            }
            Method::Write => {
                let p = Params::new(name, args, 4)?;
                let written = self
                    .storage
                    .write(p.str(0)?, p.fd(1)?, p.unsigned(2)?, p.bytes(3)?);
                Reply::Code(to_code(written.map(|n| n as i64)))
            }
            Method::StatFs => {
                let p = Params::new(name, args, 1)?;
                match self.storage.statfs(p.str(0)?) {
                    Ok(stat) => Reply::StatFs { code: 0, stat },
                    Err(e) => Reply::StatFs {
                        code: e.to_code(),
                        stat: StatVfs::default(),
                    },
                }
            }
            Method::Flush => {
                let p = Params::new(name, args, 2)?;
                Reply::Code(code(self.storage.flush(p.str(0)?, p.fd(1)?)))
            }
            Method::Release => {
                let p = Params::new(name, args, 2)?;
                Reply::Code(code(self.release(p.str(0)?, p.fd(1)?)))
            }
            Method::FSync => {
                let p = Params::new(name, args, 3)?;
                Reply::Code(code(self.storage.fsync(p.str(0)?, p.fd(1)?, p.int(2)? != 0)))
            }
            Method::ReadDir => {
                let p = Params::new(name, args, 3)?;
                let scope = DirScope::from_wire(p.int(2)?).ok_or_else(|| {
                    RpcError::BadArguments(format!("{}: unknown directory scope", name))
                })?;
                match self
                    .storage
                    .read_dir(p.str(0)?, p.unsigned(1)? as usize, scope)
                {
                    Ok(entries) => Reply::Dir { code: 0, entries },
                    Err(e) => Reply::Dir {
                        code: e.to_code(),
                        entries: Vec::new(),
                    },
                }
            }
            Method::FSyncDir => {
                Params::new(name, args, 2)?;
                nix::unistd::sync();
                Reply::Code(0)
            }
            Method::SetXAttr => {
                let p = Params::new(name, args, 4)?;
                Reply::Code(code(self.storage.set_xattr(
                    p.str(0)?,
                    p.str(1)?,
                    p.bytes(2)?,
                    p.int(3)? as i32,
                )))
            }
            Method::GetXAttr => {
                let p = Params::new(name, args, 3)?;
                xattr_reply(
                    self.storage
                        .get_xattr(p.str(0)?, p.str(1)?, p.unsigned(2)? as usize),
                )
            }
            Method::ListXAttr => {
                let p = Params::new(name, args, 2)?;
                xattr_reply(self.storage.list_xattr(p.str(0)?, p.unsigned(1)? as usize))
            }
            Method::RemoveXAttr => {
                let p = Params::new(name, args, 2)?;
                Reply::Code(code(self.storage.remove_xattr(p.str(0)?, p.str(1)?)))
            }
            Method::Access => {
                let p = Params::new(name, args, 2)?;
                Reply::Code(code(self.storage.access(p.str(0)?, p.int(1)? as i32)))
            }
            Method::Create => {
                let p = Params::new(name, args, 3)?;
                Reply::Code(to_code(self.create(
                    p.str(0)?,
                    p.int(1)? as i32,
                    p.int(2)? as u32,
                )))
            }
            Method::FTruncate => {
                let p = Params::new(name, args, 3)?;
                Reply::Code(code(self.storage.ftruncate(
                    p.str(0)?,
                    p.fd(1)?,
                    p.unsigned(2)?,
                )))
            }
            Method::FGetAttr => {
                let p = Params::new(name, args, 2)?;
                attr_reply(
                    self.storage
                        .fget_attr(p.str(0)?, p.fd(1)?)
                        .map(|stat| (stat, None)),
                )
            }
            Method::Lock => {
                let p = Params::new(name, args, 3)?;
                Reply::Code(code(self.storage.lock(p.str(0)?, p.fd(1)?, p.int(2)? as i32)))
            }
            Method::Utimens => {
                let p = Params::new(name, args, 3)?;
                Reply::Code(code(self.storage.utimens(p.str(0)?, p.time(1)?, p.time(2)?)))
            }
            Method::FilePrevRead => {
                let p = Params::new(name, args, 1)?;
                Reply::Code(code(self.storage.copy_secondary_to_local(p.str(0)?).map(|_| ())))
            }
            Method::FileFlush => {
                let p = Params::new(name, args, 1)?;
                let path = p.str(0)?;
                self.exporter.unregister(path);
                self.storage.file_flush(path);
                Reply::Code(0)
            }
            Method::LocalFileExport => {
                Params::new(name, args, 0)?;
                let report = self.exporter.sweep();
                debug!("On-demand export: {:?}", report);
                Reply::Code(0)
            }
        };

        Ok(reply)
    }

    // --- Special cases ---

    /// Opening for write stops export tracking until the file is released.
    pub fn open(&self, path: &str, flags: i32) -> FsResult<i64> {
        if has_write_intent(flags) {
            self.exporter.unregister(path);
        }
        self.storage.open(path, flags).map(i64::from)
    }

    pub fn create(&self, path: &str, flags: i32, mode: u32) -> FsResult<i64> {
        self.exporter.unregister(path);
        self.storage.create(path, flags, mode).map(i64::from)
    }

    /// Closes the descriptor and hands the file to the exporter.
    pub fn release(&self, path: &str, fd: i32) -> FsResult<()> {
        let result = self.storage.close(path, fd);
        self.exporter.register(path);
        result
    }

    pub fn unlink(&self, path: &str) -> FsResult<()> {
        if self.storage.layout().exists_local(path) {
            self.exporter.unregister(path);
        }
        self.storage.unlink(path)
    }

    /// Native link when `target` is a directory on this node and `link`
    /// carries no virtual suffix; a virtual link file otherwise.
    pub fn link(&self, kind: LinkKind, target: &str, link: &str) -> FsResult<()> {
        if vlink::classify(link).is_none() && layout::check_path(target).is_ok() {
            let created = match kind {
                LinkKind::Symbolic => self.storage.symlink_dir(target, link)?,
                LinkKind::Hard => self.storage.hard_link_dir(target, link)?,
            };
            if created {
                return Ok(());
            }
        }

        let link = kind.decorate(link);
        self.storage.write_virtual_link(&link, target)?;
        self.exporter.register(&link);
        Ok(())
    }

    pub fn rename(&self, old: &str, new: &str) -> FsResult<()> {
        let layout = self.storage.layout();

        if layout::is_dir(&layout.local_path(old)) {
            return self.rename_dir(old, new);
        }

        if layout::is_regular_file(&layout.local_path(old)) {
            self.exporter.unregister(old);
            self.storage.handles().unregister_path(old);

            if layout.exists_secondary(old) {
                if let Err(e) = self.storage.remove_secondary_file(old) {
                    warn!("Dropping secondary copy of {} failed: {}", old, e);
                }
            }
            if layout.exists_local(new) {
                self.exporter.unregister(new);
                self.storage.handles().unregister_path(new);
                self.storage.remove_local_file(new)?;
            }

            self.storage.copy_local_to_secondary(old, new)?;
            return self.storage.remove_local_file(old);
        }

        if layout::is_regular_file(&layout.secondary_path(old)) {
            return self.storage.rename(old, new);
        }

        Err(Errno::ENOENT)
    }

    /// Flushes the local subtree into secondary, renames there (or merges
    /// into an existing secondary directory), then rebuilds the empty local
    /// skeleton. The export registry is rebuilt on every outcome, so local
    /// files a failed rename leaves behind stay tracked.
    fn rename_dir(&self, old: &str, new: &str) -> FsResult<()> {
        self.exporter.unregister_prefix(old);
        self.storage.handles().unregister_prefix(old);

        let result = self.move_dir(old, new);
        let tracked = self.exporter.rescan();

        match &result {
            Ok(()) => info!("Renamed directory {} -> {} ({} files tracked)", old, new, tracked),
            Err(e) => warn!(
                "Renaming directory {} -> {} failed: {} ({} files tracked)",
                old, new, e, tracked
            ),
        }
        result
    }

    fn move_dir(&self, old: &str, new: &str) -> FsResult<()> {
        let layout = self.storage.layout();

        let merge = layout::is_dir(&layout.secondary_path(new));
        let flush_into = if merge { new } else { old };

        fs::create_dir_all(layout.secondary_path(flush_into))?;
        let copied = self.storage.copy_local_tree_to_secondary(old, flush_into)?;
        self.storage.remove_local_tree(old)?;
        debug!("Flushed {} local files of {} (merge={})", copied, old, merge);

        let mut result = Ok(());
        if !merge {
            if let Err(e) = fs::rename(layout.secondary_path(old), layout.secondary_path(new)) {
                warn!("Secondary rename {} -> {} failed: {}", old, new, e);
                result = Err(Errno::from(e));
            }
        }

        self.storage.mirror_directories(new)?;
        result
    }
}

/// Every path argument must stay inside the tiers. Link targets and xattr
/// names are not paths.
fn check_paths(method: Method, args: &[Arg]) -> FsResult<()> {
    for (index, arg) in args.iter().enumerate() {
        let exempt = match method {
            Method::Symlink | Method::Link => index == 0,
            Method::SetXAttr | Method::GetXAttr | Method::RemoveXAttr => index == 1,
            _ => false,
        };
        if let (Arg::Str(path), false) = (arg, exempt) {
            layout::check_path(path)?;
        }
    }
    Ok(())
}

/// Failure reply shaped the way `method` normally answers.
fn error_reply(method: Method, errno: Errno) -> Reply {
    let code = errno.to_code();
    match method {
        Method::GetAttr | Method::FGetAttr => attr_reply(Err(errno)),
        Method::ReadLink | Method::Read => Reply::Data {
            code,
            bytes: Vec::new(),
        },
        Method::StatFs => Reply::StatFs {
            code,
            stat: StatVfs::default(),
        },
        Method::ReadDir => Reply::Dir {
            code,
            entries: Vec::new(),
        },
        Method::GetXAttr | Method::ListXAttr => xattr_reply(Err(errno)),
        _ => Reply::Code(code),
    }
}

fn attr_reply(result: FsResult<(FileStat, Option<String>)>) -> Reply {
    match result {
        Ok((stat, link)) => Reply::Attr {
            code: 0,
            stat,
            link,
        },
        Err(e) => Reply::Attr {
            code: e.to_code(),
            stat: FileStat::default(),
            link: None,
        },
    }
}

fn xattr_reply(result: FsResult<(usize, Vec<u8>)>) -> Reply {
    match result {
        Ok((len, value)) => Reply::XAttr {
            code: len as i64,
            value,
        },
        Err(e) => Reply::XAttr {
            code: e.to_code(),
            value: Vec::new(),
        },
    }
}
