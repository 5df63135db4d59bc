//! Tiered Storage Manager
//!
//! Executes filesystem primitives against whichever tier currently holds a
//! path, and owns the node's open handle table.
//!
//! ## Responsibilities
//! - **Resolution**: Reads go to the target path (local first, then secondary).
//! - **Metadata Mutations**: chmod, chown, utimens and xattr writes hit both tiers when both exist.
//! - **Promotion**: `open` copies a secondary-only file into the local tier before opening it.
//! - **Listing**: Directory listings merge both tiers and hide virtual link suffixes.

use std::collections::HashSet;
use std::fs::{self, DirBuilder, OpenOptions};
use std::os::fd::RawFd;
use std::os::unix::fs::{DirBuilderExt, DirEntryExt, FileExt, FileTypeExt, MetadataExt, OpenOptionsExt};
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

use filetime::FileTime;
use tracing::{debug, warn};
use walkdir::WalkDir;

use super::handles::HandleTable;
use super::layout::{self, TierLayout};
use super::types::{DirEntry, DirScope, FileStat, Promotion, StatVfs, TimeSpec};
use super::vlink::{self, LinkKind};
use crate::error::{Errno, FsResult};

pub struct TieredStorageManager {
    layout: TierLayout,
    handles: HandleTable,
}

impl TieredStorageManager {
    pub fn new(layout: TierLayout) -> Arc<Self> {
        Arc::new(Self {
            layout,
            handles: HandleTable::new(),
        })
    }

    pub fn layout(&self) -> &TierLayout {
        &self.layout
    }

    pub fn handles(&self) -> &HandleTable {
        &self.handles
    }

    // --- Attributes ---

    /// `lstat` of the target path. Virtual symlinks report `S_IFLNK`;
    /// both kinds of virtual link also report the stored target.
    pub fn get_attr(&self, path: &str) -> FsResult<(FileStat, Option<String>)> {
        let target = self.layout.target_path(path);
        let meta = fs::symlink_metadata(&target)?;
        let mut stat = FileStat::from(&meta);

        let link = match vlink::classify(path) {
            Some(LinkKind::Symbolic) => {
                stat.mode = (stat.mode & !libc::S_IFMT) | libc::S_IFLNK;
                Some(vlink::read_target(&target)?)
            }
            Some(LinkKind::Hard) => Some(vlink::read_target(&target)?),
            None => None,
        };

        Ok((stat, link))
    }

    pub fn fget_attr(&self, path: &str, fd: RawFd) -> FsResult<FileStat> {
        let file = self.handles.lookup(path, fd)?;
        let meta = file.metadata()?;
        Ok(FileStat::from(&meta))
    }

    /// Native `readlink` with the tier root stripped from the result.
    pub fn read_link(&self, path: &str, size: usize) -> FsResult<String> {
        let native = fs::read_link(self.layout.target_path(path))?;
        let mut target = self.layout.strip_root(&native);
        if size > 0 && target.len() > size {
            let mut cut = size;
            while !target.is_char_boundary(cut) {
                cut -= 1;
            }
            target.truncate(cut);
        }
        Ok(target)
    }

    pub fn statfs(&self, path: &str) -> FsResult<StatVfs> {
        let vfs = nix::sys::statvfs::statvfs(&self.layout.target_path(path))?;
        Ok(StatVfs {
            bsize: vfs.block_size() as u64,
            frsize: vfs.fragment_size() as u64,
            blocks: vfs.blocks() as u64,
            bfree: vfs.blocks_free() as u64,
            bavail: vfs.blocks_available() as u64,
            files: vfs.files() as u64,
            ffree: vfs.files_free() as u64,
            favail: vfs.files_available() as u64,
            fsid: vfs.filesystem_id() as u64,
            flag: vfs.flags().bits() as u64,
            namemax: vfs.name_max() as u64,
        })
    }

    pub fn access(&self, path: &str, mode: i32) -> FsResult<()> {
        let flags = nix::unistd::AccessFlags::from_bits_truncate(mode);
        nix::unistd::access(&self.layout.target_path(path), flags)?;
        Ok(())
    }

    // --- Metadata mutations ---

    pub fn chmod(&self, path: &str, mode: u32) -> FsResult<()> {
        self.on_both_tiers(path, |p| {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(p, fs::Permissions::from_mode(mode))?;
            Ok(())
        })
    }

    /// `lchown` on both tiers. `None` leaves the id unchanged.
    pub fn chown(&self, path: &str, uid: Option<u32>, gid: Option<u32>) -> FsResult<()> {
        self.on_both_tiers(path, |p| {
            std::os::unix::fs::lchown(p, uid, gid)?;
            Ok(())
        })
    }

    pub fn utimens(&self, path: &str, atime: TimeSpec, mtime: TimeSpec) -> FsResult<()> {
        self.on_both_tiers(path, |p| {
            let meta = fs::symlink_metadata(p)?;
            let atime = resolve_time(atime, FileTime::from_last_access_time(&meta));
            let mtime = resolve_time(mtime, FileTime::from_last_modification_time(&meta));
            filetime::set_symlink_file_times(p, atime, mtime)?;
            Ok(())
        })
    }

    pub fn truncate(&self, path: &str, size: u64) -> FsResult<()> {
        nix::unistd::truncate(&self.layout.target_path(path), size as libc::off_t)?;
        Ok(())
    }

    pub fn set_xattr(&self, path: &str, name: &str, value: &[u8], flags: i32) -> FsResult<()> {
        self.on_both_tiers(path, |p| {
            let present = xattr::get(p, name)?.is_some();
            if flags & libc::XATTR_CREATE != 0 && present {
                return Err(Errno::EEXIST);
            }
            if flags & libc::XATTR_REPLACE != 0 && !present {
                return Err(Errno::ENODATA);
            }
            xattr::set(p, name, value)?;
            Ok(())
        })
    }

    /// Value of `name`. With `size == 0` only the length is reported.
    pub fn get_xattr(&self, path: &str, name: &str, size: usize) -> FsResult<(usize, Vec<u8>)> {
        let value = xattr::get(self.layout.target_path(path), name)?.ok_or(Errno::ENODATA)?;
        sized_reply(value, size)
    }

    /// NUL-terminated attribute names. With `size == 0` only the length is
    /// reported.
    pub fn list_xattr(&self, path: &str, size: usize) -> FsResult<(usize, Vec<u8>)> {
        let mut names = Vec::new();
        for name in xattr::list(self.layout.target_path(path))? {
            names.extend_from_slice(name.as_encoded_bytes());
            names.push(0);
        }
        sized_reply(names, size)
    }

    pub fn remove_xattr(&self, path: &str, name: &str) -> FsResult<()> {
        self.on_both_tiers(path, |p| {
            if xattr::get(p, name)?.is_none() {
                return Err(Errno::ENODATA);
            }
            xattr::remove(p, name)?;
            Ok(())
        })
    }

    /// Runs `op` on every tier holding `path`. The local result wins.
    fn on_both_tiers<F>(&self, path: &str, op: F) -> FsResult<()>
    where
        F: Fn(&Path) -> FsResult<()>,
    {
        let local = self.layout.local_path(path);
        let secondary = self.layout.secondary_path(path);

        match (layout::exists(&local), layout::exists(&secondary)) {
            (true, true) => {
                let result = op(&local);
                if let Err(e) = op(&secondary) {
                    debug!("Secondary copy of {} not updated: {}", path, e);
                }
                result
            }
            (true, false) => op(&local),
            (false, true) => op(&secondary),
            (false, false) => Err(Errno::ENOENT),
        }
    }

    // --- Namespace ---

    /// Creates the directory on every tier where it is missing. Only the
    /// local outcome is reported.
    pub fn mkdir(&self, path: &str, mode: u32) -> FsResult<()> {
        let mut builder = DirBuilder::new();
        builder.mode(mode);

        let mut result = Ok(());
        let local = self.layout.local_path(path);
        if !layout::exists(&local) {
            result = builder.create(&local).map_err(Errno::from);
        }

        let secondary = self.layout.secondary_path(path);
        if !layout::exists(&secondary) {
            if let Err(e) = builder.create(&secondary) {
                warn!("mkdir {} on secondary failed: {}", path, e);
            }
        }

        result
    }

    pub fn rmdir(&self, path: &str) -> FsResult<()> {
        let result = fs::remove_dir(self.layout.local_path(path)).map_err(Errno::from);

        let secondary = self.layout.secondary_path(path);
        if layout::exists(&secondary) {
            if let Err(e) = fs::remove_dir(&secondary) {
                warn!("rmdir {} on secondary failed: {}", path, e);
            }
        }

        result
    }

    /// Removes the file from both tiers, force-closing local descriptors.
    /// A path present on neither tier is not an error.
    pub fn unlink(&self, path: &str) -> FsResult<()> {
        let mut result = Ok(());

        let local = self.layout.local_path(path);
        if layout::exists(&local) {
            self.handles.unregister_path(path);
            result = fs::remove_file(&local).map_err(Errno::from);
        }

        let secondary = self.layout.secondary_path(path);
        if layout::exists(&secondary) {
            if let Err(e) = fs::remove_file(&secondary) {
                warn!("unlink {} on secondary failed: {}", path, e);
            }
        }

        result
    }

    /// Metadata-level rename, applied independently on each tier holding
    /// `old`.
    pub fn rename(&self, old: &str, new: &str) -> FsResult<()> {
        let local_old = self.layout.local_path(old);
        let secondary_old = self.layout.secondary_path(old);
        let in_local = layout::exists(&local_old);
        let in_secondary = layout::exists(&secondary_old);

        if !in_local && !in_secondary {
            return Err(Errno::ENOENT);
        }

        let mut result = Ok(());
        if in_local {
            self.handles.unregister_path(old);
            result = fs::rename(&local_old, self.layout.local_path(new)).map_err(Errno::from);
        }
        if in_secondary {
            let renamed = fs::rename(&secondary_old, self.layout.secondary_path(new));
            if !in_local {
                result = renamed.map_err(Errno::from);
            } else if let Err(e) = renamed {
                warn!("rename {} -> {} on secondary failed: {}", old, new, e);
            }
        }
        result
    }

    /// Creates native symlinks in every tier where `target` is a directory.
    /// Returns whether any tier held the directory.
    pub fn symlink_dir(&self, target: &str, link: &str) -> FsResult<bool> {
        self.link_dir(target, link, |src, dst| std::os::unix::fs::symlink(src, dst))
    }

    /// Creates native hard links in every tier where `target` is a directory.
    pub fn hard_link_dir(&self, target: &str, link: &str) -> FsResult<bool> {
        self.link_dir(target, link, |src, dst| fs::hard_link(src, dst))
    }

    fn link_dir<F>(&self, target: &str, link: &str, make: F) -> FsResult<bool>
    where
        F: Fn(&Path, &Path) -> std::io::Result<()>,
    {
        let mut found = false;
        let mut result = Ok(());

        let local = self.layout.local_path(target);
        if layout::is_dir(&local) {
            found = true;
            result = make(&local, &self.layout.local_path(link)).map_err(Errno::from);
        }

        // The secondary tier is shared, so another node may already have
        // linked it. Only a secondary-only target reports its failure.
        let secondary = self.layout.secondary_path(target);
        let secondary_link = self.layout.secondary_path(link);
        if layout::is_dir(&secondary) && !layout::exists(&secondary_link) {
            let made = make(&secondary, &secondary_link);
            if found {
                if let Err(e) = made {
                    warn!("link {} -> {} on secondary failed: {}", link, target, e);
                }
            } else {
                result = made.map_err(Errno::from);
            }
            found = true;
        } else if layout::is_dir(&secondary) {
            found = true;
        }

        result.map(|_| found)
    }

    /// Writes a virtual link file into the local tier. `link` must already
    /// carry its suffix.
    pub fn write_virtual_link(&self, link: &str, target: &str) -> FsResult<()> {
        vlink::write_target(&self.layout.local_path(link), target)?;
        Ok(())
    }

    // --- File lifecycle ---

    /// Creates the file on the local tier and registers the descriptor.
    pub fn create(&self, path: &str, flags: i32, mode: u32) -> FsResult<RawFd> {
        let file = open_options(flags | libc::O_CREAT, mode).open(self.layout.local_path(path))?;
        Ok(self.handles.register(path, file))
    }

    /// Opens the local copy, promoting it from secondary first when the
    /// local tier does not hold it yet.
    pub fn open(&self, path: &str, flags: i32) -> FsResult<RawFd> {
        if !self.layout.exists_local(path) && self.layout.exists_secondary(path) {
            self.copy_secondary_to_local(path)?;
        }

        let file = open_options(flags, 0o644).open(self.layout.local_path(path))?;
        Ok(self.handles.register(path, file))
    }

    pub fn read(&self, path: &str, fd: RawFd, size: usize, offset: u64) -> FsResult<Vec<u8>> {
        let file = self.handles.lookup(path, fd)?;
        let remaining = file.metadata()?.len().saturating_sub(offset);
        let mut buf = vec![0u8; (size as u64).min(remaining) as usize];
        let count = file.read_at(&mut buf, offset)?;
        buf.truncate(count);
        Ok(buf)
    }

    pub fn write(&self, path: &str, fd: RawFd, offset: u64, data: &[u8]) -> FsResult<usize> {
        let file = self.handles.lookup(path, fd)?;
        Ok(file.write_at(data, offset)?)
    }

    /// Closes a duplicate of the descriptor, like `close(dup(fd))`.
    pub fn flush(&self, path: &str, fd: RawFd) -> FsResult<()> {
        let file = self.handles.lookup(path, fd)?;
        drop(file.try_clone()?);
        Ok(())
    }

    pub fn fsync(&self, path: &str, fd: RawFd, datasync: bool) -> FsResult<()> {
        let file = self.handles.lookup(path, fd)?;
        if datasync {
            file.sync_data()?;
        } else {
            file.sync_all()?;
        }
        Ok(())
    }

    pub fn ftruncate(&self, path: &str, fd: RawFd, size: u64) -> FsResult<()> {
        let file = self.handles.lookup(path, fd)?;
        file.set_len(size)?;
        Ok(())
    }

    /// `flock(2)` with `cmd` as the operation bits. The lock lives as long
    /// as the descriptor stays registered.
    pub fn lock(&self, path: &str, fd: RawFd, cmd: i32) -> FsResult<()> {
        self.handles.flock(path, fd, cmd)
    }

    pub fn close(&self, path: &str, fd: RawFd) -> FsResult<()> {
        self.handles.unregister(path, fd)
    }

    /// Force-closes every descriptor of `path`.
    pub fn file_flush(&self, path: &str) -> usize {
        self.handles.unregister_path(path)
    }

    // --- Promotion ---

    /// Copies a secondary file into the local tier unless the local copy is
    /// already at least as new. The local copy takes the secondary mtime so
    /// an untouched promoted file never looks dirty to the exporter.
    pub fn copy_secondary_to_local(&self, path: &str) -> FsResult<Promotion> {
        let secondary = self.layout.secondary_path(path);
        let src_meta = match fs::metadata(&secondary) {
            Ok(meta) if meta.is_file() => meta,
            _ => return Ok(Promotion::Absent),
        };

        let local = self.layout.local_path(path);
        if let Ok(dst_meta) = fs::metadata(&local) {
            if modified(&src_meta) <= modified(&dst_meta) {
                return Ok(Promotion::UpToDate);
            }
        }

        layout::copy_with_parents(&secondary, &local)?;
        filetime::set_file_mtime(&local, FileTime::from_last_modification_time(&src_meta))?;
        debug!("Promoted {} to local tier", path);
        Ok(Promotion::Copied)
    }

    // --- Directories ---

    /// Merged listing. Local entries come first and win on name collisions.
    pub fn read_dir(&self, path: &str, offset: usize, scope: DirScope) -> FsResult<Vec<DirEntry>> {
        let mut tiers = Vec::new();
        if scope.includes_local() {
            tiers.push(self.layout.local_path(path));
        }
        if scope.includes_secondary() {
            tiers.push(self.layout.secondary_path(path));
        }

        let mut entries = Vec::new();
        let mut seen = HashSet::new();
        let mut last_err = None;
        let mut listed = false;

        for dir in tiers {
            let iter = match fs::read_dir(&dir) {
                Ok(iter) => iter,
                Err(e) => {
                    last_err = Some(Errno::from(e));
                    continue;
                }
            };

            if !listed {
                let ino = fs::metadata(&dir)?.ino();
                let parent_ino = match dir.parent() {
                    Some(parent) => fs::metadata(parent).map(|m| m.ino()).unwrap_or(ino),
                    None => ino,
                };
                for (dot, ino) in [(".", ino), ("..", parent_ino)] {
                    seen.insert(dot.to_string());
                    entries.push(DirEntry {
                        name: dot.to_string(),
                        ino,
                        mode: libc::S_IFDIR,
                    });
                }
                listed = true;
            }

            for entry in iter {
                let entry = entry?;
                let raw_name = entry.file_name().to_string_lossy().into_owned();
                let (name, kind) = vlink::strip(&raw_name);

                let mode = match kind {
                    Some(LinkKind::Symbolic) => libc::S_IFLNK,
                    _ => entry.file_type().map(type_bits).unwrap_or(0),
                };

                if seen.insert(name.to_string()) {
                    entries.push(DirEntry {
                        name: name.to_string(),
                        ino: entry.ino(),
                        mode,
                    });
                }
            }
        }

        if !listed {
            return Err(last_err.unwrap_or(Errno::ENOENT));
        }

        Ok(entries.into_iter().skip(offset).collect())
    }

    /// Recreates the secondary directory tree below `path` in the local
    /// tier. Returns the number of directories created.
    pub fn mirror_directories(&self, path: &str) -> FsResult<usize> {
        let root = self.layout.secondary_path(path);
        if !layout::is_dir(&root) {
            return Ok(0);
        }

        let mut created = 0;
        for entry in WalkDir::new(&root).min_depth(1) {
            let entry = entry?;
            if !entry.file_type().is_dir() {
                continue;
            }
            let Ok(rest) = entry.path().strip_prefix(self.layout.secondary_root()) else {
                continue;
            };
            let local = self.layout.local_root().join(rest);
            if !layout::exists(&local) {
                fs::create_dir_all(&local)?;
                created += 1;
            }
        }

        let local_root = self.layout.local_path(path);
        if !layout::exists(&local_root) {
            fs::create_dir_all(&local_root)?;
            created += 1;
        }

        Ok(created)
    }

    /// Copies every local regular file below directory `src` into the
    /// secondary tree rooted at `dst`. Returns the number of files copied.
    pub fn copy_local_tree_to_secondary(&self, src: &str, dst: &str) -> FsResult<usize> {
        let local_root = self.layout.local_path(src);
        let secondary_root = self.layout.secondary_path(dst);

        let mut copied = 0;
        for entry in WalkDir::new(&local_root).min_depth(1) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(rest) = entry.path().strip_prefix(&local_root) else {
                continue;
            };
            layout::copy_with_parents(entry.path(), &secondary_root.join(rest))?;
            copied += 1;
        }
        Ok(copied)
    }

    /// Copies one local file to the secondary location of `dst`.
    pub fn copy_local_to_secondary(&self, src: &str, dst: &str) -> FsResult<()> {
        layout::copy_with_parents(
            &self.layout.local_path(src),
            &self.layout.secondary_path(dst),
        )?;
        Ok(())
    }

    pub fn remove_local_tree(&self, path: &str) -> FsResult<()> {
        fs::remove_dir_all(self.layout.local_path(path))?;
        Ok(())
    }

    pub fn remove_local_file(&self, path: &str) -> FsResult<()> {
        fs::remove_file(self.layout.local_path(path))?;
        Ok(())
    }

    pub fn remove_secondary_file(&self, path: &str) -> FsResult<()> {
        fs::remove_file(self.layout.secondary_path(path))?;
        Ok(())
    }
}

/// Maps raw `open(2)` flags and a creation mode onto `OpenOptions`.
pub fn open_options(flags: i32, mode: u32) -> OpenOptions {
    let mut options = OpenOptions::new();
    match flags & libc::O_ACCMODE {
        libc::O_WRONLY => {
            options.write(true);
        }
        libc::O_RDWR => {
            options.read(true).write(true);
        }
        _ => {
            options.read(true);
        }
    }
    options
        .append(flags & libc::O_APPEND != 0)
        .truncate(flags & libc::O_TRUNC != 0 && flags & libc::O_ACCMODE != libc::O_RDONLY)
        .create(flags & libc::O_CREAT != 0 && flags & libc::O_EXCL == 0)
        .create_new(flags & libc::O_CREAT != 0 && flags & libc::O_EXCL != 0)
        .custom_flags(flags & !(libc::O_ACCMODE | libc::O_APPEND | libc::O_TRUNC | libc::O_CREAT | libc::O_EXCL))
        .mode(mode);
    options
}

/// Whether `flags` requests write access.
pub fn has_write_intent(flags: i32) -> bool {
    flags & (libc::O_WRONLY | libc::O_RDWR) != 0
}

fn resolve_time(requested: TimeSpec, current: FileTime) -> FileTime {
    match requested.nsec {
        TimeSpec::NOW => FileTime::now(),
        TimeSpec::OMIT => current,
        nsec => FileTime::from_unix_time(requested.sec, nsec as u32),
    }
}

fn sized_reply(value: Vec<u8>, size: usize) -> FsResult<(usize, Vec<u8>)> {
    let len = value.len();
    if size == 0 {
        Ok((len, Vec::new()))
    } else if size < len {
        Err(Errno::ERANGE)
    } else {
        Ok((len, value))
    }
}

fn modified(meta: &fs::Metadata) -> SystemTime {
    meta.modified().unwrap_or(SystemTime::UNIX_EPOCH)
}

fn type_bits(ft: fs::FileType) -> u32 {
    if ft.is_dir() {
        libc::S_IFDIR
    } else if ft.is_symlink() {
        libc::S_IFLNK
    } else if ft.is_file() {
        libc::S_IFREG
    } else if ft.is_block_device() {
        libc::S_IFBLK
    } else if ft.is_char_device() {
        libc::S_IFCHR
    } else if ft.is_fifo() {
        libc::S_IFIFO
    } else if ft.is_socket() {
        libc::S_IFSOCK
    } else {
        0
    }
}
