use serde::{Deserialize, Serialize};
use std::fs::Metadata;
use std::os::unix::fs::MetadataExt;

/// Seconds and nanoseconds, as carried by `utimens`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSpec {
    pub sec: i64,
    pub nsec: i64,
}

impl TimeSpec {
    /// `nsec` value meaning "set to the current time".
    pub const NOW: i64 = libc::UTIME_NOW;
    /// `nsec` value meaning "leave unchanged".
    pub const OMIT: i64 = libc::UTIME_OMIT;

    pub fn new(sec: i64, nsec: i64) -> Self {
        Self { sec, nsec }
    }
}

/// Attributes returned by `get_attr` / `fget_attr`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStat {
    pub dev: u64,
    pub ino: u64,
    pub mode: u32,
    pub nlink: u64,
    pub uid: u32,
    pub gid: u32,
    pub rdev: u64,
    pub size: u64,
    pub blksize: u64,
    pub blocks: u64,
    pub atime: TimeSpec,
    pub mtime: TimeSpec,
    pub ctime: TimeSpec,
}

impl FileStat {
    pub fn file_type(&self) -> u32 {
        self.mode & libc::S_IFMT
    }

    pub fn is_dir(&self) -> bool {
        self.file_type() == libc::S_IFDIR
    }

    pub fn is_symlink(&self) -> bool {
        self.file_type() == libc::S_IFLNK
    }
}

impl From<&Metadata> for FileStat {
    fn from(meta: &Metadata) -> Self {
        Self {
            dev: meta.dev(),
            ino: meta.ino(),
            mode: meta.mode(),
            nlink: meta.nlink(),
            uid: meta.uid(),
            gid: meta.gid(),
            rdev: meta.rdev(),
            size: meta.size(),
            blksize: meta.blksize(),
            blocks: meta.blocks(),
            atime: TimeSpec::new(meta.atime(), meta.atime_nsec()),
            mtime: TimeSpec::new(meta.mtime(), meta.mtime_nsec()),
            ctime: TimeSpec::new(meta.ctime(), meta.ctime_nsec()),
        }
    }
}

/// Filesystem statistics returned by `statfs`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatVfs {
    pub bsize: u64,
    pub frsize: u64,
    pub blocks: u64,
    pub bfree: u64,
    pub bavail: u64,
    pub files: u64,
    pub ffree: u64,
    pub favail: u64,
    pub fsid: u64,
    pub flag: u64,
    pub namemax: u64,
}

/// One directory listing entry. Only the inode and the type bits of the
/// mode are meaningful.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    pub name: String,
    pub ino: u64,
    pub mode: u32,
}

/// Which tiers a directory listing reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DirScope {
    Local = 1,
    Secondary = 2,
    All = 3,
}

impl DirScope {
    pub fn from_wire(value: i64) -> Option<Self> {
        match value {
            1 => Some(DirScope::Local),
            2 => Some(DirScope::Secondary),
            3 => Some(DirScope::All),
            _ => None,
        }
    }

    pub fn to_wire(self) -> i64 {
        self as i64
    }

    pub fn includes_local(self) -> bool {
        matches!(self, DirScope::Local | DirScope::All)
    }

    pub fn includes_secondary(self) -> bool {
        matches!(self, DirScope::Secondary | DirScope::All)
    }
}

/// Outcome of a secondary-to-local copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Promotion {
    /// The local copy was created or refreshed.
    Copied,
    /// The local copy is at least as new as the secondary one.
    UpToDate,
    /// Nothing on the secondary tier to promote.
    Absent,
}
