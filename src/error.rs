//! Error Types
//!
//! Filesystem failures travel through the crate as [`Errno`], a positive
//! POSIX error number. Only at the wire boundary are they folded into the
//! signed result convention (0 = success, negative = -errno, positive =
//! size or descriptor).

use std::fmt;
use std::io;

/// A positive POSIX error number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Errno(pub i32);

pub type FsResult<T> = Result<T, Errno>;

impl Errno {
    pub const EPERM: Errno = Errno(libc::EPERM);
    pub const ENOENT: Errno = Errno(libc::ENOENT);
    pub const EIO: Errno = Errno(libc::EIO);
    pub const EBADF: Errno = Errno(libc::EBADF);
    pub const EEXIST: Errno = Errno(libc::EEXIST);
    pub const ENOTDIR: Errno = Errno(libc::ENOTDIR);
    pub const EISDIR: Errno = Errno(libc::EISDIR);
    pub const EINVAL: Errno = Errno(libc::EINVAL);
    pub const ERANGE: Errno = Errno(libc::ERANGE);
    pub const ENODATA: Errno = Errno(libc::ENODATA);

    /// Signed wire representation of this error.
    pub fn to_code(self) -> i64 {
        -(self.0 as i64)
    }

    /// Decodes a signed wire result: negative values become errors,
    /// everything else is passed through.
    pub fn check(code: i64) -> FsResult<i64> {
        if code < 0 {
            Err(Errno((-code) as i32))
        } else {
            Ok(code)
        }
    }
}

/// Folds a local result into the signed wire convention.
pub fn to_code(result: FsResult<i64>) -> i64 {
    match result {
        Ok(value) => value,
        Err(errno) => errno.to_code(),
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (errno {})",
            io::Error::from_raw_os_error(self.0),
            self.0
        )
    }
}

impl std::error::Error for Errno {}

impl From<io::Error> for Errno {
    fn from(err: io::Error) -> Self {
        match err.raw_os_error() {
            Some(code) => Errno(code),
            None => match err.kind() {
                io::ErrorKind::NotFound => Errno::ENOENT,
                io::ErrorKind::PermissionDenied => Errno::EPERM,
                io::ErrorKind::AlreadyExists => Errno::EEXIST,
                io::ErrorKind::InvalidInput => Errno::EINVAL,
                _ => Errno::EIO,
            },
        }
    }
}

impl From<nix::errno::Errno> for Errno {
    fn from(err: nix::errno::Errno) -> Self {
        Errno(err as i32)
    }
}

impl From<walkdir::Error> for Errno {
    fn from(err: walkdir::Error) -> Self {
        match err.into_io_error() {
            Some(io) => io.into(),
            None => Errno::EIO,
        }
    }
}

impl From<Errno> for io::Error {
    fn from(err: Errno) -> Self {
        io::Error::from_raw_os_error(err.0)
    }
}
