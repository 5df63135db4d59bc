//! Open Handle Table
//!
//! Tracks every descriptor a node has handed out, keyed by path. Several
//! opens of one path keep independent descriptors under the same entry.
//! Removing a path drops every descriptor it holds, which closes them and
//! releases any `flock` taken through them.

use nix::fcntl::{Flock, FlockArg};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::File;
use std::os::fd::{AsRawFd, RawFd};
use std::sync::Arc;

use crate::error::{Errno, FsResult};

struct OpenFile {
    file: Arc<File>,
    /// Lock held on a duplicate of `file`. The duplicate shares the open
    /// file description, so the lock belongs to this descriptor.
    lock: Option<Flock<File>>,
}

#[derive(Default)]
pub struct HandleTable {
    open: Mutex<HashMap<String, HashMap<RawFd, OpenFile>>>,
}

/// Decodes `flock(2)` operation bits. `None` means unlock.
fn flock_arg(cmd: i32) -> FsResult<Option<FlockArg>> {
    let nonblock = cmd & libc::LOCK_NB != 0;
    match (cmd & !libc::LOCK_NB, nonblock) {
        (libc::LOCK_SH, false) => Ok(Some(FlockArg::LockShared)),
        (libc::LOCK_SH, true) => Ok(Some(FlockArg::LockSharedNonblock)),
        (libc::LOCK_EX, false) => Ok(Some(FlockArg::LockExclusive)),
        (libc::LOCK_EX, true) => Ok(Some(FlockArg::LockExclusiveNonblock)),
        (libc::LOCK_UN, _) => Ok(None),
        _ => Err(Errno::EINVAL),
    }
}

impl HandleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes ownership of `file` and returns the descriptor number clients
    /// use to address it.
    pub fn register(&self, path: &str, file: File) -> RawFd {
        let fd = file.as_raw_fd();
        self.open.lock().entry(path.to_string()).or_default().insert(
            fd,
            OpenFile {
                file: Arc::new(file),
                lock: None,
            },
        );
        fd
    }

    pub fn lookup(&self, path: &str, fd: RawFd) -> FsResult<Arc<File>> {
        self.open
            .lock()
            .get(path)
            .and_then(|fds| fds.get(&fd))
            .map(|open| open.file.clone())
            .ok_or(Errno::EBADF)
    }

    /// Applies `flock(2)` operation `cmd` to one descriptor. A blocking
    /// request waits without holding the table lock.
    pub fn flock(&self, path: &str, fd: RawFd, cmd: i32) -> FsResult<()> {
        let arg = flock_arg(cmd)?;
        let (file, held) = {
            let mut open = self.open.lock();
            let entry = open
                .get_mut(path)
                .and_then(|fds| fds.get_mut(&fd))
                .ok_or(Errno::EBADF)?;
            (entry.file.clone(), entry.lock.take())
        };

        let (outcome, keep) = match (arg, held) {
            (None, None) => (Ok(()), None),
            (None, Some(held)) => match held.unlock() {
                Ok(_) => (Ok(()), None),
                Err((held, e)) => (Err(e), Some(held)),
            },
            (Some(arg), Some(held)) => (held.relock(arg), Some(held)),
            (Some(arg), None) => match Flock::lock(file.try_clone()?, arg) {
                Ok(lock) => (Ok(()), Some(lock)),
                Err((_, e)) => (Err(e), None),
            },
        };

        if let Some(lock) = keep {
            // A descriptor closed meanwhile drops the lock here.
            if let Some(entry) = self.open.lock().get_mut(path).and_then(|fds| fds.get_mut(&fd)) {
                entry.lock = Some(lock);
            }
        }

        Ok(outcome?)
    }

    /// Removes one descriptor. The path entry disappears with its last fd.
    pub fn unregister(&self, path: &str, fd: RawFd) -> FsResult<()> {
        let mut open = self.open.lock();
        let fds = open.get_mut(path).ok_or(Errno::EBADF)?;
        fds.remove(&fd).ok_or(Errno::EBADF)?;
        if fds.is_empty() {
            open.remove(path);
        }
        Ok(())
    }

    /// Force-closes every descriptor of `path`. Returns how many were open.
    pub fn unregister_path(&self, path: &str) -> usize {
        self.open
            .lock()
            .remove(path)
            .map(|fds| fds.len())
            .unwrap_or(0)
    }

    /// Force-closes every descriptor at or below directory `dir`.
    pub fn unregister_prefix(&self, dir: &str) -> usize {
        let prefix = format!("{}/", dir.trim_end_matches('/'));
        let mut open = self.open.lock();
        let doomed: Vec<String> = open
            .keys()
            .filter(|path| path.as_str() == dir || path.starts_with(&prefix))
            .cloned()
            .collect();

        doomed
            .iter()
            .filter_map(|path| open.remove(path))
            .map(|fds| fds.len())
            .sum()
    }

    pub fn open_count(&self, path: &str) -> usize {
        self.open.lock().get(path).map(|fds| fds.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.open.lock().is_empty()
    }
}
