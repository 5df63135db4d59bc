//! Background exporter implementation.
//!
//! ## Responsibilities
//! - **Tracking**: Keeps `path -> last seen local mtime` under a single lock.
//! - **Copying**: Sweeps hold the lock for their whole duration, so registrations wait for a running sweep.
//! - **Scheduling**: One tokio task per node ticks the sweep on the blocking pool.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use walkdir::WalkDir;

use crate::tier::layout::{self, TierLayout};

/// Counters for one sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub copied: usize,
    pub pruned: usize,
    pub failed: usize,
}

pub struct WriteBackExporter {
    layout: TierLayout,
    entries: Mutex<HashMap<String, SystemTime>>,
}

impl WriteBackExporter {
    pub fn new(layout: TierLayout) -> Arc<Self> {
        Arc::new(Self {
            layout,
            entries: Mutex::new(HashMap::new()),
        })
    }

    /// Tracks `path` for export. Returns `false` when there is no local file.
    pub fn register(&self, path: &str) -> bool {
        let mtime = match fs::metadata(self.layout.local_path(path)).and_then(|m| m.modified()) {
            Ok(mtime) => mtime,
            Err(_) => return false,
        };
        self.entries.lock().insert(path.to_string(), mtime);
        true
    }

    pub fn unregister(&self, path: &str) -> bool {
        self.entries.lock().remove(path).is_some()
    }

    /// Drops every entry at or below directory `dir`.
    pub fn unregister_prefix(&self, dir: &str) -> usize {
        let prefix = format!("{}/", dir.trim_end_matches('/'));
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|path, _| path != dir && !path.starts_with(&prefix));
        before - entries.len()
    }

    pub fn unregister_all(&self) {
        self.entries.lock().clear();
    }

    pub fn is_registered(&self, path: &str) -> bool {
        self.entries.lock().contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Copies every registered file whose secondary copy is missing or
    /// older than the local one. Failed copies stay registered.
    pub fn sweep(&self) -> SweepReport {
        let mut entries = self.entries.lock();
        let mut report = SweepReport::default();
        let mut vanished = Vec::new();

        for (path, seen) in entries.iter_mut() {
            let local = self.layout.local_path(path);
            let local_mtime = match fs::metadata(&local).and_then(|m| m.modified()) {
                Ok(mtime) => mtime,
                Err(_) => {
                    vanished.push(path.clone());
                    continue;
                }
            };

            let secondary = self.layout.secondary_path(path);
            let stale = match fs::metadata(&secondary).and_then(|m| m.modified()) {
                Ok(secondary_mtime) => local_mtime > secondary_mtime,
                Err(_) => true,
            };
            if !stale {
                continue;
            }

            match layout::copy_with_parents(&local, &secondary) {
                Ok(bytes) => {
                    tracing::debug!("Exported {} ({} bytes)", path, bytes);
                    *seen = local_mtime;
                    report.copied += 1;
                }
                Err(e) => {
                    tracing::warn!("Failed to export {}: {}", path, e);
                    report.failed += 1;
                }
            }
        }

        for path in vanished {
            entries.remove(&path);
            report.pruned += 1;
        }

        report
    }

    /// Registers every regular file under the local root.
    pub fn scan(&self) -> usize {
        let mut found = 0;
        for entry in WalkDir::new(self.layout.local_root()).min_depth(1) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!("Skipping unreadable entry during scan: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            if let Some(path) = self.layout.relative_to_local(entry.path()) {
                if self.register(&path) {
                    found += 1;
                }
            }
        }
        found
    }

    /// Rebuilds the registry from scratch.
    pub fn rescan(&self) -> usize {
        self.unregister_all();
        self.scan()
    }

    /// Starts the periodic sweep. The first tick fires after one full
    /// interval.
    pub fn spawn(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tracing::info!("Starting write-back exporter (interval {:?})", interval);

        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);

            loop {
                ticker.tick().await;

                let exporter = self.clone();
                match tokio::task::spawn_blocking(move || exporter.sweep()).await {
                    Ok(report) => {
                        if report.copied > 0 || report.pruned > 0 || report.failed > 0 {
                            tracing::info!(
                                "Export sweep: copied={} pruned={} failed={}",
                                report.copied,
                                report.pruned,
                                report.failed
                            );
                        }
                    }
                    Err(e) => tracing::error!("Export sweep panicked: {}", e),
                }
            }
        })
    }
}
