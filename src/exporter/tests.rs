//! Exporter Module Tests
//!
//! ## Test Scopes
//! - **Registry**: Register / unregister bookkeeping.
//! - **Sweep**: Copy-when-newer, pruning of vanished files, byte-identical results.
//! - **Background Task**: The spawned loop performs sweeps on its own.

#[cfg(test)]
mod tests {
    use crate::exporter::exporter::{SweepReport, WriteBackExporter};
    use crate::tier::layout::TierLayout;
    use filetime::FileTime;
    use std::fs;
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn setup() -> (TempDir, TempDir, Arc<WriteBackExporter>) {
        let local = TempDir::new().unwrap();
        let secondary = TempDir::new().unwrap();
        let exporter = WriteBackExporter::new(TierLayout::new(local.path(), secondary.path()));
        (local, secondary, exporter)
    }

    fn write(root: &Path, rel: &str, content: &[u8], mtime: i64) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        filetime::set_file_mtime(&path, FileTime::from_unix_time(mtime, 0)).unwrap();
    }

    // ============================================================
    // REGISTRY TESTS
    // ============================================================

    #[test]
    fn test_register_requires_local_file() {
        let (local, _secondary, exporter) = setup();
        assert!(!exporter.register("/missing"));

        write(local.path(), "f", b"x", 100);
        assert!(exporter.register("/f"));
        assert!(exporter.is_registered("/f"));

        assert!(exporter.unregister("/f"));
        assert!(!exporter.unregister("/f"));
        assert!(exporter.is_empty());
    }

    #[test]
    fn test_unregister_prefix() {
        let (local, _secondary, exporter) = setup();
        for rel in ["d/a", "d/sub/b", "dx"] {
            write(local.path(), rel, b"x", 100);
            exporter.register(&format!("/{}", rel));
        }

        assert_eq!(exporter.unregister_prefix("/d"), 2);
        assert!(exporter.is_registered("/dx"));
    }

    // ============================================================
    // SWEEP TESTS
    // ============================================================

    #[test]
    fn test_sweep_copies_when_secondary_absent() {
        let (local, secondary, exporter) = setup();
        write(local.path(), "out/result.bin", b"fresh data", 100);
        exporter.register("/out/result.bin");

        let report = exporter.sweep();

        assert_eq!(
            report,
            SweepReport {
                copied: 1,
                pruned: 0,
                failed: 0
            }
        );
        assert_eq!(
            fs::read(secondary.path().join("out/result.bin")).unwrap(),
            b"fresh data"
        );
        assert!(exporter.is_registered("/out/result.bin"), "Entry stays tracked");
    }

    #[test]
    fn test_sweep_copies_only_newer_local() {
        let (local, secondary, exporter) = setup();
        write(local.path(), "f", b"local", 100);
        write(secondary.path(), "f", b"secondary", 200);
        exporter.register("/f");

        assert_eq!(exporter.sweep().copied, 0, "Older local copy must not overwrite");
        assert_eq!(fs::read(secondary.path().join("f")).unwrap(), b"secondary");

        write(local.path(), "f", b"local v2", 300);
        assert_eq!(exporter.sweep().copied, 1);
        assert_eq!(fs::read(secondary.path().join("f")).unwrap(), b"local v2");
    }

    #[test]
    fn test_sweep_prunes_vanished_entries() {
        let (local, _secondary, exporter) = setup();
        write(local.path(), "gone", b"x", 100);
        exporter.register("/gone");
        fs::remove_file(local.path().join("gone")).unwrap();

        let report = exporter.sweep();

        assert_eq!(report.pruned, 1);
        assert!(!exporter.is_registered("/gone"));
    }

    #[test]
    fn test_scan_and_rescan() {
        let (local, _secondary, exporter) = setup();
        write(local.path(), "a", b"1", 100);
        write(local.path(), "d/b", b"2", 100);
        fs::create_dir_all(local.path().join("empty")).unwrap();

        assert_eq!(exporter.scan(), 2);
        assert!(exporter.is_registered("/a"));
        assert!(exporter.is_registered("/d/b"));

        fs::remove_file(local.path().join("a")).unwrap();
        assert_eq!(exporter.rescan(), 1);
        assert_eq!(exporter.len(), 1);
    }

    // ============================================================
    // BACKGROUND TASK TESTS
    // ============================================================

    #[tokio::test]
    async fn test_spawned_exporter_sweeps_periodically() {
        let (local, secondary, exporter) = setup();
        write(local.path(), "tick", b"auto", 100);
        exporter.register("/tick");

        let handle = exporter.clone().spawn(Duration::from_millis(50));

        let target = secondary.path().join("tick");
        for _ in 0..100 {
            if fs::read(&target).map(|b| b == b"auto").unwrap_or(false) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        handle.abort();

        assert_eq!(fs::read(&target).unwrap(), b"auto");
    }
}
