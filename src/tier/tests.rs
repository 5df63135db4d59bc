//! Tier Module Tests
//!
//! ## Test Scopes
//! - **Layout**: Path derivation and root stripping.
//! - **Virtual Links**: Suffix handling and one-line target files.
//! - **Manager**: Promotion, handle tracking, both-tier metadata updates and merged listings.

#[cfg(test)]
mod tests {
    use crate::error::Errno;
    use crate::tier::handles::HandleTable;
    use crate::tier::layout::TierLayout;
    use crate::tier::manager::{TieredStorageManager, has_write_intent};
    use crate::tier::types::{DirScope, Promotion, TimeSpec};
    use crate::tier::vlink::{self, HARDLINK_SUFFIX, LinkKind, SYMLINK_SUFFIX};
    use filetime::FileTime;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use std::sync::Arc;
    use tempfile::TempDir;

    struct Tiers {
        local: TempDir,
        secondary: TempDir,
        manager: Arc<TieredStorageManager>,
    }

    fn setup() -> Tiers {
        let local = TempDir::new().unwrap();
        let secondary = TempDir::new().unwrap();
        let manager = TieredStorageManager::new(TierLayout::new(local.path(), secondary.path()));
        Tiers {
            local,
            secondary,
            manager,
        }
    }

    fn write(root: &Path, rel: &str, content: &[u8]) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn set_mtime(root: &Path, rel: &str, secs: i64) {
        filetime::set_file_mtime(root.join(rel), FileTime::from_unix_time(secs, 0)).unwrap();
    }

    // ============================================================
    // LAYOUT TESTS
    // ============================================================

    #[test]
    fn test_layout_paths() {
        let layout = TierLayout::new("/fast", "/bulk");

        assert_eq!(layout.local_path("/a/b.txt"), Path::new("/fast/a/b.txt"));
        assert_eq!(layout.secondary_path("/a/b.txt"), Path::new("/bulk/a/b.txt"));
        assert_eq!(layout.local_path("/"), Path::new("/fast"));
        assert_eq!(layout.strip_root(Path::new("/bulk/dir/x")), "/dir/x");
        assert_eq!(layout.strip_root(Path::new("/fast/y")), "/y");
        assert_eq!(layout.strip_root(Path::new("/elsewhere/z")), "/elsewhere/z");
    }

    #[test]
    fn test_layout_never_leaves_its_roots() {
        let layout = TierLayout::new("/fast", "/bulk");

        assert_eq!(layout.local_path("/../etc/passwd"), Path::new("/fast/etc/passwd"));
        assert_eq!(layout.secondary_path("/a/../../b"), Path::new("/bulk/a/b"));
        assert_eq!(layout.local_path("/./a//b/"), Path::new("/fast/a/b"));

        assert_eq!(crate::tier::layout::check_path("/../x"), Err(Errno::EINVAL));
        assert_eq!(crate::tier::layout::check_path("/a/../b"), Err(Errno::EINVAL));
        assert!(crate::tier::layout::check_path("/a/..b/c..").is_ok());
    }

    #[test]
    fn test_target_prefers_local() {
        let t = setup();
        write(t.secondary.path(), "f", b"old");
        assert_eq!(
            t.manager.layout().target_path("/f"),
            t.secondary.path().join("f")
        );

        write(t.local.path(), "f", b"new");
        assert_eq!(t.manager.layout().target_path("/f"), t.local.path().join("f"));
    }

    // ============================================================
    // VIRTUAL LINK TESTS
    // ============================================================

    #[test]
    fn test_vlink_suffix_handling() {
        let decorated = LinkKind::Symbolic.decorate("/d/l");
        assert_eq!(decorated, format!("/d/l{}", SYMLINK_SUFFIX));
        assert_eq!(LinkKind::Symbolic.decorate(&decorated), decorated);

        assert_eq!(vlink::classify(&decorated), Some(LinkKind::Symbolic));
        assert_eq!(
            vlink::classify(&format!("x{}", HARDLINK_SUFFIX)),
            Some(LinkKind::Hard)
        );
        assert_eq!(vlink::classify("plain"), None);
        assert_eq!(vlink::strip(&decorated), ("/d/l", Some(LinkKind::Symbolic)));
    }

    #[test]
    fn test_vlink_target_is_one_line() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("link");
        vlink::write_target(&file, "/some/target path").unwrap();

        assert_eq!(fs::read_to_string(&file).unwrap(), "/some/target path\n");
        assert_eq!(vlink::read_target(&file).unwrap(), "/some/target path");
    }

    #[test]
    fn test_virtual_symlink_reports_link_type_and_target() {
        let t = setup();
        let link = LinkKind::Symbolic.decorate("/ln");
        t.manager.write_virtual_link(&link, "/data/target.bin").unwrap();

        let (stat, target) = t.manager.get_attr(&link).unwrap();
        assert!(stat.is_symlink());
        assert_eq!(target.as_deref(), Some("/data/target.bin"));
    }

    #[test]
    fn test_virtual_hard_link_keeps_regular_mode() {
        let t = setup();
        let link = LinkKind::Hard.decorate("/hl");
        t.manager.write_virtual_link(&link, "/orig").unwrap();

        let (stat, target) = t.manager.get_attr(&link).unwrap();
        assert_eq!(stat.file_type(), libc::S_IFREG);
        assert_eq!(target.as_deref(), Some("/orig"));
    }

    // ============================================================
    // HANDLE TABLE TESTS
    // ============================================================

    #[test]
    fn test_handle_table_tracks_multiple_opens() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("f");
        fs::write(&file, b"x").unwrap();

        let table = HandleTable::new();
        let fd1 = table.register("/f", fs::File::open(&file).unwrap());
        let fd2 = table.register("/f", fs::File::open(&file).unwrap());
        assert_ne!(fd1, fd2);
        assert_eq!(table.open_count("/f"), 2);

        table.unregister("/f", fd1).unwrap();
        assert_eq!(table.open_count("/f"), 1);
        assert_eq!(table.unregister("/f", fd1), Err(Errno::EBADF));
        assert!(table.lookup("/f", fd2).is_ok());

        table.unregister("/f", fd2).unwrap();
        assert!(table.is_empty(), "Last close removes the path entry");
    }

    #[test]
    fn test_handle_table_force_close_path_and_prefix() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("f");
        fs::write(&file, b"x").unwrap();

        let table = HandleTable::new();
        table.register("/d/a", fs::File::open(&file).unwrap());
        table.register("/d/a", fs::File::open(&file).unwrap());
        table.register("/d/sub/b", fs::File::open(&file).unwrap());
        table.register("/dx", fs::File::open(&file).unwrap());

        assert_eq!(table.unregister_path("/d/a"), 2);
        assert_eq!(table.unregister_path("/d/a"), 0);

        table.register("/d/a", fs::File::open(&file).unwrap());
        assert_eq!(table.unregister_prefix("/d"), 2);
        assert_eq!(table.open_count("/dx"), 1, "Sibling with shared prefix survives");
    }

    // ============================================================
    // PROMOTION TESTS
    // ============================================================

    #[test]
    fn test_open_promotes_secondary_only_file() {
        let t = setup();
        write(t.secondary.path(), "data/in.dat", b"payload");

        let fd = t.manager.open("/data/in.dat", libc::O_RDONLY).unwrap();

        assert_eq!(
            fs::read(t.local.path().join("data/in.dat")).unwrap(),
            b"payload"
        );
        let bytes = t.manager.read("/data/in.dat", fd, 64, 0).unwrap();
        assert_eq!(bytes, b"payload");
        t.manager.close("/data/in.dat", fd).unwrap();
    }

    #[test]
    fn test_promotion_copies_once_per_modification() {
        let t = setup();
        write(t.secondary.path(), "f", b"v1");
        set_mtime(t.secondary.path(), "f", 1_000_000);

        assert_eq!(t.manager.copy_secondary_to_local("/f").unwrap(), Promotion::Copied);
        assert_eq!(
            t.manager.copy_secondary_to_local("/f").unwrap(),
            Promotion::UpToDate,
            "Unchanged secondary must not be copied again"
        );

        write(t.secondary.path(), "f", b"v2");
        set_mtime(t.secondary.path(), "f", 2_000_000);
        assert_eq!(t.manager.copy_secondary_to_local("/f").unwrap(), Promotion::Copied);
        assert_eq!(fs::read(t.local.path().join("f")).unwrap(), b"v2");
    }

    #[test]
    fn test_promotion_of_missing_file_is_absent() {
        let t = setup();
        assert_eq!(
            t.manager.copy_secondary_to_local("/nope").unwrap(),
            Promotion::Absent
        );
    }

    // ============================================================
    // FILE LIFECYCLE TESTS
    // ============================================================

    #[test]
    fn test_create_write_read_close() {
        let t = setup();
        let fd = t
            .manager
            .create("/new.txt", libc::O_RDWR, 0o644)
            .unwrap();
        assert_eq!(t.manager.handles().open_count("/new.txt"), 1);

        assert_eq!(t.manager.write("/new.txt", fd, 0, b"hello world").unwrap(), 11);
        assert_eq!(t.manager.read("/new.txt", fd, 5, 6).unwrap(), b"world");
        t.manager.flush("/new.txt", fd).unwrap();
        t.manager.fsync("/new.txt", fd, true).unwrap();

        t.manager.ftruncate("/new.txt", fd, 5).unwrap();
        assert_eq!(t.manager.fget_attr("/new.txt", fd).unwrap().size, 5);

        t.manager.close("/new.txt", fd).unwrap();
        assert_eq!(t.manager.handles().open_count("/new.txt"), 0);
        assert_eq!(t.manager.read("/new.txt", fd, 5, 0), Err(Errno::EBADF));
        assert!(!t.secondary.path().join("new.txt").exists(), "Create is local only");
    }

    #[test]
    fn test_lock_on_open_descriptor() {
        let t = setup();
        let fd = t.manager.create("/l", libc::O_RDWR, 0o644).unwrap();
        t.manager.lock("/l", fd, libc::LOCK_EX).unwrap();
        t.manager.lock("/l", fd, libc::LOCK_UN).unwrap();
        t.manager.close("/l", fd).unwrap();
    }

    #[test]
    fn test_lock_conflicts_between_descriptors() {
        let t = setup();
        let fd1 = t.manager.create("/l", libc::O_RDWR, 0o644).unwrap();
        let fd2 = t.manager.open("/l", libc::O_RDWR).unwrap();

        t.manager.lock("/l", fd1, libc::LOCK_EX).unwrap();
        assert_eq!(
            t.manager.lock("/l", fd2, libc::LOCK_EX | libc::LOCK_NB),
            Err(Errno(libc::EWOULDBLOCK))
        );

        t.manager.lock("/l", fd1, libc::LOCK_UN).unwrap();
        t.manager.lock("/l", fd2, libc::LOCK_SH | libc::LOCK_NB).unwrap();
        t.manager.lock("/l", fd1, libc::LOCK_SH | libc::LOCK_NB).unwrap();
    }

    #[test]
    fn test_close_releases_lock() {
        let t = setup();
        let fd1 = t.manager.create("/l", libc::O_RDWR, 0o644).unwrap();
        let fd2 = t.manager.open("/l", libc::O_RDWR).unwrap();

        t.manager.lock("/l", fd1, libc::LOCK_EX).unwrap();
        t.manager.close("/l", fd1).unwrap();

        t.manager.lock("/l", fd2, libc::LOCK_EX | libc::LOCK_NB).unwrap();
    }

    #[test]
    fn test_lock_rejects_unknown_operation() {
        let t = setup();
        let fd = t.manager.create("/l", libc::O_RDWR, 0o644).unwrap();
        assert_eq!(t.manager.lock("/l", fd, 0), Err(Errno::EINVAL));
        assert_eq!(t.manager.lock("/l", fd + 100, libc::LOCK_SH), Err(Errno::EBADF));
    }

    #[test]
    fn test_write_intent_flags() {
        assert!(has_write_intent(libc::O_WRONLY));
        assert!(has_write_intent(libc::O_RDWR | libc::O_APPEND));
        assert!(!has_write_intent(libc::O_RDONLY));
    }

    // ============================================================
    // METADATA TESTS
    // ============================================================

    #[test]
    fn test_chmod_applies_to_both_tiers() {
        let t = setup();
        write(t.local.path(), "f", b"a");
        write(t.secondary.path(), "f", b"a");

        t.manager.chmod("/f", 0o600).unwrap();

        for root in [t.local.path(), t.secondary.path()] {
            let mode = fs::metadata(root.join("f")).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn test_utimens_applies_to_both_tiers() {
        let t = setup();
        write(t.local.path(), "f", b"a");
        write(t.secondary.path(), "f", b"a");

        t.manager
            .utimens("/f", TimeSpec::new(0, TimeSpec::OMIT), TimeSpec::new(1_234_567, 0))
            .unwrap();

        for root in [t.local.path(), t.secondary.path()] {
            let meta = fs::metadata(root.join("f")).unwrap();
            assert_eq!(FileTime::from_last_modification_time(&meta).unix_seconds(), 1_234_567);
        }
    }

    #[test]
    fn test_metadata_on_missing_path_is_enoent() {
        let t = setup();
        assert_eq!(t.manager.chmod("/ghost", 0o644), Err(Errno::ENOENT));
        assert_eq!(t.manager.get_attr("/ghost").unwrap_err(), Errno::ENOENT);
    }

    #[test]
    fn test_truncate_and_access_use_target() {
        let t = setup();
        write(t.secondary.path(), "s", b"0123456789");

        t.manager.truncate("/s", 4).unwrap();
        assert_eq!(fs::metadata(t.secondary.path().join("s")).unwrap().len(), 4);
        t.manager.access("/s", libc::F_OK).unwrap();
        assert_eq!(t.manager.access("/missing", libc::F_OK), Err(Errno::ENOENT));
    }

    #[test]
    fn test_statfs_reports_block_size() {
        let t = setup();
        let vfs = t.manager.statfs("/").unwrap();
        assert!(vfs.bsize > 0);
    }

    // ============================================================
    // NAMESPACE TESTS
    // ============================================================

    #[test]
    fn test_mkdir_and_rmdir_on_both_tiers() {
        let t = setup();
        t.manager.mkdir("/d", 0o755).unwrap();
        assert!(t.local.path().join("d").is_dir());
        assert!(t.secondary.path().join("d").is_dir());

        t.manager.rmdir("/d").unwrap();
        assert!(!t.local.path().join("d").exists());
        assert!(!t.secondary.path().join("d").exists());
    }

    #[test]
    fn test_unlink_absent_path_succeeds() {
        let t = setup();
        assert_eq!(t.manager.unlink("/never"), Ok(()));
    }

    #[test]
    fn test_unlink_force_closes_handles() {
        let t = setup();
        let fd = t.manager.create("/u", libc::O_RDWR, 0o644).unwrap();
        write(t.secondary.path(), "u", b"old");

        t.manager.unlink("/u").unwrap();

        assert_eq!(t.manager.handles().open_count("/u"), 0);
        assert_eq!(t.manager.read("/u", fd, 1, 0), Err(Errno::EBADF));
        assert!(!t.local.path().join("u").exists());
        assert!(!t.secondary.path().join("u").exists());
    }

    #[test]
    fn test_rename_secondary_only_file() {
        let t = setup();
        write(t.secondary.path(), "a", b"x");

        t.manager.rename("/a", "/b").unwrap();

        assert!(t.secondary.path().join("b").exists());
        assert_eq!(t.manager.rename("/a", "/c"), Err(Errno::ENOENT));
    }

    #[test]
    fn test_native_dir_symlink_points_into_tier() {
        let t = setup();
        t.manager.mkdir("/real", 0o755).unwrap();

        assert!(t.manager.symlink_dir("/real", "/alias").unwrap());

        let link = fs::read_link(t.local.path().join("alias")).unwrap();
        assert_eq!(link, t.local.path().join("real"));
        assert_eq!(t.manager.read_link("/alias", 0).unwrap(), "/real");
        assert!(!t.manager.symlink_dir("/missing", "/x").unwrap());
    }

    #[test]
    fn test_mirror_directories() {
        let t = setup();
        fs::create_dir_all(t.secondary.path().join("a/b/c")).unwrap();
        fs::create_dir_all(t.secondary.path().join("z")).unwrap();
        write(t.secondary.path(), "a/file", b"not a dir");

        let created = t.manager.mirror_directories("/").unwrap();

        assert_eq!(created, 4);
        assert!(t.local.path().join("a/b/c").is_dir());
        assert!(t.local.path().join("z").is_dir());
        assert!(!t.local.path().join("a/file").exists(), "Only directories are mirrored");
    }

    // ============================================================
    // DIRECTORY LISTING TESTS
    // ============================================================

    #[test]
    fn test_read_dir_merges_and_dedups() {
        let t = setup();
        write(t.local.path(), "d/shared", b"local");
        write(t.local.path(), "d/only_local", b"");
        write(t.secondary.path(), "d/shared", b"secondary");
        write(t.secondary.path(), "d/only_secondary", b"");
        write(t.secondary.path(), &format!("d/ln{}", SYMLINK_SUFFIX), b"/t\n");

        let entries = t.manager.read_dir("/d", 0, DirScope::All).unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();

        assert_eq!(&names[..2], &[".", ".."]);
        assert_eq!(names.iter().filter(|n| **n == "shared").count(), 1);
        assert!(names.contains(&"only_local"));
        assert!(names.contains(&"only_secondary"));

        let link = entries.iter().find(|e| e.name == "ln").unwrap();
        assert_eq!(link.mode, libc::S_IFLNK);

        let shared = entries.iter().find(|e| e.name == "shared").unwrap();
        let local_ino = {
            use std::os::unix::fs::MetadataExt;
            fs::metadata(t.local.path().join("d/shared")).unwrap().ino()
        };
        assert_eq!(shared.ino, local_ino, "Local entry wins the collision");
    }

    #[test]
    fn test_read_dir_dot_entries_use_own_and_parent_inode() {
        use std::os::unix::fs::MetadataExt;

        let t = setup();
        write(t.local.path(), "d/sub/f", b"");

        let entries = t.manager.read_dir("/d/sub", 0, DirScope::All).unwrap();

        let ino = |rel: &str| fs::metadata(t.local.path().join(rel)).unwrap().ino();
        assert_eq!(entries[0].name, ".");
        assert_eq!(entries[0].ino, ino("d/sub"));
        assert_eq!(entries[1].name, "..");
        assert_eq!(entries[1].ino, ino("d"));
    }

    #[test]
    fn test_read_dir_scope_filters_tiers() {
        let t = setup();
        write(t.local.path(), "d/l", b"");
        write(t.secondary.path(), "d/s", b"");

        let secondary = t.manager.read_dir("/d", 0, DirScope::Secondary).unwrap();
        let names: Vec<&str> = secondary.iter().map(|e| e.name.as_str()).collect();
        assert!(names.contains(&"s"));
        assert!(!names.contains(&"l"));

        assert_eq!(
            t.manager.read_dir("/nowhere", 0, DirScope::All).unwrap_err(),
            Errno::ENOENT
        );
    }

    // ============================================================
    // XATTR TESTS
    // ============================================================

    #[test]
    fn test_xattr_round_trip_when_supported() {
        let t = setup();
        write(t.local.path(), "x", b"");

        // tmpfs without user xattrs reports ENOTSUP; nothing to check there
        if t.manager.set_xattr("/x", "user.bb", b"42", 0).is_err() {
            return;
        }

        assert_eq!(t.manager.get_xattr("/x", "user.bb", 0).unwrap(), (2, Vec::new()));
        assert_eq!(
            t.manager.get_xattr("/x", "user.bb", 16).unwrap(),
            (2, b"42".to_vec())
        );
        assert_eq!(t.manager.get_xattr("/x", "user.bb", 1), Err(Errno::ERANGE));

        let (_, names) = t.manager.list_xattr("/x", 256).unwrap();
        assert!(names.windows(8).any(|w| w == b"user.bb\0"));

        t.manager.remove_xattr("/x", "user.bb").unwrap();
        assert_eq!(t.manager.get_xattr("/x", "user.bb", 16), Err(Errno::ENODATA));
    }
}
