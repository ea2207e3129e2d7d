//! End-to-end session scenarios mirroring the named seed walkthroughs.

use hpfs_log::Operation;
use hpfs_session::Session;
use hpfs_vfs::layout_write_block;

fn mode_payload(mode: u32) -> Vec<u8> {
    mode.to_le_bytes().to_vec()
}

struct Fixture {
    _dir: tempfile::TempDir,
    seed_dir: std::path::PathBuf,
    log_path: std::path::PathBuf,
    hmap_dir: std::path::PathBuf,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let seed_dir = dir.path().join("seed");
    std::fs::create_dir_all(&seed_dir).unwrap();
    let log_path = dir.path().join("log.hpfs");
    let hmap_dir = dir.path().join("hmap");
    Fixture { _dir: dir, seed_dir, log_path, hmap_dir }
}

#[test]
fn s1_mkdir_then_stat() {
    let fx = fixture();
    let mut session = Session::open(2, &fx.seed_dir, &fx.log_path, false, Some(fx.hmap_dir.clone())).unwrap();

    session.record_and_apply(Operation::Mkdir, 1, "/a", Some(&mode_payload(0o755)), &[]).unwrap();

    let vn = session.vfs.get_vnode("/a").unwrap().unwrap();
    assert!(vn.stat.is_dir());
    assert_eq!(vn.stat.mode & 0o777, 0o755);
    assert_eq!(vn.stat.size, 0);

    let root_hash = session.hmap.as_mut().unwrap().root_hash();
    assert!(!root_hash.is_empty());
}

#[test]
fn s2_write_then_read() {
    let fx = fixture();
    let mut session = Session::open(2, &fx.seed_dir, &fx.log_path, false, Some(fx.hmap_dir.clone())).unwrap();

    session.record_and_apply(Operation::Create, 1, "/f", Some(&mode_payload(0o644)), &[]).unwrap();
    let (payload, _start, _end, segments) = session.vfs.prepare_write("/f", 0, b"hello").unwrap();
    session
        .record_and_apply(Operation::Write, 2, "/f", Some(&payload.encode()), &segments)
        .unwrap();

    let vn = session.vfs.get_vnode("/f").unwrap().unwrap();
    assert_eq!(vn.stat.size, 5);
    assert_eq!(vn.read(0, 5), b"hello");
}

#[test]
fn s3_truncate_grow() {
    let fx = fixture();
    let mut session = Session::open(2, &fx.seed_dir, &fx.log_path, false, Some(fx.hmap_dir.clone())).unwrap();

    session.record_and_apply(Operation::Create, 1, "/f", Some(&mode_payload(0o644)), &[]).unwrap();
    let (payload, _start, _end, segments) = session.vfs.prepare_write("/f", 0, b"hello").unwrap();
    session
        .record_and_apply(Operation::Write, 2, "/f", Some(&payload.encode()), &segments)
        .unwrap();

    // Build the grow-truncate's block data the same way a write extending the file
    // would: existing bytes followed by zero-fill out to the new size.
    let existing = session.vfs.get_vnode("/f").unwrap().unwrap().read(0, 5);
    let zero_fill = vec![0u8; 5];
    let (block_start, block_end, segments) = layout_write_block(Some(&existing), 5, 5, &zero_fill);
    let trunc_payload = hpfs_vfs::TruncatePayload {
        size: 10,
        mmap_block_size: block_end - block_start,
        mmap_block_offset: block_start,
    };
    session
        .record_and_apply(Operation::Truncate, 3, "/f", Some(&trunc_payload.encode()), &segments)
        .unwrap();

    let vn = session.vfs.get_vnode("/f").unwrap().unwrap();
    assert_eq!(vn.stat.size, 10);
    assert_eq!(vn.read(0, 10), b"hello\0\0\0\0\0");
}

#[test]
fn s4_rename_matches_fresh_seed_with_only_the_destination() {
    let fx = fixture();
    let mut session = Session::open(2, &fx.seed_dir, &fx.log_path, false, Some(fx.hmap_dir.clone())).unwrap();

    session.record_and_apply(Operation::Create, 1, "/f", Some(&mode_payload(0o644)), &[]).unwrap();
    let (payload, _s, _e, segments) = session.vfs.prepare_write("/f", 0, b"hello").unwrap();
    session
        .record_and_apply(Operation::Write, 2, "/f", Some(&payload.encode()), &segments)
        .unwrap();
    session.record_and_apply(Operation::Rename, 3, "/f", Some(b"/g".as_slice()), &[]).unwrap();

    assert!(session.vfs.get_vnode("/f").unwrap().is_none());
    let vn = session.vfs.get_vnode("/g").unwrap().unwrap();
    assert_eq!(vn.read(0, 5), b"hello");

    let rename_root = session.hmap.as_mut().unwrap().root_hash();

    let fx2 = fixture();
    let mut fresh = Session::open(2, &fx2.seed_dir, &fx2.log_path, false, Some(fx2.hmap_dir.clone())).unwrap();
    fresh.record_and_apply(Operation::Create, 1, "/g", Some(&mode_payload(0o644)), &[]).unwrap();
    let (payload, _s, _e, segments) = fresh.vfs.prepare_write("/g", 0, b"hello").unwrap();
    fresh
        .record_and_apply(Operation::Write, 2, "/g", Some(&payload.encode()), &segments)
        .unwrap();
    let fresh_root = fresh.hmap.as_mut().unwrap().root_hash();

    assert_eq!(rename_root, fresh_root);
}

#[test]
fn s6_snapshot_isolation_across_a_concurrent_write() {
    let fx = fixture();

    {
        let mut rw = Session::open(2, &fx.seed_dir, &fx.log_path, false, None).unwrap();
        rw.record_and_apply(Operation::Create, 1, "/f", Some(&mode_payload(0o644)), &[]).unwrap();
        let (payload, _s, _e, segments) = rw.vfs.prepare_write("/f", 0, b"hello").unwrap();
        rw.record_and_apply(Operation::Write, 2, "/f", Some(&payload.encode()), &segments).unwrap();
        // Dropping here commits the checkpoint the RO session below will snapshot at.
    }

    let ro = Session::open(3, &fx.seed_dir, &fx.log_path, true, None).unwrap();

    {
        let mut rw2 = Session::open(4, &fx.seed_dir, &fx.log_path, false, None).unwrap();
        let (payload, _s, _e, segments) = rw2.vfs.prepare_write("/f", 5, b" world").unwrap();
        rw2.record_and_apply(Operation::Write, 3, "/f", Some(&payload.encode()), &segments).unwrap();
    }

    let vn = ro.vfs.get_vnode("/f").unwrap().unwrap();
    assert_eq!(vn.stat.size, 5);
    assert_eq!(vn.read(0, 5), b"hello");
}
