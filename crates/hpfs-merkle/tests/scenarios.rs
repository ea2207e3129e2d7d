//! Hash-query scenario over a file: `::hpfs.hmap.hash` and `::hpfs.hmap.children`
//! against a populated file node, exercised the way a session's `HashQuery` would see
//! it after a write.

use hpfs_hash::HASH_LEN;
use hpfs_log::{AuditLog, LogMode, Operation};
use hpfs_merkle::{parse_request_path, HashQuery, HashTree};
use hpfs_vfs::VfsBuilder;

fn mode_payload(mode: u32) -> Vec<u8> {
    mode.to_le_bytes().to_vec()
}

#[test]
fn s5_hash_query_over_a_written_file() {
    let dir = tempfile::tempdir().unwrap();
    let seed_dir = dir.path().join("seed");
    std::fs::create_dir_all(&seed_dir).unwrap();

    let mut log = AuditLog::open(dir.path().join("log.hpfs"), LogMode::Rw).unwrap();
    let mut vfs = VfsBuilder::new(&seed_dir, false, &log).unwrap();
    let mut tree = HashTree::new(dir.path().join("hmap"));
    tree.init(&mut vfs).unwrap();

    let offset = log.append(Operation::Create, 1, "/f", Some(&mode_payload(0o644)), &[]).unwrap();
    let (record, _) = log.read_at(offset).unwrap().unwrap();
    let payload = log.read_payload(&record).unwrap();
    vfs.apply_log_record(&record, &payload).unwrap();
    tree.apply_create(&mut vfs, "/f").unwrap();

    let (write_payload, _start, _end, segments) = vfs.prepare_write("/f", 0, b"hello").unwrap();
    let offset = log
        .append(Operation::Write, 2, "/f", Some(&write_payload.encode()), &segments)
        .unwrap();
    let (record, _) = log.read_at(offset).unwrap().unwrap();
    let payload = log.read_payload(&record).unwrap();
    vfs.apply_log_record(&record, &payload).unwrap();
    tree.apply_data_update(&mut vfs, "/f", write_payload.offset, write_payload.size).unwrap();

    let query = HashQuery;

    let hash_req = parse_request_path("/f::hpfs.hmap.hash").unwrap();
    let stat = query.getattr(&mut tree, &mut vfs, &hash_req).unwrap();
    assert_eq!(stat.size, HASH_LEN as u64);
    let bytes = query.read(&mut tree, &mut vfs, &hash_req, 4096).unwrap();
    assert_eq!(bytes, tree.store.find("/f").unwrap().node_hash.as_bytes());

    let children_req = parse_request_path("/f::hpfs.hmap.children").unwrap();
    let stat = query.getattr(&mut tree, &mut vfs, &children_req).unwrap();
    assert_eq!(stat.size, HASH_LEN as u64); // one 4MiB-aligned block covers "hello"
    let bytes = query.read(&mut tree, &mut vfs, &children_req, 4096).unwrap();
    assert_eq!(bytes.len(), HASH_LEN);

    let root_req = parse_request_path("/::hpfs.hmap.children").unwrap();
    let bytes = query.read(&mut tree, &mut vfs, &root_req, 4096).unwrap();
    // is_file(1) + 256-byte name + 32-byte hash, name field starts with "f".
    assert_eq!(bytes[0], 1u8);
    assert_eq!(&bytes[1..2], b"f");
    assert_eq!(&bytes[257..289], tree.store.find("/f").unwrap().node_hash.as_bytes());
}
