use revlite::FsConfig;
use revlite::errors::FsError;
use revlite::index::l2p::{l2p_index_create, l2p_lookup};
use revlite::index::p2l::{ItemRef, P2lEntry, p2l_entries, p2l_entry_lookup, p2l_index_create};
use revlite::index::proto::{ProtoL2p, ProtoP2l};
use revlite::index::ItemType;
use revlite::repo::caches::Caches;
use revlite::repo::layout::Layout;
use tempfile::tempdir;

#[test]
fn l2p_round_trip_across_two_revisions() {
    let dir = tempdir().unwrap();
    let config = FsConfig::default();
    let layout = Layout::new(dir.path().to_path_buf(), config.max_files_per_dir);
    std::fs::create_dir_all(layout.rev_shard_dir(10)).unwrap();

    let proto_path = dir.path().join("l2p.proto");
    let mut proto = ProtoL2p::open(&proto_path).unwrap();
    proto.add_entry(0, 2).unwrap();
    proto.add_entry(17, 3).unwrap();
    proto.add_revision().unwrap();
    proto.add_entry(42, 2).unwrap();
    drop(proto);

    l2p_index_create(&config, &layout.l2p_index_path(10), &proto_path, 10).unwrap();
    // The same index data answers for both covered revisions.
    std::fs::copy(layout.l2p_index_path(10), layout.l2p_index_path(11)).unwrap();

    let caches = Caches::new();
    assert_eq!(l2p_lookup(&layout, &config, &caches, 10, 2).unwrap(), 0);
    assert_eq!(l2p_lookup(&layout, &config, &caches, 10, 3).unwrap(), 17);
    assert_eq!(l2p_lookup(&layout, &config, &caches, 11, 2).unwrap(), 42);

    assert!(matches!(
        l2p_lookup(&layout, &config, &caches, 10, 0),
        Err(FsError::ItemIndexOverflow { revision: 10, item_index: 0 })
    ));
    assert!(matches!(
        l2p_lookup(&layout, &config, &caches, 12, 0),
        Err(FsError::ItemIndexRevision { revision: 12 })
    ));
}

#[test]
fn l2p_handles_pages_beyond_the_first() {
    let dir = tempdir().unwrap();
    let config = FsConfig { l2p_page_size: 4, ..Default::default() };
    let layout = Layout::new(dir.path().to_path_buf(), config.max_files_per_dir);
    std::fs::create_dir_all(layout.rev_shard_dir(3)).unwrap();

    let proto_path = dir.path().join("l2p.proto");
    let mut proto = ProtoL2p::open(&proto_path).unwrap();
    for item in 0..10u64 {
        proto.add_entry((item * 100) as i64, item).unwrap();
    }
    drop(proto);
    l2p_index_create(&config, &layout.l2p_index_path(3), &proto_path, 3).unwrap();

    let caches = Caches::new();
    for item in 0..10u64 {
        assert_eq!(l2p_lookup(&layout, &config, &caches, 3, item).unwrap(), item * 100);
    }
    assert!(matches!(
        l2p_lookup(&layout, &config, &caches, 3, 10),
        Err(FsError::ItemIndexOverflow { .. })
    ));
    // Further lookup rounds are served from the page cache.
    let misses_before = caches.l2p_pages.metrics.snapshot().misses;
    for item in 0..10u64 {
        assert_eq!(l2p_lookup(&layout, &config, &caches, 3, item).unwrap(), item * 100);
    }
    let snap = caches.l2p_pages.metrics.snapshot();
    assert_eq!(snap.misses, misses_before, "no further page loads expected");
    assert!(snap.hits > 0);
}

#[test]
fn p2l_lookup_walks_page_boundaries() {
    let dir = tempdir().unwrap();
    // Tiny pages so one large entry spans several of them.
    let config = FsConfig { p2l_page_size: 64, ..Default::default() };
    let layout = Layout::new(dir.path().to_path_buf(), config.max_files_per_dir);
    std::fs::create_dir_all(layout.rev_shard_dir(7)).unwrap();

    let proto_path = dir.path().join("p2l.proto");
    let mut proto = ProtoP2l::open(&proto_path).unwrap();
    let entries = vec![
        P2lEntry {
            offset: 0,
            size: 40,
            item_type: ItemType::FileRep,
            items: vec![ItemRef { revision: None, number: 3 }],
        },
        P2lEntry {
            offset: 40,
            size: 200,
            item_type: ItemType::NodeRev,
            items: vec![ItemRef { revision: None, number: 2 }],
        },
        P2lEntry {
            offset: 240,
            size: 10,
            item_type: ItemType::Changes,
            items: vec![ItemRef { revision: None, number: 1 }],
        },
    ];
    for entry in &entries {
        proto.add_entry(entry).unwrap();
    }
    drop(proto);
    p2l_index_create(&config, &layout.p2l_index_path(7), &proto_path, 7).unwrap();

    let caches = Caches::new();
    // Offset 100 falls in a page that records no entry start; the lookup
    // walks back to the entry beginning at 40.
    let entry = p2l_entry_lookup(&layout, &config, &caches, 7, 100).unwrap().unwrap();
    assert_eq!(entry.offset, 40);
    assert_eq!(entry.item_type, ItemType::NodeRev);
    assert_eq!(entry.items[0].revision, Some(7));

    let all = p2l_entries(&layout, &config, &caches, 7).unwrap();
    assert_eq!(all.len(), 3);
    let mut expected = 0;
    for entry in &all {
        assert_eq!(entry.offset, expected);
        expected += entry.size;
    }
    assert_eq!(expected, 250);

    assert!(p2l_entry_lookup(&layout, &config, &caches, 7, 250).unwrap().is_none());
}
