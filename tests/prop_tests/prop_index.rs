use proptest::prelude::*;
use revlite::FsConfig;
use revlite::index::ItemType;
use revlite::index::l2p::{l2p_index_create, l2p_lookup};
use revlite::index::p2l::{ItemRef, P2lEntry, p2l_entries, p2l_index_create};
use revlite::index::proto::{ProtoL2p, ProtoP2l};
use revlite::repo::caches::Caches;
use revlite::repo::layout::Layout;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Whatever (item, offset) pairs go into the proto index come back
    /// out of the final one, and absent items overflow.
    #[test]
    fn l2p_preserves_every_mapping(
        offsets in proptest::collection::vec(0u64..1 << 40, 1..200),
        page_size in prop_oneof![Just(4u64), Just(16), Just(0x2000)],
    ) {
        let dir = tempfile::tempdir().unwrap();
        let config = FsConfig { l2p_page_size: page_size, ..Default::default() };
        let layout = Layout::new(dir.path().to_path_buf(), config.max_files_per_dir);
        std::fs::create_dir_all(layout.rev_shard_dir(5)).unwrap();

        let proto_path = dir.path().join("l2p.proto");
        let mut proto = ProtoL2p::open(&proto_path).unwrap();
        for (item, &offset) in offsets.iter().enumerate() {
            proto.add_entry(offset as i64, item as u64).unwrap();
        }
        drop(proto);
        l2p_index_create(&config, &layout.l2p_index_path(5), &proto_path, 5).unwrap();

        let caches = Caches::new();
        for (item, &offset) in offsets.iter().enumerate() {
            prop_assert_eq!(
                l2p_lookup(&layout, &config, &caches, 5, item as u64).unwrap(),
                offset
            );
        }
        prop_assert!(
            l2p_lookup(&layout, &config, &caches, 5, offsets.len() as u64).is_err()
        );
    }

    /// A random tiling survives the build and still tiles on read.
    #[test]
    fn p2l_preserves_the_tiling(
        sizes in proptest::collection::vec(1u64..10_000, 1..100),
        page_size in prop_oneof![Just(64u64), Just(4096), Just(0x10000)],
    ) {
        let dir = tempfile::tempdir().unwrap();
        let config = FsConfig { p2l_page_size: page_size, ..Default::default() };
        let layout = Layout::new(dir.path().to_path_buf(), config.max_files_per_dir);
        std::fs::create_dir_all(layout.rev_shard_dir(9)).unwrap();

        let proto_path = dir.path().join("p2l.proto");
        let mut proto = ProtoP2l::open(&proto_path).unwrap();
        let mut offset = 0u64;
        for (i, &size) in sizes.iter().enumerate() {
            proto.add_entry(&P2lEntry {
                offset,
                size,
                item_type: ItemType::NodeRev,
                items: vec![ItemRef { revision: None, number: i as u64 }],
            }).unwrap();
            offset += size;
        }
        drop(proto);
        p2l_index_create(&config, &layout.p2l_index_path(9), &proto_path, 9).unwrap();

        let caches = Caches::new();
        let entries = p2l_entries(&layout, &config, &caches, 9).unwrap();
        prop_assert_eq!(entries.len(), sizes.len());
        let mut expected = 0u64;
        for (entry, &size) in entries.iter().zip(&sizes) {
            prop_assert_eq!(entry.offset, expected);
            prop_assert_eq!(entry.size, size);
            prop_assert_eq!(entry.items[0].revision, Some(9));
            expected += size;
        }
    }
}
