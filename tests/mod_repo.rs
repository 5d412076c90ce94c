use revlite::{FsError, Repository};
use tempfile::tempdir;

#[test]
fn create_commits_revision_zero() {
    let dir = tempdir().unwrap();
    let repo = Repository::create(&dir.path().join("repo")).unwrap();

    assert_eq!(repo.youngest().unwrap(), 0);
    let root = repo.rev_root(0).unwrap();
    assert_eq!(root.predecessor_count, 0);
    assert!(repo.dir_entries(0, "/").unwrap().is_empty());
    assert!(repo.changed_paths(0).unwrap().is_empty());
    assert!(repo.revision_proplist(0).unwrap().contains_key("svn:date"));
    repo.verify().unwrap();
}

#[test]
fn reopen_sees_the_same_state() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("repo");
    {
        let repo = Repository::create(&path).unwrap();
        let txn = repo.begin_txn().unwrap();
        txn.make_file("/hello").unwrap();
        txn.set_file_contents("/hello", b"hi\n").unwrap();
        txn.commit().unwrap();
    }
    let repo = Repository::open(&path).unwrap();
    assert_eq!(repo.youngest().unwrap(), 1);
    assert_eq!(repo.file_contents(1, "/hello").unwrap(), b"hi\n");
}

#[test]
fn create_refuses_an_existing_repository() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("repo");
    Repository::create(&path).unwrap();
    assert!(matches!(Repository::create(&path), Err(FsError::Config(_))));
}

#[test]
fn open_refuses_a_non_repository() {
    let dir = tempdir().unwrap();
    assert!(Repository::open(dir.path()).is_err());
}

#[test]
fn current_file_format_is_pinned() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("repo");
    let repo = Repository::create(&path).unwrap();
    assert_eq!(std::fs::read(path.join("current")).unwrap(), b"0\n");

    let txn = repo.begin_txn().unwrap();
    txn.commit().unwrap();
    assert_eq!(std::fs::read(path.join("current")).unwrap(), b"1\n");
}

#[test]
fn revision_files_are_read_only_after_commit() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("repo");
    let repo = Repository::create(&path).unwrap();
    let txn = repo.begin_txn().unwrap();
    txn.make_file("/a").unwrap();
    txn.commit().unwrap();

    for file in ["revs/0/1", "revs/0/1.l2p-index", "revs/0/1.p2l-index"] {
        let meta = std::fs::metadata(path.join(file)).unwrap();
        assert!(meta.permissions().readonly(), "{file} should be read-only");
    }
}
