use revlite::{FsError, NodeKind, Repository};
use tempfile::tempdir;

fn new_repo(dir: &std::path::Path) -> Repository {
    Repository::create(&dir.join("repo")).unwrap()
}

#[test]
fn txn_ids_are_sequential_and_listable() {
    let dir = tempdir().unwrap();
    let repo = new_repo(dir.path());

    let txn_a = repo.begin_txn().unwrap();
    let txn_b = repo.begin_txn().unwrap();
    assert_eq!(txn_a.name(), "0-0");
    assert_eq!(txn_b.name(), "0-1");
    assert_eq!(repo.list_transactions().unwrap(), vec!["0-0", "0-1"]);

    txn_a.abort().unwrap();
    assert_eq!(repo.list_transactions().unwrap(), vec!["0-1"]);
}

#[test]
fn open_txn_requires_an_existing_directory() {
    let dir = tempdir().unwrap();
    let repo = new_repo(dir.path());
    assert!(matches!(
        repo.open_txn("0-z"),
        Err(FsError::NoSuchTransaction(_))
    ));
    assert!(matches!(
        repo.purge_txn("not-a-txn"),
        Err(FsError::NoSuchTransaction(_))
    ));
}

#[test]
fn txn_props_bootstrap_and_update() {
    let dir = tempdir().unwrap();
    let repo = new_repo(dir.path());
    let txn = repo.begin_txn().unwrap();

    // Created with a date stamp; callers layer their props on top.
    assert!(txn.prop("svn:date").unwrap().is_some());
    txn.set_prop("svn:log", "work in progress").unwrap();
    txn.change_props(&[("custom", Some(b"x".as_slice()))]).unwrap();
    assert_eq!(txn.prop("custom").unwrap().as_deref(), Some(b"x".as_slice()));

    txn.change_props(&[("custom", None)]).unwrap();
    assert!(txn.prop("custom").unwrap().is_none());
}

#[test]
fn ephemeral_check_props_are_stripped_at_commit() {
    let dir = tempdir().unwrap();
    let repo = new_repo(dir.path());
    let txn = repo.begin_txn().unwrap();
    txn.change_props(&[
        ("svn:check-out-of-date", Some(b"true".as_slice())),
        ("svn:check-locks", Some(b"true".as_slice())),
        ("svn:log", Some(b"msg".as_slice())),
    ])
    .unwrap();
    txn.commit().unwrap();

    let props = repo.revision_proplist(1).unwrap();
    assert!(!props.contains_key("svn:check-out-of-date"));
    assert!(!props.contains_key("svn:check-locks"));
    assert_eq!(props.get("svn:log").map(Vec::as_slice), Some(b"msg".as_slice()));
}

#[test]
fn tree_ops_are_visible_inside_the_txn() {
    let dir = tempdir().unwrap();
    let repo = new_repo(dir.path());
    let txn = repo.begin_txn().unwrap();

    txn.make_dir("/trunk").unwrap();
    txn.make_file("/trunk/README").unwrap();
    txn.set_file_contents("/trunk/README", b"docs\n").unwrap();

    let node = txn.node_at("/trunk").unwrap();
    assert_eq!(node.kind, NodeKind::Dir);
    assert_eq!(txn.file_contents("/trunk/README").unwrap(), b"docs\n");

    txn.delete("/trunk/README").unwrap();
    assert!(matches!(
        txn.node_at("/trunk/README"),
        Err(FsError::NotFound(_))
    ));
}

#[test]
fn duplicate_adds_are_rejected() {
    let dir = tempdir().unwrap();
    let repo = new_repo(dir.path());
    let txn = repo.begin_txn().unwrap();
    txn.make_file("/a").unwrap();
    assert!(matches!(txn.make_file("/a"), Err(FsError::AlreadyExists(_))));
    assert!(matches!(txn.make_dir("/a"), Err(FsError::AlreadyExists(_))));
}

#[test]
fn missing_parents_are_not_created_implicitly() {
    let dir = tempdir().unwrap();
    let repo = new_repo(dir.path());
    let txn = repo.begin_txn().unwrap();
    assert!(matches!(
        txn.make_file("/no/such/parent"),
        Err(FsError::NotFound(_))
    ));
}

#[test]
fn abort_leaves_committed_state_untouched() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("repo");
    let repo = Repository::create(&path).unwrap();
    let txn = repo.begin_txn().unwrap();
    txn.make_file("/keep").unwrap();
    txn.set_file_contents("/keep", b"v1\n").unwrap();
    txn.commit().unwrap();

    let current_before = std::fs::read(path.join("current")).unwrap();
    let rev_before = std::fs::read(path.join("revs/0/1")).unwrap();

    let txn = repo.begin_txn().unwrap();
    txn.set_file_contents("/keep", b"scrapped\n").unwrap();
    let name = txn.name();
    txn.abort().unwrap();

    assert!(!path.join(format!("txns/{name}.txn")).exists());
    assert_eq!(std::fs::read(path.join("current")).unwrap(), current_before);
    assert_eq!(std::fs::read(path.join("revs/0/1")).unwrap(), rev_before);
    assert_eq!(repo.file_contents(1, "/keep").unwrap(), b"v1\n");
    repo.verify().unwrap();
}

#[test]
fn mutating_a_file_keeps_unrelated_siblings() {
    let dir = tempdir().unwrap();
    let repo = new_repo(dir.path());

    let txn = repo.begin_txn().unwrap();
    txn.make_file("/stable").unwrap();
    txn.set_file_contents("/stable", b"untouched\n").unwrap();
    txn.make_file("/volatile").unwrap();
    txn.set_file_contents("/volatile", b"v1\n").unwrap();
    txn.commit().unwrap();

    let txn = repo.begin_txn().unwrap();
    txn.set_file_contents("/volatile", b"v2\n").unwrap();
    txn.commit().unwrap();

    // The untouched sibling keeps its r1 node-revision id.
    let stable_r1 = repo.node_at(1, "/stable").unwrap();
    let stable_r2 = repo.node_at(2, "/stable").unwrap();
    assert_eq!(stable_r1.id, stable_r2.id);
    assert_eq!(repo.file_contents(2, "/volatile").unwrap(), b"v2\n");
}
