use revlite::{CommitOptions, FsError, Repository};
use std::sync::Barrier;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::tempdir;

#[test]
fn out_of_date_commit_fails_and_leaves_the_txn() {
    let dir = tempdir().unwrap();
    let repo = Repository::create(&dir.path().join("repo")).unwrap();

    let txn_a = repo.begin_txn().unwrap();
    txn_a.make_file("/a").unwrap();
    let txn_b = repo.begin_txn().unwrap();
    txn_b.make_file("/b").unwrap();

    assert_eq!(txn_b.commit().unwrap(), 1);

    let name_a = txn_a.name();
    let err = txn_a.commit().unwrap_err();
    assert_eq!(err.code(), 160_028, "expected fs-txn-out-of-date, got: {err}");

    // The failed commit changed nothing and A's scratch space survives.
    assert_eq!(repo.youngest().unwrap(), 1);
    assert!(repo.list_transactions().unwrap().contains(&name_a));
    repo.verify().unwrap();

    // A can be aborted (rebasing is the caller's business).
    repo.purge_txn(&name_a).unwrap();
    assert!(repo.list_transactions().unwrap().is_empty());
}

#[test]
fn proto_rev_contention_fails_fast() {
    let dir = tempdir().unwrap();
    let repo = Repository::create(&dir.path().join("repo")).unwrap();

    let txn = repo.begin_txn().unwrap();
    txn.make_file("/a").unwrap();
    txn.set_file_contents("/a", b"contents\n").unwrap();

    // Rendezvous while the committing thread holds the proto-rev lock:
    // the cancel predicate fires between node-revision writes.
    let barrier = Barrier::new(2);
    let calls = AtomicUsize::new(0);
    let name = txn.name();

    std::thread::scope(|scope| {
        let writer = scope.spawn(|| {
            barrier.wait();
            let other = repo.open_txn(&name).unwrap();
            let err = other.set_file_contents("/a", b"interloper\n").unwrap_err();
            barrier.wait();
            err
        });

        let cancel = || {
            // The second poll happens inside the tree walk, with the
            // proto-rev advisory lock and being-written flag held.
            if calls.fetch_add(1, Ordering::SeqCst) == 1 {
                barrier.wait();
                barrier.wait();
            }
            false
        };
        let options = CommitOptions { cancel: Some(&cancel), lock_checker: None };
        let new_rev = txn.commit_with(&options).unwrap();
        assert_eq!(new_rev, 1);

        let err = writer.join().unwrap();
        assert!(
            matches!(err, FsError::RepBeingWritten(_)),
            "expected fs-rep-being-written, got: {err}"
        );
    });

    assert_eq!(repo.file_contents(1, "/a").unwrap(), b"contents\n");
}

#[test]
fn cancellation_before_promotion_leaves_the_txn_intact() {
    let dir = tempdir().unwrap();
    let repo = Repository::create(&dir.path().join("repo")).unwrap();

    let txn = repo.begin_txn().unwrap();
    txn.make_file("/a").unwrap();
    let name = txn.name();

    let cancel = || true;
    let options = CommitOptions { cancel: Some(&cancel), lock_checker: None };
    let err = txn.commit_with(&options).unwrap_err();
    assert_eq!(err.code(), 200_015, "expected cancelled, got: {err}");

    assert_eq!(repo.youngest().unwrap(), 0);
    assert!(repo.list_transactions().unwrap().contains(&name));

    // A later, uncancelled commit of the same transaction succeeds.
    let txn = repo.open_txn(&name).unwrap();
    assert_eq!(txn.commit().unwrap(), 1);
}

struct DenyAll;

impl revlite::PathLockChecker for DenyAll {
    fn allow(&self, path: &str, _recurse: bool) -> revlite::Result<()> {
        Err(FsError::PathLocked(path.to_string()))
    }
}

#[test]
fn path_lock_verification_blocks_the_commit() {
    let dir = tempdir().unwrap();
    let repo = Repository::create(&dir.path().join("repo")).unwrap();

    let txn = repo.begin_txn().unwrap();
    txn.make_file("/locked").unwrap();

    let options = CommitOptions { cancel: None, lock_checker: Some(&DenyAll) };
    let err = txn.commit_with(&options).unwrap_err();
    assert_eq!(err.code(), 160_035, "expected path-locked, got: {err}");
    assert_eq!(repo.youngest().unwrap(), 0);
}

#[test]
fn writers_from_clones_serialize_on_the_write_lock() {
    let dir = tempdir().unwrap();
    let repo = Repository::create(&dir.path().join("repo")).unwrap();

    // Sequential commits through cloned handles stay consistent.
    let clone = repo.clone();
    for expected in 1..=4u64 {
        let handle = if expected % 2 == 0 { &clone } else { &repo };
        let txn = handle.begin_txn().unwrap();
        txn.make_file(&format!("/f{expected}")).unwrap();
        assert_eq!(txn.commit().unwrap(), expected);
    }
    assert_eq!(repo.youngest().unwrap(), 4);
    repo.verify().unwrap();
}
