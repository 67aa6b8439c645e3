//! Pack-at-scale and garbage-collection behavior: the binary-search bound
//! over a large index, GC reachability safety, and repack round-trips.

mod common;

use std::collections::HashMap;
use std::path::Path;

use memvc::errors::MemError;
use memvc::internal::object::blob::Blob;
use memvc::internal::pack::entry::Entry;
use memvc::internal::pack::{PackHandle, PackWriter};
use memvc::utils::CancelToken;

use common::{commit_file, temp_repo, write_file};

/// 10,000 objects in one pack; every lookup succeeds within
/// ⌈log₂ n⌉ + 1 = 14 comparisons.
#[test]
fn test_pack_binary_search_bound() {
    let dir = tempfile::tempdir().unwrap();
    let entries: Vec<Entry> = (0..10_000)
        .map(|i| Entry::from(Blob::new(format!("memory artifact {i}\n").as_bytes())))
        .collect();

    let writer = PackWriter::new(16).unwrap();
    let info = writer.write(dir.path(), &entries, &HashMap::new()).unwrap();
    assert_eq!(info.object_count, 10_000);

    let handle = PackHandle::open(&info.pack_path, &info.idx_path).unwrap();
    let mut worst = 0usize;
    for entry in &entries {
        let lookup = handle.index.search(&entry.hash);
        assert!(lookup.offset.is_some());
        worst = worst.max(lookup.comparisons);

        let (_, data) = handle.read(&entry.hash).unwrap().unwrap();
        assert_eq!(data, entry.data);
    }
    assert!(worst <= 14, "worst probe count {worst} exceeds bound");
}

/// After GC with repack, everything reachable from branches, tags,
/// HEAD, and the reflog is still readable; unreachable loose objects are
/// swept.
#[test]
fn test_gc_reachability_safety() {
    let (dir, repo) = temp_repo();
    let first = commit_file(&repo, dir.path(), "semantic/pref.md", "dark mode\n", "first");
    repo.create_tag("v1", None).unwrap();

    repo.create_branch("exp", None).unwrap();
    repo.checkout("exp").unwrap();
    let exp_tip = commit_file(
        &repo,
        dir.path(),
        "episodic/log.md",
        "2026-01-01T09:00:00Z event\n",
        "event",
    );
    repo.checkout("main").unwrap();

    // An unreachable blob: staged, then unstaged (the loose object stays).
    write_file(dir.path(), "semantic/orphan.md", "orphaned payload\n");
    repo.stage(Path::new("semantic/orphan.md")).unwrap();
    repo.unstage(Path::new("semantic/orphan.md")).unwrap();
    let orphan = Blob::new(b"orphaned payload\n").id;
    assert!(repo.store().exists(&orphan));

    let report = repo.gc(true, &CancelToken::new()).unwrap();
    assert!(report.swept >= 1);
    assert!(report.repacked > 0);
    assert!(!repo.store().exists(&orphan));

    // Every commit on every root remains readable after the repack.
    for tip in [first, exp_tip] {
        let commit = repo.store().get_commit(&tip).unwrap();
        assert!(repo.store().exists(&commit.tree_id));
    }
    assert_eq!(repo.log("main", 10).unwrap().len(), 1);
    assert_eq!(repo.log("exp", 10).unwrap().len(), 2);
    assert_eq!(repo.log("v1", 10).unwrap().len(), 1);
    assert_eq!(
        repo.files_at("exp").unwrap().len(),
        2,
        "blob closure survived"
    );

    // The working tree can still be rebuilt from packed objects.
    repo.checkout("exp").unwrap();
    assert_eq!(
        common::read_file(dir.path(), "episodic/log.md"),
        "2026-01-01T09:00:00Z event\n"
    );
}

/// Cancellation aborts the sweep before any delete.
#[test]
fn test_gc_cancelled() {
    let (dir, repo) = temp_repo();
    commit_file(&repo, dir.path(), "semantic/pref.md", "dark mode\n", "first");

    let loose_before = repo.store().iter_loose().unwrap().len();
    let cancel = CancelToken::new();
    cancel.cancel();
    assert!(matches!(
        repo.gc(false, &cancel),
        Err(MemError::Cancelled)
    ));
    assert_eq!(repo.store().iter_loose().unwrap().len(), loose_before);
}

/// Similarity-seeded repack produces deltas for near-duplicate blobs and
/// still reads every object back bitwise equal.
#[test]
fn test_repack_with_deltas() {
    let (dir, repo) = temp_repo();
    let base_text = "workflow: deploy\nstep 1 backups\nstep 2 rollout\nstep 3 verify\n";
    commit_file(&repo, dir.path(), "procedural/deploy.md", base_text, "v1");
    let v2_text = format!("{base_text}step 4 announce\n");
    commit_file(&repo, dir.path(), "procedural/deploy.md", &v2_text, "v2");

    let report = repo.gc(true, &CancelToken::new()).unwrap();
    assert!(report.repacked > 0);

    // Both blob versions read back from the pack.
    let v1_blob = Blob::new(base_text.as_bytes());
    let v2_blob = Blob::new(v2_text.as_bytes());
    assert_eq!(repo.store().get_blob(&v1_blob.id).unwrap().data, v1_blob.data);
    assert_eq!(repo.store().get_blob(&v2_blob.id).unwrap().data, v2_blob.data);
}
