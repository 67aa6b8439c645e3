//! Remote synchronization over the filesystem transport: clone, push,
//! pull, fast-forward enforcement, and trust gating.

mod common;

use std::path::Path;

use memvc::errors::MemError;
use memvc::internal::merge::MergeResult;
use memvc::internal::repo::{RepoOpenOptions, Repository};
use memvc::internal::sync::transport::{FileTransport, Transport};
use memvc::internal::trust::TrustLevel;
use memvc::utils::CancelToken;

use common::{commit_file, read_file, temp_repo};

fn clone_to(src_root: &Path) -> (tempfile::TempDir, Repository) {
    let dest = tempfile::tempdir().unwrap();
    let transport = FileTransport::open(src_root).unwrap();
    let repo = Repository::clone_from(
        &transport,
        dest.path(),
        "origin",
        RepoOpenOptions::default(),
        &CancelToken::new(),
    )
    .unwrap();
    (dest, repo)
}

/// Clone materializes branches, the working tree, and remote-tracking refs.
#[test]
fn test_clone() {
    let (src_dir, src) = temp_repo();
    let tip = commit_file(&src, src_dir.path(), "semantic/pref.md", "dark mode\n", "first");

    let (dest_dir, clone) = clone_to(src_dir.path());
    assert_eq!(clone.head_commit().unwrap(), Some(tip));
    assert_eq!(read_file(dest_dir.path(), "semantic/pref.md"), "dark mode\n");
    assert_eq!(
        clone.files_at("origin/main").unwrap(),
        clone.files_at("main").unwrap()
    );
}

/// Push streams missing objects and fast-forwards the remote.
#[test]
fn test_push_fast_forward() {
    let (src_dir, src) = temp_repo();
    commit_file(&src, src_dir.path(), "semantic/pref.md", "dark mode\n", "first");

    let (dest_dir, clone) = clone_to(src_dir.path());
    let new_tip = commit_file(
        &clone,
        dest_dir.path(),
        "semantic/pref.md",
        "dark mode\npython\n",
        "add python",
    );

    let transport = FileTransport::open(src_dir.path()).unwrap();
    let pushed = clone
        .push("origin", &transport, "main", &CancelToken::new())
        .unwrap();
    assert_eq!(pushed, new_tip);
    assert_eq!(transport.list_refs().unwrap(), vec![("main".to_string(), new_tip)]);

    // The source repo now reads the new commit.
    assert_eq!(src.store().get_commit(&new_tip).unwrap().message, "add python");

    // Pushing again is a no-op fast-forward.
    clone
        .push("origin", &transport, "main", &CancelToken::new())
        .unwrap();
}

/// A non-fast-forward push is rejected and the remote tip stays put.
#[test]
fn test_non_fast_forward_push_rejected() {
    let (src_dir, src) = temp_repo();
    commit_file(&src, src_dir.path(), "semantic/pref.md", "base\n", "base");

    let (dest_dir, clone) = clone_to(src_dir.path());

    // Diverge: C1 in the clone, C2 in the source.
    commit_file(&clone, dest_dir.path(), "semantic/pref.md", "clone view\n", "C1");
    let c2 = commit_file(&src, src_dir.path(), "semantic/pref.md", "source view\n", "C2");

    let transport = FileTransport::open(src_dir.path()).unwrap();
    assert!(matches!(
        clone.push("origin", &transport, "main", &CancelToken::new()),
        Err(MemError::NonFastForward(_))
    ));
    // Remote branch still points at C2.
    assert_eq!(transport.list_refs().unwrap(), vec![("main".to_string(), c2)]);
}

/// Pull fetches then merges the remote-tracking branch.
#[test]
fn test_pull() {
    let (src_dir, src) = temp_repo();
    commit_file(&src, src_dir.path(), "semantic/pref.md", "base\n", "base");

    let (dest_dir, clone) = clone_to(src_dir.path());

    // Source advances; pulling fast-forwards the clone.
    let tip = commit_file(&src, src_dir.path(), "semantic/pref.md", "base\nmore\n", "more");
    let transport = FileTransport::open(src_dir.path()).unwrap();
    let result = clone
        .pull("origin", &transport, "main", &CancelToken::new())
        .unwrap();
    assert_eq!(result, MergeResult::FastForward(tip));
    assert_eq!(read_file(dest_dir.path(), "semantic/pref.md"), "base\nmore\n");

    // Divergent episodic edits merge through the memory-type engine.
    commit_file(
        &src,
        src_dir.path(),
        "episodic/log.md",
        "2026-01-01T10:00:00Z upstream event\n",
        "upstream",
    );
    commit_file(
        &clone,
        dest_dir.path(),
        "episodic/log.md",
        "2026-01-01T11:00:00Z local event\n",
        "local",
    );
    let result = clone
        .pull("origin", &transport, "main", &CancelToken::new())
        .unwrap();
    let MergeResult::Merged(outcome) = result else {
        panic!("expected merge, got {result:?}");
    };
    assert!(outcome.conflicts.is_empty());
    assert_eq!(
        read_file(dest_dir.path(), "episodic/log.md"),
        "2026-01-01T10:00:00Z upstream event\n2026-01-01T11:00:00Z local event\n"
    );
}

/// Commits signed by an untrusted key stay quarantined: no ref moves until
/// the key is promoted.
#[test]
fn test_trust_gate_on_pull() {
    let src_dir = tempfile::tempdir().unwrap();
    let mut config = common::test_config();
    config.signing.enabled = true;
    let src = Repository::init(src_dir.path(), config).unwrap();
    commit_file(&src, src_dir.path(), "semantic/pref.md", "base\n", "base");

    let (dest_dir, clone) = clone_to(src_dir.path());
    let key_id = src.keyring().list_public().unwrap().remove(0);

    // Clone propagated the key as untrusted.
    assert_eq!(
        clone.trust_store().unwrap().get(&key_id),
        Some(TrustLevel::Untrusted)
    );

    commit_file(&src, src_dir.path(), "semantic/pref.md", "signed update\n", "update");
    let transport = FileTransport::open(src_dir.path()).unwrap();

    let err = clone
        .pull("origin", &transport, "main", &CancelToken::new())
        .unwrap_err();
    assert!(matches!(err, MemError::UntrustedKey(_)));
    // Local state untouched.
    assert_eq!(read_file(dest_dir.path(), "semantic/pref.md"), "base\n");

    // Promote the key and pull again.
    clone
        .trust_store()
        .unwrap()
        .set(&key_id, TrustLevel::Full)
        .unwrap();
    let result = clone
        .pull("origin", &transport, "main", &CancelToken::new())
        .unwrap();
    assert!(matches!(result, MergeResult::FastForward(_)));
    assert_eq!(read_file(dest_dir.path(), "semantic/pref.md"), "signed update\n");
}

/// Fetch observes cancellation between object boundaries.
#[test]
fn test_fetch_cancelled() {
    let (src_dir, src) = temp_repo();
    commit_file(&src, src_dir.path(), "semantic/pref.md", "base\n", "base");

    let dest = tempfile::tempdir().unwrap();
    let dest_repo = Repository::init(dest.path(), common::test_config()).unwrap();
    let transport = FileTransport::open(src_dir.path()).unwrap();

    let cancel = CancelToken::new();
    cancel.cancel();
    assert!(matches!(
        dest_repo.fetch("origin", &transport, &[], &cancel),
        Err(MemError::Cancelled)
    ));
    // Quarantine is discarded on the error path.
    let leftovers: Vec<_> = std::fs::read_dir(dest.path().join(".mem/objects"))
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with("quarantine-"))
        .collect();
    assert!(leftovers.is_empty());
}
