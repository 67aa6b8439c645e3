//! End-to-end integrity verification (`fsck`).
//!
//! Checks, in order: (a) every loose and packed object rehashes to its
//! name, (b) every commit's tree closure exists, (c) every ref resolves to
//! a commit, (d) the audit chain verifies, (e) recorded Merkle roots
//! recompute, (f) recorded signatures verify against known public keys.
//!
//! Object rehashing fans out across worker threads; each finding carries a
//! stable error kind plus context. Cancellation returns the partial report
//! flagged `cancelled`.

use dashmap::DashSet;
use rayon::prelude::*;
use tracing::info;

use crate::errors::MemError;
use crate::hash::ObjectHash;
use crate::internal::crypto::merkle::{MerkleProof, MerkleTree};
use crate::internal::object::ObjectTrait;
use crate::internal::object::types::ObjectType;
use crate::internal::repo::Repository;
use crate::internal::store::encode_framed;
use crate::internal::worktree::flatten_tree;
use crate::utils::CancelToken;

/// One verification finding: stable kind plus human-readable context.
#[derive(Debug, Clone)]
pub struct FsckIssue {
    pub kind: &'static str,
    pub context: String,
}

impl FsckIssue {
    fn from_error(error: &MemError, context: impl Into<String>) -> FsckIssue {
        FsckIssue {
            kind: error.kind(),
            context: context.into(),
        }
    }
}

/// Outcome of one fsck run.
#[derive(Debug, Clone, Default)]
pub struct FsckReport {
    pub objects_checked: usize,
    pub issues: Vec<FsckIssue>,
    pub cancelled: bool,
}

impl FsckReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty() && !self.cancelled
    }
}

impl Repository {
    /// Verify the whole repository. `verify_crypto` additionally recomputes
    /// Merkle roots and checks signatures.
    pub fn fsck(&self, verify_crypto: bool, cancel: &CancelToken) -> Result<FsckReport, MemError> {
        let mut report = FsckReport::default();
        let checked: DashSet<ObjectHash> = DashSet::new();

        // (a) rehash every object, loose first, then packed.
        let loose = self.store.iter_loose()?;
        let loose_issues: Vec<FsckIssue> = loose
            .par_iter()
            .filter_map(|hash| {
                if cancel.is_cancelled() || !checked.insert(*hash) {
                    return None;
                }
                self.store
                    .verify_loose(hash)
                    .err()
                    .map(|e| FsckIssue::from_error(&e, format!("loose object {hash}")))
            })
            .collect();
        report.issues.extend(loose_issues);

        let packed = self.store.packed_hashes();
        let packed_issues: Vec<FsckIssue> = packed
            .par_iter()
            .filter_map(|hash| {
                if cancel.is_cancelled() || !checked.insert(*hash) {
                    return None;
                }
                match self.store.get(hash) {
                    Ok((kind, payload)) => {
                        let framed = encode_framed(kind, &payload);
                        (ObjectHash::new(&framed) != *hash).then(|| {
                            FsckIssue::from_error(
                                &MemError::HashMismatch(hash.to_string()),
                                format!("packed object {hash}"),
                            )
                        })
                    }
                    Err(e) => Some(FsckIssue::from_error(&e, format!("packed object {hash}"))),
                }
            })
            .collect();
        report.issues.extend(packed_issues);
        report.objects_checked = checked.len();
        if cancel.is_cancelled() {
            report.cancelled = true;
            return Ok(report);
        }

        // (b) commit closure: tree and blobs exist for every commit.
        let mut commits = Vec::new();
        for hash in loose.iter().chain(packed.iter()) {
            if cancel.is_cancelled() {
                report.cancelled = true;
                return Ok(report);
            }
            if let Ok((ObjectType::Commit, _)) = self.store.get(hash) {
                match self.store.get_commit(hash) {
                    Ok(commit) => commits.push(commit),
                    Err(e) => report
                        .issues
                        .push(FsckIssue::from_error(&e, format!("commit {hash}"))),
                }
            }
        }
        for commit in &commits {
            match flatten_tree(&self.store, commit.tree_id) {
                Ok(files) => {
                    for (path, blob_hash) in &files {
                        if !self.store.exists(blob_hash) {
                            report.issues.push(FsckIssue::from_error(
                                &MemError::NotFound(blob_hash.to_string()),
                                format!("blob {path} of commit {}", commit.id),
                            ));
                        }
                    }
                }
                Err(e) => report
                    .issues
                    .push(FsckIssue::from_error(&e, format!("tree of commit {}", commit.id))),
            }
            for parent in &commit.parent_commit_ids {
                if !self.store.exists(parent) {
                    report.issues.push(FsckIssue::from_error(
                        &MemError::NotFound(parent.to_string()),
                        format!("parent of commit {}", commit.id),
                    ));
                }
            }
        }

        // (c) every ref resolves to an existing commit.
        let mut refs = self.refs.list_branches()?;
        refs.extend(self.refs.list_tags()?);
        if let Some(tip) = self.refs.head_commit()? {
            refs.push(("HEAD".to_string(), tip));
        }
        for (name, hash) in refs {
            if !self.store.exists(&hash) {
                report.issues.push(FsckIssue::from_error(
                    &MemError::NotFound(hash.to_string()),
                    format!("ref {name}"),
                ));
            }
        }

        // (d) audit chain.
        if let Err(e) = self.audit.verify() {
            report.issues.push(FsckIssue::from_error(&e, "audit log"));
        }

        if verify_crypto {
            self.verify_crypto_layer(&commits, &mut report, cancel)?;
        }

        info!(
            objects = report.objects_checked,
            issues = report.issues.len(),
            "fsck complete"
        );
        Ok(report)
    }

    /// (e) + (f): recompute Merkle roots and verify signatures for commits
    /// carrying them.
    fn verify_crypto_layer(
        &self,
        commits: &[crate::internal::object::commit::Commit],
        report: &mut FsckReport,
        cancel: &CancelToken,
    ) -> Result<(), MemError> {
        for commit in commits {
            if cancel.is_cancelled() {
                report.cancelled = true;
                return Ok(());
            }
            let Some(recorded_root) = commit.merkle_root() else {
                continue;
            };
            let recomputed = match flatten_tree(&self.store, commit.tree_id) {
                Ok(files) => {
                    let pairs: Vec<(String, ObjectHash)> = files.into_iter().collect();
                    MerkleTree::build(&pairs).root()
                }
                Err(e) => {
                    report
                        .issues
                        .push(FsckIssue::from_error(&e, format!("commit {}", commit.id)));
                    continue;
                }
            };
            if recomputed != recorded_root {
                report.issues.push(FsckIssue::from_error(
                    &MemError::MerkleMismatch(commit.id.to_string()),
                    format!("commit {}", commit.id),
                ));
                continue;
            }

            if let (Some(key_id), Some(signature)) =
                (commit.signing_key_id(), commit.signature_bytes())
                && let Err(e) = self.keyring.verify_root(key_id, recorded_root, &signature)
            {
                report
                    .issues
                    .push(FsckIssue::from_error(&e, format!("commit {}", commit.id)));
            }
        }
        Ok(())
    }

    /// Crypto-only verification of a single commit (`verify --crypto`):
    /// recompute the Merkle root from the tree, compare, then check the
    /// signature.
    pub fn verify_commit_crypto(&self, rev: &str) -> Result<(), MemError> {
        let hash = self.resolve_revision(rev)?;
        let commit = self.store.get_commit(&hash)?;
        let Some(recorded_root) = commit.merkle_root() else {
            return Ok(());
        };

        // The root covers (path, blob) leaves; recompute against stored
        // blob *content* so a tampered blob surfaces as MerkleMismatch.
        let files = flatten_tree(&self.store, commit.tree_id)?;
        let mut pairs = Vec::with_capacity(files.len());
        for (path, blob_hash) in files {
            let blob = self.store.get_blob(&blob_hash)?;
            pairs.push((path, blob.object_hash()?));
        }
        let recomputed = MerkleTree::build(&pairs).root();
        if recomputed != recorded_root {
            return Err(MemError::MerkleMismatch(hash.to_string()));
        }

        if let (Some(key_id), Some(signature)) =
            (commit.signing_key_id(), commit.signature_bytes())
        {
            self.keyring
                .verify_root(key_id, recorded_root, &signature)?;
        }
        Ok(())
    }

    /// Merkle set-membership proof for one path of a commit, plus the root
    /// it verifies against. Collaborators hand these to third parties that
    /// hold only the root.
    pub fn prove_path(
        &self,
        rev: &str,
        path: &str,
    ) -> Result<(MerkleProof, ObjectHash), MemError> {
        let hash = self.resolve_revision(rev)?;
        let commit = self.store.get_commit(&hash)?;
        let files = flatten_tree(&self.store, commit.tree_id)?;
        let pairs: Vec<(String, ObjectHash)> = files.into_iter().collect();
        let tree = MerkleTree::build(&pairs);
        let proof = tree
            .prove(path)
            .ok_or_else(|| MemError::NotFound(format!("`{path}` in {rev}")))?;
        Ok((proof, tree.root()))
    }
}
