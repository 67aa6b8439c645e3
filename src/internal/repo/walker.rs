//! Commit walking and revision resolution.
//!
//! The walker yields commits in parent-chain order: depth-first with the
//! first parent preferred and a visited set keyed by commit hash, so merge
//! topologies never repeat a commit. `HEAD~n` (and `rev~n` generally) walks
//! first parents only.
//!
//! Revision resolution accepts, in order: `HEAD`, `rev~n`, branch name,
//! tag name, `remote/branch`, a full 64-char hash, and a unique hash prefix
//! of at least 4 hex chars (`AmbiguousRef` when several objects match).

use std::collections::HashSet;
use std::str::FromStr;

use crate::errors::MemError;
use crate::hash::{HASH_HEX_LEN, ObjectHash};
use crate::internal::object::commit::Commit;
use crate::internal::repo::Repository;
use crate::internal::store::ObjectStore;

/// Depth-first, first-parent-preferred commit iterator.
pub struct CommitWalker<'a> {
    store: &'a ObjectStore,
    stack: Vec<ObjectHash>,
    visited: HashSet<ObjectHash>,
}

impl<'a> CommitWalker<'a> {
    pub fn new(store: &'a ObjectStore, start: ObjectHash) -> CommitWalker<'a> {
        CommitWalker {
            store,
            stack: vec![start],
            visited: HashSet::new(),
        }
    }
}

impl Iterator for CommitWalker<'_> {
    type Item = Result<Commit, MemError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let hash = self.stack.pop()?;
            if !self.visited.insert(hash) {
                continue;
            }
            match self.store.get_commit(&hash) {
                Ok(commit) => {
                    // Push in reverse so the first parent pops first.
                    for parent in commit.parent_commit_ids.iter().rev() {
                        if !self.visited.contains(parent) {
                            self.stack.push(*parent);
                        }
                    }
                    return Some(Ok(commit));
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

/// Walk `n` first parents from `start`.
pub fn nth_first_parent(
    store: &ObjectStore,
    start: ObjectHash,
    n: usize,
) -> Result<ObjectHash, MemError> {
    let mut cursor = start;
    for _ in 0..n {
        let commit = store.get_commit(&cursor)?;
        cursor = *commit
            .parent_commit_ids
            .first()
            .ok_or_else(|| MemError::NotFound(format!("{cursor} has no parent")))?;
    }
    Ok(cursor)
}

impl Repository {
    /// Resolve a revision expression to a commit hash.
    pub fn resolve_revision(&self, rev: &str) -> Result<ObjectHash, MemError> {
        if rev.is_empty() {
            return Err(MemError::InvalidArgument("empty revision".to_string()));
        }

        // rev~n: resolve the base, then walk first parents.
        if let Some((base, count)) = rev.rsplit_once('~') {
            let n: usize = count
                .parse()
                .map_err(|_| MemError::InvalidArgument(format!("bad ancestry suffix `{rev}`")))?;
            let start = self.resolve_revision(base)?;
            return nth_first_parent(&self.store, start, n);
        }

        if rev == "HEAD" {
            return self
                .refs
                .head_commit()?
                .ok_or_else(|| MemError::NotFound("HEAD has no commit".to_string()));
        }
        if let Some(hash) = self.refs.read_branch(rev)? {
            return Ok(hash);
        }
        if let Some(hash) = self.refs.read_tag(rev)? {
            return Ok(hash);
        }
        if let Some((remote, branch)) = rev.split_once('/')
            && let Some(hash) = self.refs.read_remote_ref(remote, branch)?
        {
            return Ok(hash);
        }

        if rev.len() == HASH_HEX_LEN
            && let Ok(hash) = ObjectHash::from_str(rev)
        {
            if self.store.exists(&hash) {
                return Ok(hash);
            }
            return Err(MemError::NotFound(rev.to_string()));
        }

        // Unique hash prefix, at least 4 hex chars.
        if rev.len() >= 4
            && rev.len() < HASH_HEX_LEN
            && rev.chars().all(|c| c.is_ascii_hexdigit())
        {
            let lower = rev.to_ascii_lowercase();
            let matches = self.store.find_prefix(&lower)?;
            return match matches.len() {
                0 => Err(MemError::NotFound(rev.to_string())),
                1 => Ok(matches[0]),
                _ => Err(MemError::AmbiguousRef(rev.to_string())),
            };
        }

        Err(MemError::NotFound(rev.to_string()))
    }

    /// History listing from `rev`, up to `limit` commits.
    pub fn log(&self, rev: &str, limit: usize) -> Result<Vec<Commit>, MemError> {
        let start = self.resolve_revision(rev)?;
        CommitWalker::new(&self.store, start)
            .take(limit)
            .collect()
    }

    /// Shortest unique prefix (at least 4 chars) for display.
    pub fn abbreviate(&self, hash: ObjectHash) -> Result<String, MemError> {
        let full = hash.to_string();
        for len in 4..HASH_HEX_LEN {
            let prefix = &full[..len];
            if self.store.find_prefix(prefix)?.len() <= 1 {
                return Ok(prefix.to_string());
            }
        }
        Ok(full)
    }
}
