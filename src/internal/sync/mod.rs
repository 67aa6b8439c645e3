//! Remote synchronization: fetch into quarantine, trust-gated promotion,
//! pull (fetch + merge), fast-forward-only push, and clone with key
//! propagation.
//!
//! Fetch streams every object the local store lacks into a quarantine
//! directory; only after the full closure arrives (and the tip passes the
//! trust gate) are objects promoted into the store and the remote-tracking
//! ref advanced. Cancellation or failure discards the quarantine. Push is
//! strictly fast-forward: the remote tip must be an ancestor of the local
//! tip, and the final compare-and-set rejects concurrent movers.

pub mod transport;

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fs;
use std::path::PathBuf;

use tracing::{debug, info};
use uuid::Uuid;

use crate::config::RepoConfig;
use crate::errors::MemError;
use crate::hash::ObjectHash;
use crate::internal::audit::{AuditOp, fields};
use crate::internal::merge::MergeResult;
use crate::internal::object::ObjectTrait;
use crate::internal::object::commit::Commit;
use crate::internal::object::tree::{Tree, TreeItemMode};
use crate::internal::object::types::ObjectType;
use crate::internal::refs::Head;
use crate::internal::repo::gc::reachable_objects;
use crate::internal::repo::{RepoOpenOptions, Repository};
use crate::internal::store::decode_framed;
use crate::internal::sync::transport::Transport;
use crate::internal::trust::TrustLevel;
use crate::utils::CancelToken;

/// Per-branch fetch result.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub branch: String,
    pub tip: ObjectHash,
    /// Objects fetched for this branch (0 when already up to date).
    pub fetched: usize,
    /// False when the tip's signing key is untrusted: objects stay in
    /// quarantine and no ref moves.
    pub promoted: bool,
    pub signing_key: Option<String>,
}

/// Scratch space for objects that have not passed promotion yet; removed
/// on every exit path except the untrusted hold.
struct Quarantine {
    dir: PathBuf,
    objects: HashMap<ObjectHash, Vec<u8>>,
    keep: bool,
}

impl Quarantine {
    fn create(objects_root: PathBuf) -> Result<Quarantine, MemError> {
        let dir = objects_root.join(format!("quarantine-{}", Uuid::new_v4()));
        fs::create_dir_all(&dir)?;
        Ok(Quarantine {
            dir,
            objects: HashMap::new(),
            keep: false,
        })
    }

    fn admit(&mut self, hash: ObjectHash, framed: Vec<u8>) -> Result<(), MemError> {
        fs::write(self.dir.join(hash.to_string()), &framed)?;
        self.objects.insert(hash, framed);
        Ok(())
    }
}

impl Drop for Quarantine {
    fn drop(&mut self) {
        if !self.keep {
            let _ = fs::remove_dir_all(&self.dir);
        }
    }
}

impl Repository {
    /// Download the closure of `tip` that the local store lacks.
    fn fetch_closure(
        &self,
        transport: &dyn Transport,
        tip: ObjectHash,
        quarantine: &mut Quarantine,
        cancel: &CancelToken,
    ) -> Result<usize, MemError> {
        let mut fetched = 0usize;
        let mut queue: VecDeque<ObjectHash> = VecDeque::from([tip]);
        let mut seen: HashSet<ObjectHash> = HashSet::new();

        while let Some(hash) = queue.pop_front() {
            cancel.check()?;
            if !seen.insert(hash) || self.store.exists(&hash) {
                // A locally known commit's closure is already complete.
                continue;
            }
            let framed = match quarantine.objects.get(&hash) {
                Some(bytes) => bytes.clone(),
                None => {
                    let bytes = transport.read_object(&hash)?;
                    if ObjectHash::new(&bytes) != hash {
                        return Err(MemError::HashMismatch(hash.to_string()));
                    }
                    quarantine.admit(hash, bytes.clone())?;
                    fetched += 1;
                    bytes
                }
            };

            let (kind, payload) = decode_framed(&framed)?;
            match kind {
                ObjectType::Commit => {
                    let commit = Commit::from_bytes(&payload, hash)?;
                    queue.push_back(commit.tree_id);
                    queue.extend(commit.parent_commit_ids);
                }
                ObjectType::Tree => {
                    let tree = Tree::from_bytes(&payload, hash)?;
                    for item in tree.tree_items {
                        if matches!(item.mode, TreeItemMode::Blob | TreeItemMode::Tree) {
                            queue.push_back(item.id);
                        }
                    }
                }
                ObjectType::Blob => {}
            }
        }
        Ok(fetched)
    }

    /// The tip commit's signing key and its effective trust level; unsigned
    /// commits pass the gate.
    fn trust_gate(
        &self,
        quarantine: &Quarantine,
        tip: ObjectHash,
    ) -> Result<(Option<String>, bool), MemError> {
        let commit = match quarantine.objects.get(&tip) {
            Some(framed) => {
                let (_, payload) = decode_framed(framed)?;
                Commit::from_bytes(&payload, tip)?
            }
            None => self.store.get_commit(&tip)?,
        };
        match commit.signing_key_id() {
            Some(key_id) => {
                let level = self.trust_store()?.effective(key_id);
                Ok((
                    Some(key_id.to_string()),
                    level != TrustLevel::Untrusted,
                ))
            }
            None => Ok((None, true)),
        }
    }

    /// Fetch `branches` (all remote branches when empty) from a remote.
    /// On success each trusted branch's objects are promoted and
    /// `refs/remotes/<remote>/<branch>` advances.
    pub fn fetch(
        &self,
        remote: &str,
        transport: &dyn Transport,
        branches: &[&str],
        cancel: &CancelToken,
    ) -> Result<Vec<FetchOutcome>, MemError> {
        let _lock = self.lock()?;
        let remote_refs = transport.list_refs()?;
        let wanted: Vec<(String, ObjectHash)> = if branches.is_empty() {
            remote_refs
        } else {
            remote_refs
                .into_iter()
                .filter(|(name, _)| branches.contains(&name.as_str()))
                .collect()
        };

        let mut outcomes = Vec::new();
        for (branch, tip) in wanted {
            let mut quarantine = Quarantine::create(self.store().root().to_path_buf())?;
            let fetched = self.fetch_closure(transport, tip, &mut quarantine, cancel)?;
            let (signing_key, trusted) = self.trust_gate(&quarantine, tip)?;

            if trusted {
                for framed in quarantine.objects.values() {
                    let (kind, payload) = decode_framed(framed)?;
                    self.store.put(kind, &payload)?;
                }
                self.refs.write_remote_ref(remote, &branch, tip)?;
                debug!(remote, branch = %branch, tip = %tip, fetched, "fetched");
            } else {
                // Hold the quarantine for inspection; no ref moves.
                quarantine.keep = true;
                debug!(remote, branch = %branch, key = ?signing_key, "fetch held: untrusted key");
            }
            outcomes.push(FetchOutcome {
                branch,
                tip,
                fetched,
                promoted: trusted,
                signing_key,
            });
        }
        Ok(outcomes)
    }

    /// Fetch, then merge `refs/remotes/<remote>/<branch>` into the current
    /// branch.
    pub fn pull(
        &self,
        remote: &str,
        transport: &dyn Transport,
        branch: &str,
        cancel: &CancelToken,
    ) -> Result<MergeResult, MemError> {
        let outcomes = self.fetch(remote, transport, &[branch], cancel)?;
        let outcome = outcomes
            .iter()
            .find(|o| o.branch == branch)
            .ok_or_else(|| MemError::NotFound(format!("remote branch `{branch}`")))?;
        if !outcome.promoted {
            return Err(MemError::UntrustedKey(
                outcome.signing_key.clone().unwrap_or_default(),
            ));
        }

        let result = self.merge(&format!("{remote}/{branch}"))?;
        self.audit.append(
            AuditOp::Pull,
            fields([
                ("remote", remote.to_string()),
                ("branch", branch.to_string()),
                ("tip", outcome.tip.to_string()),
            ]),
        )?;
        Ok(result)
    }

    /// Push one branch. Strictly fast-forward: fails with `NonFastForward`
    /// (leaving the remote untouched) unless the remote tip is an ancestor
    /// of the local tip. No force variant exists.
    pub fn push(
        &self,
        remote: &str,
        transport: &dyn Transport,
        branch: &str,
        cancel: &CancelToken,
    ) -> Result<ObjectHash, MemError> {
        let local_tip = self
            .refs
            .read_branch(branch)?
            .ok_or_else(|| MemError::NotFound(format!("branch `{branch}`")))?;
        let remote_tip = transport
            .list_refs()?
            .into_iter()
            .find(|(name, _)| name == branch)
            .map(|(_, hash)| hash);

        // Fast-forward check before any byte moves.
        if let Some(remote_tip) = remote_tip {
            if remote_tip != local_tip
                && (!self.store.exists(&remote_tip)
                    || !crate::internal::merge::is_ancestor(&self.store, remote_tip, local_tip)?)
            {
                return Err(MemError::NonFastForward(branch.to_string()));
            }
            if remote_tip == local_tip {
                return Ok(local_tip);
            }
        }

        // Ship the closure the remote lacks: everything reachable from the
        // local tip minus everything reachable from the remote tip.
        let local_closure = reachable_objects(&self.store, &[local_tip], true, cancel)?;
        let already = match remote_tip {
            Some(tip) => reachable_objects(&self.store, &[tip], true, cancel)?,
            None => HashSet::new(),
        };
        let mut missing: Vec<ObjectHash> =
            local_closure.difference(&already).copied().collect();
        missing.sort();
        for hash in &missing {
            cancel.check()?;
            transport.write_object(hash, &self.store.get_framed(hash)?)?;
        }

        transport.cas_update_ref(branch, remote_tip, local_tip)?;
        self.refs.write_remote_ref(remote, branch, local_tip)?;
        self.audit.append(
            AuditOp::Push,
            fields([
                ("remote", remote.to_string()),
                ("branch", branch.to_string()),
                ("tip", local_tip.to_string()),
                ("objects", missing.len().to_string()),
            ]),
        )?;
        info!(remote, branch, tip = %local_tip, objects = missing.len(), "pushed");
        Ok(local_tip)
    }

    /// Clone a remote into `dest`: fetch every branch, materialize the
    /// default branch, and import the remote's published keys as untrusted
    /// pending explicit promotion.
    pub fn clone_from(
        transport: &dyn Transport,
        dest: &std::path::Path,
        remote: &str,
        options: RepoOpenOptions,
        cancel: &CancelToken,
    ) -> Result<Repository, MemError> {
        let repo = Repository::init_with(dest, RepoConfig::default(), options)?;

        let remote_refs = transport.list_refs()?;
        for (branch, tip) in &remote_refs {
            let mut quarantine = Quarantine::create(repo.store().root().to_path_buf())?;
            repo.fetch_closure(transport, *tip, &mut quarantine, cancel)?;
            // The initial clone materializes the remote state as-is; the
            // trust gate applies from the first pull onward.
            for framed in quarantine.objects.values() {
                let (kind, payload) = decode_framed(framed)?;
                repo.store.put(kind, &payload)?;
            }
            repo.refs.write_branch(branch, *tip)?;
            repo.refs.write_remote_ref(remote, branch, *tip)?;
        }

        // Key propagation: published keys arrive untrusted.
        let default_level = repo.config.trust.default_level;
        let mut trust = repo.trust_store()?;
        for (fingerprint, raw) in transport.published_keys()? {
            let bytes: [u8; 32] = raw.as_slice().try_into().map_err(|_| {
                MemError::TransportError(format!("published key `{fingerprint}` is not 32 bytes"))
            })?;
            let key = ed25519_dalek::VerifyingKey::from_bytes(&bytes)
                .map_err(|e| MemError::TransportError(format!("bad published key: {e}")))?;
            let id = repo.keyring.import_public(&key)?;
            trust.register(&id, default_level)?;
        }

        // Check out the default branch when the remote has it.
        let default = repo.config.core.default_branch.clone();
        let start = remote_refs
            .iter()
            .find(|(name, _)| *name == default)
            .or_else(|| remote_refs.first());
        if let Some((branch, tip)) = start {
            repo.refs.write_head(&Head::Branch(branch.clone()))?;
            let commit = repo.store.get_commit(tip)?;
            repo.worktree.checkout(&repo.store, commit.tree_id)?;
        }

        repo.audit.append(
            AuditOp::Pull,
            fields([
                ("remote", remote.to_string()),
                ("cloned", remote_refs.len().to_string()),
            ]),
        )?;
        info!(dest = %dest.display(), branches = remote_refs.len(), "cloned");
        Ok(repo)
    }

    /// Files changed between HEAD and a remote-tracking ref, convenience
    /// for collaborators that surface divergence.
    pub fn divergence(
        &self,
        remote: &str,
        branch: &str,
    ) -> Result<Option<Vec<(String, Option<ObjectHash>, Option<ObjectHash>)>>, MemError> {
        match self.refs.read_remote_ref(remote, branch)? {
            Some(_) => Ok(Some(self.diff("HEAD", &format!("{remote}/{branch}"))?)),
            None => Ok(None),
        }
    }

    /// Expose merged file maps for callers that need the working set of a
    /// revision (collaborator surface).
    pub fn files_at(&self, rev: &str) -> Result<BTreeMap<String, ObjectHash>, MemError> {
        let commit = self.store.get_commit(&self.resolve_revision(rev)?)?;
        crate::internal::worktree::flatten_tree(&self.store, commit.tree_id)
    }
}
