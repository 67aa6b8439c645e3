//! The repository handle: the only mutable state container in the engine.
//!
//! All public operations go through a `Repository` opened on a directory
//! containing the `current/` working tree and the `.mem/` metadata root.
//! Operations that mutate refs, the audit log, the staging index, merge
//! state, or run GC serialize on an advisory write lock; readers rely on
//! atomic ref renames and loose-object immutability instead.
//!
//! Within one commit: blobs → trees → commit → ref update → reflog append →
//! audit append, the last three under the lock. A crash between the ref
//! update and the appends is healed at open by rebuilding the missing tail
//! entries from the current tip.

pub mod fsck;
pub mod gc;
pub mod walker;

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fs2::FileExt;
use tracing::{debug, info};

use crate::config::RepoConfig;
use crate::errors::MemError;
use crate::hash::ObjectHash;
use crate::internal::audit::{AuditLog, AuditOp, fields};
use crate::internal::crypto::encrypt::{BlobCipher, generate_salt};
use crate::internal::crypto::merkle::MerkleTree;
use crate::internal::crypto::sign::Keyring;
use crate::internal::merge::{
    self, MergeOutcome, MergeResult, MergeSide, MergeState, Resolution, StrategyKind,
    lowest_common_ancestor, strip_markers_keep_both,
};
use crate::internal::object::blob::Blob;
use crate::internal::object::commit::{
    Commit, META_CONDITIONAL_TRUST, META_MERKLE_ROOT, META_NEEDS_REVIEW, META_SIGNATURE,
    META_SIGNING_KEY_ID,
};
use crate::internal::object::signature::Signature;
use crate::internal::object::tree::{Tree, TreeItem, TreeItemMode};
use crate::internal::reflog::{RefLog, RefLogOp};
use crate::internal::refs::{Head, RefStore};
use crate::internal::staging::{MODE_FILE, StageEntry, StagingIndex};
use crate::internal::store::ObjectStore;
use crate::internal::trust::TrustStore;
use crate::internal::worktree::{WorkTree, flatten_tree};

const MEM_DIR: &str = ".mem";
const WORK_DIR: &str = "current";

/// Options for opening a repository.
#[derive(Debug, Clone)]
pub struct RepoOpenOptions {
    pub passphrase: Option<String>,
    pub lock_timeout: Duration,
}

impl Default for RepoOpenOptions {
    fn default() -> Self {
        Self {
            passphrase: None,
            lock_timeout: Duration::from_secs(5),
        }
    }
}

/// Working-tree status snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Status {
    pub staged: Vec<String>,
    pub modified: Vec<String>,
    pub untracked: Vec<String>,
    pub deleted: Vec<String>,
    pub merging: bool,
}

/// Exclusive advisory lock over all mutating operations; released on drop.
pub struct RepoLock {
    file: fs::File,
}

impl Drop for RepoLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}

/// A repository handle. See the module docs for the locking discipline.
pub struct Repository {
    pub(crate) root: PathBuf,
    pub(crate) config: RepoConfig,
    pub(crate) store: ObjectStore,
    pub(crate) refs: RefStore,
    pub(crate) reflog: RefLog,
    pub(crate) audit: AuditLog,
    pub(crate) worktree: WorkTree,
    pub(crate) keyring: Keyring,
    pub(crate) lock_timeout: Duration,
}

impl Repository {
    pub fn mem_dir(&self) -> PathBuf {
        self.root.join(MEM_DIR)
    }

    pub fn work_dir(&self) -> PathBuf {
        self.root.join(WORK_DIR)
    }

    pub fn config(&self) -> &RepoConfig {
        &self.config
    }

    pub fn store(&self) -> &ObjectStore {
        &self.store
    }

    pub fn keyring(&self) -> &Keyring {
        &self.keyring
    }

    pub fn audit_log(&self) -> &AuditLog {
        &self.audit
    }

    pub fn reflog(&self) -> &RefLog {
        &self.reflog
    }

    pub(crate) fn merge_state_path(&self) -> PathBuf {
        self.mem_dir().join("merge").join("state")
    }

    pub(crate) fn trust_path(&self) -> PathBuf {
        self.mem_dir().join("trust").join("store")
    }

    pub fn trust_store(&self) -> Result<TrustStore, MemError> {
        TrustStore::load(&self.trust_path())
    }

    /// Initialize a new repository at `root` with the given configuration.
    pub fn init(root: &Path, config: RepoConfig) -> Result<Repository, MemError> {
        Self::init_with(root, config, RepoOpenOptions::default())
    }

    pub fn init_with(
        root: &Path,
        mut config: RepoConfig,
        options: RepoOpenOptions,
    ) -> Result<Repository, MemError> {
        config.validate()?;
        let mem = root.join(MEM_DIR);
        if mem.exists() {
            return Err(MemError::InvalidArgument(format!(
                "repository already exists at {}",
                root.display()
            )));
        }
        for dir in [
            root.join(WORK_DIR),
            mem.join("objects"),
            mem.join("objects").join("pack"),
            mem.join("refs").join("heads"),
            mem.join("refs").join("tags"),
            mem.join("refs").join("remotes"),
            mem.join("keys"),
            mem.join("trust"),
            mem.join("audit"),
            mem.join("merge"),
        ] {
            fs::create_dir_all(dir)?;
        }

        if config.encryption.enabled && config.encryption.salt.is_none() {
            config.encryption.salt = Some(hex::encode(generate_salt()));
        }
        config.save(&mem.join("config"))?;

        let refs = RefStore::new(&mem);
        refs.write_head(&Head::Branch(config.core.default_branch.clone()))?;

        let repo = Self::open_with(root, options)?;
        if repo.config.signing.enabled && repo.keyring.signing_key()?.is_none() {
            repo.keyring.generate()?;
        }
        repo.audit.append(
            AuditOp::Init,
            fields([("branch", repo.config.core.default_branch.clone())]),
        )?;
        info!(root = %root.display(), "repository initialized");
        Ok(repo)
    }

    /// Open an existing repository.
    pub fn open(root: &Path) -> Result<Repository, MemError> {
        Self::open_with(root, RepoOpenOptions::default())
    }

    pub fn open_with(root: &Path, options: RepoOpenOptions) -> Result<Repository, MemError> {
        let mem = root.join(MEM_DIR);
        if !mem.exists() {
            return Err(MemError::NotFound(format!(
                "no repository at {}",
                root.display()
            )));
        }
        let config = RepoConfig::load(&mem.join("config"))?;

        let mut store = ObjectStore::open(&mem.join("objects"), config.core.compression)?;
        if config.encryption.enabled
            && let Some(passphrase) = &options.passphrase
        {
            let salt_hex = config.encryption.salt.as_ref().ok_or_else(|| {
                MemError::InvalidConfig("encryption enabled but no salt recorded".to_string())
            })?;
            let salt = hex::decode(salt_hex)
                .map_err(|_| MemError::InvalidConfig("bad encryption salt".to_string()))?;
            store.set_cipher(Some(BlobCipher::from_passphrase(
                passphrase,
                &salt,
                &config.encryption.kdf,
            )?));
        }

        let repo = Repository {
            root: root.to_path_buf(),
            config,
            store,
            refs: RefStore::new(&mem),
            reflog: RefLog::new(&mem.join("reflog")),
            audit: AuditLog::new(&mem.join("audit").join("log")),
            worktree: WorkTree::new(&root.join(WORK_DIR)),
            keyring: Keyring::new(&mem.join("keys")),
            lock_timeout: options.lock_timeout,
        };
        repo.recover_tail()?;
        Ok(repo)
    }

    /// Crash recovery: when the branch tip moved but the reflog/audit tail
    /// never landed, rebuild the missing entries from the current tip.
    fn recover_tail(&self) -> Result<(), MemError> {
        let Some(tip) = self.refs.head_commit()? else {
            return Ok(());
        };
        let last_logged = self.reflog.last()?.map(|entry| entry.new);
        if last_logged != Some(tip) {
            let prev = last_logged.unwrap_or_else(ObjectHash::zero);
            self.reflog
                .append(prev, tip, RefLogOp::Commit, "recovered at open")?;
            self.audit.append(
                AuditOp::Commit,
                fields([
                    ("commit", tip.to_string()),
                    ("recovered", "true".to_string()),
                ]),
            )?;
            debug!(tip = %tip, "reflog tail recovered");
        }
        Ok(())
    }

    /// Take the repository write lock, waiting up to the configured timeout.
    pub(crate) fn lock(&self) -> Result<RepoLock, MemError> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(self.mem_dir().join("lock"))?;
        let deadline = Instant::now() + self.lock_timeout;
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => return Ok(RepoLock { file }),
                Err(_) if Instant::now() < deadline => {
                    std::thread::sleep(Duration::from_millis(10));
                }
                Err(_) => return Err(MemError::LockBusy),
            }
        }
    }

    pub fn merge_in_progress(&self) -> Result<Option<MergeState>, MemError> {
        MergeState::load(&self.merge_state_path())
    }

    fn ensure_not_merging(&self) -> Result<(), MemError> {
        if let Some(state) = self.merge_in_progress()? {
            return Err(MemError::MergingState(format!(
                "merging `{}`, {} conflict(s) outstanding",
                state.theirs_label,
                state.conflicts.len()
            )));
        }
        Ok(())
    }

    // ---- staging ----

    fn staging(&self) -> Result<StagingIndex, MemError> {
        StagingIndex::load(&self.mem_dir().join("index"))
    }

    /// Stage one working-tree file: write its blob and record the entry.
    pub fn stage(&self, path: &Path) -> Result<ObjectHash, MemError> {
        let _lock = self.lock()?;
        self.stage_inner(path)
    }

    fn stage_inner(&self, path: &Path) -> Result<ObjectHash, MemError> {
        let data = self.worktree.read_file(path)?;
        let (size, mtime_secs, mtime_nanos) = self.worktree.metadata(path)?;
        let (_, key) = self.worktree.normalize(path)?;

        let hash = self.store.put_object(&Blob::new(&data))?;
        let mut staging = self.staging()?;
        staging.insert(
            key.clone(),
            StageEntry::File {
                hash,
                size,
                mtime_secs,
                mtime_nanos,
                mode: MODE_FILE,
            },
        );
        staging.save()?;
        self.audit
            .append(AuditOp::Stage, fields([("path", key.clone())]))?;
        debug!(path = %key, blob = %hash, "staged");
        Ok(hash)
    }

    /// Stage the removal of a tracked path: drop the working-tree file if
    /// it is still present and record a tombstone consumed by the next
    /// commit.
    pub fn rm(&self, path: &Path) -> Result<(), MemError> {
        let _lock = self.lock()?;
        let (_, key) = self.worktree.normalize(path)?;

        let tracked = self.head_files()?.contains_key(&key);
        let mut staging = self.staging()?;
        if !tracked && !staging.contains(&key) {
            return Err(MemError::NotFound(format!("`{key}` is not tracked")));
        }
        self.worktree.remove_file(Path::new(&key))?;
        if tracked {
            staging.insert(key.clone(), StageEntry::Deleted);
        } else {
            // Never committed: dropping the staged snapshot is enough.
            staging.remove(&key);
        }
        staging.save()?;
        self.audit.append(
            AuditOp::Stage,
            fields([("path", key.clone()), ("deleted", "true".to_string())]),
        )?;
        debug!(path = %key, "staged deletion");
        Ok(())
    }

    /// Stage every change in the working tree: snapshots for the files on
    /// disk, tombstones for tracked paths that are gone.
    pub fn stage_all(&self) -> Result<Vec<String>, MemError> {
        let _lock = self.lock()?;
        let work_files = self.worktree.walk()?;
        let mut staged = Vec::new();
        for path in &work_files {
            self.stage_inner(Path::new(path))?;
            staged.push(path.clone());
        }

        let mut staging = self.staging()?;
        let mut removed = Vec::new();
        for path in self.head_files()?.keys() {
            if !work_files.contains(path) {
                staging.insert(path.clone(), StageEntry::Deleted);
                removed.push(path.clone());
            }
        }
        if !removed.is_empty() {
            staging.save()?;
            for path in &removed {
                self.audit.append(
                    AuditOp::Stage,
                    fields([("path", path.clone()), ("deleted", "true".to_string())]),
                )?;
            }
            staged.extend(removed);
        }
        Ok(staged)
    }

    /// Flattened `path → blob` map of the HEAD commit, empty on an unborn
    /// branch.
    fn head_files(&self) -> Result<BTreeMap<String, ObjectHash>, MemError> {
        match self.refs.head_commit()? {
            Some(tip) => {
                let commit = self.store.get_commit(&tip)?;
                flatten_tree(&self.store, commit.tree_id)
            }
            None => Ok(BTreeMap::new()),
        }
    }

    /// Remove a path from the staging index.
    pub fn unstage(&self, path: &Path) -> Result<(), MemError> {
        let _lock = self.lock()?;
        let (_, key) = self.worktree.normalize(path)?;
        let mut staging = self.staging()?;
        if staging.remove(&key).is_none() {
            return Err(MemError::NotFound(format!("`{key}` is not staged")));
        }
        staging.save()?;
        Ok(())
    }

    // ---- commit ----

    /// Files of the commit being built: the parent tree overlaid with the
    /// staging index — snapshots replace, tombstones remove.
    fn commit_files(
        &self,
        parent: Option<ObjectHash>,
        staging: &StagingIndex,
    ) -> Result<BTreeMap<String, ObjectHash>, MemError> {
        let mut files = match parent {
            Some(hash) => {
                let commit = self.store.get_commit(&hash)?;
                flatten_tree(&self.store, commit.tree_id)?
            }
            None => BTreeMap::new(),
        };
        for (path, entry) in staging.iter() {
            match entry.blob_hash() {
                Some(hash) => {
                    files.insert(path.clone(), hash);
                }
                None => {
                    files.remove(path);
                }
            }
        }
        Ok(files)
    }

    /// Write trees bottom-up from a flat `path → blob` map; every tree is
    /// stored exactly once (content addressing dedups repeats).
    pub(crate) fn build_tree(
        &self,
        files: &BTreeMap<String, ObjectHash>,
    ) -> Result<ObjectHash, MemError> {
        enum Node {
            File(ObjectHash),
            Dir(BTreeMap<String, Node>),
        }
        let mut root = BTreeMap::new();
        for (path, hash) in files {
            let mut cursor = &mut root;
            let mut parts = path.split('/').peekable();
            while let Some(part) = parts.next() {
                if parts.peek().is_none() {
                    cursor.insert(part.to_string(), Node::File(*hash));
                } else {
                    let entry = cursor
                        .entry(part.to_string())
                        .or_insert_with(|| Node::Dir(BTreeMap::new()));
                    cursor = match entry {
                        Node::Dir(map) => map,
                        Node::File(_) => {
                            return Err(MemError::InvalidArgument(format!(
                                "`{path}` nests under a file"
                            )));
                        }
                    };
                }
            }
        }

        fn write_tree(
            store: &ObjectStore,
            nodes: &BTreeMap<String, Node>,
        ) -> Result<ObjectHash, MemError> {
            let mut items = Vec::with_capacity(nodes.len());
            for (name, node) in nodes {
                let item = match node {
                    Node::File(hash) => TreeItem::new(TreeItemMode::Blob, *hash, name.clone()),
                    Node::Dir(children) => {
                        let sub = write_tree(store, children)?;
                        TreeItem::new(TreeItemMode::Tree, sub, name.clone())
                    }
                };
                items.push(item);
            }
            let tree = Tree::from_tree_items(items)?;
            store.put_object(&tree)
        }
        write_tree(&self.store, &root)
    }

    /// Monotonic commit signature pair (I4): the committer timestamp never
    /// precedes any parent's.
    fn signatures(&self, parents: &[ObjectHash]) -> Result<(Signature, Signature), MemError> {
        let mut author = Signature::author_now(&self.config.author.name, &self.config.author.email);
        let mut committer =
            Signature::committer_now(&self.config.author.name, &self.config.author.email);
        for parent in parents {
            let stamp = self.store.get_commit(parent)?.committer.timestamp;
            if committer.timestamp < stamp {
                committer.timestamp = stamp;
                author.timestamp = stamp;
            }
        }
        Ok((author, committer))
    }

    /// Build, store, and publish a commit from a file map.
    pub(crate) fn write_commit(
        &self,
        files: &BTreeMap<String, ObjectHash>,
        parents: Vec<ObjectHash>,
        message: &str,
        reflog_op: RefLogOp,
        mut metadata: BTreeMap<String, String>,
    ) -> Result<ObjectHash, MemError> {
        let tree_id = self.build_tree(files)?;
        let (author, committer) = self.signatures(&parents)?;

        if self.config.signing.enabled {
            let pairs: Vec<(String, ObjectHash)> =
                files.iter().map(|(path, hash)| (path.clone(), *hash)).collect();
            let root = MerkleTree::build(&pairs).root();
            metadata.insert(META_MERKLE_ROOT.to_string(), root.to_string());
            if let Some((key_id, signature)) = self.keyring.sign_root(root)? {
                metadata.insert(META_SIGNATURE.to_string(), hex::encode(signature));
                metadata.insert(META_SIGNING_KEY_ID.to_string(), key_id);
            }
        }

        let commit = Commit::new(author, committer, tree_id, parents, message, metadata)?;
        self.store.put_object(&commit)?;

        // Ref update last, then the journals: readers that observe the new
        // tip always find a fully written commit.
        let prev = self.refs.head_commit()?.unwrap_or_else(ObjectHash::zero);
        match self.refs.read_head()? {
            Head::Branch(name) => self.refs.write_branch(&name, commit.id)?,
            Head::Detached(_) => self.refs.write_head(&Head::Detached(commit.id))?,
        }
        self.reflog
            .append(prev, commit.id, reflog_op, commit.format_message().as_str())?;
        self.audit.append(
            AuditOp::Commit,
            fields([
                ("commit", commit.id.to_string()),
                ("tree", tree_id.to_string()),
            ]),
        )?;
        Ok(commit.id)
    }

    /// Commit the staging index on top of HEAD.
    pub fn commit(&self, message: &str) -> Result<ObjectHash, MemError> {
        let _lock = self.lock()?;
        self.ensure_not_merging()?;

        let mut staging = self.staging()?;
        if staging.is_empty() {
            return Err(MemError::InvalidArgument("nothing staged".to_string()));
        }
        let parent = self.refs.head_commit()?;
        let files = self.commit_files(parent, &staging)?;
        let parents: Vec<ObjectHash> = parent.into_iter().collect();
        let id = self.write_commit(&files, parents, message, RefLogOp::Commit, BTreeMap::new())?;

        staging.clear();
        staging.save()?;
        info!(commit = %id, "committed");
        Ok(id)
    }

    // ---- refs ----

    /// Create a branch at HEAD (or at `at` when given).
    pub fn create_branch(&self, name: &str, at: Option<&str>) -> Result<ObjectHash, MemError> {
        let _lock = self.lock()?;
        let target = match at {
            Some(rev) => self.resolve_revision(rev)?,
            None => self
                .refs
                .head_commit()?
                .ok_or_else(|| MemError::NotFound("HEAD has no commit".to_string()))?,
        };
        if self.refs.read_branch(name)?.is_some() {
            return Err(MemError::InvalidArgument(format!(
                "branch `{name}` already exists"
            )));
        }
        self.refs.write_branch(name, target)?;
        self.reflog
            .append(target, target, RefLogOp::Branch, &format!("branch {name}"))?;
        self.audit.append(
            AuditOp::Branch,
            fields([("name", name.to_string()), ("target", target.to_string())]),
        )?;
        Ok(target)
    }

    /// Delete a branch; the checked-out branch is refused.
    pub fn delete_branch(&self, name: &str) -> Result<(), MemError> {
        let _lock = self.lock()?;
        if self.refs.read_head()? == Head::Branch(name.to_string()) {
            return Err(MemError::InvalidArgument(format!(
                "`{name}` is checked out"
            )));
        }
        if !self.refs.delete_branch(name)? {
            return Err(MemError::NotFound(format!("branch `{name}`")));
        }
        self.audit
            .append(AuditOp::Branch, fields([("deleted", name.to_string())]))?;
        Ok(())
    }

    /// Create a lightweight tag.
    pub fn create_tag(&self, name: &str, at: Option<&str>) -> Result<ObjectHash, MemError> {
        let _lock = self.lock()?;
        let target = match at {
            Some(rev) => self.resolve_revision(rev)?,
            None => self
                .refs
                .head_commit()?
                .ok_or_else(|| MemError::NotFound("HEAD has no commit".to_string()))?,
        };
        if self.refs.read_tag(name)?.is_some() {
            return Err(MemError::InvalidArgument(format!(
                "tag `{name}` already exists"
            )));
        }
        self.refs.write_tag(name, target)?;
        self.audit.append(
            AuditOp::Tag,
            fields([("name", name.to_string()), ("target", target.to_string())]),
        )?;
        Ok(target)
    }

    pub fn branches(&self) -> Result<Vec<(String, ObjectHash)>, MemError> {
        self.refs.list_branches()
    }

    pub fn tags(&self) -> Result<Vec<(String, ObjectHash)>, MemError> {
        self.refs.list_tags()
    }

    pub fn head(&self) -> Result<Head, MemError> {
        self.refs.read_head()
    }

    pub fn head_commit(&self) -> Result<Option<ObjectHash>, MemError> {
        self.refs.head_commit()
    }

    // ---- checkout / reset ----

    /// Switch HEAD to a branch or commit and materialize its tree.
    pub fn checkout(&self, rev: &str) -> Result<ObjectHash, MemError> {
        let _lock = self.lock()?;
        self.ensure_not_merging()?;
        if !self.staging()?.is_empty() {
            return Err(MemError::InvalidArgument(
                "staged changes present; commit or unstage first".to_string(),
            ));
        }

        let target = self.resolve_revision(rev)?;
        let commit = self.store.get_commit(&target)?;
        self.worktree.checkout(&self.store, commit.tree_id)?;

        let prev = self.refs.head_commit()?.unwrap_or_else(ObjectHash::zero);
        if self.refs.read_branch(rev)?.is_some() {
            self.refs.write_head(&Head::Branch(rev.to_string()))?;
        } else {
            self.refs.write_head(&Head::Detached(target))?;
        }
        self.reflog
            .append(prev, target, RefLogOp::Checkout, &format!("checkout {rev}"))?;
        self.audit.append(
            AuditOp::Checkout,
            fields([("target", target.to_string()), ("rev", rev.to_string())]),
        )?;
        Ok(target)
    }

    /// Move the current branch to `rev`. `hard` also resets staging and the
    /// working tree.
    pub fn reset(&self, rev: &str, hard: bool) -> Result<ObjectHash, MemError> {
        let _lock = self.lock()?;
        self.ensure_not_merging()?;

        let target = self.resolve_revision(rev)?;
        let prev = self.refs.head_commit()?.unwrap_or_else(ObjectHash::zero);
        match self.refs.read_head()? {
            Head::Branch(name) => self.refs.write_branch(&name, target)?,
            Head::Detached(_) => self.refs.write_head(&Head::Detached(target))?,
        }
        if hard {
            let mut staging = self.staging()?;
            staging.clear();
            staging.save()?;
            let commit = self.store.get_commit(&target)?;
            self.worktree.checkout(&self.store, commit.tree_id)?;
        }
        self.reflog
            .append(prev, target, RefLogOp::Reset, &format!("reset to {rev}"))?;
        self.audit.append(
            AuditOp::Reset,
            fields([
                ("target", target.to_string()),
                ("hard", hard.to_string()),
            ]),
        )?;
        Ok(target)
    }

    // ---- status / diff ----

    /// Per-path working-tree status.
    pub fn status(&self) -> Result<Status, MemError> {
        let staging = self.staging()?;
        let head_files = self.head_files()?;

        let mut status = Status {
            merging: self.merge_in_progress()?.is_some(),
            ..Status::default()
        };
        let work_files = self.worktree.walk()?;
        for path in &work_files {
            let data = self.worktree.read_file(Path::new(path))?;
            let hash = Blob::new(&data).id;
            match (staging.get(path), head_files.get(path)) {
                (Some(StageEntry::File { hash: staged, .. }), _) => {
                    status.staged.push(path.clone());
                    if *staged != hash {
                        status.modified.push(path.clone());
                    }
                }
                // Recreated after its deletion was staged.
                (Some(StageEntry::Deleted), _) => status.untracked.push(path.clone()),
                (None, Some(committed)) => {
                    if *committed != hash {
                        status.modified.push(path.clone());
                    }
                }
                (None, None) => status.untracked.push(path.clone()),
            }
        }
        for path in head_files.keys().chain(staging.paths()) {
            if !work_files.contains(path) && !status.deleted.contains(path) {
                status.deleted.push(path.clone());
            }
        }
        status.deleted.sort();
        status.deleted.dedup();
        Ok(status)
    }

    /// Tree-level change listing between two revisions:
    /// `(path, old_hash, new_hash)` with `None` for absence.
    pub fn diff(
        &self,
        rev_a: &str,
        rev_b: &str,
    ) -> Result<Vec<(String, Option<ObjectHash>, Option<ObjectHash>)>, MemError> {
        let a = self.store.get_commit(&self.resolve_revision(rev_a)?)?;
        let b = self.store.get_commit(&self.resolve_revision(rev_b)?)?;
        let files_a = flatten_tree(&self.store, a.tree_id)?;
        let files_b = flatten_tree(&self.store, b.tree_id)?;

        let mut changes = Vec::new();
        let mut paths: Vec<&String> = files_a.keys().chain(files_b.keys()).collect();
        paths.sort();
        paths.dedup();
        for path in paths {
            let old = files_a.get(path).copied();
            let new = files_b.get(path).copied();
            if old != new {
                changes.push((path.clone(), old, new));
            }
        }
        Ok(changes)
    }

    // ---- merge ----

    /// Merge `rev` into the current branch.
    pub fn merge(&self, rev: &str) -> Result<MergeResult, MemError> {
        let _lock = self.lock()?;
        self.ensure_not_merging()?;

        let theirs_tip = self.resolve_revision(rev)?;
        let ours_tip = self
            .refs
            .head_commit()?
            .ok_or_else(|| MemError::NotFound("HEAD has no commit".to_string()))?;

        if ours_tip == theirs_tip || merge::is_ancestor(&self.store, theirs_tip, ours_tip)? {
            return Ok(MergeResult::AlreadyUpToDate);
        }
        if merge::is_ancestor(&self.store, ours_tip, theirs_tip)? {
            // Fast-forward: pointer update only, no new commit.
            let commit = self.store.get_commit(&theirs_tip)?;
            self.worktree.checkout(&self.store, commit.tree_id)?;
            match self.refs.read_head()? {
                Head::Branch(name) => self.refs.write_branch(&name, theirs_tip)?,
                Head::Detached(_) => self.refs.write_head(&Head::Detached(theirs_tip))?,
            }
            self.reflog.append(
                ours_tip,
                theirs_tip,
                RefLogOp::Merge,
                &format!("fast-forward to {rev}"),
            )?;
            self.audit.append(
                AuditOp::Merge,
                fields([
                    ("theirs", theirs_tip.to_string()),
                    ("fast_forward", "true".to_string()),
                ]),
            )?;
            return Ok(MergeResult::FastForward(theirs_tip));
        }

        // Trust gate: a signed foreign tip needs a non-untrusted key.
        let their_commit = self.store.get_commit(&theirs_tip)?;
        let mut conditional = false;
        if let Some(key_id) = their_commit.signing_key_id() {
            match self.trust_store()?.effective(key_id) {
                crate::internal::trust::TrustLevel::Full => {}
                crate::internal::trust::TrustLevel::Conditional => conditional = true,
                crate::internal::trust::TrustLevel::Untrusted => {
                    return Err(MemError::UntrustedKey(key_id.to_string()));
                }
            }
        }

        let base = lowest_common_ancestor(&self.store, ours_tip, theirs_tip)?;
        let diverged = base.is_none();
        let base_files = match base {
            Some(hash) => {
                let commit = self.store.get_commit(&hash)?;
                flatten_tree(&self.store, commit.tree_id)?
            }
            None => BTreeMap::new(),
        };

        let our_commit = self.store.get_commit(&ours_tip)?;
        let ours = MergeSide {
            tip: ours_tip,
            files: flatten_tree(&self.store, our_commit.tree_id)?,
            commit_time: our_commit.committer.timestamp,
            committer: our_commit.committer.email.clone(),
        };
        let theirs = MergeSide {
            tip: theirs_tip,
            files: flatten_tree(&self.store, their_commit.tree_id)?,
            commit_time: their_commit.committer.timestamp,
            committer: their_commit.committer.email.clone(),
        };

        let mut outcome = merge::merge_file_maps(&self.store, &base_files, &ours, &theirs, |class| {
            self.config.merge_strategy_for(class)
        })?;
        outcome.diverged = diverged;

        // Materialize the merged view in the working tree.
        for (path, data) in &outcome.files {
            self.worktree.write_file(Path::new(path), data)?;
        }
        for path in &outcome.deletions {
            self.worktree.remove_file(Path::new(path))?;
        }

        let message = format!("merge {rev}");
        if outcome.conflicts.is_empty() {
            self.complete_merge(
                &ours,
                &theirs,
                &outcome,
                &message,
                conditional,
            )?;
        } else {
            let state = MergeState {
                ours_tip,
                theirs_tip,
                theirs_label: rev.to_string(),
                base,
                conflicts: outcome.conflicts.clone(),
                notes: outcome.notes.clone(),
                message,
                conditional,
            };
            state.save(&self.merge_state_path())?;
        }
        self.audit.append(
            AuditOp::Merge,
            fields([
                ("theirs", theirs_tip.to_string()),
                ("conflicts", outcome.conflicts.len().to_string()),
                ("diverged", diverged.to_string()),
            ]),
        )?;
        Ok(MergeResult::Merged(outcome))
    }

    /// Write the two-parent merge commit from a conflict-free outcome.
    fn complete_merge(
        &self,
        ours: &MergeSide,
        theirs: &MergeSide,
        outcome: &MergeOutcome,
        message: &str,
        conditional: bool,
    ) -> Result<ObjectHash, MemError> {
        let mut files = ours.files.clone();
        for path in &outcome.deletions {
            files.remove(path);
        }
        for (path, data) in &outcome.files {
            let hash = self.store.put_object(&Blob::new(data))?;
            files.insert(path.clone(), hash);
        }

        let mut metadata = BTreeMap::new();
        if !outcome.notes.is_empty() {
            metadata.insert(META_NEEDS_REVIEW.to_string(), outcome.notes.join(","));
        }
        if conditional {
            metadata.insert(META_CONDITIONAL_TRUST.to_string(), "true".to_string());
        }
        let id = self.write_commit(
            &files,
            vec![ours.tip, theirs.tip],
            message,
            RefLogOp::Merge,
            metadata,
        )?;
        info!(commit = %id, "merge committed");
        Ok(id)
    }

    /// Resolve one conflicted path. When the final conflict is resolved the
    /// caller completes the merge with [`Repository::resolve_commit`].
    pub fn resolve(&self, path: &Path, resolution: Resolution) -> Result<(), MemError> {
        let _lock = self.lock()?;
        let mut state = self
            .merge_in_progress()?
            .ok_or_else(|| MemError::InvalidArgument("no merge in progress".to_string()))?;
        let (_, key) = self.worktree.normalize(path)?;
        let record = state
            .conflict(&key)
            .cloned()
            .ok_or_else(|| MemError::NotFound(format!("`{key}` is not conflicted")))?;

        let content: Option<Vec<u8>> = match resolution {
            Resolution::Ours => match record.ours {
                Some(hash) => Some(self.store.get_blob(&hash)?.data),
                None => None,
            },
            Resolution::Theirs => match record.theirs {
                Some(hash) => Some(self.store.get_blob(&hash)?.data),
                None => None,
            },
            Resolution::Both => {
                let current = self.worktree.read_file(Path::new(&key))?;
                Some(strip_markers_keep_both(&current))
            }
        };
        match content {
            Some(data) => {
                self.worktree.write_file(Path::new(&key), &data)?;
            }
            None => self.worktree.remove_file(Path::new(&key))?,
        }

        state.conflicts.retain(|c| c.path != key);
        state.save(&self.merge_state_path())?;
        self.audit.append(
            AuditOp::Resolve,
            fields([("path", key.clone())]),
        )?;
        debug!(path = %key, "conflict resolved");
        Ok(())
    }

    /// Complete a conflicted merge: refuse while conflicts remain, then
    /// write the two-parent commit from the working tree and clear state.
    pub fn resolve_commit(&self) -> Result<ObjectHash, MemError> {
        let _lock = self.lock()?;
        let state = self
            .merge_in_progress()?
            .ok_or_else(|| MemError::InvalidArgument("no merge in progress".to_string()))?;
        if !state.conflicts.is_empty() {
            return Err(MemError::UnresolvedConflicts(state.conflicts.len()));
        }

        let mut files = BTreeMap::new();
        for path in self.worktree.walk()? {
            let data = self.worktree.read_file(Path::new(&path))?;
            let hash = self.store.put_object(&Blob::new(&data))?;
            files.insert(path, hash);
        }

        let mut metadata = BTreeMap::new();
        if !state.notes.is_empty() {
            metadata.insert(META_NEEDS_REVIEW.to_string(), state.notes.join(","));
        }
        if state.conditional {
            metadata.insert(META_CONDITIONAL_TRUST.to_string(), "true".to_string());
        }
        let id = self.write_commit(
            &files,
            vec![state.ours_tip, state.theirs_tip],
            &state.message,
            RefLogOp::Merge,
            metadata,
        )?;
        MergeState::clear(&self.merge_state_path())?;

        let mut staging = self.staging()?;
        staging.clear();
        staging.save()?;
        self.audit.append(
            AuditOp::Resolve,
            fields([("commit", id.to_string())]),
        )?;
        info!(commit = %id, "merge resolved");
        Ok(id)
    }

    /// Default merge strategy lookup (exposed for collaborators).
    pub fn strategy_for_path(&self, path: &Path) -> StrategyKind {
        self.config
            .merge_strategy_for(crate::internal::object::types::MemoryClass::of_path(path))
    }
}
