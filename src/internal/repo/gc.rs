//! Garbage collection: mark-and-sweep over loose objects, with an optional
//! repack of the survivors.
//!
//! Mark roots are HEAD, every branch tip, every tag target, and both hashes
//! of every reflog entry newer than `gc.prune_days`. The sweep removes
//! loose objects the mark never reached; cancellation aborts before any
//! delete. Repack feeds the reachable loose objects through the pack codec,
//! seeded with similarity groups for delta selection, then drops their
//! loose copies.

use std::collections::{HashSet, VecDeque};

use tracing::{debug, info};

use crate::errors::MemError;
use crate::hash::ObjectHash;
use crate::internal::audit::{AuditOp, fields};
use crate::internal::object::ObjectTrait;
use crate::internal::object::tree::TreeItemMode;
use crate::internal::object::types::ObjectType;
use crate::internal::pack::PackWriter;
use crate::internal::pack::entry::Entry;
use crate::internal::repo::Repository;
use crate::internal::similarity::SimilarityMatcher;
use crate::internal::store::ObjectStore;
use crate::utils::CancelToken;

/// Summary of one GC run.
#[derive(Debug, Clone, Default)]
pub struct GcReport {
    pub marked: usize,
    pub swept: usize,
    pub repacked: usize,
    pub deltas: usize,
}

/// BFS the full object closure (commits → parents + trees; trees →
/// subtrees + blobs) from `roots`. Missing roots are tolerated when
/// `strict` is false (pruned reflog targets may already be gone).
pub(crate) fn reachable_objects(
    store: &ObjectStore,
    roots: &[ObjectHash],
    strict: bool,
    cancel: &CancelToken,
) -> Result<HashSet<ObjectHash>, MemError> {
    let mut marked: HashSet<ObjectHash> = HashSet::new();
    let mut queue: VecDeque<ObjectHash> = roots.iter().copied().collect();

    while let Some(hash) = queue.pop_front() {
        cancel.check()?;
        if hash.is_zero() || marked.contains(&hash) {
            continue;
        }
        let (kind, payload) = match store.get(&hash) {
            Ok(found) => found,
            Err(MemError::NotFound(_)) if !strict => continue,
            Err(e) => return Err(e),
        };
        marked.insert(hash);
        match kind {
            ObjectType::Commit => {
                let commit =
                    crate::internal::object::commit::Commit::from_bytes(&payload, hash)?;
                queue.push_back(commit.tree_id);
                queue.extend(commit.parent_commit_ids);
            }
            ObjectType::Tree => {
                let tree = crate::internal::object::tree::Tree::from_bytes(&payload, hash)?;
                for item in tree.tree_items {
                    if item.mode == TreeItemMode::Tree || item.mode == TreeItemMode::Blob {
                        queue.push_back(item.id);
                    }
                }
            }
            ObjectType::Blob => {}
        }
    }
    Ok(marked)
}

impl Repository {
    /// All mark roots for reachability: HEAD, branch tips, tag targets,
    /// remote-tracking tips, and recent reflog entries.
    pub(crate) fn gc_roots(&self) -> Result<Vec<ObjectHash>, MemError> {
        let mut roots = Vec::new();
        if let Some(tip) = self.refs.head_commit()? {
            roots.push(tip);
        }
        for (_, hash) in self.refs.list_branches()? {
            roots.push(hash);
        }
        for (_, hash) in self.refs.list_tags()? {
            roots.push(hash);
        }
        for entry in self.reflog.entries_newer_than(self.config.gc.prune_days)? {
            roots.push(entry.new);
            roots.push(entry.prev);
        }
        roots.retain(|hash| !hash.is_zero());
        roots.sort();
        roots.dedup();
        Ok(roots)
    }

    /// Mark-and-sweep; `repack` additionally packs the reachable loose
    /// objects. Safe under concurrent readers: only unreachable loose files
    /// are removed, and packed copies land before loose copies go away.
    pub fn gc(&self, repack: bool, cancel: &CancelToken) -> Result<GcReport, MemError> {
        let _lock = self.lock()?;
        let mut report = GcReport::default();

        let roots = self.gc_roots()?;
        let marked = reachable_objects(&self.store, &roots, false, cancel)?;
        report.marked = marked.len();

        // Sweep. The cancellation checkpoint sits before the first delete.
        let loose = self.store.iter_loose()?;
        for hash in &loose {
            cancel.check()?;
            if !marked.contains(hash) {
                self.store.delete_loose(hash)?;
                report.swept += 1;
            }
        }

        if repack {
            report = self.repack(marked, report, cancel)?;
        }

        self.audit.append(
            AuditOp::Gc,
            fields([
                ("marked", report.marked.to_string()),
                ("swept", report.swept.to_string()),
                ("repacked", report.repacked.to_string()),
            ]),
        )?;
        info!(
            marked = report.marked,
            swept = report.swept,
            repacked = report.repacked,
            "gc complete"
        );
        Ok(report)
    }

    fn repack(
        &self,
        marked: HashSet<ObjectHash>,
        mut report: GcReport,
        cancel: &CancelToken,
    ) -> Result<GcReport, MemError> {
        // Packs hold plaintext payloads per the fixed format; an encrypted
        // store keeps everything loose instead.
        if self.config.encryption.enabled {
            debug!("repack skipped: encryption at rest is enabled");
            return Ok(report);
        }

        let mut entries: Vec<Entry> = Vec::new();
        for hash in self.store.iter_loose()? {
            cancel.check()?;
            if marked.contains(&hash) {
                let (kind, payload) = self.store.get(&hash)?;
                entries.push(Entry::new(kind, payload, hash));
            }
        }
        if entries.is_empty() {
            return Ok(report);
        }

        let bases = if self.config.pack.delta.enabled {
            let objects: Vec<(ObjectHash, Vec<u8>)> = entries
                .iter()
                .map(|entry| (entry.hash, entry.data.clone()))
                .collect();
            SimilarityMatcher::new(&self.config.similarity).build_groups(&objects)
        } else {
            Default::default()
        };

        cancel.check()?;
        let writer = PackWriter::new(self.config.pack.delta.max_chain)?;
        let info = writer.write(&self.store.pack_dir(), &entries, &bases)?;
        self.store.reload_packs()?;

        for entry in &entries {
            self.store.delete_loose(&entry.hash)?;
        }
        report.repacked = info.object_count;
        report.deltas = info.delta_count;
        Ok(report)
    }
}
