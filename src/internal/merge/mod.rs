//! Three-way, memory-type-aware merge engine.
//!
//! The base of a merge is the lowest common ancestor of the two tips,
//! found by parallel BFS over parents (ties go to the most recent shared
//! ancestor). Identical tips are a no-op and an ancestor tip fast-forwards;
//! everything else merges per path, dispatching on the path's memory class:
//!
//! - EPISODIC: chronological append — both sides' new lines are unioned and
//!   sorted by their leading ISO-8601 timestamp; never conflicts.
//! - SEMANTIC: line-level three-way merge; overlapping edits produce
//!   `<<<<<<< ours` / `=======` / `>>>>>>> theirs` regions.
//! - PROCEDURAL: the side with the newer commit timestamp wins and the path
//!   is flagged for review in the merge commit metadata; no in-file markers.
//! - OTHER: merged like SEMANTIC.
//!
//! Unresolved conflicts persist in `.mem/merge/state`; while that record
//! exists the repository is in MERGING state and refuses ordinary commits.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use similar::{Algorithm, DiffOp, capture_diff_slices};
use tracing::debug;

use crate::errors::MemError;
use crate::hash::ObjectHash;
use crate::internal::object::types::MemoryClass;
use crate::internal::store::ObjectStore;
use crate::utils::atomic_write;

pub const MARKER_OURS: &str = "<<<<<<< ours\n";
pub const MARKER_SEP: &str = "=======\n";
pub const MARKER_THEIRS: &str = ">>>>>>> theirs\n";

/// Per-class merge strategies; `merge.strategy_override.<class>` swaps them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    ChronologicalAppend,
    Consolidate,
    PreferNewer,
}

impl StrategyKind {
    /// Built-in strategy for a memory class.
    pub fn default_for(class: MemoryClass) -> StrategyKind {
        match class {
            MemoryClass::Episodic => StrategyKind::ChronologicalAppend,
            MemoryClass::Semantic => StrategyKind::Consolidate,
            MemoryClass::Procedural => StrategyKind::PreferNewer,
            MemoryClass::Other => StrategyKind::Consolidate,
        }
    }
}

/// Per-path resolution choice for a conflicted merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Ours,
    Theirs,
    Both,
}

/// One unresolved path in the merge-state record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub path: String,
    pub ours: Option<ObjectHash>,
    pub theirs: Option<ObjectHash>,
    pub base: Option<ObjectHash>,
    pub strategy: StrategyKind,
}

/// Merge in progress: tips, base, and outstanding conflicts. While this
/// record exists on disk the repository is MERGING.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeState {
    pub ours_tip: ObjectHash,
    pub theirs_tip: ObjectHash,
    pub theirs_label: String,
    pub base: Option<ObjectHash>,
    pub conflicts: Vec<ConflictRecord>,
    pub notes: Vec<String>,
    pub message: String,
    /// The incoming tip was signed by a conditionally trusted key; the
    /// completion commit is flagged for review.
    #[serde(default)]
    pub conditional: bool,
}

impl MergeState {
    pub fn load(path: &Path) -> Result<Option<MergeState>, MemError> {
        if !path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(path)?;
        let state = serde_json::from_str(&text)
            .map_err(|e| MemError::InvalidObjectInfo(format!("merge state corrupt: {e}")))?;
        Ok(Some(state))
    }

    pub fn save(&self, path: &Path) -> Result<(), MemError> {
        let text = serde_json::to_vec_pretty(self)
            .map_err(|e| MemError::InvalidObjectInfo(format!("merge state encode: {e}")))?;
        atomic_write(path, &text)?;
        Ok(())
    }

    pub fn clear(path: &Path) -> Result<(), MemError> {
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    pub fn conflict(&self, path: &str) -> Option<&ConflictRecord> {
        self.conflicts.iter().find(|c| c.path == path)
    }
}

/// How one merge attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeResult {
    /// Tips were identical.
    AlreadyUpToDate,
    /// Ours was an ancestor of theirs: pointer update only.
    FastForward(ObjectHash),
    /// Real three-way merge; `conflicts` may be empty.
    Merged(MergeOutcome),
}

/// Files produced by a three-way merge, plus conflicts and review notes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MergeOutcome {
    /// Final content per path that differs from ours.
    pub files: BTreeMap<String, Vec<u8>>,
    /// Paths removed relative to ours.
    pub deletions: Vec<String>,
    pub conflicts: Vec<ConflictRecord>,
    /// Procedural paths auto-resolved by timestamp, flagged for review.
    pub notes: Vec<String>,
    /// True when the two histories share no ancestor (merge proceeded from
    /// the empty base).
    pub diverged: bool,
}

/// Walk parents from `descendant`; true when `ancestor` is reached.
pub fn is_ancestor(
    store: &ObjectStore,
    ancestor: ObjectHash,
    descendant: ObjectHash,
) -> Result<bool, MemError> {
    if ancestor == descendant {
        return Ok(true);
    }
    let mut visited: HashSet<ObjectHash> = HashSet::new();
    let mut queue: VecDeque<ObjectHash> = VecDeque::from([descendant]);
    while let Some(hash) = queue.pop_front() {
        if !visited.insert(hash) {
            continue;
        }
        let commit = store.get_commit(&hash)?;
        for parent in commit.parent_commit_ids {
            if parent == ancestor {
                return Ok(true);
            }
            queue.push_back(parent);
        }
    }
    Ok(false)
}

/// Advance one BFS level: pop the frontier, report commits the other side
/// has already seen, and queue unseen parents.
fn expand_level(
    store: &ObjectStore,
    frontier: &mut VecDeque<ObjectHash>,
    seen: &mut HashSet<ObjectHash>,
    other: &HashSet<ObjectHash>,
    shared: &mut Vec<ObjectHash>,
) -> Result<(), MemError> {
    let mut next = VecDeque::new();
    while let Some(hash) = frontier.pop_front() {
        if other.contains(&hash) {
            shared.push(hash);
            continue;
        }
        let commit = store.get_commit(&hash)?;
        for parent in commit.parent_commit_ids {
            if seen.insert(parent) {
                next.push_back(parent);
            }
        }
    }
    *frontier = next;
    Ok(())
}

/// Lowest common ancestor by parallel BFS; on ties the most recent shared
/// ancestor wins (committer timestamp, then hash, for determinism).
pub fn lowest_common_ancestor(
    store: &ObjectStore,
    a: ObjectHash,
    b: ObjectHash,
) -> Result<Option<ObjectHash>, MemError> {
    if a == b {
        return Ok(Some(a));
    }
    let mut seen_a: HashSet<ObjectHash> = HashSet::from([a]);
    let mut seen_b: HashSet<ObjectHash> = HashSet::from([b]);
    let mut frontier_a: VecDeque<ObjectHash> = VecDeque::from([a]);
    let mut frontier_b: VecDeque<ObjectHash> = VecDeque::from([b]);

    let mut shared: Vec<ObjectHash> = Vec::new();
    while shared.is_empty() && (!frontier_a.is_empty() || !frontier_b.is_empty()) {
        expand_level(store, &mut frontier_a, &mut seen_a, &seen_b, &mut shared)?;
        expand_level(store, &mut frontier_b, &mut seen_b, &seen_a, &mut shared)?;
        // Same-level discoveries: commits now sitting in both visited sets.
        for hash in frontier_a.iter().chain(frontier_b.iter()) {
            if seen_a.contains(hash) && seen_b.contains(hash) {
                shared.push(*hash);
            }
        }
    }

    shared.sort();
    shared.dedup();
    let mut best: Option<(DateTime<Utc>, ObjectHash)> = None;
    for hash in shared {
        let commit = store.get_commit(&hash)?;
        let stamp = commit.committer.timestamp;
        if best.is_none() || (stamp, hash) > best.unwrap() {
            best = Some((stamp, hash));
        }
    }
    Ok(best.map(|(_, hash)| hash))
}

/// Inputs describing one side of a merge.
#[derive(Debug, Clone)]
pub struct MergeSide {
    pub tip: ObjectHash,
    pub files: BTreeMap<String, ObjectHash>,
    pub commit_time: DateTime<Utc>,
    pub committer: String,
}

/// Run the per-path strategy dispatch over three flattened trees.
pub fn merge_file_maps(
    store: &ObjectStore,
    base_files: &BTreeMap<String, ObjectHash>,
    ours: &MergeSide,
    theirs: &MergeSide,
    strategy_for: impl Fn(MemoryClass) -> StrategyKind,
) -> Result<MergeOutcome, MemError> {
    let mut outcome = MergeOutcome::default();

    let mut paths: Vec<&String> = ours.files.keys().chain(theirs.files.keys()).collect();
    paths.sort();
    paths.dedup();

    for path in paths {
        let base_hash = base_files.get(path).copied();
        let our_hash = ours.files.get(path).copied();
        let their_hash = theirs.files.get(path).copied();

        if our_hash == their_hash {
            continue;
        }
        let ours_changed = our_hash != base_hash;
        let theirs_changed = their_hash != base_hash;
        if !theirs_changed {
            continue;
        }
        if !ours_changed {
            // Only theirs moved: take it, including deletions.
            match their_hash {
                Some(hash) => {
                    outcome
                        .files
                        .insert(path.clone(), store.get_blob(&hash)?.data);
                }
                None => outcome.deletions.push(path.clone()),
            }
            continue;
        }

        // Both sides changed the path.
        let class = MemoryClass::of_path(Path::new(path));
        let strategy = strategy_for(class);

        let (our_data, their_data) = match (our_hash, their_hash) {
            (Some(o), Some(t)) => (store.get_blob(&o)?.data, store.get_blob(&t)?.data),
            _ => {
                // Delete/modify collision: always a conflict, the content
                // intent cannot be inferred from either strategy.
                let mut text = String::new();
                text.push_str(MARKER_OURS);
                if let Some(o) = our_hash {
                    text.push_str(&store.get_blob(&o)?.text());
                }
                text.push_str(MARKER_SEP);
                if let Some(t) = their_hash {
                    text.push_str(&store.get_blob(&t)?.text());
                }
                text.push_str(MARKER_THEIRS);
                outcome.files.insert(path.clone(), text.into_bytes());
                outcome.conflicts.push(ConflictRecord {
                    path: path.clone(),
                    ours: our_hash,
                    theirs: their_hash,
                    base: base_hash,
                    strategy,
                });
                continue;
            }
        };
        let base_data = match base_hash {
            Some(hash) => store.get_blob(&hash)?.data,
            None => Vec::new(),
        };

        match strategy {
            StrategyKind::ChronologicalAppend => {
                let merged = chronological_append(
                    &base_data,
                    &our_data,
                    &their_data,
                    ours.commit_time,
                    theirs.commit_time,
                );
                outcome.files.insert(path.clone(), merged);
            }
            StrategyKind::Consolidate => {
                let (merged, clean) = three_way_lines(&base_data, &our_data, &their_data);
                if !clean {
                    outcome.conflicts.push(ConflictRecord {
                        path: path.clone(),
                        ours: our_hash,
                        theirs: their_hash,
                        base: base_hash,
                        strategy,
                    });
                }
                outcome.files.insert(path.clone(), merged);
            }
            StrategyKind::PreferNewer => {
                let take_theirs = prefer_theirs(ours, theirs);
                let winner = if take_theirs { &their_data } else { &our_data };
                outcome.files.insert(path.clone(), winner.clone());
                outcome.notes.push(path.clone());
            }
        }
    }

    debug!(
        files = outcome.files.len(),
        conflicts = outcome.conflicts.len(),
        notes = outcome.notes.len(),
        "merge outcome computed"
    );
    Ok(outcome)
}

/// Newer commit wins; equal timestamps break by committer id, then by
/// commit hash.
fn prefer_theirs(ours: &MergeSide, theirs: &MergeSide) -> bool {
    (
        theirs.commit_time,
        &theirs.committer,
        theirs.tip,
    ) > (ours.commit_time, &ours.committer, ours.tip)
}

/// Timestamp key for one episodic line: the leading ISO-8601 token, or the
/// owning side's commit time when the line carries none.
fn line_timestamp(line: &str, fallback: DateTime<Utc>) -> DateTime<Utc> {
    let token = line.split_whitespace().next().unwrap_or("");
    DateTime::parse_from_rfc3339(token)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(fallback)
}

/// EPISODIC merge: shared prefix, then the union of both sides' appended
/// lines in timestamp order. Never produces conflict markers.
fn chronological_append(
    base: &[u8],
    ours: &[u8],
    theirs: &[u8],
    our_time: DateTime<Utc>,
    their_time: DateTime<Utc>,
) -> Vec<u8> {
    let base_lines: Vec<&str> = split_lines(base);
    let our_lines: Vec<&str> = split_lines(ours);
    let their_lines: Vec<&str> = split_lines(theirs);

    // Shared prefix across all three; appended tails follow it.
    let mut prefix = 0usize;
    while prefix < base_lines.len()
        && our_lines.get(prefix) == Some(&base_lines[prefix])
        && their_lines.get(prefix) == Some(&base_lines[prefix])
    {
        prefix += 1;
    }
    // Extend over lines ours and theirs still share beyond the base.
    while our_lines.get(prefix).is_some() && our_lines.get(prefix) == their_lines.get(prefix) {
        prefix += 1;
    }

    let mut appended: Vec<(DateTime<Utc>, usize, &str)> = Vec::new();
    for &line in &our_lines[prefix.min(our_lines.len())..] {
        appended.push((line_timestamp(line, our_time), 0, line));
    }
    for &line in &their_lines[prefix.min(their_lines.len())..] {
        if !appended.iter().any(|(_, _, seen)| *seen == line) {
            appended.push((line_timestamp(line, their_time), 1, line));
        }
    }
    appended.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));

    let mut merged = String::new();
    for line in &our_lines[..prefix.min(our_lines.len())] {
        merged.push_str(line);
    }
    for (_, _, line) in &appended {
        if !merged.is_empty() && !merged.ends_with('\n') {
            merged.push('\n');
        }
        merged.push_str(line);
    }
    merged.into_bytes()
}

fn split_lines(data: &[u8]) -> Vec<&str> {
    let text = std::str::from_utf8(data).unwrap_or("");
    text.split_inclusive('\n').collect()
}

/// One non-equal hunk of a side diff against the base.
#[derive(Debug, Clone)]
struct Edit {
    base_start: usize,
    base_end: usize,
    repl: Vec<String>,
}

fn side_edits(base: &[&str], side: &[&str]) -> Vec<Edit> {
    let ops = capture_diff_slices(Algorithm::Myers, base, side);
    let mut edits = Vec::new();
    for op in ops {
        match op {
            DiffOp::Equal { .. } => {}
            _ => {
                let old = op.old_range();
                let new = op.new_range();
                edits.push(Edit {
                    base_start: old.start,
                    base_end: old.end,
                    repl: side[new].iter().map(|s| s.to_string()).collect(),
                });
            }
        }
    }
    edits
}

/// Replacement content one side produces for base region `[s, e)`.
fn region_replacement(base: &[&str], edits: &[Edit], s: usize, e: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut cursor = s;
    for edit in edits {
        if edit.base_start < s || edit.base_end > e {
            continue;
        }
        while cursor < edit.base_start {
            out.push(base[cursor].to_string());
            cursor += 1;
        }
        out.extend(edit.repl.iter().cloned());
        cursor = cursor.max(edit.base_end);
    }
    while cursor < e {
        out.push(base[cursor].to_string());
        cursor += 1;
    }
    out
}

/// Line-level three-way merge. Returns the merged bytes and whether the
/// merge was clean (no conflict regions emitted).
pub fn three_way_lines(base: &[u8], ours: &[u8], theirs: &[u8]) -> (Vec<u8>, bool) {
    let base_lines = split_lines(base);
    let our_lines = split_lines(ours);
    let their_lines = split_lines(theirs);

    let our_edits = side_edits(&base_lines, &our_lines);
    let their_edits = side_edits(&base_lines, &their_lines);

    // Union overlapping edit intervals from both sides into chunks.
    let mut intervals: Vec<(usize, usize)> = our_edits
        .iter()
        .chain(their_edits.iter())
        .map(|e| (e.base_start, e.base_end))
        .collect();
    intervals.sort();
    let mut chunks: Vec<(usize, usize)> = Vec::new();
    for (start, end) in intervals {
        match chunks.last_mut() {
            Some((_, chunk_end)) if start <= *chunk_end => {
                *chunk_end = (*chunk_end).max(end);
            }
            _ => chunks.push((start, end)),
        }
    }

    let mut merged = String::new();
    let mut clean = true;
    let mut cursor = 0usize;
    for (start, end) in chunks {
        while cursor < start {
            merged.push_str(base_lines[cursor]);
            cursor += 1;
        }
        let our_repl = region_replacement(&base_lines, &our_edits, start, end);
        let their_repl = region_replacement(&base_lines, &their_edits, start, end);
        let base_slice: Vec<String> = base_lines[start..end].iter().map(|s| s.to_string()).collect();

        if our_repl == their_repl || their_repl == base_slice {
            for line in &our_repl {
                merged.push_str(line);
            }
        } else if our_repl == base_slice {
            for line in &their_repl {
                merged.push_str(line);
            }
        } else {
            clean = false;
            ensure_newline(&mut merged);
            merged.push_str(MARKER_OURS);
            for line in &our_repl {
                merged.push_str(line);
            }
            ensure_newline(&mut merged);
            merged.push_str(MARKER_SEP);
            for line in &their_repl {
                merged.push_str(line);
            }
            ensure_newline(&mut merged);
            merged.push_str(MARKER_THEIRS);
        }
        cursor = end;
    }
    while cursor < base_lines.len() {
        merged.push_str(base_lines[cursor]);
        cursor += 1;
    }

    (merged.into_bytes(), clean)
}

fn ensure_newline(text: &mut String) {
    if !text.is_empty() && !text.ends_with('\n') {
        text.push('\n');
    }
}

/// Strip conflict markers, retaining both sides' content in order — the
/// `both` resolution.
pub fn strip_markers_keep_both(data: &[u8]) -> Vec<u8> {
    let text = String::from_utf8_lossy(data);
    let mut out = String::new();
    for line in text.split_inclusive('\n') {
        let trimmed = line.trim_end();
        if trimmed == MARKER_OURS.trim_end()
            || trimmed == MARKER_SEP.trim_end()
            || trimmed == MARKER_THEIRS.trim_end()
        {
            continue;
        }
        out.push_str(line);
    }
    out.into_bytes()
}
