//! Working-tree service: the bidirectional mapping between tree objects and
//! the user-visible `current/` directory.
//!
//! Every externally supplied path is normalized lexically against the
//! working root and rejected with `PathOutsideRoot` when it escapes —
//! absolute paths, `..` chains, and the root itself included.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use path_absolutize::Absolutize;

use crate::errors::MemError;
use crate::hash::ObjectHash;
use crate::internal::object::tree::{Tree, TreeItemMode};
use crate::internal::store::ObjectStore;

/// Flatten a tree object into `path → blob_hash`, iteratively.
pub fn flatten_tree(
    store: &ObjectStore,
    tree_hash: ObjectHash,
) -> Result<BTreeMap<String, ObjectHash>, MemError> {
    let mut files = BTreeMap::new();
    let mut worklist: Vec<(String, ObjectHash)> = vec![(String::new(), tree_hash)];
    while let Some((prefix, hash)) = worklist.pop() {
        let tree: Tree = store.get_tree(&hash)?;
        for item in &tree.tree_items {
            let path = if prefix.is_empty() {
                item.name.clone()
            } else {
                format!("{prefix}/{}", item.name)
            };
            match item.mode {
                TreeItemMode::Blob => {
                    files.insert(path, item.id);
                }
                TreeItemMode::Tree => worklist.push((path, item.id)),
            }
        }
    }
    Ok(files)
}

/// Handle over the `current/` directory.
#[derive(Debug, Clone)]
pub struct WorkTree {
    root: PathBuf,
}

impl WorkTree {
    pub fn new(root: &Path) -> WorkTree {
        WorkTree {
            root: root.to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Normalize a user path to `(absolute, repo-relative)` form, rejecting
    /// anything that leaves the working root.
    pub fn normalize(&self, path: &Path) -> Result<(PathBuf, String), MemError> {
        let abs = path
            .absolutize_virtually(&self.root)
            .map_err(|_| MemError::PathOutsideRoot(path.display().to_string()))?
            .into_owned();
        let rel = abs
            .strip_prefix(&self.root)
            .map_err(|_| MemError::PathOutsideRoot(path.display().to_string()))?;
        if rel.as_os_str().is_empty() {
            return Err(MemError::PathOutsideRoot(path.display().to_string()));
        }
        let key = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        Ok((abs, key))
    }

    pub fn write_file(&self, path: &Path, data: &[u8]) -> Result<String, MemError> {
        let (abs, key) = self.normalize(path)?;
        if let Some(parent) = abs.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(abs, data)?;
        Ok(key)
    }

    pub fn read_file(&self, path: &Path) -> Result<Vec<u8>, MemError> {
        let (abs, key) = self.normalize(path)?;
        if !abs.exists() {
            return Err(MemError::NotFound(key));
        }
        Ok(fs::read(abs)?)
    }

    pub fn exists(&self, path: &Path) -> Result<bool, MemError> {
        Ok(self.normalize(path)?.0.exists())
    }

    /// File size and mtime for a staging entry.
    pub fn metadata(&self, path: &Path) -> Result<(u64, i64, u32), MemError> {
        let (abs, key) = self.normalize(path)?;
        let meta = fs::metadata(&abs).map_err(|_| MemError::NotFound(key))?;
        let mtime = meta
            .modified()?
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();
        Ok((meta.len(), mtime.as_secs() as i64, mtime.subsec_nanos()))
    }

    /// Remove a file and prune now-empty parent directories.
    pub fn remove_file(&self, path: &Path) -> Result<(), MemError> {
        let (abs, _) = self.normalize(path)?;
        if abs.exists() {
            fs::remove_file(&abs)?;
            let mut dir = abs.parent().map(Path::to_path_buf);
            while let Some(d) = dir {
                if d == self.root || fs::remove_dir(&d).is_err() {
                    break;
                }
                dir = d.parent().map(Path::to_path_buf);
            }
        }
        Ok(())
    }

    /// Every file under the root, repo-relative, sorted.
    pub fn walk(&self) -> Result<Vec<String>, MemError> {
        let mut files = Vec::new();
        if self.root.exists() {
            let mut stack = vec![self.root.clone()];
            while let Some(dir) = stack.pop() {
                for entry in fs::read_dir(&dir)? {
                    let path = entry?.path();
                    if path.is_dir() {
                        stack.push(path);
                    } else {
                        let (_, key) = self.normalize(&path)?;
                        files.push(key);
                    }
                }
            }
        }
        files.sort();
        Ok(files)
    }

    /// Materialize a tree: write every blob, drop files the tree lacks.
    pub fn checkout(&self, store: &ObjectStore, tree_hash: ObjectHash) -> Result<(), MemError> {
        let target = flatten_tree(store, tree_hash)?;
        for existing in self.walk()? {
            if !target.contains_key(&existing) {
                self.remove_file(Path::new(&existing))?;
            }
        }
        for (path, blob_hash) in &target {
            let blob = store.get_blob(blob_hash)?;
            self.write_file(Path::new(path), &blob.data)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::internal::object::blob::Blob;
    use crate::internal::object::tree::TreeItem;

    fn worktree() -> (tempfile::TempDir, WorkTree) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("current");
        fs::create_dir_all(&root).unwrap();
        (dir, WorkTree::new(&root))
    }

    /// Escaping paths are rejected; inside paths normalize to `/` keys.
    #[test]
    fn test_normalize() {
        let (_dir, wt) = worktree();
        let (_, key) = wt.normalize(Path::new("episodic/./2026/../log.md")).unwrap();
        assert_eq!(key, "episodic/log.md");

        for bad in ["../escape.md", "/etc/passwd", "a/../../b", "."] {
            assert!(
                matches!(
                    wt.normalize(Path::new(bad)),
                    Err(MemError::PathOutsideRoot(_))
                ),
                "accepted `{bad}`"
            );
        }
    }

    /// Write/read/walk/remove round-trip, with directory pruning.
    #[test]
    fn test_file_ops() {
        let (_dir, wt) = worktree();
        wt.write_file(Path::new("semantic/pref.md"), b"dark mode\n")
            .unwrap();
        wt.write_file(Path::new("episodic/2026/log.md"), b"entry\n")
            .unwrap();

        assert_eq!(
            wt.read_file(Path::new("semantic/pref.md")).unwrap(),
            b"dark mode\n"
        );
        assert_eq!(
            wt.walk().unwrap(),
            vec!["episodic/2026/log.md", "semantic/pref.md"]
        );

        wt.remove_file(Path::new("episodic/2026/log.md")).unwrap();
        assert_eq!(wt.walk().unwrap(), vec!["semantic/pref.md"]);
        assert!(!wt.root().join("episodic").exists());
    }

    /// Checkout materializes exactly the tree and drops strays.
    #[test]
    fn test_checkout() {
        let (dir, wt) = worktree();
        let store = ObjectStore::open(&dir.path().join("objects"), true).unwrap();

        let blob = Blob::new(b"dark mode\n");
        store.put_object(&blob).unwrap();
        let sub = Tree::from_tree_items(vec![TreeItem::new(
            TreeItemMode::Blob,
            blob.id,
            "pref.md".to_string(),
        )])
        .unwrap();
        store.put_object(&sub).unwrap();
        let root = Tree::from_tree_items(vec![TreeItem::new(
            TreeItemMode::Tree,
            sub.id,
            "semantic".to_string(),
        )])
        .unwrap();
        store.put_object(&root).unwrap();

        wt.write_file(Path::new("stray.md"), b"gone after checkout")
            .unwrap();
        wt.checkout(&store, root.id).unwrap();

        assert_eq!(wt.walk().unwrap(), vec!["semantic/pref.md"]);
        assert_eq!(
            wt.read_file(Path::new("semantic/pref.md")).unwrap(),
            b"dark mode\n"
        );

        let files = flatten_tree(&store, root.id).unwrap();
        assert_eq!(files.get("semantic/pref.md"), Some(&blob.id));
    }
}
