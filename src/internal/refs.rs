//! Reference management: branches, tags, remote-tracking refs, and HEAD.
//!
//! Every ref is one file holding a hex commit hash, updated by atomic
//! rename so readers never observe a torn value. Names may contain `/` but
//! must stay strictly inside their root after lexical normalization; `.`
//! and `..` segments, control bytes, and empty segments are rejected.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::MemError;
use crate::hash::ObjectHash;
use crate::utils::atomic_write;

/// HEAD: either a branch symbolic pointer or a detached commit hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Head {
    Branch(String),
    Detached(ObjectHash),
}

/// Validate a branch/tag/remote name: non-empty `/`-separated segments,
/// no `.`/`..`, no control bytes, no backslash.
pub fn validate_ref_name(name: &str) -> Result<(), MemError> {
    if name.is_empty() || name.starts_with('/') || name.ends_with('/') {
        return Err(MemError::InvalidRefName(name.to_string()));
    }
    for segment in name.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            return Err(MemError::InvalidRefName(name.to_string()));
        }
        if segment
            .bytes()
            .any(|b| b < 0x20 || b == 0x7f || b == b'\\' || b == b'\x00')
        {
            return Err(MemError::InvalidRefName(name.to_string()));
        }
    }
    Ok(())
}

/// File-backed ref store rooted at `.mem/`.
#[derive(Debug, Clone)]
pub struct RefStore {
    dir: PathBuf,
}

impl RefStore {
    pub fn new(dir: &Path) -> RefStore {
        RefStore {
            dir: dir.to_path_buf(),
        }
    }

    pub fn heads_dir(&self) -> PathBuf {
        self.dir.join("refs").join("heads")
    }

    pub fn tags_dir(&self) -> PathBuf {
        self.dir.join("refs").join("tags")
    }

    pub fn remotes_dir(&self) -> PathBuf {
        self.dir.join("refs").join("remotes")
    }

    fn head_path(&self) -> PathBuf {
        self.dir.join("HEAD")
    }

    /// Resolve a validated name under `root`, double-checking containment
    /// after lexical normalization.
    fn ref_path(&self, root: &Path, name: &str) -> Result<PathBuf, MemError> {
        validate_ref_name(name)?;
        let path = root.join(name);
        let mut normalized = PathBuf::new();
        for component in path.components() {
            use std::path::Component;
            match component {
                Component::ParentDir => {
                    if !normalized.pop() {
                        return Err(MemError::InvalidRefName(name.to_string()));
                    }
                }
                Component::CurDir => {}
                other => normalized.push(other),
            }
        }
        if !normalized.starts_with(root) || normalized == *root {
            return Err(MemError::InvalidRefName(name.to_string()));
        }
        Ok(normalized)
    }

    fn write_ref(&self, root: &Path, name: &str, hash: ObjectHash) -> Result<(), MemError> {
        let path = self.ref_path(root, name)?;
        atomic_write(&path, format!("{hash}\n").as_bytes())?;
        Ok(())
    }

    fn read_ref(&self, root: &Path, name: &str) -> Result<Option<ObjectHash>, MemError> {
        let path = self.ref_path(root, name)?;
        if !path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(path)?;
        Ok(Some(ObjectHash::from_str(text.trim())?))
    }

    fn delete_ref(&self, root: &Path, name: &str) -> Result<bool, MemError> {
        let path = self.ref_path(root, name)?;
        if path.exists() {
            fs::remove_file(path)?;
            return Ok(true);
        }
        Ok(false)
    }

    fn list_refs(&self, root: &Path) -> Result<Vec<(String, ObjectHash)>, MemError> {
        let mut refs = Vec::new();
        if root.exists() {
            let mut stack = vec![root.to_path_buf()];
            while let Some(dir) = stack.pop() {
                for entry in fs::read_dir(&dir)? {
                    let path = entry?.path();
                    if path.is_dir() {
                        stack.push(path);
                    } else {
                        let name = path
                            .strip_prefix(root)
                            .map_err(|_| MemError::InvalidRefName(path.display().to_string()))?
                            .components()
                            .map(|c| c.as_os_str().to_string_lossy())
                            .collect::<Vec<_>>()
                            .join("/");
                        let text = fs::read_to_string(&path)?;
                        refs.push((name, ObjectHash::from_str(text.trim())?));
                    }
                }
            }
        }
        refs.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(refs)
    }

    // ---- branches ----

    pub fn write_branch(&self, name: &str, hash: ObjectHash) -> Result<(), MemError> {
        self.write_ref(&self.heads_dir(), name, hash)
    }

    pub fn read_branch(&self, name: &str) -> Result<Option<ObjectHash>, MemError> {
        self.read_ref(&self.heads_dir(), name)
    }

    pub fn delete_branch(&self, name: &str) -> Result<bool, MemError> {
        self.delete_ref(&self.heads_dir(), name)
    }

    pub fn list_branches(&self) -> Result<Vec<(String, ObjectHash)>, MemError> {
        self.list_refs(&self.heads_dir())
    }

    // ---- tags ----

    pub fn write_tag(&self, name: &str, hash: ObjectHash) -> Result<(), MemError> {
        self.write_ref(&self.tags_dir(), name, hash)
    }

    pub fn read_tag(&self, name: &str) -> Result<Option<ObjectHash>, MemError> {
        self.read_ref(&self.tags_dir(), name)
    }

    pub fn delete_tag(&self, name: &str) -> Result<bool, MemError> {
        self.delete_ref(&self.tags_dir(), name)
    }

    pub fn list_tags(&self) -> Result<Vec<(String, ObjectHash)>, MemError> {
        self.list_refs(&self.tags_dir())
    }

    // ---- remote-tracking refs ----

    pub fn write_remote_ref(
        &self,
        remote: &str,
        branch: &str,
        hash: ObjectHash,
    ) -> Result<(), MemError> {
        validate_ref_name(remote)?;
        self.write_ref(&self.remotes_dir().join(remote), branch, hash)
    }

    pub fn read_remote_ref(
        &self,
        remote: &str,
        branch: &str,
    ) -> Result<Option<ObjectHash>, MemError> {
        validate_ref_name(remote)?;
        self.read_ref(&self.remotes_dir().join(remote), branch)
    }

    pub fn list_remote_refs(&self, remote: &str) -> Result<Vec<(String, ObjectHash)>, MemError> {
        validate_ref_name(remote)?;
        self.list_refs(&self.remotes_dir().join(remote))
    }

    // ---- HEAD ----

    pub fn write_head(&self, head: &Head) -> Result<(), MemError> {
        let text = match head {
            Head::Branch(name) => {
                validate_ref_name(name)?;
                format!("ref: refs/heads/{name}\n")
            }
            Head::Detached(hash) => format!("{hash}\n"),
        };
        atomic_write(&self.head_path(), text.as_bytes())?;
        Ok(())
    }

    pub fn read_head(&self) -> Result<Head, MemError> {
        let text = fs::read_to_string(self.head_path())?;
        let text = text.trim();
        if let Some(name) = text.strip_prefix("ref: refs/heads/") {
            validate_ref_name(name)?;
            Ok(Head::Branch(name.to_string()))
        } else {
            Ok(Head::Detached(ObjectHash::from_str(text)?))
        }
    }

    /// The commit HEAD points at, if any (an unborn branch has none).
    pub fn head_commit(&self) -> Result<Option<ObjectHash>, MemError> {
        match self.read_head()? {
            Head::Branch(name) => self.read_branch(&name),
            Head::Detached(hash) => Ok(Some(hash)),
        }
    }
}
