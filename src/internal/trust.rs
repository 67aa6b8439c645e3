//! Trust store: signing-key fingerprints mapped to trust levels, consulted
//! on pull and merge.
//!
//! - `Full`: commits signed by this key are accepted silently.
//! - `Conditional`: accepted but flagged in commit metadata for review.
//! - `Untrusted` (or unknown): fetched objects stay quarantined and the
//!   merge engine refuses the commits.
//!
//! Keys copied in by clone start as `Untrusted` and must be promoted
//! explicitly. Persisted as JSON at `.mem/trust/store`.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::MemError;
use crate::utils::atomic_write;

/// Trust levels for signing keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TrustLevel {
    Full,
    Conditional,
    #[default]
    Untrusted,
}

impl Display for TrustLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrustLevel::Full => write!(f, "full"),
            TrustLevel::Conditional => write!(f, "conditional"),
            TrustLevel::Untrusted => write!(f, "untrusted"),
        }
    }
}

impl FromStr for TrustLevel {
    type Err = MemError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(TrustLevel::Full),
            "conditional" => Ok(TrustLevel::Conditional),
            "untrusted" => Ok(TrustLevel::Untrusted),
            _ => Err(MemError::InvalidArgument(format!(
                "unknown trust level `{s}`"
            ))),
        }
    }
}

/// File-backed `fingerprint → level` mapping.
#[derive(Debug, Clone)]
pub struct TrustStore {
    path: PathBuf,
    levels: BTreeMap<String, TrustLevel>,
}

impl TrustStore {
    pub fn load(path: &Path) -> Result<TrustStore, MemError> {
        let levels = if path.exists() {
            let text = fs::read_to_string(path)?;
            serde_json::from_str(&text)
                .map_err(|e| MemError::InvalidConfig(format!("trust store corrupt: {e}")))?
        } else {
            BTreeMap::new()
        };
        Ok(TrustStore {
            path: path.to_path_buf(),
            levels,
        })
    }

    pub fn save(&self) -> Result<(), MemError> {
        let text = serde_json::to_vec_pretty(&self.levels)
            .map_err(|e| MemError::InvalidConfig(format!("trust store encode: {e}")))?;
        atomic_write(&self.path, &text)?;
        Ok(())
    }

    /// Stored level for a key, `None` when the key is unknown.
    pub fn get(&self, key_id: &str) -> Option<TrustLevel> {
        self.levels.get(key_id).copied()
    }

    /// Effective level: unknown keys are untrusted.
    pub fn effective(&self, key_id: &str) -> TrustLevel {
        self.get(key_id).unwrap_or(TrustLevel::Untrusted)
    }

    /// Set (or promote/demote) a key's level and persist.
    pub fn set(&mut self, key_id: &str, level: TrustLevel) -> Result<(), MemError> {
        self.levels.insert(key_id.to_string(), level);
        self.save()?;
        debug!(key = key_id, %level, "trust level updated");
        Ok(())
    }

    /// Register a key at the given level only when it is not yet known
    /// (applies `trust.default_level` to newly imported keys).
    pub fn register(&mut self, key_id: &str, default_level: TrustLevel) -> Result<(), MemError> {
        if !self.levels.contains_key(key_id) {
            self.set(key_id, default_level)?;
        }
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &TrustLevel)> {
        self.levels.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Levels round-trip through disk; unknown keys are untrusted.
    #[test]
    fn test_roundtrip_and_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trust").join("store");
        fs::create_dir_all(path.parent().unwrap()).unwrap();

        let mut store = TrustStore::load(&path).unwrap();
        assert_eq!(store.effective("abc"), TrustLevel::Untrusted);
        assert_eq!(store.get("abc"), None);

        store.set("abc", TrustLevel::Full).unwrap();
        store.set("def", TrustLevel::Conditional).unwrap();

        let loaded = TrustStore::load(&path).unwrap();
        assert_eq!(loaded.effective("abc"), TrustLevel::Full);
        assert_eq!(loaded.effective("def"), TrustLevel::Conditional);
        assert_eq!(loaded.effective("ghi"), TrustLevel::Untrusted);
    }

    /// register applies the default level only to new keys.
    #[test]
    fn test_register_keeps_promotions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store");

        let mut store = TrustStore::load(&path).unwrap();
        store.set("abc", TrustLevel::Full).unwrap();
        store.register("abc", TrustLevel::Untrusted).unwrap();
        store.register("new", TrustLevel::Conditional).unwrap();

        assert_eq!(store.effective("abc"), TrustLevel::Full);
        assert_eq!(store.effective("new"), TrustLevel::Conditional);
    }

    /// Level text parsing round-trips.
    #[test]
    fn test_level_parse() {
        for level in [
            TrustLevel::Full,
            TrustLevel::Conditional,
            TrustLevel::Untrusted,
        ] {
            assert_eq!(level.to_string().parse::<TrustLevel>().unwrap(), level);
        }
        assert!("sometimes".parse::<TrustLevel>().is_err());
    }
}
