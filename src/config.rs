//! Repository configuration: author identity, default branch, compression,
//! GC pruning, signing, at-rest encryption, merge strategy overrides, pack
//! delta limits, similarity thresholds, and the default trust level.
//!
//! Persisted as pretty-printed JSON at `.mem/config`; loaded once at open
//! and passed to the repository handle as an immutable value.

use std::{collections::BTreeMap, fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::errors::MemError;
use crate::internal::merge::StrategyKind;
use crate::internal::object::types::MemoryClass;
use crate::internal::trust::TrustLevel;
use crate::utils::atomic_write;

/// Hard ceiling on pack delta chain depth; `pack.delta.max_chain` may lower
/// it but never exceed it.
pub const MAX_DELTA_CHAIN: usize = 16;

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct AuthorConfig {
    pub name: String,
    pub email: String,
}

impl Default for AuthorConfig {
    fn default() -> Self {
        Self {
            name: "agent".to_string(),
            email: "agent@localhost".to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct CoreConfig {
    pub default_branch: String,
    pub compression: bool,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            default_branch: "main".to_string(),
            compression: true,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct GcConfig {
    /// Reflog entries older than this many days stop being reachability roots.
    pub prune_days: i64,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self { prune_days: 90 }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct SigningConfig {
    /// Compute Merkle roots and sign commits when a private key is present.
    pub enabled: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct KdfConfig {
    /// Argon2id memory cost in KiB.
    pub memory: u32,
    /// Argon2id pass count.
    pub passes: u32,
}

impl Default for KdfConfig {
    fn default() -> Self {
        // 64 MiB, 3 passes
        Self {
            memory: 65536,
            passes: 3,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct EncryptionConfig {
    pub enabled: bool,
    pub kdf: KdfConfig,
    /// Hex-encoded KDF salt, generated when encryption is first enabled.
    pub salt: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct MergeConfig {
    /// Replace the default strategy for a memory class.
    pub strategy_override: BTreeMap<MemoryClass, StrategyKind>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct DeltaConfig {
    /// Enable delta selection during repack.
    pub enabled: bool,
    /// Max delta chain depth (<= 16).
    pub max_chain: usize,
}

impl Default for DeltaConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_chain: MAX_DELTA_CHAIN,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct PackSection {
    pub delta: DeltaConfig,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct SimilarityConfig {
    /// Length-ratio skip threshold.
    pub tau1: f64,
    /// SimHash Hamming-distance skip threshold.
    pub tau2: u32,
    /// Normalized edit-similarity keep threshold.
    pub tau3: f64,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            tau1: 0.5,
            tau2: 15,
            tau3: 0.7,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct TrustConfig {
    /// Applied to keys registered without an explicit level.
    pub default_level: TrustLevel,
}

impl Default for TrustConfig {
    fn default() -> Self {
        Self {
            default_level: TrustLevel::Untrusted,
        }
    }
}

/// Repo-level configuration, one instance per opened repository.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct RepoConfig {
    pub author: AuthorConfig,
    pub core: CoreConfig,
    pub gc: GcConfig,
    pub signing: SigningConfig,
    pub encryption: EncryptionConfig,
    pub merge: MergeConfig,
    pub pack: PackSection,
    pub similarity: SimilarityConfig,
    pub trust: TrustConfig,
}

impl RepoConfig {
    /// Load config from `path`, falling back to defaults when absent.
    pub fn load(path: &Path) -> Result<RepoConfig, MemError> {
        if !path.exists() {
            return Ok(RepoConfig::default());
        }
        let text = fs::read_to_string(path)?;
        let config: RepoConfig = serde_json::from_str(&text)
            .map_err(|e| MemError::InvalidConfig(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Persist config as pretty JSON via atomic replace.
    pub fn save(&self, path: &Path) -> Result<(), MemError> {
        self.validate()?;
        let text = serde_json::to_vec_pretty(self)
            .map_err(|e| MemError::InvalidConfig(e.to_string()))?;
        atomic_write(path, &text)?;
        Ok(())
    }

    /// Range-check every numeric knob.
    pub fn validate(&self) -> Result<(), MemError> {
        if self.core.default_branch.is_empty() {
            return Err(MemError::InvalidConfig(
                "core.default_branch must not be empty".to_string(),
            ));
        }
        if self.pack.delta.max_chain == 0 || self.pack.delta.max_chain > MAX_DELTA_CHAIN {
            return Err(MemError::InvalidConfig(format!(
                "pack.delta.max_chain must be in 1..={MAX_DELTA_CHAIN}"
            )));
        }
        if !(0.0..=1.0).contains(&self.similarity.tau1) {
            return Err(MemError::InvalidConfig(
                "similarity.tau1 must be in 0..=1".to_string(),
            ));
        }
        if self.similarity.tau2 > 64 {
            return Err(MemError::InvalidConfig(
                "similarity.tau2 must be in 0..=64".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.similarity.tau3) {
            return Err(MemError::InvalidConfig(
                "similarity.tau3 must be in 0..=1".to_string(),
            ));
        }
        if self.gc.prune_days < 0 {
            return Err(MemError::InvalidConfig(
                "gc.prune_days must not be negative".to_string(),
            ));
        }
        Ok(())
    }

    /// Effective merge strategy for a class, honoring overrides.
    pub fn merge_strategy_for(&self, class: MemoryClass) -> StrategyKind {
        self.merge
            .strategy_override
            .get(&class)
            .copied()
            .unwrap_or_else(|| StrategyKind::default_for(class))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Defaults match the documented thresholds.
    #[test]
    fn test_defaults() {
        let config = RepoConfig::default();
        assert_eq!(config.core.default_branch, "main");
        assert_eq!(config.similarity.tau1, 0.5);
        assert_eq!(config.similarity.tau2, 15);
        assert_eq!(config.similarity.tau3, 0.7);
        assert_eq!(config.pack.delta.max_chain, 16);
        assert_eq!(config.encryption.kdf.memory, 65536);
        assert_eq!(config.encryption.kdf.passes, 3);
        config.validate().unwrap();
    }

    /// Save-then-load round-trips, unknown values are rejected.
    #[test]
    fn test_save_load_validate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config");

        let mut config = RepoConfig::default();
        config.author.name = "curator".to_string();
        config
            .merge
            .strategy_override
            .insert(MemoryClass::Procedural, StrategyKind::Consolidate);
        config.save(&path).unwrap();

        let loaded = RepoConfig::load(&path).unwrap();
        assert_eq!(loaded.author.name, "curator");
        assert_eq!(
            loaded.merge_strategy_for(MemoryClass::Procedural),
            StrategyKind::Consolidate
        );
        assert_eq!(
            loaded.merge_strategy_for(MemoryClass::Episodic),
            StrategyKind::ChronologicalAppend
        );

        config.pack.delta.max_chain = 99;
        assert!(matches!(
            config.validate(),
            Err(MemError::InvalidConfig(_))
        ));
    }

    /// Missing file yields defaults.
    #[test]
    fn test_load_missing() {
        let dir = tempfile::tempdir().unwrap();
        let config = RepoConfig::load(&dir.path().join("nope")).unwrap();
        assert!(config.core.compression);
    }
}
