//! Append-only history of HEAD movements, one record per line:
//!
//! ```text
//! <prev hex> <new hex> <op> <rfc3339 timestamp> <message>
//! ```
//!
//! The zero hash stands in for "no previous commit" on the first record.
//! Entries newer than `gc.prune_days` act as GC reachability roots.

use std::fmt::Display;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::MemError;
use crate::hash::ObjectHash;

/// Operations that move HEAD.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefLogOp {
    Commit,
    Checkout,
    Merge,
    Reset,
    Branch,
}

impl RefLogOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefLogOp::Commit => "commit",
            RefLogOp::Checkout => "checkout",
            RefLogOp::Merge => "merge",
            RefLogOp::Reset => "reset",
            RefLogOp::Branch => "branch",
        }
    }

    pub fn parse(s: &str) -> Result<RefLogOp, MemError> {
        match s {
            "commit" => Ok(RefLogOp::Commit),
            "checkout" => Ok(RefLogOp::Checkout),
            "merge" => Ok(RefLogOp::Merge),
            "reset" => Ok(RefLogOp::Reset),
            "branch" => Ok(RefLogOp::Branch),
            _ => Err(MemError::InvalidObjectInfo(format!(
                "unknown reflog op `{s}`"
            ))),
        }
    }
}

impl Display for RefLogOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One HEAD movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefLogEntry {
    pub prev: ObjectHash,
    pub new: ObjectHash,
    pub op: RefLogOp,
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

impl RefLogEntry {
    fn to_line(&self) -> String {
        format!(
            "{} {} {} {} {}\n",
            self.prev,
            self.new,
            self.op,
            self.timestamp.to_rfc3339(),
            self.message.replace('\n', " "),
        )
    }

    fn from_line(line: &str) -> Result<RefLogEntry, MemError> {
        let mut parts = line.splitn(5, ' ');
        let mut next = |what: &str| {
            parts
                .next()
                .ok_or_else(|| MemError::InvalidObjectInfo(format!("reflog missing {what}")))
        };
        let prev = ObjectHash::from_str(next("prev hash")?)?;
        let new = ObjectHash::from_str(next("new hash")?)?;
        let op = RefLogOp::parse(next("op")?)?;
        let timestamp = DateTime::parse_from_rfc3339(next("timestamp")?)
            .map_err(|e| MemError::InvalidObjectInfo(format!("bad reflog timestamp: {e}")))?
            .with_timezone(&Utc);
        let message = parts.next().unwrap_or("").to_string();
        Ok(RefLogEntry {
            prev,
            new,
            op,
            timestamp,
            message,
        })
    }
}

/// File-backed reflog at `.mem/reflog`.
#[derive(Debug, Clone)]
pub struct RefLog {
    path: PathBuf,
}

impl RefLog {
    pub fn new(path: &Path) -> RefLog {
        RefLog {
            path: path.to_path_buf(),
        }
    }

    /// Append one record.
    pub fn append(
        &self,
        prev: ObjectHash,
        new: ObjectHash,
        op: RefLogOp,
        message: &str,
    ) -> Result<(), MemError> {
        let entry = RefLogEntry {
            prev,
            new,
            op,
            timestamp: Utc::now(),
            message: message.to_string(),
        };
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(entry.to_line().as_bytes())?;
        Ok(())
    }

    /// All records, oldest first.
    pub fn entries(&self) -> Result<Vec<RefLogEntry>, MemError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let text = fs::read_to_string(&self.path)?;
        text.lines()
            .filter(|line| !line.trim().is_empty())
            .map(RefLogEntry::from_line)
            .collect()
    }

    /// Records at most `days` old; GC reachability roots.
    pub fn entries_newer_than(&self, days: i64) -> Result<Vec<RefLogEntry>, MemError> {
        let cutoff = Utc::now() - Duration::days(days);
        Ok(self
            .entries()?
            .into_iter()
            .filter(|entry| entry.timestamp >= cutoff)
            .collect())
    }

    /// Most recent record, if any.
    pub fn last(&self) -> Result<Option<RefLogEntry>, MemError> {
        Ok(self.entries()?.into_iter().next_back())
    }
}
