//! Author/committer signature lines in commit objects.
//!
//! Canonical form is `author <name> <<email>> <secs>.<nanos> +0000` — UTC
//! with sub-second precision, so two commits in the same second still order
//! deterministically along a parent chain.

use std::fmt::Display;
use std::str::FromStr;

use bincode::{Decode, Encode};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::MemError;

/// Whether the signature line is the author or the committer line.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Serialize, Deserialize, Encode, Decode)]
pub enum SignatureType {
    Author,
    Committer,
}

impl SignatureType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignatureType::Author => "author",
            SignatureType::Committer => "committer",
        }
    }

    pub fn from_data(data: &[u8]) -> Result<SignatureType, MemError> {
        match data {
            b"author" => Ok(SignatureType::Author),
            b"committer" => Ok(SignatureType::Committer),
            _ => Err(MemError::InvalidObjectInfo(format!(
                "unknown signature type `{}`",
                String::from_utf8_lossy(data)
            ))),
        }
    }
}

/// One signature line: role, identity, and UTC timestamp.
#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct Signature {
    pub signature_type: SignatureType,
    pub name: String,
    pub email: String,
    pub timestamp: DateTime<Utc>,
}

impl Display for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "{} <{}> {}",
            self.name,
            self.email,
            self.timestamp.to_rfc3339()
        )
    }
}

impl Signature {
    pub fn new(
        signature_type: SignatureType,
        name: String,
        email: String,
        timestamp: DateTime<Utc>,
    ) -> Signature {
        Signature {
            signature_type,
            name,
            email,
            timestamp,
        }
    }

    /// Author signature stamped now.
    pub fn author_now(name: &str, email: &str) -> Signature {
        Signature::new(
            SignatureType::Author,
            name.to_string(),
            email.to_string(),
            Utc::now(),
        )
    }

    /// Committer signature stamped now.
    pub fn committer_now(name: &str, email: &str) -> Signature {
        Signature::new(
            SignatureType::Committer,
            name.to_string(),
            email.to_string(),
            Utc::now(),
        )
    }

    /// Canonical line form:
    /// `<role> <name> <<email>> <secs>.<nanos> +0000`.
    pub fn to_data(&self) -> Result<Vec<u8>, MemError> {
        let line = format!(
            "{} {} <{}> {}.{:09} +0000",
            self.signature_type.as_str(),
            self.name,
            self.email,
            self.timestamp.timestamp(),
            self.timestamp.timestamp_subsec_nanos(),
        );
        Ok(line.into_bytes())
    }

    /// Parse a canonical signature line.
    pub fn from_data(data: Vec<u8>) -> Result<Signature, MemError> {
        let text = String::from_utf8(data)
            .map_err(|e| MemError::InvalidObjectInfo(format!("signature not utf-8: {e}")))?;
        let text = text.trim_end();

        let (role, rest) = text
            .split_once(' ')
            .ok_or_else(|| MemError::InvalidObjectInfo(format!("bad signature `{text}`")))?;
        let signature_type = SignatureType::from_data(role.as_bytes())?;

        let email_start = rest
            .find('<')
            .ok_or_else(|| MemError::InvalidObjectInfo(format!("bad signature `{text}`")))?;
        let email_end = rest
            .find('>')
            .ok_or_else(|| MemError::InvalidObjectInfo(format!("bad signature `{text}`")))?;
        if email_end < email_start {
            return Err(MemError::InvalidObjectInfo(format!("bad signature `{text}`")));
        }
        let name = rest[..email_start].trim().to_string();
        let email = rest[email_start + 1..email_end].to_string();

        let stamp = rest[email_end + 1..].trim();
        let stamp = stamp.split(' ').next().unwrap_or("");
        let (secs, nanos) = match stamp.split_once('.') {
            Some((s, n)) => (
                i64::from_str(s)
                    .map_err(|_| MemError::InvalidObjectInfo(format!("bad timestamp `{stamp}`")))?,
                u32::from_str(n)
                    .map_err(|_| MemError::InvalidObjectInfo(format!("bad timestamp `{stamp}`")))?,
            ),
            None => (
                i64::from_str(stamp)
                    .map_err(|_| MemError::InvalidObjectInfo(format!("bad timestamp `{stamp}`")))?,
                0,
            ),
        };
        let timestamp = Utc
            .timestamp_opt(secs, nanos)
            .single()
            .ok_or_else(|| MemError::InvalidObjectInfo(format!("bad timestamp `{stamp}`")))?;

        Ok(Signature {
            signature_type,
            name,
            email,
            timestamp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Canonical encode/parse round-trips with sub-second precision.
    #[test]
    fn test_signature_roundtrip() {
        let ts = Utc.timestamp_opt(1_767_225_600, 123_456_789).unwrap();
        let sig = Signature::new(
            SignatureType::Author,
            "curator".to_string(),
            "curator@agents.local".to_string(),
            ts,
        );
        let data = sig.to_data().unwrap();
        assert_eq!(
            String::from_utf8_lossy(&data),
            "author curator <curator@agents.local> 1767225600.123456789 +0000"
        );
        let parsed = Signature::from_data(data).unwrap();
        assert_eq!(parsed, sig);
    }

    /// Committer role parses and whole-second stamps are accepted.
    #[test]
    fn test_committer_without_nanos() {
        let parsed =
            Signature::from_data(b"committer mem <agent@localhost> 1767225600 +0000".to_vec())
                .unwrap();
        assert_eq!(parsed.signature_type, SignatureType::Committer);
        assert_eq!(parsed.name, "mem");
        assert_eq!(parsed.email, "agent@localhost");
        assert_eq!(parsed.timestamp.timestamp(), 1_767_225_600);
        assert_eq!(parsed.timestamp.timestamp_subsec_nanos(), 0);
    }

    /// Unknown roles and malformed lines are rejected.
    #[test]
    fn test_invalid_signature() {
        assert!(Signature::from_data(b"tagger x <x@y> 1 +0000".to_vec()).is_err());
        assert!(Signature::from_data(b"author missing-brackets 1".to_vec()).is_err());
    }
}
