use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// The stable identifier of a version.
///
/// Doubles as the spec filename and the workspace directory name, so the
/// charset is restricted to `[A-Za-z0-9._-]+`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VersionId(String);

impl VersionId {
    pub fn new(id: impl Into<String>) -> Result<Self, InvalidVersionId> {
        let id = id.into();
        if id.is_empty() {
            return Err(InvalidVersionId::Empty);
        }
        if let Some(c) = id
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
        {
            return Err(InvalidVersionId::ForbiddenCharacter { id, c });
        }
        // `.` and `..` would alias directory entries.
        if id.chars().all(|c| c == '.') {
            return Err(InvalidVersionId::ForbiddenCharacter { id, c: '.' });
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for VersionId {
    type Err = InvalidVersionId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl Display for VersionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for VersionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Serialize for VersionId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for VersionId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let id = String::deserialize(deserializer)?;
        Self::new(id).map_err(D::Error::custom)
    }
}

#[derive(Debug, Error)]
pub enum InvalidVersionId {
    #[error("Version ids may not be empty")]
    Empty,
    #[error("Invalid character `{c}` in version id `{id}`")]
    ForbiddenCharacter { id: String, c: char },
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::VersionId;

    #[test]
    fn accepts_the_documented_charset() {
        for ok in ["v1", "sdxl-base_1.0", "A.B-c_9"] {
            assert!(VersionId::from_str(ok).is_ok(), "{ok}");
        }
    }

    #[test]
    fn rejects_separators_and_traversal() {
        for bad in ["", "a/b", "a b", "über", "..", ".", "a\\b"] {
            assert!(VersionId::from_str(bad).is_err(), "{bad}");
        }
    }
}
