use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest as _, Sha256, Sha512};
use thiserror::Error;

/// The hash algorithms accepted in `<algo>:<hex>` checksum declarations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DigestAlgorithm {
    Sha256,
    Sha512,
}

impl DigestAlgorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
        }
    }

    /// The expected length of the hex form.
    fn hex_len(self) -> usize {
        match self {
            Self::Sha256 => 64,
            Self::Sha512 => 128,
        }
    }
}

/// A content checksum in `<algo>:<hex>` form.
///
/// The hex half is lower-cased on parse so that equal digests compare equal
/// regardless of how the user wrote them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Digest {
    algorithm: DigestAlgorithm,
    hex: String,
}

impl Digest {
    pub fn new(algorithm: DigestAlgorithm, hex: impl Into<String>) -> Result<Self, DigestParseError> {
        let hex = hex.into().to_ascii_lowercase();
        if hex.len() != algorithm.hex_len() || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(DigestParseError::InvalidHex {
                algorithm: algorithm.as_str(),
                hex,
            });
        }
        Ok(Self { algorithm, hex })
    }

    /// Hash `bytes` with SHA-256.
    pub fn sha256(bytes: &[u8]) -> Self {
        Self {
            algorithm: DigestAlgorithm::Sha256,
            hex: hex::encode(Sha256::digest(bytes)),
        }
    }

    /// Hash `bytes` with SHA-512.
    pub fn sha512(bytes: &[u8]) -> Self {
        Self {
            algorithm: DigestAlgorithm::Sha512,
            hex: hex::encode(Sha512::digest(bytes)),
        }
    }

    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    pub fn hex(&self) -> &str {
        &self.hex
    }
}

impl FromStr for Digest {
    type Err = DigestParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (algo, hex) = s
            .split_once(':')
            .ok_or_else(|| DigestParseError::MissingSeparator(s.to_string()))?;
        let algorithm = match algo {
            "sha256" => DigestAlgorithm::Sha256,
            "sha512" => DigestAlgorithm::Sha512,
            _ => return Err(DigestParseError::UnsupportedAlgorithm(algo.to_string())),
        };
        Self::new(algorithm, hex)
    }
}

impl Display for Digest {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.algorithm.as_str(), self.hex)
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_str(&s).map_err(D::Error::custom)
    }
}

#[derive(Debug, Error)]
pub enum DigestParseError {
    #[error("Expected `<algo>:<hex>`, missing `:` in `{0}`")]
    MissingSeparator(String),
    #[error("Unsupported checksum algorithm `{0}` (expected `sha256` or `sha512`)")]
    UnsupportedAlgorithm(String),
    #[error("Invalid {algorithm} hex digest `{hex}`")]
    InvalidHex { algorithm: &'static str, hex: String },
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::Digest;

    #[test]
    fn round_trips_and_lowercases() {
        let upper = format!("sha256:{}", "AB".repeat(32));
        let digest = Digest::from_str(&upper).unwrap();
        assert_eq!(digest.to_string(), format!("sha256:{}", "ab".repeat(32)));
    }

    #[test]
    fn rejects_malformed_inputs() {
        assert!(Digest::from_str("deadbeef").is_err());
        assert!(Digest::from_str("md5:d41d8cd98f00b204e9800998ecf8427e").is_err());
        assert!(Digest::from_str("sha256:abcd").is_err());
        assert!(Digest::from_str(&format!("sha256:{}", "zz".repeat(32))).is_err());
    }

    #[test]
    fn hashes_bytes() {
        let digest = Digest::sha256(b"");
        assert_eq!(
            digest.hex(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
