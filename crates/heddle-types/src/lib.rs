pub use digest::{Digest, DigestAlgorithm, DigestParseError};
pub use error_kind::ErrorKind;
pub use version_id::{InvalidVersionId, VersionId};

mod digest;
mod error_kind;
mod version_id;
