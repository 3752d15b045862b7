//! The version spec and resolved lock data model.
//!
//! A spec is user-authored and frozen once written; the resolver pins its
//! floating refs into a lock, which the realizer consumes. Both serialize as
//! canonical JSON (sorted keys, two-space indent, trailing newline) so that
//! unchanged inputs produce byte-identical outputs.

pub use canonical::{canonical_compact, canonical_pretty};
pub use env_expand::expand_vars;
pub use error::SpecError;
pub use lock::{LockedModel, LockedSource, ResolvedLock};
pub use model::{ModelEntry, SourcePin, SpecOptions, VersionSpec, SCHEMA_VERSION};
pub use resolver::SpecResolver;
pub use validate::validate_spec;

mod canonical;
mod env_expand;
mod error;
mod lock;
mod model;
mod resolver;
mod validate;
