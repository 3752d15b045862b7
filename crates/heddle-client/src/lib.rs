//! Multi-scheme content downloads and object-store uploads.
//!
//! The fetcher resolves source URIs to verified local blobs in the shared
//! store; the uploader is its inverse, pushing job artifacts out with the
//! same retry discipline.

pub use error::{FetchError, UploadError};
pub use fetcher::{Fetcher, FetcherBuilder};
pub use source::FetchSource;
pub use uploader::{UploadPolicy, UploadedObject, Uploader};

mod error;
mod fetcher;
mod source;
mod uploader;
