use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::trace;

/// Project a cache entry into a workspace as a symlink at `target`.
///
/// The store owns the bytes; workspaces hold re-pointable references. A
/// pre-existing symlink at `target` is replaced atomically. A pre-existing
/// regular file or directory is refused unless `overwrite` is set, so that a
/// user's stray data is never silently shadowed.
pub fn project(entry: &Path, target: &Path, overwrite: bool) -> Result<(), ProjectionError> {
    match target.symlink_metadata() {
        Ok(metadata) if !metadata.file_type().is_symlink() => {
            if !overwrite {
                return Err(ProjectionError::Conflict {
                    target: target.to_path_buf(),
                });
            }
            if metadata.is_dir() {
                fs_err::remove_dir_all(target)?;
            } else {
                fs_err::remove_file(target)?;
            }
        }
        Ok(_) | Err(_) => {}
    }
    heddle_fs::replace_symlink(entry, target)?;
    trace!("Projected {} -> {}", target.display(), entry.display());
    Ok(())
}

#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("Refusing to replace {target}: it exists and is not a managed symlink (pass --overwrite to replace it)")]
    Conflict { target: PathBuf },
    #[error(transparent)]
    Io(#[from] io::Error),
}
