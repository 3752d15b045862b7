use std::path::{Path, PathBuf};

use tracing::debug;

use crate::VenvError;

/// Locate the base interpreter for venv creation.
///
/// An explicit `python` may be a bare name (resolved on `PATH`) or a path;
/// without one, `python3` is preferred over `python`.
pub fn find_python(python: Option<&Path>) -> Result<PathBuf, VenvError> {
    if let Some(python) = python {
        // A path with separators is taken as written.
        if python.components().count() > 1 {
            debug!("Using interpreter path {}", python.display());
            return Ok(python.to_path_buf());
        }
        return which::which(python)
            .map_err(|err| VenvError::NoInterpreter(format!("{}: {err}", python.display())));
    }
    which::which("python3")
        .or_else(|_| which::which("python"))
        .map_err(|err| VenvError::NoInterpreter(err.to_string()))
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::find_python;

    #[test]
    fn explicit_paths_are_taken_verbatim() {
        let python = find_python(Some(Path::new("/opt/py/bin/python3.11"))).unwrap();
        assert_eq!(python, Path::new("/opt/py/bin/python3.11"));
    }

    #[test]
    fn missing_named_interpreter_is_an_error() {
        assert!(find_python(Some(Path::new("python-that-does-not-exist"))).is_err());
    }
}
