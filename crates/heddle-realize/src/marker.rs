use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// The `.env_marker` file: which lock a workspace was last fully realized
/// from. Its absence or mismatch forces the realization phases to run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Marker {
    pub version_id: String,
    pub lock_digest: String,
}

impl Marker {
    pub fn load_optional(path: &Path) -> io::Result<Option<Self>> {
        let contents = match fs_err::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err),
        };
        // A corrupt marker is treated as absent; realization will rewrite it.
        Ok(serde_json::from_str(&contents).ok())
    }

    pub fn save(&self, path: &Path) -> io::Result<()> {
        let contents =
            serde_json::to_string_pretty(self).expect("markers always serialize") + "\n";
        heddle_fs::write_atomic_sync(path, contents)
    }
}

#[cfg(test)]
mod tests {
    use super::Marker;

    #[test]
    fn round_trips_and_tolerates_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env_marker");
        assert_eq!(Marker::load_optional(&path).unwrap(), None);

        let marker = Marker {
            version_id: "v1".to_string(),
            lock_digest: "ab".repeat(32),
        };
        marker.save(&path).unwrap();
        assert_eq!(Marker::load_optional(&path).unwrap(), Some(marker));

        fs_err::write(&path, "not json").unwrap();
        assert_eq!(Marker::load_optional(&path).unwrap(), None);
    }
}
