use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, instrument, warn};

use heddle_client::Fetcher;

use crate::HandlerError;

/// Inputs staged for one request.
///
/// Materialized names are prefixed with the request id and a random token,
/// so concurrent jobs on the same workspace never collide and cleanup can
/// identify exactly its own files.
#[derive(Debug)]
pub struct StagedInputs {
    request_id: String,
    input_dir: PathBuf,
    /// Logical name (as the graph references it) to materialized file name.
    mapping: BTreeMap<String, String>,
}

impl StagedInputs {
    pub fn mapping(&self) -> &BTreeMap<String, String> {
        &self.mapping
    }

    /// Delete exactly this request's files; other requests' are untouched.
    pub fn cleanup(&self) {
        cleanup_request(&self.input_dir, &self.request_id);
    }
}

/// Fetch every declared input and link it into the workspace input directory
/// under a request-unique name.
///
/// On failure, inputs already materialized for this request are unlinked
/// before the error surfaces; a failed staging leaves nothing behind.
#[instrument(skip_all, fields(request_id = %request_id))]
pub async fn stage_inputs(
    fetcher: &Fetcher,
    input_dir: &Path,
    request_id: &str,
    inputs: &BTreeMap<String, String>,
) -> Result<StagedInputs, HandlerError> {
    fs_err::create_dir_all(input_dir)?;
    let mut staged = StagedInputs {
        request_id: request_id.to_string(),
        input_dir: input_dir.to_path_buf(),
        mapping: BTreeMap::new(),
    };
    for (logical, url) in inputs {
        let blob = match fetcher.fetch(url, None).await {
            Ok(blob) => blob,
            Err(err) => {
                staged.cleanup();
                return Err(HandlerError::Staging {
                    name: logical.clone(),
                    source: err,
                });
            }
        };
        let materialized = materialized_name(request_id, logical);
        if let Err(err) = heddle_fs::replace_symlink(&blob, &input_dir.join(&materialized)) {
            staged.cleanup();
            return Err(err.into());
        }
        debug!("Staged `{logical}` as `{materialized}`");
        staged.mapping.insert(logical.clone(), materialized);
    }
    Ok(staged)
}

/// `<request_id>_<rand8>_<original_name>`, with the original name reduced to
/// its final component.
fn materialized_name(request_id: &str, logical: &str) -> String {
    let base = logical.rsplit(['/', '\\']).next().unwrap_or(logical);
    let token: String = std::iter::repeat_with(fastrand::alphanumeric)
        .take(8)
        .collect();
    format!("{request_id}_{token}_{base}")
}

/// Remove every file in `input_dir` owned by `request_id`.
pub fn cleanup_request(input_dir: &Path, request_id: &str) {
    let prefix = format!("{request_id}_");
    let entries = match fs_err::read_dir(input_dir) {
        Ok(entries) => entries,
        Err(_) => return,
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if name.starts_with(&prefix) {
            if let Err(err) = fs_err::remove_file(entry.path()) {
                warn!("Failed to remove staged input {name}: {err}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use heddle_cache::Cache;
    use heddle_client::FetcherBuilder;

    use super::{cleanup_request, materialized_name, stage_inputs};
    use crate::HandlerError;

    #[test]
    fn materialized_names_are_request_scoped_and_flat() {
        let name = materialized_name("req-1", "subdir/img1.png");
        assert!(name.starts_with("req-1_"));
        assert!(name.ends_with("_img1.png"));
        assert!(!name.contains('/'));
        // The random token keeps two stagings of the same logical name apart.
        assert_ne!(name, materialized_name("req-1", "subdir/img1.png"));
    }

    #[tokio::test]
    async fn staging_isolates_and_cleanup_is_exact() {
        let scratch = tempfile::tempdir().unwrap();
        let cache = Cache::from_path(scratch.path().join("cache")).unwrap();
        let fetcher = FetcherBuilder::new(cache).build();

        let image_a = scratch.path().join("a.png");
        fs_err::write(&image_a, "aaaa").unwrap();
        let image_b = scratch.path().join("b.png");
        fs_err::write(&image_b, "bbbb").unwrap();

        let input_dir = scratch.path().join("workspace/input");
        // Two concurrent jobs declare the same logical name.
        let job1 = stage_inputs(
            &fetcher,
            &input_dir,
            "job1",
            &BTreeMap::from([(
                "img1.png".to_string(),
                image_a.to_str().unwrap().to_string(),
            )]),
        )
        .await
        .unwrap();
        let job2 = stage_inputs(
            &fetcher,
            &input_dir,
            "job2",
            &BTreeMap::from([(
                "img1.png".to_string(),
                image_b.to_str().unwrap().to_string(),
            )]),
        )
        .await
        .unwrap();

        let staged1 = input_dir.join(&job1.mapping()["img1.png"]);
        let staged2 = input_dir.join(&job2.mapping()["img1.png"]);
        assert_ne!(staged1, staged2);
        assert_eq!(fs_err::read(&staged1).unwrap(), b"aaaa");
        assert_eq!(fs_err::read(&staged2).unwrap(), b"bbbb");

        // Job 1's cleanup leaves job 2 alone.
        job1.cleanup();
        assert!(!staged1.exists());
        assert_eq!(fs_err::read(&staged2).unwrap(), b"bbbb");

        cleanup_request(&input_dir, "job2");
        assert_eq!(fs_err::read_dir(&input_dir).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn a_failed_fetch_unwinds_partial_staging() {
        let scratch = tempfile::tempdir().unwrap();
        let cache = Cache::from_path(scratch.path().join("cache")).unwrap();
        let fetcher = FetcherBuilder::new(cache).build();

        let first = scratch.path().join("first.png");
        fs_err::write(&first, "aaaa").unwrap();
        let last = scratch.path().join("last.png");
        fs_err::write(&last, "cccc").unwrap();
        // The middle input points at a file that does not exist.
        let missing = scratch.path().join("missing.png");

        let inputs = BTreeMap::from([
            (
                "a.png".to_string(),
                first.to_str().unwrap().to_string(),
            ),
            (
                "b.png".to_string(),
                missing.to_str().unwrap().to_string(),
            ),
            (
                "c.png".to_string(),
                last.to_str().unwrap().to_string(),
            ),
        ]);
        let input_dir = scratch.path().join("workspace/input");
        let err = stage_inputs(&fetcher, &input_dir, "job1", &inputs)
            .await
            .unwrap_err();
        match err {
            HandlerError::Staging { name, .. } => assert_eq!(name, "b.png"),
            other => panic!("expected Staging, got {other:?}"),
        }
        // `a.png` had already been materialized; the failure unwound it.
        assert_eq!(fs_err::read_dir(&input_dir).unwrap().count(), 0);
    }
}
