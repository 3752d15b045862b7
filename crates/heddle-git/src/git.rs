use std::io;
use std::path::Path;
use std::process::Stdio;

use tracing::trace;

/// Run `git` with `args`, capturing output.
///
/// Returns `Ok(Ok(stdout))` on success, `Ok(Err(stderr))` on a non-zero exit
/// and `Err` only when the process could not be spawned or awaited.
pub(crate) async fn git<'a>(
    cwd: Option<&Path>,
    args: impl IntoIterator<Item = &'a str>,
) -> io::Result<Result<String, String>> {
    let mut command = tokio::process::Command::new("git");
    if let Some(cwd) = cwd {
        command.current_dir(cwd);
    }
    command
        .args(args)
        // Never fall into an interactive credential prompt on a worker.
        .env("GIT_TERMINAL_PROMPT", "0")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    trace!("Running {command:?}");
    let output = command.output().await?;
    if output.status.success() {
        Ok(Ok(String::from_utf8_lossy(&output.stdout).into_owned()))
    } else {
        Ok(Err(String::from_utf8_lossy(&output.stderr).into_owned()))
    }
}

/// Whether `reference` is already a full commit hash.
pub fn looks_like_commit(reference: &str) -> bool {
    reference.len() == 40 && reference.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Pick the commit for `reference` out of `git ls-remote` output.
///
/// Annotated tags list both the tag object and the peeled `^{}` commit; the
/// peeled hash wins. `HEAD` and fully qualified refs match verbatim.
pub(crate) fn parse_ls_remote(stdout: &str, reference: &str) -> Option<String> {
    let mut plain = None;
    let mut peeled = None;
    for line in stdout.lines() {
        let Some((hash, name)) = line.split_once('\t') else {
            continue;
        };
        let hash = hash.trim();
        if !looks_like_commit(hash) {
            continue;
        }
        if name == format!("refs/tags/{reference}^{{}}") {
            peeled = Some(hash.to_string());
        } else if name == reference
            || name == format!("refs/heads/{reference}")
            || name == format!("refs/tags/{reference}")
        {
            plain.get_or_insert_with(|| hash.to_string());
        }
    }
    peeled.or(plain)
}

#[cfg(test)]
mod tests {
    use super::{looks_like_commit, parse_ls_remote};

    const HASH_A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const HASH_B: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

    #[test]
    fn commit_detection() {
        assert!(looks_like_commit(HASH_A));
        assert!(looks_like_commit(&"0123456789abcdef".repeat(5)[..40]));
        assert!(!looks_like_commit("main"));
        assert!(!looks_like_commit("v1.2.3"));
        assert!(!looks_like_commit(&HASH_A[..39]));
    }

    #[test]
    fn branch_resolution() {
        let output = format!("{HASH_A}\trefs/heads/main\n{HASH_B}\trefs/heads/maintenance\n");
        assert_eq!(parse_ls_remote(&output, "main").as_deref(), Some(HASH_A));
    }

    #[test]
    fn annotated_tag_prefers_peeled() {
        let output = format!("{HASH_A}\trefs/tags/v1.0\n{HASH_B}\trefs/tags/v1.0^{{}}\n");
        assert_eq!(parse_ls_remote(&output, "v1.0").as_deref(), Some(HASH_B));
    }

    #[test]
    fn head_matches_verbatim() {
        let output = format!("{HASH_A}\tHEAD\n{HASH_A}\trefs/heads/main\n");
        assert_eq!(parse_ls_remote(&output, "HEAD").as_deref(), Some(HASH_A));
    }

    #[test]
    fn missing_ref_is_none() {
        let output = format!("{HASH_A}\trefs/heads/main\n");
        assert_eq!(parse_ls_remote(&output, "release"), None);
    }
}
