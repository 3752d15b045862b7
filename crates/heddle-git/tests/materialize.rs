//! End-to-end resolution and materialization against a local repository.

use std::path::Path;
use std::process::Command;

use heddle_cache::{Cache, RepositoryUrl};
use heddle_git::{GitError, GitResolver};

fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

fn git(dir: &Path, args: &[&str]) {
    let output = Command::new("git")
        .current_dir(dir)
        .args([
            "-c",
            "user.name=test",
            "-c",
            "user.email=test@example.com",
            "-c",
            "init.defaultBranch=main",
        ])
        .args(args)
        .output()
        .expect("failed to run git");
    assert!(
        output.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

/// A throwaway upstream with one commit, addressable as `file://`.
fn make_upstream(dir: &Path) -> RepositoryUrl {
    git(dir, &["init", "--quiet"]);
    fs_err::write(dir.join("README.md"), "upstream\n").unwrap();
    git(dir, &["add", "README.md"]);
    git(dir, &["commit", "--quiet", "-m", "initial"]);
    RepositoryUrl::parse(&format!("file://{}", dir.display())).unwrap()
}

#[tokio::test]
async fn resolve_materialize_and_reuse() {
    if !git_available() {
        eprintln!("git not available, skipping");
        return;
    }

    let upstream_dir = tempfile::tempdir().unwrap();
    let repo = make_upstream(upstream_dir.path());

    let cache_dir = tempfile::tempdir().unwrap();
    let cache = Cache::from_path(cache_dir.path()).unwrap();
    let resolver = GitResolver::new(cache.clone(), false);

    let commit = resolver.resolve(&repo, "HEAD").await.unwrap();
    assert_eq!(commit.len(), 40);

    // Resolving a full hash is a no-op.
    assert_eq!(resolver.resolve(&repo, &commit).await.unwrap(), commit);

    let entry = resolver.materialize(&repo, &commit).await.unwrap();
    assert!(entry.join("README.md").is_file());
    assert!(entry
        .file_name()
        .unwrap()
        .to_str()
        .unwrap()
        .ends_with(&format!("@{commit}")));

    // Idempotent: the second call returns the same ready entry.
    let again = resolver.materialize(&repo, &commit).await.unwrap();
    assert_eq!(entry, again);

    // Offline: the materialized entry answers, unknown commits do not.
    let offline = GitResolver::new(cache, true);
    assert_eq!(offline.materialize(&repo, &commit).await.unwrap(), entry);
    assert_eq!(offline.resolve(&repo, "HEAD").await.unwrap(), commit);
    let missing = "0123456789012345678901234567890123456789";
    assert!(matches!(
        offline.materialize(&repo, missing).await,
        Err(GitError::OfflineUnavailable(_))
    ));
}

#[tokio::test]
async fn unknown_ref_is_reported() {
    if !git_available() {
        eprintln!("git not available, skipping");
        return;
    }

    let upstream_dir = tempfile::tempdir().unwrap();
    let repo = make_upstream(upstream_dir.path());

    let cache_dir = tempfile::tempdir().unwrap();
    let cache = Cache::from_path(cache_dir.path()).unwrap();
    let resolver = GitResolver::new(cache, false);

    assert!(matches!(
        resolver.resolve(&repo, "no-such-branch").await,
        Err(GitError::RefNotFound { .. })
    ));
}
