//! Resolution: pinning, normalization, idempotent persistence.

use std::path::Path;
use std::process::Command;

use heddle_cache::Cache;
use heddle_git::GitResolver;
use heddle_spec::{SpecResolver, VersionSpec};

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

fn resolver(cache: &Cache, offline: bool) -> SpecResolver {
    SpecResolver::new(cache.clone(), GitResolver::new(cache.clone(), offline))
}

#[tokio::test]
async fn pinned_commits_resolve_without_network() {
    let commit = "0123456789012345678901234567890123456789";
    let spec: VersionSpec = serde_json::from_str(&format!(
        r#"{{
          "schema_version": 2,
          "version_id": "pinned",
          "engine_source": {{"repo": "https://github.com/acme/engine", "commit": "{commit}"}},
          "models": [
            {{"source": "https://example.com/weights/sd15.safetensors", "target_subdir": "checkpoints"}},
            {{"source": "hub://org/repo@v1/vae/ft-mse.bin", "name": "vae.bin", "target_subdir": "vae/"}},
            {{"source": "https://example.com/x.bin", "target_path": "unet/custom/x.bin"}}
          ]
        }}"#
    ))
    .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let cache = Cache::from_path(dir.path()).unwrap();
    // Offline: proves that commit-pinned specs never need the network.
    let lock = resolver(&cache, true).resolve(&spec).await.unwrap();

    assert_eq!(lock.engine_source.commit, commit);
    assert_eq!(lock.models[0].name, "sd15.safetensors");
    assert_eq!(lock.models[0].target_path, "checkpoints/sd15.safetensors");
    assert_eq!(lock.models[1].name, "vae.bin");
    assert_eq!(lock.models[1].target_path, "vae/vae.bin");
    assert_eq!(lock.models[2].target_path, "unet/custom/x.bin");
    assert_eq!(lock.spec_digest, spec.digest().unwrap());
}

#[tokio::test]
async fn repeated_resolution_is_byte_identical_until_upstream_moves() {
    if !git_available() {
        eprintln!("git not available, skipping");
        return;
    }

    let upstream = tempfile::tempdir().unwrap();
    git(upstream.path(), &["init", "--quiet"]);
    fs_err::write(upstream.path().join("main.py"), "print('engine')\n").unwrap();
    git(upstream.path(), &["add", "main.py"]);
    git(upstream.path(), &["commit", "--quiet", "-m", "one"]);

    let spec: VersionSpec = serde_json::from_str(&format!(
        r#"{{
          "schema_version": 2,
          "version_id": "floating",
          "engine_source": {{"repo": "file://{}", "ref": "HEAD"}}
        }}"#,
        upstream.path().display()
    ))
    .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let cache = Cache::from_path(dir.path()).unwrap();
    let resolver = resolver(&cache, false);

    let (first, updated) = resolver.resolve_and_store(&spec).await.unwrap();
    assert!(updated);
    assert_eq!(first.resolved_at, 1);
    let lock_path = resolver.lock_path(&spec.version_id);
    let first_bytes = fs_err::read(&lock_path).unwrap();

    // No upstream movement: identical bytes, no rewrite.
    let (second, updated) = resolver.resolve_and_store(&spec).await.unwrap();
    assert!(!updated);
    assert!(second.same_resolution(&first));
    assert_eq!(fs_err::read(&lock_path).unwrap(), first_bytes);

    // Upstream advances: the lock follows and the sequence bumps.
    fs_err::write(upstream.path().join("main.py"), "print('engine v2')\n").unwrap();
    git(upstream.path(), &["add", "main.py"]);
    git(upstream.path(), &["commit", "--quiet", "-m", "two"]);

    let (third, updated) = resolver.resolve_and_store(&spec).await.unwrap();
    assert!(updated);
    assert_ne!(third.engine_source.commit, first.engine_source.commit);
    assert_eq!(third.resolved_at, 2);
    // The spec itself did not change.
    assert_eq!(third.spec_digest, first.spec_digest);
}
