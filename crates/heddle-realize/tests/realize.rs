//! End-to-end realization against local repositories and local model files.

use std::path::Path;
use std::process::Command;

use heddle_cache::Cache;
use heddle_client::FetcherBuilder;
use heddle_git::GitResolver;
use heddle_realize::{teardown, RealizeError, RealizeOptions, Realizer, Workspace};
use heddle_spec::{SpecResolver, VersionSpec};

fn tooling_available() -> bool {
    let has = |tool: &str| {
        Command::new(tool)
            .arg("--version")
            .output()
            .map(|output| output.status.success())
            .unwrap_or(false)
    };
    has("git") && has("python3")
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

fn make_engine_repo(dir: &Path) {
    git(dir, &["init", "--quiet"]);
    fs_err::write(dir.join("main.py"), "print('engine')\n").unwrap();
    git(dir, &["add", "main.py"]);
    git(dir, &["commit", "--quiet", "-m", "initial"]);
}

fn spec_json(id: &str, engine: &Path, models: &[(&str, &str)]) -> VersionSpec {
    let models = models
        .iter()
        .map(|(source, subdir)| {
            format!(r#"{{"source": "{source}", "target_subdir": "{subdir}"}}"#)
        })
        .collect::<Vec<_>>()
        .join(",");
    serde_json::from_str(&format!(
        r#"{{
          "schema_version": 2,
          "version_id": "{id}",
          "engine_source": {{"repo": "file://{}", "ref": "HEAD"}},
          "models": [{models}]
        }}"#,
        engine.display()
    ))
    .unwrap()
}

fn realizer(cache: &Cache, offline: bool) -> Realizer {
    Realizer::new(
        GitResolver::new(cache.clone(), offline),
        FetcherBuilder::new(cache.clone()).offline(offline).build(),
    )
}

#[tokio::test]
async fn realize_projects_shares_and_short_circuits() {
    if !tooling_available() {
        eprintln!("git or python3 not available, skipping");
        return;
    }

    let scratch = tempfile::tempdir().unwrap();
    let engine = scratch.path().join("upstream");
    fs_err::create_dir_all(&engine).unwrap();
    make_engine_repo(&engine);

    let model_file = scratch.path().join("sd15.safetensors");
    fs_err::write(&model_file, "model weights").unwrap();
    let model_uri = model_file.to_str().unwrap().to_string();

    let cache = Cache::from_path(scratch.path().join("cache")).unwrap();
    let spec = spec_json("v1", &engine, &[(&model_uri, "checkpoints")]);
    let resolver = SpecResolver::new(cache.clone(), GitResolver::new(cache.clone(), false));
    let (lock, _) = resolver.resolve_and_store(&spec).await.unwrap();

    let workspace = Workspace::new(scratch.path().join("versions/v1"));
    let realizer = realizer(&cache, false);
    let options = RealizeOptions::default();

    // Dry-run first: everything is pending.
    let plan = realizer.plan(&lock, &workspace, &options).unwrap();
    assert!(!plan.is_noop());

    let report = realizer.realize(&lock, &workspace, &options).await.unwrap();
    assert!(report.fresh);
    assert!(report.complete);
    assert!(workspace.engine_dir().join("main.py").is_file());
    let projected = workspace.model_target("checkpoints/sd15.safetensors");
    assert_eq!(fs_err::read(&projected).unwrap(), b"model weights");
    assert!(workspace.marker_path().is_file());
    assert!(workspace.model_paths_config().is_file());

    // A second realization is a no-op, online or offline.
    let report = realizer.realize(&lock, &workspace, &options).await.unwrap();
    assert!(!report.fresh);
    let offline = self::realizer(&cache, true);
    let offline_options = RealizeOptions {
        offline: true,
        ..RealizeOptions::default()
    };
    let report = offline
        .realize(&lock, &workspace, &offline_options)
        .await
        .unwrap();
    assert!(!report.fresh);
    assert!(realizer.plan(&lock, &workspace, &options).unwrap().is_noop());
}

#[tokio::test]
async fn offline_realization_is_best_effort_about_models() {
    if !tooling_available() {
        eprintln!("git or python3 not available, skipping");
        return;
    }

    let scratch = tempfile::tempdir().unwrap();
    let engine = scratch.path().join("upstream");
    fs_err::create_dir_all(&engine).unwrap();
    make_engine_repo(&engine);

    let cached_model = scratch.path().join("cached.bin");
    fs_err::write(&cached_model, "cached").unwrap();
    let cached_uri = cached_model.to_str().unwrap().to_string();
    let missing_uri = scratch.path().join("missing.bin").display().to_string();

    let cache = Cache::from_path(scratch.path().join("cache")).unwrap();
    // Warm the cache for one of the two models, and the engine clone.
    let online = realizer(&cache, false);
    let warm_spec = spec_json("warm", &engine, &[(&cached_uri, "vae")]);
    let resolver = SpecResolver::new(cache.clone(), GitResolver::new(cache.clone(), false));
    let (warm_lock, _) = resolver.resolve_and_store(&warm_spec).await.unwrap();
    let warm_workspace = Workspace::new(scratch.path().join("versions/warm"));
    online
        .realize(&warm_lock, &warm_workspace, &RealizeOptions::default())
        .await
        .unwrap();

    // Offline, two models: one cached, one absent.
    let spec = spec_json(
        "partial",
        &engine,
        &[(&cached_uri, "vae"), (&missing_uri, "unet")],
    );
    let (lock, _) = resolver.resolve_and_store(&spec).await.unwrap();
    let workspace = Workspace::new(scratch.path().join("versions/partial"));
    let offline = realizer(&cache, true);
    let report = offline
        .realize(
            &lock,
            &workspace,
            &RealizeOptions {
                offline: true,
                ..RealizeOptions::default()
            },
        )
        .await
        .unwrap();

    assert!(!report.complete);
    assert_eq!(report.warnings.len(), 1);
    // The marker records only complete realizations.
    assert!(!workspace.marker_path().exists());
    assert!(workspace.model_target("vae/cached.bin").is_file());

    // Back online, the missing model arrives and the marker is written.
    let report = online
        .realize(&lock, &workspace, &RealizeOptions::default())
        .await
        .unwrap();
    assert!(report.complete);
    assert!(workspace.marker_path().is_file());
}

#[tokio::test]
async fn teardown_refuses_unmarked_directories() {
    let scratch = tempfile::tempdir().unwrap();
    let stray = scratch.path().join("stray");
    fs_err::create_dir_all(stray.join("important")).unwrap();
    let workspace = Workspace::new(&stray);
    let lock_path = scratch.path().join("stray.lock");

    let err = teardown(&workspace, &lock_path, None, false).unwrap_err();
    assert!(matches!(err, RealizeError::RefusingDelete(_)));
    assert!(stray.join("important").is_dir());

    // With a marker it goes away, lock included.
    fs_err::write(
        workspace.marker_path(),
        r#"{"version_id": "x", "lock_digest": "d"}"#,
    )
    .unwrap();
    fs_err::write(&lock_path, "{}").unwrap();
    teardown(&workspace, &lock_path, None, false).unwrap();
    assert!(!stray.exists());
    assert!(!lock_path.exists());
}
