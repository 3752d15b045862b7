//! CLI flows that need no network: spec lifecycle, pinned validation,
//! deletion safety.

use assert_cmd::Command;
use assert_fs::prelude::*;
use predicates::prelude::*;

const COMMIT: &str = "0123456789012345678901234567890123456789";

fn heddle(home: &assert_fs::TempDir) -> Command {
    let mut command = Command::cargo_bin("heddle").unwrap();
    command
        .env("ENGINE_HOME", home.path())
        .env("CACHE_ROOT", home.path().join("cache"))
        .env_remove("OFFLINE")
        .env_remove("MODELS_DIR");
    command
}

#[test]
fn create_writes_a_frozen_spec() {
    let home = assert_fs::TempDir::new().unwrap();

    heddle(&home)
        .args([
            "create",
            "v1",
            "--engine",
            &format!("https://github.com/acme/engine@{COMMIT}"),
            "--model",
            "https://example.com/sd15.safetensors::checkpoints",
        ])
        .assert()
        .success()
        .stderr(predicate::str::contains("Wrote spec for v1"));

    let spec = home.child("specs/v1.json");
    spec.assert(predicate::path::is_file());
    let parsed: serde_json::Value =
        serde_json::from_str(&fs_err::read_to_string(spec.path()).unwrap()).unwrap();
    assert_eq!(parsed["schema_version"], 2);
    assert_eq!(parsed["engine_source"]["commit"], COMMIT);

    // Specs are frozen: a second create without --force is a usage error.
    heddle(&home)
        .args(["create", "v1", "--engine", "https://github.com/acme/engine"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("[usage]"));
}

#[test]
fn validate_pins_and_is_idempotent() {
    let home = assert_fs::TempDir::new().unwrap();
    heddle(&home)
        .args([
            "create",
            "v1",
            "--engine",
            &format!("https://github.com/acme/engine@{COMMIT}"),
        ])
        .assert()
        .success();

    heddle(&home)
        .args(["validate", "v1"])
        .assert()
        .success()
        .stderr(predicate::str::contains("Lock updated"));
    let lock = home.child("cache/resolved/v1.lock");
    lock.assert(predicate::path::is_file());
    let first = fs_err::read(lock.path()).unwrap();

    heddle(&home)
        .args(["validate", "v1"])
        .assert()
        .success()
        .stderr(predicate::str::contains("Lock unchanged"));
    assert_eq!(fs_err::read(lock.path()).unwrap(), first);
}

#[test]
fn clone_copies_the_spec_but_not_the_lock() {
    let home = assert_fs::TempDir::new().unwrap();
    heddle(&home)
        .args([
            "create",
            "v1",
            "--engine",
            &format!("https://github.com/acme/engine@{COMMIT}"),
        ])
        .assert()
        .success();
    heddle(&home).args(["validate", "v1"]).assert().success();

    heddle(&home).args(["clone", "v1", "v2"]).assert().success();
    let spec: serde_json::Value = serde_json::from_str(
        &fs_err::read_to_string(home.child("specs/v2.json").path()).unwrap(),
    )
    .unwrap();
    assert_eq!(spec["version_id"], "v2");
    home.child("cache/resolved/v2.lock")
        .assert(predicate::path::missing());

    // Unknown source spec is a usage error.
    heddle(&home)
        .args(["clone", "ghost", "v3"])
        .assert()
        .code(2);
}

#[test]
fn delete_refuses_unmarked_directories() {
    let home = assert_fs::TempDir::new().unwrap();
    let stray = home.child("versions/v9/keep.txt");
    stray.write_str("precious").unwrap();

    heddle(&home)
        .args(["delete", "v9"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("does not carry a workspace marker"));
    stray.assert(predicate::path::is_file());

    // With a marker in place the workspace and lock go away.
    home.child("versions/v9/.env_marker")
        .write_str(r#"{"version_id": "v9", "lock_digest": "d"}"#)
        .unwrap();
    home.child("cache/resolved/v9.lock").write_str("{}").unwrap();
    heddle(&home).args(["delete", "v9"]).assert().success();
    home.child("versions/v9").assert(predicate::path::missing());
    home.child("cache/resolved/v9.lock")
        .assert(predicate::path::missing());
}

#[test]
fn list_reports_lifecycle_states() {
    let home = assert_fs::TempDir::new().unwrap();
    heddle(&home)
        .args([
            "create",
            "alpha",
            "--engine",
            &format!("https://github.com/acme/engine@{COMMIT}"),
        ])
        .assert()
        .success();
    heddle(&home)
        .args([
            "create",
            "beta",
            "--engine",
            &format!("https://github.com/acme/engine@{COMMIT}"),
        ])
        .assert()
        .success();
    heddle(&home).args(["validate", "beta"]).assert().success();

    heddle(&home)
        .args(["list"])
        .assert()
        .success()
        .stderr(
            predicate::str::contains("alpha")
                .and(predicate::str::contains("spec"))
                .and(predicate::str::contains("beta"))
                .and(predicate::str::contains("locked")),
        );
}

#[test]
fn bad_version_ids_are_usage_errors() {
    let home = assert_fs::TempDir::new().unwrap();
    heddle(&home)
        .args(["validate", "not/a/version"])
        .assert()
        .code(2);
}
