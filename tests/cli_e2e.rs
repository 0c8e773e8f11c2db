//! End-to-end CLI tests for the ingestor binary.

mod support;

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::json;
use support::socket_guard::should_skip_socket_bound_test;
use tempfile::TempDir;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// A command isolated from the user's config, token and database.
fn ingestor(home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("ingestor").unwrap();
    cmd.env("HOME", home.path())
        .env("XDG_CONFIG_HOME", home.path().join("config"))
        .env_remove("INGESTOR_ACCESS_TOKEN")
        .env_remove("RUST_LOG")
        .current_dir(home.path());
    cmd
}

#[test]
fn test_binary_help_lists_subcommands() {
    let home = TempDir::new().unwrap();
    ingestor(&home)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage"))
        .stdout(predicate::str::contains("sync"))
        .stdout(predicate::str::contains("import"))
        .stdout(predicate::str::contains("show"));
}

#[test]
fn test_binary_version_displays_version() {
    let home = TempDir::new().unwrap();
    ingestor(&home)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("ingestor"));
}

#[test]
fn test_binary_without_subcommand_fails() {
    let home = TempDir::new().unwrap();
    ingestor(&home).assert().failure();
}

#[test]
fn test_binary_invalid_flag_returns_error() {
    let home = TempDir::new().unwrap();
    ingestor(&home)
        .arg("--invalid-flag")
        .assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}

#[test]
fn test_binary_rejects_unknown_entity() {
    let home = TempDir::new().unwrap();
    ingestor(&home)
        .args(["sync", "--member", "1", "--only", "bogus"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown entity 'bogus'"));
}

#[test]
fn test_binary_show_on_empty_store_prints_empty_list() {
    let home = TempDir::new().unwrap();
    let db = home.path().join("store.db");
    ingestor(&home)
        .args(["--database", db.to_str().unwrap(), "-q", "show", "contacts", "--member", "42"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[]"));
    assert!(db.exists());
}

#[test]
fn test_binary_sync_without_token_exits_with_failure_code() {
    let home = TempDir::new().unwrap();
    let db = home.path().join("store.db");
    ingestor(&home)
        .args([
            "--database",
            db.to_str().unwrap(),
            "--base-url",
            "http://127.0.0.1:9",
            "-q",
            "sync",
            "--member",
            "42",
            "--only",
            "contacts",
        ])
        .assert()
        .code(2)
        .stdout(predicate::str::contains("contacts"))
        .stdout(predicate::str::contains("failed"))
        .stdout(predicate::str::contains("member 42: 0 synced, 1 failed"));
}

#[test]
fn test_binary_rejects_invalid_config_file() {
    let home = TempDir::new().unwrap();
    let config_dir = home.path().join("config").join("ingestor");
    std::fs::create_dir_all(&config_dir).unwrap();
    std::fs::write(config_dir.join("config.toml"), "group_workers = 0\n").unwrap();

    ingestor(&home)
        .args(["show", "contacts", "--member", "1"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("group_workers"));
}

#[test]
fn test_binary_sync_then_show_round_trips_through_store() {
    if should_skip_socket_bound_test() {
        return;
    }
    let home = TempDir::new().unwrap();
    let db = home.path().join("store.db");

    tokio_test::block_on(async {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/characters/42/contacts/"))
            .and(header("authorization", "Bearer cli-token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("etag", "\"c1\"")
                    .insert_header("expires", "Wed, 21 Oct 2037 07:28:00 GMT")
                    .set_body_json(json!([
                        {"contact_id": 500_001, "contact_type": "faction", "standing": 5.0}
                    ])),
            )
            .expect(1)
            .mount(&server)
            .await;

        ingestor(&home)
            .env("INGESTOR_ACCESS_TOKEN", "cli-token")
            .args([
                "--database",
                db.to_str().unwrap(),
                "--base-url",
                &server.uri(),
                "-q",
                "sync",
                "--member",
                "42",
                "--only",
                "contacts",
            ])
            .assert()
            .success()
            .stdout(predicate::str::contains("member 42: 1 synced, 0 failed"));
    });

    ingestor(&home)
        .args(["--database", db.to_str().unwrap(), "-q", "show", "contacts", "--member", "42"])
        .assert()
        .success()
        .stdout(predicate::str::contains("500001"))
        .stdout(predicate::str::contains("faction"));
}
