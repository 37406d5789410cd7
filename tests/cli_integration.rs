#![allow(deprecated)]

/// End-to-end tests for the command-line surface
///
/// These run the compiled binary against temporary data directories. None
/// of them reach the network: the daemon test only tags, which needs no
/// platform calls.
use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;
mod common;

fn streamtags() -> Command {
    let mut cmd = Command::cargo_bin("streamtags").unwrap();
    cmd.env_remove("STREAMTAGS_DATA_DIR")
        .env_remove("STREAMTAGS_ENCRYPTION_SECRET")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_sessions_list_on_empty_data_dir() {
    let dir = TempDir::new().unwrap();
    let config = common::daemon_config(&dir, "https://api.twitch.tv/helix");

    streamtags()
        .arg("--config")
        .arg(&config)
        .args(["sessions", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No sessions recorded"));
}

#[test]
fn test_invalid_api_base_is_rejected() {
    let dir = TempDir::new().unwrap();
    let config = common::daemon_config(&dir, "not-a-url");

    streamtags()
        .arg("--config")
        .arg(&config)
        .args(["sessions", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("twitch.api_base"));
}

#[test]
fn test_unknown_export_format_is_usage_error() {
    streamtags()
        .args(["export", "--vod", "900", "--format", "pdf"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("pdf"));
}

#[test]
fn test_credentials_status_requires_secret() {
    let (_dir, config) = common::temp_config_file("sessions:\n  default_delay_seconds: 15\n");

    streamtags()
        .arg("--config")
        .arg(&config)
        .args(["credentials", "status"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("encryption_secret"));
}

#[test]
fn test_credentials_status_reports_missing_record() {
    let dir = TempDir::new().unwrap();
    let config = common::daemon_config(&dir, "https://api.twitch.tv/helix");

    streamtags()
        .arg("--config")
        .arg(&config)
        .args(["credentials", "status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("missing"));
}

#[test]
fn test_run_over_event_file_tags_and_persists() {
    let dir = TempDir::new().unwrap();
    let config = common::daemon_config(&dir, "https://api.twitch.tv/helix");
    let feed = dir.path().join("events.jsonl");
    std::fs::write(
        &feed,
        concat!(
            "# recorded feed\n",
            "{\"type\":\"online\",\"stream_id\":\"40123\",\"started_at\":\"2024-05-01T18:00:00Z\"}\n",
            "{\"type\":\"command\",\"user\":\"mod_a\",\"roles\":[\"moderator\"],\"command\":\"tag\",\"args\":\"ace\"}\n",
            "{\"type\":\"command\",\"user\":\"viewer\",\"command\":\"vip\",\"args\":\"@alice\"}\n",
            "{\"type\":\"offline\"}\n",
        ),
    )
    .unwrap();

    streamtags()
        .arg("--config")
        .arg(&config)
        .arg("run")
        .arg("--events")
        .arg(&feed)
        .arg("--attachments-dir")
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("@mod_a Tag #1 saved at "))
        .stdout(predicate::str::contains(
            "@viewer viewer is not allowed to use this command",
        ));

    streamtags()
        .arg("--config")
        .arg(&config)
        .args(["sessions", "show", "40123"])
        .assert()
        .success()
        .stdout(predicate::str::contains("ace"))
        .stdout(predicate::str::contains("mod_a"));
}
