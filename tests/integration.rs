mod common;

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use common::{setup_env, write_archive};

fn run_passdb(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = env!("CARGO_BIN_EXE_passdb");
    let output = Command::new(binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run passdb binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

/// Two text entries: six lines, four unique credentials, one repeat, one
/// line with no email.
fn sample_archive(root: &Path) -> PathBuf {
    let path = root.join("dump.tar.gz");
    write_archive(
        &path,
        &[
            ("dump/", &b""[..]),
            (
                "dump/a.txt",
                &b"alice@example.com:hunter2\nBob@Example.com;pa:ss\nnot a credential\nalice@example.com:hunter2\n"[..],
            ),
            ("dump/b.txt", &b"carol@example.org:pw\r\n@:empty\r\n"[..]),
        ],
    );
    path
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_env("");

    let (stdout, stderr, success) = run_passdb(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/passdb.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_env("");

    let (_, _, success1) = run_passdb(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_passdb(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_ingest_reports_every_line() {
    let (tmp, config_path) = setup_env("");
    let archive = sample_archive(tmp.path());

    run_passdb(&config_path, &["init"]);
    let (stdout, stderr, success) =
        run_passdb(&config_path, &["ingest", archive.to_str().unwrap()]);
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);

    assert!(stdout.contains("entry dump/a.txt: added=2 duplicate=1 malformed=1"));
    assert!(stdout.contains("entry dump/b.txt: added=2 duplicate=0 malformed=0"));
    assert!(stdout.contains("ingest dump.tar.gz"));
    assert!(stdout.contains("entries: 2 (skipped 0)"));
    assert!(stdout.contains("lines: 6"));
    assert!(stdout.contains("added: 4"));
    assert!(stdout.contains("duplicate: 1"));
    assert!(stdout.contains("malformed: 1"));
    assert!(stdout.trim_end().ends_with("ok"));
}

#[test]
fn test_reingest_adds_nothing() {
    let (tmp, config_path) = setup_env("");
    let archive = sample_archive(tmp.path());

    run_passdb(&config_path, &["init"]);
    run_passdb(&config_path, &["ingest", archive.to_str().unwrap()]);

    let (stdout, _, success) = run_passdb(&config_path, &["ingest", archive.to_str().unwrap()]);
    assert!(success);
    assert!(stdout.contains("added: 0"), "got: {}", stdout);
    assert!(stdout.contains("duplicate: 5"), "got: {}", stdout);
    assert!(stdout.contains("malformed: 1"), "got: {}", stdout);

    let (stdout, _, _) = run_passdb(&config_path, &["stats"]);
    assert!(stdout.contains("Records:     4"), "got: {}", stdout);
}

#[test]
fn test_ingest_resume_skips_completed_entries() {
    let (tmp, config_path) = setup_env("");
    let archive = sample_archive(tmp.path());

    run_passdb(&config_path, &["init"]);
    run_passdb(&config_path, &["ingest", archive.to_str().unwrap()]);

    let (stdout, _, success) = run_passdb(
        &config_path,
        &["ingest", archive.to_str().unwrap(), "--resume"],
    );
    assert!(success);
    assert!(stdout.contains("entries: 2 (skipped 2)"), "got: {}", stdout);
    assert!(stdout.contains("lines: 0"), "got: {}", stdout);
}

#[test]
fn test_ingest_with_workers_matches_sequential() {
    let (tmp, config_path) = setup_env("");
    let archive = sample_archive(tmp.path());

    run_passdb(&config_path, &["init"]);
    let (stdout, stderr, success) = run_passdb(
        &config_path,
        &["ingest", archive.to_str().unwrap(), "--workers", "4"],
    );
    assert!(success, "ingest failed: {}", stderr);
    assert!(stdout.contains("added: 4"));
    assert!(stdout.contains("duplicate: 1"));
    assert!(stdout.contains("malformed: 1"));
}

#[test]
fn test_ingest_dry_run_writes_nothing() {
    let (tmp, config_path) = setup_env("");
    let archive = sample_archive(tmp.path());

    run_passdb(&config_path, &["init"]);
    let (stdout, _, success) = run_passdb(
        &config_path,
        &["ingest", archive.to_str().unwrap(), "--dry-run"],
    );
    assert!(success);
    assert!(stdout.contains("dry-run"));
    assert!(stdout.contains("added: 4"));
    assert!(stdout.contains("distinct domains: 3"));

    let (stdout, _, _) = run_passdb(&config_path, &["stats"]);
    assert!(stdout.contains("Records:     0"), "got: {}", stdout);
}

#[test]
fn test_ingest_missing_archive_fails() {
    let (tmp, config_path) = setup_env("");
    let missing = tmp.path().join("missing.tar.gz");

    run_passdb(&config_path, &["init"]);
    let (_, stderr, success) = run_passdb(&config_path, &["ingest", missing.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("missing.tar.gz"), "got: {}", stderr);
}

#[test]
fn test_ingest_requires_init() {
    let (tmp, config_path) = setup_env("");
    let archive = sample_archive(tmp.path());

    let (_, stderr, success) = run_passdb(&config_path, &["ingest", archive.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("passdb init"), "got: {}", stderr);
}

#[test]
fn test_ingest_skips_undecodable_entry() {
    let (tmp, config_path) = setup_env("");
    let archive = tmp.path().join("mixed.tar.gz");
    write_archive(
        &archive,
        &[
            ("blob.bin", &[0xff, 0xfe, 0x00, 0x81][..]),
            ("ok.txt", &b"dave@example.net:letmein\n"[..]),
        ],
    );

    run_passdb(&config_path, &["init"]);
    let (stdout, stderr, success) =
        run_passdb(&config_path, &["ingest", archive.to_str().unwrap()]);
    assert!(success, "ingest failed: {}", stderr);
    assert!(stdout.contains("entries: 2 (skipped 1)"), "got: {}", stdout);
    assert!(stdout.contains("added: 1"));
    assert!(stderr.contains("blob.bin"), "got: {}", stderr);
}

#[test]
fn test_ingest_writes_reject_log() {
    let tmp = tempfile::TempDir::new().unwrap();
    let reject_path = tmp.path().join("rejects.log");
    let (env, config_path) = setup_env(&format!(
        "\n[ingest]\nreject_log = \"{}\"\n",
        reject_path.display()
    ));
    let archive = sample_archive(env.path());

    run_passdb(&config_path, &["init"]);
    let (_, _, success) = run_passdb(&config_path, &["ingest", archive.to_str().unwrap()]);
    assert!(success);

    let rejects = fs::read_to_string(&reject_path).unwrap();
    assert_eq!(rejects, "malformed\tnot a credential\n");
}

#[test]
fn test_ingest_json_progress_on_stderr() {
    let (tmp, config_path) = setup_env("");
    let archive = sample_archive(tmp.path());

    run_passdb(&config_path, &["init"]);
    let (stdout, stderr, success) = run_passdb(
        &config_path,
        &["ingest", archive.to_str().unwrap(), "--progress", "json"],
    );
    assert!(success);
    assert!(stderr.contains(r#""event":"progress""#), "got: {}", stderr);
    assert!(!stdout.contains(r#""event""#));
}

#[test]
fn test_lookup_by_domain_and_username() {
    let (tmp, config_path) = setup_env("");
    let archive = sample_archive(tmp.path());

    run_passdb(&config_path, &["init"]);
    run_passdb(&config_path, &["ingest", archive.to_str().unwrap()]);

    let (stdout, _, success) = run_passdb(&config_path, &["lookup", "domain", "EXAMPLE.com"]);
    assert!(success);
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(
        lines,
        vec!["alice@example.com:hunter2", "bob@example.com:pa:ss"]
    );

    // Empty email halves are stored under placeholders.
    let (stdout, _, _) = run_passdb(&config_path, &["lookup", "username", "username"]);
    assert_eq!(stdout.trim(), "username@domain:empty");

    let (stdout, _, _) = run_passdb(&config_path, &["lookup", "password", "nope"]);
    assert!(stdout.contains("No results."));
}

#[test]
fn test_lookup_rejects_zero_page() {
    let (_tmp, config_path) = setup_env("");

    run_passdb(&config_path, &["init"]);
    let (_, stderr, success) = run_passdb(
        &config_path,
        &["lookup", "domain", "example.com", "--page", "0"],
    );
    assert!(!success);
    assert!(stderr.contains("page must be >= 1"), "got: {}", stderr);
}

#[test]
fn test_email_lookup() {
    let (tmp, config_path) = setup_env("");
    let archive = sample_archive(tmp.path());

    run_passdb(&config_path, &["init"]);
    run_passdb(&config_path, &["ingest", archive.to_str().unwrap()]);

    let (stdout, _, success) = run_passdb(&config_path, &["email", "BOB@example.com"]);
    assert!(success);
    assert_eq!(stdout.trim(), "bob@example.com:pa:ss");

    let (_, _, success) = run_passdb(&config_path, &["email", "no-at-sign"]);
    assert!(!success);
}

#[test]
fn test_stats_lists_ingested_archive() {
    let (tmp, config_path) = setup_env("");
    let archive = sample_archive(tmp.path());

    run_passdb(&config_path, &["init"]);
    run_passdb(&config_path, &["ingest", archive.to_str().unwrap()]);

    let (stdout, _, success) = run_passdb(&config_path, &["stats"]);
    assert!(success);
    assert!(stdout.contains("Usernames:   4"), "got: {}", stdout);
    assert!(stdout.contains("Domains:     3"), "got: {}", stdout);
    assert!(stdout.contains("Passwords:   4"), "got: {}", stdout);
    assert!(stdout.contains("dump.tar.gz"));
}

#[test]
fn test_invalid_config_fails() {
    let (_tmp, config_path) = setup_env("\n[ingest]\nworkers = 0\n");

    let (_, stderr, success) = run_passdb(&config_path, &["init"]);
    assert!(!success);
    assert!(stderr.contains("workers"), "got: {}", stderr);
}
