use assert_cmd::cargo::cargo_bin_cmd;

fn fixture(path: &str) -> String {
    format!("{}/tests/fixtures/{path}", env!("CARGO_MANIFEST_DIR"))
}

#[test]
fn help_lists_fetch_flags() {
    let mut cmd = cargo_bin_cmd!("runsift");
    cmd.arg("--help");
    let out = cmd.assert().success();
    let stdout = String::from_utf8(out.get_output().stdout.clone()).expect("utf8");

    for flag in [
        "--branch",
        "--run-id",
        "--all-failed",
        "--per-page",
        "--no-preview",
        "--keep-old-logs",
        "--all-jobs",
        "--analyze-file",
    ] {
        assert!(stdout.contains(flag), "help is missing {flag}");
    }
}

#[test]
fn analyze_file_prints_summary_then_log() {
    let mut cmd = cargo_bin_cmd!("runsift");
    cmd.arg("--analyze-file")
        .arg(fixture("logs/backend_pytest.log"))
        .env_remove("GITHUB_TOKEN");
    let out = cmd.assert().success();
    let stdout = String::from_utf8(out.get_output().stdout.clone()).expect("utf8");

    assert!(stdout.starts_with(&"=".repeat(80)));
    assert!(stdout.contains("ERROR SUMMARY - Issues Found in This Workflow Run"));
    assert!(stdout.contains("  • Run pytest -q"));
    assert!(stdout.contains("  • Exit code 1 in: Run pytest -q"));
    assert!(stdout.contains("Cleaning up orphan processes"));
}

#[test]
fn analyze_missing_file_exits_nonzero() {
    let mut cmd = cargo_bin_cmd!("runsift");
    cmd.arg("--analyze-file").arg(fixture("logs/missing.log"));
    cmd.assert().failure();
}

#[test]
fn fetch_without_token_explains_how_to_configure_it() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut cmd = cargo_bin_cmd!("runsift");
    cmd.current_dir(temp.path())
        .env_remove("GITHUB_TOKEN")
        .arg("--config")
        .arg(fixture("configs/staging.toml"));
    let out = cmd.assert().failure();
    let stderr = String::from_utf8(out.get_output().stderr.clone()).expect("utf8");
    assert!(stderr.contains("GITHUB_TOKEN not found"));
}

#[test]
fn env_file_token_is_used_but_repo_is_still_required() {
    let temp = tempfile::tempdir().expect("tempdir");
    std::fs::write(temp.path().join(".env"), "GITHUB_TOKEN=ghp_from_file\n").expect("env");
    let mut cmd = cargo_bin_cmd!("runsift");
    cmd.current_dir(temp.path())
        .env_remove("GITHUB_TOKEN")
        .env_remove("OWNER")
        .env_remove("REPO");
    let out = cmd.assert().failure();
    let stderr = String::from_utf8(out.get_output().stderr.clone()).expect("utf8");
    assert!(stderr.contains("repository owner and name are required"));
}

#[test]
fn malformed_config_exits_nonzero() {
    let mut cmd = cargo_bin_cmd!("runsift");
    cmd.arg("--config").arg(fixture("configs/broken.toml"));
    let out = cmd.assert().failure();
    let stderr = String::from_utf8(out.get_output().stderr.clone()).expect("utf8");
    assert!(stderr.contains("config parse error"));
}

#[test]
fn unknown_flag_is_a_cli_error() {
    let mut cmd = cargo_bin_cmd!("runsift");
    cmd.arg("--headless");
    let out = cmd.assert().failure();
    let stderr = String::from_utf8(out.get_output().stderr.clone()).expect("utf8");
    assert!(stderr.contains("cli error"));
}
