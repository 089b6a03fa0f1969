use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::atomic::{AtomicU64, Ordering};

fn apiwatch_cmd(home: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_apiwatch"));
    cmd.env("HOME", home);
    cmd.env_remove("APIWATCH_CONFIG");
    cmd.env_remove("APIWATCH_LOG");
    cmd.env_remove("APIWATCH_UI_COLOR");
    cmd.env_remove("APIWATCH_UI_MAX_TABLE_ROWS");
    cmd.env_remove("APIWATCH_SESSION_CAPACITY");
    cmd.env_remove("APIWATCH_SESSION_DEDUP_WINDOW_MS");
    cmd.env_remove("APIWATCH_RULES_SLOW_RESPONSE_MS");
    cmd.env_remove("APIWATCH_RULES_HEADER_FALLBACK");
    cmd.env_remove("APIWATCH_REPORT_SLOW_CALL_MS");
    cmd.env_remove("APIWATCH_STORAGE_STATE_DIR");
    cmd
}

fn run(home: &Path, args: &[&str]) -> Output {
    apiwatch_cmd(home).args(args).output().expect("run apiwatch")
}

fn make_temp_home() -> PathBuf {
    static HOME_SEQ: AtomicU64 = AtomicU64::new(0);

    let temp = std::env::temp_dir();
    let seq = HOME_SEQ.fetch_add(1, Ordering::Relaxed);
    let uniq = format!("apiwatch-exit-test-{}-{seq}", std::process::id());
    let home = temp.join(uniq);
    let _ = std::fs::remove_dir_all(&home);
    std::fs::create_dir_all(&home).expect("create home");
    home
}

fn write_file(path: &Path, bytes: &[u8]) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("mkdirs");
    }
    std::fs::write(path, bytes).expect("write");
}

#[test]
fn completion_unknown_shell_exits_2() {
    let home = make_temp_home();
    let out = run(&home, &["completion", "tcsh"]);
    assert_eq!(out.status.code(), Some(2));
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn completion_known_shell_succeeds() {
    let home = make_temp_home();
    let out = run(&home, &["completion", "bash"]);
    assert!(out.status.success());
    assert!(String::from_utf8_lossy(&out.stdout).contains("apiwatch"));
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn missing_capture_file_exits_2() {
    let home = make_temp_home();
    let missing = home.join("nope.jsonl");
    let out = run(&home, &["analyze", missing.to_str().expect("utf8")]);
    assert_eq!(out.status.code(), Some(2));
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn unparsable_capture_line_exits_2_and_names_line() {
    let home = make_temp_home();
    let file = home.join("cap.jsonl");
    write_file(
        &file,
        b"{\"method\":\"GET\",\"url\":\"https://a.test/x\"}\nnot json\n",
    );
    let out = run(&home, &["analyze", file.to_str().expect("utf8")]);
    assert_eq!(out.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("line 2"), "stderr={stderr}");
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn invalid_session_id_exits_2() {
    let home = make_temp_home();
    let out = run(&home, &["report", "--session", "../escape"]);
    assert_eq!(out.status.code(), Some(2));
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn invalid_env_value_exits_2() {
    let home = make_temp_home();
    let out = apiwatch_cmd(&home)
        .env("APIWATCH_SESSION_CAPACITY", "lots")
        .args(["config", "--show"])
        .output()
        .expect("run apiwatch");
    assert_eq!(out.status.code(), Some(2));
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn explicit_missing_config_exits_2() {
    let home = make_temp_home();
    let cfg = home.join("absent.toml");
    let out = run(&home, &["--config", cfg.to_str().expect("utf8"), "config", "--show"]);
    assert_eq!(out.status.code(), Some(2));
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn unusable_state_dir_exits_20() {
    let home = make_temp_home();
    let blocker = home.join("blocker");
    write_file(&blocker, b"not a directory");
    let state = blocker.join("state");
    let out = run(
        &home,
        &["--state-dir", state.to_str().expect("utf8"), "report", "--session", "s1"],
    );
    assert_eq!(out.status.code(), Some(20));
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn openapi_export_of_empty_session_exits_10() {
    let home = make_temp_home();
    let out = run(&home, &["export-openapi", "--session", "empty"]);
    assert_eq!(out.status.code(), Some(10));
    let _ = std::fs::remove_dir_all(&home);
}
