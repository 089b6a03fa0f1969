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
    let uniq = format!("apiwatch-config-test-{}-{seq}", std::process::id());
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

fn json_stdout(out: &Output) -> serde_json::Value {
    assert!(
        out.status.success(),
        "stdout={:?} stderr={:?}",
        String::from_utf8_lossy(&out.stdout),
        String::from_utf8_lossy(&out.stderr)
    );
    serde_json::from_slice(&out.stdout).expect("parse json")
}

const SLOW_CAPTURE: &str = r#"[{"method":"GET","url":"https://api.test/items","statusCode":200,"duration":120,"timestamp":1700000000000}]"#;

#[test]
fn defaults_apply_without_config_file() {
    let home = make_temp_home();
    let v = json_stdout(&run(&home, &["--json", "config", "--show"]));
    assert_eq!(v["session"]["capacity"], 100);
    assert_eq!(v["session"]["dedup_window_ms"], 1000);
    assert_eq!(v["rules"]["slow_response_ms"], 5000);
    assert_eq!(v["rules"]["header_fallback"], true);
    assert_eq!(v["report"]["slow_call_ms"], 500);
    let state_dir = v["storage"]["state_dir"].as_str().expect("state_dir");
    assert!(state_dir.ends_with(".local/state/apiwatch"), "state_dir={state_dir}");
    assert!(v.get("config_path").is_none());
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn file_overrides_defaults_and_env_overrides_file() {
    let home = make_temp_home();
    write_file(
        &home.join(".config/apiwatch/config.toml"),
        br#"
[report]
slow_call_ms = 100

[session]
capacity = 10
"#,
    );

    let v = json_stdout(&run(&home, &["--json", "config", "--show"]));
    assert_eq!(v["report"]["slow_call_ms"], 100);
    assert_eq!(v["session"]["capacity"], 10);
    assert!(v["config_path"].as_str().expect("path").ends_with("config.toml"));

    let out = apiwatch_cmd(&home)
        .env("APIWATCH_SESSION_CAPACITY", "7")
        .args(["--json", "config", "--show"])
        .output()
        .expect("run apiwatch");
    let v = json_stdout(&out);
    assert_eq!(v["session"]["capacity"], 7);
    assert_eq!(v["report"]["slow_call_ms"], 100);

    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn slow_call_threshold_from_file_shapes_report() {
    let home = make_temp_home();
    let capture = home.join("slow.json");
    write_file(&capture, SLOW_CAPTURE.as_bytes());
    let capture = capture.to_str().expect("utf8");

    let v = json_stdout(&run(&home, &["--json", "analyze", capture]));
    assert_eq!(v["stats"]["slowCalls"], 0);

    write_file(
        &home.join(".config/apiwatch/config.toml"),
        b"[report]\nslow_call_ms = 100\n",
    );
    let v = json_stdout(&run(&home, &["--json", "analyze", capture]));
    assert_eq!(v["stats"]["slowCalls"], 1);
    assert_eq!(v["slowCalls"][0]["durationMs"], 120);

    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn config_env_var_selects_alternate_file() {
    let home = make_temp_home();
    let alt = home.join("alt.toml");
    write_file(&alt, b"[rules]\nheader_fallback = false\n");

    let out = apiwatch_cmd(&home)
        .env("APIWATCH_CONFIG", &alt)
        .args(["--json", "config", "--show"])
        .output()
        .expect("run apiwatch");
    let v = json_stdout(&out);
    assert_eq!(v["rules"]["header_fallback"], false);

    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn state_dir_flag_beats_env() {
    let home = make_temp_home();
    let from_env = home.join("env-state");
    let from_flag = home.join("flag-state");
    let capture = home.join("c.json");
    write_file(&capture, SLOW_CAPTURE.as_bytes());

    let out = apiwatch_cmd(&home)
        .env("APIWATCH_STORAGE_STATE_DIR", &from_env)
        .args([
            "--json",
            "--state-dir",
            from_flag.to_str().expect("utf8"),
            "ingest",
            "--session",
            "s",
            capture.to_str().expect("utf8"),
        ])
        .output()
        .expect("run apiwatch");
    json_stdout(&out);

    assert!(from_flag.join("session_s_calls.json").exists());
    assert!(!from_env.join("session_s_calls.json").exists());

    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn toml_output_is_parseable() {
    let home = make_temp_home();
    let out = run(&home, &["config", "--show"]);
    assert!(out.status.success());
    let text = String::from_utf8_lossy(&out.stdout);
    assert!(text.contains("[session]"), "stdout={text}");
    assert!(text.contains("capacity = 100"), "stdout={text}");
    let _ = std::fs::remove_dir_all(&home);
}
