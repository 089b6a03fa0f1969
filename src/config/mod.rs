use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::routes::DEFAULT_DEDUP_WINDOW_MS;
use crate::rules::{DEFAULT_SLOW_RESPONSE_MS, RuleOptions};
use crate::session::ManagerOptions;
use crate::store::{DEFAULT_CAPACITY, DEFAULT_SLOW_CALL_MS};

#[derive(Debug, Clone, Serialize)]
pub struct EffectiveConfig {
    pub ui: UiConfig,
    pub session: SessionConfig,
    pub rules: RulesConfig,
    pub report: ReportConfig,
    pub storage: StorageConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_path: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UiConfig {
    pub color: bool,
    pub max_table_rows: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionConfig {
    pub capacity: usize,
    pub dedup_window_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RulesConfig {
    pub slow_response_ms: u64,
    pub header_fallback: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportConfig {
    pub slow_call_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StorageConfig {
    pub state_dir: PathBuf,
}

impl EffectiveConfig {
    pub fn defaults(home_dir: &Path) -> Self {
        Self {
            ui: UiConfig {
                color: true,
                max_table_rows: 20,
            },
            session: SessionConfig {
                capacity: DEFAULT_CAPACITY,
                dedup_window_ms: DEFAULT_DEDUP_WINDOW_MS,
            },
            rules: RulesConfig {
                slow_response_ms: DEFAULT_SLOW_RESPONSE_MS,
                header_fallback: true,
            },
            report: ReportConfig {
                slow_call_ms: DEFAULT_SLOW_CALL_MS,
            },
            storage: StorageConfig {
                state_dir: default_state_dir(home_dir),
            },
            config_path: None,
        }
    }

    pub fn manager_options(&self) -> ManagerOptions {
        ManagerOptions {
            capacity: self.session.capacity,
            dedup_window_ms: self.session.dedup_window_ms,
            slow_call_ms: self.report.slow_call_ms,
            rules: RuleOptions {
                slow_response_ms: self.rules.slow_response_ms,
                header_fallback: self.rules.header_fallback,
            },
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    ui: Option<RawUiConfig>,
    session: Option<RawSessionConfig>,
    rules: Option<RawRulesConfig>,
    report: Option<RawReportConfig>,
    storage: Option<RawStorageConfig>,
}

#[derive(Debug, Deserialize)]
struct RawUiConfig {
    color: Option<bool>,
    max_table_rows: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct RawSessionConfig {
    capacity: Option<usize>,
    dedup_window_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawRulesConfig {
    slow_response_ms: Option<u64>,
    header_fallback: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct RawReportConfig {
    slow_call_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawStorageConfig {
    state_dir: Option<String>,
}

pub fn home_dir() -> Result<PathBuf> {
    std::env::var_os("HOME")
        .filter(|h| !h.is_empty())
        .map(PathBuf::from)
        .ok_or_else(|| anyhow::anyhow!("HOME is not set"))
}

pub fn default_config_path(home_dir: &Path) -> PathBuf {
    home_dir.join(".config/apiwatch/config.toml")
}

pub fn default_state_dir(home_dir: &Path) -> PathBuf {
    home_dir.join(".local/state/apiwatch")
}

pub fn load(config_path: Option<&Path>, home_dir: &Path) -> Result<EffectiveConfig> {
    let mut cfg = EffectiveConfig::defaults(home_dir);

    let explicit = config_path.is_some();
    let path = config_path
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| default_config_path(home_dir));

    if path.exists() {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let raw: RawConfig = toml::from_str(&s)
            .with_context(|| format!("failed to parse config file (TOML): {}", path.display()))?;
        apply_raw_config(&mut cfg, raw, home_dir);
        cfg.config_path = Some(path.display().to_string());
    } else if explicit {
        anyhow::bail!("config file not found: {}", path.display());
    }

    apply_env_overrides(&mut cfg, home_dir)?;
    validate(&cfg)?;

    tracing::debug!(
        config_path = cfg.config_path.as_deref().unwrap_or("<defaults>"),
        state_dir = %cfg.storage.state_dir.display(),
        "configuration loaded"
    );
    Ok(cfg)
}

fn apply_raw_config(cfg: &mut EffectiveConfig, raw: RawConfig, home_dir: &Path) {
    if let Some(ui) = raw.ui {
        if let Some(color) = ui.color {
            cfg.ui.color = color;
        }
        if let Some(max_table_rows) = ui.max_table_rows {
            cfg.ui.max_table_rows = max_table_rows;
        }
    }

    if let Some(session) = raw.session {
        if let Some(capacity) = session.capacity {
            cfg.session.capacity = capacity;
        }
        if let Some(dedup_window_ms) = session.dedup_window_ms {
            cfg.session.dedup_window_ms = dedup_window_ms;
        }
    }

    if let Some(rules) = raw.rules {
        if let Some(slow_response_ms) = rules.slow_response_ms {
            cfg.rules.slow_response_ms = slow_response_ms;
        }
        if let Some(header_fallback) = rules.header_fallback {
            cfg.rules.header_fallback = header_fallback;
        }
    }

    if let Some(report) = raw.report {
        if let Some(slow_call_ms) = report.slow_call_ms {
            cfg.report.slow_call_ms = slow_call_ms;
        }
    }

    if let Some(storage) = raw.storage {
        if let Some(state_dir) = storage.state_dir {
            cfg.storage.state_dir = expand_home(&state_dir, home_dir);
        }
    }
}

fn apply_env_overrides(cfg: &mut EffectiveConfig, home_dir: &Path) -> Result<()> {
    if let Ok(v) = std::env::var("APIWATCH_UI_COLOR") {
        cfg.ui.color = parse_bool(&v).with_context(|| "APIWATCH_UI_COLOR")?;
    }
    if let Ok(v) = std::env::var("APIWATCH_UI_MAX_TABLE_ROWS") {
        cfg.ui.max_table_rows = v
            .trim()
            .parse::<usize>()
            .with_context(|| "APIWATCH_UI_MAX_TABLE_ROWS")?;
    }
    if let Ok(v) = std::env::var("APIWATCH_SESSION_CAPACITY") {
        cfg.session.capacity = v
            .trim()
            .parse::<usize>()
            .with_context(|| "APIWATCH_SESSION_CAPACITY")?;
    }
    if let Ok(v) = std::env::var("APIWATCH_SESSION_DEDUP_WINDOW_MS") {
        cfg.session.dedup_window_ms = v
            .trim()
            .parse::<u64>()
            .with_context(|| "APIWATCH_SESSION_DEDUP_WINDOW_MS")?;
    }
    if let Ok(v) = std::env::var("APIWATCH_RULES_SLOW_RESPONSE_MS") {
        cfg.rules.slow_response_ms = v
            .trim()
            .parse::<u64>()
            .with_context(|| "APIWATCH_RULES_SLOW_RESPONSE_MS")?;
    }
    if let Ok(v) = std::env::var("APIWATCH_RULES_HEADER_FALLBACK") {
        cfg.rules.header_fallback =
            parse_bool(&v).with_context(|| "APIWATCH_RULES_HEADER_FALLBACK")?;
    }
    if let Ok(v) = std::env::var("APIWATCH_REPORT_SLOW_CALL_MS") {
        cfg.report.slow_call_ms = v
            .trim()
            .parse::<u64>()
            .with_context(|| "APIWATCH_REPORT_SLOW_CALL_MS")?;
    }
    if let Ok(v) = std::env::var("APIWATCH_STORAGE_STATE_DIR") {
        let v = v.trim();
        if !v.is_empty() {
            cfg.storage.state_dir = expand_home(v, home_dir);
        }
    }

    Ok(())
}

fn validate(cfg: &EffectiveConfig) -> Result<()> {
    if cfg.session.capacity == 0 {
        anyhow::bail!("session.capacity must be at least 1");
    }
    Ok(())
}

fn expand_home(path: &str, home_dir: &Path) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => home_dir.join(rest),
        None if path == "~" => home_dir.to_path_buf(),
        None => PathBuf::from(path),
    }
}

fn parse_bool(s: &str) -> Result<bool> {
    let s = s.trim().to_ascii_lowercase();
    match s.as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(anyhow::anyhow!(
            "invalid boolean: {s} (expected true|false|1|0|yes|no|on|off)"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_values_override_defaults() {
        let home = Path::new("/home/tester");
        let mut cfg = EffectiveConfig::defaults(home);
        let raw: RawConfig = toml::from_str(
            r#"
                [session]
                capacity = 25
                [rules]
                header_fallback = false
                [storage]
                state_dir = "~/watch"
            "#,
        )
        .expect("toml");
        apply_raw_config(&mut cfg, raw, home);

        assert_eq!(cfg.session.capacity, 25);
        assert_eq!(cfg.session.dedup_window_ms, DEFAULT_DEDUP_WINDOW_MS);
        assert!(!cfg.rules.header_fallback);
        assert_eq!(cfg.storage.state_dir, home.join("watch"));

        let opts = cfg.manager_options();
        assert_eq!(opts.capacity, 25);
        assert!(!opts.rules.header_fallback);
        assert_eq!(opts.slow_call_ms, DEFAULT_SLOW_CALL_MS);
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let mut cfg = EffectiveConfig::defaults(Path::new("/h"));
        cfg.session.capacity = 0;
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn booleans_accept_common_spellings() {
        assert!(parse_bool(" YES ").expect("bool"));
        assert!(!parse_bool("off").expect("bool"));
        assert!(parse_bool("maybe").is_err());
    }
}
