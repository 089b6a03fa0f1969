use std::io;
use std::io::{IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, CommandFactory, Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;

use crate::config::EffectiveConfig;
use crate::core::CaptureRecord;
use crate::engine::{CaptureBatch, Engine, EngineOptions};
use crate::persist::FileStore;
use crate::session::SessionId;
use crate::ui::UiConfig;

const ANALYZE_SESSION: &str = "analyze";

#[derive(Debug, Parser)]
#[command(
    name = "apiwatch",
    version,
    about = "Passive security and performance analysis of captured HTTP/API traffic"
)]
pub struct Cli {
    #[arg(long, global = true)]
    pub json: bool,
    #[arg(long = "no-color", global = true)]
    pub no_color: bool,
    #[arg(long, global = true)]
    pub verbose: bool,
    #[arg(long, global = true)]
    pub quiet: bool,
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    #[arg(long = "state-dir", global = true)]
    pub state_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Analyze a capture file without persisting anything.
    Analyze(AnalyzeArgs),
    /// Add a capture file to a persisted session.
    Ingest(IngestArgs),
    Report(ReportArgs),
    Routes(SessionArgs),
    Clear(SessionArgs),
    ExportOpenapi(SessionArgs),
    Completion(CompletionArgs),
    Config(ConfigArgs),
}

#[derive(Debug, Args)]
pub struct AnalyzeArgs {
    /// JSON array or JSON Lines of capture records (`-` for stdin).
    pub file: PathBuf,
    #[arg(long)]
    pub markdown: bool,
}

#[derive(Debug, Args)]
pub struct IngestArgs {
    #[arg(long)]
    pub session: SessionId,
    pub file: PathBuf,
}

#[derive(Debug, Args)]
pub struct ReportArgs {
    #[arg(long)]
    pub session: SessionId,
    #[arg(long)]
    pub markdown: bool,
}

#[derive(Debug, Args)]
pub struct SessionArgs {
    #[arg(long)]
    pub session: SessionId,
}

#[derive(Debug, Args)]
pub struct CompletionArgs {
    pub shell: String,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[arg(long)]
    pub show: bool,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    crate::logging::init(cli.verbose, cli.quiet);

    let stdout_is_tty = io::stdout().is_terminal();
    let stderr_is_tty = io::stderr().is_terminal();

    let home_dir = crate::config::home_dir().map_err(crate::exit::invalid_args_err)?;

    let env_config_path = std::env::var_os("APIWATCH_CONFIG").map(PathBuf::from);
    let mut cfg = crate::config::load(
        cli.config.as_deref().or(env_config_path.as_deref()),
        &home_dir,
    )
    .map_err(crate::exit::invalid_args_err)?;
    if let Some(dir) = &cli.state_dir {
        cfg.storage.state_dir = dir.clone();
    }

    let ui_cfg = UiConfig {
        color: stdout_is_tty && cfg.ui.color && !cli.no_color,
        stdout_is_tty,
        stderr_is_tty,
        max_table_rows: cfg.ui.max_table_rows,
        quiet: cli.quiet,
        verbose: cli.verbose,
    };
    let engine_opts = EngineOptions {
        manager: cfg.manager_options(),
        show_progress: ui_cfg.stderr_is_tty && !cli.quiet && !cli.json,
    };

    match cli.command {
        Commands::Analyze(args) => {
            let batch = read_capture_file(&args.file)?;
            let engine = Engine::in_memory(engine_opts)?;
            let session: SessionId = ANALYZE_SESSION
                .parse()
                .map_err(anyhow::Error::msg)?;
            engine.ingest_batch(&session, batch)?;
            let report = engine.report(&session)?;
            if cli.json {
                write_json(&report)?;
            } else if args.markdown {
                write_stdout(&crate::export::format_markdown_report(&report))?;
            } else {
                crate::ui::print_report(&report, &ui_cfg);
            }
        }
        Commands::Ingest(args) => {
            let batch = read_capture_file(&args.file)?;
            let engine = open_engine(&cfg, engine_opts)?;
            let summary = engine.ingest_batch(&args.session, batch)?;
            if cli.json {
                write_json(&summary)?;
            } else {
                crate::ui::print_ingest_summary(&summary, &ui_cfg);
            }
        }
        Commands::Report(args) => {
            let engine = open_engine(&cfg, engine_opts)?;
            let report = engine.report(&args.session)?;
            if cli.json {
                write_json(&report)?;
            } else if args.markdown {
                write_stdout(&crate::export::format_markdown_report(&report))?;
            } else {
                crate::ui::print_report(&report, &ui_cfg);
            }
        }
        Commands::Routes(args) => {
            let engine = open_engine(&cfg, engine_opts)?;
            let report = engine.report(&args.session)?;
            if cli.json {
                write_json(&report.routes)?;
            } else {
                crate::ui::print_routes(&report.routes, &ui_cfg);
            }
        }
        Commands::Clear(args) => {
            let engine = open_engine(&cfg, engine_opts)?;
            engine.clear(&args.session)?;
            if cli.json {
                write_json(&serde_json::json!({ "session": args.session, "cleared": true }))?;
            } else if !ui_cfg.quiet {
                println!("session {} cleared", args.session);
            }
        }
        Commands::ExportOpenapi(args) => {
            let engine = open_engine(&cfg, engine_opts)?;
            let report = engine.report(&args.session)?;
            let doc = crate::export::openapi(&report.exchanges).with_context(|| {
                format!("session {} has no exchanges to describe", args.session)
            })?;
            write_json(&doc)?;
        }
        Commands::Completion(args) => {
            let shell = parse_shell(&args.shell)?;
            let mut cmd = Cli::command();
            let mut out = std::io::stdout().lock();
            clap_complete::generate(shell, &mut cmd, "apiwatch", &mut out);
        }
        Commands::Config(args) => {
            if args.show {
                if cli.json {
                    write_json(&cfg)?;
                } else {
                    write_stdout(&toml::to_string_pretty(&cfg)?)?;
                }
            } else if !ui_cfg.quiet {
                eprintln!("config: use `apiwatch config --show`");
            }
        }
    }

    Ok(())
}

fn open_engine(cfg: &EffectiveConfig, opts: EngineOptions) -> Result<Engine> {
    let dir = &cfg.storage.state_dir;
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create state directory: {}", dir.display()))
        .map_err(crate::exit::storage_err)?;
    tracing::debug!(state_dir = %dir.display(), "opening session storage");
    Engine::new(Arc::new(FileStore::new(dir)), opts)
}

fn read_capture_file(path: &Path) -> Result<CaptureBatch> {
    let (name, text) = if path.as_os_str() == "-" {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read capture records from stdin")
            .map_err(crate::exit::invalid_args_err)?;
        ("<stdin>".to_string(), buf)
    } else {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read capture file: {}", path.display()))
            .map_err(crate::exit::invalid_args_err)?;
        (path.display().to_string(), text)
    };
    let batch = parse_capture_text(&name, &text)?;
    tracing::debug!(
        file = %name,
        records = batch.records.len(),
        rejected = batch.rejected,
        "capture file loaded"
    );
    Ok(batch)
}

/// Parses a JSON array of capture records, or one record per line.
///
/// Text that is not JSON at all is an invalid argument. Well-formed JSON that
/// is not a capture record is logged and counted as rejected.
fn parse_capture_text(name: &str, text: &str) -> Result<CaptureBatch> {
    let mut batch = CaptureBatch::default();

    if text.trim_start().starts_with('[') {
        let values: Vec<Value> = serde_json::from_str(text).map_err(|err| {
            crate::exit::invalid_args(format!("{name}: invalid capture array: {err}"))
        })?;
        for (idx, value) in values.into_iter().enumerate() {
            decode_record(&mut batch, value, name, "record", idx + 1);
        }
        return Ok(batch);
    }

    for (idx, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let value: Value = serde_json::from_str(line).map_err(|err| {
            crate::exit::invalid_args(format!("{name}: line {}: {err}", idx + 1))
        })?;
        decode_record(&mut batch, value, name, "line", idx + 1);
    }
    Ok(batch)
}

fn decode_record(batch: &mut CaptureBatch, value: Value, name: &str, unit: &str, pos: usize) {
    match serde_json::from_value::<CaptureRecord>(value) {
        Ok(record) => batch.records.push(record),
        Err(err) => {
            tracing::warn!(
                file = %name,
                unit,
                position = pos,
                error = %err,
                "capture record skipped"
            );
            batch.rejected += 1;
        }
    }
}

fn write_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    use std::io::Write;

    let buf = serde_json::to_vec_pretty(value)?;

    let mut stdout = std::io::stdout().lock();
    match stdout.write_all(&buf) {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::BrokenPipe => return Ok(()),
        Err(err) => return Err(err.into()),
    }
    match stdout.write_all(b"\n") {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
        Err(err) => Err(err.into()),
    }
}

fn write_stdout(text: &str) -> Result<()> {
    use std::io::Write;

    let mut stdout = std::io::stdout().lock();
    match stdout.write_all(text.as_bytes()) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
        Err(err) => Err(err.into()),
    }
}

fn parse_shell(s: &str) -> Result<clap_complete::Shell> {
    let s = s.trim().to_ascii_lowercase();
    match s.as_str() {
        "bash" => Ok(clap_complete::Shell::Bash),
        "zsh" => Ok(clap_complete::Shell::Zsh),
        "fish" => Ok(clap_complete::Shell::Fish),
        other => Err(crate::exit::invalid_args(format!(
            "unsupported shell: {other} (expected bash|zsh|fish)"
        ))),
    }
}
