use anyhow::Error;
use std::io::{self, Write};
use unicode_width::UnicodeWidthChar;

use crate::core::{Report, ReportFinding, Severity};
use crate::engine::IngestSummary;
use crate::routes::RouteIndex;

const URL_COLUMN_CHARS: usize = 72;

#[derive(Debug, Clone)]
pub struct UiConfig {
    pub color: bool,
    pub stdout_is_tty: bool,
    pub stderr_is_tty: bool,
    pub max_table_rows: usize,
    pub quiet: bool,
    pub verbose: bool,
}

pub fn eprintln_error(err: &Error) {
    let mut stderr = io::stderr().lock();
    let _ = writeln!(stderr, "error:");
    let _ = writeln!(stderr, "  {err}");

    let mut causes = err.chain().skip(1).peekable();
    if causes.peek().is_some() {
        let _ = writeln!(stderr, "caused by:");
        for cause in causes {
            let _ = writeln!(stderr, "  - {cause}");
        }
    }

    let _ = writeln!(stderr, "next:");
    let _ = writeln!(stderr, "  - re-run with `--verbose` for details");
    let _ = writeln!(
        stderr,
        "  - see `apiwatch --help` for available commands and options"
    );
}

pub fn print_report(report: &Report, cfg: &UiConfig) {
    if cfg.quiet {
        return;
    }

    let mut out = io::stdout().lock();
    let _ = writeln!(
        out,
        "session {}: health={}  calls={}  findings={}  slow={}",
        report.session,
        format_health(report.stats.health_score, cfg.color),
        report.stats.total_calls,
        report.stats.total_findings,
        report.stats.slow_calls
    );

    let counts: Vec<String> = report
        .severity_counts
        .iter()
        .rev()
        .map(|(s, n)| format!("{}={n}", format_severity(*s, cfg.color)))
        .collect();
    let _ = writeln!(out, "severity: {}", counts.join("  "));

    let total = report.findings.len();
    let rows = cfg.max_table_rows.min(total);
    let _ = writeln!(out);
    if total == 0 {
        let _ = writeln!(out, "no findings");
    } else {
        if total > rows {
            let _ = writeln!(out, "findings ({rows} of {total}):");
        } else {
            let _ = writeln!(out, "findings ({rows}):");
        }
        print_findings_table(&mut out, &report.findings, rows, cfg.color);
        if total > rows {
            let _ = writeln!(out, "... {} more (use --json for all)", total - rows);
        }
    }

    if !report.slow_calls.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "slow calls ({}):", report.slow_calls.len());
        for call in report.slow_calls.iter().take(cfg.max_table_rows.max(1)) {
            let _ = writeln!(
                out,
                "- {:>6}ms  {} {}",
                call.duration_ms,
                call.method,
                truncate_middle(&call.url, URL_COLUMN_CHARS)
            );
        }
    }

    if cfg.verbose {
        for f in report.findings.iter().take(rows) {
            let _ = writeln!(out);
            let _ = writeln!(out, "{} ({})", f.finding.kind, f.finding.category);
            let _ = writeln!(out, "  {}", f.finding.recommendation);
        }
    }
}

pub fn print_routes(routes: &RouteIndex, cfg: &UiConfig) {
    if cfg.quiet {
        return;
    }

    let mut out = io::stdout().lock();
    if routes.is_empty() {
        let _ = writeln!(out, "no routes recorded");
        return;
    }
    for (route, endpoints) in routes.iter() {
        let _ = writeln!(out, "{route}");
        let method_w = endpoints
            .iter()
            .map(|e| visible_width_ansi(e.method.as_str()))
            .max()
            .unwrap_or(0);
        for e in endpoints {
            let _ = writeln!(
                out,
                "  {}  {:>3}  x{:<4} {}",
                pad_end_display(e.method.as_str(), method_w),
                e.status_code,
                e.count,
                truncate_middle(&e.endpoint, URL_COLUMN_CHARS)
            );
        }
    }
}

pub fn print_ingest_summary(summary: &IngestSummary, cfg: &UiConfig) {
    if cfg.quiet {
        return;
    }
    let mut out = io::stdout().lock();
    let _ = writeln!(
        out,
        "session {}: accepted={} rejected={} findings={} stored={}",
        summary.session, summary.accepted, summary.rejected, summary.findings, summary.stored
    );
}

pub fn truncate_middle(s: &str, max_chars: usize) -> String {
    let len = s.chars().count();
    if len <= max_chars {
        return s.to_string();
    }

    let keep = max_chars.saturating_sub(3);
    let left = keep / 2;
    let right = keep.saturating_sub(left);

    let prefix: String = s.chars().take(left).collect();
    let suffix: String = s
        .chars()
        .rev()
        .take(right)
        .collect::<String>()
        .chars()
        .rev()
        .collect();

    format!("{prefix}...{suffix}")
}

fn print_findings_table(out: &mut dyn Write, findings: &[ReportFinding], rows: usize, color: bool) {
    let label_severity = "SEVERITY";
    let label_rule = "RULE";
    let label_request = "REQUEST";

    let severity_w = visible_width_ansi(label_severity);
    let rule_w = findings
        .iter()
        .take(rows)
        .map(|f| visible_width_ansi(f.finding.kind.as_str()))
        .max()
        .unwrap_or(0)
        .max(visible_width_ansi(label_rule));

    let _ = writeln!(
        out,
        "{}  {}  {}",
        pad_end_display(label_severity, severity_w),
        pad_end_display(label_rule, rule_w),
        label_request
    );
    let _ = writeln!(
        out,
        "{}  {}  {}",
        "-".repeat(severity_w),
        "-".repeat(rule_w),
        "-".repeat(visible_width_ansi(label_request))
    );

    for f in findings.iter().take(rows) {
        let severity = pad_end_display(&format_severity(f.finding.severity, color), severity_w);
        let rule = pad_end_display(f.finding.kind.as_str(), rule_w);
        let request = format!("{} {}", f.method, truncate_middle(&f.url, URL_COLUMN_CHARS));
        let _ = writeln!(out, "{severity}  {rule}  {request}");
    }
}

fn format_severity(severity: Severity, color: bool) -> String {
    let s = severity.as_str();
    if !color {
        return s.to_string();
    }

    let code = match severity {
        Severity::Critical => "1;31",
        Severity::High => "31",
        Severity::Medium => "33",
        Severity::Low => "90",
    };
    format!("\x1b[{code}m{s}\x1b[0m")
}

fn format_health(score: u8, color: bool) -> String {
    let s = format!("{score}/100");
    if !color {
        return s;
    }
    let code = match score {
        80..=100 => "32",
        50..=79 => "33",
        _ => "31",
    };
    format!("\x1b[{code}m{s}\x1b[0m")
}

fn pad_end_display(s: &str, width: usize) -> String {
    let w = visible_width_ansi(s);
    if w >= width {
        return s.to_string();
    }
    format!("{s}{}", " ".repeat(width - w))
}

fn visible_width_ansi(s: &str) -> usize {
    let mut width: usize = 0;
    let mut chars = s.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '\x1b' && chars.peek() == Some(&'[') {
            let _ = chars.next();
            for ch2 in chars.by_ref() {
                if ch2 == 'm' {
                    break;
                }
            }
            continue;
        }
        width = width.saturating_add(UnicodeWidthChar::width(ch).unwrap_or(0));
    }
    width
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_middle_keeps_both_ends() {
        assert_eq!(truncate_middle("short", 10), "short");
        let t = truncate_middle("https://api.example.com/v3/orders/summary", 20);
        assert_eq!(t.chars().count(), 20);
        assert!(t.starts_with("https://"));
        assert!(t.ends_with("summary"));
        assert!(t.contains("..."));
    }

    #[test]
    fn colored_severity_pads_by_visible_width() {
        let colored = format_severity(Severity::High, true);
        assert_eq!(visible_width_ansi(&colored), 4);
        let padded = pad_end_display(&colored, 8);
        assert_eq!(visible_width_ansi(&padded), 8);
        assert!(padded.ends_with("    "));
    }
}
