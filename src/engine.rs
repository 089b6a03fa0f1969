use std::collections::BTreeMap;
use std::io::IsTerminal;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::core::{CaptureRecord, Report, ReportFinding, Severity, SlowCall, sort_by_severity};
use crate::persist::{MemoryStore, SnapshotStore};
use crate::session::{ManagerOptions, SessionId, SessionManager, SessionView, Source};

pub const SCHEMA_VERSION: &str = "1.0";

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub manager: ManagerOptions,
    pub show_progress: bool,
}

pub struct Engine {
    opts: EngineOptions,
    manager: SessionManager,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestSummary {
    pub session: SessionId,
    pub accepted: usize,
    pub rejected: usize,
    pub findings: usize,
    pub stored: usize,
}

/// Decoded capture records plus a count of the ones that were not.
#[derive(Debug, Clone, Default)]
pub struct CaptureBatch {
    pub records: Vec<CaptureRecord>,
    pub rejected: usize,
}

impl Engine {
    pub fn new(store: Arc<dyn SnapshotStore>, opts: EngineOptions) -> Result<Self> {
        let manager = SessionManager::new(store, opts.manager.clone())
            .context("failed to start persistence worker")
            .map_err(crate::exit::storage_err)?;
        Ok(Self { opts, manager })
    }

    pub fn in_memory(opts: EngineOptions) -> Result<Self> {
        Self::new(Arc::new(MemoryStore::new()), opts)
    }

    /// Focuses `session` and feeds every record through the direct path.
    pub fn ingest(
        &self,
        session: &SessionId,
        records: Vec<CaptureRecord>,
    ) -> Result<IngestSummary> {
        self.ingest_batch(
            session,
            CaptureBatch {
                records,
                rejected: 0,
            },
        )
    }

    /// Like [`Engine::ingest`], carrying over records that failed to decode.
    pub fn ingest_batch(&self, session: &SessionId, batch: CaptureBatch) -> Result<IngestSummary> {
        let CaptureBatch { records, rejected } = batch;
        self.manager.register(session);

        let progress_enabled = self.opts.show_progress && std::io::stderr().is_terminal();
        let pb = if progress_enabled {
            let pb = indicatif::ProgressBar::new(records.len() as u64);
            pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
            pb.set_message("analyzing exchanges");
            pb.enable_steady_tick(Duration::from_millis(120));
            Some(pb)
        } else {
            None
        };

        let mut summary = IngestSummary {
            session: session.clone(),
            accepted: 0,
            rejected,
            findings: 0,
            stored: 0,
        };
        for record in records {
            match self.manager.ingest(record, Source::Direct) {
                Ok(accepted) => {
                    summary.accepted += 1;
                    summary.findings += accepted.findings;
                    summary.stored = accepted.stored;
                }
                Err(err) => {
                    tracing::warn!(session = %session, error = %err, "capture record rejected");
                    summary.rejected += 1;
                }
            }
            if let Some(pb) = &pb {
                pb.inc(1);
            }
        }

        if let Some(pb) = pb {
            pb.finish_and_clear();
        }
        self.flush()?;
        Ok(summary)
    }

    /// Focuses `session` (hydrating it) and builds its report.
    pub fn report(&self, session: &SessionId) -> Result<Report> {
        self.manager.register(session);
        let view = self
            .manager
            .view()
            .with_context(|| format!("session {session} is not available"))?;
        Ok(build_report(view, self.opts.manager.slow_call_ms))
    }

    pub fn clear(&self, session: &SessionId) -> Result<()> {
        self.manager.clear(session);
        self.flush()
    }

    pub fn flush(&self) -> Result<()> {
        self.manager
            .flush()
            .context("failed to flush session snapshots")
            .map_err(crate::exit::storage_err)
    }
}

pub fn build_report(view: SessionView, slow_call_ms: u64) -> Report {
    let mut findings: Vec<ReportFinding> = view
        .exchanges
        .iter()
        .flat_map(|ex| {
            ex.findings.iter().map(|f| ReportFinding {
                method: ex.method.clone(),
                url: ex.url.clone(),
                finding: f.clone(),
            })
        })
        .collect();
    sort_by_severity(&mut findings, |f| f.finding.severity);

    let mut severity_counts: BTreeMap<Severity, usize> =
        Severity::ALL.iter().map(|s| (*s, 0)).collect();
    for f in &findings {
        *severity_counts.entry(f.finding.severity).or_default() += 1;
    }

    let mut slow_calls: Vec<SlowCall> = view
        .exchanges
        .iter()
        .filter(|ex| ex.is_slow(slow_call_ms))
        .map(|ex| SlowCall {
            method: ex.method.clone(),
            url: ex.url.clone(),
            duration_ms: ex.duration_ms,
            status_code: ex.status_code,
        })
        .collect();
    slow_calls.sort_by_key(|c| std::cmp::Reverse(c.duration_ms));

    let generated_at = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "unknown".to_string());

    Report {
        schema_version: SCHEMA_VERSION.to_string(),
        tool_version: env!("CARGO_PKG_VERSION").to_string(),
        generated_at,
        session: view.session.to_string(),
        stats: view.stats,
        severity_counts,
        findings,
        slow_calls,
        routes: view.routes,
        exchanges: view.exchanges,
    }
}
