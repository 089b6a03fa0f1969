use std::collections::BTreeMap;

use crate::core::{Exchange, Finding, HttpMethod, Severity};
use crate::routes::RouteIndex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub total_calls: usize,
    pub total_findings: usize,
    pub slow_calls: usize,
    pub health_score: u8,
}

impl SessionStats {
    pub fn from_exchanges<'a>(
        exchanges: impl IntoIterator<Item = &'a Exchange>,
        slow_call_ms: u64,
    ) -> Self {
        let mut total_calls = 0;
        let mut total_findings = 0;
        let mut slow_calls = 0;
        for exchange in exchanges {
            total_calls += 1;
            total_findings += exchange.findings.len();
            if exchange.is_slow(slow_call_ms) {
                slow_calls += 1;
            }
        }
        Self {
            total_calls,
            total_findings,
            slow_calls,
            health_score: health_score(total_findings, slow_calls),
        }
    }
}

/// `max(0, min(100, 100 - 5*findings - 2*slow))`
pub fn health_score(total_findings: usize, slow_calls: usize) -> u8 {
    let findings = u64::try_from(total_findings).unwrap_or(u64::MAX);
    let slow = u64::try_from(slow_calls).unwrap_or(u64::MAX);
    let penalty = findings.saturating_mul(5).saturating_add(slow.saturating_mul(2));
    100u64.saturating_sub(penalty).min(100) as u8
}

/// A finding flattened together with the call that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportFinding {
    pub method: HttpMethod,
    pub url: String,
    #[serde(flatten)]
    pub finding: Finding,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlowCall {
    pub method: HttpMethod,
    pub url: String,
    pub duration_ms: u64,
    pub status_code: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub schema_version: String,
    pub tool_version: String,
    pub generated_at: String,
    pub session: String,
    pub stats: SessionStats,
    pub severity_counts: BTreeMap<Severity, usize>,
    pub findings: Vec<ReportFinding>,
    pub slow_calls: Vec<SlowCall>,
    pub routes: RouteIndex,
    pub exchanges: Vec<Exchange>,
}
