use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::core::{Exchange, SessionStats};
use crate::routes::{self, RouteIndex};

pub const DEFAULT_CAPACITY: usize = 100;
pub const DEFAULT_SLOW_CALL_MS: u64 = 500;

/// Read-only copy of a session's state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub exchanges: Vec<Exchange>,
    pub routes: RouteIndex,
}

/// Bounded exchange history plus route index for one inspected context.
#[derive(Debug)]
pub struct Session {
    exchanges: VecDeque<Exchange>,
    routes: RouteIndex,
    capacity: usize,
    dedup_window_ms: u64,
}

impl Session {
    pub fn new(capacity: usize, dedup_window_ms: u64) -> Self {
        let capacity = capacity.max(1);
        Self {
            exchanges: VecDeque::with_capacity(capacity),
            routes: RouteIndex::new(),
            capacity,
            dedup_window_ms,
        }
    }

    /// Rebuilds a session from a persisted snapshot, keeping only the newest
    /// `capacity` exchanges.
    pub fn restore(snapshot: SessionSnapshot, capacity: usize, dedup_window_ms: u64) -> Self {
        let mut session = Self::new(capacity, dedup_window_ms);
        let skip = snapshot.exchanges.len().saturating_sub(session.capacity);
        session.exchanges.extend(snapshot.exchanges.into_iter().skip(skip));
        session.routes = snapshot.routes;
        session
    }

    /// Appends an exchange, indexing its route and evicting the oldest entries
    /// past capacity.
    pub fn append(&mut self, mut exchange: Exchange) {
        if let Some(newest) = self.exchanges.back() {
            exchange.timestamp = exchange.timestamp.max(newest.timestamp);
        }
        routes::record(&mut self.routes, &exchange, self.dedup_window_ms);
        self.exchanges.push_back(exchange);
        while self.exchanges.len() > self.capacity {
            self.exchanges.pop_front();
        }
    }

    pub fn reset(&mut self) {
        self.exchanges.clear();
        self.routes.clear();
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            exchanges: self.exchanges.iter().cloned().collect(),
            routes: self.routes.clone(),
        }
    }

    pub fn stats(&self, slow_call_ms: u64) -> SessionStats {
        SessionStats::from_exchanges(&self.exchanges, slow_call_ms)
    }

    pub fn len(&self) -> usize {
        self.exchanges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exchanges.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn exchanges(&self) -> impl Iterator<Item = &Exchange> {
        self.exchanges.iter()
    }

    pub fn routes(&self) -> &RouteIndex {
        &self.routes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Finding, FindingKind, HeaderMap, HttpMethod};

    fn exchange(n: i64) -> Exchange {
        Exchange {
            method: HttpMethod::Get,
            url: format!("https://api.test/items?page={n}"),
            status_code: 200,
            duration_ms: 10,
            timestamp: n,
            request_body: None,
            response_body: None,
            response_headers: HeaderMap::new(),
            request_headers: HeaderMap::new(),
            page_url: "https://app.test/items".to_string(),
            findings: Vec::new(),
        }
    }

    #[test]
    fn keeps_newest_up_to_capacity() {
        let mut session = Session::new(DEFAULT_CAPACITY, 1000);
        for n in 1..=150 {
            session.append(exchange(n));
        }
        assert_eq!(session.len(), 100);
        let first = session.exchanges().next().expect("non-empty");
        assert_eq!(first.timestamp, 51);
        let last = session.exchanges().last().expect("non-empty");
        assert_eq!(last.timestamp, 150);
    }

    #[test]
    fn zero_capacity_is_raised_to_one() {
        let mut session = Session::new(0, 1000);
        session.append(exchange(1));
        session.append(exchange(2));
        assert_eq!(session.capacity(), 1);
        assert_eq!(session.len(), 1);
    }

    #[test]
    fn timestamps_never_decrease() {
        let mut session = Session::new(10, 1000);
        session.append(exchange(500));
        session.append(exchange(100));
        let stamps: Vec<i64> = session.exchanges().map(|e| e.timestamp).collect();
        assert_eq!(stamps, vec![500, 500]);
    }

    #[test]
    fn reset_clears_exchanges_and_routes() {
        let mut session = Session::new(10, 1000);
        session.append(exchange(1));
        assert!(!session.routes().is_empty());
        session.reset();
        assert!(session.is_empty());
        assert!(session.routes().is_empty());
        assert_eq!(session.snapshot(), SessionSnapshot::default());
    }

    #[test]
    fn stats_count_findings_and_slow_calls() {
        let mut session = Session::new(10, 1000);
        let mut slow = exchange(1);
        slow.duration_ms = 501;
        slow.findings = vec![
            Finding::new(FindingKind::MissingCsp),
            Finding::new(FindingKind::NoRateLimiting),
        ];
        session.append(slow);
        let mut edge = exchange(2);
        edge.duration_ms = 500;
        session.append(edge);

        let stats = session.stats(DEFAULT_SLOW_CALL_MS);
        assert_eq!(stats.total_calls, 2);
        assert_eq!(stats.total_findings, 2);
        assert_eq!(stats.slow_calls, 1);
        assert_eq!(stats.health_score, 88);
    }

    #[test]
    fn restore_trims_to_capacity() {
        let snapshot = SessionSnapshot {
            exchanges: (1..=5).map(exchange).collect(),
            routes: RouteIndex::new(),
        };
        let session = Session::restore(snapshot, 3, 1000);
        let stamps: Vec<i64> = session.exchanges().map(|e| e.timestamp).collect();
        assert_eq!(stamps, vec![3, 4, 5]);
    }
}
