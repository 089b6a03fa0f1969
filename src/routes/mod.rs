use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::core::{Exchange, HttpMethod};

pub const DEFAULT_DEDUP_WINDOW_MS: u64 = 1000;
/// Endpoints kept per route; the least recently seen one makes room.
pub const MAX_ENDPOINTS_PER_ROUTE: usize = 100;
/// Routes kept per index; the least recently active one makes room.
pub const MAX_ROUTES: usize = 100;

/// One endpoint a page route has been seen calling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointSummary {
    pub endpoint: String,
    pub method: HttpMethod,
    pub status_code: u16,
    pub duration_ms: u64,
    pub last_seen: i64,
    pub count: u64,
}

type RoutePairs = Vec<(String, Vec<EndpointSummary>)>;

/// Page route key (`host + path`) to the endpoints it invoked, keys sorted.
///
/// Persisted as a list of `[routeKey, [summary, ...]]` pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RoutePairs", into = "RoutePairs")]
pub struct RouteIndex {
    routes: BTreeMap<String, Vec<EndpointSummary>>,
}

impl RouteIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, route: &str) -> Option<&[EndpointSummary]> {
        self.routes.get(route).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn clear(&mut self) {
        self.routes.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[EndpointSummary])> {
        self.routes.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn endpoint_count(&self) -> usize {
        self.routes.values().map(Vec::len).sum()
    }
}

impl From<RoutePairs> for RouteIndex {
    fn from(pairs: RoutePairs) -> Self {
        let mut routes: BTreeMap<String, Vec<EndpointSummary>> = BTreeMap::new();
        for (route, summaries) in pairs {
            routes.entry(route).or_default().extend(summaries);
        }
        Self { routes }
    }
}

impl From<RouteIndex> for RoutePairs {
    fn from(index: RouteIndex) -> Self {
        index.routes.into_iter().collect()
    }
}

/// `host + path` of a page URL, path defaulting to `/`.
pub fn route_key(page_url: &str) -> Option<String> {
    let url = Url::parse(page_url).ok()?;
    let host = url.host_str().unwrap_or_default();
    let path = match url.path() {
        "" => "/",
        p => p,
    };
    Some(format!("{host}{path}"))
}

/// Indexes `exchange` under its page route. Returns whether the index changed.
pub fn record(index: &mut RouteIndex, exchange: &Exchange, window_ms: u64) -> bool {
    let Some(route) = route_key(&exchange.page_url) else {
        tracing::debug!(page_url = %exchange.page_url, "unparsable page url; route not indexed");
        return false;
    };

    if !index.routes.contains_key(&route) && index.routes.len() >= MAX_ROUTES {
        evict_stalest_route(index);
    }
    let summaries = index.routes.entry(route).or_default();
    let existing = summaries
        .iter_mut()
        .find(|s| s.endpoint == exchange.url && s.method == exchange.method);

    match existing {
        Some(summary) => {
            let since = exchange.timestamp.saturating_sub(summary.last_seen);
            if since.unsigned_abs() < window_ms {
                return false;
            }
            summary.count += 1;
            summary.last_seen = exchange.timestamp;
            summary.status_code = exchange.status_code;
            summary.duration_ms = exchange.duration_ms;
        }
        None => {
            if summaries.len() >= MAX_ENDPOINTS_PER_ROUTE {
                let stalest = summaries
                    .iter()
                    .enumerate()
                    .min_by_key(|(_, s)| s.last_seen)
                    .map(|(idx, _)| idx);
                if let Some(idx) = stalest {
                    summaries.remove(idx);
                }
            }
            summaries.push(EndpointSummary {
                endpoint: exchange.url.clone(),
                method: exchange.method.clone(),
                status_code: exchange.status_code,
                duration_ms: exchange.duration_ms,
                last_seen: exchange.timestamp,
                count: 1,
            });
        }
    }
    true
}

fn evict_stalest_route(index: &mut RouteIndex) {
    let stalest = index
        .routes
        .iter()
        .min_by_key(|(_, summaries)| summaries.iter().map(|s| s.last_seen).max())
        .map(|(route, _)| route.clone());
    if let Some(route) = stalest {
        tracing::debug!(route = %route, "route index full; dropping least recent route");
        index.routes.remove(&route);
    }
}
