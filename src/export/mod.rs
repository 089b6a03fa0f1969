use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde::Serialize;
use url::Url;

use crate::core::{Exchange, Report};

pub const OPENAPI_VERSION: &str = "3.0.0";

pub fn format_markdown_report(report: &Report) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "# apiwatch report");
    let _ = writeln!(out);
    let _ = writeln!(out, "- Session: `{}`", report.session);
    let _ = writeln!(out, "- Tool version: {}", report.tool_version);
    let _ = writeln!(out, "- Generated at: {}", report.generated_at);
    let _ = writeln!(out, "- Health score: {}/100", report.stats.health_score);
    let _ = writeln!(out, "- Calls: {}", report.stats.total_calls);
    let _ = writeln!(out, "- Findings: {}", report.stats.total_findings);
    let _ = writeln!(out, "- Slow calls: {}", report.stats.slow_calls);

    let _ = writeln!(out);
    let _ = writeln!(out, "## Severity");
    let _ = writeln!(out);
    for (severity, count) in report.severity_counts.iter().rev() {
        let _ = writeln!(out, "- {severity}: {count}");
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "## Findings ({})", report.findings.len());
    if report.findings.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "_No findings._");
    }
    for f in &report.findings {
        let finding = &f.finding;
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "### [{}] {}",
            finding.severity.as_str().to_ascii_uppercase(),
            finding.message
        );
        let _ = writeln!(out, "- Rule: `{}`", finding.kind);
        let _ = writeln!(out, "- Request: `{} {}`", f.method, f.url);
        let _ = writeln!(
            out,
            "- OWASP: {} {}",
            finding.category.code(),
            finding.category.title()
        );
        let _ = writeln!(out, "- Recommendation: {}", finding.recommendation);
    }

    if !report.slow_calls.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "## Slow calls ({})", report.slow_calls.len());
        let _ = writeln!(out);
        for call in &report.slow_calls {
            let _ = writeln!(
                out,
                "- `{} {}`: {}ms (status {})",
                call.method, call.url, call.duration_ms, call.status_code
            );
        }
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "## Routes ({})", report.routes.len());
    if report.routes.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "_No routes recorded._");
    }
    for (route, endpoints) in report.routes.iter() {
        let _ = writeln!(out);
        let _ = writeln!(out, "### `{route}`");
        for e in endpoints {
            let _ = writeln!(
                out,
                "- `{} {}` x{} (last status {}, {}ms)",
                e.method, e.endpoint, e.count, e.status_code, e.duration_ms
            );
        }
    }

    out
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpenApiDoc {
    pub openapi: String,
    pub info: OpenApiInfo,
    pub servers: Vec<OpenApiServer>,
    pub paths: BTreeMap<String, BTreeMap<String, OpenApiOperation>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpenApiInfo {
    pub title: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpenApiServer {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpenApiOperation {
    pub summary: String,
    pub responses: BTreeMap<String, OpenApiResponse>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpenApiResponse {
    pub description: String,
}

/// OpenAPI skeleton of the observed traffic. `None` when no exchange carries a
/// parsable URL.
pub fn openapi(exchanges: &[Exchange]) -> Option<OpenApiDoc> {
    let mut server = None;
    let mut paths: BTreeMap<String, BTreeMap<String, OpenApiOperation>> = BTreeMap::new();

    for ex in exchanges {
        let Ok(url) = Url::parse(&ex.url) else {
            tracing::debug!(url = %ex.url, "unparsable url left out of openapi export");
            continue;
        };
        if server.is_none() {
            server = Some(url.origin().ascii_serialization());
        }

        let path = url.path().to_string();
        let method = ex.method.as_str().to_ascii_lowercase();
        let op = paths
            .entry(path.clone())
            .or_default()
            .entry(method)
            .or_insert_with(|| OpenApiOperation {
                summary: format!("{} {}", ex.method, path),
                responses: BTreeMap::new(),
            });
        op.responses
            .entry(ex.status_code.to_string())
            .or_insert_with(|| OpenApiResponse {
                description: "Response".to_string(),
            });
    }

    Some(OpenApiDoc {
        openapi: OPENAPI_VERSION.to_string(),
        info: OpenApiInfo {
            title: "apiwatch".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
        servers: vec![OpenApiServer { url: server? }],
        paths,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Finding, FindingKind, HeaderMap, HttpMethod};
    use crate::engine::build_report;
    use crate::routes::RouteIndex;
    use crate::session::SessionView;
    use crate::core::SessionStats;

    fn exchange(method: &str, url: &str, status: u16) -> Exchange {
        Exchange {
            method: HttpMethod::from(method),
            url: url.to_string(),
            status_code: status,
            duration_ms: 10,
            timestamp: 1,
            request_body: None,
            response_body: None,
            response_headers: HeaderMap::new(),
            request_headers: HeaderMap::new(),
            page_url: "https://app.test/".to_string(),
            findings: Vec::new(),
        }
    }

    #[test]
    fn openapi_groups_paths_methods_and_statuses() {
        let doc = openapi(&[
            exchange("GET", "https://api.test:8443/items?page=2", 200),
            exchange("GET", "https://api.test:8443/items", 304),
            exchange("POST", "https://api.test:8443/items", 201),
            exchange("GET", "https://other.test/health", 200),
        ])
        .expect("document");

        assert_eq!(doc.servers[0].url, "https://api.test:8443");
        let items = &doc.paths["/items"];
        assert_eq!(items["get"].summary, "GET /items");
        let codes: Vec<&str> = items["get"].responses.keys().map(String::as_str).collect();
        assert_eq!(codes, vec!["200", "304"]);
        assert!(items["post"].responses.contains_key("201"));
        assert!(doc.paths.contains_key("/health"));

        let v = serde_json::to_value(&doc).expect("json");
        assert_eq!(v["openapi"], "3.0.0");
    }

    #[test]
    fn openapi_needs_a_parsable_exchange() {
        assert!(openapi(&[]).is_none());
        assert!(openapi(&[exchange("GET", "nope", 200)]).is_none());
    }

    #[test]
    fn markdown_lists_findings_by_severity() {
        let mut ex = exchange("GET", "http://api.test/items", 200);
        ex.findings = vec![
            Finding::new(FindingKind::MissingReferrerPolicy),
            Finding::new(FindingKind::InsecureProtocol),
        ];
        let exchanges = vec![ex];
        let view = SessionView {
            session: "tab-1".parse().expect("id"),
            stats: SessionStats::from_exchanges(&exchanges, 500),
            exchanges,
            routes: RouteIndex::new(),
        };
        let md = format_markdown_report(&build_report(view, 500));

        assert!(md.starts_with("# apiwatch report"));
        assert!(md.contains("- Health score: 90/100"));
        let critical = md.find("### [CRITICAL]").expect("critical heading");
        let low = md.find("### [LOW]").expect("low heading");
        assert!(critical < low);
        assert!(md.contains("- Rule: `insecure_protocol`"));
        assert!(md.contains("A02:2021"));
        assert!(md.contains("_No routes recorded._"));
    }
}
