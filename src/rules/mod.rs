use std::collections::HashSet;
use std::net::IpAddr;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::LazyLock;

use regex::Regex;
use url::{Host, Url};

use crate::core::{Exchange, Finding, FindingKind, HeaderMap, body_text, is_truthy};

pub const DEFAULT_SLOW_RESPONSE_MS: u64 = 5000;

fn ci(pattern: &str) -> Regex {
    Regex::new(&format!("(?i){pattern}")).expect("valid rule regex")
}

static SENSITIVE_QUERY: LazyLock<Regex> =
    LazyLock::new(|| ci(r"token|key|secret|password|auth|api[_-]?key|bearer|jwt"));
static SENSITIVE_BODY: LazyLock<Regex> = LazyLock::new(|| {
    ci(r"password|secret|token|api[_-]?key|credit[_-]?card|ssn|social[_-]?security")
});
static SENSITIVE_PATH: LazyLock<Regex> =
    LazyLock::new(|| ci(r"/(user|profile|account|admin|api)"));
static CACHE_PRIVATE: LazyLock<Regex> = LazyLock::new(|| ci(r"no-store|no-cache|private"));
static SQL_META: LazyLock<Regex> = LazyLock::new(|| {
    ci(r#"'|"|;|--|/\*|\*/|xp_|sp_|exec|execute|select|insert|update|delete|drop|union|or\s+1\s*=\s*1"#)
});
static SHELL_META: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[;&|`$(){}\[\]<>]").expect("valid rule regex"));
static XXE_TOKENS: LazyLock<Regex> = LazyLock::new(|| ci(r"<!DOCTYPE|<!ENTITY|SYSTEM"));
static DEPRECATED_VERSION: LazyLock<Regex> = LazyLock::new(|| ci(r"/v[0-2](?:$|/)"));
static BASIC_AUTH: LazyLock<Regex> = LazyLock::new(|| ci(r"^\s*Basic\s+"));
static ERROR_DETAIL: LazyLock<Regex> = LazyLock::new(|| ci(r"stack|trace|exception|debug"));
static SSRF_PARAM: LazyLock<Regex> =
    LazyLock::new(|| ci(r"url|uri|redirect|fetch|load|include|file|path"));

const RATE_LIMIT_HEADERS: &[&str] = &["x-ratelimit-limit", "ratelimit-limit", "ratelimit"];
const INTEGRITY_HEADERS: &[&str] = &[
    "etag",
    "content-md5",
    "x-content-digest",
    "content-digest",
    "repr-digest",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleOptions {
    pub slow_response_ms: u64,
    /// Emit `no_security_headers` for 2xx responses captured without headers.
    pub header_fallback: bool,
}

impl Default for RuleOptions {
    fn default() -> Self {
        Self {
            slow_response_ms: DEFAULT_SLOW_RESPONSE_MS,
            header_fallback: true,
        }
    }
}

#[derive(Debug)]
pub struct RuleContext<'a> {
    pub exchange: &'a Exchange,
    pub url: Url,
    pub query: String,
    pub query_params: Vec<(String, String)>,
    pub request_text: Option<String>,
    pub response_text: Option<String>,
    pub opts: &'a RuleOptions,
}

impl<'a> RuleContext<'a> {
    pub fn new(exchange: &'a Exchange, opts: &'a RuleOptions) -> Option<Self> {
        let url = Url::parse(&exchange.url).ok()?;
        let query_params: Vec<(String, String)> = match url.query() {
            Some(q) if !q.is_empty() => url
                .query_pairs()
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect(),
            _ => Vec::new(),
        };
        let query = query_params
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");

        Some(Self {
            exchange,
            url,
            query,
            query_params,
            request_text: exchange.request_body.as_ref().map(body_text),
            response_text: exchange.response_body.as_ref().map(body_text),
            opts,
        })
    }

    fn headers(&self) -> &HeaderMap {
        &self.exchange.response_headers
    }

    fn status(&self) -> u16 {
        self.exchange.status_code
    }

    fn path(&self) -> &str {
        self.url.path()
    }

    fn authorization(&self) -> Option<&str> {
        present(&self.exchange.request_headers, "authorization")
            .or_else(|| present(self.headers(), "authorization"))
    }
}

/// Runs every rule with default options.
pub fn evaluate(exchange: &Exchange) -> Vec<Finding> {
    evaluate_with(exchange, &RuleOptions::default())
}

pub fn evaluate_with(exchange: &Exchange, opts: &RuleOptions) -> Vec<Finding> {
    match catch_unwind(AssertUnwindSafe(|| run_rules(exchange, opts))) {
        Ok(findings) => findings,
        Err(_) => {
            tracing::error!(url = %exchange.url, "security analysis aborted; no findings recorded");
            Vec::new()
        }
    }
}

fn run_rules(exchange: &Exchange, opts: &RuleOptions) -> Vec<Finding> {
    let Some(ctx) = RuleContext::new(exchange, opts) else {
        tracing::debug!(url = %exchange.url, "unparsable url; skipping analysis");
        return Vec::new();
    };

    let mut out = Vec::new();
    out.extend(authentication_required(&ctx));
    out.extend(authorization_failed(&ctx));
    out.extend(potential_idor(&ctx));
    out.extend(insecure_protocol(&ctx));
    out.extend(sensitive_data_in_url(&ctx));
    out.extend(sensitive_data_in_response(&ctx));
    out.extend(sensitive_data_cached(&ctx));
    out.extend(sql_injection_pattern(&ctx));
    out.extend(command_injection_pattern(&ctx));
    out.extend(xxe_vulnerability(&ctx));
    out.extend(no_rate_limiting(&ctx));
    out.extend(no_request_size_limit(&ctx));
    out.extend(slow_response(&ctx));
    out.extend(security_headers(&ctx));
    out.extend(cors_policy(&ctx));
    out.extend(deprecated_api_version(&ctx));
    out.extend(basic_auth(&ctx));
    out.extend(missing_authentication(&ctx));
    out.extend(no_integrity_check(&ctx));
    out.extend(error_details_exposed(&ctx));
    out.extend(potential_ssrf(&ctx));
    out.extend(server_info_disclosed(&ctx));
    out.extend(technology_disclosed(&ctx));

    let findings = dedup_by_kind(out);
    tracing::debug!(
        method = %exchange.method,
        url = %exchange.url,
        findings = findings.len(),
        "security analysis complete"
    );
    findings
}

/// Keeps the first finding of each kind, preserving evaluation order.
pub fn dedup_by_kind(findings: Vec<Finding>) -> Vec<Finding> {
    let mut seen = HashSet::new();
    findings
        .into_iter()
        .filter(|f| seen.insert(f.kind))
        .collect()
}

fn authentication_required(ctx: &RuleContext) -> Option<Finding> {
    (ctx.status() == 401).then(|| Finding::new(FindingKind::AuthenticationRequired))
}

fn authorization_failed(ctx: &RuleContext) -> Option<Finding> {
    (ctx.status() == 403).then(|| Finding::new(FindingKind::AuthorizationFailed))
}

fn potential_idor(ctx: &RuleContext) -> Option<Finding> {
    let numeric_segment = ctx
        .url
        .path_segments()?
        .any(|seg| !seg.is_empty() && seg.bytes().all(|b| b.is_ascii_digit()));
    numeric_segment.then(|| Finding::new(FindingKind::PotentialIdor))
}

fn insecure_protocol(ctx: &RuleContext) -> Option<Finding> {
    if ctx.url.scheme() == "https" || is_loopback(&ctx.url) {
        return None;
    }
    Some(Finding::new(FindingKind::InsecureProtocol))
}

fn sensitive_data_in_url(ctx: &RuleContext) -> Option<Finding> {
    SENSITIVE_QUERY
        .is_match(&ctx.query)
        .then(|| Finding::new(FindingKind::SensitiveDataInUrl))
}

fn sensitive_data_in_response(ctx: &RuleContext) -> Option<Finding> {
    let text = ctx.response_text.as_deref()?;
    SENSITIVE_BODY
        .is_match(text)
        .then(|| Finding::new(FindingKind::SensitiveDataInResponse))
}

fn sensitive_data_cached(ctx: &RuleContext) -> Option<Finding> {
    if !SENSITIVE_PATH.is_match(ctx.path()) {
        return None;
    }
    match present(ctx.headers(), "cache-control") {
        Some(v) if CACHE_PRIVATE.is_match(v) => None,
        _ => Some(Finding::new(FindingKind::SensitiveDataCached)),
    }
}

fn sql_injection_pattern(ctx: &RuleContext) -> Option<Finding> {
    SQL_META
        .is_match(&ctx.query)
        .then(|| Finding::new(FindingKind::SqlInjectionPattern))
}

fn command_injection_pattern(ctx: &RuleContext) -> Option<Finding> {
    let hit = ctx
        .query_params
        .iter()
        .any(|(k, v)| SHELL_META.is_match(k) || SHELL_META.is_match(v));
    hit.then(|| Finding::new(FindingKind::CommandInjectionPattern))
}

fn xxe_vulnerability(ctx: &RuleContext) -> Option<Finding> {
    let text = ctx.request_text.as_deref()?;
    XXE_TOKENS
        .is_match(text)
        .then(|| Finding::new(FindingKind::XxeVulnerability))
}

fn no_rate_limiting(ctx: &RuleContext) -> Option<Finding> {
    let limited = RATE_LIMIT_HEADERS
        .iter()
        .any(|h| present(ctx.headers(), h).is_some());
    (!limited).then(|| Finding::new(FindingKind::NoRateLimiting))
}

fn no_request_size_limit(ctx: &RuleContext) -> Option<Finding> {
    ctx.exchange.request_body.as_ref()?;
    let sized = present(&ctx.exchange.request_headers, "content-length").is_some()
        || present(ctx.headers(), "content-length").is_some();
    (!sized).then(|| Finding::new(FindingKind::NoRequestSizeLimit))
}

fn slow_response(ctx: &RuleContext) -> Option<Finding> {
    let duration = ctx.exchange.duration_ms;
    if duration <= ctx.opts.slow_response_ms {
        return None;
    }
    Some(Finding::with_message(
        FindingKind::SlowResponse,
        format!("Slow API response ({duration}ms) - potential timing attack surface"),
    ))
}

fn security_headers(ctx: &RuleContext) -> Vec<Finding> {
    const CHECKS: &[(&str, FindingKind)] = &[
        ("strict-transport-security", FindingKind::MissingHsts),
        ("x-content-type-options", FindingKind::MissingXContentTypeOptions),
        ("x-frame-options", FindingKind::MissingXFrameOptions),
        ("x-xss-protection", FindingKind::MissingXXssProtection),
        ("content-security-policy", FindingKind::MissingCsp),
        ("referrer-policy", FindingKind::MissingReferrerPolicy),
    ];

    let headers = ctx.headers();
    if headers.is_empty() {
        let success = (200..300).contains(&ctx.status());
        if success && ctx.opts.header_fallback {
            return vec![Finding::new(FindingKind::NoSecurityHeaders)];
        }
        return Vec::new();
    }

    CHECKS
        .iter()
        .filter(|(name, _)| present(headers, name).is_none())
        .map(|(_, kind)| Finding::new(*kind))
        .collect()
}

fn cors_policy(ctx: &RuleContext) -> Vec<Finding> {
    let mut out = Vec::new();
    let Some(origin) = ctx.headers().get("access-control-allow-origin").map(str::trim) else {
        return out;
    };

    if origin == "*" {
        out.push(Finding::new(FindingKind::CorsAllowAllOrigins));
        let credentials = ctx
            .headers()
            .get("access-control-allow-credentials")
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("true"));
        if credentials {
            out.push(Finding::new(FindingKind::CorsCredentialsWithWildcard));
        }
    } else if origin.to_ascii_lowercase().contains("null") {
        out.push(Finding::new(FindingKind::CorsAllowsNullOrigin));
    }
    out
}

fn deprecated_api_version(ctx: &RuleContext) -> Option<Finding> {
    DEPRECATED_VERSION
        .is_match(ctx.path())
        .then(|| Finding::new(FindingKind::DeprecatedApiVersion))
}

fn basic_auth(ctx: &RuleContext) -> Option<Finding> {
    let auth = ctx.authorization()?;
    BASIC_AUTH
        .is_match(auth)
        .then(|| Finding::new(FindingKind::BasicAuthOverHttp))
}

fn missing_authentication(ctx: &RuleContext) -> Option<Finding> {
    if ctx.status() != 200 || !SENSITIVE_PATH.is_match(ctx.path()) {
        return None;
    }
    if ctx.authorization().is_some() {
        return None;
    }
    let body_token = ctx
        .exchange
        .request_body
        .as_ref()
        .and_then(|b| b.get("token"));
    if is_truthy(body_token) {
        return None;
    }
    Some(Finding::new(FindingKind::MissingAuthentication))
}

fn no_integrity_check(ctx: &RuleContext) -> Option<Finding> {
    let verified = INTEGRITY_HEADERS
        .iter()
        .any(|h| present(ctx.headers(), h).is_some());
    (!verified).then(|| Finding::new(FindingKind::NoIntegrityCheck))
}

fn error_details_exposed(ctx: &RuleContext) -> Option<Finding> {
    if ctx.status() < 500 {
        return None;
    }
    let text = ctx.response_text.as_deref()?;
    ERROR_DETAIL
        .is_match(text)
        .then(|| Finding::new(FindingKind::ErrorDetailsExposed))
}

fn potential_ssrf(ctx: &RuleContext) -> Option<Finding> {
    SSRF_PARAM
        .is_match(&ctx.query)
        .then(|| Finding::new(FindingKind::PotentialSsrf))
}

fn server_info_disclosed(ctx: &RuleContext) -> Option<Finding> {
    let server = present(ctx.headers(), "server")?;
    Some(Finding::with_message(
        FindingKind::ServerInfoDisclosed,
        format!("Server information disclosed: {server}"),
    ))
}

fn technology_disclosed(ctx: &RuleContext) -> Option<Finding> {
    let powered_by = present(ctx.headers(), "x-powered-by")?;
    Some(Finding::with_message(
        FindingKind::TechnologyDisclosed,
        format!("Technology stack disclosed: {powered_by}"),
    ))
}

/// Header value, treating an empty value as absent.
fn present<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    headers.get(name).filter(|v| !v.trim().is_empty())
}

fn is_loopback(url: &Url) -> bool {
    match url.host() {
        Some(Host::Domain(domain)) => {
            let domain = domain.trim_end_matches('.').to_ascii_lowercase();
            domain == "localhost" || domain.ends_with(".localhost")
        }
        Some(Host::Ipv4(ip)) => IpAddr::V4(ip).is_loopback(),
        Some(Host::Ipv6(ip)) => IpAddr::V6(ip).is_loopback(),
        None => false,
    }
}
