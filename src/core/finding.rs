use crate::core::Severity;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum OwaspCategory {
    #[serde(rename = "A01:2021")]
    BrokenAccessControl,
    #[serde(rename = "A02:2021")]
    CryptographicFailures,
    #[serde(rename = "A03:2021")]
    Injection,
    #[serde(rename = "A04:2021")]
    InsecureDesign,
    #[serde(rename = "A05:2021")]
    SecurityMisconfiguration,
    #[serde(rename = "A06:2021")]
    VulnerableComponents,
    #[serde(rename = "A07:2021")]
    AuthenticationFailures,
    #[serde(rename = "A08:2021")]
    IntegrityFailures,
    #[serde(rename = "A09:2021")]
    LoggingFailures,
    #[serde(rename = "A10:2021")]
    ServerSideRequestForgery,
}

impl OwaspCategory {
    pub const fn code(self) -> &'static str {
        match self {
            OwaspCategory::BrokenAccessControl => "A01:2021",
            OwaspCategory::CryptographicFailures => "A02:2021",
            OwaspCategory::Injection => "A03:2021",
            OwaspCategory::InsecureDesign => "A04:2021",
            OwaspCategory::SecurityMisconfiguration => "A05:2021",
            OwaspCategory::VulnerableComponents => "A06:2021",
            OwaspCategory::AuthenticationFailures => "A07:2021",
            OwaspCategory::IntegrityFailures => "A08:2021",
            OwaspCategory::LoggingFailures => "A09:2021",
            OwaspCategory::ServerSideRequestForgery => "A10:2021",
        }
    }

    pub const fn title(self) -> &'static str {
        match self {
            OwaspCategory::BrokenAccessControl => "Broken Access Control",
            OwaspCategory::CryptographicFailures => "Cryptographic Failures",
            OwaspCategory::Injection => "Injection",
            OwaspCategory::InsecureDesign => "Insecure Design",
            OwaspCategory::SecurityMisconfiguration => "Security Misconfiguration",
            OwaspCategory::VulnerableComponents => "Vulnerable and Outdated Components",
            OwaspCategory::AuthenticationFailures => "Identification and Authentication Failures",
            OwaspCategory::IntegrityFailures => "Software and Data Integrity Failures",
            OwaspCategory::LoggingFailures => "Security Logging and Monitoring Failures",
            OwaspCategory::ServerSideRequestForgery => "Server-Side Request Forgery",
        }
    }
}

impl fmt::Display for OwaspCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Identifier of the rule that produced a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    AuthenticationRequired,
    AuthorizationFailed,
    PotentialIdor,
    InsecureProtocol,
    SensitiveDataInUrl,
    SensitiveDataInResponse,
    SensitiveDataCached,
    SqlInjectionPattern,
    CommandInjectionPattern,
    XxeVulnerability,
    NoRateLimiting,
    NoRequestSizeLimit,
    SlowResponse,
    MissingHsts,
    MissingXContentTypeOptions,
    MissingXFrameOptions,
    MissingXXssProtection,
    MissingCsp,
    MissingReferrerPolicy,
    NoSecurityHeaders,
    CorsAllowAllOrigins,
    CorsAllowsNullOrigin,
    CorsCredentialsWithWildcard,
    DeprecatedApiVersion,
    BasicAuthOverHttp,
    MissingAuthentication,
    NoIntegrityCheck,
    ErrorDetailsExposed,
    PotentialSsrf,
    ServerInfoDisclosed,
    TechnologyDisclosed,
}

impl FindingKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            FindingKind::AuthenticationRequired => "authentication_required",
            FindingKind::AuthorizationFailed => "authorization_failed",
            FindingKind::PotentialIdor => "potential_idor",
            FindingKind::InsecureProtocol => "insecure_protocol",
            FindingKind::SensitiveDataInUrl => "sensitive_data_in_url",
            FindingKind::SensitiveDataInResponse => "sensitive_data_in_response",
            FindingKind::SensitiveDataCached => "sensitive_data_cached",
            FindingKind::SqlInjectionPattern => "sql_injection_pattern",
            FindingKind::CommandInjectionPattern => "command_injection_pattern",
            FindingKind::XxeVulnerability => "xxe_vulnerability",
            FindingKind::NoRateLimiting => "no_rate_limiting",
            FindingKind::NoRequestSizeLimit => "no_request_size_limit",
            FindingKind::SlowResponse => "slow_response",
            FindingKind::MissingHsts => "missing_hsts",
            FindingKind::MissingXContentTypeOptions => "missing_x_content_type_options",
            FindingKind::MissingXFrameOptions => "missing_x_frame_options",
            FindingKind::MissingXXssProtection => "missing_x_xss_protection",
            FindingKind::MissingCsp => "missing_csp",
            FindingKind::MissingReferrerPolicy => "missing_referrer_policy",
            FindingKind::NoSecurityHeaders => "no_security_headers",
            FindingKind::CorsAllowAllOrigins => "cors_allow_all_origins",
            FindingKind::CorsAllowsNullOrigin => "cors_allows_null_origin",
            FindingKind::CorsCredentialsWithWildcard => "cors_credentials_with_wildcard",
            FindingKind::DeprecatedApiVersion => "deprecated_api_version",
            FindingKind::BasicAuthOverHttp => "basic_auth_over_http",
            FindingKind::MissingAuthentication => "missing_authentication",
            FindingKind::NoIntegrityCheck => "no_integrity_check",
            FindingKind::ErrorDetailsExposed => "error_details_exposed",
            FindingKind::PotentialSsrf => "potential_ssrf",
            FindingKind::ServerInfoDisclosed => "server_info_disclosed",
            FindingKind::TechnologyDisclosed => "technology_disclosed",
        }
    }

    pub const fn severity(self) -> Severity {
        match self {
            FindingKind::InsecureProtocol
            | FindingKind::SensitiveDataInUrl
            | FindingKind::SqlInjectionPattern
            | FindingKind::XxeVulnerability
            | FindingKind::CorsCredentialsWithWildcard => Severity::Critical,
            FindingKind::AuthenticationRequired
            | FindingKind::AuthorizationFailed
            | FindingKind::SensitiveDataInResponse
            | FindingKind::SensitiveDataCached
            | FindingKind::CommandInjectionPattern
            | FindingKind::MissingHsts
            | FindingKind::MissingCsp
            | FindingKind::CorsAllowAllOrigins
            | FindingKind::CorsAllowsNullOrigin
            | FindingKind::BasicAuthOverHttp
            | FindingKind::MissingAuthentication
            | FindingKind::ErrorDetailsExposed
            | FindingKind::PotentialSsrf => Severity::High,
            FindingKind::PotentialIdor
            | FindingKind::NoRateLimiting
            | FindingKind::MissingXContentTypeOptions
            | FindingKind::MissingXFrameOptions
            | FindingKind::NoSecurityHeaders
            | FindingKind::DeprecatedApiVersion
            | FindingKind::NoIntegrityCheck => Severity::Medium,
            FindingKind::NoRequestSizeLimit
            | FindingKind::SlowResponse
            | FindingKind::MissingXXssProtection
            | FindingKind::MissingReferrerPolicy
            | FindingKind::ServerInfoDisclosed
            | FindingKind::TechnologyDisclosed => Severity::Low,
        }
    }

    pub const fn category(self) -> OwaspCategory {
        match self {
            FindingKind::AuthenticationRequired
            | FindingKind::AuthorizationFailed
            | FindingKind::PotentialIdor => OwaspCategory::BrokenAccessControl,
            FindingKind::InsecureProtocol
            | FindingKind::SensitiveDataInUrl
            | FindingKind::SensitiveDataInResponse
            | FindingKind::SensitiveDataCached => OwaspCategory::CryptographicFailures,
            FindingKind::SqlInjectionPattern
            | FindingKind::CommandInjectionPattern
            | FindingKind::XxeVulnerability => OwaspCategory::Injection,
            FindingKind::NoRateLimiting
            | FindingKind::NoRequestSizeLimit
            | FindingKind::SlowResponse => OwaspCategory::InsecureDesign,
            FindingKind::MissingHsts
            | FindingKind::MissingXContentTypeOptions
            | FindingKind::MissingXFrameOptions
            | FindingKind::MissingXXssProtection
            | FindingKind::MissingCsp
            | FindingKind::MissingReferrerPolicy
            | FindingKind::NoSecurityHeaders
            | FindingKind::CorsAllowAllOrigins
            | FindingKind::CorsAllowsNullOrigin
            | FindingKind::CorsCredentialsWithWildcard
            | FindingKind::ServerInfoDisclosed
            | FindingKind::TechnologyDisclosed => OwaspCategory::SecurityMisconfiguration,
            FindingKind::DeprecatedApiVersion => OwaspCategory::VulnerableComponents,
            FindingKind::BasicAuthOverHttp | FindingKind::MissingAuthentication => {
                OwaspCategory::AuthenticationFailures
            }
            FindingKind::NoIntegrityCheck => OwaspCategory::IntegrityFailures,
            FindingKind::ErrorDetailsExposed => OwaspCategory::LoggingFailures,
            FindingKind::PotentialSsrf => OwaspCategory::ServerSideRequestForgery,
        }
    }

    pub const fn message(self) -> &'static str {
        match self {
            FindingKind::AuthenticationRequired => {
                "401 Unauthorized - authentication required but not provided"
            }
            FindingKind::AuthorizationFailed => "403 Forbidden - caller lacks required permissions",
            FindingKind::PotentialIdor => {
                "Potential IDOR vulnerability - numeric identifier in URL path"
            }
            FindingKind::InsecureProtocol => {
                "API uses HTTP instead of HTTPS - data is transmitted in plaintext"
            }
            FindingKind::SensitiveDataInUrl => {
                "Sensitive data (token/key/password) exposed in URL parameters"
            }
            FindingKind::SensitiveDataInResponse => {
                "Sensitive data (passwords/tokens/card numbers) exposed in response body"
            }
            FindingKind::SensitiveDataCached => {
                "Sensitive endpoint response may be cached - vulnerable to unauthorized access"
            }
            FindingKind::SqlInjectionPattern => {
                "Potential SQL injection pattern detected in URL parameters"
            }
            FindingKind::CommandInjectionPattern => {
                "Potential command injection pattern detected in URL parameters"
            }
            FindingKind::XxeVulnerability => {
                "Potential XXE (XML External Entity) payload in request body"
            }
            FindingKind::NoRateLimiting => {
                "No rate limiting headers detected - API may be open to brute force attacks"
            }
            FindingKind::NoRequestSizeLimit => {
                "Request body sent without Content-Length - potential for large payload attacks"
            }
            FindingKind::SlowResponse => "Slow API response - potential timing attack surface",
            FindingKind::MissingHsts => "Missing HSTS header - vulnerable to SSL stripping attacks",
            FindingKind::MissingXContentTypeOptions => {
                "Missing X-Content-Type-Options header - vulnerable to MIME type sniffing"
            }
            FindingKind::MissingXFrameOptions => {
                "Missing X-Frame-Options header - vulnerable to clickjacking"
            }
            FindingKind::MissingXXssProtection => "Missing X-XSS-Protection header",
            FindingKind::MissingCsp => {
                "Missing Content-Security-Policy header - vulnerable to XSS attacks"
            }
            FindingKind::MissingReferrerPolicy => "Missing Referrer-Policy header",
            FindingKind::NoSecurityHeaders => "No security headers detected in response",
            FindingKind::CorsAllowAllOrigins => {
                "CORS allows all origins (*) - any website can call this API"
            }
            FindingKind::CorsAllowsNullOrigin => {
                "CORS allows the null origin - reachable from sandboxed frames and local files"
            }
            FindingKind::CorsCredentialsWithWildcard => {
                "CORS allows credentials together with a wildcard origin"
            }
            FindingKind::DeprecatedApiVersion => {
                "Deprecated API version in use - may carry known vulnerabilities"
            }
            FindingKind::BasicAuthOverHttp => {
                "Basic authentication detected - credentials are trivially decoded"
            }
            FindingKind::MissingAuthentication => {
                "Sensitive endpoint answered without any authentication"
            }
            FindingKind::NoIntegrityCheck => {
                "No integrity verification headers - response could be tampered with"
            }
            FindingKind::ErrorDetailsExposed => "Detailed error information exposed in 5xx response",
            FindingKind::PotentialSsrf => {
                "Potential SSRF vulnerability - URL-like parameter in query string"
            }
            FindingKind::ServerInfoDisclosed => "Server information disclosed",
            FindingKind::TechnologyDisclosed => "Technology stack disclosed",
        }
    }

    pub const fn recommendation(self) -> &'static str {
        match self {
            FindingKind::AuthenticationRequired => {
                "Ensure proper authentication tokens or credentials are sent"
            }
            FindingKind::AuthorizationFailed => {
                "Verify the caller has proper authorization for this resource"
            }
            FindingKind::PotentialIdor => {
                "Verify that users cannot reach other users' resources by changing IDs"
            }
            FindingKind::InsecureProtocol => "Use HTTPS/TLS for all API endpoints",
            FindingKind::SensitiveDataInUrl => {
                "Move sensitive data to the Authorization header or the request body"
            }
            FindingKind::SensitiveDataInResponse => "Never return secrets in API responses",
            FindingKind::SensitiveDataCached => "Add Cache-Control: no-store, no-cache, private",
            FindingKind::SqlInjectionPattern => "Use parameterized queries and validate input",
            FindingKind::CommandInjectionPattern => "Sanitize and validate all user input",
            FindingKind::XxeVulnerability => "Disable XML external entity processing",
            FindingKind::NoRateLimiting => "Implement rate limiting and return X-RateLimit-* headers",
            FindingKind::NoRequestSizeLimit => "Enforce request size limits",
            FindingKind::SlowResponse => {
                "Optimize API performance and use constant-time comparisons"
            }
            FindingKind::MissingHsts => {
                "Add Strict-Transport-Security (e.g. max-age=31536000; includeSubDomains)"
            }
            FindingKind::MissingXContentTypeOptions => "Add X-Content-Type-Options: nosniff",
            FindingKind::MissingXFrameOptions => "Add X-Frame-Options: DENY or SAMEORIGIN",
            FindingKind::MissingXXssProtection => "Add X-XSS-Protection: 1; mode=block",
            FindingKind::MissingCsp => "Implement a strict Content-Security-Policy",
            FindingKind::MissingReferrerPolicy => {
                "Add Referrer-Policy: strict-origin-when-cross-origin"
            }
            FindingKind::NoSecurityHeaders => {
                "Implement security headers (HSTS, CSP, X-Frame-Options, ...)"
            }
            FindingKind::CorsAllowAllOrigins => "Restrict CORS to specific trusted origins",
            FindingKind::CorsAllowsNullOrigin => "Never allow the null origin in a CORS policy",
            FindingKind::CorsCredentialsWithWildcard => {
                "Never combine a wildcard origin with Access-Control-Allow-Credentials: true"
            }
            FindingKind::DeprecatedApiVersion => "Upgrade to the latest API version",
            FindingKind::BasicAuthOverHttp => "Use OAuth 2.0, signed tokens or another modern scheme",
            FindingKind::MissingAuthentication => "Require authentication for sensitive endpoints",
            FindingKind::NoIntegrityCheck => {
                "Add ETag or Content-Digest headers for integrity verification"
            }
            FindingKind::ErrorDetailsExposed => {
                "Return generic error messages to clients and log details server-side"
            }
            FindingKind::PotentialSsrf => {
                "Validate and allowlist outbound URLs, block access to internal networks"
            }
            FindingKind::ServerInfoDisclosed => "Remove or obfuscate the Server header",
            FindingKind::TechnologyDisclosed => "Remove the X-Powered-By header",
        }
    }
}

impl fmt::Display for FindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub severity: Severity,
    pub kind: FindingKind,
    pub message: String,
    pub category: OwaspCategory,
    pub recommendation: String,
}

impl Finding {
    pub fn new(kind: FindingKind) -> Self {
        Self::with_message(kind, kind.message())
    }

    pub fn with_message(kind: FindingKind, message: impl Into<String>) -> Self {
        Self {
            severity: kind.severity(),
            kind,
            message: message.into(),
            category: kind.category(),
            recommendation: kind.recommendation().to_string(),
        }
    }
}

/// Stable sort, critical first; ties keep their evaluation order.
pub fn sort_by_severity<T>(items: &mut [T], severity: impl Fn(&T) -> Severity) {
    items.sort_by_key(|item| std::cmp::Reverse(severity(item)));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_serializes_as_rule_id() {
        let v = serde_json::to_value(FindingKind::CorsCredentialsWithWildcard).expect("serialize");
        assert_eq!(v, serde_json::json!("cors_credentials_with_wildcard"));
        assert_eq!(
            FindingKind::CorsCredentialsWithWildcard.as_str(),
            "cors_credentials_with_wildcard"
        );
    }

    #[test]
    fn finding_json_shape() {
        let v =
            serde_json::to_value(Finding::new(FindingKind::InsecureProtocol)).expect("serialize");
        assert_eq!(v["severity"], "critical");
        assert_eq!(v["kind"], "insecure_protocol");
        assert_eq!(v["category"], "A02:2021");
        assert!(v["recommendation"].as_str().is_some_and(|s| s.contains("HTTPS")));
    }

    #[test]
    fn sort_by_severity_is_stable() {
        let mut findings = vec![
            Finding::new(FindingKind::ServerInfoDisclosed),
            Finding::new(FindingKind::MissingHsts),
            Finding::new(FindingKind::InsecureProtocol),
            Finding::new(FindingKind::MissingCsp),
        ];
        sort_by_severity(&mut findings, |f| f.severity);
        let kinds: Vec<FindingKind> = findings.iter().map(|f| f.kind).collect();
        assert_eq!(
            kinds,
            vec![
                FindingKind::InsecureProtocol,
                FindingKind::MissingHsts,
                FindingKind::MissingCsp,
                FindingKind::ServerInfoDisclosed,
            ]
        );
    }
}
