use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::{Finding, HeaderMap, HttpMethod};

/// One observation as reported by a capture source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureRecord {
    pub method: HttpMethod,
    pub url: String,
    #[serde(default)]
    pub status_code: u16,
    #[serde(default, alias = "duration")]
    pub duration_ms: u64,
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub response_headers: Option<HeaderMap>,
    #[serde(default)]
    pub request_headers: Option<HeaderMap>,
    #[serde(default)]
    pub request_body: Option<Value>,
    #[serde(default)]
    pub response_body: Option<Value>,
    #[serde(default)]
    pub page_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Exchange {
    pub method: HttpMethod,
    pub url: String,
    pub status_code: u16,
    pub duration_ms: u64,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_body: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_body: Option<Value>,
    #[serde(default)]
    pub response_headers: HeaderMap,
    #[serde(default, skip_serializing_if = "HeaderMap::is_empty")]
    pub request_headers: HeaderMap,
    pub page_url: String,
    #[serde(default)]
    pub findings: Vec<Finding>,
}

impl Exchange {
    /// Normalizes a capture record. `now_ms` fills in a missing timestamp.
    pub fn from_capture(record: CaptureRecord, now_ms: i64) -> Self {
        let timestamp = match record.timestamp {
            Some(ts) if ts > 0 => ts,
            _ => now_ms,
        };
        let page_url = record
            .page_url
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| record.url.clone());
        Self {
            method: record.method,
            url: record.url,
            status_code: record.status_code,
            duration_ms: record.duration_ms,
            timestamp,
            request_body: record.request_body.filter(|b| !b.is_null()),
            response_body: record.response_body.filter(|b| !b.is_null()),
            response_headers: record.response_headers.unwrap_or_default(),
            request_headers: record.request_headers.unwrap_or_default(),
            page_url,
            findings: Vec::new(),
        }
    }

    pub fn is_slow(&self, threshold_ms: u64) -> bool {
        self.duration_ms > threshold_ms
    }
}

/// Body rendered for pattern matching: strings verbatim, anything else as
/// compact JSON.
pub fn body_text(body: &Value) -> String {
    match body {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Truthiness of an optional JSON value.
pub fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(_)) | Some(Value::Object(_)) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_record_accepts_legacy_duration_and_header_object() {
        let record: CaptureRecord = serde_json::from_str(
            r#"{
                "method": "GET",
                "url": "https://api.example.com/api/items",
                "statusCode": 200,
                "duration": 812,
                "timestamp": 1700000000000,
                "responseHeaders": {"Server": "nginx"}
            }"#,
        )
        .expect("parse record");

        let ex = Exchange::from_capture(record, 1);
        assert_eq!(ex.duration_ms, 812);
        assert_eq!(ex.timestamp, 1_700_000_000_000);
        assert_eq!(ex.response_headers.get("server"), Some("nginx"));
        assert_eq!(ex.page_url, "https://api.example.com/api/items");
        assert!(ex.findings.is_empty());
    }

    #[test]
    fn missing_timestamp_uses_now_and_null_bodies_drop() {
        let record: CaptureRecord = serde_json::from_str(
            r#"{"method":"POST","url":"https://x.test/api","responseBody":null,"responseHeaders":null}"#,
        )
        .expect("parse record");
        let ex = Exchange::from_capture(record, 42);
        assert_eq!(ex.timestamp, 42);
        assert_eq!(ex.status_code, 0);
        assert!(ex.response_body.is_none());
        assert!(ex.response_headers.is_empty());
    }

    #[test]
    fn truthiness_follows_json_semantics() {
        assert!(!is_truthy(None));
        assert!(!is_truthy(Some(&Value::String(String::new()))));
        assert!(!is_truthy(Some(&serde_json::json!(0))));
        assert!(is_truthy(Some(&serde_json::json!("abc"))));
        assert!(is_truthy(Some(&serde_json::json!({}))));
    }

    #[test]
    fn body_text_keeps_strings_verbatim() {
        assert_eq!(body_text(&serde_json::json!("<!DOCTYPE x>")), "<!DOCTYPE x>");
        assert_eq!(body_text(&serde_json::json!({"a": 1})), r#"{"a":1}"#);
    }
}
