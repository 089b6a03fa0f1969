mod exchange;
mod finding;
mod headers;
mod method;
mod report;
mod severity;

pub use exchange::{CaptureRecord, Exchange, body_text, is_truthy};
pub use finding::{Finding, FindingKind, OwaspCategory, sort_by_severity};
pub use headers::{HeaderMap, HeaderPair, RawHeaders};
pub use method::HttpMethod;
pub use report::{Report, ReportFinding, SessionStats, SlowCall, health_score};
pub use severity::Severity;
