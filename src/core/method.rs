use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    /// Anything else, kept verbatim.
    Other(String),
}

impl HttpMethod {
    pub fn as_str(&self) -> &str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Other(s) => s,
        }
    }
}

impl From<String> for HttpMethod {
    fn from(s: String) -> Self {
        match s.as_str() {
            "GET" | "get" => HttpMethod::Get,
            "POST" | "post" => HttpMethod::Post,
            "PUT" | "put" => HttpMethod::Put,
            "DELETE" | "delete" => HttpMethod::Delete,
            "PATCH" | "patch" => HttpMethod::Patch,
            _ => HttpMethod::Other(s),
        }
    }
}

impl From<&str> for HttpMethod {
    fn from(s: &str) -> Self {
        HttpMethod::from(s.to_string())
    }
}

impl From<HttpMethod> for String {
    fn from(m: HttpMethod) -> Self {
        match m {
            HttpMethod::Other(s) => s,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_methods_pass_through_verbatim() {
        let m: HttpMethod = serde_json::from_str(r#""Options""#).expect("parse");
        assert_eq!(m, HttpMethod::Other("Options".to_string()));
        assert_eq!(serde_json::to_string(&m).expect("serialize"), r#""Options""#);
    }

    #[test]
    fn known_methods_normalize() {
        assert_eq!(HttpMethod::from("post"), HttpMethod::Post);
        assert_eq!(HttpMethod::Post.to_string(), "POST");
    }
}
