use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderPair {
    pub name: String,
    pub value: String,
}

/// The two header shapes capture sources emit.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawHeaders {
    List(Vec<RawHeaderPair>),
    Map(BTreeMap<String, serde_json::Value>),
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawHeaderPair {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub value: Option<serde_json::Value>,
}

/// Response or request headers keyed by lower-cased name.
///
/// Insertion order of first appearance is kept; a repeated name replaces the
/// earlier value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawHeaders", into = "Vec<HeaderPair>")]
pub struct HeaderMap {
    entries: Vec<HeaderPair>,
}

impl HeaderMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        let name = name.trim().to_ascii_lowercase();
        if name.is_empty() {
            return;
        }
        let value = value.into();
        match self.entries.iter_mut().find(|e| e.name == name) {
            Some(existing) => existing.value = value,
            None => self.entries.push(HeaderPair { name, value }),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.name.eq_ignore_ascii_case(name))
            .map(|e| e.value.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<N: AsRef<str>, V: Into<String>> FromIterator<(N, V)> for HeaderMap {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        let mut map = HeaderMap::new();
        for (name, value) in iter {
            map.insert(name.as_ref(), value);
        }
        map
    }
}

impl From<RawHeaders> for HeaderMap {
    fn from(raw: RawHeaders) -> Self {
        let mut map = HeaderMap::new();
        match raw {
            RawHeaders::List(pairs) => {
                for pair in pairs {
                    let Some(name) = pair.name else { continue };
                    map.insert(&name, value_text(pair.value.as_ref()));
                }
            }
            RawHeaders::Map(object) => {
                for (name, value) in object {
                    map.insert(&name, value_text(Some(&value)));
                }
            }
        }
        map
    }
}

impl From<HeaderMap> for Vec<HeaderPair> {
    fn from(map: HeaderMap) -> Self {
        map.entries
    }
}

fn value_text(value: Option<&serde_json::Value>) -> String {
    match value {
        None | Some(serde_json::Value::Null) => String::new(),
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}
