//! `INFO` reply parsing.

use std::collections::HashMap;

/// Key/value pairs from one or more `INFO` sections.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct InfoSection {
    fields: HashMap<String, String>,
}

impl InfoSection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    pub fn int(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(|v| v.trim().parse().ok())
    }

    pub fn float(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(|v| v.trim().parse().ok())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Parse raw `INFO` output.
///
/// Lines are `key:value`; blank lines and `# Section` headers are skipped.
/// Only the first `:` separates key from value, so values such as
/// `slave0:ip=10.0.0.2,port=6379,state=online` survive intact.
pub fn parse_info(raw: &str) -> InfoSection {
    let mut section = InfoSection::new();
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once(':') {
            section.insert(key, value);
        }
    }
    section
}
