//! Measurement points and their InfluxDB line protocol encoding.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt::Write as _;

/// One timestamped, tagged record with named numeric fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    /// Measurement name (the configured device name)
    pub measurement: String,
    /// Tags, kept sorted by key
    pub tags: BTreeMap<String, String>,
    /// Fields in insertion order
    pub fields: Vec<(String, f64)>,
    /// Set when the point enters a write buffer, unless given explicitly
    pub timestamp: Option<DateTime<Utc>>,
}

impl Point {
    /// Create an empty point for `measurement`.
    pub fn new(measurement: impl Into<String>) -> Self {
        Self {
            measurement: measurement.into(),
            tags: BTreeMap::new(),
            fields: Vec::new(),
            timestamp: None,
        }
    }

    /// Add or replace a tag.
    pub fn add_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Add a field, replacing an earlier field with the same key.
    pub fn add_field(&mut self, key: impl Into<String>, value: f64) {
        let key = key.into();
        match self.fields.iter_mut().find(|(k, _)| *k == key) {
            Some(field) => field.1 = value,
            None => self.fields.push((key, value)),
        }
    }

    /// Set an explicit timestamp.
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Look up a field value.
    pub fn field(&self, key: &str) -> Option<f64> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| *v)
    }

    /// Look up a tag value.
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    /// Field keys in insertion order.
    pub fn field_keys(&self) -> Vec<&str> {
        self.fields.iter().map(|(k, _)| k.as_str()).collect()
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Encode as one line of InfluxDB line protocol with nanosecond precision.
    ///
    /// Non-finite fields cannot be represented and are left out. Returns `None`
    /// when no field remains.
    pub fn to_line_protocol(&self) -> Option<String> {
        let mut line = escape(&self.measurement, &[',', ' ']);

        for (key, value) in &self.tags {
            // empty tag values are not allowed
            if value.is_empty() {
                continue;
            }
            let _ = write!(
                line,
                ",{}={}",
                escape(key, &[',', '=', ' ']),
                escape(value, &[',', '=', ' '])
            );
        }

        let mut separator = ' ';
        for (key, value) in self.fields.iter().filter(|(_, v)| v.is_finite()) {
            let _ = write!(line, "{}{}={}", separator, escape(key, &[',', '=', ' ']), value);
            separator = ',';
        }
        if separator == ' ' {
            return None;
        }

        if let Some(nanos) = self.timestamp.and_then(|t| t.timestamp_nanos_opt()) {
            let _ = write!(line, " {}", nanos);
        }

        Some(line)
    }
}

fn escape(s: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if c == '\\' || special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
