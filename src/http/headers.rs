//! HTTP headers handling
//!
//! This module provides a type for managing HTTP header fields with
//! case-insensitive lookups. Each field name is stored once, with the casing
//! it was first seen with; repeated fields are merged into a single
//! comma-separated value as RFC7230 section 3.2.2 allows.

use super::{Error, Result};
use std::fmt;

/// Returns true for RFC7230 `tchar` bytes, the only bytes allowed in a field name.
pub fn is_tchar(b: u8) -> bool {
    matches!(b,
        b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-' | b'.'
        | b'^' | b'_' | b'`' | b'|' | b'~'
        | b'0'..=b'9' | b'A'..=b'Z' | b'a'..=b'z')
}

/// Check that a field name is a non-empty RFC7230 token
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidHeader("Empty header name".to_string()));
    }
    if let Some(c) = name.chars().find(|&c| !c.is_ascii() || !is_tchar(c as u8)) {
        return Err(Error::InvalidHeader(format!(
            "Illegal character {:?} in header name {:?}",
            c, name
        )));
    }
    Ok(())
}

/// Check that a field value only holds printable ISO-8859-1 characters or tabs
pub fn validate_value(value: &str) -> Result<()> {
    let illegal = value.chars().find(|&c| {
        let c = c as u32;
        (c < 0x20 && c != 0x09) || c == 0x7f || c > 0xff
    });
    match illegal {
        Some(c) => Err(Error::InvalidHeader(format!(
            "Illegal character U+{:04X} in header value",
            c as u32
        ))),
        None => Ok(()),
    }
}

/// HTTP header collection
///
/// Fields are kept in insertion order. Lookups ignore ASCII case.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    fields: Vec<(String, String)>,
}

impl Headers {
    /// Create a new empty header collection
    pub fn new() -> Self {
        Headers { fields: Vec::new() }
    }

    /// Append a value to a header
    ///
    /// If the header already exists the new value is joined onto the old one
    /// with `", "`. Both name and value are validated first.
    pub fn append(&mut self, name: &str, value: &str) -> Result<()> {
        validate_name(name)?;
        validate_value(value)?;
        self.merge(name, value);
        Ok(())
    }

    /// Set a header, replacing any existing value
    ///
    /// The casing of an existing field name is kept.
    pub fn set(&mut self, name: &str, value: &str) -> Result<()> {
        validate_name(name)?;
        validate_value(value)?;
        match self.position(name) {
            Some(i) => self.fields[i].1 = value.to_string(),
            None => self.fields.push((name.to_string(), value.to_string())),
        }
        Ok(())
    }

    /// Merge without validation, for input the parser has already vetted
    pub(crate) fn merge(&mut self, name: &str, value: &str) {
        match self.position(name) {
            Some(i) => {
                let existing = &mut self.fields[i].1;
                existing.push_str(", ");
                existing.push_str(value);
            }
            None => self.fields.push((name.to_string(), value.to_string())),
        }
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.fields
            .iter()
            .position(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    /// Get the (possibly joined) value of a header
    pub fn get(&self, name: &str) -> Option<&str> {
        self.position(name).map(|i| self.fields[i].1.as_str())
    }

    /// Iterate over the comma-separated elements of a header value
    ///
    /// Empty elements are skipped and surrounding whitespace is trimmed.
    pub fn values<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a str> + 'a {
        self.get(name)
            .into_iter()
            .flat_map(|v| v.split(','))
            .map(|v| v.trim_matches(|c| c == ' ' || c == '\t'))
            .filter(|v| !v.is_empty())
    }

    /// Check whether a comma-separated header contains a token, ignoring case
    pub fn contains_token(&self, name: &str, token: &str) -> bool {
        self.values(name).any(|v| v.eq_ignore_ascii_case(token))
    }

    /// Check if a header exists
    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Remove a header, returning its value
    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.position(name).map(|i| self.fields.remove(i).1)
    }

    /// Get the number of distinct header names
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Check if there are no headers
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Clear all headers
    pub fn clear(&mut self) {
        self.fields.clear();
    }

    /// Iterate over all headers in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.fields {
            writeln!(f, "{}: {}", name, value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_get() {
        let mut headers = Headers::new();
        headers.set("Content-Type", "text/html").unwrap();
        headers.set("Content-Length", "42").unwrap();

        assert_eq!(headers.get("Content-Type"), Some("text/html"));
        assert_eq!(headers.get("Content-Length"), Some("42"));
        assert_eq!(headers.get("Missing"), None);
    }

    #[test]
    fn test_case_insensitive() {
        let mut headers = Headers::new();
        headers.set("Content-Type", "text/html").unwrap();

        assert_eq!(headers.get("content-type"), Some("text/html"));
        assert_eq!(headers.get("CONTENT-TYPE"), Some("text/html"));
        assert_eq!(headers.get("CoNtEnT-TyPe"), Some("text/html"));
    }

    #[test]
    fn test_append_joins_values() {
        let mut headers = Headers::new();
        headers.append("Banana", "fruit").unwrap();
        headers.append("BANANA", "vegetable").unwrap();

        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get("banana"), Some("fruit, vegetable"));
        let names: Vec<_> = headers.iter().map(|(n, _)| n).collect();
        assert_eq!(names, ["Banana"]);
        let values: Vec<_> = headers.values("Banana").collect();
        assert_eq!(values, ["fruit", "vegetable"]);
    }

    #[test]
    fn test_set_replaces_and_keeps_casing() {
        let mut headers = Headers::new();
        headers.set("X-Custom", "first").unwrap();
        headers.set("x-custom", "second").unwrap();

        assert_eq!(headers.iter().collect::<Vec<_>>(), [("X-Custom", "second")]);
    }

    #[test]
    fn test_contains_token() {
        let mut headers = Headers::new();
        headers.set("Connection", "Keep-Alive, Upgrade").unwrap();

        assert!(headers.contains_token("connection", "keep-alive"));
        assert!(headers.contains_token("Connection", "upgrade"));
        assert!(!headers.contains_token("Connection", "close"));
    }

    #[test]
    fn test_remove() {
        let mut headers = Headers::new();
        headers.set("X-Remove", "value1").unwrap();
        headers.set("X-Keep", "value2").unwrap();

        assert_eq!(headers.remove("x-remove"), Some("value1".to_string()));
        assert_eq!(headers.get("X-Remove"), None);
        assert_eq!(headers.get("X-Keep"), Some("value2"));
        assert!(headers.contains("x-keep"));
    }

    #[test]
    fn test_rejects_invalid_names() {
        let mut headers = Headers::new();
        assert!(matches!(headers.set("Bad Name", "v"), Err(Error::InvalidHeader(_))));
        assert!(headers.append("", "v").is_err());
        assert!(headers.set("Colon:", "v").is_err());
        assert!(headers.set("Ünicode", "v").is_err());
        assert!(headers.is_empty());
    }

    #[test]
    fn test_rejects_invalid_values() {
        let mut headers = Headers::new();
        assert!(headers.set("X-Nul", "a\0b").is_err());
        assert!(headers.set("X-Newline", "a\r\nInjected: yes").is_err());
        assert!(headers.set("X-Del", "\u{7f}").is_err());
        assert!(headers.set("X-Wide", "\u{20ac}").is_err());
        assert!(headers.is_empty());

        headers.set("X-Tab", "a\tb").unwrap();
        headers.set("X-Latin1", "caf\u{e9}").unwrap();
        assert_eq!(headers.len(), 2);
    }
}
