//! Request parameters
//!
//! Route captures, query-string fields, form fields and headers are all
//! read through [`Param`], which distinguishes a missing value from a present
//! one and refuses to silently pick one of several values.

use super::{Error, Result};
use std::str::FromStr;

/// An ordered multi-valued set of named parameters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params {
    entries: Vec<(String, String)>,
}

impl Params {
    pub fn new() -> Self {
        Params {
            entries: Vec::new(),
        }
    }

    /// Add a value, keeping any earlier values with the same name
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// All values for a name, in insertion order
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Number of distinct names
    pub fn len(&self) -> usize {
        let mut names: Vec<&str> = self.entries.iter().map(|(n, _)| n.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over every `(name, value)` pair in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Decode `application/x-www-form-urlencoded` data
    ///
    /// Empty pairs are skipped; a key without `=` gets an empty value.
    pub fn from_form_data(data: &[u8]) -> Self {
        let mut params = Params::new();
        for (key, value) in url::form_urlencoded::parse(data) {
            if !key.is_empty() || !value.is_empty() {
                params.add(key, value);
            }
        }
        params
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Params {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut params = Params::new();
        for (name, value) in iter {
            params.add(name, value);
        }
        params
    }
}

/// A view of zero or more values for one named parameter
#[derive(Debug, Clone)]
pub struct Param<'a> {
    kind: &'static str,
    name: &'a str,
    values: Vec<&'a str>,
}

impl<'a> Param<'a> {
    /// `kind` names the source, e.g. "URL parameter", and shows up in errors
    pub fn new(kind: &'static str, name: &'a str, values: Vec<&'a str>) -> Self {
        Param { kind, name, values }
    }

    /// The single value, or `None` if absent
    ///
    /// Fails with `ParameterAmbiguous` if there is more than one value.
    pub fn optional(&self) -> Result<Option<&'a str>> {
        match self.values.as_slice() {
            [] => Ok(None),
            [value] => Ok(Some(*value)),
            _ => Err(Error::ParameterAmbiguous {
                kind: self.kind,
                name: self.name.to_string(),
            }),
        }
    }

    /// The single value, failing with `ParameterMissing` if absent
    pub fn get(&self) -> Result<&'a str> {
        self.optional()?.ok_or_else(|| Error::ParameterMissing {
            kind: self.kind,
            name: self.name.to_string(),
        })
    }

    /// The single value, or `default` if absent
    pub fn or(&self, default: &'a str) -> Result<&'a str> {
        Ok(self.optional()?.unwrap_or(default))
    }

    /// Every value, possibly none
    pub fn all(&self) -> &[&'a str] {
        &self.values
    }

    pub fn is_present(&self) -> bool {
        !self.values.is_empty()
    }

    /// Parse the single value with `FromStr`
    pub fn parse<T: FromStr>(&self) -> Result<T> {
        let value = self.get()?;
        value.trim().parse().map_err(|_| self.format_error(value))
    }

    /// Parse the single value with `FromStr`, or `None` if absent
    pub fn parse_optional<T: FromStr>(&self) -> Result<Option<T>> {
        match self.optional()? {
            Some(value) => value
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| self.format_error(value)),
            None => Ok(None),
        }
    }

    /// Interpret the single value as a boolean
    ///
    /// Accepts `true`, `on`, `yes`, `y`, `1` and `false`, `off`, `no`, `n`,
    /// `0`, ignoring case.
    pub fn as_bool(&self) -> Result<bool> {
        let value = self.get()?;
        parse_bool(value).ok_or_else(|| self.format_error(value))
    }

    /// Like [`as_bool`](Param::as_bool), but absent or empty yields `default`
    pub fn as_bool_or(&self, default: bool) -> Result<bool> {
        match self.optional()? {
            None | Some("") => Ok(default),
            Some(value) => parse_bool(value).ok_or_else(|| self.format_error(value)),
        }
    }

    fn format_error(&self, value: &str) -> Error {
        Error::ParameterFormat {
            kind: self.kind,
            name: self.name.to_string(),
            value: value.to_string(),
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "on" | "yes" | "y" | "1" => Some(true),
        "false" | "off" | "no" | "n" | "0" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn param<'a>(values: &[&'a str]) -> Param<'a> {
        Param::new("param", "testName", values.to_vec())
    }

    #[test]
    fn test_optional_and_default() {
        assert_eq!(param(&["hello"]).or("otherwise").unwrap(), "hello");
        assert_eq!(param(&[]).or("otherwise").unwrap(), "otherwise");
        assert_eq!(param(&[]).optional().unwrap(), None);
    }

    #[test]
    fn test_missing() {
        let err = param(&[]).get().unwrap_err();
        assert!(matches!(err, Error::ParameterMissing { kind: "param", .. }));
        assert_eq!(err.to_string(), "param 'testName' is missing");
    }

    #[test]
    fn test_ambiguous() {
        assert!(matches!(
            param(&["one", "two"]).or("otherwise"),
            Err(Error::ParameterAmbiguous { .. })
        ));
        assert_eq!(param(&["one", "two", "three"]).all(), ["one", "two", "three"]);
        assert!(param(&[]).all().is_empty());
    }

    #[test]
    fn test_as_bool() {
        for yes in ["TRUE", "yes", "1", "oN", "y"] {
            assert!(param(&[yes]).as_bool().unwrap(), "{}", yes);
        }
        for no in ["falSE", "no", "0", "off", "N"] {
            assert!(!param(&[no]).as_bool().unwrap(), "{}", no);
        }
        assert!(matches!(param(&["maybe"]).as_bool(), Err(Error::ParameterFormat { .. })));
        assert!(param(&[""]).as_bool_or(true).unwrap());
        assert!(!param(&[]).as_bool_or(false).unwrap());
    }

    #[test]
    fn test_parse() {
        assert_eq!(param(&["42"]).parse::<i32>().unwrap(), 42);
        assert_eq!(param(&[" 7 "]).parse::<u8>().unwrap(), 7);
        assert!(matches!(param(&["x"]).parse::<i32>(), Err(Error::ParameterFormat { .. })));
        assert_eq!(param(&[]).parse_optional::<i32>().unwrap(), None);
    }

    #[test]
    fn test_form_data() {
        let params = Params::from_form_data(b"one&foo=bar&&baz=&name=J%C3%BCrgen+X");
        assert_eq!(params.len(), 4);
        assert_eq!(params.get_all("one").collect::<Vec<_>>(), [""]);
        assert_eq!(params.get_all("foo").collect::<Vec<_>>(), ["bar"]);
        assert_eq!(params.get_all("baz").collect::<Vec<_>>(), [""]);
        assert_eq!(params.get_all("name").collect::<Vec<_>>(), ["J\u{fc}rgen X"]);
    }

    #[test]
    fn test_form_data_repeated_keys() {
        let params = Params::from_form_data(b"number=1&number=2&mouse=on&&soccer");
        assert_eq!(params.get_all("number").collect::<Vec<_>>(), ["1", "2"]);
        assert_eq!(params.len(), 3);
    }
}
