//! Request parameter storage and URL decoding.

use std::collections::HashMap;

use percent_encoding::percent_decode_str;
use url::form_urlencoded;

/// Multi-valued parameter map.
///
/// Values for one name keep their arrival order; names are enumerated in the
/// order they were first seen.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParameterMap {
    names: Vec<String>,
    values: HashMap<String, Vec<String>>,
}

impl ParameterMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode an `application/x-www-form-urlencoded` string (a query string
    /// or a form body). Pairs with an empty name are ignored.
    pub fn from_urlencoded(input: &[u8]) -> Self {
        let mut map = Self::new();
        for (name, value) in form_urlencoded::parse(input) {
            if name.is_empty() {
                continue;
            }
            map.push(name.into_owned(), value.into_owned());
        }
        map
    }

    /// Add a value after any existing values for `name`.
    pub fn push(&mut self, name: String, value: String) {
        match self.values.get_mut(&name) {
            Some(values) => values.push(value),
            None => {
                self.names.push(name.clone());
                self.values.insert(name, vec![value]);
            }
        }
    }

    /// Append every value of `other` after the values already present.
    pub fn extend(&mut self, other: ParameterMap) {
        let ParameterMap { names, mut values } = other;
        for name in names {
            if let Some(vals) = values.remove(&name) {
                for value in vals {
                    self.push(name.clone(), value);
                }
            }
        }
    }

    /// First value for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values
            .get(name)
            .and_then(|v| v.first())
            .map(String::as_str)
    }

    /// All values for `name`, empty if absent.
    pub fn values(&self, name: &str) -> &[String] {
        self.values.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Names in first-seen order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    /// Check if `name` has at least one value.
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Percent-decode a URI path. Invalid escapes are kept verbatim and the
/// result is interpreted as UTF-8 (lossy).
pub fn percent_decode_path(raw: &str) -> String {
    percent_decode_str(raw).decode_utf8_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_query_preserving_name_order() {
        let map = ParameterMap::from_urlencoded(b"b=2&a=1&b=3&c=hello+world&d=%41&=skip");
        let names: Vec<_> = map.names().collect();
        assert_eq!(names, vec!["b", "a", "c", "d"]);
        assert_eq!(map.get("b"), Some("2"));
        assert_eq!(map.values("b"), &["2".to_string(), "3".to_string()]);
        assert_eq!(map.get("c"), Some("hello world"));
        assert_eq!(map.get("d"), Some("A"));
        assert!(map.values("missing").is_empty());
    }

    #[test]
    fn extend_appends_after_existing_values() {
        let mut query = ParameterMap::from_urlencoded(b"x=query");
        query.extend(ParameterMap::from_urlencoded(b"x=body&y=1"));
        assert_eq!(query.get("x"), Some("query"));
        assert_eq!(query.values("x").len(), 2);
        assert_eq!(query.get("y"), Some("1"));
    }

    #[test]
    fn percent_decoding_of_paths() {
        assert_eq!(percent_decode_path("/a%20b"), "/a b");
        assert_eq!(percent_decode_path("/plain"), "/plain");
        assert_eq!(percent_decode_path("/bad%zz"), "/bad%zz");
        assert_eq!(percent_decode_path("/tail%2"), "/tail%2");
    }
}
