//! Custom item properties (multi-valued string map)

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Properties attached to a repository item
///
/// Each key may carry several values; keys and values are kept sorted so
/// equal property sets compare and serialize identically.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Properties {
    entries: BTreeMap<String, BTreeSet<String>>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value to a key, keeping existing values
    pub fn add(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries
            .entry(key.into())
            .or_default()
            .insert(value.into());
    }

    /// Replace all values of a key
    pub fn put(&mut self, key: impl Into<String>, values: impl IntoIterator<Item = String>) {
        self.entries.insert(key.into(), values.into_iter().collect());
    }

    /// All values of a key
    pub fn get(&self, key: &str) -> Option<&BTreeSet<String>> {
        self.entries.get(key)
    }

    /// First value of a key
    pub fn first(&self, key: &str) -> Option<&str> {
        self.entries
            .get(key)
            .and_then(|values| values.iter().next())
            .map(String::as_str)
    }

    pub fn remove(&mut self, key: &str) -> Option<BTreeSet<String>> {
        self.entries.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Iterate over `(key, value)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .flat_map(|(k, values)| values.iter().map(move |v| (k.as_str(), v.as_str())))
    }

    /// Overlay `other` on top of `self`: keys present in `other` replace ours
    pub fn overlay(&mut self, other: &Properties) {
        for (key, values) in &other.entries {
            self.entries.insert(key.clone(), values.clone());
        }
    }
}

impl FromIterator<(String, String)> for Properties {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        let mut props = Properties::new();
        for (k, v) in iter {
            props.add(k, v);
        }
        props
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multi_values() {
        let mut props = Properties::new();
        props.add("build.name", "nightly");
        props.add("build.name", "release");
        props.add("build.name", "nightly");

        assert_eq!(props.get("build.name").unwrap().len(), 2);
        assert_eq!(props.first("build.name"), Some("nightly"));
        assert_eq!(props.iter().count(), 2);
    }

    #[test]
    fn test_overlay() {
        let mut local = Properties::new();
        local.add("a", "1");
        local.add("b", "1");

        let mut remote = Properties::new();
        remote.add("b", "2");
        remote.add("c", "3");

        local.overlay(&remote);
        assert_eq!(local.first("a"), Some("1"));
        assert_eq!(local.first("b"), Some("2"));
        assert_eq!(local.get("b").unwrap().len(), 1);
        assert_eq!(local.first("c"), Some("3"));
    }

    #[test]
    fn test_json_shape() {
        let props: Properties = vec![("k".to_string(), "v".to_string())].into_iter().collect();
        let json = serde_json::to_string(&props).unwrap();
        assert_eq!(json, r#"{"k":["v"]}"#);
    }
}
