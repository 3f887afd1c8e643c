//! `key=value` label selectors shared by balancing rules, physical
//! databases and microservices.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Label map attached to physical databases and microservices.
pub type Labels = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid label `{0}`: expected `key=value`")]
pub struct InvalidLabel(pub String);

/// A single `key=value` label.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LabelSelector {
    pub key: String,
    pub value: String,
}

impl LabelSelector {
    pub fn new(key: &str, value: &str) -> Self {
        Self {
            key: key.to_string(),
            value: value.to_string(),
        }
    }

    /// Whether `labels` carries this exact key/value pair.
    pub fn matches(&self, labels: &Labels) -> bool {
        labels.get(&self.key).is_some_and(|v| v == &self.value)
    }
}

impl FromStr for LabelSelector {
    type Err = InvalidLabel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (key, value) = s.split_once('=').ok_or_else(|| InvalidLabel(s.to_string()))?;
        let (key, value) = (key.trim(), value.trim());
        if key.is_empty() || value.is_empty() || value.contains('=') {
            return Err(InvalidLabel(s.to_string()));
        }
        Ok(Self::new(key, value))
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

impl Serialize for LabelSelector {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for LabelSelector {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_displays() {
        let label: LabelSelector = "team=core".parse().unwrap();
        assert_eq!(label, LabelSelector::new("team", "core"));
        assert_eq!(label.to_string(), "team=core");
    }

    #[test]
    fn rejects_malformed() {
        for raw in ["team", "=core", "team=", "a=b=c"] {
            assert!(raw.parse::<LabelSelector>().is_err(), "{raw}");
        }
    }

    #[test]
    fn matches_exact_pair() {
        let mut labels = Labels::new();
        labels.insert("team".to_string(), "core".to_string());

        assert!(LabelSelector::new("team", "core").matches(&labels));
        assert!(!LabelSelector::new("team", "edge").matches(&labels));
        assert!(!LabelSelector::new("tier", "core").matches(&labels));
    }

    #[test]
    fn deserializes_from_json_string() {
        let labels: Vec<LabelSelector> = serde_json::from_str(r#"["team=core","tier=gold"]"#).unwrap();
        assert_eq!(labels.len(), 2);
        assert!(serde_json::from_str::<LabelSelector>(r#""broken""#).is_err());
    }
}
