//! Caller address whitelist.
//!
//! Patterns are regular expressions matched against the textual client
//! address. They compile while the channel files are parsed, so a bad
//! pattern fails the channel load and requests only ever run matches.

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::core::error::{GatewayError, GatewayResult};

/// Compiled whitelist patterns; serializes back to the pattern strings
#[derive(Debug, Clone, Default)]
pub struct Whitelist {
    patterns: Vec<Regex>,
}

impl Whitelist {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> GatewayResult<Self> {
        let mut compiled: Vec<Regex> = Vec::with_capacity(patterns.len());
        for pattern in patterns.iter().map(AsRef::as_ref).filter(|p| !p.is_empty()) {
            if compiled.iter().any(|re| re.as_str() == pattern) {
                continue;
            }
            let re = Regex::new(pattern)
                .map_err(|e| GatewayError::config(format!("Invalid whitelist pattern {}: {}", pattern, e)))?;
            compiled.push(re);
        }
        Ok(Self { patterns: compiled })
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.patterns.iter().map(Regex::as_str)
    }

    pub fn is_match(&self, address: &str) -> bool {
        self.patterns.iter().any(|re| re.is_match(address))
    }
}

impl PartialEq for Whitelist {
    fn eq(&self, other: &Self) -> bool {
        self.patterns().eq(other.patterns())
    }
}

impl Serialize for Whitelist {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.patterns())
    }
}

/// Accepts a single pattern, a list, or nothing
impl<'de> Deserialize<'de> for Whitelist {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            One(String),
            Many(Vec<String>),
            Nothing(()),
        }

        let patterns = match Repr::deserialize(deserializer)? {
            Repr::One(s) => vec![s],
            Repr::Many(v) => v,
            Repr::Nothing(()) => Vec::new(),
        };
        Whitelist::new(&patterns).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_forms() {
        let one: Whitelist = serde_yaml::from_str(r"'^10\.'").unwrap();
        assert_eq!(one.patterns().collect::<Vec<_>>(), vec![r"^10\."]);

        let many: Whitelist = serde_yaml::from_str("['^10\\.', '', '^10\\.', '^127\\.']").unwrap();
        assert_eq!(many.patterns().collect::<Vec<_>>(), vec![r"^10\.", r"^127\."]);

        let none: Whitelist = serde_yaml::from_str("~").unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_invalid_pattern_fails_to_load() {
        assert!(serde_yaml::from_str::<Whitelist>("'^(10'").is_err());
        assert!(matches!(Whitelist::new(&["[oops"]), Err(GatewayError::Configuration { .. })));
    }

    #[test]
    fn test_match() {
        let list = Whitelist::new(&[r"^10\.", r"^192\.168\."]).unwrap();
        assert!(list.is_match("10.1.2.3"));
        assert!(list.is_match("192.168.0.9"));
        assert!(!list.is_match("172.16.0.1"));
    }
}
