//! Environment store – key/value pairs handed to every engine launch.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Well-known key selecting the APDU backend.
pub const APDU_BACKEND_KEY: &str = "LPAC_APDU";
/// Well-known key selecting the HTTP backend.
pub const HTTP_BACKEND_KEY: &str = "LPAC_HTTP";

/// Shared, mutable `String -> String` mapping.
///
/// Clones share the same underlying map. No validation is applied to keys or
/// values. Launches read a snapshot, so a mutation racing a launch is seen
/// either entirely or not at all by that launch.
#[derive(Debug, Clone, Default)]
pub struct EnvStore {
    vars: Arc<RwLock<HashMap<String, String>>>,
}

impl EnvStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.vars
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.vars
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.into(), value.into());
    }

    /// Remove `key`, returning the previous value.
    pub fn delete(&self, key: &str) -> Option<String> {
        self.vars
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key)
    }

    pub fn snapshot(&self) -> HashMap<String, String> {
        self.vars.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl FromIterator<(String, String)> for EnvStore {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            vars: Arc::new(RwLock::new(iter.into_iter().collect())),
        }
    }
}

/// Parse a `KEY=VALUE` assignment. The value may itself contain `=`.
pub fn parse_assignment(s: &str) -> Option<(String, String)> {
    let (key, value) = s.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    Some((key.to_string(), value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_then_delete_is_absent() {
        let env = EnvStore::new();
        env.set("LPAC_APDU", "pcsc");
        assert_eq!(env.get("LPAC_APDU").as_deref(), Some("pcsc"));
        assert_eq!(env.delete("LPAC_APDU").as_deref(), Some("pcsc"));
        assert_eq!(env.get("LPAC_APDU"), None);
        assert_eq!(env.delete("LPAC_APDU"), None);
    }

    #[test]
    fn test_clones_share_state() {
        let env = EnvStore::new();
        let other = env.clone();
        other.set("LPAC_HTTP", "curl");
        assert_eq!(env.get("LPAC_HTTP").as_deref(), Some("curl"));
    }

    #[test]
    fn test_snapshot_is_detached() {
        let env = EnvStore::new();
        env.set("A", "1");
        let snap = env.snapshot();
        env.set("A", "2");
        assert_eq!(snap["A"], "1");
    }

    #[test]
    fn test_parse_assignment() {
        assert_eq!(
            parse_assignment("LPAC_APDU=pcsc"),
            Some(("LPAC_APDU".into(), "pcsc".into()))
        );
        assert_eq!(
            parse_assignment("X=a=b"),
            Some(("X".into(), "a=b".into()))
        );
        assert_eq!(parse_assignment("EMPTY="), Some(("EMPTY".into(), String::new())));
        assert_eq!(parse_assignment("=oops"), None);
        assert_eq!(parse_assignment("novalue"), None);
    }
}
