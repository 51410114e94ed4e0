//! Per-session key/value state.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::OnceLock;

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_.\-]*)\s*\}\}").expect("placeholder pattern is valid")
    })
}

/// Mutable state threaded through the stages of one session.
///
/// Keys are case-sensitive and writes are last-writer-wins. There is no
/// internal locking: a session is never run concurrently with itself, and
/// stages only get a shared reference while the executor owns the writes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateStore {
    data: HashMap<String, Value>,
}

impl StateStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store from existing entries.
    #[must_use]
    pub fn from_map(data: HashMap<String, Value>) -> Self {
        Self { data }
    }

    /// Gets a value. `None` means absent; a stored null is `Some(Value::Null)`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Gets a string value.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }

    /// Sets a value, replacing any previous one.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.data.insert(key.into(), value.into());
    }

    /// Removes a value.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.data.remove(key)
    }

    /// Checks if a key exists (including keys holding null).
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns all keys.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.data.keys().cloned().collect()
    }

    /// Returns a copy of all entries.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, Value> {
        self.data.clone()
    }

    /// Renders a single value the way template placeholders see it.
    ///
    /// Missing keys and nulls render as the empty string, strings render
    /// raw, everything else renders as compact JSON.
    #[must_use]
    pub fn render_value(&self, key: &str) -> String {
        match self.data.get(key) {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        }
    }

    /// Substitutes `{{ key }}` placeholders with current values.
    ///
    /// Rendering never fails; unknown keys become empty strings.
    #[must_use]
    pub fn render_template(&self, template: &str) -> String {
        placeholder_pattern()
            .replace_all(template, |caps: &regex::Captures<'_>| self.render_value(&caps[1]))
            .into_owned()
    }
}

impl From<HashMap<String, Value>> for StateStore {
    fn from(data: HashMap<String, Value>) -> Self {
        Self::from_map(data)
    }
}

impl FromIterator<(String, Value)> for StateStore {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            data: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_read_after_write_returns_latest() {
        let mut store = StateStore::new();
        store.set("PROMPT", "first");
        store.set("PROMPT", "second");
        store.set("PROMPT", json!({"ask": "third"}));

        assert_eq!(store.get("PROMPT"), Some(&json!({"ask": "third"})));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_keys_are_case_sensitive() {
        let mut store = StateStore::new();
        store.set("prompt", "lower");
        store.set("PROMPT", "upper");

        assert_eq!(store.get_str("prompt"), Some("lower"));
        assert_eq!(store.get_str("PROMPT"), Some("upper"));
    }

    #[test]
    fn test_null_is_present_but_absent_is_not() {
        let mut store = StateStore::new();
        store.set("customer", Value::Null);

        assert!(store.contains_key("customer"));
        assert_eq!(store.get("customer"), Some(&Value::Null));
        assert!(store.get("missing").is_none());
    }

    #[test]
    fn test_render_template_substitutes_values() {
        let mut store = StateStore::new();
        store.set("PROMPT", "show my tickets");
        store.set("research_data", json!({"tickets": []}));

        let rendered = store.render_template("Ask: {{ PROMPT }}\nData: {{research_data}}");
        assert_eq!(rendered, "Ask: show my tickets\nData: {\"tickets\":[]}");
    }

    #[test]
    fn test_render_template_missing_and_null_are_empty() {
        let mut store = StateStore::new();
        store.set("nothing", Value::Null);

        assert_eq!(store.render_template("[{{ missing }}][{{ nothing }}]"), "[][]");
    }

    #[test]
    fn test_render_template_leaves_other_braces() {
        let store = StateStore::new();
        let template = r#"Return {"next_stage": "<name>"} and {{ }}"#;
        assert_eq!(store.render_template(template), template);
    }

    #[test]
    fn test_serializes_as_plain_object() {
        let store: StateStore = [("a".to_string(), json!(1))].into_iter().collect();
        assert_eq!(serde_json::to_value(&store).unwrap(), json!({"a": 1}));
    }
}
