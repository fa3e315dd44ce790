use std::sync::LazyLock;

use regex::Regex;

use crate::variables::VariableSpec;

static NON_ALNUM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9]+").expect("static pattern compiles"));

const NOT_FOUND_MARKERS: &[&str] = &[
    "not found",
    "notfound",
    "not documented",
    "not mentioned",
    "not stated",
    "unknown",
    "none",
    "n a",
    "na",
];

/// Lowercases and collapses punctuation and whitespace runs into single spaces.
pub fn normalize_key(raw: &str) -> String {
    NON_ALNUM
        .replace_all(&raw.to_lowercase(), " ")
        .trim()
        .to_string()
}

pub fn is_not_found_marker(raw: &str) -> bool {
    let key = normalize_key(raw);
    key.is_empty() || NOT_FOUND_MARKERS.contains(&key.as_str())
}

/// Maps free-form answers onto one variable's allowed values.
#[derive(Debug, Clone)]
pub struct ValueNormalizer {
    // (key, canonical), longest key first so the most specific phrase wins.
    entries: Vec<(String, String)>,
}

impl ValueNormalizer {
    pub fn for_variable(spec: &VariableSpec) -> Self {
        let mut entries = Vec::new();
        for allowed in &spec.allowed_values {
            entries.push((normalize_key(allowed), allowed.clone()));
        }
        for (canonical, aliases) in &spec.synonyms {
            let Some(target) = spec
                .allowed_values
                .iter()
                .find(|allowed| normalize_key(allowed) == normalize_key(canonical))
            else {
                continue;
            };
            for alias in aliases {
                entries.push((normalize_key(alias), target.clone()));
            }
        }
        entries.retain(|(key, _)| !key.is_empty());
        entries.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));
        entries.dedup_by(|a, b| a.0 == b.0);
        Self { entries }
    }

    /// Exact key match first, then the longest allowed phrase contained in the answer.
    pub fn normalize(&self, raw: &str) -> Option<String> {
        if is_not_found_marker(raw) {
            return None;
        }
        let key = normalize_key(raw);
        if let Some((_, canonical)) = self.entries.iter().find(|(k, _)| *k == key) {
            return Some(canonical.clone());
        }

        let padded = format!(" {key} ");
        self.entries
            .iter()
            .find(|(k, _)| padded.contains(&format!(" {k} ")))
            .map(|(_, canonical)| canonical.clone())
    }
}
