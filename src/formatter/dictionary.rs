use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{normalize::normalize_key, types::VariableName};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableDictionary {
    /// Final value -> coded output value.
    pub codes: BTreeMap<String, String>,
    #[serde(default)]
    pub unavailable_code: Option<String>,
}

impl VariableDictionary {
    /// Exact match first, then a case- and punctuation-insensitive match.
    pub fn code_for(&self, value: &str) -> Option<&str> {
        if let Some(code) = self.codes.get(value) {
            return Some(code.as_str());
        }
        let key = normalize_key(value);
        self.codes
            .iter()
            .find(|(label, _)| normalize_key(label) == key)
            .map(|(_, code)| code.as_str())
    }
}

/// Controlled vocabulary for the external data dictionary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataDictionary {
    variables: BTreeMap<VariableName, VariableDictionary>,
}

impl DataDictionary {
    pub fn with_variable(mut self, variable: &str, entry: VariableDictionary) -> Self {
        self.variables.insert(variable.to_string(), entry);
        self
    }

    pub fn variable(&self, variable: &str) -> Option<&VariableDictionary> {
        self.variables.get(variable)
    }

    pub fn variable_names(&self) -> impl Iterator<Item = &str> {
        self.variables.keys().map(String::as_str)
    }
}
