use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{SourceKind, VariableName};

/// Declarative description of one abstracted variable; drives prompts and normalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableSpec {
    pub name: VariableName,
    pub instruction: String,
    pub allowed_values: Vec<String>,
    /// Canonical allowed value -> clinically equivalent spellings.
    #[serde(default)]
    pub synonyms: BTreeMap<String, Vec<String>>,
    /// When set, only these source kinds are read for this variable.
    #[serde(default)]
    pub source_kinds: Option<Vec<SourceKind>>,
    /// Structured field names that carry this variable directly.
    #[serde(default)]
    pub structured_fields: Vec<String>,
}

impl VariableSpec {
    pub fn new(name: &str, instruction: &str, allowed_values: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            instruction: instruction.to_string(),
            allowed_values: allowed_values.iter().map(|v| v.to_string()).collect(),
            synonyms: BTreeMap::new(),
            source_kinds: None,
            structured_fields: Vec::new(),
        }
    }

    pub fn with_synonyms(mut self, canonical: &str, aliases: &[&str]) -> Self {
        self.synonyms
            .entry(canonical.to_string())
            .or_default()
            .extend(aliases.iter().map(|alias| alias.to_string()));
        self
    }

    pub fn with_source_kinds(mut self, kinds: &[SourceKind]) -> Self {
        self.source_kinds = Some(kinds.to_vec());
        self
    }

    pub fn with_structured_field(mut self, field: &str) -> Self {
        self.structured_fields.push(field.to_string());
        self
    }

    pub fn accepts_source(&self, kind: SourceKind) -> bool {
        match &self.source_kinds {
            Some(kinds) => kinds.contains(&kind),
            None => true,
        }
    }
}
