use std::{
    collections::BTreeSet,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, anyhow, bail, ensure};
use jsonschema::JSONSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    completion::types::CompletionGatewayConfig, evidence::EvidenceConfig,
    extractor::ExtractionConfig, fallback::AbstractionConfig, formatter::DataDictionary,
    pipeline::PipelineConfig, timeline::TimelineConfig, variables::VariableSpec,
};

const SCHEMA_FILE_NAME: &str = "abstractor.schema.json";

/// Whole run configuration, read from a JSON5 file and checked against the JSON schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub completion: CompletionGatewayConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub abstraction: AbstractionConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub timeline: TimelineConfig,
    pub variables: Vec<VariableSpec>,
    #[serde(default)]
    pub dictionary: DataDictionary,
    #[serde(default)]
    pub evidence: EvidenceConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LoggingRotation {
    #[default]
    Daily,
    Hourly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub dir: PathBuf,
    pub filter: String,
    pub rotation: LoggingRotation,
    pub retention_days: usize,
    /// Mirror warnings and errors to stderr next to the JSON log files.
    pub stderr_warn_enabled: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./logs"),
            filter: "info".to_string(),
            rotation: LoggingRotation::Daily,
            retention_days: 14,
            stderr_warn_enabled: true,
        }
    }
}

impl Config {
    /// Relative paths in the file are resolved against the file's own directory.
    pub fn load(config_path: &Path) -> Result<Self> {
        let text = fs::read_to_string(config_path)
            .with_context(|| format!("failed to read {}", config_path.display()))?;
        let document: Value = json5::from_str(&text)
            .with_context(|| format!("failed to parse {}", config_path.display()))?;

        let base_dir = config_path.parent().unwrap_or_else(|| Path::new("."));
        let schema_path = locate_schema(base_dir, &document)?;
        check_schema(&document, &schema_path)?;

        let mut config: Config =
            serde_json::from_value(document).context("failed to deserialize config")?;
        config.validate()?;
        config.anchor_paths(base_dir);
        Ok(config)
    }

    /// Cross-field checks the schema cannot express.
    fn validate(&self) -> Result<()> {
        ensure!(
            !self.variables.is_empty(),
            "config declares no variables to abstract"
        );

        let backends: BTreeSet<&str> = self
            .completion
            .backends
            .iter()
            .map(|backend| backend.id.as_str())
            .collect();
        ensure!(
            backends.contains(self.completion.default_backend.as_str()),
            "completion.default_backend '{}' is not declared in completion.backends",
            self.completion.default_backend
        );
        for (purpose, target) in &self.completion.purpose_routes {
            ensure!(
                backends.contains(target.as_str()),
                "completion.purpose_routes.{purpose} names undeclared backend '{target}'"
            );
        }

        let mut names = BTreeSet::new();
        for variable in &self.variables {
            ensure!(
                names.insert(variable.name.as_str()),
                "variable '{}' is declared twice",
                variable.name
            );
            ensure!(
                !variable.allowed_values.is_empty(),
                "variable '{}' has no allowed_values",
                variable.name
            );
        }
        if let Some(stray) = self
            .dictionary
            .variable_names()
            .find(|name| !names.contains(name))
        {
            bail!("dictionary entry '{stray}' does not match any declared variable");
        }
        Ok(())
    }

    fn anchor_paths(&mut self, base_dir: &Path) {
        for path in [
            &mut self.evidence.root,
            &mut self.pipeline.output_path,
            &mut self.pipeline.summary_path,
        ] {
            if path.is_relative() {
                *path = base_dir.join(&*path);
            }
        }
    }
}

/// `$schema` in the document wins; otherwise the schema must sit next to the config.
fn locate_schema(base_dir: &Path, document: &Value) -> Result<PathBuf> {
    if let Some(declared) = document.get("$schema").and_then(Value::as_str) {
        return Ok(base_dir.join(declared));
    }

    let sibling = base_dir.join(SCHEMA_FILE_NAME);
    if sibling.exists() {
        return Ok(sibling);
    }
    bail!(
        "unable to resolve schema path: expected $schema in config or {SCHEMA_FILE_NAME} next to it"
    )
}

fn check_schema(document: &Value, schema_path: &Path) -> Result<()> {
    let schema_text = fs::read_to_string(schema_path)
        .with_context(|| format!("failed to read schema {}", schema_path.display()))?;
    let schema: Value = serde_json::from_str(&schema_text)
        .with_context(|| format!("failed to parse schema {}", schema_path.display()))?;
    let compiled =
        JSONSchema::compile(&schema).map_err(|err| anyhow!("failed to compile schema: {err}"))?;

    if let Err(errors) = compiled.validate(document) {
        let messages = errors
            .map(|error| format!("{} at '{}'", error, error.instance_path))
            .collect::<Vec<_>>();
        bail!("config validation failed: {}", messages.join("; "));
    }
    Ok(())
}
