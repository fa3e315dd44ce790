#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;

use abstractor::{
    extractor::{
        CompletionError, TextCompletionPort,
        ports::{completion_failed, completion_timeout},
    },
    types::SourceKind,
    variables::VariableSpec,
};

#[derive(Debug, Clone)]
pub enum Reply {
    Text(String),
    Timeout,
    Fail,
}

impl Reply {
    pub fn value(value: &str) -> Self {
        Self::Text(format!("{{\"value\": \"{value}\"}}"))
    }
}

struct Rule {
    needles: Vec<String>,
    replies: Vec<Reply>,
}

/// Completion port answering from a script keyed by prompt substrings.
///
/// A rule matches when every needle occurs in the prompt; its replies are served in
/// order and the last one repeats. Unmatched prompts get `NOT_FOUND`.
pub struct ScriptedCompletionPort {
    rules: Vec<Rule>,
    served: Mutex<HashMap<usize, usize>>,
    prompts: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl ScriptedCompletionPort {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            served: Mutex::new(HashMap::new()),
            prompts: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn on(mut self, needles: &[&str], replies: Vec<Reply>) -> Self {
        self.rules.push(Rule {
            needles: needles.iter().map(|n| n.to_string()).collect(),
            replies,
        });
        self
    }

    pub fn answer(self, needle: &str, value: &str) -> Self {
        self.on(&[needle], vec![Reply::value(value)])
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().expect("prompt log lock").clone()
    }
}

#[async_trait]
impl TextCompletionPort for ScriptedCompletionPort {
    async fn complete(
        &self,
        prompt: &str,
        _max_tokens: u64,
        _timeout: Duration,
    ) -> Result<String, CompletionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts
            .lock()
            .expect("prompt log lock")
            .push(prompt.to_string());

        let Some((index, rule)) = self
            .rules
            .iter()
            .enumerate()
            .find(|(_, rule)| rule.needles.iter().all(|n| prompt.contains(n.as_str())))
        else {
            return Ok("{\"value\": \"NOT_FOUND\"}".to_string());
        };

        let served = {
            let mut served = self.served.lock().expect("served lock");
            let count = served.entry(index).or_insert(0);
            let current = *count;
            *count += 1;
            current
        };
        let reply = rule
            .replies
            .get(served)
            .or_else(|| rule.replies.last())
            .cloned()
            .unwrap_or(Reply::Fail);

        match reply {
            Reply::Text(text) => Ok(text),
            Reply::Timeout => Err(completion_timeout("scripted timeout")),
            Reply::Fail => Err(completion_failed("scripted failure")),
        }
    }
}

pub fn extent_of_resection() -> VariableSpec {
    VariableSpec::new(
        "extent_of_resection",
        "Extent of tumor resection achieved during this surgery.",
        &[
            "Gross total resection",
            "Near-total resection",
            "Subtotal resection",
            "Partial",
            "Subtotal",
            "Biopsy only",
        ],
    )
    .with_synonyms("Near-total resection", &["NTR", "near-total debulking"])
    .with_synonyms("Gross total resection", &["GTR"])
}

pub fn tumor_location() -> VariableSpec {
    VariableSpec::new(
        "tumor_location",
        "Primary anatomic location of the tumor.",
        &["Cerebellum/Posterior Fossa", "Brain Stem", "Frontal Lobe"],
    )
    .with_synonyms("Cerebellum/Posterior Fossa", &["cerebellar", "posterior fossa"])
    .with_source_kinds(&[
        SourceKind::OperativeNote,
        SourceKind::ImagingNarrative,
        SourceKind::DischargeSummary,
    ])
}

pub fn histopathology() -> VariableSpec {
    VariableSpec::new(
        "histopathology",
        "Integrated histopathologic diagnosis.",
        &["Pilocytic astrocytoma", "Medulloblastoma"],
    )
    .with_structured_field("histology")
}
