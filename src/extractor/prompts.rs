use serde_json::Value;

use crate::{
    normalize::is_not_found_marker,
    types::{CandidateValue, ClinicalEvent, EvidenceRecord},
    variables::VariableSpec,
};

pub const NOT_FOUND: &str = "NOT_FOUND";

pub fn extraction_system_preamble() -> String {
    concat!(
        "You abstract clinical variables for a pediatric brain tumor registry.\n",
        "Answer only from the document text below. Do not infer from general knowledge.\n",
        "If the document does not state the variable, answer NOT_FOUND."
    )
    .to_string()
}

pub fn build_extraction_prompt(
    variable: &VariableSpec,
    event: &ClinicalEvent,
    record: &EvidenceRecord,
    text: &str,
    competing_values: &[String],
) -> String {
    let allowed = variable
        .allowed_values
        .iter()
        .map(|value| format!("- {value}"))
        .collect::<Vec<_>>()
        .join("\n");

    let mut prompt = format!(
        "{preamble}\n\n\
         Clinical event: {event_type} on {event_date}.\n\
         Document: {kind} dated {record_date} ({offset:+} days from the event).\n\
         Variable: {name}\n\
         Task: {instruction}\n\
         Allowed values:\n{allowed}\n",
        preamble = extraction_system_preamble(),
        event_type = event.event_type,
        event_date = event.event_date,
        kind = record.source_kind,
        record_date = record.record_date,
        offset = event.days_to(record.record_date),
        name = variable.name,
        instruction = variable.instruction,
    );

    if !competing_values.is_empty() {
        prompt.push_str(&format!(
            "Other sources for this event reported: {}. Re-read this document carefully; \
             report what it states even if it disagrees.\n",
            competing_values.join(", ")
        ));
    }

    prompt.push_str(&format!(
        "Reply with JSON only: {{\"value\": \"<one allowed value>\"}} or {{\"value\": \"{NOT_FOUND}\"}}.\n\n\
         Document text:\n\"\"\"\n{text}\n\"\"\""
    ));
    prompt
}

/// Builds the prompt asking a reviewer which conflicting records deserve another look.
pub fn build_review_prompt(
    variable: &VariableSpec,
    event: &ClinicalEvent,
    candidates: &[CandidateValue],
) -> String {
    let listing = candidates
        .iter()
        .map(|c| {
            format!(
                "- record {} ({} dated {}): {}",
                c.source_record_id, c.source_kind, c.record_date, c.value
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "Sources disagree on '{name}' for the {event_type} on {event_date}.\n\
         Task context: {instruction}\n\
         Extracted values:\n{listing}\n\n\
         List the record ids whose extraction most likely misread the document.\n\
         Reply with JSON only: {{\"recheck\": [\"<record id>\", ...]}}. Use an empty list if none.",
        name = variable.name,
        event_type = event.event_type,
        event_date = event.event_date,
        instruction = variable.instruction,
    )
}

/// Pulls the answer out of a model reply. `None` means the model reported no value.
pub fn parse_extraction_reply(reply: &str) -> Option<String> {
    let body = strip_code_fence(reply);
    let answer = match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => match map.get("value") {
            Some(Value::String(value)) => value.clone(),
            Some(Value::Null) | None => return None,
            Some(other) => other.to_string(),
        },
        Ok(Value::String(value)) => value,
        _ => body.to_string(),
    };

    let answer = answer.trim().trim_matches('"').trim();
    if is_not_found_marker(answer) {
        return None;
    }
    Some(answer.to_string())
}

pub fn parse_review_reply(reply: &str) -> Vec<String> {
    let body = strip_code_fence(reply);
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => map
            .get("recheck")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

/// Keeps the leading `ratio` share of `text`, cut on a char boundary.
pub fn truncate_text(text: &str, ratio: f64) -> &str {
    let ratio = if ratio.is_finite() { ratio.clamp(0.0, 1.0) } else { 0.5 };
    let mut cut = ((text.len() as f64) * ratio).floor() as usize;
    cut = cut.min(text.len());
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    &text[..cut]
}

fn strip_code_fence(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}
