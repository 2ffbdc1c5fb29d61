//! Structured metadata extraction.
//!
//! Asks the language model for the six-field [`DocumentMetadata`] record and
//! parses its reply through a three-step degrade path:
//!
//! | Outcome | When |
//! |---------|------|
//! | [`ParseOutcome::Structured`] | The reply (or its fenced ```` ```json ```` block) is a JSON object with all six keys |
//! | [`ParseOutcome::Recovered`]  | The greedy `{ ... }` span of the reply parses as a JSON object; present keys are used |
//! | [`ParseOutcome::Defaulted`]  | Nothing usable; every field stays empty |
//!
//! In the first two cases values are coerced to the schema: a scalar where a
//! list is expected becomes a one-element list, and a list where a string is
//! expected is joined with `"; "`. Keys outside the schema are dropped.
//!
//! Extraction never fails outward. Model and network errors are logged and
//! produce the defaulted record.

use serde_json::{Map, Value};
use std::sync::Arc;

use crate::config::MetadataConfig;
use crate::models::DocumentMetadata;
use crate::traits::{GenerateRequest, LanguageModel};

/// Field descriptions shown to the model, in schema order.
const FIELD_DESCRIPTIONS: [(&str, &str, &str); 6] = [
    (
        "overarching_theme",
        "string",
        "Summarize the main theme(s) discussed in the \"Overarching Theme\" section.",
    ),
    (
        "recurring_topics",
        "list",
        "List the recurring topics mentioned in the \"Common Threads\" section as an array of strings.",
    ),
    (
        "pain_points",
        "list",
        "Summarize the user's frustrations or challenges mentioned in the \"Pain Points\" section as an array of strings.",
    ),
    (
        "analytical_insights",
        "list",
        "Extract a list of key analytical observations from the \"Analytical Insights\" section, including shifts in tone or behavior.",
    ),
    (
        "conclusion",
        "string",
        "Summarize the conclusions drawn about the user's threads and their overall focus.",
    ),
    (
        "keywords",
        "list",
        "Generate a list of 10 keywords that capture the essence of the document (e.g., \"askNostr,\" \"decentralization,\" \"spam filtering\").",
    ),
];

const SYSTEM_PREAMBLE: &str = "You are an expert extraction algorithm.\n\
Only extract relevant information from the text.\n\
If you do not know the value of an attribute asked to extract, you may omit the attribute's value.";

/// How a model reply was turned into a metadata record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseOutcome {
    Structured(DocumentMetadata),
    Recovered(DocumentMetadata),
    Defaulted,
}

impl ParseOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ParseOutcome::Structured(_) => "structured",
            ParseOutcome::Recovered(_) => "recovered",
            ParseOutcome::Defaulted => "defaulted",
        }
    }

    pub fn into_metadata(self) -> DocumentMetadata {
        match self {
            ParseOutcome::Structured(m) | ParseOutcome::Recovered(m) => m,
            ParseOutcome::Defaulted => DocumentMetadata::default(),
        }
    }
}

pub struct MetadataExtractor {
    model: Arc<dyn LanguageModel>,
    max_input_chars: usize,
    temperature: f32,
}

impl MetadataExtractor {
    pub fn new(model: Arc<dyn LanguageModel>, config: &MetadataConfig) -> Self {
        Self {
            model,
            max_input_chars: config.max_input_chars,
            temperature: config.temperature,
        }
    }

    /// Extract the metadata record for `text`. Never fails.
    pub async fn extract(&self, text: &str) -> DocumentMetadata {
        self.extract_with_outcome(text).await.into_metadata()
    }

    /// Like [`extract`](Self::extract), keeping the parse outcome.
    pub async fn extract_with_outcome(&self, text: &str) -> ParseOutcome {
        let request = self.build_request(text);

        let reply = match self.model.generate(&request).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(error = %e, "metadata extraction call failed, using defaults");
                return ParseOutcome::Defaulted;
            }
        };

        let outcome = parse_metadata_reply(&reply);
        match &outcome {
            ParseOutcome::Structured(_) => {}
            ParseOutcome::Recovered(_) => {
                tracing::warn!("metadata reply did not match the schema, recovered from JSON span")
            }
            ParseOutcome::Defaulted => {
                tracing::warn!("metadata reply contained no JSON object, using defaults")
            }
        }
        outcome
    }

    pub fn build_request(&self, text: &str) -> GenerateRequest {
        let system = format!("{}\n\n{}", SYSTEM_PREAMBLE, format_instructions());
        let mut request = GenerateRequest::new(system, truncate_chars(text, self.max_input_chars));
        request.temperature = Some(self.temperature);
        request
    }
}

/// Schema instructions embedded in the system prompt.
pub fn format_instructions() -> String {
    let mut out = String::from(
        "The output should be a markdown code snippet formatted in the following schema, \
         including the leading and trailing \"```json\" and \"```\":\n\n```json\n{\n",
    );
    for (name, ty, description) in FIELD_DESCRIPTIONS {
        out.push_str(&format!("\t\"{}\": {}  // {}\n", name, ty, description));
    }
    out.push_str("}\n```");
    out
}

/// Run the three-step degrade path over a raw model reply.
pub fn parse_metadata_reply(raw: &str) -> ParseOutcome {
    if let Some(metadata) = parse_structured(raw) {
        return ParseOutcome::Structured(metadata);
    }
    if let Some(map) = recover_json_span(raw) {
        return ParseOutcome::Recovered(coerce(&map));
    }
    ParseOutcome::Defaulted
}

/// Strict step: a JSON object (optionally fenced) holding every schema key.
fn parse_structured(raw: &str) -> Option<DocumentMetadata> {
    let candidate = fenced_block(raw).unwrap_or(raw).trim();
    let map = match serde_json::from_str::<Value>(candidate).ok()? {
        Value::Object(map) => map,
        _ => return None,
    };
    if DocumentMetadata::FIELDS.iter().all(|f| map.contains_key(*f)) {
        Some(coerce(&map))
    } else {
        None
    }
}

/// Contents of the first ```` ``` ```` fenced block, without a language tag.
fn fenced_block(raw: &str) -> Option<&str> {
    let open = raw.find("```")?;
    let after_open = &raw[open + 3..];
    let body_start = after_open.find('\n').map(|i| i + 1).unwrap_or(0);
    let tag = after_open[..body_start].trim();
    if !tag.is_empty() && !tag.chars().all(|c| c.is_ascii_alphanumeric()) {
        // Fence opened and closed on one line, e.g. ```{...}```.
        let close = after_open.find("```")?;
        return Some(&after_open[..close]);
    }
    let body = &after_open[body_start..];
    let close = body.find("```")?;
    Some(&body[..close])
}

/// Greedy span from the first `{` to the last `}`, parsed as a JSON object.
pub(crate) fn recover_json_span(raw: &str) -> Option<Map<String, Value>> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str::<Value>(&raw[start..=end]).ok()? {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

/// Merge recognised keys over defaults, coercing each value to the schema.
fn coerce(map: &Map<String, Value>) -> DocumentMetadata {
    let mut metadata = DocumentMetadata::default();
    for (key, value) in map {
        match key.as_str() {
            "overarching_theme" => metadata.overarching_theme = coerce_string(value),
            "conclusion" => metadata.conclusion = coerce_string(value),
            "recurring_topics" => metadata.recurring_topics = coerce_list(value),
            "pain_points" => metadata.pain_points = coerce_list(value),
            "analytical_insights" => metadata.analytical_insights = coerce_list(value),
            "keywords" => metadata.keywords = coerce_list(value),
            _ => {}
        }
    }
    metadata
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn coerce_string(value: &Value) -> String {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(scalar_text)
            .collect::<Vec<_>>()
            .join("; "),
        other => scalar_text(other).unwrap_or_default(),
    }
}

fn coerce_list(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.iter().filter_map(scalar_text).collect(),
        Value::String(s) if s.trim().is_empty() => Vec::new(),
        other => scalar_text(other).into_iter().collect(),
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}
