//! LLM fallback for fields the heuristics could not settle.
//!
//! Only fields below `high` are sent to the model, and only their keys appear
//! in the prompt. The model's answer is parsed defensively: anything that is
//! not a usable value leaves the prior field untouched.

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::error::{Warning, WarningKind};
use crate::heuristics::date::normalize_date_str;
use crate::heuristics::volume::find_volume_issues;
use crate::llm::{AdaptiveLimiter, LlmClient, LlmError, LlmSettings, complete_with_retry};
use crate::model::{Confidence, Field, FieldName, PageText, PartialResult, Source};
use crate::text_utils::comparison_key;

const MISSING_MARKERS: &[&str] = &["null", "none", "unknown", "n/a", "na", "not found", "-"];

fn field_instruction(name: FieldName) -> &'static str {
    match name {
        FieldName::Title => "\"title\": the document's title",
        FieldName::Date => "\"date\": the publication date as YYYY-MM-DD, YYYY-MM or YYYY",
        FieldName::VolumeIssue => {
            "\"volume_issue\": the volume and issue designation, e.g. \"Vol. 4, No. 2\""
        }
    }
}

/// Prompt asking for exactly the `pending` keys.
pub fn build_prompt(pending: &[FieldName], text: &str) -> String {
    let keys = pending
        .iter()
        .map(|f| format!("\"{}\"", f.key()))
        .collect::<Vec<_>>()
        .join(", ");
    let instructions = pending
        .iter()
        .map(|f| format!("- {}", field_instruction(*f)))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Extract the following metadata from the document text below.\n\
         {instructions}\n\n\
         Return only a JSON object with exactly these keys: {keys}. \
         Use null for any value that does not appear in the text.\n\n\
         Text:\n{text}"
    )
}

/// The first balanced `{...}` object in `response`, tolerating code fences
/// and surrounding prose. Braces inside JSON strings are ignored.
pub fn parse_response(response: &str) -> Option<Map<String, Value>> {
    let bytes = response.as_bytes();
    let mut search_from = 0;
    while let Some(rel) = response[search_from..].find('{') {
        let start = search_from + rel;
        let mut depth = 0usize;
        let mut in_string = false;
        let mut escaped = false;
        let mut end = None;
        for (i, &b) in bytes.iter().enumerate().skip(start) {
            if in_string {
                match b {
                    _ if escaped => escaped = false,
                    b'\\' => escaped = true,
                    b'"' => in_string = false,
                    _ => {}
                }
                continue;
            }
            match b {
                b'"' => in_string = true,
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        end = Some(i);
                        break;
                    }
                }
                _ => {}
            }
        }
        let end = end?;
        if let Ok(Value::Object(map)) = serde_json::from_str(&response[start..=end]) {
            return Some(map);
        }
        search_from = start + 1;
    }
    None
}

/// A usable string value for `name`, or `None` when the model left it out.
fn extract_value(map: &Map<String, Value>, name: FieldName) -> Option<String> {
    let raw = map.get(name.key())?.as_str()?.trim();
    if raw.is_empty() || MISSING_MARKERS.contains(&raw.to_lowercase().as_str()) {
        return None;
    }
    match name {
        FieldName::Date => normalize_date_str(raw),
        _ => Some(raw.to_string()),
    }
}

fn same_value(name: FieldName, a: &str, b: &str) -> bool {
    if name == FieldName::VolumeIssue {
        let (ka, kb) = (find_volume_issues(a), find_volume_issues(b));
        if let (Some(x), Some(y)) = (ka.first(), kb.first()) {
            return x.key == y.key;
        }
    }
    comparison_key(a) == comparison_key(b)
}

/// Combine the prior field with the model's answer.
///
/// Agreement raises the prior field to `high` and keeps its source. A new or
/// different value replaces it at `low`. No answer keeps the prior field.
pub fn merge_field(name: FieldName, prior: &Field, answer: Option<String>, from_ocr: bool) -> Field {
    let Some(value) = answer else {
        return prior.clone();
    };
    match prior.value() {
        Some(existing) if same_value(name, existing, &value) => prior.clone().corroborated(),
        _ => Field::found(value, Confidence::Low, Source::llm(from_ocr)),
    }
}

/// Asks the model to confirm or supply low-confidence fields.
#[derive(Clone)]
pub struct LlmFallbackExtractor {
    client: Option<Arc<dyn LlmClient>>,
    limiter: Option<Arc<AdaptiveLimiter>>,
    settings: LlmSettings,
}

impl LlmFallbackExtractor {
    pub fn new(
        client: Option<Arc<dyn LlmClient>>,
        limiter: Option<Arc<AdaptiveLimiter>>,
        settings: LlmSettings,
    ) -> Self {
        Self {
            client,
            limiter,
            settings,
        }
    }

    /// Refine `partial`. Never fails: every problem becomes a
    /// `fallback_unavailable` warning and the affected fields keep their
    /// prior values.
    pub async fn fallback(
        &self,
        pages: &PageText,
        partial: PartialResult,
    ) -> (PartialResult, Vec<Warning>) {
        let pending = partial.pending_fields();
        if pending.is_empty() {
            tracing::debug!("all fields high confidence, skipping LLM fallback");
            return (partial, Vec::new());
        }

        let unavailable = |message: String| {
            vec![Warning::new(WarningKind::FallbackUnavailable, message)]
        };

        let Some(client) = &self.client else {
            return (
                partial,
                unavailable("LLM fallback disabled; low-confidence fields kept as parsed".into()),
            );
        };

        let context = pages.context(self.settings.context_pages, self.settings.context_chars);
        if context.text.trim().is_empty() {
            return (
                partial,
                unavailable("no extractable text to send to the LLM".into()),
            );
        }

        let prompt = build_prompt(&pending, &context.text);
        let response = complete_with_retry(
            client.as_ref(),
            self.limiter.as_deref(),
            &prompt,
            self.settings.max_tokens,
            self.settings.temperature,
            self.settings.timeout,
        )
        .await;

        let text = match response {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(client = client.name(), error = %e, "LLM fallback failed");
                return (partial, unavailable(format!("LLM fallback failed: {e}")));
            }
        };

        let Some(map) = parse_response(&text) else {
            let e = LlmError::Malformed("no JSON object in response".into());
            tracing::warn!(client = client.name(), error = %e, "LLM fallback unusable");
            return (partial, unavailable(format!("LLM fallback failed: {e}")));
        };

        let mut result = partial;
        for name in pending {
            let answer = extract_value(&map, name);
            let merged = merge_field(name, result.get(name), answer, context.from_ocr);
            tracing::debug!(
                field = name.key(),
                value = merged.value().unwrap_or(""),
                confidence = merged.confidence().as_str(),
                "fallback merged"
            );
            result.set(name, merged);
        }
        (result, Vec::new())
    }
}
