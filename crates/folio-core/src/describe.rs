//! Short natural-language description of a document.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Warning, WarningKind};
use crate::llm::{AdaptiveLimiter, LlmClient, LlmSettings, complete_with_retry};
use crate::model::{Confidence, Field, PageText, Source};
use crate::text_utils::{collapse_whitespace, truncate_chars};

/// Cap on each key section copied into the prompt.
const SECTION_CHARS: usize = 600;

static SECTION_HEADER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?im)^[ \t]*(?:\d+\.?[ \t]*)?(introducci[oó]n|introduction|resumen(?:\s+ejecutivo)?|executive\s+summary|summary|abstract|conclusiones|conclusions?)[ \t]*[:.]?[ \t]*\n?",
    )
    .unwrap()
});

/// Introduction, summary and conclusion passages, each cut at the next
/// paragraph break.
pub fn key_sections(text: &str) -> Vec<String> {
    let mut sections = Vec::new();
    for m in SECTION_HEADER_RE.find_iter(text) {
        let rest = &text[m.end()..];
        let body = rest.split("\n\n").find(|p| !p.trim().is_empty()).unwrap_or("");
        let body = collapse_whitespace(body);
        if body.chars().count() < 20 {
            continue;
        }
        sections.push(truncate_chars(&body, SECTION_CHARS).to_string());
    }
    sections
}

fn build_prompt(sections: &[String], text: &str) -> String {
    let mut prompt = String::from(
        "Write a 2-3 sentence description of the document below: what it is, \
         who published it, and what it covers. Reply with the description only.\n\n",
    );
    if !sections.is_empty() {
        prompt.push_str("Key sections:\n");
        for s in sections {
            prompt.push_str(s);
            prompt.push('\n');
        }
        prompt.push('\n');
    }
    prompt.push_str("Text:\n");
    prompt.push_str(text);
    prompt
}

/// Clean a model reply into description text.
fn clean_reply(reply: &str) -> String {
    let text = reply.trim();
    let text = text
        .strip_prefix("Description:")
        .or_else(|| text.strip_prefix("description:"))
        .unwrap_or(text);
    let text = text.trim().trim_matches(|c: char| matches!(c, '"' | '\'' | '`'));
    collapse_whitespace(text)
}

/// LLM-backed description stage. There is no heuristic substitute: without
/// a model the description is empty.
#[derive(Clone)]
pub struct DescriptionGenerator {
    client: Option<Arc<dyn LlmClient>>,
    limiter: Option<Arc<AdaptiveLimiter>>,
    settings: LlmSettings,
}

impl DescriptionGenerator {
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

    pub async fn describe(&self, pages: &PageText) -> (Field, Vec<Warning>) {
        let unavailable = |message: String| {
            (
                Field::empty(),
                vec![Warning::new(WarningKind::FallbackUnavailable, message)],
            )
        };

        let Some(client) = &self.client else {
            return unavailable("LLM disabled; no description generated".into());
        };

        let context = pages.context(self.settings.context_pages, self.settings.context_chars);
        if context.text.trim().is_empty() {
            return unavailable("no extractable text to describe".into());
        }

        let full = pages.context(self.settings.context_pages, usize::MAX);
        let prompt = build_prompt(&key_sections(&full.text), &context.text);

        let reply = match complete_with_retry(
            client.as_ref(),
            self.limiter.as_deref(),
            &prompt,
            self.settings.description_max_tokens,
            self.settings.temperature,
            self.settings.timeout,
        )
        .await
        {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(client = client.name(), error = %e, "description failed");
                return unavailable(format!("description failed: {e}"));
            }
        };

        let description = clean_reply(&reply);
        if description.is_empty() {
            return unavailable("description failed: empty response".into());
        }

        let confidence = if context.from_ocr {
            Confidence::Low
        } else {
            Confidence::High
        };
        (
            Field::found(description, confidence, Source::llm(context.from_ocr)),
            Vec::new(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mock::{MockLlm, MockReply};
    use crate::model::Page;

    fn generator(llm: Option<Arc<MockLlm>>) -> DescriptionGenerator {
        DescriptionGenerator::new(
            llm.map(|l| l as Arc<dyn LlmClient>),
            None,
            LlmSettings::default(),
        )
    }

    #[test]
    fn finds_intro_and_conclusions() {
        let text = "Informe Anual\n\nResumen: Este informe presenta los resultados del año fiscal.\n\n\
                    Tabla 1\n\nConclusiones\nLa inversión pública creció de forma sostenida.";
        let sections = key_sections(text);
        assert_eq!(sections.len(), 2);
        assert!(sections[0].starts_with("Este informe presenta"));
        assert!(sections[1].starts_with("La inversión pública"));
    }

    #[test]
    fn short_sections_are_ignored() {
        assert!(key_sections("Summary\nTBD").is_empty());
    }

    #[test]
    fn reply_cleanup() {
        assert_eq!(clean_reply("  \"A  report.\"  "), "A report.");
        assert_eq!(clean_reply("Description: An annual report."), "An annual report.");
    }

    #[tokio::test]
    async fn embedded_text_gives_high() {
        let llm = Arc::new(MockLlm::text("An annual report of the ministry's public works."));
        let pages = PageText::new(vec![Page::embedded(0, "Annual Report, March 15, 2023", vec![])]);
        let (field, warnings) = generator(Some(llm.clone())).describe(&pages).await;
        assert!(warnings.is_empty());
        assert_eq!(field.confidence(), Confidence::High);
        assert_eq!(field.source(), Some(Source::Llm));
        assert!(llm.prompts()[0].contains("2-3 sentence"));
    }

    #[tokio::test]
    async fn ocr_text_gives_low() {
        let llm = Arc::new(MockLlm::text("A scanned bulletin."));
        let pages = PageText::new(vec![Page::ocr(0, "Boletín mensual de estadísticas")]);
        let (field, _) = generator(Some(llm)).describe(&pages).await;
        assert_eq!(field.confidence(), Confidence::Low);
        assert_eq!(field.source(), Some(Source::OcrLlm));
    }

    #[tokio::test]
    async fn failure_is_empty_with_warning() {
        let llm = Arc::new(MockLlm::new(MockReply::Api(400, "bad request".into())));
        let pages = PageText::new(vec![Page::embedded(0, "Some document text", vec![])]);
        let (field, warnings) = generator(Some(llm)).describe(&pages).await;
        assert!(field.is_empty());
        assert_eq!(field.confidence(), Confidence::None);
        assert_eq!(warnings[0].kind, WarningKind::FallbackUnavailable);
    }

    #[tokio::test]
    async fn no_text_skips_call() {
        let llm = Arc::new(MockLlm::text("should not be used"));
        let pages = PageText::new(vec![Page::ocr_failed(0)]);
        let (field, warnings) = generator(Some(llm.clone())).describe(&pages).await;
        assert!(field.is_empty());
        assert_eq!(warnings.len(), 1);
        assert_eq!(llm.call_count(), 0);
    }
}
