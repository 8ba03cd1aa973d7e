use once_cell::sync::Lazy;
use regex::Regex;

/// Controls how a built-in list is overridden.
#[derive(Debug, Clone, Default)]
pub enum ListOverride<T> {
    /// Use the built-in defaults.
    #[default]
    Default,
    /// Completely replace the defaults with these values.
    Replace(Vec<T>),
    /// Append these values to the defaults.
    Extend(Vec<T>),
}

impl<T: Clone> ListOverride<T> {
    /// Resolve this override against the given defaults.
    pub fn resolve(&self, defaults: &[T]) -> Vec<T> {
        match self {
            ListOverride::Default => defaults.to_vec(),
            ListOverride::Replace(v) => v.clone(),
            ListOverride::Extend(v) => {
                let mut result = defaults.to_vec();
                result.extend(v.iter().cloned());
                result
            }
        }
    }
}

/// Publication names printed at the top of magazine and newspaper pages.
/// A line that is only a masthead is never taken as the title.
pub const DEFAULT_MASTHEADS: &[&str] = &[
    "Newsweek",
    "Time",
    "The Economist",
    "The International Newsmagazine",
    "El Diario de Hoy",
    "La Prensa Gráfica",
    "Diario El Mundo",
];

static DEFAULT_TITLE_REJECT: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)^(?:page|p[áa]gina|p\.)\s*\d+(?:\s*(?:of|de)\s*\d+)?$",
        r"(?i)^(?:issn|isbn|doi)\b",
        r"(?i)^(?:copyright|©|\(c\))",
        r"(?i)^(?:all rights reserved|todos los derechos reservados)",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

/// Configuration for [`HeuristicParser`](super::HeuristicParser).
#[derive(Debug, Clone)]
pub struct ParserConfig {
    pub(crate) mastheads: ListOverride<String>,
    /// Lines matching any of these are never title candidates.
    pub(crate) title_reject_patterns: ListOverride<Regex>,
    /// Non-empty lines scanned from the top of the title page (default: 15).
    pub(crate) title_scan_lines: usize,
    /// Title length bounds in characters, after cleanup (default: 5..=200).
    pub(crate) min_title_chars: usize,
    pub(crate) max_title_chars: usize,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            mastheads: ListOverride::Default,
            title_reject_patterns: ListOverride::Default,
            title_scan_lines: 15,
            min_title_chars: 5,
            max_title_chars: 200,
        }
    }
}

impl ParserConfig {
    pub fn mastheads(&self) -> Vec<String> {
        let defaults: Vec<String> = DEFAULT_MASTHEADS.iter().map(|s| s.to_string()).collect();
        self.mastheads.resolve(&defaults)
    }

    pub(crate) fn title_reject_patterns(&self) -> Vec<Regex> {
        self.title_reject_patterns.resolve(&DEFAULT_TITLE_REJECT)
    }

    pub fn title_scan_lines(&self) -> usize {
        self.title_scan_lines
    }
}

/// Builder for [`ParserConfig`].
///
/// Reject patterns are given as strings and compiled in [`build()`](Self::build),
/// which fails fast on an invalid pattern.
#[derive(Debug, Clone, Default)]
pub struct ParserConfigBuilder {
    mastheads: ListOverride<String>,
    title_reject_patterns: ListOverride<String>,
    title_scan_lines: Option<usize>,
    min_title_chars: Option<usize>,
    max_title_chars: Option<usize>,
}

impl ParserConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_mastheads(mut self, mastheads: Vec<String>) -> Self {
        self.mastheads = ListOverride::Replace(mastheads);
        self
    }

    pub fn add_masthead(mut self, masthead: String) -> Self {
        match &mut self.mastheads {
            ListOverride::Extend(v) => v.push(masthead),
            _ => self.mastheads = ListOverride::Extend(vec![masthead]),
        }
        self
    }

    pub fn set_title_reject_patterns(mut self, patterns: Vec<String>) -> Self {
        self.title_reject_patterns = ListOverride::Replace(patterns);
        self
    }

    pub fn add_title_reject_pattern(mut self, pattern: String) -> Self {
        match &mut self.title_reject_patterns {
            ListOverride::Extend(v) => v.push(pattern),
            _ => self.title_reject_patterns = ListOverride::Extend(vec![pattern]),
        }
        self
    }

    pub fn title_scan_lines(mut self, n: usize) -> Self {
        self.title_scan_lines = Some(n);
        self
    }

    pub fn title_length(mut self, min_chars: usize, max_chars: usize) -> Self {
        self.min_title_chars = Some(min_chars);
        self.max_title_chars = Some(max_chars);
        self
    }

    pub fn build(self) -> Result<ParserConfig, regex::Error> {
        let compile = |patterns: Vec<String>| -> Result<Vec<Regex>, regex::Error> {
            patterns.iter().map(|p| Regex::new(p)).collect()
        };
        let title_reject_patterns = match self.title_reject_patterns {
            ListOverride::Default => ListOverride::Default,
            ListOverride::Replace(v) => ListOverride::Replace(compile(v)?),
            ListOverride::Extend(v) => ListOverride::Extend(compile(v)?),
        };

        let min_title_chars = self.min_title_chars.unwrap_or(5).max(1);
        let max_title_chars = self.max_title_chars.unwrap_or(200).max(min_title_chars);

        Ok(ParserConfig {
            mastheads: self.mastheads,
            title_reject_patterns,
            title_scan_lines: self.title_scan_lines.unwrap_or(15).max(1),
            min_title_chars,
            max_title_chars,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ParserConfig::default();
        assert_eq!(config.title_scan_lines(), 15);
        assert_eq!(config.min_title_chars, 5);
        assert_eq!(config.max_title_chars, 200);
        assert!(config.mastheads().iter().any(|m| m == "Newsweek"));
    }

    #[test]
    fn mastheads_extend_and_replace() {
        let config = ParserConfigBuilder::new()
            .add_masthead("El Faro".into())
            .add_masthead("Proceso".into())
            .build()
            .unwrap();
        let mastheads = config.mastheads();
        assert_eq!(mastheads.len(), DEFAULT_MASTHEADS.len() + 2);
        assert_eq!(mastheads.last().map(String::as_str), Some("Proceso"));

        let config = ParserConfigBuilder::new()
            .set_mastheads(vec!["Only This".into()])
            .build()
            .unwrap();
        assert_eq!(config.mastheads(), vec!["Only This".to_string()]);
    }

    #[test]
    fn invalid_reject_pattern_fails_build() {
        let result = ParserConfigBuilder::new()
            .add_title_reject_pattern("[unclosed".into())
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn length_bounds_stay_ordered() {
        let config = ParserConfigBuilder::new()
            .title_length(50, 10)
            .build()
            .unwrap();
        assert_eq!(config.min_title_chars, 50);
        assert_eq!(config.max_title_chars, 50);
    }
}
