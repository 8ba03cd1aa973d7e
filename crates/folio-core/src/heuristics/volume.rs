//! Volume/issue designations (`Vol. 4, No. 2`, `Tomo IV, Núm. 7`, ...).

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::text_utils::collapse_whitespace;

/// Roman numerals are matched upper-case only, so "Volume civil" or
/// "Volcán" never read as a volume.
const VOLUME: &str = r"((?-i:[IVXLC]+)|\d+)";

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct VolumeMatch {
    /// The matched text, whitespace collapsed.
    pub value: String,
    /// Canonical `volume` or `volume-issue` key with roman numerals converted.
    pub key: String,
    /// 2 = volume and issue, 1 = volume only.
    pub specificity: u8,
    pub start: usize,
    pub end: usize,
}

static VOLUME_RULES: Lazy<Vec<(Regex, u8)>> = Lazy::new(|| {
    let rule = |pattern: String, specificity| (Regex::new(&pattern).unwrap(), specificity);
    vec![
        rule(format!(r"(?i)\bVolumen?\s+{VOLUME}\s*,\s*No\.?\s*(\d+)\b"), 2),
        rule(format!(r"(?i)\bVol\.?\s*{VOLUME}\s*,\s*No\.?\s*(\d+)\b"), 2),
        rule(r"(?i)\bVol\.?\s*(\d+)\s*\(\s*No\.?\s*(\d+)\s*\)".to_string(), 2),
        rule(format!(r"(?i)\bTomo\s+{VOLUME}\s*,\s*N[úu]m\.?\s*(\d+)\b"), 2),
        rule(r"(?i)\bVolume\s+(\d+)\s*[,-]?\s*Issue\s+(\d+)\b".to_string(), 2),
        rule(r"(?i)\bVol\.?\s*(\d+)\s*[,-]?\s*Iss?(?:ue)?\.?\s*(\d+)\b".to_string(), 2),
        rule(r"(?i)\bV\.?\s*(\d+)\s*[,-]?\s*N[o°º]?\.?\s*(\d+)\b".to_string(), 2),
        rule(format!(r"(?i)\b(?:Volumen?|Vol\.?|Tomo)\s*{VOLUME}\b"), 1),
    ]
});

/// Value of a roman numeral, or `None` if `s` is not one.
fn roman_value(s: &str) -> Option<u32> {
    let mut total = 0u32;
    let mut prev = 0u32;
    for c in s.chars().rev() {
        let v = match c.to_ascii_uppercase() {
            'I' => 1,
            'V' => 5,
            'X' => 10,
            'L' => 50,
            'C' => 100,
            _ => return None,
        };
        if v < prev {
            total = total.checked_sub(v)?;
        } else {
            total += v;
            prev = v;
        }
    }
    (total > 0).then_some(total)
}

fn volume_number(raw: &str) -> Option<u32> {
    raw.parse().ok().or_else(|| roman_value(raw))
}

fn canonical_key(caps: &Captures<'_>) -> Option<String> {
    let volume = volume_number(caps.get(1)?.as_str())?;
    match caps.get(2) {
        Some(issue) => {
            let issue: u32 = issue.as_str().parse().ok()?;
            Some(format!("{volume}-{issue}"))
        }
        None => Some(volume.to_string()),
    }
}

/// All volume/issue designations in `text`, ordered by position. More
/// specific rules claim their span first.
pub(crate) fn find_volume_issues(text: &str) -> Vec<VolumeMatch> {
    let mut found: Vec<VolumeMatch> = Vec::new();
    for (re, specificity) in VOLUME_RULES.iter() {
        for caps in re.captures_iter(text) {
            let Some(m) = caps.get(0) else { continue };
            if found.iter().any(|v| m.start() < v.end && v.start < m.end()) {
                continue;
            }
            let Some(key) = canonical_key(&caps) else {
                continue;
            };
            found.push(VolumeMatch {
                value: collapse_whitespace(m.as_str()),
                key,
                specificity: *specificity,
                start: m.start(),
                end: m.end(),
            });
        }
    }
    found.sort_by_key(|v| v.start);
    found
}
