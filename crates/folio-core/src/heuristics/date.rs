//! Date rules for English and Spanish publications.
//!
//! Rules run from most to least specific. Once a span of text is claimed by
//! a rule, less specific rules skip it, so `March 15, 2023` is one full date
//! and not also a bare year.

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

const MONTH_EN: &str = r"(jan(?:uary)?|feb(?:ruary)?|mar(?:ch)?|apr(?:il)?|may|june?|july?|aug(?:ust)?|sept?(?:ember)?|oct(?:ober)?|nov(?:ember)?|dec(?:ember)?)\.?";
const MONTH_ES: &str = r"(ene(?:ro)?|feb(?:rero)?|mar(?:zo)?|abr(?:il)?|may(?:o)?|jun(?:io)?|jul(?:io)?|ago(?:sto)?|sep(?:tiembre)?|set(?:iembre)?|oct(?:ubre)?|nov(?:iembre)?|dic(?:iembre)?)\.?";
const MONTH_ANY: &str = r"(jan(?:uary)?|feb(?:ruary|rero)?|mar(?:ch|zo)?|apr(?:il)?|may(?:o)?|june?|july?|jun(?:io)?|jul(?:io)?|aug(?:ust)?|sept?(?:ember)?|oct(?:ober|ubre)?|nov(?:ember|iembre)?|dec(?:ember)?|ene(?:ro)?|abr(?:il)?|ago(?:sto)?|sep(?:tiembre)?|set(?:iembre)?|dic(?:iembre)?)\.?";

/// A date found in page text, normalized to ISO form at the precision the
/// text supports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DateMatch {
    /// `YYYY-MM-DD`, `YYYY-MM` or `YYYY`.
    pub value: String,
    /// 3 = full date, 2 = month and year, 1 = bare year.
    pub specificity: u8,
    pub start: usize,
    pub end: usize,
}

#[derive(Clone, Copy)]
enum Shape {
    /// Groups: year, month number, day.
    Iso,
    /// Groups: month name, day, year.
    MonthDayYear,
    /// Groups: day, month name, year.
    DayMonthYear,
    /// Groups: month name, year.
    MonthYear,
    /// Groups: year.
    Year,
}

struct DateRule {
    re: Regex,
    shape: Shape,
    specificity: u8,
}

static DATE_RULES: Lazy<Vec<DateRule>> = Lazy::new(|| {
    let rule = |pattern: String, shape, specificity| DateRule {
        re: Regex::new(&pattern).unwrap(),
        shape,
        specificity,
    };
    vec![
        rule(
            r"\b(\d{4})[-/](\d{1,2})[-/](\d{1,2})\b".to_string(),
            Shape::Iso,
            3,
        ),
        rule(
            format!(r"(?i)\b{MONTH_EN}\s+(\d{{1,2}})(?:st|nd|rd|th)?,?\s+(\d{{4}})\b"),
            Shape::MonthDayYear,
            3,
        ),
        rule(
            format!(r"(?i)\b(\d{{1,2}})(?:st|nd|rd|th)?\s+{MONTH_EN},?\s+(\d{{4}})\b"),
            Shape::DayMonthYear,
            3,
        ),
        rule(
            format!(r"(?i)\b(\d{{1,2}})\s+de\s+{MONTH_ES}\s+(?:de|del)\s+(\d{{4}})\b"),
            Shape::DayMonthYear,
            3,
        ),
        rule(
            format!(r"(?i)\b{MONTH_ANY},?\s+(?:(?:de|del)\s+)?(\d{{4}})\b"),
            Shape::MonthYear,
            2,
        ),
        rule(r"\b(1[89]\d{2}|20\d{2})\b".to_string(), Shape::Year, 1),
    ]
});

fn month_number(name: &str) -> Option<u32> {
    let prefix: String = name.to_lowercase().chars().take(3).collect();
    let month = match prefix.as_str() {
        "jan" | "ene" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" | "abr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" | "ago" => 8,
        "sep" | "set" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" | "dic" => 12,
        _ => return None,
    };
    Some(month)
}

fn year_in_range(year: i32) -> bool {
    (1800..=2099).contains(&year)
}

fn num<T: std::str::FromStr>(caps: &Captures<'_>, i: usize) -> Option<T> {
    caps.get(i)?.as_str().parse().ok()
}

fn full_date(year: i32, month: u32, day: u32) -> Option<String> {
    if !year_in_range(year) {
        return None;
    }
    NaiveDate::from_ymd_opt(year, month, day).map(|d| d.format("%Y-%m-%d").to_string())
}

fn month_date(year: i32, month: u32) -> Option<String> {
    if !year_in_range(year) || !(1..=12).contains(&month) {
        return None;
    }
    Some(format!("{year:04}-{month:02}"))
}

fn normalize(caps: &Captures<'_>, shape: Shape) -> Option<String> {
    match shape {
        Shape::Iso => full_date(num(caps, 1)?, num(caps, 2)?, num(caps, 3)?),
        Shape::MonthDayYear => {
            full_date(num(caps, 3)?, month_number(caps.get(1)?.as_str())?, num(caps, 2)?)
        }
        Shape::DayMonthYear => {
            full_date(num(caps, 3)?, month_number(caps.get(2)?.as_str())?, num(caps, 1)?)
        }
        Shape::MonthYear => month_date(num(caps, 2)?, month_number(caps.get(1)?.as_str())?),
        Shape::Year => {
            let year: i32 = num(caps, 1)?;
            year_in_range(year).then(|| format!("{year:04}"))
        }
    }
}

/// All dates in `text`, ordered by position.
pub(crate) fn find_dates(text: &str) -> Vec<DateMatch> {
    let mut found: Vec<DateMatch> = Vec::new();
    for rule in DATE_RULES.iter() {
        for caps in rule.re.captures_iter(text) {
            let Some(m) = caps.get(0) else { continue };
            let overlaps = found.iter().any(|d| m.start() < d.end && d.start < m.end());
            if overlaps {
                continue;
            }
            if let Some(value) = normalize(&caps, rule.shape) {
                found.push(DateMatch {
                    value,
                    specificity: rule.specificity,
                    start: m.start(),
                    end: m.end(),
                });
            }
        }
    }
    found.sort_by_key(|d| d.start);
    found
}

/// Normalize a free-form date to ISO form (`YYYY-MM-DD`, `YYYY-MM` or
/// `YYYY`), taking the most specific date in the string. Returns `None` when
/// nothing in the string passes the date rules.
pub fn normalize_date_str(raw: &str) -> Option<String> {
    static YEAR_MONTH_RE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"^\s*(\d{4})[-/](\d{1,2})\s*$").unwrap());

    let text = crate::text_utils::normalize_text(raw);
    let best = find_dates(&text)
        .into_iter()
        .min_by_key(|d| (std::cmp::Reverse(d.specificity), d.start));
    let year_month = YEAR_MONTH_RE
        .captures(&text)
        .and_then(|caps| month_date(num(&caps, 1)?, num(&caps, 2)?));

    match (best, year_month) {
        (Some(d), Some(ym)) if d.specificity < 2 => Some(ym),
        (Some(d), _) => Some(d.value),
        (None, ym) => ym,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(text: &str) -> Vec<(String, u8)> {
        find_dates(text)
            .into_iter()
            .map(|d| (d.value, d.specificity))
            .collect()
    }

    #[test]
    fn english_full_date_claims_its_year() {
        assert_eq!(
            values("Annual Report, March 15, 2023"),
            vec![("2023-03-15".to_string(), 3)]
        );
        assert_eq!(
            values("Published Sept. 3rd 2019"),
            vec![("2019-09-03".to_string(), 3)]
        );
    }

    #[test]
    fn iso_and_slashed() {
        assert_eq!(values("Filed 2021-07-04"), vec![("2021-07-04".to_string(), 3)]);
        assert_eq!(values("2021/7/4"), vec![("2021-07-04".to_string(), 3)]);
    }

    #[test]
    fn day_month_year() {
        assert_eq!(values("15 March 2023"), vec![("2023-03-15".to_string(), 3)]);
        assert_eq!(
            values("San Salvador, 3 de mayo de 2021"),
            vec![("2021-05-03".to_string(), 3)]
        );
        assert_eq!(values("12 de Dic. del 1998"), vec![("1998-12-12".to_string(), 3)]);
    }

    #[test]
    fn month_year_in_both_languages() {
        assert_eq!(values("Boletín de Marzo 2020"), vec![("2020-03".to_string(), 2)]);
        assert_eq!(values("Enero de 2019"), vec![("2019-01".to_string(), 2)]);
        assert_eq!(values("August, 1995"), vec![("1995-08".to_string(), 2)]);
    }

    #[test]
    fn bare_years_in_range_only() {
        assert_eq!(values("since 1987"), vec![("1987".to_string(), 1)]);
        assert!(values("code 1701 and 2150").is_empty());
    }

    #[test]
    fn invalid_calendar_dates_are_skipped() {
        // The ISO rule fails validation, so only the year survives.
        assert_eq!(values("2023-02-30"), vec![("2023".to_string(), 1)]);
        assert!(values("February 30, 2023").iter().all(|(_, s)| *s < 3));
    }

    #[test]
    fn results_are_in_text_order() {
        let found = values("1999 report revised on 2001-05-06");
        assert_eq!(
            found,
            vec![("1999".to_string(), 1), ("2001-05-06".to_string(), 3)]
        );
    }

    #[test]
    fn normalize_picks_most_specific() {
        assert_eq!(normalize_date_str("2023-03-15").as_deref(), Some("2023-03-15"));
        assert_eq!(normalize_date_str("March 2023").as_deref(), Some("2023-03"));
        assert_eq!(normalize_date_str("2023-03").as_deref(), Some("2023-03"));
        assert_eq!(normalize_date_str("2023").as_deref(), Some("2023"));
        assert_eq!(
            normalize_date_str("circa 2022, exactly 1 de junio de 2022").as_deref(),
            Some("2022-06-01")
        );
        assert_eq!(normalize_date_str("unknown"), None);
        assert_eq!(normalize_date_str("2023-13").as_deref(), Some("2023"));
    }
}
