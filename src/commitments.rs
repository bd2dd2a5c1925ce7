//! Commitment normalization.
//!
//! Turns the raw commitment mentions produced by enrichment into structured
//! [`Commitment`] rows: who committed, to whom, and by when. Everything here
//! is a pure function of the mention text and the memory's creation time —
//! no model calls, no storage, no clock reads.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use uuid::Uuid;

use crate::models::Commitment;

const COMMITMENT_VERBS: &[&str] = &[
    "committed",
    "commits",
    "promised",
    "promises",
    "agreed",
    "agrees",
    "will",
    "volunteered",
];

/// Normalize raw mentions into commitments owned by `memory_id`.
///
/// Mentions that yield no parseable parts still become commitments with the
/// full mention as description: a vague obligation is still an obligation.
/// Unparseable due dates become `None`, never a guess.
pub fn normalize(
    mentions: &[String],
    memory_id: &str,
    created_at: DateTime<Utc>,
) -> Vec<Commitment> {
    let anchor = created_at.date_naive();
    mentions
        .iter()
        .filter(|m| !m.trim().is_empty())
        .map(|mention| Commitment {
            id: Uuid::new_v4().to_string(),
            memory_id: memory_id.to_string(),
            description: mention.trim().to_string(),
            committed_by: extract_committed_by(mention),
            committed_to: extract_committed_to(mention),
            due_date: extract_due_date(mention, anchor),
            fulfilled: false,
        })
        .collect()
}

/// The capitalized word(s) immediately before the first commitment verb,
/// or "unknown" when the mention names nobody.
fn extract_committed_by(mention: &str) -> String {
    let tokens: Vec<&str> = mention.split_whitespace().collect();
    let verb_idx = tokens
        .iter()
        .position(|t| COMMITMENT_VERBS.contains(&clean(t).to_lowercase().as_str()));

    if let Some(idx) = verb_idx {
        let mut names: Vec<&str> = Vec::new();
        for t in tokens[..idx].iter().rev() {
            let word = clean(t);
            if is_capitalized(word) {
                names.push(word);
            } else {
                break;
            }
        }
        if !names.is_empty() {
            names.reverse();
            return names.join(" ");
        }
    }
    "unknown".to_string()
}

/// Best-effort recipient: the first capitalized word following "to" after
/// the commitment verb.
fn extract_committed_to(mention: &str) -> Option<String> {
    let tokens: Vec<&str> = mention.split_whitespace().collect();
    let verb_idx = tokens
        .iter()
        .position(|t| COMMITMENT_VERBS.contains(&clean(t).to_lowercase().as_str()))?;

    let mut iter = tokens[verb_idx + 1..].iter().peekable();
    while let Some(t) = iter.next() {
        if clean(t).eq_ignore_ascii_case("to") {
            if let Some(next) = iter.peek() {
                let word = clean(next);
                if is_capitalized(word) {
                    return Some(word.to_string());
                }
            }
        }
    }
    None
}

/// Parse a due date out of a mention.
///
/// Handles ISO dates, month-name dates with or without a year, and the
/// relative forms "tomorrow", "next week", and "in N days". Month-name
/// dates without a year take the year of `anchor` (the memory's creation
/// day), rolling to the next year when the date would land in the past.
fn extract_due_date(mention: &str, anchor: NaiveDate) -> Option<NaiveDate> {
    let lower = mention.to_lowercase();
    if lower.contains("tomorrow") {
        return Some(anchor + Duration::days(1));
    }
    if lower.contains("next week") {
        return Some(anchor + Duration::days(7));
    }

    let tokens: Vec<&str> = mention.split_whitespace().collect();

    // "in N days"; absurd offsets overflow the date range and are treated
    // as unparseable rather than aborting the ingestion.
    for window in tokens.windows(3) {
        if clean(window[0]).eq_ignore_ascii_case("in") {
            if let Ok(n) = clean(window[1]).parse::<i64>() {
                if clean(window[2]).to_lowercase().starts_with("day") {
                    return Duration::try_days(n)
                        .and_then(|delta| anchor.checked_add_signed(delta));
                }
            }
        }
    }

    for (i, token) in tokens.iter().enumerate() {
        let word = clean(token);

        // ISO: 2026-12-15
        if let Ok(date) = NaiveDate::parse_from_str(word, "%Y-%m-%d") {
            return Some(date);
        }

        // Month-name: "Dec 15", "December 15, 2026"
        if let Some(month) = month_from_name(word) {
            let day_token = tokens.get(i + 1).map(|t| clean(t))?;
            let day: u32 = day_token.parse().ok()?;
            let year = tokens
                .get(i + 2)
                .map(|t| clean(t))
                .and_then(|t| t.parse::<i32>().ok())
                .filter(|y| *y >= 1000);

            return match year {
                Some(y) => NaiveDate::from_ymd_opt(y, month, day),
                None => {
                    let candidate = NaiveDate::from_ymd_opt(anchor.year(), month, day)?;
                    if candidate < anchor {
                        NaiveDate::from_ymd_opt(anchor.year() + 1, month, day)
                    } else {
                        Some(candidate)
                    }
                }
            };
        }
    }

    None
}

fn month_from_name(word: &str) -> Option<u32> {
    let m = match word.to_lowercase().as_str() {
        "jan" | "january" => 1,
        "feb" | "february" => 2,
        "mar" | "march" => 3,
        "apr" | "april" => 4,
        "may" => 5,
        "jun" | "june" => 6,
        "jul" | "july" => 7,
        "aug" | "august" => 8,
        "sep" | "sept" | "september" => 9,
        "oct" | "october" => 10,
        "nov" | "november" => 11,
        "dec" | "december" => 12,
        _ => return None,
    };
    Some(m)
}

fn clean(token: &str) -> &str {
    token.trim_matches(|c: char| !c.is_alphanumeric() && c != '-')
}

fn is_capitalized(word: &str) -> bool {
    word.chars().next().is_some_and(|c| c.is_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn created(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
    }

    fn one(mention: &str, created_at: DateTime<Utc>) -> Commitment {
        let out = normalize(&[mention.to_string()], "mem-1", created_at);
        assert_eq!(out.len(), 1);
        out.into_iter().next().unwrap()
    }

    #[test]
    fn test_who_what_when() {
        let c = one(
            "John committed to deliver the API by Dec 15",
            created(2026, 8, 27),
        );
        assert_eq!(c.committed_by, "John");
        assert_eq!(c.memory_id, "mem-1");
        assert_eq!(c.description, "John committed to deliver the API by Dec 15");
        assert_eq!(c.due_date, NaiveDate::from_ymd_opt(2026, 12, 15));
        assert!(!c.fulfilled);
    }

    #[test]
    fn test_year_rolls_forward_when_date_passed() {
        let c = one(
            "John committed to deliver the API by Dec 15",
            created(2026, 12, 20),
        );
        assert_eq!(c.due_date, NaiveDate::from_ymd_opt(2027, 12, 15));
    }

    #[test]
    fn test_explicit_year_and_recipient() {
        let c = one(
            "Sarah promised to send the report to Mike by January 5, 2027",
            created(2026, 8, 27),
        );
        assert_eq!(c.committed_by, "Sarah");
        assert_eq!(c.committed_to.as_deref(), Some("Mike"));
        assert_eq!(c.due_date, NaiveDate::from_ymd_opt(2027, 1, 5));
    }

    #[test]
    fn test_iso_date() {
        let c = one("Priya will ship the fix by 2026-09-01", created(2026, 8, 27));
        assert_eq!(c.committed_by, "Priya");
        assert_eq!(c.due_date, NaiveDate::from_ymd_opt(2026, 9, 1));
    }

    #[test]
    fn test_relative_dates() {
        let anchor = created(2026, 8, 27);
        assert_eq!(
            one("Alex agreed to reply tomorrow", anchor).due_date,
            NaiveDate::from_ymd_opt(2026, 8, 28)
        );
        assert_eq!(
            one("Alex agreed to follow up next week", anchor).due_date,
            NaiveDate::from_ymd_opt(2026, 9, 3)
        );
        assert_eq!(
            one("Alex will send the draft in 3 days", anchor).due_date,
            NaiveDate::from_ymd_opt(2026, 8, 30)
        );
    }

    #[test]
    fn test_unparseable_date_is_none_not_guess() {
        let c = one(
            "Dana promised to circle back soon",
            created(2026, 8, 27),
        );
        assert_eq!(c.committed_by, "Dana");
        assert_eq!(c.due_date, None);
    }

    #[test]
    fn test_absurd_relative_offset_yields_no_due_date() {
        let c = one(
            "Bob will migrate the data in 99999999999 days",
            created(2026, 8, 27),
        );
        assert_eq!(c.committed_by, "Bob");
        assert_eq!(c.due_date, None);
    }

    #[test]
    fn test_unknown_owner() {
        let c = one("someone will fix the build eventually", created(2026, 8, 27));
        assert_eq!(c.committed_by, "unknown");
    }

    #[test]
    fn test_multi_word_name() {
        let c = one(
            "Mary Jane committed to review the doc by Oct 1",
            created(2026, 8, 27),
        );
        assert_eq!(c.committed_by, "Mary Jane");
    }

    #[test]
    fn test_empty_mentions_skipped() {
        let out = normalize(
            &["".to_string(), "  ".to_string()],
            "mem-1",
            created(2026, 8, 27),
        );
        assert!(out.is_empty());
    }

    #[test]
    fn test_each_commitment_gets_unique_id() {
        let out = normalize(
            &[
                "John will send slides by Sep 1".to_string(),
                "John will book the room by Sep 2".to_string(),
            ],
            "mem-1",
            created(2026, 8, 27),
        );
        assert_eq!(out.len(), 2);
        assert_ne!(out[0].id, out[1].id);
        assert!(out.iter().all(|c| c.memory_id == "mem-1"));
    }
}
