use super::raw::{RawNotam, StructuredFields};
use super::record::{Classification, NotamRecord, Provider};
use crate::icao::Icao;
use chrono::{DateTime, NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

static NOTAM_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([A-Z]\d{4}/\d{2})").expect("valid regex"));
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Common contractions expanded so summaries read like prose and keyword
/// classification only has to match the long form.
static ABBREVIATIONS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r"\bRWY\b", "RUNWAY"),
        (r"\bTWY\b", "TAXIWAY"),
        (r"\bCLSD\b", "CLOSED"),
        (r"\bU/S\b", "UNSERVICEABLE"),
        (r"\bCTC\b", "CONTACT"),
        (r"\bDLA\b", "DELAY"),
        (r"\bDEP\b", "DEPARTURE"),
    ]
    .into_iter()
    .map(|(pattern, long)| (Regex::new(pattern).expect("valid regex"), long))
    .collect()
});

const SUMMARY_SENTENCE_MIN: usize = 20;
const SUMMARY_SENTENCE_MAX: usize = 150;
const SUMMARY_TRUNCATE_AT: usize = 180;
const SUMMARY_TRUNCATED_LEN: usize = 177;

/// Convert one classified upstream item into a canonical record. Total:
/// malformed input yields `None`, never a panic or an error, so one bad item
/// cannot abort the rest of its batch.
pub fn normalize(
    raw: &RawNotam,
    code: &Icao,
    index_hint: usize,
    source: Provider,
) -> Option<NotamRecord> {
    match raw {
        RawNotam::Structured(fields) => normalize_structured(fields, code, index_hint, source),
        RawNotam::Freeform { text } => normalize_freeform(text, code, index_hint, source),
    }
}

fn normalize_structured(
    fields: &StructuredFields,
    code: &Icao,
    index_hint: usize,
    source: Provider,
) -> Option<NotamRecord> {
    let body = clean_text(fields.body.as_deref().or(fields.summary.as_deref()).unwrap_or(""));
    if body.is_empty() && fields.number.is_none() {
        return None;
    }

    let summary = match fields.summary.as_deref().map(clean_text) {
        Some(s) if !s.is_empty() => s,
        _ => summarize(&body),
    };

    let valid_from = fields
        .valid_from
        .as_deref()
        .and_then(parse_timestamp)
        .or_else(|| fields.issued.as_deref().and_then(parse_timestamp));
    let valid_to = fields.valid_to.as_deref().and_then(parse_timestamp);
    let issued = fields
        .issued
        .as_deref()
        .and_then(parse_timestamp)
        .or(valid_from);

    Some(NotamRecord {
        id: record_id(code, fields.number.as_deref(), index_hint),
        code: code.clone(),
        number: fields.number.clone(),
        classification: classify(fields.q_line.as_deref(), &format!("{summary} {body}")),
        valid_from,
        valid_to,
        issued,
        summary,
        body,
        q_line: fields.q_line.clone(),
        source,
    })
}

fn normalize_freeform(
    text: &str,
    code: &Icao,
    index_hint: usize,
    source: Provider,
) -> Option<NotamRecord> {
    let parsed = parse_freeform(text);
    let body = clean_text(&parsed.body);
    if body.is_empty() {
        return None;
    }

    let summary = summarize(&body);
    let valid_from = parsed.valid_from.as_deref().and_then(parse_timestamp);
    let valid_to = parsed.valid_to.as_deref().and_then(parse_timestamp);

    Some(NotamRecord {
        id: record_id(code, parsed.number.as_deref(), index_hint),
        code: code.clone(),
        number: parsed.number.clone(),
        classification: classify(parsed.q_line.as_deref(), &format!("{summary} {body}")),
        valid_from,
        valid_to,
        // The secondary provider has no separate issue time; the validity
        // start is the closest stand-in.
        issued: valid_from,
        summary,
        body,
        q_line: parsed.q_line,
        source,
    })
}

fn record_id(code: &Icao, number: Option<&str>, index_hint: usize) -> String {
    match number {
        Some(number) => format!("{code}-{number}"),
        None => format!("{code}-{index_hint}"),
    }
}

#[derive(Debug, Default)]
struct ParsedFreeform {
    number: Option<String>,
    q_line: Option<String>,
    valid_from: Option<String>,
    valid_to: Option<String>,
    body: String,
}

/// Line-by-line parse of an ICAO-format text block. Labeled lines use the
/// one-letter-plus-`)` convention; unlabeled lines after `E)` belong to the
/// body until the next label.
fn parse_freeform(text: &str) -> ParsedFreeform {
    let mut parsed = ParsedFreeform {
        number: NOTAM_NUMBER
            .captures(text)
            .map(|c| c[1].to_string()),
        ..ParsedFreeform::default()
    };

    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();

    let mut body_parts: Vec<String> = Vec::new();
    let mut i = 0;
    while i < lines.len() {
        let line = lines[i];
        if let Some(rest) = line.strip_prefix("Q)") {
            if parsed.q_line.is_none() && !rest.trim().is_empty() {
                parsed.q_line = Some(line.to_string());
            }
        } else if let Some(rest) = line.strip_prefix("B)") {
            parsed.valid_from = leading_digits(rest);
        } else if let Some(rest) = line.strip_prefix("C)") {
            parsed.valid_to = leading_digits(rest);
        } else if let Some(rest) = line.strip_prefix("E)") {
            body_parts.push(rest.trim().to_string());
            // Unlabeled continuation lines are part of the body; a French
            // translation marker ends it like a new label would.
            while i + 1 < lines.len() {
                let next = lines[i + 1];
                if is_labeled(next) || is_french_marker(next) {
                    break;
                }
                body_parts.push(next.to_string());
                i += 1;
            }
        }
        i += 1;
    }

    if body_parts.is_empty() {
        // No E) section at all: treat the whole block as body, minus labels.
        parsed.body = lines
            .iter()
            .filter(|l| !is_labeled(l) && !is_french_marker(l))
            .copied()
            .collect::<Vec<_>>()
            .join(" ");
    } else {
        parsed.body = body_parts.join(" ");
    }
    parsed
}

fn is_labeled(line: &str) -> bool {
    let bytes = line.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_uppercase() && bytes[1] == b')'
}

fn is_french_marker(line: &str) -> bool {
    line.contains("FR:") || line.contains("FRENCH:")
}

fn leading_digits(text: &str) -> Option<String> {
    let digits: String = text
        .trim()
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    (!digits.is_empty()).then_some(digits)
}

/// Decode the date encodings seen upstream: RFC 3339 / ISO 8601 strings,
/// 10-digit `YYMMDDHHMM` (assumed 20xx), and 12-digit `YYYYMMDDHHMM`.
/// Anything else is `None`.
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S") {
        return Some(naive.and_utc());
    }

    if text.chars().all(|c| c.is_ascii_digit()) {
        let (year, rest) = match text.len() {
            10 => (2000 + text[0..2].parse::<i32>().ok()?, &text[2..]),
            12 => (text[0..4].parse::<i32>().ok()?, &text[4..]),
            _ => return None,
        };
        let month = rest[0..2].parse().ok()?;
        let day = rest[2..4].parse().ok()?;
        let hour = rest[4..6].parse().ok()?;
        let minute = rest[6..8].parse().ok()?;
        return NaiveDate::from_ymd_opt(year, month, day)?
            .and_hms_opt(hour, minute, 0)
            .map(|naive| naive.and_utc());
    }

    None
}

fn clean_text(text: &str) -> String {
    let mut cleaned = WHITESPACE.replace_all(text.trim(), " ").into_owned();
    for (pattern, long) in ABBREVIATIONS.iter() {
        cleaned = pattern.replace_all(&cleaned, *long).into_owned();
    }
    cleaned
}

fn summarize(body: &str) -> String {
    if let Some(first_sentence) = body.split(['.', '!', '?']).next() {
        let first_sentence = first_sentence.trim();
        let len = first_sentence.chars().count();
        if len > SUMMARY_SENTENCE_MIN && len < SUMMARY_SENTENCE_MAX {
            return first_sentence.to_string();
        }
    }
    if body.chars().count() > SUMMARY_TRUNCATE_AT {
        let truncated: String = body.chars().take(SUMMARY_TRUNCATED_LEN).collect();
        return format!("{}...", truncated.trim_end());
    }
    body.trim().to_string()
}

/// Two-tier classification: the structured Q-code wins when present and
/// recognized; keyword matching over the assembled text is the fallback.
fn classify(q_line: Option<&str>, text: &str) -> Classification {
    if let Some(q_line) = q_line
        && let Some(classification) = classify_q_code(q_line)
    {
        return classification;
    }
    classify_keywords(&text.to_ascii_uppercase())
}

fn classify_q_code(q_line: &str) -> Option<Classification> {
    // Q) CZUL/QMRLC/IV/NBO/A/000/999/... -- the second slash-separated part
    // carries the subject code, and its first two letters are the group.
    let code = q_line.split('/').nth(1)?.trim();
    match code.get(0..2)? {
        "QM" => Some(Classification::RunwayClosure),
        "QT" => Some(Classification::TaxiwayClosure),
        "QF" | "QS" => Some(Classification::Fuel),
        "QI" | "QR" | "QN" | "QL" | "QC" => Some(Classification::NavAid),
        "QO" | "QA" => Some(Classification::Other),
        _ => None,
    }
}

static KEYWORD_RULES: Lazy<Vec<(Regex, Classification)>> = Lazy::new(|| {
    [
        (r"\bNOTAMC\b|\bCANCELLED\b", Classification::Cancelled),
        (
            r"\b(RUNWAY|RWY)\b.*\b(CLSD|CLOSED|CLOSURE)\b",
            Classification::RunwayClosure,
        ),
        (
            r"\b(TAXIWAY|TWY)\b.*\b(CLSD|CLOSED|CLOSURE)\b",
            Classification::TaxiwayClosure,
        ),
        (
            r"\bRSC\b|\bRUNWAY SURFACE CONDITION\b",
            Classification::SurfaceCondition,
        ),
        (r"\bCRFI\b|\bFRICTION\b", Classification::FrictionIndex),
        (
            r"\b(ILS|LOCALIZER|GLIDESLOPE|VOR|DME|NDB|NAVIGATION)\b",
            Classification::NavAid,
        ),
        (r"\b(FUEL|REFUEL|AVGAS|JET\s*A)\b", Classification::Fuel),
    ]
    .into_iter()
    .map(|(pattern, class)| (Regex::new(pattern).expect("valid regex"), class))
    .collect()
});

fn classify_keywords(text: &str) -> Classification {
    KEYWORD_RULES
        .iter()
        .find(|(pattern, _)| pattern.is_match(text))
        .map_or(Classification::Other, |(_, class)| *class)
}
