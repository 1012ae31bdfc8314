//! Row normalizer
//!
//! Maps one `InputRow` onto one target's field layout. Never fails on data:
//! unparsable numbers and dates are dropped (dates with a warning).

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;
use tracing::warn;

use super::enrollment::{InputRow, normalize_email};
use super::payload::{FieldValue, NormalizedPayload};
use super::target_spec::{FieldKind, FieldPresence, SpecError, TargetSpec};

const PHONE_DIGITS: usize = 10;

/// Offset-carrying layouts tried after RFC 3339 / RFC 2822.
const OFFSET_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M:%S%.f %z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
];

/// Naive date-time layouts, taken as UTC. Two-digit years go first:
/// `%Y` would happily read `24` as the year 24.
const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%Y/%m/%d %H:%M",
    "%m/%d/%y %I:%M:%S %p",
    "%m/%d/%y %I:%M %p",
    "%m/%d/%y %H:%M:%S",
    "%m/%d/%y %H:%M",
    "%m/%d/%Y %I:%M:%S %p",
    "%m/%d/%Y %I:%M %p",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
    "%b %d, %Y %I:%M %p",
    "%b %d, %Y %I:%M%p",
    "%b %d, %Y %H:%M:%S",
    "%b %d %Y %I:%M %p",
    "%b %d %Y %I:%M%p",
    "%b %d %Y %H:%M:%S",
    "%B %d, %Y %I:%M %p",
    "%B %d, %Y %H:%M:%S",
    "%B %d %Y %H:%M:%S",
    "%d %b %Y %H:%M:%S",
    "%d %B %Y %H:%M:%S",
    "%d-%b-%Y %H:%M:%S",
];

const NAIVE_DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%m/%d/%y",
    "%m/%d/%Y",
    "%m-%d-%Y",
    "%b %d, %Y",
    "%b %d %Y",
    "%B %d, %Y",
    "%B %d %Y",
    "%d %b %Y",
    "%d %b, %Y",
    "%d %B %Y",
    "%d %B, %Y",
    "%d-%b-%Y",
    "%d-%B-%Y",
    "%d-%b-%y",
    "%A, %B %d, %Y",
];

/// Zone words that mean UTC when trailing a naive layout.
const UTC_SUFFIXES: &[&str] = &["Z", " UTC", " GMT"];

fn strip_utc_suffix(s: &str) -> &str {
    UTC_SUFFIXES
        .iter()
        .find_map(|suffix| {
            let cut = s.len().checked_sub(suffix.len())?;
            let tail = s.get(cut..)?;
            tail.eq_ignore_ascii_case(suffix).then(|| s[..cut].trim_end())
        })
        .unwrap_or(s)
}

/// Digits only; more than ten keeps the last ten (drops country codes).
pub fn sanitize_phone(raw: &str) -> String {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    if digits.len() > PHONE_DIGITS {
        digits[digits.len() - PHONE_DIGITS..].to_string()
    } else {
        digits
    }
}

pub fn parse_number(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Permissive date parser for CSV cells. Blank input is `None`.
pub fn parse_csv_date(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
    }

    let naive = strip_utc_suffix(s);
    for fmt in NAIVE_DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(naive, fmt) {
            return Some(Utc.from_utc_datetime(&dt));
        }
    }
    for fmt in NAIVE_DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(naive, fmt) {
            return d.and_hms_opt(0, 0, 0).map(|dt| Utc.from_utc_datetime(&dt));
        }
    }

    None
}

/// Timestamp stored on an existing record: either an ISO string or a
/// Parse date object (`{"__type":"Date","iso":..}`).
pub fn parse_record_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => parse_csv_date(s),
        Value::Object(obj) => obj
            .get("iso")
            .and_then(Value::as_str)
            .and_then(parse_csv_date),
        _ => None,
    }
}

pub fn normalize(row: &InputRow, spec: &TargetSpec) -> Result<NormalizedPayload, SpecError> {
    let identity_source = spec
        .identity_source()
        .ok_or_else(|| SpecError::IdentityNotDeclared {
            target: spec.name.clone(),
            field: spec.identity_field.clone(),
        })?;

    let email = normalize_email(row.get(identity_source).unwrap_or_default());
    let mut payload = NormalizedPayload::new(spec.identity_field.clone(), email);

    for field in &spec.fields {
        let raw = row.get(&field.source);
        let value = match field.kind {
            FieldKind::Email => {
                if field.target == spec.identity_field {
                    continue;
                }
                Some(FieldValue::Text(normalize_email(raw.unwrap_or_default())))
            }
            FieldKind::Phone => Some(FieldValue::Text(sanitize_phone(raw.unwrap_or_default()))),
            FieldKind::Text => match (raw, field.presence) {
                (Some(v), _) => Some(FieldValue::Text(v.to_string())),
                (None, FieldPresence::IncludeEmpty) => Some(FieldValue::Text(String::new())),
                (None, _) => None,
            },
            FieldKind::Number => raw.and_then(parse_number).map(FieldValue::Number),
            FieldKind::Date => match raw {
                Some(v) if !v.trim().is_empty() => {
                    let parsed = parse_csv_date(v);
                    if parsed.is_none() {
                        warn!(
                            "⚠️ Couldn't parse {} '{}' for {} ({}), field omitted",
                            field.source,
                            v,
                            spec.name,
                            payload.email()
                        );
                    }
                    parsed.map(FieldValue::Timestamp)
                }
                _ => None,
            },
        };

        if let Some(value) = value {
            payload.insert(field.target.clone(), value);
        }
    }

    Ok(payload)
}
