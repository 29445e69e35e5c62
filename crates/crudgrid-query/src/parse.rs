use std::sync::LazyLock;

use bson::Bson;
use bson::oid::ObjectId;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, Utc};
use regex::{Captures, Regex};

use crate::error::FilterError;
use crate::predicate::{Comparator, Predicate, Test};
use crate::schema::FieldType;

static OR_SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s+or\s+|,").expect("or separator"));

static AND_SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s+and\s+").expect("and separator"));

static NULL_SENTINEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([!<>=]*)\s*(?:null|undefined)$").expect("null sentinel"));

// Longest operators first: the regex engine takes the first alternative that matches.
const COMPARISON_OPERATORS: &str = r"!==|!<=|!>=|<=|>=|==|!=|!<|!>|<|>|=";

const DATE_LITERAL: &str = r"\d{4}-\d{1,2}-\d{1,2}(?:[T ]\d{1,2}:\d{2}(?::\d{2})?)?";

static INTEGER_OPERATOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"({COMPARISON_OPERATORS})\s*([+-]?\d+)")).expect("integer operator")
});

static INTEGER_VALUE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[+-]?\d+").expect("integer value"));

static DATE_OPERATOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"({COMPARISON_OPERATORS})\s*({DATE_LITERAL}|\d+)"))
        .expect("date operator")
});

static DATE_VALUE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!(r"{DATE_LITERAL}|\d+")).expect("date value"));

static RECORD_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9a-f]{24}$").expect("record id"));

const REGEX_FLAGS: &str = "imsx";

/// Result of parsing one field's filter string.
///
/// Parsing is best effort: a malformed term records an error and contributes
/// nothing, while the remaining terms still form the predicate.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedFilter {
    pub predicate: Option<Predicate>,
    pub errors: Vec<FilterError>,
}

impl ParsedFilter {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// True when `raw` has the shape of a record id (24 lowercase hex characters).
pub fn is_record_id(raw: &str) -> bool {
    RECORD_ID.is_match(raw)
}

/// Parse a textual filter expression for `field` into a predicate tree.
///
/// The string splits into OR groups on `" or "` or `,`, and each group into
/// AND terms on `" and "`. Each term is tried as a null test, then as one or
/// more operator expressions, then as standalone values; anything left over
/// is an error scoped to `field`. Relative dates (`<7` on a date field) are
/// measured back from `now`.
pub fn parse_field_filter(
    field: &str,
    field_type: FieldType,
    raw: &str,
    now: DateTime<Utc>,
) -> ParsedFilter {
    let mut errors = Vec::new();
    let mut groups = Vec::new();

    for group in OR_SEPARATOR.split(raw) {
        let mut terms = Vec::new();
        for term in AND_SEPARATOR.split(group) {
            let term = term.trim();
            if term.is_empty() {
                continue;
            }
            match parse_term(field, field_type, term, now) {
                Ok(conditions) => terms.extend(conditions),
                Err(message) => errors.push(FilterError::new(field, format!("{message} in '{term}'"))),
            }
        }
        if let Some(group) = Predicate::all(terms) {
            groups.push(group);
        }
    }

    ParsedFilter {
        predicate: Predicate::any(groups),
        errors,
    }
}

fn parse_term(
    field: &str,
    field_type: FieldType,
    term: &str,
    now: DateTime<Utc>,
) -> Result<Vec<Predicate>, String> {
    // A null literal overrides whatever operator characters precede it.
    if let Some(caps) = NULL_SENTINEL.captures(term) {
        let test = if caps[1].contains('!') {
            Test::IsNotNull
        } else {
            Test::IsNull
        };
        return Ok(vec![Predicate::condition(field, test)]);
    }

    match field_type {
        FieldType::Integer | FieldType::Date => parse_comparable_term(field, field_type, term, now),
        FieldType::String => parse_text_term(field, term),
        FieldType::Identifier => parse_identifier_term(field, term),
    }
}

fn parse_comparable_term(
    field: &str,
    field_type: FieldType,
    term: &str,
    now: DateTime<Utc>,
) -> Result<Vec<Predicate>, String> {
    let (operator_re, value_re) = if field_type == FieldType::Date {
        (&*DATE_OPERATOR, &*DATE_VALUE)
    } else {
        (&*INTEGER_OPERATOR, &*INTEGER_VALUE)
    };

    let mut conditions = Vec::new();
    let mut failure: Option<String> = None;

    let without_operators = operator_re.replace_all(term, |caps: &Captures| {
        let op = &caps[1];
        let converted = Comparator::from_operator(op)
            .ok_or_else(|| format!("unknown operator '{op}'"))
            .and_then(|comparator| Ok((comparator, comparable_value(field_type, &caps[2], now)?)));
        match converted {
            Ok((comparator, value)) => conditions.push(Predicate::compare(field, comparator, value)),
            Err(message) => {
                failure.get_or_insert(message);
            }
        }
        " "
    });

    let leftover = value_re.replace_all(&without_operators, |caps: &Captures| {
        match standalone_value(field, field_type, &caps[0], now) {
            Ok(mut standalone) => conditions.append(&mut standalone),
            Err(message) => {
                failure.get_or_insert(message);
            }
        }
        " "
    });

    if let Some(message) = failure {
        return Err(message);
    }
    let leftover = leftover.trim();
    if !leftover.is_empty() {
        return Err(format!("unrecognized text '{leftover}'"));
    }
    Ok(conditions)
}

/// A bare value with no operator: equality for integers, the whole calendar
/// day for dates.
fn standalone_value(
    field: &str,
    field_type: FieldType,
    raw: &str,
    now: DateTime<Utc>,
) -> Result<Vec<Predicate>, String> {
    if field_type != FieldType::Date {
        let value = comparable_value(field_type, raw, now)?;
        return Ok(vec![Predicate::compare(field, Comparator::Eq, value)]);
    }

    let day = date_value(raw, now)?.date_naive();
    let next = day
        .succ_opt()
        .ok_or_else(|| format!("date '{raw}' is out of range"))?;
    Ok(vec![
        Predicate::compare(field, Comparator::Gte, day_start(day)),
        Predicate::compare(field, Comparator::Lt, day_start(next)),
    ])
}

fn comparable_value(field_type: FieldType, raw: &str, now: DateTime<Utc>) -> Result<Bson, String> {
    match field_type {
        FieldType::Date => Ok(to_bson_date(date_value(raw, now)?)),
        _ => raw
            .parse::<i64>()
            .map(Bson::Int64)
            .map_err(|_| format!("'{raw}' is not a valid integer")),
    }
}

fn date_value(raw: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>, String> {
    if raw.bytes().all(|b| b.is_ascii_digit()) {
        let days: i64 = raw
            .parse()
            .map_err(|_| format!("day offset '{raw}' is out of range"))?;
        return TimeDelta::try_days(days)
            .and_then(|offset| now.checked_sub_signed(offset))
            .ok_or_else(|| format!("day offset '{raw}' is out of range"));
    }

    const DATETIME_FORMATS: [&str; 4] = [
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
    ];
    if let Some(parsed) = DATETIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
    {
        return Ok(parsed.and_utc());
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map(|date| date.and_time(NaiveTime::MIN).and_utc())
        .map_err(|_| format!("'{raw}' is not a valid date"))
}

fn day_start(day: NaiveDate) -> Bson {
    to_bson_date(day.and_time(NaiveTime::MIN).and_utc())
}

fn to_bson_date(at: DateTime<Utc>) -> Bson {
    Bson::DateTime(bson::DateTime::from_millis(at.timestamp_millis()))
}

/// Strips a leading `=`, `==`, `!=` or `!==`, returning whether the test is
/// negated. Any other operator characters are rejected.
fn split_equality_operator<'a>(term: &'a str, kind: &str) -> Result<(bool, &'a str), String> {
    for (op, negated) in [("!==", true), ("!=", true), ("==", false), ("=", false)] {
        if let Some(rest) = term.strip_prefix(op) {
            let rest = rest.trim_start();
            if rest.is_empty() {
                return Err(format!("missing value after '{op}'"));
            }
            return Ok((negated, rest));
        }
    }

    let illegal: String = term
        .chars()
        .take_while(|c| matches!(c, '<' | '>' | '!'))
        .collect();
    if illegal.is_empty() {
        Ok((false, term))
    } else {
        Err(format!("operator '{illegal}' is not allowed on {kind} fields"))
    }
}

fn parse_text_term(field: &str, term: &str) -> Result<Vec<Predicate>, String> {
    let (negated, value) = split_equality_operator(term, "text")?;

    let test = if let Some(body) = value.strip_prefix('/') {
        let end = body
            .rfind('/')
            .ok_or_else(|| "unterminated regular expression".to_string())?;
        let (pattern, flags) = (&body[..end], &body[end + 1..]);
        if pattern.is_empty() {
            return Err("empty regular expression".into());
        }
        if let Some(flag) = flags.chars().find(|c| !REGEX_FLAGS.contains(*c)) {
            return Err(format!("unknown regular expression flag '{flag}'"));
        }
        let compiled = if flags.is_empty() {
            Regex::new(pattern)
        } else {
            Regex::new(&format!("(?{flags}){pattern}"))
        };
        if let Err(e) = compiled {
            return Err(format!("invalid regular expression: {e}"));
        }
        Test::Regex {
            pattern: pattern.to_string(),
            flags: flags.to_string(),
            negated,
        }
    } else if let Some(body) = value.strip_prefix('"') {
        let text = body
            .strip_suffix('"')
            .ok_or_else(|| "unterminated quoted text".to_string())?;
        Test::Exact {
            text: text.to_string(),
            negated,
        }
    } else {
        Test::Contains {
            text: value.to_string(),
            negated,
        }
    };

    Ok(vec![Predicate::condition(field, test)])
}

fn parse_identifier_term(field: &str, term: &str) -> Result<Vec<Predicate>, String> {
    let (negated, value) = split_equality_operator(term, "identifier")?;
    if !is_record_id(value) {
        return Err(format!("'{value}' is not a valid record id"));
    }
    let id = ObjectId::parse_str(value).map_err(|e| format!("'{value}' is not a valid record id: {e}"))?;
    let comparator = if negated {
        Comparator::Ne
    } else {
        Comparator::Eq
    };
    Ok(vec![Predicate::compare(field, comparator, Bson::ObjectId(id))])
}
