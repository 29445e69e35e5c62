use std::cmp::Ordering;
use std::collections::HashMap;

use bson::{Bson, Document};
use regex::Regex;

use crate::error::QueryError;
use crate::sort::{Sort, SortDirection};

/// Evaluate whether `record` satisfies a lowered query document.
///
/// Understands the subset the compiler emits:
/// - top-level `$and` / `$or` arrays, other keys are field conditions (implicit AND)
/// - `{ field: value }` is implicit `$eq`
/// - `$eq`, `$ne`, `$gt`, `$gte`, `$lt`, `$lte`, `$exists`, `$not`
/// - `$regex` with an optional `$options` sibling
///
/// `$eq: null` matches both a missing field and an explicit null; `$ne` is its
/// exact complement. Use [`QueryMatcher`] when testing many records.
pub fn matches(record: &Document, query: &Document) -> Result<bool, QueryError> {
    QueryMatcher::new(query)?.matches(record)
}

/// A query prepared for repeated evaluation: every `$regex` in it is compiled
/// once, up front.
#[derive(Debug)]
pub struct QueryMatcher<'q> {
    query: &'q Document,
    /// pattern -> flags -> compiled
    regexes: HashMap<String, HashMap<String, Regex>>,
}

impl<'q> QueryMatcher<'q> {
    pub fn new(query: &'q Document) -> Result<Self, QueryError> {
        let mut matcher = Self {
            query,
            regexes: HashMap::new(),
        };
        matcher.collect_top(query)?;
        Ok(matcher)
    }

    pub fn matches(&self, record: &Document) -> Result<bool, QueryError> {
        self.matches_doc(record, self.query)
    }

    fn collect_top(&mut self, query: &Document) -> Result<(), QueryError> {
        for (key, value) in query {
            match key.as_str() {
                "$and" | "$or" => {
                    for clause in clauses(value)? {
                        self.collect_top(clause)?;
                    }
                }
                k if k.starts_with('$') => {}
                _ => {
                    if let Bson::Document(ops) = value {
                        self.collect_ops(ops)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn collect_ops(&mut self, ops: &Document) -> Result<(), QueryError> {
        if let Some(Bson::String(pattern)) = ops.get("$regex") {
            let flags = match ops.get("$options") {
                Some(Bson::String(flags)) => flags.as_str(),
                _ => "",
            };
            let compiled = self.regexes.entry(pattern.clone()).or_default();
            if !compiled.contains_key(flags) {
                compiled.insert(flags.to_string(), build_regex(pattern, flags)?);
            }
        }
        if let Some(Bson::Document(inner)) = ops.get("$not") {
            self.collect_ops(inner)?;
        }
        Ok(())
    }

    fn matches_doc(&self, record: &Document, query: &Document) -> Result<bool, QueryError> {
        for (key, value) in query {
            let matched = match key.as_str() {
                "$and" => {
                    let mut all = true;
                    for clause in clauses(value)? {
                        if !self.matches_doc(record, clause)? {
                            all = false;
                            break;
                        }
                    }
                    all
                }
                "$or" => {
                    let mut any = false;
                    for clause in clauses(value)? {
                        if self.matches_doc(record, clause)? {
                            any = true;
                            break;
                        }
                    }
                    any
                }
                k if k.starts_with('$') => {
                    return Err(QueryError::Malformed(format!(
                        "unknown top-level operator: {k}"
                    )));
                }
                field => self.field_matches(record.get(field), value)?,
            };
            if !matched {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn field_matches(&self, actual: Option<&Bson>, condition: &Bson) -> Result<bool, QueryError> {
        match condition {
            Bson::Document(ops) if ops.keys().next().is_some_and(|k| k.starts_with('$')) => {
                self.operators_match(actual, ops)
            }
            expected => Ok(value_eq(actual, expected)),
        }
    }

    fn operators_match(&self, actual: Option<&Bson>, ops: &Document) -> Result<bool, QueryError> {
        for (op, operand) in ops {
            let matched = match op.as_str() {
                "$eq" => value_eq(actual, operand),
                "$ne" => !value_eq(actual, operand),
                "$gt" => value_cmp(actual, operand, |o| o == Ordering::Greater),
                "$gte" => value_cmp(actual, operand, |o| o != Ordering::Less),
                "$lt" => value_cmp(actual, operand, |o| o == Ordering::Less),
                "$lte" => value_cmp(actual, operand, |o| o != Ordering::Greater),
                "$exists" => match operand {
                    Bson::Boolean(expected) => actual.is_some() == *expected,
                    _ => {
                        return Err(QueryError::Malformed(
                            "$exists value must be a boolean".into(),
                        ));
                    }
                },
                "$not" => match operand {
                    Bson::Document(inner) => !self.operators_match(actual, inner)?,
                    _ => {
                        return Err(QueryError::Malformed("$not value must be a document".into()));
                    }
                },
                "$regex" => self.regex_match(actual, operand, ops.get("$options"))?,
                "$options" if ops.contains_key("$regex") => true,
                "$options" => return Err(QueryError::Malformed("$options without $regex".into())),
                other => {
                    return Err(QueryError::Malformed(format!(
                        "unknown field operator: {other}"
                    )));
                }
            };
            if !matched {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn regex_match(
        &self,
        actual: Option<&Bson>,
        pattern: &Bson,
        options: Option<&Bson>,
    ) -> Result<bool, QueryError> {
        let Bson::String(pattern) = pattern else {
            return Err(QueryError::Malformed("$regex value must be a string".into()));
        };
        let flags = match options {
            None => "",
            Some(Bson::String(flags)) => flags.as_str(),
            Some(_) => return Err(QueryError::Malformed("$options value must be a string".into())),
        };
        let built;
        let re = match self.regexes.get(pattern.as_str()).and_then(|f| f.get(flags)) {
            Some(re) => re,
            None => {
                built = build_regex(pattern, flags)?;
                &built
            }
        };
        Ok(match actual {
            Some(Bson::String(s)) => re.is_match(s),
            Some(Bson::Array(items)) => items
                .iter()
                .any(|item| std::matches!(item, Bson::String(s) if re.is_match(s))),
            _ => false,
        })
    }
}

fn build_regex(pattern: &str, flags: &str) -> Result<Regex, QueryError> {
    Ok(if flags.is_empty() {
        Regex::new(pattern)?
    } else {
        Regex::new(&format!("(?{flags}){pattern}"))?
    })
}

fn clauses(value: &Bson) -> Result<Vec<&Document>, QueryError> {
    let Bson::Array(items) = value else {
        return Err(QueryError::Malformed("$and/$or value must be an array".into()));
    };
    if items.is_empty() {
        return Err(QueryError::Malformed("$and/$or array must not be empty".into()));
    }
    items
        .iter()
        .map(|item| match item {
            Bson::Document(doc) => Ok(doc),
            _ => Err(QueryError::Malformed(
                "$and/$or array elements must be documents".into(),
            )),
        })
        .collect()
}

fn is_nullish(value: Option<&Bson>) -> bool {
    std::matches!(value, None | Some(Bson::Null) | Some(Bson::Undefined))
}

fn value_eq(actual: Option<&Bson>, expected: &Bson) -> bool {
    if std::matches!(expected, Bson::Null | Bson::Undefined) {
        return is_nullish(actual);
    }
    match actual {
        Some(Bson::Array(items)) => items
            .iter()
            .any(|item| compare_bson(item, expected) == Some(Ordering::Equal)),
        Some(value) => compare_bson(value, expected) == Some(Ordering::Equal),
        None => false,
    }
}

fn value_cmp(actual: Option<&Bson>, operand: &Bson, predicate: fn(Ordering) -> bool) -> bool {
    match actual {
        Some(Bson::Array(items)) => items
            .iter()
            .any(|item| compare_bson(item, operand).is_some_and(predicate)),
        Some(value) => compare_bson(value, operand).is_some_and(predicate),
        None => false,
    }
}

fn as_i64(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(v) => Some(i64::from(*v)),
        Bson::Int64(v) => Some(*v),
        _ => None,
    }
}

fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Double(v) => Some(*v),
        other => as_i64(other).map(|v| v as f64),
    }
}

/// Order two values of compatible types; `None` when they cannot be compared.
/// Numbers compare across widths, everything else only within its own type.
pub fn compare_bson(a: &Bson, b: &Bson) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (as_i64(a), as_i64(b)) {
        return Some(x.cmp(&y));
    }
    if let (Some(x), Some(y)) = (as_f64(a), as_f64(b)) {
        return x.partial_cmp(&y);
    }
    match (a, b) {
        (Bson::String(x), Bson::String(y)) => Some(x.cmp(y)),
        (Bson::DateTime(x), Bson::DateTime(y)) => {
            Some(x.timestamp_millis().cmp(&y.timestamp_millis()))
        }
        (Bson::ObjectId(x), Bson::ObjectId(y)) => Some(x.bytes().cmp(&y.bytes())),
        (Bson::Boolean(x), Bson::Boolean(y)) => Some(x.cmp(y)),
        (Bson::Null, Bson::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

/// Position of a value's type in the cross-type sort order.
fn type_rank(value: &Bson) -> u8 {
    match value {
        Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) => 1,
        Bson::String(_) => 2,
        Bson::ObjectId(_) => 3,
        Bson::Boolean(_) => 4,
        Bson::DateTime(_) => 5,
        _ => 6,
    }
}

/// Stable sort on one field. Missing and null values sort lowest; values of
/// different types order numbers < strings < object ids < booleans < dates.
pub fn sort_records(records: &mut [Document], sort: &Sort) {
    records.sort_by(|a, b| {
        let (x, y) = (a.get(&sort.field), b.get(&sort.field));
        let ordering = match (is_nullish(x), is_nullish(y)) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => x
                .zip(y)
                .map(|(x, y)| {
                    compare_bson(x, y).unwrap_or_else(|| type_rank(x).cmp(&type_rank(y)))
                })
                .unwrap_or(Ordering::Equal),
        };
        match sort.direction {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        }
    });
}
