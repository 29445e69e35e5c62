use std::collections::BTreeMap;

use bson::oid::ObjectId;
use bson::{Bson, Document};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use crudgrid_query::{Field, FieldType, Schema, is_record_id};

/// Format used to hand dates to edit forms; `convert_value` reads it back.
pub(crate) const FORM_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Convert one submitted form value into its stored representation.
/// An empty value is null unless the field is required.
pub fn convert_value(field: &Field, raw: &str) -> Result<Bson, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return if field.required {
            Err("is required".into())
        } else {
            Ok(Bson::Null)
        };
    }

    if let Some(choices) = &field.choices {
        if !choices.iter().any(|c| c.value == raw) {
            return Err(format!("'{raw}' is not one of the allowed values"));
        }
    }

    match field.field_type {
        FieldType::String => Ok(Bson::String(raw.to_string())),
        FieldType::Integer => raw
            .parse::<i64>()
            .map(Bson::Int64)
            .map_err(|_| "must be a whole number".to_string()),
        FieldType::Date => parse_form_date(raw)
            .map(|millis| Bson::DateTime(bson::DateTime::from_millis(millis)))
            .ok_or_else(|| "must be a date (YYYY-MM-DD)".to_string()),
        FieldType::Identifier => {
            if !is_record_id(raw) {
                return Err("must be a record id".into());
            }
            ObjectId::parse_str(raw)
                .map(Bson::ObjectId)
                .map_err(|_| "must be a record id".to_string())
        }
    }
}

fn parse_form_date(raw: &str) -> Option<i64> {
    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .map(|date| date.and_time(NaiveTime::MIN))
        })
        .map(|naive| naive.and_utc().timestamp_millis())
}

/// Stored value as plain text, dates rendered with `date_format`.
pub(crate) fn plain_string(value: &Bson, date_format: &str) -> String {
    match value {
        Bson::String(s) => s.clone(),
        Bson::Int32(v) => v.to_string(),
        Bson::Int64(v) => v.to_string(),
        Bson::Double(v) => v.to_string(),
        Bson::Boolean(v) => v.to_string(),
        Bson::ObjectId(id) => id.to_hex(),
        Bson::DateTime(at) => DateTime::from_timestamp_millis(at.timestamp_millis())
            .map(|at| at.format(date_format).to_string())
            .unwrap_or_else(|| at.timestamp_millis().to_string()),
        Bson::Null | Bson::Undefined => String::new(),
        other => other.to_string(),
    }
}

/// Editable string values for every schema field present in `record`.
pub(crate) fn form_values(schema: &Schema, record: &Document) -> BTreeMap<String, String> {
    schema
        .fields()
        .iter()
        .filter_map(|field| {
            record
                .get(&field.name)
                .map(|value| (field.name.clone(), plain_string(value, FORM_DATE_FORMAT)))
        })
        .collect()
}

/// Submitted values for schema fields, as given, for re-rendering a failed form.
pub(crate) fn submitted_values(
    schema: &Schema,
    body: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    schema
        .fields()
        .iter()
        .filter_map(|field| {
            body.get(&field.name)
                .map(|raw| (field.name.clone(), raw.clone()))
        })
        .collect()
}

/// Submitted values as a record of strings, so the presentation builder can
/// lay them out next to their errors.
pub(crate) fn submitted_record(values: &BTreeMap<String, String>) -> Document {
    values
        .iter()
        .map(|(name, raw)| (name.clone(), Bson::String(raw.clone())))
        .collect()
}
