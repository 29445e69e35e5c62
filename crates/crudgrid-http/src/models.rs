//! Demo record types served by `crudgrid-server`.

use bson::{Bson, Document, doc};
use crudgrid_crud::{CrudError, CrudResult, DisplayValue, ModelClass, SaveOp, Store};
use crudgrid_query::{
    Choice, Field, FieldType, FilterOptions, ParseErrorPolicy, Schema, SortDirection, Subtype,
};

pub struct Room {
    schema: Schema,
    on_parse_error: ParseErrorPolicy,
}

impl Room {
    pub fn new(on_parse_error: ParseErrorPolicy) -> Self {
        Self {
            schema: Schema::new(vec![
                Field::new("shortcode", FieldType::String)
                    .label("Short code")
                    .required(),
                Field::new("label", FieldType::String).label("Label"),
                Field::new("description", FieldType::String)
                    .label("Description")
                    .hidden_on(&[Subtype::List]),
                Field::new("kind", FieldType::String).label("Kind").choices(vec![
                    Choice::new("public", "Public"),
                    Choice::new("private", "Private"),
                ]),
                Field::new("capacity", FieldType::Integer).label("Capacity"),
                Field::new("appid", FieldType::Identifier)
                    .label("App")
                    .reference("/apps")
                    .hidden_on(&[Subtype::Add]),
                Field::new("created", FieldType::Date)
                    .label("Created")
                    .format("%Y-%m-%d")
                    .hidden_on(&[Subtype::Add, Subtype::Edit]),
            ]),
            on_parse_error,
        }
    }
}

impl ModelClass for Room {
    fn collection_name(&self) -> &str {
        "rooms"
    }

    fn nice_name(&self) -> &str {
        "Room"
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn save_fields(&self, op: SaveOp) -> &'static [&'static str] {
        match op {
            SaveOp::CrudAdd => &["shortcode", "label"],
            SaveOp::CrudEdit => &["shortcode", "label", "description"],
        }
    }

    fn new_record(&self) -> Document {
        doc! { "kind": "public", "created": bson::DateTime::now() }
    }

    fn filter_options(&self) -> FilterOptions {
        FilterOptions {
            default_page_size: 20,
            default_sort_field: "shortcode".into(),
            default_sort_dir: SortDirection::Asc,
            on_parse_error: self.on_parse_error,
            table_id: "rooms".into(),
            ..FilterOptions::default()
        }
    }

    fn validate_value(&self, field: &Field, value: &Bson) -> Result<(), String> {
        match (field.name.as_str(), value) {
            ("shortcode", Bson::String(code))
                if !code.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') =>
            {
                Err("may only contain letters, digits and dashes".into())
            }
            _ => Ok(()),
        }
    }

    fn validate_record(&self, record: &Document, result: &mut CrudResult) {
        if record.get_str("label").is_ok_and(|label| label.len() > 80) {
            result.push_field_error("label", "must be at most 80 characters");
        }
    }

    fn stats_helper_data(&self, store: &dyn Store) -> Result<Document, CrudError> {
        let total = store.count(self.collection_name(), &Document::new())?;
        let unlabelled = store.count(self.collection_name(), &doc! { "label": Bson::Null })?;
        Ok(doc! {
            "total": i64::try_from(total).unwrap_or(i64::MAX),
            "unlabelled": i64::try_from(unlabelled).unwrap_or(i64::MAX),
        })
    }
}

pub struct App {
    schema: Schema,
    on_parse_error: ParseErrorPolicy,
}

impl App {
    pub fn new(on_parse_error: ParseErrorPolicy) -> Self {
        Self {
            schema: Schema::new(vec![
                Field::new("shortcode", FieldType::String)
                    .label("Short code")
                    .required(),
                Field::new("name", FieldType::String).label("Name").required(),
                Field::new("ownerid", FieldType::Identifier)
                    .label("Owner")
                    .hidden_on(&[Subtype::Add, Subtype::Edit]),
            ]),
            on_parse_error,
        }
    }
}

impl ModelClass for App {
    fn collection_name(&self) -> &str {
        "apps"
    }

    fn nice_name(&self) -> &str {
        "App"
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn save_fields(&self, _op: SaveOp) -> &'static [&'static str] {
        &["shortcode", "name"]
    }

    fn filter_options(&self) -> FilterOptions {
        FilterOptions {
            protected_fields: ["ownerid".to_string()].into(),
            on_parse_error: self.on_parse_error,
            table_id: "apps".into(),
            ..FilterOptions::default()
        }
    }

    fn custom_value(&self, field: &Field, subtype: Subtype, record: &Document) -> Option<DisplayValue> {
        // Lists show the app as "CODE: name" in the name column.
        if field.name != "name" || subtype != Subtype::List {
            return None;
        }
        let code = record.get_str("shortcode").ok()?;
        let name = record.get_str("name").ok()?;
        Some(DisplayValue::text(format!("{}: {name}", code.to_uppercase())))
    }
}
