//! Format-agnostic display payloads for records that have no type-specific
//! view: labelled rows for a single record, a grid with pager for a list.

use std::collections::BTreeMap;

use bson::{Bson, Document};
use crudgrid_query::{Field, QueryState, SortDirection, Subtype};
use serde::Serialize;

use crate::form::plain_string;
use crate::model::ModelClass;
use crate::result::CrudResult;

const DISPLAY_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DisplayValue {
    Text { text: String },
    Link { href: String, text: String },
    /// Null or absent; distinct from an empty string.
    Missing,
}

impl DisplayValue {
    pub fn text(text: impl Into<String>) -> Self {
        DisplayValue::Text { text: text.into() }
    }
}

/// Resolve what to show for one field of one record.
pub fn display_value(
    model: &dyn ModelClass,
    field: &Field,
    subtype: Subtype,
    record: &Document,
) -> DisplayValue {
    if let Some(custom) = model.custom_value(field, subtype, record) {
        return custom;
    }

    let value = match record.get(&field.name) {
        None | Some(Bson::Null) | Some(Bson::Undefined) => return DisplayValue::Missing,
        Some(value) => value,
    };
    let format = field.format.as_deref().unwrap_or(DISPLAY_DATE_FORMAT);
    let plain = plain_string(value, format);

    if let Some(choices) = &field.choices {
        return match choices.iter().find(|c| c.value == plain) {
            Some(choice) => DisplayValue::text(choice.label.clone()),
            None => DisplayValue::text(format!("UNKNOWN VALUE (#{plain})")),
        };
    }

    if let Some(base_url) = &field.reference {
        return DisplayValue::Link {
            href: format!("{base_url}/view/{plain}"),
            text: plain,
        };
    }

    DisplayValue::Text { text: plain }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Row {
    pub name: String,
    pub label: String,
    pub value: DisplayValue,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Detail {
    pub subtype: Subtype,
    pub rows: Vec<Row>,
}

pub fn build_detail(
    model: &dyn ModelClass,
    subtype: Subtype,
    record: &Document,
    result: &CrudResult,
) -> Detail {
    let rows = model
        .schema()
        .fields()
        .iter()
        .filter(|field| !field.is_hidden_on(subtype))
        .map(|field| Row {
            name: field.name.clone(),
            label: field.label.clone(),
            value: display_value(model, field, subtype, record),
            error: result.field_errors.get(&field.name).cloned(),
        })
        .collect();
    Detail { subtype, rows }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Column {
    Checkbox,
    Field {
        name: String,
        label: String,
        sort_url: String,
        sorted: Option<SortDirection>,
    },
    Actions,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionLink {
    pub label: String,
    pub href: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Cell {
    Checkbox { id: String },
    Value { value: DisplayValue },
    Actions { links: Vec<ActionLink> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GridRow {
    pub id: String,
    pub cells: Vec<Cell>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Pager {
    pub page_num: usize,
    pub page_size: usize,
    pub page_count: Option<usize>,
    pub result_count: Option<u64>,
    pub prev_url: Option<String>,
    pub next_url: Option<String>,
}

impl Pager {
    fn from_state(state: &QueryState) -> Self {
        let prev_url = (state.page_num > 1).then(|| state.page_url(state.page_num - 1));
        let next_url = state
            .page_count()
            .filter(|count| state.page_num < *count)
            .map(|_| state.page_url(state.page_num + 1));
        Pager {
            page_num: state.page_num,
            page_size: state.page_size,
            page_count: state.page_count(),
            result_count: state.result_count,
            prev_url,
            next_url,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Grid {
    pub table_id: String,
    pub columns: Vec<Column>,
    pub rows: Vec<GridRow>,
    pub pager: Pager,
    /// Raw filter text per field, echoed back into the filter inputs.
    pub filters: BTreeMap<String, String>,
    pub filter_errors: BTreeMap<String, String>,
}

pub fn build_grid(
    model: &dyn ModelClass,
    base_url: &str,
    records: &[Document],
    state: &QueryState,
    filter_errors: &BTreeMap<String, String>,
) -> Grid {
    let fields: Vec<&Field> = state
        .field_keys
        .iter()
        .filter_map(|key| model.schema().field(key))
        .collect();

    let mut columns = Vec::with_capacity(fields.len() + 2);
    columns.push(Column::Checkbox);
    columns.extend(fields.iter().map(|field| Column::Field {
        name: field.name.clone(),
        label: field.label.clone(),
        sort_url: state.sort_url(&field.name),
        sorted: (state.sort_field == field.name).then_some(state.sort_dir),
    }));
    columns.push(Column::Actions);

    let rows = records
        .iter()
        .map(|record| {
            let id = record.get("_id").map(|id| plain_string(id, "")).unwrap_or_default();
            let mut cells = Vec::with_capacity(fields.len() + 2);
            cells.push(Cell::Checkbox { id: id.clone() });
            cells.extend(fields.iter().map(|field| Cell::Value {
                value: display_value(model, field, Subtype::List, record),
            }));
            cells.push(Cell::Actions {
                links: ["view", "edit", "delete"]
                    .iter()
                    .map(|action| ActionLink {
                        label: action.to_string(),
                        href: format!("{base_url}/{action}/{id}"),
                    })
                    .collect(),
            });
            GridRow { id, cells }
        })
        .collect();

    Grid {
        table_id: state.table_id.clone(),
        columns,
        rows,
        pager: Pager::from_state(state),
        filters: state.field_filters.clone(),
        filter_errors: filter_errors.clone(),
    }
}
