use std::collections::{BTreeMap, BTreeSet};

use bson::{Bson, Document};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{FilterError, QueryError};
use crate::parse::parse_field_filter;
use crate::schema::{Schema, Subtype};
use crate::sort::{Sort, SortDirection};

pub const PAGE_NUM: &str = "pageNum";
pub const PAGE_SIZE: &str = "pageSize";
pub const SORT_FIELD: &str = "sortField";
pub const SORT_DIR: &str = "sortDir";
pub const FILTER_PREFIX: &str = "filter_";

/// Flat request parameters (query string or form body).
pub type Params = BTreeMap<String, String>;

/// What to do with a list request when some field filter fails to parse.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseErrorPolicy {
    /// Drop the failing terms, run the query with what parsed, report errors.
    #[default]
    BestEffort,
    /// Refuse to run the query at all.
    Reject,
}

/// Per-list paging, sorting and filtering limits supplied by the model class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterOptions {
    pub default_page_size: usize,
    pub min_page_size: usize,
    pub max_page_size: usize,
    pub default_sort_field: String,
    pub default_sort_dir: SortDirection,
    pub protected_fields: BTreeSet<String>,
    pub hidden_fields: BTreeSet<String>,
    pub on_parse_error: ParseErrorPolicy,
    pub table_id: String,
    pub base_url: String,
}

impl Default for FilterOptions {
    fn default() -> Self {
        Self {
            default_page_size: 10,
            min_page_size: 1,
            max_page_size: 100,
            default_sort_field: "_id".into(),
            default_sort_dir: SortDirection::Desc,
            protected_fields: BTreeSet::new(),
            hidden_fields: BTreeSet::new(),
            on_parse_error: ParseErrorPolicy::BestEffort,
            table_id: "crud".into(),
            base_url: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryOptions {
    pub limit: usize,
    pub skip: usize,
    pub sort: Sort,
}

/// Serializable snapshot of what the user is viewing. Feeding `to_params()`
/// back into the compiler reproduces the same query and options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryState {
    pub page_num: usize,
    pub page_size: usize,
    pub sort_field: String,
    pub sort_dir: SortDirection,
    pub field_filters: BTreeMap<String, String>,
    pub field_keys: Vec<String>,
    pub result_count: Option<u64>,
    pub base_url: String,
    pub table_id: String,
}

impl QueryState {
    pub fn to_params(&self) -> Params {
        let mut params = Params::new();
        params.insert(PAGE_NUM.into(), self.page_num.to_string());
        params.insert(PAGE_SIZE.into(), self.page_size.to_string());
        params.insert(SORT_FIELD.into(), self.sort_field.clone());
        params.insert(SORT_DIR.into(), self.sort_dir.as_str().into());
        for (field, raw) in &self.field_filters {
            params.insert(format!("{FILTER_PREFIX}{field}"), raw.clone());
        }
        params
    }

    pub fn to_query_string(&self) -> String {
        url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.to_params())
            .finish()
    }

    /// URL of the same view at another page.
    pub fn page_url(&self, page_num: usize) -> String {
        let page = QueryState {
            page_num,
            ..self.clone()
        };
        format!("{}?{}", self.base_url, page.to_query_string())
    }

    /// URL of the same view re-sorted on `field`, toggling direction when it
    /// is already the sort field.
    pub fn sort_url(&self, field: &str) -> String {
        let sort_dir = if self.sort_field == field {
            self.sort_dir.flip()
        } else {
            SortDirection::Asc
        };
        let sorted = QueryState {
            page_num: 1,
            sort_field: field.to_string(),
            sort_dir,
            ..self.clone()
        };
        format!("{}?{}", self.base_url, sorted.to_query_string())
    }

    /// Number of pages, once the result count is known.
    pub fn page_count(&self) -> Option<usize> {
        self.result_count.map(|count| {
            let count = usize::try_from(count).unwrap_or(usize::MAX);
            count.div_ceil(self.page_size.max(1)).max(1)
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub query: Document,
    pub options: QueryOptions,
    pub state: QueryState,
    pub errors: Vec<FilterError>,
}

/// Decode a query string or urlencoded form body into flat parameters.
/// Later duplicates win.
pub fn parse_params(encoded: &str) -> Params {
    url::form_urlencoded::parse(encoded.as_bytes())
        .into_owned()
        .collect()
}

pub fn compile_list_query(
    options: &FilterOptions,
    schema: &Schema,
    params: &Params,
) -> Result<CompiledQuery, QueryError> {
    compile_list_query_at(options, schema, params, Utc::now())
}

/// Compile request parameters into a query document, paging options and the
/// echoed view state, evaluating relative dates against `now`.
pub fn compile_list_query_at(
    options: &FilterOptions,
    schema: &Schema,
    params: &Params,
    now: DateTime<Utc>,
) -> Result<CompiledQuery, QueryError> {
    let min_page_size = options.min_page_size.max(1);
    let max_page_size = options.max_page_size.max(min_page_size);

    let page_num = params
        .get(PAGE_NUM)
        .and_then(|v| v.trim().parse::<usize>().ok())
        .filter(|n| *n >= 1)
        .unwrap_or(1);
    let page_size = params
        .get(PAGE_SIZE)
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(options.default_page_size)
        .clamp(min_page_size, max_page_size);
    let sort_field = params
        .get(SORT_FIELD)
        .filter(|f| schema.contains(f))
        .cloned()
        .unwrap_or_else(|| options.default_sort_field.clone());
    let sort_dir = params
        .get(SORT_DIR)
        .and_then(|d| SortDirection::parse(d))
        .unwrap_or(options.default_sort_dir);

    let mut errors = Vec::new();
    let mut field_filters = BTreeMap::new();
    for (key, raw) in params {
        let Some(field) = key.strip_prefix(FILTER_PREFIX) else {
            continue;
        };
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        if !schema.contains(field) {
            errors.push(FilterError::new(field, "unknown field"));
        } else if options.protected_fields.contains(field) {
            errors.push(FilterError::new(field, "field cannot be filtered"));
        } else {
            field_filters.insert(field.to_string(), raw.to_string());
        }
    }

    // Schema order keeps the compiled document stable across round trips.
    let mut clauses = Vec::new();
    for field in schema.fields() {
        let Some(raw) = field_filters.get(&field.name) else {
            continue;
        };
        let parsed = parse_field_filter(&field.name, field.field_type, raw, now);
        errors.extend(parsed.errors);
        if let Some(predicate) = parsed.predicate {
            clauses.push(predicate.to_document());
        }
    }

    if !errors.is_empty() && options.on_parse_error == ParseErrorPolicy::Reject {
        return Err(QueryError::Filter(errors));
    }

    let query = match clauses.len() {
        0 => Document::new(),
        1 => clauses.remove(0),
        _ => {
            let mut doc = Document::new();
            doc.insert(
                "$and",
                Bson::Array(clauses.into_iter().map(Bson::Document).collect()),
            );
            doc
        }
    };

    let field_keys = schema
        .fields()
        .iter()
        .filter(|f| !f.is_hidden_on(Subtype::List) && !options.hidden_fields.contains(&f.name))
        .map(|f| f.name.clone())
        .collect();

    tracing::debug!(
        table = %options.table_id,
        page_num,
        page_size,
        filters = field_filters.len(),
        errors = errors.len(),
        "compiled list query"
    );

    Ok(CompiledQuery {
        query,
        options: QueryOptions {
            limit: page_size,
            skip: (page_num - 1).saturating_mul(page_size),
            sort: Sort {
                field: sort_field.clone(),
                direction: sort_dir,
            },
        },
        state: QueryState {
            page_num,
            page_size,
            sort_field,
            sort_dir,
            field_filters,
            field_keys,
            result_count: None,
            base_url: options.base_url.clone(),
            table_id: options.table_id.clone(),
        },
        errors,
    })
}
