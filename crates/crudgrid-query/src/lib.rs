mod compile;
mod error;
mod matcher;
mod parse;
mod predicate;
mod schema;
mod sort;

pub use compile::{
    CompiledQuery, FILTER_PREFIX, FilterOptions, PAGE_NUM, PAGE_SIZE, Params, ParseErrorPolicy,
    QueryOptions, QueryState, SORT_DIR, SORT_FIELD, compile_list_query, compile_list_query_at,
    parse_params,
};
pub use error::{FilterError, QueryError};
pub use matcher::{QueryMatcher, compare_bson, matches, sort_records};
pub use parse::{ParsedFilter, is_record_id, parse_field_filter};
pub use predicate::{Comparator, Condition, Predicate, Test};
pub use schema::{Choice, Field, FieldType, Schema, Subtype};
pub use sort::{Sort, SortDirection};
