use std::collections::BTreeMap;

use crudgrid_query::FilterError;
use serde::Serialize;

/// Per-request aggregate of user-facing messages. Errors accumulate here
/// instead of aborting, so one response can report every failing field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CrudResult {
    pub errors: Vec<String>,
    pub field_errors: BTreeMap<String, String>,
    pub notices: Vec<String>,
}

impl CrudResult {
    pub fn push_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    /// The first error reported for a field wins.
    pub fn push_field_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.field_errors
            .entry(field.into())
            .or_insert_with(|| message.into());
    }

    pub fn push_notice(&mut self, message: impl Into<String>) {
        self.notices.push(message.into());
    }

    pub fn extend_filter_errors(&mut self, errors: &[FilterError]) {
        for error in errors {
            self.push_field_error(error.field.clone(), error.message.clone());
        }
    }

    /// True when nothing has gone wrong; notices do not count.
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty() && self.field_errors.is_empty()
    }
}
