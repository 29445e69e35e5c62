use bson::oid::ObjectId;
use bson::{Bson, Document, doc};
use crudgrid_query::{
    Field, FilterError, FilterOptions, Params, QueryState, Schema, Subtype, compile_list_query,
};

use crate::error::CrudError;
use crate::form::convert_value;
use crate::presentation::DisplayValue;
use crate::result::CrudResult;
use crate::store::Store;

/// Which save-fields allow-list applies to a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SaveOp {
    CrudAdd,
    CrudEdit,
}

/// One page of a list view, ready for the grid builder.
#[derive(Debug, Clone)]
pub struct ListHelperData {
    pub records: Vec<Document>,
    pub state: QueryState,
    pub errors: Vec<FilterError>,
}

/// A record type the CRUD engine can drive. Implementors declare the schema
/// and the per-operation save-fields; persistence and validation default to
/// the generic behaviour below.
pub trait ModelClass: Send + Sync {
    fn collection_name(&self) -> &str;

    /// Human-readable singular name, used in headlines and notices.
    fn nice_name(&self) -> &str;

    fn schema(&self) -> &Schema;

    /// The only fields a submission of this kind may ever write. Anything else
    /// in the body is ignored.
    fn save_fields(&self, op: SaveOp) -> &'static [&'static str];

    /// Fresh unsaved record, with any constructor defaults.
    fn new_record(&self) -> Document {
        Document::new()
    }

    fn filter_options(&self) -> FilterOptions {
        FilterOptions::default()
    }

    /// Field-specific display override for a subtype.
    fn custom_value(
        &self,
        _field: &Field,
        _subtype: Subtype,
        _record: &Document,
    ) -> Option<DisplayValue> {
        None
    }

    /// Extra check on one converted value.
    fn validate_value(&self, _field: &Field, _value: &Bson) -> Result<(), String> {
        Ok(())
    }

    /// Cross-field checks, run once every field converted cleanly.
    fn validate_record(&self, _record: &Document, _result: &mut CrudResult) {}

    /// Apply the allow-listed fields of `body` to `record`, validate, and
    /// persist. Returns the saved record, or `None` with `result` explaining
    /// why nothing was written.
    fn validate_and_save(
        &self,
        store: &dyn Store,
        op: SaveOp,
        mut record: Document,
        body: &Params,
        result: &mut CrudResult,
    ) -> Option<Document> {
        let schema = self.schema();
        for name in self.save_fields(op) {
            let Some(field) = schema.field(name) else {
                panic!(
                    "save field '{name}' is not declared in the {} schema",
                    self.collection_name()
                );
            };
            let Some(raw) = body.get(*name) else {
                if op == SaveOp::CrudAdd && field.required {
                    result.push_field_error(*name, "is required");
                }
                continue;
            };
            match convert_value(field, raw)
                .and_then(|value| self.validate_value(field, &value).map(|()| value))
            {
                Ok(value) => {
                    record.insert(*name, value);
                }
                Err(message) => result.push_field_error(*name, message),
            }
        }

        if result.is_ok() {
            self.validate_record(&record, result);
        }
        if !result.is_ok() {
            return None;
        }

        match store.save(self.collection_name(), record) {
            Ok(saved) => Some(saved),
            Err(e) => {
                tracing::error!(collection = self.collection_name(), error = %e, "save failed");
                result.push_error(format!("Could not save {}.", self.nice_name()));
                None
            }
        }
    }

    fn find_one_by_id(
        &self,
        store: &dyn Store,
        id: &ObjectId,
    ) -> Result<Option<Document>, CrudError> {
        Ok(store.find_by_id(self.collection_name(), id)?)
    }

    /// Compile the request, count the matches and fetch one projected page.
    fn list_helper_data(
        &self,
        store: &dyn Store,
        params: &Params,
        base_url: &str,
    ) -> Result<ListHelperData, CrudError> {
        let mut options = self.filter_options();
        options.base_url = base_url.to_string();
        let compiled = compile_list_query(&options, self.schema(), params)?;

        let mut state = compiled.state;
        state.result_count = Some(store.count(self.collection_name(), &compiled.query)?);

        let records = store.find(
            self.collection_name(),
            &compiled.query,
            Some(state.field_keys.as_slice()),
            &compiled.options,
        )?;

        Ok(ListHelperData {
            records,
            state,
            errors: compiled.errors,
        })
    }

    fn edit_helper_data(&self, _store: &dyn Store, _record: &Document) -> Result<Document, CrudError> {
        Ok(Document::new())
    }

    fn view_helper_data(&self, _store: &dyn Store, _record: &Document) -> Result<Document, CrudError> {
        Ok(Document::new())
    }

    fn stats_helper_data(&self, store: &dyn Store) -> Result<Document, CrudError> {
        let total = store.count(self.collection_name(), &Document::new())?;
        Ok(doc! { "total": i64::try_from(total).unwrap_or(i64::MAX) })
    }
}
