use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};

use bson::oid::ObjectId;
use bson::{Bson, Document};
use crudgrid_query::{QueryMatcher, QueryOptions, sort_records};

use crate::error::StoreError;

/// Persistence seam for record collections. Queries arrive already lowered
/// to bson documents by the compiler.
pub trait Store: Send + Sync {
    fn find(
        &self,
        collection: &str,
        query: &Document,
        projection: Option<&[String]>,
        options: &QueryOptions,
    ) -> Result<Vec<Document>, StoreError>;

    fn count(&self, collection: &str, query: &Document) -> Result<u64, StoreError>;

    fn find_by_id(&self, collection: &str, id: &ObjectId) -> Result<Option<Document>, StoreError>;

    /// Insert or replace by `_id`, assigning a fresh id when the record has none.
    fn save(&self, collection: &str, record: Document) -> Result<Document, StoreError>;

    fn delete(&self, collection: &str, id: &ObjectId) -> Result<(), StoreError>;
}

type Collection = BTreeMap<ObjectId, Document>;

/// Process-local store. Writes are last-write-wins; there is no version check.
#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Collection>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn project(record: &Document, fields: &[String]) -> Document {
    record
        .iter()
        .filter(|(key, _)| key.as_str() == "_id" || fields.iter().any(|f| f == *key))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

impl Store for MemoryStore {
    fn find(
        &self,
        collection: &str,
        query: &Document,
        projection: Option<&[String]>,
        options: &QueryOptions,
    ) -> Result<Vec<Document>, StoreError> {
        let collections = self.collections.read().unwrap_or_else(PoisonError::into_inner);
        let mut hits = Vec::new();
        if let Some(records) = collections.get(collection) {
            let matcher = QueryMatcher::new(query)?;
            for record in records.values() {
                if matcher.matches(record)? {
                    hits.push(record.clone());
                }
            }
        }
        drop(collections);

        sort_records(&mut hits, &options.sort);
        Ok(hits
            .into_iter()
            .skip(options.skip)
            .take(options.limit)
            .map(|record| match projection {
                Some(fields) => project(&record, fields),
                None => record,
            })
            .collect())
    }

    fn count(&self, collection: &str, query: &Document) -> Result<u64, StoreError> {
        let collections = self.collections.read().unwrap_or_else(PoisonError::into_inner);
        let mut total = 0;
        if let Some(records) = collections.get(collection) {
            let matcher = QueryMatcher::new(query)?;
            for record in records.values() {
                if matcher.matches(record)? {
                    total += 1;
                }
            }
        }
        Ok(total)
    }

    fn find_by_id(&self, collection: &str, id: &ObjectId) -> Result<Option<Document>, StoreError> {
        let collections = self.collections.read().unwrap_or_else(PoisonError::into_inner);
        Ok(collections
            .get(collection)
            .and_then(|records| records.get(id))
            .cloned())
    }

    fn save(&self, collection: &str, mut record: Document) -> Result<Document, StoreError> {
        let id = match record.get("_id") {
            Some(Bson::ObjectId(id)) => *id,
            None | Some(Bson::Null) => {
                let id = ObjectId::new();
                record.insert("_id", id);
                id
            }
            Some(_) => return Err(StoreError::MissingId),
        };
        let mut collections = self.collections.write().unwrap_or_else(PoisonError::into_inner);
        collections
            .entry(collection.to_string())
            .or_default()
            .insert(id, record.clone());
        Ok(record)
    }

    fn delete(&self, collection: &str, id: &ObjectId) -> Result<(), StoreError> {
        let mut collections = self.collections.write().unwrap_or_else(PoisonError::into_inner);
        collections
            .get_mut(collection)
            .and_then(|records| records.remove(id))
            .map(|_| ())
            .ok_or(StoreError::NotFound(*id))
    }
}
