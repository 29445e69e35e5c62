#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use bson::oid::ObjectId;
use bson::{Document, doc};
use crudgrid_crud::*;
use crudgrid_query::{Field, FieldType, FilterOptions, ParseErrorPolicy, QueryOptions, Schema};
use http::StatusCode;

pub const SESSION: &str = "session-1";
pub const DEFAULT_APP: &str = "000000000000000000000001";

// ── Model ───────────────────────────────────────────────────────

pub struct Room {
    schema: Schema,
    on_parse_error: ParseErrorPolicy,
}

impl Room {
    pub fn new() -> Self {
        Self::with_policy(ParseErrorPolicy::BestEffort)
    }

    pub fn with_policy(on_parse_error: ParseErrorPolicy) -> Self {
        Self {
            on_parse_error,
            schema: Schema::new(vec![
                Field::new("shortcode", FieldType::String).label("Short code").required(),
                Field::new("label", FieldType::String).label("Label"),
                Field::new("description", FieldType::String).label("Description"),
                Field::new("capacity", FieldType::Integer).label("Capacity"),
                Field::new("appid", FieldType::Identifier).label("App").reference("/apps"),
            ]),
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

    fn filter_options(&self) -> FilterOptions {
        FilterOptions {
            on_parse_error: self.on_parse_error,
            ..FilterOptions::default()
        }
    }

    fn new_record(&self) -> Document {
        let app = ObjectId::parse_str(DEFAULT_APP).unwrap();
        doc! { "appid": app }
    }
}

// ── Collaborators ───────────────────────────────────────────────

/// Allows everything except `denied`, remembering every check it saw.
#[derive(Default)]
pub struct RecordingAuthorizer {
    pub denied: Vec<Action>,
    pub checks: Mutex<Vec<(Action, Option<ObjectId>)>>,
}

impl RecordingAuthorizer {
    pub fn denying(denied: &[Action]) -> Self {
        Self {
            denied: denied.to_vec(),
            checks: Mutex::default(),
        }
    }

    pub fn checks(&self) -> Vec<(Action, Option<ObjectId>)> {
        self.checks.lock().unwrap().clone()
    }
}

impl Authorizer for RecordingAuthorizer {
    fn check(&self, capability: &Capability<'_>) -> Result<(), Halt> {
        self.checks
            .lock()
            .unwrap()
            .push((capability.action, capability.record_id.copied()));
        if self.denied.contains(&capability.action) {
            return Err(Halt::json(StatusCode::FORBIDDEN, "forbidden"));
        }
        Ok(())
    }
}

/// Memory store whose deletes always fail.
#[derive(Default)]
pub struct BrokenDeleteStore {
    inner: MemoryStore,
}

impl Store for BrokenDeleteStore {
    fn find(
        &self,
        collection: &str,
        query: &Document,
        projection: Option<&[String]>,
        options: &QueryOptions,
    ) -> Result<Vec<Document>, StoreError> {
        self.inner.find(collection, query, projection, options)
    }

    fn count(&self, collection: &str, query: &Document) -> Result<u64, StoreError> {
        self.inner.count(collection, query)
    }

    fn find_by_id(&self, collection: &str, id: &ObjectId) -> Result<Option<Document>, StoreError> {
        self.inner.find_by_id(collection, id)
    }

    fn save(&self, collection: &str, record: Document) -> Result<Document, StoreError> {
        self.inner.save(collection, record)
    }

    fn delete(&self, _collection: &str, _id: &ObjectId) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("disk offline".into()))
    }
}

// ── Harness ─────────────────────────────────────────────────────

pub struct Harness {
    pub engine: CrudEngine,
    pub auth: Arc<RecordingAuthorizer>,
    pub csrf: Arc<SessionCsrf>,
    pub ctx: CrudContext,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(Arc::new(MemoryStore::new()), RecordingAuthorizer::default())
    }

    pub fn with(store: Arc<dyn Store>, auth: RecordingAuthorizer) -> Self {
        let auth = Arc::new(auth);
        let csrf = Arc::new(SessionCsrf::new());
        let engine = CrudEngine::new(
            store,
            auth.clone(),
            csrf.clone(),
            Arc::new(MemoryFlash::new()),
        );
        let ctx = CrudContext {
            actor: Some(Actor {
                id: "alice".into(),
                roles: vec!["admin".into()],
            }),
            model: Arc::new(Room::new()),
            base_url: "/rooms".into(),
            view_file_path: None,
        };
        Self {
            engine,
            auth,
            csrf,
            ctx,
        }
    }

    pub fn seed(&self, record: Document) -> ObjectId {
        let saved = self.engine.store().save("rooms", record).unwrap();
        saved.get_object_id("_id").unwrap()
    }

    pub fn load(&self, id: &ObjectId) -> Option<Document> {
        self.engine.store().find_by_id("rooms", id).unwrap()
    }

    pub fn count(&self) -> u64 {
        self.engine.store().count("rooms", &Document::new()).unwrap()
    }

    pub fn get(&self, params: &[(&str, &str)]) -> CrudRequest {
        CrudRequest {
            params: pairs(params),
            body: Default::default(),
            session_id: Some(SESSION.into()),
        }
    }

    /// A POST carrying this session's valid anti-forgery token.
    pub fn post(&self, body: &[(&str, &str)]) -> CrudRequest {
        let token = self.csrf.issue(Some(SESSION)).unwrap();
        let mut body = pairs(body);
        body.insert(CSRF_FIELD.into(), token);
        CrudRequest {
            params: Default::default(),
            body,
            session_id: Some(SESSION.into()),
        }
    }
}

pub fn pairs(pairs: &[(&str, &str)]) -> crudgrid_query::Params {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub fn expect_view(outcome: Outcome) -> View {
    match outcome {
        Outcome::Render(view) => *view,
        other => panic!("expected a rendered view, got {other:?}"),
    }
}

pub fn expect_redirect(outcome: Outcome) -> String {
    match outcome {
        Outcome::Redirect(location) => location,
        other => panic!("expected a redirect, got {other:?}"),
    }
}
