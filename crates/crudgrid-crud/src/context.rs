use std::collections::BTreeMap;
use std::sync::Arc;

use bson::Document;
use crudgrid_query::Params;
use serde::Serialize;

use crate::collaborators::{Action, Actor, Halt};
use crate::error::CrudError;
use crate::model::ModelClass;
use crate::presentation::{Detail, Grid};
use crate::result::CrudResult;

/// Everything about the request target that stays fixed across operations.
#[derive(Clone)]
pub struct CrudContext {
    pub actor: Option<Actor>,
    pub model: Arc<dyn ModelClass>,
    /// URL prefix of this record type, without trailing slash.
    pub base_url: String,
    /// Type-specific view template, if any; renderers may ignore it.
    pub view_file_path: Option<String>,
}

/// The decoded parts of one request the engine reads.
#[derive(Debug, Clone, Default)]
pub struct CrudRequest {
    pub params: Params,
    pub body: Params,
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    Detail(Detail),
    Grid(Grid),
    Stats { data: Document },
    Empty,
}

/// Everything a renderer needs to produce one page.
#[derive(Debug, Clone, Serialize)]
pub struct View {
    pub operation: Action,
    pub headline: String,
    pub view_file_path: Option<String>,
    pub base_url: String,
    pub csrf_token: Option<String>,
    /// One-shot notices queued by an earlier request.
    pub notices: Vec<String>,
    pub result: CrudResult,
    pub payload: Payload,
    /// Form input values, keyed by field name.
    pub form: BTreeMap<String, String>,
    /// Model-specific helper data.
    pub extra: Document,
}

#[derive(Debug)]
pub enum Outcome {
    Render(Box<View>),
    /// Successful mutation; send the subject elsewhere.
    Redirect(String),
    /// A collaborator already produced the response.
    Halted(Halt),
    Rejected(CrudError),
}
