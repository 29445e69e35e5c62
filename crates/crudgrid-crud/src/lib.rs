mod collaborators;
mod context;
mod engine;
mod error;
mod form;
mod model;
pub mod presentation;
mod render;
mod result;
mod store;

pub use collaborators::{
    Action, Actor, Authorizer, CSRF_FIELD, Capability, CsrfGuard, FlashStore, Halt, MemoryFlash,
    SessionCsrf,
};
pub use context::{CrudContext, CrudRequest, Outcome, Payload, View};
pub use engine::{CLONE_ID, CrudEngine, ID_FIELD, ROUTE_ID};
pub use error::{CrudError, StoreError};
pub use form::convert_value;
pub use model::{ListHelperData, ModelClass, SaveOp};
pub use presentation::DisplayValue;
pub use render::{JsonRenderer, Renderer};
pub use result::CrudResult;
pub use store::{MemoryStore, Store};
