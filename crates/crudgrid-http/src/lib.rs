mod config;
mod grants;
pub mod http;
pub mod models;

pub use config::{CONFIG_ENV, ConfigError, Grant, ServerConfig};
pub use grants::GrantTable;
pub use http::{CrudHttp, Resource};

use std::sync::Arc;

use crudgrid_crud::{CrudEngine, MemoryFlash, SessionCsrf, Store};

/// Wire the demo resources against `store` with in-memory sessions.
pub fn build_app(config: &ServerConfig, store: Arc<dyn Store>) -> CrudHttp {
    let engine = CrudEngine::new(
        store,
        Arc::new(GrantTable::new(config.grants.clone())),
        Arc::new(SessionCsrf::new()),
        Arc::new(MemoryFlash::new()),
    );
    CrudHttp::new(
        engine,
        vec![
            Resource::new("/rooms", Arc::new(models::Room::new(config.on_parse_error))),
            Resource::new("/apps", Arc::new(models::App::new(config.on_parse_error))),
        ],
    )
}
