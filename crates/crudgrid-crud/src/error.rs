use bson::oid::ObjectId;
use crudgrid_query::QueryError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(ObjectId),
    #[error("record has no object id")]
    MissingId,
    #[error("query error: {0}")]
    Query(#[from] QueryError),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum CrudError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("anti-forgery check failed: {0}")]
    Forgery(String),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("{0}")]
    Query(#[from] QueryError),
}

impl CrudError {
    pub fn status_code(&self) -> http::StatusCode {
        match self {
            CrudError::NotFound(_) => http::StatusCode::NOT_FOUND,
            CrudError::Forgery(_) => http::StatusCode::FORBIDDEN,
            CrudError::Query(QueryError::Filter(_)) => http::StatusCode::BAD_REQUEST,
            CrudError::Store(_) | CrudError::Query(_) => http::StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
