use http::{Response, StatusCode, header};

use crate::collaborators::Action;
use crate::context::{Outcome, View};
use crate::error::CrudError;

/// Turns engine outcomes into responses. The page format is entirely the
/// renderer's business.
pub trait Renderer: Send + Sync {
    fn render(&self, view: &View) -> Response<Vec<u8>>;

    fn redirect(&self, location: &str) -> Response<Vec<u8>> {
        Response::builder()
            .status(StatusCode::SEE_OTHER)
            .header(header::LOCATION, location)
            .body(Vec::new())
            .unwrap_or_else(|_| Response::new(Vec::new()))
    }

    fn reject(&self, error: &CrudError) -> Response<Vec<u8>> {
        let body = serde_json::json!({ "error": error.to_string() });
        json_response(error.status_code(), body.to_string().into_bytes())
    }
}

fn json_response(status: StatusCode, body: Vec<u8>) -> Response<Vec<u8>> {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(body)
        .unwrap_or_else(|_| Response::new(Vec::new()))
}

/// Serializes the whole view as JSON. A form that failed validation answers
/// 422; a list with unparseable filter terms still answers 200, since the
/// rest of the page was served.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonRenderer;

impl Renderer for JsonRenderer {
    fn render(&self, view: &View) -> Response<Vec<u8>> {
        let status = if view.result.is_ok() || view.operation == Action::List {
            StatusCode::OK
        } else {
            StatusCode::UNPROCESSABLE_ENTITY
        };
        match serde_json::to_vec(view) {
            Ok(body) => json_response(status, body),
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize view");
                json_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    br#"{"error":"failed to render view"}"#.to_vec(),
                )
            }
        }
    }
}

impl Outcome {
    pub fn into_response(self, renderer: &dyn Renderer) -> Response<Vec<u8>> {
        match self {
            Outcome::Render(view) => renderer.render(&view),
            Outcome::Redirect(location) => renderer.redirect(&location),
            Outcome::Halted(halt) => halt.into_response(),
            Outcome::Rejected(error) => renderer.reject(&error),
        }
    }
}
