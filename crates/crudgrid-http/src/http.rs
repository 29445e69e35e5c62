use std::sync::Arc;

use crudgrid_crud::{
    Actor, CrudContext, CrudEngine, CrudRequest, Halt, JsonRenderer, ModelClass, Outcome,
    ROUTE_ID, Renderer,
};
use crudgrid_query::parse_params;
use http::{HeaderValue, Method, Request, Response, StatusCode, header};

const SESSION_COOKIE: &str = "sid";

/// One model class mounted under a URL prefix.
pub struct Resource {
    pub base_url: String,
    pub model: Arc<dyn ModelClass>,
    pub view_file_path: Option<String>,
}

impl Resource {
    pub fn new(base_url: impl Into<String>, model: Arc<dyn ModelClass>) -> Self {
        Self {
            base_url: base_url.into(),
            model,
            view_file_path: None,
        }
    }
}

/// Maps HTTP requests onto engine operations for every mounted resource.
pub struct CrudHttp {
    engine: CrudEngine,
    resources: Vec<Resource>,
    renderer: Box<dyn Renderer>,
}

impl CrudHttp {
    pub fn new(engine: CrudEngine, resources: Vec<Resource>) -> Self {
        Self {
            engine,
            resources,
            renderer: Box::new(JsonRenderer),
        }
    }

    pub fn handle(&self, req: Request<Vec<u8>>) -> Response<Vec<u8>> {
        let path = req.uri().path().trim_end_matches('/').to_string();
        if req.method() == Method::GET && path == "/healthz" {
            return json_response(StatusCode::OK, r#"{"status":"ok"}"#);
        }

        let Some((resource, rest)) = self.resources.iter().find_map(|resource| {
            path.strip_prefix(resource.base_url.as_str())
                .filter(|rest| rest.is_empty() || rest.starts_with('/'))
                .map(|rest| (resource, rest))
        }) else {
            return error_response(StatusCode::NOT_FOUND, "not found");
        };

        let (mut crud_req, new_session) = match decode_request(&req) {
            Ok(decoded) => decoded,
            Err(message) => return error_response(StatusCode::BAD_REQUEST, message),
        };
        let ctx = CrudContext {
            actor: actor(&req),
            model: Arc::clone(&resource.model),
            base_url: resource.base_url.clone(),
            view_file_path: resource.view_file_path.clone(),
        };

        let segments: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();
        if let [_, id] = segments.as_slice() {
            crud_req.params.insert(ROUTE_ID.into(), (*id).to_string());
        }

        let outcome = match (req.method(), segments.as_slice()) {
            (&Method::GET, []) => self.engine.list(&ctx, &crud_req),
            (&Method::GET, ["add"]) => self.engine.add_get(&ctx, &crud_req),
            (&Method::POST, ["add"]) => self.engine.add_post(&ctx, &crud_req),
            (&Method::GET, ["edit", _]) => self.engine.edit_get(&ctx, &crud_req),
            (&Method::POST, ["edit"] | ["edit", _]) => self.engine.edit_post(&ctx, &crud_req),
            (&Method::GET, ["view", _]) => self.engine.view(&ctx, &crud_req),
            (&Method::GET, ["delete", _]) => self.engine.delete_get(&ctx, &crud_req),
            (&Method::POST, ["delete"] | ["delete", _]) => {
                self.engine.delete_post(&ctx, &crud_req)
            }
            (&Method::GET, ["stats"]) => self.engine.stats(&ctx, &crud_req),
            _ => Outcome::Halted(Halt::json(StatusCode::NOT_FOUND, "not found")),
        };

        let mut response = outcome.into_response(self.renderer.as_ref());
        if let Some(session_id) = new_session {
            let cookie = format!("{SESSION_COOKIE}={session_id}; Path=/; HttpOnly; SameSite=Lax");
            if let Ok(value) = HeaderValue::from_str(&cookie) {
                response.headers_mut().insert(header::SET_COOKIE, value);
            }
        }
        response
    }
}

/// Query string, urlencoded body and session. Returns the id of a freshly
/// minted session when the request carried none.
fn decode_request(req: &Request<Vec<u8>>) -> Result<(CrudRequest, Option<String>), &'static str> {
    let params = req.uri().query().map(parse_params).unwrap_or_default();
    let body = if req.body().is_empty() {
        Default::default()
    } else {
        let raw = std::str::from_utf8(req.body()).map_err(|_| "body is not valid utf-8")?;
        parse_params(raw)
    };

    let (session_id, new_session) = match session_cookie(req) {
        Some(session_id) => (session_id, None),
        None => {
            let session_id = format!("{:032x}", rand::random::<u128>());
            (session_id.clone(), Some(session_id))
        }
    };

    Ok((
        CrudRequest {
            params,
            body,
            session_id: Some(session_id),
        },
        new_session,
    ))
}

fn session_cookie<T>(req: &Request<T>) -> Option<String> {
    req.headers()
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == SESSION_COOKIE && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

/// The upstream auth layer names the subject in `x-actor` and its roles in
/// `x-actor-roles` (comma separated).
fn actor<T>(req: &Request<T>) -> Option<Actor> {
    let id = req
        .headers()
        .get("x-actor")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())?;
    let roles = req
        .headers()
        .get("x-actor-roles")
        .and_then(|v| v.to_str().ok())
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();
    Some(Actor {
        id: id.to_string(),
        roles,
    })
}

fn json_response(status: StatusCode, body: impl Into<Vec<u8>>) -> Response<Vec<u8>> {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(body.into())
        .unwrap_or_else(|_| Response::new(Vec::new()))
}

fn error_response(status: StatusCode, message: &str) -> Response<Vec<u8>> {
    let body = serde_json::json!({ "error": message });
    json_response(status, body.to_string().into_bytes())
}
