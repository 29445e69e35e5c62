use std::sync::Arc;

use crudgrid_crud::MemoryStore;
use crudgrid_http::*;
use ::http::{Method, Request, Response, StatusCode, header};

const COOKIE: &str = "sid=test-session";

const GRANTS: &str = r#"
grants:
  - role: admin
    actions: [list, add, edit, view, delete, stats]
  - role: clerk
    collection: rooms
    actions: [list, view]
"#;

fn app() -> CrudHttp {
    let config = ServerConfig::from_yaml(GRANTS).unwrap();
    build_app(&config, Arc::new(MemoryStore::new()))
}

fn strict_app() -> CrudHttp {
    let config = ServerConfig::from_yaml(&format!("on_parse_error: reject\n{GRANTS}")).unwrap();
    build_app(&config, Arc::new(MemoryStore::new()))
}

fn request(method: Method, uri: &str, roles: &str, body: &str) -> Request<Vec<u8>> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("x-actor", "alice")
        .header("x-actor-roles", roles)
        .header(header::COOKIE, COOKIE)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(body.as_bytes().to_vec())
        .unwrap()
}

fn json(resp: &Response<Vec<u8>>) -> serde_json::Value {
    serde_json::from_slice(resp.body()).unwrap()
}

/// Fetch a form for the session and return its anti-forgery token.
fn csrf_token(app: &CrudHttp) -> String {
    let resp = app.handle(request(Method::GET, "/rooms/add", "admin", ""));
    assert_eq!(resp.status(), StatusCode::OK);
    json(&resp)["csrf_token"].as_str().unwrap().to_string()
}

fn add_room(app: &CrudHttp, body: &str) -> String {
    let token = csrf_token(app);
    let resp = app.handle(request(
        Method::POST,
        "/rooms/add",
        "admin",
        &format!("{body}&_csrf={token}"),
    ));
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    resp.headers()[header::LOCATION].to_str().unwrap().to_string()
}

// ── Routing ─────────────────────────────────────────────────────

#[test]
fn healthz() {
    let resp = app().handle(Request::get("/healthz").body(Vec::new()).unwrap());
    assert_eq!(resp.status(), StatusCode::OK);
}

#[test]
fn unknown_paths_are_not_found() {
    let app = app();
    let resp = app.handle(request(Method::GET, "/nowhere", "admin", ""));
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let resp = app.handle(request(Method::GET, "/rooms/frobnicate", "admin", ""));
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let resp = app.handle(request(Method::GET, "/roomsextra", "admin", ""));
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[test]
fn new_visitor_gets_a_session_cookie() {
    let resp = app().handle(
        Request::get("/rooms")
            .header("x-actor", "alice")
            .header("x-actor-roles", "admin")
            .body(Vec::new())
            .unwrap(),
    );
    assert_eq!(resp.status(), StatusCode::OK);
    let cookie = resp.headers()[header::SET_COOKIE].to_str().unwrap();
    assert!(cookie.starts_with("sid="));
}

// ── Workflow ────────────────────────────────────────────────────

#[test]
fn add_then_view_then_list() {
    let app = app();
    let location = add_room(&app, "shortcode=lab-1&label=Main+lab");
    assert!(location.starts_with("/rooms/view/"));

    let resp = app.handle(request(Method::GET, &location, "admin", ""));
    assert_eq!(resp.status(), StatusCode::OK);
    let view = json(&resp);
    assert_eq!(view["notices"][0], "Added new Room.");
    assert_eq!(view["payload"]["type"], "detail");

    let resp = app.handle(request(Method::GET, "/rooms?filter_label=main", "admin", ""));
    let list = json(&resp);
    assert_eq!(list["payload"]["rows"].as_array().unwrap().len(), 1);
    assert_eq!(list["payload"]["pager"]["result_count"], 1);
}

#[test]
fn bad_filter_is_reported_on_a_served_list() {
    let app = app();
    add_room(&app, "shortcode=lab-1&label=Main+lab");

    let resp = app.handle(request(
        Method::GET,
        "/rooms?filter_label=%2F%5B%2F&filter_shortcode=lab",
        "admin",
        "",
    ));
    assert_eq!(resp.status(), StatusCode::OK);
    let list = json(&resp);
    assert!(list["result"]["field_errors"]["label"].is_string());
    assert_eq!(list["payload"]["rows"].as_array().unwrap().len(), 1);
    assert!(list["csrf_token"].is_null());
}

#[test]
fn strict_policy_rejects_bad_filter() {
    let resp = strict_app().handle(request(
        Method::GET,
        "/rooms?filter_label=%2F%5B%2F",
        "admin",
        "",
    ));
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert!(json(&resp)["error"].is_string());
}

#[test]
fn invalid_submission_is_unprocessable() {
    let app = app();
    let token = csrf_token(&app);
    let resp = app.handle(request(
        Method::POST,
        "/rooms/add",
        "admin",
        &format!("shortcode=bad%20code&_csrf={token}"),
    ));
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let view = json(&resp);
    assert!(view["result"]["field_errors"]["shortcode"].is_string());
    assert_eq!(view["form"]["shortcode"], "bad code");
}

#[test]
fn post_without_token_is_forbidden() {
    let resp = app().handle(request(Method::POST, "/rooms/add", "admin", "shortcode=x"));
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}

#[test]
fn edit_post_and_delete_post() {
    let app = app();
    let location = add_room(&app, "shortcode=lab-2");
    let id = location.rsplit('/').next().unwrap().to_string();

    let token = csrf_token(&app);
    let resp = app.handle(request(
        Method::POST,
        "/rooms/edit",
        "admin",
        &format!("_id={id}&description=Second+floor&_csrf={token}"),
    ));
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);

    let resp = app.handle(request(Method::GET, &format!("/rooms/edit/{id}"), "admin", ""));
    assert_eq!(json(&resp)["form"]["description"], "Second floor");

    let resp = app.handle(request(
        Method::POST,
        "/rooms/delete",
        "admin",
        &format!("_id={id}&_csrf={token}"),
    ));
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    assert_eq!(resp.headers()[header::LOCATION], "/rooms");

    let resp = app.handle(request(Method::GET, &format!("/rooms/view/{id}"), "admin", ""));
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

// ── Authorization ───────────────────────────────────────────────

#[test]
fn grants_limit_roles() {
    let app = app();
    let resp = app.handle(request(Method::GET, "/rooms", "clerk", ""));
    assert_eq!(resp.status(), StatusCode::OK);
    let resp = app.handle(request(Method::GET, "/rooms/stats", "clerk", ""));
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    let resp = app.handle(request(Method::GET, "/apps", "clerk", ""));
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}

#[test]
fn anonymous_is_unauthorized() {
    let resp = app().handle(Request::get("/rooms").body(Vec::new()).unwrap());
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[test]
fn malformed_id_is_not_found() {
    let resp = app().handle(request(Method::GET, "/rooms/view/not-an-id", "admin", ""));
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[test]
fn stats_count_unlabelled_rooms() {
    let app = app();
    add_room(&app, "shortcode=a");
    add_room(&app, "shortcode=b&label=Bee");
    let resp = app.handle(request(Method::GET, "/rooms/stats", "admin", ""));
    let stats = json(&resp);
    assert_eq!(stats["payload"]["data"]["total"], 2);
    assert_eq!(stats["payload"]["data"]["unlabelled"], 1);
}
