mod common;

use std::sync::Arc;

use bson::doc;
use bson::oid::ObjectId;
use common::*;
use crudgrid_crud::presentation::Cell;
use crudgrid_crud::*;
use crudgrid_query::{ParseErrorPolicy, QueryError};
use http::StatusCode;

fn grid(view: &View) -> &crudgrid_crud::presentation::Grid {
    match &view.payload {
        Payload::Grid(grid) => grid,
        other => panic!("expected a grid payload, got {other:?}"),
    }
}

// ── List ────────────────────────────────────────────────────────

#[test]
fn list_applies_range_filter() {
    let h = Harness::new();
    for capacity in [17_i64, 30, 70] {
        h.seed(doc! { "shortcode": format!("r{capacity}"), "capacity": capacity });
    }

    let view = expect_view(h.engine.list(&h.ctx, &h.get(&[("filter_capacity", ">18 and <65")])));
    let grid = grid(&view);
    assert_eq!(grid.rows.len(), 1);
    assert_eq!(grid.pager.result_count, Some(1));
    assert!(grid.rows[0].cells.contains(&Cell::Value {
        value: DisplayValue::text("30")
    }));
    assert_eq!(view.form["capacity"], ">18 and <65");
    assert!(view.result.is_ok());
}

#[test]
fn list_clamps_page_size() {
    let h = Harness::new();
    let view = expect_view(h.engine.list(&h.ctx, &h.get(&[("pageSize", "5000")])));
    assert_eq!(grid(&view).pager.page_size, 100);
}

#[test]
fn list_reports_bad_filter_and_keeps_the_rest() {
    let h = Harness::new();
    h.seed(doc! { "shortcode": "a1", "capacity": 10_i64 });
    h.seed(doc! { "shortcode": "b1", "capacity": 10_i64 });

    let view = expect_view(h.engine.list(
        &h.ctx,
        &h.get(&[("filter_label", "/[/"), ("filter_shortcode", "a")]),
    ));
    assert!(view.result.field_errors.contains_key("label"));
    assert_eq!(grid(&view).rows.len(), 1);
}

#[test]
fn strict_list_rejects_unparseable_filter() {
    let mut h = Harness::new();
    h.ctx.model = Arc::new(Room::with_policy(ParseErrorPolicy::Reject));
    h.seed(doc! { "shortcode": "a1" });

    let outcome = h.engine.list(&h.ctx, &h.get(&[("filter_label", "/[/")]));
    let Outcome::Rejected(error) = outcome else {
        panic!("expected rejection, got {outcome:?}");
    };
    assert!(matches!(error, CrudError::Query(QueryError::Filter(_))));
    assert_eq!(error.status_code(), StatusCode::BAD_REQUEST);
}

#[test]
fn read_only_pages_issue_no_token() {
    let h = Harness::new();
    let id = h.seed(doc! { "shortcode": "a" });

    let list = expect_view(h.engine.list(&h.ctx, &h.get(&[])));
    let view = expect_view(h.engine.view(&h.ctx, &h.get(&[("id", id.to_hex().as_str())])));
    let stats = expect_view(h.engine.stats(&h.ctx, &h.get(&[])));
    assert_eq!(list.csrf_token, None);
    assert_eq!(view.csrf_token, None);
    assert_eq!(stats.csrf_token, None);
    assert!(h.csrf.is_empty());

    let edit = expect_view(h.engine.edit_get(&h.ctx, &h.get(&[("id", id.to_hex().as_str())])));
    assert!(edit.csrf_token.is_some());
    assert_eq!(h.csrf.len(), 1);
}

#[test]
fn denied_list_halts_with_authorizer_response() {
    let h = Harness::with(
        Arc::new(MemoryStore::new()),
        RecordingAuthorizer::denying(&[Action::List]),
    );
    let outcome = h.engine.list(&h.ctx, &h.get(&[]));
    let Outcome::Halted(halt) = outcome else {
        panic!("expected halt");
    };
    assert_eq!(halt.into_response().status(), StatusCode::FORBIDDEN);
}

// ── Add ─────────────────────────────────────────────────────────

#[test]
fn add_ignores_fields_outside_allow_list() {
    let h = Harness::new();
    let other_app = ObjectId::new().to_hex();
    let location = expect_redirect(h.engine.add_post(
        &h.ctx,
        &h.post(&[
            ("shortcode", "lab"),
            ("label", "Lab"),
            ("appid", other_app.as_str()),
            ("description", "sneaky"),
        ]),
    ));

    let id = location.strip_prefix("/rooms/view/").unwrap();
    let saved = h.load(&ObjectId::parse_str(id).unwrap()).unwrap();
    assert_eq!(saved.get_object_id("appid").unwrap().to_hex(), DEFAULT_APP);
    assert_eq!(saved.get_str("label").unwrap(), "Lab");
    assert!(saved.get("description").is_none());
}

#[test]
fn add_validation_failure_rerenders_without_saving() {
    let h = Harness::new();
    let view = expect_view(h.engine.add_post(&h.ctx, &h.post(&[("shortcode", ""), ("label", "Lab")])));

    assert_eq!(view.result.field_errors["shortcode"], "is required");
    assert_eq!(view.form["label"], "Lab");
    assert_eq!(h.count(), 0);
    let Payload::Detail(detail) = &view.payload else {
        panic!("expected detail payload");
    };
    assert_eq!(detail.rows[0].error.as_deref(), Some("is required"));
}

#[test]
fn forged_post_fails_before_capability_check() {
    let h = Harness::with(
        Arc::new(MemoryStore::new()),
        RecordingAuthorizer::denying(&[Action::Add]),
    );
    let mut req = h.post(&[("shortcode", "lab")]);
    req.body.insert(CSRF_FIELD.into(), "forged".into());

    let outcome = h.engine.add_post(&h.ctx, &req);
    assert!(matches!(outcome, Outcome::Rejected(CrudError::Forgery(_))));
    assert!(h.auth.checks().is_empty());
    assert_eq!(h.count(), 0);
}

#[test]
fn clone_copies_source_fields_into_form() {
    let h = Harness::new();
    let source = h.seed(doc! { "shortcode": "src", "label": "Source", "capacity": 4_i64 });

    let view = expect_view(h.engine.add_get(&h.ctx, &h.get(&[("cloneId", source.to_hex().as_str())])));
    assert_eq!(view.form["shortcode"], "src");
    assert_eq!(view.form["capacity"], "4");
    assert!(!view.form.contains_key("_id"));
    assert_eq!(
        h.auth.checks(),
        vec![(Action::View, Some(source)), (Action::Add, None)]
    );
}

#[test]
fn malformed_clone_id_halts_before_capability_check() {
    let h = Harness::new();
    let outcome = h.engine.add_get(&h.ctx, &h.get(&[("cloneId", "not-an-id")]));
    let Outcome::Halted(halt) = outcome else {
        panic!("expected halt, got {outcome:?}");
    };
    assert_eq!(halt.into_response().status(), StatusCode::NOT_FOUND);
    assert!(h.auth.checks().is_empty());
}

#[test]
fn clone_of_unviewable_source_leaks_nothing() {
    let h = Harness::with(
        Arc::new(MemoryStore::new()),
        RecordingAuthorizer::denying(&[Action::View]),
    );
    let source = h.seed(doc! { "shortcode": "secret-code", "label": "Secret" });

    let outcome = h.engine.add_get(&h.ctx, &h.get(&[("cloneId", source.to_hex().as_str())]));
    let Outcome::Halted(halt) = outcome else {
        panic!("expected halt, got {outcome:?}");
    };
    let response = halt.into_response();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = String::from_utf8(response.into_body()).unwrap();
    assert!(!body.contains("secret-code"));
    assert!(!body.contains("Secret"));
    assert_eq!(h.auth.checks(), vec![(Action::View, Some(source))]);
}

#[test]
fn failed_add_rerender_keeps_csrf_token() {
    let h = Harness::new();
    let view = expect_view(h.engine.add_post(&h.ctx, &h.post(&[("shortcode", "")])));
    assert!(!view.result.is_ok());
    assert_eq!(view.csrf_token, h.csrf.issue(Some(SESSION)));
}

#[test]
fn blank_add_form_carries_csrf_token() {
    let h = Harness::new();
    let view = expect_view(h.engine.add_get(&h.ctx, &h.get(&[])));
    assert_eq!(view.csrf_token, h.csrf.issue(Some(SESSION)));
    assert_eq!(view.form["appid"], DEFAULT_APP);
}

// ── Edit ────────────────────────────────────────────────────────

#[test]
fn edit_post_targets_body_id_only() {
    let h = Harness::new();
    let a = h.seed(doc! { "shortcode": "a", "label": "A" });
    let b = h.seed(doc! { "shortcode": "b", "label": "B" });

    let mut req = h.post(&[("_id", b.to_hex().as_str()), ("label", "B2")]);
    req.params.insert(ROUTE_ID.into(), a.to_hex());
    let location = expect_redirect(h.engine.edit_post(&h.ctx, &req));

    assert_eq!(location, format!("/rooms/view/{}", b.to_hex()));
    assert_eq!(h.auth.checks(), vec![(Action::Edit, Some(b))]);
    assert_eq!(h.load(&a).unwrap().get_str("label").unwrap(), "A");
    let updated = h.load(&b).unwrap();
    assert_eq!(updated.get_str("label").unwrap(), "B2");
    assert_eq!(updated.get_str("shortcode").unwrap(), "b");
}

#[test]
fn edit_failure_shows_submitted_values() {
    let h = Harness::new();
    let id = h.seed(doc! { "shortcode": "a", "label": "A" });

    let view = expect_view(h.engine.edit_post(
        &h.ctx,
        &h.post(&[("_id", id.to_hex().as_str()), ("shortcode", ""), ("label", "Changed")]),
    ));
    assert_eq!(view.form["label"], "Changed");
    assert_eq!(view.form["_id"], id.to_hex());
    assert!(view.result.field_errors.contains_key("shortcode"));
    assert_eq!(h.load(&id).unwrap().get_str("label").unwrap(), "A");
}

#[test]
fn edit_of_missing_record_is_not_found() {
    let h = Harness::new();
    let outcome = h
        .engine
        .edit_get(&h.ctx, &h.get(&[("id", ObjectId::new().to_hex().as_str())]));
    let Outcome::Rejected(error) = outcome else {
        panic!("expected rejection");
    };
    assert_eq!(error.status_code(), StatusCode::NOT_FOUND);
}

#[test]
fn malformed_id_halts_before_capability_check() {
    let h = Harness::new();
    let outcome = h.engine.view(&h.ctx, &h.get(&[("id", "../../etc")]));
    let Outcome::Halted(halt) = outcome else {
        panic!("expected halt");
    };
    assert_eq!(halt.into_response().status(), StatusCode::NOT_FOUND);
    assert!(h.auth.checks().is_empty());
}

// ── View / Delete / Stats ───────────────────────────────────────

#[test]
fn view_renders_reference_as_link() {
    let h = Harness::new();
    let app = ObjectId::new();
    let id = h.seed(doc! { "shortcode": "a", "appid": app });

    let view = expect_view(h.engine.view(&h.ctx, &h.get(&[("id", id.to_hex().as_str())])));
    let Payload::Detail(detail) = &view.payload else {
        panic!("expected detail payload");
    };
    let row = detail.rows.iter().find(|r| r.name == "appid").unwrap();
    assert_eq!(
        row.value,
        DisplayValue::Link {
            href: format!("/apps/view/{}", app.to_hex()),
            text: app.to_hex(),
        }
    );
    let label = detail.rows.iter().find(|r| r.name == "label").unwrap();
    assert_eq!(label.value, DisplayValue::Missing);
}

#[test]
fn delete_redirects_and_notice_shows_once() {
    let h = Harness::new();
    let id = h.seed(doc! { "shortcode": "a" });

    let location = expect_redirect(h.engine.delete_post(&h.ctx, &h.post(&[("_id", id.to_hex().as_str())])));
    assert_eq!(location, "/rooms");
    assert_eq!(h.count(), 0);

    let first = expect_view(h.engine.list(&h.ctx, &h.get(&[])));
    assert_eq!(first.notices, vec!["Deleted Room."]);
    let second = expect_view(h.engine.list(&h.ctx, &h.get(&[])));
    assert!(second.notices.is_empty());
}

#[test]
fn failed_delete_rerenders_confirmation() {
    let h = Harness::with(
        Arc::new(BrokenDeleteStore::default()),
        RecordingAuthorizer::default(),
    );
    let id = h.seed(doc! { "shortcode": "a" });

    let view = expect_view(h.engine.delete_post(&h.ctx, &h.post(&[("_id", id.to_hex().as_str())])));
    assert_eq!(view.operation, Action::Delete);
    assert_eq!(view.result.errors, vec!["Could not delete Room."]);
    assert!(h.load(&id).is_some());
}

#[test]
fn delete_get_renders_confirmation() {
    let h = Harness::new();
    let id = h.seed(doc! { "shortcode": "a" });
    let view = expect_view(h.engine.delete_get(&h.ctx, &h.get(&[("id", id.to_hex().as_str())])));
    assert_eq!(view.headline, "Delete Room");
    assert_eq!(view.form["_id"], id.to_hex());
}

#[test]
fn stats_reports_total() {
    let h = Harness::new();
    h.seed(doc! { "shortcode": "a" });
    h.seed(doc! { "shortcode": "b" });

    let view = expect_view(h.engine.stats(&h.ctx, &h.get(&[])));
    let Payload::Stats { data } = &view.payload else {
        panic!("expected stats payload");
    };
    assert_eq!(data.get_i64("total").unwrap(), 2);
}

#[test]
fn rendered_outcome_becomes_json_response() {
    let h = Harness::new();
    let response = h
        .engine
        .stats(&h.ctx, &h.get(&[]))
        .into_response(&JsonRenderer);
    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
    assert_eq!(body["headline"], "Room stats");
    assert_eq!(body["payload"]["type"], "stats");
}
