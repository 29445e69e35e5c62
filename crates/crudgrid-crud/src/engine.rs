use std::collections::BTreeMap;
use std::sync::Arc;

use bson::Document;
use bson::oid::ObjectId;
use crudgrid_query::{Subtype, is_record_id};

use crate::collaborators::{Action, Authorizer, CSRF_FIELD, Capability, CsrfGuard, FlashStore};
use crate::context::{CrudContext, CrudRequest, Outcome, Payload, View};
use crate::error::CrudError;
use crate::form::{form_values, submitted_record, submitted_values};
use crate::model::SaveOp;
use crate::presentation::{build_detail, build_grid};
use crate::result::CrudResult;
use crate::store::Store;

/// Route parameter naming the target record on GET pages.
pub const ROUTE_ID: &str = "id";
/// Body field naming the target record on POSTs.
pub const ID_FIELD: &str = "_id";
/// Query parameter naming the record an add form is cloned from.
pub const CLONE_ID: &str = "cloneId";

type Step<T> = Result<T, Outcome>;

/// Drives list/add/edit/view/delete/stats for any model class. Each call is
/// one request; the engine holds no per-request state.
pub struct CrudEngine {
    store: Arc<dyn Store>,
    authorizer: Arc<dyn Authorizer>,
    csrf: Arc<dyn CsrfGuard>,
    flash: Arc<dyn FlashStore>,
}

impl CrudEngine {
    pub fn new(
        store: Arc<dyn Store>,
        authorizer: Arc<dyn Authorizer>,
        csrf: Arc<dyn CsrfGuard>,
        flash: Arc<dyn FlashStore>,
    ) -> Self {
        Self {
            store,
            authorizer,
            csrf,
            flash,
        }
    }

    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    pub fn list(&self, ctx: &CrudContext, req: &CrudRequest) -> Outcome {
        settle(self.try_list(ctx, req))
    }

    pub fn add_get(&self, ctx: &CrudContext, req: &CrudRequest) -> Outcome {
        settle(self.try_add_get(ctx, req))
    }

    pub fn add_post(&self, ctx: &CrudContext, req: &CrudRequest) -> Outcome {
        settle(self.try_add_post(ctx, req))
    }

    pub fn edit_get(&self, ctx: &CrudContext, req: &CrudRequest) -> Outcome {
        settle(self.try_edit_get(ctx, req))
    }

    pub fn edit_post(&self, ctx: &CrudContext, req: &CrudRequest) -> Outcome {
        settle(self.try_edit_post(ctx, req))
    }

    pub fn view(&self, ctx: &CrudContext, req: &CrudRequest) -> Outcome {
        settle(self.try_view(ctx, req))
    }

    pub fn delete_get(&self, ctx: &CrudContext, req: &CrudRequest) -> Outcome {
        settle(self.try_delete_get(ctx, req))
    }

    pub fn delete_post(&self, ctx: &CrudContext, req: &CrudRequest) -> Outcome {
        settle(self.try_delete_post(ctx, req))
    }

    pub fn stats(&self, ctx: &CrudContext, req: &CrudRequest) -> Outcome {
        settle(self.try_stats(ctx, req))
    }

    // ── Operations ──────────────────────────────────────────────

    fn try_list(&self, ctx: &CrudContext, req: &CrudRequest) -> Step<Outcome> {
        self.authorize(ctx, Action::List, None)?;
        let data = ctx
            .model
            .list_helper_data(self.store(), &req.params, &ctx.base_url)
            .map_err(Outcome::Rejected)?;

        let mut result = CrudResult::default();
        result.extend_filter_errors(&data.errors);
        let grid = build_grid(
            ctx.model.as_ref(),
            &ctx.base_url,
            &data.records,
            &data.state,
            &result.field_errors,
        );

        let mut view = self.view_for(ctx, req, Action::List);
        view.form = data.state.field_filters.clone();
        view.payload = Payload::Grid(grid);
        view.result = result;
        Ok(render(view))
    }

    fn try_add_get(&self, ctx: &CrudContext, req: &CrudRequest) -> Step<Outcome> {
        let mut record = ctx.model.new_record();
        if let Some(raw) = req.params.get(CLONE_ID).filter(|raw| !raw.is_empty()) {
            let source_id = self.parse_id(ctx, Some(raw))?;
            self.authorize(ctx, Action::View, Some(&source_id))?;
            let mut source = self.load(ctx, &source_id)?;
            source.remove(ID_FIELD);
            record = source;
        }
        self.authorize(ctx, Action::Add, None)?;

        let mut view = self.view_for(ctx, req, Action::Add);
        view.form = form_values(ctx.model.schema(), &record);
        view.payload = Payload::Detail(build_detail(
            ctx.model.as_ref(),
            Subtype::Add,
            &record,
            &view.result,
        ));
        Ok(render(view))
    }

    fn try_add_post(&self, ctx: &CrudContext, req: &CrudRequest) -> Step<Outcome> {
        self.verify_csrf(ctx, req)?;
        self.authorize(ctx, Action::Add, None)?;

        let mut result = CrudResult::default();
        let saved = ctx.model.validate_and_save(
            self.store(),
            SaveOp::CrudAdd,
            ctx.model.new_record(),
            &req.body,
            &mut result,
        );
        if let Some(saved) = saved {
            let location = match saved.get_object_id(ID_FIELD) {
                Ok(id) => format!("{}/view/{}", ctx.base_url, id.to_hex()),
                Err(_) => ctx.base_url.clone(),
            };
            return Ok(self.succeed(
                ctx,
                req,
                Action::Add,
                format!("Added new {}.", ctx.model.nice_name()),
                location,
            ));
        }

        let form = submitted_values(ctx.model.schema(), &req.body);
        let record = submitted_record(&form);
        Ok(self.rerender(ctx, req, Action::Add, Subtype::Add, &record, form, result))
    }

    fn try_edit_get(&self, ctx: &CrudContext, req: &CrudRequest) -> Step<Outcome> {
        let id = self.parse_id(ctx, req.params.get(ROUTE_ID))?;
        self.authorize(ctx, Action::Edit, Some(&id))?;
        let record = self.load(ctx, &id)?;
        let extra = ctx
            .model
            .edit_helper_data(self.store(), &record)
            .map_err(Outcome::Rejected)?;

        let mut view = self.view_for(ctx, req, Action::Edit);
        view.form = form_values(ctx.model.schema(), &record);
        view.form.insert(ID_FIELD.into(), id.to_hex());
        view.payload = Payload::Detail(build_detail(
            ctx.model.as_ref(),
            Subtype::Edit,
            &record,
            &view.result,
        ));
        view.extra = extra;
        Ok(render(view))
    }

    /// The target comes from the body `_id` alone; a route id is never read.
    fn try_edit_post(&self, ctx: &CrudContext, req: &CrudRequest) -> Step<Outcome> {
        self.verify_csrf(ctx, req)?;
        let id = self.parse_id(ctx, req.body.get(ID_FIELD))?;
        self.authorize(ctx, Action::Edit, Some(&id))?;
        let record = self.load(ctx, &id)?;

        let mut result = CrudResult::default();
        let saved = ctx.model.validate_and_save(
            self.store(),
            SaveOp::CrudEdit,
            record.clone(),
            &req.body,
            &mut result,
        );
        if saved.is_some() {
            return Ok(self.succeed(
                ctx,
                req,
                Action::Edit,
                format!("Saved changes to {}.", ctx.model.nice_name()),
                format!("{}/view/{}", ctx.base_url, id.to_hex()),
            ));
        }

        let mut form = submitted_values(ctx.model.schema(), &req.body);
        let mut shown = record;
        for (name, value) in submitted_record(&form) {
            shown.insert(name, value);
        }
        form.insert(ID_FIELD.into(), id.to_hex());
        Ok(self.rerender(ctx, req, Action::Edit, Subtype::Edit, &shown, form, result))
    }

    fn try_view(&self, ctx: &CrudContext, req: &CrudRequest) -> Step<Outcome> {
        let id = self.parse_id(ctx, req.params.get(ROUTE_ID))?;
        self.authorize(ctx, Action::View, Some(&id))?;
        let record = self.load(ctx, &id)?;
        let extra = ctx
            .model
            .view_helper_data(self.store(), &record)
            .map_err(Outcome::Rejected)?;

        let mut view = self.view_for(ctx, req, Action::View);
        view.payload = Payload::Detail(build_detail(
            ctx.model.as_ref(),
            Subtype::View,
            &record,
            &view.result,
        ));
        view.extra = extra;
        Ok(render(view))
    }

    fn try_delete_get(&self, ctx: &CrudContext, req: &CrudRequest) -> Step<Outcome> {
        let id = self.parse_id(ctx, req.params.get(ROUTE_ID))?;
        self.authorize(ctx, Action::Delete, Some(&id))?;
        let record = self.load(ctx, &id)?;

        let mut view = self.view_for(ctx, req, Action::Delete);
        view.form.insert(ID_FIELD.into(), id.to_hex());
        view.payload = Payload::Detail(build_detail(
            ctx.model.as_ref(),
            Subtype::Delete,
            &record,
            &view.result,
        ));
        Ok(render(view))
    }

    fn try_delete_post(&self, ctx: &CrudContext, req: &CrudRequest) -> Step<Outcome> {
        self.verify_csrf(ctx, req)?;
        let id = self.parse_id(ctx, req.body.get(ID_FIELD))?;
        self.authorize(ctx, Action::Delete, Some(&id))?;
        let record = self.load(ctx, &id)?;

        match self.store.delete(ctx.model.collection_name(), &id) {
            Ok(()) => Ok(self.succeed(
                ctx,
                req,
                Action::Delete,
                format!("Deleted {}.", ctx.model.nice_name()),
                ctx.base_url.clone(),
            )),
            Err(e) => {
                tracing::error!(
                    collection = ctx.model.collection_name(),
                    id = %id,
                    error = %e,
                    "delete failed"
                );
                let mut result = CrudResult::default();
                result.push_error(format!("Could not delete {}.", ctx.model.nice_name()));
                let mut form = BTreeMap::new();
                form.insert(ID_FIELD.to_string(), id.to_hex());
                Ok(self.rerender(ctx, req, Action::Delete, Subtype::Delete, &record, form, result))
            }
        }
    }

    fn try_stats(&self, ctx: &CrudContext, req: &CrudRequest) -> Step<Outcome> {
        self.authorize(ctx, Action::Stats, None)?;
        let data = ctx
            .model
            .stats_helper_data(self.store())
            .map_err(Outcome::Rejected)?;

        let mut view = self.view_for(ctx, req, Action::Stats);
        view.payload = Payload::Stats { data };
        Ok(render(view))
    }

    // ── Steps ───────────────────────────────────────────────────

    /// Every id is checked against the record-id format before it reaches a
    /// capability check, however it was routed.
    fn parse_id(&self, ctx: &CrudContext, raw: Option<&String>) -> Step<ObjectId> {
        let raw = raw.map(String::as_str).unwrap_or_default();
        if !is_record_id(raw) {
            tracing::warn!(collection = ctx.model.collection_name(), raw_id = raw, "malformed record id");
            return Err(Outcome::Halted(
                self.authorizer.reject_id(ctx.actor.as_ref(), raw),
            ));
        }
        ObjectId::parse_str(raw)
            .map_err(|_| Outcome::Halted(self.authorizer.reject_id(ctx.actor.as_ref(), raw)))
    }

    fn authorize(&self, ctx: &CrudContext, action: Action, record_id: Option<&ObjectId>) -> Step<()> {
        let capability = Capability {
            actor: ctx.actor.as_ref(),
            action,
            collection: ctx.model.collection_name(),
            record_id,
        };
        self.authorizer.check(&capability).map_err(|halt| {
            tracing::warn!(
                actor = ctx.actor.as_ref().map(|a| a.id.as_str()).unwrap_or("-"),
                action = action.as_str(),
                collection = ctx.model.collection_name(),
                "capability denied"
            );
            Outcome::Halted(halt)
        })
    }

    fn load(&self, ctx: &CrudContext, id: &ObjectId) -> Step<Document> {
        match ctx.model.find_one_by_id(self.store(), id) {
            Ok(Some(record)) => Ok(record),
            Ok(None) => Err(Outcome::Rejected(CrudError::NotFound(format!(
                "{} {}",
                ctx.model.nice_name(),
                id.to_hex()
            )))),
            Err(e) => Err(Outcome::Rejected(e)),
        }
    }

    fn verify_csrf(&self, ctx: &CrudContext, req: &CrudRequest) -> Step<()> {
        self.csrf
            .verify(
                req.session_id.as_deref(),
                req.body.get(CSRF_FIELD).map(String::as_str),
            )
            .map_err(|e| {
                tracing::warn!(
                    collection = ctx.model.collection_name(),
                    error = %e,
                    "rejected post"
                );
                Outcome::Rejected(e)
            })
    }

    /// Queue the notice for the next page and redirect there.
    fn succeed(
        &self,
        ctx: &CrudContext,
        req: &CrudRequest,
        action: Action,
        notice: String,
        location: String,
    ) -> Outcome {
        tracing::info!(
            actor = ctx.actor.as_ref().map(|a| a.id.as_str()).unwrap_or("-"),
            action = action.as_str(),
            collection = ctx.model.collection_name(),
            %location,
            "mutation applied"
        );
        if let Some(session_id) = &req.session_id {
            self.flash.push(session_id, notice);
        }
        Outcome::Redirect(location)
    }

    #[allow(clippy::too_many_arguments)]
    fn rerender(
        &self,
        ctx: &CrudContext,
        req: &CrudRequest,
        action: Action,
        subtype: Subtype,
        record: &Document,
        form: BTreeMap<String, String>,
        result: CrudResult,
    ) -> Outcome {
        let mut view = self.view_for(ctx, req, action);
        view.payload = Payload::Detail(build_detail(ctx.model.as_ref(), subtype, record, &result));
        view.form = form;
        view.result = result;
        render(view)
    }

    /// Blank view with the session's pending notices and a fresh form token.
    fn view_for(&self, ctx: &CrudContext, req: &CrudRequest, operation: Action) -> View {
        let notices = req
            .session_id
            .as_deref()
            .map(|session_id| self.flash.drain(session_id))
            .unwrap_or_default();
        // Only pages that post back get a token.
        let csrf_token = match operation {
            Action::Add | Action::Edit | Action::Delete => {
                self.csrf.issue(req.session_id.as_deref())
            }
            Action::List | Action::View | Action::Stats => None,
        };
        View {
            operation,
            headline: headline(operation, ctx.model.nice_name()),
            view_file_path: ctx.view_file_path.clone(),
            base_url: ctx.base_url.clone(),
            csrf_token,
            notices,
            result: CrudResult::default(),
            payload: Payload::Empty,
            form: Default::default(),
            extra: Document::new(),
        }
    }
}

fn settle(step: Step<Outcome>) -> Outcome {
    step.unwrap_or_else(|outcome| outcome)
}

fn render(view: View) -> Outcome {
    Outcome::Render(Box::new(view))
}

fn headline(operation: Action, nice_name: &str) -> String {
    match operation {
        Action::List => format!("{nice_name} list"),
        Action::Add => format!("Add {nice_name}"),
        Action::Edit => format!("Edit {nice_name}"),
        Action::View => format!("View {nice_name}"),
        Action::Delete => format!("Delete {nice_name}"),
        Action::Stats => format!("{nice_name} stats"),
    }
}
