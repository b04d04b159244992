use std::collections::HashMap;

use axum::{
    Extension, Router,
    extract::{Path, State},
    response::IntoResponse,
    routing::{get, patch, post},
};
use chrono::Utc;
use slambook_types::api::{CollegeScopeQuery, QuestionRequest, TemplateRequest, TemplateResponse};
use slambook_types::models::{Question, Template, User};
use tracing::info;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::extract::{ApiQuery, ValidJson, created, done, ok};
use crate::middleware::Principal;
use crate::policy::{Action, Resource, authorize};
use crate::state::{AppState, db_call};

/// Author recorded on templates created at startup.
pub const SYSTEM_AUTHOR: &str = "SYSTEM";

/// The college whose templates a call looks at. Members always use their
/// own; super admins may name one or stay in the system scope.
fn scope_of(principal: &Principal, requested: Option<String>) -> Option<String> {
    if principal.is_super_admin() {
        requested.filter(|id| !id.trim().is_empty())
    } else {
        principal.college_id.clone()
    }
}

/// Questions keep their id when a question with the same text already
/// existed, so stored responses stay attached across edits. Each earlier
/// id is handed out at most once.
pub fn build_questions(requests: Vec<QuestionRequest>, previous: &[Question]) -> Vec<Question> {
    let mut unclaimed: Vec<&Question> = previous.iter().collect();
    requests
        .into_iter()
        .enumerate()
        .map(|(i, req)| {
            let text = req.text.trim().to_string();
            let id = match unclaimed.iter().position(|q| q.text == text) {
                Some(pos) => unclaimed.remove(pos).id.clone(),
                None => Uuid::new_v4().to_string(),
            };
            Question {
                id,
                text,
                kind: req.kind,
                required: req.required.unwrap_or(false),
                placeholder: req.placeholder,
                order: req.order.or(i32::try_from(i + 1).ok()),
            }
        })
        .collect()
}

async fn responses(state: &AppState, templates: Vec<Template>) -> ApiResult<Vec<TemplateResponse>> {
    let mut ids: Vec<String> = templates
        .iter()
        .filter_map(|t| t.created_by.clone())
        .filter(|id| id != SYSTEM_AUTHOR)
        .collect();
    ids.sort();
    ids.dedup();
    let authors = db_call(state, move |db| db.get_users(&ids)).await?;
    Ok(templates.iter().map(|t| response(t, &authors)).collect())
}

fn response(template: &Template, authors: &HashMap<String, User>) -> TemplateResponse {
    let mut view = TemplateResponse::from(template);
    view.created_by_name = template
        .created_by
        .as_ref()
        .and_then(|id| authors.get(id))
        .map(|user| user.profile.full_name());
    view
}

async fn single(state: &AppState, template: Template) -> ApiResult<TemplateResponse> {
    let mut list = responses(state, vec![template]).await?;
    list.pop()
        .ok_or_else(|| ApiError::Internal(anyhow::anyhow!("template view lost")))
}

async fn load_template(state: &AppState, id: String) -> ApiResult<Template> {
    db_call(state, move |db| db.get_template(&id))
        .await?
        .ok_or_else(|| ApiError::not_found("Template"))
}

async fn load_for(state: &AppState, principal: &Principal, id: String, action: Action) -> ApiResult<Template> {
    let template = load_template(state, id).await?;
    authorize(principal, action, Resource::Template(&template))?;
    Ok(template)
}

pub async fn system_templates(state: &AppState) -> ApiResult<Vec<TemplateResponse>> {
    let templates = db_call(state, |db| db.active_templates(None)).await?;
    responses(state, templates).await
}

pub async fn college_templates(
    state: &AppState,
    principal: &Principal,
    scope: CollegeScopeQuery,
) -> ApiResult<Vec<TemplateResponse>> {
    let Some(college_id) = scope_of(principal, scope.college_id) else {
        return Ok(Vec::new());
    };
    authorize(principal, Action::Read, Resource::College(&college_id))?;
    let templates = db_call(state, move |db| db.active_templates(Some(&college_id))).await?;
    responses(state, templates).await
}

/// System templates followed by the college's own.
pub async fn available_templates(
    state: &AppState,
    principal: &Principal,
    scope: CollegeScopeQuery,
) -> ApiResult<Vec<TemplateResponse>> {
    let college_id = scope_of(principal, scope.college_id);
    let templates = db_call(state, move |db| {
        let mut all = db.active_templates(None)?;
        if let Some(college_id) = &college_id {
            all.extend(db.active_templates(Some(college_id))?);
        }
        Ok(all)
    })
    .await?;
    responses(state, templates).await
}

/// College default, then system default, then the oldest active system template.
pub async fn default_template(
    state: &AppState,
    principal: &Principal,
    scope: CollegeScopeQuery,
) -> ApiResult<TemplateResponse> {
    let college_id = scope_of(principal, scope.college_id);
    let template = db_call(state, move |db| {
        if let Some(college_id) = &college_id {
            if let Some(template) = db.default_template(Some(college_id))? {
                return Ok(Some(template));
            }
        }
        if let Some(template) = db.default_template(None)? {
            return Ok(Some(template));
        }
        Ok(db.active_templates(None)?.into_iter().next())
    })
    .await?
    .ok_or_else(|| ApiError::not_found("Default template"))?;
    single(state, template).await
}

pub async fn get_template(state: &AppState, principal: &Principal, id: String) -> ApiResult<TemplateResponse> {
    let template = load_for(state, principal, id, Action::Read).await?;
    single(state, template).await
}

pub async fn template_questions(state: &AppState, principal: &Principal, id: String) -> ApiResult<Vec<Question>> {
    let template = load_for(state, principal, id, Action::Read).await?;
    Ok(template.questions)
}

/// College admins create in their college; super admins create system templates.
pub async fn create_template(
    state: &AppState,
    principal: &Principal,
    req: TemplateRequest,
) -> ApiResult<TemplateResponse> {
    let college_id = if principal.is_super_admin() {
        None
    } else {
        let own = principal
            .college_id
            .clone()
            .ok_or_else(|| ApiError::Forbidden("College admin access required".into()))?;
        authorize(principal, Action::Administer, Resource::College(&own))?;
        Some(own)
    };

    let now = Utc::now();
    let template = Template {
        id: Uuid::new_v4().to_string(),
        college_id,
        name: req.name.trim().to_string(),
        description: req.description,
        questions: build_questions(req.questions, &[]),
        is_default: req.is_default.unwrap_or(false),
        is_active: true,
        created_by: Some(principal.user_id.clone()),
        created_at: now,
        updated_at: now,
    };

    let record = template.clone();
    db_call(state, move |db| db.insert_template(&record)).await?;
    info!("Template {} created by {}", template.id, principal.user_id);
    single(state, template).await
}

/// Replaces name, description and questions. Default status has its own call.
pub async fn update_template(
    state: &AppState,
    principal: &Principal,
    id: String,
    req: TemplateRequest,
) -> ApiResult<TemplateResponse> {
    let mut template = load_for(state, principal, id, Action::Update).await?;
    template.name = req.name.trim().to_string();
    template.description = req.description;
    template.questions = build_questions(req.questions, &template.questions);
    template.updated_at = Utc::now();

    let record = template.clone();
    db_call(state, move |db| db.update_template_content(&record)).await?;
    single(state, template).await
}

pub async fn delete_template(state: &AppState, principal: &Principal, id: String) -> ApiResult<()> {
    let template = load_for(state, principal, id, Action::Delete).await?;
    if template.is_default {
        return Err(ApiError::BadRequest(
            "Cannot delete default template. Set another template as default first.".into(),
        ));
    }
    let template_id = template.id.clone();
    db_call(state, move |db| db.delete_template(&template_id)).await?;
    info!("Template {} deleted by {}", template.id, principal.user_id);
    Ok(())
}

pub async fn set_active(
    state: &AppState,
    principal: &Principal,
    id: String,
    active: bool,
) -> ApiResult<TemplateResponse> {
    let template = load_for(state, principal, id, Action::Update).await?;
    let template_id = template.id.clone();
    db_call(state, move |db| db.set_template_active(&template_id, active, Utc::now())).await?;
    let template = load_template(state, template.id).await?;
    single(state, template).await
}

/// Swaps the scope's default in one transaction and activates the template.
pub async fn set_default(state: &AppState, principal: &Principal, id: String) -> ApiResult<TemplateResponse> {
    let template = load_for(state, principal, id, Action::Update).await?;
    let template_id = template.id.clone();
    let found = db_call(state, move |db| db.set_default_template(&template_id, Utc::now())).await?;
    if !found {
        return Err(ApiError::not_found("Template"));
    }
    let template = load_template(state, template.id).await?;
    single(state, template).await
}

/// Copies a readable template into the caller's own scope.
pub async fn clone_template(state: &AppState, principal: &Principal, id: String) -> ApiResult<TemplateResponse> {
    let source = load_for(state, principal, id, Action::Read).await?;
    let now = Utc::now();
    let template = Template {
        id: Uuid::new_v4().to_string(),
        college_id: principal.college_id.clone(),
        name: format!("{} (Copy)", source.name),
        description: source.description,
        questions: source.questions,
        is_default: false,
        is_active: true,
        created_by: Some(principal.user_id.clone()),
        created_at: now,
        updated_at: now,
    };
    let record = template.clone();
    db_call(state, move |db| db.insert_template(&record)).await?;
    single(state, template).await
}

// -- Handlers --

async fn handle_system(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    Ok(ok("System templates retrieved", system_templates(&state).await?))
}

async fn handle_college(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    ApiQuery(scope): ApiQuery<CollegeScopeQuery>,
) -> ApiResult<impl IntoResponse> {
    Ok(ok("College templates retrieved", college_templates(&state, &principal, scope).await?))
}

async fn handle_available(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    ApiQuery(scope): ApiQuery<CollegeScopeQuery>,
) -> ApiResult<impl IntoResponse> {
    Ok(ok("Templates retrieved", available_templates(&state, &principal, scope).await?))
}

async fn handle_default(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    ApiQuery(scope): ApiQuery<CollegeScopeQuery>,
) -> ApiResult<impl IntoResponse> {
    Ok(ok("Default template retrieved", default_template(&state, &principal, scope).await?))
}

async fn handle_create(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    ValidJson(req): ValidJson<TemplateRequest>,
) -> ApiResult<impl IntoResponse> {
    Ok(created("Template created successfully", create_template(&state, &principal, req).await?))
}

async fn handle_get(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(ok("Template retrieved", get_template(&state, &principal, id).await?))
}

async fn handle_update(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
    ValidJson(req): ValidJson<TemplateRequest>,
) -> ApiResult<impl IntoResponse> {
    Ok(ok("Template updated successfully", update_template(&state, &principal, id, req).await?))
}

async fn handle_delete(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    delete_template(&state, &principal, id).await?;
    Ok(done("Template deleted successfully"))
}

async fn handle_activate(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(ok("Template activated", set_active(&state, &principal, id, true).await?))
}

async fn handle_deactivate(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(ok("Template deactivated", set_active(&state, &principal, id, false).await?))
}

async fn handle_set_default(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(ok("Template set as default", set_default(&state, &principal, id).await?))
}

async fn handle_clone(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(created("Template cloned successfully", clone_template(&state, &principal, id).await?))
}

async fn handle_questions(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(ok("Questions retrieved", template_questions(&state, &principal, id).await?))
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", post(handle_create))
        .route("/system", get(handle_system))
        .route("/college", get(handle_college))
        .route("/available", get(handle_available))
        .route("/default", get(handle_default))
        .route(
            "/{id}",
            get(handle_get).put(handle_update).delete(handle_delete),
        )
        .route("/{id}/activate", patch(handle_activate))
        .route("/{id}/deactivate", patch(handle_deactivate))
        .route("/{id}/set-default", patch(handle_set_default))
        .route("/{id}/clone", post(handle_clone))
        .route("/{id}/questions", get(handle_questions))
}

#[cfg(test)]
mod tests {
    use super::*;
    use slambook_types::models::{QuestionKind, Role};

    fn ask(text: &str) -> QuestionRequest {
        QuestionRequest {
            text: text.into(),
            kind: QuestionKind::Text { max_length: None },
            required: None,
            placeholder: None,
            order: None,
        }
    }

    #[test]
    fn unchanged_questions_keep_their_ids() {
        let first = build_questions(vec![ask("Nickname?"), ask("Best memory?")], &[]);
        assert_eq!(first[0].order, Some(1));
        assert_eq!(first[1].order, Some(2));

        let second = build_questions(vec![ask("Best memory?"), ask("Favourite song?")], &first);
        assert_eq!(second[0].id, first[1].id);
        assert_ne!(second[1].id, first[0].id);
        assert_ne!(second[1].id, first[1].id);
        assert_eq!(second[0].order, Some(1));
    }

    #[test]
    fn repeated_text_never_shares_an_id() {
        let first = build_questions(vec![ask("Nickname?")], &[]);
        let second = build_questions(vec![ask("Nickname?"), ask("Nickname?")], &first);
        assert_eq!(second[0].id, first[0].id);
        assert_ne!(second[1].id, second[0].id);

        let third = build_questions(vec![ask("Nickname?"), ask("Nickname?")], &second);
        assert_eq!(third[0].id, second[0].id);
        assert_eq!(third[1].id, second[1].id);
    }

    #[test]
    fn super_admin_scope_comes_from_the_query() {
        let root = Principal {
            user_id: "root".into(),
            role: Role::SuperAdmin,
            college_id: None,
        };
        assert_eq!(scope_of(&root, None), None);
        assert_eq!(scope_of(&root, Some("c9".into())), Some("c9".into()));

        let student = Principal {
            user_id: "s".into(),
            role: Role::Student,
            college_id: Some("c1".into()),
        };
        assert_eq!(scope_of(&student, Some("c9".into())), Some("c1".into()));
    }
}
