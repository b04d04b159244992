use std::collections::HashMap;

use axum::{
    Extension, Router,
    extract::{Path, State},
    response::IntoResponse,
    routing::{get, post},
};
use chrono::Utc;
use slambook_db::is_unique_violation;
use slambook_types::api::{
    CollegeScopeQuery, CreateEntryRequest, EntryResponse, ReactionRequest, ReactionResponse,
    ReportRequest, UpdateEntryRequest, UserBasicInfo,
};
use slambook_types::models::{
    Attachment, AttachmentKind, Entry, Moderation, Reaction, ReactionKind, User, Visibility,
};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::extract::{ApiQuery, FileUpload, ValidJson, created, done, ok};
use crate::middleware::Principal;
use crate::notify;
use crate::policy::{Action, Resource, authorize};
use crate::state::{AppState, db_call};
use crate::storage::{Upload, UploadKind};

const DUPLICATE_ENTRY: &str = "You have already written in this person's slam book";

/// Build the client view. Anonymous authors stay hidden from everyone but
/// the writer and admins; moderation details are for admins only.
pub fn entry_view(entry: &Entry, users: &HashMap<String, User>, viewer: &Principal) -> EntryResponse {
    let privileged = viewer.role.is_admin();
    let reveal_author = !entry.is_anonymous || privileged || entry.is_writer(&viewer.user_id);

    let (written_by, written_by_user) = if reveal_author {
        (
            Some(entry.written_by.clone()),
            users.get(&entry.written_by).map(UserBasicInfo::from),
        )
    } else {
        (None, Some(UserBasicInfo::anonymous()))
    };

    EntryResponse {
        id: entry.id.clone(),
        college_id: entry.college_id.clone(),
        written_for: entry.written_for.clone(),
        written_for_user: users.get(&entry.written_for).map(UserBasicInfo::from),
        written_by,
        written_by_user,
        is_anonymous: entry.is_anonymous,
        responses: entry.responses.clone(),
        ratings: entry.ratings.clone(),
        attachments: entry.attachments.clone(),
        reactions: entry
            .reactions
            .iter()
            .map(|r| ReactionResponse {
                user_id: r.user_id.clone(),
                kind: r.kind,
                created_at: r.created_at,
            })
            .collect(),
        visibility: entry.visibility,
        moderation: privileged.then(|| entry.moderation.clone()),
        created_at: entry.created_at,
        updated_at: entry.updated_at,
    }
}

async fn views(state: &AppState, entries: Vec<Entry>, viewer: &Principal) -> ApiResult<Vec<EntryResponse>> {
    let mut ids: Vec<String> = entries
        .iter()
        .flat_map(|e| [e.written_for.clone(), e.written_by.clone()])
        .collect();
    ids.sort();
    ids.dedup();
    let users = db_call(state, move |db| db.get_users(&ids)).await?;
    Ok(entries.iter().map(|e| entry_view(e, &users, viewer)).collect())
}

async fn view(state: &AppState, entry: Entry, viewer: &Principal) -> ApiResult<EntryResponse> {
    let mut list = views(state, vec![entry], viewer).await?;
    list.pop()
        .ok_or_else(|| ApiError::Internal(anyhow::anyhow!("entry view lost")))
}

async fn load_entry(state: &AppState, id: String) -> ApiResult<Entry> {
    db_call(state, move |db| db.get_entry(&id))
        .await?
        .ok_or_else(|| ApiError::not_found("Entry"))
}

pub async fn create_entry(
    state: &AppState,
    principal: &Principal,
    req: CreateEntryRequest,
) -> ApiResult<EntryResponse> {
    if req.written_for == principal.user_id {
        return Err(ApiError::BadRequest("You cannot write in your own slam book".into()));
    }

    let target_id = req.written_for.clone();
    let target = db_call(state, move |db| db.get_user(&target_id))
        .await?
        .ok_or_else(|| ApiError::not_found("User"))?;

    // The entry lives in the target's college.
    let college_id = target
        .college_id
        .clone()
        .ok_or_else(|| ApiError::BadRequest("This user does not have a slam book".into()))?;
    if !principal.is_super_admin() && !principal.belongs_to(&college_id) {
        return Err(ApiError::Forbidden("Cannot write for user from different college".into()));
    }
    if !target.is_active || !target.join_request.is_approved() {
        return Err(ApiError::BadRequest("This user is not an active member".into()));
    }

    let is_anonymous = req.is_anonymous.unwrap_or(false);
    if is_anonymous {
        let cid = college_id.clone();
        let college_allows = db_call(state, move |db| db.get_college(&cid))
            .await?
            .is_some_and(|c| c.settings.allow_anonymous_entries);
        if !college_allows || !target.slambook_settings.allow_anonymous {
            return Err(ApiError::BadRequest("This user does not allow anonymous entries".into()));
        }
    }

    let now = Utc::now();
    let entry = Entry {
        id: Uuid::new_v4().to_string(),
        college_id,
        written_for: target.id.clone(),
        written_by: principal.user_id.clone(),
        is_anonymous,
        responses: req.responses,
        ratings: req.ratings.unwrap_or_default(),
        attachments: Vec::new(),
        reactions: Vec::new(),
        moderation: Moderation::default(),
        visibility: req.visibility.unwrap_or(Visibility::Public),
        created_at: now,
        updated_at: now,
    };

    // The UNIQUE(written_for, written_by) constraint decides races.
    let record = entry.clone();
    let inserted = db_call(state, move |db| {
        if db.entry_exists(&record.written_by, &record.written_for)? {
            return Ok(false);
        }
        match db.insert_entry(&record) {
            Ok(()) => Ok(true),
            Err(e) if is_unique_violation(&e) => Ok(false),
            Err(e) => Err(e),
        }
    })
    .await?;
    if !inserted {
        return Err(ApiError::BadRequest(DUPLICATE_ENTRY.into()));
    }

    info!("Entry {} written for {}", entry.id, entry.written_for);
    notify::emit(state, vec![notify::new_entry(&target, &entry)]).await;
    view(state, entry, principal).await
}

pub async fn entries_for_me(state: &AppState, principal: &Principal) -> ApiResult<Vec<EntryResponse>> {
    let id = principal.user_id.clone();
    let entries = db_call(state, move |db| db.entries_written_for(&id)).await?;
    views(state, entries, principal).await
}

pub async fn entries_by_me(state: &AppState, principal: &Principal) -> ApiResult<Vec<EntryResponse>> {
    let id = principal.user_id.clone();
    let entries = db_call(state, move |db| db.entries_written_by(&id)).await?;
    views(state, entries, principal).await
}

/// Tenant admins see their college; super admins see everything or one college.
pub async fn reported_entries(
    state: &AppState,
    principal: &Principal,
    scope: CollegeScopeQuery,
) -> ApiResult<Vec<EntryResponse>> {
    let filter = if principal.is_super_admin() {
        scope.college_id.filter(|c| !c.trim().is_empty())
    } else {
        let own = principal
            .college_id
            .clone()
            .ok_or_else(|| ApiError::Forbidden("College admin access required".into()))?;
        authorize(principal, Action::Administer, Resource::College(&own))?;
        Some(own)
    };
    let entries = db_call(state, move |db| db.reported_entries(filter.as_deref())).await?;
    views(state, entries, principal).await
}

pub async fn get_entry(state: &AppState, principal: &Principal, id: String) -> ApiResult<EntryResponse> {
    let entry = load_entry(state, id).await?;
    authorize(principal, Action::Read, Resource::Entry(&entry))?;
    view(state, entry, principal).await
}

pub async fn update_entry(
    state: &AppState,
    principal: &Principal,
    id: String,
    req: UpdateEntryRequest,
) -> ApiResult<EntryResponse> {
    let mut entry = load_entry(state, id).await?;
    authorize(principal, Action::Update, Resource::Entry(&entry))?;

    if let Some(responses) = req.responses {
        entry.responses = responses;
    }
    if let Some(ratings) = req.ratings {
        entry.ratings = ratings;
    }
    if let Some(visibility) = req.visibility {
        entry.visibility = visibility;
    }
    entry.updated_at = Utc::now();

    let record = entry.clone();
    db_call(state, move |db| {
        db.update_entry_content(
            &record.id,
            &record.responses,
            &record.ratings,
            record.visibility,
            record.updated_at,
        )
    })
    .await?;
    view(state, entry, principal).await
}

/// Stored files go first, best-effort; the record (with its attachments and
/// reactions) goes regardless.
pub async fn delete_entry(state: &AppState, principal: &Principal, id: String) -> ApiResult<()> {
    let entry = load_entry(state, id).await?;
    authorize(principal, Action::Delete, Resource::Entry(&entry))?;

    for attachment in &entry.attachments {
        if let Err(e) = state.files.delete(&attachment.url).await {
            warn!("Failed to delete attachment {} of entry {}: {}", attachment.url, entry.id, e);
        }
    }

    let entry_id = entry.id.clone();
    db_call(state, move |db| db.delete_entry(&entry_id)).await?;
    info!("Entry {} deleted by {}", entry.id, principal.user_id);
    Ok(())
}

/// Authorize, store, then append. If the append fails the stored file is removed.
pub async fn add_attachment(
    state: &AppState,
    principal: &Principal,
    id: String,
    kind: AttachmentKind,
    upload: Upload,
) -> ApiResult<EntryResponse> {
    let entry = load_entry(state, id).await?;
    authorize(principal, Action::AddAttachment, Resource::Entry(&entry))?;

    let stored = state
        .files
        .store(UploadKind::for_attachment(kind), &principal.user_id, upload)
        .await?;
    let attachment = Attachment {
        id: Uuid::new_v4().to_string(),
        kind,
        url: stored.url.clone(),
        filename: stored.filename,
        size: stored.size,
    };

    let entry_id = entry.id.clone();
    let appended = attachment.clone();
    if let Err(e) = db_call(state, move |db| db.append_attachment(&entry_id, &appended, Utc::now())).await {
        if let Err(cleanup) = state.files.delete(&stored.url).await {
            warn!("Failed to remove orphaned attachment {}: {}", stored.url, cleanup);
        }
        return Err(e);
    }

    let entry = load_entry(state, entry.id).await?;
    view(state, entry, principal).await
}

/// The stored file is deleted first; if that fails the attachment stays.
pub async fn remove_attachment(
    state: &AppState,
    principal: &Principal,
    id: String,
    attachment_id: String,
) -> ApiResult<EntryResponse> {
    let entry = load_entry(state, id).await?;
    authorize(principal, Action::RemoveAttachment, Resource::Entry(&entry))?;

    let attachment = entry
        .attachments
        .iter()
        .find(|a| a.id == attachment_id)
        .ok_or_else(|| ApiError::not_found("Attachment"))?;
    state.files.delete(&attachment.url).await?;

    let entry_id = entry.id.clone();
    db_call(state, move |db| db.remove_attachment(&entry_id, &attachment_id, Utc::now())).await?;

    let entry = load_entry(state, entry.id).await?;
    view(state, entry, principal).await
}

/// One reaction per member; reacting again replaces the previous kind.
pub async fn react(
    state: &AppState,
    principal: &Principal,
    id: String,
    kind: ReactionKind,
) -> ApiResult<EntryResponse> {
    let entry = load_entry(state, id).await?;
    authorize(principal, Action::React, Resource::Entry(&entry))?;

    let reaction = Reaction {
        user_id: principal.user_id.clone(),
        kind,
        created_at: Utc::now(),
    };
    let entry_id = entry.id.clone();
    db_call(state, move |db| db.upsert_reaction(&entry_id, &reaction)).await?;

    if !entry.is_writer(&principal.user_id) {
        let writer_id = entry.written_by.clone();
        match db_call(state, move |db| db.get_user(&writer_id)).await {
            Ok(Some(writer)) => notify::emit(state, vec![notify::reaction(&writer, &entry)]).await,
            Ok(None) => {}
            Err(e) => warn!("Skipping reaction notice for entry {}: {}", entry.id, e),
        }
    }

    let entry = load_entry(state, entry.id).await?;
    view(state, entry, principal).await
}

pub async fn unreact(state: &AppState, principal: &Principal, id: String) -> ApiResult<EntryResponse> {
    let entry = load_entry(state, id).await?;
    authorize(principal, Action::React, Resource::Entry(&entry))?;

    let (entry_id, user_id) = (entry.id.clone(), principal.user_id.clone());
    db_call(state, move |db| db.remove_reaction(&entry_id, &user_id)).await?;

    let entry = load_entry(state, entry.id).await?;
    view(state, entry, principal).await
}

/// Flags the entry for moderation. A later report replaces an earlier one.
pub async fn report(state: &AppState, principal: &Principal, id: String, reason: String) -> ApiResult<()> {
    let entry = load_entry(state, id).await?;
    authorize(principal, Action::Report, Resource::Entry(&entry))?;

    let now = Utc::now();
    let moderation = Moderation {
        is_reported: true,
        report_reason: Some(reason.trim().to_string()),
        reported_by: Some(principal.user_id.clone()),
        reported_at: Some(now),
    };
    let entry_id = entry.id.clone();
    db_call(state, move |db| db.set_moderation(&entry_id, &moderation, now)).await?;
    info!("Entry {} reported by {}", entry.id, principal.user_id);
    Ok(())
}

pub fn attachment_kind(segment: &str) -> ApiResult<AttachmentKind> {
    match segment {
        "image" => Ok(AttachmentKind::Image),
        "video" => Ok(AttachmentKind::Video),
        "audio" => Ok(AttachmentKind::Audio),
        other => Err(ApiError::BadRequest(format!("Unknown attachment type '{other}'"))),
    }
}

// -- Handlers --

async fn handle_create(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    ValidJson(req): ValidJson<CreateEntryRequest>,
) -> ApiResult<impl IntoResponse> {
    Ok(created("Entry created successfully", create_entry(&state, &principal, req).await?))
}

async fn handle_for_me(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> ApiResult<impl IntoResponse> {
    Ok(ok("Entries retrieved", entries_for_me(&state, &principal).await?))
}

async fn handle_by_me(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> ApiResult<impl IntoResponse> {
    Ok(ok("Entries retrieved", entries_by_me(&state, &principal).await?))
}

async fn handle_reported(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    ApiQuery(scope): ApiQuery<CollegeScopeQuery>,
) -> ApiResult<impl IntoResponse> {
    Ok(ok("Reported entries retrieved", reported_entries(&state, &principal, scope).await?))
}

async fn handle_get(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(ok("Entry retrieved", get_entry(&state, &principal, id).await?))
}

async fn handle_update(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
    ValidJson(req): ValidJson<UpdateEntryRequest>,
) -> ApiResult<impl IntoResponse> {
    Ok(ok("Entry updated successfully", update_entry(&state, &principal, id, req).await?))
}

async fn handle_delete(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    delete_entry(&state, &principal, id).await?;
    Ok(done("Entry deleted successfully"))
}

/// `{target}` is the media kind on POST and the attachment id on DELETE.
async fn handle_add_attachment(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path((id, target)): Path<(String, String)>,
    FileUpload(upload): FileUpload,
) -> ApiResult<impl IntoResponse> {
    let kind = attachment_kind(&target)?;
    let view = add_attachment(&state, &principal, id, kind, upload).await?;
    Ok(created("Attachment added successfully", view))
}

async fn handle_remove_attachment(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path((id, target)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let view = remove_attachment(&state, &principal, id, target).await?;
    Ok(ok("Attachment removed successfully", view))
}

async fn handle_react(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
    ValidJson(req): ValidJson<ReactionRequest>,
) -> ApiResult<impl IntoResponse> {
    Ok(ok("Reaction added", react(&state, &principal, id, req.kind).await?))
}

async fn handle_unreact(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(ok("Reaction removed", unreact(&state, &principal, id).await?))
}

async fn handle_report(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
    ValidJson(req): ValidJson<ReportRequest>,
) -> ApiResult<impl IntoResponse> {
    report(&state, &principal, id, req.reason).await?;
    Ok(done("Entry reported successfully"))
}

/// `/slambook/*`
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/entries", post(handle_create))
        .route("/entries/for-me", get(handle_for_me))
        .route("/entries/by-me", get(handle_by_me))
        .route("/entries/reported", get(handle_reported))
        .route(
            "/entries/{id}",
            get(handle_get).put(handle_update).delete(handle_delete),
        )
        .route(
            "/entries/{id}/attachments/{target}",
            post(handle_add_attachment).delete(handle_remove_attachment),
        )
        .route("/entries/{id}/reactions", post(handle_react).delete(handle_unreact))
        .route("/entries/{id}/report", post(handle_report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use slambook_types::models::{JoinRequest, Profile, Role, SlamBookSettings};

    fn user(id: &str, first: &str) -> User {
        let now = Utc::now();
        User {
            id: id.into(),
            college_id: Some("c1".into()),
            email: format!("{id}@x.edu"),
            password_hash: String::new(),
            role: Role::Student,
            profile: Profile {
                first_name: first.into(),
                ..Profile::default()
            },
            slambook_settings: SlamBookSettings::default(),
            join_request: JoinRequest::pre_approved(now),
            email_verified: false,
            is_active: true,
            created_at: now,
            updated_at: now,
            last_login_at: None,
        }
    }

    fn anonymous_entry() -> Entry {
        let now = Utc::now();
        Entry {
            id: "e1".into(),
            college_id: "c1".into(),
            written_for: "target".into(),
            written_by: "writer".into(),
            is_anonymous: true,
            responses: BTreeMap::new(),
            ratings: BTreeMap::new(),
            attachments: Vec::new(),
            reactions: Vec::new(),
            moderation: Moderation::default(),
            visibility: Visibility::Public,
            created_at: now,
            updated_at: now,
        }
    }

    fn viewer(id: &str, role: Role) -> Principal {
        Principal {
            user_id: id.into(),
            role,
            college_id: Some("c1".into()),
        }
    }

    #[test]
    fn anonymous_author_is_hidden_from_the_target() {
        let users = HashMap::from([
            ("writer".to_string(), user("writer", "Wren")),
            ("target".to_string(), user("target", "Tara")),
        ]);
        let entry = anonymous_entry();

        let seen_by_target = entry_view(&entry, &users, &viewer("target", Role::Student));
        assert!(seen_by_target.written_by.is_none());
        assert_eq!(seen_by_target.written_by_user, Some(UserBasicInfo::anonymous()));
        assert_eq!(seen_by_target.written_for_user.unwrap().first_name, "Tara");
        assert!(seen_by_target.moderation.is_none());

        let seen_by_writer = entry_view(&entry, &users, &viewer("writer", Role::Student));
        assert_eq!(seen_by_writer.written_by.as_deref(), Some("writer"));

        let seen_by_admin = entry_view(&entry, &users, &viewer("adm", Role::CollegeAdmin));
        assert_eq!(seen_by_admin.written_by_user.unwrap().first_name, "Wren");
        assert!(seen_by_admin.moderation.is_some());
    }

    #[test]
    fn attachment_segments_map_to_kinds() {
        assert_eq!(attachment_kind("video").unwrap(), AttachmentKind::Video);
        assert!(attachment_kind("pdf").is_err());
    }
}
