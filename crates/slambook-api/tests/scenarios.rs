use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use chrono::Utc;
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

use slambook_api::config::Config;
use slambook_api::error::ApiError;
use slambook_api::middleware::Principal;
use slambook_api::state::{AppState, AppStateInner};
use slambook_api::storage::{DiskStorage, FileStore, StorageError, StoredFile, Upload, UploadKind};
use slambook_api::{auth, bootstrap, colleges, entries, notifications, templates, users};
use slambook_db::Database;
use slambook_types::api::{
    CollegeScopeQuery, CollegeSettingsRequest, CreateCollegeRequest, CreateEntryRequest,
    LoginRequest, QuestionRequest, RegisterRequest, RejectJoinRequest, SlamBookSettingsRequest,
    TemplateRequest, UpdateEntryRequest, UserResponse,
};
use slambook_types::models::{
    AttachmentKind, JoinRequest, JoinStatus, NotificationKind, Profile, QuestionKind, ReactionKind,
    Role, SlamBookSettings, SubscriptionPlan, User, Visibility,
};

/// Disk storage whose first `failures` deletions report an I/O error.
struct FlakyStore {
    inner: DiskStorage,
    failures: AtomicUsize,
    deletes: AtomicUsize,
}

#[async_trait]
impl FileStore for FlakyStore {
    async fn store(&self, kind: UploadKind, owner_id: &str, upload: Upload) -> Result<StoredFile, StorageError> {
        self.inner.store(kind, owner_id, upload).await
    }

    async fn delete(&self, url: &str) -> Result<(), StorageError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(StorageError::Io(std::io::Error::other("disk unavailable")));
        }
        self.inner.delete(url).await
    }
}

fn temp_dir() -> PathBuf {
    std::env::temp_dir().join(format!("slambook-scenarios-{}", Uuid::new_v4()))
}

fn harness_with(files: Arc<dyn FileStore>) -> AppState {
    let db = Database::open_in_memory().unwrap();
    let config = Config {
        upload_dir: temp_dir(),
        ..Config::default()
    };
    bootstrap::run(&db, &config).unwrap();
    AppStateInner::with_files(db, config, files)
}

fn harness() -> AppState {
    harness_with(Arc::new(DiskStorage::new(temp_dir(), 1024 * 1024)))
}

fn flaky_harness(failures: usize) -> (AppState, Arc<FlakyStore>) {
    let store = Arc::new(FlakyStore {
        inner: DiskStorage::new(temp_dir(), 1024 * 1024),
        failures: AtomicUsize::new(failures),
        deletes: AtomicUsize::new(0),
    });
    (harness_with(store.clone()), store)
}

fn root() -> Principal {
    Principal {
        user_id: "root".into(),
        role: Role::SuperAdmin,
        college_id: None,
    }
}

fn principal_of(user: &UserResponse) -> Principal {
    Principal {
        user_id: user.id.clone(),
        role: user.role,
        college_id: user.college_id.clone(),
    }
}

/// Creates a college and returns its id, code and admin.
async fn open_college(state: &AppState, name: &str, email: &str) -> (String, String, Principal) {
    let college = colleges::create_college(
        state,
        &root(),
        CreateCollegeRequest {
            name: name.into(),
            email: email.into(),
            phone: "555-0100".into(),
            address: Default::default(),
            subscription_plan: SubscriptionPlan::Basic,
            subscription_expiry: None,
            max_users: None,
        },
    )
    .await
    .unwrap();

    let admin = state.db.college_admins(&college.id).unwrap().remove(0);
    let principal = Principal {
        user_id: admin.id,
        role: Role::CollegeAdmin,
        college_id: Some(college.id.clone()),
    };
    (college.id, college.college_code, principal)
}

/// Inserts an approved student without going through password hashing.
fn seed_student(state: &AppState, college_id: &str, first_name: &str) -> Principal {
    let now = Utc::now();
    let user = User {
        id: Uuid::new_v4().to_string(),
        college_id: Some(college_id.into()),
        email: format!("{}@campus.edu", first_name.to_lowercase()),
        password_hash: String::new(),
        role: Role::Student,
        profile: Profile {
            first_name: first_name.into(),
            last_name: "Student".into(),
            ..Profile::default()
        },
        slambook_settings: SlamBookSettings::default(),
        join_request: JoinRequest::pre_approved(now),
        email_verified: false,
        is_active: true,
        created_at: now,
        updated_at: now,
        last_login_at: None,
    };
    state.db.insert_user(&user).unwrap();
    Principal {
        user_id: user.id,
        role: Role::Student,
        college_id: Some(college_id.into()),
    }
}

fn entry_for(target: &Principal, anonymous: bool) -> CreateEntryRequest {
    CreateEntryRequest {
        written_for: target.user_id.clone(),
        is_anonymous: Some(anonymous),
        responses: BTreeMap::from([("nickname".to_string(), "Sunny".to_string())]),
        ratings: None,
        visibility: None,
    }
}

fn png() -> Upload {
    Upload {
        content_type: Some("image/png".into()),
        original_name: Some("photo.png".into()),
        bytes: b"\x89PNG\r\n\x1a\n".to_vec(),
    }
}

fn template_request(name: &str, is_default: bool) -> TemplateRequest {
    TemplateRequest {
        name: name.into(),
        description: None,
        questions: vec![QuestionRequest {
            text: "Favourite canteen snack?".into(),
            kind: QuestionKind::Text { max_length: Some(100) },
            required: Some(true),
            placeholder: None,
            order: None,
        }],
        is_default: Some(is_default),
    }
}

#[tokio::test]
async fn registration_waits_for_approval_then_logs_in() {
    let state = harness();
    let (_, code, admin) = open_college(&state, "Riverside College", "office@riverside.edu").await;

    let registered = auth::register(
        &state,
        RegisterRequest {
            college_code: code.to_lowercase(),
            email: "Asha@Riverside.edu".into(),
            password: "hunter2hunter2".into(),
            first_name: "Asha".into(),
            last_name: "Rao".into(),
            course: Some("Physics".into()),
            batch: Some("2026".into()),
            roll_number: None,
        },
    )
    .await
    .unwrap();
    assert!(registered.access_token.is_none());
    assert_eq!(registered.user.join_request_status, JoinStatus::Pending);
    assert_eq!(registered.user.email, "asha@riverside.edu");

    let login = || LoginRequest {
        email: "asha@riverside.edu".into(),
        password: "hunter2hunter2".into(),
        college_code: Some(code.clone()),
    };
    let err = auth::login(&state, login()).await.unwrap_err();
    assert!(matches!(err, ApiError::Unauthorized(ref m) if m == "Account not approved yet"));

    let inbox = notifications::list(&state, &admin, false).await.unwrap();
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].kind, NotificationKind::NewJoinRequest);

    let pending = colleges::join_requests(&state, &admin, CollegeScopeQuery::default())
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);

    let approved = colleges::approve_join(
        &state,
        &admin,
        CollegeScopeQuery::default(),
        registered.user.id.clone(),
    )
    .await
    .unwrap();
    assert_eq!(approved.join_request_status, JoinStatus::Approved);

    // A second decision on the same request loses.
    let again = colleges::approve_join(
        &state,
        &admin,
        CollegeScopeQuery::default(),
        registered.user.id.clone(),
    )
    .await
    .unwrap_err();
    assert!(matches!(again, ApiError::Conflict(_)));

    let session = auth::login(&state, login()).await.unwrap();
    assert!(session.access_token.is_some());
    assert_eq!(session.user.college_code.as_deref(), Some(code.as_str()));

    let student = principal_of(&session.user);
    let inbox = notifications::list(&state, &student, true).await.unwrap();
    assert_eq!(inbox[0].kind, NotificationKind::JoinApproved);
}

#[tokio::test]
async fn colleges_without_approval_hand_out_tokens_on_registration() {
    let state = harness();
    let (_, code, admin) = open_college(&state, "Hilltop Institute", "desk@hilltop.edu").await;
    colleges::update_settings(
        &state,
        &admin,
        CollegeScopeQuery::default(),
        CollegeSettingsRequest {
            require_approval: Some(false),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    let registered = auth::register(
        &state,
        RegisterRequest {
            college_code: code,
            email: "ben@hilltop.edu".into(),
            password: "longenough".into(),
            first_name: "Ben".into(),
            last_name: "Okafor".into(),
            course: None,
            batch: None,
            roll_number: None,
        },
    )
    .await
    .unwrap();
    assert!(registered.access_token.is_some());
    assert!(notifications::list(&state, &admin, false).await.unwrap().is_empty());
}

#[tokio::test]
async fn one_entry_per_writer_and_target() {
    let state = harness();
    let (college_id, _, _) = open_college(&state, "Lakeside College", "info@lakeside.edu").await;
    let asha = seed_student(&state, &college_id, "Asha");
    let ben = seed_student(&state, &college_id, "Ben");

    let entry = entries::create_entry(&state, &asha, entry_for(&ben, false)).await.unwrap();
    assert_eq!(entry.written_by.as_deref(), Some(asha.user_id.as_str()));

    let dup = entries::create_entry(&state, &asha, entry_for(&ben, true)).await.unwrap_err();
    assert!(
        matches!(dup, ApiError::BadRequest(ref m) if m == "You have already written in this person's slam book")
    );

    let own = entries::create_entry(&state, &asha, entry_for(&asha, false)).await.unwrap_err();
    assert!(matches!(own, ApiError::BadRequest(_)));

    // The other direction is a different entry.
    entries::create_entry(&state, &ben, entry_for(&asha, false)).await.unwrap();

    let inbox = notifications::list(&state, &ben, false).await.unwrap();
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].kind, NotificationKind::NewEntry);
    assert_eq!(entries::entries_for_me(&state, &ben).await.unwrap().len(), 1);
    assert_eq!(entries::entries_by_me(&state, &asha).await.unwrap().len(), 1);
}

#[tokio::test]
async fn anonymous_entries_respect_member_settings() {
    let state = harness();
    let (college_id, _, _) = open_college(&state, "Meadow College", "hi@meadow.edu").await;
    let asha = seed_student(&state, &college_id, "Asha");
    let ben = seed_student(&state, &college_id, "Ben");

    users::update_slambook_settings(
        &state,
        &ben,
        SlamBookSettingsRequest {
            allow_anonymous: Some(false),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    let err = entries::create_entry(&state, &asha, entry_for(&ben, true)).await.unwrap_err();
    assert!(matches!(err, ApiError::BadRequest(ref m) if m == "This user does not allow anonymous entries"));

    let plain = entries::create_entry(&state, &asha, entry_for(&ben, false)).await;
    assert!(plain.is_ok());
}

#[tokio::test]
async fn reacting_again_replaces_the_reaction() {
    let state = harness();
    let (college_id, _, _) = open_college(&state, "Harbor College", "mail@harbor.edu").await;
    let asha = seed_student(&state, &college_id, "Asha");
    let ben = seed_student(&state, &college_id, "Ben");

    let entry = entries::create_entry(&state, &asha, entry_for(&ben, false)).await.unwrap();

    let loved = entries::react(&state, &ben, entry.id.clone(), ReactionKind::Love).await.unwrap();
    assert_eq!(loved.reactions.len(), 1);
    assert_eq!(loved.reactions[0].kind, ReactionKind::Love);

    let fired = entries::react(&state, &ben, entry.id.clone(), ReactionKind::Fire).await.unwrap();
    assert_eq!(fired.reactions.len(), 1);
    assert_eq!(fired.reactions[0].kind, ReactionKind::Fire);
    assert_eq!(fired.reactions[0].user_id, ben.user_id);

    // Reacting to your own entry does not notify you.
    entries::react(&state, &asha, entry.id.clone(), ReactionKind::Clap).await.unwrap();
    let count = notifications::unread_count(&state, &asha).await.unwrap();
    assert_eq!(count.count, 2);

    let cleared = entries::unreact(&state, &ben, entry.id.clone()).await.unwrap();
    assert_eq!(cleared.reactions.len(), 1);
    assert_eq!(cleared.reactions[0].user_id, asha.user_id);
}

#[tokio::test]
async fn deleting_an_entry_survives_a_failed_file_delete() {
    let (state, store) = flaky_harness(1);
    let (college_id, _, _) = open_college(&state, "Summit College", "contact@summit.edu").await;
    let asha = seed_student(&state, &college_id, "Asha");
    let ben = seed_student(&state, &college_id, "Ben");

    let entry = entries::create_entry(&state, &asha, entry_for(&ben, false)).await.unwrap();
    entries::add_attachment(&state, &asha, entry.id.clone(), AttachmentKind::Image, png())
        .await
        .unwrap();
    let with_two = entries::add_attachment(&state, &asha, entry.id.clone(), AttachmentKind::Image, png())
        .await
        .unwrap();
    assert_eq!(with_two.attachments.len(), 2);

    // Only the writer manages attachments.
    let denied = entries::add_attachment(&state, &ben, entry.id.clone(), AttachmentKind::Image, png())
        .await
        .unwrap_err();
    assert!(matches!(denied, ApiError::Forbidden(_)));

    entries::delete_entry(&state, &asha, entry.id.clone()).await.unwrap();
    assert_eq!(store.deletes.load(Ordering::SeqCst), 2);

    let gone = entries::get_entry(&state, &asha, entry.id.clone()).await.unwrap_err();
    assert!(matches!(gone, ApiError::NotFound(_)));
}

#[tokio::test]
async fn tenants_are_isolated_except_for_the_super_admin() {
    let state = harness();
    let (north, _, _) = open_college(&state, "North College", "north@college.edu").await;
    let (south, _, _) = open_college(&state, "South College", "south@college.edu").await;
    let asha = seed_student(&state, &north, "Asha");
    let ben = seed_student(&state, &north, "Ben");
    let chen = seed_student(&state, &south, "Chen");

    let entry = entries::create_entry(&state, &asha, entry_for(&ben, false)).await.unwrap();

    let err = entries::get_entry(&state, &chen, entry.id.clone()).await.unwrap_err();
    assert!(matches!(err, ApiError::Forbidden(_)));

    let err = entries::create_entry(&state, &chen, entry_for(&asha, false)).await.unwrap_err();
    assert!(matches!(err, ApiError::Forbidden(ref m) if m == "Cannot write for user from different college"));

    let err = users::get_user(&state, &chen, asha.user_id.clone()).await.unwrap_err();
    assert!(matches!(err, ApiError::Forbidden(_)));

    let seen = entries::get_entry(&state, &root(), entry.id.clone()).await.unwrap();
    assert_eq!(seen.college_id, north);

    // Notifications stay with their recipient.
    let notice = notifications::list(&state, &ben, false).await.unwrap().remove(0);
    let err = notifications::mark_read(&state, &asha, notice.id.clone()).await.unwrap_err();
    assert!(matches!(err, ApiError::Forbidden(_)));
    notifications::mark_read(&state, &ben, notice.id).await.unwrap();
    assert_eq!(notifications::unread_count(&state, &ben).await.unwrap().count, 0);
}

#[tokio::test]
async fn default_template_swaps_and_cannot_be_deleted() {
    let state = harness();
    let (college_id, _, admin) = open_college(&state, "Valley College", "admin@valley.edu").await;
    let asha = seed_student(&state, &college_id, "Asha");

    // With no college default the system template applies.
    let fallback = templates::default_template(&state, &asha, CollegeScopeQuery::default())
        .await
        .unwrap();
    assert_eq!(fallback.name, "Classic Slam Book");
    assert!(fallback.college_id.is_none());

    let first = templates::create_template(&state, &admin, template_request("Farewell", true))
        .await
        .unwrap();
    let second = templates::create_template(&state, &admin, template_request("Freshers", true))
        .await
        .unwrap();
    let first_now = templates::get_template(&state, &asha, first.id.clone()).await.unwrap();
    assert!(!first_now.is_default);

    templates::set_default(&state, &admin, first.id.clone()).await.unwrap();
    let current = templates::default_template(&state, &asha, CollegeScopeQuery::default())
        .await
        .unwrap();
    assert_eq!(current.id, first.id);
    assert_eq!(current.created_by_name.as_deref(), Some("Admin Valley College"));

    let err = templates::delete_template(&state, &admin, first.id.clone()).await.unwrap_err();
    assert!(matches!(err, ApiError::BadRequest(ref m) if m.starts_with("Cannot delete default template")));
    templates::delete_template(&state, &admin, second.id).await.unwrap();

    // Students read templates but cannot manage them.
    let err = templates::create_template(&state, &asha, template_request("Mine", false))
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Forbidden(_)));

    let available = templates::available_templates(&state, &asha, CollegeScopeQuery::default())
        .await
        .unwrap();
    assert_eq!(available.len(), 2);

    let copy = templates::clone_template(&state, &admin, fallback.id).await.unwrap();
    assert_eq!(copy.name, "Classic Slam Book (Copy)");
    assert_eq!(copy.college_id.as_deref(), Some(college_id.as_str()));
    assert!(!copy.is_default);
}

/// Registers a member who still waits for a join decision.
async fn register_pending(state: &AppState, code: &str, first_name: &str) -> String {
    let registered = auth::register(
        state,
        RegisterRequest {
            college_code: code.into(),
            email: format!("{}@applicants.edu", first_name.to_lowercase()),
            password: "hunter2hunter2".into(),
            first_name: first_name.into(),
            last_name: "Applicant".into(),
            course: None,
            batch: None,
            roll_number: None,
        },
    )
    .await
    .unwrap();
    registered.user.id
}

#[tokio::test]
async fn join_decisions_are_final() {
    let state = harness();
    let (_, code, admin) = open_college(&state, "Bayview College", "office@bayview.edu").await;
    let rejected = register_pending(&state, &code, "Dev").await;
    let approved = register_pending(&state, &code, "Esi").await;
    let scope = CollegeScopeQuery::default;

    let user = colleges::reject_join(
        &state,
        &admin,
        scope(),
        rejected.clone(),
        RejectJoinRequest {
            reason: Some("Not enrolled".into()),
        },
    )
    .await
    .unwrap();
    assert_eq!(user.join_request_status, JoinStatus::Rejected);

    let err = colleges::approve_join(&state, &admin, scope(), rejected).await.unwrap_err();
    assert!(matches!(err, ApiError::Conflict(_)));

    colleges::approve_join(&state, &admin, scope(), approved.clone()).await.unwrap();
    let err = colleges::reject_join(&state, &admin, scope(), approved, RejectJoinRequest { reason: None })
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Conflict(_)));
}

#[tokio::test]
async fn partial_updates_keep_untouched_fields() {
    let state = harness();
    let (college_id, _, _) = open_college(&state, "Cedar College", "hello@cedar.edu").await;
    let asha = seed_student(&state, &college_id, "Asha");
    let ben = seed_student(&state, &college_id, "Ben");

    let mut req = entry_for(&ben, false);
    req.ratings = Some(BTreeMap::from([("kindness".to_string(), 5)]));
    let entry = entries::create_entry(&state, &asha, req).await.unwrap();

    let updated = entries::update_entry(
        &state,
        &asha,
        entry.id.clone(),
        UpdateEntryRequest {
            responses: None,
            ratings: None,
            visibility: Some(Visibility::Public),
        },
    )
    .await
    .unwrap();
    assert_eq!(updated.visibility, Visibility::Public);
    assert_eq!(updated.responses, entry.responses);
    assert_eq!(updated.ratings, entry.ratings);

    let rewritten = entries::update_entry(
        &state,
        &asha,
        entry.id.clone(),
        UpdateEntryRequest {
            responses: Some(BTreeMap::from([("nickname".to_string(), "Sunshine".to_string())])),
            ratings: None,
            visibility: None,
        },
    )
    .await
    .unwrap();
    assert_eq!(rewritten.responses["nickname"], "Sunshine");
    assert_eq!(rewritten.ratings["kindness"], 5);
    assert_eq!(rewritten.visibility, Visibility::Public);

    // Only the writer edits.
    let err = entries::update_entry(
        &state,
        &ben,
        entry.id,
        UpdateEntryRequest {
            responses: None,
            ratings: None,
            visibility: None,
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ApiError::Forbidden(_)));
}

#[tokio::test]
async fn a_later_report_replaces_the_earlier_one() {
    let state = harness();
    let (college_id, _, admin) = open_college(&state, "Pine College", "desk@pine.edu").await;
    let asha = seed_student(&state, &college_id, "Asha");
    let ben = seed_student(&state, &college_id, "Ben");

    let entry = entries::create_entry(&state, &asha, entry_for(&ben, false)).await.unwrap();
    entries::report(&state, &ben, entry.id.clone(), "Rude".into()).await.unwrap();
    entries::report(&state, &asha, entry.id.clone(), "  Posted by mistake ".into())
        .await
        .unwrap();

    let reported = entries::reported_entries(&state, &admin, CollegeScopeQuery::default())
        .await
        .unwrap();
    assert_eq!(reported.len(), 1);
    let moderation = reported[0].moderation.clone().unwrap();
    assert!(moderation.is_reported);
    assert_eq!(moderation.report_reason.as_deref(), Some("Posted by mistake"));
    assert_eq!(moderation.reported_by.as_deref(), Some(asha.user_id.as_str()));

    // Members never see the moderation block.
    let seen = entries::get_entry(&state, &ben, entry.id).await.unwrap();
    assert!(seen.moderation.is_none());
}

#[tokio::test]
async fn removing_an_attachment_keeps_it_when_the_file_delete_fails() {
    let (state, store) = flaky_harness(1);
    let (college_id, _, _) = open_college(&state, "Willow College", "post@willow.edu").await;
    let asha = seed_student(&state, &college_id, "Asha");
    let ben = seed_student(&state, &college_id, "Ben");

    let entry = entries::create_entry(&state, &asha, entry_for(&ben, false)).await.unwrap();
    let with_one = entries::add_attachment(&state, &asha, entry.id.clone(), AttachmentKind::Image, png())
        .await
        .unwrap();
    let attachment_id = with_one.attachments[0].id.clone();

    let err = entries::remove_attachment(&state, &asha, entry.id.clone(), attachment_id.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Internal(_)));
    let kept = entries::get_entry(&state, &asha, entry.id.clone()).await.unwrap();
    assert_eq!(kept.attachments.len(), 1);

    let removed = entries::remove_attachment(&state, &asha, entry.id.clone(), attachment_id)
        .await
        .unwrap();
    assert!(removed.attachments.is_empty());
    assert_eq!(store.deletes.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn a_deactivated_college_default_still_resolves() {
    let state = harness();
    let (college_id, _, admin) = open_college(&state, "Birch College", "team@birch.edu").await;
    let asha = seed_student(&state, &college_id, "Asha");

    let own = templates::create_template(&state, &admin, template_request("Reunion", true))
        .await
        .unwrap();
    let paused = templates::set_active(&state, &admin, own.id.clone(), false).await.unwrap();
    assert!(paused.is_default);
    assert!(!paused.is_active);

    let resolved = templates::default_template(&state, &asha, CollegeScopeQuery::default())
        .await
        .unwrap();
    assert_eq!(resolved.id, own.id);
    assert_eq!(resolved.college_id.as_deref(), Some(college_id.as_str()));
}

// -- Router --

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_is_public() {
    let app = slambook_api::router(harness());
    let response = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn protected_routes_need_a_bearer_token() {
    let app = slambook_api::router(harness());
    let response = app
        .oneshot(Request::get("/api/v1/users/me").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn invalid_registration_reports_field_errors() {
    let app = slambook_api::router(harness());
    let payload = serde_json::json!({
        "collegeCode": "ABCD1234",
        "email": "not-an-email",
        "password": "short",
        "firstName": "Asha",
        "lastName": "Rao"
    });
    let response = app
        .oneshot(
            Request::post("/api/v1/auth/register")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(payload.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = body_json(response).await;
    assert_eq!(body["success"], false);
    assert!(body["data"]["email"].is_string());
    assert!(body["data"]["password"].is_string());
}

async fn root_token(state: &AppState) -> String {
    let session = auth::login(
        state,
        LoginRequest {
            email: "admin@slambook.com".into(),
            password: "Admin@123".into(),
            college_code: None,
        },
    )
    .await
    .unwrap();
    session.access_token.unwrap()
}

#[tokio::test]
async fn super_admin_logs_in_and_reads_their_profile() {
    let state = harness();
    let token = root_token(&state).await;

    let app = slambook_api::router(state);
    let response = app
        .oneshot(
            Request::get("/api/v1/users/me")
                .header(header::AUTHORIZATION, format!("Bearer {token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"]["role"], "SUPER_ADMIN");
}

#[tokio::test]
async fn unknown_routes_answer_with_the_envelope() {
    let app = slambook_api::router(harness());
    let response = app
        .oneshot(Request::get("/api/v1/nowhere").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["message"], "Resource not found");
}

#[tokio::test]
async fn malformed_query_and_upload_answer_with_the_envelope() {
    let state = harness();
    let token = root_token(&state).await;
    let app = slambook_api::router(state);

    let response = app
        .clone()
        .oneshot(
            Request::delete("/api/v1/files")
                .header(header::AUTHORIZATION, format!("Bearer {token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["success"], false);
    assert!(body["message"].is_string());

    let response = app
        .oneshot(
            Request::post("/api/v1/files/profile-picture")
                .header(header::AUTHORIZATION, format!("Bearer {token}"))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["success"], false);
}
