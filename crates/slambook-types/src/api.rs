use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{
    Address, Attachment, College, CollegeSettings, CollegeStats, JoinStatus, Moderation,
    Profile, QuestionKind, ReactionKind, Role, SlamBookSettings, Subscription, SubscriptionPlan,
    Template, User, Visibility,
};

// -- Envelope --

/// Every response body, success or failure, has this shape.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub message: String,
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
        }
    }
}

impl ApiResponse<()> {
    pub fn done(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: None,
        }
    }
}

// -- Field validation --

/// Field name -> human readable problem.
pub type FieldErrors = BTreeMap<String, String>;

/// Shape checks on request bodies that serde alone cannot express.
pub trait Validate {
    fn validate(&self) -> Result<(), FieldErrors>;
}

fn require_text(errors: &mut FieldErrors, field: &str, value: &str, message: &str) {
    if value.trim().is_empty() {
        errors.insert(field.to_string(), message.to_string());
    }
}

fn require_email(errors: &mut FieldErrors, field: &str, value: &str) {
    let valid = value
        .split_once('@')
        .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.') && !domain.ends_with('.'));
    if !valid {
        errors.insert(field.to_string(), "Invalid email format".to_string());
    }
}

fn finish(errors: FieldErrors) -> Result<(), FieldErrors> {
    if errors.is_empty() { Ok(()) } else { Err(errors) }
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    /// Absent for super admin logins.
    pub college_code: Option<String>,
}

impl Validate for LoginRequest {
    fn validate(&self) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::new();
        require_text(&mut errors, "email", &self.email, "Email is required");
        require_text(&mut errors, "password", &self.password, "Password is required");
        finish(errors)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub college_code: String,
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub course: Option<String>,
    pub batch: Option<String>,
    pub roll_number: Option<String>,
}

impl Validate for RegisterRequest {
    fn validate(&self) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::new();
        require_text(&mut errors, "collegeCode", &self.college_code, "College code is required");
        require_email(&mut errors, "email", &self.email);
        if self.password.len() < 8 {
            errors.insert(
                "password".into(),
                "Password must be at least 8 characters long".into(),
            );
        }
        require_text(&mut errors, "firstName", &self.first_name, "First name is required");
        require_text(&mut errors, "lastName", &self.last_name, "Last name is required");
        finish(errors)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshTokenRequest {
    pub refresh_token: String,
}

impl Validate for RefreshTokenRequest {
    fn validate(&self) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::new();
        require_text(&mut errors, "refreshToken", &self.refresh_token, "Refresh token is required");
        finish(errors)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForgotPasswordRequest {
    pub email: String,
}

impl Validate for ForgotPasswordRequest {
    fn validate(&self) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::new();
        require_email(&mut errors, "email", &self.email);
        finish(errors)
    }
}

#[derive(Debug, Deserialize)]
pub struct VerifyEmailQuery {
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    /// Token fields are absent while a registration awaits approval.
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub token_type: Option<String>,
    pub expires_in: Option<u64>,
    pub user: UserResponse,
}

// -- Users --

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub id: String,
    pub email: String,
    pub role: Role,
    pub college_id: Option<String>,
    pub college_code: Option<String>,
    pub college_name: Option<String>,
    pub profile: Profile,
    pub slam_book_settings: SlamBookSettings,
    pub join_request_status: JoinStatus,
    pub email_verified: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
}

impl From<&User> for UserResponse {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            email: user.email.clone(),
            role: user.role,
            college_id: user.college_id.clone(),
            college_code: None,
            college_name: None,
            profile: user.profile.clone(),
            slam_book_settings: user.slambook_settings.clone(),
            join_request_status: user.join_request.status,
            email_verified: user.email_verified,
            is_active: user.is_active,
            created_at: user.created_at,
            last_login_at: user.last_login_at,
        }
    }
}

/// The slice of a member shown next to entries and templates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserBasicInfo {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub nickname: Option<String>,
    pub profile_picture: Option<String>,
    pub course: Option<String>,
    pub batch: Option<String>,
}

impl UserBasicInfo {
    pub fn anonymous() -> Self {
        Self {
            id: "anonymous".into(),
            first_name: "Anonymous".into(),
            last_name: String::new(),
            nickname: None,
            profile_picture: None,
            course: None,
            batch: None,
        }
    }
}

impl From<&User> for UserBasicInfo {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            first_name: user.profile.first_name.clone(),
            last_name: user.profile.last_name.clone(),
            nickname: user.profile.nickname.clone(),
            profile_picture: user.profile.profile_picture.clone(),
            course: user.profile.course.clone(),
            batch: user.profile.batch.clone(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfileRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub nickname: Option<String>,
    pub course: Option<String>,
    pub batch: Option<String>,
    pub roll_number: Option<String>,
    pub bio: Option<String>,
    pub interests: Option<Vec<String>>,
    pub social_links: Option<BTreeMap<String, String>>,
}

impl Validate for UpdateProfileRequest {
    fn validate(&self) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::new();
        if let Some(first) = &self.first_name {
            require_text(&mut errors, "firstName", first, "First name cannot be blank");
        }
        if let Some(last) = &self.last_name {
            require_text(&mut errors, "lastName", last, "Last name cannot be blank");
        }
        if self.bio.as_ref().is_some_and(|b| b.chars().count() > 500) {
            errors.insert("bio".into(), "Bio must be at most 500 characters".into());
        }
        finish(errors)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlamBookSettingsRequest {
    pub is_public: Option<bool>,
    pub allow_anonymous: Option<bool>,
    pub custom_question_ids: Option<Vec<String>>,
    pub theme: Option<String>,
}

impl Validate for SlamBookSettingsRequest {
    fn validate(&self) -> Result<(), FieldErrors> {
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchQuery {
    pub query: Option<String>,
    pub batch: Option<String>,
    pub course: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectJoinRequest {
    pub reason: Option<String>,
}

impl Validate for RejectJoinRequest {
    fn validate(&self) -> Result<(), FieldErrors> {
        Ok(())
    }
}

/// Lets a super admin pick which college a college-scoped call targets.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollegeScopeQuery {
    pub college_id: Option<String>,
}

// -- Colleges --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCollegeRequest {
    pub name: String,
    pub email: String,
    pub phone: String,
    #[serde(default)]
    pub address: Address,
    pub subscription_plan: SubscriptionPlan,
    pub subscription_expiry: Option<DateTime<Utc>>,
    pub max_users: Option<u32>,
}

impl Validate for CreateCollegeRequest {
    fn validate(&self) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::new();
        require_text(&mut errors, "name", &self.name, "College name is required");
        require_email(&mut errors, "email", &self.email);
        require_text(&mut errors, "phone", &self.phone, "Phone is required");
        if !self.name.chars().any(|c| c.is_ascii_alphanumeric()) {
            errors
                .entry("name".into())
                .or_insert_with(|| "College name must contain a letter or digit".into());
        }
        finish(errors)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCollegeRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<Address>,
    pub logo: Option<String>,
}

impl Validate for UpdateCollegeRequest {
    fn validate(&self) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::new();
        if let Some(name) = &self.name {
            require_text(&mut errors, "name", name, "College name cannot be blank");
        }
        if let Some(email) = &self.email {
            require_email(&mut errors, "email", email);
        }
        finish(errors)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollegeSettingsRequest {
    pub require_approval: Option<bool>,
    pub allow_public_profiles: Option<bool>,
    pub allow_anonymous_entries: Option<bool>,
    pub enabled_features: Option<Vec<String>>,
}

impl Validate for CollegeSettingsRequest {
    fn validate(&self) -> Result<(), FieldErrors> {
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollegeResponse {
    pub id: String,
    pub college_code: String,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub address: Address,
    pub logo: Option<String>,
    pub subscription: Subscription,
    pub settings: CollegeSettings,
    pub stats: Option<CollegeStats>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl CollegeResponse {
    pub fn new(college: &College, stats: Option<CollegeStats>) -> Self {
        Self {
            id: college.id.clone(),
            college_code: college.college_code.clone(),
            name: college.name.clone(),
            email: college.email.clone(),
            phone: college.phone.clone(),
            address: college.address.clone(),
            logo: college.logo.clone(),
            subscription: college.subscription.clone(),
            settings: college.settings.clone(),
            stats,
            is_active: college.is_active,
            created_at: college.created_at,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemAnalytics {
    pub total_colleges: u64,
    pub active_colleges: u64,
    pub total_users: u64,
    pub total_entries: u64,
    pub reported_entries: u64,
}

// -- Slam book entries --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateEntryRequest {
    pub written_for: String,
    pub is_anonymous: Option<bool>,
    pub responses: BTreeMap<String, String>,
    pub ratings: Option<BTreeMap<String, i32>>,
    pub visibility: Option<Visibility>,
}

impl Validate for CreateEntryRequest {
    fn validate(&self) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::new();
        require_text(&mut errors, "writtenFor", &self.written_for, "Written for user ID is required");
        finish(errors)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateEntryRequest {
    pub responses: Option<BTreeMap<String, String>>,
    pub ratings: Option<BTreeMap<String, i32>>,
    pub visibility: Option<Visibility>,
}

impl Validate for UpdateEntryRequest {
    fn validate(&self) -> Result<(), FieldErrors> {
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionRequest {
    #[serde(rename = "type")]
    pub kind: ReactionKind,
}

impl Validate for ReactionRequest {
    fn validate(&self) -> Result<(), FieldErrors> {
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRequest {
    pub reason: String,
}

impl Validate for ReportRequest {
    fn validate(&self) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::new();
        require_text(&mut errors, "reason", &self.reason, "Report reason is required");
        finish(errors)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionResponse {
    pub user_id: String,
    #[serde(rename = "type")]
    pub kind: ReactionKind,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryResponse {
    pub id: String,
    pub college_id: String,
    pub written_for: String,
    pub written_for_user: Option<UserBasicInfo>,
    /// Omitted for anonymous entries unless the viewer wrote it or moderates.
    pub written_by: Option<String>,
    pub written_by_user: Option<UserBasicInfo>,
    pub is_anonymous: bool,
    pub responses: BTreeMap<String, String>,
    pub ratings: BTreeMap<String, i32>,
    pub attachments: Vec<Attachment>,
    pub reactions: Vec<ReactionResponse>,
    pub visibility: Visibility,
    /// Only shown to admins.
    pub moderation: Option<Moderation>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// -- Templates --

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionRequest {
    pub text: String,
    #[serde(flatten)]
    pub kind: QuestionKind,
    pub required: Option<bool>,
    pub placeholder: Option<String>,
    pub order: Option<i32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateRequest {
    pub name: String,
    pub description: Option<String>,
    pub questions: Vec<QuestionRequest>,
    pub is_default: Option<bool>,
}

impl Validate for TemplateRequest {
    fn validate(&self) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::new();
        require_text(&mut errors, "name", &self.name, "Template name is required");
        if self.questions.is_empty() {
            errors.insert("questions".into(), "At least one question is required".into());
        }
        for (i, question) in self.questions.iter().enumerate() {
            let field = |name: &str| format!("questions[{i}].{name}");
            require_text(&mut errors, &field("text"), &question.text, "Question text is required");
            match &question.kind {
                QuestionKind::Rating { min_value, max_value } if min_value > max_value => {
                    errors.insert(field("maxValue"), "maxValue must not be below minValue".into());
                }
                QuestionKind::Choice { options } | QuestionKind::MultiChoice { options }
                    if options.iter().all(|o| o.trim().is_empty()) =>
                {
                    errors.insert(field("options"), "Choice questions need at least one option".into());
                }
                QuestionKind::Text { max_length: Some(0) }
                | QuestionKind::Textarea { max_length: Some(0) } => {
                    errors.insert(field("maxLength"), "maxLength must be positive".into());
                }
                _ => {}
            }
        }
        finish(errors)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateResponse {
    pub id: String,
    pub college_id: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub questions: Vec<crate::models::Question>,
    pub is_default: bool,
    pub is_active: bool,
    pub created_by: Option<String>,
    pub created_by_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<&Template> for TemplateResponse {
    fn from(template: &Template) -> Self {
        Self {
            id: template.id.clone(),
            college_id: template.college_id.clone(),
            name: template.name.clone(),
            description: template.description.clone(),
            questions: template.questions.clone(),
            is_default: template.is_default,
            is_active: template.is_active,
            created_by: template.created_by.clone(),
            created_by_name: None,
            created_at: template.created_at,
        }
    }
}

// -- Notifications --

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct UnreadCount {
    pub count: u64,
}

// -- Files --

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileUploadResponse {
    pub url: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteFileQuery {
    pub file_url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_request_reports_every_bad_field() {
        let req = RegisterRequest {
            college_code: " ".into(),
            email: "not-an-email".into(),
            password: "short".into(),
            first_name: "Asha".into(),
            last_name: String::new(),
            course: None,
            batch: None,
            roll_number: None,
        };
        let errors = req.validate().unwrap_err();
        assert_eq!(errors.len(), 4);
        assert!(errors.contains_key("collegeCode"));
        assert!(errors.contains_key("email"));
        assert!(errors.contains_key("password"));
        assert!(errors.contains_key("lastName"));
    }

    #[test]
    fn template_request_checks_per_question_shape() {
        let req: TemplateRequest = serde_json::from_str(
            r#"{
                "name": "Quick",
                "questions": [
                    {"text": "Mood?", "type": "RATING", "minValue": 5, "maxValue": 1},
                    {"text": "", "type": "CHOICE", "options": []}
                ]
            }"#,
        )
        .unwrap();
        let errors = req.validate().unwrap_err();
        assert!(errors.contains_key("questions[0].maxValue"));
        assert!(errors.contains_key("questions[1].text"));
        assert!(errors.contains_key("questions[1].options"));
    }

    #[test]
    fn envelope_error_has_no_data() {
        let body = serde_json::to_value(ApiResponse::<()>::error("nope")).unwrap();
        assert_eq!(body["success"], false);
        assert_eq!(body["message"], "nope");
        assert!(body["data"].is_null());
    }
}
