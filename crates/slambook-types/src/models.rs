use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A stored enum value that no longer matches any known variant.
#[derive(Debug, Error)]
#[error("unknown {kind} value '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

/// Declares a wire/storage enum whose JSON and SQLite forms are the same
/// SCREAMING_SNAKE_CASE string.
macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(UnknownVariant {
                        kind: stringify!($name),
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

string_enum!(Role {
    SuperAdmin => "SUPER_ADMIN",
    CollegeAdmin => "COLLEGE_ADMIN",
    Student => "STUDENT",
});

impl Role {
    pub fn is_admin(&self) -> bool {
        matches!(self, Self::SuperAdmin | Self::CollegeAdmin)
    }
}

string_enum!(JoinStatus {
    Pending => "PENDING",
    Approved => "APPROVED",
    Rejected => "REJECTED",
});

string_enum!(SubscriptionPlan {
    Basic => "BASIC",
    Premium => "PREMIUM",
    Enterprise => "ENTERPRISE",
});

impl SubscriptionPlan {
    /// Member cap applied when a college is created without an explicit one.
    /// `None` means unlimited.
    pub fn default_max_users(&self) -> Option<u32> {
        match self {
            Self::Basic => Some(100),
            Self::Premium => Some(500),
            Self::Enterprise => None,
        }
    }
}

string_enum!(SubscriptionStatus {
    Active => "ACTIVE",
    Suspended => "SUSPENDED",
    Expired => "EXPIRED",
    Trial => "TRIAL",
});

string_enum!(Visibility {
    Public => "PUBLIC",
    Private => "PRIVATE",
    FriendsOnly => "FRIENDS_ONLY",
});

string_enum!(AttachmentKind {
    Image => "IMAGE",
    Video => "VIDEO",
    Audio => "AUDIO",
});

string_enum!(ReactionKind {
    Love => "LOVE",
    Smile => "SMILE",
    Surprised => "SURPRISED",
    Thinking => "THINKING",
    Fire => "FIRE",
    Clap => "CLAP",
});

string_enum!(NotificationKind {
    NewEntry => "NEW_ENTRY",
    JoinApproved => "JOIN_APPROVED",
    JoinRejected => "JOIN_REJECTED",
    Reaction => "REACTION",
    Mention => "MENTION",
    Announcement => "ANNOUNCEMENT",
    SubscriptionExpiring => "SUBSCRIPTION_EXPIRING",
    NewJoinRequest => "NEW_JOIN_REQUEST",
});

string_enum!(EntityKind {
    User => "USER",
    SlamBookEntry => "SLAM_BOOK_ENTRY",
    College => "COLLEGE",
    Template => "TEMPLATE",
});

// -- Colleges --

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    pub street: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
    pub pincode: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub plan: SubscriptionPlan,
    pub status: SubscriptionStatus,
    pub expiry: Option<DateTime<Utc>>,
    /// `None` means no member cap.
    pub max_users: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollegeSettings {
    pub require_approval: bool,
    pub allow_public_profiles: bool,
    pub allow_anonymous_entries: bool,
    #[serde(default)]
    pub enabled_features: Vec<String>,
}

impl Default for CollegeSettings {
    fn default() -> Self {
        Self {
            require_approval: true,
            allow_public_profiles: true,
            allow_anonymous_entries: true,
            enabled_features: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollegeStats {
    pub total_users: u64,
    pub active_users: u64,
    pub total_entries: u64,
    pub pending_requests: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct College {
    pub id: String,
    pub college_code: String,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub address: Address,
    pub logo: Option<String>,
    pub subscription: Subscription,
    pub settings: CollegeSettings,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// -- Users --

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Profile {
    pub first_name: String,
    pub last_name: String,
    pub nickname: Option<String>,
    pub profile_picture: Option<String>,
    pub course: Option<String>,
    pub batch: Option<String>,
    pub roll_number: Option<String>,
    pub bio: Option<String>,
    pub interests: Vec<String>,
    pub social_links: BTreeMap<String, String>,
}

impl Profile {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name).trim().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlamBookSettings {
    pub is_public: bool,
    pub allow_anonymous: bool,
    #[serde(default)]
    pub custom_question_ids: Vec<String>,
    pub theme: Option<String>,
}

impl Default for SlamBookSettings {
    fn default() -> Self {
        Self {
            is_public: true,
            allow_anonymous: true,
            custom_question_ids: Vec::new(),
            theme: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Join request is not pending (currently {from})")]
pub struct JoinTransitionError {
    pub from: JoinStatus,
}

/// Membership gate. PENDING moves to APPROVED or REJECTED exactly once;
/// both outcomes are terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    pub status: JoinStatus,
    pub requested_at: DateTime<Utc>,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
}

impl JoinRequest {
    /// Initial state for a self-registered member.
    pub fn for_registration(require_approval: bool, now: DateTime<Utc>) -> Self {
        if require_approval {
            Self {
                status: JoinStatus::Pending,
                requested_at: now,
                approved_by: None,
                approved_at: None,
                rejection_reason: None,
            }
        } else {
            Self::pre_approved(now)
        }
    }

    /// Members provisioned by the system (super admin, a college's first admin).
    pub fn pre_approved(now: DateTime<Utc>) -> Self {
        Self {
            status: JoinStatus::Approved,
            requested_at: now,
            approved_by: None,
            approved_at: Some(now),
            rejection_reason: None,
        }
    }

    pub fn is_approved(&self) -> bool {
        self.status == JoinStatus::Approved
    }

    pub fn approve(&mut self, approver_id: &str, now: DateTime<Utc>) -> Result<(), JoinTransitionError> {
        self.ensure_pending()?;
        self.status = JoinStatus::Approved;
        self.approved_by = Some(approver_id.to_string());
        self.approved_at = Some(now);
        Ok(())
    }

    pub fn reject(&mut self, reason: Option<String>) -> Result<(), JoinTransitionError> {
        self.ensure_pending()?;
        self.status = JoinStatus::Rejected;
        self.rejection_reason = reason;
        Ok(())
    }

    fn ensure_pending(&self) -> Result<(), JoinTransitionError> {
        match self.status {
            JoinStatus::Pending => Ok(()),
            from => Err(JoinTransitionError { from }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: String,
    /// `None` only for SUPER_ADMIN.
    pub college_id: Option<String>,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub profile: Profile,
    pub slambook_settings: SlamBookSettings,
    pub join_request: JoinRequest,
    pub email_verified: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
}

// -- Slam book entries --

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: AttachmentKind,
    pub url: String,
    pub filename: String,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reaction {
    pub user_id: String,
    #[serde(rename = "type")]
    pub kind: ReactionKind,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Moderation {
    pub is_reported: bool,
    pub report_reason: Option<String>,
    pub reported_by: Option<String>,
    pub reported_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub id: String,
    pub college_id: String,
    pub written_for: String,
    pub written_by: String,
    pub is_anonymous: bool,
    pub responses: BTreeMap<String, String>,
    pub ratings: BTreeMap<String, i32>,
    /// Insertion order.
    pub attachments: Vec<Attachment>,
    pub reactions: Vec<Reaction>,
    pub moderation: Moderation,
    pub visibility: Visibility,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entry {
    pub fn is_writer(&self, user_id: &str) -> bool {
        self.written_by == user_id
    }

    pub fn is_participant(&self, user_id: &str) -> bool {
        self.written_by == user_id || self.written_for == user_id
    }
}

// -- Templates --

/// Per-type question settings. Only the fields that make sense for a type
/// exist on its variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum QuestionKind {
    Text {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_length: Option<u32>,
    },
    Textarea {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_length: Option<u32>,
    },
    Rating {
        min_value: i32,
        max_value: i32,
    },
    Choice {
        options: Vec<String>,
    },
    MultiChoice {
        options: Vec<String>,
    },
    Date,
    File,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: String,
    pub text: String,
    #[serde(flatten)]
    pub kind: QuestionKind,
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<i32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    pub id: String,
    /// `None` marks a system template shared by every college.
    pub college_id: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub questions: Vec<Question>,
    pub is_default: bool,
    pub is_active: bool,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// -- Notifications --

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationContent {
    pub title: String,
    pub message: String,
    pub action_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelatedEntity {
    #[serde(rename = "type")]
    pub kind: EntityKind,
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub college_id: Option<String>,
    pub user_id: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub content: NotificationContent,
    pub related_entity: Option<RelatedEntity>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_request_transitions_only_from_pending() {
        let now = Utc::now();
        let mut req = JoinRequest::for_registration(true, now);
        assert_eq!(req.status, JoinStatus::Pending);

        req.approve("admin-1", now).unwrap();
        assert!(req.is_approved());
        assert_eq!(req.approved_by.as_deref(), Some("admin-1"));

        let err = req.reject(Some("late".into())).unwrap_err();
        assert_eq!(err.from, JoinStatus::Approved);
        assert!(req.is_approved());
    }

    #[test]
    fn rejected_is_terminal() {
        let now = Utc::now();
        let mut req = JoinRequest::for_registration(true, now);
        req.reject(Some("not a student".into())).unwrap();
        assert_eq!(req.rejection_reason.as_deref(), Some("not a student"));
        assert!(req.approve("admin-1", now).is_err());
        assert_eq!(req.status, JoinStatus::Rejected);
    }

    #[test]
    fn registration_without_approval_is_approved() {
        let req = JoinRequest::for_registration(false, Utc::now());
        assert!(req.is_approved());
    }

    #[test]
    fn question_kind_is_tagged_by_type() {
        let q: Question = serde_json::from_str(
            r#"{"id":"q1","text":"Rate me","type":"RATING","minValue":1,"maxValue":10,"required":true}"#,
        )
        .unwrap();
        assert_eq!(q.kind, QuestionKind::Rating { min_value: 1, max_value: 10 });

        let json = serde_json::to_value(&q).unwrap();
        assert_eq!(json["type"], "RATING");
        assert_eq!(json["maxValue"], 10);
        assert!(json.get("options").is_none());
    }

    #[test]
    fn choice_question_requires_options_field() {
        let parsed = serde_json::from_str::<Question>(
            r#"{"id":"q2","text":"Pick","type":"CHOICE","required":false}"#,
        );
        assert!(parsed.is_err());
    }

    #[test]
    fn enums_round_trip_through_storage_strings() {
        assert_eq!("FRIENDS_ONLY".parse::<Visibility>().unwrap(), Visibility::FriendsOnly);
        assert_eq!(NotificationKind::NewJoinRequest.as_str(), "NEW_JOIN_REQUEST");
        assert!("OWNER".parse::<Role>().is_err());
        assert_eq!(
            serde_json::to_string(&Role::CollegeAdmin).unwrap(),
            "\"COLLEGE_ADMIN\""
        );
    }
}
