pub mod colleges;
pub mod entries;
pub mod notifications;
pub mod templates;
pub mod users;

use anyhow::Result;

pub(crate) trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// `?1, ?2, ... ?n` for an `IN (...)` list.
pub(crate) fn placeholders(n: usize) -> String {
    (1..=n).map(|i| format!("?{}", i)).collect::<Vec<_>>().join(", ")
}

pub(crate) fn count(value: i64) -> u64 {
    u64::try_from(value).unwrap_or_default()
}

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::Utc;
    use slambook_types::models::{
        Address, College, CollegeSettings, JoinRequest, Profile, Role, SlamBookSettings,
        Subscription, SubscriptionPlan, SubscriptionStatus, User,
    };

    pub fn college(code: &str) -> College {
        let now = Utc::now();
        College {
            id: uuid::Uuid::new_v4().to_string(),
            college_code: code.to_string(),
            name: format!("College {}", code),
            email: format!("office@{}.edu", code.to_lowercase()),
            phone: "555-0100".into(),
            address: Address::default(),
            logo: None,
            subscription: Subscription {
                plan: SubscriptionPlan::Basic,
                status: SubscriptionStatus::Active,
                expiry: None,
                max_users: Some(100),
            },
            settings: CollegeSettings::default(),
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn member(college_id: Option<&str>, email: &str, role: Role) -> User {
        let now = Utc::now();
        User {
            id: uuid::Uuid::new_v4().to_string(),
            college_id: college_id.map(str::to_string),
            email: email.to_string(),
            password_hash: "hash".into(),
            role,
            profile: Profile {
                first_name: "Test".into(),
                last_name: "User".into(),
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
}
