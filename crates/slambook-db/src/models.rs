//! Row <-> domain mapping. Nested value objects are stored as JSON text and
//! enums as their SCREAMING_SNAKE_CASE names.

use std::str::FromStr;

use rusqlite::Row;
use rusqlite::types::Type;
use serde::Serialize;
use serde::de::DeserializeOwned;
use slambook_types::models::{
    Attachment, College, Entry, JoinRequest, Moderation, Notification, NotificationContent,
    Reaction, RelatedEntity, Template, User,
};

pub(crate) const COLLEGE_COLUMNS: &str = "id, college_code, name, email, phone, address, logo, \
     subscription, settings, is_active, created_at, updated_at";

pub(crate) const USER_COLUMNS: &str = "id, college_id, email, password_hash, role, profile, \
     slambook_settings, join_status, join_requested_at, join_approved_by, join_approved_at, \
     join_rejection_reason, email_verified, is_active, created_at, updated_at, last_login_at";

pub(crate) const ENTRY_COLUMNS: &str = "id, college_id, written_for, written_by, is_anonymous, \
     responses, ratings, visibility, is_reported, report_reason, reported_by, reported_at, \
     created_at, updated_at";

pub(crate) const TEMPLATE_COLUMNS: &str = "id, college_id, name, description, questions, \
     is_default, is_active, created_by, created_at, updated_at";

pub(crate) const NOTIFICATION_COLUMNS: &str = "id, college_id, user_id, kind, content, \
     related_kind, related_id, is_read, created_at, read_at";

pub(crate) fn to_json<T: Serialize>(value: &T) -> anyhow::Result<String> {
    Ok(serde_json::to_string(value)?)
}

fn json_col<T: DeserializeOwned>(row: &Row, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn enum_col<T>(row: &Row, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let text: String = row.get(idx)?;
    text.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn college_from_row(row: &Row) -> rusqlite::Result<College> {
    Ok(College {
        id: row.get(0)?,
        college_code: row.get(1)?,
        name: row.get(2)?,
        email: row.get(3)?,
        phone: row.get(4)?,
        address: json_col(row, 5)?,
        logo: row.get(6)?,
        subscription: json_col(row, 7)?,
        settings: json_col(row, 8)?,
        is_active: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

pub(crate) fn user_from_row(row: &Row) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        college_id: row.get(1)?,
        email: row.get(2)?,
        password_hash: row.get(3)?,
        role: enum_col(row, 4)?,
        profile: json_col(row, 5)?,
        slambook_settings: json_col(row, 6)?,
        join_request: JoinRequest {
            status: enum_col(row, 7)?,
            requested_at: row.get(8)?,
            approved_by: row.get(9)?,
            approved_at: row.get(10)?,
            rejection_reason: row.get(11)?,
        },
        email_verified: row.get(12)?,
        is_active: row.get(13)?,
        created_at: row.get(14)?,
        updated_at: row.get(15)?,
        last_login_at: row.get(16)?,
    })
}

/// Attachments and reactions are loaded separately.
pub(crate) fn entry_from_row(row: &Row) -> rusqlite::Result<Entry> {
    Ok(Entry {
        id: row.get(0)?,
        college_id: row.get(1)?,
        written_for: row.get(2)?,
        written_by: row.get(3)?,
        is_anonymous: row.get(4)?,
        responses: json_col(row, 5)?,
        ratings: json_col(row, 6)?,
        attachments: Vec::new(),
        reactions: Vec::new(),
        visibility: enum_col(row, 7)?,
        moderation: Moderation {
            is_reported: row.get(8)?,
            report_reason: row.get(9)?,
            reported_by: row.get(10)?,
            reported_at: row.get(11)?,
        },
        created_at: row.get(12)?,
        updated_at: row.get(13)?,
    })
}

/// Columns: entry_id, id, kind, url, filename, size
pub(crate) fn attachment_from_row(row: &Row) -> rusqlite::Result<(String, Attachment)> {
    let size: i64 = row.get(5)?;
    Ok((
        row.get(0)?,
        Attachment {
            id: row.get(1)?,
            kind: enum_col(row, 2)?,
            url: row.get(3)?,
            filename: row.get(4)?,
            size: u64::try_from(size).unwrap_or_default(),
        },
    ))
}

/// Columns: entry_id, user_id, kind, created_at
pub(crate) fn reaction_from_row(row: &Row) -> rusqlite::Result<(String, Reaction)> {
    Ok((
        row.get(0)?,
        Reaction {
            user_id: row.get(1)?,
            kind: enum_col(row, 2)?,
            created_at: row.get(3)?,
        },
    ))
}

pub(crate) fn template_from_row(row: &Row) -> rusqlite::Result<Template> {
    Ok(Template {
        id: row.get(0)?,
        college_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        questions: json_col(row, 4)?,
        is_default: row.get(5)?,
        is_active: row.get(6)?,
        created_by: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

pub(crate) fn notification_from_row(row: &Row) -> rusqlite::Result<Notification> {
    let related_kind: Option<String> = row.get(5)?;
    let related_id: Option<String> = row.get(6)?;
    let related_entity = match (related_kind, related_id) {
        (Some(kind), Some(id)) => Some(RelatedEntity {
            kind: kind.parse().map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e))
            })?,
            id,
        }),
        _ => None,
    };
    let content: NotificationContent = json_col(row, 4)?;

    Ok(Notification {
        id: row.get(0)?,
        college_id: row.get(1)?,
        user_id: row.get(2)?,
        kind: enum_col(row, 3)?,
        content,
        related_entity,
        is_read: row.get(7)?,
        created_at: row.get(8)?,
        read_at: row.get(9)?,
    })
}
