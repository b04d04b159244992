use chrono::Utc;
use slambook_types::models::{
    EntityKind, Entry, Notification, NotificationContent, NotificationKind, RelatedEntity, User,
};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::state::{AppState, db_call};

fn build(
    recipient: &User,
    kind: NotificationKind,
    title: &str,
    message: String,
    action_url: Option<String>,
    related: Option<(EntityKind, &str)>,
) -> Notification {
    Notification {
        id: Uuid::new_v4().to_string(),
        college_id: recipient.college_id.clone(),
        user_id: recipient.id.clone(),
        kind,
        content: NotificationContent {
            title: title.to_string(),
            message,
            action_url,
        },
        related_entity: related.map(|(kind, id)| RelatedEntity {
            kind,
            id: id.to_string(),
        }),
        is_read: false,
        created_at: Utc::now(),
        read_at: None,
    }
}

pub fn new_entry(target: &User, entry: &Entry) -> Notification {
    let message = if entry.is_anonymous {
        "Someone wrote anonymously in your slam book!"
    } else {
        "Someone wrote in your slam book!"
    };
    build(
        target,
        NotificationKind::NewEntry,
        "New Slam Book Entry",
        message.to_string(),
        Some(format!("/slambook/entries/{}", entry.id)),
        Some((EntityKind::SlamBookEntry, &entry.id)),
    )
}

pub fn join_approved(member: &User) -> Notification {
    build(
        member,
        NotificationKind::JoinApproved,
        "Welcome!",
        "Your join request has been approved. You can now access all features!".to_string(),
        Some("/dashboard".to_string()),
        Some((EntityKind::User, &member.id)),
    )
}

pub fn join_rejected(member: &User, reason: Option<&str>) -> Notification {
    let message = match reason {
        Some(reason) if !reason.trim().is_empty() => {
            format!("Your join request was rejected. Reason: {}", reason)
        }
        _ => "Your join request was rejected.".to_string(),
    };
    build(
        member,
        NotificationKind::JoinRejected,
        "Join Request Rejected",
        message,
        None,
        Some((EntityKind::User, &member.id)),
    )
}

pub fn reaction(writer: &User, entry: &Entry) -> Notification {
    build(
        writer,
        NotificationKind::Reaction,
        "New Reaction",
        "Someone reacted to your slam book entry!".to_string(),
        Some(format!("/slambook/entries/{}", entry.id)),
        Some((EntityKind::SlamBookEntry, &entry.id)),
    )
}

pub fn new_join_request(admin: &User, applicant: &User) -> Notification {
    build(
        admin,
        NotificationKind::NewJoinRequest,
        "New Join Request",
        format!("{} requested to join", applicant.profile.full_name()),
        Some(format!("/admin/join-requests/{}", applicant.id)),
        Some((EntityKind::User, &applicant.id)),
    )
}

/// Persist notifications. A failure is logged and never reaches the caller,
/// so the action that triggered the notice still succeeds.
pub async fn emit(state: &AppState, notifications: Vec<Notification>) {
    if notifications.is_empty() {
        return;
    }
    let count = notifications.len();
    let result = db_call(state, move |db| {
        for n in &notifications {
            db.insert_notification(n)?;
        }
        Ok(())
    })
    .await;

    match result {
        Ok(()) => debug!("Emitted {} notification(s)", count),
        Err(e) => warn!("Failed to emit notifications: {}", e),
    }
}
