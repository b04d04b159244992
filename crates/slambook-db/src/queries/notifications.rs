use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::params;
use slambook_types::models::Notification;

use super::{OptionalExt, count};
use crate::Database;
use crate::models::{NOTIFICATION_COLUMNS, notification_from_row, to_json};

impl Database {
    pub fn insert_notification(&self, notification: &Notification) -> Result<()> {
        let related = notification.related_entity.as_ref();
        self.with_conn(|conn| {
            conn.execute(
                &format!(
                    "INSERT INTO notifications ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    NOTIFICATION_COLUMNS
                ),
                params![
                    notification.id,
                    notification.college_id,
                    notification.user_id,
                    notification.kind.as_str(),
                    to_json(&notification.content)?,
                    related.map(|r| r.kind.as_str()),
                    related.map(|r| r.id.as_str()),
                    notification.is_read,
                    notification.created_at,
                    notification.read_at,
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_notification(&self, id: &str) -> Result<Option<Notification>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {} FROM notifications WHERE id = ?1", NOTIFICATION_COLUMNS),
                [id],
                notification_from_row,
            )
            .optional()
        })
    }

    /// Newest first.
    pub fn notifications_for(&self, user_id: &str, unread_only: bool) -> Result<Vec<Notification>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM notifications
                 WHERE user_id = ?1 AND (?2 = 0 OR is_read = 0)
                 ORDER BY created_at DESC, rowid DESC",
                NOTIFICATION_COLUMNS
            ))?;
            let rows = stmt
                .query_map(params![user_id, unread_only], notification_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn unread_count(&self, user_id: &str) -> Result<u64> {
        self.with_conn(|conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM notifications WHERE user_id = ?1 AND is_read = 0",
                [user_id],
                |row| row.get(0),
            )?;
            Ok(count(n))
        })
    }

    /// Keeps the first read time when called twice.
    pub fn mark_notification_read(&self, id: &str, now: DateTime<Utc>) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE notifications SET is_read = 1, read_at = COALESCE(read_at, ?2) WHERE id = ?1",
                params![id, now],
            )?;
            Ok(changed > 0)
        })
    }

    pub fn mark_all_notifications_read(&self, user_id: &str, now: DateTime<Utc>) -> Result<u64> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE notifications SET is_read = 1, read_at = ?2 WHERE user_id = ?1 AND is_read = 0",
                params![user_id, now],
            )?;
            Ok(changed as u64)
        })
    }

    pub fn delete_notification(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let removed = conn.execute("DELETE FROM notifications WHERE id = ?1", [id])?;
            Ok(removed > 0)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::fixtures;
    use chrono::Duration;
    use slambook_types::models::{
        EntityKind, NotificationContent, NotificationKind, RelatedEntity, Role,
    };

    fn notification(user_id: &str, title: &str, at: DateTime<Utc>) -> Notification {
        Notification {
            id: uuid::Uuid::new_v4().to_string(),
            college_id: None,
            user_id: user_id.to_string(),
            kind: NotificationKind::NewEntry,
            content: NotificationContent {
                title: title.to_string(),
                message: "m".into(),
                action_url: None,
            },
            related_entity: Some(RelatedEntity {
                kind: EntityKind::SlamBookEntry,
                id: "e1".into(),
            }),
            is_read: false,
            created_at: at,
            read_at: None,
        }
    }

    #[test]
    fn listing_is_newest_first_and_read_state_sticks() {
        let db = Database::open_in_memory().unwrap();
        let user = fixtures::member(None, "n@x.edu", Role::SuperAdmin);
        db.insert_user(&user).unwrap();

        let now = Utc::now();
        let old = notification(&user.id, "old", now - Duration::minutes(5));
        let new = notification(&user.id, "new", now);
        db.insert_notification(&old).unwrap();
        db.insert_notification(&new).unwrap();

        let all = db.notifications_for(&user.id, false).unwrap();
        let titles: Vec<_> = all.iter().map(|n| n.content.title.as_str()).collect();
        assert_eq!(titles, vec!["new", "old"]);
        assert_eq!(all[0].related_entity, new.related_entity);

        assert!(db.mark_notification_read(&old.id, now).unwrap());
        assert_eq!(db.unread_count(&user.id).unwrap(), 1);
        assert_eq!(db.notifications_for(&user.id, true).unwrap().len(), 1);

        assert_eq!(db.mark_all_notifications_read(&user.id, now).unwrap(), 1);
        assert_eq!(db.unread_count(&user.id).unwrap(), 0);

        assert!(db.delete_notification(&new.id).unwrap());
        assert!(db.get_notification(&new.id).unwrap().is_none());
    }
}
