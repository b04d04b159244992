use std::collections::{BTreeMap, HashMap};

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use slambook_types::models::{Attachment, Entry, Moderation, Reaction, Visibility};

use super::{OptionalExt, placeholders};
use crate::Database;
use crate::models::{
    ENTRY_COLUMNS, attachment_from_row, entry_from_row, reaction_from_row, to_json,
};

impl Database {
    /// Fails with a unique violation when the writer already wrote for the target.
    pub fn insert_entry(&self, entry: &Entry) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                &format!(
                    "INSERT INTO entries ({}) VALUES
                     (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                    ENTRY_COLUMNS
                ),
                params![
                    entry.id,
                    entry.college_id,
                    entry.written_for,
                    entry.written_by,
                    entry.is_anonymous,
                    to_json(&entry.responses)?,
                    to_json(&entry.ratings)?,
                    entry.visibility.as_str(),
                    entry.moderation.is_reported,
                    entry.moderation.report_reason,
                    entry.moderation.reported_by,
                    entry.moderation.reported_at,
                    entry.created_at,
                    entry.updated_at,
                ],
            )?;
            Ok(())
        })
    }

    pub fn entry_exists(&self, written_by: &str, written_for: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM entries WHERE written_by = ?1 AND written_for = ?2",
                params![written_by, written_for],
                |row| row.get(0),
            )?;
            Ok(n > 0)
        })
    }

    /// Loads the entry with its attachments and reactions.
    pub fn get_entry(&self, id: &str) -> Result<Option<Entry>> {
        self.with_conn(|conn| {
            let entry = conn
                .query_row(
                    &format!("SELECT {} FROM entries WHERE id = ?1", ENTRY_COLUMNS),
                    [id],
                    entry_from_row,
                )
                .optional()?;
            match entry {
                Some(entry) => {
                    let mut entries = vec![entry];
                    load_children(conn, &mut entries)?;
                    Ok(entries.pop())
                }
                None => Ok(None),
            }
        })
    }

    /// Newest first.
    pub fn entries_written_for(&self, user_id: &str) -> Result<Vec<Entry>> {
        self.with_conn(|conn| {
            query_entries(conn, "written_for = ?1 ORDER BY created_at DESC, rowid DESC", params![user_id])
        })
    }

    /// Newest first.
    pub fn entries_written_by(&self, user_id: &str) -> Result<Vec<Entry>> {
        self.with_conn(|conn| {
            query_entries(conn, "written_by = ?1 ORDER BY created_at DESC, rowid DESC", params![user_id])
        })
    }

    /// `college_id = None` lists every tenant.
    pub fn reported_entries(&self, college_id: Option<&str>) -> Result<Vec<Entry>> {
        self.with_conn(|conn| {
            query_entries(
                conn,
                "is_reported = 1 AND (?1 IS NULL OR college_id = ?1)
                 ORDER BY reported_at DESC, rowid DESC",
                params![college_id],
            )
        })
    }

    pub fn update_entry_content(
        &self,
        id: &str,
        responses: &BTreeMap<String, String>,
        ratings: &BTreeMap<String, i32>,
        visibility: Visibility,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE entries SET responses = ?2, ratings = ?3, visibility = ?4, updated_at = ?5
                 WHERE id = ?1",
                params![id, to_json(responses)?, to_json(ratings)?, visibility.as_str(), now],
            )?;
            Ok(changed > 0)
        })
    }

    /// Overwrites any earlier report.
    pub fn set_moderation(&self, id: &str, moderation: &Moderation, now: DateTime<Utc>) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE entries SET is_reported = ?2, report_reason = ?3, reported_by = ?4,
                    reported_at = ?5, updated_at = ?6
                 WHERE id = ?1",
                params![
                    id,
                    moderation.is_reported,
                    moderation.report_reason,
                    moderation.reported_by,
                    moderation.reported_at,
                    now,
                ],
            )?;
            Ok(changed > 0)
        })
    }

    /// Appends after any existing attachments. Fails if the entry is gone.
    pub fn append_attachment(&self, entry_id: &str, attachment: &Attachment, now: DateTime<Utc>) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO attachments (id, entry_id, kind, url, filename, size)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    attachment.id,
                    entry_id,
                    attachment.kind.as_str(),
                    attachment.url,
                    attachment.filename,
                    i64::try_from(attachment.size)?,
                ],
            )?;
            tx.execute(
                "UPDATE entries SET updated_at = ?2 WHERE id = ?1",
                params![entry_id, now],
            )?;
            tx.commit()?;
            Ok(())
        })
    }

    pub fn remove_attachment(&self, entry_id: &str, attachment_id: &str, now: DateTime<Utc>) -> Result<bool> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM attachments WHERE id = ?1 AND entry_id = ?2",
                params![attachment_id, entry_id],
            )?;
            if removed > 0 {
                conn.execute(
                    "UPDATE entries SET updated_at = ?2 WHERE id = ?1",
                    params![entry_id, now],
                )?;
            }
            Ok(removed > 0)
        })
    }

    /// Attachments and reactions go with it.
    pub fn delete_entry(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let removed = conn.execute("DELETE FROM entries WHERE id = ?1", [id])?;
            Ok(removed > 0)
        })
    }

    /// One reaction per user per entry; reacting again replaces the kind.
    pub fn upsert_reaction(&self, entry_id: &str, reaction: &Reaction) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO reactions (entry_id, user_id, kind, created_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(entry_id, user_id)
                 DO UPDATE SET kind = excluded.kind, created_at = excluded.created_at",
                params![
                    entry_id,
                    reaction.user_id,
                    reaction.kind.as_str(),
                    reaction.created_at,
                ],
            )?;
            Ok(())
        })
    }

    pub fn remove_reaction(&self, entry_id: &str, user_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM reactions WHERE entry_id = ?1 AND user_id = ?2",
                params![entry_id, user_id],
            )?;
            Ok(removed > 0)
        })
    }
}

fn query_entries(conn: &Connection, filter: &str, params: impl rusqlite::Params) -> Result<Vec<Entry>> {
    let mut stmt = conn.prepare(&format!("SELECT {} FROM entries WHERE {}", ENTRY_COLUMNS, filter))?;
    let mut entries = stmt
        .query_map(params, entry_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    load_children(conn, &mut entries)?;
    Ok(entries)
}

/// Batch-fill attachments and reactions for a set of entries.
fn load_children(conn: &Connection, entries: &mut [Entry]) -> Result<()> {
    if entries.is_empty() {
        return Ok(());
    }
    let ids: Vec<&str> = entries.iter().map(|e| e.id.as_str()).collect();
    let list = placeholders(ids.len());

    let mut attachments: HashMap<String, Vec<Attachment>> = HashMap::new();
    let mut stmt = conn.prepare(&format!(
        "SELECT entry_id, id, kind, url, filename, size FROM attachments
         WHERE entry_id IN ({}) ORDER BY rowid",
        list
    ))?;
    for row in stmt.query_map(rusqlite::params_from_iter(ids.iter()), attachment_from_row)? {
        let (entry_id, attachment) = row?;
        attachments.entry(entry_id).or_default().push(attachment);
    }

    let mut reactions: HashMap<String, Vec<Reaction>> = HashMap::new();
    let mut stmt = conn.prepare(&format!(
        "SELECT entry_id, user_id, kind, created_at FROM reactions
         WHERE entry_id IN ({}) ORDER BY rowid",
        list
    ))?;
    for row in stmt.query_map(rusqlite::params_from_iter(ids.iter()), reaction_from_row)? {
        let (entry_id, reaction) = row?;
        reactions.entry(entry_id).or_default().push(reaction);
    }

    for entry in entries.iter_mut() {
        entry.attachments = attachments.remove(&entry.id).unwrap_or_default();
        entry.reactions = reactions.remove(&entry.id).unwrap_or_default();
    }
    Ok(())
}
