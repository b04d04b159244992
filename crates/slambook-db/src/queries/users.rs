use std::collections::HashMap;

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use slambook_types::models::{JoinStatus, Role, User};

use super::{OptionalExt, count, placeholders};
use crate::Database;
use crate::models::{USER_COLUMNS, to_json, user_from_row};

/// Member directory filters. Text matches first name, last name, nickname
/// or email, case-insensitively; batch and course match exactly.
#[derive(Debug, Clone, Default)]
pub struct MemberSearch {
    pub text: Option<String>,
    pub batch: Option<String>,
    pub course: Option<String>,
}

impl Database {
    pub fn insert_user(&self, user: &User) -> Result<()> {
        self.with_conn(|conn| insert_user_row(conn, user))
    }

    pub fn get_user(&self, id: &str) -> Result<Option<User>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS),
                [id],
                user_from_row,
            )
            .optional()
        })
    }

    /// `college_id = None` looks in the tenantless scope used by super admins.
    pub fn get_user_by_email(&self, email: &str, college_id: Option<&str>) -> Result<Option<User>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!(
                    "SELECT {} FROM users
                     WHERE email = ?1 AND COALESCE(college_id, '') = COALESCE(?2, '')",
                    USER_COLUMNS
                ),
                params![email, college_id],
                user_from_row,
            )
            .optional()
        })
    }

    /// Batch-fetch users keyed by id. Unknown ids are skipped.
    pub fn get_users(&self, ids: &[String]) -> Result<HashMap<String, User>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM users WHERE id IN ({})",
                USER_COLUMNS,
                placeholders(ids.len())
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(ids.iter()), user_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows.into_iter().map(|u| (u.id.clone(), u)).collect())
        })
    }

    /// Writes back every mutable field. Returns false when the user is gone.
    pub fn update_user(&self, user: &User) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET email = ?2, password_hash = ?3, role = ?4, profile = ?5,
                    slambook_settings = ?6, join_status = ?7, join_approved_by = ?8,
                    join_approved_at = ?9, join_rejection_reason = ?10, email_verified = ?11,
                    is_active = ?12, updated_at = ?13, last_login_at = ?14
                 WHERE id = ?1",
                params![
                    user.id,
                    user.email,
                    user.password_hash,
                    user.role.as_str(),
                    to_json(&user.profile)?,
                    to_json(&user.slambook_settings)?,
                    user.join_request.status.as_str(),
                    user.join_request.approved_by,
                    user.join_request.approved_at,
                    user.join_request.rejection_reason,
                    user.email_verified,
                    user.is_active,
                    user.updated_at,
                    user.last_login_at,
                ],
            )?;
            Ok(changed > 0)
        })
    }

    /// Persists a join decision only if the stored status is still `expected`.
    /// Returns false when someone else decided first.
    pub fn update_join_request(&self, user: &User, expected: JoinStatus) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET join_status = ?2, join_approved_by = ?3, join_approved_at = ?4,
                    join_rejection_reason = ?5, updated_at = ?6
                 WHERE id = ?1 AND join_status = ?7",
                params![
                    user.id,
                    user.join_request.status.as_str(),
                    user.join_request.approved_by,
                    user.join_request.approved_at,
                    user.join_request.rejection_reason,
                    user.updated_at,
                    expected.as_str(),
                ],
            )?;
            Ok(changed > 0)
        })
    }

    pub fn record_login(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET last_login_at = ?2 WHERE id = ?1",
                params![id, at],
            )?;
            Ok(())
        })
    }

    /// Members counted against a college's cap: everyone not rejected.
    pub fn count_seated_members(&self, college_id: &str) -> Result<u64> {
        self.with_conn(|conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM users WHERE college_id = ?1 AND join_status != ?2",
                params![college_id, JoinStatus::Rejected.as_str()],
                |row| row.get(0),
            )?;
            Ok(count(n))
        })
    }

    pub fn users_by_join_status(&self, college_id: &str, status: JoinStatus) -> Result<Vec<User>> {
        self.with_conn(|conn| {
            query_users(
                conn,
                "college_id = ?1 AND join_status = ?2 ORDER BY join_requested_at, rowid",
                params![college_id, status.as_str()],
            )
        })
    }

    pub fn college_members(&self, college_id: &str) -> Result<Vec<User>> {
        self.with_conn(|conn| {
            query_users(conn, "college_id = ?1 ORDER BY created_at, rowid", params![college_id])
        })
    }

    pub fn college_admins(&self, college_id: &str) -> Result<Vec<User>> {
        self.with_conn(|conn| {
            query_users(
                conn,
                "college_id = ?1 AND role = ?2 AND is_active = 1",
                params![college_id, Role::CollegeAdmin.as_str()],
            )
        })
    }

    /// Only active, approved members are searchable.
    pub fn search_members(&self, college_id: &str, search: &MemberSearch) -> Result<Vec<User>> {
        let text = search
            .text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_lowercase);

        self.with_conn(|conn| {
            query_users(
                conn,
                "college_id = ?1 AND join_status = ?2 AND is_active = 1
                 AND (?3 IS NULL
                      OR instr(lower(json_extract(profile, '$.firstName')), ?3) > 0
                      OR instr(lower(json_extract(profile, '$.lastName')), ?3) > 0
                      OR instr(lower(COALESCE(json_extract(profile, '$.nickname'), '')), ?3) > 0
                      OR instr(lower(email), ?3) > 0)
                 AND (?4 IS NULL OR json_extract(profile, '$.batch') = ?4)
                 AND (?5 IS NULL OR json_extract(profile, '$.course') = ?5)
                 ORDER BY json_extract(profile, '$.firstName'), rowid",
                params![
                    college_id,
                    JoinStatus::Approved.as_str(),
                    text,
                    search.batch,
                    search.course,
                ],
            )
        })
    }
}

pub(crate) fn insert_user_row(conn: &Connection, user: &User) -> Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO users ({}) VALUES
             (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
            USER_COLUMNS
        ),
        params![
            user.id,
            user.college_id,
            user.email,
            user.password_hash,
            user.role.as_str(),
            to_json(&user.profile)?,
            to_json(&user.slambook_settings)?,
            user.join_request.status.as_str(),
            user.join_request.requested_at,
            user.join_request.approved_by,
            user.join_request.approved_at,
            user.join_request.rejection_reason,
            user.email_verified,
            user.is_active,
            user.created_at,
            user.updated_at,
            user.last_login_at,
        ],
    )?;
    Ok(())
}

fn query_users(conn: &Connection, filter: &str, params: impl rusqlite::Params) -> Result<Vec<User>> {
    let mut stmt = conn.prepare(&format!("SELECT {} FROM users WHERE {}", USER_COLUMNS, filter))?;
    let rows = stmt
        .query_map(params, user_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}
