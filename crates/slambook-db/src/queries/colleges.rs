use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use slambook_types::models::{College, CollegeStats, JoinStatus, User};

use super::users::insert_user_row;
use super::{OptionalExt, count};
use crate::Database;
use crate::models::{COLLEGE_COLUMNS, college_from_row, to_json};

/// Cross-tenant totals for the super admin dashboard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SystemTotals {
    pub colleges: u64,
    pub active_colleges: u64,
    pub users: u64,
    pub entries: u64,
    pub reported_entries: u64,
}

impl Database {
    /// Inserts the college and its first admin together.
    pub fn create_college_with_admin(&self, college: &College, admin: &User) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            insert_college_row(&tx, college)?;
            insert_user_row(&tx, admin)?;
            tx.commit()?;
            Ok(())
        })
    }

    pub fn insert_college(&self, college: &College) -> Result<()> {
        self.with_conn(|conn| insert_college_row(conn, college))
    }

    pub fn get_college(&self, id: &str) -> Result<Option<College>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {} FROM colleges WHERE id = ?1", COLLEGE_COLUMNS),
                [id],
                college_from_row,
            )
            .optional()
        })
    }

    pub fn get_college_by_code(&self, code: &str) -> Result<Option<College>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {} FROM colleges WHERE college_code = ?1", COLLEGE_COLUMNS),
                [code],
                college_from_row,
            )
            .optional()
        })
    }

    pub fn college_code_exists(&self, code: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM colleges WHERE college_code = ?1",
                [code],
                |row| row.get(0),
            )?;
            Ok(n > 0)
        })
    }

    pub fn list_colleges(&self) -> Result<Vec<College>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM colleges ORDER BY created_at, rowid",
                COLLEGE_COLUMNS
            ))?;
            let rows = stmt
                .query_map([], college_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Writes back every mutable field. Returns false when the college is gone.
    pub fn update_college(&self, college: &College) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE colleges SET name = ?2, email = ?3, phone = ?4, address = ?5, logo = ?6,
                    subscription = ?7, settings = ?8, is_active = ?9, updated_at = ?10
                 WHERE id = ?1",
                params![
                    college.id,
                    college.name,
                    college.email,
                    college.phone,
                    to_json(&college.address)?,
                    college.logo,
                    to_json(&college.subscription)?,
                    to_json(&college.settings)?,
                    college.is_active,
                    college.updated_at,
                ],
            )?;
            Ok(changed > 0)
        })
    }

    pub fn set_college_logo(&self, id: &str, logo: &str, now: DateTime<Utc>) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE colleges SET logo = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, logo, now],
            )?;
            Ok(changed > 0)
        })
    }

    pub fn college_stats(&self, college_id: &str) -> Result<CollegeStats> {
        self.with_conn(|conn| {
            let (total_users, active_users, pending): (i64, i64, i64) = conn.query_row(
                "SELECT COUNT(*),
                        COALESCE(SUM(is_active), 0),
                        COALESCE(SUM(join_status = ?2), 0)
                 FROM users WHERE college_id = ?1",
                params![college_id, JoinStatus::Pending.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )?;
            let entries: i64 = conn.query_row(
                "SELECT COUNT(*) FROM entries WHERE college_id = ?1",
                [college_id],
                |row| row.get(0),
            )?;
            Ok(CollegeStats {
                total_users: count(total_users),
                active_users: count(active_users),
                total_entries: count(entries),
                pending_requests: count(pending),
            })
        })
    }

    pub fn system_totals(&self) -> Result<SystemTotals> {
        self.with_conn(|conn| {
            let (colleges, active): (i64, i64) = conn.query_row(
                "SELECT COUNT(*), COALESCE(SUM(is_active), 0) FROM colleges",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            let users: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
            let (entries, reported): (i64, i64) = conn.query_row(
                "SELECT COUNT(*), COALESCE(SUM(is_reported), 0) FROM entries",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            Ok(SystemTotals {
                colleges: count(colleges),
                active_colleges: count(active),
                users: count(users),
                entries: count(entries),
                reported_entries: count(reported),
            })
        })
    }
}

fn insert_college_row(conn: &Connection, college: &College) -> Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO colleges ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            COLLEGE_COLUMNS
        ),
        params![
            college.id,
            college.college_code,
            college.name,
            college.email,
            college.phone,
            to_json(&college.address)?,
            college.logo,
            to_json(&college.subscription)?,
            to_json(&college.settings)?,
            college.is_active,
            college.created_at,
            college.updated_at,
        ],
    )?;
    Ok(())
}
