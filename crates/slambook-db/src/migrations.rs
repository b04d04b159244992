use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS colleges (
            id              TEXT PRIMARY KEY,
            college_code    TEXT NOT NULL UNIQUE,
            name            TEXT NOT NULL,
            email           TEXT NOT NULL,
            phone           TEXT NOT NULL,
            address         TEXT NOT NULL,
            logo            TEXT,
            subscription    TEXT NOT NULL,
            settings        TEXT NOT NULL,
            is_active       INTEGER NOT NULL DEFAULT 1,
            created_at      TEXT NOT NULL,
            updated_at      TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS users (
            id                      TEXT PRIMARY KEY,
            college_id              TEXT REFERENCES colleges(id),
            email                   TEXT NOT NULL,
            password_hash           TEXT NOT NULL,
            role                    TEXT NOT NULL,
            profile                 TEXT NOT NULL,
            slambook_settings       TEXT NOT NULL,
            join_status             TEXT NOT NULL,
            join_requested_at       TEXT NOT NULL,
            join_approved_by        TEXT,
            join_approved_at        TEXT,
            join_rejection_reason   TEXT,
            email_verified          INTEGER NOT NULL DEFAULT 0,
            is_active               INTEGER NOT NULL DEFAULT 1,
            created_at              TEXT NOT NULL,
            updated_at              TEXT NOT NULL,
            last_login_at           TEXT
        );

        -- One account per email per college; super admins share the empty scope.
        CREATE UNIQUE INDEX IF NOT EXISTS idx_users_email_college
            ON users(email, COALESCE(college_id, ''));

        CREATE INDEX IF NOT EXISTS idx_users_college_status
            ON users(college_id, join_status);

        CREATE TABLE IF NOT EXISTS entries (
            id              TEXT PRIMARY KEY,
            college_id      TEXT NOT NULL REFERENCES colleges(id),
            written_for     TEXT NOT NULL REFERENCES users(id),
            written_by      TEXT NOT NULL REFERENCES users(id),
            is_anonymous    INTEGER NOT NULL DEFAULT 0,
            responses       TEXT NOT NULL,
            ratings         TEXT NOT NULL,
            visibility      TEXT NOT NULL,
            is_reported     INTEGER NOT NULL DEFAULT 0,
            report_reason   TEXT,
            reported_by     TEXT,
            reported_at     TEXT,
            created_at      TEXT NOT NULL,
            updated_at      TEXT NOT NULL,
            UNIQUE(written_for, written_by)
        );

        CREATE INDEX IF NOT EXISTS idx_entries_written_by
            ON entries(written_by, created_at);

        CREATE INDEX IF NOT EXISTS idx_entries_college_reported
            ON entries(college_id, is_reported);

        CREATE TABLE IF NOT EXISTS attachments (
            id          TEXT PRIMARY KEY,
            entry_id    TEXT NOT NULL REFERENCES entries(id) ON DELETE CASCADE,
            kind        TEXT NOT NULL,
            url         TEXT NOT NULL,
            filename    TEXT NOT NULL,
            size        INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_attachments_entry
            ON attachments(entry_id);

        CREATE TABLE IF NOT EXISTS reactions (
            entry_id    TEXT NOT NULL REFERENCES entries(id) ON DELETE CASCADE,
            user_id     TEXT NOT NULL REFERENCES users(id),
            kind        TEXT NOT NULL,
            created_at  TEXT NOT NULL,
            UNIQUE(entry_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS templates (
            id              TEXT PRIMARY KEY,
            college_id      TEXT REFERENCES colleges(id),
            name            TEXT NOT NULL,
            description     TEXT,
            questions       TEXT NOT NULL,
            is_default      INTEGER NOT NULL DEFAULT 0,
            is_active       INTEGER NOT NULL DEFAULT 1,
            created_by      TEXT,
            created_at      TEXT NOT NULL,
            updated_at      TEXT NOT NULL
        );

        -- At most one default per scope; system templates share the empty scope.
        CREATE UNIQUE INDEX IF NOT EXISTS idx_templates_one_default
            ON templates(COALESCE(college_id, '')) WHERE is_default = 1;

        CREATE TABLE IF NOT EXISTS notifications (
            id              TEXT PRIMARY KEY,
            college_id      TEXT,
            user_id         TEXT NOT NULL REFERENCES users(id),
            kind            TEXT NOT NULL,
            content         TEXT NOT NULL,
            related_kind    TEXT,
            related_id      TEXT,
            is_read         INTEGER NOT NULL DEFAULT 0,
            created_at      TEXT NOT NULL,
            read_at         TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_notifications_user
            ON notifications(user_id, created_at);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run(&conn).unwrap();
        run(&conn).unwrap();

        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 7);
    }
}
