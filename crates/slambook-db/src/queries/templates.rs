use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use slambook_types::models::Template;

use super::OptionalExt;
use crate::Database;
use crate::models::{TEMPLATE_COLUMNS, template_from_row, to_json};

impl Database {
    /// A default template first clears any other default in its scope.
    pub fn insert_template(&self, template: &Template) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            if template.is_default {
                clear_default(&tx, template.college_id.as_deref(), template.updated_at)?;
            }
            tx.execute(
                &format!(
                    "INSERT INTO templates ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    TEMPLATE_COLUMNS
                ),
                params![
                    template.id,
                    template.college_id,
                    template.name,
                    template.description,
                    to_json(&template.questions)?,
                    template.is_default,
                    template.is_active,
                    template.created_by,
                    template.created_at,
                    template.updated_at,
                ],
            )?;
            tx.commit()?;
            Ok(())
        })
    }

    pub fn get_template(&self, id: &str) -> Result<Option<Template>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {} FROM templates WHERE id = ?1", TEMPLATE_COLUMNS),
                [id],
                template_from_row,
            )
            .optional()
        })
    }

    /// Active templates of one scope, oldest first. `None` is the system scope.
    pub fn active_templates(&self, college_id: Option<&str>) -> Result<Vec<Template>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM templates
                 WHERE COALESCE(college_id, '') = COALESCE(?1, '') AND is_active = 1
                 ORDER BY created_at, rowid",
                TEMPLATE_COLUMNS
            ))?;
            let rows = stmt
                .query_map(params![college_id], template_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// The default of one scope, if any. Deactivating a template does not
    /// clear its default flag.
    pub fn default_template(&self, college_id: Option<&str>) -> Result<Option<Template>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!(
                    "SELECT {} FROM templates
                     WHERE COALESCE(college_id, '') = COALESCE(?1, '')
                       AND is_default = 1",
                    TEMPLATE_COLUMNS
                ),
                params![college_id],
                template_from_row,
            )
            .optional()
        })
    }

    /// Writes name, description and questions.
    pub fn update_template_content(&self, template: &Template) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE templates SET name = ?2, description = ?3, questions = ?4, updated_at = ?5
                 WHERE id = ?1",
                params![
                    template.id,
                    template.name,
                    template.description,
                    to_json(&template.questions)?,
                    template.updated_at,
                ],
            )?;
            Ok(changed > 0)
        })
    }

    pub fn set_template_active(&self, id: &str, active: bool, now: DateTime<Utc>) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE templates SET is_active = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, active, now],
            )?;
            Ok(changed > 0)
        })
    }

    /// Makes `id` the only default of its scope and activates it, atomically.
    pub fn set_default_template(&self, id: &str, now: DateTime<Utc>) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let scope: Option<Option<String>> = tx
                .query_row("SELECT college_id FROM templates WHERE id = ?1", [id], |row| {
                    row.get(0)
                })
                .optional()?;
            let Some(scope) = scope else {
                return Ok(false);
            };
            clear_default(&tx, scope.as_deref(), now)?;
            tx.execute(
                "UPDATE templates SET is_default = 1, is_active = 1, updated_at = ?2 WHERE id = ?1",
                params![id, now],
            )?;
            tx.commit()?;
            Ok(true)
        })
    }

    pub fn delete_template(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let removed = conn.execute("DELETE FROM templates WHERE id = ?1", [id])?;
            Ok(removed > 0)
        })
    }
}

fn clear_default(conn: &Connection, college_id: Option<&str>, now: DateTime<Utc>) -> Result<()> {
    conn.execute(
        "UPDATE templates SET is_default = 0, updated_at = ?2
         WHERE COALESCE(college_id, '') = COALESCE(?1, '') AND is_default = 1",
        params![college_id, now],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::is_unique_violation;
    use crate::queries::fixtures;
    use slambook_types::models::{Question, QuestionKind};

    fn template(college_id: Option<&str>, name: &str, is_default: bool) -> Template {
        let now = Utc::now();
        Template {
            id: uuid::Uuid::new_v4().to_string(),
            college_id: college_id.map(str::to_string),
            name: name.to_string(),
            description: None,
            questions: vec![Question {
                id: "q1".into(),
                text: "Nickname?".into(),
                kind: QuestionKind::Text { max_length: Some(50) },
                required: true,
                placeholder: None,
                order: Some(1),
            }],
            is_default,
            is_active: true,
            created_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn defaults_in(db: &Database, college_id: Option<&str>) -> i64 {
        db.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM templates
                 WHERE COALESCE(college_id, '') = COALESCE(?1, '') AND is_default = 1",
                params![college_id],
                |row| row.get(0),
            )?)
        })
        .unwrap()
    }

    #[test]
    fn inserting_a_default_demotes_the_previous_one() {
        let db = Database::open_in_memory().unwrap();
        let college = fixtures::college("TMPL0001");
        db.insert_college(&college).unwrap();
        let scope = Some(college.id.as_str());

        let a = template(scope, "A", true);
        let b = template(scope, "B", true);
        db.insert_template(&a).unwrap();
        db.insert_template(&b).unwrap();

        assert_eq!(defaults_in(&db, scope), 1);
        assert_eq!(db.default_template(scope).unwrap().unwrap().id, b.id);
        assert!(!db.get_template(&a.id).unwrap().unwrap().is_default);
    }

    #[test]
    fn set_default_swaps_within_scope_only() {
        let db = Database::open_in_memory().unwrap();
        let college = fixtures::college("TMPL0002");
        db.insert_college(&college).unwrap();
        let scope = Some(college.id.as_str());

        let system = template(None, "System", true);
        let a = template(scope, "A", true);
        let mut b = template(scope, "B", false);
        b.is_active = false;
        for t in [&system, &a, &b] {
            db.insert_template(t).unwrap();
        }

        assert!(db.set_default_template(&b.id, Utc::now()).unwrap());

        let b = db.get_template(&b.id).unwrap().unwrap();
        assert!(b.is_default && b.is_active);
        assert!(!db.get_template(&a.id).unwrap().unwrap().is_default);
        assert!(db.get_template(&system.id).unwrap().unwrap().is_default);
        assert_eq!(defaults_in(&db, scope), 1);
        assert_eq!(defaults_in(&db, None), 1);

        assert!(!db.set_default_template("missing", Utc::now()).unwrap());
    }

    #[test]
    fn deactivated_default_is_still_the_default() {
        let db = Database::open_in_memory().unwrap();
        let college = fixtures::college("TMPL0003");
        db.insert_college(&college).unwrap();
        let scope = Some(college.id.as_str());

        let a = template(scope, "A", true);
        db.insert_template(&a).unwrap();
        assert!(db.set_template_active(&a.id, false, Utc::now()).unwrap());

        let found = db.default_template(scope).unwrap().unwrap();
        assert_eq!(found.id, a.id);
        assert!(!found.is_active);
        assert!(db.active_templates(scope).unwrap().is_empty());
    }

    #[test]
    fn index_rejects_a_second_default_written_directly() {
        let db = Database::open_in_memory().unwrap();
        db.insert_template(&template(None, "One", true)).unwrap();
        let err = db
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO templates (id, name, questions, is_default, created_at, updated_at)
                     VALUES ('x', 'Two', '[]', 1, '2024-01-01', '2024-01-01')",
                    [],
                )?;
                Ok(())
            })
            .unwrap_err();
        assert!(is_unique_violation(&err));
    }

    #[test]
    fn active_listing_skips_deactivated() {
        let db = Database::open_in_memory().unwrap();
        let t = template(None, "Classic", false);
        db.insert_template(&t).unwrap();
        assert_eq!(db.active_templates(None).unwrap().len(), 1);

        db.set_template_active(&t.id, false, Utc::now()).unwrap();
        assert!(db.active_templates(None).unwrap().is_empty());
        assert!(db.delete_template(&t.id).unwrap());
        assert!(db.get_template(&t.id).unwrap().is_none());
    }
}
