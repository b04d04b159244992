//! First-boot data: the platform super admin and the system default template.
//! Both steps check before inserting, so running them on every start is safe.

use anyhow::Result;
use chrono::Utc;
use slambook_db::Database;
use slambook_types::models::{
    JoinRequest, Profile, Question, QuestionKind, Role, SlamBookSettings, Template, User,
};
use tracing::info;
use uuid::Uuid;

use crate::auth::{hash_password, normalize_email};
use crate::config::Config;
use crate::templates::SYSTEM_AUTHOR;

pub fn run(db: &Database, config: &Config) -> Result<()> {
    ensure_super_admin(db, config)?;
    ensure_system_template(db)?;
    Ok(())
}

pub fn ensure_super_admin(db: &Database, config: &Config) -> Result<()> {
    let email = normalize_email(&config.super_admin_email);
    if db.get_user_by_email(&email, None)?.is_some() {
        info!("Super admin {} exists", email);
        return Ok(());
    }

    let now = Utc::now();
    let admin = User {
        id: Uuid::new_v4().to_string(),
        college_id: None,
        email: email.clone(),
        password_hash: hash_password(&config.super_admin_password)?,
        role: Role::SuperAdmin,
        profile: Profile {
            first_name: "Super".into(),
            last_name: "Admin".into(),
            ..Profile::default()
        },
        slambook_settings: SlamBookSettings::default(),
        join_request: JoinRequest::pre_approved(now),
        email_verified: true,
        is_active: true,
        created_at: now,
        updated_at: now,
        last_login_at: None,
    };
    db.insert_user(&admin)?;
    info!("Created super admin {}", email);
    Ok(())
}

pub fn ensure_system_template(db: &Database) -> Result<()> {
    if let Some(existing) = db.default_template(None)? {
        info!("Default system template exists: {}", existing.name);
        return Ok(());
    }

    let now = Utc::now();
    let template = Template {
        id: Uuid::new_v4().to_string(),
        college_id: None,
        name: "Classic Slam Book".into(),
        description: Some(
            "The traditional slam book template with heartfelt questions about friendship and memories"
                .into(),
        ),
        questions: classic_questions(),
        is_default: true,
        is_active: true,
        created_by: Some(SYSTEM_AUTHOR.into()),
        created_at: now,
        updated_at: now,
    };
    db.insert_template(&template)?;
    info!("Created default system template: {}", template.name);
    Ok(())
}

fn question(order: i32, text: &str, kind: QuestionKind, required: bool, placeholder: Option<&str>) -> Question {
    Question {
        id: Uuid::new_v4().to_string(),
        text: text.into(),
        kind,
        required,
        placeholder: placeholder.map(str::to_string),
        order: Some(order),
    }
}

fn textarea(max: u32) -> QuestionKind {
    QuestionKind::Textarea { max_length: Some(max) }
}

fn classic_questions() -> Vec<Question> {
    let personalities = [
        "Friendly & Outgoing",
        "Quiet & Thoughtful",
        "Funny & Energetic",
        "Smart & Analytical",
        "Creative & Artistic",
        "Kind & Caring",
    ];
    vec![
        question(
            1,
            "What nickname would you give me?",
            QuestionKind::Text { max_length: Some(50) },
            true,
            Some("Enter a cool nickname..."),
        ),
        question(
            2,
            "What was your first impression of me?",
            textarea(500),
            true,
            Some("Share your honest first impression..."),
        ),
        question(
            3,
            "What's your favorite memory with me?",
            textarea(1000),
            false,
            Some("Describe a memorable moment we shared..."),
        ),
        question(
            4,
            "How would you describe my personality?",
            QuestionKind::Choice {
                options: personalities.iter().map(|s| s.to_string()).collect(),
            },
            true,
            None,
        ),
        question(
            5,
            "Rate our friendship (1-10)",
            QuestionKind::Rating { min_value: 1, max_value: 10 },
            true,
            None,
        ),
        question(
            6,
            "What do you like most about me?",
            textarea(500),
            false,
            Some("What makes me special to you?"),
        ),
        question(
            7,
            "What advice would you give me?",
            textarea(500),
            false,
            Some("Share some wisdom or advice..."),
        ),
        question(
            8,
            "What do you wish for my future?",
            textarea(500),
            false,
            Some("Your wishes and hopes for me..."),
        ),
        question(
            9,
            "If you could say one thing to me, what would it be?",
            textarea(1000),
            false,
            Some("Your final message to me..."),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let config = Config::default();

        run(&db, &config).unwrap();
        run(&db, &config).unwrap();

        let admin = db.get_user_by_email("admin@slambook.com", None).unwrap().unwrap();
        assert_eq!(admin.role, Role::SuperAdmin);
        assert!(admin.join_request.is_approved());

        let system = db.active_templates(None).unwrap();
        assert_eq!(system.len(), 1);
        assert!(system[0].is_default);
        assert_eq!(system[0].questions.len(), 9);
        assert_eq!(system[0].created_by.as_deref(), Some(SYSTEM_AUTHOR));
    }

    #[test]
    fn deactivated_system_default_is_not_seeded_again() {
        let db = Database::open_in_memory().unwrap();
        let config = Config::default();
        run(&db, &config).unwrap();

        let seeded = db.default_template(None).unwrap().unwrap();
        assert!(db.set_template_active(&seeded.id, false, Utc::now()).unwrap());
        run(&db, &config).unwrap();

        assert!(db.active_templates(None).unwrap().is_empty());
        assert_eq!(db.default_template(None).unwrap().unwrap().id, seeded.id);
    }
}
