//! Tenant-scoped authorization. Every service call that touches a stored
//! resource asks `authorize` first; a denial is always surfaced as Forbidden
//! with a reason, never turned into an empty result or a NotFound.
//!
//! Rules, in precedence order:
//! 1. Notifications belong to their recipient alone.
//! 2. SUPER_ADMIN passes every tenant-scoped check.
//! 3. A resource in another tenant is off limits. System templates have no
//!    tenant: anyone may read them, only SUPER_ADMIN may change them.
//! 4. Administrative actions need COLLEGE_ADMIN inside the tenant.
//! 5. Entry mutation is for the writer (delete: writer or target).
//! 6. Entry visibility: PUBLIC for the tenant, otherwise writer, target and
//!    admins. FRIENDS_ONLY has no friend graph behind it and reads as PRIVATE.

use slambook_types::models::{Entry, Notification, Template, User, Visibility};
use thiserror::Error;

use crate::error::ApiError;
use crate::middleware::Principal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Read,
    Update,
    Delete,
    AddAttachment,
    RemoveAttachment,
    React,
    Report,
    /// Membership decisions, member lists, settings, templates, reports.
    Administer,
}

#[derive(Debug, Clone, Copy)]
pub enum Resource<'a> {
    /// A college as a whole, by id.
    College(&'a str),
    Member(&'a User),
    Entry(&'a Entry),
    Template(&'a Template),
    Notification(&'a Notification),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct Denied {
    pub reason: String,
}

impl Denied {
    fn new(reason: &str) -> Self {
        Self {
            reason: reason.to_string(),
        }
    }
}

impl From<Denied> for ApiError {
    fn from(denied: Denied) -> Self {
        ApiError::Forbidden(denied.reason)
    }
}

pub fn authorize(principal: &Principal, action: Action, resource: Resource<'_>) -> Result<(), Denied> {
    match resource {
        Resource::Notification(n) if n.user_id == principal.user_id => Ok(()),
        Resource::Notification(_) => Err(Denied::new("You can only manage your own notifications")),
        _ if principal.is_super_admin() => Ok(()),
        Resource::College(college_id) => {
            same_tenant(principal, college_id)?;
            match action {
                Action::Read => Ok(()),
                _ => require_admin(principal),
            }
        }
        Resource::Member(user) => {
            let college_id = user
                .college_id
                .as_deref()
                .ok_or_else(|| Denied::new("You don't have access to this user"))?;
            same_tenant(principal, college_id)?;
            match action {
                Action::Read => Ok(()),
                Action::Update if user.id == principal.user_id => Ok(()),
                _ => require_admin(principal),
            }
        }
        Resource::Template(template) => match template.college_id.as_deref() {
            None if action == Action::Read => Ok(()),
            None => Err(Denied::new("System templates can only be modified by the super admin")),
            Some(college_id) => {
                same_tenant(principal, college_id)?;
                match action {
                    Action::Read => Ok(()),
                    _ => require_admin(principal),
                }
            }
        },
        Resource::Entry(entry) => {
            same_tenant(principal, &entry.college_id)?;
            authorize_entry(principal, action, entry)
        }
    }
}

fn authorize_entry(principal: &Principal, action: Action, entry: &Entry) -> Result<(), Denied> {
    let me = principal.user_id.as_str();
    match action {
        Action::Update => {
            if entry.is_writer(me) {
                Ok(())
            } else {
                Err(Denied::new("You can only update your own entries"))
            }
        }
        Action::AddAttachment => {
            if entry.is_writer(me) {
                Ok(())
            } else {
                Err(Denied::new("You can only add attachments to your own entries"))
            }
        }
        Action::RemoveAttachment => {
            if entry.is_writer(me) {
                Ok(())
            } else {
                Err(Denied::new("You can only remove attachments from your own entries"))
            }
        }
        Action::Delete => {
            if entry.is_participant(me) {
                Ok(())
            } else {
                Err(Denied::new("You cannot delete this entry"))
            }
        }
        Action::Read | Action::React | Action::Report => {
            let visible = entry.is_participant(me)
                || principal.is_college_admin()
                || entry.visibility == Visibility::Public;
            if visible {
                Ok(())
            } else {
                Err(Denied::new("You don't have access to this entry"))
            }
        }
        Action::Administer => require_admin(principal),
    }
}

fn same_tenant(principal: &Principal, college_id: &str) -> Result<(), Denied> {
    if principal.belongs_to(college_id) {
        Ok(())
    } else {
        Err(Denied::new("Access to another college is not allowed"))
    }
}

fn require_admin(principal: &Principal) -> Result<(), Denied> {
    if principal.is_college_admin() {
        Ok(())
    } else {
        Err(Denied::new("College admin access required"))
    }
}
