use serde_json::json;

use crate::app::events::Event;
use crate::app::models::user::User;

pub const USER_CREATED: &str = "user.created";
pub const USER_UPDATED: &str = "user.updated";
pub const USER_DELETED: &str = "user.deleted";

#[derive(Debug, Clone)]
pub struct UserCreatedEvent {
    pub user: User,
    pub trace_id: String,
}

impl UserCreatedEvent {
    pub fn new(user: User, trace_id: String) -> Self {
        Self { user, trace_id }
    }
}

impl Event for UserCreatedEvent {
    fn event_name(&self) -> &'static str {
        USER_CREATED
    }

    fn trace_id(&self) -> &str {
        &self.trace_id
    }

    fn to_json(&self) -> serde_json::Value {
        json!({ "user": self.user })
    }
}

/// Carries both projections of the user so subscribers can tell which fields
/// moved without re-reading the store.
#[derive(Debug, Clone)]
pub struct UserUpdatedEvent {
    pub user: User,
    pub old_user: User,
    pub changes: Vec<String>,
    pub trace_id: String,
}

impl UserUpdatedEvent {
    pub fn new(user: User, old_user: User, trace_id: String) -> Self {
        let mut changes = Vec::new();
        if user.first_name != old_user.first_name {
            changes.push("first_name".to_string());
        }
        if user.last_name != old_user.last_name {
            changes.push("last_name".to_string());
        }
        if user.email != old_user.email {
            changes.push("email".to_string());
        }
        if user.birthdate != old_user.birthdate {
            changes.push("birthdate".to_string());
        }
        if user.timezone != old_user.timezone {
            changes.push("timezone".to_string());
        }

        Self { user, old_user, changes, trace_id }
    }
}

impl Event for UserUpdatedEvent {
    fn event_name(&self) -> &'static str {
        USER_UPDATED
    }

    fn trace_id(&self) -> &str {
        &self.trace_id
    }

    fn to_json(&self) -> serde_json::Value {
        json!({
            "user": self.user,
            "old_user": self.old_user,
            "changes": self.changes,
        })
    }
}

#[derive(Debug, Clone)]
pub struct UserDeletedEvent {
    pub user: User,
    pub trace_id: String,
}

impl UserDeletedEvent {
    pub fn new(user: User, trace_id: String) -> Self {
        Self { user, trace_id }
    }
}

impl Event for UserDeletedEvent {
    fn event_name(&self) -> &'static str {
        USER_DELETED
    }

    fn trace_id(&self) -> &str {
        &self.trace_id
    }

    fn to_json(&self) -> serde_json::Value {
        json!({ "user": self.user })
    }
}
