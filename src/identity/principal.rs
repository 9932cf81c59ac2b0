use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::portal::Portal;

/// An authenticated end-user principal issued by the identity provider.
/// Created at sign-up; the session token is reissued per login.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Identity {
    pub id: Uuid,
    pub email: String,
}

/// Persisted mapping from an identity to its portal role and profile fields.
/// Exactly one record exists per identity; the role, once set, determines
/// which portal the identity may enter and never changes afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoleRecord {
    pub role: Portal,
    pub full_name: String,
    pub email: String,
    #[serde(default)]
    pub department: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl RoleRecord {
    pub fn new(role: Portal, full_name: impl Into<String>, email: impl Into<String>) -> Self {
        let now_ms = chrono::Utc::now().timestamp_millis();
        Self {
            role,
            full_name: full_name.into(),
            email: email.into(),
            department: None,
            created_at: now_ms,
            updated_at: now_ms,
        }
    }
}

/// Partial update applied to an existing role record. Only the profile
/// fields are patchable; the role itself is immutable after creation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordPatch {
    pub full_name: Option<String>,
    pub department: Option<String>,
}

/// Hydrated profile display state handed to the dashboard shell once the
/// gate check resolves.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Profile {
    pub user_id: Uuid,
    pub role: Portal,
    pub full_name: String,
    pub email: String,
    #[serde(default)]
    pub department: Option<String>,
}

impl Profile {
    pub fn from_record(identity: &Identity, record: &RoleRecord) -> Self {
        Self {
            user_id: identity.id,
            role: record.role,
            full_name: record.full_name.clone(),
            email: record.email.clone(),
            department: record.department.clone(),
        }
    }
}

/// Default display name when a record's name is absent or still the
/// sign-up placeholder: the local part of the email address.
pub(crate) fn default_display_name(email: &str) -> String {
    email.split('@').next().unwrap_or(email).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_name_defaults_to_email_local_part() {
        assert_eq!(default_display_name("alice@example.com"), "alice");
        assert_eq!(default_display_name("no-at-sign"), "no-at-sign");
    }
}
