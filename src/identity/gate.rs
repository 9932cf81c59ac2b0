//! The auth gate: decides, for a given portal, whether the current session
//! may proceed, and performs the side effects of login and signup.
//!
//! Every protected navigation funnels through [`AuthGate::check_session`],
//! which returns one typed [`Decision`] instead of page-local role checks.

use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::portal::{Portal, LANDING_PAGE};
use crate::tprintln;

use super::principal::{default_display_name, Identity, Profile, RecordPatch, RoleRecord};
use super::provider::IdentityProvider;
use super::session::{Session, SessionManager};
use super::store::RoleStore;

/// Outcome of a per-navigation gate check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Session is valid and the stored role matches the portal; the page
    /// hydrates its profile display state from the payload.
    Allow(Profile),
    /// No active session: send the caller to the portal's auth page.
    Redirect { target: String },
    /// Role mismatch: the session has been terminated and the caller is
    /// sent to the public landing page with a denial notice.
    Deny { target: String, notice: String },
}

/// Role record lookup outcome. An unrecognised persisted role tag is kept
/// distinct from absence: it must deny, while absence may first-time-complete.
enum RoleLookup {
    Record(RoleRecord),
    Absent,
    UnknownRole,
}

pub struct AuthGate {
    provider: Arc<dyn IdentityProvider>,
    roles: Arc<dyn RoleStore>,
    sessions: SessionManager,
}

impl AuthGate {
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        roles: Arc<dyn RoleStore>,
        sessions: SessionManager,
    ) -> Self {
        Self { provider, roles, sessions }
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Create an identity and persist its role record. The record takes the
    /// role of the portal the form was opened from; first write wins.
    pub fn sign_up(
        &self,
        email: &str,
        password: &str,
        full_name: &str,
        portal: Portal,
    ) -> AppResult<Identity> {
        let identity = self.provider.create_account(email, password)?;
        if matches!(self.lookup(identity.id)?, RoleLookup::Absent) {
            let full_name = if full_name.trim().is_empty() {
                default_display_name(&identity.email)
            } else {
                full_name.trim().to_string()
            };
            self.roles
                .write_record(identity.id, RoleRecord::new(portal, full_name, identity.email.clone()))?;
        }
        info!(user = %identity.email, portal = %portal, "gate.sign_up");
        Ok(identity)
    }

    /// Authenticate and admit into the portal, issuing a session on success.
    ///
    /// A role mismatch revokes every session the identity holds before the
    /// error is returned: the caller must never be left holding an
    /// authenticated-but-unauthorized session.
    pub fn sign_in(&self, email: &str, password: &str, portal: Portal) -> AppResult<(Session, Profile)> {
        let identity = self.provider.authenticate(email, password)?;
        let record = match self.lookup(identity.id)? {
            RoleLookup::Record(rec) if rec.role == portal => rec,
            RoleLookup::Record(rec) => {
                self.sessions.revoke_user(identity.id);
                tprintln!("gate.sign_in denied user={} held={} wanted={}", identity.email, rec.role, portal);
                return Err(AppError::access_denied(
                    "role_mismatch".to_string(),
                    format!("you do not have {} access", portal.as_str()),
                ));
            }
            RoleLookup::UnknownRole => {
                self.sessions.revoke_user(identity.id);
                return Err(AppError::access_denied(
                    "role_mismatch".to_string(),
                    format!("you do not have {} access", portal.as_str()),
                ));
            }
            RoleLookup::Absent => {
                // First-time completion: the identity exists but carries no
                // role record yet, so it takes the role of this portal.
                let rec = RoleRecord::new(
                    portal,
                    default_display_name(&identity.email),
                    identity.email.clone(),
                );
                self.roles.write_record(identity.id, rec.clone())?;
                rec
            }
        };
        let session = self.sessions.issue(identity.clone());
        info!(user = %identity.email, portal = %portal, "gate.sign_in");
        Ok((session, Profile::from_record(&identity, &record)))
    }

    /// Per-navigation session check invoked by the portal guard.
    pub fn check_session(&self, token: Option<&str>, portal: Portal) -> AppResult<Decision> {
        let Some(token) = token else {
            return Ok(Decision::Redirect { target: portal.auth_path() });
        };
        let Some(identity) = self.sessions.validate(token) else {
            return Ok(Decision::Redirect { target: portal.auth_path() });
        };
        match self.lookup(identity.id)? {
            RoleLookup::Record(rec) if rec.role == portal => {
                let rec = self.backfill_display_name(identity.id, rec)?;
                Ok(Decision::Allow(Profile::from_record(&identity, &rec)))
            }
            _ => {
                // Unknown, missing or mismatched role: terminate the session
                // before redirecting so no authorized session survives.
                self.sessions.end(token);
                Ok(Decision::Deny {
                    target: LANDING_PAGE.to_string(),
                    notice: format!("you do not have access to the {}", portal.title()),
                })
            }
        }
    }

    /// End the identity provider session and return to the landing page.
    pub fn logout(&self, token: &str) -> bool {
        self.sessions.end(token)
    }

    fn lookup(&self, id: Uuid) -> AppResult<RoleLookup> {
        match self.roles.read_record(id) {
            Ok(Some(rec)) => Ok(RoleLookup::Record(rec)),
            Ok(None) => Ok(RoleLookup::Absent),
            Err(e) if e.code_str() == "role_tag" => Ok(RoleLookup::UnknownRole),
            Err(e) => Err(e),
        }
    }

    fn backfill_display_name(&self, id: Uuid, mut rec: RoleRecord) -> AppResult<RoleRecord> {
        if rec.full_name.trim().is_empty() || rec.full_name == "New User" {
            let name = default_display_name(&rec.email);
            self.roles.update_record(
                id,
                RecordPatch { full_name: Some(name.clone()), department: None },
            )?;
            rec.full_name = name;
        }
        Ok(rec)
    }
}
