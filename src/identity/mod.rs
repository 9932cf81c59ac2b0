//! Central identity and session management for the portal service.
//! Keep the public surface thin and split implementation across sub-modules.

mod gate;
mod principal;
mod provider;
mod session;
mod store;

pub use gate::{AuthGate, Decision};
pub use principal::{Identity, Profile, RecordPatch, RoleRecord};
pub use provider::{IdentityProvider, LocalIdentityProvider};
pub use session::{Session, SessionEvent, SessionManager, SessionToken};
pub use store::{DocumentRoleStore, RoleBackend, RoleStore, TableRoleStore, UnknownBackend};
