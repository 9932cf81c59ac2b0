use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::Engine;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::tprintln;

use super::principal::Identity;

pub type SessionToken = String;

#[derive(Debug, Clone)]
pub struct Session {
    pub token: SessionToken,
    pub identity: Identity,
    pub issued_at: Instant,
    pub expires_at: Instant,
}

/// Session-change notification delivered to long-lived subscribers.
/// Receivers are dropped when the subscribing page goes away.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    SignedIn(Identity),
    SignedOut(Uuid),
}

fn gen_token() -> String {
    // 128-bit random token base64url without padding
    let mut buf = [0u8; 32];
    let _ = getrandom::getrandom(&mut buf);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(buf)
}

struct Inner {
    ttl: Duration,
    sessions: RwLock<HashMap<SessionToken, Session>>,
    user_index: RwLock<HashMap<Uuid, HashSet<SessionToken>>>,
    revoked: RwLock<HashSet<SessionToken>>,
    events: broadcast::Sender<SessionEvent>,
}

#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new(Duration::from_secs(60 * 60))
    }
}

impl SessionManager {
    pub fn new(ttl: Duration) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(Inner {
                ttl,
                sessions: RwLock::new(HashMap::new()),
                user_index: RwLock::new(HashMap::new()),
                revoked: RwLock::new(HashSet::new()),
                events,
            }),
        }
    }

    pub fn issue(&self, identity: Identity) -> Session {
        let now = Instant::now();
        let token = gen_token();
        let sess = Session {
            token: token.clone(),
            identity: identity.clone(),
            issued_at: now,
            expires_at: now + self.inner.ttl,
        };
        {
            let mut m = self.inner.sessions.write();
            m.insert(token.clone(), sess.clone());
        }
        {
            let mut uidx = self.inner.user_index.write();
            uidx.entry(identity.id).or_default().insert(token);
        }
        let _ = self.inner.events.send(SessionEvent::SignedIn(identity.clone()));
        tprintln!("session.issue user={} ttl_secs={}", identity.email, self.inner.ttl.as_secs());
        sess
    }

    pub fn validate(&self, token: &str) -> Option<Identity> {
        // prune revoked
        if self.inner.revoked.read().contains(token) {
            return None;
        }
        let now = Instant::now();
        let mut drop_key: Option<String> = None;
        let out = {
            let map = self.inner.sessions.read();
            if let Some(sess) = map.get(token) {
                if sess.expires_at > now {
                    Some(sess.identity.clone())
                } else {
                    drop_key = Some(token.to_string());
                    None
                }
            } else {
                None
            }
        };
        if let Some(k) = drop_key {
            self.inner.sessions.write().remove(&k);
        }
        out
    }

    pub fn end(&self, token: &str) -> bool {
        let mut removed = false;
        if let Some(sess) = self.inner.sessions.write().remove(token) {
            removed = true;
            let uid = sess.identity.id;
            let mut idx = self.inner.user_index.write();
            if let Some(set) = idx.get_mut(&uid) {
                set.remove(token);
            }
            self.inner.revoked.write().insert(token.to_string());
            let _ = self.inner.events.send(SessionEvent::SignedOut(uid));
        }
        removed
    }

    /// Revoke every live session held by the user. Used by the gate to
    /// guarantee a role mismatch never leaves an authorized session behind.
    pub fn revoke_user(&self, user_id: Uuid) -> usize {
        let mut count = 0usize;
        if let Some(tokens) = self.inner.user_index.write().remove(&user_id) {
            let mut s = self.inner.sessions.write();
            let mut r = self.inner.revoked.write();
            for t in tokens.iter() {
                if s.remove(t).is_some() {
                    count += 1;
                }
                r.insert(t.clone());
            }
        }
        if count > 0 {
            let _ = self.inner.events.send(SessionEvent::SignedOut(user_id));
        }
        tprintln!("session.revoke user={} count={}", user_id, count);
        count
    }

    pub fn active_sessions(&self, user_id: Uuid) -> usize {
        self.inner
            .user_index
            .read()
            .get(&user_id)
            .map(|s| s.len())
            .unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> Identity {
        Identity { id: Uuid::new_v4(), email: "alice@example.com".into() }
    }

    #[test]
    fn issue_validate_end_round_trip() {
        let sm = SessionManager::default();
        let id = identity();
        let sess = sm.issue(id.clone());
        assert_eq!(sm.validate(&sess.token), Some(id.clone()));
        assert!(sm.end(&sess.token));
        assert_eq!(sm.validate(&sess.token), None);
        // ended tokens stay revoked
        assert!(!sm.end(&sess.token));
    }

    #[test]
    fn expired_sessions_validate_as_absent() {
        let sm = SessionManager::new(Duration::ZERO);
        let sess = sm.issue(identity());
        assert_eq!(sm.validate(&sess.token), None);
    }

    #[test]
    fn revoke_user_clears_all_tokens() {
        let sm = SessionManager::default();
        let id = identity();
        let s1 = sm.issue(id.clone());
        let s2 = sm.issue(id.clone());
        assert_eq!(sm.active_sessions(id.id), 2);
        assert_eq!(sm.revoke_user(id.id), 2);
        assert_eq!(sm.validate(&s1.token), None);
        assert_eq!(sm.validate(&s2.token), None);
        // the user index is cleared too, not just the session map
        assert_eq!(sm.active_sessions(id.id), 0);
    }

    #[test]
    fn subscribers_observe_sign_in_and_out() {
        let sm = SessionManager::default();
        let mut rx = sm.subscribe();
        let id = identity();
        let sess = sm.issue(id.clone());
        sm.end(&sess.token);
        match rx.try_recv().unwrap() {
            SessionEvent::SignedIn(got) => assert_eq!(got.id, id.id),
            other => panic!("expected SignedIn, got {:?}", other),
        }
        match rx.try_recv().unwrap() {
            SessionEvent::SignedOut(uid) => assert_eq!(uid, id.id),
            other => panic!("expected SignedOut, got {:?}", other),
        }
    }
}
