//!
//! campusgate HTTP server
//! ----------------------
//! Axum-based HTTP API for the portal service.
//!
//! Responsibilities:
//! - Session management with a simple cookie + CSRF token model.
//! - Signup/login/logout endpoints backed by the auth gate.
//! - A single portal guard layer that evaluates the gate's typed decision
//!   once per navigation and converts it to pass-through, redirect or denial.
//! - Dashboard shell endpoints serving the profile plus role-scoped
//!   navigation for each portal.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, Request, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::{broadcast, RwLock};
use tracing::info;

use crate::error::AppError;
use crate::identity::{
    AuthGate, Decision, LocalIdentityProvider, RoleBackend, SessionEvent, SessionManager,
};
use crate::portal::{is_nav_page, nav_links, Portal, LANDING_PAGE};

const SESSION_COOKIE: &str = "campusgate_session";

/// Shared server state injected into all handlers.
#[derive(Clone)]
pub struct AppState {
    pub gate: Arc<AuthGate>,
    /// Session token -> CSRF token mapping
    pub csrf_tokens: Arc<RwLock<HashMap<String, String>>>,
}

fn log_startup(data_root: &str, backend: RoleBackend) {
    let cwd = std::env::current_dir().ok();
    let user = std::env::var("USER").or_else(|_| std::env::var("USERNAME")).ok();
    info!(
        target: "startup",
        "campusgate starting. cwd={:?}, user={:?}, data_root={:?}, role_backend={:?}",
        cwd, user, data_root, backend
    );
}

/// Start the campusgate HTTP server bound to the given port.
///
/// Builds the identity provider and the selected role store backend under
/// `data_root`, wires the auth gate, and mounts all routes.
pub async fn run_with_port(http_port: u16, data_root: &str, backend: RoleBackend) -> anyhow::Result<()> {
    log_startup(data_root, backend);
    std::fs::create_dir_all(data_root)?;

    let provider = Arc::new(LocalIdentityProvider::new(data_root));
    let roles = backend.open(std::path::Path::new(data_root));
    let gate = Arc::new(AuthGate::new(provider, roles, SessionManager::default()));

    let state = AppState {
        gate,
        csrf_tokens: Arc::new(RwLock::new(HashMap::new())),
    };

    // Background CSRF sweeper: sessions can end outside the logout path
    // (TTL expiry, revocation on role mismatch), so their CSRF tokens are
    // pruned here rather than only on explicit logout.
    spawn_csrf_sweeper(state.clone());

    let app = router(state);

    let addr: SocketAddr = format!("0.0.0.0:{}", http_port).parse()?;
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

pub fn router(state: AppState) -> Router {
    let guarded = Router::new()
        .route("/{portal}", get(dashboard))
        .route("/{portal}/{page}", get(portal_page))
        .layer(middleware::from_fn_with_state(state.clone(), portal_guard));

    Router::new()
        .route("/", get(|| async { "campusgate ok" }))
        .route("/auth/{portal}/signup", post(signup))
        .route("/auth/{portal}/login", post(login))
        .route("/logout", post(logout))
        .route("/csrf", get(get_csrf))
        .route("/session/{portal}", get(session_probe))
        .nest("/portal", guarded)
        .with_state(state)
}

fn parse_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    let cookie = headers.get("cookie").or_else(|| headers.get("Cookie"))?;
    let s = cookie.to_str().ok()?;
    for part in s.split(';') {
        let p = part.trim();
        if let Some(eq) = p.find('=') {
            let (k, v) = p.split_at(eq);
            if k == name {
                return Some(v[1..].to_string());
            }
        }
    }
    None
}

fn session_token(headers: &HeaderMap) -> Option<String> {
    parse_cookie(headers, SESSION_COOKIE)
}

fn set_session_cookie(token: &str) -> HeaderValue {
    // Secure, HttpOnly cookie scoped to path / with SameSite=Strict
    HeaderValue::from_str(&format!(
        "{}={}; HttpOnly; Secure; SameSite=Strict; Path=/",
        SESSION_COOKIE, token
    ))
    .unwrap()
}

fn clear_session_cookie() -> HeaderValue {
    HeaderValue::from_str(&format!(
        "{}=deleted; Expires=Thu, 01 Jan 1970 00:00:00 GMT; HttpOnly; Secure; SameSite=Strict; Path=/",
        SESSION_COOKIE
    ))
    .unwrap()
}

fn gen_csrf() -> String {
    let mut bytes = [0u8; 32];
    let _ = getrandom::getrandom(&mut bytes);
    let mut csrf = String::with_capacity(64);
    use std::fmt::Write as _;
    for b in &bytes {
        let _ = write!(&mut csrf, "{:02x}", b);
    }
    csrf
}

/// Drop CSRF tokens whose session no longer validates.
async fn prune_stale_csrf(gate: &AuthGate, csrf_tokens: &RwLock<HashMap<String, String>>) {
    let mut cmap = csrf_tokens.write().await;
    cmap.retain(|token, _| gate.sessions().validate(token).is_some());
}

/// Sweep the CSRF map on every sign-out notification, with a periodic tick
/// as a backstop for sessions that end purely by TTL expiry.
fn spawn_csrf_sweeper(state: AppState) {
    tokio::spawn(async move {
        let mut rx = state.gate.sessions().subscribe();
        let mut tick = tokio::time::interval(std::time::Duration::from_secs(60));
        loop {
            let sweep = tokio::select! {
                ev = rx.recv() => match ev {
                    Ok(SessionEvent::SignedOut(_)) => true,
                    Ok(_) => false,
                    Err(broadcast::error::RecvError::Lagged(_)) => true,
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = tick.tick() => true,
            };
            if sweep {
                prune_stale_csrf(&state.gate, &state.csrf_tokens).await;
            }
        }
    });
}

async fn validate_csrf(state: &AppState, headers: &HeaderMap) -> bool {
    let Some(token) = session_token(headers) else { return false };
    let Some(provided) = headers.get("x-csrf-token").and_then(|v| v.to_str().ok()) else {
        return false;
    };
    let cmap = state.csrf_tokens.read().await;
    match cmap.get(&token) {
        Some(expected) => expected == provided,
        None => false,
    }
}

/// Extract the portal segment of a guarded navigation: `/portal/{portal}[/..]`.
fn portal_from_path(path: &str) -> Option<Portal> {
    let rest = path.strip_prefix("/portal/").unwrap_or(path.strip_prefix('/').unwrap_or(path));
    let seg = rest.split('/').next().unwrap_or("");
    Portal::from_str(seg).ok()
}

/// The portal guard: one gate evaluation per navigation.
///
/// Allow passes through with the hydrated profile attached; Redirect sends
/// the caller to the portal's auth page; Deny redirects to the landing page
/// carrying the denial notice, the session already terminated by the gate.
async fn portal_guard(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let Some(portal) = portal_from_path(req.uri().path()) else {
        return AppError::user("unknown_portal".to_string(), "unknown portal".to_string())
            .into_response();
    };
    let token = session_token(req.headers());
    match state.gate.check_session(token.as_deref(), portal) {
        Ok(Decision::Allow(profile)) => {
            let mut req = req;
            req.extensions_mut().insert(profile);
            next.run(req).await
        }
        Ok(Decision::Redirect { target }) => see_other(&target, json!({ "status": "redirect" })),
        Ok(Decision::Deny { target, notice }) => {
            let mut resp = see_other(&target, json!({ "status": "denied", "message": notice }));
            resp.headers_mut().insert("Set-Cookie", clear_session_cookie());
            resp
        }
        Err(e) => e.into_response(),
    }
}

fn see_other(location: &str, body: serde_json::Value) -> Response {
    Response::builder()
        .status(StatusCode::SEE_OTHER)
        .header("Location", location)
        .header("Content-Type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

#[derive(Debug, Deserialize)]
struct SignupPayload {
    email: String,
    password: String,
    #[serde(default)]
    full_name: String,
}

#[derive(Debug, Deserialize)]
struct LoginPayload {
    email: String,
    password: String,
}

async fn signup(
    State(state): State<AppState>,
    Path(portal): Path<String>,
    Json(payload): Json<SignupPayload>,
) -> Response {
    let portal = match Portal::from_str(&portal) {
        Ok(p) => p,
        Err(e) => return e.into_response(),
    };
    match state.gate.sign_up(&payload.email, &payload.password, &payload.full_name, portal) {
        Ok(identity) => (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "message": "Account created! You can now login with your credentials",
                "user_id": identity.id,
            })),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

async fn login(
    State(state): State<AppState>,
    Path(portal): Path<String>,
    Json(payload): Json<LoginPayload>,
) -> Response {
    let portal = match Portal::from_str(&portal) {
        Ok(p) => p,
        Err(e) => return e.into_response(),
    };
    match state.gate.sign_in(&payload.email, &payload.password, portal) {
        Ok((session, profile)) => {
            let csrf = gen_csrf();
            {
                let mut cmap = state.csrf_tokens.write().await;
                cmap.insert(session.token.clone(), csrf);
            }
            let mut headers = HeaderMap::new();
            headers.insert("Set-Cookie", set_session_cookie(&session.token));
            (
                StatusCode::OK,
                headers,
                Json(json!({
                    "status": "ok",
                    "redirect": portal.dashboard_path(),
                    "profile": profile,
                })),
            )
                .into_response()
        }
        Err(e) => e.into_response(),
    }
}

async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    // Require CSRF token
    if !validate_csrf(&state, &headers).await {
        return AppError::csrf("invalid_csrf".to_string(), "invalid csrf".to_string()).into_response();
    }
    if let Some(token) = session_token(&headers) {
        state.gate.logout(&token);
        let mut cmap = state.csrf_tokens.write().await;
        cmap.remove(&token);
    }
    let mut h = HeaderMap::new();
    h.insert("Set-Cookie", clear_session_cookie());
    (StatusCode::OK, h, Json(json!({ "status": "ok", "redirect": LANDING_PAGE }))).into_response()
}

async fn get_csrf(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(token) = session_token(&headers) else {
        return AppError::credential("unauthorized".to_string(), "not logged in".to_string())
            .into_response();
    };
    let cmap = state.csrf_tokens.read().await;
    match cmap.get(&token) {
        Some(csrf) => (StatusCode::OK, Json(json!({ "status": "ok", "csrf": csrf }))).into_response(),
        None => AppError::credential("unauthorized".to_string(), "not logged in".to_string())
            .into_response(),
    }
}

/// Explicit check_session probe. Unlike the guard, this never redirects; it
/// reports the decision so a client can drive its own navigation.
async fn session_probe(
    State(state): State<AppState>,
    Path(portal): Path<String>,
    headers: HeaderMap,
) -> Response {
    let portal = match Portal::from_str(&portal) {
        Ok(p) => p,
        Err(e) => return e.into_response(),
    };
    let token = session_token(&headers);
    match state.gate.check_session(token.as_deref(), portal) {
        Ok(Decision::Allow(profile)) => (
            StatusCode::OK,
            Json(json!({ "status": "ok", "decision": "allow", "profile": profile })),
        )
            .into_response(),
        Ok(Decision::Redirect { target }) => (
            StatusCode::OK,
            Json(json!({ "status": "ok", "decision": "redirect", "target": target })),
        )
            .into_response(),
        Ok(Decision::Deny { target, notice }) => (
            StatusCode::OK,
            Json(json!({ "status": "ok", "decision": "deny", "target": target, "message": notice })),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

/// Dashboard shell: profile header plus navigation scoped to the portal.
async fn dashboard(
    Path(portal): Path<String>,
    Extension(profile): Extension<crate::identity::Profile>,
) -> Response {
    let portal = match Portal::from_str(&portal) {
        Ok(p) => p,
        Err(e) => return e.into_response(),
    };
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "title": portal.title(),
            "profile": profile,
            "nav": nav_links(portal),
        })),
    )
        .into_response()
}

/// A guarded content region reachable from the portal's navigation.
async fn portal_page(
    Path((portal, page)): Path<(String, String)>,
    Extension(profile): Extension<crate::identity::Profile>,
) -> Response {
    let portal = match Portal::from_str(&portal) {
        Ok(p) => p,
        Err(e) => return e.into_response(),
    };
    if !is_nav_page(portal, &page) {
        return AppError::not_found("unknown_page".to_string(), format!("no page '{page}' in the {}", portal.title()))
            .into_response();
    }
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "title": portal.title(),
            "page": page,
            "profile": profile,
            "nav": nav_links(portal),
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookie_parsing() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "cookie",
            HeaderValue::from_static("foo=1; campusgate_session=abc123; bar=2"),
        );
        assert_eq!(parse_cookie(&headers, SESSION_COOKIE).as_deref(), Some("abc123"));
        assert_eq!(parse_cookie(&headers, "missing"), None);
        assert_eq!(session_token(&headers).as_deref(), Some("abc123"));
    }

    #[tokio::test]
    async fn csrf_tokens_for_revoked_sessions_are_pruned() {
        let tmp = tempfile::tempdir().unwrap();
        let provider = Arc::new(LocalIdentityProvider::new(tmp.path()));
        let roles = RoleBackend::Table.open(tmp.path());
        let gate = Arc::new(AuthGate::new(provider, roles, SessionManager::default()));
        gate.sign_up("alice@example.com", "secret1", "Alice", Portal::Student).unwrap();
        let (session, _) = gate.sign_in("alice@example.com", "secret1", Portal::Student).unwrap();

        let csrf_tokens = RwLock::new(HashMap::new());
        csrf_tokens.write().await.insert(session.token.clone(), gen_csrf());

        // A live session keeps its token.
        prune_stale_csrf(&gate, &csrf_tokens).await;
        assert_eq!(csrf_tokens.read().await.len(), 1);

        // A cross-portal attempt revokes the session outside the logout
        // path; its CSRF token must not outlive it.
        assert!(gate.sign_in("alice@example.com", "secret1", Portal::Admin).is_err());
        prune_stale_csrf(&gate, &csrf_tokens).await;
        assert!(csrf_tokens.read().await.is_empty());
    }

    #[test]
    fn portal_path_extraction() {
        assert_eq!(portal_from_path("/portal/student"), Some(Portal::Student));
        assert_eq!(portal_from_path("/portal/admin/notices"), Some(Portal::Admin));
        // nested routers see the stripped path
        assert_eq!(portal_from_path("/faculty"), Some(Portal::Faculty));
        assert_eq!(portal_from_path("/portal/registrar"), None);
    }
}
