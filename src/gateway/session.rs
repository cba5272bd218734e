//! Server-side sessions keyed by an opaque id carried in a private cookie.

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum_extra::extract::{
    PrivateCookieJar,
    cookie::{Cookie, Key, SameSite},
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{collections::HashMap, convert::Infallible, time::Duration};
use tokio::{sync::RwLock, time::Instant};
use tracing::{debug, error, warn};
use ulid::Ulid;

use super::{AppState, audit::UNKNOWN, config::GatewayConfig};

pub const SESSION_COOKIE_NAME: &str = "authgate_session";

/// Everything the gateway keeps for one browser.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<UserSession>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending: Option<PendingAuthorization>,
}

impl Session {
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.user.is_none() && self.pending.is_none()
    }
}

/// Token response of a successful code exchange plus the ID token claims.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserSession {
    pub access_token: String,
    pub id_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    pub userinfo: UserInfo,
}

impl UserSession {
    #[must_use]
    pub fn new(
        access_token: impl Into<String>,
        id_token: impl Into<String>,
        userinfo: UserInfo,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            id_token: id_token.into(),
            token_type: None,
            expires_in: None,
            refresh_token: None,
            scope: None,
            userinfo,
        }
    }

    /// `sub` claim, or `"unknown"`.
    #[must_use]
    pub fn user_id(&self) -> &str {
        self.userinfo.sub.as_deref().unwrap_or(UNKNOWN)
    }

    /// `email` claim, or `"unknown"`.
    #[must_use]
    pub fn email(&self) -> &str {
        self.userinfo.email.as_deref().unwrap_or(UNKNOWN)
    }
}

/// Provider-supplied claims. `sub` and `email` are lifted out, the rest is kept verbatim.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UserInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(flatten)]
    pub claims: Map<String, Value>,
}

impl UserInfo {
    #[must_use]
    pub fn new(sub: impl Into<String>) -> Self {
        Self {
            sub: Some(sub.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    #[must_use]
    pub fn with_claim(mut self, name: impl Into<String>, value: Value) -> Self {
        self.claims.insert(name.into(), value);
        self
    }
}

/// State the OIDC client needs between `/login` and `/callback`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAuthorization {
    pub state: String,
    pub nonce: String,
    pub pkce_verifier: String,
    pub redirect_uri: String,
}

impl std::fmt::Debug for PendingAuthorization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingAuthorization")
            .field("redirect_uri", &self.redirect_uri)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session store unavailable: {0}")]
    Unavailable(String),
}

/// Session persistence. Ids are opaque to the store.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, id: &str) -> Result<Option<Session>, SessionError>;

    async fn save(&self, id: &str, session: Session) -> Result<(), SessionError>;

    async fn delete(&self, id: &str) -> Result<(), SessionError>;
}

/// Upper bound for any session lifetime.
pub const MAX_SESSION_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Lifetime of a session that only holds a pending authorization.
pub const PENDING_SESSION_TTL: Duration = Duration::from_secs(10 * 60);

pub const DEFAULT_MAX_SESSIONS: usize = 100_000;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

struct Entry {
    session: Session,
    expires_at: Instant,
}

struct Entries {
    map: HashMap<String, Entry>,
    next_sweep: Instant,
}

impl Entries {
    fn sweep(&mut self, now: Instant) {
        self.map.retain(|_, entry| entry.expires_at > now);
        self.next_sweep = deadline(now, SWEEP_INTERVAL);
    }

    // drop the entry closest to expiry, pending logins go first in practice
    fn evict_one(&mut self) {
        let oldest = self
            .map
            .iter()
            .min_by_key(|(_, entry)| entry.expires_at)
            .map(|(id, _)| id.clone());
        if let Some(id) = oldest {
            self.map.remove(&id);
        }
    }
}

fn deadline(now: Instant, ttl: Duration) -> Instant {
    now.checked_add(ttl).unwrap_or(now)
}

/// In-process store with a sliding TTL refreshed on every save.
///
/// Authenticated sessions live for `ttl`. Sessions that only carry a pending
/// authorization use the shorter pending TTL. Expired entries are swept at
/// most once a minute, and the store never holds more than `max_sessions`
/// entries.
pub struct MemorySessionStore {
    entries: RwLock<Entries>,
    ttl: Duration,
    pending_ttl: Duration,
    max_sessions: usize,
}

impl MemorySessionStore {
    /// `ttl` is capped at [`MAX_SESSION_TTL`].
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        let ttl = ttl.min(MAX_SESSION_TTL);
        Self {
            entries: RwLock::new(Entries {
                map: HashMap::new(),
                next_sweep: deadline(Instant::now(), SWEEP_INTERVAL),
            }),
            ttl,
            pending_ttl: PENDING_SESSION_TTL.min(ttl),
            max_sessions: DEFAULT_MAX_SESSIONS,
        }
    }

    #[must_use]
    pub fn with_max_sessions(mut self, max_sessions: usize) -> Self {
        self.max_sessions = max_sessions.max(1);
        self
    }

    fn ttl_for(&self, session: &Session) -> Duration {
        if session.is_authenticated() {
            self.ttl
        } else {
            self.pending_ttl
        }
    }

    /// Number of live sessions.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .await
            .map
            .values()
            .filter(|entry| entry.expires_at > now)
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, id: &str) -> Result<Option<Session>, SessionError> {
        let now = Instant::now();
        {
            let entries = self.entries.read().await;
            match entries.map.get(id) {
                Some(entry) if entry.expires_at > now => return Ok(Some(entry.session.clone())),
                Some(_) => {}
                None => return Ok(None),
            }
        }

        debug!("Session expired, dropping it");
        self.entries.write().await.map.remove(id);
        Ok(None)
    }

    async fn save(&self, id: &str, session: Session) -> Result<(), SessionError> {
        let now = Instant::now();
        let expires_at = deadline(now, self.ttl_for(&session));

        let mut entries = self.entries.write().await;
        let is_new = !entries.map.contains_key(id);
        if now >= entries.next_sweep || (is_new && entries.map.len() >= self.max_sessions) {
            entries.sweep(now);
        }
        if is_new && entries.map.len() >= self.max_sessions {
            warn!("Session store full, evicting the oldest session");
            entries.evict_one();
        }

        entries
            .map
            .insert(id.to_string(), Entry { session, expires_at });
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), SessionError> {
        self.entries.write().await.map.remove(id);
        Ok(())
    }
}

/// The session of the current request together with its cookie jar.
///
/// Loading never fails: a missing cookie, an unknown id, or a store error all
/// yield an empty (anonymous) session.
pub struct CurrentSession {
    id: Option<String>,
    session: Session,
    jar: PrivateCookieJar,
}

impl CurrentSession {
    #[must_use]
    pub fn user(&self) -> Option<&UserSession> {
        self.session.user.as_ref()
    }

    #[must_use]
    pub fn into_user(self) -> Option<UserSession> {
        self.session.user
    }

    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn set_user(&mut self, user: UserSession) {
        self.session.user = Some(user);
    }

    pub fn set_pending(&mut self, pending: PendingAuthorization) {
        self.session.pending = Some(pending);
    }

    pub fn take_pending(&mut self) -> Option<PendingAuthorization> {
        self.session.pending.take()
    }

    /// Drop the stored record so the next [`commit`](Self::commit) saves the
    /// session under a fresh id. Called when the session gains privileges.
    ///
    /// # Errors
    /// Returns [`SessionError`] if the old record cannot be deleted.
    pub async fn regenerate(&mut self, store: &dyn SessionStore) -> Result<(), SessionError> {
        if let Some(id) = self.id.take() {
            store.delete(&id).await?;
        }
        Ok(())
    }

    /// Persist the session and return the jar carrying its cookie.
    ///
    /// An empty session is not stored: any existing record is dropped and the
    /// cookie removed.
    ///
    /// # Errors
    /// Returns [`SessionError`] if the store rejects the write.
    pub async fn commit(
        self,
        store: &dyn SessionStore,
        config: &GatewayConfig,
    ) -> Result<PrivateCookieJar, SessionError> {
        if self.session.is_empty() {
            if let Some(id) = &self.id {
                store.delete(id).await?;
            }
            return Ok(self.jar.remove(removal_cookie()));
        }

        let id = self.id.unwrap_or_else(|| Ulid::new().to_string());
        store.save(&id, self.session).await?;

        Ok(self.jar.add(session_cookie(&id, config.session_cookie_secure())))
    }

    /// Drop the session record and remove the cookie. Safe to call without a session.
    pub async fn destroy(self, store: &dyn SessionStore) -> PrivateCookieJar {
        if let Some(id) = &self.id {
            if let Err(err) = store.delete(id).await {
                error!("Failed to delete session: {err}");
            }
        }
        self.jar.remove(removal_cookie())
    }
}

impl FromRequestParts<AppState> for CurrentSession {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let jar: PrivateCookieJar<Key> = PrivateCookieJar::from_request_parts(parts, state).await?;

        let id = jar
            .get(SESSION_COOKIE_NAME)
            .map(|cookie| cookie.value().to_string());

        let session = match &id {
            Some(id) => match state.sessions().load(id).await {
                Ok(session) => session.unwrap_or_default(),
                Err(err) => {
                    error!("Failed to load session: {err}");
                    Session::default()
                }
            },
            None => Session::default(),
        };

        Ok(Self { id, session, jar })
    }
}

fn session_cookie(id: &str, secure: bool) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE_NAME, id.to_string()))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .path("/")
        .build()
}

fn removal_cookie() -> Cookie<'static> {
    Cookie::build(SESSION_COOKIE_NAME).path("/").build()
}
