//! GoTrue-style auth client.
//!
//! Flow:
//! 1. `sign_in_with_otp(email)` — `POST /auth/v1/otp` asks the provider to
//!    email a one-time code. No session is established here.
//! 2. `verify_otp(email, token)` — `POST /auth/v1/verify` exchanges the code
//!    for a session. The session is adopted, persisted under the data
//!    directory, and the new identity is announced on the watch channel.
//! 3. `current_identity()` — restores the persisted session (refreshing an
//!    expired token once) and validates it with `GET /auth/v1/user`.
//! 4. `sign_out()` — clears the local session first, then
//!    `POST /auth/v1/logout` invalidates it with the provider.
//!
//! The persisted session file is the terminal-client analogue of a browser
//! local-storage session: it survives restarts, never holds task data, and is
//! removed on sign-out.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::{error_for_status, AuthApi, Result};
use crate::config::Config;

/// Opaque external user reference: identifier plus provider metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// Access/refresh token pair returned by the provider on verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSession {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Absolute expiry, computed from the provider's `expires_in` at issue time.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    pub user: Identity,
}

impl AuthSession {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(at) => at <= now,
            None => false,
        }
    }
}

/// Token grant response (`/auth/v1/verify`, `/auth/v1/token`).
#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    user: Identity,
}

impl TokenResponse {
    fn into_session(self) -> AuthSession {
        AuthSession {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at: self.expires_in.map(|secs| Utc::now() + Duration::seconds(secs)),
            user: self.user,
        }
    }
}

pub struct AuthClient {
    http: reqwest::Client,
    config: Arc<Config>,
    session: Mutex<Option<AuthSession>>,
    identity_tx: watch::Sender<Option<Identity>>,
}

impl AuthClient {
    pub fn new(http: reqwest::Client, config: Arc<Config>) -> Self {
        let (identity_tx, _) = watch::channel(None);
        Self {
            http,
            config,
            session: Mutex::new(None),
            identity_tx,
        }
    }

    /// Adopt a session: memory, disk, and the identity channel.
    fn install_session(&self, session: AuthSession) -> Identity {
        let identity = session.user.clone();
        if let Err(e) = self.persist(&session) {
            warn!(error = %e, "could not persist session — sign-in will not survive restart");
        }
        *self.session.lock().unwrap() = Some(session);
        self.identity_tx.send_replace(Some(identity.clone()));
        identity
    }

    /// Drop the session everywhere and announce the sign-out.
    fn clear_session(&self) -> Option<AuthSession> {
        let taken = self.session.lock().unwrap().take();
        let path = self.config.session_path();
        if let Err(e) = std::fs::remove_file(&path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %path.display(), error = %e, "could not remove persisted session");
            }
        }
        self.identity_tx.send_replace(None);
        taken
    }

    fn persist(&self, session: &AuthSession) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.config.data_dir)?;
        let json = serde_json::to_string_pretty(session)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(self.config.session_path(), json)
    }

    /// Read the persisted session, tolerating absence and corruption.
    fn load_persisted(&self) -> Option<AuthSession> {
        let path = self.config.session_path();
        let contents = std::fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&contents) {
            Ok(session) => Some(session),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "persisted session unreadable — discarding");
                let _ = std::fs::remove_file(&path);
                None
            }
        }
    }

    /// Exchange a refresh token for a fresh session.
    async fn refresh(&self, refresh_token: &str) -> Result<AuthSession> {
        let url = format!("{}?grant_type=refresh_token", self.config.auth_url("token"));
        let resp = self
            .http
            .post(url)
            .header("apikey", &self.config.anon_key)
            .json(&serde_json::json!({ "refresh_token": refresh_token }))
            .send()
            .await?;
        let resp = error_for_status(resp).await?;
        let granted: TokenResponse = resp.json().await?;
        Ok(granted.into_session())
    }
}

#[async_trait::async_trait]
impl AuthApi for AuthClient {
    async fn current_identity(&self) -> Result<Option<Identity>> {
        let Some(mut session) = self.load_persisted() else {
            return Ok(None);
        };

        if session.is_expired(Utc::now()) {
            let Some(refresh_token) = session.refresh_token.clone() else {
                debug!("persisted session expired with no refresh token");
                self.clear_session();
                return Ok(None);
            };
            session = match self.refresh(&refresh_token).await {
                Ok(fresh) => fresh,
                Err(e) => {
                    info!(error = %e, "session refresh rejected — signed out");
                    self.clear_session();
                    return Ok(None);
                }
            };
        }

        // Validate the token against the provider before adopting it.
        let resp = self
            .http
            .get(self.config.auth_url("user"))
            .header("apikey", &self.config.anon_key)
            .bearer_auth(&session.access_token)
            .send()
            .await?;

        if resp.status() == reqwest::StatusCode::UNAUTHORIZED {
            info!("persisted session no longer valid — signed out");
            self.clear_session();
            return Ok(None);
        }
        let resp = error_for_status(resp).await?;
        let user: Identity = resp.json().await?;

        session.user = user;
        Ok(Some(self.install_session(session)))
    }

    async fn sign_in_with_otp(&self, email: &str) -> Result<()> {
        let resp = self
            .http
            .post(self.config.auth_url("otp"))
            .header("apikey", &self.config.anon_key)
            .json(&serde_json::json!({ "email": email, "create_user": true }))
            .send()
            .await?;
        error_for_status(resp).await?;
        info!(email, "one-time sign-in link requested");
        Ok(())
    }

    async fn verify_otp(&self, email: &str, token: &str) -> Result<Identity> {
        let resp = self
            .http
            .post(self.config.auth_url("verify"))
            .header("apikey", &self.config.anon_key)
            .json(&serde_json::json!({
                "type": "email",
                "email": email,
                "token": token,
            }))
            .send()
            .await?;
        let resp = error_for_status(resp).await?;
        let granted: TokenResponse = resp.json().await?;
        let identity = self.install_session(granted.into_session());
        info!(user = %identity.id, "signed in");
        Ok(identity)
    }

    async fn sign_out(&self) -> Result<()> {
        // Local clear comes first: the identity is gone the moment the user
        // asks, whatever the provider says.
        let taken = self.clear_session();
        let Some(session) = taken else {
            return Ok(());
        };

        let resp = self
            .http
            .post(self.config.auth_url("logout"))
            .header("apikey", &self.config.anon_key)
            .bearer_auth(&session.access_token)
            .send()
            .await?;
        error_for_status(resp).await?;
        info!("signed out");
        Ok(())
    }

    fn identity_changes(&self) -> watch::Receiver<Option<Identity>> {
        self.identity_tx.subscribe()
    }

    fn access_token(&self) -> Option<String> {
        self.session
            .lock()
            .unwrap()
            .as_ref()
            .map(|s| s.access_token.clone())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
