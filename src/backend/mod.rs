//! Backend client for the hosted task list service.
//!
//! One explicitly constructed [`Backend`] replaces any implicit global client:
//! it is built once at startup from [`Config`] and shared via `Arc` by the
//! session manager, the task list store, and the UI.
//!
//! Three sub-clients, one per backend surface:
//! - [`auth::AuthClient`] — GoTrue-style REST (identity, one-time-link sign-in)
//! - [`data::DataClient`] — PostgREST-style REST (task select/insert/update)
//! - [`realtime::RealtimeClient`] — Phoenix channel over WebSocket (change feed)
//!
//! Each sits behind a trait ([`AuthApi`], [`TaskApi`], [`ChangeFeed`]) so the
//! store and session manager can be driven by in-memory fakes in tests.

pub mod auth;
pub mod data;
pub mod realtime;

pub use auth::{AuthClient, Identity};
pub use data::{DataClient, NewTask, Task};
pub use realtime::{ChangeKind, RealtimeClient, Subscription, TaskChange};

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;

use crate::config::Config;

#[derive(Debug, Error)]
pub enum BackendError {
    /// A call that needs a session was made while signed out.
    #[error("not signed in")]
    Unauthenticated,
    /// The backend answered with a non-success status.
    #[error("backend returned HTTP {status}: {message}")]
    Api { status: u16, message: String },
    /// The backend answered success but without the expected row.
    #[error("backend response missing expected row")]
    MissingRow,
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("invalid backend payload: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("realtime channel error: {0}")]
    Realtime(String),
}

pub type Result<T> = std::result::Result<T, BackendError>;

// ─── Trait seams ─────────────────────────────────────────────────────────────

/// External auth provider operations, as the session manager sees them.
#[async_trait]
pub trait AuthApi: Send + Sync {
    /// The currently authenticated identity, if any. Queried once on
    /// activation; afterwards changes arrive via [`AuthApi::identity_changes`].
    async fn current_identity(&self) -> Result<Option<Identity>>;

    /// Ask the provider to email a one-time sign-in credential. Does not
    /// establish a session.
    async fn sign_in_with_otp(&self, email: &str) -> Result<()>;

    /// Submit the emailed one-time code. On success the provider returns a
    /// session, which is adopted and announced on the identity channel.
    async fn verify_otp(&self, email: &str, token: &str) -> Result<Identity>;

    /// Invalidate the session with the provider. The local identity is
    /// cleared before the provider call, so sign-out is immediate even when
    /// the remote call fails.
    async fn sign_out(&self) -> Result<()>;

    /// Identity-change notifications. The receiver is cancelable by drop.
    fn identity_changes(&self) -> watch::Receiver<Option<Identity>>;

    /// Access token of the live session, for request authorization.
    fn access_token(&self) -> Option<String>;
}

/// Remote task CRUD, as the task list store sees it.
#[async_trait]
pub trait TaskApi: Send + Sync {
    /// All tasks with `owner_id` equal to the given identity. An empty result
    /// is an empty list, not an error.
    async fn select_owned(&self, owner_id: &str) -> Result<Vec<Task>>;

    /// Insert a task and return the created row.
    async fn insert(&self, task: NewTask) -> Result<Task>;

    /// Set `completed` on the row with the given id and return the affected row.
    async fn update_completed(&self, id: &str, completed: bool) -> Result<Task>;
}

/// Push-notification channel, as the task list store sees it.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    /// Open one push channel filtered to the given owner. The returned
    /// [`Subscription`] delivers change events to a single consumer until
    /// cancelled or dropped.
    async fn subscribe(&self, owner_id: &str) -> Result<Subscription>;
}

// ─── Aggregate ───────────────────────────────────────────────────────────────

/// The single backend client instance. Construct once, share via `Arc`.
pub struct Backend {
    pub auth: Arc<AuthClient>,
    pub data: Arc<DataClient>,
    pub realtime: Arc<RealtimeClient>,
}

impl Backend {
    /// Single initialization point for everything that talks to the backend.
    pub fn new(config: Arc<Config>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("quicksync/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let auth = Arc::new(AuthClient::new(
            http.clone(),
            Arc::clone(&config),
        ));
        let data = Arc::new(DataClient::new(http, Arc::clone(&config), Arc::clone(&auth)));
        let realtime = Arc::new(RealtimeClient::new(config, Arc::clone(&auth)));

        Ok(Self {
            auth,
            data,
            realtime,
        })
    }
}

/// Map a non-success response to [`BackendError::Api`], preserving the body.
pub(crate) async fn error_for_status(resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let message = resp.text().await.unwrap_or_default();
    Err(BackendError::Api {
        status: status.as_u16(),
        message,
    })
}
