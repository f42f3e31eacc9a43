//! PostgREST-style task CRUD.
//!
//! Every request carries the project `apikey` plus the signed-in user's
//! bearer token; row-level security on the backend scopes writes to the
//! owner. Inserts and updates ask for `Prefer: return=representation` so the
//! created/affected row comes back in the response (the optimistic-confirmed
//! write policy).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{error_for_status, AuthClient, BackendError, Result, TaskApi};
use crate::config::Config;

const TASKS_TABLE: &str = "tasks";

/// One task row, in its post-change state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub content: String,
    pub completed: bool,
    pub owner_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// Fields for a task insert; the backend fills in `id` and `created_at`.
#[derive(Debug, Clone, Serialize)]
pub struct NewTask {
    pub content: String,
    pub owner_id: String,
}

pub struct DataClient {
    http: reqwest::Client,
    config: Arc<Config>,
    auth: Arc<AuthClient>,
}

impl DataClient {
    pub fn new(http: reqwest::Client, config: Arc<Config>, auth: Arc<AuthClient>) -> Self {
        Self { http, config, auth }
    }

    fn bearer_token(&self) -> Result<String> {
        use super::AuthApi as _;
        self.auth.access_token().ok_or(BackendError::Unauthenticated)
    }

    /// A request to the tasks table with auth headers applied.
    fn request(&self, method: reqwest::Method) -> Result<reqwest::RequestBuilder> {
        Ok(self
            .http
            .request(method, self.config.rest_url(TASKS_TABLE))
            .header("apikey", &self.config.anon_key)
            .bearer_auth(self.bearer_token()?))
    }

    /// PostgREST wraps single-row representations in an array; unwrap it.
    fn single_row(mut rows: Vec<Task>) -> Result<Task> {
        match rows.len() {
            1 => Ok(rows.remove(0)),
            _ => Err(BackendError::MissingRow),
        }
    }
}

#[async_trait::async_trait]
impl TaskApi for DataClient {
    async fn select_owned(&self, owner_id: &str) -> Result<Vec<Task>> {
        let owner_filter = format!("eq.{owner_id}");
        let resp = self
            .request(reqwest::Method::GET)?
            .query(&[("select", "*"), ("owner_id", owner_filter.as_str())])
            .send()
            .await?;
        let resp = error_for_status(resp).await?;
        Ok(resp.json().await?)
    }

    async fn insert(&self, task: NewTask) -> Result<Task> {
        let resp = self
            .request(reqwest::Method::POST)?
            .header("Prefer", "return=representation")
            .json(&task)
            .send()
            .await?;
        let resp = error_for_status(resp).await?;
        Self::single_row(resp.json().await?)
    }

    async fn update_completed(&self, id: &str, completed: bool) -> Result<Task> {
        let id_filter = format!("eq.{id}");
        let resp = self
            .request(reqwest::Method::PATCH)?
            .query(&[("id", id_filter.as_str())])
            .header("Prefer", "return=representation")
            .json(&serde_json::json!({ "completed": completed }))
            .send()
            .await?;
        let resp = error_for_status(resp).await?;
        Self::single_row(resp.json().await?)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
