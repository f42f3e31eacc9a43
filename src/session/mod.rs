//! Session manager.
//!
//! Tracks the current signed-in identity as observed from the external auth
//! provider and republishes identity transitions to the task list store and
//! the UI. The manager never decides who is signed in; it adopts whatever the
//! provider reports, once at activation and then on every change
//! notification.

use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::backend::{AuthApi, Identity, Result};

pub struct SessionManager {
    auth: Arc<dyn AuthApi>,
    identity_tx: watch::Sender<Option<Identity>>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl SessionManager {
    pub fn new(auth: Arc<dyn AuthApi>) -> Self {
        let (identity_tx, _) = watch::channel(None);
        Self {
            auth,
            identity_tx,
            watcher: Mutex::new(None),
        }
    }

    /// Query the provider once for the current identity, adopt it, and start
    /// forwarding identity-change notifications. Call once at startup.
    pub async fn activate(&self) -> Result<()> {
        // Subscribe before the initial query so a change landing in between
        // is forwarded rather than lost.
        let mut changes = self.auth.identity_changes();
        changes.mark_unchanged();

        let current = self.auth.current_identity().await?;
        if let Some(identity) = &current {
            info!(user = %identity.id, "restored session");
        }
        self.identity_tx.send_replace(current);

        let forward = self.identity_tx.clone();
        let handle = tokio::spawn(async move {
            while changes.changed().await.is_ok() {
                let next = changes.borrow_and_update().clone();
                forward.send_replace(next);
            }
        });
        *self.watcher.lock().unwrap() = Some(handle);
        Ok(())
    }

    /// Ask the provider to email a one-time sign-in credential. The session,
    /// if the user completes the flow, arrives later via the change path.
    pub async fn sign_in(&self, email: &str) -> Result<()> {
        self.auth.sign_in_with_otp(email).await
    }

    /// Complete the external flow with the emailed one-time code.
    pub async fn verify(&self, email: &str, token: &str) -> Result<()> {
        self.auth.verify_otp(email, token).await.map(|_| ())
    }

    /// Invalidate the session with the provider. The local identity is
    /// cleared immediately, before the provider call resolves.
    pub async fn sign_out(&self) -> Result<()> {
        self.identity_tx.send_replace(None);
        self.auth.sign_out().await
    }

    /// The current identity and all subsequent transitions.
    pub fn identity(&self) -> watch::Receiver<Option<Identity>> {
        self.identity_tx.subscribe()
    }

    /// Snapshot of the current identity.
    pub fn current(&self) -> Option<Identity> {
        self.identity_tx.borrow().clone()
    }

    /// Release the identity-change subscription. No notification is acted on
    /// after this returns.
    pub fn shutdown(&self) {
        if let Some(handle) = self.watcher.lock().unwrap().take() {
            handle.abort();
        }
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}
