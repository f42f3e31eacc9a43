//! Task list store.
//!
//! Maintains a locally consistent view of the current identity's tasks under
//! three independent input sources — the initial bulk fetch, local optimistic
//! writes, and remote push notifications. No ordering holds across the write
//! response and the push channel; the merge-by-id rule in [`merge_task`] is
//! what keeps the view free of duplicates regardless of arrival order.
//!
//! Lifecycle per identity session: `Inactive` → `Loading` (fetch in flight,
//! subscription opening) → `Synced` (live until the identity goes away).
//! Every activation is stamped with an epoch; async completions re-check the
//! epoch before touching state, so a stale fetch or a late push event for a
//! previous identity is discarded.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backend::{ChangeFeed, Identity, NewTask, Result, Task, TaskApi};

/// Sync lifecycle of the current identity session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// No identity; list empty; no subscription held.
    Inactive,
    /// Identity just became available; bulk fetch in flight.
    Loading,
    /// Bulk fetch settled and the push subscription is live.
    Synced,
}

pub struct TaskListStore {
    data: Arc<dyn TaskApi>,
    feed: Arc<dyn ChangeFeed>,
    tasks_tx: watch::Sender<Vec<Task>>,
    phase_tx: watch::Sender<SyncPhase>,
    /// Bumped on every identity transition; stamps identity-scoped work.
    epoch: AtomicU64,
    identity: Mutex<Option<Identity>>,
    sync_task: Mutex<Option<JoinHandle<()>>>,
}

impl TaskListStore {
    pub fn new(data: Arc<dyn TaskApi>, feed: Arc<dyn ChangeFeed>) -> Self {
        let (tasks_tx, _) = watch::channel(Vec::new());
        let (phase_tx, _) = watch::channel(SyncPhase::Inactive);
        Self {
            data,
            feed,
            tasks_tx,
            phase_tx,
            epoch: AtomicU64::new(0),
            identity: Mutex::new(None),
            sync_task: Mutex::new(None),
        }
    }

    /// Drive the state machine from identity transitions. Runs until the
    /// session channel closes; spawn it once at startup.
    pub async fn run(self: Arc<Self>, mut identity_rx: watch::Receiver<Option<Identity>>) {
        loop {
            let identity = identity_rx.borrow_and_update().clone();
            match identity {
                Some(identity) => Self::activate(&self, identity),
                None => self.deactivate(),
            }
            if identity_rx.changed().await.is_err() {
                self.deactivate();
                return;
            }
        }
    }

    /// The task list and all subsequent revisions.
    pub fn tasks(&self) -> watch::Receiver<Vec<Task>> {
        self.tasks_tx.subscribe()
    }

    /// The sync phase and all subsequent transitions.
    pub fn phase(&self) -> watch::Receiver<SyncPhase> {
        self.phase_tx.subscribe()
    }

    /// Snapshot of the current list.
    pub fn snapshot(&self) -> Vec<Task> {
        self.tasks_tx.borrow().clone()
    }

    // ─── User actions ────────────────────────────────────────────────────────

    /// Insert a task owned by the current identity.
    ///
    /// Empty or whitespace-only content, or no active identity, is a no-op
    /// with no remote call. Otherwise the created row is appended immediately
    /// from the insert response (optimistic-confirmed); the matching push
    /// notification later replaces it in place of duplicating it, courtesy of
    /// [`merge_task`].
    pub async fn add_task(&self, content: &str) -> Result<()> {
        let trimmed = content.trim();
        if trimmed.is_empty() {
            return Ok(());
        }
        let Some(owner) = self.current_identity() else {
            return Ok(());
        };

        let epoch = self.current_epoch();
        let row = self
            .data
            .insert(NewTask {
                content: trimmed.to_string(),
                owner_id: owner.id,
            })
            .await?;

        if self.is_current(epoch) {
            debug!(id = %row.id, "task added");
            self.tasks_tx.send_modify(|list| merge_task(list, row));
        }
        Ok(())
    }

    /// Set `completed` on the given task.
    ///
    /// The affected row from the update response patches the matching local
    /// entry in place; only push notifications reorder the list. Toggling to
    /// the value a row already has is allowed and converges to the same
    /// state. Ownership is enforced remotely, not here.
    pub async fn toggle(&self, id: &str, completed: bool) -> Result<()> {
        let epoch = self.current_epoch();
        let row = self.data.update_completed(id, completed).await?;

        if self.is_current(epoch) {
            self.tasks_tx.send_modify(|list| {
                if let Some(task) = list.iter_mut().find(|t| t.id == row.id) {
                    task.completed = row.completed;
                }
            });
        }
        Ok(())
    }

    // ─── Identity transitions ────────────────────────────────────────────────

    fn activate(store: &Arc<Self>, identity: Identity) {
        let epoch = store.begin_epoch(Some(identity.clone()));
        store.abort_sync_task();
        info!(user = %identity.id, "activating task list");
        store.tasks_tx.send_replace(Vec::new());
        store.phase_tx.send_replace(SyncPhase::Loading);

        let task_store = Arc::clone(store);
        let handle = tokio::spawn(async move {
            task_store.sync_session(identity, epoch).await;
        });
        *store.sync_task.lock().unwrap() = Some(handle);
    }

    fn deactivate(&self) {
        self.begin_epoch(None);
        // Aborting the sync task drops its Subscription, which releases the
        // push channel synchronously.
        self.abort_sync_task();
        self.tasks_tx.send_replace(Vec::new());
        self.phase_tx.send_replace(SyncPhase::Inactive);
    }

    /// Bulk fetch plus the merge loop, stamped with the activation epoch.
    async fn sync_session(self: Arc<Self>, identity: Identity, epoch: u64) {
        // Open the push channel before the bulk fetch so a change committed
        // mid-fetch still arrives (it buffers until the merge loop starts).
        let mut sub = match self.feed.subscribe(&identity.id).await {
            Ok(sub) => sub,
            Err(e) => {
                warn!(error = %e, "could not open change feed");
                return;
            }
        };

        match self.data.select_owned(&identity.id).await {
            Ok(rows) => {
                if !self.is_current(epoch) {
                    return;
                }
                info!(count = rows.len(), "task list loaded");
                self.tasks_tx.send_replace(rows);
            }
            Err(e) => {
                // Best effort: the list keeps its prior value (commonly empty).
                warn!(error = %e, "task fetch failed");
            }
        }
        if !self.is_current(epoch) {
            return;
        }
        self.phase_tx.send_replace(SyncPhase::Synced);

        while let Some(change) = sub.recv().await {
            if !self.is_current(epoch) {
                return;
            }
            debug!(id = %change.row.id, kind = ?change.kind, "applying push change");
            self.tasks_tx.send_modify(|list| merge_task(list, change.row));
        }
    }

    fn begin_epoch(&self, identity: Option<Identity>) -> u64 {
        *self.identity.lock().unwrap() = identity;
        self.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn abort_sync_task(&self) {
        if let Some(handle) = self.sync_task.lock().unwrap().take() {
            handle.abort();
        }
    }

    fn current_epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.current_epoch() == epoch
    }

    fn current_identity(&self) -> Option<Identity> {
        self.identity.lock().unwrap().clone()
    }
}

/// Replace-or-insert merge: any existing entry with the incoming id is
/// removed and the incoming row appended, so the most recently changed task
/// moves to the end and no id ever appears twice. List order is otherwise
/// not significant.
pub fn merge_task(list: &mut Vec<Task>, row: Task) {
    list.retain(|t| t.id != row.id);
    list.push(row);
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str, content: &str, completed: bool) -> Task {
        Task {
            id: id.to_string(),
            content: content.to_string(),
            completed,
            owner_id: "u1".to_string(),
            created_at: None,
        }
    }

    #[test]
    fn merge_replaces_existing_entry_without_duplicating() {
        let mut list = vec![task("1", "a", false)];
        merge_task(&mut list, task("1", "a", true));

        assert_eq!(list.len(), 1);
        assert_eq!(list[0].id, "1");
        assert!(list[0].completed);
    }

    #[test]
    fn merge_appends_unseen_id() {
        let mut list = vec![task("1", "a", false)];
        merge_task(&mut list, task("2", "b", false));

        assert_eq!(list.len(), 2);
        assert_eq!(list[1].id, "2");
    }

    #[test]
    fn merge_moves_changed_task_to_the_end() {
        let mut list = vec![task("1", "a", false), task("2", "b", false)];
        merge_task(&mut list, task("1", "a", true));

        assert_eq!(list[0].id, "2");
        assert_eq!(list[1].id, "1");
    }

    #[test]
    fn merge_converges_regardless_of_arrival_order() {
        // Optimistic response then push, and push then optimistic response,
        // end in the same single entry with the last-applied completed value.
        let optimistic = task("1", "a", false);
        let push = task("1", "a", true);

        let mut a = Vec::new();
        merge_task(&mut a, optimistic.clone());
        merge_task(&mut a, push.clone());

        let mut b = Vec::new();
        merge_task(&mut b, push);
        merge_task(&mut b, optimistic);

        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);
        assert!(a[0].completed);
        assert!(!b[0].completed);
    }
}
