//! Integration tests for the task list store: merge behavior, optimistic
//! writes, and identity-transition cleanup, driven through in-memory fakes
//! behind the backend traits.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch, Notify};
use uuid::Uuid;

use quicksync::backend::{
    BackendError, ChangeFeed, ChangeKind, Identity, NewTask, Subscription, Task, TaskApi,
    TaskChange,
};
use quicksync::store::{SyncPhase, TaskListStore};

const WAIT: Duration = Duration::from_secs(2);

fn identity(id: &str) -> Identity {
    Identity {
        id: id.to_string(),
        email: Some(format!("{id}@example.test")),
    }
}

fn task(id: &str, owner: &str, content: &str, completed: bool) -> Task {
    Task {
        id: id.to_string(),
        content: content.to_string(),
        completed,
        owner_id: owner.to_string(),
        created_at: None,
    }
}

// ─── Fakes ───────────────────────────────────────────────────────────────────

/// In-memory stand-in for the PostgREST client.
#[derive(Default)]
struct FakeData {
    tasks: Mutex<Vec<Task>>,
    insert_calls: AtomicUsize,
    /// When set, `update_completed` blocks until the gate is notified.
    update_gate: Mutex<Option<Arc<Notify>>>,
}

impl FakeData {
    fn seed(&self, rows: Vec<Task>) {
        *self.tasks.lock().unwrap() = rows;
    }

    fn gate_updates(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.update_gate.lock().unwrap() = Some(gate.clone());
        gate
    }
}

#[async_trait::async_trait]
impl TaskApi for FakeData {
    async fn select_owned(&self, owner_id: &str) -> Result<Vec<Task>, BackendError> {
        Ok(self
            .tasks
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.owner_id == owner_id)
            .cloned()
            .collect())
    }

    async fn insert(&self, new: NewTask) -> Result<Task, BackendError> {
        self.insert_calls.fetch_add(1, Ordering::SeqCst);
        let row = Task {
            id: Uuid::new_v4().to_string(),
            content: new.content,
            completed: false,
            owner_id: new.owner_id,
            created_at: None,
        };
        self.tasks.lock().unwrap().push(row.clone());
        Ok(row)
    }

    async fn update_completed(&self, id: &str, completed: bool) -> Result<Task, BackendError> {
        let gate = self.update_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let mut tasks = self.tasks.lock().unwrap();
        let row = tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or(BackendError::MissingRow)?;
        row.completed = completed;
        Ok(row.clone())
    }
}

/// In-memory stand-in for the realtime channel. Hands the test a sender for
/// the most recent subscription.
#[derive(Default)]
struct FakeFeed {
    push_tx: Mutex<Option<mpsc::Sender<TaskChange>>>,
}

impl FakeFeed {
    async fn push(&self, row: Task, kind: ChangeKind) -> Result<(), ()> {
        let tx = self.push_tx.lock().unwrap().clone();
        let Some(tx) = tx else { return Err(()) };
        tx.send(TaskChange { kind, row }).await.map_err(|_| ())
    }
}

#[async_trait::async_trait]
impl ChangeFeed for FakeFeed {
    async fn subscribe(&self, _owner_id: &str) -> Result<Subscription, BackendError> {
        let (tx, rx) = mpsc::channel(16);
        *self.push_tx.lock().unwrap() = Some(tx);
        Ok(Subscription::new(rx, None))
    }
}

// ─── Harness ─────────────────────────────────────────────────────────────────

struct Harness {
    data: Arc<FakeData>,
    feed: Arc<FakeFeed>,
    store: Arc<TaskListStore>,
    identity_tx: watch::Sender<Option<Identity>>,
    _run: tokio::task::JoinHandle<()>,
}

fn start() -> Harness {
    let data = Arc::new(FakeData::default());
    let feed = Arc::new(FakeFeed::default());
    let store = Arc::new(TaskListStore::new(
        data.clone() as Arc<dyn TaskApi>,
        feed.clone() as Arc<dyn ChangeFeed>,
    ));
    let (identity_tx, identity_rx) = watch::channel(None);
    let run = tokio::spawn(Arc::clone(&store).run(identity_rx));
    Harness {
        data,
        feed,
        store,
        identity_tx,
        _run: run,
    }
}

impl Harness {
    async fn sign_in(&self, user: &str) {
        self.identity_tx.send(Some(identity(user))).unwrap();
        self.wait_for_phase(SyncPhase::Synced).await;
    }

    async fn wait_for_phase(&self, expected: SyncPhase) {
        let mut phase = self.store.phase();
        tokio::time::timeout(WAIT, phase.wait_for(|p| *p == expected))
            .await
            .expect("timed out waiting for sync phase")
            .unwrap();
    }

    async fn wait_for_tasks(&self, predicate: impl Fn(&[Task]) -> bool) -> Vec<Task> {
        let mut tasks = self.store.tasks();
        let result = tokio::time::timeout(WAIT, tasks.wait_for(|t| predicate(t)))
            .await
            .expect("timed out waiting for task list")
            .unwrap()
            .clone();
        result
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn empty_fetch_yields_empty_list_without_error() {
    let h = start();
    h.sign_in("u1").await;
    assert!(h.store.snapshot().is_empty());
}

#[tokio::test]
async fn push_for_known_id_replaces_instead_of_appending() {
    let h = start();
    h.data.seed(vec![task("1", "u1", "a", false)]);
    h.sign_in("u1").await;

    h.feed
        .push(task("1", "u1", "a", true), ChangeKind::Update)
        .await
        .unwrap();

    let tasks = h.wait_for_tasks(|t| t.iter().any(|x| x.completed)).await;
    assert_eq!(tasks, vec![task("1", "u1", "a", true)]);
}

#[tokio::test]
async fn push_for_unseen_id_appends() {
    let h = start();
    h.data.seed(vec![task("1", "u1", "a", false)]);
    h.sign_in("u1").await;

    h.feed
        .push(task("2", "u1", "b", false), ChangeKind::Insert)
        .await
        .unwrap();

    let tasks = h.wait_for_tasks(|t| t.len() == 2).await;
    assert_eq!(tasks[0].id, "1");
    assert_eq!(tasks[1].id, "2");
}

#[tokio::test]
async fn add_with_blank_content_performs_no_remote_call() {
    let h = start();
    h.sign_in("u1").await;

    h.store.add_task("").await.unwrap();
    h.store.add_task("   \t ").await.unwrap();

    assert_eq!(h.data.insert_calls.load(Ordering::SeqCst), 0);
    assert!(h.store.snapshot().is_empty());
}

#[tokio::test]
async fn add_without_identity_performs_no_remote_call() {
    let h = start();
    h.store.add_task("write tests").await.unwrap();
    assert_eq!(h.data.insert_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn add_applies_response_and_matching_push_does_not_duplicate() {
    let h = start();
    h.sign_in("u1").await;

    h.store.add_task("  buy milk  ").await.unwrap();

    let tasks = h.wait_for_tasks(|t| t.len() == 1).await;
    assert_eq!(tasks[0].content, "buy milk");

    // The change feed now delivers the same row; merge-by-id must replace
    // the optimistic entry, not duplicate it.
    h.feed
        .push(tasks[0].clone(), ChangeKind::Insert)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let after = h.store.snapshot();
    assert_eq!(after.len(), 1);
    assert_eq!(after[0].id, tasks[0].id);
}

#[tokio::test]
async fn toggle_twice_to_same_value_is_idempotent() {
    let h = start();
    h.data.seed(vec![task("1", "u1", "a", false)]);
    h.sign_in("u1").await;

    h.store.toggle("1", true).await.unwrap();
    let once = h.wait_for_tasks(|t| t.iter().all(|x| x.completed)).await;

    h.store.toggle("1", true).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(h.store.snapshot(), once);
}

#[tokio::test]
async fn optimistic_toggle_and_push_converge_to_last_applied() {
    let h = start();
    h.data.seed(vec![task("1", "u1", "a", false)]);
    h.sign_in("u1").await;

    h.store.toggle("1", true).await.unwrap();
    // A push notification carrying an older state arrives afterwards; the
    // merge overwrites the whole record, so last-applied wins.
    h.feed
        .push(task("1", "u1", "a", false), ChangeKind::Update)
        .await
        .unwrap();

    let tasks = h.wait_for_tasks(|t| t.len() == 1 && !t[0].completed).await;
    assert_eq!(tasks.len(), 1);
}

#[tokio::test]
async fn sign_out_clears_list_and_releases_subscription() {
    let h = start();
    h.data.seed(vec![task("1", "u1", "a", false)]);
    h.sign_in("u1").await;
    assert_eq!(h.store.snapshot().len(), 1);

    h.identity_tx.send(None).unwrap();
    h.wait_for_phase(SyncPhase::Inactive).await;
    assert!(h.store.snapshot().is_empty());

    // Let the aborted sync task unwind and drop its subscription.
    tokio::time::sleep(Duration::from_millis(50)).await;

    // The old subscription is released; a late push must not be deliverable
    // and must not mutate state.
    let refused = h
        .feed
        .push(task("2", "u1", "b", false), ChangeKind::Insert)
        .await;
    assert!(refused.is_err());
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.store.snapshot().is_empty());
}

#[tokio::test]
async fn write_completing_after_sign_out_does_not_mutate_state() {
    let h = start();
    h.data.seed(vec![task("1", "u1", "a", false)]);
    h.sign_in("u1").await;

    let gate = h.data.gate_updates();
    let store = Arc::clone(&h.store);
    let pending = tokio::spawn(async move { store.toggle("1", true).await });

    h.identity_tx.send(None).unwrap();
    h.wait_for_phase(SyncPhase::Inactive).await;

    // Let the in-flight update finish now that the identity is gone.
    gate.notify_one();
    pending.await.unwrap().unwrap();

    assert!(h.store.snapshot().is_empty());
}

#[tokio::test]
async fn identity_switch_rebuilds_list_from_scratch() {
    let h = start();
    h.data.seed(vec![
        task("1", "u1", "mine", false),
        task("2", "u2", "theirs", false),
    ]);
    h.sign_in("u1").await;
    assert_eq!(h.store.snapshot().len(), 1);

    h.identity_tx.send(Some(identity("u2"))).unwrap();
    let tasks = h
        .wait_for_tasks(|t| t.len() == 1 && t[0].owner_id == "u2")
        .await;
    assert_eq!(tasks[0].content, "theirs");
}
