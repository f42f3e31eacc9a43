pub mod backend;
pub mod config;
pub mod session;
pub mod store;
pub mod ui;

use std::sync::Arc;

use backend::Backend;
use config::Config;
use session::SessionManager;
use store::TaskListStore;

/// Shared application state passed to the UI and background tasks.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub backend: Arc<Backend>,
    pub session: Arc<SessionManager>,
    pub store: Arc<TaskListStore>,
}
