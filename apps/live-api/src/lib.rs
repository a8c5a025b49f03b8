pub mod config;
pub mod error;
pub mod live;
pub mod routes;

use std::sync::Arc;

use config::Config;
use live::broadcast::Broadcaster;
use live::index::DataListenerIndex;
use live::menu::{MemoryMenu, SessionMenu};
use live::registry::SessionRegistry;

/// Shared application state available to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub sessions: Arc<SessionRegistry>,
    pub broadcaster: Broadcaster,
    pub menu: Option<Arc<MemoryMenu>>,
}

impl AppState {
    /// Build the live services. Call once at start-up and pair with
    /// [`AppState::shutdown`].
    pub fn new(config: Config) -> Self {
        let index = Arc::new(DataListenerIndex::new());
        let menu = config.session_menu.then(|| Arc::new(MemoryMenu::new()));
        let sessions = SessionRegistry::new(
            &config,
            index,
            menu.clone().map(|m| m as Arc<dyn SessionMenu>),
        );
        let broadcaster = Broadcaster::new(sessions.clone());

        Self {
            config: Arc::new(config),
            sessions,
            broadcaster,
            menu,
        }
    }

    /// Remove every session. Returns how many were torn down.
    pub fn shutdown(&self) -> usize {
        let removed = self.sessions.clear();
        tracing::info!(removed, "live sessions torn down");
        removed
    }
}
