use std::sync::Arc;

use super::cookie::CookieConfig;
use crate::identity::{store::StoreHealth, SessionService};

/// Shared handler state, injected as an `Extension<Arc<AppState>>`.
#[derive(Clone)]
pub struct AppState {
    sessions: Arc<SessionService>,
    cookies: CookieConfig,
    health: Arc<dyn StoreHealth>,
}

impl AppState {
    #[must_use]
    pub fn new(
        sessions: Arc<SessionService>,
        cookies: CookieConfig,
        health: Arc<dyn StoreHealth>,
    ) -> Self {
        Self {
            sessions,
            cookies,
            health,
        }
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionService {
        &self.sessions
    }

    #[must_use]
    pub fn cookies(&self) -> &CookieConfig {
        &self.cookies
    }

    #[must_use]
    pub fn health(&self) -> &dyn StoreHealth {
        self.health.as_ref()
    }
}
