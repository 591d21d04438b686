//! Storage union passed to Axum.

use std::sync::Arc;

use axum::extract::FromRef;

use crate::AppState;
use crate::account::{AccountStore, MemoryStore, PgStore};
use crate::audit::AuditTrail;
use crate::config::Postgres as PostgresConfig;
use crate::error::Result;

/// Account store and audit trail behind one handle.
#[derive(Clone)]
pub struct Database {
    pub accounts: Arc<dyn AccountStore>,
    pub audit: AuditTrail,
}

impl Database {
    /// Connect to PostgreSQL and run migrations.
    pub async fn postgres(config: &PostgresConfig) -> Result<Self> {
        let store = Arc::new(PgStore::connect(config).await?);

        tracing::info!(address = config.address, "postgres connected");

        Ok(Self {
            accounts: Arc::clone(&store) as Arc<dyn AccountStore>,
            audit: AuditTrail::new(store),
        })
    }

    /// Volatile store for tests and database-less development.
    pub fn in_memory() -> Self {
        let store = Arc::new(MemoryStore::new());

        Self {
            accounts: Arc::clone(&store) as Arc<dyn AccountStore>,
            audit: AuditTrail::new(store),
        }
    }
}

impl FromRef<AppState> for Database {
    fn from_ref(app_state: &AppState) -> Database {
        app_state.db.clone()
    }
}
