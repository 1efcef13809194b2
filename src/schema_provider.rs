//! Cached schema snapshots.
//!
//! The snapshot is the only state shared between sessions. Readers get an
//! `Arc<Schema>` and keep it for the duration of a turn; a refresh builds a
//! new schema and swaps the pointer, so a reader never sees a half-updated one.

use crate::db::{DatabaseClient, Schema};
use crate::error::{ConverseError, Result};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Introspects the database once and serves the cached snapshot.
pub struct SchemaProvider {
    db: Arc<dyn DatabaseClient>,
    snapshot: RwLock<Option<Arc<Schema>>>,
}

impl SchemaProvider {
    pub fn new(db: Arc<dyn DatabaseClient>) -> Self {
        Self {
            db,
            snapshot: RwLock::new(None),
        }
    }

    /// Returns the cached snapshot, introspecting on first use.
    ///
    /// Any failure here is a connection error: without a schema no turn can
    /// be grounded.
    pub async fn snapshot(&self) -> Result<Arc<Schema>> {
        if let Some(schema) = self.snapshot.read().await.as_ref() {
            return Ok(Arc::clone(schema));
        }

        let mut guard = self.snapshot.write().await;
        // Another task may have loaded it while we waited for the lock
        if let Some(schema) = guard.as_ref() {
            return Ok(Arc::clone(schema));
        }

        let schema = Arc::new(self.load().await?);
        *guard = Some(Arc::clone(&schema));
        Ok(schema)
    }

    /// Re-introspects the database and replaces the snapshot.
    ///
    /// On failure the previous snapshot stays in place.
    pub async fn refresh(&self) -> Result<Arc<Schema>> {
        let schema = match self.load().await {
            Ok(schema) => Arc::new(schema),
            Err(e) => {
                warn!(error = %e, "Schema refresh failed, keeping previous snapshot");
                return Err(e);
            }
        };

        *self.snapshot.write().await = Some(Arc::clone(&schema));
        Ok(schema)
    }

    /// The database this provider introspects.
    pub fn database(&self) -> &Arc<dyn DatabaseClient> {
        &self.db
    }

    async fn load(&self) -> Result<Schema> {
        let start = Instant::now();
        let schema = self.db.introspect_schema().await.map_err(|e| match e {
            ConverseError::Connection(_) => e,
            other => ConverseError::connection(format!(
                "Schema introspection failed: {}",
                other.message()
            )),
        })?;

        info!(
            tables = schema.tables.len(),
            hash = schema.content_hash(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Loaded schema snapshot"
        );
        Ok(schema)
    }
}
