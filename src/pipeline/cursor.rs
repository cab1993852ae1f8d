use std::sync::Arc;
use tracing::{debug, info};

use crate::common::error::Result;
use crate::pipeline::storage::Storage;

/// Derives the incremental-fetch cursor from the warehouse itself: the
/// timestamp of the most recently persisted play. An empty warehouse is a
/// valid state, not an error.
pub struct CursorStore {
    storage: Arc<dyn Storage>,
}

impl CursorStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    pub async fn get_cursor(&self) -> Result<Option<i64>> {
        match self.storage.latest_played_at().await? {
            Some(last_played) => {
                let cursor = last_played.timestamp();
                debug!(cursor, "using cursor derived from warehouse");
                Ok(Some(cursor))
            }
            None => {
                info!("no existing plays found; starting from scratch");
                Ok(None)
            }
        }
    }
}
