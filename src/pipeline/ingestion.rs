use std::sync::Arc;
use tracing::info;

use crate::apis::listenbrainz::ListenSource;
use crate::common::error::Result;
use crate::domain::Listen;
use crate::pipeline::cursor::CursorStore;

/// What one fetch produced: the decoded rows, the raw payload for
/// provenance, and the cursor that was actually applied.
#[derive(Debug)]
pub struct IngestionResult {
    pub listens: Vec<Listen>,
    pub payload: serde_json::Value,
    pub cursor_used: Option<i64>,
}

/// Decides between incremental fetch (warehouse cursor) and full resync
/// (no floor), then delegates the page fetch to the history source.
pub struct IngestionOrchestrator {
    source: Arc<dyn ListenSource>,
    cursor: CursorStore,
}

impl IngestionOrchestrator {
    pub fn new(source: Arc<dyn ListenSource>, cursor: CursorStore) -> Self {
        Self { source, cursor }
    }

    /// An empty result is a normal outcome; callers stop the pipeline early
    /// rather than enriching nothing.
    pub async fn fetch(&self, full_resync: bool) -> Result<IngestionResult> {
        let cursor_used = if full_resync {
            None
        } else {
            self.cursor.get_cursor().await?
        };

        let (listens, payload) = self.source.fetch_listens(cursor_used).await?;

        info!(
            fetched = listens.len(),
            cursor = ?cursor_used,
            full_resync,
            "fetched listens"
        );

        Ok(IngestionResult {
            listens,
            payload,
            cursor_used,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::sync::Mutex;

    use crate::domain::Play;
    use crate::pipeline::storage::{InMemoryStorage, Storage};

    struct RecordingSource {
        seen_min_ts: Mutex<Vec<Option<i64>>>,
        listens: Vec<Listen>,
    }

    #[async_trait]
    impl ListenSource for RecordingSource {
        async fn fetch_listens(
            &self,
            min_ts: Option<i64>,
        ) -> Result<(Vec<Listen>, serde_json::Value)> {
            self.seen_min_ts.lock().unwrap().push(min_ts);
            Ok((self.listens.clone(), serde_json::json!({})))
        }
    }

    async fn storage_with_play_at(ts: i64) -> Arc<InMemoryStorage> {
        let storage = Arc::new(InMemoryStorage::new());
        storage
            .create_play(&Play {
                play_id: "p1".into(),
                user_id: "alice".into(),
                track_id: 1,
                played_at: DateTime::from_timestamp(ts, 0).unwrap(),
                played_sec: 60,
                completion_rate: Some(100.0),
                device_type: "unknown".into(),
                country: "ZZ".into(),
                skip_reason: None,
                liked: None,
                added_to_playlist: false,
                source: "listenbrainz_api".into(),
                ingested_at: Utc::now(),
            })
            .await
            .unwrap();
        storage
    }

    #[tokio::test]
    async fn incremental_fetch_forwards_warehouse_cursor() {
        let storage = storage_with_play_at(1700000000).await;
        let source = Arc::new(RecordingSource {
            seen_min_ts: Mutex::new(Vec::new()),
            listens: Vec::new(),
        });
        let orchestrator =
            IngestionOrchestrator::new(source.clone(), CursorStore::new(storage));

        let result = orchestrator.fetch(false).await.unwrap();
        assert_eq!(result.cursor_used, Some(1700000000));
        assert_eq!(*source.seen_min_ts.lock().unwrap(), vec![Some(1700000000)]);
    }

    #[tokio::test]
    async fn full_resync_bypasses_stored_cursor() {
        let storage = storage_with_play_at(1700000000).await;
        let source = Arc::new(RecordingSource {
            seen_min_ts: Mutex::new(Vec::new()),
            listens: Vec::new(),
        });
        let orchestrator =
            IngestionOrchestrator::new(source.clone(), CursorStore::new(storage));

        let result = orchestrator.fetch(true).await.unwrap();
        assert_eq!(result.cursor_used, None);
        assert_eq!(*source.seen_min_ts.lock().unwrap(), vec![None]);
    }

    #[tokio::test]
    async fn empty_source_is_a_normal_empty_result() {
        let source = Arc::new(RecordingSource {
            seen_min_ts: Mutex::new(Vec::new()),
            listens: Vec::new(),
        });
        let orchestrator = IngestionOrchestrator::new(
            source,
            CursorStore::new(Arc::new(InMemoryStorage::new())),
        );

        let result = orchestrator.fetch(false).await.unwrap();
        assert!(result.listens.is_empty());
    }
}
