//! End-to-end pipeline scenarios: fetch, enrich, and persist against the
//! in-memory storage, with a stub history source and canned metadata.

use async_trait::async_trait;
use std::sync::Arc;

use listens_warehouse::apis::listenbrainz::{decode_payload, ListenSource};
use listens_warehouse::apis::musicbrainz::{ArtistMetadata, MetadataSource, NamedCount};
use listens_warehouse::common::error::Result;
use listens_warehouse::domain::Listen;
use listens_warehouse::pipeline::cursor::CursorStore;
use listens_warehouse::pipeline::enrich::Enricher;
use listens_warehouse::pipeline::ingestion::IngestionOrchestrator;
use listens_warehouse::pipeline::storage::{InMemoryStorage, Storage};
use listens_warehouse::pipeline::warehouse::WarehouseWriter;

/// History source backed by a fixed payload, filtered the way the real
/// client filters.
struct FixtureSource {
    payload: serde_json::Value,
}

#[async_trait]
impl ListenSource for FixtureSource {
    async fn fetch_listens(&self, min_ts: Option<i64>) -> Result<(Vec<Listen>, serde_json::Value)> {
        let listens = decode_payload(&self.payload, min_ts)?;
        Ok((listens, self.payload.clone()))
    }
}

struct CannedMetadata;

#[async_trait]
impl MetadataSource for CannedMetadata {
    async fn fetch_artist(&self, mbid: Option<&str>) -> ArtistMetadata {
        match mbid {
            Some("A1") => ArtistMetadata {
                genres: vec![NamedCount {
                    name: "indie rock".into(),
                    count: 4,
                }],
                country: Some("SE".into()),
                ..Default::default()
            },
            _ => ArtistMetadata::default(),
        }
    }
}

fn alice_payload() -> serde_json::Value {
    serde_json::json!({
        "payload": {
            "count": 1,
            "listens": [{
                "user_name": "alice",
                "listened_at": 1700000000,
                "recording_msid": "msid-1",
                "track_metadata": {
                    "artist_name": "X",
                    "track_name": "Song",
                    "release_name": "Album",
                    "additional_info": {
                        "duration_ms": 200000,
                        "submission_client": "Web Scrobbler"
                    },
                    "mbid_mapping": {
                        "recording_mbid": "R1",
                        "artist_mbids": ["A1"]
                    }
                }
            }]
        }
    })
}

struct Pipeline {
    storage: Arc<InMemoryStorage>,
    orchestrator: IngestionOrchestrator,
    enricher: Enricher,
    writer: WarehouseWriter,
}

fn pipeline_with(payload: serde_json::Value) -> Pipeline {
    let storage = Arc::new(InMemoryStorage::new());
    let dyn_storage: Arc<dyn Storage> = storage.clone();
    Pipeline {
        storage,
        orchestrator: IngestionOrchestrator::new(
            Arc::new(FixtureSource { payload }),
            CursorStore::new(dyn_storage.clone()),
        ),
        enricher: Enricher::new(Arc::new(CannedMetadata)),
        writer: WarehouseWriter::new(dyn_storage),
    }
}

#[tokio::test]
async fn one_listen_populates_all_four_tables() {
    let pipeline = pipeline_with(alice_payload());

    let result = pipeline.orchestrator.fetch(false).await.unwrap();
    assert_eq!(result.cursor_used, None);
    assert_eq!(result.listens.len(), 1);

    let batch = pipeline.enricher.enrich(&result.listens).await;
    pipeline.writer.persist(&batch).await.unwrap();

    let storage = &pipeline.storage;
    let artist = storage.get_artist_by_mbid("A1").await.unwrap().unwrap();
    assert_eq!(artist.name, "X");
    assert_eq!(artist.genre_primary, "indie rock");
    assert_eq!(artist.country.as_deref(), Some("SE"));

    let track = storage.get_track_by_recording_mbid("R1").await.unwrap().unwrap();
    assert_eq!(track.name, "Song");
    assert_eq!(track.artist_id, artist.id.unwrap());
    assert_eq!(track.genre, "indie rock");
    assert_eq!(track.duration_sec, 200);

    let user = storage.get_user("alice").await.unwrap().unwrap();
    assert_eq!(user.country, "ZZ");
    assert_eq!(user.subscription_tier, "free");

    let play = storage.get_play("msid-1_1700000000").await.unwrap().unwrap();
    assert_eq!(play.completion_rate, Some(100.0));
    assert_eq!(play.device_type, "web");
    assert_eq!(play.track_id, track.id.unwrap());
    assert_eq!(play.played_at.timestamp(), 1700000000);
}

#[tokio::test]
async fn second_run_with_no_new_listens_halts_after_fetch() {
    let pipeline = pipeline_with(alice_payload());

    // First run populates the warehouse
    let result = pipeline.orchestrator.fetch(false).await.unwrap();
    let batch = pipeline.enricher.enrich(&result.listens).await;
    pipeline.writer.persist(&batch).await.unwrap();
    assert_eq!(pipeline.storage.play_count(), 1);

    // Second run: cursor equals the persisted max, the only listen is
    // filtered out, and the pipeline halts before touching the warehouse.
    let result = pipeline.orchestrator.fetch(false).await.unwrap();
    assert_eq!(result.cursor_used, Some(1700000000));
    assert!(result.listens.is_empty());
    assert_eq!(pipeline.storage.play_count(), 1);
    assert_eq!(pipeline.storage.track_count(), 1);
}

#[tokio::test]
async fn full_resync_reingests_without_duplicating() {
    let pipeline = pipeline_with(alice_payload());

    let result = pipeline.orchestrator.fetch(false).await.unwrap();
    let batch = pipeline.enricher.enrich(&result.listens).await;
    pipeline.writer.persist(&batch).await.unwrap();

    // Full resync bypasses the cursor, fetches the same event again, and
    // the stable play id makes the second persist an update.
    let result = pipeline.orchestrator.fetch(true).await.unwrap();
    assert_eq!(result.cursor_used, None);
    assert_eq!(result.listens.len(), 1);

    let batch = pipeline.enricher.enrich(&result.listens).await;
    pipeline.writer.persist(&batch).await.unwrap();

    assert_eq!(pipeline.storage.play_count(), 1);
    assert_eq!(pipeline.storage.track_count(), 1);
    assert_eq!(pipeline.storage.artist_count(), 1);
    assert_eq!(pipeline.storage.user_count(), 1);
}
