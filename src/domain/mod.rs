use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// One raw listen event, decoded from the history API into a uniform row.
/// Absent upstream values stay `None`; nothing downstream deals in sentinels.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Listen {
    pub user_name: Option<String>,
    pub inserted_at: Option<i64>,
    pub listened_at: Option<i64>,
    pub recording_msid: Option<String>,
    pub recording_mbid: Option<String>,
    pub release_mbid: Option<String>,
    pub track_name: Option<String>,
    pub artist_credit_name: Option<String>,
    /// Parallel lists: one entry per credited artist.
    pub artist_names: Vec<String>,
    pub artist_mbids: Vec<String>,
    pub spotify_artist_ids: Vec<String>,
    pub release_name: Option<String>,
    pub duration_ms: Option<i64>,
    pub origin_url: Option<String>,
    pub music_service: Option<String>,
    pub spotify_track_id: Option<String>,
    pub spotify_album_id: Option<String>,
    pub track_number: Option<i64>,
    pub disc_number: Option<i64>,
    pub listening_from: Option<String>,
    pub submission_client: Option<String>,
    pub listening_country: Option<String>,
    pub origin_country: Option<String>,
}

/// Dimension row: a listener. Created lazily with placeholder fields the
/// first time a play references an unknown username.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub user_id: String,
    pub username: String,
    pub email: Option<String>,
    pub country: String,
    pub subscription_tier: String,
    pub signup_date: DateTime<Utc>,
    pub last_active: Option<DateTime<Utc>>,
}

/// Dimension row: an artist. `id` is `None` until the row is persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artist {
    pub id: Option<i64>,
    pub name: String,
    pub musicbrainz_id: Option<String>,
    pub spotify_artist_id: Option<String>,
    pub genre_primary: String,
    pub country: Option<String>,
    pub verified: bool,
    pub monthly_listeners: Option<i64>,
}

/// Dimension row: a track, always owned by an artist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Track {
    pub id: Option<i64>,
    pub name: String,
    pub artist_id: i64,
    pub recording_mbid: Option<String>,
    pub release_mbid: Option<String>,
    pub spotify_track_id: Option<String>,
    pub spotify_album_id: Option<String>,
    pub album: Option<String>,
    pub genre: String,
    pub duration_sec: i64,
    pub release_date: Option<NaiveDate>,
    pub explicit: bool,
    pub popularity: Option<f64>,
}

/// Fact row: a single play. `play_id` is the externally stable key that makes
/// re-ingestion an update rather than a duplicate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Play {
    pub play_id: String,
    pub user_id: String,
    pub track_id: i64,
    pub played_at: DateTime<Utc>,
    pub played_sec: i64,
    pub completion_rate: Option<f64>,
    pub device_type: String,
    pub country: String,
    pub skip_reason: Option<String>,
    pub liked: Option<bool>,
    pub added_to_playlist: bool,
    pub source: String,
    pub ingested_at: DateTime<Utc>,
}

/// Enriched play record, prior to track-id resolution. Carries every track
/// identity key observed on the event so the writer can resolve in precedence
/// order.
#[derive(Debug, Clone)]
pub struct PlayRecord {
    pub play_id: String,
    pub user_name: String,
    pub listened_at: i64,
    pub recording_mbid: Option<String>,
    pub recording_msid: Option<String>,
    pub spotify_track_id: Option<String>,
    pub played_sec: i64,
    pub completion_rate: f64,
    pub device_type: String,
    pub country: String,
    pub skip_reason: Option<String>,
    pub liked: Option<bool>,
    pub added_to_playlist: bool,
    pub source: String,
}

/// Enriched track record, one per distinct recording in the batch.
#[derive(Debug, Clone)]
pub struct TrackRecord {
    pub track_key: String,
    pub name: Option<String>,
    pub artist_credit: Option<String>,
    pub primary_artist_name: Option<String>,
    pub primary_artist_mbid: Option<String>,
    pub album: Option<String>,
    pub duration_sec: Option<i64>,
    pub recording_mbid: Option<String>,
    pub release_mbid: Option<String>,
    pub spotify_track_id: Option<String>,
    pub spotify_album_id: Option<String>,
    pub track_number: Option<i64>,
    pub disc_number: Option<i64>,
    pub music_service: Option<String>,
    pub genre: String,
}

/// Enriched artist record, one per distinct (name, mbid) credit in the batch.
#[derive(Debug, Clone)]
pub struct ArtistRecord {
    pub artist_key: String,
    pub name: String,
    pub mbid: Option<String>,
    pub spotify_artist_id: Option<String>,
    pub genre_primary: String,
    pub country: Option<String>,
    pub disambiguation: Option<String>,
}

/// Output of enrichment, input to the warehouse writer.
#[derive(Debug, Clone, Default)]
pub struct EnrichedBatch {
    pub plays: Vec<PlayRecord>,
    pub tracks: Vec<TrackRecord>,
    pub artists: Vec<ArtistRecord>,
}

impl EnrichedBatch {
    pub fn is_empty(&self) -> bool {
        self.plays.is_empty() && self.tracks.is_empty() && self.artists.is_empty()
    }
}

/// Provenance tag stamped on every play written by this pipeline.
pub const PLAY_SOURCE: &str = "listenbrainz_api";

/// Country code used when the upstream hint is absent or malformed.
pub const UNKNOWN_COUNTRY: &str = "ZZ";
