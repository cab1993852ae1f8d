use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::common::error::Result;
use crate::domain::{Artist, Play, Track, User};

/// Repository over the four warehouse tables. The writer depends on this
/// abstraction; `SqliteStorage` backs production and `InMemoryStorage` backs
/// tests.
///
/// A batch is bracketed by `begin_batch`/`commit_batch`, with
/// `rollback_batch` restoring the pre-batch state. One batch is open at a
/// time per store; the pipeline is single-writer.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn begin_batch(&self) -> Result<()>;
    async fn commit_batch(&self) -> Result<()>;
    async fn rollback_batch(&self) -> Result<()>;

    /// Insert a new artist, assigning its surrogate id.
    async fn create_artist(&self, artist: &mut Artist) -> Result<()>;
    async fn update_artist(&self, artist: &Artist) -> Result<()>;
    async fn get_artist_by_mbid(&self, mbid: &str) -> Result<Option<Artist>>;
    async fn get_artist_by_spotify_id(&self, spotify_id: &str) -> Result<Option<Artist>>;
    async fn get_artist_by_name(&self, name: &str) -> Result<Option<Artist>>;

    /// Insert a new track, assigning its surrogate id.
    async fn create_track(&self, track: &mut Track) -> Result<()>;
    async fn update_track(&self, track: &Track) -> Result<()>;
    async fn get_track_by_recording_mbid(&self, mbid: &str) -> Result<Option<Track>>;
    async fn get_track_by_spotify_id(&self, spotify_id: &str) -> Result<Option<Track>>;
    async fn get_track_by_name_and_artist(&self, name: &str, artist_id: i64)
        -> Result<Option<Track>>;

    async fn get_user(&self, user_id: &str) -> Result<Option<User>>;
    async fn create_user(&self, user: &User) -> Result<()>;

    async fn get_play(&self, play_id: &str) -> Result<Option<Play>>;
    async fn create_play(&self, play: &Play) -> Result<()>;
    async fn update_play(&self, play: &Play) -> Result<()>;

    /// Timestamp of the most recently played persisted play, if any.
    async fn latest_played_at(&self) -> Result<Option<DateTime<Utc>>>;
}
