use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;

use super::traits::Storage;
use crate::common::error::Result;
use crate::domain::{Artist, Play, Track, User};

#[derive(Clone, Default)]
struct State {
    artists: HashMap<i64, Artist>,
    tracks: HashMap<i64, Track>,
    users: HashMap<String, User>,
    plays: HashMap<String, Play>,
    next_artist_id: i64,
    next_track_id: i64,
}

/// In-memory storage implementation for tests. Batch semantics are honored by
/// snapshotting on begin and restoring on rollback.
pub struct InMemoryStorage {
    state: Mutex<State>,
    snapshot: Mutex<Option<State>>,
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                next_artist_id: 1,
                next_track_id: 1,
                ..Default::default()
            }),
            snapshot: Mutex::new(None),
        }
    }

    pub fn artist_count(&self) -> usize {
        self.state.lock().unwrap().artists.len()
    }

    pub fn track_count(&self) -> usize {
        self.state.lock().unwrap().tracks.len()
    }

    pub fn user_count(&self) -> usize {
        self.state.lock().unwrap().users.len()
    }

    pub fn play_count(&self) -> usize {
        self.state.lock().unwrap().plays.len()
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn begin_batch(&self) -> Result<()> {
        let state = self.state.lock().unwrap();
        *self.snapshot.lock().unwrap() = Some(state.clone());
        Ok(())
    }

    async fn commit_batch(&self) -> Result<()> {
        *self.snapshot.lock().unwrap() = None;
        Ok(())
    }

    async fn rollback_batch(&self) -> Result<()> {
        if let Some(snapshot) = self.snapshot.lock().unwrap().take() {
            *self.state.lock().unwrap() = snapshot;
        }
        Ok(())
    }

    async fn create_artist(&self, artist: &mut Artist) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let id = state.next_artist_id;
        state.next_artist_id += 1;
        artist.id = Some(id);
        state.artists.insert(id, artist.clone());
        debug!(name = %artist.name, id, "created artist");
        Ok(())
    }

    async fn update_artist(&self, artist: &Artist) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(id) = artist.id {
            state.artists.insert(id, artist.clone());
        }
        Ok(())
    }

    async fn get_artist_by_mbid(&self, mbid: &str) -> Result<Option<Artist>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .artists
            .values()
            .find(|a| a.musicbrainz_id.as_deref() == Some(mbid))
            .cloned())
    }

    async fn get_artist_by_spotify_id(&self, spotify_id: &str) -> Result<Option<Artist>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .artists
            .values()
            .find(|a| a.spotify_artist_id.as_deref() == Some(spotify_id))
            .cloned())
    }

    async fn get_artist_by_name(&self, name: &str) -> Result<Option<Artist>> {
        let state = self.state.lock().unwrap();
        Ok(state.artists.values().find(|a| a.name == name).cloned())
    }

    async fn create_track(&self, track: &mut Track) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let id = state.next_track_id;
        state.next_track_id += 1;
        track.id = Some(id);
        state.tracks.insert(id, track.clone());
        debug!(name = %track.name, id, "created track");
        Ok(())
    }

    async fn update_track(&self, track: &Track) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(id) = track.id {
            state.tracks.insert(id, track.clone());
        }
        Ok(())
    }

    async fn get_track_by_recording_mbid(&self, mbid: &str) -> Result<Option<Track>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .tracks
            .values()
            .find(|t| t.recording_mbid.as_deref() == Some(mbid))
            .cloned())
    }

    async fn get_track_by_spotify_id(&self, spotify_id: &str) -> Result<Option<Track>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .tracks
            .values()
            .find(|t| t.spotify_track_id.as_deref() == Some(spotify_id))
            .cloned())
    }

    async fn get_track_by_name_and_artist(
        &self,
        name: &str,
        artist_id: i64,
    ) -> Result<Option<Track>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .tracks
            .values()
            .find(|t| t.name == name && t.artist_id == artist_id)
            .cloned())
    }

    async fn get_user(&self, user_id: &str) -> Result<Option<User>> {
        let state = self.state.lock().unwrap();
        Ok(state.users.get(user_id).cloned())
    }

    async fn create_user(&self, user: &User) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.users.insert(user.user_id.clone(), user.clone());
        Ok(())
    }

    async fn get_play(&self, play_id: &str) -> Result<Option<Play>> {
        let state = self.state.lock().unwrap();
        Ok(state.plays.get(play_id).cloned())
    }

    async fn create_play(&self, play: &Play) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.plays.insert(play.play_id.clone(), play.clone());
        Ok(())
    }

    async fn update_play(&self, play: &Play) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.plays.insert(play.play_id.clone(), play.clone());
        Ok(())
    }

    async fn latest_played_at(&self) -> Result<Option<DateTime<Utc>>> {
        let state = self.state.lock().unwrap();
        Ok(state.plays.values().map(|p| p.played_at).max())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn play(id: &str, ts: i64) -> Play {
        Play {
            play_id: id.to_string(),
            user_id: "alice".into(),
            track_id: 1,
            played_at: DateTime::from_timestamp(ts, 0).unwrap(),
            played_sec: 100,
            completion_rate: Some(100.0),
            device_type: "unknown".into(),
            country: "ZZ".into(),
            skip_reason: None,
            liked: None,
            added_to_playlist: false,
            source: "listenbrainz_api".into(),
            ingested_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn rollback_restores_pre_batch_state() {
        let storage = InMemoryStorage::new();
        storage.create_play(&play("p1", 1700000000)).await.unwrap();

        storage.begin_batch().await.unwrap();
        storage.create_play(&play("p2", 1700000100)).await.unwrap();
        storage.rollback_batch().await.unwrap();

        assert_eq!(storage.play_count(), 1);
        assert!(storage.get_play("p2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn latest_played_at_tracks_maximum() {
        let storage = InMemoryStorage::new();
        assert!(storage.latest_played_at().await.unwrap().is_none());

        storage.create_play(&play("p1", 1700000000)).await.unwrap();
        storage.create_play(&play("p2", 1700000500)).await.unwrap();

        let latest = storage.latest_played_at().await.unwrap().unwrap();
        assert_eq!(latest.timestamp(), 1700000500);
    }
}
