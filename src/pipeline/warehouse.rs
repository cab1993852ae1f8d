use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::common::error::Result;
use crate::domain::{
    Artist, ArtistRecord, EnrichedBatch, Play, PlayRecord, Track, TrackRecord, User,
    UNKNOWN_COUNTRY,
};
use crate::pipeline::storage::Storage;

/// What one persisted batch amounted to, for the run summary.
#[derive(Debug, Default, Clone, Copy)]
pub struct PersistStats {
    pub artists_written: usize,
    pub artists_skipped: usize,
    pub tracks_written: usize,
    pub tracks_skipped: usize,
    pub users_created: usize,
    pub plays_written: usize,
    pub plays_skipped: usize,
}

/// Resolves identities across the four entity tables and upserts one
/// enriched batch as a single all-or-nothing transaction.
///
/// Within a batch, an alias map from every identity key seen so far
/// short-circuits duplicate resolution before the warehouse is probed.
pub struct WarehouseWriter {
    storage: Arc<dyn Storage>,
}

impl WarehouseWriter {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    pub async fn persist(&self, batch: &EnrichedBatch) -> Result<PersistStats> {
        self.storage.begin_batch().await?;
        match self.write_batch(batch).await {
            Ok(stats) => {
                self.storage.commit_batch().await?;
                info!(
                    artists = stats.artists_written,
                    tracks = stats.tracks_written,
                    users = stats.users_created,
                    plays = stats.plays_written,
                    skipped_plays = stats.plays_skipped,
                    "batch persisted"
                );
                Ok(stats)
            }
            Err(err) => {
                error!(error = %err, "batch persist failed; rolling back");
                if let Err(rollback_err) = self.storage.rollback_batch().await {
                    error!(error = %rollback_err, "rollback failed");
                }
                Err(err)
            }
        }
    }

    async fn write_batch(&self, batch: &EnrichedBatch) -> Result<PersistStats> {
        let mut stats = PersistStats::default();
        // Dependency order: tracks need artist ids, plays need track ids.
        let artist_map = self.upsert_artists(&batch.artists, &mut stats).await?;
        let track_map = self
            .upsert_tracks(&batch.tracks, &artist_map, &mut stats)
            .await?;
        self.ensure_users(&batch.plays, &mut stats).await?;
        self.upsert_plays(&batch.plays, &track_map, &mut stats).await?;
        Ok(stats)
    }

    async fn resolve_artist(
        &self,
        alias_map: &HashMap<String, Artist>,
        mbid: Option<&str>,
        spotify_id: Option<&str>,
        name: Option<&str>,
    ) -> Result<Option<Artist>> {
        // Within-batch aliases first, then warehouse probes, both in
        // catalog id -> streaming id -> name precedence.
        for key in [mbid, spotify_id, name].into_iter().flatten() {
            if let Some(artist) = alias_map.get(key) {
                return Ok(Some(artist.clone()));
            }
        }
        if let Some(mbid) = mbid {
            if let Some(artist) = self.storage.get_artist_by_mbid(mbid).await? {
                return Ok(Some(artist));
            }
        }
        if let Some(spotify_id) = spotify_id {
            if let Some(artist) = self.storage.get_artist_by_spotify_id(spotify_id).await? {
                return Ok(Some(artist));
            }
        }
        if let Some(name) = name {
            if let Some(artist) = self.storage.get_artist_by_name(name).await? {
                return Ok(Some(artist));
            }
        }
        Ok(None)
    }

    async fn upsert_artists(
        &self,
        records: &[ArtistRecord],
        stats: &mut PersistStats,
    ) -> Result<HashMap<String, Artist>> {
        let mut alias_map: HashMap<String, Artist> = HashMap::new();

        for record in records {
            if record.name.trim().is_empty() {
                warn!("skipping artist record without a name");
                stats.artists_skipped += 1;
                continue;
            }

            let resolved = self
                .resolve_artist(
                    &alias_map,
                    record.mbid.as_deref(),
                    record.spotify_artist_id.as_deref(),
                    Some(&record.name),
                )
                .await?;

            let artist = match resolved {
                Some(mut artist) => {
                    // Mutable descriptive fields take the latest non-null
                    // observation; identity keys only ever fill gaps.
                    artist.genre_primary = record.genre_primary.clone();
                    if let Some(country) = &record.country {
                        artist.country = Some(country.clone());
                    }
                    if artist.musicbrainz_id.is_none() {
                        artist.musicbrainz_id = record.mbid.clone();
                    }
                    if artist.spotify_artist_id.is_none() {
                        artist.spotify_artist_id = record.spotify_artist_id.clone();
                    }
                    self.storage.update_artist(&artist).await?;
                    artist
                }
                None => {
                    let mut artist = Artist {
                        id: None,
                        name: record.name.clone(),
                        musicbrainz_id: record.mbid.clone(),
                        spotify_artist_id: record.spotify_artist_id.clone(),
                        genre_primary: record.genre_primary.clone(),
                        country: record.country.clone(),
                        verified: false,
                        monthly_listeners: None,
                    };
                    self.storage.create_artist(&mut artist).await?;
                    artist
                }
            };
            stats.artists_written += 1;

            alias_map.insert(artist.name.clone(), artist.clone());
            if let Some(mbid) = &artist.musicbrainz_id {
                alias_map.insert(mbid.clone(), artist.clone());
            }
            if let Some(spotify_id) = &artist.spotify_artist_id {
                alias_map.insert(spotify_id.clone(), artist.clone());
            }
        }

        Ok(alias_map)
    }

    async fn resolve_track(
        &self,
        alias_map: &HashMap<String, Track>,
        record: &TrackRecord,
        artist_id: i64,
        name: &str,
    ) -> Result<Option<Track>> {
        for key in [
            record.recording_mbid.as_deref(),
            record.spotify_track_id.as_deref(),
            Some(record.track_key.as_str()),
        ]
        .into_iter()
        .flatten()
        {
            if let Some(track) = alias_map.get(key) {
                return Ok(Some(track.clone()));
            }
        }
        if let Some(mbid) = &record.recording_mbid {
            if let Some(track) = self.storage.get_track_by_recording_mbid(mbid).await? {
                return Ok(Some(track));
            }
        }
        if let Some(spotify_id) = &record.spotify_track_id {
            if let Some(track) = self.storage.get_track_by_spotify_id(spotify_id).await? {
                return Ok(Some(track));
            }
        }
        self.storage.get_track_by_name_and_artist(name, artist_id).await
    }

    async fn upsert_tracks(
        &self,
        records: &[TrackRecord],
        artist_map: &HashMap<String, Artist>,
        stats: &mut PersistStats,
    ) -> Result<HashMap<String, Track>> {
        let mut track_map: HashMap<String, Track> = HashMap::new();

        for record in records {
            let Some(name) = record.name.as_deref().map(str::trim).filter(|n| !n.is_empty())
            else {
                warn!(track_key = %record.track_key, "skipping track without a name");
                stats.tracks_skipped += 1;
                continue;
            };

            let artist = self
                .resolve_artist(
                    artist_map,
                    record.primary_artist_mbid.as_deref(),
                    None,
                    record.primary_artist_name.as_deref(),
                )
                .await?;
            let Some(artist_id) = artist.and_then(|a| a.id) else {
                warn!(track = name, "skipping track without a resolvable artist");
                stats.tracks_skipped += 1;
                continue;
            };

            let resolved = self.resolve_track(&track_map, record, artist_id, name).await?;
            let track = match resolved {
                Some(mut track) => {
                    if let Some(album) = &record.album {
                        track.album = Some(album.clone());
                    }
                    track.genre = record.genre.clone();
                    if let Some(duration) = record.duration_sec.filter(|d| *d > 0) {
                        track.duration_sec = duration;
                    }
                    if track.recording_mbid.is_none() {
                        track.recording_mbid = record.recording_mbid.clone();
                    }
                    if track.release_mbid.is_none() {
                        track.release_mbid = record.release_mbid.clone();
                    }
                    if track.spotify_track_id.is_none() {
                        track.spotify_track_id = record.spotify_track_id.clone();
                    }
                    if track.spotify_album_id.is_none() {
                        track.spotify_album_id = record.spotify_album_id.clone();
                    }
                    self.storage.update_track(&track).await?;
                    track
                }
                None => {
                    let mut track = Track {
                        id: None,
                        name: name.to_string(),
                        artist_id,
                        recording_mbid: record.recording_mbid.clone(),
                        release_mbid: record.release_mbid.clone(),
                        spotify_track_id: record.spotify_track_id.clone(),
                        spotify_album_id: record.spotify_album_id.clone(),
                        album: record.album.clone(),
                        genre: record.genre.clone(),
                        duration_sec: record.duration_sec.unwrap_or(0),
                        release_date: None,
                        explicit: false,
                        popularity: None,
                    };
                    self.storage.create_track(&mut track).await?;
                    track
                }
            };
            stats.tracks_written += 1;

            let mut keys = vec![record.track_key.clone()];
            if let Some(mbid) = &track.recording_mbid {
                keys.push(mbid.clone());
            }
            if let Some(spotify_id) = &track.spotify_track_id {
                keys.push(spotify_id.clone());
            }
            for key in keys {
                track_map.insert(key, track.clone());
            }
        }

        Ok(track_map)
    }

    async fn ensure_users(&self, plays: &[PlayRecord], stats: &mut PersistStats) -> Result<()> {
        let mut seen: HashSet<&str> = HashSet::new();
        for play in plays {
            if !seen.insert(&play.user_name) {
                continue;
            }
            if self.storage.get_user(&play.user_name).await?.is_some() {
                continue;
            }

            let first_seen = DateTime::from_timestamp(play.listened_at, 0)
                .unwrap_or_else(Utc::now);
            let user = User {
                user_id: play.user_name.clone(),
                username: play.user_name.clone(),
                email: None,
                country: UNKNOWN_COUNTRY.to_string(),
                subscription_tier: "free".to_string(),
                signup_date: first_seen,
                last_active: Some(first_seen),
            };
            self.storage.create_user(&user).await?;
            stats.users_created += 1;
            debug!(user = %play.user_name, "created placeholder user");
        }
        Ok(())
    }

    async fn upsert_plays(
        &self,
        plays: &[PlayRecord],
        track_map: &HashMap<String, Track>,
        stats: &mut PersistStats,
    ) -> Result<()> {
        for record in plays {
            let track_id = [
                record.recording_mbid.as_deref(),
                record.recording_msid.as_deref(),
                record.spotify_track_id.as_deref(),
            ]
            .into_iter()
            .flatten()
            .find_map(|key| track_map.get(key))
            .and_then(|track| track.id);

            let Some(track_id) = track_id else {
                // A failed track enrichment must not break the whole batch
                warn!(play_id = %record.play_id, "skipping play with unresolved track");
                stats.plays_skipped += 1;
                continue;
            };
            let Some(played_at) = DateTime::from_timestamp(record.listened_at, 0) else {
                warn!(play_id = %record.play_id, "skipping play with invalid timestamp");
                stats.plays_skipped += 1;
                continue;
            };

            let existing = self.storage.get_play(&record.play_id).await?;
            let play = Play {
                play_id: record.play_id.clone(),
                user_id: record.user_name.clone(),
                track_id,
                played_at,
                played_sec: record.played_sec,
                completion_rate: Some(record.completion_rate),
                device_type: record.device_type.clone(),
                country: record.country.clone(),
                skip_reason: record.skip_reason.clone(),
                liked: record.liked,
                added_to_playlist: record.added_to_playlist,
                source: record.source.clone(),
                ingested_at: existing
                    .as_ref()
                    .map(|p| p.ingested_at)
                    .unwrap_or_else(Utc::now),
            };

            match existing {
                Some(_) => self.storage.update_play(&play).await?,
                None => self.storage.create_play(&play).await?,
            }
            stats.plays_written += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::storage::InMemoryStorage;

    fn artist_record(name: &str, mbid: Option<&str>, spotify: Option<&str>) -> ArtistRecord {
        ArtistRecord {
            artist_key: mbid
                .map(str::to_string)
                .unwrap_or_else(|| name.to_lowercase()),
            name: name.to_string(),
            mbid: mbid.map(str::to_string),
            spotify_artist_id: spotify.map(str::to_string),
            genre_primary: "unknown".into(),
            country: None,
            disambiguation: None,
        }
    }

    fn track_record(key: &str, name: &str, artist: &str, mbid: Option<&str>) -> TrackRecord {
        TrackRecord {
            track_key: key.to_string(),
            name: Some(name.to_string()),
            artist_credit: Some(artist.to_string()),
            primary_artist_name: Some(artist.to_string()),
            primary_artist_mbid: mbid.map(str::to_string),
            album: None,
            duration_sec: Some(200),
            recording_mbid: Some(key.to_string()),
            release_mbid: None,
            spotify_track_id: None,
            spotify_album_id: None,
            track_number: None,
            disc_number: None,
            music_service: None,
            genre: "unknown".into(),
        }
    }

    fn play_record(play_id: &str, track_key: &str) -> PlayRecord {
        PlayRecord {
            play_id: play_id.to_string(),
            user_name: "alice".into(),
            listened_at: 1700000000,
            recording_mbid: Some(track_key.to_string()),
            recording_msid: None,
            spotify_track_id: None,
            played_sec: 200,
            completion_rate: 100.0,
            device_type: "unknown".into(),
            country: "ZZ".into(),
            skip_reason: None,
            liked: None,
            added_to_playlist: false,
            source: "listenbrainz_api".into(),
        }
    }

    fn batch() -> EnrichedBatch {
        EnrichedBatch {
            artists: vec![artist_record("X", Some("A1"), None)],
            tracks: vec![track_record("R1", "Song", "X", Some("A1"))],
            plays: vec![play_record("msid-1_1700000000", "R1")],
        }
    }

    #[tokio::test]
    async fn persists_all_four_entities() {
        let storage = Arc::new(InMemoryStorage::new());
        let writer = WarehouseWriter::new(storage.clone());

        let stats = writer.persist(&batch()).await.unwrap();
        assert_eq!(stats.artists_written, 1);
        assert_eq!(stats.tracks_written, 1);
        assert_eq!(stats.users_created, 1);
        assert_eq!(stats.plays_written, 1);

        let play = storage.get_play("msid-1_1700000000").await.unwrap().unwrap();
        assert_eq!(play.user_id, "alice");
        let track = storage.get_track_by_recording_mbid("R1").await.unwrap().unwrap();
        assert_eq!(play.track_id, track.id.unwrap());
        let artist = storage.get_artist_by_mbid("A1").await.unwrap().unwrap();
        assert_eq!(track.artist_id, artist.id.unwrap());
    }

    #[tokio::test]
    async fn reingesting_the_same_batch_is_idempotent() {
        let storage = Arc::new(InMemoryStorage::new());
        let writer = WarehouseWriter::new(storage.clone());

        writer.persist(&batch()).await.unwrap();
        writer.persist(&batch()).await.unwrap();

        assert_eq!(storage.artist_count(), 1);
        assert_eq!(storage.track_count(), 1);
        assert_eq!(storage.user_count(), 1);
        assert_eq!(storage.play_count(), 1);
    }

    #[tokio::test]
    async fn later_catalog_id_attaches_to_artist_matched_by_name() {
        let storage = Arc::new(InMemoryStorage::new());
        let writer = WarehouseWriter::new(storage.clone());

        let first = EnrichedBatch {
            artists: vec![artist_record("X", None, None)],
            ..Default::default()
        };
        writer.persist(&first).await.unwrap();

        let second = EnrichedBatch {
            artists: vec![artist_record("X", Some("A1"), None)],
            ..Default::default()
        };
        writer.persist(&second).await.unwrap();

        assert_eq!(storage.artist_count(), 1);
        let artist = storage.get_artist_by_name("X").await.unwrap().unwrap();
        assert_eq!(artist.musicbrainz_id.as_deref(), Some("A1"));
    }

    #[tokio::test]
    async fn existing_streaming_id_survives_absent_observation() {
        let storage = Arc::new(InMemoryStorage::new());
        let writer = WarehouseWriter::new(storage.clone());

        let first = EnrichedBatch {
            artists: vec![artist_record("X", Some("A1"), Some("sp1"))],
            ..Default::default()
        };
        writer.persist(&first).await.unwrap();

        let second = EnrichedBatch {
            artists: vec![artist_record("X", Some("A1"), None)],
            ..Default::default()
        };
        writer.persist(&second).await.unwrap();

        let artist = storage.get_artist_by_mbid("A1").await.unwrap().unwrap();
        assert_eq!(artist.spotify_artist_id.as_deref(), Some("sp1"));
    }

    #[tokio::test]
    async fn nonnull_descriptive_fields_are_refreshed() {
        let storage = Arc::new(InMemoryStorage::new());
        let writer = WarehouseWriter::new(storage.clone());

        writer.persist(&batch()).await.unwrap();

        let mut updated = batch();
        updated.artists[0].genre_primary = "indie rock".into();
        updated.artists[0].country = Some("SE".into());
        updated.tracks[0].album = Some("Album".into());
        writer.persist(&updated).await.unwrap();

        let artist = storage.get_artist_by_mbid("A1").await.unwrap().unwrap();
        assert_eq!(artist.genre_primary, "indie rock");
        assert_eq!(artist.country.as_deref(), Some("SE"));
        let track = storage.get_track_by_recording_mbid("R1").await.unwrap().unwrap();
        assert_eq!(track.album.as_deref(), Some("Album"));
    }

    #[tokio::test]
    async fn track_without_resolvable_artist_is_skipped_with_its_plays() {
        let storage = Arc::new(InMemoryStorage::new());
        let writer = WarehouseWriter::new(storage.clone());

        let batch = EnrichedBatch {
            artists: Vec::new(),
            tracks: vec![track_record("R9", "Orphan", "Nobody", None)],
            plays: vec![play_record("p9", "R9")],
        };
        let stats = writer.persist(&batch).await.unwrap();

        assert_eq!(stats.tracks_skipped, 1);
        assert_eq!(stats.plays_skipped, 1);
        assert_eq!(storage.track_count(), 0);
        assert_eq!(storage.play_count(), 0);
        // User ensure still ran for the play's username
        assert_eq!(storage.user_count(), 1);
    }

    #[tokio::test]
    async fn duplicate_artists_within_batch_collapse_via_alias_map() {
        let storage = Arc::new(InMemoryStorage::new());
        let writer = WarehouseWriter::new(storage.clone());

        let batch = EnrichedBatch {
            artists: vec![
                artist_record("X", Some("A1"), None),
                artist_record("X", None, Some("sp1")),
            ],
            ..Default::default()
        };
        writer.persist(&batch).await.unwrap();

        assert_eq!(storage.artist_count(), 1);
        let artist = storage.get_artist_by_mbid("A1").await.unwrap().unwrap();
        assert_eq!(artist.spotify_artist_id.as_deref(), Some("sp1"));
    }

    #[tokio::test]
    async fn existing_user_is_left_untouched() {
        let storage = Arc::new(InMemoryStorage::new());
        let writer = WarehouseWriter::new(storage.clone());

        writer.persist(&batch()).await.unwrap();
        let before = storage.get_user("alice").await.unwrap().unwrap();

        let mut second = batch();
        second.plays[0].listened_at = 1700000500;
        second.plays[0].play_id = "msid-1_1700000500".into();
        writer.persist(&second).await.unwrap();

        let after = storage.get_user("alice").await.unwrap().unwrap();
        assert_eq!(before.signup_date, after.signup_date);
        assert_eq!(storage.user_count(), 1);
    }
}
