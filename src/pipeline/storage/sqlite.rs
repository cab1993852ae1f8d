use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::Mutex;

use super::traits::Storage;
use crate::common::error::{PipelineError, Result};
use crate::domain::{Artist, Play, Track, User};

/// Embedded SQLite warehouse. Timestamps are stored as epoch seconds,
/// release dates as ISO `YYYY-MM-DD` text.
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA foreign_keys=ON;
            CREATE TABLE IF NOT EXISTS users (
                user_id            TEXT PRIMARY KEY,
                username           TEXT NOT NULL,
                email              TEXT,
                country            TEXT NOT NULL,
                subscription_tier  TEXT NOT NULL,
                signup_date        INTEGER NOT NULL,
                last_active        INTEGER
            );
            CREATE TABLE IF NOT EXISTS artists (
                artist_id          INTEGER PRIMARY KEY AUTOINCREMENT,
                artist_name        TEXT NOT NULL UNIQUE,
                musicbrainz_id     TEXT UNIQUE,
                spotify_artist_id  TEXT UNIQUE,
                genre_primary      TEXT NOT NULL,
                country            TEXT,
                verified           INTEGER NOT NULL DEFAULT 0,
                monthly_listeners  INTEGER
            );
            CREATE TABLE IF NOT EXISTS tracks (
                track_id                  INTEGER PRIMARY KEY AUTOINCREMENT,
                track_name                TEXT NOT NULL,
                artist_id                 INTEGER NOT NULL REFERENCES artists(artist_id),
                musicbrainz_recording_id  TEXT UNIQUE,
                musicbrainz_release_id    TEXT,
                spotify_track_id          TEXT UNIQUE,
                spotify_album_id          TEXT,
                album                     TEXT,
                genre                     TEXT NOT NULL,
                duration_sec              INTEGER NOT NULL,
                release_date              TEXT,
                explicit                  INTEGER NOT NULL DEFAULT 0,
                popularity                REAL
            );
            CREATE TABLE IF NOT EXISTS plays (
                play_id            TEXT PRIMARY KEY,
                user_id            TEXT NOT NULL REFERENCES users(user_id),
                track_id           INTEGER NOT NULL REFERENCES tracks(track_id),
                played_at          INTEGER NOT NULL,
                played_sec         INTEGER NOT NULL,
                completion_rate    REAL,
                device_type        TEXT NOT NULL,
                country            TEXT NOT NULL,
                skip_reason        TEXT,
                liked              INTEGER,
                added_to_playlist  INTEGER NOT NULL DEFAULT 0,
                source             TEXT NOT NULL,
                ingested_at        INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_plays_played_at ON plays(played_at);
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

fn timestamp_from_epoch(secs: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0).ok_or_else(|| PipelineError::Storage {
        message: format!("invalid epoch timestamp: {}", secs),
    })
}

fn artist_from_row(row: &Row<'_>) -> rusqlite::Result<Artist> {
    Ok(Artist {
        id: Some(row.get(0)?),
        name: row.get(1)?,
        musicbrainz_id: row.get(2)?,
        spotify_artist_id: row.get(3)?,
        genre_primary: row.get(4)?,
        country: row.get(5)?,
        verified: row.get::<_, i64>(6)? != 0,
        monthly_listeners: row.get(7)?,
    })
}

fn track_from_row(row: &Row<'_>) -> rusqlite::Result<Track> {
    let release_date: Option<String> = row.get(10)?;
    Ok(Track {
        id: Some(row.get(0)?),
        name: row.get(1)?,
        artist_id: row.get(2)?,
        recording_mbid: row.get(3)?,
        release_mbid: row.get(4)?,
        spotify_track_id: row.get(5)?,
        spotify_album_id: row.get(6)?,
        album: row.get(7)?,
        genre: row.get(8)?,
        duration_sec: row.get(9)?,
        release_date: release_date.and_then(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d").ok()),
        explicit: row.get::<_, i64>(11)? != 0,
        popularity: row.get(12)?,
    })
}

const ARTIST_COLUMNS: &str = "artist_id, artist_name, musicbrainz_id, spotify_artist_id, \
     genre_primary, country, verified, monthly_listeners";

const TRACK_COLUMNS: &str = "track_id, track_name, artist_id, musicbrainz_recording_id, \
     musicbrainz_release_id, spotify_track_id, spotify_album_id, album, genre, duration_sec, \
     release_date, explicit, popularity";

const PLAY_COLUMNS: &str = "play_id, user_id, track_id, played_at, played_sec, completion_rate, \
     device_type, country, skip_reason, liked, added_to_playlist, source, ingested_at";

#[async_trait]
impl Storage for SqliteStorage {
    async fn begin_batch(&self) -> Result<()> {
        self.conn.lock().unwrap().execute_batch("BEGIN IMMEDIATE")?;
        Ok(())
    }

    async fn commit_batch(&self) -> Result<()> {
        self.conn.lock().unwrap().execute_batch("COMMIT")?;
        Ok(())
    }

    async fn rollback_batch(&self) -> Result<()> {
        self.conn.lock().unwrap().execute_batch("ROLLBACK")?;
        Ok(())
    }

    async fn create_artist(&self, artist: &mut Artist) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO artists (artist_name, musicbrainz_id, spotify_artist_id, genre_primary, \
             country, verified, monthly_listeners) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                artist.name,
                artist.musicbrainz_id,
                artist.spotify_artist_id,
                artist.genre_primary,
                artist.country,
                artist.verified as i64,
                artist.monthly_listeners,
            ],
        )?;
        artist.id = Some(conn.last_insert_rowid());
        Ok(())
    }

    async fn update_artist(&self, artist: &Artist) -> Result<()> {
        let Some(id) = artist.id else {
            return Err(PipelineError::Storage {
                message: format!("cannot update unsaved artist '{}'", artist.name),
            });
        };
        self.conn.lock().unwrap().execute(
            "UPDATE artists SET artist_name = ?1, musicbrainz_id = ?2, spotify_artist_id = ?3, \
             genre_primary = ?4, country = ?5, verified = ?6, monthly_listeners = ?7 \
             WHERE artist_id = ?8",
            params![
                artist.name,
                artist.musicbrainz_id,
                artist.spotify_artist_id,
                artist.genre_primary,
                artist.country,
                artist.verified as i64,
                artist.monthly_listeners,
                id,
            ],
        )?;
        Ok(())
    }

    async fn get_artist_by_mbid(&self, mbid: &str) -> Result<Option<Artist>> {
        let conn = self.conn.lock().unwrap();
        let artist = conn
            .query_row(
                &format!("SELECT {} FROM artists WHERE musicbrainz_id = ?1", ARTIST_COLUMNS),
                params![mbid],
                artist_from_row,
            )
            .optional()?;
        Ok(artist)
    }

    async fn get_artist_by_spotify_id(&self, spotify_id: &str) -> Result<Option<Artist>> {
        let conn = self.conn.lock().unwrap();
        let artist = conn
            .query_row(
                &format!(
                    "SELECT {} FROM artists WHERE spotify_artist_id = ?1",
                    ARTIST_COLUMNS
                ),
                params![spotify_id],
                artist_from_row,
            )
            .optional()?;
        Ok(artist)
    }

    async fn get_artist_by_name(&self, name: &str) -> Result<Option<Artist>> {
        let conn = self.conn.lock().unwrap();
        let artist = conn
            .query_row(
                &format!("SELECT {} FROM artists WHERE artist_name = ?1", ARTIST_COLUMNS),
                params![name],
                artist_from_row,
            )
            .optional()?;
        Ok(artist)
    }

    async fn create_track(&self, track: &mut Track) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO tracks (track_name, artist_id, musicbrainz_recording_id, \
             musicbrainz_release_id, spotify_track_id, spotify_album_id, album, genre, \
             duration_sec, release_date, explicit, popularity) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                track.name,
                track.artist_id,
                track.recording_mbid,
                track.release_mbid,
                track.spotify_track_id,
                track.spotify_album_id,
                track.album,
                track.genre,
                track.duration_sec,
                track.release_date.map(|d| d.format("%Y-%m-%d").to_string()),
                track.explicit as i64,
                track.popularity,
            ],
        )?;
        track.id = Some(conn.last_insert_rowid());
        Ok(())
    }

    async fn update_track(&self, track: &Track) -> Result<()> {
        let Some(id) = track.id else {
            return Err(PipelineError::Storage {
                message: format!("cannot update unsaved track '{}'", track.name),
            });
        };
        self.conn.lock().unwrap().execute(
            "UPDATE tracks SET track_name = ?1, artist_id = ?2, musicbrainz_recording_id = ?3, \
             musicbrainz_release_id = ?4, spotify_track_id = ?5, spotify_album_id = ?6, \
             album = ?7, genre = ?8, duration_sec = ?9, release_date = ?10, explicit = ?11, \
             popularity = ?12 WHERE track_id = ?13",
            params![
                track.name,
                track.artist_id,
                track.recording_mbid,
                track.release_mbid,
                track.spotify_track_id,
                track.spotify_album_id,
                track.album,
                track.genre,
                track.duration_sec,
                track.release_date.map(|d| d.format("%Y-%m-%d").to_string()),
                track.explicit as i64,
                track.popularity,
                id,
            ],
        )?;
        Ok(())
    }

    async fn get_track_by_recording_mbid(&self, mbid: &str) -> Result<Option<Track>> {
        let conn = self.conn.lock().unwrap();
        let track = conn
            .query_row(
                &format!(
                    "SELECT {} FROM tracks WHERE musicbrainz_recording_id = ?1",
                    TRACK_COLUMNS
                ),
                params![mbid],
                track_from_row,
            )
            .optional()?;
        Ok(track)
    }

    async fn get_track_by_spotify_id(&self, spotify_id: &str) -> Result<Option<Track>> {
        let conn = self.conn.lock().unwrap();
        let track = conn
            .query_row(
                &format!("SELECT {} FROM tracks WHERE spotify_track_id = ?1", TRACK_COLUMNS),
                params![spotify_id],
                track_from_row,
            )
            .optional()?;
        Ok(track)
    }

    async fn get_track_by_name_and_artist(
        &self,
        name: &str,
        artist_id: i64,
    ) -> Result<Option<Track>> {
        let conn = self.conn.lock().unwrap();
        let track = conn
            .query_row(
                &format!(
                    "SELECT {} FROM tracks WHERE track_name = ?1 AND artist_id = ?2",
                    TRACK_COLUMNS
                ),
                params![name, artist_id],
                track_from_row,
            )
            .optional()?;
        Ok(track)
    }

    async fn get_user(&self, user_id: &str) -> Result<Option<User>> {
        let conn = self.conn.lock().unwrap();
        let user = conn
            .query_row(
                "SELECT user_id, username, email, country, subscription_tier, signup_date, \
                 last_active FROM users WHERE user_id = ?1",
                params![user_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, i64>(5)?,
                        row.get::<_, Option<i64>>(6)?,
                    ))
                },
            )
            .optional()?;
        drop(conn);

        match user {
            None => Ok(None),
            Some((user_id, username, email, country, subscription_tier, signup, last_active)) => {
                Ok(Some(User {
                    user_id,
                    username,
                    email,
                    country,
                    subscription_tier,
                    signup_date: timestamp_from_epoch(signup)?,
                    last_active: last_active.map(timestamp_from_epoch).transpose()?,
                }))
            }
        }
    }

    async fn create_user(&self, user: &User) -> Result<()> {
        self.conn.lock().unwrap().execute(
            "INSERT INTO users (user_id, username, email, country, subscription_tier, \
             signup_date, last_active) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                user.user_id,
                user.username,
                user.email,
                user.country,
                user.subscription_tier,
                user.signup_date.timestamp(),
                user.last_active.map(|t| t.timestamp()),
            ],
        )?;
        Ok(())
    }

    async fn get_play(&self, play_id: &str) -> Result<Option<Play>> {
        let conn = self.conn.lock().unwrap();
        let play = conn
            .query_row(
                &format!("SELECT {} FROM plays WHERE play_id = ?1", PLAY_COLUMNS),
                params![play_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, Option<f64>>(5)?,
                        row.get::<_, String>(6)?,
                        row.get::<_, String>(7)?,
                        row.get::<_, Option<String>>(8)?,
                        row.get::<_, Option<i64>>(9)?,
                        row.get::<_, i64>(10)?,
                        row.get::<_, String>(11)?,
                        row.get::<_, i64>(12)?,
                    ))
                },
            )
            .optional()?;
        drop(conn);

        match play {
            None => Ok(None),
            Some((
                play_id,
                user_id,
                track_id,
                played_at,
                played_sec,
                completion_rate,
                device_type,
                country,
                skip_reason,
                liked,
                added_to_playlist,
                source,
                ingested_at,
            )) => Ok(Some(Play {
                play_id,
                user_id,
                track_id,
                played_at: timestamp_from_epoch(played_at)?,
                played_sec,
                completion_rate,
                device_type,
                country,
                skip_reason,
                liked: liked.map(|v| v != 0),
                added_to_playlist: added_to_playlist != 0,
                source,
                ingested_at: timestamp_from_epoch(ingested_at)?,
            })),
        }
    }

    async fn create_play(&self, play: &Play) -> Result<()> {
        self.conn.lock().unwrap().execute(
            "INSERT INTO plays (play_id, user_id, track_id, played_at, played_sec, \
             completion_rate, device_type, country, skip_reason, liked, added_to_playlist, \
             source, ingested_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                play.play_id,
                play.user_id,
                play.track_id,
                play.played_at.timestamp(),
                play.played_sec,
                play.completion_rate,
                play.device_type,
                play.country,
                play.skip_reason,
                play.liked.map(|v| v as i64),
                play.added_to_playlist as i64,
                play.source,
                play.ingested_at.timestamp(),
            ],
        )?;
        Ok(())
    }

    async fn update_play(&self, play: &Play) -> Result<()> {
        self.conn.lock().unwrap().execute(
            "UPDATE plays SET user_id = ?2, track_id = ?3, played_at = ?4, played_sec = ?5, \
             completion_rate = ?6, device_type = ?7, country = ?8, skip_reason = ?9, \
             liked = ?10, added_to_playlist = ?11, source = ?12, ingested_at = ?13 \
             WHERE play_id = ?1",
            params![
                play.play_id,
                play.user_id,
                play.track_id,
                play.played_at.timestamp(),
                play.played_sec,
                play.completion_rate,
                play.device_type,
                play.country,
                play.skip_reason,
                play.liked.map(|v| v as i64),
                play.added_to_playlist as i64,
                play.source,
                play.ingested_at.timestamp(),
            ],
        )?;
        Ok(())
    }

    async fn latest_played_at(&self) -> Result<Option<DateTime<Utc>>> {
        let conn = self.conn.lock().unwrap();
        let max: Option<i64> =
            conn.query_row("SELECT MAX(played_at) FROM plays", [], |row| row.get(0))?;
        drop(conn);
        max.map(timestamp_from_epoch).transpose()
    }
}
