use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

use crate::apis::musicbrainz::{extract_country, extract_primary_genre, MetadataSource};
use crate::domain::{
    ArtistRecord, EnrichedBatch, Listen, PlayRecord, TrackRecord, PLAY_SOURCE, UNKNOWN_COUNTRY,
};

/// Normalize a country hint to an uppercase 2-letter code; anything
/// malformed or absent becomes "ZZ". A longer value with a usable
/// alphabetic prefix is salvaged ("usa" -> "US").
fn normalize_country(code: Option<&str>) -> String {
    let Some(code) = code else {
        return UNKNOWN_COUNTRY.to_string();
    };
    let chars: Vec<char> = code.trim().to_uppercase().chars().collect();
    match chars.as_slice() {
        [a, b, ..] if a.is_ascii_alphabetic() && b.is_ascii_alphabetic() => {
            chars[..2].iter().collect()
        }
        _ => UNKNOWN_COUNTRY.to_string(),
    }
}

/// Infer a device type from free-text client hints, most specific first.
/// Each hint is checked against every keyword group before moving to the
/// next hint.
fn infer_device_type(
    listening_from: Option<&str>,
    submission_client: Option<&str>,
    origin_url: Option<&str>,
) -> String {
    const GROUPS: &[(&str, &[&str])] = &[
        ("car", &["car", "auto", "androidauto"]),
        ("wearable", &["watch", "wear"]),
        (
            "smart_speaker",
            &["smart speaker", "smart_speaker", "alexa", "googlehome", "google home"],
        ),
        ("tv", &["tv", "roku", "chromecast"]),
        ("mobile", &["mobile", "phone", "ios", "android", "iphone", "ipad"]),
        ("desktop", &["desktop", "mac", "windows", "linux"]),
        ("web", &["web", "browser"]),
        ("spotify_app", &["spotify"]),
        ("apple_music", &["apple"]),
    ];

    for hint in [listening_from, submission_client, origin_url] {
        let Some(hint) = hint else { continue };
        let hint = hint.to_lowercase();
        if hint.is_empty() {
            continue;
        }
        for (device, keywords) in GROUPS {
            if keywords.iter().any(|k| hint.contains(k)) {
                return device.to_string();
            }
        }
    }
    "unknown".to_string()
}

/// A play id that is stable across re-ingestion of the same event:
/// correlation msid plus the listened-at second.
fn synthesize_play_id(recording_msid: Option<&str>, listened_at: Option<i64>) -> Option<String> {
    let msid = recording_msid?;
    match listened_at {
        Some(ts) => Some(format!("{}_{}", msid, ts)),
        None => Some(msid.to_string()),
    }
}

/// Transforms raw listens into the three record sets the warehouse writer
/// consumes, filling genre and country via the metadata source.
pub struct Enricher {
    metadata: Arc<dyn MetadataSource>,
}

impl Enricher {
    pub fn new(metadata: Arc<dyn MetadataSource>) -> Self {
        Self { metadata }
    }

    pub async fn enrich(&self, listens: &[Listen]) -> EnrichedBatch {
        if listens.is_empty() {
            info!("no listens to enrich");
            return EnrichedBatch::default();
        }

        EnrichedBatch {
            plays: self.build_plays(listens),
            tracks: self.build_tracks(listens).await,
            artists: self.build_artists(listens).await,
        }
    }

    fn build_plays(&self, listens: &[Listen]) -> Vec<PlayRecord> {
        let mut plays = Vec::with_capacity(listens.len());
        for listen in listens {
            let Some(play_id) =
                synthesize_play_id(listen.recording_msid.as_deref(), listen.listened_at)
            else {
                debug!("skipping play without correlation id");
                continue;
            };
            let (Some(user_name), Some(listened_at)) = (&listen.user_name, listen.listened_at)
            else {
                debug!(play_id, "skipping play without user or timestamp");
                continue;
            };

            let duration_sec = listen.duration_ms.unwrap_or(0) / 1000;
            plays.push(PlayRecord {
                play_id,
                user_name: user_name.clone(),
                listened_at,
                recording_mbid: listen.recording_mbid.clone(),
                recording_msid: listen.recording_msid.clone(),
                spotify_track_id: listen.spotify_track_id.clone(),
                played_sec: duration_sec,
                // This source reports no partial plays
                completion_rate: 100.0,
                device_type: infer_device_type(
                    listen.listening_from.as_deref(),
                    listen.submission_client.as_deref(),
                    listen.origin_url.as_deref(),
                ),
                country: normalize_country(
                    listen
                        .listening_country
                        .as_deref()
                        .or(listen.origin_country.as_deref()),
                ),
                skip_reason: None,
                liked: None,
                added_to_playlist: false,
                source: PLAY_SOURCE.to_string(),
            });
        }
        plays
    }

    async fn build_tracks(&self, listens: &[Listen]) -> Vec<TrackRecord> {
        let mut seen_keys = HashSet::new();
        let mut tracks = Vec::new();

        for listen in listens {
            let Some(track_key) = listen
                .recording_mbid
                .clone()
                .or_else(|| listen.recording_msid.clone())
            else {
                debug!("skipping track without recording id");
                continue;
            };
            if !seen_keys.insert(track_key.clone()) {
                continue;
            }

            let artist_names = credited_artist_names(listen);
            let primary_artist_mbid = listen
                .artist_mbids
                .iter()
                .find(|mbid| !mbid.is_empty())
                .cloned();

            let genre = match &primary_artist_mbid {
                Some(mbid) => {
                    let metadata = self.metadata.fetch_artist(Some(mbid.as_str())).await;
                    extract_primary_genre(&metadata)
                }
                None => None,
            };

            tracks.push(TrackRecord {
                track_key,
                name: listen.track_name.clone(),
                artist_credit: listen.artist_credit_name.clone(),
                primary_artist_name: artist_names.first().cloned(),
                primary_artist_mbid,
                album: listen.release_name.clone(),
                duration_sec: listen.duration_ms.map(|ms| ms / 1000),
                recording_mbid: listen.recording_mbid.clone(),
                release_mbid: listen.release_mbid.clone(),
                spotify_track_id: listen.spotify_track_id.clone(),
                spotify_album_id: listen.spotify_album_id.clone(),
                track_number: listen.track_number,
                disc_number: listen.disc_number,
                music_service: listen.music_service.clone(),
                genre: genre.unwrap_or_else(|| "unknown".to_string()),
            });
        }
        tracks
    }

    async fn build_artists(&self, listens: &[Listen]) -> Vec<ArtistRecord> {
        let mut seen_keys = HashSet::new();
        let mut artists = Vec::new();

        for listen in listens {
            let names = credited_artist_names(listen);
            for (idx, name) in names.iter().enumerate() {
                let mbid = listen.artist_mbids.get(idx).filter(|m| !m.is_empty());
                let artist_key = mbid
                    .cloned()
                    .unwrap_or_else(|| name.to_lowercase());
                if !seen_keys.insert(artist_key.clone()) {
                    continue;
                }

                let metadata = match mbid {
                    Some(mbid) => self.metadata.fetch_artist(Some(mbid.as_str())).await,
                    None => Default::default(),
                };

                artists.push(ArtistRecord {
                    artist_key,
                    name: name.clone(),
                    mbid: mbid.cloned(),
                    spotify_artist_id: listen.spotify_artist_ids.get(idx).cloned(),
                    genre_primary: extract_primary_genre(&metadata)
                        .unwrap_or_else(|| "unknown".to_string()),
                    country: extract_country(&metadata),
                    disambiguation: metadata.disambiguation,
                });
            }
        }
        artists
    }
}

fn credited_artist_names(listen: &Listen) -> Vec<String> {
    if !listen.artist_names.is_empty() {
        return listen.artist_names.clone();
    }
    listen.artist_credit_name.iter().cloned().collect()
}
