use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::warn;

use crate::common::error::Result;
use crate::config::Config;
use crate::domain::Listen;

/// Seam for the history API so the orchestrator can be driven by a stub.
#[async_trait]
pub trait ListenSource: Send + Sync {
    /// Fetch one page of listens, optionally floored at `min_ts`. Returns the
    /// decoded rows and the raw payload for provenance. Empty is not an error.
    async fn fetch_listens(&self, min_ts: Option<i64>) -> Result<(Vec<Listen>, serde_json::Value)>;
}

// Wire shapes for `GET /1/user/{user}/listens`. Everything is optional;
// decoding never rejects a listen outright.

#[derive(Debug, Default, Deserialize)]
struct ListensEnvelope {
    #[serde(default)]
    payload: ListensPayload,
}

#[derive(Debug, Default, Deserialize)]
struct ListensPayload {
    #[serde(default)]
    listens: Vec<WireListen>,
}

#[derive(Debug, Default, Deserialize)]
struct WireListen {
    user_name: Option<String>,
    inserted_at: Option<i64>,
    listened_at: Option<i64>,
    recording_msid: Option<String>,
    #[serde(default)]
    track_metadata: WireTrackMetadata,
}

#[derive(Debug, Default, Deserialize)]
struct WireTrackMetadata {
    artist_name: Option<String>,
    track_name: Option<String>,
    release_name: Option<String>,
    #[serde(default)]
    additional_info: WireAdditionalInfo,
    #[serde(default)]
    mbid_mapping: WireMbidMapping,
}

#[derive(Debug, Default, Deserialize)]
struct WireAdditionalInfo {
    artist_names: Option<Vec<String>>,
    duration_ms: Option<i64>,
    origin_url: Option<String>,
    music_service: Option<String>,
    spotify_id: Option<String>,
    spotify_album_id: Option<String>,
    spotify_artist_ids: Option<Vec<String>>,
    #[serde(rename = "tracknumber")]
    track_number: Option<i64>,
    #[serde(rename = "discnumber")]
    disc_number: Option<i64>,
    listening_from: Option<String>,
    submission_client: Option<String>,
    listening_country: Option<String>,
    origin_country: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WireMbidMapping {
    recording_mbid: Option<String>,
    release_mbid: Option<String>,
    artist_mbids: Option<Vec<String>>,
}

/// Streaming-service ids are the last path segment of a provider URL.
fn extract_streaming_id(url: Option<&str>) -> Option<String> {
    let trimmed = url?.trim_end_matches('/');
    let segment = trimmed.rsplit('/').next()?;
    if segment.is_empty() {
        None
    } else {
        Some(segment.to_string())
    }
}

fn extract_streaming_ids(urls: Option<&[String]>) -> Vec<String> {
    urls.map(|urls| {
        urls.iter()
            .filter_map(|url| extract_streaming_id(Some(url)))
            .collect()
    })
    .unwrap_or_default()
}

fn decode_listen(wire: WireListen) -> Listen {
    let metadata = wire.track_metadata;
    let additional = metadata.additional_info;
    let mapping = metadata.mbid_mapping;

    // Multi-artist credits come through parallel lists; a plain credit name
    // becomes a single-entry list.
    let artist_names = additional
        .artist_names
        .filter(|names| !names.is_empty())
        .unwrap_or_else(|| metadata.artist_name.iter().cloned().collect());

    Listen {
        user_name: wire.user_name,
        inserted_at: wire.inserted_at,
        listened_at: wire.listened_at,
        recording_msid: wire.recording_msid,
        recording_mbid: mapping.recording_mbid,
        release_mbid: mapping.release_mbid,
        track_name: metadata.track_name,
        artist_credit_name: metadata.artist_name,
        artist_names,
        artist_mbids: mapping.artist_mbids.unwrap_or_default(),
        spotify_artist_ids: extract_streaming_ids(additional.spotify_artist_ids.as_deref()),
        release_name: metadata.release_name,
        duration_ms: additional.duration_ms,
        origin_url: additional.origin_url,
        music_service: additional.music_service,
        spotify_track_id: extract_streaming_id(additional.spotify_id.as_deref()),
        spotify_album_id: extract_streaming_id(additional.spotify_album_id.as_deref()),
        track_number: additional.track_number,
        disc_number: additional.disc_number,
        listening_from: additional.listening_from,
        submission_client: additional.submission_client,
        listening_country: additional.listening_country,
        origin_country: additional.origin_country,
    }
}

/// Decode a raw listens payload into uniform rows. The API's own `min_ts`
/// filter is inclusive, so when a floor is given the rows are re-filtered to
/// strictly greater timestamps here.
pub fn decode_payload(payload: &serde_json::Value, min_ts: Option<i64>) -> Result<Vec<Listen>> {
    let envelope: ListensEnvelope = serde_json::from_value(payload.clone())?;
    let mut listens: Vec<Listen> = envelope
        .payload
        .listens
        .into_iter()
        .map(decode_listen)
        .collect();

    if let Some(min_ts) = min_ts {
        listens.retain(|listen| listen.listened_at.is_some_and(|ts| ts > min_ts));
    }

    Ok(listens)
}

/// HTTP client for the ListenBrainz history API.
pub struct ListenBrainzClient {
    http: reqwest::Client,
    base_url: String,
    user: String,
    count: u32,
}

impl ListenBrainzClient {
    pub fn new(config: &Config) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.listenbrainz_base_url.clone(),
            user: config.listenbrainz_user.clone(),
            count: config.fetch_count,
        }
    }
}

#[async_trait]
impl ListenSource for ListenBrainzClient {
    async fn fetch_listens(&self, min_ts: Option<i64>) -> Result<(Vec<Listen>, serde_json::Value)> {
        let url = format!("{}/user/{}/listens", self.base_url, self.user);
        let mut request = self
            .http
            .get(&url)
            .query(&[("count", self.count.to_string())])
            .timeout(Duration::from_secs(30));
        if let Some(min_ts) = min_ts {
            request = request.query(&[("min_ts", min_ts.to_string())]);
        }

        let payload: serde_json::Value = request.send().await?.error_for_status()?.json().await?;
        let listens = decode_payload(&payload, min_ts)?;

        if listens.is_empty() {
            warn!(%url, "no listens returned");
        }

        Ok((listens, payload))
    }
}
