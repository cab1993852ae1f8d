use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex as StdMutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::apis::cache::MetadataCache;
use crate::common::error::Result;
use crate::common::retry::RetryPolicy;
use crate::config::Config;

/// The slice of a MusicBrainz artist response the pipeline reads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArtistMetadata {
    #[serde(default)]
    pub genres: Vec<NamedCount>,
    #[serde(default)]
    pub tags: Vec<NamedCount>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub area: Option<Area>,
    #[serde(default)]
    pub disambiguation: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NamedCount {
    pub name: String,
    #[serde(default)]
    pub count: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Area {
    #[serde(rename = "iso-3166-1-codes", default)]
    pub iso_3166_1_codes: Vec<String>,
}

/// Primary genre: the highest-count genre, falling back to the
/// highest-count tag.
pub fn extract_primary_genre(metadata: &ArtistMetadata) -> Option<String> {
    if let Some(genre) = metadata.genres.iter().max_by_key(|g| g.count) {
        return Some(genre.name.clone());
    }
    metadata.tags.iter().max_by_key(|t| t.count).map(|t| t.name.clone())
}

/// Country: the explicit field, falling back to the first ISO-3166-1 area code.
pub fn extract_country(metadata: &ArtistMetadata) -> Option<String> {
    if let Some(country) = &metadata.country {
        if !country.is_empty() {
            return Some(country.clone());
        }
    }
    metadata
        .area
        .as_ref()
        .and_then(|area| area.iso_3166_1_codes.first().cloned())
}

/// Seam the enricher depends on, so tests can stub metadata lookups.
#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// Fetch artist metadata. A missing id or failed lookup yields empty
    /// metadata; one bad artist never fails the batch.
    async fn fetch_artist(&self, mbid: Option<&str>) -> ArtistMetadata;
}

/// Enforces a minimum wall-clock interval between outbound requests,
/// tracked as time since the previous request.
struct MinIntervalLimiter {
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl MinIntervalLimiter {
    fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_request: Mutex::new(None),
        }
    }

    async fn acquire(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

/// MusicBrainz artist client: cache-first, paced to one request per second,
/// with bounded retry on transient failures.
pub struct MusicBrainzClient {
    http: reqwest::Client,
    base_url: String,
    user_agent: String,
    cache: StdMutex<Box<dyn MetadataCache>>,
    limiter: MinIntervalLimiter,
    retry: RetryPolicy,
    warned_default_user_agent: AtomicBool,
}

impl MusicBrainzClient {
    pub fn new(config: &Config, cache: Box<dyn MetadataCache>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.musicbrainz_base_url.clone(),
            user_agent: config.musicbrainz_user_agent.clone(),
            cache: StdMutex::new(cache),
            limiter: MinIntervalLimiter::new(Duration::from_secs(1)),
            retry: RetryPolicy::default(),
            warned_default_user_agent: AtomicBool::new(false),
        }
    }

    async fn request_artist(&self, mbid: &str) -> Result<ArtistMetadata> {
        self.retry
            .run(|| async {
                self.limiter.acquire().await;
                let url = format!("{}/artist/{}", self.base_url, mbid);
                let response = self
                    .http
                    .get(&url)
                    .header(reqwest::header::USER_AGENT, &self.user_agent)
                    .query(&[("fmt", "json"), ("inc", "genres+tags")])
                    .timeout(Duration::from_secs(10))
                    .send()
                    .await?
                    .error_for_status()?;
                let metadata = response.json::<ArtistMetadata>().await?;
                Ok::<_, crate::common::error::PipelineError>(metadata)
            })
            .await
    }
}

#[async_trait]
impl MetadataSource for MusicBrainzClient {
    async fn fetch_artist(&self, mbid: Option<&str>) -> ArtistMetadata {
        let Some(mbid) = mbid.filter(|m| !m.is_empty()) else {
            return ArtistMetadata::default();
        };

        if let Some(hit) = self.cache.lock().unwrap().get(mbid) {
            debug!(mbid, "artist metadata cache hit");
            return hit;
        }

        if self.user_agent.contains("example.com")
            && !self.warned_default_user_agent.swap(true, Ordering::Relaxed)
        {
            warn!("using default MusicBrainz user agent; set MUSICBRAINZ_USER_AGENT");
        }

        match self.request_artist(mbid).await {
            Ok(metadata) => {
                let mut cache = self.cache.lock().unwrap();
                cache.put(mbid, metadata.clone());
                if let Err(err) = cache.flush() {
                    warn!(mbid, error = %err, "failed to persist metadata cache");
                }
                metadata
            }
            Err(err) => {
                warn!(mbid, error = %err, "MusicBrainz artist lookup failed");
                ArtistMetadata::default()
            }
        }
    }
}
