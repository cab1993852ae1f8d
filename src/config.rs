use std::path::PathBuf;

const DEFAULT_LISTENBRAINZ_BASE_URL: &str = "https://api.listenbrainz.org/1";
const DEFAULT_MUSICBRAINZ_BASE_URL: &str = "https://musicbrainz.org/ws/2";
const DEFAULT_USER_AGENT: &str = "listens-warehouse/0.1 (contact@example.com)";

/// Runtime configuration, read once from the environment in `main`.
#[derive(Clone, Debug)]
pub struct Config {
    /// ListenBrainz username whose history is ingested.
    pub listenbrainz_user: String,
    /// Page size for a single history fetch.
    pub fetch_count: u32,
    pub listenbrainz_base_url: String,
    pub musicbrainz_base_url: String,
    pub musicbrainz_user_agent: String,
    /// JSON artist-metadata cache location.
    pub metadata_cache_path: PathBuf,
    /// SQLite warehouse location.
    pub warehouse_db_path: PathBuf,
}

impl Config {
    pub fn from_env() -> Self {
        let fetch_count = std::env::var("LISTENBRAINZ_FETCH_COUNT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(30);

        Self {
            listenbrainz_user: std::env::var("LISTENBRAINZ_USER")
                .unwrap_or_else(|_| "iliekcomputers".to_string()),
            fetch_count,
            listenbrainz_base_url: std::env::var("LISTENBRAINZ_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_LISTENBRAINZ_BASE_URL.to_string()),
            musicbrainz_base_url: std::env::var("MUSICBRAINZ_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_MUSICBRAINZ_BASE_URL.to_string()),
            musicbrainz_user_agent: std::env::var("MUSICBRAINZ_USER_AGENT")
                .unwrap_or_else(|_| DEFAULT_USER_AGENT.to_string()),
            metadata_cache_path: std::env::var("MUSICBRAINZ_CACHE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data/cache/musicbrainz_artists.json")),
            warehouse_db_path: std::env::var("WAREHOUSE_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data/warehouse.db")),
        }
    }

    /// True when the operator has not set a contactable user agent.
    pub fn has_default_user_agent(&self) -> bool {
        self.musicbrainz_user_agent.contains("example.com")
    }
}
