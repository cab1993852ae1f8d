use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use tracing::warn;

use crate::apis::musicbrainz::ArtistMetadata;
use crate::common::error::Result;

/// Key-value store for artist metadata, keyed by catalog (MusicBrainz) id.
/// Injected into the metadata client so persistence stays swappable.
pub trait MetadataCache: Send {
    fn get(&self, mbid: &str) -> Option<ArtistMetadata>;
    fn put(&mut self, mbid: &str, metadata: ArtistMetadata);
    /// Best-effort write-through; a failure leaves the in-memory state
    /// authoritative for the rest of the run.
    fn flush(&mut self) -> Result<()>;
}

/// Disk-backed cache: one JSON object mapping mbid to metadata. A missing or
/// corrupt file starts the cache empty.
pub struct JsonFileCache {
    path: Option<PathBuf>,
    entries: HashMap<String, ArtistMetadata>,
}

impl JsonFileCache {
    pub fn load(path: Option<PathBuf>) -> Self {
        let mut entries = HashMap::new();
        if let Some(path) = &path {
            match fs::read_to_string(path) {
                Ok(raw) => match serde_json::from_str::<HashMap<String, ArtistMetadata>>(&raw) {
                    Ok(loaded) => entries = loaded,
                    Err(err) => {
                        warn!(path = %path.display(), error = %err, "metadata cache is corrupt; starting empty");
                    }
                },
                // Absent file is the normal first-run state
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "failed to read metadata cache; starting empty");
                }
            }
        }
        Self { path, entries }
    }

    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl MetadataCache for JsonFileCache {
    fn get(&self, mbid: &str) -> Option<ArtistMetadata> {
        self.entries.get(mbid).cloned()
    }

    fn put(&mut self, mbid: &str, metadata: ArtistMetadata) {
        self.entries.insert(mbid.to_string(), metadata);
    }

    fn flush(&mut self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string(&self.entries)?;
        fs::write(path, raw)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apis::musicbrainz::NamedCount;

    fn sample() -> ArtistMetadata {
        ArtistMetadata {
            genres: vec![NamedCount {
                name: "jazz".into(),
                count: 9,
            }],
            country: Some("US".into()),
            ..Default::default()
        }
    }

    #[test]
    fn round_trips_entries_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("artists.json");

        let mut cache = JsonFileCache::load(Some(path.clone()));
        assert!(cache.is_empty());
        cache.put("a1", sample());
        cache.flush().unwrap();

        let reloaded = JsonFileCache::load(Some(path));
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.get("a1"), Some(sample()));
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("artists.json");
        fs::write(&path, "{not json").unwrap();

        let cache = JsonFileCache::load(Some(path));
        assert!(cache.is_empty());
    }

    #[test]
    fn missing_file_is_an_empty_cache() {
        let dir = tempfile::tempdir().unwrap();
        let cache = JsonFileCache::load(Some(dir.path().join("absent.json")));
        assert!(cache.is_empty());
    }
}
