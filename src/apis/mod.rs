pub mod cache;
pub mod listenbrainz;
pub mod musicbrainz;
