pub mod cursor;
pub mod enrich;
pub mod ingestion;
pub mod storage;
pub mod warehouse;
