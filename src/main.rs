use clap::Parser;
use std::sync::Arc;
use tracing::info;

use listens_warehouse::apis::cache::JsonFileCache;
use listens_warehouse::apis::listenbrainz::{ListenBrainzClient, ListenSource};
use listens_warehouse::apis::musicbrainz::MusicBrainzClient;
use listens_warehouse::config::Config;
use listens_warehouse::observability::logging::init_logging;
use listens_warehouse::pipeline::cursor::CursorStore;
use listens_warehouse::pipeline::enrich::Enricher;
use listens_warehouse::pipeline::ingestion::IngestionOrchestrator;
use listens_warehouse::pipeline::storage::{SqliteStorage, Storage};
use listens_warehouse::pipeline::warehouse::WarehouseWriter;

#[derive(Parser)]
#[command(name = "listens-warehouse")]
#[command(about = "Ingest ListenBrainz listening history into the warehouse")]
#[command(version = "0.1.0")]
struct Cli {
    /// Ignore the stored cursor and fetch the full available history window
    #[arg(long)]
    full_resync: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    dotenv::dotenv().ok();
    init_logging();

    let config = Config::from_env();
    let storage: Arc<dyn Storage> = Arc::new(SqliteStorage::open(&config.warehouse_db_path)?);

    let cache = JsonFileCache::load(Some(config.metadata_cache_path.clone()));
    let metadata = Arc::new(MusicBrainzClient::new(&config, Box::new(cache)));
    let source: Arc<dyn ListenSource> = Arc::new(ListenBrainzClient::new(&config));

    let orchestrator = IngestionOrchestrator::new(source, CursorStore::new(storage.clone()));
    let enricher = Enricher::new(metadata);
    let writer = WarehouseWriter::new(storage);

    if cli.full_resync {
        info!("full resync requested; stored cursor will be ignored");
    }

    let result = orchestrator.fetch(cli.full_resync).await?;
    if result.listens.is_empty() {
        info!(cursor = ?result.cursor_used, "no new listens ingested");
        return Ok(());
    }

    let batch = enricher.enrich(&result.listens).await;
    let stats = writer.persist(&batch).await?;

    info!(
        fetched = result.listens.len(),
        cursor = ?result.cursor_used,
        full_resync = cli.full_resync,
        artists = stats.artists_written,
        tracks = stats.tracks_written,
        users = stats.users_created,
        plays = stats.plays_written,
        skipped_tracks = stats.tracks_skipped,
        skipped_plays = stats.plays_skipped,
        "ingestion run complete"
    );

    Ok(())
}
