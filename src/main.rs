use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use hookfeed::{AppState, EventStore, Normalizer, StorageConfig};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "5001")]
    port: u16,

    /// Where normalized events are persisted. Falls back to in-memory
    /// storage when the file cannot be opened.
    #[arg(long, env = "HOOKFEED_DATA_FILE", default_value = "events.json")]
    data_file: PathBuf,

    /// Maximum number of events retained; oldest are evicted first.
    #[arg(long, default_value_t = hookfeed::DEFAULT_MAX_EVENTS)]
    max_events: usize,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let config = StorageConfig {
        data_file: Some(args.data_file),
        max_events: args.max_events,
    };
    let store = EventStore::open(&config);
    info!(
        "retaining up to {} events in the {} backend",
        config.max_events,
        store.backend_name()
    );

    let state = AppState::new(store, Normalizer::new());
    let app = hookfeed::router(state);

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap();

    info!("webhook event feed listening on {addr}");

    axum::serve(listener, app).await.unwrap();
}
