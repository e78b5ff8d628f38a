pub mod http;
pub mod normalize;
pub mod store;
pub mod timefmt;

pub use http::{AppState, router};
pub use normalize::{EventKind, EventRecord, Normalizer};
pub use store::{DEFAULT_MAX_EVENTS, EventStore, StorageConfig, StoreError, StoredEvent};
