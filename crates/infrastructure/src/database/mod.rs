pub mod memory;
pub mod sqlite;

pub use memory::{InMemoryCanonicalRepository, InMemorySyncRunRepository};
pub use sqlite::{DatabaseManager, SqliteCanonicalRepository, SqliteSyncRunRepository};
