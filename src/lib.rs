pub mod cli;
pub mod config;
pub mod database;
pub mod history;
pub mod logging;
pub mod models;
pub mod preferences;
pub mod scheduler;
pub mod store;
pub mod utils;

pub use config::Config;
pub use database::{Database, DatabaseError, KeyValueStore, MemoryStore};
pub use models::{Category, CompletionRecord, ResetPolicy, Task};
pub use preferences::{Preferences, Theme, TimeFormat};
pub use scheduler::{ResetOutcome, ResetPlan, ResetScheduler};
pub use store::{StateObserver, StateStore, StoreError};
pub use utils::Profile;
