pub mod config;
pub mod database;
pub mod models;
pub mod store;

pub use config::{CollectorConfig, Config, ConfigError, TimeframeEntry};
pub use database::get_db_connection;
pub use models::*;
pub use store::{CandleStore, MemoryCandleStore, MySqlCandleStore, StoreError, PRICE_SCALE};
