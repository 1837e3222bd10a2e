pub mod config_manager;
pub mod connection;
pub mod take;

pub use config_manager::{ConfigManager, SnapshotSettings};
pub use connection::ConnectionConfig;
pub use take::{TakeConfig, TakeRequest, TimeRange};
