//! Publish point-in-time Grafana dashboard snapshots.
//!
//! A [`SnapClient`] fetches a dashboard and its datasources, runs every panel
//! query over a fixed time range through Grafana's datasource proxy, embeds
//! the returned series into the dashboard JSON and posts the result to a
//! snapshot host. The published snapshot never queries a datasource again.

pub mod config;
pub mod datasource;
pub mod error;
pub mod grafana;
pub mod snapshot;

pub use config::{ConnectionConfig, TakeConfig, TakeRequest, TimeRange};
pub use error::{Result, SnapshotError};
pub use snapshot::{SnapClient, SnapshotResult};
