pub mod client;

pub use client::GrafanaClient;
