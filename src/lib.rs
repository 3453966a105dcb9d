pub mod analyzer;
pub mod config;
pub mod db;
pub mod ingest;
pub mod parser;
pub mod storage;

/// Telemetry file extensions we consider when importing a directory
pub const TELEMETRY_EXTENSIONS: &[&str] = &["csv", "txt", "log"];

/// Application name for XDG paths
pub const APP_NAME: &str = "kartlog";
