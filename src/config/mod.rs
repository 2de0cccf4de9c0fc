/// Database configuration and connection management
pub mod database;

/// Application settings loading from stockroom.toml
pub mod settings;
