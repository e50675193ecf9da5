/// Database configuration and connection management
pub mod database;

/// Credit package catalog loading from packages.toml
pub mod packages;

/// Application settings from environment variables
pub mod settings;
