//! Credit package catalog loading from packages.toml
//!
//! The catalog is the server's source of truth for how many credits each package is
//! worth. It is read once at startup; when the file does not exist the built-in
//! catalog is used.

use crate::{
    core::catalog::{CreditCatalog, CreditPackage, FallbackPolicy},
    errors::{Error, Result},
};
use serde::Deserialize;
use std::path::Path;
use tracing::info;

/// Structure of the whole packages.toml file
#[derive(Debug, Deserialize)]
pub struct PackagesFile {
    /// Purchasable packages
    pub packages: Vec<CreditPackage>,
    /// Policy for packages missing from the list
    #[serde(default)]
    pub fallback: FallbackPolicy,
}

/// Loads and validates the catalog from a TOML file
///
/// # Errors
/// Returns [`Error::Configuration`] if:
/// - The file cannot be read
/// - The TOML syntax is invalid or fields are missing
/// - The packages fail catalog validation (duplicates, non-positive credits)
pub fn load_catalog<P: AsRef<Path>>(path: P) -> Result<CreditCatalog> {
    let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| Error::Configuration {
        message: format!(
            "Failed to read package file {}: {e}",
            path.as_ref().display()
        ),
    })?;

    parse_catalog(&contents)
}

/// Parses and validates catalog TOML.
///
/// # Errors
/// Returns [`Error::Configuration`] for invalid TOML or an invalid catalog.
pub fn parse_catalog(contents: &str) -> Result<CreditCatalog> {
    let file: PackagesFile = toml::from_str(contents).map_err(|e| Error::Configuration {
        message: format!("Failed to parse packages.toml: {e}"),
    })?;

    CreditCatalog::new(file.packages, file.fallback)
}

/// Loads the catalog from `path`, or the built-in catalog if the file does not exist
///
/// A file that exists but is invalid is still an error.
pub fn load_catalog_or_default<P: AsRef<Path>>(path: P) -> Result<CreditCatalog> {
    if path.as_ref().exists() {
        let catalog = load_catalog(path.as_ref())?;
        info!(
            path = %path.as_ref().display(),
            packages = catalog.packages().count(),
            "Loaded credit package catalog"
        );
        Ok(catalog)
    } else {
        info!(
            path = %path.as_ref().display(),
            "Package file not found, using built-in catalog"
        );
        Ok(CreditCatalog::default())
    }
}
