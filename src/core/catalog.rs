//! Credit package catalog - the trusted mapping from package id to credit amount.
//!
//! Amounts credited to a user always come from here. Client- or webhook-supplied
//! "credits" fields are only consulted when a package id is unknown, and even then the
//! result is clamped by the [`FallbackPolicy`].

use crate::errors::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// One purchasable credit package.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditPackage {
    /// Package identifier used by checkouts and custom data (e.g. `"premium"`)
    pub id: String,
    /// Credits granted per purchase
    pub credits: i64,
    /// Price in currency units
    pub price: f64,
    /// Provider variant the package is sold as, used to map provider orders back to packages
    #[serde(default)]
    pub variant_id: Option<String>,
}

/// Bounds for crediting purchases of packages the catalog does not know.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FallbackPolicy {
    /// Credits per currency unit paid
    pub multiplier: f64,
    /// Upper bound on fallback credits
    pub max_credits: i64,
}

impl Default for FallbackPolicy {
    fn default() -> Self {
        Self {
            multiplier: 20.0,
            max_credits: 500,
        }
    }
}

/// Where a resolved credit amount came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreditSource {
    /// Fixed amount from a known package
    Catalog,
    /// `clamp(paid * multiplier, 0, max)` for an unknown package
    PaidAmount,
    /// Client-reported credits, clamped, for an unknown package with no paid amount
    ClientReported,
}

/// A credit amount together with its provenance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedCredits {
    /// Credits to apply
    pub credits: i64,
    /// Provenance of the amount
    pub source: CreditSource,
}

/// The static, trusted package catalog.
#[derive(Debug, Clone)]
pub struct CreditCatalog {
    packages: Vec<CreditPackage>,
    fallback: FallbackPolicy,
}

impl Default for CreditCatalog {
    fn default() -> Self {
        Self {
            packages: vec![
                CreditPackage {
                    id: "basic".to_string(),
                    credits: 10,
                    price: 1.0,
                    variant_id: None,
                },
                CreditPackage {
                    id: "premium".to_string(),
                    credits: 100,
                    price: 5.0,
                    variant_id: None,
                },
            ],
            fallback: FallbackPolicy::default(),
        }
    }
}

impl CreditCatalog {
    /// Builds a catalog, rejecting duplicate ids, non-positive credit amounts and a
    /// fallback policy that could produce negative or unbounded credits.
    pub fn new(packages: Vec<CreditPackage>, fallback: FallbackPolicy) -> Result<Self> {
        let mut seen = HashSet::new();
        for package in &packages {
            if package.id.trim().is_empty() {
                return Err(Error::Configuration {
                    message: "Package id cannot be empty".to_string(),
                });
            }
            if package.credits <= 0 {
                return Err(Error::Configuration {
                    message: format!("Package '{}' must grant a positive credit amount", package.id),
                });
            }
            if !seen.insert(package.id.as_str()) {
                return Err(Error::Configuration {
                    message: format!("Duplicate package id '{}'", package.id),
                });
            }
        }

        if !fallback.multiplier.is_finite() || fallback.multiplier < 0.0 {
            return Err(Error::Configuration {
                message: format!("Invalid fallback multiplier {}", fallback.multiplier),
            });
        }
        if fallback.max_credits < 0 {
            return Err(Error::Configuration {
                message: format!("Invalid fallback cap {}", fallback.max_credits),
            });
        }

        Ok(Self { packages, fallback })
    }

    /// Looks up a package by id.
    #[must_use]
    pub fn get(&self, package_id: &str) -> Option<&CreditPackage> {
        self.packages.iter().find(|p| p.id == package_id)
    }

    /// Looks up the package sold as the given provider variant.
    #[must_use]
    pub fn by_variant(&self, variant_id: &str) -> Option<&CreditPackage> {
        self.packages
            .iter()
            .find(|p| p.variant_id.as_deref() == Some(variant_id))
    }

    /// All packages in catalog order.
    pub fn packages(&self) -> impl Iterator<Item = &CreditPackage> {
        self.packages.iter()
    }

    /// The fallback policy for unknown packages.
    #[must_use]
    pub const fn fallback(&self) -> FallbackPolicy {
        self.fallback
    }

    /// Resolves how many credits a purchase of `package_id` is worth.
    ///
    /// Known packages always yield their catalog amount; `paid_amount` and
    /// `client_credits` are ignored for them. Unknown packages fall back to
    /// `clamp(paid_amount * multiplier, 0, max_credits)`, or to the clamped client-reported
    /// credit count when no paid amount is available.
    ///
    /// # Errors
    /// Returns [`Error::Validation`] when an unknown package has no usable amount, or when
    /// the fallback resolves to zero credits.
    pub fn resolve(
        &self,
        package_id: &str,
        paid_amount: Option<f64>,
        client_credits: Option<i64>,
    ) -> Result<ResolvedCredits> {
        if let Some(package) = self.get(package_id) {
            return Ok(ResolvedCredits {
                credits: package.credits,
                source: CreditSource::Catalog,
            });
        }

        let resolved = match (paid_amount, client_credits) {
            (Some(amount), _) => {
                if !amount.is_finite() {
                    return Err(Error::validation(format!("Invalid paid amount {amount}")));
                }
                ResolvedCredits {
                    credits: self.clamp_fallback(amount * self.fallback.multiplier),
                    source: CreditSource::PaidAmount,
                }
            }
            (None, Some(credits)) => ResolvedCredits {
                credits: credits.clamp(0, self.fallback.max_credits),
                source: CreditSource::ClientReported,
            },
            (None, None) => {
                return Err(Error::validation(format!(
                    "Unknown package '{package_id}' and no amount to derive credits from"
                )));
            }
        };

        if resolved.credits == 0 {
            return Err(Error::validation(format!(
                "Purchase of unknown package '{package_id}' resolves to zero credits"
            )));
        }

        tracing::warn!(
            package_id,
            credits = resolved.credits,
            source = ?resolved.source,
            "Unknown package, credited through fallback policy"
        );
        Ok(resolved)
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    fn clamp_fallback(&self, raw: f64) -> i64 {
        let max = self.fallback.max_credits as f64;
        raw.floor().clamp(0.0, max) as i64
    }
}
