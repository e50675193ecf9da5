//! Checkout intent entity - written before redirecting a user to the payment provider.
//!
//! The return page uses it to recover who paid for what when the browser session is
//! not (yet) authenticated.
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Checkout intent database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "checkout_intents")]
pub struct Model {
    /// Session id we generated and passed to the provider as custom data
    #[sea_orm(primary_key, auto_increment = false)]
    pub session_id: String,
    /// Purchasing user
    pub user_id: String,
    /// Email the checkout was opened for
    pub email: String,
    /// Package being bought
    pub package_id: String,
    /// Provider-side checkout id, if the provider returned one
    pub provider_checkout_id: Option<String>,
    /// When the checkout was opened
    pub created_at: DateTimeUtc,
}

/// `CheckoutIntent` has no relationships with other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
