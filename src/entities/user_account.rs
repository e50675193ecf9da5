//! User account entity - the balance half of the credit ledger.
//!
//! Accounts are created at signup with a free balance and only ever mutated by the
//! credit application service. This subsystem never deletes them.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// User account database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "user_accounts")]
pub struct Model {
    /// Opaque user id issued by the identity provider
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    /// Email used to look the user up at the payment provider
    pub email: String,
    /// Current credit balance, never negative
    pub credits: i64,
    /// When the account was provisioned
    pub created_at: DateTimeUtc,
    /// Last balance change
    pub updated_at: DateTimeUtc,
}

/// Defines relationships between `UserAccount` and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// One account has many purchase records
    #[sea_orm(has_many = "super::purchase::Entity")]
    Purchases,
}

impl Related<super::purchase::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Purchases.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
