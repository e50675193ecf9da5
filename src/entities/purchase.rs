//! Purchase entity - the append-only half of the credit ledger.
//!
//! The primary key *is* the transaction key, so inserting a record doubles as claiming
//! the key: a second insert with the same id fails with a unique-constraint violation.
//! `session_key` is a second unique claim on the checkout session that produced the
//! payment, letting an order-id claim and a session-composite claim for the same checkout
//! collide. Records are never updated or deleted.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Purchase record database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "purchases")]
pub struct Model {
    /// Transaction key (provider order id when known)
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    /// Optional `<session id>_<package id>` evidence key
    #[sea_orm(unique)]
    pub session_key: Option<String>,
    /// Account that was credited or debited
    pub user_id: String,
    /// Package from the catalog, best effort
    pub package_id: String,
    /// Credits applied; negative for refunds
    pub credits: i64,
    /// Amount paid in currency units, informational only
    pub amount_paid: Option<f64>,
    /// Which trigger produced the record (`webhook`, `verify_payment`, ...)
    pub source: String,
    /// When the claim happened
    pub created_at: DateTimeUtc,
}

/// Defines relationships between Purchase and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each purchase belongs to one user account
    #[sea_orm(
        belongs_to = "super::user_account::Entity",
        from = "Column::UserId",
        to = "super::user_account::Column::Id"
    )]
    UserAccount,
}

impl Related<super::user_account::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::UserAccount.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
