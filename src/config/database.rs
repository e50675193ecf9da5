//! Database configuration module.
//!
//! Handles the `SQLite` connection and table creation using `SeaORM`. Tables are generated
//! from the entity definitions with `Schema::create_table_from_entity`, so the schema always
//! matches the Rust structs. The unique indexes the idempotency guard depends on (the
//! purchase primary key and the `session_key` column) come from the same definitions.

use crate::entities::{CheckoutIntent, Purchase, UserAccount};
use crate::errors::Result;
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Schema};
use std::time::Duration;

/// Default database location used when `DATABASE_URL` is not set.
pub const DEFAULT_DATABASE_URL: &str = "sqlite://data/wish_credits.sqlite?mode=rwc";

/// Establishes a connection to the database at `database_url`.
///
/// In-memory databases are limited to a single pooled connection so every caller sees the
/// same database.
pub async fn create_connection(database_url: &str) -> Result<DatabaseConnection> {
    let mut options = ConnectOptions::new(database_url.to_string());
    options
        .acquire_timeout(Duration::from_secs(30))
        .sqlx_logging(false);

    if database_url.contains(":memory:") {
        options.max_connections(1).min_connections(1);
    }

    Database::connect(options).await.map_err(Into::into)
}

/// Creates the ledger tables if they do not exist yet.
///
/// Safe to call on every startup.
pub async fn create_tables(db: &DatabaseConnection) -> Result<()> {
    let builder = db.get_database_backend();
    let schema = Schema::new(builder);

    let mut user_table = schema.create_table_from_entity(UserAccount);
    let mut purchase_table = schema.create_table_from_entity(Purchase);
    let mut intent_table = schema.create_table_from_entity(CheckoutIntent);

    db.execute(builder.build(user_table.if_not_exists())).await?;
    db.execute(builder.build(purchase_table.if_not_exists()))
        .await?;
    db.execute(builder.build(intent_table.if_not_exists()))
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{CheckoutIntentModel, PurchaseModel, UserAccountModel};
    use sea_orm::{EntityTrait, QuerySelect};

    #[tokio::test]
    async fn test_create_tables() -> Result<()> {
        let db = create_connection("sqlite::memory:").await?;
        create_tables(&db).await?;

        let _: Vec<UserAccountModel> = UserAccount::find().limit(1).all(&db).await?;
        let _: Vec<PurchaseModel> = Purchase::find().limit(1).all(&db).await?;
        let _: Vec<CheckoutIntentModel> = CheckoutIntent::find().limit(1).all(&db).await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_create_tables_is_repeatable() -> Result<()> {
        let db = create_connection("sqlite::memory:").await?;
        create_tables(&db).await?;
        create_tables(&db).await?;
        Ok(())
    }
}
