//! Credit ledger store - user accounts, balances and purchase-record queries.
//!
//! This module owns every read of the ledger and the single balance-mutation primitive,
//! [`adjust_balance_atomic`]. Nothing outside `core` writes balances or purchase records;
//! the credit application service in [`crate::core::credits`] is the only caller of the
//! mutation functions.

use crate::{
    entities::{Purchase, UserAccount, purchase, user_account},
    errors::{Error, Result},
};
use chrono::Utc;
use sea_orm::{QueryOrder, Set, prelude::*};

/// Creates a new user account with the given free starting balance.
///
/// Called at signup. The id is the identity provider's opaque user id, the email is what
/// the payment provider knows the user by.
///
/// # Errors
/// Returns [`Error::Validation`] for an empty id, an email without `@`, a negative
/// starting balance, or an id that already has an account.
pub async fn create_user_account(
    db: &DatabaseConnection,
    user_id: &str,
    email: &str,
    free_credits: i64,
) -> Result<user_account::Model> {
    let user_id = user_id.trim();
    let email = email.trim();

    if user_id.is_empty() {
        return Err(Error::validation("User id cannot be empty"));
    }
    if !email.contains('@') {
        return Err(Error::validation(format!("Invalid email '{email}'")));
    }
    if free_credits < 0 {
        return Err(Error::validation("Starting balance cannot be negative"));
    }

    let now = Utc::now();
    let account = user_account::ActiveModel {
        id: Set(user_id.to_string()),
        email: Set(email.to_string()),
        credits: Set(free_credits),
        created_at: Set(now),
        updated_at: Set(now),
    };

    match account.insert(db).await {
        Ok(model) => Ok(model),
        Err(e) if crate::core::guard::is_conflict(&e) => Err(Error::validation(format!(
            "Account '{user_id}' already exists"
        ))),
        Err(e) => Err(e.into()),
    }
}

/// Finds a user account by id.
pub async fn get_user_account(
    db: &DatabaseConnection,
    user_id: &str,
) -> Result<Option<user_account::Model>> {
    UserAccount::find_by_id(user_id.to_string())
        .one(db)
        .await
        .map_err(Into::into)
}

/// Finds a user account by id, failing with [`Error::UserNotFound`] when absent.
pub async fn require_user_account<C>(db: &C, user_id: &str) -> Result<user_account::Model>
where
    C: ConnectionTrait,
{
    UserAccount::find_by_id(user_id.to_string())
        .one(db)
        .await?
        .ok_or_else(|| Error::UserNotFound {
            user_id: user_id.to_string(),
        })
}

/// Finds a user account by email.
pub async fn get_user_account_by_email(
    db: &DatabaseConnection,
    email: &str,
) -> Result<Option<user_account::Model>> {
    UserAccount::find()
        .filter(user_account::Column::Email.eq(email.trim()))
        .one(db)
        .await
        .map_err(Into::into)
}

/// Current balance of a user.
///
/// # Errors
/// Returns [`Error::UserNotFound`] if the account does not exist.
pub async fn get_balance(db: &DatabaseConnection, user_id: &str) -> Result<i64> {
    Ok(require_user_account(db, user_id).await?.credits)
}

/// Adds `delta` to a user's balance with a single `UPDATE ... SET credits = credits + ?`.
///
/// The update only matches while the result stays non-negative, so concurrent debits
/// can never drive a balance below zero. Works on a connection or inside a transaction.
///
/// # Errors
/// - [`Error::UserNotFound`] if the account does not exist
/// - [`Error::Validation`] if the balance is too low for a negative `delta`
pub async fn adjust_balance_atomic<C>(
    db: &C,
    user_id: &str,
    delta: i64,
) -> Result<user_account::Model>
where
    C: ConnectionTrait,
{
    use sea_orm::sea_query::Expr;

    let result = UserAccount::update_many()
        .col_expr(
            user_account::Column::Credits,
            Expr::col(user_account::Column::Credits).add(delta),
        )
        .col_expr(user_account::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(user_account::Column::Id.eq(user_id))
        .filter(user_account::Column::Credits.gte(-delta))
        .exec(db)
        .await?;

    let account = require_user_account(db, user_id).await?;

    if result.rows_affected == 0 {
        return Err(Error::validation(format!(
            "Insufficient credits: balance {} cannot cover {}",
            account.credits, -delta
        )));
    }

    Ok(account)
}

/// Looks up a purchase record by its transaction key.
pub async fn get_purchase<C>(db: &C, key: &str) -> Result<Option<purchase::Model>>
where
    C: ConnectionTrait,
{
    Purchase::find_by_id(key.to_string())
        .one(db)
        .await
        .map_err(Into::into)
}

/// All ledger records for a user, newest first.
pub async fn get_purchases_for_user(
    db: &DatabaseConnection,
    user_id: &str,
) -> Result<Vec<purchase::Model>> {
    Purchase::find()
        .filter(purchase::Column::UserId.eq(user_id))
        .order_by_desc(purchase::Column::CreatedAt)
        .all(db)
        .await
        .map_err(Into::into)
}
