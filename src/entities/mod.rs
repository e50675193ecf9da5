//! Entity module - Contains all SeaORM entity definitions for the database.
//! These entities represent the database tables and their relationships.
//! Each entity has a Model struct for data and an Entity struct for operations.

pub mod checkout_intent;
pub mod purchase;
pub mod user_account;

// Re-export specific types to avoid conflicts
pub use checkout_intent::{
    Column as CheckoutIntentColumn, Entity as CheckoutIntent, Model as CheckoutIntentModel,
};
pub use purchase::{Column as PurchaseColumn, Entity as Purchase, Model as PurchaseModel};
pub use user_account::{
    Column as UserAccountColumn, Entity as UserAccount, Model as UserAccountModel,
};
