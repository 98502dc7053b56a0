//! # chime-store
//!
//! SQLite-backed reminder persistence: schema migrations, row storage, and
//! startup recovery.

mod store;

pub use store::{Store, StoredReminder};
