//! Scoped helpers bound to a [`Database`](crate::Database)
//!
//! Each helper borrows the database mutably for its lifetime and is created
//! fresh by [`Database::table`](crate::Database::table),
//! [`Database::hashtable`](crate::Database::hashtable) or
//! [`Database::schema`](crate::Database::schema).

mod hashtable;
mod schema;
mod table;

pub use hashtable::Hashtable;
pub use schema::{Migration, Schema};
pub use table::Table;
