//! Database module: connection pool, scoped handles, schema and account queries.
//!
//! Layout:
//! - `pool.rs`: fixed-size pool with blocking and non-blocking checkout
//! - `handle.rs`: scoped checkout with implicit rollback on drop
//! - `schema.rs`: SQL DDL for initializing the database (SQLite)
//! - `models.rs`: Rust structs mirroring DB rows
//! - `sqlite.rs`: account queries over a checked-out connection

pub mod handle;
pub mod models;
pub mod pool;
pub mod schema;
pub mod sqlite;

pub use handle::ConnectionHandle;
pub use models::{AccountId, DbAccount, DbCredential, DbToken};
pub use pool::ConnectionPool;
pub use schema::SQLITE_INIT;
pub use sqlite::AccountStorage;
