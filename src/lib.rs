pub mod api;
pub mod codec;
pub mod config;
pub mod crypto;
pub mod db;
pub mod error;
pub mod router;

pub use api::{CommandRegistry, Dispatcher};
pub use db::ConnectionPool;
pub use error::KeyturnError;
