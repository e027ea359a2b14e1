//! Batch command protocol.
//!
//! A request is an array of command objects (`{"cmd": "...", ...}`); the
//! response is an array of result objects (`{"err": <code>, ...}`) of the
//! same length and order.

pub mod account;
pub mod context;
pub mod dispatch;
pub mod registry;
pub mod reply;

pub use context::RequestContext;
pub use dispatch::Dispatcher;
pub use registry::{CommandFn, CommandRegistry, CommandResult};
pub use reply::{Code, Reply};
