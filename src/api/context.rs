use crate::db::{AccountId, ConnectionHandle};

/// State shared by every command of one batch, in order.
///
/// A command that authenticates (`acct_token`, `acct_auth`) sets
/// `account_id`, and later commands of the same batch see it. The handle is
/// released back to the pool when the context is dropped.
pub struct RequestContext {
    pub debug: bool,
    pub account_id: Option<AccountId>,
    pub db: ConnectionHandle,
}

impl RequestContext {
    pub fn new(db: ConnectionHandle) -> Self {
        Self {
            debug: false,
            account_id: None,
            db,
        }
    }
}
