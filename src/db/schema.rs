//! SQL DDL for the account store. Idempotent; applied once at startup.

use super::handle::ConnectionHandle;
use crate::error::KeyturnError;

/// - `account_base`: identity anchor, one row per issued account
/// - `account_auth`: at most one username/password per account; both
///   `acct_id` and `username` are UNIQUE, which is the authoritative guard
///   against double claims
/// - `account_token`: bearer tokens, stored only as hashes
pub const SQLITE_INIT: &str = r#"
CREATE TABLE IF NOT EXISTS account_base (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    seed INTEGER NOT NULL,
    create_date TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS account_auth (
    acct_id INTEGER NOT NULL UNIQUE REFERENCES account_base(id),
    username VARCHAR(64) NOT NULL UNIQUE,
    passhash TEXT NOT NULL,
    salt INTEGER NOT NULL,
    last_login TIMESTAMP NULL
);

CREATE TABLE IF NOT EXISTS account_token (
    acct_id INTEGER NOT NULL REFERENCES account_base(id),
    hash TEXT NOT NULL UNIQUE,
    last_use TIMESTAMP NULL
);

CREATE INDEX IF NOT EXISTS token_acct_id_idx ON account_token(acct_id);
"#;

/// Execute the bundled DDL one statement at a time.
pub async fn apply(db: &mut ConnectionHandle) -> Result<(), KeyturnError> {
    for stmt in SQLITE_INIT.split(';') {
        let s = stmt.trim();
        if s.is_empty() {
            continue;
        }
        db.execute(s).await?;
    }
    Ok(())
}
