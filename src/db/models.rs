use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

pub type AccountId = i64;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, FromRow)]
pub struct DbAccount {
    pub id: AccountId,
    pub seed: i64,
    pub create_date: NaiveDateTime,
}

/// Username/password attached to an account by `acct_claim`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, FromRow)]
pub struct DbCredential {
    pub acct_id: AccountId,
    pub username: String,
    pub passhash: String,
    pub salt: i64,
    pub last_login: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, FromRow)]
pub struct DbToken {
    pub acct_id: AccountId,
    pub hash: String,
    pub last_use: Option<NaiveDateTime>,
}
