use crate::db::models::{AccountId, DbCredential};
use sqlx::sqlite::SqliteConnection;

/// Account queries against one checked-out connection.
pub struct AccountStorage<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> AccountStorage<'c> {
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        Self { conn }
    }

    /// Insert a new account row. Returns the generated id.
    pub async fn insert_account(&mut self, seed: i64) -> Result<AccountId, sqlx::Error> {
        let rec: (AccountId,) =
            sqlx::query_as("INSERT INTO account_base (seed) VALUES (?) RETURNING id")
                .bind(seed)
                .fetch_one(&mut *self.conn)
                .await?;
        Ok(rec.0)
    }

    pub async fn insert_token(
        &mut self,
        acct_id: AccountId,
        token_hash: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("INSERT INTO account_token (acct_id, hash) VALUES (?, ?)")
            .bind(acct_id)
            .bind(token_hash)
            .execute(&mut *self.conn)
            .await?;
        Ok(())
    }

    /// Stamp `last_use` on every token with this hash and return the owning
    /// account ids, in one statement.
    pub async fn touch_token(&mut self, token_hash: &str) -> Result<Vec<AccountId>, sqlx::Error> {
        let rows: Vec<(AccountId,)> = sqlx::query_as(
            "UPDATE account_token SET last_use = CURRENT_TIMESTAMP WHERE hash = ? RETURNING acct_id",
        )
        .bind(token_hash)
        .fetch_all(&mut *self.conn)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    pub async fn is_claimed(&mut self, acct_id: AccountId) -> Result<bool, sqlx::Error> {
        let row: Option<(AccountId,)> =
            sqlx::query_as("SELECT acct_id FROM account_auth WHERE acct_id = ?")
                .bind(acct_id)
                .fetch_optional(&mut *self.conn)
                .await?;
        Ok(row.is_some())
    }

    pub async fn insert_credential(
        &mut self,
        acct_id: AccountId,
        username: &str,
        passhash: &str,
        salt: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO account_auth (acct_id, username, passhash, salt) VALUES (?, ?, ?, ?)",
        )
        .bind(acct_id)
        .bind(username)
        .bind(passhash)
        .bind(salt)
        .execute(&mut *self.conn)
        .await?;
        Ok(())
    }

    pub async fn credential_by_username(
        &mut self,
        username: &str,
    ) -> Result<Option<DbCredential>, sqlx::Error> {
        sqlx::query_as(
            r#"SELECT acct_id, username, passhash, salt, last_login
               FROM account_auth WHERE username = ?"#,
        )
        .bind(username)
        .fetch_optional(&mut *self.conn)
        .await
    }

    pub async fn touch_last_login(&mut self, acct_id: AccountId) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE account_auth SET last_login = CURRENT_TIMESTAMP WHERE acct_id = ?")
            .bind(acct_id)
            .execute(&mut *self.conn)
            .await?;
        Ok(())
    }
}
