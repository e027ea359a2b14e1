//! Anonymous accounts, bearer tokens and username/password claims.
//!
//! | command       | needs auth | sets auth | result fields |
//! |---------------|------------|-----------|---------------|
//! | `acct_create` | no         | no        | `token`       |
//! | `acct_token`  | no         | yes       | `acct_id`     |
//! | `acct_claim`  | yes        | no        |               |
//! | `acct_auth`   | no         | yes       | `token`       |

use futures::future::BoxFuture;
use serde_json::{Map, Value};
use subtle::ConstantTimeEq;
use tracing::info;

use super::context::RequestContext;
use super::registry::{CommandRegistry, CommandResult};
use super::reply::Reply;
use crate::crypto;
use crate::db::{AccountStorage, ConnectionHandle, schema};
use crate::error::{CommandError, KeyturnError};

/// Apply the account schema and register the account commands.
pub async fn init(
    db: &mut ConnectionHandle,
    registry: &mut CommandRegistry,
) -> Result<(), KeyturnError> {
    schema::apply(db).await?;
    register(registry)
}

pub fn register(registry: &mut CommandRegistry) -> Result<(), KeyturnError> {
    registry.register("acct_create", acct_create)?;
    registry.register("acct_token", acct_token)?;
    registry.register("acct_claim", acct_claim)?;
    registry.register("acct_auth", acct_auth)?;
    Ok(())
}

fn acct_create<'a>(_: &'a Map<String, Value>, ctx: &'a mut RequestContext) -> BoxFuture<'a, CommandResult> {
    Box::pin(create(ctx))
}

fn acct_token<'a>(cmd: &'a Map<String, Value>, ctx: &'a mut RequestContext) -> BoxFuture<'a, CommandResult> {
    Box::pin(redeem_token(cmd, ctx))
}

fn acct_claim<'a>(cmd: &'a Map<String, Value>, ctx: &'a mut RequestContext) -> BoxFuture<'a, CommandResult> {
    Box::pin(claim(cmd, ctx))
}

fn acct_auth<'a>(cmd: &'a Map<String, Value>, ctx: &'a mut RequestContext) -> BoxFuture<'a, CommandResult> {
    Box::pin(authenticate(cmd, ctx))
}

/// New anonymous account plus its first token. The caller stays
/// unauthenticated until it redeems the token.
async fn create(ctx: &mut RequestContext) -> CommandResult {
    let token = crypto::new_token();

    ctx.db.begin().await?;
    let mut store = AccountStorage::new(&mut ctx.db);
    let acct_id = store.insert_account(crypto::random_seed()).await?;
    store.insert_token(acct_id, &crypto::hash_hex(&token)).await?;
    ctx.db.commit().await?;

    info!(acct_id, "account created");
    Ok(Reply::ok().field("token", token))
}

/// Atomicity of concurrent redemptions of one token is left to the single
/// `UPDATE ... RETURNING` statement.
async fn redeem_token(cmd: &Map<String, Value>, ctx: &mut RequestContext) -> CommandResult {
    let token_hash = crypto::hash_hex(str_field(cmd, "token"));
    let owners = AccountStorage::new(&mut ctx.db)
        .touch_token(&token_hash)
        .await?;
    let &[acct_id] = owners.as_slice() else {
        return Err(CommandError::InvalidOperation("token not found"));
    };

    ctx.account_id = Some(acct_id);
    Ok(Reply::ok().field("acct_id", acct_id))
}

async fn claim(cmd: &Map<String, Value>, ctx: &mut RequestContext) -> CommandResult {
    let Some(acct_id) = ctx.account_id else {
        return Err(CommandError::AuthorizationRequired(
            "not authorized, nothing to claim",
        ));
    };
    let mut store = AccountStorage::new(&mut ctx.db);
    if store.is_claimed(acct_id).await? {
        return Err(CommandError::InvalidOperation(
            "this account has already been claimed",
        ));
    }
    let (username, password) = login_fields(cmd)?;

    let salt = crypto::random_seed();
    let passhash = crypto::password_hash(password, salt);
    match store
        .insert_credential(acct_id, username, &passhash, salt)
        .await
    {
        Ok(()) => {
            info!(acct_id, username, "account claimed");
            Ok(Reply::ok())
        }
        // Lost a race on this account, or the username belongs to another one.
        Err(e) if is_unique_violation(&e) => Err(CommandError::InvalidOperation(
            "account already claimed or username taken",
        )),
        Err(e) => Err(e.into()),
    }
}

/// Username and password failures share one code so callers cannot probe
/// which usernames exist; only debug detail tells them apart.
async fn authenticate(cmd: &Map<String, Value>, ctx: &mut RequestContext) -> CommandResult {
    let (username, password) = login_fields(cmd)?;
    let Some(cred) = AccountStorage::new(&mut ctx.db)
        .credential_by_username(username)
        .await?
    else {
        return Err(CommandError::InvalidOperation("unrecognized username"));
    };
    let attempt = crypto::password_hash(password, cred.salt);
    if !bool::from(attempt.as_bytes().ct_eq(cred.passhash.as_bytes())) {
        return Err(CommandError::InvalidOperation("incorrect password"));
    }
    ctx.account_id = Some(cred.acct_id);

    let token = crypto::new_token();
    ctx.db.begin().await?;
    let mut store = AccountStorage::new(&mut ctx.db);
    store.touch_last_login(cred.acct_id).await?;
    store
        .insert_token(cred.acct_id, &crypto::hash_hex(&token))
        .await?;
    ctx.db.commit().await?;

    info!(acct_id = cred.acct_id, "login");
    Ok(Reply::ok().field("token", token))
}

/// Non-empty `username` and `password`, username checked first.
fn login_fields(cmd: &Map<String, Value>) -> Result<(&str, &str), CommandError> {
    let username = str_field(cmd, "username");
    if username.is_empty() {
        return Err(CommandError::MissingField("username"));
    }
    let password = str_field(cmd, "password");
    if password.is_empty() {
        return Err(CommandError::MissingField("password"));
    }
    Ok((username, password))
}

/// Missing and non-string fields read as empty.
fn str_field<'a>(cmd: &'a Map<String, Value>, key: &str) -> &'a str {
    cmd.get(key).and_then(Value::as_str).unwrap_or_default()
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .is_some_and(|db_err| db_err.is_unique_violation())
}
