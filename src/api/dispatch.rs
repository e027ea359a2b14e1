use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, warn};

use super::context::RequestContext;
use super::registry::CommandRegistry;
use super::reply::{Code, Reply};
use crate::db::ConnectionPool;
use crate::error::CommandError;

/// Runs decoded batches. One batch = one pooled connection and one
/// [`RequestContext`], shared by its commands in input order.
#[derive(Clone)]
pub struct Dispatcher {
    pool: Arc<ConnectionPool>,
    registry: Arc<CommandRegistry>,
}

impl Dispatcher {
    pub fn new(pool: Arc<ConnectionPool>, registry: Arc<CommandRegistry>) -> Self {
        Self { pool, registry }
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// Checks out a connection (waiting if the pool is exhausted), runs the
    /// batch and releases the connection when done.
    pub async fn process(&self, batch: &[Value]) -> Vec<Value> {
        let mut ctx = RequestContext::new(self.pool.acquire().await);
        self.run(&mut ctx, batch).await
    }

    /// Output has the same length and order as `batch`.
    pub async fn run(&self, ctx: &mut RequestContext, batch: &[Value]) -> Vec<Value> {
        let mut results = Vec::with_capacity(batch.len());
        for entry in batch {
            results.push(self.run_one(ctx, entry).await);
        }
        results
    }

    async fn run_one(&self, ctx: &mut RequestContext, entry: &Value) -> Value {
        let Some(obj) = entry.as_object() else {
            return Value::Null;
        };
        let name = obj.get("cmd").and_then(Value::as_str).unwrap_or_default();
        let Some(command) = self.registry.get(name) else {
            debug!(cmd = name, "unknown command");
            return Reply::with_code(Code::UnknownCmd).into_value();
        };

        let result = command(obj, ctx).await;

        if ctx.db.in_transaction() {
            warn!(cmd = name, "command left a transaction open; rolling back");
            if let Err(e) = ctx.db.rollback().await {
                error!(cmd = name, error = %e, "rollback after command failed");
            }
        }

        match result {
            Ok(reply) => reply.into_value(),
            Err(e) => failure(name, ctx.debug, e),
        }
    }
}

fn failure(name: &str, debug: bool, e: CommandError) -> Value {
    if let CommandError::Database(err) = &e {
        error!(cmd = name, error = %err, "database error");
    }
    let mut reply = Reply::with_code(e.code());
    if debug {
        reply = reply.field("debug", e.to_string());
    }
    reply.into_value()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::registry::CommandResult;
    use crate::db::testing::temp_pool;
    use futures::future::BoxFuture;
    use serde_json::{Map, json};

    fn whoami<'a>(_: &'a Map<String, Value>, ctx: &'a mut RequestContext) -> BoxFuture<'a, CommandResult> {
        Box::pin(async move {
            match ctx.account_id {
                Some(id) => Ok(Reply::ok().field("acct_id", id)),
                None => Err(CommandError::AuthorizationRequired("nobody")),
            }
        })
    }

    fn login<'a>(obj: &'a Map<String, Value>, ctx: &'a mut RequestContext) -> BoxFuture<'a, CommandResult> {
        Box::pin(async move {
            ctx.account_id = obj.get("id").and_then(Value::as_i64);
            Ok(Reply::ok())
        })
    }

    fn leaky<'a>(_: &'a Map<String, Value>, ctx: &'a mut RequestContext) -> BoxFuture<'a, CommandResult> {
        Box::pin(async move {
            ctx.db.begin().await?;
            ctx.db.execute("INSERT INTO t (v) VALUES (1)").await?;
            Err(CommandError::InvalidOperation("gave up mid-transaction"))
        })
    }

    fn broken<'a>(_: &'a Map<String, Value>, ctx: &'a mut RequestContext) -> BoxFuture<'a, CommandResult> {
        Box::pin(async move {
            ctx.db.execute("SELECT * FROM no_such_table").await?;
            Ok(Reply::ok())
        })
    }

    async fn dispatcher() -> (tempfile::TempDir, Dispatcher) {
        let (dir, pool) = temp_pool(1).await;
        let mut reg = CommandRegistry::new();
        reg.register("whoami", whoami).unwrap();
        reg.register("login", login).unwrap();
        reg.register("leaky", leaky).unwrap();
        reg.register("broken", broken).unwrap();
        (dir, Dispatcher::new(Arc::new(pool), Arc::new(reg)))
    }

    #[tokio::test]
    async fn output_matches_input_length_and_order() {
        let (_dir, d) = dispatcher().await;
        let batch = vec![
            json!(1),
            json!({"cmd": "nope", "token": "x"}),
            json!("string"),
            json!({"cmd": "debug"}),
            json!([{"cmd": "debug"}]),
            json!({"no_cmd": true}),
            json!({"cmd": 42}),
            json!(null),
        ];
        let out = d.process(&batch).await;
        assert_eq!(
            out,
            vec![
                Value::Null,
                json!({"err": 2}),
                Value::Null,
                json!({"err": 0}),
                Value::Null,
                json!({"err": 2}),
                json!({"err": 2}),
                Value::Null,
            ]
        );
        assert!(d.process(&[]).await.is_empty());
    }

    #[tokio::test]
    async fn context_carries_across_commands() {
        let (_dir, d) = dispatcher().await;
        let out = d
            .process(&[
                json!({"cmd": "whoami"}),
                json!({"cmd": "login", "id": 9}),
                json!({"cmd": "whoami"}),
            ])
            .await;
        assert_eq!(out, vec![json!({"err": 6}), json!({"err": 0}), json!({"err": 0, "acct_id": 9})]);

        // A fresh request starts unauthenticated again.
        let out = d.process(&[json!({"cmd": "whoami"})]).await;
        assert_eq!(out, vec![json!({"err": 6})]);
    }

    #[tokio::test]
    async fn debug_detail_only_after_debug_command() {
        let (_dir, d) = dispatcher().await;
        let out = d
            .process(&[json!({"cmd": "whoami"}), json!({"cmd": "debug"}), json!({"cmd": "whoami"})])
            .await;
        assert_eq!(
            out,
            vec![
                json!({"err": 6}),
                json!({"err": 0}),
                json!({"err": 6, "debug": "nobody"}),
            ]
        );
    }

    #[tokio::test]
    async fn database_failure_becomes_result_code() {
        let (_dir, d) = dispatcher().await;
        let out = d
            .process(&[json!({"cmd": "broken"}), json!({"cmd": "debug"}), json!({"cmd": "broken"}), json!({"cmd": "login", "id": 1})])
            .await;
        assert_eq!(out[0], json!({"err": 5}));
        assert_eq!(out[2]["err"], json!(5));
        assert!(out[2]["debug"].as_str().unwrap().contains("no_such_table"));
        assert_eq!(out[3], json!({"err": 0}));
    }

    #[tokio::test]
    async fn open_transaction_is_rolled_back_between_commands() {
        let (_dir, d) = dispatcher().await;
        let mut ctx = RequestContext::new(d.pool().acquire().await);
        ctx.db.execute("CREATE TABLE t (v INTEGER)").await.unwrap();

        let out = d.run(&mut ctx, &[json!({"cmd": "leaky"})]).await;
        assert_eq!(out, vec![json!({"err": 4})]);
        assert!(!ctx.db.in_transaction());

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM t")
            .fetch_one(&mut *ctx.db)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn connection_returns_to_pool_after_batch() {
        let (_dir, d) = dispatcher().await;
        d.process(&[json!({"cmd": "debug"})]).await;
        assert_eq!(d.pool().idle(), 1);
    }
}
