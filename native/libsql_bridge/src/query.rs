/// Basic query execution
///
/// This module runs one-shot SQL on a connection, outside any registered
/// transaction. Statements that return rows are routed to libsql `query`,
/// everything else to `execute`.
use crate::bridge::{retry_busy, Bridge};
use crate::error::BridgeError;
use crate::handle::ConnectionId;
use crate::models::{to_params, ResultSet, Value};
use crate::utils::{collect_rows, should_use_query, statement_error};

/// Run one statement on a client, retrying lock contention.
///
/// Shared by the query surface and the batch runner.
pub(crate) async fn run_statement(
    client: &libsql::Connection,
    busy_timeout: std::time::Duration,
    sql: &str,
    params: Vec<libsql::Value>,
) -> Result<ResultSet, BridgeError> {
    let outcome = if should_use_query(sql) {
        match retry_busy(busy_timeout, || client.query(sql, params.clone())).await {
            Ok(rows) => return collect_rows(rows).await,
            Err(e) => e,
        }
    } else {
        match retry_busy(busy_timeout, || client.execute(sql, params.clone())).await {
            Ok(affected) => return Ok(ResultSet::affected(affected)),
            Err(e) => e,
        }
    };
    Err(statement_error(client, &outcome).await)
}

impl Bridge {
    /// Execute a statement and return the number of affected rows.
    pub fn execute(&self, conn_id: ConnectionId, sql: &str, params: Vec<Value>) -> Result<u64, BridgeError> {
        let entry = self.registries().connections.resolve(&conn_id)?;
        let sql = sql.to_string();
        let params = to_params(params);

        self.run("execute", async move {
            let session = entry.lock(conn_id).await?;
            match retry_busy(session.busy_timeout, || session.client.execute(&sql, params.clone())).await {
                Ok(affected) => Ok(affected),
                Err(e) => Err(statement_error(&session.client, &e).await),
            }
        })
    }

    /// Execute a SQL statement with arguments and return its result set.
    ///
    /// Handles both SELECT queries and DML statements. For statements that
    /// produce no rows `num_rows` is the affected row count. Unique constraint
    /// violations carry the name of the violated index.
    pub fn query(&self, conn_id: ConnectionId, sql: &str, params: Vec<Value>) -> Result<ResultSet, BridgeError> {
        let entry = self.registries().connections.resolve(&conn_id)?;
        let sql = sql.to_string();
        let params = to_params(params);

        self.run("query", async move {
            let session = entry.lock(conn_id).await?;
            run_statement(&session.client, session.busy_timeout, &sql, params).await
        })
    }

    /// Execute a PRAGMA statement and return the result.
    ///
    /// Set-only pragmas return an empty result set.
    pub fn pragma(&self, conn_id: ConnectionId, pragma_stmt: &str) -> Result<ResultSet, BridgeError> {
        let entry = self.registries().connections.resolve(&conn_id)?;
        let pragma_stmt = pragma_stmt.to_string();

        self.run("pragma", async move {
            let session = entry.lock(conn_id).await?;
            let rows = match retry_busy(session.busy_timeout, || session.client.query(&pragma_stmt, ())).await {
                Ok(rows) => rows,
                Err(e) => return Err(statement_error(&session.client, &e).await),
            };
            collect_rows(rows).await
        })
    }
}
