/// Prepared statement management for LibSQL databases.
///
/// This module handles prepared statements, including:
/// - Preparing SQL statements for efficient reuse
/// - Executing prepared queries and statements
/// - Introspecting statement structure (column count, names, parameter count)
///
/// Column names and the parameter count are captured at prepare time, so
/// introspection never touches the database. Each statement is associated
/// with the connection that prepared it to prevent cross-connection misuse.
use std::sync::Arc;

use crate::bridge::{Bridge, BusyRetry, Locked};
use crate::error::{BridgeError, SqlErrorKind};
use crate::handle::{ConnectionId, StatementId};
use crate::models::{to_params, ResultSet, Value};
use crate::utils::{collect_rows, statement_error};

/// Registry entry for a prepared statement.
pub struct StatementEntry {
    pub(crate) conn_id: ConnectionId,
    pub(crate) sql: String,
    pub(crate) parameter_count: usize,
    pub(crate) columns: Vec<String>,
    pub(crate) statement: Locked<libsql::Statement>,
}

impl StatementEntry {
    pub fn owner(&self) -> ConnectionId {
        self.conn_id
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Reject a binding whose arity differs from the statement's.
    ///
    /// Resetting a statement does not clear its bindings, so a short
    /// parameter list would silently reuse values from the last execution.
    fn check_arity(&self, params: &[Value]) -> Result<(), BridgeError> {
        if params.len() != self.parameter_count {
            return Err(BridgeError::sql(
                SqlErrorKind::Misuse,
                format!(
                    "statement expects {} parameters, got {}",
                    self.parameter_count,
                    params.len()
                ),
            ));
        }
        Ok(())
    }
}

impl Bridge {
    /// Prepare a SQL statement for reuse.
    ///
    /// The same statement can be executed many times with different parameters.
    pub fn prepare(&self, conn_id: ConnectionId, sql: &str) -> Result<StatementId, BridgeError> {
        let registries = self.registries();
        let entry = registries.connections.resolve(&conn_id)?;
        let sql = sql.to_string();

        self.run("prepare", async move {
            let session = entry.lock(conn_id).await?;

            let mut retry = BusyRetry::new(session.busy_timeout);
            let statement = loop {
                match session.client.prepare(&sql).await {
                    Ok(statement) => break statement,
                    Err(e) if retry.backoff(&e).await => continue,
                    Err(e) => return Err(statement_error(&session.client, &e).await),
                }
            };

            let columns = statement
                .columns()
                .iter()
                .map(|column| column.name().to_string())
                .collect();
            let stmt_entry = StatementEntry {
                conn_id,
                parameter_count: statement.parameter_count(),
                columns,
                sql,
                statement: Locked::new(statement),
            };
            let stmt_id: StatementId = registries.statements.insert(conn_id, Arc::new(stmt_entry))?;

            tracing::debug!(%conn_id, %stmt_id, "statement prepared");
            Ok(stmt_id)
        })
    }

    /// Execute a prepared statement and return the number of affected rows.
    pub fn execute_statement(
        &self,
        conn_id: ConnectionId,
        stmt_id: StatementId,
        params: Vec<Value>,
    ) -> Result<u64, BridgeError> {
        let registries = self.registries();
        let stmt_entry = registries.statements.resolve_owned(&stmt_id, &conn_id)?;
        let entry = registries.owner_session(&conn_id, &stmt_id)?;
        stmt_entry.check_arity(&params)?;
        let params = to_params(params);

        self.run("execute_statement", async move {
            let session = entry.lock_for(stmt_id).await?;
            let statement = stmt_entry.statement.lock().await;

            let mut retry = BusyRetry::new(session.busy_timeout);
            loop {
                statement.reset();
                match statement.execute(params.clone()).await {
                    Ok(affected) => return Ok(affected as u64),
                    Err(e) if retry.backoff(&e).await => continue,
                    Err(e) => return Err(statement_error(&session.client, &e).await),
                }
            }
        })
    }

    /// Run a prepared statement and collect all of its rows.
    pub fn query_statement(
        &self,
        conn_id: ConnectionId,
        stmt_id: StatementId,
        params: Vec<Value>,
    ) -> Result<ResultSet, BridgeError> {
        let registries = self.registries();
        let stmt_entry = registries.statements.resolve_owned(&stmt_id, &conn_id)?;
        let entry = registries.owner_session(&conn_id, &stmt_id)?;
        stmt_entry.check_arity(&params)?;
        let params = to_params(params);

        self.run("query_statement", async move {
            let session = entry.lock_for(stmt_id).await?;
            let statement = stmt_entry.statement.lock().await;

            let mut retry = BusyRetry::new(session.busy_timeout);
            let rows = loop {
                statement.reset();
                match statement.query(params.clone()).await {
                    Ok(rows) => break rows,
                    Err(e) if retry.backoff(&e).await => continue,
                    Err(e) => return Err(statement_error(&session.client, &e).await),
                }
            };
            collect_rows(rows).await
        })
    }

    /// Number of columns in the statement's result set.
    pub fn statement_column_count(&self, conn_id: ConnectionId, stmt_id: StatementId) -> Result<usize, BridgeError> {
        let stmt_entry = self.resolve_statement(conn_id, stmt_id)?;
        Ok(stmt_entry.columns.len())
    }

    /// Name of the column at `index` (0-based).
    pub fn statement_column_name(
        &self,
        conn_id: ConnectionId,
        stmt_id: StatementId,
        index: usize,
    ) -> Result<String, BridgeError> {
        let stmt_entry = self.resolve_statement(conn_id, stmt_id)?;
        stmt_entry
            .columns
            .get(index)
            .cloned()
            .ok_or(BridgeError::OutOfRange {
                index,
                len: stmt_entry.columns.len(),
            })
    }

    /// Number of `?` placeholders the statement binds.
    pub fn statement_parameter_count(&self, conn_id: ConnectionId, stmt_id: StatementId) -> Result<usize, BridgeError> {
        let stmt_entry = self.resolve_statement(conn_id, stmt_id)?;
        Ok(stmt_entry.parameter_count)
    }

    /// Close a prepared statement and free its resources.
    ///
    /// Idempotent: closing an unknown or orphaned statement is `Ok`.
    pub fn close_statement(&self, conn_id: ConnectionId, stmt_id: StatementId) -> Result<(), BridgeError> {
        if self.close_child("close_statement", conn_id, stmt_id, |r| &r.statements)? {
            tracing::debug!(%conn_id, %stmt_id, "statement closed");
        }
        Ok(())
    }

    fn resolve_statement(&self, conn_id: ConnectionId, stmt_id: StatementId) -> Result<Arc<StatementEntry>, BridgeError> {
        let registries = self.registries();
        let stmt_entry = registries.statements.resolve_owned(&stmt_id, &conn_id)?;
        registries.owner_session(&conn_id, &stmt_id)?;
        Ok(stmt_entry)
    }
}
