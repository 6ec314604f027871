/// Batch operations for `LibSQL`/Turso databases
///
/// This module executes a list of `(sql, params)` statements in order, either
/// as-is or inside a fresh transaction that is rolled back on the first
/// failure.
use crate::bridge::{retry_busy, Bridge};
use crate::error::BridgeError;
use crate::handle::ConnectionId;
use crate::models::{to_params, ResultSet, TransactionBehavior, Value};
use crate::query::run_statement;

type BatchStatement = (String, Vec<libsql::Value>);

fn prepare_batch(statements: Vec<(String, Vec<Value>)>) -> Vec<BatchStatement> {
    statements
        .into_iter()
        .map(|(sql, params)| (sql, to_params(params)))
        .collect()
}

impl Bridge {
    /// Execute statements sequentially without a transaction.
    ///
    /// Stops at the first failing statement; statements before it stay applied.
    pub fn execute_batch(
        &self,
        conn_id: ConnectionId,
        statements: Vec<(String, Vec<Value>)>,
    ) -> Result<Vec<ResultSet>, BridgeError> {
        let entry = self.registries().connections.resolve(&conn_id)?;
        let batch = prepare_batch(statements);

        self.run("execute_batch", async move {
            let session = entry.lock(conn_id).await?;
            let mut results = Vec::with_capacity(batch.len());
            for (sql, params) in batch {
                results.push(run_statement(&session.client, session.busy_timeout, &sql, params).await?);
            }
            Ok(results)
        })
    }

    /// Execute statements atomically within a fresh transaction.
    ///
    /// Any failure rolls back every statement of the batch.
    pub fn execute_transactional_batch(
        &self,
        conn_id: ConnectionId,
        statements: Vec<(String, Vec<Value>)>,
    ) -> Result<Vec<ResultSet>, BridgeError> {
        let registries = self.registries();
        let entry = registries.connections.resolve(&conn_id)?;
        let batch = prepare_batch(statements);

        self.run("execute_transactional_batch", async move {
            let session = entry.lock(conn_id).await?;

            if let Some(active) = session.active_tx {
                if registries.transactions.contains(&active)? {
                    return Err(BridgeError::AlreadyInTransaction {
                        connection: conn_id.to_string(),
                        transaction: active.to_string(),
                    });
                }
            }

            let client = &session.client;
            let trx = retry_busy(session.busy_timeout, || {
                client.transaction_with_behavior(TransactionBehavior::Immediate.into())
            })
            .await
            .map_err(|e| BridgeError::from_libsql(&e))?;

            let mut results = Vec::with_capacity(batch.len());
            for (index, (sql, params)) in batch.into_iter().enumerate() {
                match run_statement(&trx, session.busy_timeout, &sql, params).await {
                    Ok(result) => results.push(result),
                    Err(e) => {
                        if let Err(rollback_err) = trx.rollback().await {
                            tracing::warn!(%conn_id, error = %rollback_err, "batch rollback failed");
                        }
                        tracing::debug!(%conn_id, index, "transactional batch rolled back");
                        return Err(e);
                    }
                }
            }

            if let Err(e) = trx.commit().await {
                if !client.is_autocommit() {
                    if let Err(rollback_err) = client.execute("ROLLBACK", ()).await {
                        tracing::warn!(%conn_id, error = %rollback_err, "rollback after failed commit");
                    }
                }
                return Err(BridgeError::from_libsql(&e));
            }
            Ok(results)
        })
    }
}
