/// Transaction management for LibSQL databases.
///
/// This module handles database transactions, including:
/// - Starting transactions with configurable locking behavior
/// - Executing queries and statements within transactions
/// - Committing or rolling back transactions
/// - Transaction ownership verification
///
/// A connection carries at most one top-level transaction, recorded in its
/// session as `active_tx`. Nested scopes are savepoints (see `savepoint`).
/// Every statement routed through a transaction is checked against the
/// caller's connection id at the point of use.
use std::sync::Arc;

use crate::bridge::{retry_busy, Bridge, Locked};
use crate::error::BridgeError;
use crate::handle::{ConnectionId, Handle, HandleKind, TransactionId};
use crate::models::{to_params, ResultSet, TransactionBehavior, TransactionState, Value};
use crate::utils::{collect_rows, should_use_query, statement_error};

/// Transaction entry with ownership tracking.
pub struct TransactionEntry {
    pub(crate) conn_id: ConnectionId,
    pub(crate) behavior: TransactionBehavior,
    /// `None` once the transaction has been committed or rolled back.
    pub(crate) transaction: Option<libsql::Transaction>,
    pub(crate) savepoints: Vec<String>,
    pub(crate) state: TransactionState,
}

impl TransactionEntry {
    pub(crate) fn transaction(&self, id: TransactionId) -> Result<&libsql::Transaction, BridgeError> {
        self.transaction
            .as_ref()
            .ok_or_else(|| BridgeError::unknown_handle(HandleKind::Transaction, id))
    }

    pub fn owner(&self) -> ConnectionId {
        self.conn_id
    }

    pub fn behavior(&self) -> TransactionBehavior {
        self.behavior
    }

    pub fn savepoints(&self) -> &[String] {
        &self.savepoints
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Finish {
    Commit,
    Rollback,
}

impl Bridge {
    /// Begin a new transaction on a connection.
    ///
    /// `behavior` controls how early the write lock is acquired. A connection
    /// that already has an active transaction rejects a second begin.
    pub fn begin(
        &self,
        conn_id: ConnectionId,
        behavior: TransactionBehavior,
    ) -> Result<TransactionId, BridgeError> {
        let registries = self.registries();
        let entry = registries.connections.resolve(&conn_id)?;

        self.run("begin", async move {
            let mut session = entry.lock(conn_id).await?;

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
                client.transaction_with_behavior(behavior.into())
            })
            .await
            .map_err(|e| BridgeError::from_libsql(&e))?;

            let trx_id = TransactionId::allocate();
            let trx_entry = TransactionEntry {
                conn_id,
                behavior,
                transaction: Some(trx),
                savepoints: Vec::new(),
                state: TransactionState::Active,
            };
            registries
                .transactions
                .insert_with_id(trx_id, conn_id, Arc::new(Locked::new(trx_entry)))?;
            session.active_tx = Some(trx_id);

            tracing::debug!(%conn_id, %trx_id, ?behavior, "transaction started");
            Ok(trx_id)
        })
    }

    /// Execute a statement inside a transaction and return the affected row count.
    pub fn execute_in_transaction(
        &self,
        conn_id: ConnectionId,
        trx_id: TransactionId,
        sql: &str,
        params: Vec<Value>,
    ) -> Result<u64, BridgeError> {
        let registries = self.registries();
        let trx_entry = registries.transactions.resolve_owned(&trx_id, &conn_id)?;
        let entry = registries.owner_session(&conn_id, &trx_id)?;
        let sql = sql.to_string();
        let params = to_params(params);

        self.run("execute_in_transaction", async move {
            let session = entry.lock_for(trx_id).await?;
            let trx_entry = trx_entry.lock().await;
            let trx = trx_entry.transaction(trx_id)?;

            match retry_busy(session.busy_timeout, || trx.execute(&sql, params.clone())).await {
                Ok(affected) => Ok(affected),
                Err(e) => Err(statement_error(&session.client, &e).await),
            }
        })
    }

    /// Run a statement inside a transaction and return its rows.
    ///
    /// Statements that produce no rows report their affected row count in
    /// `num_rows`.
    pub fn query_in_transaction(
        &self,
        conn_id: ConnectionId,
        trx_id: TransactionId,
        sql: &str,
        params: Vec<Value>,
    ) -> Result<ResultSet, BridgeError> {
        let registries = self.registries();
        let trx_entry = registries.transactions.resolve_owned(&trx_id, &conn_id)?;
        let entry = registries.owner_session(&conn_id, &trx_id)?;
        let use_query = should_use_query(sql);
        let sql = sql.to_string();
        let params = to_params(params);

        self.run("query_in_transaction", async move {
            let session = entry.lock_for(trx_id).await?;
            let trx_entry = trx_entry.lock().await;
            let trx = trx_entry.transaction(trx_id)?;
            let timeout = session.busy_timeout;

            let outcome = if use_query {
                match retry_busy(timeout, || trx.query(&sql, params.clone())).await {
                    Ok(rows) => return collect_rows(rows).await,
                    Err(e) => e,
                }
            } else {
                match retry_busy(timeout, || trx.execute(&sql, params.clone())).await {
                    Ok(affected) => return Ok(ResultSet::affected(affected)),
                    Err(e) => e,
                }
            };
            Err(statement_error(&session.client, &outcome).await)
        })
    }

    /// Commit a transaction.
    ///
    /// The transaction is finished whatever the outcome: a failed commit is
    /// rolled back and the handle no longer resolves.
    pub fn commit(&self, conn_id: ConnectionId, trx_id: TransactionId) -> Result<(), BridgeError> {
        self.finish(conn_id, trx_id, Finish::Commit)
    }

    /// Roll back a transaction, discarding every change since `begin`.
    pub fn rollback(&self, conn_id: ConnectionId, trx_id: TransactionId) -> Result<(), BridgeError> {
        self.finish(conn_id, trx_id, Finish::Rollback)
    }

    /// Roll back and forget a transaction if it is still open.
    ///
    /// Idempotent: closing a finished or unknown transaction is `Ok`.
    pub fn close_transaction(&self, conn_id: ConnectionId, trx_id: TransactionId) -> Result<(), BridgeError> {
        match self.finish(conn_id, trx_id, Finish::Rollback) {
            Ok(()) => Ok(()),
            Err(BridgeError::NotFound { .. }) => Ok(()),
            Err(BridgeError::Ownership {
                kind: crate::error::OwnershipErrorKind::OwnerClosed,
                ..
            }) => {
                let detached = self.registries().transactions.remove(&trx_id)?;
                self.release(detached);
                Ok(())
            }
            Err(e @ BridgeError::Ownership { .. }) => Err(e),
            Err(e) => {
                // A failed rollback still finishes the transaction; anything
                // that left it registered is reported.
                if self.registries().transactions.contains(&trx_id)? {
                    return Err(e);
                }
                tracing::warn!(%conn_id, %trx_id, error = %e, "rollback during close failed");
                Ok(())
            }
        }
    }

    /// Whether a transaction is still active.
    pub fn transaction_status(
        &self,
        conn_id: ConnectionId,
        trx_id: TransactionId,
    ) -> Result<bool, BridgeError> {
        match self.registries().transactions.resolve_owned(&trx_id, &conn_id) {
            Ok(_) => Ok(true),
            Err(BridgeError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn finish(&self, conn_id: ConnectionId, trx_id: TransactionId, action: Finish) -> Result<(), BridgeError> {
        let registries = self.registries();
        let trx_entry = registries.transactions.resolve_owned(&trx_id, &conn_id)?;
        let entry = registries.owner_session(&conn_id, &trx_id)?;

        self.run("finish_transaction", async move {
            let mut session = entry.lock_for(trx_id).await?;
            let mut trx_entry = trx_entry.lock().await;
            let trx = trx_entry
                .transaction
                .take()
                .ok_or_else(|| BridgeError::unknown_handle(HandleKind::Transaction, trx_id))?;

            registries.transactions.remove(&trx_id)?;
            trx_entry.savepoints.clear();
            if session.active_tx == Some(trx_id) {
                session.active_tx = None;
            }

            let result = match action {
                Finish::Commit => trx.commit().await,
                Finish::Rollback => trx.rollback().await,
            };

            match result {
                Ok(()) => {
                    trx_entry.state = match action {
                        Finish::Commit => TransactionState::Committed,
                        Finish::Rollback => TransactionState::RolledBack,
                    };
                    tracing::debug!(%conn_id, %trx_id, ?action, "transaction finished");
                    Ok(())
                }
                Err(e) => {
                    trx_entry.state = TransactionState::RolledBack;
                    if !session.client.is_autocommit() {
                        if let Err(rollback_err) = session.client.execute("ROLLBACK", ()).await {
                            tracing::warn!(%trx_id, error = %rollback_err, "rollback after failed finish");
                        }
                    }
                    Err(BridgeError::from_libsql(&e))
                }
            }
        })
    }
}
