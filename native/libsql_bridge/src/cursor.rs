/// Cursor and streaming operations for LibSQL databases.
///
/// This module handles cursor-based result set streaming, including:
/// - Declaring cursors for large result sets, on a connection or inside a transaction
/// - Fetching rows from cursors in batches
/// - Cursor ownership verification
///
/// A cursor keeps the libsql row stream open and reads at most one row past
/// the current batch, so memory stays bounded by the batch size and
/// `has_more` is exact. The stream is dropped as soon as it is exhausted or
/// the cursor is closed.
use std::sync::Arc;

use crate::bridge::{Bridge, BusyRetry, Locked};
use crate::error::BridgeError;
use crate::handle::{ConnectionId, CursorId, TransactionId};
use crate::models::{to_params, CursorState, FetchBatch, Value};
use crate::utils::{column_names, row_values, statement_error};

/// Registry entry for a cursor.
pub struct CursorEntry {
    pub(crate) conn_id: ConnectionId,
    pub(crate) columns: Vec<String>,
    rows: Option<libsql::Rows>,
    /// The next row to deliver, read ahead of the current batch.
    lookahead: Option<Vec<Value>>,
    pub(crate) position: u64,
    pub(crate) batch_size: usize,
    pub(crate) state: CursorState,
}

impl CursorEntry {
    async fn open(
        conn_id: ConnectionId,
        mut rows: libsql::Rows,
        batch_size: usize,
    ) -> Result<Self, BridgeError> {
        let columns = column_names(&rows);
        let lookahead = next_row(&mut rows, columns.len()).await?;
        let mut cursor = Self {
            conn_id,
            columns,
            rows: Some(rows),
            lookahead,
            position: 0,
            batch_size,
            state: CursorState::Declared,
        };
        if cursor.lookahead.is_none() {
            cursor.exhaust();
        }
        Ok(cursor)
    }

    pub fn owner(&self) -> ConnectionId {
        self.conn_id
    }

    pub fn state(&self) -> CursorState {
        self.state
    }

    fn exhaust(&mut self) {
        self.rows = None;
        self.lookahead = None;
        self.state = CursorState::Exhausted;
    }

    async fn next_batch(&mut self) -> Result<FetchBatch, BridgeError> {
        let mut batch = Vec::with_capacity(self.batch_size);

        while batch.len() < self.batch_size {
            let Some(row) = self.lookahead.take() else {
                break;
            };
            batch.push(row);

            let Some(rows) = self.rows.as_mut() else {
                break;
            };
            match next_row(rows, self.columns.len()).await {
                Ok(next) => self.lookahead = next,
                Err(e) => {
                    self.exhaust();
                    return Err(e);
                }
            }
        }

        self.position += batch.len() as u64;
        let has_more = self.lookahead.is_some();
        if has_more {
            self.state = CursorState::Active;
        } else {
            self.exhaust();
        }

        Ok(FetchBatch {
            columns: self.columns.clone(),
            rows: batch,
            has_more,
        })
    }
}

async fn next_row(rows: &mut libsql::Rows, column_count: usize) -> Result<Option<Vec<Value>>, BridgeError> {
    match rows.next().await.map_err(|e| BridgeError::from_libsql(&e))? {
        Some(row) => Ok(Some(row_values(&row, column_count)?)),
        None => Ok(None),
    }
}

fn check_batch_size(batch_size: usize) -> Result<(), BridgeError> {
    if batch_size == 0 {
        return Err(BridgeError::InvalidArgument(
            "cursor batch size must be at least 1".to_string(),
        ));
    }
    Ok(())
}

impl Bridge {
    /// Declare a cursor over a query on a connection.
    pub fn declare_cursor(
        &self,
        conn_id: ConnectionId,
        sql: &str,
        params: Vec<Value>,
        batch_size: usize,
    ) -> Result<CursorId, BridgeError> {
        check_batch_size(batch_size)?;
        let registries = self.registries();
        let entry = registries.connections.resolve(&conn_id)?;
        let sql = sql.to_string();
        let params = to_params(params);

        self.run("declare_cursor", async move {
            let session = entry.lock(conn_id).await?;

            let mut retry = BusyRetry::new(session.busy_timeout);
            let rows = loop {
                match session.client.query(&sql, params.clone()).await {
                    Ok(rows) => break rows,
                    Err(e) if retry.backoff(&e).await => continue,
                    Err(e) => return Err(statement_error(&session.client, &e).await),
                }
            };

            let cursor = CursorEntry::open(conn_id, rows, batch_size).await?;
            let cursor_id: CursorId = registries
                .cursors
                .insert(conn_id, Arc::new(Locked::new(cursor)))?;

            tracing::debug!(%conn_id, %cursor_id, batch_size, "cursor declared");
            Ok(cursor_id)
        })
    }

    /// Declare a cursor over a query run inside a transaction.
    ///
    /// The cursor is owned by the transaction's connection; it stays readable
    /// until closed even if the transaction finishes first.
    pub fn declare_cursor_in_transaction(
        &self,
        conn_id: ConnectionId,
        trx_id: TransactionId,
        sql: &str,
        params: Vec<Value>,
        batch_size: usize,
    ) -> Result<CursorId, BridgeError> {
        check_batch_size(batch_size)?;
        let registries = self.registries();
        let trx_entry = registries.transactions.resolve_owned(&trx_id, &conn_id)?;
        let entry = registries.owner_session(&conn_id, &trx_id)?;
        let sql = sql.to_string();
        let params = to_params(params);

        self.run("declare_cursor_in_transaction", async move {
            let session = entry.lock_for(trx_id).await?;
            let trx_entry = trx_entry.lock().await;
            let trx = trx_entry.transaction(trx_id)?;

            let mut retry = BusyRetry::new(session.busy_timeout);
            let rows = loop {
                match trx.query(&sql, params.clone()).await {
                    Ok(rows) => break rows,
                    Err(e) if retry.backoff(&e).await => continue,
                    Err(e) => return Err(statement_error(&session.client, &e).await),
                }
            };

            let cursor = CursorEntry::open(conn_id, rows, batch_size).await?;
            let cursor_id: CursorId = registries
                .cursors
                .insert(conn_id, Arc::new(Locked::new(cursor)))?;

            tracing::debug!(%conn_id, %trx_id, %cursor_id, batch_size, "cursor declared");
            Ok(cursor_id)
        })
    }

    /// Fetch the next batch of at most `batch_size` rows.
    ///
    /// An exhausted cursor keeps answering with an empty batch and
    /// `has_more == false`.
    pub fn fetch(&self, conn_id: ConnectionId, cursor_id: CursorId) -> Result<FetchBatch, BridgeError> {
        let registries = self.registries();
        let cursor = registries.cursors.resolve_owned(&cursor_id, &conn_id)?;
        let entry = registries.owner_session(&conn_id, &cursor_id)?;

        self.run("fetch", async move {
            let _session = entry.lock_for(cursor_id).await?;
            let mut cursor = cursor.lock().await;
            cursor.next_batch().await
        })
    }

    /// Close a cursor in any state, releasing its row stream.
    ///
    /// Idempotent: closing an unknown or orphaned cursor is `Ok`.
    pub fn close_cursor(&self, conn_id: ConnectionId, cursor_id: CursorId) -> Result<(), BridgeError> {
        if self.close_child("close_cursor", conn_id, cursor_id, |r| &r.cursors)? {
            tracing::debug!(%conn_id, %cursor_id, "cursor closed");
        }
        Ok(())
    }
}
