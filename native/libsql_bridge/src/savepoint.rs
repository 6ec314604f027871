/// Savepoint management for nested transactions
///
/// Savepoints allow partial rollback without aborting the entire transaction.
/// The bridge tracks the open savepoints of each transaction as a stack:
/// releasing a savepoint also releases every savepoint created after it, and
/// rolling back to one discards the later ones while keeping it open.
use crate::bridge::Bridge;
use crate::error::BridgeError;
use crate::handle::{ConnectionId, TransactionId};
use crate::utils::{statement_error, validate_savepoint_name};

#[derive(Debug, Clone, Copy)]
enum SavepointOp {
    Create,
    Release,
    RollbackTo,
}

impl SavepointOp {
    fn sql(self, name: &str) -> String {
        match self {
            SavepointOp::Create => format!("SAVEPOINT {name}"),
            SavepointOp::Release => format!("RELEASE SAVEPOINT {name}"),
            SavepointOp::RollbackTo => format!("ROLLBACK TO SAVEPOINT {name}"),
        }
    }
}

impl Bridge {
    /// Create a savepoint within a transaction.
    ///
    /// The name must be a plain SQL identifier. Reusing a name pushes a new
    /// savepoint that shadows the older one, as in SQLite.
    pub fn savepoint(&self, conn_id: ConnectionId, trx_id: TransactionId, name: &str) -> Result<(), BridgeError> {
        self.savepoint_op(conn_id, trx_id, name, SavepointOp::Create)
    }

    /// Release a savepoint, keeping its changes in the enclosing transaction.
    pub fn release_savepoint(
        &self,
        conn_id: ConnectionId,
        trx_id: TransactionId,
        name: &str,
    ) -> Result<(), BridgeError> {
        self.savepoint_op(conn_id, trx_id, name, SavepointOp::Release)
    }

    /// Undo everything since a savepoint was created.
    ///
    /// The savepoint stays open and can be rolled back to again.
    pub fn rollback_to_savepoint(
        &self,
        conn_id: ConnectionId,
        trx_id: TransactionId,
        name: &str,
    ) -> Result<(), BridgeError> {
        self.savepoint_op(conn_id, trx_id, name, SavepointOp::RollbackTo)
    }

    /// Names of the open savepoints of a transaction, oldest first.
    pub fn savepoints(&self, conn_id: ConnectionId, trx_id: TransactionId) -> Result<Vec<String>, BridgeError> {
        let trx_entry = self.registries().transactions.resolve_owned(&trx_id, &conn_id)?;
        self.run("savepoints", async move {
            Ok(trx_entry.lock().await.savepoints.clone())
        })
    }

    fn savepoint_op(
        &self,
        conn_id: ConnectionId,
        trx_id: TransactionId,
        name: &str,
        op: SavepointOp,
    ) -> Result<(), BridgeError> {
        validate_savepoint_name(name)?;

        let registries = self.registries();
        let trx_entry = registries.transactions.resolve_owned(&trx_id, &conn_id)?;
        let entry = registries.owner_session(&conn_id, &trx_id)?;
        let name = name.to_string();

        self.run("savepoint", async move {
            let session = entry.lock_for(trx_id).await?;
            let mut trx_entry = trx_entry.lock().await;

            // SQLite matches savepoint names case-insensitively
            let position = trx_entry
                .savepoints
                .iter()
                .rposition(|sp| sp.eq_ignore_ascii_case(&name));
            if position.is_none() && !matches!(op, SavepointOp::Create) {
                return Err(BridgeError::unknown_savepoint(&name));
            }

            let trx = trx_entry.transaction(trx_id)?;
            if let Err(e) = trx.execute(&op.sql(&name), ()).await {
                return Err(statement_error(&session.client, &e).await);
            }

            match (op, position) {
                (SavepointOp::Create, _) => trx_entry.savepoints.push(name),
                (SavepointOp::Release, Some(idx)) => trx_entry.savepoints.truncate(idx),
                (SavepointOp::RollbackTo, Some(idx)) => trx_entry.savepoints.truncate(idx + 1),
                (_, None) => {}
            }
            Ok(())
        })
    }
}
