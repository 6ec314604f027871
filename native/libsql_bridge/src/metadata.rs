/// Database metadata and introspection functions
///
/// This module provides functions to query connection state, such as the
/// number of affected rows, last inserted row IDs, and autocommit mode.
use crate::bridge::Bridge;
use crate::error::BridgeError;
use crate::handle::ConnectionId;

impl Bridge {
    /// Get the rowid of the last inserted row in the current connection.
    ///
    /// Returns 0 if no inserts have occurred in this session.
    pub fn last_insert_rowid(&self, conn_id: ConnectionId) -> Result<i64, BridgeError> {
        let entry = self.registries().connections.resolve(&conn_id)?;
        self.run("last_insert_rowid", async move {
            Ok(entry.lock(conn_id).await?.client.last_insert_rowid())
        })
    }

    /// Number of rows modified by the most recent INSERT, UPDATE or DELETE.
    pub fn changes(&self, conn_id: ConnectionId) -> Result<u64, BridgeError> {
        let entry = self.registries().connections.resolve(&conn_id)?;
        self.run("changes", async move { Ok(entry.lock(conn_id).await?.client.changes()) })
    }

    /// Total number of rows modified since the connection was opened.
    pub fn total_changes(&self, conn_id: ConnectionId) -> Result<u64, BridgeError> {
        let entry = self.registries().connections.resolve(&conn_id)?;
        self.run("total_changes", async move {
            Ok(entry.lock(conn_id).await?.client.total_changes())
        })
    }

    /// Check if the connection is in autocommit mode.
    ///
    /// Returns `false` while a transaction is open on the connection.
    pub fn is_autocommit(&self, conn_id: ConnectionId) -> Result<bool, BridgeError> {
        let entry = self.registries().connections.resolve(&conn_id)?;
        self.run("is_autocommit", async move {
            Ok(entry.lock(conn_id).await?.autocommit())
        })
    }
}
