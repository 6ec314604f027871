/// Replication and sync operations for remote replicas
///
/// This module handles replication management for LibSQL remote replica
/// databases: explicit sync, frame number tracking and read-your-writes
/// consistency. Every network-bound call runs under the bridge's sync timeout.
///
/// Connections that are not replicas treat sync as a no-op and report frame
/// number 0.
use std::future::Future;
use std::time::Duration;

use crate::bridge::Bridge;
use crate::error::{BridgeError, SyncErrorKind};
use crate::handle::ConnectionId;
use crate::models::{Mode, SyncOutcome};

async fn with_sync_timeout<T, F>(operation: &str, timeout: Duration, future: F) -> Result<T, BridgeError>
where
    F: Future<Output = Result<T, libsql::Error>>,
{
    tokio::time::timeout(timeout, future)
        .await
        .map_err(|_| BridgeError::Sync {
            kind: SyncErrorKind::Timeout,
            message: format!("{operation} timed out after {} seconds", timeout.as_secs()),
        })?
        .map_err(|e| BridgeError::from_sync(&e))
}

impl Bridge {
    /// Synchronize a remote replica with its primary.
    ///
    /// Returns the frame number the replica reached; `None` for local and
    /// remote connections, for which this is a no-op.
    pub fn sync(&self, conn_id: ConnectionId) -> Result<SyncOutcome, BridgeError> {
        let entry = self.registries().connections.resolve(&conn_id)?;
        let timeout = self.config().sync_timeout();

        self.run("sync", async move {
            let session = entry.lock(conn_id).await?;
            if session.mode != Mode::RemoteReplica {
                return Ok(SyncOutcome::default());
            }

            let replicated = with_sync_timeout("sync", timeout, session.db.sync()).await?;
            let outcome = SyncOutcome {
                frame_no: replicated.frame_no(),
            };
            tracing::debug!(%conn_id, frame_no = ?outcome.frame_no, "replica synced");
            Ok(outcome)
        })
    }

    /// Current replication index (frame number) of a remote replica.
    ///
    /// 0 if not a replica or no frames have been applied yet.
    pub fn frame_number(&self, conn_id: ConnectionId) -> Result<u64, BridgeError> {
        let entry = self.registries().connections.resolve(&conn_id)?;
        let timeout = self.config().sync_timeout();

        self.run("frame_number", async move {
            let session = entry.lock(conn_id).await?;
            if session.mode != Mode::RemoteReplica {
                return Ok(0);
            }
            let frame_no = with_sync_timeout("replication_index", timeout, session.db.replication_index()).await?;
            Ok(frame_no.unwrap_or(0))
        })
    }

    /// Sync the replica until it has applied at least `frame_no`.
    pub fn sync_until(&self, conn_id: ConnectionId, frame_no: u64) -> Result<(), BridgeError> {
        let entry = self.registries().connections.resolve(&conn_id)?;
        let timeout = self.config().sync_timeout();

        self.run("sync_until", async move {
            let session = entry.lock(conn_id).await?;
            if session.mode != Mode::RemoteReplica {
                return Ok(());
            }
            with_sync_timeout("sync_until", timeout, session.db.sync_until(frame_no)).await?;
            Ok(())
        })
    }

    /// Push pending writes to the primary and return the resulting frame number.
    pub fn flush_replicator(&self, conn_id: ConnectionId) -> Result<u64, BridgeError> {
        let entry = self.registries().connections.resolve(&conn_id)?;
        let timeout = self.config().sync_timeout();

        self.run("flush_replicator", async move {
            let session = entry.lock(conn_id).await?;
            if session.mode != Mode::RemoteReplica {
                return Ok(0);
            }
            let frame_no = with_sync_timeout("flush_replicator", timeout, session.db.flush_replicator()).await?;
            Ok(frame_no.unwrap_or(0))
        })
    }

    /// Highest frame number produced by writes through this database.
    ///
    /// Pass it to `sync_until` on another replica for read-your-writes.
    pub fn max_write_replication_index(&self, conn_id: ConnectionId) -> Result<u64, BridgeError> {
        let entry = self.registries().connections.resolve(&conn_id)?;

        self.run("max_write_replication_index", async move {
            let session = entry.lock(conn_id).await?;
            Ok(session.db.max_write_replication_index().unwrap_or(0))
        })
    }
}
