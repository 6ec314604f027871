/// Connection lifecycle management for LibSQL/Turso databases
///
/// This module handles database connection establishment, health checking,
/// and connection state management including cleanup and timeouts.
use bytes::Bytes;
use libsql::{Builder, Cipher, EncryptionConfig};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::MutexGuard;

use crate::bridge::{Bridge, Locked};
use crate::config::ConnectConfig;
use crate::error::{BridgeError, ConnectionErrorKind};
use crate::handle::{ConnectionId, Handle, HandleKind, TransactionId};
use crate::models::Mode;

/// One logical database session.
pub struct Session {
    pub(crate) db: libsql::Database,
    pub(crate) client: libsql::Connection,
    pub(crate) mode: Mode,
    pub(crate) busy_timeout: Duration,
    pub(crate) encrypted: bool,
    /// The top-level transaction currently open on this session, if any.
    pub(crate) active_tx: Option<TransactionId>,
    /// Set by `close_connection` while it holds the session lock.
    pub(crate) closed: bool,
}

impl Session {
    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn autocommit(&self) -> bool {
        self.client.is_autocommit()
    }

    pub fn busy_timeout(&self) -> Duration {
        self.busy_timeout
    }

    pub fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    pub fn active_transaction(&self) -> Option<TransactionId> {
        self.active_tx
    }
}

/// Registry entry for a connection.
///
/// The session is the unit of mutual exclusion. A second client handle is kept
/// outside the lock so a long-running statement can be interrupted.
pub struct ConnectionEntry {
    pub(crate) session: Locked<Session>,
    interrupt_handle: libsql::Connection,
}

impl ConnectionEntry {
    /// Lock the session of a connection that has not been closed.
    pub(crate) async fn lock(&self, conn_id: ConnectionId) -> Result<MutexGuard<'_, Session>, BridgeError> {
        let session = self.session.lock().await;
        if session.closed {
            return Err(BridgeError::unknown_handle(HandleKind::Connection, conn_id));
        }
        Ok(session)
    }

    /// Lock the session on behalf of one of its transactions, statements or
    /// cursors. A closed session reports the child as `OwnerClosed`.
    pub(crate) async fn lock_for(&self, child: impl fmt::Display) -> Result<MutexGuard<'_, Session>, BridgeError> {
        let session = self.session.lock().await;
        if session.closed {
            return Err(BridgeError::owner_closed(child));
        }
        Ok(session)
    }
}

fn required<'a>(value: Option<&'a String>, field: &str) -> Result<&'a String, BridgeError> {
    value.ok_or_else(|| BridgeError::invalid_config(format!("`{field}` is required")))
}

fn encryption_config(key: Option<&String>) -> Option<EncryptionConfig> {
    key.map(|key| EncryptionConfig {
        cipher: Cipher::Aes256Cbc,
        encryption_key: Bytes::from(key.clone()),
    })
}

async fn open_session(config: &ConnectConfig) -> Result<Session, BridgeError> {
    let db = match config.mode {
        Mode::RemoteReplica => {
            let path = required(config.database.as_ref(), "database")?;
            let uri = required(config.uri.as_ref(), "uri")?;
            let token = required(config.auth_token.as_ref(), "auth_token")?;

            let mut builder = Builder::new_remote_replica(path, uri.clone(), token.clone());
            if let Some(encryption) = encryption_config(config.encryption_key.as_ref()) {
                builder = builder.encryption_config(encryption);
            }
            builder.build().await
        }
        Mode::Remote => {
            let uri = required(config.uri.as_ref(), "uri")?;
            let token = required(config.auth_token.as_ref(), "auth_token")?;

            Builder::new_remote(uri.clone(), token.clone()).build().await
        }
        Mode::Local => {
            let path = required(config.database.as_ref(), "database")?;

            let mut builder = Builder::new_local(path);
            if let Some(encryption) = encryption_config(config.encryption_key.as_ref()) {
                builder = builder.encryption_config(encryption);
            }
            builder.build().await
        }
    }
    .map_err(|e| BridgeError::from_connect(&e))?;

    let client = db.connect().map_err(|e| BridgeError::from_connect(&e))?;

    // Remote endpoints are only contacted lazily; ping to surface auth and
    // network failures at open time.
    if config.mode != Mode::Local {
        client
            .query("SELECT 1", ())
            .await
            .map_err(|e| BridgeError::from_connect(&e))?;
    }

    if config.mode != Mode::Remote {
        client
            .busy_timeout(config.busy_timeout())
            .map_err(|e| BridgeError::from_connect(&e))?;
    }

    Ok(Session {
        db,
        client,
        mode: config.mode,
        busy_timeout: config.busy_timeout(),
        encrypted: config.encryption_key.is_some(),
        active_tx: None,
        closed: false,
    })
}

impl Bridge {
    /// Establish a connection to a local, remote, or remote replica database.
    ///
    /// The configuration is validated before any I/O. Opening runs under the
    /// bridge's connect timeout.
    pub fn connect(&self, config: ConnectConfig) -> Result<ConnectionId, BridgeError> {
        config.validate()?;

        let registries = self.registries();
        let connect_timeout = self.config().connect_timeout();

        self.run("connect", async move {
            let session = tokio::time::timeout(connect_timeout, open_session(&config))
                .await
                .map_err(|_| BridgeError::Connection {
                    kind: ConnectionErrorKind::Io,
                    message: format!(
                        "Connection timeout after {} seconds",
                        connect_timeout.as_secs()
                    ),
                })??;

            let conn_id = ConnectionId::allocate();
            let entry = ConnectionEntry {
                interrupt_handle: session.client.clone(),
                session: Locked::new(session),
            };
            registries
                .connections
                .insert_with_id(conn_id, conn_id, Arc::new(entry))?;

            tracing::debug!(%conn_id, mode = ?config.mode, "connection opened");
            Ok(conn_id)
        })
    }

    /// Open a connection owned by a [`ConnectionLease`].
    pub fn lease(&self, config: ConnectConfig) -> Result<ConnectionLease, BridgeError> {
        let id = self.connect(config)?;
        Ok(ConnectionLease {
            bridge: self.clone(),
            id,
        })
    }

    /// Close a connection.
    ///
    /// Idempotent. Waits for the operation currently running on the
    /// connection, then releases its transactions, statements and cursors;
    /// their handles fail with `OwnerClosed` from then on.
    pub fn close_connection(&self, conn_id: ConnectionId) -> Result<(), BridgeError> {
        let registries = self.registries();
        let entry = match registries.connections.resolve(&conn_id) {
            Ok(entry) => entry,
            Err(BridgeError::NotFound { .. }) => {
                tracing::debug!(%conn_id, "connection already closed");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let detached = self.run("close_connection", async move {
            let mut session = entry.session.lock().await;
            if session.closed {
                return Ok(None);
            }

            let cursors = registries.cursors.orphan_owned_by(&conn_id)?;
            let statements = registries.statements.orphan_owned_by(&conn_id)?;
            let transactions = registries.transactions.orphan_owned_by(&conn_id)?;
            registries.connections.remove(&conn_id)?;
            session.closed = true;
            session.active_tx = None;
            drop(session);

            tracing::debug!(
                %conn_id,
                cursors = cursors.len(),
                statements = statements.len(),
                transactions = transactions.len(),
                "connection closed"
            );
            Ok(Some((cursors, statements, transactions, entry)))
        })?;

        self.release(detached);
        Ok(())
    }

    /// Check if a database connection is alive and responsive.
    pub fn ping(&self, conn_id: ConnectionId) -> Result<bool, BridgeError> {
        let entry = self.registries().connections.resolve(&conn_id)?;

        self.run("ping", async move {
            let session = entry.lock(conn_id).await?;
            session
                .client
                .query("SELECT 1", ())
                .await
                .map_err(|e| BridgeError::from_libsql(&e))?;
            Ok(true)
        })
    }

    /// Set the busy timeout of a connection.
    ///
    /// Bounds both SQLite's own busy handler and the bridge's retry loop.
    pub fn set_busy_timeout(&self, conn_id: ConnectionId, timeout: Duration) -> Result<(), BridgeError> {
        let entry = self.registries().connections.resolve(&conn_id)?;

        self.run("set_busy_timeout", async move {
            let mut session = entry.lock(conn_id).await?;
            if session.mode != Mode::Remote {
                session
                    .client
                    .busy_timeout(timeout)
                    .map_err(|e| BridgeError::from_libsql(&e))?;
            }
            session.busy_timeout = timeout;
            Ok(())
        })
    }

    /// Reset the connection to a clean state.
    ///
    /// Prepared statements registered through the bridge stay registered.
    pub fn reset_connection(&self, conn_id: ConnectionId) -> Result<(), BridgeError> {
        let entry = self.registries().connections.resolve(&conn_id)?;

        self.run("reset_connection", async move {
            let session = entry.lock(conn_id).await?;
            session.client.reset().await;
            Ok(())
        })
    }

    /// Interrupt any ongoing operation on a connection.
    ///
    /// Does not wait for the session lock, so it can reach a statement that is
    /// currently running.
    pub fn interrupt_connection(&self, conn_id: ConnectionId) -> Result<(), BridgeError> {
        let entry = self.registries().connections.resolve(&conn_id)?;
        entry
            .interrupt_handle
            .interrupt()
            .map_err(|e| BridgeError::from_libsql(&e))
    }

    /// Mode the connection was opened with.
    pub fn connection_mode(&self, conn_id: ConnectionId) -> Result<Mode, BridgeError> {
        let entry = self.registries().connections.resolve(&conn_id)?;
        self.run("connection_mode", async move { Ok(entry.lock(conn_id).await?.mode()) })
    }

    /// Number of open connections.
    pub fn connection_count(&self) -> Result<usize, BridgeError> {
        self.registries().connections.len()
    }
}

/// Owner of an open connection that closes it when dropped.
///
/// Holding the lease instead of a bare [`ConnectionId`] guarantees the
/// connection is reclaimed even if its holder goes away without cleaning up.
#[derive(Debug)]
pub struct ConnectionLease {
    bridge: Bridge,
    id: ConnectionId,
}

impl ConnectionLease {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn bridge(&self) -> &Bridge {
        &self.bridge
    }
}

impl Drop for ConnectionLease {
    fn drop(&mut self) {
        if let Err(e) = self.bridge.close_connection(self.id) {
            tracing::warn!(conn_id = %self.id, error = %e, "failed to close leased connection");
        }
    }
}
