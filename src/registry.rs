//! Registry of open tunneled connections
//!
//! Maps opaque connection ids to [`TunneledConnection`]s with creation
//! metadata. Each connection sits behind its own mutex, so requests on
//! different connections run concurrently while requests on one connection
//! are serialized.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::connection::{QueryOutcome, TunneledConnection};
use crate::db::{DatabaseTarget, MySqlDriver};
use crate::error::{MysqlTunnelError, Result};
use crate::ssh::{SshTunneler, TunnelEndpoint};
use crate::transport::{DatabaseDriver, Tunneler};

/// A registered connection and what it was opened against
pub struct ConnectionEntry<T: Tunneler = SshTunneler, D: DatabaseDriver = MySqlDriver> {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub ssh_host: String,
    pub mysql_host: String,
    pub database: String,
    connection: Mutex<TunneledConnection<T, D>>,
}

/// Point-in-time view of a registered connection
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionStatus {
    pub connection_id: String,
    pub connected: bool,
    pub ssh_host: String,
    pub mysql_host: String,
    pub mysql_database: String,
    pub local_port: Option<u16>,
    pub connected_at: DateTime<Utc>,
}

/// Owns every open connection of a process
pub struct ConnectionRegistry<T: Tunneler = SshTunneler, D: DatabaseDriver = MySqlDriver> {
    entries: RwLock<HashMap<String, Arc<ConnectionEntry<T, D>>>>,
}

impl<T: Tunneler, D: DatabaseDriver> Default for ConnectionRegistry<T, D> {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    /// Construct and connect a russh/sqlx connection, then register it
    pub async fn open(&self, endpoint: TunnelEndpoint, target: DatabaseTarget) -> Result<String> {
        let connection = TunneledConnection::new(endpoint, target)?;
        self.register(connection).await
    }
}

impl<T: Tunneler, D: DatabaseDriver> ConnectionRegistry<T, D> {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Connect `connection` and register it under a fresh id.
    ///
    /// Nothing is registered if the connect fails.
    pub async fn register(&self, mut connection: TunneledConnection<T, D>) -> Result<String> {
        connection.connect().await?;

        let id = format!("conn_{}", uuid::Uuid::new_v4().simple());
        let entry = ConnectionEntry {
            id: id.clone(),
            created_at: Utc::now(),
            ssh_host: connection.endpoint().host.clone(),
            mysql_host: connection.target().host.clone(),
            database: connection.target().database.clone(),
            connection: Mutex::new(connection),
        };

        self.entries
            .write()
            .await
            .insert(id.clone(), Arc::new(entry));
        info!("Registered connection {}", id);
        Ok(id)
    }

    /// Look up an entry by id
    pub async fn get(&self, id: &str) -> Option<Arc<ConnectionEntry<T, D>>> {
        self.entries.read().await.get(id).cloned()
    }

    /// Ids of every registered connection
    pub async fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entries.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Run a query on a registered connection
    pub async fn execute(&self, id: &str, query: &str, params: &[Value]) -> Result<QueryOutcome> {
        let entry = self
            .get(id)
            .await
            .ok_or_else(|| MysqlTunnelError::UnknownConnection(id.to_string()))?;
        let mut connection = entry.connection.lock().await;
        connection.execute(query, params).await
    }

    /// Probe a registered connection and report its metadata
    pub async fn status(&self, id: &str) -> Option<ConnectionStatus> {
        let entry = self.get(id).await?;
        let mut connection = entry.connection.lock().await;
        let connected = connection.is_connected().await;

        Some(ConnectionStatus {
            connection_id: entry.id.clone(),
            connected,
            ssh_host: entry.ssh_host.clone(),
            mysql_host: entry.mysql_host.clone(),
            mysql_database: entry.database.clone(),
            local_port: connection.local_port(),
            connected_at: entry.created_at,
        })
    }

    /// Close and remove a connection. Returns false for unknown ids.
    pub async fn disconnect(&self, id: &str) -> bool {
        let entry = self.entries.write().await.remove(id);
        match entry {
            Some(entry) => {
                entry.connection.lock().await.close().await;
                info!("Disconnected {}", id);
                true
            }
            None => {
                debug!("disconnect: unknown connection {}", id);
                false
            }
        }
    }

    /// Probe every connection; close and remove the dead ones.
    ///
    /// Returns the evicted ids.
    pub async fn evict_dead(&self) -> Vec<String> {
        let entries: Vec<Arc<ConnectionEntry<T, D>>> =
            self.entries.read().await.values().cloned().collect();

        let mut evicted = Vec::new();
        for entry in entries {
            let mut connection = entry.connection.lock().await;
            if connection.is_connected().await {
                continue;
            }

            warn!("Evicting dead connection {}", entry.id);
            connection.close().await;
            drop(connection);

            // A concurrent disconnect may already own the removal
            if self.entries.write().await.remove(&entry.id).is_some() {
                evicted.push(entry.id.clone());
            }
        }
        evicted
    }

    /// Close and remove every connection
    pub async fn close_all(&self) {
        let entries: Vec<Arc<ConnectionEntry<T, D>>> =
            self.entries.write().await.drain().map(|(_, e)| e).collect();

        for entry in entries {
            entry.connection.lock().await.close().await;
            debug!("Closed {}", entry.id);
        }
    }
}

impl<T, D> ConnectionRegistry<T, D>
where
    T: Tunneler + 'static,
    D: DatabaseDriver + 'static,
{
    /// Run [`evict_dead`](Self::evict_dead) every `interval` on a background task
    pub fn spawn_liveness_poll(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let evicted = registry.evict_dead().await;
                if !evicted.is_empty() {
                    info!("Liveness poll evicted {} connection(s)", evicted.len());
                }
            }
        })
    }
}
