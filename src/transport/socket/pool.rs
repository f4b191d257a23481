//! Per-endpoint connection pools.
//!
//! Each endpoint gets its own `deadpool` pool. Acquiring checks a connection
//! out; dropping it checks it back in. Connections are recycled only if their
//! last exchange finished cleanly and they have not sat idle past the expiry.

use async_trait::async_trait;
use deadpool::managed::{Manager, Metrics, Object, Pool, PoolConfig, PoolError, RecycleError, RecycleResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use super::connection::{ConnectSettings, Connection, ConnectionKey};
use crate::errors::{PipelineError, PipelineResult};

/// Opens and recycles connections to one endpoint.
#[derive(Debug)]
pub(crate) struct ConnectionManager {
    key: ConnectionKey,
    settings: Arc<ConnectSettings>,
    opened: Arc<AtomicUsize>,
}

#[async_trait]
impl Manager for ConnectionManager {
    type Type = Connection;
    type Error = PipelineError;

    async fn create(&self) -> Result<Self::Type, Self::Error> {
        let connection = Connection::open(&self.key, &self.settings).await?;
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(connection)
    }

    async fn recycle(&self, conn: &mut Self::Type, _: &Metrics) -> RecycleResult<Self::Error> {
        if !conn.is_reusable() {
            return Err(RecycleError::Backend(PipelineError::ConnectionClosed));
        }
        if conn.idle_for() > self.settings.idle_timeout {
            tracing::debug!(endpoint = %self.key, "Dropping expired idle connection");
            return Err(RecycleError::Backend(PipelineError::connection(
                "idle connection expired",
            )));
        }
        Ok(())
    }
}

/// A connection checked out of the pool.
pub(crate) type PooledConnection = Object<ConnectionManager>;

struct HostPool {
    pool: Pool<ConnectionManager>,
    last_used: Instant,
}

/// Connection pools keyed by endpoint, owned by one socket transport.
pub struct ConnectionPool {
    hosts: Mutex<HashMap<ConnectionKey, HostPool>>,
    settings: Arc<ConnectSettings>,
    max_per_host: usize,
    opened: Arc<AtomicUsize>,
}

impl ConnectionPool {
    pub(crate) fn new(settings: ConnectSettings, max_per_host: usize) -> Self {
        Self {
            hosts: Mutex::new(HashMap::new()),
            settings: Arc::new(settings),
            max_per_host: max_per_host.max(1),
            opened: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Checks out a connection to `key`, reusing an idle one when possible.
    pub(crate) async fn acquire(&self, key: &ConnectionKey) -> PipelineResult<PooledConnection> {
        let pool = self.host_pool(key)?;
        pool.get().await.map_err(|e| match e {
            PoolError::Backend(error) => error,
            other => PipelineError::connection(format!(
                "connection pool for {} unavailable: {}",
                key, other
            )),
        })
    }

    fn host_pool(&self, key: &ConnectionKey) -> PipelineResult<Pool<ConnectionManager>> {
        let mut hosts = self.hosts.lock();
        if let Some(host) = hosts.get_mut(key) {
            host.last_used = Instant::now();
            return Ok(host.pool.clone());
        }

        let manager = ConnectionManager {
            key: key.clone(),
            settings: Arc::clone(&self.settings),
            opened: Arc::clone(&self.opened),
        };
        let pool = Pool::builder(manager)
            .config(PoolConfig {
                max_size: self.max_per_host,
                ..Default::default()
            })
            .build()
            .map_err(|e| PipelineError::configuration(format!("failed to create pool: {}", e)))?;

        tracing::debug!(endpoint = %key, max_size = self.max_per_host, "Created connection pool");
        hosts.insert(
            key.clone(),
            HostPool {
                pool: pool.clone(),
                last_used: Instant::now(),
            },
        );
        Ok(pool)
    }

    /// Closes a checked-out connection instead of returning it.
    pub(crate) fn discard(connection: PooledConnection) {
        drop(Object::take(connection));
    }

    /// Drops the pools of endpoints that have no checked-out connections and
    /// have not been used within the idle expiry. Returns how many endpoints
    /// were evicted.
    pub fn evict_idle(&self) -> usize {
        let expiry = self.settings.idle_timeout;
        let mut hosts = self.hosts.lock();
        let before = hosts.len();
        hosts.retain(|key, host| {
            let status = host.pool.status();
            let busy = status.size > status.available;
            let keep = busy || host.last_used.elapsed() <= expiry;
            if !keep {
                tracing::debug!(endpoint = %key, "Evicting idle connections");
            }
            keep
        });
        before - hosts.len()
    }

    /// Returns the number of idle connections to `key`.
    pub fn idle_connections(&self, key: &ConnectionKey) -> usize {
        self.hosts
            .lock()
            .get(key)
            .map_or(0, |host| host.pool.status().available)
    }

    /// Returns the number of endpoints with a pool.
    pub fn endpoint_count(&self) -> usize {
        self.hosts.lock().len()
    }

    /// Returns how many connections have been opened in total.
    pub fn connections_opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("endpoints", &self.endpoint_count())
            .field("max_per_host", &self.max_per_host)
            .field("opened", &self.connections_opened())
            .finish()
    }
}
