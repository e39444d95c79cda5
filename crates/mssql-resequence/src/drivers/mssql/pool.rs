//! Tiberius connection pooling.

use std::time::Duration;

use async_trait::async_trait;
use bb8::Pool;
use tiberius::{AuthMethod, Client, Config, EncryptionLevel};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{info, warn};

use super::store::MssqlStore;
use crate::config::ConnectionConfig;
use crate::error::{ResequenceError, Result};

/// Connection pool timeouts.
const POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(300);
const POOL_MAX_LIFETIME: Duration = Duration::from_secs(1800);
const TCP_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Connection manager for bb8 pool with Tiberius.
#[derive(Clone)]
pub struct TiberiusConnectionManager {
    config: ConnectionConfig,
}

impl TiberiusConnectionManager {
    pub fn new(config: ConnectionConfig) -> Self {
        Self { config }
    }

    fn build_config(&self) -> Config {
        let mut config = Config::new();
        config.host(&self.config.host);
        config.port(self.config.port);
        config.database(&self.config.database);
        config.authentication(AuthMethod::sql_server(
            &self.config.user,
            &self.config.password,
        ));

        if self.config.encrypt_enabled() {
            if self.config.trust_server_cert {
                config.trust_cert();
            }
            config.encryption(EncryptionLevel::Required);
        } else {
            config.encryption(EncryptionLevel::NotSupported);
        }

        config
    }
}

fn io_error(e: std::io::Error, context: &str) -> tiberius::error::Error {
    tiberius::error::Error::Io {
        kind: e.kind(),
        message: format!("{}: {}", context, e),
    }
}

#[async_trait]
impl bb8::ManageConnection for TiberiusConnectionManager {
    type Connection = Client<Compat<TcpStream>>;
    type Error = tiberius::error::Error;

    async fn connect(&self) -> std::result::Result<Self::Connection, Self::Error> {
        let config = self.build_config();
        let tcp = TcpStream::connect(config.get_addr())
            .await
            .map_err(|e| io_error(e, "Failed to connect"))?;
        tcp.set_nodelay(true).ok();

        let std_tcp = tcp
            .into_std()
            .map_err(|e| io_error(e, "Failed to detach socket"))?;
        let socket = socket2::Socket::from(std_tcp);
        let keepalive = socket2::TcpKeepalive::new()
            .with_time(TCP_KEEPALIVE_INTERVAL)
            .with_interval(TCP_KEEPALIVE_INTERVAL);
        if let Err(e) = socket.set_tcp_keepalive(&keepalive) {
            warn!("Failed to set TCP keepalive on MSSQL connection: {}", e);
        }

        let std_tcp: std::net::TcpStream = socket.into();
        std_tcp.set_nonblocking(true).ok();
        let tcp = TcpStream::from_std(std_tcp).map_err(|e| io_error(e, "Failed to convert socket"))?;

        Client::connect(config, tcp.compat_write()).await
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> std::result::Result<(), Self::Error> {
        conn.simple_query("SELECT 1").await?.into_row().await?;
        Ok(())
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}

/// Pool of SQL Server sessions.
///
/// Each resequencing operation takes one session for its whole duration via
/// [`MssqlPool::store`].
#[derive(Clone)]
pub struct MssqlPool {
    pool: Pool<TiberiusConnectionManager>,
    config: ConnectionConfig,
}

impl MssqlPool {
    /// Build the pool and check that a connection can be made.
    pub async fn new(config: &ConnectionConfig) -> Result<Self> {
        let manager = TiberiusConnectionManager::new(config.clone());
        let pool = Pool::builder()
            .max_size(config.pool_size)
            .min_idle(Some(1))
            .connection_timeout(POOL_CONNECTION_TIMEOUT)
            .idle_timeout(Some(POOL_IDLE_TIMEOUT))
            .max_lifetime(Some(POOL_MAX_LIFETIME))
            .test_on_check_out(true)
            .build(manager)
            .await
            .map_err(|e| ResequenceError::pool(e, "creating MSSQL connection pool"))?;

        {
            let mut conn = pool
                .get()
                .await
                .map_err(|e| ResequenceError::pool(e, "testing MSSQL connection"))?;
            conn.simple_query("SELECT 1").await?.into_row().await?;
        }

        info!(
            "Connected to MSSQL: {} (pool_size={})",
            config.target(),
            config.pool_size
        );

        Ok(Self {
            pool,
            config: config.clone(),
        })
    }

    /// Take a session for one resequencing operation.
    pub async fn store(&self) -> Result<MssqlStore> {
        let conn = self
            .pool
            .get_owned()
            .await
            .map_err(|e| ResequenceError::pool(e, "getting MSSQL connection from pool"))?;
        Ok(MssqlStore::new(conn, self.config.target()))
    }

    /// Run `SELECT 1` and return the round trip in milliseconds.
    pub async fn health_check(&self) -> Result<u64> {
        let started = std::time::Instant::now();
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| ResequenceError::pool(e, "health check"))?;
        conn.simple_query("SELECT 1").await?.into_row().await?;
        Ok(started.elapsed().as_millis() as u64)
    }

    /// `host:port/database`.
    pub fn target(&self) -> String {
        self.config.target()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection() -> ConnectionConfig {
        crate::config::Config::from_yaml(
            "connection:\n  host: db.internal\n  port: 14330\n  database: inventory\n  user: sa\n  password: secret\n",
        )
        .unwrap()
        .connection
    }

    #[test]
    fn test_build_config_targets_configured_host() {
        let manager = TiberiusConnectionManager::new(connection());
        assert_eq!(manager.build_config().get_addr(), "db.internal:14330");
    }
}
