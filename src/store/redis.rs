//! Redis-backed store executor.
//!
//! Runs the policy evaluator as a Lua script, which Redis executes without
//! interleaving any other command. Works against a single node through a
//! [`ConnectionManager`] or against Redis Cluster through a
//! [`ClusterConnection`]; the evaluator only touches keys sharing one slot.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::{ConnectionLike, ConnectionManager};
use redis::cluster::ClusterClient;
use redis::cluster_async::ClusterConnection;
use redis::{AsyncCommands, Client, RedisResult, Script};
use tracing::{debug, info};

use super::{ScriptExecutor, StoreError};
use crate::config::RedisConfig;
use crate::ratelimit::EVALUATOR_SCRIPT;

/// Executor running the evaluator script over a Redis connection.
///
/// The connection is cloned per call; both connection types multiplex
/// requests over shared sockets.
pub struct RedisExecutor<C = ConnectionManager> {
    connection: C,
    script: Arc<Script>,
    response_timeout: Option<Duration>,
}

impl<C> RedisExecutor<C> {
    /// Wrap an established connection.
    pub fn new(connection: C) -> Self {
        Self {
            connection,
            script: Arc::new(Script::new(EVALUATOR_SCRIPT)),
            response_timeout: None,
        }
    }

    /// Fail operations that take longer than `timeout`.
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = Some(timeout);
        self
    }

    /// SHA1 of the evaluator script as Redis knows it.
    pub fn script_hash(&self) -> &str {
        self.script.get_hash()
    }
}

impl RedisExecutor<ConnectionManager> {
    /// Connect to a single Redis node.
    pub async fn connect(config: &RedisConfig) -> Result<Self, StoreError> {
        let client = Client::open(config.url.as_str())?;
        let connection = within(
            Some(config.connection_timeout()),
            client.get_connection_manager(),
        )
        .await?;

        info!(url = %config.url, "Connected to Redis");
        Ok(Self::new(connection).with_response_timeout(config.response_timeout()))
    }
}

impl RedisExecutor<ClusterConnection> {
    /// Connect to a Redis Cluster through its seed nodes.
    pub async fn connect_cluster(nodes: &[String]) -> Result<Self, StoreError> {
        let client = ClusterClient::new(nodes.to_vec())?;
        let connection = client.get_async_connection().await?;

        info!(nodes = ?nodes, "Connected to Redis Cluster");
        Ok(Self::new(connection))
    }
}

/// Await a Redis future, bounded by `timeout` when one is set.
async fn within<T, F>(timeout: Option<Duration>, fut: F) -> Result<T, StoreError>
where
    F: Future<Output = RedisResult<T>>,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| StoreError::Timeout(limit))?
            .map_err(StoreError::from),
        None => Ok(fut.await?),
    }
}

#[async_trait]
impl<C> ScriptExecutor for RedisExecutor<C>
where
    C: ConnectionLike + Clone + Send + Sync + 'static,
{
    async fn eval(&self, keys: &[String], args: &[i64]) -> Result<Vec<i64>, StoreError> {
        let mut conn = self.connection.clone();

        let mut invocation = self.script.prepare_invoke();
        for key in keys {
            invocation.key(key);
        }
        for arg in args {
            invocation.arg(*arg);
        }

        debug!(keys = ?keys, argc = args.len(), "Invoking evaluator script");

        // EVALSHA, loading the script first when the server answers NOSCRIPT.
        within(self.response_timeout, invocation.invoke_async(&mut conn)).await
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.connection.clone();
        within(self.response_timeout, conn.exists(key)).await
    }

    async fn del(&self, key: &str) -> Result<u64, StoreError> {
        let mut conn = self.connection.clone();
        within(self.response_timeout, conn.del(key)).await
    }

    async fn set_with_expiry(&self, key: &str, value: i64, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        within(self.response_timeout, conn.pset_ex(key, value, millis)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_hash_is_stable() {
        let a = Script::new(EVALUATOR_SCRIPT);
        let b = Script::new(EVALUATOR_SCRIPT);

        assert_eq!(a.get_hash(), b.get_hash());
        assert_eq!(a.get_hash().len(), 40);
    }

    #[tokio::test]
    async fn test_within_times_out() {
        let pending = std::future::pending::<RedisResult<()>>();

        let err = within(Some(Duration::from_millis(10)), pending)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Timeout(d) if d == Duration::from_millis(10)));
    }

    #[tokio::test]
    async fn test_within_passes_results_through() {
        let value = within(None, async { RedisResult::Ok(7_u64) }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_connect_refused_surfaces_store_error() {
        let config = RedisConfig {
            url: "redis://127.0.0.1:1".to_string(),
            response_timeout_ms: 100,
            connection_timeout_ms: 100,
        };

        let result = RedisExecutor::connect(&config).await;
        assert!(matches!(
            result,
            Err(StoreError::Redis(_)) | Err(StoreError::Timeout(_))
        ));
    }
}
