//! Connection traits for rivven-druid
//!
//! Core abstractions for reaching a SQL store:
//! - Connection: a session that prepares statements
//! - PreparedStatement: metadata probing and execution of one query
//! - RowStream: forward-only iteration over native result rows
//! - ConnectionFactory: opens fresh connections from configuration
//!
//! [`crate::http`] implements these over the Druid SQL HTTP API and
//! [`crate::testing`] provides a scripted in-memory implementation.

use async_trait::async_trait;
use std::collections::HashMap;

use crate::config::SensitiveString;
use crate::error::Result;
use crate::types::ColumnMetadata;

/// One result row as native wire values, in column order
pub type NativeRow = Vec<serde_json::Value>;

/// A connection to the store
#[async_trait]
pub trait Connection: Send + Sync {
    /// Prepare a forward-only, read-only statement
    async fn prepare(&self, sql: &str) -> Result<Box<dyn PreparedStatement>>;

    /// Check if connection is valid/alive
    async fn is_valid(&self) -> bool;

    /// Close the connection
    async fn close(&self) -> Result<()>;
}

/// A prepared statement
#[async_trait]
pub trait PreparedStatement: Send + Sync {
    /// Column metadata of the statement's result, without fetching data rows
    async fn metadata(&self) -> Result<Vec<ColumnMetadata>>;

    /// Execute the statement and stream its rows
    async fn execute_query(&self) -> Result<Box<dyn RowStream>>;

    /// Get the SQL string
    fn sql(&self) -> &str;

    /// Release the statement
    async fn close(&self) -> Result<()>;
}

/// Forward-only row iterator
#[async_trait]
pub trait RowStream: Send {
    /// Advance to the next row, `None` once the result is exhausted
    async fn next(&mut self) -> Result<Option<NativeRow>>;

    /// Release the result, abandoning any unread rows
    async fn close(&mut self) -> Result<()>;
}

/// Factory for creating connections
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    /// Open a new connection
    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Connection>>;

    /// Name of the backing store, for logs
    fn name(&self) -> &str;
}

/// Configuration for creating connections
#[derive(Clone)]
pub struct ConnectionConfig {
    /// Connection URL
    pub url: String,
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Query timeout in milliseconds (0 = no timeout)
    pub query_timeout_ms: u64,
    /// Basic auth user
    pub username: Option<String>,
    /// Basic auth password
    pub password: Option<SensitiveString>,
    /// Additional connection properties (sent as query context)
    pub properties: HashMap<String, String>,
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Redact credentials from the URL to prevent leaking passwords to logs.
        let redacted_url = match url::Url::parse(&self.url) {
            Ok(mut parsed) => {
                if parsed.password().is_some() {
                    let _ = parsed.set_password(Some("***"));
                }
                parsed.to_string()
            }
            Err(_) => self.url.clone(),
        };

        f.debug_struct("ConnectionConfig")
            .field("url", &redacted_url)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .field("query_timeout_ms", &self.query_timeout_ms)
            .field("username", &self.username)
            .field("password", &self.password)
            .field("properties", &self.properties)
            .finish()
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            connect_timeout_ms: 10_000,
            query_timeout_ms: 0,
            username: None,
            password: None,
            properties: HashMap::new(),
        }
    }
}

impl ConnectionConfig {
    /// Create configuration with just a URL
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Set connection timeout
    pub fn with_connect_timeout(mut self, ms: u64) -> Self {
        self.connect_timeout_ms = ms;
        self
    }

    /// Set query timeout
    pub fn with_query_timeout(mut self, ms: u64) -> Self {
        self.query_timeout_ms = ms;
        self
    }

    /// Set basic auth credentials
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: Option<SensitiveString>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = password;
        self
    }

    /// Add a connection property
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}
