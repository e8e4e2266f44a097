//! Connection parameters for the Druid source
//!
//! # Example
//!
//! ```yaml
//! url: "jdbc:avatica:remote:url=http://localhost:8082/druid/v2/sql/avatica/"
//! datasource: wikipedia
//! columns: [__time, page, added]
//! start_timestamp: "2023-01-01T00:00:00Z"
//! end_timestamp: "2023-01-02T00:00:00Z"
//! username: ${DRUID_USER:-admin}
//! password: ${DRUID_PASSWORD}
//! ```

use schemars::JsonSchema;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;
use validator::Validate;

use crate::connection::ConnectionConfig;
use crate::error::{Error, Result};

/// Pre-compiled regex for environment variable expansion
/// Pattern: ${VAR} or ${VAR:-default}
static ENV_VAR_REGEX: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"\$\{([a-zA-Z_][a-zA-Z0-9_]*)(?::-([^}]*))?\}")
        .expect("env var regex pattern is invalid - this is a bug")
});

/// A string that is redacted when printed or serialized (passwords)
#[derive(Clone)]
pub struct SensitiveString(SecretString);

impl SensitiveString {
    /// Create a new sensitive string
    pub fn new(value: impl Into<String>) -> Self {
        Self(SecretString::new(value.into().into_boxed_str()))
    }

    /// Expose the secret value.
    ///
    /// Use sparingly - only when the actual value is needed (authentication).
    pub fn expose_secret(&self) -> &str {
        self.0.expose_secret()
    }
}

impl std::fmt::Debug for SensitiveString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl From<&str> for SensitiveString {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for SensitiveString {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Serialize as redacted to prevent accidental exposure in config dumps/logs
impl Serialize for SensitiveString {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str("***REDACTED***")
    }
}

impl<'de> Deserialize<'de> for SensitiveString {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Ok(Self::new(value))
    }
}

impl JsonSchema for SensitiveString {
    fn schema_name() -> String {
        "SensitiveString".to_string()
    }

    fn json_schema(gen: &mut schemars::gen::SchemaGenerator) -> schemars::schema::Schema {
        let mut schema = gen.subschema_for::<String>();
        if let schemars::schema::Schema::Object(obj) = &mut schema {
            obj.format = Some("password".to_string());
        }
        schema
    }
}

/// Druid source configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate, JsonSchema)]
pub struct DruidSourceConfig {
    /// Broker/router endpoint: `http(s)://host:port` or an Avatica JDBC URL
    #[validate(length(min = 1))]
    pub url: String,

    /// Datasource (table) to read from
    #[validate(length(min = 1, max = 255))]
    pub datasource: String,

    /// Columns to select (None or empty = all)
    #[serde(default)]
    pub columns: Option<Vec<String>>,

    /// Inclusive lower bound on `__time`
    #[serde(default)]
    pub start_timestamp: Option<String>,

    /// Exclusive upper bound on `__time`
    #[serde(default)]
    pub end_timestamp: Option<String>,

    /// Basic auth user
    #[serde(default)]
    pub username: Option<String>,

    /// Basic auth password
    #[serde(default)]
    pub password: Option<SensitiveString>,

    /// Connection timeout in milliseconds (default: 10000)
    #[serde(default = "default_connect_timeout_ms")]
    #[validate(range(min = 1))]
    pub connect_timeout_ms: u64,

    /// Query timeout in milliseconds (default: 0 = none)
    #[serde(default)]
    pub query_timeout_ms: u64,

    /// Extra Druid query context entries
    #[serde(default)]
    pub context: HashMap<String, String>,
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

impl DruidSourceConfig {
    /// Create configuration for a datasource
    pub fn new(url: impl Into<String>, datasource: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            datasource: datasource.into(),
            columns: None,
            start_timestamp: None,
            end_timestamp: None,
            username: None,
            password: None,
            connect_timeout_ms: default_connect_timeout_ms(),
            query_timeout_ms: 0,
            context: HashMap::new(),
        }
    }

    /// Set the column allow-list
    pub fn with_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    /// Set the inclusive start bound
    pub fn with_start_timestamp(mut self, ts: impl Into<String>) -> Self {
        self.start_timestamp = Some(ts.into());
        self
    }

    /// Set the exclusive end bound
    pub fn with_end_timestamp(mut self, ts: impl Into<String>) -> Self {
        self.end_timestamp = Some(ts.into());
        self
    }

    /// Set basic auth credentials
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<SensitiveString>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Set the query timeout
    pub fn with_query_timeout(mut self, ms: u64) -> Self {
        self.query_timeout_ms = ms;
        self
    }

    /// Add a query context entry
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Load configuration from a YAML file, expanding `${VAR}` references
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML text, expanding `${VAR}` references
    pub fn from_yaml(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);
        let config: Self = serde_yaml::from_str(&expanded)
            .map_err(|e| Error::config(format!("Failed to parse config: {}", e)))?;
        config.validate_config()?;
        Ok(config)
    }

    /// Run field validation plus cross-field checks
    pub fn validate_config(&self) -> Result<()> {
        self.validate()
            .map_err(|e| Error::config(format!("config validation failed: {}", e)))?;

        if self.password.is_some() && self.username.is_none() {
            return Err(Error::config("'password' requires 'username'"));
        }

        Ok(())
    }

    /// Column allow-list, `None` when all columns are selected
    pub fn selected_columns(&self) -> Option<&[String]> {
        self.columns.as_deref().filter(|c| !c.is_empty())
    }

    /// Derive the transport-level connection configuration
    pub fn connection_config(&self) -> ConnectionConfig {
        let mut config = ConnectionConfig::new(&self.url)
            .with_connect_timeout(self.connect_timeout_ms)
            .with_query_timeout(self.query_timeout_ms);

        if let Some(ref user) = self.username {
            config = config.with_credentials(user.clone(), self.password.clone());
        }

        for (key, value) in &self.context {
            config = config.with_property(key.clone(), value.clone());
        }

        config
    }
}

/// Expand environment variables in the format ${VAR} or ${VAR:-default}
fn expand_env_vars(content: &str) -> String {
    ENV_VAR_REGEX
        .replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default = caps.get(2).map(|m| m.as_str());

            std::env::var(var_name).unwrap_or_else(|_| default.unwrap_or("").to_string())
        })
        .to_string()
}
