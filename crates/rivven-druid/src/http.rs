//! Druid SQL HTTP transport
//!
//! Implements the [`connection`](crate::connection) traits over Druid's SQL
//! API (`POST /druid/v2/sql`). Results are requested as `arrayLines`: one
//! JSON array per line, terminated by a blank trailer line, which lets a
//! truncated response be told apart from a complete one.
//!
//! Metadata is probed by wrapping the query in `LIMIT 0` and requesting the
//! name, Druid type and SQL type header rows.
//!
//! Every query carries a `sqlQueryId` so that an abandoned result can be
//! cancelled with `DELETE /druid/v2/sql/{id}`.

use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};
use url::Url;

use crate::config::SensitiveString;
use crate::connection::{
    Connection, ConnectionConfig, ConnectionFactory, NativeRow, PreparedStatement, RowStream,
};
use crate::error::{Error, Result};
use crate::query::metadata_probe_sql;
use crate::types::ColumnMetadata;

/// Path of the SQL endpoint
pub const SQL_PATH: &str = "/druid/v2/sql";

/// Path of the health endpoint
pub const HEALTH_PATH: &str = "/status/health";

const AVATICA_PREFIX: &str = "jdbc:avatica:remote:";

/// Maximum error response body size to read
const MAX_ERROR_BODY_BYTES: usize = 4096;

const RESULT_FORMAT: &str = "arrayLines";

/// A Druid broker or router location
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DruidEndpoint {
    base: String,
}

impl DruidEndpoint {
    /// Parse an endpoint from `http(s)://host:port[/prefix]` or an Avatica
    /// JDBC URL such as
    /// `jdbc:avatica:remote:url=http://host:8082/druid/v2/sql/avatica/`.
    ///
    /// A trailing SQL or Avatica path is removed so both forms address the
    /// same server.
    pub fn parse(url: &str) -> Result<Self> {
        let url = url.trim();
        let http_url = match url.strip_prefix(AVATICA_PREFIX) {
            Some(properties) => properties
                .split(';')
                .filter_map(|p| p.split_once('='))
                .find(|(key, _)| key.trim().eq_ignore_ascii_case("url"))
                .map(|(_, value)| value.trim())
                .ok_or_else(|| Error::config(format!("Avatica URL has no url property: {url}")))?,
            None => url,
        };

        let mut parsed = Url::parse(http_url)
            .map_err(|e| Error::config(format!("invalid Druid URL '{http_url}': {e}")))?;

        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(Error::config(format!(
                "unsupported URL scheme '{}', expected http or https",
                parsed.scheme()
            )));
        }
        if parsed.host_str().is_none() {
            return Err(Error::config(format!("Druid URL has no host: {http_url}")));
        }

        let mut path = parsed.path().trim_end_matches('/').to_string();
        for suffix in ["/druid/v2/sql/avatica-protobuf", "/druid/v2/sql/avatica", SQL_PATH] {
            if let Some(prefix) = path.strip_suffix(suffix) {
                path = prefix.to_string();
                break;
            }
        }
        parsed.set_path(&path);
        parsed.set_query(None);
        parsed.set_fragment(None);

        Ok(Self {
            base: parsed.as_str().trim_end_matches('/').to_string(),
        })
    }

    /// Base URL without trailing slash
    pub fn base_url(&self) -> &str {
        &self.base
    }

    /// SQL endpoint URL
    pub fn sql_url(&self) -> String {
        format!("{}{}", self.base, SQL_PATH)
    }

    /// Health endpoint URL
    pub fn health_url(&self) -> String {
        format!("{}{}", self.base, HEALTH_PATH)
    }

    /// Cancellation URL of a running query
    pub fn cancel_url(&self, query_id: &str) -> String {
        format!("{}{}/{}", self.base, SQL_PATH, query_id)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SqlRequest<'a> {
    query: &'a str,
    result_format: &'static str,
    header: bool,
    types_header: bool,
    sql_types_header: bool,
    context: serde_json::Map<String, serde_json::Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DruidErrorResponse {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    error_class: Option<String>,
}

/// Connection factory for the Druid SQL HTTP API
#[derive(Debug, Clone, Default)]
pub struct DruidHttpConnectionFactory;

impl DruidHttpConnectionFactory {
    /// Create a new factory
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ConnectionFactory for DruidHttpConnectionFactory {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Connection>> {
        let endpoint = DruidEndpoint::parse(&config.url)?;

        if endpoint.base_url().starts_with("http://") && config.password.is_some() {
            warn!(
                url = %endpoint.base_url(),
                "Druid URL uses plain HTTP; credentials will be sent in cleartext"
            );
        }

        let mut builder = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .pool_max_idle_per_host(0);
        if config.query_timeout_ms > 0 {
            builder = builder.timeout(Duration::from_millis(config.query_timeout_ms));
        }
        let client = builder
            .build()
            .map_err(|e| Error::connection_with_source("failed to build HTTP client", e))?;

        let session = HttpSession {
            client,
            endpoint,
            username: config.username.clone(),
            password: config.password.clone(),
            context: query_context(config),
        };
        session.check_health().await?;

        debug!(url = %session.endpoint.base_url(), "Connected to Druid");

        Ok(Box::new(HttpConnection {
            session: Arc::new(session),
            closed: AtomicBool::new(false),
        }))
    }

    fn name(&self) -> &str {
        "druid-http"
    }
}

fn query_context(config: &ConnectionConfig) -> serde_json::Map<String, serde_json::Value> {
    let mut context: serde_json::Map<String, serde_json::Value> = config
        .properties
        .iter()
        .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
        .collect();

    if config.query_timeout_ms > 0 && !context.contains_key("timeout") {
        context.insert("timeout".into(), config.query_timeout_ms.into());
    }
    context
}

/// State shared by a connection and everything it creates
struct HttpSession {
    client: reqwest::Client,
    endpoint: DruidEndpoint,
    username: Option<String>,
    password: Option<SensitiveString>,
    context: serde_json::Map<String, serde_json::Value>,
}

impl HttpSession {
    fn auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.username {
            Some(ref user) => builder.basic_auth(
                user,
                self.password.as_ref().map(|p| p.expose_secret().to_string()),
            ),
            None => builder,
        }
    }

    async fn check_health(&self) -> Result<()> {
        let response = self
            .auth(self.client.get(self.endpoint.health_url()))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let message = format!(
            "Druid health check at {} returned {}",
            self.endpoint.base_url(),
            status
        );
        match status.as_u16() {
            401 | 403 => Err(Error::authentication(message)),
            _ => Err(Error::connection(message)),
        }
    }

    /// Submit a query and return the response once its status is known
    async fn submit(&self, sql: &str, query_id: &str, headers: bool) -> Result<reqwest::Response> {
        let mut context = self.context.clone();
        context.insert("sqlQueryId".into(), query_id.into());

        let request = SqlRequest {
            query: sql,
            result_format: RESULT_FORMAT,
            header: headers,
            types_header: headers,
            sql_types_header: headers,
            context,
        };

        debug!(query_id = %query_id, sql = %sql, "Submitting Druid SQL query");

        let response = self
            .auth(self.client.post(self.endpoint.sql_url()))
            .json(&request)
            .send()
            .await
            .map_err(|e| match Error::from(e) {
                Error::Query { message, .. } => Error::query_with_sql(message, sql),
                other => other,
            })?;

        if !response.status().is_success() {
            return Err(parse_error_response(response, sql).await);
        }
        Ok(response)
    }

    fn cancel_request(&self, query_id: &str) -> reqwest::RequestBuilder {
        self.auth(self.client.delete(self.endpoint.cancel_url(query_id)))
    }

    async fn cancel(&self, query_id: &str) {
        match self.cancel_request(query_id).send().await {
            Ok(response) => trace!(
                query_id = %query_id,
                status = %response.status(),
                "Druid query cancellation sent"
            ),
            Err(e) => debug!(query_id = %query_id, error = %e, "Druid query cancellation failed"),
        }
    }
}

async fn parse_error_response(mut response: reqwest::Response, sql: &str) -> Error {
    let status = response.status();

    // Stop reading once the limit is reached; the rest of the body is dropped
    let mut body = Vec::new();
    while body.len() < MAX_ERROR_BODY_BYTES {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                let take = chunk.len().min(MAX_ERROR_BODY_BYTES - body.len());
                body.extend_from_slice(&chunk[..take]);
            }
            Ok(None) | Err(_) => break,
        }
    }
    let body = String::from_utf8_lossy(&body).into_owned();

    let message = match serde_json::from_str::<DruidErrorResponse>(&body) {
        Ok(err) => {
            let mut message = err
                .error_message
                .or(err.error)
                .unwrap_or_else(|| body.clone());
            if let Some(class) = err.error_class {
                message = format!("{message} ({class})");
            }
            truncate(message)
        }
        Err(_) => body,
    };

    let message = format!("Druid returned {status}: {message}");
    match status.as_u16() {
        401 | 403 => Error::authentication(message),
        429 | 503 => Error::connection(message),
        504 => Error::timeout(message),
        _ => Error::query_with_sql(message, sql),
    }
}

fn truncate(mut s: String) -> String {
    if s.len() > MAX_ERROR_BODY_BYTES {
        let mut end = MAX_ERROR_BODY_BYTES;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        s.truncate(end);
    }
    s
}

/// A connection to a Druid broker
pub struct HttpConnection {
    session: Arc<HttpSession>,
    closed: AtomicBool,
}

#[async_trait]
impl Connection for HttpConnection {
    async fn prepare(&self, sql: &str) -> Result<Box<dyn PreparedStatement>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::connection("connection is closed"));
        }
        Ok(Box::new(HttpPreparedStatement {
            session: Arc::clone(&self.session),
            sql: sql.to_string(),
        }))
    }

    async fn is_valid(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && self.session.check_health().await.is_ok()
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// A statement bound to one SQL string
pub struct HttpPreparedStatement {
    session: Arc<HttpSession>,
    sql: String,
}

#[async_trait]
impl PreparedStatement for HttpPreparedStatement {
    async fn metadata(&self) -> Result<Vec<ColumnMetadata>> {
        let probe = metadata_probe_sql(&self.sql);
        let query_id = uuid::Uuid::new_v4().to_string();
        let response = self.session.submit(&probe, &query_id, true).await?;

        let body = response
            .bytes()
            .await
            .map_err(|e| Error::read("failed to read Druid metadata response", e))?;

        let mut decoder = ArrayLinesDecoder::new();
        decoder.push(&body);

        let mut headers = Vec::with_capacity(3);
        while let Some(line) = decoder.next_line()? {
            match line {
                Line::Row(row) => headers.push(row),
                Line::Trailer => break,
            }
        }
        if !decoder.is_finished() {
            return Err(Error::read_msg("Druid metadata response was truncated"));
        }

        columns_from_headers(headers)
    }

    async fn execute_query(&self) -> Result<Box<dyn RowStream>> {
        let query_id = uuid::Uuid::new_v4().to_string();
        let response = self.session.submit(&self.sql, &query_id, false).await?;

        Ok(Box::new(HttpRowStream {
            session: Arc::clone(&self.session),
            response: Some(response),
            decoder: ArrayLinesDecoder::new(),
            query_id,
        }))
    }

    fn sql(&self) -> &str {
        &self.sql
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

fn columns_from_headers(headers: Vec<NativeRow>) -> Result<Vec<ColumnMetadata>> {
    let [names, druid_types, sql_types]: [NativeRow; 3] = headers.try_into().map_err(|h: Vec<_>| {
        Error::schema(format!(
            "expected 3 header rows in Druid metadata response, got {}",
            h.len()
        ))
    })?;

    if names.len() != druid_types.len() || names.len() != sql_types.len() {
        return Err(Error::schema("Druid header rows have different lengths"));
    }

    names
        .into_iter()
        .zip(druid_types)
        .zip(sql_types)
        .enumerate()
        .map(|(i, ((name, druid_type), sql_type))| {
            let (Some(name), Some(sql_type)) = (name.as_str(), sql_type.as_str()) else {
                return Err(Error::schema(format!("malformed header for column {}", i + 1)));
            };
            let mut column = ColumnMetadata::new(name, sql_type).with_ordinal(i as u32 + 1);
            if let Some(druid_type) = druid_type.as_str() {
                column = column.with_native_type(druid_type);
            }
            Ok(column)
        })
        .collect()
}

/// Streams rows of a running query
pub struct HttpRowStream {
    session: Arc<HttpSession>,
    response: Option<reqwest::Response>,
    decoder: ArrayLinesDecoder,
    query_id: String,
}

impl HttpRowStream {
    fn is_complete(&self) -> bool {
        self.decoder.is_finished()
    }

    async fn next_line(&mut self) -> Result<Option<Line>> {
        loop {
            if let Some(line) = self.decoder.next_line()? {
                return Ok(Some(line));
            }
            let Some(response) = self.response.as_mut() else {
                return Ok(None);
            };
            match response
                .chunk()
                .await
                .map_err(|e| Error::read("failed to read Druid response", e))?
            {
                Some(chunk) => self.decoder.push(&chunk),
                None => {
                    self.response = None;
                }
            }
        }
    }
}

#[async_trait]
impl RowStream for HttpRowStream {
    async fn next(&mut self) -> Result<Option<NativeRow>> {
        if self.is_complete() {
            return Ok(None);
        }
        match self.next_line().await? {
            Some(Line::Row(row)) => Ok(Some(row)),
            Some(Line::Trailer) => {
                self.response = None;
                trace!(query_id = %self.query_id, "Druid result complete");
                Ok(None)
            }
            None => Err(Error::read_msg(format!(
                "Druid response for query {} ended before its trailer",
                self.query_id
            ))),
        }
    }

    async fn close(&mut self) -> Result<()> {
        if self.response.take().is_some() && !self.is_complete() {
            self.session.cancel(&self.query_id).await;
        }
        Ok(())
    }
}

impl Drop for HttpRowStream {
    fn drop(&mut self) {
        if self.response.is_none() || self.is_complete() {
            return;
        }
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let request = self.session.cancel_request(&self.query_id);
            handle.spawn(async move {
                let _ = request.send().await;
            });
        }
    }
}

/// One decoded `arrayLines` line
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Line {
    Row(NativeRow),
    Trailer,
}

/// Incremental decoder for the `arrayLines` result format
#[derive(Debug, Default)]
pub(crate) struct ArrayLinesDecoder {
    buffer: BytesMut,
    /// Prefix of `buffer` known to hold no newline
    scanned: usize,
    finished: bool,
}

impl ArrayLinesDecoder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, chunk: &[u8]) {
        if !self.finished {
            self.buffer.extend_from_slice(chunk);
        }
    }

    /// Whether the trailer has been seen
    pub(crate) fn is_finished(&self) -> bool {
        self.finished
    }

    /// Next complete line, `None` if more input is needed or the trailer
    /// has already been returned
    pub(crate) fn next_line(&mut self) -> Result<Option<Line>> {
        if self.finished {
            return Ok(None);
        }
        let Some(offset) = self.buffer[self.scanned..].iter().position(|b| *b == b'\n') else {
            self.scanned = self.buffer.len();
            return Ok(None);
        };
        let pos = self.scanned + offset;
        self.scanned = 0;

        let line = self.buffer.split_to(pos);
        self.buffer.advance(1);
        let line = line.strip_suffix(b"\r").unwrap_or(&line[..]);

        if line.iter().all(u8::is_ascii_whitespace) {
            self.finished = true;
            self.buffer.clear();
            return Ok(Some(Line::Trailer));
        }

        let row: NativeRow = serde_json::from_slice(line)
            .map_err(|e| Error::read("malformed line in Druid response", e))?;
        Ok(Some(Line::Row(row)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_endpoint_plain_url() {
        let endpoint = DruidEndpoint::parse("http://broker:8082").unwrap();
        assert_eq!(endpoint.base_url(), "http://broker:8082");
        assert_eq!(endpoint.sql_url(), "http://broker:8082/druid/v2/sql");
        assert_eq!(endpoint.health_url(), "http://broker:8082/status/health");
        assert_eq!(
            endpoint.cancel_url("abc"),
            "http://broker:8082/druid/v2/sql/abc"
        );
    }

    #[test]
    fn test_endpoint_avatica_url() {
        let endpoint = DruidEndpoint::parse(
            "jdbc:avatica:remote:url=http://broker:8082/druid/v2/sql/avatica/;transparent_reconnection=true",
        )
        .unwrap();
        assert_eq!(endpoint.base_url(), "http://broker:8082");
    }

    #[test]
    fn test_endpoint_strips_sql_path_and_keeps_prefix() {
        assert_eq!(
            DruidEndpoint::parse("https://proxy.example.com/druid-a/druid/v2/sql/")
                .unwrap()
                .sql_url(),
            "https://proxy.example.com/druid-a/druid/v2/sql"
        );
    }

    #[test]
    fn test_endpoint_rejects_invalid() {
        assert!(DruidEndpoint::parse("broker:8082").is_err());
        assert!(DruidEndpoint::parse("ftp://broker:8082").is_err());
        assert!(DruidEndpoint::parse("jdbc:avatica:remote:serialization=json").is_err());
    }

    #[test]
    fn test_decoder_rows_and_trailer() {
        let mut decoder = ArrayLinesDecoder::new();
        decoder.push(b"[\"Main\",3]\n[null,4]\n\n");

        assert_eq!(
            decoder.next_line().unwrap(),
            Some(Line::Row(vec![json!("Main"), json!(3)]))
        );
        assert_eq!(
            decoder.next_line().unwrap(),
            Some(Line::Row(vec![json!(null), json!(4)]))
        );
        assert_eq!(decoder.next_line().unwrap(), Some(Line::Trailer));
        assert!(decoder.is_finished());
        assert_eq!(decoder.next_line().unwrap(), None);
    }

    #[test]
    fn test_decoder_split_chunks() {
        let mut decoder = ArrayLinesDecoder::new();
        decoder.push(b"[1,");
        assert_eq!(decoder.next_line().unwrap(), None);
        decoder.push(b"2]\r\n");
        assert_eq!(
            decoder.next_line().unwrap(),
            Some(Line::Row(vec![json!(1), json!(2)]))
        );
        assert_eq!(decoder.next_line().unwrap(), None);
        assert!(!decoder.is_finished());
        decoder.push(b"\n");
        assert_eq!(decoder.next_line().unwrap(), Some(Line::Trailer));
    }

    #[test]
    fn test_decoder_malformed_line() {
        let mut decoder = ArrayLinesDecoder::new();
        decoder.push(b"{\"not\":\"an array\"}\n");
        let err = decoder.next_line().unwrap_err();
        assert!(matches!(err, Error::Read { .. }));
    }

    #[test]
    fn test_decoder_long_line_in_small_chunks() {
        let page = "x".repeat(10_000);
        let input = format!("[\"{page}\",1]\n[\"b\",2]\n\n");
        let mut decoder = ArrayLinesDecoder::new();

        let first_newline = input.find('\n').unwrap();
        for byte in input[..first_newline].bytes() {
            decoder.push(&[byte]);
            assert_eq!(decoder.next_line().unwrap(), None);
            assert_eq!(decoder.scanned, decoder.buffer.len());
        }

        decoder.push(input[first_newline..].as_bytes());
        assert_eq!(
            decoder.next_line().unwrap(),
            Some(Line::Row(vec![json!(page), json!(1)]))
        );
        assert_eq!(decoder.scanned, 0);
        assert_eq!(
            decoder.next_line().unwrap(),
            Some(Line::Row(vec![json!("b"), json!(2)]))
        );
        assert_eq!(decoder.next_line().unwrap(), Some(Line::Trailer));
    }

    #[test]
    fn test_columns_from_headers() {
        let columns = columns_from_headers(vec![
            vec![json!("__time"), json!("page")],
            vec![json!("LONG"), json!("STRING")],
            vec![json!("TIMESTAMP"), json!("VARCHAR")],
        ])
        .unwrap();

        assert_eq!(columns.len(), 2);
        assert_eq!(columns[0].name, "__time");
        assert_eq!(columns[0].type_name, "TIMESTAMP");
        assert_eq!(columns[0].native_type.as_deref(), Some("LONG"));
        assert_eq!(columns[1].ordinal, 2);
    }

    #[test]
    fn test_columns_from_missing_headers() {
        let err = columns_from_headers(vec![vec![json!("page")]]).unwrap_err();
        assert!(matches!(err, Error::Schema { .. }));
    }

    #[test]
    fn test_query_context_timeout() {
        let config = ConnectionConfig::new("http://broker:8082")
            .with_query_timeout(5000)
            .with_property("priority", "10");
        let context = query_context(&config);
        assert_eq!(context.get("timeout"), Some(&json!(5000)));
        assert_eq!(context.get("priority"), Some(&json!("10")));

        let config = ConnectionConfig::new("http://broker:8082")
            .with_query_timeout(5000)
            .with_property("timeout", "1000");
        assert_eq!(query_context(&config).get("timeout"), Some(&json!("1000")));
    }

    #[test]
    fn test_truncate_on_char_boundary() {
        let long = "é".repeat(MAX_ERROR_BODY_BYTES);
        let truncated = truncate(long);
        assert!(truncated.len() <= MAX_ERROR_BODY_BYTES);
    }
}
