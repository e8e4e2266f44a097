//! Testing utilities
//!
//! A scripted in-memory [`ConnectionFactory`] for exercising the cursor
//! without a Druid cluster.
//!
//! # Example
//!
//! ```rust
//! use rivven_druid::testing::MockConnectionFactory;
//! use serde_json::json;
//!
//! let factory = MockConnectionFactory::new()
//!     .with_column("page", "VARCHAR")
//!     .with_column("added", "BIGINT")
//!     .with_rows(vec![vec![json!("Main"), json!(3)]]);
//!
//! assert_eq!(factory.connect_count(), 0);
//! ```

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::connection::{
    Connection, ConnectionConfig, ConnectionFactory, NativeRow, PreparedStatement, RowStream,
};
use crate::error::{Error, Result};
use crate::types::ColumnMetadata;

#[derive(Debug, Default)]
struct MockState {
    columns: Vec<ColumnMetadata>,
    rows: Vec<NativeRow>,
    fail_connect: Option<String>,
    fail_metadata: Option<String>,
    fail_execute: Option<String>,
    fail_stream_after: Option<usize>,
    fail_close: bool,
    connects: usize,
    connection_closes: usize,
    statement_closes: usize,
    stream_closes: usize,
    prepared: Vec<String>,
    executed: Vec<String>,
}

/// A connection factory that serves scripted metadata and rows
#[derive(Debug, Clone, Default)]
pub struct MockConnectionFactory {
    state: Arc<Mutex<MockState>>,
}

impl MockConnectionFactory {
    /// Create a factory with no columns and no rows
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a result column
    pub fn with_column(self, name: impl Into<String>, type_name: impl Into<String>) -> Self {
        {
            let mut state = self.state.lock();
            let ordinal = state.columns.len() as u32 + 1;
            state
                .columns
                .push(ColumnMetadata::new(name, type_name).with_ordinal(ordinal));
        }
        self
    }

    /// Set the rows every execution returns
    pub fn with_rows(self, rows: Vec<NativeRow>) -> Self {
        self.state.lock().rows = rows;
        self
    }

    /// Make `connect` fail
    pub fn fail_connect(self, message: impl Into<String>) -> Self {
        self.state.lock().fail_connect = Some(message.into());
        self
    }

    /// Make statement metadata fail
    pub fn fail_metadata(self, message: impl Into<String>) -> Self {
        self.state.lock().fail_metadata = Some(message.into());
        self
    }

    /// Make statement execution fail
    pub fn fail_execute(self, message: impl Into<String>) -> Self {
        self.state.lock().fail_execute = Some(message.into());
        self
    }

    /// Make the row stream fail after yielding `rows` rows
    pub fn fail_stream_after(self, rows: usize) -> Self {
        self.state.lock().fail_stream_after = Some(rows);
        self
    }

    /// Make every close call fail (after counting it)
    pub fn fail_close(self) -> Self {
        self.state.lock().fail_close = true;
        self
    }

    /// Replace the scripted rows (affects later executions)
    pub fn set_rows(&self, rows: Vec<NativeRow>) {
        self.state.lock().rows = rows;
    }

    /// Number of connections opened
    pub fn connect_count(&self) -> usize {
        self.state.lock().connects
    }

    /// Connections opened and not yet closed
    pub fn open_connections(&self) -> usize {
        let state = self.state.lock();
        state.connects - state.connection_closes
    }

    /// Number of statement closes
    pub fn statement_closes(&self) -> usize {
        self.state.lock().statement_closes
    }

    /// Number of row stream closes
    pub fn stream_closes(&self) -> usize {
        self.state.lock().stream_closes
    }

    /// SQL of every prepared statement, in order
    pub fn prepared_queries(&self) -> Vec<String> {
        self.state.lock().prepared.clone()
    }

    /// SQL of every executed statement, in order
    pub fn executed_queries(&self) -> Vec<String> {
        self.state.lock().executed.clone()
    }
}

#[async_trait]
impl ConnectionFactory for MockConnectionFactory {
    async fn connect(&self, _config: &ConnectionConfig) -> Result<Box<dyn Connection>> {
        let mut state = self.state.lock();
        if let Some(ref message) = state.fail_connect {
            return Err(Error::connection(message.clone()));
        }
        state.connects += 1;
        Ok(Box::new(MockConnection {
            state: Arc::clone(&self.state),
            closed: AtomicBool::new(false),
        }))
    }

    fn name(&self) -> &str {
        "mock"
    }
}

struct MockConnection {
    state: Arc<Mutex<MockState>>,
    closed: AtomicBool,
}

#[async_trait]
impl Connection for MockConnection {
    async fn prepare(&self, sql: &str) -> Result<Box<dyn PreparedStatement>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::connection("connection is closed"));
        }
        self.state.lock().prepared.push(sql.to_string());
        Ok(Box::new(MockStatement {
            state: Arc::clone(&self.state),
            sql: sql.to_string(),
        }))
    }

    async fn is_valid(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let mut state = self.state.lock();
        state.connection_closes += 1;
        if state.fail_close {
            return Err(Error::connection("mock connection close failure"));
        }
        Ok(())
    }
}

struct MockStatement {
    state: Arc<Mutex<MockState>>,
    sql: String,
}

#[async_trait]
impl PreparedStatement for MockStatement {
    async fn metadata(&self) -> Result<Vec<ColumnMetadata>> {
        let state = self.state.lock();
        match state.fail_metadata {
            Some(ref message) => Err(Error::query_with_sql(message.clone(), self.sql.clone())),
            None => Ok(state.columns.clone()),
        }
    }

    async fn execute_query(&self) -> Result<Box<dyn RowStream>> {
        let mut state = self.state.lock();
        if let Some(ref message) = state.fail_execute {
            return Err(Error::query_with_sql(message.clone(), self.sql.clone()));
        }
        state.executed.push(self.sql.clone());
        Ok(Box::new(MockRowStream {
            state: Arc::clone(&self.state),
            rows: state.rows.iter().cloned().collect(),
            yielded: 0,
            fail_after: state.fail_stream_after,
        }))
    }

    fn sql(&self) -> &str {
        &self.sql
    }

    async fn close(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.statement_closes += 1;
        if state.fail_close {
            return Err(Error::internal("mock statement close failure"));
        }
        Ok(())
    }
}

struct MockRowStream {
    state: Arc<Mutex<MockState>>,
    rows: VecDeque<NativeRow>,
    yielded: usize,
    fail_after: Option<usize>,
}

#[async_trait]
impl RowStream for MockRowStream {
    async fn next(&mut self) -> Result<Option<NativeRow>> {
        if self.fail_after == Some(self.yielded) {
            return Err(Error::connection("mock stream failure"));
        }
        let row = self.rows.pop_front();
        if row.is_some() {
            self.yielded += 1;
        }
        Ok(row)
    }

    async fn close(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        state.stream_closes += 1;
        if state.fail_close {
            return Err(Error::internal("mock result close failure"));
        }
        Ok(())
    }
}
