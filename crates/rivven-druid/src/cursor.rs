//! Record cursor over a Druid range query
//!
//! Lifecycle:
//!
//! ```text
//! unopened --open--> positioned | exhausted
//! positioned --next_record--> positioned | exhausted
//! any --close--> unopened
//! ```
//!
//! The row schema is probed once at construction and reused by every
//! `open`. Each probe and each `open` uses a fresh connection.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::coerce::coerce_value;
use crate::config::DruidSourceConfig;
use crate::connection::{
    Connection, ConnectionConfig, ConnectionFactory, NativeRow, PreparedStatement, RowStream,
};
use crate::error::{Error, Result};
use crate::mapping::{map_sql_type, TypeMapping};
use crate::query::QueryBuilder;
use crate::types::{ColumnMetadata, Field, Record, RowSchema};

/// Observable position of a cursor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorPosition {
    /// Not open (never opened, or closed)
    Unopened,
    /// Open and positioned on a row
    Positioned,
    /// Open with no rows left
    Exhausted,
}

enum CursorState {
    Unopened,
    Positioned(NativeRow),
    Exhausted,
}

/// Cursor statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CursorStats {
    /// Records returned by `next_record` across all opens
    pub records_read: u64,
    /// Successful `open` calls
    pub opens: u64,
}

/// Handles owned while the cursor is open, released together
struct QueryHandles {
    connection: Box<dyn Connection>,
    statement: Box<dyn PreparedStatement>,
    rows: Box<dyn RowStream>,
}

impl QueryHandles {
    async fn release(mut self) {
        if let Err(e) = self.rows.close().await {
            warn!(error = %e, "Druid result set couldn't be closed");
        }
        close_statement(self.statement.as_ref()).await;
        close_connection(self.connection.as_ref()).await;
    }
}

async fn close_statement(statement: &dyn PreparedStatement) {
    if let Err(e) = statement.close().await {
        warn!(error = %e, "Druid statement couldn't be closed");
    }
}

async fn close_connection(connection: &dyn Connection) {
    if let Err(e) = connection.close().await {
        warn!(error = %e, "Druid connection couldn't be closed");
    }
}

/// Forward-only cursor producing typed records from a Druid range query
pub struct RecordCursor {
    config: DruidSourceConfig,
    connection_config: ConnectionConfig,
    factory: Arc<dyn ConnectionFactory>,
    query: String,
    schema: Arc<RowSchema>,
    handles: Option<QueryHandles>,
    state: CursorState,
    stats: CursorStats,
}

impl std::fmt::Debug for RecordCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordCursor")
            .field("datasource", &self.config.datasource)
            .field("query", &self.query)
            .field("fields", &self.schema.len())
            .field("position", &self.position())
            .finish()
    }
}

impl RecordCursor {
    /// Build the query and probe the row schema.
    ///
    /// Fails if the configuration is invalid or the schema cannot be
    /// discovered, including when a column has a type with no domain
    /// counterpart.
    pub async fn new(
        config: DruidSourceConfig,
        factory: Arc<dyn ConnectionFactory>,
    ) -> Result<Self> {
        config.validate_config()?;
        let query = QueryBuilder::new(&config).build()?;
        let connection_config = config.connection_config();

        let mut cursor = Self {
            config,
            connection_config,
            factory,
            query,
            schema: Arc::new(RowSchema::default()),
            handles: None,
            state: CursorState::Unopened,
            stats: CursorStats::default(),
        };
        cursor.probe_schema().await?;
        Ok(cursor)
    }

    /// The generated query
    pub fn query(&self) -> &str {
        &self.query
    }

    /// The row schema every record conforms to
    pub fn schema(&self) -> Arc<RowSchema> {
        Arc::clone(&self.schema)
    }

    /// The source configuration
    pub fn config(&self) -> &DruidSourceConfig {
        &self.config
    }

    /// Name of the transport rows are read through
    pub fn transport(&self) -> &str {
        self.factory.name()
    }

    /// Cursor statistics
    pub fn stats(&self) -> CursorStats {
        self.stats
    }

    /// Current position
    pub fn position(&self) -> CursorPosition {
        match self.state {
            CursorState::Unopened => CursorPosition::Unopened,
            CursorState::Positioned(_) => CursorPosition::Positioned,
            CursorState::Exhausted => CursorPosition::Exhausted,
        }
    }

    /// Whether result handles are held
    pub fn is_open(&self) -> bool {
        self.handles.is_some()
    }

    /// Whether a row is available to `next_record`. No I/O.
    #[inline]
    pub fn has_more(&self) -> bool {
        matches!(self.state, CursorState::Positioned(_))
    }

    /// Recompute the row schema from the query's result metadata.
    ///
    /// Uses a dedicated connection that is closed before returning; the
    /// cursor's open result, if any, is untouched.
    pub async fn probe_schema(&mut self) -> Result<Arc<RowSchema>> {
        debug!(
            datasource = %self.config.datasource,
            transport = self.factory.name(),
            sql = %self.query,
            "Probing Druid result schema"
        );

        let schema = self.discover_schema().await.map_err(|e| match e {
            Error::Schema { .. } => e,
            other => Error::schema_with_source(
                format!(
                    "failed to probe schema of datasource '{}'",
                    self.config.datasource
                ),
                other,
            ),
        })?;

        info!(
            datasource = %self.config.datasource,
            fields = schema.len(),
            "Druid result schema discovered"
        );

        self.schema = Arc::new(schema);
        Ok(Arc::clone(&self.schema))
    }

    async fn discover_schema(&self) -> Result<RowSchema> {
        let connection = self.factory.connect(&self.connection_config).await?;
        let columns = describe(connection.as_ref(), &self.query).await;
        close_connection(connection.as_ref()).await;
        schema_from_columns(&columns?)
    }

    /// Execute the query and position on the first row.
    ///
    /// An already open cursor is closed first. On failure every handle
    /// acquired so far is released and the cursor stays unopened.
    pub async fn open(&mut self) -> Result<()> {
        if self.is_open() {
            self.close().await;
        }

        let connection = self.factory.connect(&self.connection_config).await?;

        let statement = match connection.prepare(&self.query).await {
            Ok(s) => s,
            Err(e) => {
                close_connection(connection.as_ref()).await;
                return Err(e);
            }
        };

        let mut rows = match statement.execute_query().await {
            Ok(r) => r,
            Err(e) => {
                close_statement(statement.as_ref()).await;
                close_connection(connection.as_ref()).await;
                return Err(e);
            }
        };

        let first = rows.next().await;
        let handles = QueryHandles {
            connection,
            statement,
            rows,
        };

        let first = match first {
            Ok(first) => first,
            Err(e) => {
                handles.release().await;
                return Err(e);
            }
        };

        self.state = match first {
            Some(row) => CursorState::Positioned(row),
            None => CursorState::Exhausted,
        };
        self.handles = Some(handles);
        self.stats.opens += 1;

        info!(
            datasource = %self.config.datasource,
            transport = self.factory.name(),
            has_rows = self.has_more(),
            "Druid query opened"
        );
        Ok(())
    }

    /// Return the current row as a record and advance.
    ///
    /// Returns `Ok(None)` when no row is available. The row is consumed even
    /// if materializing it fails, so a row is never read twice.
    pub async fn next_record(&mut self) -> Result<Option<Record>> {
        let row = match std::mem::replace(&mut self.state, CursorState::Exhausted) {
            CursorState::Positioned(row) => row,
            other => {
                self.state = other;
                return Ok(None);
            }
        };

        let handles = self
            .handles
            .as_mut()
            .ok_or_else(|| Error::access("cursor is positioned but no result set is open"))?;

        match handles.rows.next().await {
            Ok(Some(next)) => self.state = CursorState::Positioned(next),
            Ok(None) => {}
            Err(e) => return Err(Error::read("failed to advance result set", e)),
        }

        let record = self
            .materialize(row)
            .map_err(|e| Error::read("failed to materialize row", e))?;
        self.stats.records_read += 1;
        Ok(Some(record))
    }

    fn materialize(&self, row: NativeRow) -> Result<Record> {
        if row.len() != self.schema.len() {
            return Err(Error::type_conversion(format!(
                "row has {} values but schema has {} fields",
                row.len(),
                self.schema.len()
            )));
        }

        let values = row
            .iter()
            .zip(self.schema.fields())
            .map(|(native, field)| coerce_value(native, field.data_type))
            .collect::<Result<Vec<_>>>()?;

        Ok(Record::new(Arc::clone(&self.schema), values))
    }

    /// Release all handles. Failures are logged, never returned; the
    /// cursor is unopened afterwards. Closing a closed cursor is a no-op.
    pub async fn close(&mut self) {
        if let Some(handles) = self.handles.take() {
            handles.release().await;
            info!(
                datasource = %self.config.datasource,
                records_read = self.stats.records_read,
                "Druid query closed"
            );
        }
        self.state = CursorState::Unopened;
    }
}

async fn describe(connection: &dyn Connection, sql: &str) -> Result<Vec<ColumnMetadata>> {
    let statement = connection.prepare(sql).await?;
    let columns = statement.metadata().await;
    close_statement(statement.as_ref()).await;
    columns
}

/// Build a row schema from column metadata, rejecting unrecognised types
pub fn schema_from_columns(columns: &[ColumnMetadata]) -> Result<RowSchema> {
    if columns.is_empty() {
        return Err(Error::schema("query result has no columns"));
    }

    let fields = columns
        .iter()
        .map(|c| match map_sql_type(&c.type_name) {
            TypeMapping::Mapped(t) => Ok(Field::new(c.name.clone(), t, c.type_name.clone())),
            TypeMapping::Unrecognized(name) => Err(Error::schema(format!(
                "column '{}' has unsupported type '{}'",
                c.name, name
            ))),
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(RowSchema::new(fields))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DomainType;

    #[test]
    fn test_schema_from_columns() {
        let columns = vec![
            ColumnMetadata::new("__time", "TIMESTAMP").with_ordinal(1),
            ColumnMetadata::new("page", "VARCHAR").with_ordinal(2),
            ColumnMetadata::new("delta", "BIGINT").with_ordinal(3),
        ];

        let schema = schema_from_columns(&columns).unwrap();
        assert_eq!(schema.field_names(), vec!["__time", "page", "delta"]);
        assert_eq!(
            schema.field_types(),
            vec![DomainType::Timestamp, DomainType::String, DomainType::BigInt]
        );
        assert_eq!(schema.field(1).unwrap().sql_type, "VARCHAR");
    }

    #[test]
    fn test_schema_rejects_unrecognized_type() {
        let columns = vec![
            ColumnMetadata::new("page", "VARCHAR"),
            ColumnMetadata::new("tags", "ARRAY"),
        ];

        let err = schema_from_columns(&columns).unwrap_err();
        assert!(matches!(err, Error::Schema { .. }));
        assert!(err.to_string().contains("tags"));
        assert!(err.to_string().contains("ARRAY"));
    }

    #[test]
    fn test_schema_rejects_empty_metadata() {
        assert!(schema_from_columns(&[]).is_err());
    }
}
