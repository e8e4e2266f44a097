//! # rivven-druid
//!
//! Apache Druid source connector for the Rivven event streaming platform.
//!
//! Reads a datasource, optionally restricted to a column allow-list and a
//! half-open `__time` range, and exposes the result as a forward-only cursor
//! of typed records.
//!
//! ## Features
//!
//! - **Range Queries**: `SELECT` generation with inclusive start and exclusive end bounds
//! - **Schema Discovery**: Result schema probed once, before any row is read
//! - **Type Mapping**: Druid SQL types mapped to a closed set of domain types
//! - **HTTP Transport**: Druid SQL API with streamed `arrayLines` results and query cancellation
//! - **Resource Safety**: Every probe and every open releases what it acquired, on success or failure
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use rivven_druid::prelude::*;
//! use std::sync::Arc;
//!
//! let config = DruidSourceConfig::new("http://localhost:8082", "wikipedia")
//!     .with_columns(["__time", "page", "added"])
//!     .with_start_timestamp("2016-06-27T00:00:00Z")
//!     .with_end_timestamp("2016-06-28T00:00:00Z");
//!
//! let mut cursor = RecordCursor::new(config, Arc::new(DruidHttpConnectionFactory::new())).await?;
//! cursor.open().await?;
//! while let Some(record) = cursor.next_record().await? {
//!     println!("{}", record.to_json());
//! }
//! cursor.close().await;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod coerce;
pub mod config;
pub mod connection;
pub mod cursor;
pub mod error;
pub mod http;
pub mod mapping;
pub mod query;
pub mod security;
pub mod testing;
pub mod types;

/// Prelude module for convenient imports
pub mod prelude {
    // Error types
    pub use crate::error::{Error, ErrorCategory, Result};

    // Value and type system
    pub use crate::mapping::{map_sql_type, TypeMapping};
    pub use crate::types::{ColumnMetadata, DomainType, Field, Record, RowSchema, Value};

    // Configuration
    pub use crate::config::{DruidSourceConfig, SensitiveString};

    // Connection traits and config
    pub use crate::connection::{
        Connection, ConnectionConfig, ConnectionFactory, NativeRow, PreparedStatement, RowStream,
    };

    // Druid transport
    pub use crate::http::{DruidEndpoint, DruidHttpConnectionFactory};

    // Cursor
    pub use crate::cursor::{CursorPosition, CursorStats, RecordCursor};
    pub use crate::query::QueryBuilder;
}

// Re-export commonly used items at crate root
pub use cursor::RecordCursor;
pub use error::{Error, Result};
pub use types::Value;
