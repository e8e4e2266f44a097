//! Range query generation for the Druid source
//!
//! The query has the shape
//!
//! ```text
//! SELECT <columns> FROM <datasource> WHERE 1=1 [AND __time >=  '<start>'] [AND __time <  '<end>']
//! ```
//!
//! The datasource goes through [`render_table_name`], columns through
//! [`render_identifier`] and bounds through
//! [`escape_string_literal`], so configuration values cannot change the
//! statement's structure.

use crate::config::DruidSourceConfig;
use crate::error::Result;
use crate::security::{escape_string_literal, render_identifier, render_table_name};

/// Column list used when no allow-list is configured
pub const COLUMNS_DEFAULT: &str = "*";

/// Druid's primary time column
pub const TIME_COLUMN: &str = "__time";

/// Builds the range query for a source configuration
pub struct QueryBuilder<'a> {
    config: &'a DruidSourceConfig,
}

impl<'a> QueryBuilder<'a> {
    /// Create a new query builder
    pub fn new(config: &'a DruidSourceConfig) -> Self {
        Self { config }
    }

    /// Render the column clause
    pub fn columns_clause(&self) -> Result<String> {
        match self.config.selected_columns() {
            None => Ok(COLUMNS_DEFAULT.to_string()),
            Some(columns) => {
                let rendered = columns
                    .iter()
                    .map(|c| render_identifier(c))
                    .collect::<Result<Vec<_>>>()?;
                Ok(rendered.join(","))
            }
        }
    }

    /// Build the range query
    pub fn build(&self) -> Result<String> {
        let mut sql = format!(
            "SELECT {} FROM {} WHERE 1=1",
            self.columns_clause()?,
            render_table_name(&self.config.datasource)?
        );

        if let Some(ref start) = self.config.start_timestamp {
            sql.push_str(&format!(
                " AND {} >=  '{}'",
                TIME_COLUMN,
                escape_string_literal(start)
            ));
        }

        if let Some(ref end) = self.config.end_timestamp {
            sql.push_str(&format!(
                " AND {} <  '{}'",
                TIME_COLUMN,
                escape_string_literal(end)
            ));
        }

        Ok(sql)
    }
}

/// Wrap a query so that executing it yields column headers and no rows
pub fn metadata_probe_sql(sql: &str) -> String {
    format!("SELECT * FROM ({}) LIMIT 0", sql)
}
