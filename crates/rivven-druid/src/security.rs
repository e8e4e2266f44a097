//! SQL injection prevention for generated Druid queries.
//!
//! The Druid SQL HTTP API binds dynamic parameters only in value positions,
//! so datasource and column names are rendered into the statement text.
//! These helpers make that rendering safe:
//! - identifiers are validated and quoted when they are not plain or are
//!   reserved words
//! - datasource names are split into their dot-separated qualifiers
//! - string literals have their quotes escaped

use crate::error::Error;

/// Maximum identifier length accepted by the query builder
const MAX_IDENTIFIER_LEN: usize = 255;

/// Druid SQL (Calcite) reserved words that are likely column or table names.
/// Sorted, uppercase.
const RESERVED_WORDS: &[&str] = &[
    "ALL", "AND", "ANY", "ARRAY", "AS", "AVG", "BETWEEN", "BIGINT", "BOOLEAN", "BY", "CASE",
    "CAST", "CHAR", "CHARACTER", "COUNT", "CROSS", "CURRENT", "CURRENT_DATE", "CURRENT_TIME",
    "CURRENT_TIMESTAMP", "CURRENT_USER", "DATE", "DAY", "DECIMAL", "DEFAULT", "DESCRIBE",
    "DISTINCT", "DOUBLE", "ELSE", "END", "ESCAPE", "EXCEPT", "EXISTS", "EXTERNAL", "FALSE",
    "FETCH", "FILTER", "FLOAT", "FOR", "FROM", "FULL", "FUNCTION", "GROUP", "GROUPING",
    "HAVING", "HOUR", "IN", "INNER", "INSERT", "INT", "INTEGER", "INTERSECT", "INTERVAL",
    "INTO", "IS", "JOIN", "LANGUAGE", "LATERAL", "LEFT", "LIKE", "LIMIT", "LOCAL", "MAX",
    "MIN", "MINUTE", "MONTH", "NATURAL", "NOT", "NULL", "OF", "OFFSET", "ON", "OR", "ORDER",
    "OUTER", "OVER", "PARTITION", "POSITION", "RANGE", "REAL", "RESULT", "RIGHT", "ROW",
    "ROWS", "SECOND", "SELECT", "SESSION_USER", "SET", "SMALLINT", "SOME", "SUM",
    "SYSTEM_USER", "TABLE", "THEN", "TIME", "TIMESTAMP", "TINYINT", "TO", "TRUE", "UNION",
    "UNKNOWN", "UPDATE", "USER", "USING", "VALUE", "VALUES", "VARCHAR", "WHEN", "WHERE",
    "WINDOW", "WITH", "YEAR",
];

/// Whether `name` is a reserved word (case-insensitive)
pub fn is_reserved_word(name: &str) -> bool {
    let upper = name.to_ascii_uppercase();
    RESERVED_WORDS.binary_search(&upper.as_str()).is_ok()
}

/// Check whether a name is a plain SQL identifier (`[A-Za-z_][A-Za-z0-9_]*`).
///
/// Plain identifiers can be rendered without quotes.
///
/// ```
/// use rivven_druid::security::is_plain_identifier;
///
/// assert!(is_plain_identifier("events"));
/// assert!(is_plain_identifier("__time"));
/// assert!(!is_plain_identifier("wikipedia-edits"));
/// assert!(!is_plain_identifier("9lives"));
/// ```
pub fn is_plain_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Validate an identifier that is about to be rendered into SQL.
///
/// Rejects empty names, names over 255 bytes, and names containing control
/// characters. Anything else is legal once quoted by [`render_identifier`].
pub fn validate_identifier(name: &str) -> crate::Result<()> {
    if name.is_empty() {
        return Err(Error::config("SQL identifier cannot be empty"));
    }

    if name.len() > MAX_IDENTIFIER_LEN {
        return Err(Error::config(format!(
            "SQL identifier too long: {} chars (max {})",
            name.len(),
            MAX_IDENTIFIER_LEN
        )));
    }

    if let Some(c) = name.chars().find(|c| c.is_control()) {
        return Err(Error::config(format!(
            "Invalid SQL identifier {:?}: contains control character {:?}",
            name, c
        )));
    }

    Ok(())
}

/// Render an identifier for interpolation into a Druid SQL statement.
///
/// Plain identifiers are returned unchanged; reserved words and everything
/// else are wrapped in double quotes with embedded quotes doubled.
///
/// ```
/// use rivven_druid::security::render_identifier;
///
/// assert_eq!(render_identifier("events").unwrap(), "events");
/// assert_eq!(render_identifier("user").unwrap(), "\"user\"");
/// assert_eq!(render_identifier("wikipedia-edits").unwrap(), "\"wikipedia-edits\"");
/// assert_eq!(render_identifier("a\"b").unwrap(), "\"a\"\"b\"");
/// assert!(render_identifier("").is_err());
/// ```
pub fn render_identifier(name: &str) -> crate::Result<String> {
    validate_identifier(name)?;

    if is_plain_identifier(name) && !is_reserved_word(name) {
        Ok(name.to_string())
    } else {
        Ok(format!("\"{}\"", name.replace('"', "\"\"")))
    }
}

/// Render a possibly qualified datasource name such as `druid.wikipedia`.
///
/// Dots separate qualifiers and each qualifier is rendered with
/// [`render_identifier`]. A qualifier that itself contains a dot is written
/// in double quotes (`druid."my.events"`), with `""` for an embedded quote.
///
/// ```
/// use rivven_druid::security::render_table_name;
///
/// assert_eq!(render_table_name("sys.segments").unwrap(), "sys.segments");
/// assert_eq!(render_table_name("druid.my-ds").unwrap(), "druid.\"my-ds\"");
/// assert_eq!(render_table_name("druid.\"my.events\"").unwrap(), "druid.\"my.events\"");
/// ```
pub fn render_table_name(name: &str) -> crate::Result<String> {
    let parts = split_qualified_name(name)?;
    let rendered = parts
        .iter()
        .map(|p| render_identifier(p))
        .collect::<crate::Result<Vec<_>>>()?;
    Ok(rendered.join("."))
}

fn split_qualified_name(name: &str) -> crate::Result<Vec<String>> {
    let malformed = || Error::config(format!("Invalid datasource name {:?}", name));

    let mut parts = Vec::new();
    let mut chars = name.chars().peekable();
    loop {
        let mut part = String::new();
        if chars.peek() == Some(&'"') {
            chars.next();
            loop {
                match chars.next() {
                    Some('"') if chars.peek() == Some(&'"') => {
                        chars.next();
                        part.push('"');
                    }
                    Some('"') => break,
                    Some(c) => part.push(c),
                    None => return Err(malformed()),
                }
            }
            match chars.next() {
                Some('.') => {}
                None => {
                    parts.push(part);
                    return Ok(parts);
                }
                Some(_) => return Err(malformed()),
            }
        } else {
            loop {
                match chars.next() {
                    Some('.') => break,
                    Some('"') => return Err(malformed()),
                    Some(c) => part.push(c),
                    None => {
                        parts.push(part);
                        return Ok(parts);
                    }
                }
            }
        }
        parts.push(part);
    }
}

/// Escape a string value for safe interpolation into a SQL string literal context.
///
/// Replaces `'` with `''` (standard SQL escaping for single-quoted string literals).
///
/// ```
/// use rivven_druid::security::escape_string_literal;
///
/// assert_eq!(escape_string_literal("2023-01-01"), "2023-01-01");
/// assert_eq!(escape_string_literal("x' OR '1'='1"), "x'' OR ''1''=''1");
/// ```
pub fn escape_string_literal(value: &str) -> String {
    // Fast path: no escaping needed (common case)
    if !value.contains('\'') {
        return value.to_string();
    }
    value.replace('\'', "''")
}
