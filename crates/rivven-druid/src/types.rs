//! Value types for rivven-druid
//!
//! The connector produces records whose fields belong to a closed set of
//! domain kinds. Native Druid values are coerced into these kinds by
//! [`crate::cursor`] according to the [`RowSchema`] probed at construction.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Domain type of a record field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainType {
    /// Boolean
    Boolean,
    /// Single signed byte
    Byte,
    /// 16-bit signed integer
    SmallInt,
    /// 32-bit signed integer
    Int,
    /// 64-bit signed integer
    BigInt,
    /// 32-bit floating point
    Float,
    /// 64-bit floating point
    Double,
    /// Text
    String,
    /// Civil date-time in UTC
    Timestamp,
}

impl DomainType {
    /// Name used in schema listings
    pub const fn name(self) -> &'static str {
        match self {
            Self::Boolean => "BOOLEAN",
            Self::Byte => "BYTE",
            Self::SmallInt => "SMALLINT",
            Self::Int => "INT",
            Self::BigInt => "BIGINT",
            Self::Float => "FLOAT",
            Self::Double => "DOUBLE",
            Self::String => "STRING",
            Self::Timestamp => "TIMESTAMP",
        }
    }
}

impl fmt::Display for DomainType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

/// A coerced field value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// SQL NULL
    Null,
    /// Boolean value
    Bool(bool),
    /// 8-bit signed integer
    Int8(i8),
    /// 16-bit signed integer
    Int16(i16),
    /// 32-bit signed integer
    Int32(i32),
    /// 64-bit signed integer
    Int64(i64),
    /// 32-bit floating point
    Float32(f32),
    /// 64-bit floating point
    Float64(f64),
    /// Text string
    String(String),
    /// Timestamp without timezone, expressed in UTC
    DateTime(NaiveDateTime),
}

impl Value {
    /// Check if value is NULL
    #[inline]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Domain type carried by this value, `None` for NULL
    pub const fn domain_type(&self) -> Option<DomainType> {
        match self {
            Self::Null => None,
            Self::Bool(_) => Some(DomainType::Boolean),
            Self::Int8(_) => Some(DomainType::Byte),
            Self::Int16(_) => Some(DomainType::SmallInt),
            Self::Int32(_) => Some(DomainType::Int),
            Self::Int64(_) => Some(DomainType::BigInt),
            Self::Float32(_) => Some(DomainType::Float),
            Self::Float64(_) => Some(DomainType::Double),
            Self::String(_) => Some(DomainType::String),
            Self::DateTime(_) => Some(DomainType::Timestamp),
        }
    }

    /// Try to convert to bool
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Try to convert to i64
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int8(n) => Some(i64::from(*n)),
            Self::Int16(n) => Some(i64::from(*n)),
            Self::Int32(n) => Some(i64::from(*n)),
            Self::Int64(n) => Some(*n),
            _ => None,
        }
    }

    /// Try to convert to f64
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int8(n) => Some(f64::from(*n)),
            Self::Int16(n) => Some(f64::from(*n)),
            Self::Int32(n) => Some(f64::from(*n)),
            Self::Int64(n) => Some(*n as f64),
            Self::Float32(n) => Some(f64::from(*n)),
            Self::Float64(n) => Some(*n),
            _ => None,
        }
    }

    /// Try to convert to string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Try to convert to a date-time
    pub fn as_datetime(&self) -> Option<NaiveDateTime> {
        match self {
            Self::DateTime(dt) => Some(*dt),
            _ => None,
        }
    }

    /// Render as JSON for downstream serialisation
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Int8(n) => (*n).into(),
            Self::Int16(n) => (*n).into(),
            Self::Int32(n) => (*n).into(),
            Self::Int64(n) => (*n).into(),
            Self::Float32(n) => serde_json::Number::from_f64(f64::from(*n))
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Self::Float64(n) => serde_json::Number::from_f64(*n)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Self::String(s) => serde_json::Value::String(s.clone()),
            Self::DateTime(dt) => {
                serde_json::Value::String(dt.format("%Y-%m-%dT%H:%M:%S%.3f").to_string())
            }
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i8> for Value {
    fn from(v: i8) -> Self {
        Self::Int8(v)
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Self::Int16(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int64(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Self::Float32(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float64(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_owned())
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Self::DateTime(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(val) => val.into(),
            None => Self::Null,
        }
    }
}

/// Column metadata reported by a prepared statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMetadata {
    /// Column name
    pub name: String,
    /// SQL type name as reported by the store (e.g. `VARCHAR`, `TIMESTAMP`)
    pub type_name: String,
    /// Store-native type (e.g. Druid `LONG`, `STRING`), when reported
    pub native_type: Option<String>,
    /// Column ordinal (1-based)
    pub ordinal: u32,
}

impl ColumnMetadata {
    /// Create basic column metadata
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            native_type: None,
            ordinal: 0,
        }
    }

    /// Set the native type
    pub fn with_native_type(mut self, native_type: impl Into<String>) -> Self {
        self.native_type = Some(native_type.into());
        self
    }

    /// Set the ordinal
    pub fn with_ordinal(mut self, ordinal: u32) -> Self {
        self.ordinal = ordinal;
        self
    }
}

/// A single field of the row schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    /// Field name
    pub name: String,
    /// Domain type values of this field are coerced into
    pub data_type: DomainType,
    /// SQL type name the domain type was mapped from
    pub sql_type: String,
}

impl Field {
    /// Create a field
    pub fn new(
        name: impl Into<String>,
        data_type: DomainType,
        sql_type: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            data_type,
            sql_type: sql_type.into(),
        }
    }
}

/// Ordered list of fields every record conforms to
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowSchema {
    fields: Vec<Field>,
}

impl RowSchema {
    /// Create a schema from fields in column order
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    /// Number of fields
    #[inline]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Check if schema has no fields
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// All fields in column order
    #[inline]
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Field by position
    #[inline]
    pub fn field(&self, idx: usize) -> Option<&Field> {
        self.fields.get(idx)
    }

    /// Position of a field by name (case-insensitive)
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields
            .iter()
            .position(|f| f.name.eq_ignore_ascii_case(name))
    }

    /// Field names in column order
    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    /// Field domain types in column order
    pub fn field_types(&self) -> Vec<DomainType> {
        self.fields.iter().map(|f| f.data_type).collect()
    }
}

/// A record positionally aligned to a [`RowSchema`]
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    schema: Arc<RowSchema>,
    values: Vec<Value>,
}

impl Record {
    /// Create a new record
    pub fn new(schema: Arc<RowSchema>, values: Vec<Value>) -> Self {
        debug_assert_eq!(schema.len(), values.len());
        Self { schema, values }
    }

    /// Field count
    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if record has no fields
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Schema this record conforms to
    #[inline]
    pub fn schema(&self) -> &RowSchema {
        &self.schema
    }

    /// All values
    #[inline]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Value by field index
    #[inline]
    pub fn get(&self, idx: usize) -> Option<&Value> {
        self.values.get(idx)
    }

    /// Value by field name (case-insensitive)
    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        self.schema
            .index_of(name)
            .and_then(|idx| self.values.get(idx))
    }

    /// Take ownership of the values
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    /// Convert record to HashMap
    pub fn into_map(self) -> HashMap<String, Value> {
        self.schema
            .fields()
            .iter()
            .map(|f| f.name.clone())
            .zip(self.values)
            .collect()
    }

    /// Render as a JSON object keyed by field name, in field order
    pub fn to_json(&self) -> serde_json::Value {
        let map: serde_json::Map<String, serde_json::Value> = self
            .schema
            .fields()
            .iter()
            .zip(&self.values)
            .map(|(f, v)| (f.name.clone(), v.to_json()))
            .collect();
        serde_json::Value::Object(map)
    }
}
