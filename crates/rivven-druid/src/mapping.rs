//! Druid SQL type name to domain type mapping

use crate::types::DomainType;

/// Outcome of mapping a native SQL type name
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeMapping {
    /// The type maps onto a domain type
    Mapped(DomainType),
    /// The type has no domain counterpart
    Unrecognized(String),
}

impl TypeMapping {
    /// The mapped domain type, if any
    pub fn domain_type(&self) -> Option<DomainType> {
        match self {
            Self::Mapped(t) => Some(*t),
            Self::Unrecognized(_) => None,
        }
    }
}

/// Map a SQL type name as reported by Druid to a domain type.
///
/// Matching is case-insensitive and ignores a precision suffix, so
/// `timestamp(3)` maps like `TIMESTAMP`.
pub fn map_sql_type(type_name: &str) -> TypeMapping {
    let base = type_name
        .split('(')
        .next()
        .unwrap_or(type_name)
        .trim()
        .to_ascii_uppercase();

    let mapped = match base.as_str() {
        "BOOLEAN" => DomainType::Boolean,
        "TINYINT" => DomainType::Byte,
        "SMALLINT" => DomainType::SmallInt,
        "INTEGER" | "INT" => DomainType::Int,
        "BIGINT" => DomainType::BigInt,
        "FLOAT" | "REAL" => DomainType::Float,
        "DOUBLE" | "DECIMAL" => DomainType::Double,
        "CHAR" | "VARCHAR" => DomainType::String,
        "TIMESTAMP" | "DATE" => DomainType::Timestamp,
        _ => return TypeMapping::Unrecognized(type_name.to_string()),
    };

    TypeMapping::Mapped(mapped)
}
