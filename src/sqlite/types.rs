//! Column definitions shared by the upstream introspector, the DDL parser,
//! and the SQL generator.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Live schema of the local store: table name to column name to definition.
pub type Schema = HashMap<String, BTreeMap<String, ColDef>>;

/// A column type tag. Upstream tags name the PostgreSQL scalar types the
/// mirror understands; local tags name the four SQLite storage classes.
/// `Text` is shared: both sides spell it the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColType {
    // Upstream types.
    Text,
    Int2,
    Int4,
    Int8,
    Numeric,
    Float4,
    Float8,
    Bytea,
    Json,
    Jsonb,
    Bool,
    Unknown,

    // Local storage classes.
    Integer,
    Real,
    Blob,
}

impl ColType {
    /// Resolves an `information_schema.columns.udt_name` value. The caller
    /// strips the leading underscore of array types before calling.
    /// The varchar family shares text's wire format and decodes as text.
    pub fn from_udt(name: &str) -> Self {
        match name {
            "text" | "varchar" | "bpchar" | "name" => ColType::Text,
            "int2" => ColType::Int2,
            "int4" => ColType::Int4,
            "int8" => ColType::Int8,
            "numeric" => ColType::Numeric,
            "float4" => ColType::Float4,
            "float8" => ColType::Float8,
            "bytea" => ColType::Bytea,
            "json" => ColType::Json,
            "jsonb" => ColType::Jsonb,
            "bool" => ColType::Bool,
            _ => ColType::Unknown,
        }
    }

    /// Resolves a type word from stored local DDL, case-insensitively.
    pub fn from_ddl(name: &str) -> Self {
        match name.to_uppercase().as_str() {
            "TEXT" => ColType::Text,
            "INTEGER" => ColType::Integer,
            "REAL" => ColType::Real,
            "BLOB" => ColType::Blob,
            _ => ColType::Unknown,
        }
    }

    /// Resolves a pg_type OID from a Relation message into (type, array).
    pub fn from_oid(oid: u32) -> (Self, bool) {
        match oid {
            25 => (ColType::Text, false),
            21 => (ColType::Int2, false),
            23 => (ColType::Int4, false),
            20 => (ColType::Int8, false),
            1700 => (ColType::Numeric, false),
            700 => (ColType::Float4, false),
            701 => (ColType::Float8, false),
            17 => (ColType::Bytea, false),
            114 => (ColType::Json, false),
            3802 => (ColType::Jsonb, false),
            16 => (ColType::Bool, false),
            1009 => (ColType::Text, true),
            1005 => (ColType::Int2, true),
            1007 => (ColType::Int4, true),
            1016 => (ColType::Int8, true),
            1231 => (ColType::Numeric, true),
            1021 => (ColType::Float4, true),
            1022 => (ColType::Float8, true),
            1001 => (ColType::Bytea, true),
            199 => (ColType::Json, true),
            3807 => (ColType::Jsonb, true),
            1000 => (ColType::Bool, true),
            _ => (ColType::Unknown, false),
        }
    }

    /// Maps an upstream type to the local storage class. Local tags map to
    /// themselves so a parsed live schema can pass through unchanged.
    pub fn local(self) -> Self {
        match self {
            ColType::Text | ColType::Json | ColType::Jsonb | ColType::Bool | ColType::Unknown => {
                ColType::Text
            }
            ColType::Int2 | ColType::Int4 | ColType::Int8 | ColType::Integer => ColType::Integer,
            ColType::Numeric | ColType::Float4 | ColType::Float8 | ColType::Real => ColType::Real,
            ColType::Bytea | ColType::Blob => ColType::Blob,
        }
    }
}

impl fmt::Display for ColType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ColType::Text => "TEXT",
            ColType::Int2 => "int2",
            ColType::Int4 => "int4",
            ColType::Int8 => "int8",
            ColType::Numeric => "numeric",
            ColType::Float4 => "float4",
            ColType::Float8 => "float8",
            ColType::Bytea => "bytea",
            ColType::Json => "json",
            ColType::Jsonb => "jsonb",
            ColType::Bool => "bool",
            ColType::Unknown => "unknown",
            ColType::Integer => "INTEGER",
            ColType::Real => "REAL",
            ColType::Blob => "BLOB",
        };
        f.write_str(s)
    }
}

/// One column of a table, on either side of the mirror.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColDef {
    pub name: String,
    pub col_type: ColType,
    pub primary_key: bool,
    pub array: bool,
}

impl ColDef {
    pub fn new(name: impl Into<String>, col_type: ColType) -> Self {
        Self {
            name: name.into(),
            col_type,
            primary_key: false,
            array: false,
        }
    }
}
