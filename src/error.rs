use crate::schema::ReferenceKind;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlanningError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Unknown table: {0}")]
    UnknownTable(String),

    #[error("Unknown column '{column}' for table {table}")]
    UnknownColumn { table: String, column: String },

    #[error("No key columns left to compare for table {0}")]
    EmptyKey(String),

    #[error("Append to {table} failed, no rows written: {source}")]
    WriteFailed {
        table: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to create database directory: {0}")]
    CreateDir(std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PlanningError>;

/// Why a single batch row was left out of an upsert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectionReason {
    /// A referenced name has no row in its reference table.
    Unresolved { kind: ReferenceKind, name: String },
    /// A required field is absent or blank.
    MissingField { column: String },
    /// A field could not be coerced to its storage type.
    InvalidValue {
        column: String,
        value: String,
        expected: String,
    },
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unresolved { kind, .. } => write!(f, "unresolved {}", kind.label()),
            Self::MissingField { column } => write!(f, "missing {}", column),
            Self::InvalidValue { column, .. } => write!(f, "invalid {}", column),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RowRejection {
    /// Zero-based position of the row in the submitted batch.
    pub row: usize,
    #[serde(flatten)]
    pub reason: RejectionReason,
}

impl RowRejection {
    pub fn new(row: usize, reason: RejectionReason) -> Self {
        Self { row, reason }
    }

    pub fn describe(&self) -> String {
        let detail = match &self.reason {
            RejectionReason::Unresolved { name, .. } => format!(" '{}'", name),
            RejectionReason::InvalidValue {
                value, expected, ..
            } => format!(" '{}' (expected {})", value, expected),
            RejectionReason::MissingField { .. } => String::new(),
        };
        format!("row {}: {}{}", self.row, self.reason, detail)
    }
}
