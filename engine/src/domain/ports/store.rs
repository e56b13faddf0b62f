//! StateStore port
//! Durable KV/relational storage consumed by the StateManager. Carries SQL
//! text plus positional parameters; the `DatabaseKind` tag lets callers pick
//! the dialect for upserts and placeholders.

use async_trait::async_trait;
use std::fmt;

use crate::domain::{Result, SupervisorError};

/// Storage backend family; selects the SQL dialect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseKind {
    Sqlite,
    Postgres,
    Memory,
}

impl DatabaseKind {
    /// Positional parameter placeholder for this dialect (1-based)
    pub fn placeholder(&self, position: usize) -> String {
        match self {
            DatabaseKind::Sqlite | DatabaseKind::Memory => format!("?{}", position),
            DatabaseKind::Postgres => format!("${}", position),
        }
    }
}

impl fmt::Display for DatabaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabaseKind::Sqlite => write!(f, "sqlite"),
            DatabaseKind::Postgres => write!(f, "postgres"),
            DatabaseKind::Memory => write!(f, "memory"),
        }
    }
}

/// One positional SQL parameter / result cell
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Integer(v)
    }
}

impl From<u64> for SqlValue {
    fn from(v: u64) -> Self {
        SqlValue::Integer(v as i64)
    }
}

impl From<u32> for SqlValue {
    fn from(v: u32) -> Self {
        SqlValue::Integer(v as i64)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Real(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

/// One result row, cells in select order
#[derive(Debug, Clone)]
pub struct SqlRow {
    values: Vec<SqlValue>,
}

impl SqlRow {
    pub fn new(values: Vec<SqlValue>) -> Self {
        Self { values }
    }

    fn cell(&self, index: usize) -> Result<&SqlValue> {
        self.values.get(index).ok_or_else(|| {
            SupervisorError::Storage(format!("row has no column at index {}", index))
        })
    }

    pub fn get_i64(&self, index: usize) -> Result<i64> {
        match self.cell(index)? {
            SqlValue::Integer(v) => Ok(*v),
            SqlValue::Real(v) => Ok(*v as i64),
            other => Err(SupervisorError::Storage(format!(
                "column {} is not an integer: {:?}",
                index, other
            ))),
        }
    }

    pub fn get_f64(&self, index: usize) -> Result<f64> {
        match self.cell(index)? {
            SqlValue::Real(v) => Ok(*v),
            SqlValue::Integer(v) => Ok(*v as f64),
            other => Err(SupervisorError::Storage(format!(
                "column {} is not a float: {:?}",
                index, other
            ))),
        }
    }

    pub fn get_text(&self, index: usize) -> Result<&str> {
        match self.cell(index)? {
            SqlValue::Text(v) => Ok(v.as_str()),
            other => Err(SupervisorError::Storage(format!(
                "column {} is not text: {:?}",
                index, other
            ))),
        }
    }

    pub fn get_opt_text(&self, index: usize) -> Result<Option<&str>> {
        match self.cell(index)? {
            SqlValue::Null => Ok(None),
            SqlValue::Text(v) => Ok(Some(v.as_str())),
            other => Err(SupervisorError::Storage(format!(
                "column {} is not text: {:?}",
                index, other
            ))),
        }
    }
}

/// One statement of an atomic batch
#[derive(Debug, Clone)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl Statement {
    pub fn new(sql: impl Into<String>, params: Vec<SqlValue>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

/// Storage contract consumed by the core.
///
/// `execute_batch` is the transaction boundary: all statements commit together
/// or none do.
#[async_trait]
pub trait StateStore: Send + Sync {
    fn kind(&self) -> DatabaseKind;

    /// Run a statement, returning the affected row count
    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64>;

    /// Run a query, returning all rows
    async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<SqlRow>>;

    /// Run a query expected to produce at most one row
    async fn query_single(&self, sql: &str, params: &[SqlValue]) -> Result<Option<SqlRow>>;

    /// Run several statements in one transaction, rolling back on any failure
    async fn execute_batch(&self, statements: &[Statement]) -> Result<()>;
}
