//! Warehouse query interface
//!
//! The readout computer talks to the warehouse through [`Warehouse`]: a
//! parameterized SQL string plus bound parameters in, rows of scalar values
//! out. Implementations decide how the SQL is executed; the in-memory
//! implementation parses it back into a typed plan and runs it against
//! Arrow record batches.
//!
//! # Example
//!
//! ```rust,no_run
//! use lectura_db::warehouse::{MemoryWarehouse, QueryRequest, Value, Warehouse};
//!
//! # async fn example() -> lectura_db::Result<()> {
//! let warehouse = MemoryWarehouse::new();
//! let request = QueryRequest::new(
//!     "SELECT COUNT(*) AS n FROM experiment_assignments WHERE experiment_id = $1",
//! )
//! .bind(Value::from("exp_001"));
//!
//! let rows = warehouse.query(request).await?;
//! println!("{} row(s)", rows.len());
//! # Ok(())
//! # }
//! ```

mod memory;

pub use memory::MemoryWarehouse;

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Scalar value in a query parameter or result cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    /// UTF-8 string.
    Str(String),
    /// 64-bit float.
    Float(f64),
    /// 64-bit integer.
    Int(i64),
    /// SQL NULL.
    Null,
}

impl Value {
    /// String content, if this is a string value.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric content widened to `f64`, if numeric.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            #[allow(clippy::cast_precision_loss)]
            Self::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Integer content, if this is an integer value.
    #[must_use]
    pub const fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

/// One result row: scalar values in projection order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    values: Vec<Value>,
}

impl Row {
    /// Create a row from values in projection order.
    #[must_use]
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    /// Get the value at a 0-based position.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Number of values in the row.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if the row is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// A parameterized read query with an optional time budget.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    sql: String,
    params: Vec<Value>,
    timeout: Option<Duration>,
}

impl QueryRequest {
    /// Create a request for the given SQL text.
    #[must_use]
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
            timeout: None,
        }
    }

    /// Append a bound parameter (`$1`, `$2`, ... in bind order).
    #[must_use]
    pub fn bind(mut self, value: Value) -> Self {
        self.params.push(value);
        self
    }

    /// Set the per-query time budget.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Get the SQL text.
    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Get the bound parameters in bind order.
    #[must_use]
    pub fn params(&self) -> &[Value] {
        &self.params
    }

    /// Get the bound parameter for a 1-based placeholder index.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParam`] if no parameter was bound at that
    /// position.
    pub fn param(&self, index: usize) -> Result<&Value> {
        index
            .checked_sub(1)
            .and_then(|i| self.params.get(i))
            .ok_or_else(|| Error::InvalidParam(format!("no parameter bound for ${index}")))
    }

    /// Get the time budget, if one was set.
    #[must_use]
    pub const fn time_budget(&self) -> Option<Duration> {
        self.timeout
    }
}

/// Read-only warehouse query interface.
///
/// Implementations must be safe to share across readout workers; each call
/// is independent, so no locking is required between queries.
pub trait Warehouse: Send + Sync {
    /// Execute a parameterized read query.
    ///
    /// Implementations should respect the request's time budget where they
    /// can; the readout computer additionally enforces it from the outside.
    fn query(&self, request: QueryRequest) -> impl Future<Output = Result<Vec<Row>>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_conversions() {
        assert_eq!(Value::from("a").as_str(), Some("a"));
        assert_eq!(Value::from(2.5).as_f64(), Some(2.5));
        assert_eq!(Value::from(3_i64).as_f64(), Some(3.0));
        assert_eq!(Value::from(3_i64).as_i64(), Some(3));
        assert_eq!(Value::Null.as_str(), None);
        assert_eq!(Value::Null.as_f64(), None);
    }

    #[test]
    fn test_request_param_indexing() {
        let request = QueryRequest::new("SELECT 1")
            .bind(Value::from("exp_001"))
            .bind(Value::from(7_i64));

        assert_eq!(request.param(1).unwrap().as_str(), Some("exp_001"));
        assert_eq!(request.param(2).unwrap().as_i64(), Some(7));
        assert!(request.param(0).is_err());
        assert!(request.param(3).is_err());
    }

    #[test]
    fn test_row_access() {
        let row = Row::new(vec![Value::from("control"), Value::from(12.5)]);
        assert_eq!(row.len(), 2);
        assert!(!row.is_empty());
        assert_eq!(row.get(0).and_then(Value::as_str), Some("control"));
        assert_eq!(row.get(2), None);
    }
}
