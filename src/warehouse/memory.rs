//! Arrow-backed in-memory warehouse
//!
//! Tables are named collections of `RecordBatch`es behind a `DashMap`, so
//! concurrent readout workers can query without coordination. SQL arriving
//! through [`Warehouse::query`] is parsed into a typed plan and executed
//! here: equality filter on the experiment ID, hash join on the user
//! column, group-by-variant aggregation in `f64`.
//!
//! The join deduplicates per user on both sides (first occurrence wins,
//! duplicates logged at WARN) so a user is never counted twice.

use std::collections::BTreeMap;
use std::path::Path;

use arrow::array::{Array, ArrayRef, Float32Array, Float64Array, Int32Array, Int64Array,
    StringArray};
use arrow::datatypes::DataType;
use arrow::record_batch::RecordBatch;
use dashmap::DashMap;
use tracing::{debug, warn};

use crate::query::{AssignmentCountPlan, Plan, QueryEngine, VariantStatsPlan};
use crate::{Error, Result};

use super::{QueryRequest, Row, Value, Warehouse};

/// In-memory warehouse over Arrow record batches.
///
/// Intended for tests, demos, and embedded use; a production deployment
/// implements [`Warehouse`] against the real query engine instead.
#[derive(Debug, Default)]
pub struct MemoryWarehouse {
    tables: DashMap<String, Vec<RecordBatch>>,
}

impl MemoryWarehouse {
    /// Create a new empty warehouse.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tables: DashMap::new(),
        }
    }

    /// Register a table, replacing any existing table with the same name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Schema`] if the batches do not share one schema.
    pub fn register_table(
        &self,
        name: impl Into<String>,
        batches: Vec<RecordBatch>,
    ) -> Result<()> {
        if let [first, rest @ ..] = batches.as_slice() {
            for batch in rest {
                if batch.schema() != first.schema() {
                    return Err(Error::Schema(format!(
                        "Schema mismatch within table batches: expected {:?}, got {:?}",
                        first.schema(),
                        batch.schema()
                    )));
                }
            }
        }
        self.tables.insert(name.into(), batches);
        Ok(())
    }

    /// Register a table from a Parquet file.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed.
    pub fn load_parquet<P: AsRef<Path>>(&self, name: impl Into<String>, path: P) -> Result<()> {
        use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
        use std::fs::File;

        let file = File::open(path.as_ref())
            .map_err(|e| Error::Storage(format!("Failed to open Parquet file: {e}")))?;

        let builder = ParquetRecordBatchReaderBuilder::try_new(file)
            .map_err(|e| Error::Storage(format!("Failed to parse Parquet file: {e}")))?;

        let reader = builder
            .build()
            .map_err(|e| Error::Storage(format!("Failed to create Parquet reader: {e}")))?;

        let mut batches = Vec::new();
        for batch in reader {
            let batch =
                batch.map_err(|e| Error::Storage(format!("Failed to read record batch: {e}")))?;
            batches.push(batch);
        }

        self.register_table(name, batches)
    }

    /// Number of registered tables.
    #[must_use]
    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    /// Whether a table with this name is registered.
    #[must_use]
    pub fn has_table(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    fn batches(&self, table: &str) -> Result<Vec<RecordBatch>> {
        self.tables
            .get(table)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::TableNotFound(table.to_string()))
    }

    /// Collect `key column -> string column` pairs from a table, filtered
    /// (when a filter is given) by equality on another string column.
    /// First occurrence per key wins.
    fn string_pairs(
        table: &str,
        batches: &[RecordBatch],
        key_column: &str,
        value_column: &str,
        filter: Option<(&str, &str)>,
    ) -> Result<BTreeMap<String, String>> {
        let mut pairs = BTreeMap::new();
        for batch in batches {
            let keys = string_column(batch, key_column, table)?;
            let values = string_column(batch, value_column, table)?;
            let filter_array = filter
                .map(|(column, _)| string_column(batch, column, table))
                .transpose()?;

            for i in 0..batch.num_rows() {
                if let (Some(array), Some((_, wanted))) = (filter_array, filter) {
                    if array.is_null(i) || array.value(i) != wanted {
                        continue;
                    }
                }
                if keys.is_null(i) || values.is_null(i) {
                    continue;
                }
                let key = keys.value(i);
                if pairs.contains_key(key) {
                    warn!(table, key, "duplicate row for join key, keeping first");
                    continue;
                }
                pairs.insert(key.to_string(), values.value(i).to_string());
            }
        }
        Ok(pairs)
    }

    /// Collect `key column -> numeric column` pairs, first occurrence wins.
    fn numeric_pairs(
        table: &str,
        batches: &[RecordBatch],
        key_column: &str,
        value_column: &str,
    ) -> Result<BTreeMap<String, f64>> {
        let mut pairs = BTreeMap::new();
        for batch in batches {
            let keys = string_column(batch, key_column, table)?;
            let value_index = column_index(batch, value_column, table)?;
            let values = batch.column(value_index);
            for i in 0..batch.num_rows() {
                if keys.is_null(i) || values.is_null(i) {
                    continue;
                }
                let key = keys.value(i);
                if pairs.contains_key(key) {
                    warn!(table, key, "duplicate metric observation, keeping first");
                    continue;
                }
                let value = numeric_value(values, i).ok_or_else(|| {
                    Error::Schema(format!(
                        "Column {value_column} in table {table} must be numeric, got {:?}",
                        values.data_type()
                    ))
                })?;
                pairs.insert(key.to_string(), value);
            }
        }
        Ok(pairs)
    }

    fn execute_variant_stats(
        &self,
        plan: &VariantStatsPlan,
        request: &QueryRequest,
    ) -> Result<Vec<Row>> {
        let experiment_id = request
            .param(plan.param_index)?
            .as_str()
            .ok_or_else(|| Error::InvalidParam("experiment ID must be a string".to_string()))?
            .to_string();

        let assignment_batches = self.batches(&plan.assignments_table)?;
        let metric_batches = self.batches(&plan.metric_table)?;

        let assignments = Self::string_pairs(
            &plan.assignments_table,
            &assignment_batches,
            &plan.user_column,
            &plan.variant_column,
            Some((&plan.experiment_column, &experiment_id)),
        )?;
        let observations = Self::numeric_pairs(
            &plan.metric_table,
            &metric_batches,
            &plan.user_column,
            &plan.value_column,
        )?;

        // Inner join: one row per assigned user with an observation
        let joined = assignments
            .iter()
            .filter_map(|(user, variant)| observations.get(user).map(|v| (variant.clone(), *v)));

        if plan.aggregated {
            let mut groups: BTreeMap<String, (f64, u64)> = BTreeMap::new();
            for (variant, value) in joined {
                let entry = groups.entry(variant).or_insert((0.0, 0));
                entry.0 += value;
                entry.1 += 1;
            }
            debug!(
                %experiment_id,
                variants = groups.len(),
                "aggregated variant stats"
            );
            #[allow(clippy::cast_precision_loss, clippy::cast_possible_wrap)]
            let rows = groups
                .into_iter()
                .map(|(variant, (sum, count))| {
                    Row::new(vec![
                        Value::Str(variant),
                        Value::Float(sum / count as f64),
                        Value::Int(count as i64),
                    ])
                })
                .collect();
            Ok(rows)
        } else {
            Ok(joined
                .map(|(variant, value)| Row::new(vec![Value::Str(variant), Value::Float(value)]))
                .collect())
        }
    }

    fn execute_assignment_count(
        &self,
        plan: &AssignmentCountPlan,
        request: &QueryRequest,
    ) -> Result<Vec<Row>> {
        let experiment_id = request
            .param(plan.param_index)?
            .as_str()
            .ok_or_else(|| Error::InvalidParam("experiment ID must be a string".to_string()))?;

        let batches = self.batches(&plan.assignments_table)?;
        let mut count: i64 = 0;
        for batch in &batches {
            let filter = string_column(batch, &plan.experiment_column, &plan.assignments_table)?;
            for i in 0..batch.num_rows() {
                if !filter.is_null(i) && filter.value(i) == experiment_id {
                    count += 1;
                }
            }
        }
        Ok(vec![Row::new(vec![Value::Int(count)])])
    }
}

impl Warehouse for MemoryWarehouse {
    async fn query(&self, request: QueryRequest) -> Result<Vec<Row>> {
        // In-memory execution is bounded by table size; the time budget is
        // enforced by the caller wrapping this future.
        let plan = QueryEngine::new().parse(request.sql())?;
        match plan {
            Plan::VariantStats(plan) => self.execute_variant_stats(&plan, &request),
            Plan::AssignmentCount(plan) => self.execute_assignment_count(&plan, &request),
        }
    }
}

fn column_index(batch: &RecordBatch, column: &str, table: &str) -> Result<usize> {
    batch
        .schema()
        .fields()
        .iter()
        .position(|f| f.name() == column)
        .ok_or_else(|| Error::Schema(format!("Column {column} not found in table {table}")))
}

fn string_column<'a>(
    batch: &'a RecordBatch,
    column: &str,
    table: &str,
) -> Result<&'a StringArray> {
    let index = column_index(batch, column, table)?;
    batch
        .column(index)
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| Error::Schema(format!("Column {column} in table {table} must be Utf8")))
}

fn numeric_value(array: &ArrayRef, row: usize) -> Option<f64> {
    match array.data_type() {
        DataType::Float64 => array
            .as_any()
            .downcast_ref::<Float64Array>()
            .map(|a| a.value(row)),
        DataType::Float32 => array
            .as_any()
            .downcast_ref::<Float32Array>()
            .map(|a| f64::from(a.value(row))),
        #[allow(clippy::cast_precision_loss)]
        DataType::Int64 => array
            .as_any()
            .downcast_ref::<Int64Array>()
            .map(|a| a.value(row) as f64),
        DataType::Int32 => array
            .as_any()
            .downcast_ref::<Int32Array>()
            .map(|a| f64::from(a.value(row))),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::ReadoutQuery;
    use arrow::datatypes::{Field, Schema};
    use std::sync::Arc;

    fn assignments_batch(rows: &[(&str, &str, &str)]) -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("experiment_id", DataType::Utf8, false),
            Field::new("user_id", DataType::Utf8, false),
            Field::new("variant", DataType::Utf8, false),
        ]));
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(
                    rows.iter().map(|r| r.0).collect::<Vec<_>>(),
                )),
                Arc::new(StringArray::from(
                    rows.iter().map(|r| r.1).collect::<Vec<_>>(),
                )),
                Arc::new(StringArray::from(
                    rows.iter().map(|r| r.2).collect::<Vec<_>>(),
                )),
            ],
        )
        .unwrap()
    }

    fn metric_batch(rows: &[(&str, f64)]) -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("user_id", DataType::Utf8, false),
            Field::new("metric_value", DataType::Float64, false),
        ]));
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(
                    rows.iter().map(|r| r.0).collect::<Vec<_>>(),
                )),
                Arc::new(Float64Array::from(
                    rows.iter().map(|r| r.1).collect::<Vec<_>>(),
                )),
            ],
        )
        .unwrap()
    }

    fn seeded_warehouse() -> MemoryWarehouse {
        let warehouse = MemoryWarehouse::new();
        warehouse
            .register_table(
                "experiment_assignments",
                vec![assignments_batch(&[
                    ("exp_001", "u1", "A"),
                    ("exp_001", "u2", "A"),
                    ("exp_001", "u3", "B"),
                    ("exp_002", "u4", "control"),
                ])],
            )
            .unwrap();
        warehouse
            .register_table(
                "fact_dau",
                vec![metric_batch(&[("u1", 10.0), ("u2", 20.0), ("u3", 5.0)])],
            )
            .unwrap();
        warehouse
    }

    #[tokio::test]
    async fn test_aggregated_variant_stats() {
        let warehouse = seeded_warehouse();
        let sql = ReadoutQuery::new().variant_stats_sql("fact_dau").unwrap();
        let rows = warehouse
            .query(QueryRequest::new(sql).bind(Value::from("exp_001")))
            .await
            .unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get(0).and_then(Value::as_str), Some("A"));
        assert_eq!(rows[0].get(1).and_then(Value::as_f64), Some(15.0));
        assert_eq!(rows[0].get(2).and_then(Value::as_i64), Some(2));
        assert_eq!(rows[1].get(0).and_then(Value::as_str), Some("B"));
        assert_eq!(rows[1].get(1).and_then(Value::as_f64), Some(5.0));
        assert_eq!(rows[1].get(2).and_then(Value::as_i64), Some(1));
    }

    #[tokio::test]
    async fn test_raw_observation_rows() {
        let warehouse = seeded_warehouse();
        let sql = ReadoutQuery::new().observations_sql("fact_dau").unwrap();
        let rows = warehouse
            .query(QueryRequest::new(sql).bind(Value::from("exp_001")))
            .await
            .unwrap();

        assert_eq!(rows.len(), 3);
        for row in &rows {
            assert_eq!(row.len(), 2);
            assert!(row.get(1).and_then(Value::as_f64).is_some());
        }
    }

    #[tokio::test]
    async fn test_assignment_count() {
        let warehouse = seeded_warehouse();
        let sql = ReadoutQuery::new().assignment_count_sql();
        let rows = warehouse
            .query(QueryRequest::new(sql).bind(Value::from("exp_001")))
            .await
            .unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get(0).and_then(Value::as_i64), Some(3));
    }

    #[tokio::test]
    async fn test_missing_metric_table_is_lookup_failure() {
        let warehouse = seeded_warehouse();
        let sql = ReadoutQuery::new().variant_stats_sql("fact_missing").unwrap();
        let err = warehouse
            .query(QueryRequest::new(sql).bind(Value::from("exp_001")))
            .await
            .unwrap_err();

        assert!(err.is_lookup());
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_duplicate_users_counted_once() {
        let warehouse = MemoryWarehouse::new();
        warehouse
            .register_table(
                "experiment_assignments",
                vec![assignments_batch(&[
                    ("exp_001", "u1", "A"),
                    ("exp_001", "u1", "B"), // duplicate assignment
                    ("exp_001", "u2", "B"),
                ])],
            )
            .unwrap();
        warehouse
            .register_table(
                "fact_dau",
                vec![metric_batch(&[("u1", 10.0), ("u1", 99.0), ("u2", 4.0)])],
            )
            .unwrap();

        let sql = ReadoutQuery::new().variant_stats_sql("fact_dau").unwrap();
        let rows = warehouse
            .query(QueryRequest::new(sql).bind(Value::from("exp_001")))
            .await
            .unwrap();

        // u1 keeps first assignment (A) and first observation (10.0)
        let total: i64 = rows
            .iter()
            .filter_map(|r| r.get(2).and_then(Value::as_i64))
            .sum();
        assert_eq!(total, 2);
        assert_eq!(rows[0].get(0).and_then(Value::as_str), Some("A"));
        assert_eq!(rows[0].get(1).and_then(Value::as_f64), Some(10.0));
    }

    #[tokio::test]
    async fn test_ill_typed_variant_column_is_schema_error() {
        let warehouse = MemoryWarehouse::new();
        let schema = Arc::new(Schema::new(vec![
            Field::new("experiment_id", DataType::Utf8, false),
            Field::new("user_id", DataType::Utf8, false),
            Field::new("variant", DataType::Int64, false),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(vec!["exp_001"])),
                Arc::new(StringArray::from(vec!["u1"])),
                Arc::new(Int64Array::from(vec![1])),
            ],
        )
        .unwrap();
        warehouse
            .register_table("experiment_assignments", vec![batch])
            .unwrap();
        warehouse.register_table("fact_dau", vec![metric_batch(&[("u1", 1.0)])]).unwrap();

        let sql = ReadoutQuery::new().variant_stats_sql("fact_dau").unwrap();
        let err = warehouse
            .query(QueryRequest::new(sql).bind(Value::from("exp_001")))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("must be Utf8"));
    }

    #[test]
    fn test_register_table_schema_validation() {
        let warehouse = MemoryWarehouse::new();
        let result = warehouse.register_table(
            "mixed",
            vec![
                metric_batch(&[("u1", 1.0)]),
                assignments_batch(&[("exp", "u", "A")]),
            ],
        );
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("Schema mismatch"));
    }

    #[tokio::test]
    async fn test_integer_metric_values_widen() {
        let warehouse = MemoryWarehouse::new();
        warehouse
            .register_table(
                "experiment_assignments",
                vec![assignments_batch(&[
                    ("exp_001", "u1", "A"),
                    ("exp_001", "u2", "B"),
                ])],
            )
            .unwrap();
        let schema = Arc::new(Schema::new(vec![
            Field::new("user_id", DataType::Utf8, false),
            Field::new("metric_value", DataType::Int64, false),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(vec!["u1", "u2"])),
                Arc::new(Int64Array::from(vec![3, 7])),
            ],
        )
        .unwrap();
        warehouse.register_table("fact_sessions", vec![batch]).unwrap();

        let sql = ReadoutQuery::new().variant_stats_sql("fact_sessions").unwrap();
        let rows = warehouse
            .query(QueryRequest::new(sql).bind(Value::from("exp_001")))
            .await
            .unwrap();
        assert_eq!(rows[0].get(1).and_then(Value::as_f64), Some(3.0));
        assert_eq!(rows[1].get(1).and_then(Value::as_f64), Some(7.0));
    }
}
