//! Integration tests for the full readout pipeline:
//! Experiment → SQL → MemoryWarehouse → ReadoutResult

use std::sync::Arc;

use arrow::array::{Float64Array, RecordBatch, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use lectura_db::compute::ReadoutComputer;
use lectura_db::experiment::{
    Experiment, ExperimentRegistry, ExperimentStatus, MemoryRegistry, ReadoutStatus,
};
use lectura_db::warehouse::MemoryWarehouse;

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

/// Warehouse fixture mirroring the documented worked example:
/// assignments {u1:A, u2:A, u3:B}, metric values {u1:10, u2:20, u3:5}.
fn worked_example_warehouse() -> Arc<MemoryWarehouse> {
    let warehouse = MemoryWarehouse::new();
    warehouse
        .register_table(
            "experiment_assignments",
            vec![assignments_batch(&[
                ("exp_001", "u1", "A"),
                ("exp_001", "u2", "A"),
                ("exp_001", "u3", "B"),
            ])],
        )
        .unwrap();
    warehouse
        .register_table(
            "fact_dau",
            vec![metric_batch(&[("u1", 10.0), ("u2", 20.0), ("u3", 5.0)])],
        )
        .unwrap();
    Arc::new(warehouse)
}

fn running_experiment(id: &str, metric: &str) -> Experiment {
    Experiment::builder(id, id, metric)
        .status(ExperimentStatus::Running)
        .build()
}

#[tokio::test]
async fn test_worked_example() {
    let computer = ReadoutComputer::new(worked_example_warehouse());
    let result = computer
        .compute_readout(&running_experiment("exp_001", "fact_dau"))
        .await;

    assert_eq!(result.status(), ReadoutStatus::Computed);
    assert_eq!(result.variants().len(), 2);

    let a = &result.variants()[0];
    assert_eq!(a.variant(), "A");
    assert!((a.mean() - 15.0).abs() < f64::EPSILON);
    assert_eq!(a.count(), 2);

    let b = &result.variants()[1];
    assert_eq!(b.variant(), "B");
    assert!((b.mean() - 5.0).abs() < f64::EPSILON);
    assert_eq!(b.count(), 1);

    assert_eq!(result.assigned_users(), 3);
    assert_eq!(result.observed_users(), 3);
    assert_eq!(result.unmatched_users(), 0);
}

#[tokio::test]
async fn test_client_side_aggregation_matches_pushdown() {
    let warehouse = worked_example_warehouse();
    let experiment = running_experiment("exp_001", "fact_dau");

    let pushdown = ReadoutComputer::builder(Arc::clone(&warehouse))
        .aggregate_pushdown(true)
        .build()
        .compute_readout(&experiment)
        .await;
    let client_side = ReadoutComputer::builder(warehouse)
        .aggregate_pushdown(false)
        .build()
        .compute_readout(&experiment)
        .await;

    assert_eq!(pushdown.status(), client_side.status());
    assert_eq!(pushdown.variants(), client_side.variants());
    assert_eq!(pushdown.assigned_users(), client_side.assigned_users());
}

#[tokio::test]
async fn test_single_variant_is_insufficient_data() {
    let warehouse = MemoryWarehouse::new();
    warehouse
        .register_table(
            "experiment_assignments",
            vec![assignments_batch(&[
                ("exp_001", "u1", "control"),
                ("exp_001", "u2", "control"),
            ])],
        )
        .unwrap();
    warehouse
        .register_table("fact_dau", vec![metric_batch(&[("u1", 1.0), ("u2", 2.0)])])
        .unwrap();

    let computer = ReadoutComputer::new(Arc::new(warehouse));
    let result = computer
        .compute_readout(&running_experiment("exp_001", "fact_dau"))
        .await;

    assert_eq!(result.status(), ReadoutStatus::InsufficientData);
    // Whatever summaries exist are still returned
    assert_eq!(result.variants().len(), 1);
    assert_eq!(result.variants()[0].count(), 2);
}

#[tokio::test]
async fn test_empty_join_is_insufficient_data() {
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
    // Metric table exists but no user joins
    warehouse
        .register_table("fact_dau", vec![metric_batch(&[("u9", 1.0)])])
        .unwrap();

    let computer = ReadoutComputer::new(Arc::new(warehouse));
    let result = computer
        .compute_readout(&running_experiment("exp_001", "fact_dau"))
        .await;

    assert_eq!(result.status(), ReadoutStatus::InsufficientData);
    assert!(result.variants().is_empty());
    // Dropped join rows are surfaced, not swallowed
    assert_eq!(result.assigned_users(), 2);
    assert_eq!(result.unmatched_users(), 2);
}

#[tokio::test]
async fn test_partition_invariant_with_partial_join() {
    let warehouse = MemoryWarehouse::new();
    warehouse
        .register_table(
            "experiment_assignments",
            vec![assignments_batch(&[
                ("exp_001", "u1", "A"),
                ("exp_001", "u2", "A"),
                ("exp_001", "u3", "B"),
                ("exp_001", "u4", "B"),
                ("exp_002", "u5", "A"), // other experiment, must not leak in
            ])],
        )
        .unwrap();
    // u4 has no observation
    warehouse
        .register_table(
            "fact_dau",
            vec![metric_batch(&[("u1", 1.0), ("u2", 3.0), ("u3", 8.0), ("u5", 99.0)])],
        )
        .unwrap();

    let computer = ReadoutComputer::new(Arc::new(warehouse));
    let result = computer
        .compute_readout(&running_experiment("exp_001", "fact_dau"))
        .await;

    assert_eq!(result.status(), ReadoutStatus::Computed);
    let total: u64 = result.variants().iter().map(|v| v.count()).sum();
    assert_eq!(total, 3);
    assert_eq!(result.observed_users(), 3);
    assert_eq!(result.assigned_users(), 4);
    assert_eq!(result.unmatched_users(), 1);
}

#[tokio::test]
async fn test_idempotent_over_unchanged_data() {
    let computer = ReadoutComputer::new(worked_example_warehouse());
    let experiment = running_experiment("exp_001", "fact_dau");

    let first = computer.compute_readout(&experiment).await;
    let second = computer.compute_readout(&experiment).await;

    assert_eq!(first.status(), second.status());
    assert_eq!(first.variants(), second.variants());
    assert_eq!(first.assigned_users(), second.assigned_users());
}

#[tokio::test]
async fn test_mean_difference_on_computed_result() {
    let computer = ReadoutComputer::new(worked_example_warehouse());
    let result = computer
        .compute_readout(&running_experiment("exp_001", "fact_dau"))
        .await;

    // A mean 15.0 vs B mean 5.0, in variant-label order
    let delta = result.mean_difference().unwrap();
    assert!((delta - 10.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn test_compute_running_pulls_from_registry() {
    let warehouse = worked_example_warehouse();
    let mut registry = MemoryRegistry::new();
    registry.add(running_experiment("exp_001", "fact_dau"));
    registry.add(Experiment::new("exp_002", "draft", "fact_dau"));

    let computer = ReadoutComputer::new(warehouse);
    let results = computer.compute_running(&registry).await.unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].experiment_id(), "exp_001");
    assert_eq!(results[0].status(), ReadoutStatus::Computed);

    // The draft experiment is visible through the registry, just not run
    assert!(registry.get("exp_002").is_ok());
}

#[tokio::test]
async fn test_results_serialize_for_publishing() {
    let computer = ReadoutComputer::new(worked_example_warehouse());
    let result = computer
        .compute_readout(&running_experiment("exp_001", "fact_dau"))
        .await;

    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["experiment_id"], "exp_001");
    assert_eq!(json["status"], "computed");
    assert_eq!(json["variants"][0]["variant"], "A");
    assert_eq!(json["variants"][0]["count"], 2);
}
