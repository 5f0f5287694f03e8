//! Weekly Experiment Readouts Example
//!
//! Demonstrates the full readout pipeline: register warehouse tables, pull
//! running experiments from a registry, compute per-variant statistics with
//! a bounded worker pool, and render the batch report a notifier would post.
//!
//! Run with: cargo run --example weekly_readouts

use std::sync::Arc;

use arrow::array::{Float64Array, RecordBatch, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use lectura_db::compute::ReadoutComputer;
use lectura_db::experiment::{Experiment, ExperimentStatus, MemoryRegistry};
use lectura_db::report::BatchReport;
use lectura_db::warehouse::MemoryWarehouse;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    println!("=== Lectura-DB Weekly Experiment Readouts ===\n");

    // -------------------------------------------------------------------------
    // 1. Register warehouse tables
    // -------------------------------------------------------------------------
    println!("1. Registering warehouse tables...");

    let warehouse = Arc::new(MemoryWarehouse::new());

    let assignments_schema = Arc::new(Schema::new(vec![
        Field::new("experiment_id", DataType::Utf8, false),
        Field::new("user_id", DataType::Utf8, false),
        Field::new("variant", DataType::Utf8, false),
    ]));
    let assignments = RecordBatch::try_new(
        assignments_schema,
        vec![
            Arc::new(StringArray::from(vec![
                "exp_001", "exp_001", "exp_001", "exp_001", "exp_002", "exp_002",
            ])),
            Arc::new(StringArray::from(vec!["u1", "u2", "u3", "u4", "u5", "u6"])),
            Arc::new(StringArray::from(vec![
                "control",
                "control",
                "treatment",
                "treatment",
                "control",
                "control",
            ])),
        ],
    )?;
    warehouse.register_table("experiment_assignments", vec![assignments])?;

    let dau_schema = Arc::new(Schema::new(vec![
        Field::new("user_id", DataType::Utf8, false),
        Field::new("metric_value", DataType::Float64, false),
    ]));
    let fact_dau = RecordBatch::try_new(
        dau_schema.clone(),
        vec![
            Arc::new(StringArray::from(vec!["u1", "u2", "u3", "u4"])),
            Arc::new(Float64Array::from(vec![4.0, 6.0, 7.0, 9.0])),
        ],
    )?;
    warehouse.register_table("fact_dau", vec![fact_dau])?;

    let fact_activation = RecordBatch::try_new(
        dau_schema,
        vec![
            Arc::new(StringArray::from(vec!["u5", "u6"])),
            Arc::new(Float64Array::from(vec![0.4, 0.7])),
        ],
    )?;
    warehouse.register_table("fact_activation", vec![fact_activation])?;

    println!("   Tables registered: {}", warehouse.table_count());

    // -------------------------------------------------------------------------
    // 2. Populate the experiment registry
    // -------------------------------------------------------------------------
    println!("\n2. Populating experiment registry...");

    let mut registry = MemoryRegistry::new();
    registry.add(
        Experiment::builder("exp_001", "Checkout CTA", "fact_dau")
            .status(ExperimentStatus::Running)
            .config(serde_json::json!({"traffic_pct": 50}))
            .build(),
    );
    // Single-variant experiment: readout will report insufficient data
    registry.add(
        Experiment::builder("exp_002", "Activation Flow", "fact_activation")
            .status(ExperimentStatus::Running)
            .build(),
    );
    // Missing metric table: readout will report a lookup failure
    registry.add(
        Experiment::builder("exp_003", "Retention Push", "fact_retention")
            .status(ExperimentStatus::Running)
            .build(),
    );
    registry.add(Experiment::new("exp_004", "Not yet launched", "fact_dau"));

    println!("   Experiments registered: {}", registry.len());

    // -------------------------------------------------------------------------
    // 3. Compute readouts for all running experiments
    // -------------------------------------------------------------------------
    println!("\n3. Computing readouts (bounded worker pool)...");

    let computer = ReadoutComputer::builder(warehouse).max_in_flight(2).build();
    let results = computer.compute_running(&registry).await?;

    for result in &results {
        println!(
            "   {}: {:?} ({} variants, {}/{} users observed)",
            result.experiment_id(),
            result.status(),
            result.variants().len(),
            result.observed_users(),
            result.assigned_users(),
        );
        for summary in result.variants() {
            println!(
                "     {}: mean={:.3} n={}",
                summary.variant(),
                summary.mean(),
                summary.count()
            );
        }
        if let Some(delta) = result.mean_difference() {
            println!("     difference of means: {delta:.3}");
        }
    }

    // -------------------------------------------------------------------------
    // 4. Render the batch report for the notification step
    // -------------------------------------------------------------------------
    println!("\n4. Batch report:\n");

    let report = BatchReport::from_results(results);
    println!("{}", report.render_text());

    // -------------------------------------------------------------------------
    // 5. Serialize a result for the publishing step
    // -------------------------------------------------------------------------
    println!("5. JSON serialization of the first computed result:\n");
    if let Some(result) = report.computed().first() {
        println!("{}", serde_json::to_string_pretty(result)?);
    }

    println!("\n=== Weekly Readouts Complete ===");
    Ok(())
}
