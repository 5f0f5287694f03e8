//! # Lectura-DB: Experiment Readout Engine
//!
//! Lectura-DB computes per-variant summary statistics (readouts) for
//! running experiments against a data warehouse: it joins assignment rows
//! to each experiment's target metric table, groups by variant, and reports
//! mean and sample count per variant, with strict per-experiment failure
//! isolation.
//!
//! ## Design Principles (Toyota Way Aligned)
//!
//! - **Jidoka**: a failing experiment stops itself, never the batch
//! - **Poka-Yoke**: bound parameters and identifier validation keep
//!   experiment IDs out of query text
//! - **Heijunka**: bounded worker pool levels warehouse load
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use lectura_db::compute::ReadoutComputer;
//! use lectura_db::experiment::{Experiment, ExperimentStatus};
//! use lectura_db::report::BatchReport;
//! use lectura_db::warehouse::MemoryWarehouse;
//!
//! # async fn example() -> lectura_db::Result<()> {
//! let warehouse = Arc::new(MemoryWarehouse::new());
//! warehouse.load_parquet("experiment_assignments", "data/assignments.parquet")?;
//! warehouse.load_parquet("fact_dau", "data/fact_dau.parquet")?;
//!
//! let computer = ReadoutComputer::new(warehouse);
//! let experiments = vec![
//!     Experiment::builder("exp_001", "Checkout CTA", "fact_dau")
//!         .status(ExperimentStatus::Running)
//!         .build(),
//! ];
//!
//! let results = computer.compute_all(&experiments).await;
//! let report = BatchReport::from_results(results);
//! println!("{}", report.render_text());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod compute;
pub mod error;
pub mod experiment;
pub mod query;
pub mod report;
pub mod warehouse;

pub use error::{Error, Result};
