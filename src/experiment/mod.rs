//! Experiment records, readout results, and the registry interface
//!
//! ## Schema Overview
//!
//! ```text
//! Experiment (registry, read-only) ──> ReadoutResult (1 per invocation)
//!                                          └──< VariantSummary (N)
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use lectura_db::experiment::{Experiment, ExperimentStatus, MemoryRegistry};
//! use lectura_db::experiment::ExperimentRegistry;
//!
//! let mut registry = MemoryRegistry::new();
//! registry.add(
//!     Experiment::builder("exp_001", "Checkout CTA", "fact_dau")
//!         .status(ExperimentStatus::Running)
//!         .build(),
//! );
//!
//! let running = registry.running_experiments().unwrap();
//! assert_eq!(running.len(), 1);
//! ```

mod readout;
mod record;
mod registry;

pub use readout::{FailureKind, ReadoutFailure, ReadoutResult, ReadoutStatus, VariantSummary};
pub use record::{Experiment, ExperimentBuilder, ExperimentStatus};
pub use registry::{ExperimentRegistry, MemoryRegistry};
