//! Experiment Record - registry entry for a tracked experiment

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of an experiment.
///
/// Managed by the external registry; read-only to this crate. Only
/// `Running` experiments are eligible for readout computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentStatus {
    /// Experiment is defined but not yet serving traffic.
    Draft,
    /// Experiment is live and accumulating assignments.
    Running,
    /// Experiment finished its planned duration.
    Completed,
    /// Experiment was halted before completion.
    Stopped,
}

/// Experiment record as supplied by the experiment registry.
///
/// The `target_metric` names the warehouse table holding per-user
/// observations of the metric this experiment is evaluated against
/// (e.g. `fact_dau`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Experiment {
    experiment_id: String,
    name: String,
    target_metric: String,
    status: ExperimentStatus,
    created_at: DateTime<Utc>,
    config: Option<serde_json::Value>,
}

impl Experiment {
    /// Create a new experiment record in `Draft` status.
    ///
    /// # Arguments
    ///
    /// * `experiment_id` - Unique identifier for the experiment
    /// * `name` - Human-readable display name
    /// * `target_metric` - Warehouse table holding the target metric
    #[must_use]
    pub fn new(
        experiment_id: impl Into<String>,
        name: impl Into<String>,
        target_metric: impl Into<String>,
    ) -> Self {
        Self {
            experiment_id: experiment_id.into(),
            name: name.into(),
            target_metric: target_metric.into(),
            status: ExperimentStatus::Draft,
            created_at: Utc::now(),
            config: None,
        }
    }

    /// Create a builder for constructing an experiment with optional fields.
    #[must_use]
    pub fn builder(
        experiment_id: impl Into<String>,
        name: impl Into<String>,
        target_metric: impl Into<String>,
    ) -> ExperimentBuilder {
        ExperimentBuilder::new(experiment_id, name, target_metric)
    }

    /// Get the experiment ID.
    #[must_use]
    pub fn experiment_id(&self) -> &str {
        &self.experiment_id
    }

    /// Get the display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the target metric table name.
    #[must_use]
    pub fn target_metric(&self) -> &str {
        &self.target_metric
    }

    /// Get the current lifecycle status.
    #[must_use]
    pub const fn status(&self) -> ExperimentStatus {
        self.status
    }

    /// Whether the experiment is currently running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.status == ExperimentStatus::Running
    }

    /// Get the creation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Get the experiment configuration, if any.
    #[must_use]
    pub const fn config(&self) -> Option<&serde_json::Value> {
        self.config.as_ref()
    }
}

/// Builder for [`Experiment`].
#[derive(Debug)]
pub struct ExperimentBuilder {
    experiment_id: String,
    name: String,
    target_metric: String,
    status: ExperimentStatus,
    created_at: DateTime<Utc>,
    config: Option<serde_json::Value>,
}

impl ExperimentBuilder {
    /// Create a new builder with required fields.
    #[must_use]
    pub fn new(
        experiment_id: impl Into<String>,
        name: impl Into<String>,
        target_metric: impl Into<String>,
    ) -> Self {
        Self {
            experiment_id: experiment_id.into(),
            name: name.into(),
            target_metric: target_metric.into(),
            status: ExperimentStatus::Draft,
            created_at: Utc::now(),
            config: None,
        }
    }

    /// Set the lifecycle status.
    #[must_use]
    pub const fn status(mut self, status: ExperimentStatus) -> Self {
        self.status = status;
        self
    }

    /// Set the experiment configuration.
    #[must_use]
    pub fn config(mut self, config: serde_json::Value) -> Self {
        self.config = Some(config);
        self
    }

    /// Set a custom creation timestamp (useful for deserialization/testing).
    #[must_use]
    pub const fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Build the [`Experiment`].
    #[must_use]
    pub fn build(self) -> Experiment {
        Experiment {
            experiment_id: self.experiment_id,
            name: self.name,
            target_metric: self.target_metric,
            status: self.status,
            created_at: self.created_at,
            config: self.config,
        }
    }
}
