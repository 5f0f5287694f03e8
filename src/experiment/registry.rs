//! Experiment registry - source of active experiment records
//!
//! The registry is owned by an external system; this crate only reads it.

use std::collections::HashMap;

use crate::{Error, Result};

use super::{Experiment, ExperimentStatus};

/// Read-only source of experiment records.
///
/// The readout computer pulls running experiments from a registry; anything
/// that can list them (a warehouse table, a config service, a fixture) can
/// implement this.
pub trait ExperimentRegistry {
    /// List all experiments with status `Running`, ordered by experiment ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying registry cannot be read.
    fn running_experiments(&self) -> Result<Vec<Experiment>>;

    /// Look up a single experiment by ID.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ExperimentNotFound`] if no such experiment exists.
    fn get(&self, experiment_id: &str) -> Result<Experiment>;
}

/// In-memory experiment registry.
///
/// Useful for tests and for callers that receive the experiment list from
/// elsewhere (e.g. a registry table already fetched from the warehouse).
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    experiments: HashMap<String, Experiment>,
}

impl MemoryRegistry {
    /// Create a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an experiment, replacing any existing record with the same ID.
    pub fn add(&mut self, experiment: Experiment) {
        self.experiments
            .insert(experiment.experiment_id().to_string(), experiment);
    }

    /// Get the number of registered experiments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.experiments.len()
    }

    /// Check if the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.experiments.is_empty()
    }

    /// List experiments with the given status, ordered by experiment ID.
    #[must_use]
    pub fn with_status(&self, status: ExperimentStatus) -> Vec<Experiment> {
        let mut experiments: Vec<Experiment> = self
            .experiments
            .values()
            .filter(|e| e.status() == status)
            .cloned()
            .collect();

        // Deterministic batch order regardless of hashmap iteration
        experiments.sort_by(|a, b| a.experiment_id().cmp(b.experiment_id()));

        experiments
    }
}

impl ExperimentRegistry for MemoryRegistry {
    fn running_experiments(&self) -> Result<Vec<Experiment>> {
        Ok(self.with_status(ExperimentStatus::Running))
    }

    fn get(&self, experiment_id: &str) -> Result<Experiment> {
        self.experiments
            .get(experiment_id)
            .cloned()
            .ok_or_else(|| Error::ExperimentNotFound(experiment_id.to_string()))
    }
}
