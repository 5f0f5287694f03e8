//! Readout result types - per-variant summaries and their status
//!
//! A readout is recomputed on every invocation and handed to the caller;
//! nothing here is persisted. Downstream publishing steps serialize the
//! result to the warehouse or a reporting store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Error;

/// Summary statistics for one treatment arm of an experiment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VariantSummary {
    variant: String,
    mean: f64,
    count: u64,
}

impl VariantSummary {
    /// Create a new variant summary.
    ///
    /// # Arguments
    ///
    /// * `variant` - Variant label (e.g. "control", "treatment")
    /// * `mean` - Mean metric value across the variant's users
    /// * `count` - Number of users contributing observations
    #[must_use]
    pub fn new(variant: impl Into<String>, mean: f64, count: u64) -> Self {
        Self {
            variant: variant.into(),
            mean,
            count,
        }
    }

    /// Get the variant label.
    #[must_use]
    pub fn variant(&self) -> &str {
        &self.variant
    }

    /// Get the mean metric value.
    #[must_use]
    pub const fn mean(&self) -> f64 {
        self.mean
    }

    /// Get the sample count.
    #[must_use]
    pub const fn count(&self) -> u64 {
        self.count
    }
}

/// Terminal status of a readout computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadoutStatus {
    /// At least two variants had observations; all summaries are populated.
    Computed,
    /// Fewer than two variants had observations. Not an error.
    InsufficientData,
    /// The computation failed; see the attached failure marker.
    Error,
}

/// Classification of a per-experiment failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Missing metric table or unknown experiment.
    Lookup,
    /// Timeout or transient warehouse failure; retrying may succeed.
    Transient,
    /// Anything else (schema mismatch, storage corruption).
    Internal,
}

/// Serializable failure marker attached to an errored readout.
///
/// Carrying the failure inside the result (rather than as a bare `Err`)
/// lets a batch return one entry per input experiment, so the downstream
/// notifier can report partial success.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReadoutFailure {
    kind: FailureKind,
    message: String,
}

impl ReadoutFailure {
    /// Classify a crate error into a failure marker.
    #[must_use]
    pub fn from_error(error: &Error) -> Self {
        let kind = if error.is_lookup() {
            FailureKind::Lookup
        } else if error.is_retryable() {
            FailureKind::Transient
        } else {
            FailureKind::Internal
        };
        Self {
            kind,
            message: error.to_string(),
        }
    }

    /// Get the failure classification.
    #[must_use]
    pub const fn kind(&self) -> FailureKind {
        self.kind
    }

    /// Get the failure message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Outcome of a readout computation for a single experiment.
///
/// Variant summaries are kept sorted by variant label so that repeated runs
/// over unchanged warehouse data serialize identically.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReadoutResult {
    experiment_id: String,
    variants: Vec<VariantSummary>,
    status: ReadoutStatus,
    assigned_users: u64,
    observed_users: u64,
    computed_at: DateTime<Utc>,
    failure: Option<ReadoutFailure>,
}

impl ReadoutResult {
    fn new(
        experiment_id: impl Into<String>,
        mut variants: Vec<VariantSummary>,
        status: ReadoutStatus,
        assigned_users: u64,
        failure: Option<ReadoutFailure>,
    ) -> Self {
        variants.sort_by(|a, b| a.variant.cmp(&b.variant));
        let observed_users = variants.iter().map(VariantSummary::count).sum();
        Self {
            experiment_id: experiment_id.into(),
            variants,
            status,
            assigned_users,
            observed_users,
            computed_at: Utc::now(),
            failure,
        }
    }

    /// Create a `Computed` result from populated variant summaries.
    #[must_use]
    pub fn computed(
        experiment_id: impl Into<String>,
        variants: Vec<VariantSummary>,
        assigned_users: u64,
    ) -> Self {
        Self::new(
            experiment_id,
            variants,
            ReadoutStatus::Computed,
            assigned_users,
            None,
        )
    }

    /// Create an `InsufficientData` result, keeping whatever summaries exist.
    #[must_use]
    pub fn insufficient_data(
        experiment_id: impl Into<String>,
        variants: Vec<VariantSummary>,
        assigned_users: u64,
    ) -> Self {
        Self::new(
            experiment_id,
            variants,
            ReadoutStatus::InsufficientData,
            assigned_users,
            None,
        )
    }

    /// Create an `Error` result carrying a failure marker.
    #[must_use]
    pub fn from_failure(experiment_id: impl Into<String>, error: &Error) -> Self {
        Self::new(
            experiment_id,
            Vec::new(),
            ReadoutStatus::Error,
            0,
            Some(ReadoutFailure::from_error(error)),
        )
    }

    /// Get the experiment ID.
    #[must_use]
    pub fn experiment_id(&self) -> &str {
        &self.experiment_id
    }

    /// Get the variant summaries, ordered by variant label.
    #[must_use]
    pub fn variants(&self) -> &[VariantSummary] {
        &self.variants
    }

    /// Get the terminal status.
    #[must_use]
    pub const fn status(&self) -> ReadoutStatus {
        self.status
    }

    /// Number of users assigned to the experiment, whether or not they have
    /// a metric observation.
    #[must_use]
    pub const fn assigned_users(&self) -> u64 {
        self.assigned_users
    }

    /// Number of distinct users with both an assignment and a metric
    /// observation (the sum of all variant counts).
    #[must_use]
    pub const fn observed_users(&self) -> u64 {
        self.observed_users
    }

    /// Number of assigned users that did not join to a metric observation.
    ///
    /// A nonzero value means the join dropped rows; it is reported here
    /// rather than swallowed.
    #[must_use]
    pub const fn unmatched_users(&self) -> u64 {
        self.assigned_users.saturating_sub(self.observed_users)
    }

    /// Get the computation timestamp.
    #[must_use]
    pub const fn computed_at(&self) -> DateTime<Utc> {
        self.computed_at
    }

    /// Get the failure marker, if the readout errored.
    #[must_use]
    pub const fn failure(&self) -> Option<&ReadoutFailure> {
        self.failure.as_ref()
    }

    /// Whether this readout ended in `Error` status.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self.status, ReadoutStatus::Error)
    }

    /// Difference of means between the two populated variants, when exactly
    /// two exist.
    ///
    /// Returns `first - second` in variant-label order. No hypothesis test
    /// or p-value is computed; this is a descriptive delta only.
    #[must_use]
    pub fn mean_difference(&self) -> Option<f64> {
        let populated: Vec<&VariantSummary> =
            self.variants.iter().filter(|v| v.count > 0).collect();
        match populated.as_slice() {
            [a, b] => Some(a.mean - b.mean),
            _ => None,
        }
    }
}
