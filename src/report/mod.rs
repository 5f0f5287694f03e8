//! Batch report for downstream publication
//!
//! The external notification step wants to know, per batch: what computed,
//! what lacked data, and what failed. [`BatchReport`] partitions a batch's
//! results accordingly and renders a plain-text summary the notifier can
//! post verbatim. Transport (webhook, email) stays outside this crate.

use serde::{Deserialize, Serialize};

use crate::experiment::{ReadoutResult, ReadoutStatus};

/// Partitioned view over one batch of readout results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    computed: Vec<ReadoutResult>,
    insufficient: Vec<ReadoutResult>,
    failed: Vec<ReadoutResult>,
}

impl BatchReport {
    /// Partition a batch of results by status.
    #[must_use]
    pub fn from_results(results: Vec<ReadoutResult>) -> Self {
        let mut computed = Vec::new();
        let mut insufficient = Vec::new();
        let mut failed = Vec::new();
        for result in results {
            match result.status() {
                ReadoutStatus::Computed => computed.push(result),
                ReadoutStatus::InsufficientData => insufficient.push(result),
                ReadoutStatus::Error => failed.push(result),
            }
        }
        Self {
            computed,
            insufficient,
            failed,
        }
    }

    /// Results with `Computed` status.
    #[must_use]
    pub fn computed(&self) -> &[ReadoutResult] {
        &self.computed
    }

    /// Results with `InsufficientData` status.
    #[must_use]
    pub fn insufficient(&self) -> &[ReadoutResult] {
        &self.insufficient
    }

    /// Results with `Error` status.
    #[must_use]
    pub fn failed(&self) -> &[ReadoutResult] {
        &self.failed
    }

    /// Total number of results in the batch.
    #[must_use]
    pub fn total(&self) -> usize {
        self.computed.len() + self.insufficient.len() + self.failed.len()
    }

    /// Whether some, but not all, experiments failed.
    #[must_use]
    pub fn is_partial(&self) -> bool {
        !self.failed.is_empty() && self.failed.len() < self.total()
    }

    /// Whether every experiment in the batch failed.
    #[must_use]
    pub fn all_failed(&self) -> bool {
        !self.failed.is_empty() && self.failed.len() == self.total()
    }

    /// Render a plain-text summary for the external notification step.
    #[must_use]
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let headline = if self.failed.is_empty() {
            "Experiment readouts completed"
        } else if self.all_failed() {
            "Experiment readouts failed"
        } else {
            "Experiment readouts completed with failures"
        };
        out.push_str(headline);
        out.push('\n');
        out.push_str(&format!(
            "computed: {} | insufficient data: {} | failed: {}\n",
            self.computed.len(),
            self.insufficient.len(),
            self.failed.len()
        ));

        for result in &self.computed {
            out.push_str(&format!("  [ok] {}", result.experiment_id()));
            for summary in result.variants() {
                out.push_str(&format!(
                    " {}: mean={:.4} n={}",
                    summary.variant(),
                    summary.mean(),
                    summary.count()
                ));
            }
            out.push('\n');
        }
        for result in &self.insufficient {
            out.push_str(&format!(
                "  [insufficient] {} ({} of {} assigned users observed)\n",
                result.experiment_id(),
                result.observed_users(),
                result.assigned_users()
            ));
        }
        for result in &self.failed {
            let message = result
                .failure()
                .map_or("unknown failure", |f| f.message());
            out.push_str(&format!(
                "  [failed] {}: {}\n",
                result.experiment_id(),
                message
            ));
        }
        out
    }
}
