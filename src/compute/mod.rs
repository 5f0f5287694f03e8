//! Experiment Readout Computer
//!
//! For each running experiment: join the assignment table to the
//! experiment's target metric table, group by variant, and compute mean and
//! sample count per variant. Failures are isolated per experiment — a batch
//! always returns exactly one result per input, in input order.
//!
//! The computer is read-only against the warehouse and holds no state
//! between invocations, so experiments may be computed concurrently with a
//! bounded worker pool.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use lectura_db::compute::ReadoutComputer;
//! use lectura_db::experiment::{Experiment, ExperimentStatus};
//! use lectura_db::warehouse::MemoryWarehouse;
//!
//! # async fn example() -> lectura_db::Result<()> {
//! let warehouse = Arc::new(MemoryWarehouse::new());
//! let computer = ReadoutComputer::new(warehouse);
//!
//! let experiment = Experiment::builder("exp_001", "Checkout CTA", "fact_dau")
//!     .status(ExperimentStatus::Running)
//!     .build();
//!
//! let result = computer.compute_readout(&experiment).await;
//! println!("{:?}: {} variants", result.status(), result.variants().len());
//! # Ok(())
//! # }
//! ```

mod retry;

pub use retry::RetryConfig;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::experiment::{Experiment, ExperimentRegistry, ReadoutResult, VariantSummary};
use crate::query::ReadoutQuery;
use crate::warehouse::{QueryRequest, Row, Value, Warehouse};
use crate::{Error, Result};

/// Default per-query time budget.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Default bound on concurrently computed experiments.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 4;

/// Computes per-variant readouts for experiments against a warehouse.
pub struct ReadoutComputer<W> {
    warehouse: Arc<W>,
    template: ReadoutQuery,
    query_timeout: Duration,
    retry: RetryConfig,
    aggregate_pushdown: bool,
    max_in_flight: usize,
}

impl<W> Clone for ReadoutComputer<W> {
    fn clone(&self) -> Self {
        Self {
            warehouse: Arc::clone(&self.warehouse),
            template: self.template.clone(),
            query_timeout: self.query_timeout,
            retry: self.retry.clone(),
            aggregate_pushdown: self.aggregate_pushdown,
            max_in_flight: self.max_in_flight,
        }
    }
}

impl<W: Warehouse> ReadoutComputer<W> {
    /// Create a computer with default configuration.
    #[must_use]
    pub fn new(warehouse: Arc<W>) -> Self {
        Self::builder(warehouse).build()
    }

    /// Create a builder for custom configuration.
    #[must_use]
    pub fn builder(warehouse: Arc<W>) -> ReadoutComputerBuilder<W> {
        ReadoutComputerBuilder::new(warehouse)
    }

    /// Compute the readout for a single experiment.
    ///
    /// Never fails outright: every error is folded into a result with
    /// `Error` status and a failure marker, so batch callers can keep going.
    pub async fn compute_readout(&self, experiment: &Experiment) -> ReadoutResult {
        match self.try_compute(experiment).await {
            Ok(result) => result,
            Err(error) => {
                warn!(
                    experiment_id = experiment.experiment_id(),
                    %error,
                    "readout failed"
                );
                ReadoutResult::from_failure(experiment.experiment_id(), &error)
            }
        }
    }

    async fn try_compute(&self, experiment: &Experiment) -> Result<ReadoutResult> {
        let metric_table = experiment.target_metric();
        let stats_sql = if self.aggregate_pushdown {
            self.template.variant_stats_sql(metric_table)?
        } else {
            self.template.observations_sql(metric_table)?
        };

        let rows = self.run_query(&stats_sql, experiment.experiment_id()).await?;
        let summaries = if self.aggregate_pushdown {
            Self::summaries_from_aggregated(&rows)?
        } else {
            Self::summaries_from_observations(&rows)?
        };

        let count_sql = self.template.assignment_count_sql();
        let assigned = self.fetch_assignment_count(&count_sql, experiment.experiment_id()).await?;

        let populated = summaries.iter().filter(|s| s.count() > 0).count();
        debug!(
            experiment_id = experiment.experiment_id(),
            variants = summaries.len(),
            populated,
            assigned,
            "readout computed"
        );

        if populated < 2 {
            Ok(ReadoutResult::insufficient_data(
                experiment.experiment_id(),
                summaries,
                assigned,
            ))
        } else {
            Ok(ReadoutResult::computed(
                experiment.experiment_id(),
                summaries,
                assigned,
            ))
        }
    }

    /// Execute one parameterized query with timeout enforcement and
    /// transient-failure retries.
    async fn run_query(&self, sql: &str, experiment_id: &str) -> Result<Vec<Row>> {
        let mut attempt = 1;
        loop {
            let request = QueryRequest::new(sql)
                .bind(Value::from(experiment_id))
                .timeout(self.query_timeout);

            let outcome = match tokio::time::timeout(
                self.query_timeout,
                self.warehouse.query(request),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(Error::QueryTimeout(self.query_timeout)),
            };

            match outcome {
                Ok(rows) => return Ok(rows),
                Err(error) if error.is_retryable() && attempt < self.retry.max_attempts => {
                    let backoff = self.retry.backoff(attempt);
                    warn!(
                        experiment_id,
                        attempt,
                        ?backoff,
                        %error,
                        "transient query failure, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }

    async fn fetch_assignment_count(&self, sql: &str, experiment_id: &str) -> Result<u64> {
        let rows = self.run_query(sql, experiment_id).await?;
        let count = rows
            .first()
            .and_then(|row| row.get(0))
            .and_then(Value::as_i64)
            .ok_or_else(|| {
                Error::Schema("assignment count query must return a single integer".to_string())
            })?;
        u64::try_from(count)
            .map_err(|_| Error::Schema(format!("negative assignment count: {count}")))
    }

    /// Build summaries from pushdown rows of (variant, mean, count).
    fn summaries_from_aggregated(rows: &[Row]) -> Result<Vec<VariantSummary>> {
        rows.iter()
            .map(|row| {
                let variant = row.get(0).and_then(Value::as_str).ok_or_else(|| {
                    Error::Schema("variant column must be a string".to_string())
                })?;
                let mean = row.get(1).and_then(Value::as_f64).ok_or_else(|| {
                    Error::Schema("mean column must be numeric".to_string())
                })?;
                let count = row
                    .get(2)
                    .and_then(Value::as_i64)
                    .and_then(|n| u64::try_from(n).ok())
                    .ok_or_else(|| {
                        Error::Schema("count column must be a non-negative integer".to_string())
                    })?;
                Ok(VariantSummary::new(variant, mean, count))
            })
            .collect()
    }

    /// Fold raw (variant, value) observation rows into per-variant
    /// mean/count summaries.
    fn summaries_from_observations(rows: &[Row]) -> Result<Vec<VariantSummary>> {
        let mut groups: BTreeMap<String, (f64, u64)> = BTreeMap::new();
        for row in rows {
            let variant = row.get(0).and_then(Value::as_str).ok_or_else(|| {
                Error::Schema("variant column must be a string".to_string())
            })?;
            let value = row.get(1).and_then(Value::as_f64).ok_or_else(|| {
                Error::Schema("metric value column must be numeric".to_string())
            })?;
            let entry = groups.entry(variant.to_string()).or_insert((0.0, 0));
            entry.0 += value;
            entry.1 += 1;
        }
        #[allow(clippy::cast_precision_loss)]
        let summaries = groups
            .into_iter()
            .map(|(variant, (sum, count))| VariantSummary::new(variant, sum / count as f64, count))
            .collect();
        Ok(summaries)
    }

    /// Compute readouts for a batch of experiments, sequentially.
    ///
    /// Always returns exactly one result per input experiment, in input
    /// order; a failure on one experiment never aborts the rest.
    pub async fn compute_all(&self, experiments: &[Experiment]) -> Vec<ReadoutResult> {
        info!(experiments = experiments.len(), "computing readout batch");
        let mut results = Vec::with_capacity(experiments.len());
        for experiment in experiments {
            results.push(self.compute_readout(experiment).await);
        }
        results
    }

    /// Compute readouts for a batch of experiments with a bounded worker
    /// pool.
    ///
    /// Each computation is independent and read-only, so no locking is
    /// needed between workers; `max_in_flight` bounds concurrent warehouse
    /// queries. Same ordering and isolation guarantees as
    /// [`compute_all`](Self::compute_all).
    pub async fn compute_all_concurrent(&self, experiments: &[Experiment]) -> Vec<ReadoutResult>
    where
        W: 'static,
    {
        info!(
            experiments = experiments.len(),
            max_in_flight = self.max_in_flight,
            "computing readout batch concurrently"
        );

        let semaphore = Arc::new(Semaphore::new(self.max_in_flight.max(1)));
        let mut join_set = JoinSet::new();

        for (index, experiment) in experiments.iter().cloned().enumerate() {
            let computer = self.clone();
            let semaphore = Arc::clone(&semaphore);
            join_set.spawn(async move {
                // Semaphore is never closed while tasks hold it
                let _permit = semaphore.acquire().await.ok();
                (index, computer.compute_readout(&experiment).await)
            });
        }

        let mut slots: Vec<Option<ReadoutResult>> =
            experiments.iter().map(|_| None).collect();
        while let Some(joined) = join_set.join_next().await {
            if let Ok((index, result)) = joined {
                slots[index] = Some(result);
            }
        }

        // A slot stays empty only if a worker panicked; report it as an
        // errored experiment rather than shortening the batch.
        slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.unwrap_or_else(|| {
                    ReadoutResult::from_failure(
                        experiments[index].experiment_id(),
                        &Error::Other("readout worker terminated abnormally".to_string()),
                    )
                })
            })
            .collect()
    }

    /// Pull running experiments from a registry and compute them all.
    ///
    /// Uses the bounded worker pool when `max_in_flight` allows more than
    /// one query at a time.
    ///
    /// # Errors
    ///
    /// Returns an error only if the registry itself cannot be read;
    /// per-experiment failures land in the results as usual.
    pub async fn compute_running<R>(&self, registry: &R) -> Result<Vec<ReadoutResult>>
    where
        R: ExperimentRegistry,
        W: 'static,
    {
        let experiments = registry.running_experiments()?;
        if self.max_in_flight > 1 {
            Ok(self.compute_all_concurrent(&experiments).await)
        } else {
            Ok(self.compute_all(&experiments).await)
        }
    }
}

/// Builder for [`ReadoutComputer`].
pub struct ReadoutComputerBuilder<W> {
    warehouse: Arc<W>,
    template: ReadoutQuery,
    query_timeout: Duration,
    retry: RetryConfig,
    aggregate_pushdown: bool,
    max_in_flight: usize,
}

impl<W: Warehouse> ReadoutComputerBuilder<W> {
    /// Create a builder with default configuration.
    #[must_use]
    pub fn new(warehouse: Arc<W>) -> Self {
        Self {
            warehouse,
            template: ReadoutQuery::default(),
            query_timeout: DEFAULT_QUERY_TIMEOUT,
            retry: RetryConfig::default(),
            aggregate_pushdown: true,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }

    /// Override the schema names the readout queries are built against.
    #[must_use]
    pub fn query_template(mut self, template: ReadoutQuery) -> Self {
        self.template = template;
        self
    }

    /// Set the per-query time budget.
    #[must_use]
    pub const fn query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    /// Set the retry policy for transient failures.
    #[must_use]
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Push mean/count aggregation down to the warehouse (default) or pull
    /// raw observation rows and aggregate client-side.
    #[must_use]
    pub const fn aggregate_pushdown(mut self, pushdown: bool) -> Self {
        self.aggregate_pushdown = pushdown;
        self
    }

    /// Bound the number of concurrently computed experiments.
    #[must_use]
    pub const fn max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight;
        self
    }

    /// Build the [`ReadoutComputer`].
    #[must_use]
    pub fn build(self) -> ReadoutComputer<W> {
        ReadoutComputer {
            warehouse: self.warehouse,
            template: self.template,
            query_timeout: self.query_timeout,
            retry: self.retry,
            aggregate_pushdown: self.aggregate_pushdown,
            max_in_flight: self.max_in_flight.max(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::ReadoutStatus;

    #[test]
    fn test_summaries_from_observations_folds_by_variant() {
        let rows = vec![
            Row::new(vec![Value::from("A"), Value::from(10.0)]),
            Row::new(vec![Value::from("B"), Value::from(5.0)]),
            Row::new(vec![Value::from("A"), Value::from(20.0)]),
        ];
        let summaries =
            ReadoutComputer::<crate::warehouse::MemoryWarehouse>::summaries_from_observations(
                &rows,
            )
            .unwrap();

        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].variant(), "A");
        assert!((summaries[0].mean() - 15.0).abs() < f64::EPSILON);
        assert_eq!(summaries[0].count(), 2);
        assert_eq!(summaries[1].variant(), "B");
        assert_eq!(summaries[1].count(), 1);
    }

    #[test]
    fn test_summaries_from_aggregated_rejects_bad_rows() {
        let rows = vec![Row::new(vec![Value::from("A"), Value::from("oops")])];
        let result =
            ReadoutComputer::<crate::warehouse::MemoryWarehouse>::summaries_from_aggregated(&rows);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_missing_table_yields_error_status() {
        let warehouse = Arc::new(crate::warehouse::MemoryWarehouse::new());
        let computer = ReadoutComputer::new(warehouse);
        let experiment = Experiment::new("exp_001", "test", "fact_missing");

        let result = computer.compute_readout(&experiment).await;
        assert_eq!(result.status(), ReadoutStatus::Error);
        assert!(result.failure().is_some());
    }
}
