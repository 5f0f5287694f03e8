//! Readout query construction and parsing
//!
//! The computer sends parameterized SQL to the warehouse; warehouse
//! implementations that interpret SQL themselves (the in-memory one) parse
//! it back into a typed plan here. Experiment IDs travel as bound
//! parameters, never spliced into the query text. Table names cannot be
//! bound, so metric table names are validated as plain identifiers before
//! interpolation.
//!
//! ## Supported query shapes
//!
//! - Variant statistics with aggregation pushed down:
//!   `SELECT variant, AVG(value), COUNT(*) ... INNER JOIN ... GROUP BY variant`
//! - Raw observation rows: `SELECT variant, value ... INNER JOIN ...`
//! - Assignment count: `SELECT COUNT(*) FROM assignments WHERE experiment_id = $1`
//!
//! References:
//! - sqlparser-rs: <https://docs.rs/sqlparser>

use sqlparser::ast::{
    Expr, FunctionArguments, GroupByExpr, Join, JoinConstraint, JoinOperator, Query, Select,
    SelectItem, SetExpr, Statement, TableFactor, Value,
};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

use crate::{Error, Result};

/// Column and table names the readout queries are built against.
///
/// Defaults match the conventional experimentation schema: an
/// `experiment_assignments` table keyed by `user_id`, and one metric table
/// per target metric with a `metric_value` column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadoutQuery {
    /// Assignment table name.
    pub assignments_table: String,
    /// Experiment identifier column (filter target).
    pub experiment_column: String,
    /// User identifier column, present on both sides of the join.
    pub user_column: String,
    /// Variant label column on the assignment table.
    pub variant_column: String,
    /// Metric value column on the metric table.
    pub value_column: String,
}

impl Default for ReadoutQuery {
    fn default() -> Self {
        Self {
            assignments_table: "experiment_assignments".to_string(),
            experiment_column: "experiment_id".to_string(),
            user_column: "user_id".to_string(),
            variant_column: "variant".to_string(),
            value_column: "metric_value".to_string(),
        }
    }
}

impl ReadoutQuery {
    /// Create a query template with the default schema names.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// SQL for per-variant mean and count, aggregation pushed down to the
    /// warehouse. The experiment ID binds to `$1`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParam`] if `metric_table` is not a plain
    /// identifier.
    pub fn variant_stats_sql(&self, metric_table: &str) -> Result<String> {
        validate_identifier(metric_table)?;
        Ok(format!(
            "SELECT a.{variant}, AVG(m.{value}) AS mean_value, COUNT(*) AS n \
             FROM {assignments} AS a \
             INNER JOIN {metric} AS m ON a.{user} = m.{user} \
             WHERE a.{experiment} = $1 \
             GROUP BY a.{variant}",
            variant = self.variant_column,
            value = self.value_column,
            assignments = self.assignments_table,
            metric = metric_table,
            user = self.user_column,
            experiment = self.experiment_column,
        ))
    }

    /// SQL for raw (variant, metric value) observation rows, one per joined
    /// user, for client-side aggregation. The experiment ID binds to `$1`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParam`] if `metric_table` is not a plain
    /// identifier.
    pub fn observations_sql(&self, metric_table: &str) -> Result<String> {
        validate_identifier(metric_table)?;
        Ok(format!(
            "SELECT a.{variant}, m.{value} \
             FROM {assignments} AS a \
             INNER JOIN {metric} AS m ON a.{user} = m.{user} \
             WHERE a.{experiment} = $1",
            variant = self.variant_column,
            value = self.value_column,
            assignments = self.assignments_table,
            metric = metric_table,
            user = self.user_column,
            experiment = self.experiment_column,
        ))
    }

    /// SQL counting all assignment rows for an experiment, joined or not.
    /// The experiment ID binds to `$1`.
    #[must_use]
    pub fn assignment_count_sql(&self) -> String {
        format!(
            "SELECT COUNT(*) AS n FROM {assignments} WHERE {experiment} = $1",
            assignments = self.assignments_table,
            experiment = self.experiment_column,
        )
    }
}

fn validate_identifier(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidParam(format!(
            "metric table name is not a plain identifier: {name:?}"
        )))
    }
}

/// Parsed readout query, ready for execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    /// Assignment-to-metric join, grouped (or groupable) by variant.
    VariantStats(VariantStatsPlan),
    /// Bare assignment count for an experiment.
    AssignmentCount(AssignmentCountPlan),
}

/// Join-and-group plan for per-variant statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantStatsPlan {
    /// Assignment table name.
    pub assignments_table: String,
    /// Metric table name.
    pub metric_table: String,
    /// Join key column (both sides).
    pub user_column: String,
    /// Filter column compared against the bound experiment ID.
    pub experiment_column: String,
    /// Grouping column.
    pub variant_column: String,
    /// Metric value column.
    pub value_column: String,
    /// 1-based index of the bound experiment ID parameter.
    pub param_index: usize,
    /// Whether AVG/COUNT are pushed down (true) or raw rows are returned.
    pub aggregated: bool,
}

/// Count plan over the assignment table alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignmentCountPlan {
    /// Assignment table name.
    pub assignments_table: String,
    /// Filter column compared against the bound experiment ID.
    pub experiment_column: String,
    /// 1-based index of the bound experiment ID parameter.
    pub param_index: usize,
}

/// Parser for the readout query shapes.
pub struct QueryEngine {
    dialect: GenericDialect,
}

impl Default for QueryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryEngine {
    /// Create a new query engine.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            dialect: GenericDialect {},
        }
    }

    /// Parse readout SQL into a typed [`Plan`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] if the SQL is invalid or does not match one
    /// of the supported readout query shapes.
    ///
    /// # Example
    /// ```
    /// use lectura_db::query::{Plan, QueryEngine, ReadoutQuery};
    ///
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let sql = ReadoutQuery::new().variant_stats_sql("fact_dau")?;
    /// let plan = QueryEngine::new().parse(&sql)?;
    /// assert!(matches!(plan, Plan::VariantStats(p) if p.aggregated));
    /// # Ok(())
    /// # }
    /// ```
    pub fn parse(&self, sql: &str) -> Result<Plan> {
        let statements = Parser::parse_sql(&self.dialect, sql)
            .map_err(|e| Error::Parse(format!("SQL parse error: {e}")))?;

        if statements.len() != 1 {
            return Err(Error::Parse("Only single statements supported".to_string()));
        }

        let Statement::Query(query) = &statements[0] else {
            return Err(Error::Parse("Only SELECT queries supported".to_string()));
        };

        Self::parse_select_query(query)
    }

    fn parse_select_query(query: &Query) -> Result<Plan> {
        let SetExpr::Select(select) = query.body.as_ref() else {
            return Err(Error::Parse("Only SELECT queries supported".to_string()));
        };

        if select.from.len() != 1 {
            return Err(Error::Parse(
                "Readout queries use exactly one FROM table".to_string(),
            ));
        }

        let table_with_joins = &select.from[0];
        let left_table = Self::table_name(&table_with_joins.relation)?;
        let (filter_column, param_index) = Self::extract_filter(select)?;
        let (columns, aggregations) = Self::extract_projection(&select.projection)?;

        match table_with_joins.joins.as_slice() {
            [] if columns.is_empty() => {
                Self::build_count_plan(left_table, filter_column, param_index, &aggregations)
            }
            [] => Err(Error::Parse(
                "Join-less readout queries must project exactly COUNT(*)".to_string(),
            )),
            [join] => Self::build_stats_plan(
                left_table,
                join,
                filter_column,
                param_index,
                columns,
                aggregations,
                &select.group_by,
            ),
            _ => Err(Error::Parse(
                "Readout queries use at most one join".to_string(),
            )),
        }
    }

    fn build_count_plan(
        assignments_table: String,
        experiment_column: String,
        param_index: usize,
        aggregations: &[(String, String, Option<String>)],
    ) -> Result<Plan> {
        match aggregations {
            [(func, col, _)] if func == "COUNT" && col == "*" => {
                Ok(Plan::AssignmentCount(AssignmentCountPlan {
                    assignments_table,
                    experiment_column,
                    param_index,
                }))
            }
            _ => Err(Error::Parse(
                "Join-less readout queries must project exactly COUNT(*)".to_string(),
            )),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn build_stats_plan(
        assignments_table: String,
        join: &Join,
        experiment_column: String,
        param_index: usize,
        columns: Vec<String>,
        aggregations: Vec<(String, String, Option<String>)>,
        group_by: &GroupByExpr,
    ) -> Result<Plan> {
        let metric_table = Self::join_table(join)?;
        let user_column = Self::join_key(join)?;
        let group_columns = Self::extract_group_by(group_by);

        let (variant_column, value_column, aggregated) = if aggregations.is_empty() {
            // Raw shape: SELECT variant, value
            match columns.as_slice() {
                [variant, value] => (variant.clone(), value.clone(), false),
                _ => {
                    return Err(Error::Parse(
                        "Raw readout queries project exactly (variant, value)".to_string(),
                    ))
                }
            }
        } else {
            // Aggregated shape: SELECT variant, AVG(value), COUNT(*)
            let variant = match columns.as_slice() {
                [variant] => variant.clone(),
                _ => {
                    return Err(Error::Parse(
                        "Aggregated readout queries project exactly one grouping column"
                            .to_string(),
                    ))
                }
            };
            let mut value = None;
            let mut has_count = false;
            for (func, col, _) in &aggregations {
                match func.as_str() {
                    "AVG" => value = Some(col.clone()),
                    "COUNT" => has_count = true,
                    other => {
                        return Err(Error::Parse(format!(
                            "Unsupported aggregate in readout query: {other}"
                        )))
                    }
                }
            }
            let value = value.ok_or_else(|| {
                Error::Parse("Aggregated readout queries require AVG(value)".to_string())
            })?;
            if !has_count {
                return Err(Error::Parse(
                    "Aggregated readout queries require COUNT(*)".to_string(),
                ));
            }
            if group_columns.len() != 1 || group_columns[0] != variant {
                return Err(Error::Parse(
                    "Aggregated readout queries group by the variant column".to_string(),
                ));
            }
            (variant, value, true)
        };

        Ok(Plan::VariantStats(VariantStatsPlan {
            assignments_table,
            metric_table,
            user_column,
            experiment_column,
            variant_column,
            value_column,
            param_index,
            aggregated,
        }))
    }

    fn table_name(relation: &TableFactor) -> Result<String> {
        match relation {
            TableFactor::Table { name, .. } => Ok(name
                .0
                .last()
                .map(|ident| ident.value.clone())
                .unwrap_or_default()),
            _ => Err(Error::Parse(
                "Only plain table references supported".to_string(),
            )),
        }
    }

    fn join_table(join: &Join) -> Result<String> {
        Self::table_name(&join.relation)
    }

    /// Extract the join key, requiring `ON a.<col> = m.<col>` with the same
    /// column name on both sides.
    fn join_key(join: &Join) -> Result<String> {
        let constraint = match &join.join_operator {
            JoinOperator::Inner(constraint) => constraint,
            _ => return Err(Error::Parse("Only INNER JOIN supported".to_string())),
        };
        let JoinConstraint::On(expr) = constraint else {
            return Err(Error::Parse("Only ON join constraints supported".to_string()));
        };
        let Expr::BinaryOp { left, op, right } = expr else {
            return Err(Error::Parse(
                "Join constraint must be a single equality".to_string(),
            ));
        };
        if *op != sqlparser::ast::BinaryOperator::Eq {
            return Err(Error::Parse(
                "Join constraint must be a single equality".to_string(),
            ));
        }
        let left_col = Self::column_name(left)?;
        let right_col = Self::column_name(right)?;
        if left_col != right_col {
            return Err(Error::Parse(format!(
                "Join key must match on both sides: {left_col} vs {right_col}"
            )));
        }
        Ok(left_col)
    }

    /// Extract `WHERE <col> = $n` as (column, 1-based param index).
    fn extract_filter(select: &Select) -> Result<(String, usize)> {
        let Some(Expr::BinaryOp { left, op, right }) = &select.selection else {
            return Err(Error::Parse(
                "Readout queries filter on the experiment ID".to_string(),
            ));
        };
        if *op != sqlparser::ast::BinaryOperator::Eq {
            return Err(Error::Parse(
                "Readout filter must be a single equality".to_string(),
            ));
        }
        let column = Self::column_name(left)?;
        let Expr::Value(Value::Placeholder(placeholder)) = right.as_ref() else {
            return Err(Error::Parse(
                "Readout filter compares against a bound parameter".to_string(),
            ));
        };
        let index: usize = placeholder
            .trim_start_matches('$')
            .parse()
            .map_err(|_| Error::Parse(format!("Invalid placeholder: {placeholder}")))?;
        Ok((column, index))
    }

    fn extract_projection(
        projection: &[SelectItem],
    ) -> Result<(Vec<String>, Vec<(String, String, Option<String>)>)> {
        let mut columns = Vec::new();
        let mut aggregations = Vec::new();

        for item in projection {
            let (expr, alias) = match item {
                SelectItem::UnnamedExpr(expr) => (expr, None),
                SelectItem::ExprWithAlias { expr, alias } => (expr, Some(alias.value.clone())),
                SelectItem::Wildcard(_) | SelectItem::QualifiedWildcard(..) => {
                    return Err(Error::Parse(
                        "Wildcard projections not supported in readout queries".to_string(),
                    ))
                }
            };
            if let Some((func, col)) = Self::extract_aggregate(expr) {
                aggregations.push((func, col, alias));
            } else {
                columns.push(Self::column_name(expr)?);
            }
        }

        Ok((columns, aggregations))
    }

    fn extract_aggregate(expr: &Expr) -> Option<(String, String)> {
        if let Expr::Function(func) = expr {
            let func_name = func.name.to_string().to_uppercase();
            let col = match &func.args {
                FunctionArguments::List(func_arg_list) => func_arg_list
                    .args
                    .first()
                    .map_or_else(|| "*".to_string(), |arg| strip_qualifier(&arg.to_string())),
                _ => "*".to_string(),
            };
            return Some((func_name, col));
        }
        None
    }

    /// Column name from a plain or qualified identifier, qualifier stripped.
    fn column_name(expr: &Expr) -> Result<String> {
        match expr {
            Expr::Identifier(ident) => Ok(ident.value.clone()),
            Expr::CompoundIdentifier(idents) => Ok(idents
                .last()
                .map(|ident| ident.value.clone())
                .unwrap_or_default()),
            other => Err(Error::Parse(format!(
                "Expected a column reference, got: {other}"
            ))),
        }
    }

    fn extract_group_by(group_by: &GroupByExpr) -> Vec<String> {
        match group_by {
            GroupByExpr::All(_) => Vec::new(),
            GroupByExpr::Expressions(exprs, _) => exprs
                .iter()
                .map(|e| strip_qualifier(&e.to_string()))
                .collect(),
        }
    }
}

fn strip_qualifier(name: &str) -> String {
    name.rsplit('.').next().unwrap_or(name).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variant_stats_roundtrip() {
        let sql = ReadoutQuery::new().variant_stats_sql("fact_dau").unwrap();
        let plan = QueryEngine::new().parse(&sql).unwrap();

        let Plan::VariantStats(plan) = plan else {
            panic!("expected variant stats plan");
        };
        assert_eq!(plan.assignments_table, "experiment_assignments");
        assert_eq!(plan.metric_table, "fact_dau");
        assert_eq!(plan.user_column, "user_id");
        assert_eq!(plan.experiment_column, "experiment_id");
        assert_eq!(plan.variant_column, "variant");
        assert_eq!(plan.value_column, "metric_value");
        assert_eq!(plan.param_index, 1);
        assert!(plan.aggregated);
    }

    #[test]
    fn test_observations_roundtrip() {
        let sql = ReadoutQuery::new().observations_sql("fact_activation").unwrap();
        let plan = QueryEngine::new().parse(&sql).unwrap();

        let Plan::VariantStats(plan) = plan else {
            panic!("expected variant stats plan");
        };
        assert_eq!(plan.metric_table, "fact_activation");
        assert!(!plan.aggregated);
    }

    #[test]
    fn test_assignment_count_roundtrip() {
        let sql = ReadoutQuery::new().assignment_count_sql();
        let plan = QueryEngine::new().parse(&sql).unwrap();

        let Plan::AssignmentCount(plan) = plan else {
            panic!("expected assignment count plan");
        };
        assert_eq!(plan.assignments_table, "experiment_assignments");
        assert_eq!(plan.experiment_column, "experiment_id");
        assert_eq!(plan.param_index, 1);
    }

    #[test]
    fn test_metric_table_must_be_identifier() {
        let query = ReadoutQuery::new();
        assert!(query.variant_stats_sql("fact_dau; DROP TABLE users").is_err());
        assert!(query.variant_stats_sql("").is_err());
        assert!(query.observations_sql("1fact").is_err());
        assert!(query.variant_stats_sql("fact_dau_v2").is_ok());
    }

    #[test]
    fn test_rejects_non_select() {
        let err = QueryEngine::new()
            .parse("DELETE FROM experiment_assignments")
            .unwrap_err();
        assert!(err.to_string().contains("SELECT"));
    }

    #[test]
    fn test_rejects_multiple_statements() {
        let err = QueryEngine::new()
            .parse("SELECT COUNT(*) FROM t WHERE experiment_id = $1; SELECT 1")
            .unwrap_err();
        assert!(err.to_string().contains("single statements"));
    }

    #[test]
    fn test_rejects_missing_filter() {
        let err = QueryEngine::new()
            .parse("SELECT COUNT(*) AS n FROM experiment_assignments")
            .unwrap_err();
        assert!(err.to_string().contains("experiment ID"));
    }

    #[test]
    fn test_rejects_literal_filter() {
        // Experiment IDs must be bound, not inlined
        let err = QueryEngine::new()
            .parse("SELECT COUNT(*) AS n FROM experiment_assignments WHERE experiment_id = 'exp_001'")
            .unwrap_err();
        assert!(err.to_string().contains("bound parameter"));
    }

    #[test]
    fn test_rejects_mismatched_join_key() {
        let err = QueryEngine::new()
            .parse(
                "SELECT a.variant, m.metric_value FROM experiment_assignments AS a \
                 INNER JOIN fact_dau AS m ON a.user_id = m.account_id \
                 WHERE a.experiment_id = $1",
            )
            .unwrap_err();
        assert!(err.to_string().contains("Join key"));
    }

    #[test]
    fn test_rejects_unsupported_aggregate() {
        let err = QueryEngine::new()
            .parse(
                "SELECT a.variant, SUM(m.metric_value) AS s, COUNT(*) AS n \
                 FROM experiment_assignments AS a \
                 INNER JOIN fact_dau AS m ON a.user_id = m.user_id \
                 WHERE a.experiment_id = $1 GROUP BY a.variant",
            )
            .unwrap_err();
        assert!(err.to_string().contains("Unsupported aggregate"));
    }
}
