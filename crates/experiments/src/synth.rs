//! Expression synthesizer
//!
//! Maps a mean metric to the value each metric row contributes and to the
//! aggregation that folds those values into one number per entity. Both are
//! pure functions of the metric; plans call them wherever they need them.

use sqlparser::ast::{
    BinaryOperator, DuplicateTreatment, Expr as SqlExpr, FunctionArg, FunctionArgExpr,
    FunctionArguments, UnaryOperator, Value as SqlValue,
};
use sqlparser::dialect::ClickHouseDialect;
use sqlparser::parser::Parser;
use sqlparser::tokenizer::Token;

use crate::error::{ExperimentError, Result};
use crate::filters::{SESSION_COLUMN, column, property_expr};
use crate::model::{MathType, MeanMetric, MetricSource, PropertyType};
use crate::sql::ast::{
    AggregateFunction, Expr, Function, PropertyKind, agg, func, if_then, lit_float, lit_int,
    lit_str,
};

/// Aggregation named by the outermost call of a custom expression
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationName {
    Sum,
    Avg,
    Count,
    Min,
    Max,
}

impl AggregationName {
    fn parse(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "sum" => Some(Self::Sum),
            "avg" => Some(Self::Avg),
            "count" => Some(Self::Count),
            "min" => Some(Self::Min),
            "max" => Some(Self::Max),
            _ => None,
        }
    }
}

/// How per-row values fold into one value per entity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueAggregation {
    /// Sum, 0 without rows
    Sum,
    /// Average, 0 without rows
    Avg,
    /// Minimum, 0 without rows
    Min,
    /// Maximum, 0 without rows
    Max,
    /// Number of non-NULL values
    Count,
    /// Number of distinct non-NULL values
    Distinct,
}

impl ValueAggregation {
    /// Aggregation for a math type; custom expressions are resolved by
    /// [`MetricValue::for_metric`]
    pub fn for_math(math: MathType) -> Self {
        match math {
            MathType::Avg => Self::Avg,
            MathType::Min => Self::Min,
            MathType::Max => Self::Max,
            MathType::UniqueSession | MathType::UniqueGroup | MathType::Dau => Self::Distinct,
            MathType::Total | MathType::Sum | MathType::Expression | MathType::Unrecognized => {
                Self::Sum
            }
        }
    }

    /// SQL aggregate over a value column
    pub fn aggregate(&self, value: Expr) -> Expr {
        let zero = lit_int(0);
        match self {
            Self::Sum => agg(AggregateFunction::Sum, vec![value]).or_else(zero),
            Self::Avg => agg(AggregateFunction::Avg, vec![value]).or_else(zero),
            Self::Min => agg(AggregateFunction::Min, vec![value]).or_else(zero),
            Self::Max => agg(AggregateFunction::Max, vec![value]).or_else(zero),
            Self::Count => agg(AggregateFunction::Count, vec![value]),
            Self::Distinct => agg(AggregateFunction::UniqExact, vec![value]),
        }
    }

    /// The same aggregation over an array of non-NULL values
    pub fn aggregate_array(&self, values: Expr) -> Expr {
        let or_zero = |f: Function| {
            if_then(
                func(Function::Empty, vec![values.clone()]),
                lit_int(0),
                func(f, vec![values.clone()]),
            )
        };
        match self {
            Self::Sum => func(Function::ArraySum, vec![values.clone()]),
            Self::Avg => or_zero(Function::ArrayAvg),
            Self::Min => or_zero(Function::ArrayMin),
            Self::Max => or_zero(Function::ArrayMax),
            Self::Count => func(Function::Length, vec![values.clone()]),
            Self::Distinct => func(
                Function::Length,
                vec![func(Function::ArrayDistinct, vec![values.clone()])],
            ),
        }
    }
}

/// Value expression plus aggregation for one mean metric
#[derive(Debug, Clone, PartialEq)]
pub struct MetricValue {
    /// Value of one metric row
    pub value: Expr,
    /// Fold from row values to the entity value
    pub aggregation: ValueAggregation,
}

impl MetricValue {
    /// Synthesize the value and aggregation of a mean metric
    ///
    /// `entity` is the entity id as seen from the metric row; `table` is the
    /// alias of the metric row source.
    pub fn for_metric(metric: &MeanMetric, entity: Expr, table: Option<&str>) -> Result<Self> {
        if metric.math == MathType::Expression {
            let text = metric.math_expression.as_deref().ok_or_else(|| {
                ExperimentError::InvalidMetric("math 'expression' requires math_expression".into())
            })?;
            let analyzed = analyze_expression(text)?;
            let aggregation = match (analyzed.name, analyzed.distinct) {
                (Some(AggregationName::Count), true) => ValueAggregation::Distinct,
                (Some(AggregationName::Count), false) => ValueAggregation::Count,
                (Some(AggregationName::Avg), _) => ValueAggregation::Avg,
                (Some(AggregationName::Min), _) => ValueAggregation::Min,
                (Some(AggregationName::Max), _) => ValueAggregation::Max,
                (Some(AggregationName::Sum), _) | (None, _) => ValueAggregation::Sum,
            };
            let kind = match aggregation {
                ValueAggregation::Count | ValueAggregation::Distinct => PropertyKind::String,
                _ => PropertyKind::Number,
            };
            let ctx = ExprContext {
                table,
                warehouse: matches!(metric.source, MetricSource::DataWarehouseNode(_)),
            };
            let value = translate_expression(&analyzed.inner, &ctx, kind)?;
            return Ok(Self { value, aggregation });
        }

        Ok(Self {
            value: value_expression(metric, entity, table)?,
            aggregation: ValueAggregation::for_math(metric.math),
        })
    }
}

/// Value one metric row contributes
///
/// Sessions for `unique_session`, the entity for `dau`/`unique_group`, the
/// configured property otherwise, or `1` when no property is configured.
pub fn value_expression(metric: &MeanMetric, entity: Expr, table: Option<&str>) -> Result<Expr> {
    match metric.math {
        MathType::UniqueSession => match metric.source {
            MetricSource::DataWarehouseNode(_) => Err(ExperimentError::UnsupportedMetric(
                "unique_session is not available for warehouse sources".to_string(),
            )),
            _ => Ok(column(table, SESSION_COLUMN)),
        },
        MathType::Dau | MathType::UniqueGroup => Ok(entity),
        _ => Ok(get_metric_value(metric, table)),
    }
}

/// Aggregation expression over the value column for a metric
pub fn aggregation_expression(metric: &MeanMetric, value: Expr) -> Result<Expr> {
    let aggregation = match metric.math {
        MathType::Expression => {
            MetricValue::for_metric(metric, lit_int(0), None)?.aggregation
        }
        math => ValueAggregation::for_math(math),
    };
    Ok(aggregation.aggregate(value))
}

/// Numeric value of the configured property, or `1` without one
///
/// Warehouse properties are raw columns; event properties are extracted from
/// the JSON properties column.
pub fn get_metric_value(metric: &MeanMetric, table: Option<&str>) -> Expr {
    let Some(property) = metric.math_property.as_deref() else {
        return lit_int(1);
    };
    let property_type = match metric.source {
        MetricSource::DataWarehouseNode(_) => PropertyType::DataWarehouse,
        MetricSource::EventsNode(_) | MetricSource::ActionsNode(_) => PropertyType::Event,
    };
    property_expr(property, property_type, PropertyKind::Number, table)
}

// =============================================================================
// Custom expressions
// =============================================================================

struct AnalyzedExpression {
    name: Option<AggregationName>,
    distinct: bool,
    inner: SqlExpr,
}

/// Split an aggregated expression into aggregation name and operand
///
/// `sum(a - b)` yields `(Some(Sum), a - b)`, `count(distinct x)` yields
/// `(Some(Count), x)`. Anything else yields `(None, expr)`.
pub fn extract_aggregation_and_inner_expr(
    text: &str,
) -> Result<(Option<AggregationName>, SqlExpr)> {
    let analyzed = analyze_expression(text)?;
    Ok((analyzed.name, analyzed.inner))
}

fn parse_expression(text: &str) -> Result<SqlExpr> {
    let dialect = ClickHouseDialect {};
    let mut parser = Parser::new(&dialect)
        .try_with_sql(text)
        .map_err(|e| ExperimentError::InvalidExpression(format!("'{}': {}", text, e)))?;
    let expr = parser
        .parse_expr()
        .map_err(|e| ExperimentError::InvalidExpression(format!("'{}': {}", text, e)))?;

    let next = parser.peek_token();
    if next.token != Token::EOF {
        return Err(ExperimentError::InvalidExpression(format!(
            "'{}': unexpected trailing input at '{}'",
            text, next.token
        )));
    }
    Ok(expr)
}

fn unnest(expr: SqlExpr) -> SqlExpr {
    match expr {
        SqlExpr::Nested(inner) => unnest(*inner),
        other => other,
    }
}

fn analyze_expression(text: &str) -> Result<AnalyzedExpression> {
    let expr = unnest(parse_expression(text)?);

    if let SqlExpr::Function(function) = &expr
        && let Some(name) = AggregationName::parse(&function.name.to_string())
        && let FunctionArguments::List(list) = &function.args
        && let [FunctionArg::Unnamed(FunctionArgExpr::Expr(inner))] = list.args.as_slice()
    {
        return Ok(AnalyzedExpression {
            name: Some(name),
            distinct: matches!(list.duplicate_treatment, Some(DuplicateTreatment::Distinct)),
            inner: inner.clone(),
        });
    }

    Ok(AnalyzedExpression {
        name: None,
        distinct: false,
        inner: expr,
    })
}

/// Where identifiers of a custom expression resolve
#[derive(Debug, Clone, Copy)]
pub struct ExprContext<'a> {
    /// Alias of the row source
    pub table: Option<&'a str>,
    /// Identifiers are warehouse columns
    pub warehouse: bool,
}

/// Translate a parsed operand into the expression tree
///
/// A bare identifier takes `kind`; identifiers inside arithmetic are numeric.
pub fn translate_expression(
    expr: &SqlExpr,
    ctx: &ExprContext<'_>,
    kind: PropertyKind,
) -> Result<Expr> {
    let numeric = |e: &SqlExpr| translate_expression(e, ctx, PropertyKind::Number);

    match expr {
        SqlExpr::Nested(inner) => translate_expression(inner, ctx, kind),
        SqlExpr::Identifier(ident) => identifier(&[ident.value.as_str()], ctx, kind),
        SqlExpr::CompoundIdentifier(parts) => {
            let parts: Vec<&str> = parts.iter().map(|p| p.value.as_str()).collect();
            identifier(&parts, ctx, kind)
        }
        SqlExpr::Value(value) => match &value.value {
            SqlValue::Number(n, _) => match n.parse::<i64>() {
                Ok(i) => Ok(lit_int(i)),
                Err(_) => n.parse::<f64>().map(lit_float).map_err(|_| {
                    ExperimentError::InvalidExpression(format!("invalid number '{}'", n))
                }),
            },
            SqlValue::SingleQuotedString(s) => Ok(lit_str(s.clone())),
            other => Err(ExperimentError::InvalidExpression(format!(
                "unsupported literal '{}'",
                other
            ))),
        },
        SqlExpr::UnaryOp { op, expr } => match op {
            UnaryOperator::Minus => Ok(Expr::Neg(Box::new(numeric(expr)?))),
            UnaryOperator::Plus => numeric(expr),
            other => Err(ExperimentError::InvalidExpression(format!(
                "unsupported operator '{}'",
                other
            ))),
        },
        SqlExpr::BinaryOp { left, op, right } => {
            let (left, right) = (numeric(left)?, numeric(right)?);
            match op {
                BinaryOperator::Plus => Ok(left.plus(right)),
                BinaryOperator::Minus => Ok(left.minus(right)),
                BinaryOperator::Multiply => Ok(left.multiply(right)),
                BinaryOperator::Divide => Ok(left.divide(right)),
                other => Err(ExperimentError::InvalidExpression(format!(
                    "unsupported operator '{}'",
                    other
                ))),
            }
        }
        SqlExpr::Function(function) => {
            let name = function.name.to_string().to_lowercase();
            let scalar = match name.as_str() {
                "abs" => Function::Abs,
                "round" => Function::Round,
                "coalesce" => Function::Coalesce,
                "greatest" => Function::Greatest,
                "least" => Function::Least,
                "tofloat" | "tofloat64" | "tofloat64ornull" => Function::ToFloat,
                _ => {
                    return Err(ExperimentError::InvalidExpression(format!(
                        "unsupported function '{}'",
                        function.name
                    )));
                }
            };
            let FunctionArguments::List(list) = &function.args else {
                return Err(ExperimentError::InvalidExpression(format!(
                    "function '{}' needs arguments",
                    function.name
                )));
            };
            let args = list
                .args
                .iter()
                .map(|arg| match arg {
                    FunctionArg::Unnamed(FunctionArgExpr::Expr(e)) => numeric(e),
                    other => Err(ExperimentError::InvalidExpression(format!(
                        "unsupported argument '{}'",
                        other
                    ))),
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(func(scalar, args))
        }
        other => Err(ExperimentError::InvalidExpression(format!(
            "unsupported expression '{}'",
            other
        ))),
    }
}

fn identifier(parts: &[&str], ctx: &ExprContext<'_>, kind: PropertyKind) -> Result<Expr> {
    if ctx.warehouse {
        let Some(name) = parts.last() else {
            return Err(ExperimentError::InvalidExpression("empty identifier".into()));
        };
        let raw = column(ctx.table, name);
        return Ok(match kind {
            PropertyKind::Number => func(Function::ToFloat, vec![raw]),
            PropertyKind::String => raw,
        });
    }

    match parts {
        ["properties", key] => Ok(property_expr(key, PropertyType::Event, kind, ctx.table)),
        ["person", "properties", key] => {
            Ok(property_expr(key, PropertyType::Person, kind, ctx.table))
        }
        [name] => Ok(column(ctx.table, name)),
        _ => Err(ExperimentError::InvalidExpression(format!(
            "unknown identifier '{}'",
            parts.join(".")
        ))),
    }
}

#[cfg(test)]
#[path = "synth_test.rs"]
mod synth_test;
