//! Row predicates shared by exposures, metric sources and funnel steps
//!
//! Everything here compiles model filters into [`Expr`] predicates over one
//! row of the events table (or of a warehouse table). A table alias can be
//! passed when the row source is aliased inside a join.

use crate::error::{ExperimentError, Result};
use crate::model::{
    ActionCatalog, DateRange, EventSource, PropertyFilter, PropertyOperator, PropertyType, Scalar,
    TeamSettings,
};
use crate::sql::ast::{
    Expr, Function, JsonColumn, PropertyKind, PropertyRef, and, col, func, lit_bool, lit_datetime,
    lit_float, lit_int, lit_str, or, qcol,
};

/// Event name column
pub const EVENT_COLUMN: &str = "event";
/// Event timestamp column
pub const TIMESTAMP_COLUMN: &str = "timestamp";
/// Event id column
pub const UUID_COLUMN: &str = "uuid";
/// Session id column
pub const SESSION_COLUMN: &str = "$session_id";

/// Column of the row source, qualified when an alias is given
pub fn column(table: Option<&str>, name: &str) -> Expr {
    match table {
        Some(table) => qcol(table, name),
        None => col(name),
    }
}

/// Property of a row as text or number
///
/// Event and person properties are extracted from their JSON columns;
/// warehouse properties are the raw column.
pub fn property_expr(
    key: &str,
    property_type: PropertyType,
    kind: PropertyKind,
    table: Option<&str>,
) -> Expr {
    let json_column = match property_type {
        PropertyType::Event => JsonColumn::Properties,
        PropertyType::Person => JsonColumn::PersonProperties,
        PropertyType::DataWarehouse => {
            let raw = column(table, key);
            return match kind {
                PropertyKind::String => func(Function::ToString, vec![raw]),
                PropertyKind::Number => func(Function::ToFloat, vec![raw]),
            };
        }
    };

    Expr::Property(PropertyRef {
        table: table.map(str::to_string),
        column: json_column,
        key: key.to_string(),
        kind,
    })
}

/// Compile a property filter using the filter's own property type
pub fn property_filter_expr(filter: &PropertyFilter, table: Option<&str>) -> Result<Expr> {
    compile_filter(filter, filter.property_type, table)
}

/// Compile a property filter against raw warehouse columns
pub fn warehouse_filter_expr(filter: &PropertyFilter, table: Option<&str>) -> Result<Expr> {
    compile_filter(filter, PropertyType::DataWarehouse, table)
}

fn compile_filter(
    filter: &PropertyFilter,
    property_type: PropertyType,
    table: Option<&str>,
) -> Result<Expr> {
    let text = || property_expr(&filter.key, property_type, PropertyKind::String, table);

    let scalars: Vec<&Scalar> = filter
        .value
        .as_ref()
        .map(|v| v.scalars())
        .unwrap_or_default();
    let presence_only = matches!(
        filter.operator,
        PropertyOperator::IsSet | PropertyOperator::IsNotSet
    );
    if scalars.is_empty() && !presence_only {
        return Err(ExperimentError::InvalidMetric(format!(
            "property filter on '{}' needs a value for operator {:?}",
            filter.key, filter.operator
        )));
    }
    let texts: Vec<Expr> = scalars.iter().map(|s| lit_str(s.as_text())).collect();

    // Negative operators also match rows where the property is missing
    let missing_ok = |e: Expr| e.or_else(lit_bool(true));

    let expr = match filter.operator {
        PropertyOperator::Exact if texts.len() == 1 => text().equals(texts[0].clone()),
        PropertyOperator::Exact => text().in_list(texts),
        PropertyOperator::IsNot if texts.len() == 1 => {
            missing_ok(text().not_equals(texts[0].clone()))
        }
        PropertyOperator::IsNot => missing_ok(text().not_in_list(texts)),
        PropertyOperator::Icontains => or(texts
            .into_iter()
            .map(|t| func(Function::PositionCaseInsensitive, vec![text(), t]).gt(lit_int(0)))
            .collect()),
        PropertyOperator::NotIcontains => and(texts
            .into_iter()
            .map(|t| {
                let position = func(Function::PositionCaseInsensitive, vec![text(), t]);
                missing_ok(position.equals(lit_int(0)))
            })
            .collect()),
        PropertyOperator::Regex => or(texts
            .into_iter()
            .map(|t| func(Function::Match, vec![text(), t]))
            .collect()),
        PropertyOperator::NotRegex => and(texts
            .into_iter()
            .map(|t| missing_ok(func(Function::Match, vec![text(), t]).negate()))
            .collect()),
        PropertyOperator::Gt
        | PropertyOperator::Gte
        | PropertyOperator::Lt
        | PropertyOperator::Lte => {
            let threshold = scalars[0].as_number().ok_or_else(|| {
                ExperimentError::InvalidMetric(format!(
                    "property filter on '{}' compares against non-numeric value '{}'",
                    filter.key,
                    scalars[0].as_text()
                ))
            })?;
            let number = property_expr(&filter.key, property_type, PropertyKind::Number, table);
            let threshold = lit_float(threshold);
            match filter.operator {
                PropertyOperator::Gt => number.gt(threshold),
                PropertyOperator::Gte => number.gt_eq(threshold),
                PropertyOperator::Lt => number.lt(threshold),
                _ => number.lt_eq(threshold),
            }
        }
        PropertyOperator::IsSet => text().is_not_null(),
        PropertyOperator::IsNotSet => text().is_null(),
    };

    Ok(expr)
}

/// Conjunction of property filters
pub fn properties_expr(filters: &[PropertyFilter], table: Option<&str>) -> Result<Expr> {
    let parts = filters
        .iter()
        .map(|f| property_filter_expr(f, table))
        .collect::<Result<Vec<_>>>()?;
    Ok(and(parts))
}

/// Rows of an event source: event name (when set) plus its property filters
pub fn event_predicate(source: &EventSource, table: Option<&str>) -> Result<Expr> {
    let mut parts = Vec::with_capacity(source.properties.len() + 1);
    if let Some(event) = &source.event {
        parts.push(column(table, EVENT_COLUMN).equals(lit_str(event.clone())));
    }
    parts.push(properties_expr(&source.properties, table)?);
    Ok(and(parts))
}

/// Rows matching any step of a saved action, plus extra property filters
///
/// An action missing from the catalog matches nothing.
pub fn action_predicate(
    id: i64,
    properties: &[PropertyFilter],
    actions: &dyn ActionCatalog,
    table: Option<&str>,
) -> Result<Expr> {
    let Some(action) = actions.action(id) else {
        tracing::warn!(action_id = id, "action not found, compiling to an empty match");
        return Ok(lit_bool(false));
    };

    let steps = action
        .steps
        .iter()
        .map(|step| {
            event_predicate(
                &EventSource {
                    event: step.event.clone(),
                    properties: step.properties.clone(),
                },
                table,
            )
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(and(vec![or(steps), properties_expr(properties, table)?]))
}

/// Rows that are not test traffic, or `true` when filtering is off
pub fn test_account_predicate(
    enabled: bool,
    settings: &TeamSettings,
    table: Option<&str>,
) -> Result<Expr> {
    if !enabled {
        return Ok(lit_bool(true));
    }
    properties_expr(&settings.test_account_filters, table)
}

/// `from <= ts <= to`
pub fn timestamp_within(ts: Expr, range: &DateRange) -> Expr {
    and(vec![
        ts.clone().gt_eq(lit_datetime(range.from)),
        ts.lt_eq(lit_datetime(range.to)),
    ])
}

#[cfg(test)]
#[path = "filters_test.rs"]
mod filters_test;
