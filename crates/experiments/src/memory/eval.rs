//! Expression evaluation with ClickHouse semantics
//!
//! NULL propagates through comparisons and arithmetic, `AND`/`OR` are
//! three-valued, and aggregates skip NULL arguments.

use std::cmp::Ordering;
use std::collections::HashSet;

use chrono::{DateTime, Duration, TimeZone, Utc};
use regex::Regex;

use crate::memory::value::Value;
use crate::sql::ast::{
    AggregateFunction, BinaryOp, ColumnRef, Expr, Function, Literal, PropertyKind, PropertyRef,
};
use tally_query::QueryError;

type Result<T> = std::result::Result<T, QueryError>;

/// Qualified column names of a relation
pub type Schema = [(Option<String>, String)];

/// Rows an expression is evaluated against
#[derive(Clone, Copy)]
pub enum Frame<'a> {
    /// One row
    Row(&'a [Value]),
    /// The rows of one group; plain columns read the first row
    Group(&'a [&'a [Value]]),
}

/// Evaluates expressions over rows of one relation
pub struct Evaluator<'a> {
    schema: &'a Schema,
}

impl<'a> Evaluator<'a> {
    pub fn new(schema: &'a Schema) -> Self {
        Self { schema }
    }

    /// Evaluate `expr` in `frame`
    pub fn eval(&self, expr: &Expr, frame: Frame<'_>) -> Result<Value> {
        self.eval_bound(expr, frame, &[])
    }

    fn eval_bound(
        &self,
        expr: &Expr,
        frame: Frame<'_>,
        bindings: &[(String, Value)],
    ) -> Result<Value> {
        match expr {
            Expr::Column(column) => self.column(column, frame, bindings),
            Expr::Literal(literal) => Ok(literal_value(literal)),
            Expr::Property(property) => self.property(property, frame),
            Expr::Binary { op, left, right } => {
                let left = self.eval_bound(left, frame, bindings)?;
                let right = self.eval_bound(right, frame, bindings)?;
                binary(*op, left, right)
            }
            Expr::And(parts) => {
                let mut unknown = false;
                for part in parts {
                    match self.eval_bound(part, frame, bindings)?.truth() {
                        Some(false) => return Ok(Value::bool(false)),
                        None => unknown = true,
                        Some(true) => {}
                    }
                }
                Ok(if unknown { Value::Null } else { Value::bool(true) })
            }
            Expr::Or(parts) => {
                let mut unknown = false;
                for part in parts {
                    match self.eval_bound(part, frame, bindings)?.truth() {
                        Some(true) => return Ok(Value::bool(true)),
                        None => unknown = true,
                        Some(false) => {}
                    }
                }
                Ok(if unknown { Value::Null } else { Value::bool(false) })
            }
            Expr::Not(inner) => Ok(match self.eval_bound(inner, frame, bindings)?.truth() {
                Some(b) => Value::bool(!b),
                None => Value::Null,
            }),
            Expr::Neg(inner) => match self.eval_bound(inner, frame, bindings)? {
                Value::Null => Ok(Value::Null),
                Value::Int(n) => Ok(Value::Int(n.wrapping_neg())),
                Value::Float(f) => Ok(Value::Float(-f)),
                other => Err(type_error("negate", &other)),
            },
            Expr::In {
                expr,
                list,
                negated,
            } => {
                let value = self.eval_bound(expr, frame, bindings)?;
                if value.is_null() {
                    return Ok(Value::Null);
                }
                let mut found = false;
                for item in list {
                    let item = self.eval_bound(item, frame, bindings)?;
                    if value.compare(&item) == Some(Ordering::Equal) {
                        found = true;
                        break;
                    }
                }
                Ok(Value::bool(found != *negated))
            }
            Expr::IsNull { expr, negated } => {
                let value = self.eval_bound(expr, frame, bindings)?;
                Ok(Value::bool(value.is_null() != *negated))
            }
            Expr::If {
                cond,
                then,
                otherwise,
            } => {
                if self.eval_bound(cond, frame, bindings)?.truth() == Some(true) {
                    self.eval_bound(then, frame, bindings)
                } else {
                    self.eval_bound(otherwise, frame, bindings)
                }
            }
            Expr::MultiIf {
                branches,
                otherwise,
            } => {
                for (cond, value) in branches {
                    if self.eval_bound(cond, frame, bindings)?.truth() == Some(true) {
                        return self.eval_bound(value, frame, bindings);
                    }
                }
                self.eval_bound(otherwise, frame, bindings)
            }
            Expr::Function { func, args } => self.function(*func, args, frame, bindings),
            Expr::Aggregate {
                func,
                args,
                condition,
            } => {
                let Frame::Group(rows) = frame else {
                    return Err(QueryError::Execution(format!(
                        "aggregate {} used outside of a grouped query",
                        func.name()
                    )));
                };
                self.aggregate(*func, args, condition.as_deref(), rows)
            }
            Expr::Tuple(items) => Ok(Value::Tuple(
                items
                    .iter()
                    .map(|item| self.eval_bound(item, frame, bindings))
                    .collect::<Result<_>>()?,
            )),
            Expr::TupleElement { expr, index } => match self.eval_bound(expr, frame, bindings)? {
                Value::Null => Ok(Value::Null),
                Value::Tuple(items) => items
                    .get(index.wrapping_sub(1))
                    .cloned()
                    .ok_or_else(|| {
                        QueryError::Execution(format!("tuple has no element {}", index))
                    }),
                other => Err(type_error("tupleElement", &other)),
            },
            Expr::Lambda { .. } => Err(QueryError::Execution(
                "lambda is only valid as an array function argument".to_string(),
            )),
        }
    }

    fn column(
        &self,
        column: &ColumnRef,
        frame: Frame<'_>,
        bindings: &[(String, Value)],
    ) -> Result<Value> {
        if column.table.is_none()
            && let Some((_, value)) = bindings.iter().rev().find(|(name, _)| *name == column.name)
        {
            return Ok(value.clone());
        }

        let index = self.column_index(column.table.as_deref(), &column.name)?;
        let row = match frame {
            Frame::Row(row) => row,
            Frame::Group(rows) => match rows.first() {
                Some(row) => *row,
                None => return Ok(Value::Null),
            },
        };
        Ok(row.get(index).cloned().unwrap_or(Value::Null))
    }

    /// Position of a column; unqualified names match any qualifier
    pub fn column_index(&self, table: Option<&str>, name: &str) -> Result<usize> {
        self.schema
            .iter()
            .position(|(qualifier, column)| {
                column == name && (table.is_none() || qualifier.as_deref() == table)
            })
            .ok_or_else(|| match table {
                Some(table) => QueryError::ColumnNotFound(format!("{}.{}", table, name)),
                None => QueryError::ColumnNotFound(name.to_string()),
            })
    }

    fn property(&self, property: &PropertyRef, frame: Frame<'_>) -> Result<Value> {
        let column = ColumnRef {
            table: property.table.clone(),
            name: property.column.column_name().to_string(),
        };
        let json = self.column(&column, frame, &[])?;
        let Value::String(json) = json else {
            return Ok(Value::Null);
        };

        let text = extract_property_text(&json, &property.key);
        Ok(match (text, property.kind) {
            (None, _) => Value::Null,
            (Some(text), PropertyKind::String) => Value::String(text),
            (Some(text), PropertyKind::Number) => to_float(&Value::String(text)),
        })
    }

    fn function(
        &self,
        func: Function,
        args: &[Expr],
        frame: Frame<'_>,
        bindings: &[(String, Value)],
    ) -> Result<Value> {
        match func {
            Function::ArrayFilter | Function::ArrayMap => {
                return self.array_lambda(func, args, frame, bindings);
            }
            Function::Coalesce => {
                for arg in args {
                    let value = self.eval_bound(arg, frame, bindings)?;
                    if !value.is_null() {
                        return Ok(value);
                    }
                }
                return Ok(Value::Null);
            }
            _ => {}
        }

        let values = args
            .iter()
            .map(|arg| self.eval_bound(arg, frame, bindings))
            .collect::<Result<Vec<_>>>()?;
        scalar_function(func, values)
    }

    fn array_lambda(
        &self,
        func: Function,
        args: &[Expr],
        frame: Frame<'_>,
        bindings: &[(String, Value)],
    ) -> Result<Value> {
        let [Expr::Lambda { params, body }, array] = args else {
            return Err(QueryError::Execution(format!(
                "{} expects a lambda and an array",
                func.name()
            )));
        };
        let [param] = params.as_slice() else {
            return Err(QueryError::Execution(format!(
                "{} expects a single-parameter lambda",
                func.name()
            )));
        };
        let items = match self.eval_bound(array, frame, bindings)? {
            Value::Array(items) => items,
            other => return Err(type_error(func.name(), &other)),
        };

        let mut scope = bindings.to_vec();
        let mut output = Vec::with_capacity(items.len());
        for item in items {
            scope.push((param.clone(), item.clone()));
            let result = self.eval_bound(body, frame, &scope)?;
            scope.pop();

            match func {
                Function::ArrayFilter => {
                    if result.truth() == Some(true) {
                        output.push(item);
                    }
                }
                _ => output.push(result),
            }
        }
        Ok(Value::Array(output))
    }

    fn aggregate(
        &self,
        func: AggregateFunction,
        args: &[Expr],
        condition: Option<&Expr>,
        rows: &[&[Value]],
    ) -> Result<Value> {
        // Argument tuples of the rows the aggregate sees
        let mut inputs: Vec<Vec<Value>> = Vec::with_capacity(rows.len());
        for &row in rows {
            if let Some(condition) = condition
                && self.eval(condition, Frame::Row(row))?.truth() != Some(true)
            {
                continue;
            }
            inputs.push(
                args.iter()
                    .map(|arg| self.eval(arg, Frame::Row(row)))
                    .collect::<Result<_>>()?,
            );
        }

        match func {
            AggregateFunction::Count => Ok(Value::Int(if args.is_empty() {
                inputs.len() as i64
            } else {
                inputs.iter().filter(|input| !input[0].is_null()).count() as i64
            })),
            AggregateFunction::Sum => sum(first_values(&inputs)),
            AggregateFunction::Avg => {
                let numbers = numbers(first_values(&inputs), "avg")?;
                if numbers.is_empty() {
                    return Ok(Value::Null);
                }
                Ok(Value::Float(numbers.iter().sum::<f64>() / numbers.len() as f64))
            }
            AggregateFunction::Min => extreme(first_values(&inputs), Ordering::Less),
            AggregateFunction::Max => extreme(first_values(&inputs), Ordering::Greater),
            AggregateFunction::UniqExact => {
                let distinct: HashSet<String> = inputs
                    .iter()
                    .filter(|input| input.iter().all(|v| !v.is_null()))
                    .map(|input| Value::Tuple(input.clone()).canonical())
                    .collect();
                Ok(Value::Int(distinct.len() as i64))
            }
            AggregateFunction::Any => {
                Ok(first_values(&inputs).next().cloned().unwrap_or(Value::Null))
            }
            AggregateFunction::ArgMin => {
                let mut best: Option<(&Value, &Value)> = None;
                for input in &inputs {
                    let [value, key] = input.as_slice() else {
                        return Err(QueryError::Execution(
                            "argMin expects two arguments".to_string(),
                        ));
                    };
                    if value.is_null() || key.is_null() {
                        continue;
                    }
                    let better = match best {
                        None => true,
                        Some((_, best_key)) => key.compare(best_key) == Some(Ordering::Less),
                    };
                    if better {
                        best = Some((value, key));
                    }
                }
                Ok(best.map(|(value, _)| value.clone()).unwrap_or(Value::Null))
            }
            AggregateFunction::GroupArray => {
                Ok(Value::Array(first_values(&inputs).cloned().collect()))
            }
            AggregateFunction::QuantileExact(level) => {
                let mut numbers = numbers(first_values(&inputs), "quantileExact")?;
                if numbers.is_empty() {
                    return Ok(Value::Null);
                }
                numbers.sort_by(f64::total_cmp);
                let position =
                    ((level * numbers.len() as f64).floor() as usize).min(numbers.len() - 1);
                Ok(Value::Float(numbers[position]))
            }
            AggregateFunction::WindowFunnel(window) => window_funnel(window, &inputs),
        }
    }
}

fn literal_value(literal: &Literal) -> Value {
    match literal {
        Literal::Null => Value::Null,
        Literal::Bool(b) => Value::bool(*b),
        Literal::Int(n) => Value::Int(*n),
        Literal::Float(f) => Value::Float(*f),
        Literal::String(s) => Value::String(s.clone()),
        Literal::DateTime(ts) => Value::DateTime(*ts),
    }
}

fn type_error(operation: &str, value: &Value) -> QueryError {
    QueryError::Execution(format!("{} is not defined for {:?}", operation, value))
}

/// Text of a top-level JSON property with the surrounding quotes removed
///
/// Missing keys and JSON `null` are `None`; other values keep their raw JSON
/// text.
pub fn extract_property_text(json: &str, key: &str) -> Option<String> {
    let object: serde_json::Map<String, serde_json::Value> = serde_json::from_str(json).ok()?;
    match object.get(key)? {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn binary(op: BinaryOp, left: Value, right: Value) -> Result<Value> {
    if left.is_null() || right.is_null() {
        return Ok(Value::Null);
    }

    if op.is_comparison() {
        let ordering = left.compare(&right);
        let result = match (op, ordering) {
            (BinaryOp::Eq, ordering) => ordering == Some(Ordering::Equal),
            (BinaryOp::NotEq, ordering) => ordering != Some(Ordering::Equal),
            (_, None) => {
                return Err(QueryError::Execution(format!(
                    "cannot compare {:?} with {:?}",
                    left, right
                )));
            }
            (BinaryOp::Lt, Some(o)) => o == Ordering::Less,
            (BinaryOp::LtEq, Some(o)) => o != Ordering::Greater,
            (BinaryOp::Gt, Some(o)) => o == Ordering::Greater,
            (BinaryOp::GtEq, Some(o)) => o != Ordering::Less,
            (_, Some(_)) => false,
        };
        return Ok(Value::bool(result));
    }

    match (op, &left, &right) {
        (BinaryOp::Plus, Value::Int(a), Value::Int(b)) => Ok(Value::Int(a.wrapping_add(*b))),
        (BinaryOp::Minus, Value::Int(a), Value::Int(b)) => Ok(Value::Int(a.wrapping_sub(*b))),
        (BinaryOp::Multiply, Value::Int(a), Value::Int(b)) => Ok(Value::Int(a.wrapping_mul(*b))),
        _ => {
            let a = left.as_f64().ok_or_else(|| type_error(op.as_sql(), &left))?;
            let b = right.as_f64().ok_or_else(|| type_error(op.as_sql(), &right))?;
            Ok(Value::Float(match op {
                BinaryOp::Plus => a + b,
                BinaryOp::Minus => a - b,
                BinaryOp::Multiply => a * b,
                _ => a / b,
            }))
        }
    }
}

fn to_float(value: &Value) -> Value {
    match value {
        Value::Int(n) => Value::Float(*n as f64),
        Value::Float(f) => Value::Float(*f),
        Value::String(s) => s.parse::<f64>().map(Value::Float).unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

fn to_datetime(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Int(n) => Utc.timestamp_opt(*n, 0).single(),
        other => other.as_datetime(),
    }
}

fn array_items(func: Function, value: Value) -> Result<Vec<Value>> {
    match value {
        Value::Array(items) => Ok(items),
        other => Err(type_error(func.name(), &other)),
    }
}

fn scalar_function(func: Function, mut values: Vec<Value>) -> Result<Value> {
    let arity = |n: usize| {
        if values.len() == n {
            Ok(())
        } else {
            Err(QueryError::Execution(format!(
                "{} expects {} arguments, got {}",
                func.name(),
                n,
                values.len()
            )))
        }
    };

    match func {
        Function::Greatest | Function::Least => {
            if values.iter().any(Value::is_null) {
                return Ok(Value::Null);
            }
            let wanted = if func == Function::Greatest {
                Ordering::Greater
            } else {
                Ordering::Less
            };
            let mut best: Option<Value> = None;
            for value in values {
                best = match best {
                    None => Some(value),
                    Some(current) => match value.compare(&current) {
                        Some(o) if o == wanted => Some(value),
                        Some(_) => Some(current),
                        None => return Err(type_error(func.name(), &value)),
                    },
                };
            }
            Ok(best.unwrap_or(Value::Null))
        }
        Function::Pow => {
            arity(2)?;
            match (values[0].as_f64(), values[1].as_f64()) {
                (Some(base), Some(exp)) => Ok(Value::Float(base.powf(exp))),
                _ => Ok(Value::Null),
            }
        }
        Function::Abs => {
            arity(1)?;
            Ok(match &values[0] {
                Value::Int(n) => Value::Int(n.wrapping_abs()),
                Value::Float(f) => Value::Float(f.abs()),
                _ => Value::Null,
            })
        }
        Function::Round => {
            if values.is_empty() {
                return Err(QueryError::Execution("round expects an argument".to_string()));
            }
            let digits = match values.get(1) {
                Some(Value::Int(d)) => *d as i32,
                Some(other) => return Err(type_error("round", other)),
                None => 0,
            };
            Ok(match &values[0] {
                Value::Int(n) => Value::Int(*n),
                Value::Float(f) => {
                    let scale = 10f64.powi(digits);
                    Value::Float((f * scale).round_ties_even() / scale)
                }
                _ => Value::Null,
            })
        }
        Function::ToNullable => {
            arity(1)?;
            Ok(values.swap_remove(0))
        }
        Function::ToString => {
            arity(1)?;
            Ok(values[0].to_text().map(Value::String).unwrap_or(Value::Null))
        }
        Function::ToFloat => {
            arity(1)?;
            Ok(to_float(&values[0]))
        }
        Function::ToDateTime => {
            arity(1)?;
            Ok(match to_datetime(&values[0]) {
                Some(ts) => Utc
                    .timestamp_opt(ts.timestamp(), 0)
                    .single()
                    .map(Value::DateTime)
                    .unwrap_or(Value::Null),
                None => Value::Null,
            })
        }
        Function::AddSeconds => {
            arity(2)?;
            match (to_datetime(&values[0]), &values[1]) {
                (Some(ts), Value::Int(seconds)) => {
                    Ok(Value::DateTime(ts + Duration::seconds(*seconds)))
                }
                (None, _) | (_, Value::Null) => Ok(Value::Null),
                (_, other) => Err(type_error("addSeconds", other)),
            }
        }
        Function::PositionCaseInsensitive => {
            arity(2)?;
            match (&values[0], &values[1]) {
                (Value::String(haystack), Value::String(needle)) => {
                    let haystack = haystack.to_ascii_lowercase();
                    let needle = needle.to_ascii_lowercase();
                    Ok(Value::Int(haystack.find(&needle).map(|i| i as i64 + 1).unwrap_or(0)))
                }
                (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
                (other, _) => Err(type_error("positionCaseInsensitive", other)),
            }
        }
        Function::Match => {
            arity(2)?;
            match (&values[0], &values[1]) {
                (Value::String(text), Value::String(pattern)) => {
                    let regex = Regex::new(pattern).map_err(|e| {
                        QueryError::Execution(format!(
                            "invalid regular expression '{}': {}",
                            pattern, e
                        ))
                    })?;
                    Ok(Value::bool(regex.is_match(text)))
                }
                (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
                (other, _) => Err(type_error("match", other)),
            }
        }
        Function::ArraySum => {
            arity(1)?;
            let items = array_items(func, values.swap_remove(0))?;
            let total = sum(items.iter().filter(|v| !v.is_null()))?;
            Ok(if total.is_null() { Value::Int(0) } else { total })
        }
        Function::ArrayMin | Function::ArrayMax => {
            arity(1)?;
            let items = array_items(func, values.swap_remove(0))?;
            let wanted = if func == Function::ArrayMin {
                Ordering::Less
            } else {
                Ordering::Greater
            };
            let value = extreme(items.iter().filter(|v| !v.is_null()), wanted)?;
            Ok(if value.is_null() { Value::Int(0) } else { value })
        }
        Function::ArrayAvg => {
            arity(1)?;
            let items = array_items(func, values.swap_remove(0))?;
            let numbers = numbers(items.iter().filter(|v| !v.is_null()), "arrayAvg")?;
            Ok(Value::Float(numbers.iter().sum::<f64>() / numbers.len() as f64))
        }
        Function::ArrayDistinct => {
            arity(1)?;
            let items = array_items(func, values.swap_remove(0))?;
            let mut seen = HashSet::new();
            Ok(Value::Array(
                items
                    .into_iter()
                    .filter(|item| !item.is_null() && seen.insert(item.canonical()))
                    .collect(),
            ))
        }
        Function::Length => {
            arity(1)?;
            match &values[0] {
                Value::Array(items) => Ok(Value::Int(items.len() as i64)),
                Value::String(s) => Ok(Value::Int(s.len() as i64)),
                Value::Null => Ok(Value::Null),
                other => Err(type_error("length", other)),
            }
        }
        Function::Empty => {
            arity(1)?;
            match &values[0] {
                Value::Array(items) => Ok(Value::bool(items.is_empty())),
                Value::String(s) => Ok(Value::bool(s.is_empty())),
                Value::Null => Ok(Value::Null),
                other => Err(type_error("empty", other)),
            }
        }
        Function::Coalesce | Function::ArrayFilter | Function::ArrayMap => {
            Err(QueryError::Execution(format!(
                "{} cannot be evaluated eagerly",
                func.name()
            )))
        }
    }
}

fn first_values(inputs: &[Vec<Value>]) -> impl Iterator<Item = &Value> {
    inputs
        .iter()
        .filter_map(|input| input.first())
        .filter(|value| !value.is_null())
}

fn numbers<'v>(values: impl Iterator<Item = &'v Value>, operation: &str) -> Result<Vec<f64>> {
    values
        .map(|value| value.as_f64().ok_or_else(|| type_error(operation, value)))
        .collect()
}

/// Sum of non-NULL values; integers stay integers, NULL without values
fn sum<'v>(values: impl Iterator<Item = &'v Value>) -> Result<Value> {
    let mut total: Option<Value> = None;
    for value in values {
        total = Some(match (total, value) {
            (None, Value::Int(n)) => Value::Int(*n),
            (None, Value::Float(f)) => Value::Float(*f),
            (Some(Value::Int(a)), Value::Int(b)) => Value::Int(a.wrapping_add(*b)),
            (Some(current), value) => {
                let a = current.as_f64().ok_or_else(|| type_error("sum", &current))?;
                let b = value.as_f64().ok_or_else(|| type_error("sum", value))?;
                Value::Float(a + b)
            }
            (None, other) => return Err(type_error("sum", other)),
        });
    }
    Ok(total.unwrap_or(Value::Null))
}

/// Smallest (`Less`) or largest (`Greater`) value, NULL without values
fn extreme<'v>(values: impl Iterator<Item = &'v Value>, wanted: Ordering) -> Result<Value> {
    let mut best: Option<&Value> = None;
    for value in values {
        best = match best {
            None => Some(value),
            Some(current) => match value.compare(current) {
                Some(o) if o == wanted => Some(value),
                Some(_) => Some(current),
                None => return Err(type_error("min/max", value)),
            },
        };
    }
    Ok(best.cloned().unwrap_or(Value::Null))
}

/// Level reached by one entity's rows under `windowFunnel(window)`
///
/// Each input is `(timestamp, cond_1, .., cond_n)`. Events are replayed in
/// `(timestamp, step)` order; step `i` extends a chain that reached step
/// `i - 1` no later than `window` seconds after the chain started.
fn window_funnel(window: i64, inputs: &[Vec<Value>]) -> Result<Value> {
    let Some(steps) = inputs.first().map(|input| input.len().saturating_sub(1)) else {
        return Ok(Value::Null);
    };
    if steps == 0 {
        return Err(QueryError::Execution(
            "windowFunnel expects at least one step condition".to_string(),
        ));
    }

    let mut events: Vec<(i64, usize)> = Vec::new();
    let mut seen_rows = false;
    for input in inputs {
        if input.iter().any(Value::is_null) {
            continue;
        }
        seen_rows = true;
        let ts = to_datetime(&input[0])
            .ok_or_else(|| type_error("windowFunnel", &input[0]))?
            .timestamp();
        for (step, cond) in input[1..].iter().enumerate() {
            if cond.truth() == Some(true) {
                events.push((ts, step));
            }
        }
    }
    if !seen_rows {
        return Ok(Value::Null);
    }
    events.sort();

    // Start of the chain that reached each step
    let mut chain_start: Vec<Option<i64>> = vec![None; steps];
    for (ts, step) in events {
        if step == 0 {
            chain_start[0] = Some(ts);
        } else if let Some(start) = chain_start[step - 1]
            && ts <= start + window
        {
            chain_start[step] = Some(start);
            if step + 1 == steps {
                return Ok(Value::Int(steps as i64));
            }
        }
    }

    let level = chain_start
        .iter()
        .rposition(Option::is_some)
        .map(|i| i + 1)
        .unwrap_or(0);
    Ok(Value::Int(level as i64))
}

#[cfg(test)]
#[path = "eval_test.rs"]
mod eval_test;
