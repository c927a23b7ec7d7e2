//! Render the expression tree to ClickHouse SQL

use crate::sql::ast::{
    AggregateFunction, ColumnRef, Expr, Function, Literal, PropertyKind, PropertyRef,
};
use crate::sql::query::{FromClause, SelectQuery};

/// Render a query to SQL
pub fn render_query(query: &SelectQuery) -> String {
    let mut sql = String::new();

    // WITH
    if !query.ctes.is_empty() {
        let items: Vec<String> = query
            .ctes
            .iter()
            .map(|(name, cte)| format!("{} AS ({})", escape_identifier(name), render_query(cte)))
            .collect();
        sql.push_str("WITH ");
        sql.push_str(&items.join(", "));
        sql.push(' ');
    }

    // SELECT
    sql.push_str("SELECT ");
    if query.select.is_empty() {
        sql.push('*');
    } else {
        let items: Vec<String> = query
            .select
            .iter()
            .map(|item| match &item.alias {
                Some(alias) => {
                    format!("{} AS {}", render_expr(&item.expr), escape_identifier(alias))
                }
                None => render_expr(&item.expr),
            })
            .collect();
        sql.push_str(&items.join(", "));
    }

    // FROM
    if let Some(from) = &query.from {
        sql.push_str(" FROM ");
        sql.push_str(&render_from(from));
    }

    // WHERE
    if let Some(condition) = &query.where_clause {
        sql.push_str(" WHERE ");
        sql.push_str(&render_expr(condition));
    }

    // GROUP BY
    if !query.group_by.is_empty() {
        sql.push_str(" GROUP BY ");
        sql.push_str(&render_list(&query.group_by));
    }

    // HAVING
    if let Some(condition) = &query.having {
        sql.push_str(" HAVING ");
        sql.push_str(&render_expr(condition));
    }

    // ORDER BY
    if !query.order_by.is_empty() {
        let items: Vec<String> = query
            .order_by
            .iter()
            .map(|o| {
                if o.descending {
                    format!("{} DESC", render_expr(&o.expr))
                } else {
                    render_expr(&o.expr)
                }
            })
            .collect();
        sql.push_str(" ORDER BY ");
        sql.push_str(&items.join(", "));
    }

    // LIMIT
    if let Some(limit) = query.limit {
        sql.push_str(&format!(" LIMIT {}", limit));
    }

    // SETTINGS
    if !query.settings.is_empty() {
        let items: Vec<String> = query
            .settings
            .iter()
            .map(|(name, value)| format!("{} = {}", name, render_literal(value)))
            .collect();
        sql.push_str(" SETTINGS ");
        sql.push_str(&items.join(", "));
    }

    sql
}

fn render_from(from: &FromClause) -> String {
    match from {
        FromClause::Table { name, alias: None } => escape_identifier(name),
        FromClause::Table {
            name,
            alias: Some(alias),
        } => format!("{} AS {}", escape_identifier(name), escape_identifier(alias)),
        FromClause::Subquery { query, alias } => {
            format!("({}) AS {}", render_query(query), escape_identifier(alias))
        }
        FromClause::Join {
            left,
            right,
            kind,
            on,
        } => {
            let mut sql = format!("{} {} {}", render_from(left), kind.as_sql(), render_from(right));
            if let Some(on) = on {
                sql.push_str(" ON ");
                sql.push_str(&render_expr(on));
            }
            sql
        }
    }
}

/// Render an expression to SQL
pub fn render_expr(expr: &Expr) -> String {
    match expr {
        Expr::Column(column) => render_column(column),
        Expr::Literal(literal) => render_literal(literal),
        Expr::Property(property) => render_property(property),
        Expr::Binary { op, left, right } => {
            format!("({} {} {})", render_expr(left), op.as_sql(), render_expr(right))
        }
        Expr::And(parts) if parts.is_empty() => "1".to_string(),
        Expr::And(parts) => format!("({})", join_exprs(parts, " AND ")),
        Expr::Or(parts) if parts.is_empty() => "0".to_string(),
        Expr::Or(parts) => format!("({})", join_exprs(parts, " OR ")),
        Expr::Not(inner) => format!("(NOT {})", render_expr(inner)),
        Expr::Neg(inner) => format!("(-{})", render_expr(inner)),
        Expr::In {
            expr,
            list,
            negated,
        } => format!(
            "({} {} ({}))",
            render_expr(expr),
            if *negated { "NOT IN" } else { "IN" },
            render_list(list)
        ),
        Expr::IsNull { expr, negated } => format!(
            "({} {})",
            render_expr(expr),
            if *negated { "IS NOT NULL" } else { "IS NULL" }
        ),
        Expr::If {
            cond,
            then,
            otherwise,
        } => format!(
            "if({}, {}, {})",
            render_expr(cond),
            render_expr(then),
            render_expr(otherwise)
        ),
        Expr::MultiIf {
            branches,
            otherwise,
        } => {
            let mut args: Vec<String> = Vec::with_capacity(branches.len() * 2 + 1);
            for (cond, value) in branches {
                args.push(render_expr(cond));
                args.push(render_expr(value));
            }
            args.push(render_expr(otherwise));
            format!("multiIf({})", args.join(", "))
        }
        Expr::Function { func, args } => render_function(*func, args),
        Expr::Aggregate {
            func,
            args,
            condition,
        } => render_aggregate(*func, args, condition.as_deref()),
        Expr::Tuple(items) => format!("tuple({})", render_list(items)),
        Expr::TupleElement { expr, index } => {
            format!("tupleElement({}, {})", render_expr(expr), index)
        }
        Expr::Lambda { params, body } => {
            let params: Vec<String> = params.iter().map(|p| escape_identifier(p)).collect();
            if params.len() == 1 {
                format!("{} -> {}", params[0], render_expr(body))
            } else {
                format!("({}) -> {}", params.join(", "), render_expr(body))
            }
        }
    }
}

fn render_column(column: &ColumnRef) -> String {
    match &column.table {
        Some(table) => format!("{}.{}", escape_identifier(table), escape_identifier(&column.name)),
        None => escape_identifier(&column.name),
    }
}

fn render_literal(literal: &Literal) -> String {
    match literal {
        Literal::Null => "NULL".to_string(),
        Literal::Bool(true) => "1".to_string(),
        Literal::Bool(false) => "0".to_string(),
        Literal::Int(n) => n.to_string(),
        Literal::Float(f) => render_float(*f),
        Literal::String(s) => format!("'{}'", escape_string(s)),
        Literal::DateTime(ts) => format!(
            "toDateTime64('{}', 6, 'UTC')",
            ts.format("%Y-%m-%d %H:%M:%S%.6f")
        ),
    }
}

fn render_float(f: f64) -> String {
    if f.is_nan() {
        "nan".to_string()
    } else if f == f64::INFINITY {
        "inf".to_string()
    } else if f == f64::NEG_INFINITY {
        "-inf".to_string()
    } else {
        format!("{:?}", f)
    }
}

/// Raw JSON value with surrounding quotes removed, NULL when missing or null
fn render_property(property: &PropertyRef) -> String {
    let column = match &property.table {
        Some(table) => format!(
            "{}.{}",
            escape_identifier(table),
            property.column.column_name()
        ),
        None => property.column.column_name().to_string(),
    };
    let text = format!(
        "replaceRegexpAll(nullIf(nullIf(JSONExtractRaw({}, '{}'), ''), 'null'), '^\"|\"$', '')",
        column,
        escape_string(&property.key)
    );
    match property.kind {
        PropertyKind::String => text,
        PropertyKind::Number => format!("toFloat64OrNull({})", text),
    }
}

fn render_function(func: Function, args: &[Expr]) -> String {
    match func {
        // toFloat64OrNull only accepts strings
        Function::ToFloat => format!("toFloat64OrNull(toString({}))", render_list(args)),
        _ => format!("{}({})", func.name(), render_list(args)),
    }
}

fn render_aggregate(func: AggregateFunction, args: &[Expr], condition: Option<&Expr>) -> String {
    let mut name = func.name().to_string();
    let mut rendered: Vec<String> = args.iter().map(render_expr).collect();
    if let Some(condition) = condition {
        name.push_str("If");
        rendered.push(render_expr(condition));
    }

    let params = match func {
        AggregateFunction::QuantileExact(level) => format!("({})", render_float(level)),
        AggregateFunction::WindowFunnel(window) => format!("({})", window),
        _ => String::new(),
    };

    format!("{}{}({})", name, params, rendered.join(", "))
}

fn render_list(exprs: &[Expr]) -> String {
    join_exprs(exprs, ", ")
}

fn join_exprs(exprs: &[Expr], separator: &str) -> String {
    exprs.iter().map(render_expr).collect::<Vec<_>>().join(separator)
}

/// Escape a string value for SQL (prevent injection)
pub fn escape_string(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Escape identifier (column/table name)
pub fn escape_identifier(s: &str) -> String {
    // Only allow alphanumeric and underscore
    if !s.is_empty()
        && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !s.starts_with(|c: char| c.is_ascii_digit())
    {
        s.to_string()
    } else {
        // Quote with backticks for safety
        format!("`{}`", s.replace('\\', "\\\\").replace('`', "\\`"))
    }
}

#[cfg(test)]
#[path = "render_test.rs"]
mod render_test;
