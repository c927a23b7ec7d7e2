//! Query execution over in-memory relations

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::memory::eval::{Evaluator, Frame};
use crate::memory::store::MemoryStore;
use crate::memory::value::Value;
use crate::sql::ast::Expr;
use crate::sql::query::{FromClause, JoinKind, SelectQuery};
use tally_query::QueryError;

type Result<T> = std::result::Result<T, QueryError>;

/// Rows with qualified column names
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Relation {
    pub columns: Vec<(Option<String>, String)>,
    pub rows: Vec<Vec<Value>>,
}

impl Relation {
    /// Output column names
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|(_, name)| name.as_str()).collect()
    }

    fn qualified(mut self, qualifier: &str) -> Self {
        for (table, _) in &mut self.columns {
            *table = Some(qualifier.to_string());
        }
        self
    }
}

/// Named subqueries visible to a query and everything nested in it
#[derive(Default)]
struct Scope<'p> {
    tables: HashMap<String, Relation>,
    parent: Option<&'p Scope<'p>>,
}

impl Scope<'_> {
    fn lookup(&self, name: &str) -> Option<&Relation> {
        self.tables
            .get(name)
            .or_else(|| self.parent.and_then(|parent| parent.lookup(name)))
    }
}

/// Run a query against the store
pub fn execute_query(store: &MemoryStore, query: &SelectQuery) -> Result<Relation> {
    execute_in(store, &Scope::default(), query)
}

/// Run a query after evaluating its named subqueries in order
///
/// A named subquery sees the ones defined before it, never itself.
fn execute_in(store: &MemoryStore, parent: &Scope<'_>, query: &SelectQuery) -> Result<Relation> {
    let mut scope = Scope {
        tables: HashMap::new(),
        parent: Some(parent),
    };
    for (name, cte) in &query.ctes {
        let relation = execute_in(store, &scope, cte)?;
        scope.tables.insert(name.clone(), relation);
    }

    let input = match &query.from {
        Some(from) => source(store, &scope, from)?,
        // SELECT without FROM reads one empty row
        None => Relation {
            columns: Vec::new(),
            rows: vec![Vec::new()],
        },
    };
    let evaluator = Evaluator::new(&input.columns);

    let rows: Vec<&[Value]> = match &query.where_clause {
        Some(predicate) => {
            let mut kept = Vec::with_capacity(input.rows.len());
            for row in &input.rows {
                if evaluator.eval(predicate, Frame::Row(row))?.truth() == Some(true) {
                    kept.push(row.as_slice());
                }
            }
            kept
        }
        None => input.rows.iter().map(Vec::as_slice).collect(),
    };

    let grouped = !query.group_by.is_empty()
        || query.select.iter().any(|item| item.expr.contains_aggregate())
        || query.having.as_ref().is_some_and(|h| h.contains_aggregate());

    let mut output = Vec::new();
    if grouped {
        for group in group_rows(&evaluator, &query.group_by, &rows)? {
            let frame = Frame::Group(&group);
            if let Some(having) = &query.having
                && evaluator.eval(having, frame)?.truth() != Some(true)
            {
                continue;
            }
            output.push(project(&evaluator, query, frame)?);
        }
    } else {
        for row in rows {
            output.push(project(&evaluator, query, Frame::Row(row))?);
        }
    }

    let mut relation = Relation {
        columns: query.output_names().into_iter().map(|name| (None, name)).collect(),
        rows: output,
    };
    order(&mut relation, query)?;
    if let Some(limit) = query.limit {
        relation.rows.truncate(limit as usize);
    }
    Ok(relation)
}

fn project(evaluator: &Evaluator<'_>, query: &SelectQuery, frame: Frame<'_>) -> Result<Vec<Value>> {
    query
        .select
        .iter()
        .map(|item| evaluator.eval(&item.expr, frame))
        .collect()
}

/// Split rows into groups in order of first appearance
///
/// Without GROUP BY keys every row lands in a single group, which exists even
/// when there are no rows.
fn group_rows<'r>(
    evaluator: &Evaluator<'_>,
    keys: &[Expr],
    rows: &[&'r [Value]],
) -> Result<Vec<Vec<&'r [Value]>>> {
    if keys.is_empty() {
        return Ok(vec![rows.to_vec()]);
    }

    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<Vec<&'r [Value]>> = Vec::new();
    for &row in rows {
        let key = keys
            .iter()
            .map(|key| evaluator.eval(key, Frame::Row(row)).map(|v| v.canonical()))
            .collect::<Result<Vec<_>>>()?
            .join("\u{2}");
        let slot = *index.entry(key).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[slot].push(row);
    }
    Ok(groups)
}

/// ORDER BY over output columns; NULLs sort last
fn order(relation: &mut Relation, query: &SelectQuery) -> Result<()> {
    if query.order_by.is_empty() {
        return Ok(());
    }

    let evaluator = Evaluator::new(&relation.columns);
    let mut keyed = Vec::with_capacity(relation.rows.len());
    for row in relation.rows.drain(..) {
        let keys = query
            .order_by
            .iter()
            .map(|item| evaluator.eval(&item.expr, Frame::Row(&row)))
            .collect::<Result<Vec<_>>>()?;
        keyed.push((keys, row));
    }

    keyed.sort_by(|(a, _), (b, _)| {
        for ((x, y), item) in a.iter().zip(b).zip(&query.order_by) {
            let ordering = match (x.is_null(), y.is_null()) {
                (true, true) => Ordering::Equal,
                (true, false) => return Ordering::Greater,
                (false, true) => return Ordering::Less,
                (false, false) => x.compare(y).unwrap_or(Ordering::Equal),
            };
            let ordering = if item.descending {
                ordering.reverse()
            } else {
                ordering
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });

    relation.rows = keyed.into_iter().map(|(_, row)| row).collect();
    Ok(())
}

fn source(store: &MemoryStore, scope: &Scope<'_>, from: &FromClause) -> Result<Relation> {
    match from {
        FromClause::Table { name, alias } => {
            let qualifier = alias.as_deref().unwrap_or(name);
            if let Some(named) = scope.lookup(name) {
                return Ok(named.clone().qualified(qualifier));
            }

            let table = store
                .table(name)
                .ok_or_else(|| QueryError::TableNotFound(name.clone()))?;
            Ok(Relation {
                columns: table
                    .columns
                    .into_iter()
                    .map(|c| (Some(qualifier.to_string()), c))
                    .collect(),
                rows: table.rows,
            })
        }
        FromClause::Subquery { query, alias } => {
            Ok(execute_in(store, scope, query)?.qualified(alias))
        }
        FromClause::Join {
            left,
            right,
            kind,
            on,
        } => {
            let left = source(store, scope, left)?;
            let right = source(store, scope, right)?;
            join(left, right, *kind, on.as_ref())
        }
    }
}

/// Nested-loop join; LEFT JOIN pads unmatched rows with NULLs
fn join(
    left: Relation,
    right: Relation,
    kind: JoinKind,
    on: Option<&Expr>,
) -> Result<Relation> {
    let right_width = right.columns.len();
    let mut columns = left.columns;
    columns.extend(right.columns);

    let evaluator = Evaluator::new(&columns);
    let mut rows = Vec::new();
    for l in &left.rows {
        let mut matched = false;
        for r in &right.rows {
            let mut row = Vec::with_capacity(l.len() + r.len());
            row.extend_from_slice(l);
            row.extend_from_slice(r);

            let keep = match (kind, on) {
                (JoinKind::Cross, _) | (_, None) => true,
                (_, Some(on)) => evaluator.eval(on, Frame::Row(&row))?.truth() == Some(true),
            };
            if keep {
                matched = true;
                rows.push(row);
            }
        }

        if !matched && kind == JoinKind::Left {
            let mut row = l.clone();
            row.resize(l.len() + right_width, Value::Null);
            rows.push(row);
        }
    }

    Ok(Relation { columns, rows })
}

#[cfg(test)]
#[path = "exec_test.rs"]
mod exec_test;
