//! SELECT queries and the query builder

use crate::sql::ast::{ColumnRef, Expr, Literal, and};

/// A SELECT query
#[derive(Debug, Clone, PartialEq)]
pub struct SelectQuery {
    /// Named subqueries rendered as a `WITH` prefix, in definition order
    pub ctes: Vec<(String, SelectQuery)>,
    pub select: Vec<SelectItem>,
    pub from: Option<FromClause>,
    pub where_clause: Option<Expr>,
    pub group_by: Vec<Expr>,
    pub having: Option<Expr>,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<u64>,
    pub settings: Vec<(String, Literal)>,
}

impl SelectQuery {
    /// Output column names, in select order
    ///
    /// Unaliased column references keep their column name; anything else
    /// without an alias is named by its rendered SQL.
    pub fn output_names(&self) -> Vec<String> {
        self.select.iter().map(SelectItem::output_name).collect()
    }

    /// Remove and return the named subqueries
    ///
    /// Used when a stage is wrapped by another, so every name is defined once
    /// at the top of the final query.
    pub fn take_ctes(&mut self) -> Vec<(String, SelectQuery)> {
        std::mem::take(&mut self.ctes)
    }
}

/// One item of the select list
#[derive(Debug, Clone, PartialEq)]
pub struct SelectItem {
    pub expr: Expr,
    pub alias: Option<String>,
}

impl SelectItem {
    /// Name of the produced column
    pub fn output_name(&self) -> String {
        match (&self.alias, &self.expr) {
            (Some(alias), _) => alias.clone(),
            (None, Expr::Column(ColumnRef { name, .. })) => name.clone(),
            (None, expr) => crate::sql::render::render_expr(expr),
        }
    }
}

/// ORDER BY item
#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub expr: Expr,
    pub descending: bool,
}

/// Join kinds the plans use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
    Cross,
}

impl JoinKind {
    /// SQL keyword
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Inner => "INNER JOIN",
            Self::Left => "LEFT JOIN",
            Self::Cross => "CROSS JOIN",
        }
    }
}

/// FROM clause source
#[derive(Debug, Clone, PartialEq)]
pub enum FromClause {
    /// Base table
    Table { name: String, alias: Option<String> },
    /// Aliased subquery
    Subquery {
        query: Box<SelectQuery>,
        alias: String,
    },
    /// Two sources joined
    Join {
        left: Box<FromClause>,
        right: Box<FromClause>,
        kind: JoinKind,
        on: Option<Expr>,
    },
}

impl FromClause {
    /// Base table without alias
    pub fn table(name: impl Into<String>) -> Self {
        Self::Table {
            name: name.into(),
            alias: None,
        }
    }

    /// Base table with alias
    pub fn table_as(name: impl Into<String>, alias: impl Into<String>) -> Self {
        Self::Table {
            name: name.into(),
            alias: Some(alias.into()),
        }
    }

    /// Aliased subquery
    pub fn subquery(query: SelectQuery, alias: impl Into<String>) -> Self {
        Self::Subquery {
            query: Box::new(query),
            alias: alias.into(),
        }
    }

    /// Join `self` with `right`
    pub fn join(self, right: FromClause, kind: JoinKind, on: Option<Expr>) -> Self {
        Self::Join {
            left: Box::new(self),
            right: Box::new(right),
            kind,
            on,
        }
    }
}

/// Query builder for experiment plans
///
/// Mirrors the string builder used for analytics queries, but collects typed
/// expressions so the result can be rendered or executed.
pub struct QueryBuilder {
    ctes: Vec<(String, SelectQuery)>,
    from: Option<FromClause>,
    select: Vec<SelectItem>,
    where_clauses: Vec<Expr>,
    group_by: Vec<Expr>,
    having: Vec<Expr>,
    order_by: Vec<OrderBy>,
    limit: Option<u64>,
    settings: Vec<(String, Literal)>,
}

impl QueryBuilder {
    /// Create a builder reading from `from`
    pub fn new(from: FromClause) -> Self {
        Self {
            ctes: Vec::new(),
            from: Some(from),
            select: Vec::new(),
            where_clauses: Vec::new(),
            group_by: Vec::new(),
            having: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            settings: Vec::new(),
        }
    }

    /// Create a builder reading from a base table
    pub fn from_table(table: impl Into<String>) -> Self {
        Self::new(FromClause::table(table))
    }

    /// Define a named subquery; later definitions may read earlier ones
    pub fn with_cte(mut self, name: impl Into<String>, query: SelectQuery) -> Self {
        self.ctes.push((name.into(), query));
        self
    }

    /// Define several named subqueries
    pub fn with_ctes(mut self, ctes: Vec<(String, SelectQuery)>) -> Self {
        self.ctes.extend(ctes);
        self
    }

    /// Add a SELECT expression
    pub fn select(mut self, expr: Expr) -> Self {
        self.select.push(SelectItem { expr, alias: None });
        self
    }

    /// Add a SELECT expression with alias
    pub fn select_as(mut self, expr: Expr, alias: impl Into<String>) -> Self {
        self.select.push(SelectItem {
            expr,
            alias: Some(alias.into()),
        });
        self
    }

    /// Add a WHERE condition; conditions are AND'ed
    pub fn where_clause(mut self, condition: Expr) -> Self {
        self.where_clauses.push(condition);
        self
    }

    /// Add a GROUP BY expression
    pub fn group_by(mut self, expr: Expr) -> Self {
        self.group_by.push(expr);
        self
    }

    /// Add a HAVING condition; conditions are AND'ed
    pub fn having(mut self, condition: Expr) -> Self {
        self.having.push(condition);
        self
    }

    /// Add an ORDER BY expression
    pub fn order_by(mut self, expr: Expr) -> Self {
        self.order_by.push(OrderBy {
            expr,
            descending: false,
        });
        self
    }

    /// Add ORDER BY with direction
    pub fn order_by_desc(mut self, expr: Expr) -> Self {
        self.order_by.push(OrderBy {
            expr,
            descending: true,
        });
        self
    }

    /// Set LIMIT
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Add a query-level setting
    pub fn setting(mut self, name: impl Into<String>, value: Literal) -> Self {
        self.settings.push((name.into(), value));
        self
    }

    /// Build the query
    pub fn build(self) -> SelectQuery {
        let where_clause = (!self.where_clauses.is_empty()).then(|| and(self.where_clauses));
        let having = (!self.having.is_empty()).then(|| and(self.having));

        SelectQuery {
            ctes: self.ctes,
            select: self.select,
            from: self.from,
            where_clause,
            group_by: self.group_by,
            having,
            order_by: self.order_by,
            limit: self.limit,
            settings: self.settings,
        }
    }
}
