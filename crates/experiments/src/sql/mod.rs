//! SQL expression tree, query builder and ClickHouse renderer

pub mod ast;
pub mod query;
pub mod render;

pub use ast::{AggregateFunction, BinaryOp, ColumnRef, Expr, Function, Literal};
pub use query::{FromClause, JoinKind, QueryBuilder, SelectItem, SelectQuery};
pub use render::{render_expr, render_query};
