//! Typed SQL expression tree
//!
//! Every predicate and value the plan builders produce is an immutable
//! [`Expr`]. The tree is rendered to ClickHouse SQL by [`crate::sql::render`]
//! and interpreted directly by the in-memory executor, so both consumers see
//! exactly the same plan.

use chrono::{DateTime, Utc};

/// A SQL expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Column (or lambda parameter) reference
    Column(ColumnRef),
    /// Constant
    Literal(Literal),
    /// Property extracted from a JSON column
    Property(PropertyRef),
    /// Comparison or arithmetic
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// Conjunction; empty is `true`
    And(Vec<Expr>),
    /// Disjunction; empty is `false`
    Or(Vec<Expr>),
    /// Negation
    Not(Box<Expr>),
    /// Unary minus
    Neg(Box<Expr>),
    /// Membership test
    In {
        expr: Box<Expr>,
        list: Vec<Expr>,
        negated: bool,
    },
    /// NULL test
    IsNull { expr: Box<Expr>, negated: bool },
    /// Two-way conditional
    If {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    /// First-match conditional
    MultiIf {
        branches: Vec<(Expr, Expr)>,
        otherwise: Box<Expr>,
    },
    /// Scalar function call
    Function { func: Function, args: Vec<Expr> },
    /// Aggregate function call with an optional `-If` condition
    Aggregate {
        func: AggregateFunction,
        args: Vec<Expr>,
        condition: Option<Box<Expr>>,
    },
    /// Tuple constructor
    Tuple(Vec<Expr>),
    /// 1-based tuple element access
    TupleElement { expr: Box<Expr>, index: usize },
    /// Lambda for array functions
    Lambda { params: Vec<String>, body: Box<Expr> },
}

/// Column reference, optionally qualified by a table alias
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRef {
    /// Table or subquery alias
    pub table: Option<String>,
    /// Column name
    pub name: String,
}

/// Constant value
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    DateTime(DateTime<Utc>),
}

/// JSON columns on the events table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonColumn {
    /// Event properties
    Properties,
    /// Person properties at event time
    PersonProperties,
}

impl JsonColumn {
    /// Column name in the events table
    pub fn column_name(&self) -> &'static str {
        match self {
            Self::Properties => "properties",
            Self::PersonProperties => "person_properties",
        }
    }
}

/// How an extracted property is typed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    /// Text; missing or JSON null is NULL
    String,
    /// Float; anything that is not a number or numeric string is NULL
    Number,
}

/// JSON property extraction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyRef {
    /// Table alias of the JSON column
    pub table: Option<String>,
    /// Which JSON column
    pub column: JsonColumn,
    /// Top-level key
    pub key: String,
    /// Result type
    pub kind: PropertyKind,
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Plus,
    Minus,
    Multiply,
    Divide,
}

impl BinaryOp {
    /// SQL operator token
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::NotEq => "!=",
            Self::Lt => "<",
            Self::LtEq => "<=",
            Self::Gt => ">",
            Self::GtEq => ">=",
            Self::Plus => "+",
            Self::Minus => "-",
            Self::Multiply => "*",
            Self::Divide => "/",
        }
    }

    /// True for comparison operators
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            Self::Eq | Self::NotEq | Self::Lt | Self::LtEq | Self::Gt | Self::GtEq
        )
    }
}

/// Scalar functions the compiler emits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Coalesce,
    Greatest,
    Least,
    Pow,
    Abs,
    Round,
    ToNullable,
    ToString,
    /// Number or numeric text to float, NULL otherwise
    ToFloat,
    /// Truncate to whole seconds
    ToDateTime,
    /// `DateTime + n seconds`
    AddSeconds,
    /// 1-based position of a case-insensitive substring, 0 when absent
    PositionCaseInsensitive,
    /// Regular expression match
    Match,
    ArrayFilter,
    ArrayMap,
    ArraySum,
    ArrayMin,
    ArrayMax,
    ArrayAvg,
    ArrayDistinct,
    Length,
    Empty,
}

impl Function {
    /// ClickHouse function name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Coalesce => "coalesce",
            Self::Greatest => "greatest",
            Self::Least => "least",
            Self::Pow => "pow",
            Self::Abs => "abs",
            Self::Round => "round",
            Self::ToNullable => "toNullable",
            Self::ToString => "toString",
            Self::ToFloat => "toFloat64OrNull",
            Self::ToDateTime => "toDateTime",
            Self::AddSeconds => "addSeconds",
            Self::PositionCaseInsensitive => "positionCaseInsensitive",
            Self::Match => "match",
            Self::ArrayFilter => "arrayFilter",
            Self::ArrayMap => "arrayMap",
            Self::ArraySum => "arraySum",
            Self::ArrayMin => "arrayMin",
            Self::ArrayMax => "arrayMax",
            Self::ArrayAvg => "arrayAvg",
            Self::ArrayDistinct => "arrayDistinct",
            Self::Length => "length",
            Self::Empty => "empty",
        }
    }
}

/// Aggregate functions the compiler emits
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AggregateFunction {
    /// Rows (no argument) or non-NULL values
    Count,
    Sum,
    Avg,
    Min,
    Max,
    /// Exact distinct count of non-NULL values
    UniqExact,
    /// Any non-NULL value
    Any,
    /// Value at the smallest key
    ArgMin,
    /// Non-NULL values as an array
    GroupArray,
    /// Exact quantile at level `p`
    QuantileExact(f64),
    /// Longest ordered step chain within a window of seconds
    WindowFunnel(i64),
}

impl AggregateFunction {
    /// ClickHouse function name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::Sum => "sum",
            Self::Avg => "avg",
            Self::Min => "min",
            Self::Max => "max",
            Self::UniqExact => "uniqExact",
            Self::Any => "any",
            Self::ArgMin => "argMin",
            Self::GroupArray => "groupArray",
            Self::QuantileExact(_) => "quantileExact",
            Self::WindowFunnel(_) => "windowFunnel",
        }
    }
}

// =============================================================================
// Constructors
// =============================================================================

/// Unqualified column
pub fn col(name: impl Into<String>) -> Expr {
    Expr::Column(ColumnRef {
        table: None,
        name: name.into(),
    })
}

/// Column qualified by a table alias
pub fn qcol(table: impl Into<String>, name: impl Into<String>) -> Expr {
    Expr::Column(ColumnRef {
        table: Some(table.into()),
        name: name.into(),
    })
}

/// String literal
pub fn lit_str(value: impl Into<String>) -> Expr {
    Expr::Literal(Literal::String(value.into()))
}

/// Integer literal
pub fn lit_int(value: i64) -> Expr {
    Expr::Literal(Literal::Int(value))
}

/// Float literal
pub fn lit_float(value: f64) -> Expr {
    Expr::Literal(Literal::Float(value))
}

/// Boolean literal
pub fn lit_bool(value: bool) -> Expr {
    Expr::Literal(Literal::Bool(value))
}

/// Timestamp literal
pub fn lit_datetime(value: DateTime<Utc>) -> Expr {
    Expr::Literal(Literal::DateTime(value))
}

/// Scalar function call
pub fn func(func: Function, args: Vec<Expr>) -> Expr {
    Expr::Function { func, args }
}

/// Aggregate over all rows of the group
pub fn agg(func: AggregateFunction, args: Vec<Expr>) -> Expr {
    Expr::Aggregate {
        func,
        args,
        condition: None,
    }
}

/// Aggregate over rows matching `condition` (`-If` combinator)
pub fn agg_if(func: AggregateFunction, args: Vec<Expr>, condition: Expr) -> Expr {
    Expr::Aggregate {
        func,
        args,
        condition: Some(Box::new(condition)),
    }
}

/// `if(cond, then, otherwise)`
pub fn if_then(cond: Expr, then: Expr, otherwise: Expr) -> Expr {
    Expr::If {
        cond: Box::new(cond),
        then: Box::new(then),
        otherwise: Box::new(otherwise),
    }
}

/// Single-parameter lambda
pub fn lambda(param: impl Into<String>, body: Expr) -> Expr {
    Expr::Lambda {
        params: vec![param.into()],
        body: Box::new(body),
    }
}

/// Conjunction, flattening nested conjunctions and dropping `true`
pub fn and(exprs: Vec<Expr>) -> Expr {
    let mut parts = Vec::with_capacity(exprs.len());
    for expr in exprs {
        match expr {
            Expr::And(inner) => parts.extend(inner),
            Expr::Literal(Literal::Bool(true)) => {}
            other => parts.push(other),
        }
    }
    match parts.len() {
        0 => lit_bool(true),
        1 => parts.remove(0),
        _ => Expr::And(parts),
    }
}

/// Disjunction, flattening nested disjunctions and dropping `false`
pub fn or(exprs: Vec<Expr>) -> Expr {
    let mut parts = Vec::with_capacity(exprs.len());
    for expr in exprs {
        match expr {
            Expr::Or(inner) => parts.extend(inner),
            Expr::Literal(Literal::Bool(false)) => {}
            other => parts.push(other),
        }
    }
    match parts.len() {
        0 => lit_bool(false),
        1 => parts.remove(0),
        _ => Expr::Or(parts),
    }
}

impl Expr {
    fn binary(self, op: BinaryOp, other: Expr) -> Expr {
        Expr::Binary {
            op,
            left: Box::new(self),
            right: Box::new(other),
        }
    }

    /// `self = other`
    pub fn equals(self, other: Expr) -> Expr {
        self.binary(BinaryOp::Eq, other)
    }

    /// `self != other`
    pub fn not_equals(self, other: Expr) -> Expr {
        self.binary(BinaryOp::NotEq, other)
    }

    /// `self < other`
    pub fn lt(self, other: Expr) -> Expr {
        self.binary(BinaryOp::Lt, other)
    }

    /// `self <= other`
    pub fn lt_eq(self, other: Expr) -> Expr {
        self.binary(BinaryOp::LtEq, other)
    }

    /// `self > other`
    pub fn gt(self, other: Expr) -> Expr {
        self.binary(BinaryOp::Gt, other)
    }

    /// `self >= other`
    pub fn gt_eq(self, other: Expr) -> Expr {
        self.binary(BinaryOp::GtEq, other)
    }

    /// `self + other`
    pub fn plus(self, other: Expr) -> Expr {
        self.binary(BinaryOp::Plus, other)
    }

    /// `self - other`
    pub fn minus(self, other: Expr) -> Expr {
        self.binary(BinaryOp::Minus, other)
    }

    /// `self * other`
    pub fn multiply(self, other: Expr) -> Expr {
        self.binary(BinaryOp::Multiply, other)
    }

    /// `self / other`
    pub fn divide(self, other: Expr) -> Expr {
        self.binary(BinaryOp::Divide, other)
    }

    /// `NOT self`
    pub fn negate(self) -> Expr {
        Expr::Not(Box::new(self))
    }

    /// `self IN (list)`
    pub fn in_list(self, list: Vec<Expr>) -> Expr {
        Expr::In {
            expr: Box::new(self),
            list,
            negated: false,
        }
    }

    /// `self NOT IN (list)`
    pub fn not_in_list(self, list: Vec<Expr>) -> Expr {
        Expr::In {
            expr: Box::new(self),
            list,
            negated: true,
        }
    }

    /// `self IS NULL`
    pub fn is_null(self) -> Expr {
        Expr::IsNull {
            expr: Box::new(self),
            negated: false,
        }
    }

    /// `self IS NOT NULL`
    pub fn is_not_null(self) -> Expr {
        Expr::IsNull {
            expr: Box::new(self),
            negated: true,
        }
    }

    /// `coalesce(self, fallback)`
    pub fn or_else(self, fallback: Expr) -> Expr {
        func(Function::Coalesce, vec![self, fallback])
    }

    /// `tupleElement(self, index)`
    pub fn element(self, index: usize) -> Expr {
        Expr::TupleElement {
            expr: Box::new(self),
            index,
        }
    }

    /// True when the expression contains an aggregate call
    pub fn contains_aggregate(&self) -> bool {
        match self {
            Expr::Aggregate { .. } => true,
            Expr::Column(_) | Expr::Literal(_) | Expr::Property(_) => false,
            Expr::Binary { left, right, .. } => {
                left.contains_aggregate() || right.contains_aggregate()
            }
            Expr::And(parts) | Expr::Or(parts) | Expr::Tuple(parts) => {
                parts.iter().any(Expr::contains_aggregate)
            }
            Expr::Function { args, .. } => args.iter().any(Expr::contains_aggregate),
            Expr::Not(inner) | Expr::Neg(inner) => inner.contains_aggregate(),
            Expr::In { expr, list, .. } => {
                expr.contains_aggregate() || list.iter().any(Expr::contains_aggregate)
            }
            Expr::IsNull { expr, .. } | Expr::TupleElement { expr, .. } => {
                expr.contains_aggregate()
            }
            Expr::If {
                cond,
                then,
                otherwise,
            } => {
                cond.contains_aggregate()
                    || then.contains_aggregate()
                    || otherwise.contains_aggregate()
            }
            Expr::MultiIf {
                branches,
                otherwise,
            } => {
                branches
                    .iter()
                    .any(|(c, v)| c.contains_aggregate() || v.contains_aggregate())
                    || otherwise.contains_aggregate()
            }
            Expr::Lambda { body, .. } => body.contains_aggregate(),
        }
    }
}
