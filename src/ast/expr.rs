use std::fmt;

use serde::Serialize;
use smallvec::SmallVec;

use super::{
    ConstantValue, Span,
    select::{SelectQuery, SelectSetQuery, WindowExpr},
    types::Type
};

/// Identifier chain of a field reference, e.g. `events.properties.$browser`.
pub type Chain = SmallVec<[ChainItem; 4]>;

/// One segment of a field chain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum ChainItem {
    Name(String),
    Index(i64)
}

impl ChainItem {
    pub fn as_name(&self) -> Option<&str> {
        match self {
            Self::Name(name) => Some(name),
            Self::Index(_) => None
        }
    }
}

impl fmt::Display for ChainItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => write!(f, "{}", name),
            Self::Index(index) => write!(f, "{}", index)
        }
    }
}

impl From<&str> for ChainItem {
    fn from(value: &str) -> Self {
        Self::Name(value.to_string())
    }
}

impl From<String> for ChainItem {
    fn from(value: String) -> Self {
        Self::Name(value)
    }
}

/// Arithmetic operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ArithmeticOp {
    Add,
    Sub,
    Mult,
    Div,
    Mod
}

impl ArithmeticOp {
    /// ClickHouse function implementing the operator.
    pub fn function_name(self) -> &'static str {
        match self {
            Self::Add => "plus",
            Self::Sub => "minus",
            Self::Mult => "multiply",
            Self::Div => "divide",
            Self::Mod => "modulo"
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mult => "*",
            Self::Div => "/",
            Self::Mod => "%"
        }
    }
}

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CompareOp {
    Eq,
    NotEq,
    Gt,
    GtEq,
    Lt,
    LtEq,
    Like,
    ILike,
    NotLike,
    NotILike,
    In,
    GlobalIn,
    NotIn,
    GlobalNotIn,
    InCohort,
    NotInCohort,
    Regex,
    IRegex,
    NotRegex,
    NotIRegex
}

impl CompareOp {
    /// Operator with the sides swapped (`a < b` == `b > a`).
    pub fn flipped(self) -> Option<Self> {
        match self {
            Self::Eq => Some(Self::Eq),
            Self::NotEq => Some(Self::NotEq),
            Self::Gt => Some(Self::Lt),
            Self::GtEq => Some(Self::LtEq),
            Self::Lt => Some(Self::Gt),
            Self::LtEq => Some(Self::GtEq),
            _ => None
        }
    }

    /// Whether this operator is the negated form of another.
    pub fn is_negative(self) -> bool {
        matches!(
            self,
            Self::NotEq
                | Self::NotLike
                | Self::NotILike
                | Self::NotIn
                | Self::GlobalNotIn
                | Self::NotInCohort
                | Self::NotRegex
                | Self::NotIRegex
        )
    }

    /// HogQL source spelling.
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::NotEq => "!=",
            Self::Gt => ">",
            Self::GtEq => ">=",
            Self::Lt => "<",
            Self::LtEq => "<=",
            Self::Like => "LIKE",
            Self::ILike => "ILIKE",
            Self::NotLike => "NOT LIKE",
            Self::NotILike => "NOT ILIKE",
            Self::In => "IN",
            Self::GlobalIn => "GLOBAL IN",
            Self::NotIn => "NOT IN",
            Self::GlobalNotIn => "GLOBAL NOT IN",
            Self::InCohort => "IN COHORT",
            Self::NotInCohort => "NOT IN COHORT",
            Self::Regex => "=~",
            Self::IRegex => "=~*",
            Self::NotRegex => "!~",
            Self::NotIRegex => "!~*"
        }
    }
}

/// Function or aggregate call.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub name:     String,
    pub args:     Vec<Expr>,
    /// Parametric aggregate parameters: `quantile(0.9)(x)`
    pub params:   Option<Vec<Expr>>,
    pub distinct: bool
}

/// Window function call: `name(args) OVER (...)` or `OVER name`.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowFunction {
    pub name:            String,
    pub args:            Vec<Expr>,
    pub params:          Option<Vec<Expr>>,
    pub over_expr:       Option<WindowExpr>,
    pub over_identifier: Option<String>
}

/// Expression node variants.
#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Constant(ConstantValue),
    Field {
        chain: Chain
    },
    Placeholder {
        chain: Chain
    },
    Call(Call),
    Arithmetic {
        op:    ArithmeticOp,
        left:  Box<Expr>,
        right: Box<Expr>
    },
    Compare {
        op:    CompareOp,
        left:  Box<Expr>,
        right: Box<Expr>
    },
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
    Between {
        expr:    Box<Expr>,
        low:     Box<Expr>,
        high:    Box<Expr>,
        negated: bool
    },
    Tuple(Vec<Expr>),
    Array(Vec<Expr>),
    ArrayAccess {
        array:    Box<Expr>,
        property: Box<Expr>,
        nullish:  bool
    },
    TupleAccess {
        tuple:   Box<Expr>,
        index:   i64,
        nullish: bool
    },
    Alias {
        alias:  String,
        expr:   Box<Expr>,
        hidden: bool
    },
    Lambda {
        args: Vec<String>,
        body: Box<Expr>
    },
    WindowFunction(WindowFunction),
    SelectQuery(Box<SelectQuery>),
    SelectSetQuery(Box<SelectSetQuery>),
    /// Marker produced by predicate extraction for a leaf that references
    /// columns outside the extraction target. Never printed.
    Unanalyzable
}

/// Expression node: variant plus resolved type and source location.
#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub ty:   Option<Type>,
    pub span: Option<Span>
}

impl PartialEq for Expr {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
    }
}

impl From<ExprKind> for Expr {
    fn from(kind: ExprKind) -> Self {
        Self::new(kind)
    }
}

impl Expr {
    pub fn new(kind: ExprKind) -> Self {
        Self {
            kind,
            ty: None,
            span: None
        }
    }

    #[must_use]
    pub fn with_type(mut self, ty: Type) -> Self {
        self.ty = Some(ty);
        self
    }

    #[must_use]
    pub fn with_span(mut self, span: Option<Span>) -> Self {
        self.span = span;
        self
    }

    pub fn constant(value: impl Into<ConstantValue>) -> Self {
        Self::new(ExprKind::Constant(value.into()))
    }

    pub fn null() -> Self {
        Self::new(ExprKind::Constant(ConstantValue::Null))
    }

    pub fn boolean(value: bool) -> Self {
        Self::new(ExprKind::Constant(ConstantValue::Bool(value)))
    }

    /// Field reference from string segments.
    pub fn field<S: AsRef<str>>(chain: &[S]) -> Self {
        Self::new(ExprKind::Field {
            chain: chain.iter().map(|s| ChainItem::from(s.as_ref())).collect()
        })
    }

    pub fn field_chain(chain: Chain) -> Self {
        Self::new(ExprKind::Field {
            chain
        })
    }

    pub fn call(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Self::new(ExprKind::Call(Call {
            name: name.into(),
            args,
            params: None,
            distinct: false
        }))
    }

    pub fn compare(op: CompareOp, left: Expr, right: Expr) -> Self {
        Self::new(ExprKind::Compare {
            op,
            left: Box::new(left),
            right: Box::new(right)
        })
    }

    pub fn arithmetic(op: ArithmeticOp, left: Expr, right: Expr) -> Self {
        Self::new(ExprKind::Arithmetic {
            op,
            left: Box::new(left),
            right: Box::new(right)
        })
    }

    pub fn and(exprs: Vec<Expr>) -> Self {
        Self::new(ExprKind::And(exprs))
    }

    pub fn or(exprs: Vec<Expr>) -> Self {
        Self::new(ExprKind::Or(exprs))
    }

    pub fn not(expr: Expr) -> Self {
        Self::new(ExprKind::Not(Box::new(expr)))
    }

    pub fn tuple(exprs: Vec<Expr>) -> Self {
        Self::new(ExprKind::Tuple(exprs))
    }

    pub fn array(exprs: Vec<Expr>) -> Self {
        Self::new(ExprKind::Array(exprs))
    }

    pub fn alias(alias: impl Into<String>, expr: Expr) -> Self {
        Self::new(ExprKind::Alias {
            alias:  alias.into(),
            expr:   Box::new(expr),
            hidden: false
        })
    }

    pub fn hidden_alias(alias: impl Into<String>, expr: Expr) -> Self {
        Self::new(ExprKind::Alias {
            alias:  alias.into(),
            expr:   Box::new(expr),
            hidden: true
        })
    }

    pub fn select(query: SelectQuery) -> Self {
        Self::new(ExprKind::SelectQuery(Box::new(query)))
    }

    /// Conjunction of the given parts, collapsing trivial cases.
    pub fn and_all(mut exprs: Vec<Expr>) -> Option<Self> {
        match exprs.len() {
            0 => None,
            1 => exprs.pop(),
            _ => Some(Self::and(exprs))
        }
    }

    pub fn as_constant(&self) -> Option<&ConstantValue> {
        match &self.kind {
            ExprKind::Constant(value) => Some(value),
            _ => None
        }
    }

    pub fn is_null_constant(&self) -> bool {
        matches!(&self.kind, ExprKind::Constant(ConstantValue::Null))
    }

    pub fn is_true_constant(&self) -> bool {
        matches!(&self.kind, ExprKind::Constant(ConstantValue::Bool(true)))
    }

    pub fn chain(&self) -> Option<&Chain> {
        match &self.kind {
            ExprKind::Field {
                chain
            } => Some(chain),
            _ => None
        }
    }

    pub fn as_select(&self) -> Option<&SelectQuery> {
        match &self.kind {
            ExprKind::SelectQuery(query) => Some(query),
            _ => None
        }
    }

    pub fn as_select_mut(&mut self) -> Option<&mut SelectQuery> {
        match &mut self.kind {
            ExprKind::SelectQuery(query) => Some(query),
            _ => None
        }
    }

    /// Strip any alias wrappers.
    pub fn unaliased(&self) -> &Expr {
        let mut current = self;
        while let ExprKind::Alias {
            expr, ..
        } = &current.kind
        {
            current = expr;
        }
        current
    }
}
