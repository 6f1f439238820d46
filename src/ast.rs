//! HogQL abstract syntax tree.
//!
//! The tree is a sum type: [`Expr`] wraps an [`ExprKind`] together with an
//! optional resolved [`Type`] and an optional source [`Span`]. Table-level
//! constructs ([`SelectQuery`], [`JoinExpr`], ...) live in [`select`], the type
//! model in [`types`].
//!
//! Equality on nodes is structural: resolved types and spans are ignored, so a
//! resolved tree compares equal to the freshly parsed tree it came from.

mod constant;
mod expr;
mod select;
pub mod types;

use serde::Serialize;
pub use constant::ConstantValue;
pub use expr::{
    ArithmeticOp, Call, Chain, ChainItem, CompareOp, Expr, ExprKind, WindowFunction
};
pub use select::{
    ConstraintType, Cte, CteType, FrameBound, FrameMethod, JoinConstraint, JoinExpr, LimitBy,
    Order, OrderExpr, RatioExpr, SampleExpr, SelectQuery, SelectSetNode, SelectSetQuery,
    SetOperator, WindowExpr, WindowFrameExpr
};
pub use types::{
    AsteriskType, CallType, ConstantDataType, ConstantType, FieldAliasType, FieldTraverserType,
    FieldType, PropertyType, SelectQueryType, SelectSetQueryType, TableType, Type
};

/// Byte offsets of a node in the original query text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Span {
    pub start: usize,
    pub end:   usize
}

impl Span {
    /// Smallest span covering both inputs.
    pub fn cover(a: Option<Span>, b: Option<Span>) -> Option<Span> {
        match (a, b) {
            (Some(a), Some(b)) => Some(Span {
                start: a.start.min(b.start),
                end:   a.end.max(b.end)
            }),
            (a, None) => a,
            (None, b) => b
        }
    }
}
