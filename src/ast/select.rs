use indexmap::IndexMap;

use super::{ConstantValue, Expr, types::TableType};

/// Sort direction of an ORDER BY item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Asc,
    Desc
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderExpr {
    pub expr:  Expr,
    pub order: Order
}

impl OrderExpr {
    pub fn asc(expr: Expr) -> Self {
        Self {
            expr,
            order: Order::Asc
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameMethod {
    Rows,
    Range
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameBound {
    CurrentRow,
    Preceding,
    Following
}

/// One end of a window frame. A missing value means `UNBOUNDED`.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowFrameExpr {
    pub frame_type:  FrameBound,
    pub frame_value: Option<i64>
}

impl WindowFrameExpr {
    pub fn unbounded(frame_type: FrameBound) -> Self {
        Self {
            frame_type,
            frame_value: None
        }
    }
}

/// Window specification: `(PARTITION BY ... ORDER BY ... ROWS BETWEEN ...)`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WindowExpr {
    pub partition_by: Option<Vec<Expr>>,
    pub order_by:     Option<Vec<OrderExpr>>,
    pub frame_method: Option<FrameMethod>,
    pub frame_start:  Option<WindowFrameExpr>,
    pub frame_end:    Option<WindowFrameExpr>
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CteType {
    /// `WITH expr AS name`
    Column,
    /// `WITH name AS (SELECT ...)`
    Subquery
}

#[derive(Debug, Clone, PartialEq)]
pub struct Cte {
    pub name:     String,
    pub expr:     Expr,
    pub cte_type: CteType
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintType {
    On,
    Using
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinConstraint {
    pub expr:            Expr,
    pub constraint_type: ConstraintType
}

impl JoinConstraint {
    pub fn on(expr: Expr) -> Self {
        Self {
            expr,
            constraint_type: ConstraintType::On
        }
    }
}

/// Sampling ratio `n` or `n/d`.
#[derive(Debug, Clone, PartialEq)]
pub struct RatioExpr {
    pub numerator:   f64,
    pub denominator: Option<f64>
}

impl RatioExpr {
    pub fn value(&self) -> f64 {
        match self.denominator {
            Some(d) if d != 0.0 => self.numerator / d,
            _ => self.numerator
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SampleExpr {
    pub sample_value: RatioExpr,
    pub offset_value: Option<RatioExpr>
}

/// One link of the FROM chain. `next_join` points at the table joined to it.
#[derive(Debug, Clone, Default)]
pub struct JoinExpr {
    /// Full join keyword sequence, e.g. `LEFT JOIN` or `GLOBAL ANY INNER JOIN`
    pub join_type:   Option<String>,
    pub table:       Option<Expr>,
    pub alias:       Option<String>,
    pub table_final: bool,
    pub constraint:  Option<JoinConstraint>,
    pub next_join:   Option<Box<JoinExpr>>,
    pub sample:      Option<SampleExpr>,
    pub ty:          Option<TableType>
}

impl PartialEq for JoinExpr {
    fn eq(&self, other: &Self) -> bool {
        self.join_type == other.join_type
            && self.table == other.table
            && self.alias == other.alias
            && self.table_final == other.table_final
            && self.constraint == other.constraint
            && self.next_join == other.next_join
            && self.sample == other.sample
    }
}

impl JoinExpr {
    pub fn table(table: Expr, alias: Option<String>) -> Self {
        Self {
            table: Some(table),
            alias,
            ..Default::default()
        }
    }

    /// Iterate over this join and every join chained after it.
    pub fn iter(&self) -> JoinIter<'_> {
        JoinIter {
            next: Some(self)
        }
    }

    /// Attach a join at the end of the chain.
    pub fn append(&mut self, join: JoinExpr) {
        match self.next_join.as_deref_mut() {
            Some(next) => next.append(join),
            None => self.next_join = Some(Box::new(join))
        }
    }

    pub fn iter_mut_apply<F>(&mut self, f: &mut F)
    where
        F: FnMut(&mut JoinExpr)
    {
        f(self);
        if let Some(next) = self.next_join.as_deref_mut() {
            next.iter_mut_apply(f);
        }
    }

    /// Whether the join keyword makes this table's side nullable.
    pub fn is_outer(&self) -> bool {
        self.join_type.as_deref().is_some_and(|j| {
            let upper = j.to_ascii_uppercase();
            upper.contains("LEFT") || upper.contains("RIGHT") || upper.contains("FULL")
        })
    }
}

pub struct JoinIter<'a> {
    next: Option<&'a JoinExpr>
}

impl<'a> Iterator for JoinIter<'a> {
    type Item = &'a JoinExpr;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = current.next_join.as_deref();
        Some(current)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LimitBy {
    pub n:      Expr,
    pub offset: Option<Expr>,
    pub exprs:  Vec<Expr>
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SelectQuery {
    pub ctes:            Option<IndexMap<String, Cte>>,
    pub select:          Vec<Expr>,
    pub distinct:        bool,
    pub select_from:     Option<Box<JoinExpr>>,
    pub array_join_op:   Option<String>,
    pub array_join_list: Option<Vec<Expr>>,
    pub window_exprs:    Option<IndexMap<String, WindowExpr>>,
    pub prewhere:        Option<Expr>,
    pub where_clause:    Option<Expr>,
    pub group_by:        Option<Vec<Expr>>,
    pub having:          Option<Expr>,
    pub order_by:        Option<Vec<OrderExpr>>,
    pub limit:           Option<Expr>,
    pub limit_by:        Option<LimitBy>,
    pub limit_with_ties: bool,
    pub offset:          Option<Expr>,
    pub settings:        Option<IndexMap<String, ConstantValue>>,
    /// Set when the query was produced from a saved view of this name
    pub view_name:       Option<String>
}

impl SelectQuery {
    /// `SELECT <select> FROM <table> [AS alias]`
    pub fn from_table(select: Vec<Expr>, table: &str, alias: Option<&str>) -> Self {
        Self {
            select,
            select_from: Some(Box::new(JoinExpr::table(
                Expr::field(&[table]),
                alias.map(str::to_string)
            ))),
            ..Default::default()
        }
    }

    /// AND an extra condition into WHERE.
    pub fn add_where(&mut self, condition: Expr) {
        self.where_clause = Some(match self.where_clause.take() {
            None => condition,
            Some(existing) => match existing.kind {
                super::ExprKind::And(mut parts) => {
                    parts.push(condition);
                    Expr::and(parts)
                }
                _ => Expr::and(vec![existing, condition])
            }
        });
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOperator {
    UnionAll,
    UnionDistinct,
    Intersect,
    IntersectDistinct,
    Except
}

impl SetOperator {
    pub fn keyword(self) -> &'static str {
        match self {
            Self::UnionAll => "UNION ALL",
            Self::UnionDistinct => "UNION DISTINCT",
            Self::Intersect => "INTERSECT",
            Self::IntersectDistinct => "INTERSECT DISTINCT",
            Self::Except => "EXCEPT"
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectSetNode {
    pub op:    SetOperator,
    pub query: Expr
}

/// `initial UNION ALL q2 EXCEPT q3 ...`; every query is a select or set query.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectSetQuery {
    pub initial:    Expr,
    pub subsequent: Vec<SelectSetNode>
}

impl SelectSetQuery {
    pub fn queries(&self) -> impl Iterator<Item = &Expr> {
        std::iter::once(&self.initial).chain(self.subsequent.iter().map(|n| &n.query))
    }

    pub fn queries_mut(&mut self) -> impl Iterator<Item = &mut Expr> {
        std::iter::once(&mut self.initial).chain(self.subsequent.iter_mut().map(|n| &mut n.query))
    }
}
