//! `IN COHORT` compilation.
//!
//! By default a cohort comparison becomes `IN (subquery)` over the membership
//! tables. With [`InCohortVia::LeftJoin`] every SELECT gets one LEFT JOIN per
//! distinct cohort and key instead, and the comparison reads the join's
//! marker column. [`InCohortVia::LeftJoinConjoined`] collapses all cohorts of
//! one key into a single join that collects the matching cohort ids.

use crate::{
    ast::{
        CompareOp, ConstantValue, Expr, ExprKind, JoinConstraint, JoinExpr, SelectQuery,
        SelectSetNode, SelectSetQuery, SetOperator
    },
    context::{CohortInfo, HogQLContext, InCohortVia},
    error::{HogQLError, HogQLResult, query_error},
    visitor::{VisitorMut, walk_expr_mut, walk_select_query_mut}
};

const STATIC_TABLE: &str = "static_cohort_people";
const DYNAMIC_TABLE: &str = "cohort_people";
const KEY_COLUMN: &str = "cohort_person_id";
const MATCHED_COLUMN: &str = "cohort_matched";
const IDS_COLUMN: &str = "cohort_ids";

/// Cohort named by the right-hand side of `IN COHORT`.
fn lookup_cohort(ctx: &HogQLContext, right: &Expr) -> HogQLResult<CohortInfo> {
    match right.unaliased().as_constant() {
        Some(ConstantValue::Integer(id)) => ctx
            .find_cohort_by_id(*id)
            .cloned()
            .ok_or_else(|| query_error(format!("Could not find a cohort with the id {}", id))),
        Some(ConstantValue::String(name)) => ctx
            .find_cohort_by_name(name)
            .cloned()
            .ok_or_else(|| query_error(format!("Could not find a cohort with the name {}", name))),
        _ => Err(query_error("IN COHORT only works with a constant cohort id or name"))
    }
}

fn eq(left: Expr, right: Expr) -> Expr {
    Expr::compare(CompareOp::Eq, left, right)
}

fn dynamic_filter(table: &str, cohort: &CohortInfo) -> Expr {
    let id = eq(Expr::field(&[table, "cohort_id"]), Expr::constant(cohort.id));
    match cohort.version {
        Some(version) => Expr::and(vec![
            id,
            eq(Expr::field(&[table, "version"]), Expr::constant(version)),
        ]),
        None => id
    }
}

/// Live members of dynamic cohorts: rows whose signs sum to a positive count.
fn dynamic_members(select: Vec<Expr>, filter: Expr) -> SelectQuery {
    let mut query = SelectQuery::from_table(select, DYNAMIC_TABLE, None);
    query.where_clause = Some(filter);
    query.group_by = Some(vec![
        Expr::field(&[DYNAMIC_TABLE, "person_id"]),
        Expr::field(&[DYNAMIC_TABLE, "cohort_id"]),
        Expr::field(&[DYNAMIC_TABLE, "version"]),
    ]);
    query.having = Some(Expr::compare(
        CompareOp::Gt,
        Expr::call("sum", vec![Expr::field(&[DYNAMIC_TABLE, "sign"])]),
        Expr::constant(0i64)
    ));
    query
}

/// `person_id` values of the members of one cohort.
fn members_query(cohort: &CohortInfo, select: Vec<Expr>) -> SelectQuery {
    if cohort.is_static {
        let mut query = SelectQuery::from_table(select, STATIC_TABLE, None);
        query.where_clause = Some(eq(
            Expr::field(&[STATIC_TABLE, "cohort_id"]),
            Expr::constant(cohort.id)
        ));
        query
    } else {
        dynamic_members(select, dynamic_filter(DYNAMIC_TABLE, cohort))
    }
}

/// Rewrite `left [NOT] IN COHORT right` into an `IN (subquery)` comparison.
pub fn in_cohort_subquery(ctx: &HogQLContext, left: Expr, right: Expr, negated: bool) -> HogQLResult<Expr> {
    let cohort = lookup_cohort(ctx, &right).map_err(|e| e.with_span(right.span))?;
    tracing::trace!(cohort = cohort.id, is_static = cohort.is_static, "in-cohort subquery");
    let table = if cohort.is_static { STATIC_TABLE } else { DYNAMIC_TABLE };
    let members = members_query(&cohort, vec![Expr::field(&[table, "person_id"])]);
    let op = if negated { CompareOp::NotIn } else { CompareOp::In };
    Ok(Expr::compare(op, left, Expr::select(members)))
}

/// Name the FROM table is referenced by, when it has a usable one.
fn from_name(query: &SelectQuery) -> Option<String> {
    let from = query.select_from.as_deref()?;
    if let Some(alias) = &from.alias {
        return Some(alias.clone());
    }
    let chain = from.table.as_ref()?.chain()?;
    Some(chain.iter().map(ToString::to_string).collect::<Vec<_>>().join("."))
}

/// Qualify a bare column with the FROM table so it stays unambiguous next to
/// the joined membership subquery.
fn qualify(key: Expr, table: &str) -> Expr {
    match &key.kind {
        ExprKind::Field {
            chain
        } if chain.len() == 1 => {
            let mut qualified = crate::ast::Chain::new();
            qualified.push(table.into());
            qualified.extend(chain.iter().cloned());
            Expr::field_chain(qualified).with_span(key.span)
        }
        _ => key
    }
}

#[derive(Debug)]
struct CohortJoin {
    alias:   String,
    key:     Expr,
    cohorts: Vec<CohortInfo>
}

#[derive(Debug, Default)]
struct Scope {
    /// FROM table name; `None` disables rewriting in this SELECT
    from:  Option<String>,
    joins: Vec<CohortJoin>
}

struct LeftJoinRewriter<'a> {
    ctx:       &'a HogQLContext,
    conjoined: bool,
    scopes:    Vec<Scope>,
    error:     Option<HogQLError>
}

impl LeftJoinRewriter<'_> {
    /// Register the join for one comparison and return the expression that
    /// replaces it.
    fn rewrite(&mut self, left: Expr, right: &Expr, negated: bool) -> HogQLResult<Option<Expr>> {
        let Some(scope) = self.scopes.last_mut() else {
            return Ok(None);
        };
        let Some(from) = scope.from.clone() else {
            return Ok(None);
        };
        let cohort = lookup_cohort(self.ctx, right).map_err(|e| e.with_span(right.span))?;
        let key = qualify(left, &from);

        let replacement = if self.conjoined {
            let position = scope.joins.iter().position(|j| j.key == key);
            let join = match position {
                Some(i) => &mut scope.joins[i],
                None => {
                    let alias = match scope.joins.len() {
                        0 => "__in_cohort".to_string(),
                        n => format!("__in_cohort_{}", n)
                    };
                    scope.joins.push(CohortJoin {
                        alias,
                        key,
                        cohorts: Vec::new()
                    });
                    let last = scope.joins.len() - 1;
                    &mut scope.joins[last]
                }
            };
            if !join.cohorts.iter().any(|c| c.id == cohort.id) {
                join.cohorts.push(cohort.clone());
            }
            Expr::call(
                "has",
                vec![Expr::field(&[join.alias.as_str(), IDS_COLUMN]), Expr::constant(cohort.id)]
            )
        } else {
            let existing = scope
                .joins
                .iter()
                .find(|j| j.key == key && j.cohorts.first().is_some_and(|c| c.id == cohort.id));
            let alias = match existing {
                Some(join) => join.alias.clone(),
                None => {
                    let same_cohort = scope
                        .joins
                        .iter()
                        .filter(|j| j.cohorts.first().is_some_and(|c| c.id == cohort.id))
                        .count();
                    let alias = match same_cohort {
                        0 => format!("in_cohort__{}", cohort.id),
                        n => format!("in_cohort__{}_{}", cohort.id, n)
                    };
                    scope.joins.push(CohortJoin {
                        alias: alias.clone(),
                        key,
                        cohorts: vec![cohort]
                    });
                    alias
                }
            };
            eq(Expr::field(&[alias.as_str(), MATCHED_COLUMN]), Expr::constant(1i64))
        };
        Ok(Some(if negated { Expr::not(replacement) } else { replacement }))
    }
}

impl VisitorMut for LeftJoinRewriter<'_> {
    fn visit_select_query_mut(&mut self, query: &mut SelectQuery) {
        self.scopes.push(Scope {
            from:  from_name(query),
            joins: Vec::new()
        });
        walk_select_query_mut(self, query);
        let scope = self.scopes.pop().unwrap_or_default();
        if scope.joins.is_empty() {
            return;
        }
        tracing::debug!(joins = scope.joins.len(), conjoined = self.conjoined, "adding in-cohort joins");
        let Some(from) = query.select_from.as_deref_mut() else {
            return;
        };
        for join in scope.joins {
            from.append(if self.conjoined {
                conjoined_join(join)
            } else {
                single_join(join)
            });
        }
    }

    fn visit_expr_mut(&mut self, expr: &mut Expr) {
        if self.error.is_some() {
            return;
        }
        walk_expr_mut(self, expr);
        let ExprKind::Compare {
            op: op @ (CompareOp::InCohort | CompareOp::NotInCohort),
            left,
            right
        } = &expr.kind
        else {
            return;
        };
        let negated = *op == CompareOp::NotInCohort;
        match self.rewrite(left.as_ref().clone(), right, negated) {
            Ok(Some(replacement)) => {
                let span = expr.span;
                *expr = replacement.with_span(span);
            }
            Ok(None) => {}
            Err(err) => self.error = Some(err)
        }
    }
}

fn left_join(alias: String, table: Expr, key: Expr) -> JoinExpr {
    let constraint = eq(Expr::field(&[alias.as_str(), KEY_COLUMN]), key);
    JoinExpr {
        join_type: Some("LEFT JOIN".to_string()),
        table: Some(table),
        alias: Some(alias),
        constraint: Some(JoinConstraint::on(constraint)),
        ..Default::default()
    }
}

fn single_join(join: CohortJoin) -> JoinExpr {
    let CohortJoin {
        alias,
        key,
        cohorts
    } = join;
    let Some(cohort) = cohorts.first() else {
        return left_join(alias, Expr::select(SelectQuery::default()), key);
    };
    let table = if cohort.is_static { STATIC_TABLE } else { DYNAMIC_TABLE };
    let select = vec![
        Expr::alias(KEY_COLUMN, Expr::field(&[table, "person_id"])),
        Expr::alias(MATCHED_COLUMN, Expr::constant(1i64)),
    ];
    left_join(alias, Expr::select(members_query(cohort, select)), key)
}

/// One join listing every cohort of `key` the person belongs to.
fn conjoined_join(join: CohortJoin) -> JoinExpr {
    let CohortJoin {
        alias,
        key,
        cohorts
    } = join;
    let member_columns = |table: &str| {
        vec![
            Expr::alias(KEY_COLUMN, Expr::field(&[table, "person_id"])),
            Expr::alias("cohort_id", Expr::field(&[table, "cohort_id"])),
        ]
    };

    let mut parts = Vec::new();
    let static_ids: Vec<Expr> = cohorts
        .iter()
        .filter(|c| c.is_static)
        .map(|c| Expr::constant(c.id))
        .collect();
    if !static_ids.is_empty() {
        let mut query = SelectQuery::from_table(member_columns(STATIC_TABLE), STATIC_TABLE, None);
        query.where_clause = Some(Expr::compare(
            CompareOp::In,
            Expr::field(&[STATIC_TABLE, "cohort_id"]),
            Expr::tuple(static_ids)
        ));
        parts.push(Expr::select(query));
    }
    let dynamic: Vec<Expr> = cohorts
        .iter()
        .filter(|c| !c.is_static)
        .map(|c| dynamic_filter(DYNAMIC_TABLE, c))
        .collect();
    if !dynamic.is_empty() {
        let mut dynamic = dynamic;
        let filter = match dynamic.len() {
            1 => dynamic.remove(0),
            _ => Expr::or(dynamic)
        };
        parts.push(Expr::select(dynamic_members(member_columns(DYNAMIC_TABLE), filter)));
    }

    let mut parts = parts.into_iter();
    let members = match (parts.next(), parts.next()) {
        (Some(first), Some(second)) => Expr::new(ExprKind::SelectSetQuery(Box::new(SelectSetQuery {
            initial:    first,
            subsequent: vec![SelectSetNode {
                op:    SetOperator::UnionAll,
                query: second
            }]
        }))),
        (Some(only), None) => only,
        _ => Expr::select(SelectQuery::default())
    };

    let query = SelectQuery {
        select: vec![
            Expr::alias(KEY_COLUMN, Expr::field(&["members", KEY_COLUMN])),
            Expr::alias(
                IDS_COLUMN,
                Expr::call("groupUniqArray", vec![Expr::field(&["members", "cohort_id"])])
            ),
        ],
        select_from: Some(Box::new(JoinExpr::table(members, Some("members".to_string())))),
        group_by: Some(vec![Expr::field(&["members", KEY_COLUMN])]),
        ..Default::default()
    };
    left_join(alias, Expr::select(query), key)
}

/// Replace cohort comparisons with LEFT JOINs; runs before resolution.
///
/// Comparisons in a SELECT without a FROM table are left alone and fall back
/// to the subquery form during resolution.
pub fn resolve_in_cohorts_leftjoin(node: &mut Expr, ctx: &HogQLContext) -> HogQLResult<()> {
    let conjoined = match ctx.modifiers.in_cohort_via {
        InCohortVia::Subquery => return Ok(()),
        InCohortVia::LeftJoin => false,
        InCohortVia::LeftJoinConjoined => true
    };
    let mut rewriter = LeftJoinRewriter {
        ctx,
        conjoined,
        scopes: Vec::new(),
        error: None
    };
    rewriter.visit_expr_mut(node);
    match rewriter.error {
        Some(err) => Err(err),
        None => Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_select;

    fn context(via: InCohortVia) -> HogQLContext {
        let mut ctx = HogQLContext::new(1);
        ctx.modifiers.in_cohort_via = via;
        ctx.cohorts = vec![
            CohortInfo {
                id:        5,
                name:      "Beta".into(),
                is_static: true,
                version:   None
            },
            CohortInfo {
                id:        7,
                name:      "Power users".into(),
                is_static: false,
                version:   Some(3)
            },
        ];
        ctx
    }

    #[test]
    fn test_static_cohort_subquery() {
        let ctx = context(InCohortVia::Subquery);
        let expr = in_cohort_subquery(&ctx, Expr::field(&["person_id"]), Expr::constant(5i64), false)
            .expect("rewrite");
        let ExprKind::Compare {
            op: CompareOp::In,
            right,
            ..
        } = &expr.kind
        else {
            panic!("expected IN");
        };
        let query = right.as_select().expect("subquery");
        assert_eq!(
            query.select_from.as_ref().and_then(|f| f.table.as_ref()).and_then(Expr::chain).map(|c| c[0].to_string()),
            Some(STATIC_TABLE.to_string())
        );
    }

    #[test]
    fn test_dynamic_cohort_by_name_filters_version() {
        let ctx = context(InCohortVia::Subquery);
        let expr = in_cohort_subquery(&ctx, Expr::field(&["person_id"]), Expr::constant("Power users"), true)
            .expect("rewrite");
        let ExprKind::Compare {
            op: CompareOp::NotIn,
            right,
            ..
        } = &expr.kind
        else {
            panic!("expected NOT IN");
        };
        let query = right.as_select().expect("subquery");
        assert!(matches!(query.where_clause.as_ref().map(|w| &w.kind), Some(ExprKind::And(parts)) if parts.len() == 2));
        assert!(query.having.is_some());
    }

    #[test]
    fn test_unknown_cohort() {
        let ctx = context(InCohortVia::Subquery);
        let err = in_cohort_subquery(&ctx, Expr::field(&["person_id"]), Expr::constant(99i64), false)
            .expect_err("unknown");
        assert_eq!(err.message(), "Could not find a cohort with the id 99");
    }

    #[test]
    fn test_leftjoin_deduplicates_joins() {
        let ctx = context(InCohortVia::LeftJoin);
        let mut query = parse_select(
            "SELECT event FROM events WHERE person_id IN COHORT 5 OR person_id IN COHORT 5"
        )
        .expect("parse");
        resolve_in_cohorts_leftjoin(&mut query, &ctx).expect("rewrite");
        let select = query.as_select().expect("select");
        let joins: Vec<_> = select.select_from.as_ref().expect("from").iter().collect();
        assert_eq!(joins.len(), 2);
        assert_eq!(joins[1].alias.as_deref(), Some("in_cohort__5"));
    }

    #[test]
    fn test_conjoined_uses_one_join_per_key() {
        let ctx = context(InCohortVia::LeftJoinConjoined);
        let mut query = parse_select(
            "SELECT event FROM events WHERE person_id IN COHORT 5 AND person_id NOT IN COHORT 7"
        )
        .expect("parse");
        resolve_in_cohorts_leftjoin(&mut query, &ctx).expect("rewrite");
        let select = query.as_select().expect("select");
        let joins: Vec<_> = select.select_from.as_ref().expect("from").iter().collect();
        assert_eq!(joins.len(), 2);
        assert_eq!(joins[1].alias.as_deref(), Some("__in_cohort"));
    }
}
