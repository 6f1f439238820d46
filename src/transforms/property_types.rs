//! Typed reads of JSON properties.
//!
//! Property values are stored as JSON text. When the context declares a type
//! for a property, reads of it are wrapped in the matching conversion so
//! comparisons and aggregates see numbers, booleans or datetimes.
//!
//! The pass runs twice: before lazy-table expansion for properties on
//! physical tables, and afterwards for the property reads that expansion
//! generated inside the person subqueries. Conversions it added earlier are
//! recognized and left alone, so running it again is harmless.

use crate::{
    ast::{
        Call, CallType, ConstantDataType, ConstantType, Expr, ExprKind, FieldType, PropertyType, Type
    },
    context::{HogQLContext, PropertyValueType},
    visitor::{VisitorMut, walk_expr_mut}
};

/// Which half of the pipeline the swapper runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapPhase {
    BeforeLazyTables,
    AfterLazyTables
}

/// Source of a property's declared type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PropertyOwner {
    Event,
    Person
}

/// Storage table and column behind `field`, looking through subquery columns
/// that pass a JSON column along unchanged.
fn source_column(field: &FieldType) -> Option<(String, String)> {
    let table_type = field.table_type.as_ref();
    if table_type.is_lazy() {
        return None;
    }
    if let Some(select) = table_type.select_type() {
        return match select.columns.get(&field.name).map(Type::unwrap_alias) {
            Some(Type::Field(inner)) => source_column(inner),
            _ => None
        };
    }
    let table = table_type.resolve_database_table()?;
    Some((table.name.clone(), field.name.clone()))
}

fn owner_of(property: &PropertyType) -> Option<PropertyOwner> {
    let (table, column) = source_column(&property.field_type)?;
    match (table.as_str(), column.as_str()) {
        ("events", "properties") => Some(PropertyOwner::Event),
        ("poe", "properties") | ("raw_persons", "properties") | ("events", "person_properties") => {
            Some(PropertyOwner::Person)
        }
        _ => None
    }
}

fn is_property_field(expr: &Expr) -> bool {
    matches!(expr.kind, ExprKind::Field { .. })
        && matches!(expr.ty.as_ref().map(Type::unwrap_alias), Some(Type::Property(_)))
}

/// Whether `call` is a conversion this pass produced.
fn is_property_cast(call: &Call) -> bool {
    let first = call.args.first();
    match call.name.as_str() {
        "toFloat" | "parseDateTime64BestEffortOrNull" => first.is_some_and(is_property_field),
        "toBool" => first.is_some_and(|arg| match &arg.kind {
            ExprKind::Call(transform) if transform.name == "transform" => {
                transform.args.first().is_some_and(|inner| match &inner.kind {
                    ExprKind::Call(to_string) if to_string.name == "toString" => {
                        to_string.args.first().is_some_and(is_property_field)
                    }
                    _ => false
                })
            }
            _ => false
        }),
        _ => false
    }
}

fn typed_call(name: &str, args: Vec<Expr>, data_type: ConstantDataType) -> Expr {
    let arg_types = args
        .iter()
        .map(|a| a.ty.as_ref().map(Type::resolve_constant_type).unwrap_or_else(ConstantType::unknown))
        .collect();
    Expr::call(name, args).with_type(Type::Call(CallType {
        name:        name.to_string(),
        arg_types,
        param_types: None,
        return_type: ConstantType::new(data_type).with_nullable(true)
    }))
}

fn constant(value: impl Into<crate::ast::ConstantValue>) -> Expr {
    let value = value.into();
    let ty = Type::Constant(value.constant_type());
    Expr::constant(value).with_type(ty)
}

fn typed_array(items: Vec<Expr>) -> Expr {
    let item = items
        .first()
        .and_then(|i| i.ty.as_ref())
        .map(Type::resolve_constant_type)
        .unwrap_or_else(ConstantType::unknown);
    Expr::array(items).with_type(Type::Constant(ConstantType::new(ConstantDataType::Array(Box::new(item)))))
}

/// Conversion of `field` for a declared property type.
fn convert(field: Expr, value_type: PropertyValueType, timezone: &str) -> Expr {
    let span = field.span;
    let converted = match value_type {
        PropertyValueType::String => return field,
        PropertyValueType::Numeric => typed_call("toFloat", vec![field], ConstantDataType::Float),
        PropertyValueType::Boolean => {
            let as_string = typed_call("toString", vec![field], ConstantDataType::String);
            let transform = typed_call(
                "transform",
                vec![
                    as_string,
                    typed_array(vec![constant("true"), constant("false")]),
                    typed_array(vec![constant(1i64), constant(0i64)]),
                    constant(crate::ast::ConstantValue::Null),
                ],
                ConstantDataType::Integer
            );
            typed_call("toBool", vec![transform], ConstantDataType::Boolean)
        }
        PropertyValueType::DateTime => typed_call(
            "parseDateTime64BestEffortOrNull",
            vec![field, constant(6i64), constant(timezone)],
            ConstantDataType::DateTime
        )
    };
    converted.with_span(span)
}

struct PropertySwapper<'a> {
    ctx:     &'a HogQLContext,
    swapped: usize
}

impl PropertySwapper<'_> {
    fn declared_type(&self, property: &PropertyType) -> Option<PropertyValueType> {
        let key = property.chain.first()?.as_name()?;
        if property.chain.len() != 1 {
            return None;
        }
        match owner_of(property)? {
            PropertyOwner::Event => self.ctx.event_property_types.get(key).copied(),
            PropertyOwner::Person => self.ctx.person_property_types.get(key).copied()
        }
    }
}

impl VisitorMut for PropertySwapper<'_> {
    fn visit_expr_mut(&mut self, expr: &mut Expr) {
        match &expr.kind {
            ExprKind::Call(call) if is_property_cast(call) => return,
            ExprKind::Field {
                ..
            } => {
                if let Some(Type::Property(property)) = expr.ty.as_ref()
                    && let Some(value_type) = self.declared_type(property)
                    && value_type != PropertyValueType::String
                {
                    let field = std::mem::replace(expr, Expr::null());
                    *expr = convert(field, value_type, &self.ctx.timezone);
                    self.swapped += 1;
                }
                return;
            }
            _ => {}
        }
        walk_expr_mut(self, expr);
    }
}

/// Wrap typed property reads in `node` in their conversions.
pub fn swap_property_types(node: &mut Expr, ctx: &HogQLContext, phase: SwapPhase) {
    if ctx.event_property_types.is_empty() && ctx.person_property_types.is_empty() {
        return;
    }
    let mut swapper = PropertySwapper {
        ctx,
        swapped: 0
    };
    swapper.visit_expr_mut(node);
    tracing::debug!(phase = ?phase, swapped = swapper.swapped, "swapped property types");
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        context::HogQLQueryModifiers, database::Database, parser::parse_select, printer::Dialect,
        resolver::resolve_types
    };

    fn resolved(ctx: &mut HogQLContext, sql: &str) -> Expr {
        resolve_types(parse_select(sql).expect("parse"), ctx, Dialect::ClickHouse, &[]).expect("resolve")
    }

    fn context() -> HogQLContext {
        let database = Database::create_for(Some(1), &HogQLQueryModifiers::default());
        let mut ctx = HogQLContext::new(1).with_database(Arc::new(database));
        ctx.event_property_types.insert("price".into(), PropertyValueType::Numeric);
        ctx.event_property_types.insert("is_paid".into(), PropertyValueType::Boolean);
        ctx
    }

    fn first_select_inner(expr: &Expr) -> &Expr {
        let query = expr.as_select().expect("select");
        query.select[0].unaliased()
    }

    #[test]
    fn test_numeric_property_is_cast() {
        let mut ctx = context();
        let mut expr = resolved(&mut ctx, "SELECT properties.price FROM events");
        swap_property_types(&mut expr, &ctx, SwapPhase::BeforeLazyTables);
        assert!(matches!(&first_select_inner(&expr).kind, ExprKind::Call(call) if call.name == "toFloat"));
    }

    #[test]
    fn test_second_run_does_not_wrap_twice() {
        let mut ctx = context();
        let mut expr = resolved(&mut ctx, "SELECT properties.is_paid FROM events");
        swap_property_types(&mut expr, &ctx, SwapPhase::BeforeLazyTables);
        swap_property_types(&mut expr, &ctx, SwapPhase::AfterLazyTables);
        let ExprKind::Call(call) = &first_select_inner(&expr).kind else {
            panic!("expected a call");
        };
        assert_eq!(call.name, "toBool");
        assert!(matches!(&call.args[0].kind, ExprKind::Call(inner) if inner.name == "transform"));
    }

    #[test]
    fn test_untyped_property_is_untouched() {
        let mut ctx = context();
        let mut expr = resolved(&mut ctx, "SELECT properties.browser FROM events");
        swap_property_types(&mut expr, &ctx, SwapPhase::BeforeLazyTables);
        assert!(matches!(first_select_inner(&expr).kind, ExprKind::Field { .. }));
    }
}
