use crate::{
    ast::{CallType, ConstantDataType, ConstantType, Expr, Type},
    functions::{clickhouse_name, find_aggregation, find_function, forces_nullable}
};

/// Value type of a resolved expression; unknown when untyped.
pub fn expr_constant_type(expr: &Expr) -> ConstantType {
    expr.ty
        .as_ref()
        .map(Type::resolve_constant_type)
        .unwrap_or_else(ConstantType::unknown)
}

/// Result type of `left ⊕ right`.
///
/// Integer with integer stays integer, any float makes a float, any datetime
/// makes a datetime. Nullable when either side is.
pub fn arithmetic_type(left: &ConstantType, right: &ConstantType) -> ConstantType {
    use ConstantDataType as D;
    let nullable = left.nullable || right.nullable;
    let data_type = match (&left.data_type, &right.data_type) {
        (D::Unknown, _) | (_, D::Unknown) => D::Unknown,
        (D::Integer, D::Integer) => D::Integer,
        (D::DateTime, _) | (_, D::DateTime) => D::DateTime,
        (D::Date, D::Interval | D::Integer) | (D::Interval | D::Integer, D::Date) => D::Date,
        (D::Float | D::Decimal | D::Integer, D::Float | D::Decimal | D::Integer) => D::Float,
        _ => D::Unknown
    };
    ConstantType {
        data_type,
        nullable
    }
}

/// Type of a function or aggregate call.
///
/// Unknown overloads fall back to an unknown return type rather than failing.
pub(super) fn call_type(name: &str, args: &[Expr], params: Option<&[Expr]>) -> CallType {
    let arg_types: Vec<ConstantType> = args.iter().map(expr_constant_type).collect();
    let param_types = params.map(|p| p.iter().map(expr_constant_type).collect());
    let meta = find_function(name).cloned().or_else(|| find_aggregation(name));
    let mut return_type = meta
        .and_then(|m| m.return_type(&arg_types))
        .unwrap_or_else(ConstantType::unknown);
    if forces_nullable(name) || clickhouse_name(name).is_some_and(forces_nullable) {
        return_type.nullable = true;
    }
    CallType {
        name: name.to_string(),
        arg_types,
        param_types,
        return_type
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ty(data_type: ConstantDataType, nullable: bool) -> ConstantType {
        ConstantType {
            data_type,
            nullable
        }
    }

    #[test]
    fn test_integer_arithmetic_stays_integer() {
        let int = ty(ConstantDataType::Integer, false);
        assert_eq!(arithmetic_type(&int, &int), int);
    }

    #[test]
    fn test_float_and_nullability_propagate() {
        let int = ty(ConstantDataType::Integer, false);
        let float = ty(ConstantDataType::Float, true);
        assert_eq!(arithmetic_type(&int, &float), ty(ConstantDataType::Float, true));
    }

    #[test]
    fn test_datetime_wins() {
        let dt = ty(ConstantDataType::DateTime, false);
        let interval = ty(ConstantDataType::Interval, false);
        assert_eq!(arithmetic_type(&dt, &interval).data_type, ConstantDataType::DateTime);
    }

    #[test]
    fn test_unknown_operand() {
        let int = ty(ConstantDataType::Integer, false);
        let unknown = ty(ConstantDataType::Unknown, false);
        assert_eq!(arithmetic_type(&int, &unknown), ty(ConstantDataType::Unknown, false));
    }

    #[test]
    fn test_or_null_functions_are_nullable() {
        let call = call_type("toUUIDOrNull", &[Expr::constant("x")], None);
        assert!(call.return_type.nullable);
    }
}
