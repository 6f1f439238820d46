//! JSON property reads.
//!
//! A property lives in one of three places: inside the JSON text of its
//! column, in a materialized column of its own, or in a map column shared
//! by a property group. Reads from the JSON text unwrap quotes and map the
//! stored `''` and `'null'` sentinels to NULL.

use std::sync::Arc;

use super::{Dialect, Printer, escape::escape_string};
use crate::{
    ast::{ChainItem, CompareOp, ConstantValue, Expr, ExprKind, PropertyType, TableType, Type},
    context::{MaterializedIndex, PropertyGroupsMode},
    database::{DatabaseField, Table},
    error::{HogQLResult, internal_error}
};

/// Physical column backing a single-key property.
enum Layout {
    Materialized {
        column:   String,
        nullable: bool,
        index:    MaterializedIndex
    },
    Group {
        map: String,
        key: String
    }
}

/// Stored table behind a table type, looking through aliases and virtual
/// column groups.
fn storage_table(table_type: &TableType) -> Option<&Arc<Table>> {
    match table_type {
        TableType::Table {
            table
        } => Some(table),
        TableType::Alias {
            inner, ..
        } => storage_table(inner),
        TableType::Virtual {
            parent, ..
        } => storage_table(parent),
        _ => None
    }
}

fn string_literal(expr: &Expr) -> Option<&str> {
    expr.as_constant().and_then(ConstantValue::as_str)
}

/// String values of a literal list, e.g. the right side of `IN ('a', 'b')`.
fn string_list(expr: &Expr) -> Option<Vec<String>> {
    match &expr.kind {
        ExprKind::Tuple(items) | ExprKind::Array(items) => items
            .iter()
            .map(|item| string_literal(item).map(str::to_string))
            .collect(),
        ExprKind::Constant(ConstantValue::Tuple(items) | ConstantValue::Array(items)) => items
            .iter()
            .map(|item| item.as_str().map(str::to_string))
            .collect(),
        _ => None
    }
}

/// Neither empty nor the `'null'` sentinel.
fn is_plain(value: &str) -> bool {
    !value.is_empty() && value != "null"
}

/// Whether LIKE `pattern` matches `text`, with `%`, `_` and backslash
/// escapes.
fn like_matches(pattern: &str, text: &str, case_insensitive: bool) -> bool {
    let fold = |s: &str| if case_insensitive { s.to_lowercase() } else { s.to_string() };
    let pattern: Vec<char> = fold(pattern).chars().collect();
    let text: Vec<char> = fold(text).chars().collect();
    like_from(&pattern, &text)
}

fn like_from(pattern: &[char], text: &[char]) -> bool {
    match pattern.split_first() {
        None => text.is_empty(),
        Some(('%', rest)) => (0..=text.len()).any(|skip| like_from(rest, &text[skip..])),
        Some(('_', rest)) => !text.is_empty() && like_from(rest, &text[1..]),
        Some(('\\', [escaped, rest @ ..])) => text.first() == Some(escaped) && like_from(rest, &text[1..]),
        Some((c, rest)) => text.first() == Some(c) && like_from(rest, &text[1..])
    }
}

impl Printer<'_> {
    fn layout(&self, property: &PropertyType) -> HogQLResult<Option<Layout>> {
        let [ChainItem::Name(key)] = property.chain.as_slice() else {
            return Ok(None);
        };
        if property.joined_subquery.is_some() {
            return Ok(None);
        }
        let field = &property.field_type;
        let table_type = field.table_type.as_ref();
        let (Some(table), Some(DatabaseField::Column(column))) =
            (storage_table(table_type), field.resolve_database_field())
        else {
            return Ok(None);
        };
        let prefix = self.identifier(&table_type.print_name())?;
        if let Some(materialized) = self
            .ctx
            .materialized_column(&table.clickhouse_name, &column.name, key)
        {
            return Ok(Some(Layout::Materialized {
                column:   format!("{}.{}", prefix, self.identifier(&materialized.name)?),
                nullable: materialized.nullable,
                index:    materialized.index
            }));
        }
        if let Some(group) = self.ctx.property_group(&table.clickhouse_name, &column.name, key) {
            return Ok(Some(Layout::Group {
                map: format!("{}.{}", prefix, self.identifier(&group.group_column)?),
                key: key.clone()
            }));
        }
        Ok(None)
    }

    /// SQL reading `property`.
    pub(super) fn property(&mut self, property: &PropertyType) -> HogQLResult<String> {
        if property.field_type.table_type.is_lazy() {
            return Err(internal_error(format!(
                "Property of {} still references a lazy table",
                property.field_type.name
            )));
        }
        if let (Some(subquery), Some(column)) = (&property.joined_subquery, &property.joined_subquery_field_name) {
            return Ok(format!(
                "{}.{}",
                self.identifier(&subquery.print_name())?,
                self.identifier(column)?
            ));
        }
        match self.dialect {
            Dialect::HogQL => {
                let mut chain = vec![ChainItem::Name(property.field_type.name.clone())];
                chain.extend(property.chain.iter().cloned());
                self.chain_text(&chain)
            }
            Dialect::Postgres => self.postgres_property(property),
            Dialect::ClickHouse => match self.layout(property)? {
                Some(Layout::Materialized {
                    column,
                    nullable,
                    index
                }) => {
                    if nullable || index != MaterializedIndex::None {
                        Ok(column)
                    } else {
                        Ok(format!("nullIf(nullIf({}, ''), 'null')", column))
                    }
                }
                Some(Layout::Group {
                    map,
                    key
                }) => {
                    let key = self.param(ConstantValue::String(key));
                    Ok(format!("if(mapContains({map}, {key}), {map}[{key}], NULL)"))
                }
                None => self.json_property(property)
            }
        }
    }

    fn json_property(&mut self, property: &PropertyType) -> HogQLResult<String> {
        let column = self.database_field(&property.field_type)?;
        let mut args = vec![column];
        for item in &property.chain {
            args.push(match item {
                ChainItem::Name(name) => self.param(ConstantValue::String(name.clone())),
                ChainItem::Index(index) => index.to_string()
            });
        }
        Ok(format!(
            "replaceRegexpAll(nullIf(nullIf(JSONExtractRaw({}), ''), 'null'), '^\"|\"$', '')",
            args.join(", ")
        ))
    }

    /// `col -> 'a' ->> 'b'`
    fn postgres_property(&mut self, property: &PropertyType) -> HogQLResult<String> {
        let mut sql = self.database_field(&property.field_type)?;
        let last = property.chain.len().saturating_sub(1);
        for (i, item) in property.chain.iter().enumerate() {
            let operator = if i == last { "->>" } else { "->" };
            let key = match item {
                ChainItem::Name(name) => escape_string(name, Dialect::Postgres)?,
                ChainItem::Index(index) => (index - 1).to_string()
            };
            sql = format!("{} {} {}", sql, operator, key);
        }
        Ok(format!("({})", sql))
    }

    /// Comparison of a materialized or grouped property with literals,
    /// printed so the column's indexes stay usable.
    pub(super) fn optimized_property_compare(
        &mut self,
        op: CompareOp,
        left: &Expr,
        right: &Expr
    ) -> HogQLResult<Option<String>> {
        let (ExprKind::Field {
            ..
        }, Some(Type::Property(property))) = (&left.kind, &left.ty)
        else {
            return Ok(None);
        };
        match self.layout(property)? {
            Some(Layout::Materialized {
                column,
                nullable,
                index
            }) => Ok(self.materialized_compare(op, &column, nullable, index, right)),
            Some(Layout::Group {
                map,
                key
            }) if self.ctx.modifiers.property_groups_mode == PropertyGroupsMode::Optimized => {
                Ok(self.group_compare(op, &map, &key, right))
            }
            _ => Ok(None)
        }
    }

    fn materialized_compare(
        &mut self,
        op: CompareOp,
        column: &str,
        nullable: bool,
        index: MaterializedIndex,
        right: &Expr
    ) -> Option<String> {
        match op {
            CompareOp::Eq | CompareOp::NotEq => {
                let value = string_literal(right).filter(|v| is_plain(v))?.to_string();
                let value = self.param(ConstantValue::String(value));
                if op == CompareOp::Eq {
                    Some(format!("equals({}, {})", column, value))
                } else if nullable {
                    Some(format!("ifNull(notEquals({}, {}), 1)", column, value))
                } else {
                    Some(format!("notEquals({}, {})", column, value))
                }
            }
            CompareOp::Like | CompareOp::ILike => {
                let pattern = string_literal(right).filter(|v| is_plain(v))?;
                // Absent values are stored as '' or 'null' in non-nullable columns
                if !nullable && ["", "null"].iter().any(|s| like_matches(pattern, s, op == CompareOp::ILike)) {
                    return None;
                }
                let pattern = self.param(ConstantValue::String(pattern.to_string()));
                Some(match (op, index) {
                    (CompareOp::ILike, MaterializedIndex::NgramLower) => {
                        format!("like(lower({}), lower({}))", column, pattern)
                    }
                    (CompareOp::ILike, _) => format!("ilike({}, {})", column, pattern),
                    _ => format!("like({}, {})", column, pattern)
                })
            }
            CompareOp::In | CompareOp::NotIn => {
                let values = string_list(right).filter(|v| !v.is_empty() && v.iter().all(|s| is_plain(s)))?;
                let params = values
                    .into_iter()
                    .map(|v| self.param(ConstantValue::String(v)))
                    .collect::<Vec<_>>()
                    .join(", ");
                let negated = op == CompareOp::NotIn;
                Some(match (nullable, negated) {
                    (true, false) => format!("has([{}], {})", params, column),
                    (true, true) => format!("not(has([{}], {}))", params, column),
                    (false, false) => format!("in({}, tuple({}))", column, params),
                    (false, true) => format!("notIn({}, tuple({}))", column, params)
                })
            }
            _ => None
        }
    }

    fn group_compare(&mut self, op: CompareOp, map: &str, key: &str, right: &Expr) -> Option<String> {
        enum Shape {
            Absent,
            Present,
            Value(String),
            Empty,
            AnyOf(Vec<String>)
        }
        let shape = match op {
            CompareOp::Eq if right.is_null_constant() => Shape::Absent,
            CompareOp::NotEq if right.is_null_constant() => Shape::Present,
            CompareOp::Eq => match string_literal(right)? {
                "" => Shape::Empty,
                value if is_plain(value) => Shape::Value(value.to_string()),
                _ => return None
            },
            CompareOp::In => {
                let mut values = string_list(right).filter(|v| !v.is_empty() && v.iter().all(|s| is_plain(s)))?;
                if values.len() == 1 {
                    Shape::Value(values.remove(0))
                } else {
                    Shape::AnyOf(values)
                }
            }
            _ => return None
        };
        let key = self.param(ConstantValue::String(key.to_string()));
        Some(match shape {
            Shape::Absent => format!("not(mapContains({}, {}))", map, key),
            Shape::Present => format!("mapContains({}, {})", map, key),
            Shape::Value(value) => {
                let value = self.param(ConstantValue::String(value));
                format!("equals({}[{}], {})", map, key, value)
            }
            Shape::Empty => {
                let empty = self.param(ConstantValue::String(String::new()));
                format!("and(mapContains({map}, {key}), equals({map}[{key}], {empty}))")
            }
            Shape::AnyOf(values) => {
                let values = values
                    .into_iter()
                    .map(|v| self.param(ConstantValue::String(v)))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("and(mapContains({map}, {key}), in({map}[{key}], tuple({values})))")
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_like_matching() {
        assert!(like_matches("%", "", false));
        assert!(like_matches("%ul%", "null", false));
        assert!(like_matches("n_ll", "null", false));
        assert!(like_matches("NULL", "null", true));
        assert!(!like_matches("NULL", "null", false));
        assert!(!like_matches("%on%", "", false));
        assert!(!like_matches("%on%", "null", false));
        assert!(!like_matches("_", "", false));
        assert!(!like_matches("\\%", "", false));
        assert!(like_matches("100\\%", "100%", false));
    }
}
