//! Resolved types.
//!
//! Two families live here: primitive [`ConstantType`]s describing values, and
//! structural types describing where a value comes from (a column on a table,
//! a JSON path into a column, a column of a subquery, ...). Structural types
//! hold the catalog objects they point at through `Arc`, so a resolved tree can
//! be cloned and moved across threads without borrowing the catalog.

use std::{fmt, sync::Arc};

use indexmap::IndexMap;

use super::{Chain, ChainItem, Cte};
use crate::{
    database::{DatabaseField, LazyJoin, Table},
    error::{HogQLResult, internal_error, resolution_error}
};

#[derive(Debug, Clone, PartialEq)]
pub enum ConstantDataType {
    Unknown,
    Integer,
    Float,
    Decimal,
    String,
    Boolean,
    Date,
    DateTime,
    Interval,
    Uuid,
    Array(Box<ConstantType>),
    Tuple(Vec<ConstantType>)
}

impl fmt::Display for ConstantDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "Unknown"),
            Self::Integer => write!(f, "Integer"),
            Self::Float => write!(f, "Float"),
            Self::Decimal => write!(f, "Decimal"),
            Self::String => write!(f, "String"),
            Self::Boolean => write!(f, "Boolean"),
            Self::Date => write!(f, "Date"),
            Self::DateTime => write!(f, "DateTime"),
            Self::Interval => write!(f, "IntervalType"),
            Self::Uuid => write!(f, "UUID"),
            Self::Array(item) => write!(f, "Array({})", item.data_type),
            Self::Tuple(items) => {
                write!(f, "Tuple(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item.data_type)?;
                }
                write!(f, ")")
            }
        }
    }
}

/// Primitive value type with nullability.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstantType {
    pub data_type: ConstantDataType,
    pub nullable:  bool
}

impl ConstantType {
    pub fn new(data_type: ConstantDataType) -> Self {
        Self {
            data_type,
            nullable: false
        }
    }

    /// Type of a value nothing is known about. Assumed nullable.
    pub fn unknown() -> Self {
        Self {
            data_type: ConstantDataType::Unknown,
            nullable:  true
        }
    }

    #[must_use]
    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    pub fn is_unknown(&self) -> bool {
        self.data_type == ConstantDataType::Unknown
    }
}

/// Column of a table or subquery.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldType {
    pub name:       String,
    pub table_type: Box<TableType>
}

impl FieldType {
    pub fn new(name: impl Into<String>, table_type: TableType) -> Self {
        Self {
            name:       name.into(),
            table_type: Box::new(table_type)
        }
    }

    /// Catalog entry backing this field, if it comes from a database table.
    pub fn resolve_database_field(&self) -> Option<&DatabaseField> {
        self.table_type
            .resolve_database_table()
            .and_then(|table| table.get_field(&self.name))
    }

    pub fn resolve_constant_type(&self) -> ConstantType {
        if let Some(select) = self.table_type.select_type() {
            return select
                .columns
                .get(&self.name)
                .map(Type::resolve_constant_type)
                .unwrap_or_else(ConstantType::unknown);
        }
        match self.resolve_database_field() {
            Some(DatabaseField::Column(column)) => column.constant_type(),
            _ => ConstantType::unknown()
        }
    }

    /// Whether property access (`field.key`) is allowed on this field.
    pub fn is_json(&self) -> bool {
        if let Some(select) = self.table_type.select_type() {
            return select.columns.get(&self.name).is_some_and(Type::is_json_field);
        }
        matches!(self.resolve_database_field(), Some(DatabaseField::Column(c)) if c.is_json())
    }

    pub fn get_child(&self, name: &ChainItem) -> HogQLResult<Type> {
        if self.is_json() {
            let mut chain = Chain::new();
            chain.push(name.clone());
            return Ok(Type::Property(PropertyType {
                chain,
                field_type: self.clone(),
                joined_subquery: None,
                joined_subquery_field_name: None
            }));
        }
        Err(resolution_error(format!(
            "Can not access property \"{}\" on field \"{}\".",
            name, self.name
        )))
    }
}

/// JSON path into a property-bag column: `properties.$browser`.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyType {
    pub chain:                      Chain,
    pub field_type:                 FieldType,
    /// Set by lazy-table expansion when the value is read from a subquery
    pub joined_subquery:            Option<Box<TableType>>,
    pub joined_subquery_field_name: Option<String>
}

/// Named binding introduced by `expr AS alias`.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldAliasType {
    pub alias: String,
    pub ty:    Box<Type>
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallType {
    pub name:        String,
    pub arg_types:   Vec<ConstantType>,
    pub param_types: Option<Vec<ConstantType>>,
    pub return_type: ConstantType
}

#[derive(Debug, Clone, PartialEq)]
pub struct AsteriskType {
    pub table_type: TableType
}

/// Field that stands for another chain on the same table.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldTraverserType {
    pub chain:      Chain,
    pub table_type: Box<TableType>
}

/// Scope of one SELECT: its tables, aliases, output columns and CTEs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectQueryType {
    pub aliases:          IndexMap<String, FieldAliasType>,
    pub columns:          IndexMap<String, Type>,
    pub tables:           IndexMap<String, TableType>,
    pub ctes:             IndexMap<String, Cte>,
    pub anonymous_tables: Vec<TableType>,
    /// Lambda scopes only hold argument names and defer everything else
    /// to the enclosing scope
    pub is_lambda_type:   bool,
    pub lambda_args:      Vec<String>
}

impl SelectQueryType {
    pub fn lambda(args: Vec<String>) -> Self {
        Self {
            is_lambda_type: true,
            lambda_args: args,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectSetQueryType {
    pub types: Vec<Arc<SelectQueryType>>
}

impl SelectSetQueryType {
    /// Output shape of the set query, taken from its first branch.
    pub fn first(&self) -> Option<&Arc<SelectQueryType>> {
        self.types.first()
    }
}

/// Provenance of a table reference.
#[derive(Debug, Clone, PartialEq)]
pub enum TableType {
    Table {
        table: Arc<Table>
    },
    Alias {
        alias: String,
        inner: Box<TableType>
    },
    /// Lazy table in FROM, replaced by a generated subquery before printing
    Lazy {
        table: Arc<Table>
    },
    /// Lazy join reached through a field, replaced by a generated JOIN
    LazyJoin {
        parent: Box<TableType>,
        field:  String,
        join:   Arc<LazyJoin>
    },
    /// Group of columns of the parent table presented as a table
    Virtual {
        parent: Box<TableType>,
        field:  String,
        table:  Arc<Table>
    },
    SelectQueryAlias {
        alias:  String,
        select: Arc<SelectQueryType>
    },
    SelectQuery(Arc<SelectQueryType>)
}

impl TableType {
    pub fn resolve_database_table(&self) -> Option<&Arc<Table>> {
        match self {
            Self::Table {
                table
            }
            | Self::Lazy {
                table
            }
            | Self::Virtual {
                table, ..
            } => Some(table),
            Self::Alias {
                inner, ..
            } => inner.resolve_database_table(),
            Self::LazyJoin {
                join, ..
            } => Some(&join.join_table),
            Self::SelectQueryAlias {
                ..
            }
            | Self::SelectQuery(_) => None
        }
    }

    pub fn select_type(&self) -> Option<&Arc<SelectQueryType>> {
        match self {
            Self::SelectQueryAlias {
                select, ..
            }
            | Self::SelectQuery(select) => Some(select),
            _ => None
        }
    }

    /// Whether this type must be expanded before printing.
    pub fn is_lazy(&self) -> bool {
        match self {
            Self::Lazy {
                ..
            }
            | Self::LazyJoin {
                ..
            } => true,
            Self::Alias {
                inner, ..
            } => inner.is_lazy(),
            Self::Virtual {
                parent, ..
            } => parent.is_lazy(),
            _ => false
        }
    }

    /// Name the table is referenced by in printed SQL.
    ///
    /// Lazy joins get a long name built from the path that reached them,
    /// e.g. `events__pdi__person`.
    pub fn print_name(&self) -> String {
        match self {
            Self::Table {
                table
            }
            | Self::Lazy {
                table
            } => table.name.clone(),
            Self::Alias {
                alias, ..
            }
            | Self::SelectQueryAlias {
                alias, ..
            } => alias.clone(),
            Self::LazyJoin {
                parent,
                field,
                ..
            } => format!("{}__{}", parent.print_name(), field),
            Self::Virtual {
                parent, ..
            } => parent.print_name(),
            Self::SelectQuery(_) => String::new()
        }
    }

    pub fn has_child(&self, name: &str) -> bool {
        if let Some(select) = self.select_type() {
            return select.columns.contains_key(name);
        }
        self.resolve_database_table().is_some_and(|table| table.has_field(name))
    }

    pub fn get_child(&self, name: &str) -> HogQLResult<Type> {
        if let Some(select) = self.select_type() {
            if select.columns.contains_key(name) {
                return Ok(Type::Field(FieldType::new(name, self.clone())));
            }
            return Err(resolution_error(format!("Field not found: {}", name)));
        }
        let table = self
            .resolve_database_table()
            .ok_or_else(|| internal_error("Table type without a table"))?;
        match table.get_field(name) {
            None => Err(resolution_error(format!(
                "Field \"{}\" not found on table {}",
                name, table.name
            ))),
            Some(DatabaseField::LazyJoin(join)) => Ok(Type::Table(Self::LazyJoin {
                parent: Box::new(self.clone()),
                field:  name.to_string(),
                join:   Arc::clone(join)
            })),
            Some(DatabaseField::VirtualTable(virtual_table)) => Ok(Type::Table(Self::Virtual {
                parent: Box::new(self.clone()),
                field:  name.to_string(),
                table:  Arc::clone(virtual_table)
            })),
            Some(DatabaseField::FieldTraverser {
                chain
            }) => Ok(Type::FieldTraverser(FieldTraverserType {
                chain:      chain.clone(),
                table_type: Box::new(self.clone())
            })),
            Some(DatabaseField::Column(_) | DatabaseField::Expression(_)) => {
                Ok(Type::Field(FieldType::new(name, self.clone())))
            }
        }
    }
}

/// Resolved type attached to an expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Type {
    Constant(ConstantType),
    Field(FieldType),
    Property(PropertyType),
    FieldAlias(FieldAliasType),
    Call(CallType),
    Asterisk(AsteriskType),
    LambdaArgument {
        name: String
    },
    FieldTraverser(FieldTraverserType),
    /// Field that could not be bound; only produced for the HogQL dialect
    Unresolved {
        name: String
    },
    Table(TableType),
    SelectQuery(Arc<SelectQueryType>),
    SelectSetQuery(Arc<SelectSetQueryType>)
}

impl Type {
    pub fn constant(data_type: ConstantDataType) -> Self {
        Self::Constant(ConstantType::new(data_type))
    }

    pub fn resolve_constant_type(&self) -> ConstantType {
        match self {
            Self::Constant(ty) => ty.clone(),
            Self::Field(field) => field.resolve_constant_type(),
            Self::Property(_) => ConstantType::new(ConstantDataType::String).with_nullable(true),
            Self::FieldAlias(alias) => alias.ty.resolve_constant_type(),
            Self::Call(call) => call.return_type.clone(),
            Self::SelectQuery(select) => select
                .columns
                .values()
                .next()
                .map(Type::resolve_constant_type)
                .unwrap_or_else(ConstantType::unknown),
            Self::SelectSetQuery(set) => set
                .first()
                .and_then(|select| select.columns.values().next())
                .map(Type::resolve_constant_type)
                .unwrap_or_else(ConstantType::unknown),
            Self::Asterisk(_)
            | Self::LambdaArgument {
                ..
            }
            | Self::FieldTraverser(_)
            | Self::Unresolved {
                ..
            }
            | Self::Table(_) => ConstantType::unknown()
        }
    }

    pub fn is_nullable(&self) -> bool {
        self.resolve_constant_type().nullable
    }

    fn is_json_field(&self) -> bool {
        match self {
            Self::Field(field) => field.is_json(),
            Self::FieldAlias(alias) => alias.ty.is_json_field(),
            _ => false
        }
    }

    /// Follow alias bindings to the underlying type.
    pub fn unwrap_alias(&self) -> &Type {
        match self {
            Self::FieldAlias(alias) => alias.ty.unwrap_alias(),
            other => other
        }
    }

    /// Type of `self.name`.
    pub fn get_child(&self, name: &ChainItem) -> HogQLResult<Type> {
        match self {
            Self::Table(table_type) => match name {
                ChainItem::Name(n) => table_type.get_child(n),
                ChainItem::Index(i) => Err(resolution_error(format!(
                    "Can not access index {} on a table",
                    i
                )))
            },
            Self::Field(field) => field.get_child(name),
            Self::Property(property) => {
                let mut property = property.clone();
                property.chain.push(name.clone());
                Ok(Self::Property(property))
            }
            Self::FieldAlias(alias) => alias.ty.get_child(name),
            Self::LambdaArgument {
                ..
            }
            | Self::Unresolved {
                ..
            } => Ok(Self::Constant(ConstantType::unknown())),
            Self::SelectQuery(select) => match name {
                ChainItem::Name(n) if select.columns.contains_key(n) => Ok(Type::Field(
                    FieldType::new(n.clone(), TableType::SelectQuery(Arc::clone(select)))
                )),
                _ => Err(resolution_error(format!("Field not found: {}", name)))
            },
            _ => Err(resolution_error(format!(
                "Can not access property \"{}\" on a value",
                name
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_is_nullable() {
        assert!(ConstantType::unknown().nullable);
        assert!(!ConstantType::new(ConstantDataType::Integer).nullable);
    }

    #[test]
    fn test_data_type_display() {
        let ty = ConstantDataType::Array(Box::new(ConstantType::new(ConstantDataType::String)));
        assert_eq!(ty.to_string(), "Array(String)");
    }
}
