use std::{fmt, sync::Arc};

use indexmap::IndexMap;

use crate::{
    ast::{
        Chain, CompareOp, ConstantDataType, ConstantType, Expr, JoinConstraint, JoinExpr,
        SelectQuery
    },
    context::HogQLContext,
    error::{HogQLResult, internal_error}
};

/// Physical storage type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Integer,
    Float,
    String,
    Boolean,
    Date,
    DateTime,
    Uuid,
    /// String column holding a JSON object; supports property access
    Json,
    StringArray
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnField {
    /// Name of the column in storage
    pub name:     String,
    pub kind:     ColumnKind,
    pub nullable: bool,
    pub hidden:   bool
}

impl ColumnField {
    pub fn constant_type(&self) -> ConstantType {
        let data_type = match self.kind {
            ColumnKind::Integer => ConstantDataType::Integer,
            ColumnKind::Float => ConstantDataType::Float,
            ColumnKind::String | ColumnKind::Json => ConstantDataType::String,
            ColumnKind::Boolean => ConstantDataType::Boolean,
            ColumnKind::Date => ConstantDataType::Date,
            ColumnKind::DateTime => ConstantDataType::DateTime,
            ColumnKind::Uuid => ConstantDataType::Uuid,
            ColumnKind::StringArray => {
                ConstantDataType::Array(Box::new(ConstantType::new(ConstantDataType::String)))
            }
        };
        ConstantType::new(data_type).with_nullable(self.nullable)
    }

    pub fn is_json(&self) -> bool {
        self.kind == ColumnKind::Json
    }
}

/// Computed field defined by a HogQL expression over its own table.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpressionField {
    pub expr:          Expr,
    /// Resolve the expression against the owning table only, not the
    /// surrounding query
    pub isolate_scope: bool,
    pub hidden:        bool
}

/// Join relationship declared on a table and materialized on demand.
#[derive(Debug)]
pub struct LazyJoin {
    pub from_field: Chain,
    pub to_field:   String,
    pub join_table: Arc<Table>,
    pub join_type:  String
}

impl PartialEq for LazyJoin {
    fn eq(&self, other: &Self) -> bool {
        self.from_field == other.from_field
            && self.to_field == other.to_field
            && self.join_table.name == other.join_table.name
    }
}

impl LazyJoin {
    pub fn new(from_field: Chain, to_field: &str, join_table: Arc<Table>, join_type: &str) -> Self {
        Self {
            from_field,
            to_field: to_field.to_string(),
            join_table,
            join_type: join_type.to_string()
        }
    }

    /// Build the JOIN that brings the requested fields in under `request.alias`.
    ///
    /// `from_chain` is the fully qualified reference to the join key on the
    /// source side.
    pub fn join_function(
        &self,
        from_chain: Chain,
        request: &LazyRequest<'_>,
        ctx: &HogQLContext
    ) -> HogQLResult<JoinExpr> {
        let mut fields = request.fields_accessed.clone();
        if !fields.contains_key(&self.to_field) {
            fields.insert(self.to_field.clone(), Chain::from_iter([self.to_field.as_str().into()]));
        }
        let inner = LazyRequest {
            fields_accessed: &fields,
            outer:           request.outer,
            alias:           request.alias,
            is_outer_join:   self.is_outer()
        };
        let select = self.join_table.lazy_select(&inner, ctx)?;
        Ok(JoinExpr {
            join_type: Some(self.join_type.clone()),
            table: Some(Expr::select(select)),
            alias: Some(request.alias.to_string()),
            constraint: Some(JoinConstraint::on(Expr::compare(
                CompareOp::Eq,
                Expr::field_chain(from_chain),
                Expr::field(&[request.alias, self.to_field.as_str()])
            ))),
            ..Default::default()
        })
    }

    pub fn is_outer(&self) -> bool {
        let upper = self.join_type.to_ascii_uppercase();
        upper.contains("LEFT") || upper.contains("FULL")
    }
}

/// Catalog entry for one field of a table.
#[derive(Debug, Clone, PartialEq)]
pub enum DatabaseField {
    Column(ColumnField),
    Expression(ExpressionField),
    /// Stands for another chain on the same table, e.g. `person` meaning
    /// `pdi.person`
    FieldTraverser {
        chain: Chain
    },
    LazyJoin(Arc<LazyJoin>),
    VirtualTable(Arc<Table>)
}

impl DatabaseField {
    pub fn column(name: &str, kind: ColumnKind) -> Self {
        Self::Column(ColumnField {
            name: name.to_string(),
            kind,
            nullable: false,
            hidden: false
        })
    }

    pub fn nullable_column(name: &str, kind: ColumnKind) -> Self {
        Self::Column(ColumnField {
            name: name.to_string(),
            kind,
            nullable: true,
            hidden: false
        })
    }

    pub fn traverser(chain: &[&str]) -> Self {
        Self::FieldTraverser {
            chain: chain.iter().map(|s| (*s).into()).collect()
        }
    }

    fn is_hidden(&self) -> bool {
        match self {
            Self::Column(column) => column.hidden,
            Self::Expression(expression) => expression.hidden,
            _ => false
        }
    }
}

/// Parameters handed to a lazy table when it is asked for its subquery.
#[derive(Debug, Clone, Copy)]
pub struct LazyRequest<'a> {
    /// Output alias to chain relative to the lazy table
    pub fields_accessed: &'a IndexMap<String, Chain>,
    /// SELECT the generated subquery is joined into
    pub outer:           &'a SelectQuery,
    /// Name the subquery is referenced by in the outer SELECT
    pub alias:           &'a str,
    pub is_outer_join:   bool
}

/// Generator of a lazy table's subquery.
pub trait LazyTableSource: Send + Sync + fmt::Debug {
    fn lazy_select(&self, request: &LazyRequest<'_>, ctx: &HogQLContext) -> HogQLResult<SelectQuery>;
}

#[derive(Debug, Clone)]
pub enum TableKind {
    Stored,
    Lazy(Arc<dyn LazyTableSource>),
    /// Table function such as `numbers(10)`
    Function {
        min_args: usize,
        max_args: usize
    },
    /// Column group of another table, never in FROM
    Virtual
}

#[derive(Debug, Clone)]
pub struct Table {
    /// Name used in HogQL
    pub name:            String,
    /// Name of the table in storage
    pub clickhouse_name: String,
    pub fields:          IndexMap<String, DatabaseField>,
    pub kind:            TableKind,
    /// Column holding the tenant id; tables without one are not guarded
    pub tenant_column:   Option<String>
}

impl PartialEq for Table {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.clickhouse_name == other.clickhouse_name
    }
}

impl Table {
    pub fn stored(name: &str, clickhouse_name: &str) -> Self {
        Self {
            name:            name.to_string(),
            clickhouse_name: clickhouse_name.to_string(),
            fields:          IndexMap::new(),
            kind:            TableKind::Stored,
            tenant_column:   Some("team_id".to_string())
        }
    }

    pub fn lazy(name: &str, source: Arc<dyn LazyTableSource>) -> Self {
        Self {
            name:            name.to_string(),
            clickhouse_name: name.to_string(),
            fields:          IndexMap::new(),
            kind:            TableKind::Lazy(source),
            tenant_column:   None
        }
    }

    pub fn function(name: &str, min_args: usize, max_args: usize) -> Self {
        Self {
            name:            name.to_string(),
            clickhouse_name: name.to_string(),
            fields:          IndexMap::new(),
            kind:            TableKind::Function {
                min_args,
                max_args
            },
            tenant_column:   None
        }
    }

    pub fn virtual_table(name: &str) -> Self {
        Self {
            name:            name.to_string(),
            clickhouse_name: name.to_string(),
            fields:          IndexMap::new(),
            kind:            TableKind::Virtual,
            tenant_column:   None
        }
    }

    #[must_use]
    pub fn with_field(mut self, name: &str, field: DatabaseField) -> Self {
        self.fields.insert(name.to_string(), field);
        self
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn get_field(&self, name: &str) -> Option<&DatabaseField> {
        self.fields.get(name)
    }

    pub fn is_lazy(&self) -> bool {
        matches!(self.kind, TableKind::Lazy(_))
    }

    pub fn is_function(&self) -> bool {
        matches!(self.kind, TableKind::Function { .. })
    }

    /// Fields `SELECT *` expands to.
    pub fn get_asterisk(&self) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|(name, field)| {
                !field.is_hidden()
                    && self.tenant_column.as_deref() != Some(name.as_str())
                    && name.as_str() != "team_id"
                    && matches!(field, DatabaseField::Column(_) | DatabaseField::Expression(_))
            })
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Subquery selecting the requested fields of this table.
    ///
    /// Lazy tables delegate to their source; stored tables produce a plain
    /// projection.
    pub fn lazy_select(&self, request: &LazyRequest<'_>, ctx: &HogQLContext) -> HogQLResult<SelectQuery> {
        match &self.kind {
            TableKind::Lazy(source) => source.lazy_select(request, ctx),
            TableKind::Stored => {
                let select = request
                    .fields_accessed
                    .iter()
                    .map(|(alias, chain)| {
                        let mut full = Chain::from_iter([self.name.as_str().into()]);
                        full.extend(chain.iter().cloned());
                        Expr::alias(alias.clone(), Expr::field_chain(full))
                    })
                    .collect();
                Ok(SelectQuery::from_table(select, &self.name, None))
            }
            TableKind::Function {
                ..
            }
            | TableKind::Virtual => Err(internal_error(format!(
                "Table {} can not be selected lazily",
                self.name
            )))
        }
    }
}
