use indexmap::IndexSet;

use super::Resolver;
use crate::{
    ast::{Cte, SelectQueryType, TableType, Type},
    error::{HogQLResult, resolution_error}
};

/// One entry of the scope stack.
#[derive(Debug, Default)]
pub(super) struct Frame {
    pub ty:              SelectQueryType,
    /// Aliases defined with an explicit `AS`; these can not be redefined
    pub visible_aliases: IndexSet<String>,
    /// Names from the WINDOW clause
    pub windows:         IndexSet<String>
}

impl Frame {
    pub fn from_type(ty: SelectQueryType) -> Self {
        Self {
            ty,
            ..Default::default()
        }
    }

    pub fn all_tables(&self) -> impl Iterator<Item = &TableType> {
        self.ty.tables.values().chain(self.ty.anonymous_tables.iter())
    }
}

impl Resolver<'_> {
    /// Innermost SELECT frame, skipping lambda frames.
    pub(super) fn current_frame(&self) -> Option<&Frame> {
        self.frames.iter().rev().find(|f| !f.ty.is_lambda_type)
    }

    pub(super) fn current_frame_mut(&mut self) -> Option<&mut Frame> {
        self.frames.iter_mut().rev().find(|f| !f.ty.is_lambda_type)
    }

    /// Bind a single name to an alias, a table column or a lambda argument.
    ///
    /// Only the innermost SELECT is searched; there are no correlated
    /// subqueries.
    pub(super) fn lookup_field_by_name(&self, name: &str) -> HogQLResult<Option<Type>> {
        for frame in self.frames.iter().rev() {
            if frame.ty.is_lambda_type {
                if frame.ty.lambda_args.iter().any(|arg| arg == name) {
                    return Ok(Some(Type::LambdaArgument {
                        name: name.to_string()
                    }));
                }
                continue;
            }
            if let Some(alias) = frame.ty.aliases.get(name) {
                return Ok(Some(Type::FieldAlias(alias.clone())));
            }
            let mut found = Vec::new();
            for table in frame.all_tables() {
                if table.has_child(name) {
                    found.push(table.get_child(name)?);
                }
            }
            if found.len() > 1 {
                return Err(resolution_error(format!(
                    "Ambiguous query. Found multiple sources for field: {}",
                    name
                )));
            }
            return Ok(found.pop());
        }
        Ok(None)
    }

    pub(super) fn lookup_cte(&self, name: &str) -> Option<Cte> {
        self.current_frame().and_then(|f| f.ty.ctes.get(name)).cloned()
    }
}
