use super::{MAX_EXPANSION_DEPTH, Resolver, expr_constant_type, scope::Frame, typed};
use crate::{
    ast::{
        AsteriskType, Chain, ChainItem, ConstantDataType, ConstantType, ConstantValue,
        Expr, ExprKind, PropertyType, Span, TableType, Type
    },
    database::{DatabaseField, ExpressionField},
    error::{HogQLResult, internal_error, query_error, resolution_error},
    printer::Dialect,
    visitor::clone_expr
};

fn chain_text(chain: &Chain) -> String {
    chain.iter().map(ToString::to_string).collect::<Vec<_>>().join(".")
}

impl Resolver<'_> {
    pub(super) fn visit_field(&mut self, chain: Chain, span: Option<Span>) -> HogQLResult<Expr> {
        let Some(ChainItem::Name(head)) = chain.first().cloned() else {
            return Err(internal_error("Field chain must start with a name"));
        };

        if head == "*" && chain.len() == 1 {
            let table_type = self.single_table()?;
            return Ok(typed(
                ExprKind::Field {
                    chain
                },
                Type::Asterisk(AsteriskType {
                    table_type
                }),
                span
            ));
        }

        let mut ty = None;
        if chain.len() > 1 {
            ty = self
                .current_frame()
                .and_then(|f| f.ty.tables.get(&head))
                .map(|t| Type::Table(t.clone()));
        }
        if ty.is_none() {
            ty = self.lookup_field_by_name(&head)?;
        }
        if ty.is_none() {
            if let Some(cte) = self.lookup_cte(&head) {
                if chain.len() > 1 {
                    return Err(resolution_error(format!(
                        "Can not access \"{}\" on CTE {}. Join it first.",
                        chain_text(&chain),
                        head
                    )));
                }
                tracing::trace!(cte = %head, kind = ?cte.cte_type, "inlining CTE reference");
                let expr = clone_expr(&cte.expr, false);
                return self.visit(expr.with_span(span));
            }
            if chain.len() == 1
                && let Some(value) = self.ctx.globals.get(&head).cloned()
            {
                return self.visit(Expr::constant(value).with_span(span));
            }
        }

        let Some(mut ty) = ty else {
            let name = chain_text(&chain);
            let message = format!("Unable to resolve field: {}", name);
            if self.dialect == Dialect::HogQL {
                self.ctx.add_notice(message, span);
                return Ok(typed(
                    ExprKind::Field {
                        chain
                    },
                    Type::Unresolved {
                        name
                    },
                    span
                ));
            }
            return Err(resolution_error(message));
        };

        for (i, item) in chain.iter().enumerate().skip(1) {
            ty = self.follow_traverser(ty)?;
            if item.as_name() == Some("*") {
                let Type::Table(table_type) = ty else {
                    return Err(resolution_error(format!("Can not select * from {}", chain_text(&chain))));
                };
                if i + 1 != chain.len() {
                    return Err(resolution_error("* must be the last element of a field chain"));
                }
                ty = Type::Asterisk(AsteriskType {
                    table_type
                });
                break;
            }
            ty = ty.get_child(item)?;
        }
        ty = self.follow_traverser(ty)?;

        if let Type::Field(field) = &ty
            && let Some(DatabaseField::Expression(expression)) = field.resolve_database_field()
        {
            let expression = expression.clone();
            let table_type = field.table_type.as_ref().clone();
            return self.expand_expression_field(&expression, table_type, span);
        }

        Ok(typed(
            ExprKind::Field {
                chain
            },
            ty,
            span
        ))
    }

    /// Resolve field traversers until a concrete type is reached.
    fn follow_traverser(&self, mut ty: Type) -> HogQLResult<Type> {
        let mut depth = 0;
        while let Type::FieldTraverser(traverser) = ty {
            depth += 1;
            if depth > MAX_EXPANSION_DEPTH {
                return Err(query_error(format!(
                    "Field traversal exceeded the maximum depth of {}",
                    MAX_EXPANSION_DEPTH
                )));
            }
            let mut current = Type::Table(*traverser.table_type);
            for item in &traverser.chain {
                current = self.follow_traverser(current)?;
                current = current.get_child(item)?;
            }
            ty = current;
        }
        Ok(ty)
    }

    /// The only table of the current SELECT.
    pub(super) fn single_table(&self) -> HogQLResult<TableType> {
        let frame = self
            .current_frame()
            .ok_or_else(|| query_error("Can not use '*' outside of a SELECT"))?;
        let mut tables = frame.all_tables();
        match (tables.next(), tables.next()) {
            (Some(table), None) => Ok(table.clone()),
            (None, _) => Err(query_error("Can not use '*' without a FROM clause")),
            _ => Err(query_error("Cannot use '*' when there are multiple tables in the query"))
        }
    }

    /// Replace a computed field with its own resolved expression.
    fn expand_expression_field(
        &mut self,
        expression: &ExpressionField,
        table_type: TableType,
        span: Option<Span>
    ) -> HogQLResult<Expr> {
        if self.expansion_depth >= MAX_EXPANSION_DEPTH {
            return Err(query_error(format!(
                "Field expansion exceeded the maximum depth of {}",
                MAX_EXPANSION_DEPTH
            )));
        }
        self.expansion_depth += 1;
        let expr = clone_expr(&expression.expr, false).with_span(span);
        let result = if expression.isolate_scope {
            let mut frame = Frame::default();
            frame.ty.anonymous_tables.push(table_type);
            self.with_frame(frame, |r| r.visit(expr)).1
        } else {
            self.visit(expr)
        };
        self.expansion_depth -= 1;
        result
    }

    /// `array[index]`; constant keys on JSON fields fold into the property
    /// chain, so `properties['a']` means `properties.a`.
    pub(super) fn visit_array_access(
        &mut self,
        array: Expr,
        property: Expr,
        nullish: bool,
        span: Option<Span>
    ) -> HogQLResult<Expr> {
        if matches!(property.kind, ExprKind::Constant(ConstantValue::Integer(0))) {
            return Err(query_error("SQL indexes start from one, not from zero. E.g: array[1]"));
        }
        let array = self.visit(array)?;

        let key = match &property.kind {
            ExprKind::Constant(ConstantValue::String(s)) => Some(ChainItem::Name(s.clone())),
            ExprKind::Constant(ConstantValue::Integer(i)) => Some(ChainItem::Index(*i)),
            _ => None
        };
        if let (Some(key), ExprKind::Field {
            chain
        }) = (key, &array.kind)
        {
            let folded = match array.ty.as_ref().map(Type::unwrap_alias) {
                Some(Type::Field(field)) if field.is_json() => Some(Type::Property(PropertyType {
                    chain:                      Chain::from_iter([key.clone()]),
                    field_type:                 field.clone(),
                    joined_subquery:            None,
                    joined_subquery_field_name: None
                })),
                Some(Type::Property(property)) => {
                    let mut property = property.clone();
                    property.chain.push(key.clone());
                    Some(Type::Property(property))
                }
                _ => None
            };
            if let Some(ty) = folded {
                let mut chain = chain.clone();
                chain.push(key);
                return Ok(typed(
                    ExprKind::Field {
                        chain
                    },
                    ty,
                    span
                ));
            }
        }

        let property = self.visit(property)?;
        let item = match expr_constant_type(&array).data_type {
            ConstantDataType::Array(item) => (*item).with_nullable(true),
            _ => ConstantType::unknown()
        };
        Ok(typed(
            ExprKind::ArrayAccess {
                array: Box::new(array),
                property: Box::new(property),
                nullish
            },
            Type::Constant(item),
            span
        ))
    }
}
