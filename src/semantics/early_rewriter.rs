use std::collections::HashSet;

use crate::semantics::analyzer::{SelectContext, Session};
use crate::semantics::scope::ScopeId;
use crate::semantics::table_info::TableInfo;
use crate::sql::ast::*;
use crate::utils::error::{GateResult, SemanticError};

/// Reject constructs the engine cannot plan, before any binding happens
pub(super) fn check_for_invalid_construct(select: &Select, ctx: SelectContext) -> Result<(), SemanticError> {
    if select.into.is_some() {
        return Err(SemanticError::Unsupported("INTO".to_string()));
    }
    if select.calc_found_rows {
        if ctx.in_union {
            return Err(SemanticError::Unsupported(
                "SQL_CALC_FOUND_ROWS not supported with union".to_string(),
            ));
        }
        if !ctx.top_level {
            return Err(SemanticError::Unsupported(
                "Incorrect usage/placement of 'SQL_CALC_FOUND_ROWS'".to_string(),
            ));
        }
    }
    if select.from.iter().any(has_natural_join) {
        return Err(SemanticError::Unsupported("natural join".to_string()));
    }
    Ok(())
}

fn has_natural_join(table_expr: &TableExpr) -> bool {
    match table_expr {
        TableExpr::Aliased(_) => false,
        TableExpr::Paren(exprs) => exprs.iter().any(has_natural_join),
        TableExpr::Join(join) => join.kind.is_natural() || has_natural_join(&join.left) || has_natural_join(&join.right),
    }
}

/// STRAIGHT_JOIN only fixes the join order MySQL picks; the rows are those of a plain JOIN
pub(super) fn rewrite_straight_join(select: &mut Select) {
    fn rewrite(table_expr: &mut TableExpr) {
        match table_expr {
            TableExpr::Aliased(_) => {}
            TableExpr::Paren(exprs) => exprs.iter_mut().for_each(rewrite),
            TableExpr::Join(join) => {
                if join.kind == JoinKind::StraightJoin {
                    join.kind = JoinKind::Inner;
                }
                rewrite(&mut join.left);
                rewrite(&mut join.right);
            }
        }
    }
    select.from.iter_mut().for_each(rewrite);
}

/// Replace `ORDER BY n` and `GROUP BY n` with a fresh copy of the n-th projected expression
pub(super) fn rewrite_positional(select: &mut Select) -> GateResult<()> {
    for order in &mut select.order_by {
        if let Some(expr) = positional_target(&order.expr, &select.projection, "order clause")? {
            order.expr = expr;
        }
    }
    for group in &mut select.group_by {
        if let Some(expr) = positional_target(group, &select.projection, "group statement")? {
            *group = expr;
        }
    }
    Ok(())
}

fn positional_target(expr: &Expr, projection: &[SelectExpr], clause: &str) -> GateResult<Option<Expr>> {
    let ExprKind::Literal(Literal::Integer(position)) = expr.kind else {
        return Ok(None);
    };
    let invalid = || SemanticError::InvalidPosition {
        clause: clause.to_string(),
        position: position.to_string(),
    };
    let index = usize::try_from(position)
        .ok()
        .and_then(|p| p.checked_sub(1))
        .ok_or_else(invalid)?;
    match projection.get(index) {
        Some(SelectExpr::Aliased(aliased)) => Ok(Some(aliased.expr.fresh_clone())),
        Some(SelectExpr::Star(_)) => Err(SemanticError::Unsupported(format!(
            "cannot use column offsets in {} when using `*`",
            clause
        ))
        .into()),
        None => Err(invalid().into()),
    }
}

/// Positional ORDER BY on a UNION refers to the output columns of its first SELECT
pub(super) fn rewrite_union_order_by(union: &mut Union, column_names: &[String]) -> GateResult<()> {
    for order in &mut union.order_by {
        let ExprKind::Literal(Literal::Integer(position)) = order.expr.kind else {
            continue;
        };
        let name = usize::try_from(position)
            .ok()
            .and_then(|p| p.checked_sub(1))
            .and_then(|index| column_names.get(index))
            .ok_or_else(|| SemanticError::InvalidPosition {
                clause: "order clause".to_string(),
                position: position.to_string(),
            })?;
        order.expr = Expr::column(name);
    }
    Ok(())
}

impl Session<'_> {
    /// Expand `*` and `t.*` into the columns of tables whose column list is authoritative.
    ///
    /// A star over any table without a full column list is left as written.
    pub(super) fn expand_stars(&self, select: &mut Select, scope: ScopeId) {
        if !select.projection.iter().any(|e| matches!(e, SelectExpr::Star(_))) {
            return;
        }
        let scope = self.scoper.scope(scope);
        let tables: Vec<&TableInfo> = scope.tables.iter().filter(|t| !t.is_vtable()).collect();
        let qualify = tables.len() > 1;

        let mut expanded = Vec::with_capacity(select.projection.len());
        for item in select.projection.drain(..) {
            let SelectExpr::Star(star) = &item else {
                expanded.push(item);
                continue;
            };
            let targets: Vec<&TableInfo> = match &star.table {
                Some(name) => tables.iter().copied().filter(|t| t.matches(name)).collect(),
                None => tables.clone(),
            };
            if targets.is_empty() || targets.iter().any(|t| !t.authoritative()) {
                expanded.push(item);
                continue;
            }

            // a USING column is listed once, from the leftmost table
            let mut emitted_using = HashSet::new();
            for table in targets {
                let Some(name) = table.visible_name() else {
                    continue;
                };
                for column in table.columns(&self.sem) {
                    let lower = column.name.to_ascii_lowercase();
                    if star.table.is_none() && scope.using.contains_key(&lower) && !emitted_using.insert(lower) {
                        continue;
                    }
                    let expr = if qualify || star.table.is_some() {
                        Expr::new(ExprKind::Column(ColName {
                            name: column.name.clone(),
                            qualifier: Some(name.clone()),
                        }))
                    } else {
                        Expr::column(&column.name)
                    };
                    expanded.push(SelectExpr::expr(expr));
                }
            }
        }
        select.projection = expanded;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn select_with(projection: Vec<SelectExpr>) -> Select {
        Select::new(projection, vec![TableExpr::table("t", None)])
    }

    #[test]
    fn test_positional_order_by_is_fresh_clone() {
        let mut select = select_with(vec![SelectExpr::expr(Expr::column("a")), SelectExpr::expr(Expr::column("b"))]);
        select.order_by.push(OrderByExpr {
            expr: Expr::int(2),
            desc: true,
        });
        select.group_by.push(Expr::int(1));
        rewrite_positional(&mut select).unwrap();

        assert_eq!(select.order_by[0].expr.as_column().unwrap().name, "b");
        assert_eq!(select.group_by[0].as_column().unwrap().name, "a");
        let SelectExpr::Aliased(projected) = &select.projection[1] else {
            panic!("Expected aliased projection");
        };
        assert_ne!(projected.expr.id, select.order_by[0].expr.id);
    }

    #[test]
    fn test_positional_out_of_range() {
        let mut select = select_with(vec![SelectExpr::expr(Expr::column("a"))]);
        select.order_by.push(OrderByExpr {
            expr: Expr::int(3),
            desc: false,
        });
        match rewrite_positional(&mut select) {
            Err(crate::utils::error::GateError::Semantic(SemanticError::InvalidPosition { position, .. })) => {
                assert_eq!(position, "3")
            }
            other => panic!("Expected invalid position, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_constructs() {
        let mut select = select_with(vec![SelectExpr::star()]);
        select.into = Some("@x".to_string());
        assert!(check_for_invalid_construct(&select, SelectContext::TOP).is_err());

        let mut select = select_with(vec![SelectExpr::star()]);
        select.calc_found_rows = true;
        assert!(check_for_invalid_construct(&select, SelectContext::TOP).is_ok());
        assert!(check_for_invalid_construct(&select, SelectContext::NESTED).is_err());

        let natural = Select::new(
            vec![SelectExpr::star()],
            vec![TableExpr::join(
                TableExpr::table("a", None),
                JoinKind::NaturalLeft,
                TableExpr::table("b", None),
                JoinCondition::default(),
            )],
        );
        assert!(check_for_invalid_construct(&natural, SelectContext::TOP).is_err());
    }

    #[test]
    fn test_straight_join_becomes_join() {
        let mut select = Select::new(
            vec![SelectExpr::star()],
            vec![TableExpr::join(
                TableExpr::table("a", None),
                JoinKind::StraightJoin,
                TableExpr::table("b", None),
                JoinCondition::default(),
            )],
        );
        rewrite_straight_join(&mut select);
        let TableExpr::Join(join) = &select.from[0] else {
            panic!("Expected join");
        };
        assert_eq!(join.kind, JoinKind::Inner);
    }
}
