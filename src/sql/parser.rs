use regex::Regex;
use sqlparser::ast as sp;
use sqlparser::dialect::{GenericDialect, MySqlDialect};
use sqlparser::parser::Parser;

use crate::sql::ast::*;
use crate::utils::error::{GateResult, QueryParsingError};

/// Parses SQL text into the engine's statement tree
pub struct StatementParser {
    mysql_dialect: MySqlDialect,
    generic_dialect: GenericDialect,
    select_hint_regex: Regex,
    infix_straight_join_regex: Regex,
}

#[derive(Default)]
struct SelectHints {
    straight_join: bool,
    calc_found_rows: bool,
}

fn unsupported(feature: impl Into<String>) -> crate::utils::error::GateError {
    QueryParsingError::UnsupportedFeature(feature.into()).into()
}

impl StatementParser {
    /// Create a new parser instance
    pub fn new() -> GateResult<Self> {
        let select_hint_regex = Regex::new(r"(?i)^\s*select\s+((?:(?:straight_join|sql_calc_found_rows)\s+)+)")
            .map_err(|e| QueryParsingError::InvalidSyntax(format!("Failed to compile hint regex: {}", e)))?;
        let infix_straight_join_regex = Regex::new(r"(?i)\bstraight_join\b")
            .map_err(|e| QueryParsingError::InvalidSyntax(format!("Failed to compile join regex: {}", e)))?;

        Ok(Self {
            mysql_dialect: MySqlDialect {},
            generic_dialect: GenericDialect {},
            select_hint_regex,
            infix_straight_join_regex,
        })
    }

    /// Parse one statement
    pub fn parse(&self, sql: &str) -> GateResult<Statement> {
        let (sql, hints) = self.strip_hints(sql);
        let statement = self.try_parse_with_dialects(&sql)?;

        match statement {
            sp::Statement::Query(query) => {
                let mut select = self.lower_query(*query)?;
                if let SelectStatement::Select(sel) = &mut select {
                    sel.straight_join_hint = hints.straight_join;
                    sel.calc_found_rows = hints.calc_found_rows;
                } else if hints.calc_found_rows {
                    if let SelectStatement::Union(union) = &mut select {
                        mark_calc_found_rows(&mut union.left);
                    }
                }
                Ok(Statement::Select(select))
            }
            sp::Statement::Insert {
                ignore,
                table_name,
                columns,
                source,
                ..
            } => self.lower_insert(ignore, table_name, columns, *source),
            sp::Statement::Update {
                table,
                assignments,
                from,
                selection,
                ..
            } => {
                let mut table_exprs = vec![self.lower_table_with_joins(table)?];
                if let Some(from) = from {
                    table_exprs.push(self.lower_table_with_joins(from)?);
                }
                let assignments = assignments
                    .into_iter()
                    .map(|a| {
                        Ok(Assignment {
                            column: col_name_from_idents(a.id)?,
                            expr: self.lower_expr(a.value)?,
                        })
                    })
                    .collect::<GateResult<Vec<_>>>()?;
                Ok(Statement::Update(Update {
                    table_exprs,
                    assignments,
                    where_clause: selection.map(|e| self.lower_expr(e)).transpose()?,
                    order_by: Vec::new(),
                    limit: None,
                }))
            }
            sp::Statement::Delete {
                tables,
                from,
                selection,
                order_by,
                limit,
                ..
            } => Ok(Statement::Delete(Delete {
                targets: tables.into_iter().map(table_name_from_object).collect::<GateResult<_>>()?,
                table_exprs: from
                    .into_iter()
                    .map(|t| self.lower_table_with_joins(t))
                    .collect::<GateResult<_>>()?,
                where_clause: selection.map(|e| self.lower_expr(e)).transpose()?,
                order_by: self.lower_order_by(order_by)?,
                limit: limit
                    .map(|count| {
                        Ok::<_, crate::utils::error::GateError>(Limit {
                            offset: None,
                            count: self.lower_expr(count)?,
                        })
                    })
                    .transpose()?,
            })),
            other => Err(unsupported(format!("statement type: {}", statement_kind(&other)))),
        }
    }

    /// Parse a SELECT or UNION, rejecting any other statement
    pub fn parse_select(&self, sql: &str) -> GateResult<SelectStatement> {
        match self.parse(sql)? {
            Statement::Select(select) => Ok(select),
            _ => Err(unsupported("expected a SELECT statement")),
        }
    }

    /// Validate SQL syntax without lowering
    pub fn validate_syntax(&self, sql: &str) -> bool {
        let (sql, _) = self.strip_hints(sql);
        self.try_parse_with_dialects(&sql).is_ok()
    }

    /// MySQL select hints are not understood by the underlying parser; record and strip them
    fn strip_hints(&self, sql: &str) -> (String, SelectHints) {
        let mut hints = SelectHints::default();
        let mut sql = sql.to_string();

        if let Some(caps) = self.select_hint_regex.captures(&sql) {
            let words = caps.get(1).map(|m| m.as_str().to_ascii_lowercase()).unwrap_or_default();
            hints.straight_join = words.contains("straight_join");
            hints.calc_found_rows = words.contains("sql_calc_found_rows");
            if let Some(m) = caps.get(1) {
                sql.replace_range(m.range(), "");
            }
        }

        let sql = self.infix_straight_join_regex.replace_all(&sql, "JOIN").into_owned();
        (sql, hints)
    }

    /// Try parsing with the MySQL dialect first, then the generic one
    fn try_parse_with_dialects(&self, sql: &str) -> GateResult<sp::Statement> {
        let mut last_error = String::new();

        for result in [
            Parser::parse_sql(&self.mysql_dialect, sql),
            Parser::parse_sql(&self.generic_dialect, sql),
        ] {
            match result {
                Ok(statements) => {
                    if statements.len() > 1 {
                        return Err(unsupported("multiple statements"));
                    }
                    if let Some(statement) = statements.into_iter().next() {
                        return Ok(statement);
                    }
                    last_error = "empty statement".to_string();
                }
                Err(e) => last_error = e.to_string(),
            }
        }

        Err(QueryParsingError::InvalidSyntax(last_error).into())
    }

    fn lower_query(&self, query: sp::Query) -> GateResult<SelectStatement> {
        if query.with.is_some() {
            return Err(unsupported("WITH clause"));
        }
        let order_by = self.lower_order_by(query.order_by)?;
        let limit = match query.limit {
            Some(count) => Some(Limit {
                offset: query.offset.map(|o| self.lower_expr(o.value)).transpose()?,
                count: self.lower_expr(count)?,
            }),
            None if query.offset.is_some() => return Err(unsupported("OFFSET without LIMIT")),
            None => None,
        };

        let mut select = self.lower_set_expr(*query.body)?;
        if !order_by.is_empty() || limit.is_some() {
            match &mut select {
                SelectStatement::Select(sel) => {
                    sel.order_by = order_by;
                    sel.limit = limit;
                }
                SelectStatement::Union(union) => {
                    union.order_by = order_by;
                    union.limit = limit;
                }
            }
        }
        Ok(select)
    }

    fn lower_set_expr(&self, body: sp::SetExpr) -> GateResult<SelectStatement> {
        match body {
            sp::SetExpr::Select(select) => Ok(SelectStatement::Select(Box::new(self.lower_select(*select)?))),
            sp::SetExpr::Query(query) => self.lower_query(*query),
            sp::SetExpr::SetOperation {
                op: sp::SetOperator::Union,
                set_quantifier,
                left,
                right,
            } => Ok(SelectStatement::Union(Box::new(Union {
                id: NodeId::fresh(),
                left: self.lower_set_expr(*left)?,
                right: self.lower_set_expr(*right)?,
                distinct: !matches!(set_quantifier, sp::SetQuantifier::All),
                order_by: Vec::new(),
                limit: None,
            }))),
            sp::SetExpr::SetOperation { op, .. } => Err(unsupported(format!("set operation {}", op))),
            _ => Err(unsupported("query body")),
        }
    }

    fn lower_select(&self, select: sp::Select) -> GateResult<Select> {
        let distinct = match select.distinct {
            None => false,
            Some(sp::Distinct::Distinct) => true,
            Some(sp::Distinct::On(_)) => return Err(unsupported("DISTINCT ON")),
        };

        let projection = select
            .projection
            .into_iter()
            .map(|item| self.lower_select_item(item))
            .collect::<GateResult<Vec<_>>>()?;
        let from = select
            .from
            .into_iter()
            .map(|t| self.lower_table_with_joins(t))
            .collect::<GateResult<Vec<_>>>()?;
        let group_by = match select.group_by {
            sp::GroupByExpr::Expressions(exprs) => exprs
                .into_iter()
                .map(|e| self.lower_expr(e))
                .collect::<GateResult<Vec<_>>>()?,
            sp::GroupByExpr::All => return Err(unsupported("GROUP BY ALL")),
        };

        let mut lowered = Select::new(projection, from);
        lowered.distinct = distinct;
        lowered.where_clause = select.selection.map(|e| self.lower_expr(e)).transpose()?;
        lowered.group_by = group_by;
        lowered.having = select.having.map(|e| self.lower_expr(e)).transpose()?;
        lowered.into = select.into.map(|into| into.name.to_string());
        Ok(lowered)
    }

    fn lower_select_item(&self, item: sp::SelectItem) -> GateResult<SelectExpr> {
        match item {
            sp::SelectItem::UnnamedExpr(expr) => Ok(SelectExpr::expr(self.lower_expr(expr)?)),
            sp::SelectItem::ExprWithAlias { expr, alias } => Ok(SelectExpr::aliased(self.lower_expr(expr)?, &alias.value)),
            sp::SelectItem::Wildcard(_) => Ok(SelectExpr::star()),
            sp::SelectItem::QualifiedWildcard(name, _) => Ok(SelectExpr::Star(StarExpr {
                table: Some(table_name_from_object(name)?),
            })),
        }
    }

    fn lower_table_with_joins(&self, table: sp::TableWithJoins) -> GateResult<TableExpr> {
        let mut current = self.lower_table_factor(table.relation)?;

        for join in table.joins {
            let right = self.lower_table_factor(join.relation)?;
            let (kind, constraint) = match join.join_operator {
                sp::JoinOperator::Inner(c) => (JoinKind::Inner, c),
                sp::JoinOperator::LeftOuter(c) => (JoinKind::Left, c),
                sp::JoinOperator::RightOuter(c) => (JoinKind::Right, c),
                sp::JoinOperator::CrossJoin => (JoinKind::Inner, sp::JoinConstraint::None),
                other => return Err(unsupported(format!("join operator {:?}", other))),
            };
            let (kind, condition) = match constraint {
                sp::JoinConstraint::On(expr) => (
                    kind,
                    JoinCondition {
                        on: Some(self.lower_expr(expr)?),
                        using: Vec::new(),
                    },
                ),
                sp::JoinConstraint::Using(idents) => (
                    kind,
                    JoinCondition {
                        on: None,
                        using: idents.into_iter().map(|i| i.value).collect(),
                    },
                ),
                sp::JoinConstraint::Natural => (
                    match kind {
                        JoinKind::Left => JoinKind::NaturalLeft,
                        JoinKind::Right => JoinKind::NaturalRight,
                        _ => JoinKind::NaturalInner,
                    },
                    JoinCondition::default(),
                ),
                sp::JoinConstraint::None => (kind, JoinCondition::default()),
            };
            current = TableExpr::join(current, kind, right, condition);
        }

        Ok(current)
    }

    fn lower_table_factor(&self, factor: sp::TableFactor) -> GateResult<TableExpr> {
        match factor {
            sp::TableFactor::Table { name, alias, .. } => Ok(TableExpr::Aliased(AliasedTableExpr {
                id: NodeId::fresh(),
                expr: SimpleTableExpr::Table(table_name_from_object(name)?),
                alias: alias.map(|a| a.name.value),
            })),
            sp::TableFactor::Derived { subquery, alias, .. } => {
                let alias = alias.ok_or_else(|| unsupported("derived table without alias"))?;
                Ok(TableExpr::derived(self.lower_query(*subquery)?, &alias.name.value))
            }
            sp::TableFactor::NestedJoin { table_with_joins, .. } => {
                Ok(TableExpr::Paren(vec![self.lower_table_with_joins(*table_with_joins)?]))
            }
            _ => Err(unsupported("table factor")),
        }
    }

    fn lower_order_by(&self, order_by: Vec<sp::OrderByExpr>) -> GateResult<Vec<OrderByExpr>> {
        order_by
            .into_iter()
            .map(|o| {
                Ok(OrderByExpr {
                    expr: self.lower_expr(o.expr)?,
                    desc: o.asc == Some(false),
                })
            })
            .collect()
    }

    fn lower_insert(
        &self,
        ignore: bool,
        table_name: sp::ObjectName,
        columns: Vec<sp::Ident>,
        source: sp::Query,
    ) -> GateResult<Statement> {
        let rows = match *source.body {
            sp::SetExpr::Values(values) => InsertRows::Values(
                values
                    .rows
                    .into_iter()
                    .map(|row| row.into_iter().map(|e| self.lower_expr(e)).collect::<GateResult<Vec<_>>>())
                    .collect::<GateResult<Vec<_>>>()?,
            ),
            body => {
                let query = sp::Query {
                    body: Box::new(body),
                    ..source
                };
                InsertRows::Select(Box::new(self.lower_query(query)?))
            }
        };

        Ok(Statement::Insert(Insert {
            table: table_name_from_object(table_name)?,
            columns: columns.into_iter().map(|c| c.value).collect(),
            rows,
            ignore,
        }))
    }

    fn lower_expr(&self, expr: sp::Expr) -> GateResult<Expr> {
        let kind = match expr {
            sp::Expr::Identifier(ident) => ExprKind::Column(ColName {
                name: ident.value,
                qualifier: None,
            }),
            sp::Expr::CompoundIdentifier(idents) => ExprKind::Column(col_name_from_idents(idents)?),
            sp::Expr::Value(value) => lower_value(value)?,
            sp::Expr::Nested(inner) => return self.lower_expr(*inner),
            sp::Expr::BinaryOp { left, op, right } => ExprKind::Binary {
                op: lower_binary_op(&op)?,
                left: Box::new(self.lower_expr(*left)?),
                right: Box::new(self.lower_expr(*right)?),
            },
            sp::Expr::UnaryOp { op, expr } => match op {
                sp::UnaryOperator::Not => ExprKind::Unary {
                    op: UnaryOp::Not,
                    expr: Box::new(self.lower_expr(*expr)?),
                },
                sp::UnaryOperator::Minus => match *expr {
                    sp::Expr::Value(sp::Value::Number(n, _)) => lower_number(&format!("-{}", n)),
                    other => ExprKind::Unary {
                        op: UnaryOp::Minus,
                        expr: Box::new(self.lower_expr(other)?),
                    },
                },
                sp::UnaryOperator::Plus => return self.lower_expr(*expr),
                other => return Err(unsupported(format!("unary operator {}", other))),
            },
            sp::Expr::IsNull(expr) => ExprKind::IsNull {
                expr: Box::new(self.lower_expr(*expr)?),
                negated: false,
            },
            sp::Expr::IsNotNull(expr) => ExprKind::IsNull {
                expr: Box::new(self.lower_expr(*expr)?),
                negated: true,
            },
            sp::Expr::InList { expr, list, negated } => ExprKind::InList {
                expr: Box::new(self.lower_expr(*expr)?),
                list: list.into_iter().map(|e| self.lower_expr(e)).collect::<GateResult<_>>()?,
                negated,
            },
            sp::Expr::InSubquery {
                expr,
                subquery,
                negated,
            } => ExprKind::InSubquery {
                expr: Box::new(self.lower_expr(*expr)?),
                subquery: Box::new(self.lower_query(*subquery)?),
                negated,
            },
            sp::Expr::Between {
                expr,
                negated,
                low,
                high,
            } => ExprKind::Between {
                expr: Box::new(self.lower_expr(*expr)?),
                low: Box::new(self.lower_expr(*low)?),
                high: Box::new(self.lower_expr(*high)?),
                negated,
            },
            sp::Expr::Like {
                negated,
                expr,
                pattern,
                ..
            } => ExprKind::Like {
                expr: Box::new(self.lower_expr(*expr)?),
                pattern: Box::new(self.lower_expr(*pattern)?),
                negated,
            },
            sp::Expr::Tuple(exprs) => ExprKind::Tuple(exprs.into_iter().map(|e| self.lower_expr(e)).collect::<GateResult<_>>()?),
            sp::Expr::Function(func) => self.lower_function(func)?,
            sp::Expr::Subquery(query) => ExprKind::Subquery(Box::new(self.lower_query(*query)?)),
            sp::Expr::Exists { subquery, negated } => ExprKind::Exists {
                subquery: Box::new(self.lower_query(*subquery)?),
                negated,
            },
            other => return Err(unsupported(format!("expression {}", other))),
        };
        Ok(Expr::new(kind))
    }

    fn lower_function(&self, func: sp::Function) -> GateResult<ExprKind> {
        if func.over.is_some() {
            return Err(unsupported("window functions"));
        }
        let name = func.name.to_string();

        if func.args.len() == 1 && name.eq_ignore_ascii_case("count") && !func.distinct {
            if let sp::FunctionArg::Unnamed(sp::FunctionArgExpr::Wildcard) = &func.args[0] {
                return Ok(ExprKind::CountStar);
            }
        }

        let args = func
            .args
            .into_iter()
            .map(|arg| match arg {
                sp::FunctionArg::Unnamed(sp::FunctionArgExpr::Expr(expr)) => self.lower_expr(expr),
                _ => Err(unsupported(format!("argument form in {}", name))),
            })
            .collect::<GateResult<Vec<_>>>()?;

        Ok(ExprKind::Function(FuncExpr {
            name,
            distinct: func.distinct,
            args,
        }))
    }
}

fn mark_calc_found_rows(select: &mut SelectStatement) {
    match select {
        SelectStatement::Select(sel) => sel.calc_found_rows = true,
        SelectStatement::Union(union) => mark_calc_found_rows(&mut union.left),
    }
}

fn statement_kind(statement: &sp::Statement) -> String {
    statement
        .to_string()
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_ascii_uppercase()
}

fn table_name_from_object(name: sp::ObjectName) -> GateResult<TableName> {
    let mut parts: Vec<String> = name.0.into_iter().map(|i| i.value).collect();
    match parts.len() {
        1 => Ok(TableName {
            qualifier: None,
            name: parts.remove(0),
        }),
        2 => {
            let name = parts.remove(1);
            Ok(TableName {
                qualifier: Some(parts.remove(0)),
                name,
            })
        }
        _ => Err(unsupported(format!("table name {}", parts.join(".")))),
    }
}

fn col_name_from_idents(idents: Vec<sp::Ident>) -> GateResult<ColName> {
    let mut parts: Vec<String> = idents.into_iter().map(|i| i.value).collect();
    let name = parts
        .pop()
        .ok_or_else(|| QueryParsingError::InvalidSyntax("empty column name".to_string()))?;
    let qualifier = match parts.len() {
        0 => None,
        1 => Some(TableName::new(&parts[0])),
        2 => Some(TableName::qualified(&parts[0], &parts[1])),
        _ => return Err(unsupported(format!("column name {}.{}", parts.join("."), name))),
    };
    Ok(ColName { name, qualifier })
}

fn lower_number(n: &str) -> ExprKind {
    match n.parse::<i64>() {
        Ok(i) => ExprKind::Literal(Literal::Integer(i)),
        Err(_) => ExprKind::Literal(Literal::Decimal(n.to_string())),
    }
}

fn lower_value(value: sp::Value) -> GateResult<ExprKind> {
    match value {
        sp::Value::Number(n, _) => Ok(lower_number(&n)),
        sp::Value::SingleQuotedString(s) | sp::Value::DoubleQuotedString(s) => {
            Ok(ExprKind::Literal(Literal::String(s)))
        }
        sp::Value::Boolean(b) => Ok(ExprKind::Literal(Literal::Boolean(b))),
        sp::Value::Null => Ok(ExprKind::Literal(Literal::Null)),
        sp::Value::Placeholder(p) => match p.strip_prefix(':') {
            Some(name) if !name.is_empty() => Ok(ExprKind::Argument(name.to_string())),
            _ => Err(unsupported(format!("placeholder {}", p))),
        },
        other => Err(unsupported(format!("literal {}", other))),
    }
}

fn lower_binary_op(op: &sp::BinaryOperator) -> GateResult<BinaryOp> {
    match op {
        sp::BinaryOperator::Or => Ok(BinaryOp::Or),
        sp::BinaryOperator::And => Ok(BinaryOp::And),
        sp::BinaryOperator::Eq => Ok(BinaryOp::Eq),
        sp::BinaryOperator::Spaceship => Ok(BinaryOp::NullSafeEq),
        sp::BinaryOperator::NotEq => Ok(BinaryOp::NotEq),
        sp::BinaryOperator::Lt => Ok(BinaryOp::Lt),
        sp::BinaryOperator::LtEq => Ok(BinaryOp::LtEq),
        sp::BinaryOperator::Gt => Ok(BinaryOp::Gt),
        sp::BinaryOperator::GtEq => Ok(BinaryOp::GtEq),
        sp::BinaryOperator::Plus => Ok(BinaryOp::Plus),
        sp::BinaryOperator::Minus => Ok(BinaryOp::Minus),
        sp::BinaryOperator::Multiply => Ok(BinaryOp::Multiply),
        sp::BinaryOperator::Divide => Ok(BinaryOp::Divide),
        sp::BinaryOperator::Modulo => Ok(BinaryOp::Modulo),
        other => Err(unsupported(format!("operator {}", other))),
    }
}
