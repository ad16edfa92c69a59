//! Statement tree consumed by the semantic analyzer and the planner.
//!
//! Every expression, table expression and SELECT block carries a [`NodeId`] so that
//! analysis results can be keyed by node without relying on addresses. Cloning with
//! `Clone` keeps ids (an alias of the same node); [`Expr::fresh_clone`] produces a
//! structurally equal tree with new ids.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::utils::types::Value;

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of an AST node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    pub fn fresh() -> Self {
        NodeId(NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Select(SelectStatement),
    Insert(Insert),
    Update(Update),
    Delete(Delete),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SelectStatement {
    Select(Box<Select>),
    Union(Box<Union>),
}

impl SelectStatement {
    pub fn id(&self) -> NodeId {
        match self {
            SelectStatement::Select(sel) => sel.id,
            SelectStatement::Union(union) => union.id,
        }
    }

    /// Leftmost SELECT block; it names the columns of a UNION
    pub fn first_select(&self) -> &Select {
        match self {
            SelectStatement::Select(sel) => sel,
            SelectStatement::Union(union) => union.left.first_select(),
        }
    }

    pub fn fresh_clone(&self) -> SelectStatement {
        match self {
            SelectStatement::Select(sel) => SelectStatement::Select(Box::new(sel.fresh_clone())),
            SelectStatement::Union(union) => SelectStatement::Union(Box::new(Union {
                id: NodeId::fresh(),
                left: union.left.fresh_clone(),
                right: union.right.fresh_clone(),
                distinct: union.distinct,
                order_by: union.order_by.iter().map(OrderByExpr::fresh_clone).collect(),
                limit: union.limit.as_ref().map(Limit::fresh_clone),
            })),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    pub id: NodeId,
    pub distinct: bool,
    pub straight_join_hint: bool,
    pub calc_found_rows: bool,
    pub projection: Vec<SelectExpr>,
    pub from: Vec<TableExpr>,
    pub where_clause: Option<Expr>,
    pub group_by: Vec<Expr>,
    pub having: Option<Expr>,
    pub order_by: Vec<OrderByExpr>,
    pub limit: Option<Limit>,
    pub into: Option<String>,
}

impl Select {
    pub fn new(projection: Vec<SelectExpr>, from: Vec<TableExpr>) -> Self {
        Self {
            id: NodeId::fresh(),
            distinct: false,
            straight_join_hint: false,
            calc_found_rows: false,
            projection,
            from,
            where_clause: None,
            group_by: Vec::new(),
            having: None,
            order_by: Vec::new(),
            limit: None,
            into: None,
        }
    }

    /// AND a predicate into the WHERE clause
    pub fn add_where(&mut self, predicate: Expr) {
        self.where_clause = Some(match self.where_clause.take() {
            Some(existing) => Expr::binary(BinaryOp::And, existing, predicate),
            None => predicate,
        });
    }

    pub fn fresh_clone(&self) -> Select {
        Select {
            id: NodeId::fresh(),
            distinct: self.distinct,
            straight_join_hint: self.straight_join_hint,
            calc_found_rows: self.calc_found_rows,
            projection: self.projection.iter().map(SelectExpr::fresh_clone).collect(),
            from: self.from.iter().map(TableExpr::fresh_clone).collect(),
            where_clause: self.where_clause.as_ref().map(Expr::fresh_clone),
            group_by: self.group_by.iter().map(Expr::fresh_clone).collect(),
            having: self.having.as_ref().map(Expr::fresh_clone),
            order_by: self.order_by.iter().map(OrderByExpr::fresh_clone).collect(),
            limit: self.limit.as_ref().map(Limit::fresh_clone),
            into: self.into.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Union {
    pub id: NodeId,
    pub left: SelectStatement,
    pub right: SelectStatement,
    pub distinct: bool,
    pub order_by: Vec<OrderByExpr>,
    pub limit: Option<Limit>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderByExpr {
    pub expr: Expr,
    pub desc: bool,
}

impl OrderByExpr {
    fn fresh_clone(&self) -> OrderByExpr {
        OrderByExpr {
            expr: self.expr.fresh_clone(),
            desc: self.desc,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Limit {
    pub offset: Option<Expr>,
    pub count: Expr,
}

impl Limit {
    fn fresh_clone(&self) -> Limit {
        Limit {
            offset: self.offset.as_ref().map(Expr::fresh_clone),
            count: self.count.fresh_clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SelectExpr {
    Star(StarExpr),
    Aliased(AliasedExpr),
}

impl SelectExpr {
    pub fn expr(expr: Expr) -> Self {
        SelectExpr::Aliased(AliasedExpr { expr, alias: None })
    }

    pub fn aliased(expr: Expr, alias: &str) -> Self {
        SelectExpr::Aliased(AliasedExpr {
            expr,
            alias: Some(alias.to_string()),
        })
    }

    pub fn star() -> Self {
        SelectExpr::Star(StarExpr { table: None })
    }

    fn fresh_clone(&self) -> SelectExpr {
        match self {
            SelectExpr::Star(star) => SelectExpr::Star(star.clone()),
            SelectExpr::Aliased(aliased) => SelectExpr::Aliased(AliasedExpr {
                expr: aliased.expr.fresh_clone(),
                alias: aliased.alias.clone(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StarExpr {
    pub table: Option<TableName>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AliasedExpr {
    pub expr: Expr,
    pub alias: Option<String>,
}

impl AliasedExpr {
    /// Name under which this expression is visible in the projection
    pub fn column_name(&self) -> String {
        if let Some(alias) = &self.alias {
            return alias.clone();
        }
        match &self.expr.kind {
            ExprKind::Column(col) => col.name.clone(),
            _ => self.expr.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TableExpr {
    Aliased(AliasedTableExpr),
    Join(Box<JoinTableExpr>),
    Paren(Vec<TableExpr>),
}

impl TableExpr {
    pub fn table(name: &str, alias: Option<&str>) -> Self {
        TableExpr::Aliased(AliasedTableExpr {
            id: NodeId::fresh(),
            expr: SimpleTableExpr::Table(TableName::new(name)),
            alias: alias.map(str::to_string),
        })
    }

    pub fn derived(subquery: SelectStatement, alias: &str) -> Self {
        TableExpr::Aliased(AliasedTableExpr {
            id: NodeId::fresh(),
            expr: SimpleTableExpr::Derived(Box::new(subquery)),
            alias: Some(alias.to_string()),
        })
    }

    pub fn join(left: TableExpr, kind: JoinKind, right: TableExpr, condition: JoinCondition) -> Self {
        TableExpr::Join(Box::new(JoinTableExpr {
            left,
            kind,
            right,
            condition,
        }))
    }

    fn fresh_clone(&self) -> TableExpr {
        match self {
            TableExpr::Aliased(aliased) => TableExpr::Aliased(AliasedTableExpr {
                id: NodeId::fresh(),
                expr: match &aliased.expr {
                    SimpleTableExpr::Table(name) => SimpleTableExpr::Table(name.clone()),
                    SimpleTableExpr::Derived(sub) => SimpleTableExpr::Derived(Box::new(sub.fresh_clone())),
                },
                alias: aliased.alias.clone(),
            }),
            TableExpr::Join(join) => TableExpr::Join(Box::new(JoinTableExpr {
                left: join.left.fresh_clone(),
                kind: join.kind,
                right: join.right.fresh_clone(),
                condition: JoinCondition {
                    on: join.condition.on.as_ref().map(Expr::fresh_clone),
                    using: join.condition.using.clone(),
                },
            })),
            TableExpr::Paren(exprs) => TableExpr::Paren(exprs.iter().map(TableExpr::fresh_clone).collect()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AliasedTableExpr {
    pub id: NodeId,
    pub expr: SimpleTableExpr,
    pub alias: Option<String>,
}

impl AliasedTableExpr {
    /// Name this table is referenced by in the query: its alias, or else its table name
    pub fn visible_name(&self) -> Option<TableName> {
        match (&self.alias, &self.expr) {
            (Some(alias), _) => Some(TableName::new(alias)),
            (None, SimpleTableExpr::Table(name)) => Some(name.clone()),
            (None, SimpleTableExpr::Derived(_)) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SimpleTableExpr {
    Table(TableName),
    Derived(Box<SelectStatement>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinTableExpr {
    pub left: TableExpr,
    pub kind: JoinKind,
    pub right: TableExpr,
    pub condition: JoinCondition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    StraightJoin,
    Left,
    Right,
    NaturalInner,
    NaturalLeft,
    NaturalRight,
}

impl JoinKind {
    pub fn is_natural(&self) -> bool {
        matches!(self, JoinKind::NaturalInner | JoinKind::NaturalLeft | JoinKind::NaturalRight)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct JoinCondition {
    pub on: Option<Expr>,
    pub using: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableName {
    pub qualifier: Option<String>,
    pub name: String,
}

impl TableName {
    pub fn new(name: &str) -> Self {
        Self {
            qualifier: None,
            name: name.to_string(),
        }
    }

    pub fn qualified(qualifier: &str, name: &str) -> Self {
        Self {
            qualifier: Some(qualifier.to_string()),
            name: name.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColName {
    pub name: String,
    pub qualifier: Option<TableName>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub id: NodeId,
    pub kind: ExprKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Column(ColName),
    Literal(Literal),
    /// `:name` scalar bind variable
    Argument(String),
    /// `::name` tuple bind variable
    ListArgument(String),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    IsNull {
        expr: Box<Expr>,
        negated: bool,
    },
    InList {
        expr: Box<Expr>,
        list: Vec<Expr>,
        negated: bool,
    },
    InSubquery {
        expr: Box<Expr>,
        subquery: Box<SelectStatement>,
        negated: bool,
    },
    Between {
        expr: Box<Expr>,
        low: Box<Expr>,
        high: Box<Expr>,
        negated: bool,
    },
    Like {
        expr: Box<Expr>,
        pattern: Box<Expr>,
        negated: bool,
    },
    Tuple(Vec<Expr>),
    Function(FuncExpr),
    CountStar,
    Subquery(Box<SelectStatement>),
    Exists {
        subquery: Box<SelectStatement>,
        negated: bool,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Integer(i64),
    Decimal(String),
    String(String),
    Boolean(bool),
    Null,
}

impl Literal {
    pub fn to_value(&self) -> Value {
        match self {
            Literal::Integer(i) => Value::Integer(*i),
            Literal::Decimal(d) => Value::Decimal(d.clone()),
            Literal::String(s) => Value::Text(s.clone()),
            Literal::Boolean(b) => Value::Boolean(*b),
            Literal::Null => Value::Null,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FuncExpr {
    pub name: String,
    pub distinct: bool,
    pub args: Vec<Expr>,
}

impl FuncExpr {
    pub fn is_aggregate(&self) -> bool {
        matches!(
            self.name.to_ascii_lowercase().as_str(),
            "count" | "sum" | "min" | "max" | "avg" | "group_concat"
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    NullSafeEq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Plus,
    Minus,
    Multiply,
    Divide,
    Modulo,
}

impl BinaryOp {
    fn precedence(&self) -> u8 {
        match self {
            BinaryOp::Or => 1,
            BinaryOp::And => 2,
            BinaryOp::Eq
            | BinaryOp::NullSafeEq
            | BinaryOp::NotEq
            | BinaryOp::Lt
            | BinaryOp::LtEq
            | BinaryOp::Gt
            | BinaryOp::GtEq => 4,
            BinaryOp::Plus | BinaryOp::Minus => 5,
            BinaryOp::Multiply | BinaryOp::Divide | BinaryOp::Modulo => 6,
        }
    }

    pub fn is_comparison(&self) -> bool {
        self.precedence() == 4
    }

    fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Or => "or",
            BinaryOp::And => "and",
            BinaryOp::Eq => "=",
            BinaryOp::NullSafeEq => "<=>",
            BinaryOp::NotEq => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
            BinaryOp::Plus => "+",
            BinaryOp::Minus => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Modulo => "%",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Minus,
}

impl Expr {
    pub fn new(kind: ExprKind) -> Self {
        Self {
            id: NodeId::fresh(),
            kind,
        }
    }

    pub fn column(name: &str) -> Self {
        Expr::new(ExprKind::Column(ColName {
            name: name.to_string(),
            qualifier: None,
        }))
    }

    pub fn qualified_column(table: &str, name: &str) -> Self {
        Expr::new(ExprKind::Column(ColName {
            name: name.to_string(),
            qualifier: Some(TableName::new(table)),
        }))
    }

    pub fn int(value: i64) -> Self {
        Expr::new(ExprKind::Literal(Literal::Integer(value)))
    }

    pub fn string(value: &str) -> Self {
        Expr::new(ExprKind::Literal(Literal::String(value.to_string())))
    }

    pub fn argument(name: &str) -> Self {
        Expr::new(ExprKind::Argument(name.to_string()))
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Expr::new(ExprKind::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    pub fn func(name: &str, distinct: bool, args: Vec<Expr>) -> Self {
        Expr::new(ExprKind::Function(FuncExpr {
            name: name.to_string(),
            distinct,
            args,
        }))
    }

    pub fn count_star() -> Self {
        Expr::new(ExprKind::CountStar)
    }

    pub fn subquery(subquery: SelectStatement) -> Self {
        Expr::new(ExprKind::Subquery(Box::new(subquery)))
    }

    pub fn as_column(&self) -> Option<&ColName> {
        match &self.kind {
            ExprKind::Column(col) => Some(col),
            _ => None,
        }
    }

    pub fn is_aggregate(&self) -> bool {
        match &self.kind {
            ExprKind::CountStar => true,
            ExprKind::Function(func) => func.is_aggregate(),
            _ => false,
        }
    }

    /// Direct sub-expressions, not descending into subqueries
    pub fn children(&self) -> Vec<&Expr> {
        match &self.kind {
            ExprKind::Column(_)
            | ExprKind::Literal(_)
            | ExprKind::Argument(_)
            | ExprKind::ListArgument(_)
            | ExprKind::CountStar
            | ExprKind::Subquery(_)
            | ExprKind::Exists { .. } => Vec::new(),
            ExprKind::Binary { left, right, .. } => vec![left.as_ref(), right.as_ref()],
            ExprKind::Unary { expr, .. } | ExprKind::IsNull { expr, .. } | ExprKind::InSubquery { expr, .. } => {
                vec![expr.as_ref()]
            }
            ExprKind::InList { expr, list, .. } => {
                let mut children = vec![expr.as_ref()];
                children.extend(list.iter());
                children
            }
            ExprKind::Between { expr, low, high, .. } => vec![expr.as_ref(), low.as_ref(), high.as_ref()],
            ExprKind::Like { expr, pattern, .. } => vec![expr.as_ref(), pattern.as_ref()],
            ExprKind::Tuple(exprs) => exprs.iter().collect(),
            ExprKind::Function(func) => func.args.iter().collect(),
        }
    }

    pub fn children_mut(&mut self) -> Vec<&mut Expr> {
        match &mut self.kind {
            ExprKind::Column(_)
            | ExprKind::Literal(_)
            | ExprKind::Argument(_)
            | ExprKind::ListArgument(_)
            | ExprKind::CountStar
            | ExprKind::Subquery(_)
            | ExprKind::Exists { .. } => Vec::new(),
            ExprKind::Binary { left, right, .. } => vec![left.as_mut(), right.as_mut()],
            ExprKind::Unary { expr, .. } | ExprKind::IsNull { expr, .. } | ExprKind::InSubquery { expr, .. } => {
                vec![expr.as_mut()]
            }
            ExprKind::InList { expr, list, .. } => {
                let mut children = vec![expr.as_mut()];
                children.extend(list.iter_mut());
                children
            }
            ExprKind::Between { expr, low, high, .. } => vec![expr.as_mut(), low.as_mut(), high.as_mut()],
            ExprKind::Like { expr, pattern, .. } => vec![expr.as_mut(), pattern.as_mut()],
            ExprKind::Tuple(exprs) => exprs.iter_mut().collect(),
            ExprKind::Function(func) => func.args.iter_mut().collect(),
        }
    }

    /// SELECT statement of a subquery expression
    pub fn subquery_statement(&self) -> Option<&SelectStatement> {
        match &self.kind {
            ExprKind::Subquery(sub) | ExprKind::InSubquery { subquery: sub, .. } | ExprKind::Exists { subquery: sub, .. } => {
                Some(sub)
            }
            _ => None,
        }
    }

    /// Pre-order walk over this expression tree, not entering subqueries.
    /// The visitor returns `false` to skip the children of the visited node.
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a Expr) -> bool) {
        if visit(self) {
            for child in self.children() {
                child.walk(visit);
            }
        }
    }

    /// Structurally equal copy whose nodes all get new ids
    pub fn fresh_clone(&self) -> Expr {
        let kind = match &self.kind {
            ExprKind::Column(col) => ExprKind::Column(col.clone()),
            ExprKind::Literal(lit) => ExprKind::Literal(lit.clone()),
            ExprKind::Argument(name) => ExprKind::Argument(name.clone()),
            ExprKind::ListArgument(name) => ExprKind::ListArgument(name.clone()),
            ExprKind::Binary { op, left, right } => ExprKind::Binary {
                op: *op,
                left: Box::new(left.fresh_clone()),
                right: Box::new(right.fresh_clone()),
            },
            ExprKind::Unary { op, expr } => ExprKind::Unary {
                op: *op,
                expr: Box::new(expr.fresh_clone()),
            },
            ExprKind::IsNull { expr, negated } => ExprKind::IsNull {
                expr: Box::new(expr.fresh_clone()),
                negated: *negated,
            },
            ExprKind::InList { expr, list, negated } => ExprKind::InList {
                expr: Box::new(expr.fresh_clone()),
                list: list.iter().map(Expr::fresh_clone).collect(),
                negated: *negated,
            },
            ExprKind::InSubquery { expr, subquery, negated } => ExprKind::InSubquery {
                expr: Box::new(expr.fresh_clone()),
                subquery: Box::new(subquery.fresh_clone()),
                negated: *negated,
            },
            ExprKind::Between { expr, low, high, negated } => ExprKind::Between {
                expr: Box::new(expr.fresh_clone()),
                low: Box::new(low.fresh_clone()),
                high: Box::new(high.fresh_clone()),
                negated: *negated,
            },
            ExprKind::Like { expr, pattern, negated } => ExprKind::Like {
                expr: Box::new(expr.fresh_clone()),
                pattern: Box::new(pattern.fresh_clone()),
                negated: *negated,
            },
            ExprKind::Tuple(exprs) => ExprKind::Tuple(exprs.iter().map(Expr::fresh_clone).collect()),
            ExprKind::Function(func) => ExprKind::Function(FuncExpr {
                name: func.name.clone(),
                distinct: func.distinct,
                args: func.args.iter().map(Expr::fresh_clone).collect(),
            }),
            ExprKind::CountStar => ExprKind::CountStar,
            ExprKind::Subquery(sub) => ExprKind::Subquery(Box::new(sub.fresh_clone())),
            ExprKind::Exists { subquery, negated } => ExprKind::Exists {
                subquery: Box::new(subquery.fresh_clone()),
                negated: *negated,
            },
        };
        Expr::new(kind)
    }

    fn binding_power(&self) -> u8 {
        match &self.kind {
            ExprKind::Binary { op, .. } => op.precedence(),
            ExprKind::Unary { op: UnaryOp::Not, .. } => 3,
            ExprKind::IsNull { .. }
            | ExprKind::InList { .. }
            | ExprKind::InSubquery { .. }
            | ExprKind::Between { .. }
            | ExprKind::Like { .. } => 4,
            _ => 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Insert {
    pub table: TableName,
    pub columns: Vec<String>,
    pub rows: InsertRows,
    pub ignore: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InsertRows {
    Values(Vec<Vec<Expr>>),
    Select(Box<SelectStatement>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    pub table_exprs: Vec<TableExpr>,
    pub assignments: Vec<Assignment>,
    pub where_clause: Option<Expr>,
    pub order_by: Vec<OrderByExpr>,
    pub limit: Option<Limit>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub column: ColName,
    pub expr: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Delete {
    pub targets: Vec<TableName>,
    pub table_exprs: Vec<TableExpr>,
    pub where_clause: Option<Expr>,
    pub order_by: Vec<OrderByExpr>,
    pub limit: Option<Limit>,
}

fn write_list<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

fn write_order_limit(f: &mut fmt::Formatter<'_>, order_by: &[OrderByExpr], limit: &Option<Limit>) -> fmt::Result {
    if !order_by.is_empty() {
        write!(f, " order by ")?;
        write_list(f, order_by)?;
    }
    if let Some(limit) = limit {
        write!(f, "{}", limit)?;
    }
    Ok(())
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statement::Select(sel) => write!(f, "{}", sel),
            Statement::Insert(insert) => write!(f, "{}", insert),
            Statement::Update(update) => write!(f, "{}", update),
            Statement::Delete(delete) => write!(f, "{}", delete),
        }
    }
}

impl fmt::Display for SelectStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectStatement::Select(sel) => write!(f, "{}", sel),
            SelectStatement::Union(union) => write!(f, "{}", union),
        }
    }
}

impl fmt::Display for Select {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "select ")?;
        if self.calc_found_rows {
            write!(f, "sql_calc_found_rows ")?;
        }
        if self.distinct {
            write!(f, "distinct ")?;
        }
        if self.straight_join_hint {
            write!(f, "straight_join ")?;
        }
        write_list(f, &self.projection)?;
        if !self.from.is_empty() {
            write!(f, " from ")?;
            write_list(f, &self.from)?;
        }
        if let Some(selection) = &self.where_clause {
            write!(f, " where {}", selection)?;
        }
        if !self.group_by.is_empty() {
            write!(f, " group by ")?;
            write_list(f, &self.group_by)?;
        }
        if let Some(having) = &self.having {
            write!(f, " having {}", having)?;
        }
        write_order_limit(f, &self.order_by, &self.limit)?;
        if let Some(into) = &self.into {
            write!(f, " into {}", into)?;
        }
        Ok(())
    }
}

impl fmt::Display for Union {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keyword = if self.distinct { "union" } else { "union all" };
        match &self.right {
            SelectStatement::Union(_) => write!(f, "{} {} ({})", self.left, keyword, self.right)?,
            SelectStatement::Select(_) => write!(f, "{} {} {}", self.left, keyword, self.right)?,
        }
        write_order_limit(f, &self.order_by, &self.limit)
    }
}

impl fmt::Display for OrderByExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.expr, if self.desc { "desc" } else { "asc" })
    }
}

impl fmt::Display for Limit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.offset {
            Some(offset) => write!(f, " limit {}, {}", offset, self.count),
            None => write!(f, " limit {}", self.count),
        }
    }
}

impl fmt::Display for SelectExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectExpr::Star(StarExpr { table: Some(table) }) => write!(f, "{}.*", table),
            SelectExpr::Star(StarExpr { table: None }) => write!(f, "*"),
            SelectExpr::Aliased(AliasedExpr { expr, alias: Some(alias) }) => write!(f, "{} as {}", expr, alias),
            SelectExpr::Aliased(AliasedExpr { expr, alias: None }) => write!(f, "{}", expr),
        }
    }
}

impl fmt::Display for TableExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableExpr::Aliased(aliased) => {
                match &aliased.expr {
                    SimpleTableExpr::Table(name) => write!(f, "{}", name)?,
                    SimpleTableExpr::Derived(sub) => write!(f, "({})", sub)?,
                }
                if let Some(alias) = &aliased.alias {
                    write!(f, " as {}", alias)?;
                }
                Ok(())
            }
            TableExpr::Join(join) => {
                let keyword = match join.kind {
                    JoinKind::Inner => "join",
                    JoinKind::StraightJoin => "straight_join",
                    JoinKind::Left => "left join",
                    JoinKind::Right => "right join",
                    JoinKind::NaturalInner => "natural join",
                    JoinKind::NaturalLeft => "natural left join",
                    JoinKind::NaturalRight => "natural right join",
                };
                write!(f, "{} {} {}", join.left, keyword, join.right)?;
                if let Some(on) = &join.condition.on {
                    write!(f, " on {}", on)?;
                }
                if !join.condition.using.is_empty() {
                    write!(f, " using ({})", join.condition.using.join(", "))?;
                }
                Ok(())
            }
            TableExpr::Paren(exprs) => {
                write!(f, "(")?;
                write_list(f, exprs)?;
                write!(f, ")")
            }
        }
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.qualifier {
            Some(qualifier) => write!(f, "{}.{}", qualifier, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

impl fmt::Display for ColName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.qualifier {
            Some(qualifier) => write!(f, "{}.{}", qualifier, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Boolean(b) => write!(f, "{}", b),
            other => write!(f, "{}", other.to_value().to_sql_literal()),
        }
    }
}

struct Operand<'a> {
    expr: &'a Expr,
    parent_power: u8,
}

fn operand(expr: &Expr, parent_power: u8) -> Operand<'_> {
    Operand { expr, parent_power }
}

impl fmt::Display for Operand<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.expr.binding_power() < self.parent_power {
            write!(f, "({})", self.expr)
        } else {
            write!(f, "{}", self.expr)
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let power = self.binding_power();
        let not = |negated: &bool| if *negated { "not " } else { "" };
        match &self.kind {
            ExprKind::Column(col) => write!(f, "{}", col),
            ExprKind::Literal(lit) => write!(f, "{}", lit),
            ExprKind::Argument(name) => write!(f, ":{}", name),
            ExprKind::ListArgument(name) => write!(f, "::{}", name),
            ExprKind::Binary { op, left, right } => {
                // right operand binds one step tighter to keep left associativity
                write!(f, "{} {} {}", operand(left, power), op.symbol(), operand(right, power + 1))
            }
            ExprKind::Unary { op: UnaryOp::Not, expr } => write!(f, "not {}", operand(expr, power)),
            ExprKind::Unary { op: UnaryOp::Minus, expr } => write!(f, "-{}", operand(expr, power)),
            ExprKind::IsNull { expr, negated } => write!(f, "{} is {}null", operand(expr, power), not(negated)),
            ExprKind::InList { expr, list, negated } => {
                write!(f, "{} {}in (", operand(expr, power), not(negated))?;
                write_list(f, list)?;
                write!(f, ")")
            }
            ExprKind::InSubquery { expr, subquery, negated } => {
                write!(f, "{} {}in ({})", operand(expr, power), not(negated), subquery)
            }
            ExprKind::Between { expr, low, high, negated } => write!(
                f,
                "{} {}between {} and {}",
                operand(expr, power),
                not(negated),
                operand(low, power),
                operand(high, power)
            ),
            ExprKind::Like { expr, pattern, negated } => {
                write!(f, "{} {}like {}", operand(expr, power), not(negated), operand(pattern, power))
            }
            ExprKind::Tuple(exprs) => {
                write!(f, "(")?;
                write_list(f, exprs)?;
                write!(f, ")")
            }
            ExprKind::Function(func) => {
                write!(f, "{}(", func.name)?;
                if func.distinct {
                    write!(f, "distinct ")?;
                }
                write_list(f, &func.args)?;
                write!(f, ")")
            }
            ExprKind::CountStar => write!(f, "count(*)"),
            ExprKind::Subquery(sub) => write!(f, "({})", sub),
            ExprKind::Exists { subquery, negated } => write!(f, "{}exists ({})", not(negated), subquery),
        }
    }
}

impl fmt::Display for Insert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "insert {}into {}", if self.ignore { "ignore " } else { "" }, self.table)?;
        if !self.columns.is_empty() {
            write!(f, "({})", self.columns.join(", "))?;
        }
        match &self.rows {
            InsertRows::Values(rows) => {
                write!(f, " values ")?;
                for (i, row) in rows.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "(")?;
                    write_list(f, row)?;
                    write!(f, ")")?;
                }
                Ok(())
            }
            InsertRows::Select(sel) => write!(f, " {}", sel),
        }
    }
}

impl fmt::Display for Assignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {}", self.column, self.expr)
    }
}

impl fmt::Display for Update {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "update ")?;
        write_list(f, &self.table_exprs)?;
        write!(f, " set ")?;
        write_list(f, &self.assignments)?;
        if let Some(selection) = &self.where_clause {
            write!(f, " where {}", selection)?;
        }
        write_order_limit(f, &self.order_by, &self.limit)
    }
}

impl fmt::Display for Delete {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "delete ")?;
        if !self.targets.is_empty() {
            write_list(f, &self.targets)?;
            write!(f, " ")?;
        }
        write!(f, "from ")?;
        write_list(f, &self.table_exprs)?;
        if let Some(selection) = &self.where_clause {
            write!(f, " where {}", selection)?;
        }
        write_order_limit(f, &self.order_by, &self.limit)
    }
}
