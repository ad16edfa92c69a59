use crate::semantics::analyzer::Session;
use crate::sql::ast::{Expr, ExprKind, Literal};
use crate::utils::types::DataType;

impl Session<'_> {
    /// Record the type of literals and aggregates; columns get theirs when bound
    pub(super) fn type_expr(&mut self, expr: &Expr) {
        if let Some(typ) = self.infer_type(expr) {
            self.sem.types.insert(expr.id, typ);
        }
    }

    fn infer_type(&self, expr: &Expr) -> Option<DataType> {
        match &expr.kind {
            ExprKind::Literal(literal) => Some(literal_type(literal)),
            ExprKind::CountStar => Some(DataType::Integer),
            ExprKind::Function(func) if func.is_aggregate() => match func.name.to_ascii_lowercase().as_str() {
                "count" => Some(DataType::Integer),
                "sum" | "avg" => Some(DataType::Decimal),
                "min" | "max" => func.args.first().and_then(|arg| self.sem.type_for(arg)),
                "group_concat" => Some(DataType::Text),
                _ => None,
            },
            _ => None,
        }
    }
}

fn literal_type(literal: &Literal) -> DataType {
    match literal {
        Literal::Integer(_) => DataType::Integer,
        Literal::Decimal(_) => DataType::Decimal,
        Literal::String(_) => DataType::Text,
        Literal::Boolean(_) => DataType::Boolean,
        Literal::Null => DataType::Null,
    }
}
