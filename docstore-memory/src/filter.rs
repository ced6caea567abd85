//! Filter documents parsed into an expression tree.
//!
//! The in-memory driver receives filters in the usual document shape
//! (`{ "age": { "$gte": 18 }, "$or": [...] }`) and parses them into an [`Expr`] tree that
//! is then evaluated by a [`FilterVisitor`].

use bson::{Bson, Document};

use docstore_core::error::{DocumentStoreError, DocumentStoreResult};

/// Server code for a malformed filter.
const BAD_VALUE: i32 = 2;

/// Field comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FieldOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    Nin,
}

impl FieldOp {
    fn from_operator(operator: &str) -> Option<Self> {
        Some(match operator {
            "$eq" => FieldOp::Eq,
            "$ne" => FieldOp::Ne,
            "$gt" => FieldOp::Gt,
            "$gte" => FieldOp::Gte,
            "$lt" => FieldOp::Lt,
            "$lte" => FieldOp::Lte,
            "$in" => FieldOp::In,
            "$nin" => FieldOp::Nin,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    /// All must match. An empty list matches everything.
    And(Vec<Expr>),
    /// Any must match.
    Or(Vec<Expr>),
    /// None may match.
    Nor(Vec<Expr>),
    /// Inverts a field-level expression.
    Not(Box<Expr>),
    /// Field presence check.
    Exists(String, bool),
    /// Field comparison; `field` may be a dotted path.
    Field { field: String, op: FieldOp, value: Bson },
}

impl Expr {
    /// Parses a filter document.
    ///
    /// # Errors
    ///
    /// Returns a validation error for unknown operators or malformed operands.
    pub(crate) fn parse(filter: &Document) -> DocumentStoreResult<Expr> {
        let mut clauses = Vec::with_capacity(filter.len());

        for (key, value) in filter {
            match key.as_str() {
                "$and" => clauses.push(Expr::And(parse_list(key, value)?)),
                "$or" => clauses.push(Expr::Or(parse_list(key, value)?)),
                "$nor" => clauses.push(Expr::Nor(parse_list(key, value)?)),
                operator if operator.starts_with('$') => {
                    return Err(bad_value(format!("unknown top level operator: {operator}")));
                }
                field => clauses.extend(parse_field(field, value)?),
            }
        }

        Ok(match clauses.len() {
            1 => clauses.remove(0),
            _ => Expr::And(clauses),
        })
    }

    /// Fields pinned to a single value by equality, used to seed upserted documents.
    pub(crate) fn equality_fields(&self) -> Vec<(&str, &Bson)> {
        match self {
            Expr::Field { field, op: FieldOp::Eq, value } => vec![(field.as_str(), value)],
            Expr::And(exprs) => exprs
                .iter()
                .flat_map(Expr::equality_fields)
                .collect(),
            _ => Vec::new(),
        }
    }
}

fn parse_list(operator: &str, value: &Bson) -> DocumentStoreResult<Vec<Expr>> {
    let Bson::Array(items) = value else {
        return Err(bad_value(format!("{operator} must be an array")));
    };
    if items.is_empty() {
        return Err(bad_value(format!("{operator} must be a nonempty array")));
    }

    items
        .iter()
        .map(|item| match item {
            Bson::Document(inner) => Expr::parse(inner),
            _ => Err(bad_value(format!("{operator} entries must be documents"))),
        })
        .collect()
}

fn is_operator_document(value: &Bson) -> bool {
    matches!(value, Bson::Document(doc) if doc.keys().next().is_some_and(|k| k.starts_with('$')))
}

fn parse_field(field: &str, value: &Bson) -> DocumentStoreResult<Vec<Expr>> {
    let Bson::Document(operators) = value else {
        return Ok(vec![Expr::Field { field: field.to_string(), op: FieldOp::Eq, value: value.clone() }]);
    };
    if !is_operator_document(value) {
        return Ok(vec![Expr::Field { field: field.to_string(), op: FieldOp::Eq, value: value.clone() }]);
    }

    operators
        .iter()
        .map(|(operator, operand)| match operator.as_str() {
            "$exists" => Ok(Expr::Exists(field.to_string(), truthy(operand))),
            "$not" => match operand {
                Bson::Document(_) if is_operator_document(operand) => {
                    let inner = parse_field(field, operand)?;
                    Ok(Expr::Not(Box::new(match inner.len() {
                        1 => inner.into_iter().next().unwrap_or(Expr::And(Vec::new())),
                        _ => Expr::And(inner),
                    })))
                }
                _ => Err(bad_value("$not needs an operator document")),
            },
            "$in" | "$nin" if !matches!(operand, Bson::Array(_)) => {
                Err(bad_value(format!("{operator} needs an array")))
            }
            other => match FieldOp::from_operator(other) {
                Some(op) => Ok(Expr::Field { field: field.to_string(), op, value: operand.clone() }),
                None => Err(bad_value(format!("unknown operator: {other}"))),
            },
        })
        .collect()
}

pub(crate) fn truthy(value: &Bson) -> bool {
    match value {
        Bson::Boolean(b) => *b,
        Bson::Int32(n) => *n != 0,
        Bson::Int64(n) => *n != 0,
        Bson::Double(n) => *n != 0.0,
        Bson::Null | Bson::Undefined => false,
        _ => true,
    }
}

fn bad_value(message: impl Into<String>) -> DocumentStoreError {
    DocumentStoreError::Validation { code: Some(BAD_VALUE), message: message.into() }
}

/// Walks an [`Expr`] tree.
pub(crate) trait FilterVisitor {
    type Output;

    fn visit_and(&mut self, exprs: &[Expr]) -> Self::Output;
    fn visit_or(&mut self, exprs: &[Expr]) -> Self::Output;
    fn visit_nor(&mut self, exprs: &[Expr]) -> Self::Output;
    fn visit_not(&mut self, expr: &Expr) -> Self::Output;
    fn visit_exists(&mut self, field: &str, should_exist: bool) -> Self::Output;
    fn visit_field(&mut self, field: &str, op: FieldOp, value: &Bson) -> Self::Output;

    fn visit_expr(&mut self, expr: &Expr) -> Self::Output {
        match expr {
            Expr::And(exprs) => self.visit_and(exprs),
            Expr::Or(exprs) => self.visit_or(exprs),
            Expr::Nor(exprs) => self.visit_nor(exprs),
            Expr::Not(expr) => self.visit_not(expr),
            Expr::Exists(field, should_exist) => self.visit_exists(field, *should_exist),
            Expr::Field { field, op, value } => self.visit_field(field, *op, value),
        }
    }
}
