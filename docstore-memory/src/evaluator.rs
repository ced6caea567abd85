//! Filter evaluation and value ordering for in-memory documents.

use std::cmp::Ordering;

use bson::{Bson, Document};

use docstore_core::document::get_path;

use crate::filter::{Expr, FieldOp, FilterVisitor};

/// Position of a value's type in the cross-type sort order.
fn type_rank(value: Option<&Bson>) -> u8 {
    match value {
        None | Some(Bson::Null) | Some(Bson::Undefined) => 1,
        Some(Bson::MinKey) => 0,
        Some(Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_)) => 2,
        Some(Bson::String(_) | Bson::Symbol(_)) => 3,
        Some(Bson::Document(_)) => 4,
        Some(Bson::Array(_)) => 5,
        Some(Bson::Binary(_)) => 6,
        Some(Bson::ObjectId(_)) => 7,
        Some(Bson::Boolean(_)) => 8,
        Some(Bson::DateTime(_)) => 9,
        Some(Bson::Timestamp(_)) => 10,
        Some(Bson::RegularExpression(_)) => 11,
        Some(Bson::MaxKey) => 13,
        Some(_) => 12,
    }
}

fn as_number(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(n) => Some(*n as f64),
        Bson::Int64(n) => Some(*n as f64),
        Bson::Double(n) => Some(*n),
        _ => None,
    }
}

/// Total order over values: by type first, then by value within a type.
pub(crate) fn compare_values(left: Option<&Bson>, right: Option<&Bson>) -> Ordering {
    let by_type = type_rank(left).cmp(&type_rank(right));
    if by_type != Ordering::Equal {
        return by_type;
    }

    match (left, right) {
        (Some(a), Some(b)) => match (a, b) {
            (Bson::String(a), Bson::String(b)) => a.cmp(b),
            (Bson::Boolean(a), Bson::Boolean(b)) => a.cmp(b),
            (Bson::ObjectId(a), Bson::ObjectId(b)) => a.bytes().cmp(&b.bytes()),
            (Bson::DateTime(a), Bson::DateTime(b)) => a.cmp(b),
            (Bson::Timestamp(a), Bson::Timestamp(b)) => (a.time, a.increment).cmp(&(b.time, b.increment)),
            (Bson::Document(a), Bson::Document(b)) => compare_documents(a, b),
            (Bson::Array(a), Bson::Array(b)) => a
                .iter()
                .zip(b.iter())
                .map(|(x, y)| compare_values(Some(x), Some(y)))
                .find(|ordering| *ordering != Ordering::Equal)
                .unwrap_or_else(|| a.len().cmp(&b.len())),
            _ => match (as_number(a), as_number(b)) {
                (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
                _ => Ordering::Equal,
            },
        },
        _ => Ordering::Equal,
    }
}

fn compare_documents(a: &Document, b: &Document) -> Ordering {
    for ((ka, va), (kb, vb)) in a.iter().zip(b.iter()) {
        let ordering = ka
            .cmp(kb)
            .then_with(|| compare_values(Some(va), Some(vb)));
        if ordering != Ordering::Equal {
            return ordering;
        }
    }

    a.len().cmp(&b.len())
}

/// Value equality with numeric types compared by value (`1 == 1.0 == 1i64`).
pub(crate) fn values_equal(left: &Bson, right: &Bson) -> bool {
    match (as_number(left), as_number(right)) {
        (Some(a), Some(b)) => a == b,
        _ => match (left, right) {
            (Bson::Document(a), Bson::Document(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b.iter())
                        .all(|((ka, va), (kb, vb))| ka == kb && values_equal(va, vb))
            }
            (Bson::Array(a), Bson::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| values_equal(x, y))
            }
            _ => left == right,
        },
    }
}

/// Evaluates a filter expression against one document.
pub(crate) struct DocumentEvaluator<'a> {
    document: &'a Document,
}

impl<'a> DocumentEvaluator<'a> {
    pub(crate) fn new(document: &'a Document) -> Self {
        Self { document }
    }

    pub(crate) fn matches(document: &Document, expr: &Expr) -> bool {
        DocumentEvaluator::new(document).visit_expr(expr)
    }

    /// Equality as the server applies it: arrays match when any element matches, and a
    /// missing field equals `null`.
    fn field_equals(field_value: Option<&Bson>, value: &Bson) -> bool {
        match field_value {
            None => matches!(value, Bson::Null),
            Some(Bson::Array(items)) if !matches!(value, Bson::Array(_)) => {
                items.iter().any(|item| values_equal(item, value))
            }
            Some(Bson::Array(items)) => {
                values_equal(&Bson::Array(items.clone()), value)
                    || items.iter().any(|item| values_equal(item, value))
            }
            Some(field_value) => values_equal(field_value, value),
        }
    }

    /// Range comparison; only values of the same type class compare.
    fn field_compares(field_value: Option<&Bson>, value: &Bson, accept: fn(Ordering) -> bool) -> bool {
        let compare_one = |candidate: &Bson| {
            type_rank(Some(candidate)) == type_rank(Some(value))
                && accept(compare_values(Some(candidate), Some(value)))
        };

        match field_value {
            None => false,
            Some(Bson::Array(items)) => items.iter().any(compare_one),
            Some(candidate) => compare_one(candidate),
        }
    }
}

impl<'a> FilterVisitor for DocumentEvaluator<'a> {
    type Output = bool;

    fn visit_and(&mut self, exprs: &[Expr]) -> bool {
        exprs.iter().all(|expr| self.visit_expr(expr))
    }

    fn visit_or(&mut self, exprs: &[Expr]) -> bool {
        exprs.iter().any(|expr| self.visit_expr(expr))
    }

    fn visit_nor(&mut self, exprs: &[Expr]) -> bool {
        !self.visit_or(exprs)
    }

    fn visit_not(&mut self, expr: &Expr) -> bool {
        !self.visit_expr(expr)
    }

    fn visit_exists(&mut self, field: &str, should_exist: bool) -> bool {
        field_values(self.document, field).iter().any(Option::is_some) == should_exist
    }

    fn visit_field(&mut self, field: &str, op: FieldOp, value: &Bson) -> bool {
        let branches = field_values(self.document, field);
        let equals = |candidate: &Bson| {
            branches
                .iter()
                .any(|field_value| Self::field_equals(*field_value, candidate))
        };
        let compares = |accept: fn(Ordering) -> bool| {
            branches
                .iter()
                .any(|field_value| Self::field_compares(*field_value, value, accept))
        };

        match op {
            FieldOp::Eq => equals(value),
            FieldOp::Ne => !equals(value),
            FieldOp::Gt => compares(Ordering::is_gt),
            FieldOp::Gte => compares(Ordering::is_ge),
            FieldOp::Lt => compares(Ordering::is_lt),
            FieldOp::Lte => compares(Ordering::is_le),
            FieldOp::In | FieldOp::Nin => {
                let found = match value {
                    Bson::Array(candidates) => candidates.iter().any(equals),
                    _ => false,
                };
                found == (op == FieldOp::In)
            }
        }
    }
}

/// Every value a dotted path reaches. A non-numeric segment applied to an array fans
/// out over the array's embedded documents; `None` marks a branch where the path ends.
fn field_values<'d>(document: &'d Document, path: &str) -> Vec<Option<&'d Bson>> {
    let parts = path.split('.').collect::<Vec<_>>();
    let mut branches = Vec::new();
    if let Some((first, rest)) = parts.split_first() {
        collect_branches(document.get(*first), rest, &mut branches);
    }
    if branches.is_empty() {
        branches.push(None);
    }

    branches
}

fn collect_branches<'d>(value: Option<&'d Bson>, parts: &[&str], branches: &mut Vec<Option<&'d Bson>>) {
    let Some((part, rest)) = parts.split_first() else {
        branches.push(value);
        return;
    };

    match value {
        Some(Bson::Document(inner)) => collect_branches(inner.get(*part), rest, branches),
        Some(Bson::Array(items)) => match part.parse::<usize>() {
            Ok(index) => collect_branches(items.get(index), rest, branches),
            Err(_) => {
                for item in items {
                    if let Bson::Document(inner) = item {
                        collect_branches(inner.get(*part), rest, branches);
                    }
                }
            }
        },
        _ => branches.push(None),
    }
}

/// Orders documents by a sort specification such as `{ "age": -1, "name": 1 }`.
pub(crate) fn sort_documents(documents: &mut [Document], spec: &Document) {
    let keys = spec
        .iter()
        .map(|(field, direction)| (field.as_str(), as_number(direction).unwrap_or(1.0) < 0.0))
        .collect::<Vec<_>>();

    documents.sort_by(|a, b| {
        keys.iter()
            .map(|(field, descending)| {
                let ordering = compare_values(get_path(a, field), get_path(b, field));
                if *descending { ordering.reverse() } else { ordering }
            })
            .find(|ordering| *ordering != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn matches(document: Document, filter: Document) -> bool {
        DocumentEvaluator::matches(&document, &Expr::parse(&filter).unwrap())
    }

    #[test]
    fn equality_covers_arrays_nulls_and_numbers() {
        assert!(matches(doc! { "tags": ["a", "b"] }, doc! { "tags": "b" }));
        assert!(matches(doc! { "tags": ["a", "b"] }, doc! { "tags": ["a", "b"] }));
        assert!(matches(doc! { "other": 1 }, doc! { "missing": null }));
        assert!(matches(doc! { "n": 1 }, doc! { "n": 1.0 }));
        assert!(!matches(doc! { "n": 1 }, doc! { "n": "1" }));
    }

    #[test]
    fn dotted_paths_reach_into_arrays_of_documents() {
        let order = doc! { "items": [ { "sku": "a", "qty": 1 }, { "sku": "b", "qty": 7 } ] };

        assert!(matches(order.clone(), doc! { "items.sku": "b" }));
        assert!(matches(order.clone(), doc! { "items.qty": { "$gt": 5 } }));
        assert!(matches(order.clone(), doc! { "items.sku": { "$in": ["x", "a"] } }));
        assert!(matches(order.clone(), doc! { "items.1.sku": "b" }));
        assert!(matches(order.clone(), doc! { "items.sku": { "$exists": true } }));
        assert!(!matches(order.clone(), doc! { "items.sku": "c" }));
        assert!(!matches(order, doc! { "items.sku": { "$ne": "a" } }));
    }

    #[test]
    fn ranges_only_compare_within_a_type() {
        assert!(matches(doc! { "age": 30 }, doc! { "age": { "$gt": 18, "$lte": 30 } }));
        assert!(!matches(doc! { "age": "30" }, doc! { "age": { "$gt": 18 } }));
        assert!(matches(doc! { "scores": [3, 9] }, doc! { "scores": { "$gte": 9 } }));
    }

    #[test]
    fn logical_operators_and_membership() {
        let document = doc! { "status": "active", "qty": 5, "meta": { "rank": 2 } };

        assert!(matches(document.clone(), doc! { "$or": [ { "status": "gone" }, { "qty": 5 } ] }));
        assert!(matches(document.clone(), doc! { "$nor": [ { "status": "gone" } ] }));
        assert!(matches(document.clone(), doc! { "status": { "$in": ["active", "paused"] } }));
        assert!(matches(document.clone(), doc! { "qty": { "$nin": [1, 2] } }));
        assert!(matches(document.clone(), doc! { "qty": { "$not": { "$gt": 10 } } }));
        assert!(matches(document.clone(), doc! { "meta.rank": 2, "meta.none": { "$exists": false } }));
        assert!(!matches(document, doc! { "status": { "$ne": "active" } }));
    }

    #[test]
    fn sorting_orders_types_then_values() {
        let mut documents = vec![
            doc! { "k": "b" },
            doc! { "k": 2 },
            doc! {},
            doc! { "k": "a" },
            doc! { "k": 1.5 },
        ];
        sort_documents(&mut documents, &doc! { "k": 1 });

        let keys = documents.iter().map(|d| d.get("k").cloned()).collect::<Vec<_>>();
        assert_eq!(
            keys,
            vec![None, Some(Bson::Double(1.5)), Some(Bson::Int32(2)), Some("a".into()), Some("b".into())]
        );
    }
}
