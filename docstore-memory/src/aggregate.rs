//! Aggregation pipelines and projections over in-memory documents.

use bson::{Bson, Document};

use docstore_core::{
    document::{ID_FIELD, get_path},
    error::{DocumentStoreError, DocumentStoreResult},
};

use crate::{
    evaluator::{DocumentEvaluator, compare_values, sort_documents, values_equal},
    filter::{Expr, truthy},
    update::{AddError, add_numbers, as_f64, remove_path, set_path},
};

const BAD_VALUE: i32 = 2;
const GROUP_ACCUMULATOR: i32 = 15952;
const INVALID_EXPRESSION: i32 = 168;
const STAGE_SHAPE: i32 = 40323;
const UNKNOWN_STAGE: i32 = 40324;
const MIXED_PROJECTION: i32 = 31254;

fn rejected(code: i32, message: impl Into<String>) -> DocumentStoreError {
    DocumentStoreError::Validation { code: Some(code), message: message.into() }
}

/// Runs `pipeline` over `documents`.
pub(crate) fn run_pipeline(mut documents: Vec<Document>, pipeline: &[Document]) -> DocumentStoreResult<Vec<Document>> {
    for stage in pipeline {
        let mut entries = stage.iter();
        let (Some((name, spec)), None) = (entries.next(), entries.next()) else {
            return Err(rejected(
                STAGE_SHAPE,
                "A pipeline stage specification object must contain exactly one field.",
            ));
        };

        documents = match name.as_str() {
            "$match" => {
                let expr = Expr::parse(as_document(name, spec)?)?;
                documents
                    .into_iter()
                    .filter(|document| DocumentEvaluator::matches(document, &expr))
                    .collect()
            }
            "$sort" => {
                sort_documents(&mut documents, as_document(name, spec)?);
                documents
            }
            "$skip" => documents.into_iter().skip(as_count(name, spec)?).collect(),
            "$limit" => documents.into_iter().take(as_count(name, spec)?).collect(),
            "$project" => {
                let spec = as_document(name, spec)?;
                documents
                    .iter()
                    .map(|document| project(document, spec))
                    .collect::<DocumentStoreResult<_>>()?
            }
            "$addFields" | "$set" => {
                let spec = as_document(name, spec)?;
                documents
                    .into_iter()
                    .map(|mut document| {
                        for (path, expr) in spec {
                            match evaluate(expr, &document)? {
                                Some(value) => set_path(&mut document, path, value)?,
                                None => {
                                    remove_path(&mut document, path);
                                }
                            }
                        }
                        Ok::<_, DocumentStoreError>(document)
                    })
                    .collect::<DocumentStoreResult<_>>()?
            }
            "$count" => {
                let Bson::String(field) = spec else {
                    return Err(rejected(BAD_VALUE, "the count field must be a non-empty string"));
                };
                if field.is_empty() || field.starts_with('$') || field.contains('.') {
                    return Err(rejected(BAD_VALUE, "the count field must be a non-empty string"));
                }
                match documents.len() {
                    0 => Vec::new(),
                    n => vec![Document::from_iter([(field.clone(), count_value(n))])],
                }
            }
            "$group" => group(documents, as_document(name, spec)?)?,
            "$unwind" => unwind(documents, spec)?,
            other => {
                return Err(rejected(UNKNOWN_STAGE, format!("Unrecognized pipeline stage name: '{other}'")));
            }
        };
    }

    Ok(documents)
}

fn as_document<'a>(stage: &str, spec: &'a Bson) -> DocumentStoreResult<&'a Document> {
    match spec {
        Bson::Document(document) => Ok(document),
        _ => Err(rejected(BAD_VALUE, format!("the {stage} stage specification must be an object"))),
    }
}

fn as_count(stage: &str, spec: &Bson) -> DocumentStoreResult<usize> {
    let count = match spec {
        Bson::Int32(n) => i64::from(*n),
        Bson::Int64(n) => *n,
        Bson::Double(n) if n.fract() == 0.0 => *n as i64,
        _ => -1,
    };

    usize::try_from(count).map_err(|_| rejected(BAD_VALUE, format!("invalid argument to {stage} stage")))
}

fn count_value(n: usize) -> Bson {
    i32::try_from(n)
        .map(Bson::Int32)
        .unwrap_or(Bson::Int64(n as i64))
}

/// Evaluates an aggregation expression against `document`. `None` means the value is
/// missing, which callers treat differently from an explicit `null`.
fn evaluate(expr: &Bson, document: &Document) -> DocumentStoreResult<Option<Bson>> {
    match expr {
        Bson::String(reference) if reference.starts_with('$') => Ok(get_path(document, &reference[1..]).cloned()),
        Bson::Document(inner) if inner.keys().next().is_some_and(|k| k.starts_with('$')) => {
            match inner.get("$literal") {
                Some(literal) if inner.len() == 1 => Ok(Some(literal.clone())),
                _ => Err(rejected(
                    INVALID_EXPRESSION,
                    format!("Unrecognized expression '{}'", inner.keys().next().map(String::as_str).unwrap_or("")),
                )),
            }
        }
        Bson::Document(inner) => {
            let mut out = Document::new();
            for (key, value) in inner {
                if let Some(value) = evaluate(value, document)? {
                    out.insert(key.clone(), value);
                }
            }
            Ok(Some(Bson::Document(out)))
        }
        Bson::Array(items) => items
            .iter()
            .map(|item| Ok::<_, DocumentStoreError>(evaluate(item, document)?.unwrap_or(Bson::Null)))
            .collect::<DocumentStoreResult<Vec<_>>>()
            .map(|items| Some(Bson::Array(items))),
        literal => Ok(Some(literal.clone())),
    }
}

fn is_flag(value: &Bson) -> bool {
    matches!(value, Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Boolean(_))
}

/// Applies a projection. Inclusion projections may also compute fields from expressions;
/// `_id` is kept unless excluded explicitly.
pub(crate) fn project(document: &Document, spec: &Document) -> DocumentStoreResult<Document> {
    let excluding = spec
        .iter()
        .filter(|(field, _)| field.as_str() != ID_FIELD)
        .any(|(_, value)| is_flag(value) && !truthy(value));
    let including = spec
        .iter()
        .filter(|(field, _)| field.as_str() != ID_FIELD)
        .any(|(_, value)| !is_flag(value) || truthy(value))
        || (!excluding && spec.len() == 1 && spec.get(ID_FIELD).is_some_and(|value| !is_flag(value) || truthy(value)));

    if excluding && including {
        return Err(rejected(MIXED_PROJECTION, "Cannot mix inclusion and exclusion in a projection"));
    }

    let keep_id = spec.get(ID_FIELD).is_none_or(|value| !is_flag(value) || truthy(value));

    if !including {
        let mut projected = document.clone();
        for (field, _) in spec {
            if field != ID_FIELD || !keep_id {
                remove_path(&mut projected, field);
            }
        }
        return Ok(projected);
    }

    let mut projected = Document::new();
    if keep_id {
        if let Some(id) = document.get(ID_FIELD) {
            projected.insert(ID_FIELD, id.clone());
        }
    }
    for (field, value) in spec {
        if field == ID_FIELD {
            if !is_flag(value) {
                if let Some(id) = evaluate(value, document)? {
                    projected.insert(ID_FIELD, id);
                }
            }
            continue;
        }

        let resolved = if is_flag(value) {
            get_path(document, field).cloned()
        } else {
            evaluate(value, document)?
        };
        if let Some(resolved) = resolved {
            set_path(&mut projected, field, resolved)?;
        }
    }

    Ok(projected)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Accumulator {
    Sum,
    Avg,
    Min,
    Max,
    First,
    Last,
    Push,
    AddToSet,
    Count,
}

impl Accumulator {
    fn from_operator(operator: &str) -> Option<Self> {
        Some(match operator {
            "$sum" => Accumulator::Sum,
            "$avg" => Accumulator::Avg,
            "$min" => Accumulator::Min,
            "$max" => Accumulator::Max,
            "$first" => Accumulator::First,
            "$last" => Accumulator::Last,
            "$push" => Accumulator::Push,
            "$addToSet" => Accumulator::AddToSet,
            "$count" => Accumulator::Count,
            _ => return None,
        })
    }

    fn finish(self, values: Vec<Option<Bson>>) -> Bson {
        let present = || values.iter().flatten().filter(|value| !matches!(value, Bson::Null));

        match self {
            Accumulator::Count => count_value(values.len()),
            Accumulator::Sum => present()
                .filter(|value| matches!(value, Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_)))
                .fold(Bson::Int32(0), |total, value| match add_numbers(&total, value) {
                    Ok(sum) => sum,
                    Err(AddError::Overflow) => match (as_f64(&total), as_f64(value)) {
                        (Some(a), Some(b)) => Bson::Double(a + b),
                        _ => total,
                    },
                    Err(AddError::NotNumeric) => total,
                }),
            Accumulator::Avg => {
                let numbers = present().filter_map(as_f64).collect::<Vec<_>>();
                match numbers.len() {
                    0 => Bson::Null,
                    n => Bson::Double(numbers.iter().sum::<f64>() / n as f64),
                }
            }
            Accumulator::Min => present()
                .min_by(|a, b| compare_values(Some(*a), Some(*b)))
                .cloned()
                .unwrap_or(Bson::Null),
            Accumulator::Max => present()
                .max_by(|a, b| compare_values(Some(*a), Some(*b)))
                .cloned()
                .unwrap_or(Bson::Null),
            Accumulator::First => values.first().cloned().flatten().unwrap_or(Bson::Null),
            Accumulator::Last => values.last().cloned().flatten().unwrap_or(Bson::Null),
            Accumulator::Push => Bson::Array(values.iter().flatten().cloned().collect()),
            Accumulator::AddToSet => {
                let mut set: Vec<Bson> = Vec::new();
                for value in values.iter().flatten() {
                    if !set.iter().any(|existing| values_equal(existing, value)) {
                        set.push(value.clone());
                    }
                }
                Bson::Array(set)
            }
        }
    }
}

/// Groups documents by the `_id` expression, keeping groups in first-seen order.
fn group(documents: Vec<Document>, spec: &Document) -> DocumentStoreResult<Vec<Document>> {
    let key_expr = spec
        .get(ID_FIELD)
        .ok_or_else(|| rejected(BAD_VALUE, "a group specification must include an _id"))?;

    let mut fields = Vec::new();
    for (name, definition) in spec {
        if name == ID_FIELD {
            continue;
        }
        let accumulator = match definition {
            Bson::Document(inner) if inner.len() == 1 => inner
                .iter()
                .next()
                .and_then(|(operator, expr)| Accumulator::from_operator(operator).map(|acc| (acc, expr.clone()))),
            _ => None,
        };
        let Some((accumulator, expr)) = accumulator else {
            return Err(rejected(GROUP_ACCUMULATOR, format!("The field '{name}' must be an accumulator object")));
        };
        fields.push((name.clone(), accumulator, expr));
    }

    let mut groups: Vec<(Bson, Vec<Document>)> = Vec::new();
    for document in documents {
        let key = evaluate(key_expr, &document)?.unwrap_or(Bson::Null);
        match groups.iter_mut().find(|(existing, _)| values_equal(existing, &key)) {
            Some((_, members)) => members.push(document),
            None => groups.push((key, vec![document])),
        }
    }

    groups
        .into_iter()
        .map(|(key, members)| {
            let mut out = Document::new();
            out.insert(ID_FIELD, key);
            for (name, accumulator, expr) in &fields {
                let values = members
                    .iter()
                    .map(|member| evaluate(expr, member))
                    .collect::<DocumentStoreResult<Vec<_>>>()?;
                out.insert(name.clone(), accumulator.finish(values));
            }
            Ok::<_, DocumentStoreError>(out)
        })
        .collect()
}

fn unwind(documents: Vec<Document>, spec: &Bson) -> DocumentStoreResult<Vec<Document>> {
    let (path, preserve) = match spec {
        Bson::String(path) => (path.as_str(), false),
        Bson::Document(options) => match options.get("path") {
            Some(Bson::String(path)) => (
                path.as_str(),
                options.get("preserveNullAndEmptyArrays").is_some_and(truthy),
            ),
            _ => return Err(rejected(BAD_VALUE, "$unwind needs a path")),
        },
        _ => return Err(rejected(BAD_VALUE, "$unwind needs a path")),
    };
    let Some(field) = path.strip_prefix('$') else {
        return Err(rejected(BAD_VALUE, "$unwind path must be prefixed by '$'"));
    };

    let mut out = Vec::with_capacity(documents.len());
    for document in documents {
        match get_path(&document, field).cloned() {
            Some(Bson::Array(items)) if !items.is_empty() => {
                for item in items {
                    let mut unwound = document.clone();
                    set_path(&mut unwound, field, item)?;
                    out.push(unwound);
                }
            }
            Some(Bson::Array(_)) | Some(Bson::Null) | None => {
                if preserve {
                    out.push(document);
                }
            }
            Some(_) => out.push(document),
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn orders() -> Vec<Document> {
        vec![
            doc! { "_id": 1, "item": "apple", "qty": 5, "tags": ["red", "fruit"] },
            doc! { "_id": 2, "item": "pear", "qty": 3, "tags": ["fruit"] },
            doc! { "_id": 3, "item": "apple", "qty": 2, "tags": [] },
        ]
    }

    #[test]
    fn match_group_and_sort() {
        let pipeline = vec![
            doc! { "$match": { "qty": { "$gte": 2 } } },
            doc! { "$group": { "_id": "$item", "total": { "$sum": "$qty" }, "orders": { "$sum": 1 }, "avg": { "$avg": "$qty" } } },
            doc! { "$sort": { "total": -1 } },
        ];

        let result = run_pipeline(orders(), &pipeline).unwrap();

        assert_eq!(
            result,
            vec![
                doc! { "_id": "apple", "total": 7, "orders": 2, "avg": 3.5 },
                doc! { "_id": "pear", "total": 3, "orders": 1, "avg": 3.0 },
            ]
        );
    }

    #[test]
    fn unwind_skip_limit_and_count() {
        let unwound = run_pipeline(orders(), &[doc! { "$unwind": "$tags" }]).unwrap();
        assert_eq!(unwound.len(), 3);
        assert_eq!(unwound[0].get_str("tags").unwrap(), "red");

        let preserved = run_pipeline(
            orders(),
            &[doc! { "$unwind": { "path": "$tags", "preserveNullAndEmptyArrays": true } }],
        )
        .unwrap();
        assert_eq!(preserved.len(), 4);

        let counted = run_pipeline(orders(), &[doc! { "$skip": 1 }, doc! { "$limit": 1 }, doc! { "$count": "n" }]).unwrap();
        assert_eq!(counted, vec![doc! { "n": 1 }]);

        let empty = run_pipeline(Vec::new(), &[doc! { "$count": "n" }]).unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn projections_include_exclude_and_compute() {
        let document = doc! { "_id": 1, "name": "a", "meta": { "size": 2, "color": "red" } };

        assert_eq!(
            project(&document, &doc! { "name": 1, "size": "$meta.size" }).unwrap(),
            doc! { "_id": 1, "name": "a", "size": 2 }
        );
        assert_eq!(
            project(&document, &doc! { "meta.color": 0, "_id": 0 }).unwrap(),
            doc! { "name": "a", "meta": { "size": 2 } }
        );
        assert_eq!(
            project(&document, &doc! { "name": 1, "meta": 0 }).unwrap_err().code(),
            Some(MIXED_PROJECTION)
        );
    }

    #[test]
    fn sum_past_int64_range_becomes_double() {
        let documents = vec![doc! { "n": i64::MAX }, doc! { "n": 1i64 }];
        let pipeline = [doc! { "$group": { "_id": null, "total": { "$sum": "$n" } } }];

        let result = run_pipeline(documents, &pipeline).unwrap();

        assert_eq!(result[0].get_f64("total").unwrap(), i64::MAX as f64 + 1.0);
    }

    #[test]
    fn malformed_pipelines_are_rejected() {
        let unknown = run_pipeline(orders(), &[doc! { "$teleport": {} }]).unwrap_err();
        assert_eq!(unknown.code(), Some(UNKNOWN_STAGE));

        let shape = run_pipeline(orders(), &[doc! { "$match": {}, "$sort": { "a": 1 } }]).unwrap_err();
        assert_eq!(shape.code(), Some(STAGE_SHAPE));

        assert!(run_pipeline(orders(), &[doc! { "$limit": -1 }]).is_err());
        assert!(run_pipeline(orders(), &[doc! { "$group": { "_id": null, "x": 1 } }]).is_err());
    }
}
