//! Update documents: operator updates and whole-document replacements.

use bson::{Bson, Document};

use docstore_core::{
    document::{ID_FIELD, get_path},
    error::{DocumentStoreError, DocumentStoreResult},
};

use crate::evaluator::values_equal;

const BAD_VALUE: i32 = 2;
const FAILED_TO_PARSE: i32 = 9;
const TYPE_MISMATCH: i32 = 14;
const PATH_NOT_VIABLE: i32 = 28;
const IMMUTABLE_FIELD: i32 = 66;

fn rejected(code: i32, message: impl Into<String>) -> DocumentStoreError {
    DocumentStoreError::Validation { code: Some(code), message: message.into() }
}

/// A parsed update.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Update {
    /// `{ "$set": {...}, "$inc": {...} }`
    Operators(Document),
    /// A document replacing everything but `_id`.
    Replacement(Document),
}

impl Update {
    pub(crate) fn parse(update: Document) -> DocumentStoreResult<Self> {
        let operator_keys = update.keys().filter(|k| k.starts_with('$')).count();

        if operator_keys == 0 {
            return Ok(Update::Replacement(update));
        }
        if operator_keys != update.len() {
            return Err(rejected(FAILED_TO_PARSE, "update mixes operators and plain fields"));
        }

        for (operator, operand) in &update {
            match operator.as_str() {
                "$set" | "$unset" | "$inc" | "$push" | "$addToSet" | "$rename" | "$setOnInsert" => {
                    if !matches!(operand, Bson::Document(_)) {
                        return Err(rejected(FAILED_TO_PARSE, format!("{operator} needs a document operand")));
                    }
                }
                other => return Err(rejected(FAILED_TO_PARSE, format!("Unknown modifier: {other}"))),
            }
        }

        Ok(Update::Operators(update))
    }

    /// Applies the update to `document` in place.
    ///
    /// `inserting` is set when the document is being created by an upsert, which enables
    /// `$setOnInsert`.
    pub(crate) fn apply(&self, document: &mut Document, inserting: bool) -> DocumentStoreResult<()> {
        let original_id = document.get(ID_FIELD).cloned();

        match self {
            Update::Replacement(replacement) => {
                let mut replaced = Document::new();
                if let Some(id) = &original_id {
                    replaced.insert(ID_FIELD, id.clone());
                }
                for (key, value) in replacement {
                    if key == ID_FIELD && original_id.is_some() {
                        continue;
                    }
                    replaced.insert(key.clone(), value.clone());
                }
                if let (Some(id), Some(new_id)) = (&original_id, replacement.get(ID_FIELD)) {
                    if !values_equal(id, new_id) {
                        return Err(immutable_id());
                    }
                }
                *document = replaced;
            }
            Update::Operators(operators) => {
                for (operator, operand) in operators {
                    let Bson::Document(fields) = operand else {
                        continue;
                    };
                    for (path, value) in fields {
                        apply_operator(document, operator, path, value, inserting)?;
                    }
                }

                if let Some(id) = &original_id {
                    if !document.get(ID_FIELD).is_some_and(|new_id| values_equal(id, new_id)) {
                        return Err(immutable_id());
                    }
                }
            }
        }

        Ok(())
    }
}

fn immutable_id() -> DocumentStoreError {
    rejected(IMMUTABLE_FIELD, "Performing an update on the path '_id' would modify the immutable field '_id'")
}

fn apply_operator(
    document: &mut Document,
    operator: &str,
    path: &str,
    value: &Bson,
    inserting: bool,
) -> DocumentStoreResult<()> {
    match operator {
        "$set" => set_path(document, path, value.clone()),
        "$setOnInsert" if inserting => set_path(document, path, value.clone()),
        "$setOnInsert" => Ok(()),
        "$unset" => {
            remove_path(document, path);
            Ok(())
        }
        "$inc" => {
            let current = get_path(document, path).cloned();
            let incremented = match current {
                None => checked_number(value, path)?.clone(),
                Some(current) => add_numbers(&current, checked_number(value, path)?).map_err(|err| match err {
                    AddError::NotNumeric => rejected(
                        TYPE_MISMATCH,
                        format!("Cannot apply $inc to a value of non-numeric type at '{path}'"),
                    ),
                    AddError::Overflow => rejected(
                        BAD_VALUE,
                        format!("Failed to apply $inc operations to current value ({current}) for '{path}': overflow"),
                    ),
                })?,
            };
            set_path(document, path, incremented)
        }
        "$push" | "$addToSet" => {
            let items = match value {
                Bson::Document(each) if each.contains_key("$each") => match each.get("$each") {
                    Some(Bson::Array(items)) => items.clone(),
                    _ => return Err(rejected(TYPE_MISMATCH, "$each needs an array")),
                },
                single => vec![single.clone()],
            };

            let mut array = match get_path(document, path) {
                None => Vec::new(),
                Some(Bson::Array(existing)) => existing.clone(),
                Some(_) => {
                    return Err(rejected(TYPE_MISMATCH, format!("The field '{path}' must be an array")));
                }
            };
            for item in items {
                if operator == "$addToSet" && array.iter().any(|existing| values_equal(existing, &item)) {
                    continue;
                }
                array.push(item);
            }
            set_path(document, path, Bson::Array(array))
        }
        "$rename" => {
            let Bson::String(target) = value else {
                return Err(rejected(FAILED_TO_PARSE, "$rename target must be a string"));
            };
            match remove_path(document, path) {
                Some(moved) => set_path(document, target, moved),
                None => Ok(()),
            }
        }
        other => Err(rejected(FAILED_TO_PARSE, format!("Unknown modifier: {other}"))),
    }
}

fn checked_number<'a>(value: &'a Bson, path: &str) -> DocumentStoreResult<&'a Bson> {
    match value {
        Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) => Ok(value),
        _ => Err(rejected(TYPE_MISMATCH, format!("Cannot increment '{path}' with a non-numeric argument"))),
    }
}

/// Why two numbers could not be added.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AddError {
    NotNumeric,
    /// The exact integer sum does not fit in an `Int64`.
    Overflow,
}

/// Adds two numeric values, widening `Int32` to `Int64` on overflow and to `Double` when
/// either side is a double.
pub(crate) fn add_numbers(left: &Bson, right: &Bson) -> Result<Bson, AddError> {
    match (left, right) {
        (Bson::Int32(a), Bson::Int32(b)) => Ok(a
            .checked_add(*b)
            .map(Bson::Int32)
            .unwrap_or(Bson::Int64(i64::from(*a) + i64::from(*b)))),
        (Bson::Int32(a), Bson::Int64(b)) | (Bson::Int64(b), Bson::Int32(a)) => i64::from(*a)
            .checked_add(*b)
            .map(Bson::Int64)
            .ok_or(AddError::Overflow),
        (Bson::Int64(a), Bson::Int64(b)) => a.checked_add(*b).map(Bson::Int64).ok_or(AddError::Overflow),
        (Bson::Double(a), other) | (other, Bson::Double(a)) => {
            as_f64(other).map(|b| Bson::Double(a + b)).ok_or(AddError::NotNumeric)
        }
        _ => Err(AddError::NotNumeric),
    }
}

pub(crate) fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Double(n) => Some(*n),
        Bson::Int32(n) => Some(f64::from(*n)),
        Bson::Int64(n) => Some(*n as f64),
        _ => None,
    }
}

/// Sets a dotted path, creating intermediate documents as needed. Numeric segments index
/// into arrays, padding with `null`.
pub(crate) fn set_path(document: &mut Document, path: &str, value: Bson) -> DocumentStoreResult<()> {
    let Some((head, rest)) = path.split_once('.') else {
        document.insert(path, value);
        return Ok(());
    };

    if !document.contains_key(head) {
        document.insert(head, Document::new());
    }
    match document.get_mut(head) {
        Some(child) => set_in_value(child, rest, value, path),
        None => Err(not_viable(path)),
    }
}

fn set_in_value(target: &mut Bson, path: &str, value: Bson, full_path: &str) -> DocumentStoreResult<()> {
    match target {
        Bson::Document(document) => set_path(document, path, value),
        Bson::Array(items) => {
            let (head, rest) = match path.split_once('.') {
                Some((head, rest)) => (head, Some(rest)),
                None => (path, None),
            };
            let index = head.parse::<usize>().map_err(|_| not_viable(full_path))?;
            while items.len() <= index {
                items.push(Bson::Null);
            }

            match rest {
                None => {
                    items[index] = value;
                    Ok(())
                }
                Some(rest) => {
                    if matches!(items[index], Bson::Null) {
                        items[index] = Bson::Document(Document::new());
                    }
                    set_in_value(&mut items[index], rest, value, full_path)
                }
            }
        }
        _ => Err(not_viable(full_path)),
    }
}

fn not_viable(path: &str) -> DocumentStoreError {
    rejected(PATH_NOT_VIABLE, format!("Cannot create field along path '{path}'"))
}

/// Removes a dotted path, returning the removed value.
pub(crate) fn remove_path(document: &mut Document, path: &str) -> Option<Bson> {
    match path.split_once('.') {
        None => document.remove(path),
        Some((head, rest)) => match document.get_mut(head)? {
            Bson::Document(inner) => remove_path(inner, rest),
            _ => None,
        },
    }
}
