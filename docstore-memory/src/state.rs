//! Storage state and the synchronous operations applied to it.
//!
//! Everything here works on a plain [`StoreMap`]. The driver decides whether that map is
//! the shared store behind its lock or a transaction's private snapshot.

use std::collections::BTreeMap;

use bson::{Bson, Document, oid::ObjectId};

use docstore_core::{
    document::{ID_FIELD, get_path},
    error::{DocumentStoreError, DocumentStoreResult},
    namespace::Namespace,
    options::{FindOptions, IndexDescription, IndexModel, UpdateOptions},
    outcome::{DeleteOutcome, UpdateOutcome},
};

use crate::{
    aggregate::project,
    evaluator::{DocumentEvaluator, sort_documents, values_equal},
    filter::Expr,
    update::{Update, set_path},
};

const ID_INDEX: &str = "_id_";
const DUPLICATE_KEY: i32 = 11000;
const ILLEGAL_OPERATION: i32 = 20;
const INDEX_OPTIONS_CONFLICT: i32 = 85;
const INDEX_KEY_SPECS_CONFLICT: i32 = 86;
const INVALID_OPTIONS: i32 = 72;

pub(crate) type StoreMap = BTreeMap<String, BTreeMap<String, CollectionState>>;

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct IndexState {
    name: String,
    keys: Document,
    unique: bool,
    sparse: bool,
}

impl IndexState {
    /// The key values of `document` under this index, or `None` when a sparse index skips it.
    fn key_of(&self, document: &Document) -> Option<Vec<Bson>> {
        let values = self
            .keys
            .keys()
            .map(|field| get_path(document, field).cloned())
            .collect::<Vec<_>>();

        if self.sparse && values.iter().all(Option::is_none) {
            return None;
        }

        Some(values.into_iter().map(|value| value.unwrap_or(Bson::Null)).collect())
    }
}

/// One collection: documents in insertion order plus secondary index definitions.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct CollectionState {
    documents: Vec<Document>,
    indexes: Vec<IndexState>,
}

impl CollectionState {
    fn matching<'a>(&'a self, expr: &'a Expr) -> impl Iterator<Item = usize> + 'a {
        self.documents
            .iter()
            .enumerate()
            .filter(move |(_, document)| DocumentEvaluator::matches(document, expr))
            .map(|(position, _)| position)
    }

    /// Rejects `candidate` if it collides with another document on `_id` or on a unique
    /// index. `skip` excludes the document being replaced.
    fn check_unique(&self, namespace: &Namespace, candidate: &Document, skip: Option<usize>) -> DocumentStoreResult<()> {
        let others = || {
            self.documents
                .iter()
                .enumerate()
                .filter(move |(position, _)| Some(*position) != skip)
                .map(|(_, document)| document)
        };

        if let Some(id) = candidate.get(ID_FIELD) {
            if others().any(|other| other.get(ID_FIELD).is_some_and(|other_id| values_equal(other_id, id))) {
                return Err(duplicate_key(namespace, ID_INDEX, &[id.clone()]));
            }
        }

        for index in self.indexes.iter().filter(|index| index.unique) {
            let Some(key) = index.key_of(candidate) else {
                continue;
            };
            let collides = others().any(|other| {
                index.key_of(other).is_some_and(|other_key| {
                    other_key.iter().zip(key.iter()).all(|(a, b)| values_equal(a, b))
                })
            });
            if collides {
                return Err(duplicate_key(namespace, &index.name, &key));
            }
        }

        Ok(())
    }

    fn insert(&mut self, namespace: &Namespace, mut document: Document) -> DocumentStoreResult<Bson> {
        let id = match document.get(ID_FIELD) {
            Some(id) => id.clone(),
            None => {
                let id = Bson::ObjectId(ObjectId::new());
                let mut with_id = Document::new();
                with_id.insert(ID_FIELD, id.clone());
                for (key, value) in document {
                    with_id.insert(key, value);
                }
                document = with_id;
                id
            }
        };

        self.check_unique(namespace, &document, None)?;
        self.documents.push(document);

        Ok(id)
    }
}

fn duplicate_key(namespace: &Namespace, index: &str, key: &[Bson]) -> DocumentStoreError {
    let key = key.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ");
    DocumentStoreError::Validation {
        code: Some(DUPLICATE_KEY),
        message: format!("E11000 duplicate key error collection: {namespace} index: {index} dup key: {{ {key} }}"),
    }
}

pub(crate) fn collection<'a>(store: &'a StoreMap, namespace: &Namespace) -> Option<&'a CollectionState> {
    store.get(namespace.database())?.get(namespace.collection())
}

/// The collection for `namespace`, created on first write.
fn collection_mut<'a>(store: &'a mut StoreMap, namespace: &Namespace) -> &'a mut CollectionState {
    store
        .entry(namespace.database().to_string())
        .or_default()
        .entry(namespace.collection().to_string())
        .or_default()
}

pub(crate) fn insert_one(store: &mut StoreMap, namespace: &Namespace, document: Document) -> DocumentStoreResult<Bson> {
    collection_mut(store, namespace).insert(namespace, document)
}

/// Attempts every document, returning one result per input position.
pub(crate) fn insert_many(
    store: &mut StoreMap,
    namespace: &Namespace,
    documents: Vec<Document>,
) -> Vec<DocumentStoreResult<Bson>> {
    let collection = collection_mut(store, namespace);
    documents
        .into_iter()
        .map(|document| collection.insert(namespace, document))
        .collect()
}

pub(crate) fn find(
    store: &StoreMap,
    namespace: &Namespace,
    filter: &Document,
    options: &FindOptions,
) -> DocumentStoreResult<Vec<Document>> {
    let expr = Expr::parse(filter)?;
    let Some(collection) = collection(store, namespace) else {
        return Ok(Vec::new());
    };

    let mut documents = collection
        .matching(&expr)
        .map(|position| collection.documents[position].clone())
        .collect::<Vec<_>>();

    if let Some(sort) = &options.sort {
        sort_documents(&mut documents, sort);
    }

    let skip = options.skip.map_or(0, |skip| skip as usize);
    let limit = options.limit.filter(|limit| *limit > 0).map_or(usize::MAX, |limit| limit as usize);
    let documents = documents.into_iter().skip(skip).take(limit);

    match &options.projection {
        Some(projection) => documents.map(|document| project(&document, projection)).collect(),
        None => Ok(documents.collect()),
    }
}

pub(crate) fn find_one(store: &StoreMap, namespace: &Namespace, filter: &Document) -> DocumentStoreResult<Option<Document>> {
    let options = FindOptions { limit: Some(1), ..FindOptions::default() };
    Ok(find(store, namespace, filter, &options)?.into_iter().next())
}

pub(crate) fn count(store: &StoreMap, namespace: &Namespace, filter: &Document) -> DocumentStoreResult<u64> {
    let expr = Expr::parse(filter)?;
    Ok(collection(store, namespace).map_or(0, |collection| collection.matching(&expr).count() as u64))
}

/// Distinct values of `field`, flattening arrays, in first-seen order.
pub(crate) fn distinct(
    store: &StoreMap,
    namespace: &Namespace,
    field: &str,
    filter: &Document,
) -> DocumentStoreResult<Vec<Bson>> {
    let mut values: Vec<Bson> = Vec::new();
    for document in find(store, namespace, filter, &FindOptions::default())? {
        let candidates = match get_path(&document, field) {
            Some(Bson::Array(items)) => items.clone(),
            Some(value) => vec![value.clone()],
            None => continue,
        };
        for candidate in candidates {
            if !values.iter().any(|existing| values_equal(existing, &candidate)) {
                values.push(candidate);
            }
        }
    }

    Ok(values)
}

pub(crate) fn update(
    store: &mut StoreMap,
    namespace: &Namespace,
    filter: &Document,
    update: Document,
    options: UpdateOptions,
    multi: bool,
) -> DocumentStoreResult<UpdateOutcome> {
    let expr = Expr::parse(filter)?;
    let update = Update::parse(update)?;
    if multi && matches!(update, Update::Replacement(_)) {
        return Err(DocumentStoreError::Validation {
            code: Some(ILLEGAL_OPERATION),
            message: "multi update only works with $ operators".into(),
        });
    }

    let mut positions = collection(store, namespace)
        .map(|collection| collection.matching(&expr).collect::<Vec<_>>())
        .unwrap_or_default();
    if !multi {
        positions.truncate(1);
    }

    if positions.is_empty() {
        if !options.upsert {
            return Ok(UpdateOutcome::default());
        }

        let mut seeded = Document::new();
        for (field, value) in expr.equality_fields() {
            set_path(&mut seeded, field, value.clone())?;
        }
        update.apply(&mut seeded, true)?;
        let upserted_id = collection_mut(store, namespace).insert(namespace, seeded)?;

        return Ok(UpdateOutcome { matched: 0, modified: 0, upserted_id: Some(upserted_id) });
    }

    let collection = collection_mut(store, namespace);

    // Stage every change first so a rejected document leaves the collection untouched.
    let mut staged = Vec::with_capacity(positions.len());
    for position in &positions {
        let original = &collection.documents[*position];
        let mut changed = original.clone();
        update.apply(&mut changed, false)?;
        if changed != *original {
            collection.check_unique(namespace, &changed, Some(*position))?;
            staged.push((*position, changed));
        }
    }

    let modified = staged.len() as u64;
    for (position, changed) in staged {
        collection.documents[position] = changed;
    }

    Ok(UpdateOutcome { matched: positions.len() as u64, modified, upserted_id: None })
}

pub(crate) fn delete(store: &mut StoreMap, namespace: &Namespace, filter: &Document, multi: bool) -> DocumentStoreResult<DeleteOutcome> {
    let expr = Expr::parse(filter)?;
    let Some(collection) = store
        .get_mut(namespace.database())
        .and_then(|database| database.get_mut(namespace.collection()))
    else {
        return Ok(DeleteOutcome::default());
    };

    let mut positions = collection.matching(&expr).collect::<Vec<_>>();
    if !multi {
        positions.truncate(1);
    }
    for position in positions.iter().rev() {
        collection.documents.remove(*position);
    }

    Ok(DeleteOutcome { deleted: positions.len() as u64 })
}

pub(crate) fn aggregate(store: &StoreMap, namespace: &Namespace, pipeline: &[Document]) -> DocumentStoreResult<Vec<Document>> {
    let documents = collection(store, namespace).map_or_else(Vec::new, |collection| collection.documents.clone());
    crate::aggregate::run_pipeline(documents, pipeline)
}

/// Creates an index. Re-creating an identical index is a no-op returning its name.
pub(crate) fn create_index(store: &mut StoreMap, namespace: &Namespace, index: &IndexModel) -> DocumentStoreResult<String> {
    if index.keys.is_empty() {
        return Err(DocumentStoreError::Validation {
            code: Some(INVALID_OPTIONS),
            message: "index keys cannot be empty".into(),
        });
    }

    let name = index.resolved_name();
    let candidate = IndexState {
        name: name.clone(),
        keys: index.keys.clone(),
        unique: index.options.unique,
        sparse: index.options.sparse,
    };
    let collection = collection_mut(store, namespace);

    if let Some(existing) = collection.indexes.iter().find(|existing| existing.keys == candidate.keys) {
        if *existing == candidate {
            return Ok(name);
        }
        return Err(DocumentStoreError::Validation {
            code: Some(INDEX_OPTIONS_CONFLICT),
            message: format!("Index already exists with a different name or options: {}", existing.name),
        });
    }
    if collection.indexes.iter().any(|existing| existing.name == name) || name == ID_INDEX {
        return Err(DocumentStoreError::Validation {
            code: Some(INDEX_KEY_SPECS_CONFLICT),
            message: format!("An index named {name} already exists with different keys"),
        });
    }

    if candidate.unique {
        let mut seen: Vec<Vec<Bson>> = Vec::new();
        for key in collection.documents.iter().filter_map(|document| candidate.key_of(document)) {
            if seen.iter().any(|other| other.iter().zip(key.iter()).all(|(a, b)| values_equal(a, b))) {
                return Err(duplicate_key(namespace, &name, &key));
            }
            seen.push(key);
        }
    }

    collection.indexes.push(candidate);
    Ok(name)
}

pub(crate) fn list_indexes(store: &StoreMap, namespace: &Namespace) -> DocumentStoreResult<Vec<IndexDescription>> {
    let collection = collection(store, namespace).ok_or_else(|| DocumentStoreError::NotFound(namespace.to_string()))?;

    let mut id_keys = Document::new();
    id_keys.insert(ID_FIELD, 1);
    let mut indexes = vec![IndexDescription { name: ID_INDEX.to_string(), keys: id_keys, unique: true }];
    indexes.extend(collection.indexes.iter().map(|index| IndexDescription {
        name: index.name.clone(),
        keys: index.keys.clone(),
        unique: index.unique,
    }));

    Ok(indexes)
}

pub(crate) fn drop_index(store: &mut StoreMap, namespace: &Namespace, name: &str) -> DocumentStoreResult<()> {
    if name == ID_INDEX {
        return Err(DocumentStoreError::Validation {
            code: Some(INVALID_OPTIONS),
            message: "cannot drop _id index".into(),
        });
    }

    let collection = store
        .get_mut(namespace.database())
        .and_then(|database| database.get_mut(namespace.collection()))
        .ok_or_else(|| DocumentStoreError::NotFound(namespace.to_string()))?;

    let before = collection.indexes.len();
    collection.indexes.retain(|index| index.name != name);
    if collection.indexes.len() == before {
        return Err(DocumentStoreError::NotFound(format!("index {name} in {namespace}")));
    }

    Ok(())
}

/// Removes a collection. Dropping a missing collection succeeds.
pub(crate) fn drop_collection(store: &mut StoreMap, namespace: &Namespace) {
    if let Some(database) = store.get_mut(namespace.database()) {
        database.remove(namespace.collection());
        if database.is_empty() {
            store.remove(namespace.database());
        }
    }
}

pub(crate) fn drop_database(store: &mut StoreMap, database: &str) {
    store.remove(database);
}

/// Databases holding at least one collection, sorted by name.
pub(crate) fn list_databases(store: &StoreMap) -> Vec<String> {
    store
        .iter()
        .filter(|(_, collections)| !collections.is_empty())
        .map(|(name, _)| name.clone())
        .collect()
}

pub(crate) fn list_collections(store: &StoreMap, database: &str) -> Vec<String> {
    store
        .get(database)
        .map(|collections| collections.keys().cloned().collect())
        .unwrap_or_default()
}

/// The first namespace in `expected` whose state in `store` is no longer the recorded one.
pub(crate) fn first_conflict<'a>(
    store: &StoreMap,
    expected: &'a BTreeMap<(String, String), Option<CollectionState>>,
) -> Option<&'a (String, String)> {
    expected
        .iter()
        .find(|(key, recorded)| {
            let (database, name) = key;
            store.get(database).and_then(|collections| collections.get(name)) != recorded.as_ref()
        })
        .map(|(key, _)| key)
}

/// Copies the state of `namespaces` from `source` into `target`, removing those that no
/// longer exist in `source`.
pub(crate) fn merge_namespaces<'a>(
    target: &mut StoreMap,
    source: &StoreMap,
    namespaces: impl IntoIterator<Item = &'a (String, String)>,
) {
    for (database, name) in namespaces {
        match source.get(database).and_then(|collections| collections.get(name)) {
            Some(state) => {
                target
                    .entry(database.clone())
                    .or_default()
                    .insert(name.clone(), state.clone());
            }
            None => {
                if let Some(collections) = target.get_mut(database) {
                    collections.remove(name);
                    if collections.is_empty() {
                        target.remove(database);
                    }
                }
            }
        }
    }
}
