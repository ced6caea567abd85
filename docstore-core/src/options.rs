//! Operation options: find shaping, upserts and index definitions.

use std::time::Duration;

use bson::Bson;

use crate::document::Document;

/// Options shaping a `find`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    /// Sort specification, e.g. `{ "created_at": -1 }`.
    pub sort: Option<Document>,
    /// Number of matching documents to skip.
    pub skip: Option<u64>,
    /// Maximum number of documents to return.
    pub limit: Option<u64>,
    /// Fields to include (`1`) or exclude (`0`).
    pub projection: Option<Document>,
}

impl FindOptions {
    pub fn builder() -> FindOptionsBuilder {
        FindOptionsBuilder::default()
    }
}

#[derive(Debug, Clone, Default)]
pub struct FindOptionsBuilder {
    options: FindOptions,
}

impl FindOptionsBuilder {
    pub fn sort(mut self, sort: Document) -> Self {
        self.options.sort = Some(sort);
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.options.skip = Some(skip);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.options.limit = Some(limit);
        self
    }

    pub fn projection(mut self, projection: Document) -> Self {
        self.options.projection = Some(projection);
        self
    }

    pub fn build(self) -> FindOptions {
        self.options
    }
}

/// Options for `update_one` / `update_many`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateOptions {
    /// Insert a new document when nothing matches the filter.
    pub upsert: bool,
}

impl UpdateOptions {
    pub fn upsert() -> Self {
        Self { upsert: true }
    }
}

/// Options attached to an index definition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexOptions {
    /// Explicit index name. Derived from the keys when absent.
    pub name: Option<String>,
    /// Reject documents that duplicate an existing key.
    pub unique: bool,
    /// Skip documents that lack the indexed fields.
    pub sparse: bool,
    /// Expire documents this long after the indexed date value.
    pub expire_after: Option<Duration>,
}

/// An index definition: ordered key specification plus options.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexModel {
    pub keys: Document,
    pub options: IndexOptions,
}

impl IndexModel {
    /// Starts an index definition over `keys`, e.g. `doc! { "email": 1 }`.
    pub fn new(keys: Document) -> Self {
        Self { keys, options: IndexOptions::default() }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.options.name = Some(name.into());
        self
    }

    pub fn unique(mut self, unique: bool) -> Self {
        self.options.unique = unique;
        self
    }

    pub fn sparse(mut self, sparse: bool) -> Self {
        self.options.sparse = sparse;
        self
    }

    pub fn expire_after(mut self, ttl: Duration) -> Self {
        self.options.expire_after = Some(ttl);
        self
    }

    /// The explicit name, or the conventional one derived from the keys
    /// (`{ a: 1, b: -1 }` becomes `a_1_b_-1`).
    pub fn resolved_name(&self) -> String {
        self.options
            .name
            .clone()
            .unwrap_or_else(|| {
                self.keys
                    .iter()
                    .map(|(field, direction)| format!("{field}_{}", key_direction(direction)))
                    .collect::<Vec<_>>()
                    .join("_")
            })
    }
}

fn key_direction(value: &Bson) -> String {
    match value {
        Bson::Int32(n) => n.to_string(),
        Bson::Int64(n) => n.to_string(),
        Bson::Double(n) => (*n as i64).to_string(),
        Bson::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Description of an existing index as reported by the driver.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexDescription {
    pub name: String,
    pub keys: Document,
    pub unique: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn index_names_follow_key_order() {
        assert_eq!(IndexModel::new(doc! { "a": 1, "b": -1 }).resolved_name(), "a_1_b_-1");
        assert_eq!(IndexModel::new(doc! { "bio": "text" }).resolved_name(), "bio_text");
        assert_eq!(IndexModel::new(doc! { "a": 1 }).name("by_a").resolved_name(), "by_a");
    }

    #[test]
    fn find_builder_sets_every_field() {
        let options = FindOptions::builder()
            .sort(doc! { "n": 1 })
            .skip(2)
            .limit(3)
            .projection(doc! { "n": 1 })
            .build();

        assert_eq!(options.skip, Some(2));
        assert_eq!(options.limit, Some(3));
        assert!(options.sort.is_some() && options.projection.is_some());
    }
}
