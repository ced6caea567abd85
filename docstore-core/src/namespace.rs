//! Target namespaces for document operations.
//!
//! A [`Namespace`] names the database and collection an operation applies to.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::{DocumentStoreError, DocumentStoreResult};

/// Characters a database name may not contain.
const FORBIDDEN_DATABASE_CHARS: [char; 6] = ['.', '$', '\0', '/', '\\', ' '];

/// The (database name, collection name) pair identifying where an operation applies.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Namespace {
    database: String,
    collection: String,
}

impl Namespace {
    /// Creates a namespace, rejecting names the database would refuse.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::Validation`] if either name is empty, the database
    /// name contains a forbidden character, or the collection name contains `$` or NUL.
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> DocumentStoreResult<Self> {
        let database = database.into();
        let collection = collection.into();

        validate_database_name(&database)?;

        if collection.is_empty() {
            return Err(DocumentStoreError::validation("collection name must not be empty"));
        }
        if collection.contains(['$', '\0']) {
            return Err(DocumentStoreError::validation(format!(
                "collection name {collection:?} contains a forbidden character"
            )));
        }

        Ok(Self { database, collection })
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }
}

/// Checks a bare database name, as used by `drop_database` and `list_collections`.
pub fn validate_database_name(database: &str) -> DocumentStoreResult<()> {
    if database.is_empty() {
        return Err(DocumentStoreError::validation("database name must not be empty"));
    }
    if database.contains(FORBIDDEN_DATABASE_CHARS) {
        return Err(DocumentStoreError::validation(format!(
            "database name {database:?} contains a forbidden character"
        )));
    }

    Ok(())
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.collection)
    }
}

impl FromStr for Namespace {
    type Err = DocumentStoreError;

    /// Parses `database.collection`. Only the first dot separates the two parts, so
    /// collection names may themselves contain dots.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('.') {
            Some((database, collection)) => Namespace::new(database, collection),
            None => Err(DocumentStoreError::validation(format!(
                "namespace {s:?} is not of the form database.collection"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_on_first_dot() {
        let ns: Namespace = "testDB.system.profile".parse().unwrap();

        assert_eq!(ns.database(), "testDB");
        assert_eq!(ns.collection(), "system.profile");
        assert_eq!(ns.to_string(), "testDB.system.profile");
    }

    #[test]
    fn rejects_bad_names() {
        assert!(Namespace::new("", "c").is_err());
        assert!(Namespace::new("db", "").is_err());
        assert!(Namespace::new("my.db", "c").is_err());
        assert!(Namespace::new("db", "c$x").is_err());
        assert!("nodot".parse::<Namespace>().is_err());
    }
}
