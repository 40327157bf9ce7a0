//! In-memory resource database
//!
//! Populated once by the ingester, read-only afterwards. Lookups are by
//! full `ResourceId`; a reference with an empty namespace must be
//! defaulted by the caller before lookup.

use std::collections::HashMap;

use crate::error::{CoreError, Result};
use crate::resource::{Document, ResourceId};

#[derive(Debug, Default)]
pub struct ResourceDatabase {
    documents: HashMap<ResourceId, Document>,
}

impl ResourceDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a document; duplicate identities are a hard error
    pub fn insert(&mut self, doc: Document, path: &str) -> Result<()> {
        let id = doc.id().clone();
        if self.documents.contains_key(&id) {
            return Err(CoreError::DuplicateResource {
                id,
                path: path.to_string(),
            });
        }
        self.documents.insert(id, doc);
        Ok(())
    }

    pub fn get(&self, id: &ResourceId) -> Option<&Document> {
        self.documents.get(id)
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ResourceId, &Document)> {
        self.documents.iter()
    }

    /// All documents of a given kind within a group
    pub fn by_kind<'a>(&'a self, group: &'a str, kind: &'a str) -> impl Iterator<Item = &'a Document> {
        self.documents
            .values()
            .filter(move |d| d.id().group == group && d.id().kind == kind)
    }
}
