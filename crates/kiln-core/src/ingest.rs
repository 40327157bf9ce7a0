//! Overlay ingestion
//!
//! Walks one or more input trees, expands environment references in the
//! raw text, splits multi-document YAML files and records every document
//! in the resource database. Ingestion does no semantic validation beyond
//! extracting the identity of each document.

use std::path::Path;

use walkdir::WalkDir;

use crate::database::ResourceDatabase;
use crate::envsubst;
use crate::error::Result;
use crate::resource::Document;

pub struct Ingester {
    db: ResourceDatabase,
}

impl Ingester {
    pub fn new() -> Self {
        Self {
            db: ResourceDatabase::new(),
        }
    }

    /// Ingest every YAML file under `root`
    pub fn ingest_tree(&mut self, root: impl AsRef<Path>) -> Result<()> {
        for entry in WalkDir::new(root.as_ref()).sort_by_file_name() {
            let entry = entry.map_err(|e| std::io::Error::other(e.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            match path.extension().and_then(|e| e.to_str()) {
                Some("yaml") | Some("yml") => {}
                _ => continue,
            }

            let text = std::fs::read_to_string(path)?;
            self.ingest_str(&text, &path.display().to_string())?;
        }
        Ok(())
    }

    /// Ingest the contents of a single (possibly multi-document) file
    pub fn ingest_str(&mut self, text: &str, path: &str) -> Result<()> {
        let expanded = envsubst::expand(text);
        for raw in split_documents(&expanded) {
            let doc = Document::parse(raw, path)?;
            tracing::debug!(id = %doc.id(), path, "ingested document");
            self.db.insert(doc, path)?;
        }
        Ok(())
    }

    pub fn finish(self) -> ResourceDatabase {
        self.db
    }
}

impl Default for Ingester {
    fn default() -> Self {
        Self::new()
    }
}

/// Split a YAML stream on `---` separators, dropping empty documents
fn split_documents(text: &str) -> Vec<&str> {
    let mut docs = Vec::new();
    let mut start = 0;
    let mut offset = 0;

    for line in text.split_inclusive('\n') {
        if line.trim_end() == "---" {
            docs.push(&text[start..offset]);
            start = offset + line.len();
        }
        offset += line.len();
    }
    docs.push(&text[start..]);

    docs.into_iter()
        .map(str::trim)
        .filter(|d| !d.is_empty() && !d.lines().all(|l| l.trim_start().starts_with('#')))
        .collect()
}
