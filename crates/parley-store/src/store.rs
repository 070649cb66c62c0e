//! The durable store: two mutex-guarded collections persisted as JSON files.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;

use parley_types::RecordId;

use crate::document::Document;
use crate::error::{StoreError, StoreResult};
use crate::predicate::Predicate;

/// The two logical collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Users,
    Messages,
}

impl Collection {
    pub const ALL: [Collection; 2] = [Collection::Users, Collection::Messages];

    /// Returns the on-disk file name for this collection.
    pub fn file_name(self) -> &'static str {
        match self {
            Collection::Users => "users.json",
            Collection::Messages => "messages.json",
        }
    }
}

/// Durable two-collection document store.
///
/// # Invariants
///
/// - After a successful mutation returns, the collection file on disk holds
///   the mutated state (full rewrite, atomic rename).
/// - A failed persist leaves the in-memory collection unchanged, so memory
///   and disk never diverge.
/// - Assigned record ids are monotonic within a process.
#[derive(Debug)]
pub struct Store {
    data_dir: PathBuf,
    users: Mutex<Vec<Document>>,
    messages: Mutex<Vec<Document>>,
    next_seq: AtomicU64,
}

impl Store {
    /// Opens the store, creating the data directory and empty collection
    /// files when missing.
    pub fn open(data_dir: impl Into<PathBuf>) -> StoreResult<Self> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir)?;

        let users = load_collection(&data_dir.join(Collection::Users.file_name()))?;
        let messages = load_collection(&data_dir.join(Collection::Messages.file_name()))?;

        tracing::info!(
            dir = %data_dir.display(),
            users = users.len(),
            messages = messages.len(),
            "opened store"
        );

        Ok(Self {
            data_dir,
            users: Mutex::new(users),
            messages: Mutex::new(messages),
            next_seq: AtomicU64::new(0),
        })
    }

    /// Returns the data directory path.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Inserts a document, assigning an `id` when absent. Returns the id.
    pub fn insert(&self, collection: Collection, mut doc: Document) -> StoreResult<RecordId> {
        let id = match doc.get("id").and_then(Value::as_str) {
            Some(existing) => RecordId::new(existing),
            None => {
                let id = self.assign_id();
                doc.insert("id".to_string(), Value::String(id.as_str().to_string()));
                id
            }
        };

        let guard = self.collection(collection);
        let mut docs = guard.lock().unwrap();
        let mut next = docs.clone();
        next.push(doc);
        self.persist(collection, &next)?;
        *docs = next;
        Ok(id)
    }

    /// Returns a snapshot of every document matching `predicate`.
    pub fn read(&self, collection: Collection, predicate: &Predicate) -> Vec<Document> {
        let guard = self.collection(collection);
        let docs = guard.lock().unwrap();
        docs.iter().filter(|d| predicate.matches(d)).cloned().collect()
    }

    /// Overwrites `assignments` fields on every matching document.
    /// Returns the number of documents mutated.
    pub fn update(
        &self,
        collection: Collection,
        predicate: &Predicate,
        assignments: &Document,
    ) -> StoreResult<usize> {
        let guard = self.collection(collection);
        let mut docs = guard.lock().unwrap();

        let mut next = docs.clone();
        let mut modified = 0;
        for doc in &mut next {
            if predicate.matches(doc) {
                for (field, value) in assignments {
                    doc.insert(field.clone(), value.clone());
                }
                modified += 1;
            }
        }

        if modified > 0 {
            self.persist(collection, &next)?;
            *docs = next;
        }
        Ok(modified)
    }

    /// Removes every matching document. Returns the number removed.
    pub fn delete(&self, collection: Collection, predicate: &Predicate) -> StoreResult<usize> {
        let guard = self.collection(collection);
        let mut docs = guard.lock().unwrap();

        let next: Vec<Document> = docs.iter().filter(|d| !predicate.matches(d)).cloned().collect();
        let removed = docs.len() - next.len();

        if removed > 0 {
            self.persist(collection, &next)?;
            *docs = next;
        }
        Ok(removed)
    }

    fn collection(&self, collection: Collection) -> &Mutex<Vec<Document>> {
        match collection {
            Collection::Users => &self.users,
            Collection::Messages => &self.messages,
        }
    }

    /// Assigns the next record id: `"{unix_millis}-{seq}"`.
    fn assign_id(&self) -> RecordId {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        RecordId::new(format!("{millis}-{seq}"))
    }

    /// Rewrites the collection file in full: serialize to a sibling temp
    /// file, then rename over the live file.
    fn persist(&self, collection: Collection, docs: &[Document]) -> StoreResult<()> {
        let path = self.data_dir.join(collection.file_name());
        let tmp = path.with_extension("json.tmp");

        let json = serde_json::to_string_pretty(docs).map_err(std::io::Error::other)?;
        if let Err(e) = fs::write(&tmp, json).and_then(|()| fs::rename(&tmp, &path)) {
            tracing::error!(
                file = %path.display(),
                error = %e,
                "collection persist failed, mutation rolled back"
            );
            return Err(StoreError::Io(e));
        }
        Ok(())
    }
}

/// Loads a collection file, creating an empty one when missing.
fn load_collection(path: &Path) -> StoreResult<Vec<Document>> {
    if !path.exists() {
        fs::write(path, "[]")?;
        return Ok(Vec::new());
    }
    let raw = fs::read_to_string(path)?;
    serde_json::from_str(&raw).map_err(|source| StoreError::Corrupt {
        path: path.to_path_buf(),
        source,
    })
}
