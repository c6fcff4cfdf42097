//! In-memory entity store backed by a JSON data file.
//!
//! The data file maps entity kinds to lists of records:
//! `{ "People": [ {...}, ... ], "WorkHistories": [ ... ] }`.
//! Records are kept as raw JSON and projected into [`Value`]s on fetch.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::engine::state::Subject;
use crate::error::{EngineError, EngineResult};
use crate::store::{EntityStore, EqualityFilter, SubjectRepository};
use crate::value::{parse_datetime, Value};

type Tables = BTreeMap<String, Vec<serde_json::Value>>;

/// Entity store holding every table in memory.
#[derive(Debug, Default)]
pub struct MemoryEntityStore {
    tables: RwLock<Tables>,
}

impl MemoryEntityStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from a data document.
    pub fn from_json(document: serde_json::Value) -> EngineResult<Self> {
        let serde_json::Value::Object(root) = document else {
            return Err(EngineError::Parse(
                "Data document must be an object of entity lists".to_string(),
            ));
        };

        let mut tables = Tables::new();
        for (kind, records) in root {
            match records {
                serde_json::Value::Array(records) => {
                    tables.insert(kind, records);
                }
                _ => {
                    return Err(EngineError::Parse(format!(
                        "Entity '{}' must be a list of records",
                        kind
                    )))
                }
            }
        }

        Ok(Self {
            tables: RwLock::new(tables),
        })
    }

    /// Load a data file.
    pub async fn load_json(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        let contents = tokio::fs::read_to_string(path).await?;
        let document: serde_json::Value = serde_json::from_str(&contents)?;
        let store = Self::from_json(document)?;
        tracing::info!(path = %path.display(), "Loaded data file");
        Ok(store)
    }

    /// Write every table back to a data file.
    pub async fn save_json(&self, path: impl AsRef<Path>) -> EngineResult<()> {
        let path = path.as_ref();
        let contents = serde_json::to_string_pretty(&self.to_json().await)?;
        tokio::fs::write(path, contents).await?;
        tracing::info!(path = %path.display(), "Saved data file");
        Ok(())
    }

    /// Snapshot of the whole store as a data document.
    pub async fn to_json(&self) -> serde_json::Value {
        let tables = self.tables.read().await;
        serde_json::Value::Object(
            tables
                .iter()
                .map(|(kind, records)| (kind.clone(), serde_json::Value::Array(records.clone())))
                .collect(),
        )
    }

    /// Add records to a kind, creating it if needed.
    pub async fn insert(&self, kind: &str, records: Vec<serde_json::Value>) {
        let mut tables = self.tables.write().await;
        let key = resolve_kind(&tables, kind).unwrap_or_else(|| kind.to_string());
        tables.entry(key).or_default().extend(records);
    }

    /// Raw records of a kind.
    pub async fn records(&self, kind: &str) -> EngineResult<Vec<serde_json::Value>> {
        let tables = self.tables.read().await;
        let key = resolve_kind(&tables, kind)
            .ok_or_else(|| EngineError::EntityNotFound(kind.to_string()))?;
        Ok(tables.get(&key).cloned().unwrap_or_default())
    }

    async fn matching(&self, kind: &str, filter: &EqualityFilter) -> EngineResult<Vec<Value>> {
        let tables = self.tables.read().await;
        let key = resolve_kind(&tables, kind)
            .ok_or_else(|| EngineError::EntityNotFound(kind.to_string()))?;

        let matches: Vec<Value> = tables
            .get(&key)
            .map(|records| {
                records
                    .iter()
                    .map(Value::project)
                    .filter(|record| matches_filter(record, filter))
                    .collect()
            })
            .unwrap_or_default();

        tracing::debug!(entity = %key, matches = matches.len(), "Filtered entities");
        Ok(matches)
    }
}

/// Case-insensitive kind lookup; exact spelling wins.
fn resolve_kind(tables: &Tables, kind: &str) -> Option<String> {
    if tables.contains_key(kind) {
        return Some(kind.to_string());
    }
    tables
        .keys()
        .find(|key| key.eq_ignore_ascii_case(kind))
        .cloned()
}

fn matches_filter(record: &Value, filter: &EqualityFilter) -> bool {
    filter.iter().all(|(field, expected)| {
        let actual = record.field(field).cloned().unwrap_or_default();
        field_matches(&actual, expected)
    })
}

/// Trimmed string forms must agree. A date field also matches a string
/// naming the same instant, whatever its spelling.
fn field_matches(actual: &Value, expected: &Value) -> bool {
    if let (Value::DateTime(actual), Value::String(expected)) = (actual, expected) {
        if let Some(expected) = parse_datetime(expected) {
            return *actual == expected;
        }
    }
    actual.to_string().trim() == expected.to_string().trim()
}

#[async_trait]
impl EntityStore for MemoryEntityStore {
    async fn fetch_one(&self, kind: &str, filter: &EqualityFilter) -> EngineResult<Value> {
        let mut matches = self.matching(kind, filter).await?;
        match matches.len() {
            0 => Ok(Value::Null),
            1 => Ok(matches.remove(0)),
            n => Err(EngineError::Store(format!(
                "Expected at most one '{}' entity, found {}",
                kind, n
            ))),
        }
    }

    async fn fetch_list(&self, kind: &str, filter: &EqualityFilter) -> EngineResult<Vec<Value>> {
        self.matching(kind, filter).await
    }
}

/// Subjects stored as records of one kind in a [`MemoryEntityStore`].
pub struct MemorySubjectRepository {
    store: Arc<MemoryEntityStore>,
    kind: String,
    id_field: String,
    state_field: String,
}

impl MemorySubjectRepository {
    pub fn new(
        store: Arc<MemoryEntityStore>,
        kind: impl Into<String>,
        id_field: impl Into<String>,
        state_field: impl Into<String>,
    ) -> Self {
        Self {
            store,
            kind: kind.into(),
            id_field: id_field.into(),
            state_field: state_field.into(),
        }
    }
}

#[async_trait]
impl SubjectRepository for MemorySubjectRepository {
    async fn load_subjects(&self) -> EngineResult<Vec<Subject>> {
        self.store
            .records(&self.kind)
            .await?
            .iter()
            .map(|record| Subject::from_record(record, &self.id_field, &self.state_field))
            .collect()
    }

    async fn commit(&self, subjects: &[Subject]) -> EngineResult<()> {
        let mut tables = self.store.tables.write().await;
        let key = resolve_kind(&tables, &self.kind)
            .ok_or_else(|| EngineError::EntityNotFound(self.kind.clone()))?;
        let records = tables.entry(key).or_default();

        let mut updated = 0usize;
        for subject in subjects {
            let slot = records.iter_mut().find(|record| {
                record
                    .get(&self.id_field)
                    .map(|id| Value::from_json(id).to_string() == subject.id)
                    .unwrap_or(false)
            });

            match slot {
                Some(record) => {
                    *record = subject.to_record();
                    updated += 1;
                }
                None => records.push(subject.to_record()),
            }
        }

        tracing::info!(kind = %self.kind, updated, total = subjects.len(), "Committed subjects");
        Ok(())
    }
}
