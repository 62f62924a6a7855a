//! JSON file store.
//!
//! `active_threads.json` holds `{ "<uid>": [ { "<filter id>": criteria }, .. ] }`
//! and `filters.json` holds `{ "<filter id>": { "uid": .., "criteria": .. } }`.
//! Entries that fail to parse are skipped with a warning so one bad record does
//! not hide the rest.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{ActiveFilters, Definitions, FilterStore};
use crate::Result;
use crate::domain::{FilterCriteria, FilterDefinition, FilterId, UserId};

const ACTIVE_FILE: &str = "active_threads.json";
const DEFINITIONS_FILE: &str = "filters.json";

/// Filter store backed by two JSON files in a data directory.
#[derive(Debug)]
pub struct JsonFileStore {
    active_path: PathBuf,
    definitions_path: PathBuf,
    /// Serializes read-modify-write cycles.
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        let data_dir = data_dir.as_ref();
        Self {
            active_path: data_dir.join(ACTIVE_FILE),
            definitions_path: data_dir.join(DEFINITIONS_FILE),
            write_lock: Mutex::new(()),
        }
    }

    pub fn active_path(&self) -> &Path {
        &self.active_path
    }

    pub fn definitions_path(&self) -> &Path {
        &self.definitions_path
    }

    async fn read_active(&self) -> ActiveFilters {
        match read_json(&self.active_path).await {
            Some(value) => parse_active(value),
            None => ActiveFilters::new(),
        }
    }

    async fn write_active(&self, active: &ActiveFilters) -> Result<()> {
        let mut users = Map::new();
        for (user, filters) in active {
            let entries = filters
                .iter()
                .map(|(id, criteria)| {
                    let mut entry = Map::new();
                    entry.insert(id.to_string(), serde_json::to_value(criteria)?);
                    Ok(Value::Object(entry))
                })
                .collect::<std::result::Result<Vec<_>, serde_json::Error>>()?;
            users.insert(user.to_string(), Value::Array(entries));
        }
        write_json(&self.active_path, &Value::Object(users)).await
    }

    async fn read_definitions(&self) -> Definitions {
        match read_json(&self.definitions_path).await {
            Some(value) => parse_definitions(value),
            None => Definitions::new(),
        }
    }

    async fn write_definitions(&self, definitions: &Definitions) -> Result<()> {
        write_json(&self.definitions_path, &serde_json::to_value(definitions)?).await
    }
}

#[async_trait]
impl FilterStore for JsonFileStore {
    async fn load_active(&self) -> Result<ActiveFilters> {
        Ok(self.read_active().await)
    }

    async fn save_active_user(
        &self,
        user: UserId,
        filters: &[(FilterId, FilterCriteria)],
    ) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut active = self.read_active().await;
        super::set_user(&mut active, user, filters);
        self.write_active(&active).await
    }

    async fn replace_active_filter(
        &self,
        user: UserId,
        filter_id: &FilterId,
        criteria: &FilterCriteria,
    ) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let mut active = self.read_active().await;
        if !super::replace_filter(&mut active, user, filter_id, criteria) {
            return Ok(false);
        }
        self.write_active(&active).await?;
        Ok(true)
    }

    async fn remove_active_filter(&self, user: UserId, filter_id: &FilterId) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let mut active = self.read_active().await;
        if !super::remove_filter(&mut active, user, filter_id) {
            return Ok(false);
        }
        self.write_active(&active).await?;
        Ok(true)
    }

    async fn load_definitions(&self) -> Result<Definitions> {
        Ok(self.read_definitions().await)
    }

    async fn put_definition(
        &self,
        filter_id: &FilterId,
        definition: &FilterDefinition,
    ) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut definitions = self.read_definitions().await;
        definitions.insert(filter_id.clone(), definition.clone());
        self.write_definitions(&definitions).await
    }

    async fn remove_definition(&self, filter_id: &FilterId) -> Result<Option<FilterDefinition>> {
        let _guard = self.write_lock.lock().await;
        let mut definitions = self.read_definitions().await;
        let removed = definitions.remove(filter_id);
        if removed.is_some() {
            self.write_definitions(&definitions).await?;
        }
        Ok(removed)
    }
}

/// Read a JSON document, or `None` if the file is missing or unreadable.
async fn read_json(path: &Path) -> Option<Value> {
    let text = match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("No store file at {:?}", path);
            return None;
        }
        Err(e) => {
            warn!("Failed to read store file {:?}: {}", path, e);
            return None;
        }
    };
    if text.trim().is_empty() {
        return None;
    }
    match serde_json::from_str(&text) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Store file {:?} is not valid JSON, treating as empty: {}", path, e);
            None
        }
    }
}

/// Write through a temp file and rename so readers never see a partial file.
async fn write_json(path: &Path, value: &Value) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await?;
    }

    let temp_path = path.with_extension("tmp");
    tokio::fs::write(&temp_path, &json).await?;
    tokio::fs::rename(&temp_path, path).await?;
    Ok(())
}

fn parse_active(value: Value) -> ActiveFilters {
    let mut active = ActiveFilters::new();
    let Value::Object(users) = value else {
        warn!("Active filter table is not an object, treating as empty");
        return active;
    };

    for (uid, entries) in users {
        let Ok(user) = uid.trim().parse::<i64>().map(UserId) else {
            warn!(uid = %uid, "Skipping active filters of malformed user id");
            continue;
        };
        let Value::Array(entries) = entries else {
            warn!(user_id = %user, "Skipping malformed active filter list");
            continue;
        };

        let mut filters: Vec<(FilterId, FilterCriteria)> = Vec::new();
        for entry in entries {
            let Value::Object(entry) = entry else {
                warn!(user_id = %user, "Skipping malformed active filter entry");
                continue;
            };
            for (id, criteria) in entry {
                match serde_json::from_value::<FilterCriteria>(criteria) {
                    Ok(criteria) => {
                        if !filters.iter().any(|(f, _)| f.as_str() == id) {
                            filters.push((FilterId::new(id), criteria));
                        }
                    }
                    Err(e) => {
                        warn!(user_id = %user, filter_id = %id, "Skipping unreadable criteria: {}", e)
                    }
                }
            }
        }
        if !filters.is_empty() {
            active.insert(user, filters);
        }
    }
    active
}

fn parse_definitions(value: Value) -> Definitions {
    let mut definitions = Definitions::new();
    let Value::Object(entries) = value else {
        warn!("Filter definitions table is not an object, treating as empty");
        return definitions;
    };

    for (id, definition) in entries {
        match serde_json::from_value::<FilterDefinition>(definition) {
            Ok(definition) => {
                definitions.insert(FilterId::new(id), definition);
            }
            Err(e) => warn!(filter_id = %id, "Skipping unreadable filter definition: {}", e),
        }
    }
    definitions
}

#[cfg(test)]
mod tests {
    use super::*;

    fn criteria(name: &str) -> FilterCriteria {
        FilterCriteria::brand(name, format!("https://www.ss.com/en/transport/cars/{name}/"))
    }

    #[tokio::test]
    async fn test_missing_files_read_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("nested"));
        assert!(store.load_active().await.unwrap().is_empty());
        assert!(store.load_definitions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_active_round_trip_layout() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        let user = UserId(123);
        let filters = vec![
            (FilterId::new("f1"), criteria("toyota")),
            (FilterId::new("f2"), criteria("bmw")),
        ];
        store.save_active_user(user, &filters).await.unwrap();

        let raw: Value =
            serde_json::from_str(&std::fs::read_to_string(store.active_path()).unwrap()).unwrap();
        assert_eq!(raw["123"][0]["f1"]["name_car"], "toyota");
        assert_eq!(raw["123"][1]["f2"]["name_car"], "bmw");
        assert!(!dir.path().join("active_threads.tmp").exists());

        let active = store.load_active().await.unwrap();
        assert_eq!(active[&user], filters);

        store.save_active_user(user, &[]).await.unwrap();
        assert!(store.load_active().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        std::fs::write(store.active_path(), "{ not json").unwrap();
        std::fs::write(store.definitions_path(), "[1, 2, 3]").unwrap();

        assert!(store.load_active().await.unwrap().is_empty());
        assert!(store.load_definitions().await.unwrap().is_empty());

        // a write replaces the corrupt file
        store
            .save_active_user(UserId(1), &[(FilterId::new("f1"), criteria("audi"))])
            .await
            .unwrap();
        assert_eq!(store.load_active().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_bad_entries_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        let raw = r#"{
            "1": [
                {"good": {"name_car": "Audi", "url": "https://www.ss.com/en/transport/cars/audi/"}},
                {"bad": {"name_car": "Audi", "colour": "red"}}
            ],
            "not-a-user": [{"x": {"name_car": "BMW"}}],
            "2": "oops"
        }"#;
        std::fs::write(store.active_path(), raw).unwrap();

        let active = store.load_active().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[&UserId(1)].len(), 1);
        assert_eq!(active[&UserId(1)][0].0, FilterId::new("good"));
    }

    #[tokio::test]
    async fn test_definitions_and_active_edits() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        let id = FilterId::new("f1");
        let def = FilterDefinition {
            uid: UserId(5),
            criteria: criteria("volvo"),
        };

        store.put_definition(&id, &def).await.unwrap();
        let reopened = JsonFileStore::new(dir.path());
        assert_eq!(reopened.load_definitions().await.unwrap()[&id], def);

        store
            .save_active_user(UserId(5), &[(id.clone(), def.criteria.clone())])
            .await
            .unwrap();
        assert!(
            store
                .replace_active_filter(UserId(5), &id, &criteria("saab"))
                .await
                .unwrap()
        );
        assert_eq!(
            store.load_active().await.unwrap()[&UserId(5)][0].1.brand.as_deref(),
            Some("saab")
        );
        assert!(store.remove_active_filter(UserId(5), &id).await.unwrap());
        assert_eq!(store.remove_definition(&id).await.unwrap(), Some(def));
        assert!(store.load_definitions().await.unwrap().is_empty());
    }
}
