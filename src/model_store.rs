use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, instrument, warn};

/// Persisted metadata for one uploaded 3D model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelRecord {
    /// Sequential identifier of the form `model_{n}`, never reused
    pub id: String,
    /// Display label
    pub name: String,
    /// Optional free-text description
    pub description: Option<String>,
    /// Retrieval URL of the model binary, fixed at creation
    pub file_url: String,
    /// Retrieval URL of the QR image; absent until the link code is attached
    pub qr_code_url: Option<String>,
    /// Creation timestamp, sole sort key for listings
    pub created_at: DateTime<Utc>,
}

/// Fields supplied when creating a record (id and createdAt are assigned by the store)
#[derive(Debug, Clone)]
pub struct NewModel {
    pub name: String,
    pub description: Option<String>,
    pub file_url: String,
    pub qr_code_url: Option<String>,
}

/// Partial update; only populated fields replace the stored ones
#[derive(Debug, Clone, Default)]
pub struct ModelPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub file_url: Option<String>,
    pub qr_code_url: Option<String>,
}

/// On-disk registry document
#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryDocument {
    #[serde(default)]
    models: Vec<ModelRecord>,
}

/// Flat-file registry of model records.
///
/// Every operation is a full load-modify-save cycle over one JSON document
/// with no locking; concurrent writers can lose updates and collide on ids.
/// Intended for single-writer deployments only.
///
/// Load and save failures are swallowed and logged: callers see an empty
/// registry rather than an error. That contract can mask data loss, so both
/// paths bump an error counter for visibility.
pub struct ModelStore {
    path: PathBuf,
}

impl ModelStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the registry document
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read all records; an absent or unreadable document yields an empty vec
    pub async fn load(&self) -> Vec<ModelRecord> {
        let data = match tokio::fs::read_to_string(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "Registry document not found, starting empty");
                return Vec::new();
            }
            Err(e) => {
                warn!(error = %e, path = %self.path.display(), "Failed to read registry document");
                metrics::counter!("registry.store.load_errors").increment(1);
                return Vec::new();
            }
        };

        match serde_json::from_str::<RegistryDocument>(&data) {
            Ok(doc) => doc.models,
            Err(e) => {
                warn!(error = %e, path = %self.path.display(), "Failed to parse registry document");
                metrics::counter!("registry.store.load_errors").increment(1);
                Vec::new()
            }
        }
    }

    /// Overwrite the document with the given records; failures are logged, not raised
    pub async fn save(&self, records: &[ModelRecord]) {
        let doc = RegistryDocument {
            models: records.to_vec(),
        };

        let json = match serde_json::to_string_pretty(&doc) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "Failed to serialize registry document");
                metrics::counter!("registry.store.save_errors").increment(1);
                return;
            }
        };

        if let Some(parent) = self.path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                warn!(error = %e, path = %parent.display(), "Failed to create registry directory");
                metrics::counter!("registry.store.save_errors").increment(1);
                return;
            }
        }

        if let Err(e) = tokio::fs::write(&self.path, json).await {
            warn!(error = %e, path = %self.path.display(), "Failed to write registry document");
            metrics::counter!("registry.store.save_errors").increment(1);
        }
    }

    /// Create a record with the next sequential id and the current timestamp
    #[instrument(skip(self, new), fields(name = %new.name))]
    pub async fn create(&self, new: NewModel) -> ModelRecord {
        let mut records = self.load().await;

        let record = ModelRecord {
            id: format!("model_{}", next_id(&records)),
            name: new.name,
            description: new.description,
            file_url: new.file_url,
            qr_code_url: new.qr_code_url,
            created_at: Utc::now(),
        };

        records.push(record.clone());
        self.save(&records).await;

        debug!(id = %record.id, "Model record created");
        metrics::counter!("registry.models.created").increment(1);

        record
    }

    /// Find one record by id
    pub async fn get(&self, id: &str) -> Option<ModelRecord> {
        self.load().await.into_iter().find(|m| m.id == id)
    }

    /// All records, newest first
    pub async fn list_all(&self) -> Vec<ModelRecord> {
        let mut records = self.load().await;
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records
    }

    /// Merge the populated patch fields over an existing record.
    ///
    /// Returns the updated record, or `None` (with the store untouched) when
    /// the id does not exist.
    #[instrument(skip(self, patch), fields(id = %id))]
    pub async fn update(&self, id: &str, patch: ModelPatch) -> Option<ModelRecord> {
        let mut records = self.load().await;
        let record = records.iter_mut().find(|m| m.id == id)?;

        if let Some(name) = patch.name {
            record.name = name;
        }
        if let Some(description) = patch.description {
            record.description = Some(description);
        }
        if let Some(file_url) = patch.file_url {
            record.file_url = file_url;
        }
        if let Some(qr_code_url) = patch.qr_code_url {
            record.qr_code_url = Some(qr_code_url);
        }

        let updated = record.clone();
        self.save(&records).await;

        Some(updated)
    }
}

/// Next sequential id: one more than the largest numeric suffix among the
/// given records, starting at 1. Recomputed from the current records on
/// every call; the store keeps no counter between operations.
fn next_id(records: &[ModelRecord]) -> u64 {
    records
        .iter()
        .filter_map(|m| m.id.strip_prefix("model_"))
        .filter_map(|suffix| suffix.parse::<u64>().ok())
        .max()
        .unwrap_or(0)
        + 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn store_in(dir: &tempfile::TempDir) -> ModelStore {
        ModelStore::new(dir.path().join("models.json"))
    }

    fn record(id: &str, created_at: DateTime<Utc>) -> ModelRecord {
        ModelRecord {
            id: id.to_string(),
            name: format!("{id} name"),
            description: None,
            file_url: format!("/uploads/{id}.glb"),
            qr_code_url: None,
            created_at,
        }
    }

    fn new_model(name: &str) -> NewModel {
        NewModel {
            name: name.to_string(),
            description: None,
            file_url: "/uploads/cube.glb".to_string(),
            qr_code_url: None,
        }
    }

    #[test]
    fn test_next_id_defaults_to_one() {
        assert_eq!(next_id(&[]), 1);
    }

    #[test]
    fn test_next_id_ignores_non_numeric_suffixes() {
        let records = vec![
            record("model_2", Utc::now()),
            record("model_junk", Utc::now()),
            record("other_9", Utc::now()),
        ];
        assert_eq!(next_id(&records), 3);
    }

    #[tokio::test]
    async fn test_load_missing_file_returns_empty() {
        let dir = tempdir().unwrap();
        assert!(store_in(&dir).load().await.is_empty());
    }

    #[tokio::test]
    async fn test_load_corrupt_file_returns_empty() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);
        tokio::fs::write(store.path(), "not json{").await.unwrap();
        assert!(store.load().await.is_empty());
    }

    #[tokio::test]
    async fn test_create_assigns_sequential_ids() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);

        let a = store.create(new_model("a")).await;
        let b = store.create(new_model("b")).await;
        let c = store.create(new_model("c")).await;

        assert_eq!(a.id, "model_1");
        assert_eq!(b.id, "model_2");
        assert_eq!(c.id, "model_3");
    }

    #[tokio::test]
    async fn test_create_resumes_from_max_suffix() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);
        store
            .save(&[record("model_2", Utc::now()), record("model_7", Utc::now())])
            .await;

        let created = store.create(new_model("next")).await;
        assert_eq!(created.id, "model_8");
    }

    #[tokio::test]
    async fn test_create_then_get_round_trip() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);

        let created = store
            .create(NewModel {
                name: "Cube".to_string(),
                description: Some("a cube".to_string()),
                file_url: "/uploads/cube.glb".to_string(),
                qr_code_url: None,
            })
            .await;

        let fetched = store.get(&created.id).await.unwrap();
        assert_eq!(fetched, created);
    }

    #[tokio::test]
    async fn test_get_unknown_id_is_absent() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);
        store.create(new_model("a")).await;

        assert!(store.get("model_999").await.is_none());
    }

    #[tokio::test]
    async fn test_list_all_sorted_newest_first() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);
        let t = |h| Utc.with_ymd_and_hms(2024, 3, 1, h, 0, 0).unwrap();
        store
            .save(&[
                record("model_1", t(8)),
                record("model_3", t(12)),
                record("model_2", t(10)),
            ])
            .await;

        let listed = store.list_all().await;
        let ids: Vec<_> = listed.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["model_3", "model_2", "model_1"]);
        assert!(listed.windows(2).all(|w| w[0].created_at >= w[1].created_at));
    }

    #[tokio::test]
    async fn test_update_missing_id_leaves_store_untouched() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);
        let created = store.create(new_model("a")).await;

        let result = store
            .update(
                "model_999",
                ModelPatch {
                    name: Some("changed".to_string()),
                    ..Default::default()
                },
            )
            .await;

        assert!(result.is_none());
        assert_eq!(store.load().await, vec![created]);
    }

    #[tokio::test]
    async fn test_update_merges_partial_fields() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);
        let created = store
            .create(NewModel {
                name: "Cube".to_string(),
                description: Some("a cube".to_string()),
                file_url: "/uploads/cube.glb".to_string(),
                qr_code_url: None,
            })
            .await;

        let updated = store
            .update(
                &created.id,
                ModelPatch {
                    qr_code_url: Some("/qr-codes/qr-model_1.png".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.name, "Cube");
        assert_eq!(updated.description.as_deref(), Some("a cube"));
        assert_eq!(updated.file_url, "/uploads/cube.glb");
        assert_eq!(updated.qr_code_url.as_deref(), Some("/qr-codes/qr-model_1.png"));
        assert_eq!(updated.created_at, created.created_at);
        assert_eq!(store.get(&created.id).await.unwrap(), updated);
    }

    #[test]
    fn test_wire_format_is_camel_case() {
        let json = serde_json::to_value(record(
            "model_1",
            Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap(),
        ))
        .unwrap();

        assert!(json.get("fileUrl").is_some());
        assert!(json.get("qrCodeUrl").is_some());
        assert!(json.get("createdAt").is_some());
        assert!(json["createdAt"].as_str().unwrap().starts_with("2024-03-01T08:00:00"));
        assert!(json["description"].is_null());
    }

    #[tokio::test]
    async fn test_document_wraps_models_array() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);
        store.create(new_model("a")).await;

        let raw = tokio::fs::read_to_string(store.path()).await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert!(value["models"].is_array());
        assert_eq!(value["models"].as_array().unwrap().len(), 1);
    }
}
