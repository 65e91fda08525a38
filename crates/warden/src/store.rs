//! Snapshot store: durable, per-organization persistence.
//!
//! One SQLite file per organization holds four kinds of rows:
//!
//! - cached responses, keyed by locator, with their validators
//! - entity records, keyed by repository full name, merged field by field
//! - collection runs (who harvested, when)
//! - deferred calls still pending when the last run ended
//!
//! Every write is visible to the next read on the same store, and survives
//! the process.

use std::path::Path;

use chrono::{DateTime, Utc};
use sea_orm::{
    DatabaseConnection, DbErr, EntityTrait, PaginatorTrait, QueryOrder, Set, TransactionTrait,
    sea_query::OnConflict,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::db::{connect_and_migrate, sqlite_url, store_path};
use crate::entity::{api_cache, collection_run, deferred_call, entity_record};
use crate::http::{HttpHeaders, header_get};
use crate::locator::Locator;
use crate::retry::DeferredCall;

/// Errors that can occur in the snapshot store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error from sea-orm.
    #[error("Database error: {0}")]
    Database(#[from] DbErr),

    /// The store directory could not be created.
    #[error("Could not prepare store directory: {0}")]
    Io(#[from] std::io::Error),

    /// A stored row does not have the shape it must have.
    #[error("Corrupt store row {key}: {message}")]
    Corrupt { key: String, message: String },
}

impl StoreError {
    #[inline]
    pub fn corrupt(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Corrupt {
            key: key.into(),
            message: message.into(),
        }
    }
}

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Opaque tokens from a prior response, used to ask "has this changed?".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validators {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

impl Validators {
    /// Collect validators from response headers.
    #[must_use]
    pub fn from_headers(headers: &HttpHeaders) -> Self {
        Self {
            etag: header_get(headers, "etag").map(str::to_string),
            last_modified: header_get(headers, "last-modified").map(str::to_string),
        }
    }

    /// The conditional header to send, if any.
    ///
    /// Last-Modified wins when both validators are present.
    #[must_use]
    pub fn conditional_header(&self) -> Option<(String, String)> {
        if let Some(last_modified) = &self.last_modified {
            return Some(("If-Modified-Since".to_string(), last_modified.clone()));
        }
        self.etag
            .as_ref()
            .map(|etag| ("If-None-Match".to_string(), etag.clone()))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.etag.is_none() && self.last_modified.is_none()
    }
}

/// A cached response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheRecord {
    pub locator: String,
    pub validators: Validators,
    pub body: Value,
    pub status: u16,
    pub cached_at: DateTime<Utc>,
}

impl CacheRecord {
    /// A record for a response fetched now.
    #[must_use]
    pub fn new(locator: &Locator, validators: Validators, body: Value, status: u16) -> Self {
        Self {
            locator: locator.to_string(),
            validators,
            body,
            status,
            cached_at: Utc::now(),
        }
    }
}

impl From<api_cache::Model> for CacheRecord {
    fn from(model: api_cache::Model) -> Self {
        Self {
            locator: model.locator,
            validators: Validators {
                etag: model.etag,
                last_modified: model.last_modified,
            },
            body: model.body,
            status: u16::try_from(model.status).unwrap_or_default(),
            cached_at: model.cached_at.with_timezone(&Utc),
        }
    }
}

/// Accumulated fields for one harvested entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityRecord {
    pub key: String,
    pub fields: Map<String, Value>,
    pub updated_at: DateTime<Utc>,
}

impl EntityRecord {
    fn from_model(model: entity_record::Model) -> Result<Self> {
        let fields = match model.fields {
            Value::Object(map) => map,
            other => {
                return Err(StoreError::corrupt(
                    &model.key,
                    format!("fields must be an object, found {other}"),
                ));
            }
        };
        Ok(Self {
            key: model.key,
            fields,
            updated_at: model.updated_at.with_timezone(&Utc),
        })
    }

    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    #[must_use]
    pub fn get_bool(&self, field: &str) -> Option<bool> {
        self.get(field).and_then(Value::as_bool)
    }

    #[must_use]
    pub fn get_u64(&self, field: &str) -> Option<u64> {
        self.get(field).and_then(Value::as_u64)
    }

    #[must_use]
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(Value::as_str)
    }
}

/// Metadata about one harvest run against a store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunRecord {
    pub collected_as: String,
    pub collected_at: DateTime<Utc>,
}

/// Durable key-value persistence for one organization.
pub struct SnapshotStore {
    db: DatabaseConnection,
    // Read-modify-write of entity fields must not interleave.
    merge_lock: Mutex<()>,
}

impl SnapshotStore {
    /// Open (creating and migrating if needed) the store at a database URL.
    pub async fn open(database_url: &str) -> Result<Self> {
        let db = connect_and_migrate(database_url).await?;
        Ok(Self::from_connection(db))
    }

    /// Open the store for one organization under `dir`.
    pub async fn open_for_org(dir: &Path, org: &str) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = store_path(dir, org);
        tracing::debug!(path = %path.display(), "Opening snapshot store");
        Self::open(&sqlite_url(&path)).await
    }

    /// An in-memory store that vanishes with the process.
    pub async fn in_memory() -> Result<Self> {
        Self::open("sqlite::memory:").await
    }

    /// Wrap an already-migrated connection.
    #[must_use]
    pub fn from_connection(db: DatabaseConnection) -> Self {
        Self {
            db,
            merge_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    // ---------- Cached responses ----------

    /// Get the cached response for a locator.
    pub async fn get(&self, locator: &Locator) -> Result<Option<CacheRecord>> {
        let model = api_cache::Entity::find_by_id(locator.as_str().to_string())
            .one(&self.db)
            .await?;
        Ok(model.map(CacheRecord::from))
    }

    /// Store a response, replacing any previous record for its locator.
    pub async fn put(&self, record: &CacheRecord) -> Result<()> {
        let model = api_cache::ActiveModel {
            locator: Set(record.locator.clone()),
            etag: Set(record.validators.etag.clone()),
            last_modified: Set(record.validators.last_modified.clone()),
            body: Set(record.body.clone()),
            status: Set(i32::from(record.status)),
            cached_at: Set(record.cached_at.fixed_offset()),
        };

        api_cache::Entity::insert(model)
            .on_conflict(
                OnConflict::column(api_cache::Column::Locator)
                    .update_columns([
                        api_cache::Column::Etag,
                        api_cache::Column::LastModified,
                        api_cache::Column::Body,
                        api_cache::Column::Status,
                        api_cache::Column::CachedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await?;

        Ok(())
    }

    /// Number of cached responses.
    pub async fn cached_count(&self) -> Result<u64> {
        Ok(api_cache::Entity::find().count(&self.db).await?)
    }

    // ---------- Entity records ----------

    /// Get one entity record.
    pub async fn get_entity(&self, key: &str) -> Result<Option<EntityRecord>> {
        entity_record::Entity::find_by_id(key.to_string())
            .one(&self.db)
            .await?
            .map(EntityRecord::from_model)
            .transpose()
    }

    /// Merge `partial` into the record for `key`, creating it if absent.
    ///
    /// Fields named in `partial` are overwritten; every other stored field is
    /// kept. Returns the merged record.
    pub async fn merge_entity(
        &self,
        key: &str,
        partial: &Map<String, Value>,
    ) -> Result<EntityRecord> {
        let _guard = self.merge_lock.lock().await;

        let mut fields = match self.get_entity(key).await? {
            Some(existing) => existing.fields,
            None => Map::new(),
        };
        for (name, value) in partial {
            fields.insert(name.clone(), value.clone());
        }

        let updated_at = Utc::now();
        let model = entity_record::ActiveModel {
            key: Set(key.to_string()),
            fields: Set(Value::Object(fields.clone())),
            updated_at: Set(updated_at.fixed_offset()),
        };

        entity_record::Entity::insert(model)
            .on_conflict(
                OnConflict::column(entity_record::Column::Key)
                    .update_columns([
                        entity_record::Column::Fields,
                        entity_record::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await?;

        tracing::debug!(key, merged = partial.len(), "Merged entity fields");
        Ok(EntityRecord {
            key: key.to_string(),
            fields,
            updated_at,
        })
    }

    /// All entity records, ordered by key.
    pub async fn entities(&self) -> Result<Vec<EntityRecord>> {
        entity_record::Entity::find()
            .order_by_asc(entity_record::Column::Key)
            .all(&self.db)
            .await?
            .into_iter()
            .map(EntityRecord::from_model)
            .collect()
    }

    // ---------- Run metadata ----------

    /// Record that a run by `collected_as` happened now.
    pub async fn record_run(&self, collected_as: &str) -> Result<RunRecord> {
        let collected_at = Utc::now();
        let model = collection_run::ActiveModel {
            id: Set(Uuid::new_v4()),
            collected_as: Set(collected_as.to_string()),
            collected_at: Set(collected_at.fixed_offset()),
        };
        collection_run::Entity::insert(model)
            .exec_without_returning(&self.db)
            .await?;

        Ok(RunRecord {
            collected_as: collected_as.to_string(),
            collected_at,
        })
    }

    /// The most recent run, if any.
    pub async fn last_run(&self) -> Result<Option<RunRecord>> {
        let model = collection_run::Entity::find()
            .order_by_desc(collection_run::Column::CollectedAt)
            .one(&self.db)
            .await?;
        Ok(model.map(|m| RunRecord {
            collected_as: m.collected_as,
            collected_at: m.collected_at.with_timezone(&Utc),
        }))
    }

    // ---------- Carried-forward deferred calls ----------

    /// Replace the persisted set of pending deferred calls.
    ///
    /// The old set is removed and the new one written in one transaction,
    /// so a failure leaves the previous set in place.
    pub async fn save_deferred(&self, calls: &[DeferredCall]) -> Result<()> {
        let txn = self.db.begin().await?;
        deferred_call::Entity::delete_many().exec(&txn).await?;
        if calls.is_empty() {
            txn.commit().await?;
            return Ok(());
        }

        let recorded_at = Utc::now().fixed_offset();
        let models = calls.iter().map(|call| deferred_call::ActiveModel {
            locator: Set(call.locator.to_string()),
            entity_key: Set(call.entity_key.clone()),
            field: Set(call.field.clone()),
            recorded_at: Set(recorded_at),
        });
        deferred_call::Entity::insert_many(models)
            .on_conflict(
                OnConflict::column(deferred_call::Column::Locator)
                    .update_columns([
                        deferred_call::Column::EntityKey,
                        deferred_call::Column::Field,
                        deferred_call::Column::RecordedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(&txn)
            .await?;
        txn.commit().await?;

        tracing::debug!(count = calls.len(), "Saved pending deferred calls");
        Ok(())
    }

    /// The persisted pending deferred calls, oldest first.
    ///
    /// Rows stay in place until the next [`save_deferred`](Self::save_deferred)
    /// replaces them, so a run that dies early still leaves them for the next.
    pub async fn load_deferred(&self) -> Result<Vec<DeferredCall>> {
        let models = deferred_call::Entity::find()
            .order_by_asc(deferred_call::Column::RecordedAt)
            .all(&self.db)
            .await?;

        models
            .into_iter()
            .map(|m| {
                let locator = Locator::parse(&m.locator)
                    .map_err(|e| StoreError::corrupt(&m.locator, e.to_string()))?;
                Ok(DeferredCall {
                    locator,
                    entity_key: m.entity_key,
                    field: m.field,
                })
            })
            .collect()
    }
}
