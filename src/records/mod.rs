//! Record access layer
//!
//! Generic list/get/create/update over the registered tables, always scoped
//! to the acting user. Model-supplied payloads are filtered to the writable
//! columns, coerced to the declared types, and completed with table defaults
//! before anything reaches the store.

pub mod coercion;
pub mod defaults;
pub mod postgres;
pub mod store;
pub mod value;

pub use postgres::PgRecordStore;
pub use store::{InMemoryRecordStore, ListQuery, RecordStore};
pub use value::{FieldValue, Fields, Record};

use crate::config::DEFAULT_CURRENCY;
use crate::error::{FieldIssue, OrchestrationError};
use crate::registry::{TableDescriptor, TableKey, TableRegistry};
use crate::Result;
use rust_decimal::Decimal;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

pub const LIST_LIMIT_MAX: i64 = 50;

/// Updated record plus coercion problems that did not block the write.
#[derive(Debug, Clone)]
pub struct UpdateOutcome {
    pub record: Record,
    pub warnings: Vec<FieldIssue>,
}

pub struct RecordAccess {
    registry: Arc<TableRegistry>,
    store: Arc<dyn RecordStore>,
    default_currency: String,
}

impl RecordAccess {
    pub fn new(registry: Arc<TableRegistry>, store: Arc<dyn RecordStore>) -> Self {
        Self {
            registry,
            store,
            default_currency: DEFAULT_CURRENCY.to_string(),
        }
    }

    pub fn with_default_currency(mut self, currency: impl Into<String>) -> Self {
        self.default_currency = currency.into();
        self
    }

    pub fn registry(&self) -> &TableRegistry {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Up to `limit` owned records, newest first. `limit` is clamped to 1..=50.
    pub async fn list(&self, user_id: Uuid, table: &str, limit: i64) -> Result<Vec<Record>> {
        let descriptor = self.registry.resolve(table)?;
        let limit = limit.clamp(1, LIST_LIMIT_MAX) as usize;
        self.store
            .list(descriptor, user_id, &ListQuery::latest(limit))
            .await
    }

    /// The owned record with the given primary key.
    pub async fn get(&self, user_id: Uuid, table: &str, id: &Value) -> Result<Record> {
        let descriptor = self.registry.resolve(table)?;
        let key = primary_key_value(descriptor, id)?;
        self.store
            .fetch(descriptor, user_id, &key)
            .await?
            .ok_or_else(|| OrchestrationError::NotFound("Record".to_string()))
    }

    pub async fn create(&self, user_id: Uuid, table: &str, data: &Value) -> Result<Record> {
        let descriptor = self.registry.resolve(table)?;
        let incoming = data.as_object().ok_or_else(|| {
            OrchestrationError::InvalidArgument(
                "Data must be an object with field/value pairs.".to_string(),
            )
        })?;

        let (mut prepared, mut issues) = prepare_fields(descriptor, incoming);
        defaults::apply_table_defaults(
            descriptor.key,
            &mut prepared,
            incoming,
            &self.default_currency,
        );

        for field in &descriptor.required_fields {
            let present = prepared.get(*field).map(|v| !v.is_blank()).unwrap_or(false);
            let already_reported = issues.iter().any(|i| i.field() == *field);
            if !present && !already_reported {
                issues.push(FieldIssue::Missing {
                    field: field.to_string(),
                });
            }
        }

        if !issues.is_empty() {
            debug!(table = %descriptor.key, issues = issues.len(), "Rejected record create");
            return Err(OrchestrationError::Validation(issues));
        }

        let record = self.store.insert(descriptor, user_id, prepared).await?;
        info!(table = %descriptor.key, user_id = %user_id, record_id = ?record.id(), "Record created");
        Ok(record)
    }

    pub async fn update(
        &self,
        user_id: Uuid,
        table: &str,
        id: &Value,
        updates: &Value,
    ) -> Result<UpdateOutcome> {
        let descriptor = self.registry.resolve(table)?;
        let incoming = updates.as_object().ok_or_else(|| {
            OrchestrationError::InvalidArgument(
                "Updates must be an object with field/value pairs.".to_string(),
            )
        })?;
        let current = self.get(user_id, table, id).await?;
        let key = primary_key_value(descriptor, id)?;

        let (prepared, warnings) = prepare_fields(descriptor, incoming);
        if prepared.is_empty() {
            if warnings.is_empty() {
                return Err(OrchestrationError::InvalidArgument(
                    "No valid fields provided for update.".to_string(),
                ));
            }
            return Ok(UpdateOutcome {
                record: current,
                warnings,
            });
        }

        let record = self
            .store
            .update(descriptor, user_id, &key, prepared)
            .await?
            .ok_or_else(|| OrchestrationError::NotFound("Record".to_string()))?;

        info!(table = %descriptor.key, user_id = %user_id, warnings = warnings.len(), "Record updated");
        Ok(UpdateOutcome { record, warnings })
    }

    // =============================
    // Typed reads for the built-in tools
    // =============================

    /// The acting user's own profile row.
    pub async fn profile(&self, user_id: Uuid) -> Result<Option<Record>> {
        let users = self.registry.require(TableKey::Users)?;
        self.store
            .fetch(users, user_id, &FieldValue::Uuid(user_id))
            .await
    }

    pub async fn query(&self, user_id: Uuid, table: TableKey, query: ListQuery) -> Result<Vec<Record>> {
        let descriptor = self.registry.require(table)?;
        self.store.list(descriptor, user_id, &query).await
    }

    /// Sum of transaction amounts of the given type (`income`, `expense`).
    pub async fn transaction_total(&self, user_id: Uuid, kind: &str) -> Result<Decimal> {
        let transactions = self.registry.require(TableKey::Transactions)?;
        self.store
            .sum(
                transactions,
                user_id,
                "amount",
                &[("type".to_string(), FieldValue::Text(kind.to_string()))],
            )
            .await
    }
}

/// Keep writable fields only, coercing each and collecting every failure.
fn prepare_fields(
    descriptor: &TableDescriptor,
    incoming: &Map<String, Value>,
) -> (Fields, Vec<FieldIssue>) {
    let mut prepared = Fields::new();
    let mut issues = Vec::new();

    for (key, raw) in incoming {
        if !descriptor.is_writable(key) {
            continue;
        }
        let Some(column) = descriptor.column(key) else {
            continue;
        };
        match coercion::coerce(column, raw) {
            Ok(value) => {
                prepared.insert(key.clone(), value);
            }
            Err(issue) => issues.push(issue),
        }
    }

    (prepared, issues)
}

fn primary_key_value(descriptor: &TableDescriptor, id: &Value) -> Result<FieldValue> {
    let column = descriptor.primary_key_spec().ok_or_else(|| {
        OrchestrationError::InvalidSchema(format!("Table '{}' has no primary key", descriptor.key))
    })?;
    match coercion::coerce(column, id) {
        Ok(FieldValue::Null) => Err(OrchestrationError::InvalidArgument(
            "Invalid record_id: a record id is required".to_string(),
        )),
        Ok(value) => Ok(value),
        Err(issue) => Err(OrchestrationError::InvalidArgument(format!(
            "Invalid record_id: {}",
            issue
        ))),
    }
}
