//! Record persistence
//!
//! Every primitive takes the owning user id and filters on the table's owner
//! column, so a row belonging to someone else is indistinguishable from a
//! missing one.

use super::value::{FieldValue, Fields, Record};
use crate::registry::{ColumnDefault, TableDescriptor, TableKey};
use crate::Result;
use chrono::Utc;
use rust_decimal::Decimal;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Equality filter on one column.
pub type Filter = (String, FieldValue);

#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    pub limit: usize,
    /// Newest-first ordering column; falls back to the table's order column.
    pub order_by: Option<String>,
    pub filters: Vec<Filter>,
}

impl ListQuery {
    pub fn latest(limit: usize) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    pub fn order_by(mut self, column: &str) -> Self {
        self.order_by = Some(column.to_string());
        self
    }

    pub fn filter(mut self, column: &str, value: FieldValue) -> Self {
        self.filters.push((column.to_string(), value));
        self
    }

    pub(crate) fn order_column<'a>(&'a self, table: &'a TableDescriptor) -> Option<&'a str> {
        self.order_by.as_deref().or(table.order_column)
    }
}

/// Trait for record persistence
#[async_trait::async_trait]
pub trait RecordStore: Send + Sync {
    async fn list(&self, table: &TableDescriptor, owner: Uuid, query: &ListQuery)
        -> Result<Vec<Record>>;

    async fn fetch(&self, table: &TableDescriptor, owner: Uuid, id: &FieldValue)
        -> Result<Option<Record>>;

    async fn insert(&self, table: &TableDescriptor, owner: Uuid, fields: Fields) -> Result<Record>;

    /// Apply `fields` to the owned row. `None` when it does not exist.
    async fn update(
        &self,
        table: &TableDescriptor,
        owner: Uuid,
        id: &FieldValue,
        fields: Fields,
    ) -> Result<Option<Record>>;

    /// Sum of a numeric column over owned rows matching `filters`.
    async fn sum(
        &self,
        table: &TableDescriptor,
        owner: Uuid,
        column: &str,
        filters: &[Filter],
    ) -> Result<Decimal>;
}

/// In-memory record store for development and tests
pub struct InMemoryRecordStore {
    rows: Arc<RwLock<HashMap<TableKey, Vec<Record>>>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self {
            rows: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Number of stored rows in a table, across all owners.
    pub async fn count(&self, table: TableKey) -> usize {
        let rows = self.rows.read().await;
        rows.get(&table).map(Vec::len).unwrap_or(0)
    }
}

impl Default for InMemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

fn server_default(default: &ColumnDefault) -> FieldValue {
    match default {
        ColumnDefault::Text(v) => FieldValue::Text(v.to_string()),
        ColumnDefault::Integer(v) => FieldValue::Integer(*v),
        ColumnDefault::Numeric(v) => FieldValue::Numeric(Decimal::from(*v)),
        ColumnDefault::Boolean(v) => FieldValue::Boolean(*v),
        ColumnDefault::Now => FieldValue::Timestamp(Utc::now()),
        ColumnDefault::GeneratedUuid => FieldValue::Uuid(Uuid::new_v4()),
    }
}

fn owned_by(table: &TableDescriptor, record: &Record, owner: Uuid) -> bool {
    record.uuid(table.owner_column) == Some(owner)
}

fn matches(record: &Record, filters: &[Filter]) -> bool {
    filters
        .iter()
        .all(|(column, value)| record.get(column) == Some(value))
}

/// Ordering used for newest-first listing. Nulls sort last.
fn compare_desc(a: Option<&FieldValue>, b: Option<&FieldValue>) -> Ordering {
    use FieldValue::*;
    let a = a.filter(|v| !v.is_null());
    let b = b.filter(|v| !v.is_null());
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(a), Some(b)) => {
            let asc = match (a, b) {
                (Timestamp(x), Timestamp(y)) => x.cmp(y),
                (Date(x), Date(y)) => x.cmp(y),
                (Numeric(x), Numeric(y)) => x.cmp(y),
                (Integer(x), Integer(y)) => x.cmp(y),
                (Text(x), Text(y)) => x.cmp(y),
                _ => Ordering::Equal,
            };
            asc.reverse()
        }
    }
}

#[async_trait::async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn list(
        &self,
        table: &TableDescriptor,
        owner: Uuid,
        query: &ListQuery,
    ) -> Result<Vec<Record>> {
        let rows = self.rows.read().await;
        // Reverse insertion order so ties resolve newest first.
        let mut selected: Vec<Record> = rows
            .get(&table.key)
            .map(|rows| {
                rows.iter()
                    .rev()
                    .filter(|r| owned_by(table, r, owner) && matches(r, &query.filters))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if let Some(column) = query.order_column(table) {
            selected.sort_by(|a, b| compare_desc(a.get(column), b.get(column)));
        }
        selected.truncate(query.limit);
        Ok(selected)
    }

    async fn fetch(
        &self,
        table: &TableDescriptor,
        owner: Uuid,
        id: &FieldValue,
    ) -> Result<Option<Record>> {
        let rows = self.rows.read().await;
        Ok(rows.get(&table.key).and_then(|rows| {
            rows.iter()
                .find(|r| owned_by(table, r, owner) && r.get(table.primary_key) == Some(id))
                .cloned()
        }))
    }

    async fn insert(&self, table: &TableDescriptor, owner: Uuid, mut fields: Fields) -> Result<Record> {
        fields.insert(table.owner_column.to_string(), FieldValue::Uuid(owner));

        for column in &table.columns {
            let absent = fields.get(column.name).map(FieldValue::is_null).unwrap_or(true);
            if absent {
                let value = column
                    .default
                    .as_ref()
                    .map(server_default)
                    .unwrap_or(FieldValue::Null);
                fields.insert(column.name.to_string(), value);
            }
        }

        let record = Record::new(table.key, fields);
        let mut rows = self.rows.write().await;
        rows.entry(table.key).or_insert_with(Vec::new).push(record.clone());
        Ok(record)
    }

    async fn update(
        &self,
        table: &TableDescriptor,
        owner: Uuid,
        id: &FieldValue,
        fields: Fields,
    ) -> Result<Option<Record>> {
        let mut rows = self.rows.write().await;
        let Some(record) = rows.get_mut(&table.key).and_then(|rows| {
            rows.iter_mut()
                .find(|r| owned_by(table, r, owner) && r.get(table.primary_key) == Some(id))
        }) else {
            return Ok(None);
        };

        record.fields.extend(fields);
        if table.has_column("updated_at") {
            record
                .fields
                .insert("updated_at".to_string(), FieldValue::Timestamp(Utc::now()));
        }
        Ok(Some(record.clone()))
    }

    async fn sum(
        &self,
        table: &TableDescriptor,
        owner: Uuid,
        column: &str,
        filters: &[Filter],
    ) -> Result<Decimal> {
        let rows = self.rows.read().await;
        Ok(rows
            .get(&table.key)
            .map(|rows| {
                rows.iter()
                    .filter(|r| owned_by(table, r, owner) && matches(r, filters))
                    .filter_map(|r| r.get(column).and_then(FieldValue::as_decimal))
                    .sum()
            })
            .unwrap_or(Decimal::ZERO))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::TableRegistry;
    use chrono::NaiveDate;

    fn tx_fields(kind: &str, amount: i64, day: u32) -> Fields {
        let mut fields = Fields::new();
        fields.insert("type".into(), FieldValue::Text(kind.into()));
        fields.insert("amount".into(), FieldValue::Numeric(Decimal::from(amount)));
        fields.insert(
            "date".into(),
            FieldValue::Date(NaiveDate::from_ymd_opt(2024, 3, day).unwrap()),
        );
        fields
    }

    #[tokio::test]
    async fn test_insert_fills_server_defaults() {
        let registry = TableRegistry::standard().unwrap();
        let tx = registry.resolve("transactions").unwrap();
        let store = InMemoryRecordStore::new();
        let owner = Uuid::new_v4();

        let record = store.insert(tx, owner, tx_fields("expense", 500, 1)).await.unwrap();

        assert!(record.id().is_some());
        assert_eq!(record.uuid("user_id"), Some(owner));
        assert_eq!(record.get("is_recurring"), Some(&FieldValue::Boolean(false)));
        assert!(matches!(record.get("created_at"), Some(FieldValue::Timestamp(_))));
        assert_eq!(record.get("notes"), Some(&FieldValue::Null));
    }

    #[tokio::test]
    async fn test_list_is_owner_scoped_and_ordered() {
        let registry = TableRegistry::standard().unwrap();
        let tx = registry.resolve("transactions").unwrap();
        let store = InMemoryRecordStore::new();
        let owner = Uuid::new_v4();
        let stranger = Uuid::new_v4();

        store.insert(tx, owner, tx_fields("expense", 100, 5)).await.unwrap();
        store.insert(tx, owner, tx_fields("income", 900, 20)).await.unwrap();
        store.insert(tx, stranger, tx_fields("income", 50, 25)).await.unwrap();

        let by_date = store
            .list(tx, owner, &ListQuery::latest(10).order_by("date"))
            .await
            .unwrap();
        assert_eq!(by_date.len(), 2);
        assert_eq!(by_date[0].text("type"), Some("income"));

        let income = store
            .sum(
                tx,
                owner,
                "amount",
                &[("type".into(), FieldValue::Text("income".into()))],
            )
            .await
            .unwrap();
        assert_eq!(income, Decimal::from(900));
    }

    #[tokio::test]
    async fn test_update_requires_ownership() {
        let registry = TableRegistry::standard().unwrap();
        let tx = registry.resolve("transactions").unwrap();
        let store = InMemoryRecordStore::new();
        let owner = Uuid::new_v4();

        let record = store.insert(tx, owner, tx_fields("expense", 100, 5)).await.unwrap();
        let id = FieldValue::Uuid(record.id().unwrap());

        let mut changes = Fields::new();
        changes.insert("category".into(), FieldValue::Text("rent".into()));

        let denied = store
            .update(tx, Uuid::new_v4(), &id, changes.clone())
            .await
            .unwrap();
        assert!(denied.is_none());

        let updated = store.update(tx, owner, &id, changes).await.unwrap().unwrap();
        assert_eq!(updated.text("category"), Some("rent"));
    }
}
