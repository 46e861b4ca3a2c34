//! Postgres record store
//!
//! SQL is generated from the table descriptors. Values are bound with an
//! explicit `$n::TYPE` cast so a single code path covers every column type.

use super::store::{Filter, ListQuery, RecordStore};
use super::value::{FieldValue, Fields, Record};
use crate::error::OrchestrationError;
use crate::registry::{ColumnType, TableDescriptor, TableRegistry};
use crate::Result;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{PgPool, Postgres, Row};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info};
use uuid::Uuid;

pub struct PgRecordStore {
    pool: PgPool,
    registry: Arc<TableRegistry>,
    schema_ready: Arc<OnceCell<()>>,
}

impl PgRecordStore {
    pub fn new(pool: PgPool, registry: Arc<TableRegistry>) -> Self {
        Self {
            pool,
            registry,
            schema_ready: Arc::new(OnceCell::new()),
        }
    }

    async fn ensure_schema_if_needed(&self) -> Result<()> {
        self.schema_ready
            .get_or_try_init(|| async {
                for table in self.registry.descriptors() {
                    sqlx::query(&create_table_sql(table))
                        .execute(&self.pool)
                        .await?;
                }
                info!("Record store schema ready");
                Ok::<(), sqlx::Error>(())
            })
            .await
            .map_err(|e| {
                OrchestrationError::DatabaseError(format!(
                    "Failed to initialize record store schema: {}",
                    e
                ))
            })?;

        Ok(())
    }
}

fn quote(ident: &str) -> String {
    format!("\"{}\"", ident)
}

fn column_list(table: &TableDescriptor) -> String {
    table
        .columns
        .iter()
        .map(|c| quote(c.name))
        .collect::<Vec<_>>()
        .join(", ")
}

fn placeholder(index: usize, ty: ColumnType) -> String {
    format!("${}::{}", index, ty.sql_type())
}

pub(crate) fn create_table_sql(table: &TableDescriptor) -> String {
    let columns: Vec<String> = table
        .columns
        .iter()
        .map(|c| {
            let mut def = format!("{} {}", quote(c.name), c.ty.sql_type());
            if c.primary_key {
                def.push_str(" PRIMARY KEY");
            } else if !c.nullable {
                def.push_str(" NOT NULL");
            }
            if let Some(default) = &c.default {
                def.push_str(&format!(" DEFAULT {}", default.sql()));
            }
            def
        })
        .collect();

    format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quote(table.key.as_str()),
        columns.join(", ")
    )
}

fn column_type(table: &TableDescriptor, column: &str) -> Result<ColumnType> {
    table.column_types.get(column).copied().ok_or_else(|| {
        OrchestrationError::InvalidArgument(format!(
            "Unknown column '{}' for table '{}'",
            column, table.key
        ))
    })
}

fn bind_value<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &FieldValue,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        FieldValue::Null => query.bind(Option::<String>::None),
        FieldValue::Uuid(v) => query.bind(*v),
        FieldValue::Text(v) => query.bind(v.clone()),
        FieldValue::Integer(v) => query.bind(*v),
        FieldValue::Numeric(v) => query.bind(*v),
        FieldValue::Boolean(v) => query.bind(*v),
        FieldValue::Date(v) => query.bind(*v),
        FieldValue::Timestamp(v) => query.bind(*v),
        FieldValue::TextArray(v) => query.bind(v.clone()),
    }
}

fn decode_row(table: &TableDescriptor, row: &PgRow) -> Result<Record> {
    let mut fields = Fields::new();
    for column in &table.columns {
        let name = column.name;
        let value = match column.ty {
            ColumnType::Uuid => row.try_get::<Option<Uuid>, _>(name)?.map(FieldValue::Uuid),
            ColumnType::Text => row.try_get::<Option<String>, _>(name)?.map(FieldValue::Text),
            ColumnType::Integer => row
                .try_get::<Option<i32>, _>(name)?
                .map(|v| FieldValue::Integer(i64::from(v))),
            ColumnType::Numeric => row
                .try_get::<Option<Decimal>, _>(name)?
                .map(FieldValue::Numeric),
            ColumnType::Boolean => row.try_get::<Option<bool>, _>(name)?.map(FieldValue::Boolean),
            ColumnType::Date => row
                .try_get::<Option<NaiveDate>, _>(name)?
                .map(FieldValue::Date),
            ColumnType::Timestamp => row
                .try_get::<Option<DateTime<Utc>>, _>(name)?
                .map(FieldValue::Timestamp),
            ColumnType::TextArray => row
                .try_get::<Option<Vec<String>>, _>(name)?
                .map(FieldValue::TextArray),
        };
        fields.insert(name.to_string(), value.unwrap_or(FieldValue::Null));
    }
    Ok(Record::new(table.key, fields))
}

/// Append `AND col = $n::T` clauses, returning the values to bind in order.
fn filter_clauses<'a>(
    table: &TableDescriptor,
    filters: &'a [Filter],
    sql: &mut String,
    next_index: &mut usize,
) -> Result<Vec<&'a FieldValue>> {
    let mut values = Vec::with_capacity(filters.len());
    for (column, value) in filters {
        let ty = column_type(table, column)?;
        sql.push_str(&format!(" AND {} = {}", quote(column), placeholder(*next_index, ty)));
        *next_index += 1;
        values.push(value);
    }
    Ok(values)
}

#[async_trait::async_trait]
impl RecordStore for PgRecordStore {
    async fn list(
        &self,
        table: &TableDescriptor,
        owner: Uuid,
        query: &ListQuery,
    ) -> Result<Vec<Record>> {
        self.ensure_schema_if_needed().await?;

        let mut sql = format!(
            "SELECT {} FROM {} WHERE {} = $1",
            column_list(table),
            quote(table.key.as_str()),
            quote(table.owner_column)
        );
        let mut next = 2;
        let filter_values = filter_clauses(table, &query.filters, &mut sql, &mut next)?;

        if let Some(order) = query.order_column(table) {
            column_type(table, order)?;
            sql.push_str(&format!(" ORDER BY {} DESC NULLS LAST", quote(order)));
        }
        sql.push_str(&format!(" LIMIT ${}", next));

        debug!(table = %table.key, sql = %sql, "Listing records");

        let mut q = sqlx::query(&sql).bind(owner);
        for value in filter_values {
            q = bind_value(q, value);
        }
        let rows = q
            .bind(query.limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                OrchestrationError::DatabaseError(format!("Failed to list {}: {}", table.key, e))
            })?;

        rows.iter().map(|row| decode_row(table, row)).collect()
    }

    async fn fetch(
        &self,
        table: &TableDescriptor,
        owner: Uuid,
        id: &FieldValue,
    ) -> Result<Option<Record>> {
        self.ensure_schema_if_needed().await?;

        let pk_type = column_type(table, table.primary_key)?;
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = {} AND {} = $2",
            column_list(table),
            quote(table.key.as_str()),
            quote(table.primary_key),
            placeholder(1, pk_type),
            quote(table.owner_column)
        );

        let row = bind_value(sqlx::query(&sql), id)
            .bind(owner)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                OrchestrationError::DatabaseError(format!("Failed to load {}: {}", table.key, e))
            })?;

        row.map(|r| decode_row(table, &r)).transpose()
    }

    async fn insert(&self, table: &TableDescriptor, owner: Uuid, mut fields: Fields) -> Result<Record> {
        self.ensure_schema_if_needed().await?;

        fields.insert(table.owner_column.to_string(), FieldValue::Uuid(owner));
        // Absent values fall through to the column defaults.
        fields.retain(|_, v| !v.is_null());

        let mut names = Vec::with_capacity(fields.len());
        let mut params = Vec::with_capacity(fields.len());
        for (i, column) in fields.keys().enumerate() {
            let ty = column_type(table, column)?;
            names.push(quote(column));
            params.push(placeholder(i + 1, ty));
        }

        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
            quote(table.key.as_str()),
            names.join(", "),
            params.join(", "),
            column_list(table)
        );

        let mut q = sqlx::query(&sql);
        for value in fields.values() {
            q = bind_value(q, value);
        }
        let row = q.fetch_one(&self.pool).await.map_err(|e| {
            OrchestrationError::DatabaseError(format!("Failed to insert into {}: {}", table.key, e))
        })?;

        decode_row(table, &row)
    }

    async fn update(
        &self,
        table: &TableDescriptor,
        owner: Uuid,
        id: &FieldValue,
        fields: Fields,
    ) -> Result<Option<Record>> {
        self.ensure_schema_if_needed().await?;

        let mut assignments = Vec::with_capacity(fields.len() + 1);
        let mut next = 1;
        for column in fields.keys() {
            let ty = column_type(table, column)?;
            assignments.push(format!("{} = {}", quote(column), placeholder(next, ty)));
            next += 1;
        }
        if table.has_column("updated_at") && !fields.contains_key("updated_at") {
            assignments.push(format!("{} = NOW()", quote("updated_at")));
        }

        let pk_type = column_type(table, table.primary_key)?;
        let sql = format!(
            "UPDATE {} SET {} WHERE {} = {} AND {} = ${} RETURNING {}",
            quote(table.key.as_str()),
            assignments.join(", "),
            quote(table.primary_key),
            placeholder(next, pk_type),
            quote(table.owner_column),
            next + 1,
            column_list(table)
        );

        let mut q = sqlx::query(&sql);
        for value in fields.values() {
            q = bind_value(q, value);
        }
        let row = bind_value(q, id)
            .bind(owner)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                OrchestrationError::DatabaseError(format!("Failed to update {}: {}", table.key, e))
            })?;

        row.map(|r| decode_row(table, &r)).transpose()
    }

    async fn sum(
        &self,
        table: &TableDescriptor,
        owner: Uuid,
        column: &str,
        filters: &[Filter],
    ) -> Result<Decimal> {
        self.ensure_schema_if_needed().await?;

        column_type(table, column)?;
        let mut sql = format!(
            "SELECT COALESCE(SUM({}), 0) AS total FROM {} WHERE {} = $1",
            quote(column),
            quote(table.key.as_str()),
            quote(table.owner_column)
        );
        let mut next = 2;
        let filter_values = filter_clauses(table, filters, &mut sql, &mut next)?;

        let mut q = sqlx::query(&sql).bind(owner);
        for value in filter_values {
            q = bind_value(q, value);
        }
        let row = q.fetch_one(&self.pool).await.map_err(|e| {
            OrchestrationError::DatabaseError(format!("Failed to sum {}.{}: {}", table.key, column, e))
        })?;

        Ok(row.try_get::<Decimal, _>("total")?)
    }
}
