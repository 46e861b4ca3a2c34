//! Table registry
//!
//! Static catalog of the record types the tools may touch. Built once from
//! explicit declarations (see `tables`) and shared read-only afterwards.

pub mod tables;

use crate::error::OrchestrationError;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

pub use tables::default_schemas;

/// Columns that are never writable through the tool surface.
pub const SYSTEM_COLUMNS: [&str; 6] = [
    "id",
    "user_id",
    "created_at",
    "updated_at",
    "created_on",
    "updated_on",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableKey {
    Users,
    Transactions,
    Goals,
    IncomeSources,
    Clients,
    Invoices,
    ComplianceTasks,
    PulseHistory,
    ChatMessages,
    TaxRecords,
    WhatsappNudges,
}

impl TableKey {
    pub const ALL: [TableKey; 11] = [
        TableKey::Users,
        TableKey::Transactions,
        TableKey::Goals,
        TableKey::IncomeSources,
        TableKey::Clients,
        TableKey::Invoices,
        TableKey::ComplianceTasks,
        TableKey::PulseHistory,
        TableKey::ChatMessages,
        TableKey::TaxRecords,
        TableKey::WhatsappNudges,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TableKey::Users => "users",
            TableKey::Transactions => "transactions",
            TableKey::Goals => "goals",
            TableKey::IncomeSources => "income_sources",
            TableKey::Clients => "clients",
            TableKey::Invoices => "invoices",
            TableKey::ComplianceTasks => "compliance_tasks",
            TableKey::PulseHistory => "pulse_history",
            TableKey::ChatMessages => "chat_messages",
            TableKey::TaxRecords => "tax_records",
            TableKey::WhatsappNudges => "whatsapp_nudges",
        }
    }

    /// Case- and whitespace-insensitive lookup of a table name.
    pub fn parse(raw: &str) -> Option<Self> {
        let key = raw.trim().to_lowercase();
        Self::ALL.iter().copied().find(|t| t.as_str() == key)
    }

    /// Tables the generic record tools may read and write.
    pub fn is_tool_accessible(&self) -> bool {
        !matches!(self, TableKey::Users)
    }
}

impl fmt::Display for TableKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Uuid,
    Text,
    Integer,
    Numeric,
    Boolean,
    Date,
    Timestamp,
    TextArray,
}

impl ColumnType {
    /// Postgres type name used for DDL and bind casts.
    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnType::Uuid => "UUID",
            ColumnType::Text => "TEXT",
            ColumnType::Integer => "INTEGER",
            ColumnType::Numeric => "NUMERIC",
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::Date => "DATE",
            ColumnType::Timestamp => "TIMESTAMPTZ",
            ColumnType::TextArray => "TEXT[]",
        }
    }
}

/// Server-side default of a column.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnDefault {
    Text(&'static str),
    Integer(i64),
    Numeric(i64),
    Boolean(bool),
    Now,
    GeneratedUuid,
}

impl ColumnDefault {
    pub fn sql(&self) -> String {
        match self {
            ColumnDefault::Text(v) => format!("'{}'", v),
            ColumnDefault::Integer(v) | ColumnDefault::Numeric(v) => v.to_string(),
            ColumnDefault::Boolean(v) => v.to_string(),
            ColumnDefault::Now => "NOW()".to_string(),
            ColumnDefault::GeneratedUuid => "gen_random_uuid()".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSpec {
    pub name: &'static str,
    pub ty: ColumnType,
    pub nullable: bool,
    pub default: Option<ColumnDefault>,
    pub primary_key: bool,
}

impl ColumnSpec {
    /// Nullable column without a default.
    pub const fn optional(name: &'static str, ty: ColumnType) -> Self {
        Self {
            name,
            ty,
            nullable: true,
            default: None,
            primary_key: false,
        }
    }

    /// Non-nullable column without a default.
    pub const fn required(name: &'static str, ty: ColumnType) -> Self {
        Self {
            name,
            ty,
            nullable: false,
            default: None,
            primary_key: false,
        }
    }

    pub const fn primary(name: &'static str, ty: ColumnType) -> Self {
        Self {
            name,
            ty,
            nullable: false,
            default: None,
            primary_key: true,
        }
    }

    pub fn with_default(mut self, default: ColumnDefault) -> Self {
        self.default = Some(default);
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }
}

/// Explicit declaration of one table.
#[derive(Debug, Clone)]
pub struct TableSchema {
    pub key: TableKey,
    pub columns: Vec<ColumnSpec>,
    /// Column holding the owning user id.
    pub owner_column: &'static str,
    /// Recency column used by `list`.
    pub order_column: Option<&'static str>,
}

#[derive(Debug, Clone)]
pub struct TableDescriptor {
    pub key: TableKey,
    pub columns: Vec<ColumnSpec>,
    pub column_types: BTreeMap<&'static str, ColumnType>,
    pub writable_fields: Vec<&'static str>,
    pub required_fields: Vec<&'static str>,
    pub primary_key: &'static str,
    pub owner_column: &'static str,
    pub order_column: Option<&'static str>,
}

impl TableDescriptor {
    fn from_schema(schema: TableSchema) -> Result<Self> {
        let primary_key = schema
            .columns
            .iter()
            .find(|c| c.primary_key)
            .map(|c| c.name)
            .ok_or_else(|| {
                OrchestrationError::InvalidSchema(format!(
                    "Table '{}' does not have a primary key",
                    schema.key
                ))
            })?;

        if !schema.columns.iter().any(|c| c.name == schema.owner_column) {
            return Err(OrchestrationError::InvalidSchema(format!(
                "Table '{}' has no owner column '{}'",
                schema.key, schema.owner_column
            )));
        }

        let column_types = schema.columns.iter().map(|c| (c.name, c.ty)).collect();

        let writable_fields = schema
            .columns
            .iter()
            .filter(|c| !SYSTEM_COLUMNS.contains(&c.name))
            .map(|c| c.name)
            .collect();

        let required_fields = schema
            .columns
            .iter()
            .filter(|c| {
                !SYSTEM_COLUMNS.contains(&c.name)
                    && !c.nullable
                    && c.default.is_none()
                    && c.ty != ColumnType::Boolean
            })
            .map(|c| c.name)
            .collect();

        Ok(Self {
            key: schema.key,
            columns: schema.columns,
            column_types,
            writable_fields,
            required_fields,
            primary_key,
            owner_column: schema.owner_column,
            order_column: schema.order_column,
        })
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn is_writable(&self, field: &str) -> bool {
        self.writable_fields.iter().any(|f| *f == field)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_types.contains_key(name)
    }

    pub fn primary_key_spec(&self) -> Option<&ColumnSpec> {
        self.column(self.primary_key)
    }
}

/// Immutable lookup of table descriptors.
#[derive(Debug)]
pub struct TableRegistry {
    tables: HashMap<TableKey, TableDescriptor>,
}

impl TableRegistry {
    /// Build the registry. Fails fast on any malformed declaration.
    pub fn build(schemas: Vec<TableSchema>) -> Result<Self> {
        let mut tables = HashMap::new();
        for schema in schemas {
            let key = schema.key;
            let descriptor = TableDescriptor::from_schema(schema)?;
            if tables.insert(key, descriptor).is_some() {
                return Err(OrchestrationError::InvalidSchema(format!(
                    "Table '{}' declared twice",
                    key
                )));
            }
        }
        Ok(Self { tables })
    }

    /// Registry over every record type the coach knows about.
    pub fn standard() -> Result<Self> {
        Self::build(default_schemas())
    }

    pub fn descriptor(&self, key: TableKey) -> Option<&TableDescriptor> {
        self.tables.get(&key)
    }

    /// Tables reachable by the generic record tools, in declaration order.
    pub fn accessible_tables(&self) -> Vec<String> {
        TableKey::ALL
            .iter()
            .filter(|k| k.is_tool_accessible() && self.tables.contains_key(k))
            .map(|k| k.as_str().to_string())
            .collect()
    }

    /// Resolve a raw table name for the record tools.
    ///
    /// Unknown names and `users` both yield `UnknownTable`.
    pub fn resolve(&self, raw: &str) -> Result<&TableDescriptor> {
        TableKey::parse(raw)
            .filter(|k| k.is_tool_accessible())
            .and_then(|k| self.tables.get(&k))
            .ok_or_else(|| OrchestrationError::UnknownTable {
                table: raw.to_string(),
                allowed: self.accessible_tables(),
            })
    }

    /// Descriptor lookup without the tool accessibility filter.
    pub fn require(&self, key: TableKey) -> Result<&TableDescriptor> {
        self.tables.get(&key).ok_or_else(|| OrchestrationError::UnknownTable {
            table: key.to_string(),
            allowed: self.accessible_tables(),
        })
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &TableDescriptor> {
        TableKey::ALL.iter().filter_map(|k| self.tables.get(k))
    }
}
