//! Declarations of the coach's record types.

use super::{ColumnDefault, ColumnSpec, ColumnType, TableKey, TableSchema};
use ColumnType::*;

fn id() -> ColumnSpec {
    ColumnSpec::primary("id", Uuid).with_default(ColumnDefault::GeneratedUuid)
}

fn owner() -> ColumnSpec {
    ColumnSpec::required("user_id", Uuid)
}

fn created_at() -> ColumnSpec {
    ColumnSpec::optional("created_at", Timestamp).with_default(ColumnDefault::Now)
}

fn updated_at() -> ColumnSpec {
    ColumnSpec::optional("updated_at", Timestamp).with_default(ColumnDefault::Now)
}

fn flag(name: &'static str) -> ColumnSpec {
    ColumnSpec::optional(name, Boolean).with_default(ColumnDefault::Boolean(false))
}

fn text_with_default(name: &'static str, value: &'static str) -> ColumnSpec {
    ColumnSpec::required(name, Text).with_default(ColumnDefault::Text(value))
}

fn zero_amount(name: &'static str) -> ColumnSpec {
    ColumnSpec::required(name, Numeric).with_default(ColumnDefault::Numeric(0))
}

fn owned(key: TableKey, columns: Vec<ColumnSpec>) -> TableSchema {
    TableSchema {
        key,
        columns,
        owner_column: "user_id",
        order_column: Some("created_at"),
    }
}

/// Every record type, `users` first.
pub fn default_schemas() -> Vec<TableSchema> {
    vec![
        TableSchema {
            key: TableKey::Users,
            columns: vec![
                ColumnSpec::primary("id", Uuid),
                ColumnSpec::required("email", Text),
                ColumnSpec::optional("full_name", Text),
                ColumnSpec::optional("phone", Text),
                created_at(),
                updated_at(),
            ],
            owner_column: "id",
            order_column: Some("created_at"),
        },
        owned(
            TableKey::Transactions,
            vec![
                id(),
                owner(),
                ColumnSpec::optional("client_id", Uuid),
                ColumnSpec::required("type", Text),
                ColumnSpec::required("amount", Numeric),
                text_with_default("currency", "INR"),
                ColumnSpec::optional("category", Text),
                ColumnSpec::optional("subcategory", Text),
                ColumnSpec::optional("description", Text),
                ColumnSpec::required("date", Date),
                ColumnSpec::optional("scheduled_for", Date),
                flag("is_recurring"),
                ColumnSpec::optional("recurrence_rule", Text),
                flag("gst_eligible"),
                ColumnSpec::optional("gst_rate", Numeric),
                ColumnSpec::optional("ledger_status", Text)
                    .with_default(ColumnDefault::Text("unreconciled")),
                flag("requires_follow_up"),
                ColumnSpec::optional("follow_up_reason", Text),
                flag("has_receipt"),
                ColumnSpec::optional("tags", TextArray),
                ColumnSpec::optional("notes", Text),
                ColumnSpec::optional("source", Text),
                created_at(),
                updated_at(),
            ],
        ),
        owned(
            TableKey::Goals,
            vec![
                id(),
                owner(),
                ColumnSpec::required("title", Text),
                ColumnSpec::optional("description", Text),
                ColumnSpec::optional("category", Text),
                text_with_default("status", "active"),
                text_with_default("priority", "medium"),
                ColumnSpec::required("target_amount", Numeric),
                zero_amount("current_amount"),
                ColumnSpec::optional("deadline", Date),
                zero_amount("monthly_contribution"),
                zero_amount("required_monthly"),
                ColumnSpec::optional("icon_key", Text),
                ColumnSpec::optional("tags", TextArray),
                ColumnSpec::optional("notes", Text),
                created_at(),
                updated_at(),
            ],
        ),
        owned(
            TableKey::IncomeSources,
            vec![
                id(),
                owner(),
                ColumnSpec::required("source_name", Text),
                ColumnSpec::required("source_type", Text),
                ColumnSpec::required("amount", Numeric),
                ColumnSpec::required("frequency", Text),
                created_at(),
            ],
        ),
        owned(
            TableKey::Clients,
            vec![
                id(),
                owner(),
                ColumnSpec::required("name", Text),
                ColumnSpec::optional("email", Text),
                ColumnSpec::optional("phone", Text),
                ColumnSpec::optional("gst_number", Text),
                ColumnSpec::optional("notes", Text),
                created_at(),
                updated_at(),
            ],
        ),
        owned(
            TableKey::Invoices,
            vec![
                id(),
                owner(),
                ColumnSpec::optional("client_id", Uuid),
                ColumnSpec::optional("number", Text),
                ColumnSpec::optional("description", Text),
                ColumnSpec::optional("issue_date", Date),
                ColumnSpec::optional("due_date", Date),
                ColumnSpec::required("amount", Numeric),
                text_with_default("currency", "INR"),
                text_with_default("status", "draft"),
                ColumnSpec::optional("expected_payment_date", Date),
                ColumnSpec::optional("actual_payment_date", Date),
                ColumnSpec::required("reminder_count", Integer)
                    .with_default(ColumnDefault::Integer(0)),
                ColumnSpec::optional("income_transaction_id", Uuid),
                created_at(),
                updated_at(),
            ],
        ),
        owned(
            TableKey::ComplianceTasks,
            vec![
                id(),
                owner(),
                ColumnSpec::optional("transaction_id", Uuid),
                ColumnSpec::optional("task_type", Text),
                ColumnSpec::optional("title", Text),
                ColumnSpec::optional("due_date", Date),
                text_with_default("status", "pending"),
                ColumnSpec::optional("notes", Text),
                created_at(),
                updated_at(),
            ],
        ),
        TableSchema {
            key: TableKey::PulseHistory,
            columns: vec![
                id(),
                owner(),
                ColumnSpec::required("score", Integer),
                ColumnSpec::required("trend", Text),
                ColumnSpec::required("volatility", Numeric),
                ColumnSpec::required("savings_rate", Numeric),
                ColumnSpec::optional("calculated_at", Timestamp).with_default(ColumnDefault::Now),
            ],
            owner_column: "user_id",
            order_column: Some("calculated_at"),
        },
        owned(
            TableKey::ChatMessages,
            vec![
                id(),
                owner(),
                ColumnSpec::required("role", Text),
                ColumnSpec::required("content", Text),
                ColumnSpec::optional("audio_url", Text),
                created_at(),
            ],
        ),
        owned(
            TableKey::TaxRecords,
            vec![
                id(),
                owner(),
                ColumnSpec::required("financial_year", Text),
                ColumnSpec::required("quarter", Text),
                ColumnSpec::required("estimated_tax", Numeric),
                zero_amount("paid_tax"),
                created_at(),
                updated_at(),
            ],
        ),
        TableSchema {
            key: TableKey::WhatsappNudges,
            columns: vec![
                id(),
                owner(),
                ColumnSpec::required("message", Text),
                ColumnSpec::optional("sent_at", Timestamp).with_default(ColumnDefault::Now),
                text_with_default("status", "sent"),
            ],
            owner_column: "user_id",
            order_column: Some("sent_at"),
        },
    ]
}
