//! Tool trait and registry
//!
//! Tools are the only way the model touches user data. Each one runs against
//! the `TurnContext` it is handed and reports failures as a structured
//! `{ "error": ... }` payload instead of failing the turn.

use crate::context::TurnContext;
use crate::error::OrchestrationError;
use crate::models::{ToolCall, ToolDefinition, ToolResult};
use crate::records::{FieldValue, ListQuery, Record};
use crate::registry::TableKey;
use crate::Result;
use rust_decimal::prelude::ToPrimitive;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Trait for a single model-callable tool
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    /// JSON schema of the accepted arguments.
    fn parameters(&self) -> Value;
    /// `args` is always a JSON object; the returned value is the payload
    /// handed back to the model.
    async fn execute(&self, ctx: &TurnContext, args: &Value) -> Result<Value>;
}

/// Tool registry for looking up and executing tools
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            order: Vec::new(),
        }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_none() {
            self.order.push(name);
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Definitions in registration order, as advertised to the model.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| ToolDefinition {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters(),
            })
            .collect()
    }

    /// Run one call to completion. Never fails: problems become error results.
    pub async fn invoke(&self, ctx: &TurnContext, call: &ToolCall) -> ToolResult {
        let Some(tool) = self.get(&call.name) else {
            warn!(tool = %call.name, "Model requested an unknown tool");
            let err = OrchestrationError::ToolNotFound(call.name.clone());
            return ToolResult::error(call, err.to_tool_payload());
        };

        let args = normalize_arguments(&call.arguments);

        let start = Instant::now();
        let outcome = tool.execute(ctx, &args).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(payload) => {
                info!(tool = %call.name, elapsed_ms, success = true, "Tool call finished");
                ToolResult::ok(call, payload)
            }
            Err(e) => {
                info!(tool = %call.name, elapsed_ms, success = false, error = %e, "Tool call finished");
                ToolResult::error(call, e.to_tool_payload())
            }
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Arguments arrive as an object, or as a JSON string when the provider
/// could not decode them.
fn normalize_arguments(arguments: &Value) -> Value {
    match arguments {
        Value::Object(_) => arguments.clone(),
        Value::Null => json!({}),
        Value::String(raw) => match serde_json::from_str::<Value>(raw) {
            Ok(parsed @ Value::Object(_)) => parsed,
            _ => json!({}),
        },
        _ => json!({}),
    }
}

// =============================
// Argument helpers
// =============================

fn int_arg(args: &Value, key: &str, default: i64) -> i64 {
    match args.get(key) {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(default),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(default),
        _ => default,
    }
}

fn clamp_limit(value: i64, max: i64) -> usize {
    value.clamp(1, max) as usize
}

fn str_arg<'a>(args: &'a Value, key: &str) -> Result<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| OrchestrationError::InvalidArgument(format!("Expected '{}' in tool arguments", key)))
}

fn value_arg<'a>(args: &'a Value, key: &str) -> Result<&'a Value> {
    args.get(key)
        .ok_or_else(|| OrchestrationError::InvalidArgument(format!("Expected '{}' in tool arguments", key)))
}

// =============================
// Compact serializers
// =============================

const TRANSACTION_SUMMARY: [(&str, &str); 8] = [
    ("id", "id"),
    ("type", "type"),
    ("amount", "amount"),
    ("currency", "currency"),
    ("category", "category"),
    ("description", "description"),
    ("date", "date"),
    ("status", "ledger_status"),
];

const GOAL_SUMMARY: [(&str, &str); 7] = [
    ("id", "id"),
    ("title", "title"),
    ("status", "status"),
    ("priority", "priority"),
    ("target_amount", "target_amount"),
    ("current_amount", "current_amount"),
    ("deadline", "deadline"),
];

fn transaction_summary(record: &Record) -> Value {
    record.project(&TRANSACTION_SUMMARY)
}

fn goal_summary(record: &Record) -> Value {
    record.project(&GOAL_SUMMARY)
}

fn active_goals_query(limit: usize) -> ListQuery {
    ListQuery::latest(limit).filter("status", FieldValue::Text("active".to_string()))
}

// =============================
// Built-in tools
// =============================

pub const SNAPSHOT_LIMIT_MAX: i64 = 20;

/// Profile, totals, latest transactions and active goals in one call.
pub struct UserSnapshotTool;

#[async_trait::async_trait]
impl Tool for UserSnapshotTool {
    fn name(&self) -> &'static str {
        "get_user_snapshot"
    }

    fn description(&self) -> &'static str {
        "Fetches the user's profile along with recent transactions and active goals."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "max_transactions": {"type": "integer", "default": 5, "minimum": 1, "maximum": 20},
                "max_goals": {"type": "integer", "default": 5, "minimum": 1, "maximum": 20}
            }
        })
    }

    async fn execute(&self, ctx: &TurnContext, args: &Value) -> Result<Value> {
        let records = &ctx.records;
        let user = records
            .profile(ctx.user_id)
            .await?
            .ok_or_else(|| OrchestrationError::NotFound("User".to_string()))?;

        let tx_limit = clamp_limit(int_arg(args, "max_transactions", 5), SNAPSHOT_LIMIT_MAX);
        let goal_limit = clamp_limit(int_arg(args, "max_goals", 5), SNAPSHOT_LIMIT_MAX);

        let transactions = records
            .query(
                ctx.user_id,
                TableKey::Transactions,
                ListQuery::latest(tx_limit).order_by("date"),
            )
            .await?;
        let goals = records
            .query(ctx.user_id, TableKey::Goals, active_goals_query(goal_limit))
            .await?;

        let income = records.transaction_total(ctx.user_id, "income").await?;
        let expense = records.transaction_total(ctx.user_id, "expense").await?;

        Ok(json!({
            "user": user.project(&[("id", "id"), ("name", "full_name"), ("email", "email"), ("created_at", "created_at")]),
            "financials": {
                "total_income": income.to_f64().unwrap_or(0.0),
                "total_expense": expense.to_f64().unwrap_or(0.0),
            },
            "recent_transactions": transactions.iter().map(transaction_summary).collect::<Vec<_>>(),
            "active_goals": goals.iter().map(goal_summary).collect::<Vec<_>>(),
        }))
    }
}

pub struct RecentTransactionsTool;

#[async_trait::async_trait]
impl Tool for RecentTransactionsTool {
    fn name(&self) -> &'static str {
        "get_recent_transactions"
    }

    fn description(&self) -> &'static str {
        "Returns the most recent transactions for the current user."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "limit": {"type": "integer", "default": 5, "minimum": 1, "maximum": 20}
            }
        })
    }

    async fn execute(&self, ctx: &TurnContext, args: &Value) -> Result<Value> {
        let limit = clamp_limit(int_arg(args, "limit", 5), SNAPSHOT_LIMIT_MAX);
        let transactions = ctx
            .records
            .query(
                ctx.user_id,
                TableKey::Transactions,
                ListQuery::latest(limit).order_by("created_at"),
            )
            .await?;

        Ok(json!({
            "transactions": transactions.iter().map(transaction_summary).collect::<Vec<_>>()
        }))
    }
}

pub struct ActiveGoalsTool;

#[async_trait::async_trait]
impl Tool for ActiveGoalsTool {
    fn name(&self) -> &'static str {
        "get_active_goals"
    }

    fn description(&self) -> &'static str {
        "Returns the user's active goals, newest first."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "limit": {"type": "integer", "default": 5, "minimum": 1, "maximum": 20}
            }
        })
    }

    async fn execute(&self, ctx: &TurnContext, args: &Value) -> Result<Value> {
        let limit = clamp_limit(int_arg(args, "limit", 5), SNAPSHOT_LIMIT_MAX);
        let goals = ctx
            .records
            .query(ctx.user_id, TableKey::Goals, active_goals_query(limit))
            .await?;

        Ok(json!({
            "goals": goals.iter().map(goal_summary).collect::<Vec<_>>()
        }))
    }
}

pub struct TableRecordsTool;

#[async_trait::async_trait]
impl Tool for TableRecordsTool {
    fn name(&self) -> &'static str {
        "get_table_records"
    }

    fn description(&self) -> &'static str {
        "Fetch records from one of the user's own tables (transactions, goals, invoices, clients, ...)."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "table": {"type": "string"},
                "limit": {"type": "integer", "default": 10, "minimum": 1, "maximum": 50}
            },
            "required": ["table"]
        })
    }

    async fn execute(&self, ctx: &TurnContext, args: &Value) -> Result<Value> {
        let table = str_arg(args, "table")?;
        let limit = int_arg(args, "limit", 10);
        let records = ctx.records.list(ctx.user_id, table, limit).await?;

        Ok(json!({
            "table": table.trim().to_lowercase(),
            "records": records.iter().map(Record::to_json).collect::<Vec<_>>(),
        }))
    }
}

pub struct CreateRecordTool;

#[async_trait::async_trait]
impl Tool for CreateRecordTool {
    fn name(&self) -> &'static str {
        "create_table_record"
    }

    fn description(&self) -> &'static str {
        "Create a new record in a user-owned table (transactions, goals, invoices, etc.)."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "table": {"type": "string"},
                "data": {"type": "object", "description": "Field/value pairs for the new record"}
            },
            "required": ["table", "data"]
        })
    }

    async fn execute(&self, ctx: &TurnContext, args: &Value) -> Result<Value> {
        let table = str_arg(args, "table")?;
        let data = value_arg(args, "data")?;
        let record = ctx.records.create(ctx.user_id, table, data).await?;

        Ok(json!({
            "table": record.table.as_str(),
            "record": record.to_json(),
        }))
    }
}

pub struct UpdateRecordTool;

#[async_trait::async_trait]
impl Tool for UpdateRecordTool {
    fn name(&self) -> &'static str {
        "update_table_record"
    }

    fn description(&self) -> &'static str {
        "Update an existing record identified by `record_id` in a user-owned table."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "table": {"type": "string"},
                "record_id": {"type": "string"},
                "updates": {"type": "object", "description": "Field/value pairs to change"}
            },
            "required": ["table", "record_id", "updates"]
        })
    }

    async fn execute(&self, ctx: &TurnContext, args: &Value) -> Result<Value> {
        let table = str_arg(args, "table")?;
        let record_id = value_arg(args, "record_id")?;
        let updates = value_arg(args, "updates")?;
        let outcome = ctx
            .records
            .update(ctx.user_id, table, record_id, updates)
            .await?;

        let warnings = if outcome.warnings.is_empty() {
            Value::Null
        } else {
            json!(outcome.warnings.iter().map(|w| w.to_string()).collect::<Vec<_>>())
        };

        Ok(json!({
            "table": outcome.record.table.as_str(),
            "record": outcome.record.to_json(),
            "warnings": warnings,
        }))
    }
}

/// Registry with the six coach tools.
pub fn create_default_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(UserSnapshotTool));
    registry.register(Arc::new(RecentTransactionsTool));
    registry.register(Arc::new(ActiveGoalsTool));
    registry.register(Arc::new(TableRecordsTool));
    registry.register(Arc::new(CreateRecordTool));
    registry.register(Arc::new(UpdateRecordTool));
    registry
}
