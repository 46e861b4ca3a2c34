//! Per-table defaults applied on create

use super::value::{FieldValue, Fields};
use crate::registry::TableKey;
use rust_decimal::Decimal;
use serde_json::{Map, Value};

fn fill(prepared: &mut Fields, column: &str, value: FieldValue) {
    let absent = prepared.get(column).map(FieldValue::is_null).unwrap_or(true);
    if absent {
        prepared.insert(column.to_string(), value);
    }
}

fn text(value: &str) -> FieldValue {
    FieldValue::Text(value.to_string())
}

/// Fill defaults into `prepared` for fields the caller left out.
///
/// `incoming` is the raw payload, consulted for goal title synthesis.
pub fn apply_table_defaults(
    table: TableKey,
    prepared: &mut Fields,
    incoming: &Map<String, Value>,
    default_currency: &str,
) {
    match table {
        TableKey::Goals => {
            let has_title = prepared.get("title").map(|v| !v.is_blank()).unwrap_or(false);
            if !has_title {
                prepared.insert("title".to_string(), FieldValue::Text(goal_title(prepared, incoming)));
            }
            fill(prepared, "status", text("active"));
            fill(prepared, "priority", text("medium"));
            for column in ["current_amount", "monthly_contribution", "required_monthly"] {
                fill(prepared, column, FieldValue::Numeric(Decimal::ZERO));
            }
        }
        TableKey::Transactions => {
            fill(prepared, "currency", text(default_currency));
            fill(prepared, "ledger_status", text("unreconciled"));
        }
        TableKey::Invoices => {
            fill(prepared, "currency", text(default_currency));
            fill(prepared, "status", text("draft"));
        }
        TableKey::ComplianceTasks => {
            fill(prepared, "status", text("pending"));
        }
        _ => {}
    }
}

fn non_empty_text<'a>(incoming: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    incoming
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn goal_title(prepared: &Fields, incoming: &Map<String, Value>) -> String {
    if let Some(title) = non_empty_text(incoming, "title").or_else(|| non_empty_text(incoming, "description")) {
        return title.to_string();
    }

    let target = prepared
        .get("target_amount")
        .and_then(FieldValue::as_decimal)
        .filter(|d| !d.is_zero());

    match target {
        Some(amount) => format!("Savings goal {}", amount.normalize()),
        None => "Savings goal".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::str::FromStr;

    fn incoming(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_goal_defaults_and_synthesized_title() {
        let mut prepared = Fields::new();
        prepared.insert(
            "target_amount".into(),
            FieldValue::Numeric(Decimal::from_str("80000.00").unwrap()),
        );
        apply_table_defaults(
            TableKey::Goals,
            &mut prepared,
            &incoming(json!({"target_amount": "80000.00"})),
            "INR",
        );

        assert_eq!(prepared["title"], text("Savings goal 80000"));
        assert_eq!(prepared["status"], text("active"));
        assert_eq!(prepared["priority"], text("medium"));
        assert_eq!(prepared["current_amount"], FieldValue::Numeric(Decimal::ZERO));
    }

    #[test]
    fn test_goal_title_prefers_description() {
        let mut prepared = Fields::new();
        apply_table_defaults(
            TableKey::Goals,
            &mut prepared,
            &incoming(json!({"description": "Trip to Goa"})),
            "INR",
        );
        assert_eq!(prepared["title"], text("Trip to Goa"));

        let mut bare = Fields::new();
        apply_table_defaults(TableKey::Goals, &mut bare, &Map::new(), "INR");
        assert_eq!(bare["title"], text("Savings goal"));
    }

    #[test]
    fn test_supplied_values_are_kept() {
        let mut prepared = Fields::new();
        prepared.insert("currency".into(), text("USD"));
        apply_table_defaults(TableKey::Transactions, &mut prepared, &Map::new(), "INR");
        assert_eq!(prepared["currency"], text("USD"));
        assert_eq!(prepared["ledger_status"], text("unreconciled"));
    }

    #[test]
    fn test_invoice_and_compliance_defaults() {
        let mut invoice = Fields::new();
        apply_table_defaults(TableKey::Invoices, &mut invoice, &Map::new(), "EUR");
        assert_eq!(invoice["currency"], text("EUR"));
        assert_eq!(invoice["status"], text("draft"));

        let mut task = Fields::new();
        apply_table_defaults(TableKey::ComplianceTasks, &mut task, &Map::new(), "INR");
        assert_eq!(task["status"], text("pending"));

        let mut client = Fields::new();
        apply_table_defaults(TableKey::Clients, &mut client, &Map::new(), "INR");
        assert!(client.is_empty());
    }
}
