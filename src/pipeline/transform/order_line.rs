use serde_json::Value;

use super::{customer, menu_item, KeyMap, TransformOutput, WarehouseTable};
use crate::pipeline::schema::FACT_ORDER_LINE;
use crate::types::{field_key, Document};

pub const TABLE: WarehouseTable = WarehouseTable {
    collection: FACT_ORDER_LINE,
    key_fields: &["order_id", "product_id"],
};

/// One fact row per staged order line with both identifiers.
///
/// Measures pass through untouched. A lookup miss leaves the surrogate key
/// `null`; the row is still emitted.
pub fn transform(
    orders: &[Document],
    customer_keys: &KeyMap,
    menu_item_keys: &KeyMap,
) -> TransformOutput {
    let documents = orders
        .iter()
        .filter(|order| {
            field_key(order, "order_id").is_some() && field_key(order, "product_id").is_some()
        })
        .map(|order| {
            let customer_key = field_key(order, "user_id")
                .and_then(|user_id| customer_keys.get(&user_id).cloned())
                .map_or(Value::Null, Value::String);
            let menu_item_key = field_key(order, "product_id")
                .and_then(|product_id| menu_item_keys.get(&product_id).cloned())
                .map_or(Value::Null, Value::String);

            let mut row = order.clone();
            row.insert(customer::SURROGATE_FIELD.to_string(), customer_key);
            row.insert(menu_item::SURROGATE_FIELD.to_string(), menu_item_key);
            row
        })
        .collect();

    TransformOutput {
        documents,
        errors: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_lookup_miss_keeps_row_with_null_key() {
        let orders: Vec<Document> = [
            json!({"order_id": "O1", "product_id": "A", "user_id": "u1", "quantity": 2, "total": 18.5}),
            json!({"order_id": "O1", "product_id": "Z", "user_id": "u404", "quantity": 1}),
            json!({"order_id": "O2", "quantity": 1}),
        ]
        .into_iter()
        .filter_map(|v| v.as_object().cloned())
        .collect();
        let customers = KeyMap::from([("u1".to_string(), "ck1".to_string())]);
        let items = KeyMap::from([("A".to_string(), "mk1".to_string())]);

        let output = transform(&orders, &customers, &items);
        assert_eq!(output.documents.len(), 2);
        assert_eq!(
            Value::Object(output.documents[0].clone()),
            json!({
                "order_id": "O1", "product_id": "A", "user_id": "u1",
                "quantity": 2, "total": 18.5,
                "customer_key": "ck1", "menu_item_key": "mk1",
            })
        );
        assert_eq!(output.documents[1]["customer_key"], Value::Null);
        assert_eq!(output.documents[1]["menu_item_key"], Value::Null);
    }
}
