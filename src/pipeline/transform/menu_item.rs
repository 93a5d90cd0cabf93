use chrono::NaiveDateTime;
use serde_json::{json, Value};
use std::cmp::Ordering;
use std::collections::HashMap;

use super::{TransformContext, TransformOutput, WarehouseTable};
use crate::pipeline::schema::DIM_MENU_ITEM;
use crate::types::{field_key, field_number, parse_timestamp, Document, EntityKind, ErrorRecord};

pub const TABLE: WarehouseTable = WarehouseTable {
    collection: DIM_MENU_ITEM,
    key_fields: &["product_id"],
};

pub const SURROGATE_FIELD: &str = "menu_item_key";
pub const AVG_COST_FIELD: &str = "avg_import_cost";
pub const LOCATION_FIELD: &str = "warehouse_location";

const STAGE: &str = "transform:dim_menu_item";

/// A warehouse import that resolved to a staged product.
struct Matched<'a> {
    position: usize,
    date: Option<NaiveDateTime>,
    record: &'a Document,
}

/// Most recent first: dated before undated, later date first, and among
/// equal dates the record that came later in staging order.
fn most_recent_first(a: &Matched<'_>, b: &Matched<'_>) -> Ordering {
    match (a.date, b.date) {
        (Some(x), Some(y)) => y.cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
    .then_with(|| b.position.cmp(&a.position))
}

/// Merge staged products with warehouse import costs and locations.
///
/// Every staged product with an identifier yields exactly one row, in
/// staging order. Imports resolve to a product directly or through the
/// legacy mapping; anything else becomes an error record and changes no row.
pub fn transform(
    products: &[Document],
    imports: &[Document],
    ctx: &TransformContext,
) -> TransformOutput {
    let mut documents: Vec<Document> = Vec::with_capacity(products.len());
    let mut index: HashMap<String, usize> = HashMap::with_capacity(products.len());

    for product in products {
        let Some(product_id) = field_key(product, "product_id") else {
            continue;
        };
        let mut row = product.clone();
        row.insert(
            SURROGATE_FIELD.to_string(),
            Value::String(ctx.surrogate_key(DIM_MENU_ITEM, &product_id)),
        );
        row.insert(AVG_COST_FIELD.to_string(), Value::Null);
        row.insert(LOCATION_FIELD.to_string(), Value::Null);

        match index.get(&product_id) {
            Some(&slot) => documents[slot] = row,
            None => {
                index.insert(product_id, documents.len());
                documents.push(row);
            }
        }
    }

    let mut errors = Vec::new();
    let mut groups: HashMap<&str, Vec<Matched<'_>>> = HashMap::new();

    for (position, import) in imports.iter().enumerate() {
        let resolved = match field_key(import, "product_id") {
            None => Err(("warehouse import has no product_id".to_string(), None)),
            Some(id) if index.contains_key(&id) => Ok(id),
            Some(id) => match ctx.mapping.resolve(&id) {
                Some(canonical) if index.contains_key(canonical) => Ok(canonical.to_string()),
                Some(canonical) => Err((
                    format!("product {id} maps to {canonical}, which is not staged"),
                    Some(id),
                )),
                None => Err((format!("no staged or mapped product for {id}"), Some(id))),
            },
        };

        match resolved {
            Ok(product_id) => {
                let Some((key, _)) = index.get_key_value(&product_id) else {
                    continue;
                };
                groups.entry(key.as_str()).or_default().push(Matched {
                    position,
                    date: import.get("import_date").and_then(parse_timestamp),
                    record: import,
                });
            }
            Err((reason, identifier)) => {
                let mut error = ErrorRecord::new(STAGE, reason, Value::Object(import.clone()))
                    .with_entity(EntityKind::WarehouseImports);
                if let Some(identifier) = identifier {
                    error = error.with_identifier(identifier);
                }
                if let Some(import_id) = field_key(import, "import_id") {
                    error = error.with_key(format!("{STAGE}:{import_id}"));
                }
                errors.push(error);
            }
        }
    }

    for (product_id, mut group) in groups {
        let Some(&slot) = index.get(product_id) else {
            continue;
        };
        let total: f64 = group
            .iter()
            .map(|m| field_number(m.record, "unit_cost").unwrap_or(0.0))
            .sum();
        let average = total / group.len() as f64;

        group.sort_by(most_recent_first);
        let location = group
            .first()
            .and_then(|m| m.record.get(LOCATION_FIELD))
            .cloned()
            .unwrap_or(Value::Null);

        let row = &mut documents[slot];
        row.insert(AVG_COST_FIELD.to_string(), json!(average));
        row.insert(LOCATION_FIELD.to_string(), location);
    }

    TransformOutput { documents, errors }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::mapping::ProductMapping;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn docs(values: Vec<Value>) -> Vec<Document> {
        values.into_iter().filter_map(|v| v.as_object().cloned()).collect()
    }

    #[test]
    fn test_average_cost_and_latest_location() {
        let products = docs(vec![json!({"product_id": "A", "name": "Burger"})]);
        let imports = docs(vec![
            json!({"import_id": "1", "product_id": "A", "unit_cost": 10, "import_date": "2024-01-01", "warehouse_location": "North"}),
            json!({"import_id": "2", "product_id": "A", "unit_cost": 20, "import_date": "2024-02-01", "warehouse_location": "South"}),
        ]);

        let output = transform(&products, &imports, &TransformContext::default());
        assert_eq!(output.documents.len(), 1);
        assert_eq!(output.documents[0][AVG_COST_FIELD], json!(15.0));
        assert_eq!(output.documents[0][LOCATION_FIELD], json!("South"));
        assert!(output.errors.is_empty());
    }

    #[test]
    fn test_missing_cost_counts_as_zero() {
        let products = docs(vec![json!({"product_id": "A"})]);
        let imports = docs(vec![
            json!({"product_id": "A", "unit_cost": 30}),
            json!({"product_id": "A"}),
        ]);
        let output = transform(&products, &imports, &TransformContext::default());
        assert_eq!(output.documents[0][AVG_COST_FIELD], json!(15.0));
    }

    #[test]
    fn test_tie_on_date_picks_later_record_and_undated_sorts_last() {
        let products = docs(vec![json!({"product_id": "A"})]);
        let imports = docs(vec![
            json!({"product_id": "A", "import_date": "2024-03-01", "warehouse_location": "first"}),
            json!({"product_id": "A", "import_date": "2024-03-01T00:00:00Z", "warehouse_location": "second"}),
            json!({"product_id": "A", "warehouse_location": "undated"}),
            json!({"product_id": "A", "import_date": "garbage", "warehouse_location": "unparseable"}),
        ]);
        let output = transform(&products, &imports, &TransformContext::default());
        assert_eq!(output.documents[0][LOCATION_FIELD], json!("second"));
    }

    #[test]
    fn test_undated_group_uses_last_record() {
        let products = docs(vec![json!({"product_id": "A"})]);
        let imports = docs(vec![
            json!({"product_id": "A", "warehouse_location": "one"}),
            json!({"product_id": "A", "warehouse_location": "two"}),
        ]);
        let output = transform(&products, &imports, &TransformContext::default());
        assert_eq!(output.documents[0][LOCATION_FIELD], json!("two"));
    }

    #[test]
    fn test_mapping_fallback_and_unmatched_records() {
        let products = docs(vec![
            json!({"product_id": "A"}),
            json!({"product_id": "B"}),
        ]);
        let imports = docs(vec![
            json!({"import_id": "1", "product_id": "OLD-A", "unit_cost": 8, "warehouse_location": "East"}),
            json!({"import_id": "2", "product_id": "GHOST", "unit_cost": 99}),
            json!({"import_id": "3", "product_id": "OLD-Z", "unit_cost": 99}),
        ]);
        let mapping = ProductMapping::new(HashMap::from([
            ("OLD-A".to_string(), "A".to_string()),
            ("OLD-Z".to_string(), "Z".to_string()),
        ]));

        let output = transform(&products, &imports, &TransformContext::new(mapping));
        assert_eq!(output.documents[0][AVG_COST_FIELD], json!(8.0));
        assert_eq!(output.documents[0][LOCATION_FIELD], json!("East"));
        assert_eq!(output.documents[1][AVG_COST_FIELD], Value::Null);
        assert_eq!(output.documents[1][LOCATION_FIELD], Value::Null);

        assert_eq!(output.errors.len(), 2);
        assert_eq!(output.errors[0].identifier.as_deref(), Some("GHOST"));
        assert_eq!(output.errors[0].stage, "transform:dim_menu_item");
        assert!(output.errors[1].reason.contains("not staged"));
    }

    #[test]
    fn test_non_finite_cost_counts_as_zero() {
        let products = docs(vec![json!({"product_id": "A"})]);
        let imports = docs(vec![
            json!({"product_id": "A", "unit_cost": 10}),
            json!({"product_id": "A", "unit_cost": "NaN"}),
        ]);
        let output = transform(&products, &imports, &TransformContext::default());
        assert_eq!(output.documents[0][AVG_COST_FIELD], json!(5.0));
    }

    #[test]
    fn test_out_of_range_epoch_date_is_undated() {
        let products = docs(vec![json!({"product_id": "A"})]);
        let imports = docs(vec![
            json!({"product_id": "A", "import_date": "2024-01-01", "warehouse_location": "dated"}),
            json!({"product_id": "A", "import_date": i64::MIN, "warehouse_location": "broken"}),
        ]);
        let output = transform(&products, &imports, &TransformContext::default());
        assert_eq!(output.documents[0][LOCATION_FIELD], json!("dated"));
    }

    #[test]
    fn test_unmatched_import_errors_are_keyed_by_import_id() {
        let products = docs(vec![json!({"product_id": "A"})]);
        let imports = docs(vec![
            json!({"import_id": "I9", "product_id": "GHOST"}),
            json!({"product_id": "GHOST"}),
        ]);
        let output = transform(&products, &imports, &TransformContext::default());
        assert_eq!(output.errors[0].key.as_deref(), Some("transform:dim_menu_item:I9"));
        assert_eq!(output.errors[1].key, None);
    }

    #[test]
    fn test_rows_follow_staging_order_and_skip_unidentified() {
        let products = docs(vec![
            json!({"product_id": "C"}),
            json!({"name": "no id"}),
            json!({"product_id": "A"}),
        ]);
        let output = transform(&products, &[], &TransformContext::default());
        let ids: Vec<_> = output.documents.iter().map(|d| d["product_id"].clone()).collect();
        assert_eq!(ids, vec![json!("C"), json!("A")]);
    }
}
