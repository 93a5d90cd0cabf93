mod common;

use common::{context, orders, products, users, warehouse_imports};
use pretty_assertions::assert_eq;
use rustdw::pipeline::schema::{DIM_CUSTOMER, DIM_MENU_ITEM, FACT_ORDER_LINE, PIPELINE_ERRORS};
use rustdw::pipeline::transform::{customer, key_map, menu_item, order_line};
use rustdw::pipeline::{EntitySchema, Loader};
use rustdw::storage::{DocumentStore, MemoryStore};
use rustdw::types::{Document, EntityKind};
use serde_json::{json, Value};
use std::collections::HashMap;

fn staged(entity: EntityKind, records: Vec<Document>) -> Vec<Document> {
    let schema = EntitySchema::for_entity(entity);
    records.into_iter().map(|r| schema.normalize(r)).collect()
}

fn by_product(rows: &[Document]) -> HashMap<String, Document> {
    rows.iter()
        .filter_map(|row| Some((row.get("product_id")?.as_str()?.to_string(), row.clone())))
        .collect()
}

#[tokio::test]
async fn test_menu_item_costs_locations_and_errors() {
    let store = MemoryStore::new();
    let loader = Loader::new(store.clone());
    let ctx = context();

    let output = menu_item::transform(
        &staged(EntityKind::Products, products()),
        &staged(EntityKind::WarehouseImports, warehouse_imports()),
        &ctx,
    );
    loader.load(&menu_item::TABLE, &output.documents).await.unwrap();
    loader.record_errors(&output.errors).await.unwrap();

    let items = by_product(&store.read_all(DIM_MENU_ITEM).await.unwrap());
    assert_eq!(items.len(), 3);

    assert_eq!(items["A"][menu_item::AVG_COST_FIELD], json!(15.0));
    assert_eq!(items["A"][menu_item::LOCATION_FIELD], json!("South"));
    // OLD-B reaches B through the mapping file
    assert_eq!(items["B"][menu_item::AVG_COST_FIELD], json!(1.5));
    assert_eq!(items["B"][menu_item::LOCATION_FIELD], json!("East"));
    assert_eq!(items["C"][menu_item::AVG_COST_FIELD], Value::Null);
    assert_eq!(items["C"][menu_item::LOCATION_FIELD], Value::Null);
    assert_eq!(
        items["A"][menu_item::SURROGATE_FIELD],
        json!(ctx.surrogate_key(DIM_MENU_ITEM, "A"))
    );

    let errors = store.read_all(PIPELINE_ERRORS).await.unwrap();
    let mut identifiers: Vec<_> = errors.iter().map(|e| e["identifier"].clone()).collect();
    identifiers.sort_by_key(|v| v.to_string());
    assert_eq!(identifiers, vec![json!("GHOST"), json!("OLD-Q")]);
    assert!(errors.iter().all(|e| e["stage"] == json!("transform:dim_menu_item")));
}

#[tokio::test]
async fn test_every_staged_record_reaches_the_warehouse() {
    let store = MemoryStore::new();
    let loader = Loader::new(store.clone());
    let ctx = context();

    let customers = customer::transform(&staged(EntityKind::Users, users()), &ctx);
    loader.load(&customer::TABLE, &customers.documents).await.unwrap();
    let items = menu_item::transform(
        &staged(EntityKind::Products, products()),
        &staged(EntityKind::WarehouseImports, warehouse_imports()),
        &ctx,
    );
    loader.load(&menu_item::TABLE, &items.documents).await.unwrap();

    let customer_keys = key_map(
        &store.read_all(DIM_CUSTOMER).await.unwrap(),
        "user_id",
        customer::SURROGATE_FIELD,
    );
    let menu_item_keys = key_map(
        &store.read_all(DIM_MENU_ITEM).await.unwrap(),
        "product_id",
        menu_item::SURROGATE_FIELD,
    );
    let facts = order_line::transform(
        &staged(EntityKind::Orders, orders()),
        &customer_keys,
        &menu_item_keys,
    );
    loader.load(&order_line::TABLE, &facts.documents).await.unwrap();

    assert_eq!(store.count(DIM_CUSTOMER).await.unwrap(), 3);
    assert_eq!(store.count(DIM_MENU_ITEM).await.unwrap(), 3);
    assert_eq!(store.count(FACT_ORDER_LINE).await.unwrap(), 5);

    let o2 = store.get(FACT_ORDER_LINE, "O2:C").await.unwrap().unwrap();
    assert_eq!(o2["user_id"], json!("3"));
    assert_eq!(o2["customer_key"], json!(ctx.surrogate_key(DIM_CUSTOMER, "3")));
    assert_eq!(o2["total"], json!(8.0));

    // lookup misses keep the row
    let o3 = store.get(FACT_ORDER_LINE, "O3:Z").await.unwrap().unwrap();
    assert_eq!(o3["menu_item_key"], Value::Null);
    assert_eq!(o3["status"], json!("refunded"));
    let o4 = store.get(FACT_ORDER_LINE, "O4:A").await.unwrap().unwrap();
    assert_eq!(o4["customer_key"], Value::Null);
    assert_eq!(o4["menu_item_key"], json!(ctx.surrogate_key(DIM_MENU_ITEM, "A")));
}
