//! Read-only summaries over the warehouse collections.

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

use crate::pipeline::schema::{
    DIM_CUSTOMER, DIM_MENU_ITEM, FACT_ORDER_LINE, PIPELINE_ERRORS, STAGING_ORDERS,
    STAGING_PRODUCTS, STAGING_USERS, STAGING_WAREHOUSE_IMPORTS,
};
use crate::pipeline::transform::menu_item;
use crate::storage::DocumentStore;
use crate::types::{field_key, field_number, Document};
use crate::Result;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionCount {
    pub collection: &'static str,
    pub documents: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductSales {
    pub product_id: String,
    pub name: Option<String>,
    pub quantity: f64,
    pub revenue: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WarehouseReport {
    pub counts: Vec<CollectionCount>,
    pub top_by_quantity: Vec<ProductSales>,
    pub top_by_revenue: Vec<ProductSales>,
    pub total_revenue: f64,
}

/// Line revenue: `total`, else `subtotal`, else quantity times unit price.
fn line_revenue(line: &Document) -> f64 {
    field_number(line, "total")
        .or_else(|| field_number(line, "subtotal"))
        .unwrap_or_else(|| {
            field_number(line, "quantity").unwrap_or(0.0)
                * field_number(line, "unit_price").unwrap_or(0.0)
        })
}

impl WarehouseReport {
    pub async fn build(store: &dyn DocumentStore, top_n: usize) -> Result<Self> {
        let mut counts = Vec::new();
        for collection in [
            STAGING_USERS,
            STAGING_PRODUCTS,
            STAGING_ORDERS,
            STAGING_WAREHOUSE_IMPORTS,
            DIM_CUSTOMER,
            DIM_MENU_ITEM,
            FACT_ORDER_LINE,
            PIPELINE_ERRORS,
        ] {
            counts.push(CollectionCount {
                collection,
                documents: store.count(collection).await?,
            });
        }

        let menu_items = store.read_all(DIM_MENU_ITEM).await?;
        let by_key: HashMap<String, &Document> = menu_items
            .iter()
            .filter_map(|item| Some((field_key(item, menu_item::SURROGATE_FIELD)?, item)))
            .collect();

        let mut sales: HashMap<String, ProductSales> = HashMap::new();
        let mut total_revenue = 0.0;
        for line in store.read_all(FACT_ORDER_LINE).await? {
            let item = field_key(&line, menu_item::SURROGATE_FIELD).and_then(|key| by_key.get(&key));
            let product_id = item
                .and_then(|item| field_key(item, "product_id"))
                .or_else(|| field_key(&line, "product_id"));
            let Some(product_id) = product_id else {
                continue;
            };

            let revenue = line_revenue(&line);
            total_revenue += revenue;
            let entry = sales.entry(product_id.clone()).or_insert_with(|| ProductSales {
                product_id,
                name: None,
                quantity: 0.0,
                revenue: 0.0,
            });
            if entry.name.is_none() {
                entry.name = item.and_then(|item| field_key(item, "name"));
            }
            entry.quantity += field_number(&line, "quantity").unwrap_or(0.0);
            entry.revenue += revenue;
        }

        let sales: Vec<ProductSales> = sales.into_values().collect();
        let top = |measure: fn(&ProductSales) -> f64| {
            let mut ranked = sales.clone();
            ranked.sort_by(|a, b| {
                measure(b)
                    .total_cmp(&measure(a))
                    .then_with(|| a.product_id.cmp(&b.product_id))
            });
            ranked.truncate(top_n);
            ranked
        };

        Ok(Self {
            top_by_quantity: top(|s| s.quantity),
            top_by_revenue: top(|s| s.revenue),
            counts,
            total_revenue,
        })
    }

    pub fn count(&self, collection: &str) -> Option<usize> {
        self.counts
            .iter()
            .find(|c| c.collection == collection)
            .map(|c| c.documents)
    }
}

impl fmt::Display for WarehouseReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Collections")?;
        for count in &self.counts {
            writeln!(f, "  {:<28} {:>8}", count.collection, count.documents)?;
        }
        for (title, ranked) in [
            ("Best sellers by quantity", &self.top_by_quantity),
            ("Best sellers by revenue", &self.top_by_revenue),
        ] {
            writeln!(f, "{title}")?;
            for (rank, product) in ranked.iter().enumerate() {
                writeln!(
                    f,
                    "  {:>2}. {:<24} qty {:>8.0}  revenue {:>12.2}",
                    rank + 1,
                    product.name.as_deref().unwrap_or(&product.product_id),
                    product.quantity,
                    product.revenue
                )?;
            }
        }
        writeln!(f, "Total revenue: {:.2}", self.total_revenue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use serde_json::json;

    fn doc(value: serde_json::Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_top_sellers_and_revenue() {
        let store = MemoryStore::new();
        store
            .upsert(DIM_MENU_ITEM, "A", doc(json!({"product_id": "A", "name": "Burger", "menu_item_key": "kA"})))
            .await
            .unwrap();
        store
            .upsert(DIM_MENU_ITEM, "B", doc(json!({"product_id": "B", "name": "Fries", "menu_item_key": "kB"})))
            .await
            .unwrap();
        for (key, line) in [
            ("O1:A", json!({"order_id": "O1", "product_id": "A", "menu_item_key": "kA", "quantity": 1, "total": 9.0})),
            ("O2:B", json!({"order_id": "O2", "product_id": "B", "menu_item_key": "kB", "quantity": 5, "unit_price": 2.0})),
            ("O3:X", json!({"order_id": "O3", "product_id": "X", "menu_item_key": null, "quantity": 2, "subtotal": 4.0})),
        ] {
            store.upsert(FACT_ORDER_LINE, key, doc(line)).await.unwrap();
        }

        let report = WarehouseReport::build(store.as_ref(), 2).await.unwrap();
        assert_eq!(report.count(FACT_ORDER_LINE), Some(3));
        assert_eq!(report.total_revenue, 23.0);
        assert_eq!(report.top_by_quantity[0].name.as_deref(), Some("Fries"));
        assert_eq!(report.top_by_quantity[1].product_id, "X");
        assert_eq!(report.top_by_revenue[0].product_id, "B");
        assert_eq!(report.top_by_revenue.len(), 2);
        assert!(report.to_string().contains("Total revenue: 23.00"));
    }
}
