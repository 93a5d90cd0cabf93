use serde_json::{Number, Value};

use crate::types::{field_key, value_to_key, Document, EntityKind};

pub const STAGING_USERS: &str = "staging_users";
pub const STAGING_PRODUCTS: &str = "staging_products";
pub const STAGING_ORDERS: &str = "staging_orders";
pub const STAGING_WAREHOUSE_IMPORTS: &str = "staging_warehouse_imports";

pub const DIM_CUSTOMER: &str = "dim_customer";
pub const DIM_MENU_ITEM: &str = "dim_menu_item";
pub const FACT_ORDER_LINE: &str = "fact_order_line";

/// Append-only store of rejected and unmatched inputs.
pub const PIPELINE_ERRORS: &str = "pipeline_errors";
/// One document per entity holding the producer's incremental cursor.
pub const PIPELINE_CURSORS: &str = "pipeline_cursors";

/// Separator between the parts of a composite staging key.
pub const KEY_SEPARATOR: &str = ":";

/// Everything the generic producer/consumer pair needs to know about one
/// entity type.
#[derive(Debug)]
pub struct EntitySchema {
    pub entity: EntityKind,
    pub queue: &'static str,
    pub collection: &'static str,
    /// Natural key; more than one field forms a composite key
    pub key_fields: &'static [&'static str],
    /// Identifier fields rendered as strings, keys and foreign keys alike
    pub id_fields: &'static [&'static str],
    pub numeric_fields: &'static [&'static str],
    pub cursor_field: &'static str,
    /// `(source name, uniform name)` pairs
    pub aliases: &'static [(&'static str, &'static str)],
}

static USERS: EntitySchema = EntitySchema {
    entity: EntityKind::Users,
    queue: "users",
    collection: STAGING_USERS,
    key_fields: &["user_id"],
    id_fields: &["user_id"],
    numeric_fields: &[],
    cursor_field: "updated_at",
    aliases: &[("_id", "user_id"), ("id", "user_id")],
};

static PRODUCTS: EntitySchema = EntitySchema {
    entity: EntityKind::Products,
    queue: "products",
    collection: STAGING_PRODUCTS,
    key_fields: &["product_id"],
    id_fields: &["product_id"],
    numeric_fields: &["price"],
    cursor_field: "updated_at",
    aliases: &[("_id", "product_id"), ("id", "product_id")],
};

static ORDERS: EntitySchema = EntitySchema {
    entity: EntityKind::Orders,
    queue: "orders",
    collection: STAGING_ORDERS,
    key_fields: &["order_id", "product_id"],
    id_fields: &["order_id", "product_id", "user_id"],
    numeric_fields: &["quantity", "unit_price", "subtotal", "discount", "total"],
    cursor_field: "updated_at",
    aliases: &[
        ("_id", "order_id"),
        ("id", "order_id"),
        ("customer_id", "user_id"),
        ("price", "unit_price"),
    ],
};

static WAREHOUSE_IMPORTS: EntitySchema = EntitySchema {
    entity: EntityKind::WarehouseImports,
    queue: "warehouse_imports",
    collection: STAGING_WAREHOUSE_IMPORTS,
    key_fields: &["import_id"],
    id_fields: &["import_id", "product_id"],
    numeric_fields: &["unit_cost", "quantity"],
    cursor_field: "import_date",
    aliases: &[
        ("_id", "import_id"),
        ("id", "import_id"),
        ("cost", "unit_cost"),
        ("date", "import_date"),
        ("location", "warehouse_location"),
    ],
};

impl EntitySchema {
    pub fn for_entity(entity: EntityKind) -> &'static EntitySchema {
        match entity {
            EntityKind::Users => &USERS,
            EntityKind::Products => &PRODUCTS,
            EntityKind::Orders => &ORDERS,
            EntityKind::WarehouseImports => &WAREHOUSE_IMPORTS,
        }
    }

    /// The cursor field followed by the source names that alias it.
    pub fn cursor_fields(&self) -> Vec<&'static str> {
        std::iter::once(self.cursor_field)
            .chain(
                self.aliases
                    .iter()
                    .filter(|(_, uniform)| *uniform == self.cursor_field)
                    .map(|(source, _)| *source),
            )
            .collect()
    }

    /// Rename aliases, trim strings, render identifiers as strings and
    /// coerce numeric-looking strings in numeric fields.
    ///
    /// An alias is only renamed when the uniform name is absent.
    pub fn normalize(&self, mut record: Document) -> Document {
        for (source, uniform) in self.aliases {
            if record.contains_key(*uniform) {
                continue;
            }
            if let Some(value) = record.remove(*source) {
                record.insert((*uniform).to_string(), value);
            }
        }

        for value in record.values_mut() {
            if let Value::String(s) = value {
                let trimmed = s.trim();
                if trimmed.len() != s.len() {
                    *s = trimmed.to_string();
                }
            }
        }

        for field in self.id_fields {
            if let Some(value) = record.get_mut(*field) {
                if !value.is_null() {
                    *value = value_to_key(value).map(Value::String).unwrap_or(Value::Null);
                }
            }
        }

        for field in self.numeric_fields {
            if let Some(value) = record.get_mut(*field) {
                if let Some(number) = value.as_str().and_then(coerce_number) {
                    *value = number;
                }
            }
        }

        record
    }

    /// Staging key of a normalized record, or the validation failure reason.
    pub fn staging_key(&self, record: &Document) -> Result<String, String> {
        let mut parts = Vec::with_capacity(self.key_fields.len());
        for field in self.key_fields {
            match field_key(record, field) {
                Some(part) => parts.push(part),
                None => return Err(format!("missing or empty {field}")),
            }
        }
        Ok(parts.join(KEY_SEPARATOR))
    }
}

fn coerce_number(s: &str) -> Option<Value> {
    let s = s.trim();
    if let Ok(int) = s.parse::<i64>() {
        return Some(Value::Number(int.into()));
    }
    s.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
}
