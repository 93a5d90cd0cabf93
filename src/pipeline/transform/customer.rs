use serde_json::Value;
use std::collections::HashSet;

use super::{TransformContext, TransformOutput, WarehouseTable};
use crate::pipeline::schema::DIM_CUSTOMER;
use crate::types::{field_key, Document};

pub const TABLE: WarehouseTable = WarehouseTable {
    collection: DIM_CUSTOMER,
    key_fields: &["user_id"],
};

pub const SURROGATE_FIELD: &str = "customer_key";

/// One customer row per staged user, attributes passed through.
pub fn transform(users: &[Document], ctx: &TransformContext) -> TransformOutput {
    let mut seen = HashSet::new();
    let mut documents = Vec::with_capacity(users.len());

    for user in users {
        let Some(user_id) = field_key(user, "user_id") else {
            continue;
        };
        if !seen.insert(user_id.clone()) {
            continue;
        }
        let mut row = user.clone();
        row.insert(
            SURROGATE_FIELD.to_string(),
            Value::String(ctx.surrogate_key(DIM_CUSTOMER, &user_id)),
        );
        documents.push(row);
    }

    TransformOutput {
        documents,
        errors: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_one_row_per_identified_user() {
        let ctx = TransformContext::default();
        let users: Vec<Document> = [
            json!({"user_id": "u1", "name": "Ana"}),
            json!({"name": "anonymous"}),
            json!({"user_id": "u2", "name": "Ben"}),
        ]
        .into_iter()
        .filter_map(|v| v.as_object().cloned())
        .collect();

        let output = transform(&users, &ctx);
        assert_eq!(output.documents.len(), 2);
        assert_eq!(output.documents[0]["name"], json!("Ana"));
        assert_eq!(
            output.documents[1][SURROGATE_FIELD],
            json!(ctx.surrogate_key(DIM_CUSTOMER, "u2"))
        );
        assert!(output.errors.is_empty());
    }
}
