use serde::Serialize;
use serde_json::Value;
use tradesync_core::models::Payload;

/// 单个字段的变化
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldChange {
    pub field: String,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
}

/// 比较两份字段集合，返回按字段名排序的变化列表
///
/// `ignored` 中的字段不参与比较。数值按数值比较，因此 `10` 与 `10.0` 视为相同。
pub fn diff_fields(old: &Payload, new: &Payload, ignored: &[&str]) -> Vec<FieldChange> {
    let mut changes = Vec::new();

    for (field, new_value) in new {
        if ignored.contains(&field.as_str()) {
            continue;
        }
        match old.get(field) {
            Some(old_value) if values_equal(old_value, new_value) => {}
            old_value => changes.push(FieldChange {
                field: field.clone(),
                old_value: old_value.cloned(),
                new_value: Some(new_value.clone()),
            }),
        }
    }

    for (field, old_value) in old {
        if ignored.contains(&field.as_str()) || new.contains_key(field) {
            continue;
        }
        changes.push(FieldChange {
            field: field.clone(),
            old_value: Some(old_value.clone()),
            new_value: None,
        });
    }

    changes.sort_by(|a, b| a.field.cmp(&b.field));
    changes
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(pairs: &[(&str, Value)]) -> Payload {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_identical_payloads_have_no_diff() {
        let a = payload(&[("totalRate", json!(7.5)), ("description", json!("Laptops"))]);
        assert!(diff_fields(&a, &a.clone(), &[]).is_empty());
    }

    #[test]
    fn test_changed_added_and_removed_fields() {
        let old = payload(&[("totalRate", json!(7.5)), ("unit", json!("kg"))]);
        let new = payload(&[("totalRate", json!(10.0)), ("note", json!("Section 301"))]);

        let changes = diff_fields(&old, &new, &[]);
        let fields: Vec<&str> = changes.iter().map(|c| c.field.as_str()).collect();
        assert_eq!(fields, vec!["note", "totalRate", "unit"]);

        assert_eq!(changes[0].old_value, None);
        assert_eq!(changes[1].old_value, Some(json!(7.5)));
        assert_eq!(changes[1].new_value, Some(json!(10.0)));
        assert_eq!(changes[2].new_value, None);
    }

    #[test]
    fn test_numeric_representation_is_ignored() {
        let old = payload(&[("totalRate", json!(10))]);
        let new = payload(&[("totalRate", json!(10.0))]);
        assert!(diff_fields(&old, &new, &[]).is_empty());
    }

    #[test]
    fn test_ignored_fields_are_skipped() {
        let old = payload(&[("effectiveDate", json!("2023-01-01")), ("totalRate", json!(7.5))]);
        let new = payload(&[("effectiveDate", json!("2024-06-01")), ("totalRate", json!(7.5))]);
        assert!(diff_fields(&old, &new, &["effectiveDate"]).is_empty());
    }
}
