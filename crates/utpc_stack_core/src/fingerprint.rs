use serde_json::Value;
use sha2::{Digest, Sha256};

/// SHA-256 over the compact JSON encoding of a resolved property set.
///
/// `serde_json` objects are key-ordered maps, so equal property sets always
/// encode to the same bytes.
pub fn properties_fingerprint(properties: &Value) -> String {
    bytes_fingerprint(properties.to_string().as_bytes())
}

pub fn bytes_fingerprint(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn fingerprint_ignores_key_insertion_order() {
        let mut first = serde_json::Map::new();
        first.insert("timeout_seconds".to_string(), json!(60));
        first.insert("handler".to_string(), json!("main.lambda_handler"));

        let mut second = serde_json::Map::new();
        second.insert("handler".to_string(), json!("main.lambda_handler"));
        second.insert("timeout_seconds".to_string(), json!(60));

        assert_eq!(
            properties_fingerprint(&Value::Object(first)),
            properties_fingerprint(&Value::Object(second))
        );
    }

    #[test]
    fn fingerprint_changes_with_values() {
        assert_ne!(
            properties_fingerprint(&json!({"ENV_HOST_MYSQL": "db-1"})),
            properties_fingerprint(&json!({"ENV_HOST_MYSQL": "db-2"}))
        );
    }
}
