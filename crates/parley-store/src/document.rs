//! Document representation and binary-field encoding.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::Value;

/// A stored record: a JSON object.
///
/// The store does not impose a schema; the dispatcher decides which fields a
/// user or message document carries.
pub type Document = serde_json::Map<String, Value>;

/// Tag key marking a JSON object as an encoded byte string.
const BYTES_TAG: &str = "__type__";

/// Encodes raw bytes as the self-describing on-disk form:
/// `{"__type__":"bytes","data":<base64>}`.
pub fn encode_bytes(bytes: &[u8]) -> Value {
    let mut obj = serde_json::Map::new();
    obj.insert(BYTES_TAG.to_string(), Value::String("bytes".to_string()));
    obj.insert("data".to_string(), Value::String(BASE64.encode(bytes)));
    Value::Object(obj)
}

/// Decodes a tagged byte object back to raw bytes.
///
/// Returns `None` when the value is not a bytes object or the base64 payload
/// is malformed.
pub fn decode_bytes(value: &Value) -> Option<Vec<u8>> {
    let obj = value.as_object()?;
    if obj.get(BYTES_TAG)?.as_str()? != "bytes" {
        return None;
    }
    BASE64.decode(obj.get("data")?.as_str()?).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_round_trip_is_byte_exact() {
        let raw: Vec<u8> = (0u8..=255).collect();
        let encoded = encode_bytes(&raw);
        assert_eq!(decode_bytes(&encoded), Some(raw));
    }

    #[test]
    fn bytes_encoding_is_self_describing() {
        let encoded = encode_bytes(b"hunter2");
        let obj = encoded.as_object().unwrap();
        assert_eq!(obj["__type__"], "bytes");
        assert!(obj["data"].is_string());
    }

    #[test]
    fn decode_rejects_plain_objects() {
        let value: Value = serde_json::json!({"data": "aGk="});
        assert_eq!(decode_bytes(&value), None);
        assert_eq!(decode_bytes(&Value::String("aGk=".into())), None);
    }

    #[test]
    fn bytes_survive_json_serialization() {
        let raw = vec![0u8, 159, 146, 150];
        let json = serde_json::to_string(&encode_bytes(&raw)).unwrap();
        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(decode_bytes(&back), Some(raw));
    }
}
