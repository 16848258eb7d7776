//! Wire envelope: the unit of cross-context transmission.
//!
//! Every boundary message carries exactly one envelope serialized as a JSON
//! object with two fields, `name` and `data`. There is no versioning and no
//! framing beyond JSON's own delimiters.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A named payload exchanged across a context boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Event name the receiving bus dispatches on.
    pub name: String,
    /// Arbitrary JSON payload. A missing field decodes as `null`.
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    /// Create an envelope from a name and an already-JSON payload.
    pub fn new(name: impl Into<String>, data: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }

    /// Create an envelope from a typed application payload.
    pub fn with_payload<T: Serialize>(
        name: impl Into<String>,
        payload: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            name: name.into(),
            data: serde_json::to_value(payload)?,
        })
    }

    /// Decode the payload into a typed value.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.data.clone())
    }

    /// The envelope as a JSON object, the form handlers receive on inbound dispatch.
    pub fn to_value(&self) -> Value {
        serde_json::json!({ "name": self.name, "data": self.data })
    }

    /// Rebuild an envelope from the JSON object produced by [`Envelope::to_value`].
    pub fn from_value(value: &Value) -> Result<Self, serde_json::Error> {
        Self::deserialize(value)
    }
}

/// Serialize an envelope to its wire text.
pub fn encode_envelope(envelope: &Envelope) -> Result<String, serde_json::Error> {
    serde_json::to_string(envelope)
}

/// Parse wire text into an envelope.
pub fn decode_envelope(raw: &str) -> Result<Envelope, serde_json::Error> {
    serde_json::from_str(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_encode_decode_roundtrip() {
        let envelope = Envelope::new("echo", "hi");
        let raw = encode_envelope(&envelope).unwrap();
        let decoded = decode_envelope(&raw).unwrap();
        assert_eq!(decoded, envelope);
        assert_eq!(decoded.data, json!("hi"));
    }

    #[test]
    fn test_wire_form_has_exactly_two_fields() {
        let raw = encode_envelope(&Envelope::new("resize", json!({"w": 10}))).unwrap();
        let value: Value = serde_json::from_str(&raw).unwrap();
        let obj = value.as_object().unwrap();
        assert_eq!(obj.len(), 2);
        assert_eq!(obj["name"], "resize");
        assert_eq!(obj["data"]["w"], 10);
    }

    #[test]
    fn test_missing_data_decodes_as_null() {
        let decoded = decode_envelope(r#"{"name":"ping"}"#).unwrap();
        assert_eq!(decoded.name, "ping");
        assert!(decoded.data.is_null());
    }

    #[test]
    fn test_malformed_input_rejected() {
        assert!(decode_envelope("not json").is_err());
        assert!(decode_envelope(r#"{"data":1}"#).is_err());
        assert!(decode_envelope(r#"{"name":42,"data":1}"#).is_err());
    }

    #[test]
    fn test_typed_payload() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Resize {
            width: u32,
            height: u32,
        }

        let envelope = Envelope::with_payload(
            "resize",
            &Resize {
                width: 640,
                height: 480,
            },
        )
        .unwrap();
        let back: Resize = envelope.payload_as().unwrap();
        assert_eq!(back.width, 640);
        assert_eq!(back.height, 480);
    }

    #[test]
    fn test_value_form_matches_wire_form() {
        let envelope = Envelope::new("echo", json!([1, 2, 3]));
        let value = envelope.to_value();
        assert_eq!(value["name"], "echo");
        assert_eq!(Envelope::from_value(&value).unwrap(), envelope);
    }
}
