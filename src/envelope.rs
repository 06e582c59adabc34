// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Envelope
//!
//! Every message travels as a two-layer JSON document: the payload is serialized to a
//! JSON string first, then wrapped together with its type name into the outer envelope:
//!
//! ```json
//! {"MessageType":"Order","Body":"{\"id\":42}"}
//! ```
//!
//! Decoding the outer layer and interpreting the body as a concrete type are two
//! separate steps with two separate errors (`DecodeError` and `PayloadTypeMismatch`).

use crate::errors::AmqpError;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Outer wrapper carrying the type identity next to the serialized payload.
///
/// The codec does not check that `body` really is a `message_type`; that is the
/// publisher's contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    #[serde(rename = "MessageType")]
    pub message_type: String,
    #[serde(rename = "Body")]
    pub body: String,
}

impl MessageEnvelope {
    /// Interprets the body as a `T`.
    ///
    /// # Returns
    /// The typed payload or `PayloadTypeMismatch` when the body is not a valid `T`
    pub fn payload<T>(&self) -> Result<T, AmqpError>
    where
        T: DeserializeOwned,
    {
        serde_json::from_str(&self.body)
            .map_err(|err| AmqpError::PayloadTypeMismatch(self.message_type.clone(), err.to_string()))
    }
}

/// Returns the fully-qualified Rust name of `T`, used as the default message type.
pub fn type_name_of<T: ?Sized>() -> &'static str {
    std::any::type_name::<T>()
}

/// Serializes `payload` and wraps it into an envelope named `type_name`.
///
/// # Parameters
/// * `payload` - Any serializable value
/// * `type_name` - The type identifier written to `MessageType`
///
/// # Returns
/// The JSON bytes of the envelope or `EncodeError` when the payload cannot be serialized
pub fn encode<T>(payload: &T, type_name: &str) -> Result<Vec<u8>, AmqpError>
where
    T: Serialize + ?Sized,
{
    let body =
        serde_json::to_string(payload).map_err(|err| AmqpError::EncodeError(err.to_string()))?;

    let envelope = MessageEnvelope {
        message_type: type_name.to_owned(),
        body,
    };

    serde_json::to_vec(&envelope).map_err(|err| AmqpError::EncodeError(err.to_string()))
}

/// Parses the outer envelope from raw message bytes.
///
/// # Returns
/// The envelope or `DecodeError` when the bytes are not a JSON object holding
/// string `MessageType` and `Body` fields
pub fn decode(bytes: &[u8]) -> Result<MessageEnvelope, AmqpError> {
    serde_json::from_slice(bytes).map_err(|err| AmqpError::DecodeError(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Order {
        id: u64,
    }

    #[test]
    fn writes_exact_wire_format() {
        let bytes = encode(&Order { id: 42 }, "Order").unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"{"MessageType":"Order","Body":"{\"id\":42}"}"#
        );
    }

    #[test]
    fn decode_returns_type_name_and_serialized_payload() {
        let payloads = [
            serde_json::json!({"id": 42}),
            serde_json::json!("plain text"),
            serde_json::json!([1, 2, 3]),
            serde_json::json!(null),
        ];

        for value in payloads {
            let envelope = decode(&encode(&value, "app::Event").unwrap()).unwrap();
            assert_eq!(envelope.message_type, "app::Event");
            assert_eq!(envelope.body, serde_json::to_string(&value).unwrap());
        }
    }

    #[test]
    fn typed_payload_after_decode() {
        let envelope = decode(&encode(&Order { id: 7 }, "Order").unwrap()).unwrap();
        assert_eq!(envelope.payload::<Order>().unwrap(), Order { id: 7 });
    }

    #[test]
    fn malformed_envelope_is_decode_error() {
        let cases: [&[u8]; 4] = [
            b"not json",
            br#"{"MessageType":"Order"}"#,
            br#"{"Body":"{}"}"#,
            b"42",
        ];
        for raw in cases {
            assert!(matches!(decode(raw), Err(AmqpError::DecodeError(_))));
        }
    }

    #[test]
    fn wrong_body_is_payload_mismatch_not_decode_error() {
        let envelope = decode(br#"{"MessageType":"Order","Body":"\"text\""}"#).unwrap();
        assert!(matches!(
            envelope.payload::<Order>(),
            Err(AmqpError::PayloadTypeMismatch(name, _)) if name == "Order"
        ));
    }

    #[test]
    fn unserializable_payload_is_encode_error() {
        let mut map = std::collections::HashMap::new();
        map.insert((1, 2), "tuple keys are not valid json keys");
        assert!(matches!(encode(&map, "Map"), Err(AmqpError::EncodeError(_))));
    }
}
