//! Wire envelope shared by requests, notifications and replies.
//!
//! `params` and `result` are kept as raw JSON text and only decoded when a
//! handler or caller asks for a concrete type.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::value::RawValue;

use crate::error::{CallError, JsonRpcErrorObject, MalformedMessage};
use crate::types::{JsonRpcVersion, RequestId};

/// How an inbound envelope must be handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Carries `result` or `error`; routed to the call correlator.
    Reply,
    /// Carries `method` and `id`; must be answered exactly once.
    Request,
    /// Carries `method` without `id`; must never be answered.
    Notification,
    /// Neither a reply nor a method call.
    Invalid,
}

/// A single JSON-RPC 2.0 message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "jsonrpc")]
    pub version: JsonRpcVersion,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Box<RawValue>>,
    // `"result": null` is a valid void reply, so presence matters here.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_present"
    )]
    pub result: Option<Box<RawValue>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcErrorObject>,
}

fn deserialize_present<'de, D>(deserializer: D) -> Result<Option<Box<RawValue>>, D::Error>
where
    D: Deserializer<'de>,
{
    Box::<RawValue>::deserialize(deserializer).map(Some)
}

impl Envelope {
    fn empty(id: Option<RequestId>) -> Self {
        Self {
            version: JsonRpcVersion::V2_0,
            id,
            method: None,
            params: None,
            result: None,
            error: None,
        }
    }

    pub fn request(id: RequestId, method: impl Into<String>, params: Option<Box<RawValue>>) -> Self {
        Self {
            method: Some(method.into()),
            params,
            ..Self::empty(Some(id))
        }
    }

    pub fn notification(method: impl Into<String>, params: Option<Box<RawValue>>) -> Self {
        Self {
            method: Some(method.into()),
            params,
            ..Self::empty(None)
        }
    }

    pub fn success(id: Option<RequestId>, result: Box<RawValue>) -> Self {
        Self {
            result: Some(result),
            ..Self::empty(id)
        }
    }

    pub fn failure(id: Option<RequestId>, error: JsonRpcErrorObject) -> Self {
        Self {
            error: Some(error),
            ..Self::empty(id)
        }
    }

    /// Parse one already-delimited message.
    pub fn decode(bytes: &[u8]) -> Result<Self, MalformedMessage> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn kind(&self) -> MessageKind {
        if self.result.is_some() || self.error.is_some() {
            MessageKind::Reply
        } else if self.method.is_some() {
            if self.id.is_some() {
                MessageKind::Request
            } else {
                MessageKind::Notification
            }
        } else {
            MessageKind::Invalid
        }
    }

    /// An envelope without `id` never receives a reply.
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    pub fn is_reply(&self) -> bool {
        self.kind() == MessageKind::Reply
    }
}

/// Encode outbound params.
///
/// `()` and `None` encode as `null` and still go out as `"params":null`;
/// peers may ignore envelopes without a `params` member.
pub fn encode_params<P: Serialize>(params: &P) -> serde_json::Result<Box<RawValue>> {
    serde_json::value::to_raw_value(params)
}

/// The part of a reply envelope a caller cares about
#[derive(Debug, Clone)]
pub struct Reply {
    pub id: Option<RequestId>,
    pub outcome: Result<Box<RawValue>, JsonRpcErrorObject>,
}

impl Reply {
    pub fn is_error(&self) -> bool {
        self.outcome.is_err()
    }

    /// Decode the result into `T`, or surface the remote error.
    pub fn into_result<T: DeserializeOwned>(self) -> Result<T, CallError> {
        match self.outcome {
            Ok(raw) => serde_json::from_str(raw.get()).map_err(CallError::InvalidResult),
            Err(error) => Err(CallError::Remote(error)),
        }
    }
}

impl From<Envelope> for Reply {
    // An error member wins over a result member if a peer sends both.
    fn from(envelope: Envelope) -> Self {
        let outcome = match (envelope.error, envelope.result) {
            (Some(error), _) => Err(error),
            (None, Some(result)) => Ok(result),
            (None, None) => Err(JsonRpcErrorObject::internal_error(Some(
                "reply carried neither result nor error".to_string(),
            ))),
        };
        Self {
            id: envelope.id,
            outcome,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn decode(text: &str) -> Envelope {
        Envelope::decode(text.as_bytes()).unwrap()
    }

    #[test]
    fn test_classification() {
        assert_eq!(
            decode(r#"{"jsonrpc":"2.0","id":1,"method":"m","params":[1]}"#).kind(),
            MessageKind::Request
        );
        assert_eq!(
            decode(r#"{"jsonrpc":"2.0","method":"m","params":{}}"#).kind(),
            MessageKind::Notification
        );
        assert_eq!(
            decode(r#"{"jsonrpc":"2.0","id":1,"method":"m"}"#).kind(),
            MessageKind::Request
        );
        assert_eq!(
            decode(r#"{"jsonrpc":"2.0","id":1,"result":{"ok":true}}"#).kind(),
            MessageKind::Reply
        );
        assert_eq!(
            decode(r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32600,"message":"Invalid Request"}}"#).kind(),
            MessageKind::Reply
        );
        assert_eq!(decode(r#"{"jsonrpc":"2.0","id":4}"#).kind(), MessageKind::Invalid);
    }

    #[test]
    fn test_null_result_is_still_a_reply() {
        let envelope = decode(r#"{"jsonrpc":"2.0","id":3,"result":null}"#);
        assert!(envelope.is_reply());
        let value: Value = Reply::from(envelope).into_result().unwrap();
        assert_eq!(value, Value::Null);
    }

    #[test]
    fn test_null_params_and_error_are_absent() {
        let envelope = decode(r#"{"jsonrpc":"2.0","method":"m","params":null,"error":null}"#);
        assert!(envelope.params.is_none());
        assert_eq!(envelope.kind(), MessageKind::Notification);
    }

    #[test]
    fn test_decode_rejects_malformed_input() {
        assert!(Envelope::decode(br#"{"jsonrpc":: "2.0", "id": 1 "method": "x"]"#).is_err());
        assert!(Envelope::decode(br#"{"jsonrpc":"1.0","id":1,"method":"x"}"#).is_err());
        assert!(Envelope::decode(br#"{"id":1,"method":"x"}"#).is_err());
        assert!(Envelope::decode(br#"{"jsonrpc":"2.0","id":1.5,"result":1}"#).is_err());
    }

    #[test]
    fn test_encode_wire_shapes() {
        let params = encode_params(&json!({"x": 1})).unwrap();
        let request = Envelope::request(RequestId::Number(7), "echo", Some(params));
        assert_eq!(
            String::from_utf8(request.encode().unwrap()).unwrap(),
            r#"{"jsonrpc":"2.0","id":7,"method":"echo","params":{"x":1}}"#
        );

        let notification = Envelope::notification("tick", None);
        assert_eq!(
            String::from_utf8(notification.encode().unwrap()).unwrap(),
            r#"{"jsonrpc":"2.0","method":"tick"}"#
        );

        let failure = Envelope::failure(None, JsonRpcErrorObject::invalid_request(None));
        assert_eq!(
            String::from_utf8(failure.encode().unwrap()).unwrap(),
            r#"{"jsonrpc":"2.0","error":{"code":-32600,"message":"Invalid Request"}}"#
        );
    }

    #[test]
    fn test_encode_params_keeps_null() {
        assert_eq!(encode_params(&()).unwrap().get(), "null");
        assert_eq!(encode_params(&Option::<u8>::None).unwrap().get(), "null");
        assert_eq!(encode_params(&[1, 2]).unwrap().get(), "[1,2]");

        let ping = Envelope::request(RequestId::Number(1), "ping", Some(encode_params(&()).unwrap()));
        assert_eq!(
            String::from_utf8(ping.encode().unwrap()).unwrap(),
            r#"{"jsonrpc":"2.0","id":1,"method":"ping","params":null}"#
        );
    }

    #[test]
    fn test_reply_surfaces_remote_error() {
        let reply = Reply::from(decode(
            r#"{"jsonrpc":"2.0","id":2,"error":{"code":5,"message":"nope","data":[1]}}"#,
        ));
        assert!(reply.is_error());
        match reply.into_result::<Value>() {
            Err(CallError::Remote(error)) => {
                assert_eq!(error.code, 5);
                assert_eq!(error.data, Some(json!([1])));
            }
            other => panic!("expected remote error, got {:?}", other),
        }
    }
}
