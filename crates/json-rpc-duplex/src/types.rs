use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// JSON-RPC request identifier.
///
/// Outbound calls from this crate always use `Number`; `String` ids are
/// accepted from remote peers and echoed back verbatim on replies.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl RequestId {
    /// Numeric value of the id, if it is one.
    pub fn as_number(&self) -> Option<i64> {
        match self {
            RequestId::Number(n) => Some(*n),
            RequestId::String(_) => None,
        }
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{}", n),
            RequestId::String(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for RequestId {
    fn from(id: i64) -> Self {
        RequestId::Number(id)
    }
}

impl From<String> for RequestId {
    fn from(id: String) -> Self {
        RequestId::String(id)
    }
}

impl From<&str> for RequestId {
    fn from(id: &str) -> Self {
        RequestId::String(id.to_string())
    }
}

struct RequestIdVisitor;

impl<'de> Visitor<'de> for RequestIdVisitor {
    type Value = RequestId;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an integer or string request id")
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
        Ok(RequestId::Number(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
        i64::try_from(v)
            .map(RequestId::Number)
            .map_err(|_| E::custom(format!("request id {} out of range", v)))
    }

    // Peers that round-trip ids through doubles send `7.0` for `7`.
    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
        if v.fract() == 0.0 && v >= i64::MIN as f64 && v < i64::MAX as f64 {
            Ok(RequestId::Number(v as i64))
        } else {
            Err(E::custom(format!("fractional request id {}", v)))
        }
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        Ok(RequestId::String(v.to_string()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<Self::Value, E> {
        Ok(RequestId::String(v))
    }
}

impl<'de> Deserialize<'de> for RequestId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(RequestIdVisitor)
    }
}

/// Protocol version marker. Only "2.0" is representable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JsonRpcVersion {
    #[default]
    V2_0,
}

impl JsonRpcVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            JsonRpcVersion::V2_0 => crate::JSONRPC_VERSION,
        }
    }
}

impl Serialize for JsonRpcVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for JsonRpcVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let version = String::deserialize(deserializer)?;
        if version == crate::JSONRPC_VERSION {
            Ok(JsonRpcVersion::V2_0)
        } else {
            Err(de::Error::custom(format!(
                "unsupported jsonrpc version '{}'",
                version
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{from_str, to_string};

    #[test]
    fn test_integer_and_string_ids() {
        assert_eq!(from_str::<RequestId>("7").unwrap(), RequestId::Number(7));
        assert_eq!(
            from_str::<RequestId>("\"abc\"").unwrap(),
            RequestId::String("abc".to_string())
        );
        assert_eq!(to_string(&RequestId::Number(-3)).unwrap(), "-3");
        assert_eq!(to_string(&RequestId::from("x")).unwrap(), "\"x\"");
    }

    #[test]
    fn test_integral_float_id_normalizes() {
        assert_eq!(from_str::<RequestId>("7.0").unwrap(), RequestId::Number(7));
    }

    #[test]
    fn test_fractional_and_structured_ids_rejected() {
        assert!(from_str::<RequestId>("7.5").is_err());
        assert!(from_str::<RequestId>("true").is_err());
        assert!(from_str::<RequestId>("{}").is_err());
        assert!(from_str::<RequestId>("18446744073709551615").is_err());
    }

    #[test]
    fn test_version() {
        assert_eq!(to_string(&JsonRpcVersion::V2_0).unwrap(), "\"2.0\"");
        assert!(from_str::<JsonRpcVersion>("\"2.0\"").is_ok());
        assert!(from_str::<JsonRpcVersion>("\"1.0\"").is_err());
    }
}
