//! Typed cell values carried by sequence records.

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Runtime value of a tracked attribute
///
/// Mirrors the set of scalar types a measurement typically carries. The enum is
/// externally tagged so it survives non-self-describing formats (postcard).
/// In human-readable formats (JSON) non-finite floats are written as the
/// strings `"NaN"`, `"inf"` and `"-inf"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Bool(bool),
    I64(i64),
    U64(u64),
    F64(#[serde(with = "float")] f64),
    Text(String),
    Bytes(Vec<u8>),
    Vector(#[serde(with = "float_vec")] Vec<f64>),
}

/// f64 with a textual fallback for NaN and infinities
struct Float(f64);

impl Serialize for Float {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let v = self.0;
        if !serializer.is_human_readable() || v.is_finite() {
            serializer.serialize_f64(v)
        } else if v.is_nan() {
            serializer.serialize_str("NaN")
        } else if v > 0.0 {
            serializer.serialize_str("inf")
        } else {
            serializer.serialize_str("-inf")
        }
    }
}

struct FloatVisitor;

impl Visitor<'_> for FloatVisitor {
    type Value = f64;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a number or one of \"NaN\", \"inf\", \"-inf\"")
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<f64, E> {
        Ok(v)
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<f64, E> {
        Ok(v as f64)
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<f64, E> {
        Ok(v as f64)
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<f64, E> {
        v.parse::<f64>()
            .ok()
            .filter(|f| !f.is_finite())
            .ok_or_else(|| E::invalid_value(de::Unexpected::Str(v), &self))
    }
}

impl<'de> Deserialize<'de> for Float {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            deserializer.deserialize_any(FloatVisitor).map(Float)
        } else {
            f64::deserialize(deserializer).map(Float)
        }
    }
}

mod float {
    use super::Float;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(v: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        Float(*v).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Float::deserialize(deserializer).map(|f| f.0)
    }
}

mod float_vec {
    use super::Float;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &[f64], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(v.iter().map(|x| Float(*x)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<f64>, D::Error> {
        let floats = Vec::<Float>::deserialize(deserializer)?;
        Ok(floats.into_iter().map(|f| f.0).collect())
    }
}

impl Value {
    /// Integer view of the value, if it is integral
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::I64(v) => Some(*v),
            Value::U64(v) => i64::try_from(*v).ok(),
            Value::Bool(v) => Some(*v as i64),
            _ => None,
        }
    }

    /// Floating point view of the value, if it is numeric
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::F64(v) => Some(*v),
            Value::I64(v) => Some(*v as f64),
            Value::U64(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Text view of the value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Short type name, used in log messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::I64(_) => "i64",
            Value::U64(_) => "u64",
            Value::F64(_) => "f64",
            Value::Text(_) => "text",
            Value::Bytes(_) => "bytes",
            Value::Vector(_) => "vector",
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::I64(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::I64(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::U64(v as u64)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::U64(v)
    }
}

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Value::U64(v as u64)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::F64(v as f64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::F64(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<Vec<f64>> for Value {
    fn from(v: Vec<f64>) -> Self {
        Value::Vector(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_views() {
        assert_eq!(Value::from(7).as_i64(), Some(7));
        assert_eq!(Value::from(7u64).as_i64(), Some(7));
        assert_eq!(Value::from(u64::MAX).as_i64(), None);
        assert_eq!(Value::from(2.5).as_f64(), Some(2.5));
        assert_eq!(Value::from(3).as_f64(), Some(3.0));
        assert_eq!(Value::from("loss").as_f64(), None);
    }

    #[test]
    fn test_text_view() {
        assert_eq!(Value::from("adam").as_str(), Some("adam"));
        assert_eq!(Value::from(true).as_str(), None);
        assert_eq!(Value::from(vec![1u8, 2]).type_name(), "bytes");
    }

    #[test]
    fn test_non_finite_floats_in_json() {
        let json = serde_json::to_string(&Value::F64(f64::NAN)).unwrap();
        assert_eq!(json, r#"{"F64":"NaN"}"#);

        let vector = Value::Vector(vec![1.5, f64::INFINITY, f64::NEG_INFINITY]);
        let json = serde_json::to_string(&vector).unwrap();
        assert_eq!(json, r#"{"Vector":[1.5,"inf","-inf"]}"#);
        assert_eq!(serde_json::from_str::<Value>(&json).unwrap(), vector);

        // Only the non-finite spellings are accepted as strings
        assert!(serde_json::from_str::<Value>(r#"{"F64":"1.5"}"#).is_err());
        assert_eq!(
            serde_json::from_str::<Value>(r#"{"F64":2}"#).unwrap(),
            Value::F64(2.0)
        );
    }

    #[test]
    fn test_postcard_floats_stay_binary() {
        let bytes = postcard::to_allocvec(&Value::F64(f64::NAN)).unwrap();
        // Variant tag plus eight bytes of IEEE 754
        assert_eq!(bytes.len(), 9);
        let decoded: Value = postcard::from_bytes(&bytes).unwrap();
        assert!(decoded.as_f64().unwrap().is_nan());
    }
}
