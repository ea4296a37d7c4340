//! Integer-keyed CBOR maps.
//!
//! Every message body is a CBOR map whose keys are small unsigned integers
//! (field positions), so bodies are built and read through [`RecordBuilder`]
//! and [`Record`] rather than serde derives, which would emit text keys.

use crate::error::{WireError, WireResult};
use ciborium::value::{Integer, Value};

/// Builds an integer-keyed map.
#[derive(Debug, Default)]
pub(crate) struct RecordBuilder {
    fields: Vec<(Value, Value)>,
}

impl RecordBuilder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn value(mut self, key: u64, value: Value) -> Self {
        self.fields.push((Value::Integer(key.into()), value));
        self
    }

    pub(crate) fn uint(self, key: u64, value: u64) -> Self {
        self.value(key, Value::Integer(value.into()))
    }

    pub(crate) fn opt_uint(self, key: u64, value: Option<u64>) -> Self {
        match value {
            Some(v) => self.uint(key, v),
            None => self,
        }
    }

    pub(crate) fn text(self, key: u64, value: &str) -> Self {
        self.value(key, Value::Text(value.to_string()))
    }

    pub(crate) fn opt_text(self, key: u64, value: Option<&str>) -> Self {
        match value {
            Some(v) => self.text(key, v),
            None => self,
        }
    }

    pub(crate) fn bytes(self, key: u64, value: &[u8]) -> Self {
        self.value(key, Value::Bytes(value.to_vec()))
    }

    pub(crate) fn uints(self, key: u64, values: impl IntoIterator<Item = u64>) -> Self {
        let array = values
            .into_iter()
            .map(|v| Value::Integer(v.into()))
            .collect();
        self.value(key, Value::Array(array))
    }

    pub(crate) fn texts(self, key: u64, values: &[String]) -> Self {
        let array = values.iter().map(|v| Value::Text(v.clone())).collect();
        self.value(key, Value::Array(array))
    }

    pub(crate) fn build(self) -> Value {
        Value::Map(self.fields)
    }
}

/// Read access to a decoded integer-keyed map.
#[derive(Debug)]
pub(crate) struct Record {
    what: &'static str,
    fields: Vec<(Value, Value)>,
}

fn as_u64(value: &Value) -> Option<u64> {
    value.as_integer().and_then(|i: Integer| u64::try_from(i).ok())
}

impl Record {
    pub(crate) fn from_value(value: Value, what: &'static str) -> WireResult<Self> {
        match value {
            Value::Map(fields) => Ok(Self { what, fields }),
            other => Err(WireError::Codec(format!(
                "{what}: expected a map, got {other:?}"
            ))),
        }
    }

    fn error(&self, key: u64, problem: &str) -> WireError {
        WireError::Codec(format!("{}: field {key} {problem}", self.what))
    }

    /// Field lookup; an explicit CBOR null reads as absent.
    fn get(&self, key: u64) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(k, _)| as_u64(k) == Some(key))
            .map(|(_, v)| v)
            .filter(|v| !v.is_null())
    }

    pub(crate) fn opt_uint(&self, key: u64) -> WireResult<Option<u64>> {
        match self.get(key) {
            None => Ok(None),
            Some(v) => as_u64(v)
                .map(Some)
                .ok_or_else(|| self.error(key, "is not an unsigned integer")),
        }
    }

    pub(crate) fn uint(&self, key: u64) -> WireResult<u64> {
        self.opt_uint(key)?
            .ok_or_else(|| self.error(key, "is missing"))
    }

    pub(crate) fn opt_text(&self, key: u64) -> WireResult<Option<String>> {
        match self.get(key) {
            None => Ok(None),
            Some(v) => v
                .as_text()
                .map(|s| Some(s.to_string()))
                .ok_or_else(|| self.error(key, "is not a text string")),
        }
    }

    pub(crate) fn text(&self, key: u64) -> WireResult<String> {
        self.opt_text(key)?
            .ok_or_else(|| self.error(key, "is missing"))
    }

    pub(crate) fn opt_bytes(&self, key: u64) -> WireResult<Option<Vec<u8>>> {
        match self.get(key) {
            None => Ok(None),
            Some(v) => v
                .as_bytes()
                .map(|b| Some(b.clone()))
                .ok_or_else(|| self.error(key, "is not a byte string")),
        }
    }

    pub(crate) fn bytes(&self, key: u64) -> WireResult<Vec<u8>> {
        self.opt_bytes(key)?
            .ok_or_else(|| self.error(key, "is missing"))
    }

    fn array(&self, key: u64) -> WireResult<&[Value]> {
        match self.get(key) {
            None => Ok(&[]),
            Some(v) => v
                .as_array()
                .map(Vec::as_slice)
                .ok_or_else(|| self.error(key, "is not an array")),
        }
    }

    /// Missing arrays decode as empty.
    pub(crate) fn uints(&self, key: u64) -> WireResult<Vec<u64>> {
        self.array(key)?
            .iter()
            .map(|v| as_u64(v).ok_or_else(|| self.error(key, "holds a non-integer")))
            .collect()
    }

    pub(crate) fn texts(&self, key: u64) -> WireResult<Vec<String>> {
        self.array(key)?
            .iter()
            .map(|v| {
                v.as_text()
                    .map(str::to_string)
                    .ok_or_else(|| self.error(key, "holds a non-string"))
            })
            .collect()
    }

    pub(crate) fn opt_record(&self, key: u64, what: &'static str) -> WireResult<Option<Record>> {
        match self.get(key) {
            None => Ok(None),
            Some(v) => Record::from_value(v.clone(), what).map(Some),
        }
    }

    pub(crate) fn record(&self, key: u64, what: &'static str) -> WireResult<Record> {
        self.opt_record(key, what)?
            .ok_or_else(|| self.error(key, "is missing"))
    }

    /// Raw access for fields with a non-map shape.
    pub(crate) fn opt_value(&self, key: u64) -> Option<&Value> {
        self.get(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_and_reader_agree() {
        let value = RecordBuilder::new()
            .uint(0, 7)
            .text(1, "chat")
            .bytes(2, b"\x01\x02")
            .uints(3, [1100, 1200])
            .texts(4, &["en".to_string()])
            .opt_uint(5, None)
            .build();
        let record = Record::from_value(value, "test").unwrap();
        assert_eq!(record.uint(0).unwrap(), 7);
        assert_eq!(record.text(1).unwrap(), "chat");
        assert_eq!(record.bytes(2).unwrap(), vec![1, 2]);
        assert_eq!(record.uints(3).unwrap(), vec![1100, 1200]);
        assert_eq!(record.texts(4).unwrap(), vec!["en"]);
        assert_eq!(record.opt_uint(5).unwrap(), None);
        assert!(record.uint(5).is_err());
    }

    #[test]
    fn test_null_and_missing_arrays_are_empty() {
        let value = Value::Map(vec![(Value::Integer(0.into()), Value::Null)]);
        let record = Record::from_value(value, "test").unwrap();
        assert!(record.uints(0).unwrap().is_empty());
        assert!(record.texts(9).unwrap().is_empty());
        assert_eq!(record.opt_text(0).unwrap(), None);
    }

    #[test]
    fn test_type_mismatch_names_the_message() {
        let value = RecordBuilder::new().text(0, "nope").build();
        let record = Record::from_value(value, "agent-info-request").unwrap();
        let err = record.uint(0).unwrap_err().to_string();
        assert!(err.contains("agent-info-request"), "{err}");
        assert!(Record::from_value(Value::Bool(true), "x").is_err());
    }
}
