//! DNS-SD TXT record set used to advertise and discover agents.

use crate::error::{TypesError, TypesResult};
use std::collections::BTreeMap;

/// Multi-valued `key=value` records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxtRecords {
    records: BTreeMap<String, Vec<String>>,
}

impl TxtRecords {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace all values of `key`.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.records.insert(key.into(), vec![value.into()]);
    }

    /// Append a value to `key`.
    pub fn add(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.records.entry(key.into()).or_default().push(value.into());
    }

    pub fn get(&self, key: &str) -> &[String] {
        self.records.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The single value of `key`; missing and repeated keys are errors.
    pub fn get_one(&self, key: &str) -> TypesResult<&str> {
        match self.get(key) {
            [value] => Ok(value.as_str()),
            [] => Err(TypesError::TxtRecord(format!("no value for key {key}"))),
            _ => Err(TypesError::TxtRecord(format!("multiple values for key {key}"))),
        }
    }

    /// Parse raw `key=value` strings. Values may contain `=`.
    pub fn from_slice<S: AsRef<str>>(pairs: &[S]) -> TypesResult<Self> {
        let mut txt = Self::new();
        for pair in pairs {
            let pair = pair.as_ref();
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| TypesError::TxtRecord(format!("missing key in {pair:?}")))?;
            txt.add(key, value);
        }
        Ok(txt)
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.records
            .iter()
            .flat_map(|(key, values)| values.iter().map(move |v| format!("{key}={v}")))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_add_get() {
        let mut txt = TxtRecords::new();
        txt.set("fp", "abc");
        txt.add("loc", "en");
        txt.add("loc", "de");
        assert_eq!(txt.get_one("fp").unwrap(), "abc");
        assert_eq!(txt.get("loc"), ["en".to_string(), "de".to_string()]);
        assert!(txt.get("missing").is_empty());
        assert!(txt.get_one("loc").is_err());
        assert!(txt.get_one("missing").is_err());
        txt.set("loc", "fr");
        assert_eq!(txt.get_one("loc").unwrap(), "fr");
    }

    #[test]
    fn test_slice_conversion() {
        let txt = TxtRecords::from_slice(&["fp=AAA=", "at=xyz", "at=uvw"]).unwrap();
        assert_eq!(txt.get_one("fp").unwrap(), "AAA=");
        assert_eq!(txt.get("at").len(), 2);
        assert_eq!(txt.to_vec(), vec!["at=xyz", "at=uvw", "fp=AAA="]);
        assert!(TxtRecords::from_slice(&["novalue"]).is_err());
    }
}
