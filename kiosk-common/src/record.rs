use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field names of the kiosk feed.
pub mod fields {
    pub const AT: &str = "at";
    pub const SITE: &str = "site";
    pub const VAL: &str = "val";
    pub const TYPE: &str = "type";
}

/// A kiosk event exactly as it was handed to us by a record source.
///
/// Nothing about the contents is trusted: fields may be missing, null, or of the wrong
/// JSON type. Only `validation::validate` turns one of these into something the rest of
/// the pipeline can use.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawRecord(Map<String, Value>);

impl RawRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        drop(self.0.insert(field.into(), value.into()));
    }

    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(field, value);
        self
    }

    /// The raw `at` field, rendered for log lines.
    pub fn timestamp_hint(&self) -> String {
        match self.get(fields::AT) {
            Some(Value::String(at)) => at.clone(),
            Some(other) => other.to_string(),
            None => "<missing>".to_owned(),
        }
    }
}

impl From<Map<String, Value>> for RawRecord {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct NotAnObject;

impl TryFrom<Value> for RawRecord {
    type Error = NotAnObject;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            _ => Err(NotAnObject),
        }
    }
}
