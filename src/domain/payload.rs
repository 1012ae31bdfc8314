//! Typed target payloads and their JSON rendering

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value, json};

use super::target_spec::DateEncoding;

/// Existing records of one target for one chunk, keyed by normalized email.
pub type ExistingRecordMap = HashMap<String, Value>;

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Number(f64),
    Timestamp(DateTime<Utc>),
}

impl FieldValue {
    /// Only an empty string counts as empty; numbers and timestamps never do.
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Text(s) if s.is_empty())
    }

    pub fn to_json(&self, encoding: DateEncoding) -> Value {
        match self {
            Self::Text(s) => Value::String(s.clone()),
            Self::Number(n) => json!(n),
            Self::Timestamp(ts) => match encoding {
                DateEncoding::IsoString => Value::String(to_utc_iso(ts)),
                DateEncoding::ParseDate => json!({
                    "__type": "Date",
                    "iso": ts.to_rfc3339_opts(SecondsFormat::Millis, true),
                }),
            },
        }
    }
}

/// `YYYY-MM-DDTHH:MM:SSZ`
pub fn to_utc_iso(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// One row mapped onto one target.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedPayload {
    identity_field: String,
    fields: BTreeMap<String, FieldValue>,
}

impl NormalizedPayload {
    pub fn new(identity_field: impl Into<String>, email: impl Into<String>) -> Self {
        let identity_field = identity_field.into();
        let mut fields = BTreeMap::new();
        fields.insert(identity_field.clone(), FieldValue::Text(email.into()));
        Self {
            identity_field,
            fields,
        }
    }

    pub fn email(&self) -> &str {
        match self.fields.get(&self.identity_field) {
            Some(FieldValue::Text(s)) => s,
            _ => "",
        }
    }

    pub fn identity_field(&self) -> &str {
        &self.identity_field
    }

    /// The identity field is fixed at construction and cannot be overwritten.
    pub fn insert(&mut self, field: impl Into<String>, value: FieldValue) {
        let field = field.into();
        if field != self.identity_field {
            self.fields.insert(field, value);
        }
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    pub fn timestamp(&self, field: &str) -> Option<DateTime<Utc>> {
        match self.fields.get(field) {
            Some(FieldValue::Timestamp(ts)) => Some(*ts),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn to_json(&self, encoding: DateEncoding) -> Value {
        Value::Object(
            self.fields
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json(encoding)))
                .collect::<Map<String, Value>>(),
        )
    }

    /// Update body: allow-listed fields that are present and non-empty.
    /// The identity field never survives, even if listed.
    pub fn restricted_to(&self, allow_list: &[String], encoding: DateEncoding) -> Map<String, Value> {
        allow_list
            .iter()
            .filter(|name| **name != self.identity_field)
            .filter_map(|name| {
                self.fields
                    .get(name)
                    .filter(|v| !v.is_empty())
                    .map(|v| (name.clone(), v.to_json(encoding)))
            })
            .collect()
    }
}
