//! Fixed-shape canonical record tree shared by validation and filling.

use serde::{Deserialize, Serialize};
use serde_json::Value;

mod path;
#[cfg(test)]
mod tests;

pub use path::{SchemaPath, Segment, schema_leaves};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CanonicalData {
    pub investor: Option<Investor>,
    pub investment: Option<Investment>,
    pub signatures: Option<Vec<Signature>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Investor {
    pub legal_name: Option<String>,
    pub entity_type: Option<String>,
    pub tax_id: Option<TaxId>,
    pub addresses: Option<Vec<Address>>,
    pub contact: Option<Contact>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaxId {
    #[serde(rename = "type")]
    pub id_type: Option<String>,
    pub value: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Address {
    pub line1: Option<String>,
    pub line2: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Contact {
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Investment {
    pub fund_name: Option<String>,
    pub class_series: Option<String>,
    pub amount: Option<Amount>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Amount {
    pub value: Option<AmountValue>,
    pub currency: Option<String>,
}

/// A parsed amount, or the extractor's text when it could not be parsed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AmountValue {
    Integer(i64),
    Decimal(f64),
    Text(String),
}

impl AmountValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Integer(value) => Some(*value as f64),
            Self::Decimal(value) => Some(*value),
            Self::Text(_) => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Signature {
    pub signer_name: Option<String>,
    pub signer_title: Option<String>,
    pub signed_date: Option<String>,
}

impl CanonicalData {
    /// JSON view of the record used for path resolution.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    pub fn resolve(&self, path: &SchemaPath) -> FieldValue {
        FieldValue::from_json(path.resolve(&self.to_value()))
    }
}

/// A resolved scalar. Containers and absent nodes resolve to `Null`.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Text(String),
    Integer(i64),
    Decimal(f64),
    Bool(bool),
}

impl FieldValue {
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::String(text) => Self::Text(text.clone()),
            Value::Bool(flag) => Self::Bool(*flag),
            Value::Number(number) => match number.as_i64() {
                Some(integer) => Self::Integer(integer),
                None => number.as_f64().map(Self::Decimal).unwrap_or(Self::Null),
            },
            Value::Null | Value::Array(_) | Value::Object(_) => Self::Null,
        }
    }

    /// True when the value carries visible content.
    pub fn is_present(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Text(text) => !text.trim().is_empty(),
            _ => true,
        }
    }

    pub fn as_display(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::Text(text) => text.trim().to_string(),
            Self::Integer(value) => value.to_string(),
            Self::Decimal(value) => value.to_string(),
            Self::Bool(flag) => flag.to_string(),
        }
    }
}
