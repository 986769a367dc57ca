use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Every node of the canonical record tree in declaration order. `[]` marks
/// a list element; the flag is true for leaves that hold scalar values.
const SCHEMA_NODES: &[(&str, bool)] = &[
    ("investor", false),
    ("investor.legal_name", true),
    ("investor.entity_type", true),
    ("investor.tax_id", false),
    ("investor.tax_id.type", true),
    ("investor.tax_id.value", true),
    ("investor.addresses", false),
    ("investor.addresses[]", false),
    ("investor.addresses[].line1", true),
    ("investor.addresses[].line2", true),
    ("investor.addresses[].city", true),
    ("investor.addresses[].state", true),
    ("investor.addresses[].postal_code", true),
    ("investor.addresses[].country", true),
    ("investor.contact", false),
    ("investor.contact.email", true),
    ("investor.contact.phone", true),
    ("investment", false),
    ("investment.fund_name", true),
    ("investment.class_series", true),
    ("investment.amount", false),
    ("investment.amount.value", true),
    ("investment.amount.currency", true),
    ("signatures", false),
    ("signatures[]", false),
    ("signatures[].signer_name", true),
    ("signatures[].signer_title", true),
    ("signatures[].signed_date", true),
];

static NULL: Value = Value::Null;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    Key(String),
    Index(usize),
}

/// A dotted path into canonical data, e.g. `signatures[0].signer_name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SchemaPath {
    segments: Vec<Segment>,
}

impl SchemaPath {
    pub fn parse(raw: &str) -> Result<Self, String> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err("schema path is empty".to_string());
        }

        let mut segments = Vec::new();
        for part in raw.split('.') {
            let (name, mut rest) = match part.find('[') {
                Some(position) => part.split_at(position),
                None => (part, ""),
            };

            let valid_name = !name.is_empty()
                && name.chars().all(|character| {
                    character.is_ascii_lowercase() || character.is_ascii_digit() || character == '_'
                });
            if !valid_name {
                return Err(format!("invalid segment `{part}` in schema path `{raw}`"));
            }
            segments.push(Segment::Key(name.to_string()));

            while !rest.is_empty() {
                let close = rest
                    .find(']')
                    .ok_or_else(|| format!("unclosed index in schema path `{raw}`"))?;
                let index = rest[1..close]
                    .parse::<usize>()
                    .map_err(|_| format!("invalid index in schema path `{raw}`"))?;
                segments.push(Segment::Index(index));
                rest = &rest[close + 1..];
                if !rest.is_empty() && !rest.starts_with('[') {
                    return Err(format!("unexpected text after index in schema path `{raw}`"));
                }
            }
        }

        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// The path with list indices erased, e.g. `signatures[].signer_name`.
    pub fn template(&self) -> String {
        render(&self.segments, true)
    }

    /// True when the path names a scalar leaf of the canonical schema.
    pub fn is_addressable(&self) -> bool {
        let template = self.template();
        SCHEMA_NODES
            .iter()
            .any(|(node, is_leaf)| *is_leaf && *node == template)
    }

    /// Sort key that orders paths the way the schema declares its fields.
    pub fn rank(&self) -> Vec<usize> {
        let mut key = Vec::with_capacity(self.segments.len());
        for (position, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Key(_) => {
                    let prefix = render(&self.segments[..=position], true);
                    let node_rank = SCHEMA_NODES
                        .iter()
                        .position(|(node, _)| *node == prefix)
                        .unwrap_or(usize::MAX);
                    key.push(node_rank);
                }
                Segment::Index(index) => key.push(*index),
            }
        }
        key
    }

    /// Walks `data` along this path; anything absent resolves to null.
    pub fn resolve<'a>(&self, data: &'a Value) -> &'a Value {
        let mut current = data;
        for segment in &self.segments {
            let next = match segment {
                Segment::Key(key) => current.get(key.as_str()),
                Segment::Index(index) => current.get(*index),
            };
            match next {
                Some(value) => current = value,
                None => return &NULL,
            }
        }
        current
    }

    /// Whether the last named key of the path contains `needle`.
    pub fn leaf_contains(&self, needle: &str) -> bool {
        self.segments
            .iter()
            .rev()
            .find_map(|segment| match segment {
                Segment::Key(key) => Some(key.contains(needle)),
                Segment::Index(_) => None,
            })
            .unwrap_or(false)
    }
}

impl PartialOrd for SchemaPath {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SchemaPath {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank()
            .cmp(&other.rank())
            .then_with(|| self.to_string().cmp(&other.to_string()))
    }
}

impl fmt::Display for SchemaPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&render(&self.segments, false))
    }
}

impl TryFrom<String> for SchemaPath {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SchemaPath> for String {
    fn from(value: SchemaPath) -> Self {
        value.to_string()
    }
}

/// All scalar leaves of the canonical schema, in declaration order.
pub fn schema_leaves() -> impl Iterator<Item = &'static str> {
    SCHEMA_NODES
        .iter()
        .filter(|(_, is_leaf)| *is_leaf)
        .map(|(node, _)| *node)
}

fn render(segments: &[Segment], erase_indices: bool) -> String {
    let mut out = String::new();
    for segment in segments {
        match segment {
            Segment::Key(key) => {
                if !out.is_empty() {
                    out.push('.');
                }
                out.push_str(key);
            }
            Segment::Index(_) if erase_indices => out.push_str("[]"),
            Segment::Index(index) => {
                out.push('[');
                out.push_str(&index.to_string());
                out.push(']');
            }
        }
    }
    out
}
