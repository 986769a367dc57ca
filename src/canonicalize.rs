//! Maps extracted key/value data onto the canonical schema.
//!
//! Pure and deterministic. Keys the extractor did not produce resolve to
//! null; never invents values. Containers of the wrong JSON type are
//! reported as extraction errors.

use chrono::NaiveDate;
use serde_json::{Map, Value};

use crate::error::{PipelineError, PipelineResult};
use crate::extract::{ExtractedData, json_type_name};
use crate::schema::{
    Address, Amount, AmountValue, CanonicalData, Contact, Investment, Investor, Signature, TaxId,
};

const DATE_INPUT_FORMATS: &[&str] = &[
    "%m/%d/%Y",
    "%m-%d-%Y",
    "%Y-%m-%d",
    "%B %d, %Y",
    "%b %d, %Y",
    "%d %B %Y",
];

pub fn canonicalize(extracted: &ExtractedData) -> PipelineResult<CanonicalData> {
    let root = match extracted.as_value() {
        Value::Object(map) => map,
        other => {
            return Err(shape_error("$", "object", other));
        }
    };

    Ok(CanonicalData {
        investor: object(root.get("investor"), "investor")?
            .map(investor)
            .transpose()?,
        investment: object(root.get("investment"), "investment")?
            .map(investment)
            .transpose()?,
        signatures: array(root.get("signatures"), "signatures")?
            .map(|items| records(items, "signatures", signature))
            .transpose()?,
    })
}

fn investor(map: &Map<String, Value>) -> PipelineResult<Investor> {
    Ok(Investor {
        legal_name: text(map.get("legal_name"), "investor.legal_name")?,
        entity_type: text(map.get("entity_type"), "investor.entity_type")?,
        tax_id: object(map.get("tax_id"), "investor.tax_id")?
            .map(|tax_id| -> PipelineResult<TaxId> {
                Ok(TaxId {
                    id_type: text(tax_id.get("type"), "investor.tax_id.type")?,
                    value: text(tax_id.get("value"), "investor.tax_id.value")?,
                })
            })
            .transpose()?,
        addresses: array(map.get("addresses"), "investor.addresses")?
            .map(|items| records(items, "investor.addresses", address))
            .transpose()?,
        contact: object(map.get("contact"), "investor.contact")?
            .map(|contact| -> PipelineResult<Contact> {
                Ok(Contact {
                    email: text(contact.get("email"), "investor.contact.email")?,
                    phone: text(contact.get("phone"), "investor.contact.phone")?,
                })
            })
            .transpose()?,
    })
}

fn address(map: &Map<String, Value>, path: &str) -> PipelineResult<Address> {
    let field = |name: &str| text(map.get(name), &format!("{path}.{name}"));
    Ok(Address {
        line1: field("line1")?,
        line2: field("line2")?,
        city: field("city")?,
        state: field("state")?.map(uppercase_state),
        postal_code: field("postal_code")?,
        country: field("country")?,
    })
}

fn investment(map: &Map<String, Value>) -> PipelineResult<Investment> {
    Ok(Investment {
        fund_name: text(map.get("fund_name"), "investment.fund_name")?,
        class_series: text(map.get("class_series"), "investment.class_series")?,
        amount: object(map.get("amount"), "investment.amount")?
            .map(|amount| -> PipelineResult<Amount> {
                Ok(Amount {
                    value: amount_value(amount.get("value"), "investment.amount.value")?,
                    currency: text(amount.get("currency"), "investment.amount.currency")?,
                })
            })
            .transpose()?,
    })
}

fn signature(map: &Map<String, Value>, path: &str) -> PipelineResult<Signature> {
    let field = |name: &str| text(map.get(name), &format!("{path}.{name}"));
    Ok(Signature {
        signer_name: field("signer_name")?,
        signer_title: field("signer_title")?,
        signed_date: field("signed_date")?.map(normalize_date),
    })
}

fn records<T>(
    items: &[Value],
    path: &str,
    build: impl Fn(&Map<String, Value>, &str) -> PipelineResult<T>,
) -> PipelineResult<Vec<T>>
where
    T: Default,
{
    items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            let item_path = format!("{path}[{index}]");
            match item {
                Value::Object(map) => build(map, &item_path),
                Value::Null => Ok(T::default()),
                other => Err(shape_error(&item_path, "object", other)),
            }
        })
        .collect()
}

fn object<'a>(value: Option<&'a Value>, path: &str) -> PipelineResult<Option<&'a Map<String, Value>>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(map)) => Ok(Some(map)),
        Some(other) => Err(shape_error(path, "object", other)),
    }
}

fn array<'a>(value: Option<&'a Value>, path: &str) -> PipelineResult<Option<&'a [Value]>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Array(items)) => Ok(Some(items.as_slice())),
        Some(other) => Err(shape_error(path, "array", other)),
    }
}

fn text(value: Option<&Value>, path: &str) -> PipelineResult<Option<String>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(raw)) => {
            let trimmed = raw.trim();
            Ok((!trimmed.is_empty()).then(|| trimmed.to_string()))
        }
        Some(Value::Number(number)) => Ok(Some(number.to_string())),
        Some(Value::Bool(flag)) => Ok(Some(flag.to_string())),
        Some(other) => Err(shape_error(path, "scalar", other)),
    }
}

fn amount_value(value: Option<&Value>, path: &str) -> PipelineResult<Option<AmountValue>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(number)) => Ok(match number.as_i64() {
            Some(integer) => Some(AmountValue::Integer(integer)),
            None => number.as_f64().map(AmountValue::Decimal),
        }),
        Some(Value::String(raw)) => Ok(parse_amount(raw)),
        Some(other) => Err(shape_error(path, "number or string", other)),
    }
}

/// `"$1,000,000"` becomes `1000000`; unparsable text is kept as text.
pub fn parse_amount(raw: &str) -> Option<AmountValue> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let cleaned = trimmed.trim_start_matches('$').replace(',', "");
    let cleaned = cleaned.trim();
    let parsed = if cleaned.contains('.') {
        cleaned.parse::<f64>().ok().filter(|value| value.is_finite()).map(AmountValue::Decimal)
    } else {
        cleaned.parse::<i64>().ok().map(AmountValue::Integer)
    };

    Some(parsed.unwrap_or_else(|| AmountValue::Text(trimmed.to_string())))
}

fn uppercase_state(state: String) -> String {
    if state.chars().count() == 2 && state.chars().all(char::is_alphabetic) {
        state.to_uppercase()
    } else {
        state
    }
}

/// Best-effort ISO `YYYY-MM-DD`; unrecognised dates are kept verbatim.
pub fn normalize_date(raw: String) -> String {
    parse_date(&raw)
        .map(|date| date.format("%Y-%m-%d").to_string())
        .unwrap_or(raw)
}

pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    DATE_INPUT_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(trimmed, format).ok())
}

fn shape_error(path: &str, expected: &str, found: &Value) -> PipelineError {
    PipelineError::Extraction(format!(
        "extracted `{path}` must be {expected}, got {}",
        json_type_name(found)
    ))
}
