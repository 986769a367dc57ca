//! Advisory rule checks over canonical data.
//!
//! Never fails: absent or mismatched data becomes a finding. Findings are
//! sorted into schema order so reports diff cleanly between runs.

use crate::canonicalize::parse_date;
use crate::model::{Finding, Severity, ValidationReport, ValidationStatus};
use crate::schema::{Address, CanonicalData, Investment, Investor, SchemaPath, Signature};

pub const ALLOWED_ENTITY_TYPES: &[&str] = &[
    "Individual",
    "Joint",
    "Trust",
    "IRA",
    "LLC",
    "Corporation",
    "Partnership",
    "Other",
];

const REQUIRED_ADDRESS_PARTS: &[&str] = &["line1", "city", "state", "postal_code", "country"];

/// Paths whose absence marks a filled case as needing review.
pub const REQUIRED_PATHS: &[&str] = &[
    "investor.legal_name",
    "investment.amount.value",
    "signatures[0].signer_name",
];

pub fn validate(canonical: &CanonicalData) -> ValidationReport {
    let mut findings = Findings::default();

    match canonical.investor.as_ref() {
        Some(investor) => check_investor(investor, canonical.signatures.as_deref(), &mut findings),
        None => findings.error("investor", "investor missing"),
    }

    match canonical.investment.as_ref() {
        Some(investment) => check_investment(investment, &mut findings),
        None => findings.error("investment", "investment missing"),
    }

    match canonical.signatures.as_deref() {
        Some(signatures) if !signatures.is_empty() => check_signatures(signatures, &mut findings),
        _ => findings.error("signatures", "signatures missing or empty"),
    }

    let mut findings = findings.0;
    findings.sort_by(|left, right| left.path.cmp(&right.path));

    let status = if findings
        .iter()
        .any(|finding| finding.severity == Severity::Error)
    {
        ValidationStatus::NeedsReview
    } else {
        ValidationStatus::Pass
    };

    ValidationReport { status, findings }
}

/// Required paths that resolve to no visible value.
pub fn missing_required(canonical: &CanonicalData) -> Vec<String> {
    REQUIRED_PATHS
        .iter()
        .filter(|raw| {
            SchemaPath::parse(raw)
                .map(|path| !canonical.resolve(&path).is_present())
                .unwrap_or(true)
        })
        .map(|raw| raw.to_string())
        .collect()
}

fn check_investor(investor: &Investor, signatures: Option<&[Signature]>, findings: &mut Findings) {
    if is_blank(investor.legal_name.as_deref()) {
        findings.error("investor.legal_name", "investor.legal_name missing");
    }

    match investor.entity_type.as_deref().map(str::trim) {
        None | Some("") => findings.error("investor.entity_type", "investor.entity_type missing"),
        Some(entity_type) if !ALLOWED_ENTITY_TYPES.contains(&entity_type) => findings.error(
            "investor.entity_type",
            &format!(
                "investor.entity_type `{entity_type}` not in allowed set: {}",
                ALLOWED_ENTITY_TYPES.join(", ")
            ),
        ),
        Some("Joint") => {
            let named = signatures
                .unwrap_or_default()
                .iter()
                .filter(|signature| !is_blank(signature.signer_name.as_deref()))
                .count();
            if named < 2 {
                findings.warning(
                    "investor.entity_type",
                    &format!("joint investors need two named signers, found {named}"),
                );
            }
        }
        Some(_) => {}
    }

    if let Some(tax_id) = investor.tax_id.as_ref() {
        if let Some(value) = tax_id.value.as_deref() {
            if !tax_id_format_valid(tax_id.id_type.as_deref(), value) {
                findings.warning(
                    "investor.tax_id.value",
                    "tax_id.value present but invalid format",
                );
            }
        }
    }

    if let Some(addresses) = investor.addresses.as_deref() {
        for (index, address) in addresses.iter().enumerate() {
            check_address(index, address, findings);
        }
    }
}

fn check_address(index: usize, address: &Address, findings: &mut Findings) {
    for part in REQUIRED_ADDRESS_PARTS {
        let value = match *part {
            "line1" => address.line1.as_deref(),
            "city" => address.city.as_deref(),
            "state" => address.state.as_deref(),
            "postal_code" => address.postal_code.as_deref(),
            _ => address.country.as_deref(),
        };
        if is_blank(value) {
            findings.warning(
                &format!("investor.addresses[{index}].{part}"),
                &format!("missing or empty {part}"),
            );
        }
    }
}

fn check_investment(investment: &Investment, findings: &mut Findings) {
    let Some(amount) = investment.amount.as_ref() else {
        findings.error("investment.amount", "investment.amount missing");
        return;
    };

    let path = "investment.amount.value";
    match amount.value.as_ref() {
        None => findings.error(path, "investment.amount.value missing"),
        Some(value) => match value.as_number() {
            None => findings.error(path, "investment.amount.value must be a number"),
            Some(number) if number <= 0.0 => {
                findings.error(path, "investment.amount.value must be > 0")
            }
            Some(_) => {}
        },
    }
}

fn check_signatures(signatures: &[Signature], findings: &mut Findings) {
    if is_blank(signatures[0].signer_name.as_deref()) {
        findings.error(
            "signatures[0].signer_name",
            "signatures[0].signer_name missing",
        );
    }

    let named = signatures
        .iter()
        .filter(|signature| !is_blank(signature.signer_name.as_deref()))
        .count();
    if named < signatures.len() {
        findings.warning(
            "signatures",
            &format!(
                "{} signature blocks but only {named} named signers",
                signatures.len()
            ),
        );
    }

    for (index, signature) in signatures.iter().enumerate() {
        if let Some(date) = signature.signed_date.as_deref() {
            if parse_date(date).is_none() {
                findings.warning(
                    &format!("signatures[{index}].signed_date"),
                    &format!("signed_date `{date}` is not a recognised date"),
                );
            }
        }
    }
}

fn tax_id_format_valid(tax_type: Option<&str>, value: &str) -> bool {
    let digits = value.chars().filter(char::is_ascii_digit).count();
    match tax_type {
        Some("SSN" | "ITIN" | "EIN") => digits == 9,
        _ => true,
    }
}

fn is_blank(value: Option<&str>) -> bool {
    value.map(|text| text.trim().is_empty()).unwrap_or(true)
}

#[derive(Default)]
struct Findings(Vec<Finding>);

impl Findings {
    fn error(&mut self, path: &str, message: &str) {
        self.push(Severity::Error, path, message);
    }

    fn warning(&mut self, path: &str, message: &str) {
        self.push(Severity::Warning, path, message);
    }

    fn push(&mut self, severity: Severity, path: &str, message: &str) {
        if let Ok(path) = SchemaPath::parse(path) {
            self.0.push(Finding {
                severity,
                path,
                message: message.to_string(),
            });
        }
    }
}
