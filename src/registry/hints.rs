//! Field-detection hints: candidate input regions found by scanning each
//! template page's content stream for drawn boxes and rules, each paired
//! with the nearest text label and a keyword-based schema suggestion.
//!
//! The scan ignores transformation matrices, so hints are only a starting
//! point for an operator. They never populate a configuration on their own.

use anyhow::{Context, Result};
use lopdf::Object;
use lopdf::content::Content;
use tracing::debug;

use crate::fill::render::{Face, text_width};
use crate::model::{BoundingBox, FieldCandidate, FieldHints, FieldType};
use crate::pdf::{TemplateDocument, number};
use crate::schema::SchemaPath;
use crate::util::now_utc_string;

const MIN_RULE_WIDTH: f64 = 30.0;
const MAX_RULE_THICKNESS: f64 = 8.0;
const RULE_FIELD_HEIGHT: f64 = 14.0;
const CHECKBOX_MIN_SIDE: f64 = 5.0;
const CHECKBOX_MAX_SIDE: f64 = 30.0;
const MIN_SIDE: f64 = 2.0;

const DEFAULT_LABEL_SIZE: f64 = 12.0;
const LABEL_DESCENT: f64 = 0.2;
const TJ_SPACE_THRESHOLD: f64 = -200.0;
const LABEL_REACH_RIGHT: f64 = 50.0;
const LABEL_REACH_BELOW: f64 = 20.0;
const BELOW_PENALTY: f64 = 10.0;
const CONFIDENCE_RANGE: f64 = 200.0;
const MIN_SUGGESTION_CONFIDENCE: f64 = 0.5;

/// Keyword phrases per schema path. The longest matching phrase wins; ties
/// go to the earlier rule.
const SCHEMA_RULES: &[(&str, &[&str])] = &[
    (
        "investor.legal_name",
        &[
            "legal name",
            "investor name",
            "entity name",
            "subscriber name",
            "name of subscriber",
            "name of investor",
            "name",
        ],
    ),
    (
        "investor.entity_type",
        &["entity type", "type of entity", "type of subscriber"],
    ),
    (
        "investment.amount.value",
        &[
            "subscription amount",
            "aggregate subscription",
            "commitment amount",
            "dollar amount",
            "investment amount",
            "amount of subscription",
            "commitment",
            "amount",
        ],
    ),
    ("investment.fund_name", &["fund name", "name of fund", "partnership"]),
    ("investment.class_series", &["class", "series"]),
    (
        "investor.tax_id.value",
        &[
            "ein",
            "ssn",
            "itin",
            "tax id",
            "tax identification",
            "taxpayer identification",
            "federal tax",
        ],
    ),
    ("investor.tax_id.type", &["tax id type", "identification type"]),
    ("investor.addresses[0].line2", &["address line 2", "suite", "unit", "line 2"]),
    (
        "investor.addresses[0].line1",
        &["address", "street", "street address", "line 1", "address line 1"],
    ),
    ("investor.addresses[0].city", &["city"]),
    ("investor.addresses[0].state", &["state", "province"]),
    ("investor.addresses[0].postal_code", &["zip", "postal code", "zip code"]),
    ("investor.addresses[0].country", &["country"]),
    ("investor.contact.email", &["email", "e-mail"]),
    ("investor.contact.phone", &["phone", "telephone", "fax"]),
    (
        "signatures[0].signer_name",
        &[
            "signature",
            "signer",
            "authorized signatory",
            "signed by",
            "name of signatory",
            "print name",
        ],
    ),
    ("signatures[0].signer_title", &["title", "signer title"]),
    (
        "signatures[0].signed_date",
        &["signed date", "signing date", "date signed", "execution date", "date"],
    ),
];

/// Shown text with an approximate box in page space.
#[derive(Debug, Clone, PartialEq)]
struct TextLabel {
    text: String,
    bbox: BoundingBox,
}

pub fn detect_fields(template_id: &str, template: &TemplateDocument) -> Result<FieldHints> {
    let mut candidates = Vec::new();

    for (page_index, page_id) in template.pages.iter().enumerate() {
        let raw = template
            .document
            .get_page_content(*page_id)
            .with_context(|| format!("failed to read content of page {page_index}"))?;
        let content = Content::decode(&raw)
            .with_context(|| format!("failed to decode content of page {page_index}"))?;
        let page_box = template.media_boxes[page_index];
        let labels = scan_text(&content);

        let mut page_candidates = scan_operations(&content, page_box)
            .into_iter()
            .map(|(bbox, guess_type)| labelled_candidate(page_index, bbox, guess_type, &labels))
            .collect::<Vec<_>>();

        // Reading order: top of the page first, then left to right.
        page_candidates.sort_by(|left, right| {
            right
                .bbox
                .top()
                .total_cmp(&left.bbox.top())
                .then_with(|| left.bbox.x.total_cmp(&right.bbox.x))
        });
        page_candidates.dedup_by(|left, right| left.bbox == right.bbox);

        debug!(
            page = page_index,
            labels = labels.len(),
            candidates = page_candidates.len(),
            suggested = page_candidates
                .iter()
                .filter(|candidate| candidate.suggested_schema_path.is_some())
                .count(),
            "scanned template page"
        );
        candidates.extend(page_candidates);
    }

    Ok(FieldHints {
        template_id: template_id.to_string(),
        page_count: template.page_count(),
        generated_at: now_utc_string(),
        candidates,
    })
}

fn labelled_candidate(
    page: usize,
    bbox: BoundingBox,
    guess_type: FieldType,
    labels: &[TextLabel],
) -> FieldCandidate {
    let Some((label, distance)) = nearest_label(&bbox, labels) else {
        return FieldCandidate {
            page,
            bbox,
            guess_type,
            label_text: None,
            label_bbox: None,
            confidence: 0.0,
            suggested_schema_path: None,
        };
    };

    let confidence = confidence(distance, &label.text);
    FieldCandidate {
        page,
        bbox,
        guess_type,
        suggested_schema_path: suggest_schema_path(&label.text, confidence),
        label_text: Some(label.text.clone()),
        label_bbox: Some(rounded(label.bbox)),
        confidence,
    }
}

/// Maps a label to a schema path by keyword, whole words only, preferring
/// the longest matching phrase. Labels too far from their region get no
/// suggestion.
pub fn suggest_schema_path(label: &str, confidence: f64) -> Option<SchemaPath> {
    if confidence < MIN_SUGGESTION_CONFIDENCE {
        return None;
    }

    let words = format!(" {} ", normalized_words(label));
    if words.trim().is_empty() {
        return None;
    }

    SCHEMA_RULES
        .iter()
        .enumerate()
        .filter_map(|(rank, (path, keywords))| {
            keywords
                .iter()
                .map(|keyword| normalized_words(keyword))
                .filter(|keyword| words.contains(&format!(" {keyword} ")))
                .map(|keyword| keyword.len())
                .max()
                .map(|length| (length, rank, *path))
        })
        .max_by(|left, right| left.0.cmp(&right.0).then(right.1.cmp(&left.1)))
        .and_then(|(_, _, path)| SchemaPath::parse(path).ok())
}

fn normalized_words(text: &str) -> String {
    text.to_lowercase()
        .split(|character: char| !character.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Closest label to the left of or above `field`; lower distance is better.
fn nearest_label<'a>(field: &BoundingBox, labels: &'a [TextLabel]) -> Option<(&'a TextLabel, f64)> {
    labels
        .iter()
        .filter(|label| label.bbox.x < field.right())
        .filter(|label| {
            !(label.bbox.right() > field.x + LABEL_REACH_RIGHT
                && label.bbox.y < field.top() - LABEL_REACH_BELOW)
        })
        .map(|label| (label, label_distance(&label.bbox, field)))
        .min_by(|left, right| left.1.total_cmp(&right.1))
}

fn label_distance(label: &BoundingBox, field: &BoundingBox) -> f64 {
    let leading_gap = (field.x - label.right()).max(0.0);

    if label.y < field.top() && label.top() > field.y {
        return leading_gap;
    }

    if label.y >= field.top() {
        let horizontal = leading_gap.max(label.x - field.right());
        let vertical = label.y - field.top();
        return horizontal.powi(2) + vertical.powi(2);
    }

    leading_gap + BELOW_PENALTY * (field.y - label.top()).max(0.0)
}

fn confidence(distance: f64, label: &str) -> f64 {
    if label.trim().is_empty() {
        return 0.0;
    }
    let score = 1.0 - (distance / CONFIDENCE_RANGE).min(1.0);
    (score.clamp(0.0, 1.0) * 100.0).round() / 100.0
}

/// Collects text-showing operations with the position the text matrix
/// gives them. Glyph advance uses Helvetica metrics whatever the font.
fn scan_text(content: &Content) -> Vec<TextLabel> {
    let mut labels = Vec::new();
    let mut size = DEFAULT_LABEL_SIZE;
    let mut leading = 0.0;
    let mut line_start = (0.0, 0.0);
    let mut position = (0.0, 0.0);

    for operation in &content.operations {
        let operands = operation
            .operands
            .iter()
            .filter_map(number)
            .collect::<Vec<_>>();

        let shown = match (operation.operator.as_str(), operands.as_slice()) {
            ("BT", _) => {
                line_start = (0.0, 0.0);
                position = line_start;
                None
            }
            ("Tf", [value]) => {
                size = value.abs();
                None
            }
            ("TL", [value]) => {
                leading = *value;
                None
            }
            ("Td" | "TD", [tx, ty]) => {
                if operation.operator == "TD" {
                    leading = -ty;
                }
                line_start = (line_start.0 + tx, line_start.1 + ty);
                position = line_start;
                None
            }
            ("Tm", [_, _, _, _, e, f]) => {
                line_start = (*e, *f);
                position = line_start;
                None
            }
            ("T*", _) => {
                line_start.1 -= leading;
                position = line_start;
                None
            }
            ("Tj", _) => operation.operands.first().map(decode_text),
            ("TJ", _) => operation.operands.first().map(decode_text_array),
            ("'" | "\"", _) => {
                line_start.1 -= leading;
                position = line_start;
                operation.operands.last().map(decode_text)
            }
            _ => None,
        };

        let Some(text) = shown else {
            continue;
        };
        let label = text.trim();
        if !label.is_empty() {
            let offset = text_width(&text[..text.len() - text.trim_start().len()], size, Face::Regular);
            labels.push(TextLabel {
                text: label.to_string(),
                bbox: BoundingBox {
                    x: position.0 + offset,
                    y: position.1 - LABEL_DESCENT * size,
                    width: text_width(label, size, Face::Regular),
                    height: size,
                },
            });
        }
        position.0 += text_width(&text, size, Face::Regular);
    }

    labels
}

fn decode_text(object: &Object) -> String {
    match object {
        Object::String(bytes, _) => bytes.iter().map(|byte| char::from(*byte)).collect(),
        _ => String::new(),
    }
}

fn decode_text_array(object: &Object) -> String {
    let Object::Array(items) = object else {
        return String::new();
    };

    let mut text = String::new();
    for item in items {
        match number(item) {
            Some(adjustment) if adjustment <= TJ_SPACE_THRESHOLD => text.push(' '),
            Some(_) => {}
            None => text.push_str(&decode_text(item)),
        }
    }
    text
}

fn scan_operations(content: &Content, page_box: BoundingBox) -> Vec<(BoundingBox, FieldType)> {
    let mut found = Vec::new();
    let mut cursor: Option<(f64, f64)> = None;

    for operation in &content.operations {
        let operands = operation
            .operands
            .iter()
            .filter_map(number)
            .collect::<Vec<_>>();

        match (operation.operator.as_str(), operands.as_slice()) {
            ("re", [x, y, width, height]) => {
                let bbox = normalized(*x, *y, *width, *height);
                if let Some(guess) = classify_rectangle(&bbox) {
                    let bbox = if guess == FieldType::Text && bbox.height <= MAX_RULE_THICKNESS {
                        rule_field(bbox.x, bbox.top(), bbox.width, page_box)
                    } else {
                        bbox
                    };
                    found.push((bbox, guess));
                }
            }
            ("m", [x, y]) => cursor = Some((*x, *y)),
            ("l", [x, y]) => {
                if let Some((start_x, start_y)) = cursor {
                    let width = (x - start_x).abs();
                    if (y - start_y).abs() < 1.0 && width >= MIN_RULE_WIDTH {
                        found.push((
                            rule_field(start_x.min(*x), *y, width, page_box),
                            FieldType::Text,
                        ));
                    }
                }
                cursor = Some((*x, *y));
            }
            _ => {}
        }
    }

    found
        .into_iter()
        .filter(|(bbox, _)| bbox.is_within(&page_box))
        .map(|(bbox, guess)| (rounded(bbox), guess))
        .collect()
}

fn classify_rectangle(bbox: &BoundingBox) -> Option<FieldType> {
    if bbox.width < MIN_SIDE || bbox.height < MIN_SIDE {
        return None;
    }

    if bbox.height <= MAX_RULE_THICKNESS && bbox.width >= MIN_RULE_WIDTH {
        return Some(FieldType::Text);
    }

    let ratio = bbox.height / bbox.width;
    let side_in_range = |side: f64| (CHECKBOX_MIN_SIDE..=CHECKBOX_MAX_SIDE).contains(&side);
    if side_in_range(bbox.width) && side_in_range(bbox.height) && (0.5..=2.0).contains(&ratio) {
        return Some(FieldType::Checkbox);
    }

    if bbox.width >= 10.0 && bbox.height >= 8.0 && ratio > 1.5 && ratio < 4.0 {
        return Some(FieldType::Multiline);
    }

    if bbox.height >= 2.0 * RULE_FIELD_HEIGHT && bbox.width >= MIN_RULE_WIDTH {
        return Some(FieldType::Multiline);
    }

    Some(FieldType::Text)
}

/// A writing area sitting on top of a horizontal rule.
fn rule_field(x: f64, y: f64, width: f64, page_box: BoundingBox) -> BoundingBox {
    let height = RULE_FIELD_HEIGHT.min(page_box.top() - y).max(0.0);
    BoundingBox {
        x,
        y,
        width,
        height,
    }
}

fn normalized(x: f64, y: f64, width: f64, height: f64) -> BoundingBox {
    BoundingBox {
        x: if width < 0.0 { x + width } else { x },
        y: if height < 0.0 { y + height } else { y },
        width: width.abs(),
        height: height.abs(),
    }
}

fn rounded(bbox: BoundingBox) -> BoundingBox {
    let round = |value: f64| (value * 100.0).round() / 100.0;
    BoundingBox {
        x: round(bbox.x),
        y: round(bbox.y),
        width: round(bbox.width),
        height: round(bbox.height),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::fixtures::labelled_template_pdf;

    fn detect(bytes: &[u8]) -> FieldHints {
        let template = TemplateDocument::load(bytes).unwrap();
        detect_fields("tpl", &template).unwrap()
    }

    #[test]
    fn labels_attach_to_the_nearest_region() {
        let hints = detect(&labelled_template_pdf());
        assert_eq!(hints.candidates.len(), 4);

        let name = &hints.candidates[0];
        assert_eq!(name.guess_type, FieldType::Text);
        assert_eq!(name.label_text.as_deref(), Some("Legal Name:"));
        assert!(name.confidence > 0.85 && name.confidence < 0.95, "{}", name.confidence);
        assert_eq!(
            name.suggested_schema_path,
            Some(SchemaPath::parse("investor.legal_name").unwrap())
        );

        let amount = &hints.candidates[1];
        assert_eq!(amount.label_text.as_deref(), Some("Subscription Amount"));
        assert!(amount.confidence > 0.95);
        assert_eq!(
            amount.suggested_schema_path,
            Some(SchemaPath::parse("investment.amount.value").unwrap())
        );

        let signature = &hints.candidates[2];
        assert_eq!(signature.label_text.as_deref(), Some("Signature"));
        assert_eq!(
            signature.suggested_schema_path,
            Some(SchemaPath::parse("signatures[0].signer_name").unwrap())
        );
    }

    #[test]
    fn distant_labels_get_no_suggestion() {
        let hints = detect(&labelled_template_pdf());
        let checkbox = &hints.candidates[3];

        assert_eq!(checkbox.guess_type, FieldType::Checkbox);
        assert_eq!(checkbox.confidence, 0.0);
        assert_eq!(checkbox.suggested_schema_path, None);
    }

    #[test]
    fn keyword_rules_prefer_the_longest_whole_word_phrase() {
        let suggest = |label: &str| suggest_schema_path(label, 1.0).map(|path| path.to_string());

        assert_eq!(suggest("E-mail").as_deref(), Some("investor.contact.email"));
        assert_eq!(suggest("Zip Code").as_deref(), Some("investor.addresses[0].postal_code"));
        assert_eq!(suggest("Address Line 2").as_deref(), Some("investor.addresses[0].line2"));
        assert_eq!(suggest("Date Signed").as_deref(), Some("signatures[0].signed_date"));
        assert_eq!(suggest("Tax ID Type").as_deref(), Some("investor.tax_id.type"));
        assert_eq!(suggest("Fund Name").as_deref(), Some("investment.fund_name"));
        assert_eq!(suggest("Print Name").as_deref(), Some("signatures[0].signer_name"));
        assert_eq!(suggest("Name").as_deref(), Some("investor.legal_name"));
        assert_eq!(suggest("Being duly sworn"), None);
        assert_eq!(suggest("   "), None);
        assert_eq!(suggest_schema_path("Legal Name", 0.4), None);
    }

    #[test]
    fn label_distance_prefers_same_row_then_above() {
        let field = BoundingBox {
            x: 150.0,
            y: 600.0,
            width: 200.0,
            height: 14.0,
        };
        let beside = BoundingBox {
            x: 80.0,
            y: 602.0,
            width: 60.0,
            height: 10.0,
        };
        let above = BoundingBox {
            x: 150.0,
            y: 620.0,
            width: 60.0,
            height: 10.0,
        };
        let below = BoundingBox {
            x: 150.0,
            y: 560.0,
            width: 60.0,
            height: 10.0,
        };

        assert_eq!(label_distance(&beside, &field), 10.0);
        assert_eq!(label_distance(&above, &field), 36.0);
        assert_eq!(label_distance(&below, &field), 300.0);
        assert_eq!(confidence(0.0, ""), 0.0);
        assert_eq!(confidence(500.0, "Name"), 0.0);
    }
}
