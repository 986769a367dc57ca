//! Turns one mapping plus its resolved value into positioned text runs.
//!
//! Pure layout: no PDF objects are touched here. Widths come from the
//! standard Helvetica metrics, so placement matches what viewers render
//! for the Type1 base font.

use std::fmt::Write as _;

use crate::canonicalize::parse_date;
use crate::model::{BoundingBox, FieldMapping, FieldType};
use crate::schema::{FieldValue, Segment};

pub const DEFAULT_FONT_SIZE: f64 = 10.0;
pub const MIN_FONT_SIZE: f64 = 4.0;
pub const DEFAULT_DATE_FORMAT: &str = "%m/%d/%Y";
const SHRINK_STEP: f64 = 0.5;
const PADDING: f64 = 2.0;
const LINE_HEIGHT: f64 = 1.2;
const CAP_HEIGHT: f64 = 0.718;
const CHECK_MARK: &str = "X";
const TRUTHY: &[&str] = &["x", "y", "yes", "true", "1", "on", "check", "checked"];

/// Advance widths for WinAnsi codes 32..=126, in 1/1000 em.
const HELVETICA_WIDTHS: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278, // ' '../
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 278, 278, 584, 584, 584, 556, // 0..?
    1015, 667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, 722, 778, // @..O
    667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, 278, 278, 278, 469, 556, // P.._
    333, 556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, 556, 556, // `..o
    556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, 334, 260, 334, 584, // p..~
];
const FALLBACK_WIDTH: u16 = 556;
const HELVETICA_BOLD_X_WIDTH: u16 = 667;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Face {
    Regular,
    Bold,
}

/// One line of text placed at a baseline origin in page space.
#[derive(Debug, Clone, PartialEq)]
pub struct TextRun {
    pub face: Face,
    pub size: f64,
    pub x: f64,
    pub y: f64,
    pub text: String,
}

pub fn layout(mapping: &FieldMapping, value: &FieldValue) -> Vec<TextRun> {
    let preferred = mapping
        .font_size
        .filter(|size| size.is_finite() && *size > 0.0)
        .unwrap_or(DEFAULT_FONT_SIZE);

    match mapping.field_type {
        FieldType::Checkbox => {
            if is_checked(mapping, value) {
                vec![check_mark(mapping.bbox)]
            } else {
                Vec::new()
            }
        }
        FieldType::Multiline => {
            let text = display_text(mapping, value);
            if text.is_empty() {
                return Vec::new();
            }
            multiline(&text, mapping.bbox, preferred)
        }
        FieldType::Text | FieldType::Date => {
            let text = single_line_text(&display_text(mapping, value));
            if text.is_empty() {
                return Vec::new();
            }
            vec![single_line(&text, mapping.bbox, preferred)]
        }
    }
}

/// The string drawn for a value; empty for null or blank values.
pub fn display_text(mapping: &FieldMapping, value: &FieldValue) -> String {
    if !value.is_present() {
        return String::new();
    }

    if mapping.field_type == FieldType::Date {
        if let FieldValue::Text(raw) = value {
            let format = mapping.format.as_deref().unwrap_or(DEFAULT_DATE_FORMAT);
            return format_date(raw, format);
        }
    }

    if is_amount_path(mapping) {
        match value {
            FieldValue::Integer(amount) => return group_thousands(&amount.to_string()),
            FieldValue::Decimal(amount) => return format_decimal_amount(*amount),
            _ => {}
        }
    }

    value.as_display()
}

pub fn is_checked(mapping: &FieldMapping, value: &FieldValue) -> bool {
    if let Some(expected) = mapping.checked_when_equals.as_deref() {
        return value.is_present() && value.as_display().eq_ignore_ascii_case(expected.trim());
    }

    match value {
        FieldValue::Bool(flag) => *flag,
        FieldValue::Integer(number) => *number != 0,
        FieldValue::Decimal(number) => *number != 0.0,
        FieldValue::Text(text) => {
            let text = text.trim().to_ascii_lowercase();
            TRUTHY.contains(&text.as_str())
        }
        FieldValue::Null => false,
    }
}

/// Width of `text` in points at `size` in the given face.
pub fn text_width(text: &str, size: f64, face: Face) -> f64 {
    let units: u32 = text
        .chars()
        .map(|character| u32::from(glyph_width(character, face)))
        .sum();
    f64::from(units) / 1000.0 * size
}

fn glyph_width(character: char, face: Face) -> u16 {
    if face == Face::Bold && character == 'X' {
        return HELVETICA_BOLD_X_WIDTH;
    }
    match character as u32 {
        code @ 32..=126 => HELVETICA_WIDTHS[(code - 32) as usize],
        _ => FALLBACK_WIDTH,
    }
}

fn single_line(text: &str, bbox: BoundingBox, preferred: f64) -> TextRun {
    let available = (bbox.width - 2.0 * PADDING).max(0.0);
    let mut size = preferred;
    while size > MIN_FONT_SIZE && text_width(text, size, Face::Regular) > available {
        size = (size - SHRINK_STEP).max(MIN_FONT_SIZE);
    }

    let text = truncate_to_width(text, available, size);
    let baseline = bbox.y + ((bbox.height - size * CAP_HEIGHT) / 2.0).max(0.0);

    TextRun {
        face: Face::Regular,
        size,
        x: bbox.x + PADDING,
        y: baseline,
        text,
    }
}

fn multiline(text: &str, bbox: BoundingBox, preferred: f64) -> Vec<TextRun> {
    let available_width = (bbox.width - 2.0 * PADDING).max(0.0);
    let available_height = (bbox.height - 2.0 * PADDING).max(0.0);

    let mut size = preferred;
    let mut lines = wrap(text, available_width, size);
    while size > MIN_FONT_SIZE && lines.len() as f64 * size * LINE_HEIGHT > available_height {
        size = (size - SHRINK_STEP).max(MIN_FONT_SIZE);
        lines = wrap(text, available_width, size);
    }

    let max_lines = ((available_height / (size * LINE_HEIGHT)).floor() as usize).max(1);
    lines.truncate(max_lines);

    let first_baseline = bbox.top() - PADDING - size * CAP_HEIGHT;
    lines
        .into_iter()
        .enumerate()
        .map(|(index, line)| TextRun {
            face: Face::Regular,
            size,
            x: bbox.x + PADDING,
            y: first_baseline - index as f64 * size * LINE_HEIGHT,
            text: line,
        })
        .collect()
}

/// Greedy word wrap; words wider than a line are split by character.
pub fn wrap(text: &str, width: f64, size: f64) -> Vec<String> {
    let mut lines = Vec::new();

    for paragraph in text.lines() {
        let mut current = String::new();
        for word in paragraph.split_whitespace() {
            let candidate = if current.is_empty() {
                word.to_string()
            } else {
                format!("{current} {word}")
            };

            if text_width(&candidate, size, Face::Regular) <= width {
                current = candidate;
                continue;
            }

            if !current.is_empty() {
                lines.push(std::mem::take(&mut current));
            }

            for character in word.chars() {
                current.push(character);
                if text_width(&current, size, Face::Regular) > width && current.chars().count() > 1 {
                    current.pop();
                    lines.push(std::mem::take(&mut current));
                    current.push(character);
                }
            }
        }

        if !current.is_empty() {
            lines.push(current);
        }
    }

    lines
}

fn check_mark(bbox: BoundingBox) -> TextRun {
    let size = (bbox.width.min(bbox.height) * 0.9).max(MIN_FONT_SIZE);
    let width = text_width(CHECK_MARK, size, Face::Bold);

    TextRun {
        face: Face::Bold,
        size,
        x: bbox.x + (bbox.width - width) / 2.0,
        y: bbox.y + (bbox.height - size * CAP_HEIGHT) / 2.0,
        text: CHECK_MARK.to_string(),
    }
}

fn truncate_to_width(text: &str, width: f64, size: f64) -> String {
    let mut out = String::new();
    for character in text.chars() {
        out.push(character);
        if text_width(&out, size, Face::Regular) > width {
            out.pop();
            break;
        }
    }
    out
}

fn single_line_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn is_amount_path(mapping: &FieldMapping) -> bool {
    mapping
        .schema_path
        .segments()
        .iter()
        .any(|segment| matches!(segment, Segment::Key(key) if key == "amount"))
        && mapping.schema_path.leaf_contains("value")
}

/// Formats an ISO or otherwise recognised date; anything else is drawn as is.
pub fn format_date(raw: &str, format: &str) -> String {
    let Some(date) = parse_date(raw) else {
        return raw.trim().to_string();
    };

    let mut out = String::new();
    if write!(out, "{}", date.format(format)).is_err() {
        return date.format(DEFAULT_DATE_FORMAT).to_string();
    }
    out
}

pub fn group_thousands(digits: &str) -> String {
    let (sign, digits) = match digits.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", digits),
    };

    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (index, character) in digits.chars().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(character);
    }
    format!("{sign}{grouped}")
}

fn format_decimal_amount(amount: f64) -> String {
    let fixed = format!("{amount:.2}");
    match fixed.split_once('.') {
        Some((whole, cents)) => format!("{}.{cents}", group_thousands(whole)),
        None => fixed,
    }
}
