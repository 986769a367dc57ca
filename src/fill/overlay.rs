use anyhow::{Context, Result};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream, dictionary};

use super::render::{Face, TextRun};
use crate::pdf::{page_resources, resolve};

pub const REGULAR_FONT: &str = "PfHelv";
pub const BOLD_FONT: &str = "PfHelvB";
pub const OPAQUE_STATE: &str = "PfOpaque";

/// Shared resource objects added once per filled document.
pub struct OverlayResources {
    regular: ObjectId,
    bold: ObjectId,
    opaque: ObjectId,
}

impl OverlayResources {
    pub fn install(document: &mut Document) -> Self {
        let regular = document.add_object(standard_font("Helvetica"));
        let bold = document.add_object(standard_font("Helvetica-Bold"));
        let opaque = document.add_object(dictionary! {
            "Type" => "ExtGState",
            "ca" => 1,
            "CA" => 1,
            "BM" => "Normal",
        });
        Self {
            regular,
            bold,
            opaque,
        }
    }
}

fn standard_font(base_font: &str) -> Dictionary {
    dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => base_font,
        "Encoding" => "WinAnsiEncoding",
    }
}

/// Wraps the page's existing content in `q`/`Q` and appends the overlay
/// after it, so the overlay is painted last with a reset graphics state.
pub fn composite_page(
    document: &mut Document,
    page_id: ObjectId,
    resources: &OverlayResources,
    runs: &[TextRun],
) -> Result<()> {
    let mut page_resources = page_resources(document, page_id)?;
    merge_entry(document, &mut page_resources, b"Font", &[
        (REGULAR_FONT, resources.regular),
        (BOLD_FONT, resources.bold),
    ])?;
    merge_entry(document, &mut page_resources, b"ExtGState", &[(
        OPAQUE_STATE,
        resources.opaque,
    )])?;

    let existing = {
        let page = document
            .get_dictionary(page_id)
            .context("page object is not a dictionary")?;
        match page.get(b"Contents") {
            Ok(Object::Array(items)) => items.clone(),
            Ok(Object::Reference(id)) => match document.get_object(*id) {
                Ok(Object::Array(items)) => items.clone(),
                _ => vec![Object::Reference(*id)],
            },
            _ => Vec::new(),
        }
    };

    let open = document.add_object(Stream::new(Dictionary::new(), b"q\n".to_vec()));
    let mut close = b"Q\n".to_vec();
    close.extend(encode_runs(runs));
    let close = document.add_object(Stream::new(Dictionary::new(), close));

    let mut contents = Vec::with_capacity(existing.len() + 2);
    contents.push(Object::Reference(open));
    contents.extend(existing);
    contents.push(Object::Reference(close));

    let page = document
        .get_object_mut(page_id)
        .and_then(Object::as_dict_mut)
        .context("page object is not a dictionary")?;
    page.set("Contents", Object::Array(contents));
    page.set("Resources", Object::Dictionary(page_resources));

    Ok(())
}

fn merge_entry(
    document: &Document,
    resources: &mut Dictionary,
    key: &[u8],
    additions: &[(&str, ObjectId)],
) -> Result<()> {
    let mut merged = match resources.get(key) {
        Ok(value) => match resolve(document, value)? {
            Object::Dictionary(existing) => existing.clone(),
            _ => Dictionary::new(),
        },
        Err(_) => Dictionary::new(),
    };

    for (name, id) in additions {
        merged.set(*name, Object::Reference(*id));
    }
    resources.set(key.to_vec(), Object::Dictionary(merged));
    Ok(())
}

/// Content-stream operators for the overlay layer: opaque state, black
/// fill, fill-only text rendering.
pub fn encode_runs(runs: &[TextRun]) -> Vec<u8> {
    let mut out = Vec::new();
    if runs.is_empty() {
        return out;
    }

    out.extend_from_slice(format!("q\n/{OPAQUE_STATE} gs\n0 g\n0 Tr\n").as_bytes());
    for run in runs {
        let font = match run.face {
            Face::Regular => REGULAR_FONT,
            Face::Bold => BOLD_FONT,
        };
        out.extend_from_slice(
            format!(
                "BT\n/{font} {} Tf\n1 0 0 1 {} {} Tm\n(",
                number(run.size),
                number(run.x),
                number(run.y)
            )
            .as_bytes(),
        );
        out.extend(escape_literal(&run.text));
        out.extend_from_slice(b") Tj\nET\n");
    }
    out.extend_from_slice(b"Q\n");
    out
}

fn number(value: f64) -> String {
    let formatted = format!("{value:.2}");
    let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
    match trimmed {
        "" | "-" | "-0" => "0".to_string(),
        other => other.to_string(),
    }
}

/// WinAnsi bytes for a PDF literal string; unmappable characters become `?`.
fn escape_literal(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len());
    for character in text.chars() {
        let byte = match character as u32 {
            code @ (32..=126 | 160..=255) => code as u8,
            _ => b'?',
        };
        if matches!(byte, b'(' | b')' | b'\\') {
            out.push(b'\\');
        }
        out.push(byte);
    }
    out
}
