//! Thin helpers over `lopdf` shared by the registry and the filler.

use anyhow::{Context, Result, anyhow, bail};
use lopdf::{Dictionary, Document, Object, ObjectId};

use crate::model::BoundingBox;

const MAX_INHERITANCE_DEPTH: usize = 32;

/// A parsed template with its pages in document order.
pub struct TemplateDocument {
    pub document: Document,
    pub pages: Vec<ObjectId>,
    pub media_boxes: Vec<BoundingBox>,
}

impl TemplateDocument {
    pub fn load(bytes: &[u8]) -> Result<Self> {
        let document = Document::load_mem(bytes).context("template is not a readable PDF")?;
        let pages = document.get_pages().into_values().collect::<Vec<_>>();
        if pages.is_empty() {
            bail!("template PDF has no pages");
        }

        let media_boxes = pages
            .iter()
            .enumerate()
            .map(|(index, page_id)| {
                media_box(&document, *page_id)
                    .with_context(|| format!("failed to read MediaBox of page {index}"))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            document,
            pages,
            media_boxes,
        })
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }
}

pub fn resolve<'a>(document: &'a Document, object: &'a Object) -> Result<&'a Object> {
    match object {
        Object::Reference(id) => document
            .get_object(*id)
            .with_context(|| format!("dangling reference {} {} R", id.0, id.1)),
        other => Ok(other),
    }
}

/// Looks `key` up on the page, then up its `Parent` chain.
pub fn inherited<'a>(
    document: &'a Document,
    page_id: ObjectId,
    key: &[u8],
) -> Result<Option<&'a Object>> {
    let mut node = document
        .get_dictionary(page_id)
        .with_context(|| format!("page object {} {} R is not a dictionary", page_id.0, page_id.1))?;

    for _ in 0..MAX_INHERITANCE_DEPTH {
        if let Ok(value) = node.get(key) {
            return resolve(document, value).map(Some);
        }
        let Ok(parent) = node.get(b"Parent").and_then(Object::as_reference) else {
            return Ok(None);
        };
        node = document
            .get_dictionary(parent)
            .with_context(|| format!("page tree node {} {} R is not a dictionary", parent.0, parent.1))?;
    }

    bail!("page tree deeper than {MAX_INHERITANCE_DEPTH} levels")
}

/// The page's resource dictionary with references and inheritance resolved.
pub fn page_resources(document: &Document, page_id: ObjectId) -> Result<Dictionary> {
    match inherited(document, page_id, b"Resources")? {
        Some(Object::Dictionary(resources)) => Ok(resources.clone()),
        Some(_) => bail!("page Resources is not a dictionary"),
        None => Ok(Dictionary::new()),
    }
}

pub fn media_box(document: &Document, page_id: ObjectId) -> Result<BoundingBox> {
    let value = inherited(document, page_id, b"MediaBox")?
        .ok_or_else(|| anyhow!("page has no MediaBox"))?;
    let Object::Array(items) = value else {
        bail!("MediaBox is not an array");
    };
    if items.len() != 4 {
        bail!("MediaBox has {} entries, expected 4", items.len());
    }

    let mut corners = [0.0_f64; 4];
    for (slot, item) in corners.iter_mut().zip(items) {
        *slot = number(resolve(document, item)?)
            .ok_or_else(|| anyhow!("MediaBox entry is not a number"))?;
    }

    let [x0, y0, x1, y1] = corners;
    Ok(BoundingBox {
        x: x0.min(x1),
        y: y0.min(y1),
        width: (x1 - x0).abs(),
        height: (y1 - y0).abs(),
    })
}

pub fn number(object: &Object) -> Option<f64> {
    match object {
        Object::Integer(value) => Some(*value as f64),
        Object::Real(value) => Some(f64::from(*value)),
        _ => None,
    }
}

#[cfg(test)]
pub(crate) mod fixtures;
