//! Overlays canonical values onto a flat template PDF.
//!
//! `(template, ordered mappings) -> filled document` is a pure transform:
//! the template bytes and the configuration are only read. Every mapping
//! is checked before anything is drawn, so a bad mapping never produces a
//! partially filled output.

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::error::{PipelineError, PipelineResult};
use crate::model::TemplateConfig;
use crate::pdf::TemplateDocument;
use crate::registry::check_mappings;
use crate::schema::CanonicalData;

mod overlay;
pub mod render;

use overlay::{OverlayResources, composite_page};
use render::TextRun;

pub fn fill(
    template: &[u8],
    config: &TemplateConfig,
    canonical: &CanonicalData,
) -> PipelineResult<Vec<u8>> {
    let parsed = TemplateDocument::load(template).map_err(fill_error)?;

    if let Some(max_page) = config.fields.iter().map(|mapping| mapping.page).max() {
        if max_page >= parsed.page_count() {
            return Err(PipelineError::Fill(format!(
                "mapping references page {max_page} but template has {} page(s)",
                parsed.page_count()
            )));
        }
    }
    check_mappings(&config.fields, &parsed).map_err(PipelineError::Fill)?;

    let mut runs_by_page: BTreeMap<usize, Vec<TextRun>> = BTreeMap::new();
    let mut drawn = 0usize;
    for mapping in &config.fields {
        let value = canonical.resolve(&mapping.schema_path);
        let runs = render::layout(mapping, &value);
        if runs.is_empty() {
            debug!(path = %mapping.schema_path, "no value to draw");
            continue;
        }
        drawn += 1;
        runs_by_page.entry(mapping.page).or_default().extend(runs);
    }

    let TemplateDocument {
        mut document,
        pages,
        ..
    } = parsed;

    if !runs_by_page.is_empty() {
        let resources = OverlayResources::install(&mut document);
        for (page, runs) in &runs_by_page {
            composite_page(&mut document, pages[*page], &resources, runs).map_err(fill_error)?;
        }
    }

    let mut filled = Vec::new();
    document
        .save_to(&mut filled)
        .map_err(|err| PipelineError::Fill(format!("failed to serialize filled PDF: {err}")))?;

    info!(
        template_id = %config.template_id,
        mappings = config.fields.len(),
        drawn,
        bytes = filled.len(),
        "template filled"
    );
    Ok(filled)
}

fn fill_error(err: anyhow::Error) -> PipelineError {
    PipelineError::Fill(format!("{err:#}"))
}
