use std::fs;

use anyhow::{Context, Result, bail};
use tracing::{info, warn};

use crate::cli::{TemplateArgs, TemplateCommands};
use crate::model::FieldMapping;
use crate::pdf::TemplateDocument;
use crate::registry::{TemplateRegistry, hints, template_id_for};
use crate::util::print_json_pretty;

pub fn run(args: TemplateArgs) -> Result<()> {
    let registry = TemplateRegistry::new(&args.artifacts_root);

    match args.command {
        TemplateCommands::List => list(&registry),
        TemplateCommands::Show { template_id } => {
            let Some(config) = registry.load(&template_id)? else {
                bail!("no configuration registered for template {template_id}");
            };
            print_json_pretty(&config)
        }
        TemplateCommands::SetFields {
            template_id,
            fields_json,
        } => {
            let raw = fs::read(&fields_json)
                .with_context(|| format!("failed to read {}", fields_json.display()))?;
            let fields: Vec<FieldMapping> = serde_json::from_slice(&raw)
                .with_context(|| format!("failed to parse {}", fields_json.display()))?;

            let config = registry.update_fields(&template_id, fields)?;
            info!(
                template_id = %config.template_id,
                fields = config.fields.len(),
                path = %registry.config_path(&template_id).display(),
                "template configuration updated"
            );
            Ok(())
        }
        TemplateCommands::Hints { template } => {
            let bytes = fs::read(&template)
                .with_context(|| format!("failed to read {}", template.display()))?;
            let parsed = TemplateDocument::load(&bytes)?;
            let detected = hints::detect_fields(&template_id_for(&bytes), &parsed)?;
            info!(
                template_id = %detected.template_id,
                pages = detected.page_count,
                candidates = detected.candidates.len(),
                suggested = detected
                    .candidates
                    .iter()
                    .filter(|candidate| candidate.suggested_schema_path.is_some())
                    .count(),
                "field candidates detected"
            );
            print_json_pretty(&detected)
        }
    }
}

fn list(registry: &TemplateRegistry) -> Result<()> {
    let summaries = registry.list()?;
    if summaries.is_empty() {
        warn!("no templates registered");
        return Ok(());
    }

    for summary in &summaries {
        info!(
            template_id = %summary.template_id,
            state = %summary.state,
            pages = summary.page_count,
            fields = summary.field_count,
            created_at = %summary.created_at,
            updated_at = %summary.updated_at.clone().unwrap_or_default(),
            source_case_id = %summary.source_case_id.clone().unwrap_or_default(),
            "template"
        );
    }
    info!(templates = summaries.len(), "template listing complete");
    Ok(())
}
