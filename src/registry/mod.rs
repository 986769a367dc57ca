//! Content-addressed template configuration store.
//!
//! Layout under the artifacts root:
//!
//! ```text
//! _templates/<template_id>/template.pdf
//! _templates/<template_id>/template_config.json
//! _templates/<template_id>/detected_fields.json
//! ```
//!
//! `template_id` is the SHA-256 of the template bytes. Starter configs and
//! template bytes are published create-if-absent, so concurrent cases that
//! share a new template cannot clobber each other or an operator's edits.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{PipelineError, PipelineResult};
use crate::model::{CONFIG_VERSION, FieldHints, FieldMapping, TemplateConfig};
use crate::pdf::TemplateDocument;
use crate::util::{
    ensure_directory, json_pretty_bytes, now_utc_string, publish_if_absent, replace_file,
    sha256_hex,
};

pub mod hints;
#[cfg(test)]
mod tests;

pub const TEMPLATES_DIR: &str = "_templates";
pub const TEMPLATE_FILE: &str = "template.pdf";
pub const CONFIG_FILE: &str = "template_config.json";
pub const HINTS_FILE: &str = "detected_fields.json";

/// What the registry holds for one template.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigState {
    Absent,
    Starter(TemplateConfig),
    Configured(TemplateConfig),
}

impl ConfigState {
    pub fn from_config(config: TemplateConfig) -> Self {
        if config.is_configured() {
            Self::Configured(config)
        } else {
            Self::Starter(config)
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Absent => "absent",
            Self::Starter(_) => "starter",
            Self::Configured(_) => "configured",
        }
    }

    pub fn config(&self) -> Option<&TemplateConfig> {
        match self {
            Self::Absent => None,
            Self::Starter(config) | Self::Configured(config) => Some(config),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TemplateResolution {
    pub template_id: String,
    pub state: ConfigState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateSummary {
    pub template_id: String,
    pub state: String,
    pub page_count: usize,
    pub field_count: usize,
    pub created_at: String,
    pub updated_at: Option<String>,
    pub source_case_id: Option<String>,
}

pub fn template_id_for(template: &[u8]) -> String {
    sha256_hex(template)
}

/// Lowercase SHA-256 hex, the only shape a template directory may have.
pub fn is_template_id(value: &str) -> bool {
    value.len() == 64
        && value
            .bytes()
            .all(|byte| byte.is_ascii_digit() || (b'a'..=b'f').contains(&byte))
}

#[derive(Debug, Clone)]
pub struct TemplateRegistry {
    root: PathBuf,
}

impl TemplateRegistry {
    pub fn new(artifacts_root: &Path) -> Self {
        Self {
            root: artifacts_root.join(TEMPLATES_DIR),
        }
    }

    pub fn template_dir(&self, template_id: &str) -> PathBuf {
        self.root.join(template_id)
    }

    pub fn config_path(&self, template_id: &str) -> PathBuf {
        self.template_dir(template_id).join(CONFIG_FILE)
    }

    pub fn hints_path(&self, template_id: &str) -> PathBuf {
        self.template_dir(template_id).join(HINTS_FILE)
    }

    /// Hashes the template and looks up its configuration. Missing,
    /// unreadable or partially written configs resolve as `Absent`.
    pub fn resolve(&self, template: &[u8]) -> TemplateResolution {
        let template_id = template_id_for(template);
        let state = match self.load(&template_id) {
            Ok(Some(config)) => ConfigState::from_config(config),
            Ok(None) => ConfigState::Absent,
            Err(err) => {
                warn!(template_id = %template_id, error = %err, "ignoring unreadable template config");
                ConfigState::Absent
            }
        };

        debug!(template_id = %template_id, state = state.as_str(), "template resolved");
        TemplateResolution { template_id, state }
    }

    /// Reads the stored configuration. Malformed JSON or an identity
    /// mismatch is a `TemplateConfig` error.
    pub fn load(&self, template_id: &str) -> PipelineResult<Option<TemplateConfig>> {
        if !is_template_id(template_id) {
            return Err(PipelineError::TemplateConfig(format!(
                "`{template_id}` is not a template id"
            )));
        }

        let path = self.config_path(template_id);
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(PipelineError::TemplateConfig(format!(
                    "failed to read {}: {err}",
                    path.display()
                )));
            }
        };

        let config: TemplateConfig = serde_json::from_slice(&raw).map_err(|err| {
            PipelineError::TemplateConfig(format!("failed to parse {}: {err}", path.display()))
        })?;

        if config.template_id != template_id {
            return Err(PipelineError::TemplateConfig(format!(
                "{} declares template_id {} but is stored under {template_id}",
                path.display(),
                config.template_id
            )));
        }

        Ok(Some(config))
    }

    /// Stores the template and publishes an empty-fields configuration
    /// unless one already exists, in which case the existing one is
    /// returned untouched.
    pub fn register_starter(
        &self,
        template_id: &str,
        template: &[u8],
        source_case_id: Option<&str>,
    ) -> PipelineResult<TemplateConfig> {
        let actual_id = template_id_for(template);
        if actual_id != template_id {
            return Err(PipelineError::TemplateConfig(format!(
                "template bytes hash to {actual_id}, not {template_id}"
            )));
        }

        let parsed = TemplateDocument::load(template)
            .map_err(|err| PipelineError::Input(format!("{err:#}")))?;

        let dir = self.template_dir(template_id);
        ensure_directory(&dir).map_err(PipelineError::storage)?;
        publish_if_absent(&dir.join(TEMPLATE_FILE), template).map_err(PipelineError::storage)?;
        self.publish_hints(template_id, &parsed);

        let starter = TemplateConfig {
            config_version: CONFIG_VERSION,
            template_id: template_id.to_string(),
            page_count: parsed.page_count(),
            created_at: now_utc_string(),
            source_case_id: source_case_id.map(ToOwned::to_owned),
            updated_at: None,
            fields: Vec::new(),
        };
        let data = json_pretty_bytes(&starter).map_err(PipelineError::storage)?;

        let published =
            publish_if_absent(&self.config_path(template_id), &data).map_err(PipelineError::storage)?;
        if published {
            info!(template_id = %template_id, pages = starter.page_count, "registered starter template config");
            return Ok(starter);
        }

        match self.load(template_id)? {
            Some(existing) => {
                debug!(
                    template_id = %template_id,
                    fields = existing.fields.len(),
                    "template config already present; starter discarded"
                );
                Ok(existing)
            }
            None => Err(PipelineError::TemplateConfig(format!(
                "template config for {template_id} vanished during registration"
            ))),
        }
    }

    /// Replaces the field list of an existing configuration. Every mapping
    /// must address the canonical schema and sit inside its page.
    pub fn update_fields(
        &self,
        template_id: &str,
        fields: Vec<FieldMapping>,
    ) -> PipelineResult<TemplateConfig> {
        let Some(mut config) = self.load(template_id)? else {
            return Err(PipelineError::TemplateConfig(format!(
                "no configuration registered for template {template_id}"
            )));
        };

        let template_path = self.template_dir(template_id).join(TEMPLATE_FILE);
        let template = fs::read(&template_path).map_err(|err| {
            PipelineError::TemplateConfig(format!(
                "failed to read {}: {err}",
                template_path.display()
            ))
        })?;
        let parsed = TemplateDocument::load(&template)
            .map_err(|err| PipelineError::TemplateConfig(format!("{err:#}")))?;

        check_mappings(&fields, &parsed).map_err(PipelineError::TemplateConfig)?;

        config.fields = fields;
        config.updated_at = Some(now_utc_string());
        let data = json_pretty_bytes(&config).map_err(PipelineError::storage)?;
        replace_file(&self.config_path(template_id), &data).map_err(PipelineError::storage)?;

        info!(template_id = %template_id, fields = config.fields.len(), "template fields updated");
        Ok(config)
    }

    pub fn list(&self) -> anyhow::Result<Vec<TemplateSummary>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to list {}", self.root.display()));
            }
        };

        let mut summaries = Vec::new();
        for entry in entries {
            let entry =
                entry.with_context(|| format!("failed to list {}", self.root.display()))?;
            if !entry.path().is_dir() {
                continue;
            }
            let template_id = entry.file_name().to_string_lossy().to_string();

            match self.load(&template_id) {
                Ok(Some(config)) => summaries.push(TemplateSummary {
                    state: ConfigState::from_config(config.clone()).as_str().to_string(),
                    template_id,
                    page_count: config.page_count,
                    field_count: config.fields.len(),
                    created_at: config.created_at,
                    updated_at: config.updated_at,
                    source_case_id: config.source_case_id,
                }),
                Ok(None) => debug!(template_id = %template_id, "template directory without config"),
                Err(err) => warn!(template_id = %template_id, error = %err, "skipping unreadable template config"),
            }
        }

        summaries.sort_by(|left, right| left.template_id.cmp(&right.template_id));
        Ok(summaries)
    }

    fn publish_hints(&self, template_id: &str, template: &TemplateDocument) {
        let outcome = hints::detect_fields(template_id, template)
            .and_then(|hints: FieldHints| json_pretty_bytes(&hints))
            .and_then(|data| publish_if_absent(&self.hints_path(template_id), &data));

        if let Err(err) = outcome {
            warn!(template_id = %template_id, error = %format!("{err:#}"), "field detection skipped");
        }
    }
}

/// Checks schema addressability, page index and page geometry.
pub fn check_mappings(fields: &[FieldMapping], template: &TemplateDocument) -> Result<(), String> {
    for (index, mapping) in fields.iter().enumerate() {
        if !mapping.schema_path.is_addressable() {
            return Err(format!(
                "field {index}: `{}` does not address the canonical schema",
                mapping.schema_path
            ));
        }

        let Some(page_box) = template.media_boxes.get(mapping.page) else {
            return Err(format!(
                "field {index}: page {} out of range, template has {} page(s)",
                mapping.page,
                template.page_count()
            ));
        };

        if !mapping.bbox.is_within(page_box) {
            return Err(format!(
                "field {index}: bbox ({}, {}, {}x{}) outside page {} bounds ({}x{})",
                mapping.bbox.x,
                mapping.bbox.y,
                mapping.bbox.width,
                mapping.bbox.height,
                mapping.page,
                page_box.width,
                page_box.height
            ));
        }
    }

    Ok(())
}
