//! Per-case artifact namespace under the artifacts root.
//!
//! ```text
//! <root>/<case_id>/inputs/packet.pdf
//! <root>/<case_id>/inputs/template.pdf
//! <root>/<case_id>/extract_raw.json
//! <root>/<case_id>/extracted.json
//! <root>/<case_id>/canonical.json
//! <root>/<case_id>/validation_report.json
//! <root>/<case_id>/filled.pdf
//! <root>/<case_id>/template_config_used.json
//! <root>/<case_id>/run_result.json
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use regex::Regex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{PipelineError, PipelineResult};
use crate::util::{ensure_directory, publish_if_absent, slugify, write_bytes, write_json_pretty};

pub const INPUTS_DIR: &str = "inputs";
pub const PACKET_FILE: &str = "packet.pdf";
pub const TEMPLATE_FILE: &str = "template.pdf";
pub const EXTRACT_RAW_FILE: &str = "extract_raw.json";
pub const EXTRACTED_FILE: &str = "extracted.json";
pub const CANONICAL_FILE: &str = "canonical.json";
pub const VALIDATION_REPORT_FILE: &str = "validation_report.json";
pub const FILLED_FILE: &str = "filled.pdf";
pub const CONFIG_USED_FILE: &str = "template_config_used.json";
pub const RUN_RESULT_FILE: &str = "run_result.json";

/// Extensions the download surface may serve.
pub const SERVABLE_EXTENSIONS: &[&str] = &["pdf", "json"];

const CASE_ID_PATTERN: &str = r"^[A-Za-z0-9][A-Za-z0-9_-]{0,127}$";
const CASE_SLUG_MAX_LEN: usize = 40;

pub fn is_servable(file_name: &str) -> bool {
    Path::new(file_name)
        .extension()
        .and_then(|extension| extension.to_str())
        .map(|extension| {
            SERVABLE_EXTENSIONS
                .iter()
                .any(|allowed| extension.eq_ignore_ascii_case(allowed))
        })
        .unwrap_or(false)
}

/// Rejects ids that could escape the artifacts root.
pub fn validate_case_id(case_id: &str) -> PipelineResult<()> {
    if case_id.contains(['/', '\\', '.']) {
        return Err(PipelineError::Input(format!(
            "case id `{case_id}` must not contain '/', '\\' or '.'"
        )));
    }

    let pattern = Regex::new(CASE_ID_PATTERN)
        .map_err(|err| PipelineError::Input(format!("failed to compile case id pattern: {err}")))?;
    if !pattern.is_match(case_id) {
        return Err(PipelineError::Input(format!(
            "case id `{case_id}` must match {CASE_ID_PATTERN}"
        )));
    }

    Ok(())
}

/// `<packet-stem-slug>_<8 hex>`, or `case_<8 hex>` without a usable name.
pub fn new_case_id(packet_name: Option<&str>) -> String {
    let stem = packet_name
        .map(Path::new)
        .and_then(|path| path.file_stem())
        .and_then(|stem| stem.to_str())
        .map(|stem| slugify(stem, CASE_SLUG_MAX_LEN))
        .filter(|slug| !slug.is_empty())
        .unwrap_or_else(|| "case".to_string());

    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{stem}_{}", &suffix[..8])
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn case_dir(&self, case_id: &str) -> PathBuf {
        self.root.join(case_id)
    }

    pub fn input_path(&self, case_id: &str, file_name: &str) -> PathBuf {
        self.case_dir(case_id).join(INPUTS_DIR).join(file_name)
    }

    pub fn path(&self, case_id: &str, file_name: &str) -> PathBuf {
        self.case_dir(case_id).join(file_name)
    }

    /// Stores both uploads. Inputs are immutable: a case id that already
    /// holds inputs is rejected.
    pub fn store_inputs(&self, case_id: &str, packet: &[u8], template: &[u8]) -> PipelineResult<()> {
        let inputs_dir = self.case_dir(case_id).join(INPUTS_DIR);
        ensure_directory(&inputs_dir).map_err(PipelineError::storage)?;

        for (file_name, data) in [(PACKET_FILE, packet), (TEMPLATE_FILE, template)] {
            let path = inputs_dir.join(file_name);
            let created = publish_if_absent(&path, data).map_err(PipelineError::storage)?;
            if !created {
                return Err(PipelineError::Input(format!(
                    "case `{case_id}` already has stored inputs"
                )));
            }
            debug!(case_id = %case_id, path = %path.display(), bytes = data.len(), "stored input");
        }

        Ok(())
    }

    pub fn write_json<T: Serialize>(
        &self,
        case_id: &str,
        file_name: &str,
        value: &T,
    ) -> PipelineResult<PathBuf> {
        let path = self.path(case_id, file_name);
        write_json_pretty(&path, value).map_err(PipelineError::storage)?;
        debug!(case_id = %case_id, path = %path.display(), "wrote artifact");
        Ok(path)
    }

    pub fn write_bytes(&self, case_id: &str, file_name: &str, data: &[u8]) -> PipelineResult<PathBuf> {
        let path = self.path(case_id, file_name);
        write_bytes(&path, data).map_err(PipelineError::storage)?;
        debug!(case_id = %case_id, path = %path.display(), bytes = data.len(), "wrote artifact");
        Ok(path)
    }

    pub fn read_json<T: DeserializeOwned>(&self, case_id: &str, file_name: &str) -> Result<T> {
        let path = self.path(case_id, file_name);
        let raw = fs::read(&path).with_context(|| format!("failed to read {}", path.display()))?;
        serde_json::from_slice(&raw).with_context(|| format!("failed to parse {}", path.display()))
    }

    pub fn exists(&self, case_id: &str, file_name: &str) -> bool {
        self.path(case_id, file_name).is_file()
    }

    /// Resolves a download request to a stored artifact. Only plain
    /// `.pdf`/`.json` file names inside the case namespace are served.
    pub fn download_path(&self, case_id: &str, file_name: &str) -> PipelineResult<PathBuf> {
        validate_case_id(case_id)?;
        if file_name.contains(['/', '\\']) || file_name.starts_with('.') {
            return Err(PipelineError::Input(format!(
                "artifact name `{file_name}` is not a plain file name"
            )));
        }
        if !is_servable(file_name) {
            return Err(PipelineError::Input(format!(
                "artifact `{file_name}` has a non-servable extension"
            )));
        }

        [self.path(case_id, file_name), self.input_path(case_id, file_name)]
            .into_iter()
            .find(|path| path.is_file())
            .ok_or_else(|| {
                PipelineError::Input(format!("case `{case_id}` has no artifact `{file_name}`"))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn servable_whitelist_is_pdf_and_json_only() {
        assert!(is_servable("filled.pdf"));
        assert!(is_servable("canonical.JSON"));
        assert!(!is_servable("packet.pdf.exe"));
        assert!(!is_servable("notes.txt"));
        assert!(!is_servable("README"));
    }

    #[test]
    fn case_ids_reject_path_characters() {
        assert!(validate_case_id("subscription_ab12cd34").is_ok());
        for bad in ["../etc", "a/b", "a\\b", "v1.2", "", "-leading"] {
            let err = validate_case_id(bad).unwrap_err();
            assert_eq!(err.kind(), "input_error", "{bad}");
        }
    }

    #[test]
    fn generated_case_ids_use_packet_stem() {
        let case_id = new_case_id(Some("/uploads/Smith Subscription.pdf"));
        assert!(case_id.starts_with("smith_subscription_"));
        assert_eq!(case_id.len(), "smith_subscription_".len() + 8);
        assert!(validate_case_id(&case_id).is_ok());
        assert!(new_case_id(None).starts_with("case_"));
    }

    #[test]
    fn inputs_are_stored_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());

        store.store_inputs("case_1", b"%PDF-packet", b"%PDF-template").unwrap();
        assert_eq!(
            fs::read(store.input_path("case_1", PACKET_FILE)).unwrap(),
            b"%PDF-packet"
        );

        let err = store
            .store_inputs("case_1", b"other", b"other")
            .unwrap_err();
        assert_eq!(err.kind(), "input_error");
        assert_eq!(
            fs::read(store.input_path("case_1", TEMPLATE_FILE)).unwrap(),
            b"%PDF-template"
        );
    }

    #[test]
    fn downloads_resolve_outputs_and_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        store.store_inputs("case_2", b"packet", b"template").unwrap();
        store
            .write_json("case_2", CANONICAL_FILE, &serde_json::json!({}))
            .unwrap();
        store.write_bytes("case_2", "notes.txt", b"x").unwrap();

        assert!(store.download_path("case_2", CANONICAL_FILE).is_ok());
        assert!(store.download_path("case_2", PACKET_FILE).is_ok());
        assert!(store.download_path("case_2", "notes.txt").is_err());
        assert!(store.download_path("case_2", "../case_1.json").is_err());
        assert!(store.download_path("case_2", FILLED_FILE).is_err());
    }
}
