use serde::{Deserialize, Serialize};

use crate::schema::SchemaPath;

pub const CONFIG_VERSION: u32 = 1;

/// Field layout for one template, addressed by the template's content hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateConfig {
    pub config_version: u32,
    pub template_id: String,
    pub page_count: usize,
    pub created_at: String,
    pub source_case_id: Option<String>,
    pub updated_at: Option<String>,
    #[serde(default)]
    pub fields: Vec<FieldMapping>,
}

impl TemplateConfig {
    pub fn is_configured(&self) -> bool {
        !self.fields.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMapping {
    pub schema_path: SchemaPath,
    pub page: usize,
    pub bbox: BoundingBox,
    #[serde(rename = "type", default)]
    pub field_type: FieldType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_size: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checked_when_equals: Option<String>,
}

/// Axis-aligned box in PDF user space; `x`/`y` is the lower-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn top(&self) -> f64 {
        self.y + self.height
    }

    pub fn is_within(&self, page: &BoundingBox) -> bool {
        self.width > 0.0
            && self.height > 0.0
            && self.x >= page.x
            && self.y >= page.y
            && self.right() <= page.right()
            && self.top() <= page.top()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    #[default]
    Text,
    Multiline,
    Checkbox,
    Date,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub severity: Severity,
    pub path: SchemaPath,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Pass,
    NeedsReview,
}

impl ValidationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::NeedsReview => "needs_review",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub status: ValidationStatus,
    pub findings: Vec<Finding>,
}

impl ValidationReport {
    pub fn error_count(&self) -> usize {
        self.findings
            .iter()
            .filter(|finding| finding.severity == Severity::Error)
            .count()
    }
}

/// Candidate input regions found on a template, kept next to its config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldHints {
    pub template_id: String,
    pub page_count: usize,
    pub generated_at: String,
    pub candidates: Vec<FieldCandidate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldCandidate {
    pub page: usize,
    pub bbox: BoundingBox,
    pub guess_type: FieldType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_bbox: Option<BoundingBox>,
    /// 0..=1, how close the label sits to the region.
    #[serde(default)]
    pub confidence: f64,
    /// Keyword guess for the mapping; never copied into a config on its own.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_schema_path: Option<SchemaPath>,
}

/// Summary written as `run_result.json` when a case reaches a terminal state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub case_id: String,
    pub result_type: String,
    pub finished_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_status: Option<String>,
    #[serde(default)]
    pub needs_review: bool,
    #[serde(default)]
    pub missing_required: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filled_output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outbox_filled: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starter_config: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}
