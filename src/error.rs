use thiserror::Error;

/// Failures that end a case. Validation findings are data, never errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PipelineError {
    /// Missing or malformed upload; raised before any stage starts.
    #[error("input error: {0}")]
    Input(String),

    /// The extraction collaborator failed or returned an unusable shape.
    #[error("extraction error: {0}")]
    Extraction(String),

    /// Geometry or configuration inconsistency while overlaying values.
    #[error("fill error: {0}")]
    Fill(String),

    /// A persisted template configuration could not be read or written.
    #[error("template config error: {0}")]
    TemplateConfig(String),

    /// An artifact could not be persisted.
    #[error("storage error: {0}")]
    Storage(String),
}

impl PipelineError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Input(_) => "input_error",
            Self::Extraction(_) => "extraction_error",
            Self::Fill(_) => "fill_error",
            Self::TemplateConfig(_) => "template_config_error",
            Self::Storage(_) => "storage_error",
        }
    }

    pub fn storage(err: anyhow::Error) -> Self {
        Self::Storage(format!("{err:#}"))
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
