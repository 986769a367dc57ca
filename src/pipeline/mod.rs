//! Case orchestration: the only component that sequences stages, persists
//! their outputs and drives progress transitions.
//!
//! Stages run strictly in order and each stage's output is written before
//! the next begins, so a case that fails part-way keeps everything the
//! earlier stages produced.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::artifacts::{
    self, ArtifactStore, CANONICAL_FILE, CONFIG_USED_FILE, EXTRACT_RAW_FILE, EXTRACTED_FILE,
    FILLED_FILE, PACKET_FILE, RUN_RESULT_FILE, TEMPLATE_FILE, VALIDATION_REPORT_FILE,
};
use crate::canonicalize::canonicalize;
use crate::error::{PipelineError, PipelineResult};
use crate::extract::{ExtractedData, Extractor};
use crate::fill::fill;
use crate::ledger::CaseLedger;
use crate::model::{RunResult, TemplateConfig, ValidationReport, ValidationStatus};
use crate::progress::{ProgressTracker, Stage};
use crate::registry::{ConfigState, TemplateRegistry};
use crate::schema::CanonicalData;
use crate::util::{ensure_directory, now_utc_string};
use crate::validate::{missing_required, validate};


#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub artifacts_root: PathBuf,
    pub outbox: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CaseOutcome {
    Completed { filled_output: PathBuf },
    CompletedUnfilled { starter_config: PathBuf },
    Failed(PipelineError),
}

impl CaseOutcome {
    pub fn stage(&self) -> Stage {
        match self {
            Self::Completed { .. } => Stage::Completed,
            Self::CompletedUnfilled { .. } => Stage::CompletedUnfilled,
            Self::Failed(_) => Stage::Failed,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaseInputs {
    pub packet: PathBuf,
    pub template: PathBuf,
}

/// Everything one submission produced. Frozen once `outcome` is terminal.
#[derive(Debug, Clone, PartialEq)]
pub struct Case {
    pub case_id: String,
    pub inputs: Option<CaseInputs>,
    pub extracted: Option<ExtractedData>,
    pub canonical: Option<CanonicalData>,
    pub validation_report: Option<ValidationReport>,
    pub template_id: Option<String>,
    pub config_state: Option<&'static str>,
    pub config_used: Option<TemplateConfig>,
    pub outbox_filled: Option<PathBuf>,
    pub outcome: CaseOutcome,
}

impl Case {
    fn new(case_id: &str) -> Self {
        Self {
            case_id: case_id.to_string(),
            inputs: None,
            extracted: None,
            canonical: None,
            validation_report: None,
            template_id: None,
            config_state: None,
            config_used: None,
            outbox_filled: None,
            outcome: CaseOutcome::Failed(PipelineError::Input("case not processed".to_string())),
        }
    }

    fn rejected(case_id: &str, error: PipelineError) -> Self {
        Self {
            outcome: CaseOutcome::Failed(error),
            ..Self::new(case_id)
        }
    }

    pub fn filled_output(&self) -> Option<&Path> {
        match &self.outcome {
            CaseOutcome::Completed { filled_output } => Some(filled_output),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&PipelineError> {
        match &self.outcome {
            CaseOutcome::Failed(err) => Some(err),
            _ => None,
        }
    }
}

pub struct Pipeline {
    store: ArtifactStore,
    registry: TemplateRegistry,
    tracker: Arc<ProgressTracker>,
    extractor: Arc<dyn Extractor>,
    ledger: CaseLedger,
    outbox: Option<PathBuf>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, extractor: Arc<dyn Extractor>) -> Result<Self> {
        ensure_directory(&config.artifacts_root)?;
        let ledger = CaseLedger::open(&config.artifacts_root)
            .context("failed to open case ledger")?;

        info!(
            artifacts_root = %config.artifacts_root.display(),
            outbox = %config.outbox.as_ref().map(|path| path.display().to_string()).unwrap_or_default(),
            "pipeline ready"
        );

        Ok(Self {
            store: ArtifactStore::new(&config.artifacts_root),
            registry: TemplateRegistry::new(&config.artifacts_root),
            tracker: Arc::new(ProgressTracker::new()),
            extractor,
            ledger,
            outbox: config.outbox,
        })
    }

    pub fn tracker(&self) -> &Arc<ProgressTracker> {
        &self.tracker
    }

    pub fn registry(&self) -> &TemplateRegistry {
        &self.registry
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Claims the case as `queued` and processes it on the blocking pool,
    /// so callers can subscribe to progress while it runs.
    pub fn submit(
        self: &Arc<Self>,
        case_id: String,
        packet: Vec<u8>,
        template: Vec<u8>,
    ) -> JoinHandle<Case> {
        let claimed = self.claim(&case_id);
        let pipeline = Arc::clone(self);
        tokio::task::spawn_blocking(move || match claimed {
            Ok(()) => pipeline.run_claimed(&case_id, &packet, &template),
            Err(rejected) => rejected,
        })
    }

    /// Runs one case to a terminal state. Never panics on stage failure;
    /// the failure is recorded in the returned case instead.
    pub fn process(&self, case_id: &str, packet: &[u8], template: &[u8]) -> Case {
        match self.claim(case_id) {
            Ok(()) => self.run_claimed(case_id, packet, template),
            Err(rejected) => rejected,
        }
    }

    /// A case id already tracked belongs to another submission: the
    /// rejected case never touches its progress log, artifacts or ledger row.
    fn claim(&self, case_id: &str) -> Result<(), Case> {
        self.tracker.claim(case_id).map(|_| ()).map_err(|err| {
            let error = PipelineError::Input(err.to_string());
            warn!(case_id = %case_id, kind = error.kind(), error = %error, "case rejected");
            Case::rejected(case_id, error)
        })
    }

    fn run_claimed(&self, case_id: &str, packet: &[u8], template: &[u8]) -> Case {
        info!(case_id = %case_id, packet_bytes = packet.len(), template_bytes = template.len(), "case started");

        let mut case = Case::new(case_id);
        case.outcome = match self.run_stages(&mut case, packet, template) {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(case_id = %case_id, kind = err.kind(), error = %err, "case failed");
                CaseOutcome::Failed(err)
            }
        };

        self.finish(&case);
        case
    }

    fn run_stages(
        &self,
        case: &mut Case,
        packet: &[u8],
        template: &[u8],
    ) -> PipelineResult<CaseOutcome> {
        let case_id = case.case_id.clone();
        let case_id = case_id.as_str();

        artifacts::validate_case_id(case_id)?;
        if packet.is_empty() {
            return Err(PipelineError::Input("missing packet upload".to_string()));
        }
        if template.is_empty() {
            return Err(PipelineError::Input("missing template upload".to_string()));
        }

        self.store.store_inputs(case_id, packet, template)?;
        case.inputs = Some(CaseInputs {
            packet: self.store.input_path(case_id, PACKET_FILE),
            template: self.store.input_path(case_id, TEMPLATE_FILE),
        });
        if let Err(err) = self.ledger.record_started(case_id) {
            warn!(case_id = %case_id, error = %format!("{err:#}"), "case ledger update failed");
        }

        self.advance(case_id, Stage::Extracting, None);
        let response = self.extractor.extract(packet)?;
        self.store.write_json(case_id, EXTRACT_RAW_FILE, &response)?;
        let extracted = ExtractedData::from_response(&response)?;
        self.store.write_json(case_id, EXTRACTED_FILE, &extracted)?;
        let extracted = case.extracted.insert(extracted);

        self.advance(case_id, Stage::Canonicalizing, None);
        let canonical = canonicalize(extracted)?;
        self.store.write_json(case_id, CANONICAL_FILE, &canonical)?;
        let canonical = case.canonical.insert(canonical);

        self.advance(case_id, Stage::Validating, None);
        let report = validate(canonical);
        self.store
            .write_json(case_id, VALIDATION_REPORT_FILE, &report)?;
        info!(
            case_id = %case_id,
            status = report.status.as_str(),
            findings = report.findings.len(),
            errors = report.error_count(),
            "validation report written"
        );
        case.validation_report = Some(report);

        self.advance(case_id, Stage::ResolvingTemplate, None);
        let resolution = self.registry.resolve(template);
        let template_id = resolution.template_id;
        case.template_id = Some(template_id.clone());
        case.config_state = Some(resolution.state.as_str());
        info!(case_id = %case_id, template_id = %template_id, state = resolution.state.as_str(), "template resolved");

        match resolution.state {
            ConfigState::Configured(config) => {
                self.advance(case_id, Stage::Filling, Some(template_id.clone()));
                let filled = fill(template, &config, canonical)?;
                let filled_output = self.store.write_bytes(case_id, FILLED_FILE, &filled)?;
                self.store.write_json(case_id, CONFIG_USED_FILE, &config)?;
                case.config_used = Some(config);
                case.outbox_filled = self.deliver_to_outbox(case_id);
                Ok(CaseOutcome::Completed { filled_output })
            }
            ConfigState::Absent | ConfigState::Starter(_) => {
                let starter_config = self.registry.config_path(&template_id);
                match self
                    .registry
                    .register_starter(&template_id, template, Some(case_id))
                {
                    Ok(_) => info!(
                        case_id = %case_id,
                        template_id = %template_id,
                        path = %starter_config.display(),
                        "template has no field mappings; case ends unfilled"
                    ),
                    // An unreadable config stays in place for the operator to repair.
                    Err(PipelineError::TemplateConfig(message)) => warn!(
                        case_id = %case_id,
                        template_id = %template_id,
                        path = %starter_config.display(),
                        error = %message,
                        "template config unreadable; case ends unfilled"
                    ),
                    Err(err) => return Err(err),
                }
                Ok(CaseOutcome::CompletedUnfilled { starter_config })
            }
        }
    }

    fn advance(&self, case_id: &str, stage: Stage, detail: Option<String>) {
        info!(case_id = %case_id, stage = %stage, "stage started");
        // Rejections are logged by the tracker; the case keeps running.
        let _ = self.tracker.advance(case_id, stage, detail);
        if let Err(err) = self.ledger.record_status(case_id, stage.as_str()) {
            warn!(case_id = %case_id, error = %format!("{err:#}"), "case ledger update failed");
        }
    }

    /// Copies the filled PDF, canonical data and validation report into the
    /// outbox. Delivery problems are logged and never fail the case.
    fn deliver_to_outbox(&self, case_id: &str) -> Option<PathBuf> {
        let outbox = self.outbox.as_ref()?;
        let deliveries = [
            (FILLED_FILE, format!("{case_id}_filled.pdf")),
            (CANONICAL_FILE, format!("{case_id}_canonical.json")),
            (VALIDATION_REPORT_FILE, format!("{case_id}_validation_report.json")),
        ];

        let outcome = ensure_directory(outbox).and_then(|()| {
            for (source, target) in &deliveries {
                let from = self.store.path(case_id, source);
                let to = outbox.join(target);
                fs::copy(&from, &to).with_context(|| {
                    format!("failed to copy {} to {}", from.display(), to.display())
                })?;
            }
            Ok(())
        });

        match outcome {
            Ok(()) => {
                let delivered = outbox.join(&deliveries[0].1);
                info!(case_id = %case_id, path = %delivered.display(), "delivered to outbox");
                Some(delivered)
            }
            Err(err) => {
                warn!(case_id = %case_id, error = %format!("{err:#}"), "outbox delivery failed");
                None
            }
        }
    }

    fn finish(&self, case: &Case) {
        let case_id = case.case_id.as_str();
        let stage = case.outcome.stage();

        // Only cases that own their artifact namespace get durable records.
        if case.inputs.is_some() {
            let run_result = build_run_result(case);
            if let Err(err) = self.store.write_json(case_id, RUN_RESULT_FILE, &run_result) {
                warn!(case_id = %case_id, error = %err, "failed to write run result");
            }

            let error = case.error().map(|err| (err.kind(), error_message(err)));
            if let Err(err) = self.ledger.record_finished(
                case_id,
                stage.as_str(),
                case.template_id.as_deref(),
                case.config_state,
                error.as_ref().map(|(kind, message)| (*kind, message.as_str())),
            ) {
                warn!(case_id = %case_id, error = %format!("{err:#}"), "case ledger update failed");
            }
        }

        // Rejections are logged by the tracker.
        let _ = match &case.outcome {
            CaseOutcome::Completed { filled_output } => self.tracker.advance(
                case_id,
                Stage::Completed,
                Some(filled_output.display().to_string()),
            ),
            CaseOutcome::CompletedUnfilled { starter_config } => self.tracker.advance(
                case_id,
                Stage::CompletedUnfilled,
                Some(starter_config.display().to_string()),
            ),
            CaseOutcome::Failed(err) => self.tracker.fail(case_id, err.to_string()),
        };

        info!(case_id = %case_id, result = %stage, "case finished");
    }
}

fn error_message(err: &PipelineError) -> String {
    match err {
        PipelineError::Input(message)
        | PipelineError::Extraction(message)
        | PipelineError::Fill(message)
        | PipelineError::TemplateConfig(message)
        | PipelineError::Storage(message) => message.clone(),
    }
}

fn build_run_result(case: &Case) -> RunResult {
    let missing = case
        .canonical
        .as_ref()
        .map(missing_required)
        .unwrap_or_default();
    let needs_review = case
        .validation_report
        .as_ref()
        .map(|report| report.status == ValidationStatus::NeedsReview)
        .unwrap_or(false)
        || (case.canonical.is_some() && !missing.is_empty());

    let file_name = |path: &Path| {
        path.file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default()
    };

    RunResult {
        case_id: case.case_id.clone(),
        result_type: case.outcome.stage().as_str().to_string(),
        finished_at: now_utc_string(),
        template_id: case.template_id.clone(),
        config_state: case.config_state.map(ToOwned::to_owned),
        validation_status: case
            .validation_report
            .as_ref()
            .map(|report| report.status.as_str().to_string()),
        needs_review,
        missing_required: missing,
        filled_output: case.filled_output().map(file_name),
        outbox_filled: case
            .outbox_filled
            .as_ref()
            .map(|path| path.display().to_string()),
        starter_config: match &case.outcome {
            CaseOutcome::CompletedUnfilled { starter_config } => {
                Some(starter_config.display().to_string())
            }
            _ => None,
        },
        error_kind: case.error().map(|err| err.kind().to_string()),
        error_message: case.error().map(error_message),
    }
}
