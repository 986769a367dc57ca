use std::fs;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use futures::StreamExt;
use futures::stream::BoxStream;
use tracing::{info, warn};

use crate::artifacts::new_case_id;
use crate::cli::RunArgs;
use crate::extract::{CommandExtractor, Extractor, StaticExtractor};
use crate::pipeline::{Case, CaseOutcome, Pipeline, PipelineConfig};
use crate::progress::ProgressState;

pub fn run(args: RunArgs) -> Result<()> {
    if args.case_id.is_some() && args.packets.len() > 1 {
        bail!("--case-id can only be used with a single --packet");
    }

    let extractor = build_extractor(&args)?;
    let template = fs::read(&args.template)
        .with_context(|| format!("failed to read template {}", args.template.display()))?;

    let mut jobs = Vec::with_capacity(args.packets.len());
    for packet_path in &args.packets {
        let packet = fs::read(packet_path)
            .with_context(|| format!("failed to read packet {}", packet_path.display()))?;
        let case_id = args
            .case_id
            .clone()
            .unwrap_or_else(|| new_case_id(packet_path.to_str()));
        info!(case_id = %case_id, packet = %packet_path.display(), "case submitted");
        jobs.push((case_id, packet));
    }

    let pipeline = Arc::new(Pipeline::new(
        PipelineConfig {
            artifacts_root: args.artifacts_root.clone(),
            outbox: args.outbox.clone(),
        },
        extractor,
    )?);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build async runtime")?;
    let cases = runtime.block_on(process_all(&pipeline, jobs, template))?;

    let mut failed = 0usize;
    for case in &cases {
        match &case.outcome {
            CaseOutcome::Completed { filled_output } => info!(
                case_id = %case.case_id,
                filled = %filled_output.display(),
                outbox = %case.outbox_filled.as_ref().map(|path| path.display().to_string()).unwrap_or_default(),
                "case completed"
            ),
            CaseOutcome::CompletedUnfilled { starter_config } => warn!(
                case_id = %case.case_id,
                template_id = %case.template_id.clone().unwrap_or_default(),
                starter_config = %starter_config.display(),
                "case completed without output; map the template fields and resubmit"
            ),
            CaseOutcome::Failed(err) => {
                failed += 1;
                warn!(case_id = %case.case_id, kind = err.kind(), error = %err, "case failed");
            }
        }
    }

    info!(
        cases = cases.len(),
        failed,
        artifacts_root = %args.artifacts_root.display(),
        "run completed"
    );

    if failed > 0 {
        bail!("{failed} of {} case(s) failed", cases.len());
    }
    Ok(())
}

fn build_extractor(args: &RunArgs) -> Result<Arc<dyn Extractor>> {
    if let Some(path) = &args.extracted_json {
        info!(path = %path.display(), "replaying stored extraction response");
        return Ok(Arc::new(StaticExtractor::from_file(path)?));
    }

    match args.extractor_cmd.as_deref() {
        Some(command_line) => Ok(Arc::new(CommandExtractor::from_command_line(command_line)?)),
        None => bail!(
            "an extractor is required: pass --extractor-cmd (or set PACKETFILL_EXTRACTOR_CMD) or --extracted-json"
        ),
    }
}

async fn process_all(
    pipeline: &Arc<Pipeline>,
    jobs: Vec<(String, Vec<u8>)>,
    template: Vec<u8>,
) -> Result<Vec<Case>> {
    let mut running = Vec::with_capacity(jobs.len());
    for (case_id, packet) in jobs {
        let handle = pipeline.submit(case_id.clone(), packet, template.clone());
        let watcher = pipeline
            .tracker()
            .subscribe(&case_id)
            .map(|events| tokio::spawn(log_progress(events)));
        running.push((handle, watcher));
    }

    let mut cases = Vec::with_capacity(running.len());
    for (handle, watcher) in running {
        let case = handle.await.context("case worker panicked")?;
        if let Some(watcher) = watcher {
            let _ = watcher.await;
        }
        cases.push(case);
    }

    Ok(cases)
}

async fn log_progress(mut events: BoxStream<'static, ProgressState>) {
    while let Some(state) = events.next().await {
        info!(
            case_id = %state.case_id,
            stage = %state.stage,
            sequence = state.sequence,
            detail = %state.detail.as_deref().unwrap_or_default(),
            error = %state.error.as_deref().unwrap_or_default(),
            "progress"
        );
    }
}
