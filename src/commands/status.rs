use anyhow::Result;
use tracing::{info, warn};

use crate::artifacts::{ArtifactStore, RUN_RESULT_FILE, validate_case_id};
use crate::cli::StatusArgs;
use crate::ledger::{CaseLedger, LEDGER_FILE};
use crate::model::RunResult;
use crate::registry::TemplateRegistry;
use crate::util::print_json_pretty;

pub fn run(args: StatusArgs) -> Result<()> {
    let ledger_path = args.artifacts_root.join(LEDGER_FILE);
    info!(artifacts_root = %args.artifacts_root.display(), "status requested");

    if !ledger_path.exists() {
        warn!(path = %ledger_path.display(), "case ledger missing");
        return Ok(());
    }
    let ledger = CaseLedger::open(&args.artifacts_root)?;

    if let Some(case_id) = args.case_id.as_deref() {
        return show_case(&ledger, &ArtifactStore::new(&args.artifacts_root), case_id);
    }

    for (status, count) in ledger.status_counts()? {
        info!(status = %status, cases = count, "case totals");
    }

    for record in ledger.recent(args.limit)? {
        info!(
            case_id = %record.case_id,
            status = %record.status,
            template_id = %record.template_id.unwrap_or_default(),
            config_state = %record.config_state.unwrap_or_default(),
            error_kind = %record.error_kind.unwrap_or_default(),
            updated_at = %record.updated_at,
            "case"
        );
    }

    match TemplateRegistry::new(&args.artifacts_root).list() {
        Ok(templates) => {
            let configured = templates
                .iter()
                .filter(|summary| summary.field_count > 0)
                .count();
            info!(
                templates = templates.len(),
                configured,
                starters = templates.len() - configured,
                "template registry status"
            );
        }
        Err(err) => warn!(error = %format!("{err:#}"), "template registry unreadable"),
    }

    Ok(())
}

fn show_case(ledger: &CaseLedger, store: &ArtifactStore, case_id: &str) -> Result<()> {
    validate_case_id(case_id)?;

    match ledger.get(case_id)? {
        Some(record) => info!(
            case_id = %record.case_id,
            status = %record.status,
            started_at = %record.started_at,
            updated_at = %record.updated_at,
            error_message = %record.error_message.unwrap_or_default(),
            "ledger entry"
        ),
        None => warn!(case_id = %case_id, "case not found in ledger"),
    }

    if !store.exists(case_id, RUN_RESULT_FILE) {
        warn!(case_id = %case_id, "run result missing; case may still be running");
        return Ok(());
    }

    let run_result: RunResult = store.read_json(case_id, RUN_RESULT_FILE)?;
    print_json_pretty(&run_result)
}
