//! In-memory per-case progress log with lossless subscriptions.
//!
//! Each case owns an append-only sequence of [`ProgressState`] snapshots.
//! The orchestrator is the only writer for its case; subscribers read the
//! log through a cursor and are woken by a `watch` channel, so slow readers
//! never block the writer and never miss a transition. State is lost when
//! the process exits.
//!
//! A case id is claimed exactly once; a second claim is rejected so no
//! caller can append to a log it does not own. Only the most recent
//! terminal logs are kept, older ones are forgotten.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::util::now_utc_string;

/// Finished case logs kept for late subscribers and status lookups.
pub const DEFAULT_TERMINAL_RETENTION: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Queued,
    Extracting,
    Canonicalizing,
    Validating,
    ResolvingTemplate,
    Filling,
    Completed,
    CompletedUnfilled,
    Failed,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Extracting => "extracting",
            Self::Canonicalizing => "canonicalizing",
            Self::Validating => "validating",
            Self::ResolvingTemplate => "resolving_template",
            Self::Filling => "filling",
            Self::Completed => "completed",
            Self::CompletedUnfilled => "completed_unfilled",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::CompletedUnfilled | Self::Failed
        )
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressState {
    pub case_id: String,
    pub stage: Stage,
    pub sequence: u64,
    pub detail: Option<String>,
    pub error: Option<String>,
    pub terminal: bool,
    pub at: String,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProgressError {
    #[error("unknown case `{0}`")]
    UnknownCase(String),

    #[error("case `{0}` is already tracked")]
    AlreadyClaimed(String),

    #[error("case `{case_id}` already terminal in `{stage}`")]
    AlreadyTerminal { case_id: String, stage: Stage },

    #[error("case `{case_id}` cannot move back from `{from}` to `{to}`")]
    Backwards {
        case_id: String,
        from: Stage,
        to: Stage,
    },
}

struct CaseLog {
    events: Mutex<Vec<ProgressState>>,
    latest: watch::Sender<u64>,
}

impl CaseLog {
    fn events(&self) -> MutexGuard<'_, Vec<ProgressState>> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn event_at(&self, index: usize) -> Option<ProgressState> {
        self.events().get(index).cloned()
    }
}

pub struct ProgressTracker {
    cases: Mutex<HashMap<String, Arc<CaseLog>>>,
    finished: Mutex<VecDeque<String>>,
    retain_terminal: usize,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::with_retention(DEFAULT_TERMINAL_RETENTION)
    }
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retention(retain_terminal: usize) -> Self {
        Self {
            cases: Mutex::new(HashMap::new()),
            finished: Mutex::new(VecDeque::new()),
            retain_terminal,
        }
    }

    /// Opens a case in `queued` and makes the caller its only writer.
    /// Fails if the id is already tracked, running or recently finished.
    pub fn claim(&self, case_id: &str) -> Result<ProgressState, ProgressError> {
        let mut cases = self.cases();
        if cases.contains_key(case_id) {
            warn!(case_id = %case_id, "progress claim rejected: case already tracked");
            return Err(ProgressError::AlreadyClaimed(case_id.to_string()));
        }

        let state = ProgressState {
            case_id: case_id.to_string(),
            stage: Stage::Queued,
            sequence: 0,
            detail: None,
            error: None,
            terminal: false,
            at: now_utc_string(),
        };
        let (latest, _) = watch::channel(0);
        cases.insert(
            case_id.to_string(),
            Arc::new(CaseLog {
                events: Mutex::new(vec![state.clone()]),
                latest,
            }),
        );
        debug!(case_id = %case_id, "progress claimed");
        Ok(state)
    }

    /// Appends a transition. Terminal cases and backward moves are rejected.
    pub fn advance(
        &self,
        case_id: &str,
        stage: Stage,
        detail: Option<String>,
    ) -> Result<ProgressState, ProgressError> {
        self.append(case_id, stage, detail, None)
    }

    /// Appends the terminal `failed` state carrying `error`.
    pub fn fail(&self, case_id: &str, error: String) -> Result<ProgressState, ProgressError> {
        self.append(case_id, Stage::Failed, None, Some(error))
    }

    fn append(
        &self,
        case_id: &str,
        stage: Stage,
        detail: Option<String>,
        error: Option<String>,
    ) -> Result<ProgressState, ProgressError> {
        let log = self.log(case_id).ok_or_else(|| {
            warn!(case_id = %case_id, stage = %stage, "progress transition for unknown case");
            ProgressError::UnknownCase(case_id.to_string())
        })?;

        let state = {
            let mut events = log.events();
            let current = events
                .last()
                .cloned()
                .ok_or_else(|| ProgressError::UnknownCase(case_id.to_string()))?;

            if current.terminal {
                warn!(
                    case_id = %case_id,
                    current = %current.stage,
                    rejected = %stage,
                    "progress transition rejected: case already terminal"
                );
                return Err(ProgressError::AlreadyTerminal {
                    case_id: case_id.to_string(),
                    stage: current.stage,
                });
            }

            if stage < current.stage {
                warn!(
                    case_id = %case_id,
                    current = %current.stage,
                    rejected = %stage,
                    "progress transition rejected: backwards move"
                );
                return Err(ProgressError::Backwards {
                    case_id: case_id.to_string(),
                    from: current.stage,
                    to: stage,
                });
            }

            let state = ProgressState {
                case_id: case_id.to_string(),
                stage,
                sequence: current.sequence + 1,
                detail,
                error,
                terminal: stage.is_terminal(),
                at: now_utc_string(),
            };
            events.push(state.clone());
            state
        };

        log.latest.send_replace(state.sequence);
        debug!(case_id = %case_id, stage = %stage, sequence = state.sequence, "progress advanced");
        if state.terminal {
            self.retire(case_id);
        }
        Ok(state)
    }

    /// Queues a finished case and forgets the oldest finished logs beyond
    /// the retention limit. Open subscriptions keep their log alive.
    fn retire(&self, case_id: &str) {
        let evicted = {
            let mut finished = self
                .finished
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            finished.push_back(case_id.to_string());
            let excess = finished.len().saturating_sub(self.retain_terminal);
            finished.drain(..excess).collect::<Vec<_>>()
        };
        if evicted.is_empty() {
            return;
        }

        let mut cases = self.cases();
        for case_id in &evicted {
            cases.remove(case_id);
        }
        debug!(evicted = evicted.len(), "finished progress logs forgotten");
    }

    pub fn current(&self, case_id: &str) -> Option<ProgressState> {
        self.log(case_id)
            .and_then(|log| log.events().last().cloned())
    }

    pub fn history(&self, case_id: &str) -> Vec<ProgressState> {
        self.log(case_id)
            .map(|log| log.events().clone())
            .unwrap_or_default()
    }

    /// Streams the current state, then every later transition, ending after
    /// the terminal state. Returns `None` for unknown cases.
    pub fn subscribe(&self, case_id: &str) -> Option<BoxStream<'static, ProgressState>> {
        let log = self.log(case_id)?;
        let wake = log.latest.subscribe();
        let cursor = log.events().len().saturating_sub(1);

        let cursor_state = Subscription {
            log,
            wake,
            cursor,
            finished: false,
        };

        Some(
            stream::unfold(cursor_state, |mut subscription| async move {
                if subscription.finished {
                    return None;
                }

                loop {
                    if let Some(state) = subscription.log.event_at(subscription.cursor) {
                        subscription.cursor += 1;
                        subscription.finished = state.terminal;
                        return Some((state, subscription));
                    }

                    if subscription.wake.changed().await.is_err() {
                        return None;
                    }
                }
            })
            .boxed(),
        )
    }

    fn log(&self, case_id: &str) -> Option<Arc<CaseLog>> {
        self.cases().get(case_id).cloned()
    }

    fn cases(&self) -> MutexGuard<'_, HashMap<String, Arc<CaseLog>>> {
        self.cases
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

struct Subscription {
    log: Arc<CaseLog>,
    wake: watch::Receiver<u64>,
    cursor: usize,
    finished: bool,
}

#[cfg(test)]
mod tests;
