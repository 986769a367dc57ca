use std::sync::Arc;

use futures::StreamExt;

use super::*;

#[test]
fn sequence_numbers_strictly_increase() {
    let tracker = ProgressTracker::new();
    tracker.claim("case-a").unwrap();

    let stages = [
        Stage::Extracting,
        Stage::Canonicalizing,
        Stage::Validating,
        Stage::ResolvingTemplate,
        Stage::Filling,
        Stage::Completed,
    ];
    for stage in stages {
        tracker.advance("case-a", stage, None).expect("forward transition");
    }

    let history = tracker.history("case-a");
    assert_eq!(history.len(), 7);
    assert!(history.windows(2).all(|pair| pair[0].sequence < pair[1].sequence));
    assert!(history.last().unwrap().terminal);
}

#[test]
fn terminal_cases_reject_further_transitions() {
    let tracker = ProgressTracker::new();
    tracker.claim("case-b").unwrap();
    tracker.fail("case-b", "extractor exploded".to_string()).unwrap();

    let err = tracker
        .advance("case-b", Stage::Failed, None)
        .expect_err("terminal case must reject transitions");
    assert_eq!(
        err,
        ProgressError::AlreadyTerminal {
            case_id: "case-b".to_string(),
            stage: Stage::Failed,
        }
    );
    assert_eq!(tracker.history("case-b").len(), 2);
    assert_eq!(
        tracker.current("case-b").unwrap().error.as_deref(),
        Some("extractor exploded")
    );
}

#[test]
fn backwards_and_unknown_transitions_are_rejected() {
    let tracker = ProgressTracker::new();
    tracker.claim("case-c").unwrap();
    tracker.advance("case-c", Stage::Validating, None).unwrap();

    assert!(matches!(
        tracker.advance("case-c", Stage::Extracting, None),
        Err(ProgressError::Backwards { .. })
    ));
    assert!(matches!(
        tracker.advance("missing", Stage::Extracting, None),
        Err(ProgressError::UnknownCase(_))
    ));
}

#[test]
fn claims_are_exclusive() {
    let tracker = ProgressTracker::new();
    tracker.claim("case-d").unwrap();
    tracker.advance("case-d", Stage::Extracting, None).unwrap();

    let err = tracker.claim("case-d").unwrap_err();
    assert_eq!(err, ProgressError::AlreadyClaimed("case-d".to_string()));

    let history = tracker.history("case-d");
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].stage, Stage::Extracting);
}

#[test]
fn only_recent_terminal_logs_are_retained() {
    let tracker = ProgressTracker::with_retention(2);
    for case_id in ["case-1", "case-2", "case-3"] {
        tracker.claim(case_id).unwrap();
        tracker.advance(case_id, Stage::Completed, None).unwrap();
    }
    tracker.claim("case-open").unwrap();

    assert!(tracker.current("case-1").is_none());
    assert!(tracker.subscribe("case-1").is_none());
    assert_eq!(tracker.current("case-2").unwrap().stage, Stage::Completed);
    assert_eq!(tracker.current("case-3").unwrap().stage, Stage::Completed);
    assert_eq!(tracker.current("case-open").unwrap().stage, Stage::Queued);

    tracker.claim("case-1").expect("forgotten ids can be claimed again");
}

#[tokio::test]
async fn late_subscriber_starts_from_current_state() {
    let tracker = ProgressTracker::new();
    tracker.claim("case-e").unwrap();
    tracker.advance("case-e", Stage::Extracting, None).unwrap();
    tracker.advance("case-e", Stage::Canonicalizing, None).unwrap();

    let mut stream = tracker.subscribe("case-e").expect("known case");
    tracker.advance("case-e", Stage::Validating, None).unwrap();
    tracker.advance("case-e", Stage::ResolvingTemplate, None).unwrap();
    tracker
        .advance("case-e", Stage::CompletedUnfilled, Some("starter".to_string()))
        .unwrap();

    let mut seen = Vec::new();
    while let Some(state) = stream.next().await {
        seen.push(state.stage);
    }

    assert_eq!(
        seen,
        vec![
            Stage::Canonicalizing,
            Stage::Validating,
            Stage::ResolvingTemplate,
            Stage::CompletedUnfilled,
        ]
    );
}

#[tokio::test]
async fn subscriber_after_terminal_gets_single_event() {
    let tracker = ProgressTracker::new();
    tracker.claim("case-f").unwrap();
    tracker.advance("case-f", Stage::Completed, None).unwrap();

    let events = tracker
        .subscribe("case-f")
        .unwrap()
        .collect::<Vec<_>>()
        .await;
    assert_eq!(events.len(), 1);
    assert!(events[0].terminal);
    assert!(tracker.subscribe("never-registered").is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_subscribers_observe_identical_sequences() {
    let tracker = Arc::new(ProgressTracker::new());
    tracker.claim("case-g").unwrap();

    let first = tracker.subscribe("case-g").unwrap();
    let second = tracker.subscribe("case-g").unwrap();
    let first = tokio::spawn(first.collect::<Vec<_>>());
    let second = tokio::spawn(second.collect::<Vec<_>>());

    let writer = Arc::clone(&tracker);
    tokio::task::spawn_blocking(move || {
        for stage in [
            Stage::Extracting,
            Stage::Canonicalizing,
            Stage::Validating,
            Stage::ResolvingTemplate,
            Stage::Filling,
            Stage::Completed,
        ] {
            writer.advance("case-g", stage, None).unwrap();
        }
    })
    .await
    .unwrap();

    let first = first.await.unwrap();
    let second = second.await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first.len(), 7);
    assert_eq!(first.iter().filter(|state| state.terminal).count(), 1);
}
