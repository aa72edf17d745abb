//! Checkpoint persistence and resume across pipeline instances.

mod common;

use std::sync::Arc;

use common::*;
use deliberation::checkpoint::validate_snapshot;
use deliberation::{
    CheckpointError, CheckpointStore, ConsensusSettings, DebatePhase, DebateSettings,
    JsonFileStore, MemoryStore, NodeId, RunConfig, TerminationReason,
};

fn config(step_budget: u32) -> RunConfig {
    let debate = DebateSettings {
        max_rounds: 2,
        turn_timeout_secs: None,
        consensus: ConsensusSettings::disabled(),
    };
    RunConfig {
        step_budget,
        research_debate: debate.clone(),
        risk_debate: debate,
        ..Default::default()
    }
}

/// analysts, 2 research rounds, judge, trader, 2 risk rounds, judge, arbiter
const FULL_RUN: u32 = 9;

#[tokio::test]
async fn test_snapshot_after_every_node() {
    let store = Arc::new(MemoryStore::new());
    let pipeline = desk(config(100), diligent_analysts())
        .store(store.clone())
        .build()
        .unwrap();
    let outcome = pipeline.propagate_as("run-full", "AMD", date()).await.unwrap();
    assert!(outcome.reason.is_completed());

    let history = store.history("run-full");
    assert_eq!(history.len(), FULL_RUN as usize + 1);
    for (idx, snapshot) in history.iter().take(FULL_RUN as usize).enumerate() {
        assert_eq!(snapshot.steps, idx as u32 + 1);
        assert!(!snapshot.is_terminal());
        validate_snapshot(snapshot).unwrap();
    }
    assert_eq!(history[0].last_node, Some(NodeId::Analysts));
    assert_eq!(history[FULL_RUN as usize - 1].last_node, Some(NodeId::FinalArbiter));
    assert!(history.last().unwrap().is_terminal());
    assert_eq!(history.last().unwrap().state, outcome.state);
}

#[tokio::test]
async fn test_resume_after_interruption_counts_prior_steps() {
    let store = Arc::new(MemoryStore::new());
    let first = desk(config(4), diligent_analysts())
        .store(store.clone())
        .build()
        .unwrap();
    let halted = first.propagate_as("run-r", "AMD", date()).await.unwrap();
    assert_eq!(
        halted.reason,
        TerminationReason::BudgetExceeded { steps: 4, budget: 4 }
    );

    // A sealed run cannot be resumed.
    let err = first.resume("run-r").await.unwrap_err();
    assert!(matches!(err, CheckpointError::AlreadyTerminated(_)));

    // Drop the sealed snapshot: as if the process died after step 4.
    assert_eq!(store.truncate("run-r", 4), 4);
    let interrupted = store.load("run-r").unwrap();
    assert_eq!(interrupted.last_node, Some(NodeId::ResearchJudge));

    let second = desk(config(100), diligent_analysts())
        .store(store.clone())
        .build()
        .unwrap();
    let resumed = second.resume("run-r").await.unwrap();

    assert!(resumed.reason.is_completed());
    assert_eq!(resumed.steps, FULL_RUN);
    assert_eq!(resumed.state.run_id, "run-r");
    assert!(!resumed.state.final_decision.is_empty());
    // Earlier artifacts carried over, not recomputed.
    assert_eq!(resumed.state.analyst_reports, interrupted.state.analyst_reports);
    assert_eq!(
        resumed.state.research_debate.as_ref().unwrap().transcript,
        interrupted.state.research_debate.as_ref().unwrap().transcript
    );
}

#[tokio::test]
async fn test_resume_budget_includes_prior_steps() {
    let store = Arc::new(MemoryStore::new());
    let first = desk(config(3), diligent_analysts())
        .store(store.clone())
        .build()
        .unwrap();
    first.propagate_as("run-b", "AMD", date()).await.unwrap();
    store.truncate("run-b", 3);

    let second = desk(config(5), diligent_analysts())
        .store(store.clone())
        .build()
        .unwrap();
    let resumed = second.resume("run-b").await.unwrap();
    assert_eq!(
        resumed.reason,
        TerminationReason::BudgetExceeded { steps: 5, budget: 5 }
    );
}

#[tokio::test]
async fn test_json_store_persists_terminal_state() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(JsonFileStore::new(dir.path().join("checkpoints")));
    let pipeline = desk(config(100), diligent_analysts())
        .store(store.clone())
        .build()
        .unwrap();
    let outcome = pipeline.propagate_as("run-json", "AMD", date()).await.unwrap();

    assert!(dir.path().join("checkpoints/run-json.json").exists());
    assert_eq!(store.list().unwrap(), vec!["run-json".to_string()]);

    let snapshot = store.load("run-json").unwrap();
    assert!(snapshot.is_terminal());
    assert_eq!(snapshot.steps, FULL_RUN);
    assert_eq!(snapshot.state, outcome.state);
    let risk = snapshot.state.risk_debate.as_ref().unwrap();
    assert_eq!(risk.phase, DebatePhase::ForcedTermination);

    let err = pipeline.resume("run-json").await.unwrap_err();
    assert!(matches!(err, CheckpointError::AlreadyTerminated(_)));
}

#[tokio::test]
async fn test_resume_unknown_run() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = desk(config(100), diligent_analysts())
        .store(Arc::new(JsonFileStore::new(dir.path())))
        .build()
        .unwrap();
    let err = pipeline.resume("missing").await.unwrap_err();
    assert!(matches!(err, CheckpointError::NotFound(_)));
    let err = pipeline.resume("../escape").await.unwrap_err();
    assert!(matches!(err, CheckpointError::InvalidRunId(_)));
}
