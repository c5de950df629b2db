//! 编排集成测试：目标栈推进、上限强停、快照续跑

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use hive::core::{
    Orchestrator, OrchestratorEvent, RunLimits, SnapshotStore, TerminalStatus, TerminationReason,
};
use hive::goal::{CompletionOutcome, FailureDecision, GoalLimits, GoalStack, SubgoalSpec};
use hive::oracle::{EchoExecutor, Executor, FixedVerifier, OutcomeVerifier, SplitPlanner, Verdict};
use hive::workflow::Step;

struct AlwaysFailExecutor {
    calls: AtomicUsize,
}

#[async_trait]
impl Executor for AlwaysFailExecutor {
    async fn run(&self, _step: &Step) -> Result<serde_json::Value, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err("element not found".to_string())
    }
}

/// 第 fail_on 次调用失败，其余成功
struct FailOnceExecutor {
    calls: AtomicUsize,
    fail_on: usize,
}

#[async_trait]
impl Executor for FailOnceExecutor {
    async fn run(&self, step: &Step) -> Result<serde_json::Value, String> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if n == self.fail_on {
            Err(format!("{} crashed", step.description))
        } else {
            Ok(serde_json::json!({ "ok": step.id }))
        }
    }
}

#[test]
fn test_goal_stack_decompose_and_complete() {
    let mut goals = GoalStack::with_root("main task", GoalLimits::default());
    assert_eq!(goals.handle_failure("boom"), FailureDecision::Retry);
    assert_eq!(goals.handle_failure("boom"), FailureDecision::Retry);
    assert_eq!(goals.handle_failure("boom"), FailureDecision::Decompose);

    assert!(goals.decompose(vec![SubgoalSpec::new("A"), SubgoalSpec::new("B")], "boom"));
    let ids: Vec<&str> = goals.goals().iter().map(|g| g.id.as_str()).collect();
    assert_eq!(ids, vec!["main", "1"]);

    assert_eq!(
        goals.complete_current_subtask(),
        Some(CompletionOutcome::NextSubtask)
    );
    let ids: Vec<&str> = goals.goals().iter().map(|g| g.id.as_str()).collect();
    assert_eq!(ids, vec!["main", "2"]);

    assert_eq!(
        goals.complete_current_subtask(),
        Some(CompletionOutcome::AllComplete)
    );
    assert!(goals.is_empty());
}

#[tokio::test]
async fn test_persistent_failure_hits_replan_ceiling() {
    let executor = Arc::new(AlwaysFailExecutor {
        calls: AtomicUsize::new(0),
    });
    let orch = Orchestrator::new(
        Arc::new(SplitPlanner),
        executor.clone(),
        Arc::new(OutcomeVerifier),
    );
    let limits = RunLimits {
        max_replans: 2,
        ..RunLimits::default()
    };

    let terminal = orch.run("submit the form", limits).await.unwrap();

    assert_eq!(terminal.status, TerminalStatus::ForcedStop);
    assert_eq!(terminal.reason, TerminationReason::ReplanLimit(2));
    assert_eq!(terminal.replans, 2);
    assert_eq!(executor.calls.load(Ordering::SeqCst), terminal.steps);
}

#[tokio::test]
async fn test_uncertain_oracle_cannot_loop_forever() {
    let orch = Orchestrator::new(
        Arc::new(SplitPlanner),
        Arc::new(EchoExecutor),
        Arc::new(FixedVerifier(Verdict::Uncertain)),
    );
    let limits = RunLimits {
        max_replans: 4,
        ..RunLimits::default()
    };
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let orch = orch.with_event_tx(tx);

    let terminal = orch.run("look around; report", limits).await.unwrap();
    assert_eq!(terminal.status, TerminalStatus::ForcedStop);
    assert!(terminal.replans <= limits.max_replans);
    assert!(terminal.steps <= limits.max_steps);

    let mut rounds = 0;
    let mut decomposed = false;
    while let Ok(ev) = rx.try_recv() {
        match ev {
            OrchestratorEvent::RoundStarted { .. } => rounds += 1,
            OrchestratorEvent::GoalDecomposed { .. } => decomposed = true,
            _ => {}
        }
    }
    assert!(rounds > 0);
    assert!(decomposed);
    assert!(terminal
        .state
        .forbidden_actions
        .contains(&"UNCERTAIN APPROACH: look around".to_string()));
}

#[tokio::test]
async fn test_partial_batch_failure_repairs_only_failed_step() {
    let executor = Arc::new(FailOnceExecutor {
        calls: AtomicUsize::new(0),
        fail_on: 2,
    });
    let orch = Orchestrator::new(
        Arc::new(SplitPlanner),
        executor,
        Arc::new(OutcomeVerifier),
    );

    let terminal = orch
        .run("download; unpack; install", RunLimits::default())
        .await
        .unwrap();

    assert_eq!(terminal.status, TerminalStatus::Success);
    assert_eq!(terminal.replans, 0);
    assert_eq!(
        terminal.state.history,
        vec![
            "SUCCESS: download",
            "FAILED: unpack",
            "SUCCESS: unpack",
            "SUCCESS: install",
        ]
    );
    assert!(terminal.state.forbidden_actions.is_empty());
}

#[tokio::test]
async fn test_resume_from_saved_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let store = SnapshotStore::new(dir.path().join("runs/latest.json"));

    // 第一次运行在步数上限处强停
    let orch = Orchestrator::new(
        Arc::new(SplitPlanner),
        Arc::new(AlwaysFailExecutor {
            calls: AtomicUsize::new(0),
        }),
        Arc::new(OutcomeVerifier),
    );
    let limits = RunLimits {
        max_steps: 1,
        ..RunLimits::default()
    };
    let stopped = orch.run("migrate db", limits).await.unwrap();
    assert_eq!(stopped.status, TerminalStatus::ForcedStop);
    assert_eq!(stopped.reason, TerminationReason::StepLimit(1));
    store.save(&stopped.to_snapshot()).unwrap();

    // 换一个能成功的执行器续跑，计数与历史延续
    let snapshot = store.load().unwrap().unwrap();
    assert_eq!(snapshot.state.step_count, 1);
    let orch = Orchestrator::new(
        Arc::new(SplitPlanner),
        Arc::new(EchoExecutor),
        Arc::new(OutcomeVerifier),
    );
    let finished = orch.resume(snapshot, RunLimits::default()).await.unwrap();

    assert_eq!(finished.status, TerminalStatus::Success);
    assert_eq!(finished.steps, 2);
    assert_ne!(finished.run_id, stopped.run_id);
    assert_eq!(
        finished.state.history,
        vec!["FAILED: migrate db", "SUCCESS: migrate db"]
    );
    assert!(finished.goal_stack.stack.is_empty());
}
