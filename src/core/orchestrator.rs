//! 主控循环：计划 -> 依赖调度执行 -> 逐步判定 -> 元决策（继续 / 修复 / 重新规划）
//!
//! 每轮开始前检查取消与硬上限；计划耗尽时请 Verifier 确认目标，再由 GoalStack 推进到下一个子目标。
//! 目标级失败（重新规划）交给 GoalStack 决定重试、分解或终止。

use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::core::events::OrchestratorEvent;
use crate::core::recovery::{MetaAction, RecoveryPolicy};
use crate::core::state::{
    OrchestratorState, RunLimits, RunSnapshot, TerminalState, TerminalStatus, TerminationReason,
};
use crate::core::{EngineError, PlannerError};
use crate::goal::{CompletionOutcome, FailureDecision, Goal, GoalStack};
use crate::oracle::{Executor, Planner, Verdict, Verifier};
use crate::workflow::{DependencyScheduler, ExecutionStats, Step, StepResult, StepStatus};

/// 编排器：持有三方 Oracle 与共享调度器，可并发驱动多个独立 run
pub struct Orchestrator {
    planner: Arc<dyn Planner>,
    verifier: Arc<dyn Verifier>,
    scheduler: DependencyScheduler,
    recovery: RecoveryPolicy,
    cancel_token: CancellationToken,
    event_tx: Option<UnboundedSender<OrchestratorEvent>>,
}

/// 单次 run 独占的上下文
struct Run {
    id: Uuid,
    goals: GoalStack,
    state: OrchestratorState,
    limits: RunLimits,
}

enum Flow {
    Continue,
    Stop(TerminalStatus, TerminationReason),
}

/// 本轮第一个未完成的步骤（驱动计数与元决策）
struct StepFailure {
    step: Step,
    verdict: Verdict,
    output: serde_json::Value,
    error: Option<String>,
}

impl StepFailure {
    fn context(&self) -> String {
        format!(
            "step {} '{}' {}: {}",
            self.step.id,
            self.step.description,
            self.verdict,
            self.error.as_deref().unwrap_or("no error reported")
        )
    }
}

impl Orchestrator {
    pub fn new(
        planner: Arc<dyn Planner>,
        executor: Arc<dyn Executor>,
        verifier: Arc<dyn Verifier>,
    ) -> Self {
        Self {
            planner,
            verifier,
            scheduler: DependencyScheduler::new(executor),
            recovery: RecoveryPolicy::default(),
            cancel_token: CancellationToken::new(),
            event_tx: None,
        }
    }

    /// 调度器按 [scheduler] 配置段构建
    pub fn from_config(
        config: &AppConfig,
        planner: Arc<dyn Planner>,
        executor: Arc<dyn Executor>,
        verifier: Arc<dyn Verifier>,
    ) -> Self {
        Self::new(planner, executor.clone(), verifier)
            .with_scheduler(DependencyScheduler::from_config(executor, &config.scheduler))
    }

    pub fn with_scheduler(mut self, scheduler: DependencyScheduler) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = token;
        self
    }

    /// 设置事件推送通道
    pub fn with_event_tx(mut self, tx: UnboundedSender<OrchestratorEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    pub fn scheduler(&self) -> &DependencyScheduler {
        &self.scheduler
    }

    fn emit(&self, ev: OrchestratorEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(ev);
        }
    }

    /// 驱动目标直到成功、触顶强停或失败；只有非法上限会返回 Err
    pub async fn run(&self, goal: &str, limits: RunLimits) -> Result<TerminalState, EngineError> {
        limits.validate()?;
        let goals = GoalStack::with_root(goal, limits.goal_limits());
        Ok(self.drive(goals, OrchestratorState::default(), limits).await)
    }

    /// 从快照续跑：目标栈与计数原样恢复，上限以本次传入为准
    pub async fn resume(
        &self,
        snapshot: RunSnapshot,
        limits: RunLimits,
    ) -> Result<TerminalState, EngineError> {
        limits.validate()?;
        let goals = GoalStack::from_snapshot(snapshot.goal_stack, limits.goal_limits());
        Ok(self.drive(goals, snapshot.state, limits).await)
    }

    async fn drive(
        &self,
        goals: GoalStack,
        state: OrchestratorState,
        limits: RunLimits,
    ) -> TerminalState {
        let root = goals
            .goals()
            .first()
            .map(|g| g.description.clone())
            .unwrap_or_default();
        let mut run = Run {
            id: Uuid::new_v4(),
            goals,
            state,
            limits,
        };
        let span = tracing::info_span!("run", run_id = %run.id, goal = %root);
        let (status, reason) = self.run_rounds(&mut run).instrument(span.clone()).await;
        let _enter = span.enter();
        self.terminate(run, status, reason)
    }

    async fn run_rounds(&self, run: &mut Run) -> (TerminalStatus, TerminationReason) {
        let mut round = 0usize;
        loop {
            if self.cancel_token.is_cancelled() {
                return (TerminalStatus::ForcedStop, TerminationReason::Cancelled);
            }
            if let Some(reason) = self.recovery.check_limits(&run.state, &run.limits) {
                return (TerminalStatus::ForcedStop, reason);
            }
            let Some(goal) = run.goals.current_goal().cloned() else {
                return (TerminalStatus::Success, TerminationReason::GoalAchieved);
            };

            round += 1;
            tracing::info!(
                "Round {} on goal {} ({}): {}",
                round,
                goal.id,
                run.goals.goal_path(),
                goal.description
            );
            self.emit(OrchestratorEvent::RoundStarted {
                round,
                goal_id: goal.id.clone(),
            });

            if run.state.plan.is_empty() {
                if let Flow::Stop(status, reason) = self.plan_goal(run, &goal).await {
                    return (status, reason);
                }
            }

            // 只派发剩余步数预算内的前缀
            let budget = run.limits.max_steps.saturating_sub(run.state.step_count);
            let steps: Vec<Step> = run.state.plan.iter().take(budget).cloned().collect();
            if steps.len() < run.state.plan.len() {
                tracing::info!(
                    "Step budget allows {} of {} planned steps this round",
                    steps.len(),
                    run.state.plan.len()
                );
            }
            let results = self
                .scheduler
                .execute(&steps, Some(run.limits.max_workers), run.limits.stop_on_error)
                .await;
            let stats = ExecutionStats::from_results(&results, run.limits.max_workers);
            tracing::debug!(
                "Batch done: {} completed, {} failed, {} skipped, avg {:.1}ms",
                stats.completed,
                stats.failed,
                stats.skipped,
                stats.avg_duration_ms
            );
            let failing = self.fold_results(run, &steps, &results).await;

            let flow = match failing {
                Some(failure) => self.recover(run, &goal, failure).await,
                None if run.state.plan.is_empty() => self.finish_plan(run, &goal).await,
                None => Flow::Continue,
            };
            if let Flow::Stop(status, reason) = flow {
                return (status, reason);
            }
        }
    }

    async fn plan_goal(&self, run: &mut Run, goal: &Goal) -> Flow {
        let planned = self
            .planner
            .plan(
                &goal.description,
                &run.state.history,
                &run.state.forbidden_actions,
            )
            .await;

        let (steps, fallback) = match planned {
            Ok(steps) if !steps.is_empty() => (steps, false),
            Ok(_) => return self.planning_failed(run, "planner returned an empty plan".to_string()),
            Err(PlannerError::NoPlan(msg)) => return self.planning_failed(run, msg),
            Err(PlannerError::Transient(msg)) => {
                tracing::warn!(
                    "Planner error ({}), falling back to single-step plan for goal {}",
                    msg,
                    goal.id
                );
                (vec![Step::new(1, goal.description.clone())], true)
            }
        };

        tracing::debug!("Plan for goal {}: {} steps", goal.id, steps.len());
        self.emit(OrchestratorEvent::PlanReady {
            goal_id: goal.id.clone(),
            steps: steps.len(),
            fallback,
        });
        run.state.plan = steps;
        Flow::Continue
    }

    fn planning_failed(&self, run: &mut Run, msg: String) -> Flow {
        tracing::warn!("Planning failed: {}", msg);
        run.goals.mark_current_failed(&msg);
        Flow::Stop(TerminalStatus::Failure, TerminationReason::Planning(msg))
    }

    /// 按提交顺序逐步判定；第一个未完成的步骤驱动计数，其后的成功步骤照常出计划但不清零计数
    async fn fold_results(
        &self,
        run: &mut Run,
        steps: &[Step],
        results: &[StepResult],
    ) -> Option<StepFailure> {
        let mut failing: Option<StepFailure> = None;

        for (step, result) in steps.iter().zip(results) {
            self.emit(OrchestratorEvent::StepFinished {
                step_id: step.id,
                status: result.status,
                duration_ms: result.duration_ms,
            });
            if result.status == StepStatus::Skipped {
                continue;
            }

            run.state.step_count += 1;
            let verdict = self
                .verifier
                .judge(step, &result.output, result.error.as_deref())
                .await;
            tracing::debug!("Step {} verdict: {}", step.id, verdict);
            self.emit(OrchestratorEvent::Verdict {
                step_id: step.id,
                verdict,
            });

            if failing.is_some() {
                match verdict {
                    Verdict::Completed => run.state.record_success(step, false),
                    other => run.state.note_verdict(other, step),
                }
                continue;
            }

            let effective = match verdict {
                Verdict::Completed => {
                    run.state.record_success(step, true);
                    continue;
                }
                Verdict::Failed => {
                    run.state.record_failure(step);
                    Verdict::Failed
                }
                Verdict::Uncertain => run.state.record_uncertain(step),
            };
            failing = Some(StepFailure {
                step: step.clone(),
                verdict: effective,
                output: result.output.clone(),
                error: result.error.clone(),
            });
        }

        failing
    }

    async fn recover(&self, run: &mut Run, goal: &Goal, mut failure: StepFailure) -> Flow {
        loop {
            let action = self.recovery.decide(
                failure.verdict,
                run.state.current_fail_count,
                run.state.uncertain_streak,
            );
            tracing::info!(
                "Step {} {} (fail_count={}, uncertain_streak={}), action: {}",
                failure.step.id,
                failure.verdict,
                run.state.current_fail_count,
                run.state.uncertain_streak,
                action
            );
            self.emit(OrchestratorEvent::Decision {
                action,
                fail_count: run.state.current_fail_count,
                replans: run.state.replan_count,
            });

            match action {
                MetaAction::Proceed => {
                    // 对同一结果重新判定，不再次执行步骤
                    let verdict = self
                        .verifier
                        .judge(&failure.step, &failure.output, failure.error.as_deref())
                        .await;
                    tracing::debug!("Step {} re-verified: {}", failure.step.id, verdict);
                    self.emit(OrchestratorEvent::Verdict {
                        step_id: failure.step.id,
                        verdict,
                    });
                    failure.verdict = match verdict {
                        Verdict::Completed => {
                            run.state.record_success(&failure.step, true);
                            if run.state.plan.is_empty() {
                                return self.finish_plan(run, goal).await;
                            }
                            return Flow::Continue;
                        }
                        Verdict::Failed => {
                            run.state.record_failure(&failure.step);
                            Verdict::Failed
                        }
                        Verdict::Uncertain => run.state.record_uncertain(&failure.step),
                    };
                }
                MetaAction::Repair => return self.repair(run, goal, &failure).await,
                MetaAction::Replan => {
                    if let Some(last) = run.state.history.last().cloned() {
                        run.state.forbid(format!("FAILED ACTION: {}", last));
                    }
                    return self.replan(run, goal, failure.context()).await;
                }
            }
        }
    }

    /// 用 Planner 给出的单个替代步骤替换失败步骤；给不出时升级为重新规划
    async fn repair(&self, run: &mut Run, goal: &Goal, failure: &StepFailure) -> Flow {
        let repaired = self
            .planner
            .repair(
                &goal.description,
                &failure.step,
                &run.state.history,
                &run.state.forbidden_actions,
            )
            .await;

        let mut replacement = match repaired {
            Ok(Some(step)) => step,
            Ok(None) | Err(PlannerError::NoPlan(_)) => {
                tracing::warn!("No repair for step {}, replanning", failure.step.id);
                return self.replan(run, goal, failure.context()).await;
            }
            Err(PlannerError::Transient(msg)) => {
                tracing::warn!("Repair failed ({}), retrying step {} as is", msg, failure.step.id);
                failure.step.clone()
            }
        };

        run.state.reset_uncertain_streak();
        let pos = run.state.remove_step(failure.step.id).unwrap_or(0);
        if run.state.plan.iter().any(|s| s.id == replacement.id) {
            replacement.id = run.state.plan.iter().map(|s| s.id).max().unwrap_or(0) + 1;
        }
        let pos = pos.min(run.state.plan.len());
        run.state.plan.insert(pos, replacement);
        Flow::Continue
    }

    /// 丢弃剩余计划并计一次目标级失败
    async fn replan(&self, run: &mut Run, goal: &Goal, error_context: String) -> Flow {
        run.state.replan_count += 1;
        run.state.plan.clear();
        run.state.reset_uncertain_streak();

        match run.goals.handle_failure(&error_context) {
            FailureDecision::Retry => Flow::Continue,
            FailureDecision::Abort => {
                tracing::warn!("Goal {} keeps failing at max depth, aborting", goal.id);
                run.goals.mark_current_failed(&error_context);
                Flow::Stop(
                    TerminalStatus::Failure,
                    TerminationReason::DepthExhausted(error_context),
                )
            }
            FailureDecision::Decompose => {
                let subgoals = match self
                    .planner
                    .decompose(&goal.description, &error_context, run.limits.max_subgoals)
                    .await
                {
                    Ok(subgoals) => subgoals,
                    Err(e) => {
                        tracing::warn!("Decompose failed for goal {}: {}", goal.id, e);
                        Vec::new()
                    }
                };
                let count = subgoals.len().min(run.limits.max_subgoals);
                if run.goals.decompose(subgoals, &error_context) {
                    tracing::info!("Goal {} decomposed into {} subgoals", goal.id, count);
                    self.emit(OrchestratorEvent::GoalDecomposed {
                        goal_id: goal.id.clone(),
                        subgoals: count,
                    });
                    run.state.reset_for_new_goal();
                } else {
                    tracing::warn!("Goal {} could not be decomposed, replanning as a whole", goal.id);
                }
                Flow::Continue
            }
        }
    }

    /// 计划耗尽：确认目标后推进目标栈，否则按目标级失败重新规划
    async fn finish_plan(&self, run: &mut Run, goal: &Goal) -> Flow {
        let verdict = self
            .verifier
            .confirm_goal(&goal.description, &run.state.history)
            .await;
        if verdict != Verdict::Completed {
            tracing::info!("Goal {} not confirmed ({}), replanning", goal.id, verdict);
            let context = format!("goal '{}' not confirmed: {}", goal.description, verdict);
            return self.replan(run, goal, context).await;
        }

        let outcome = run.goals.complete_current_subtask();
        tracing::info!("Goal {} completed: {:?}", goal.id, outcome);
        self.emit(OrchestratorEvent::GoalCompleted {
            goal_id: goal.id.clone(),
            outcome,
        });
        match outcome {
            Some(CompletionOutcome::AllComplete) | None => {
                Flow::Stop(TerminalStatus::Success, TerminationReason::GoalAchieved)
            }
            Some(_) => {
                run.state.reset_for_new_goal();
                Flow::Continue
            }
        }
    }

    fn terminate(
        &self,
        run: Run,
        status: TerminalStatus,
        reason: TerminationReason,
    ) -> TerminalState {
        tracing::info!(
            "Run finished: {:?} ({}), steps={}, replans={}",
            status,
            reason,
            run.state.step_count,
            run.state.replan_count
        );
        self.emit(OrchestratorEvent::Terminated {
            status,
            reason: reason.clone(),
        });
        TerminalState {
            run_id: run.id,
            status,
            reason,
            steps: run.state.step_count,
            replans: run.state.replan_count,
            goal_stack: run.goals.snapshot(),
            state: run.state,
        }
    }
}
