//! 编排过程事件：供调用方订阅进度（可序列化为 JSON）

use serde::Serialize;

use crate::core::recovery::MetaAction;
use crate::core::state::{TerminalStatus, TerminationReason};
use crate::goal::{CompletionOutcome, GoalId};
use crate::oracle::Verdict;
use crate::workflow::{StepId, StepStatus};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrchestratorEvent {
    /// 新一轮开始
    RoundStarted { round: usize, goal_id: GoalId },
    /// 计划已生成（fallback 表示 Planner 临时失败时的单步兜底）
    PlanReady { goal_id: GoalId, steps: usize, fallback: bool },
    StepFinished {
        step_id: StepId,
        status: StepStatus,
        duration_ms: u64,
    },
    Verdict { step_id: StepId, verdict: Verdict },
    /// 元决策
    Decision {
        action: MetaAction,
        fail_count: u32,
        replans: usize,
    },
    GoalDecomposed { goal_id: GoalId, subgoals: usize },
    GoalCompleted {
        goal_id: GoalId,
        outcome: Option<CompletionOutcome>,
    },
    Terminated {
        status: TerminalStatus,
        reason: TerminationReason,
    },
}
