//! 元决策：根据判定与连续失败次数决定继续、修复单步还是整体重新规划

use serde::{Deserialize, Serialize};

use crate::core::state::{OrchestratorState, RunLimits, TerminationReason};
use crate::oracle::Verdict;

/// 单轮结束后的元动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetaAction {
    /// 继续执行剩余计划
    Proceed,
    /// 仅替换失败步骤
    Repair,
    /// 丢弃剩余计划，重新生成
    Replan,
}

impl std::fmt::Display for MetaAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MetaAction::Proceed => "proceed",
            MetaAction::Repair => "repair",
            MetaAction::Replan => "replan",
        };
        f.write_str(s)
    }
}

/// 连续失败达到该次数后放弃修复，改为重新规划
pub const REPLAN_THRESHOLD: u32 = 3;

/// 元决策策略
#[derive(Debug, Clone, Copy)]
pub struct RecoveryPolicy {
    replan_threshold: u32,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            replan_threshold: REPLAN_THRESHOLD,
        }
    }
}

impl RecoveryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// verdict 为已折算后的判定（同一步骤重复 Uncertain 已提升为 Failed）；
    /// fail_count / uncertain_streak 为记录之后的值
    ///
    /// 同一步骤的第一次 Uncertain 返回 Proceed：调用方应对已有结果重新判定，而不是再次执行。
    pub fn decide(&self, verdict: Verdict, fail_count: u32, uncertain_streak: u32) -> MetaAction {
        match verdict {
            Verdict::Completed => MetaAction::Proceed,
            Verdict::Failed if fail_count >= self.replan_threshold => MetaAction::Replan,
            Verdict::Failed => MetaAction::Repair,
            Verdict::Uncertain if uncertain_streak <= 1 => MetaAction::Proceed,
            Verdict::Uncertain => MetaAction::Repair,
        }
    }

    /// 每轮开始前检查硬上限
    pub fn check_limits(
        &self,
        state: &OrchestratorState,
        limits: &RunLimits,
    ) -> Option<TerminationReason> {
        if state.step_count >= limits.max_steps {
            return Some(TerminationReason::StepLimit(limits.max_steps));
        }
        if state.replan_count >= limits.max_replans {
            return Some(TerminationReason::ReplanLimit(limits.max_replans));
        }
        None
    }
}
