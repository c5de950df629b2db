//! 运行状态定义：OrchestratorState、运行上限与终止结果
//!
//! OrchestratorState 由单次 run 独占，计数器只在 Completed 判定时清零，重新规划不会掩盖持续失败。

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::core::EngineError;
use crate::goal::{GoalLimits, GoalStackSnapshot};
use crate::oracle::Verdict;
use crate::workflow::{Step, StepId, DEFAULT_MAX_WORKERS};

/// 单次运行的可变状态（可序列化，用于快照与审计）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorState {
    /// 当前目标剩余的步骤
    pub plan: Vec<Step>,
    pub step_count: usize,
    pub replan_count: usize,
    pub current_fail_count: u32,
    pub uncertain_streak: u32,
    /// 「不要重复」的动作指纹，只增不减
    pub forbidden_actions: Vec<String>,
    /// "SUCCESS/FAILED/UNCERTAIN: <描述>"，只追加
    pub history: Vec<String>,
}

impl OrchestratorState {
    /// 加入禁止动作（去重，保持插入顺序）
    pub fn forbid(&mut self, entry: impl Into<String>) {
        let entry = entry.into();
        if !self.forbidden_actions.contains(&entry) {
            self.forbidden_actions.push(entry);
        }
    }

    /// 从计划中移除步骤，返回其原位置
    pub fn remove_step(&mut self, id: StepId) -> Option<usize> {
        let pos = self.plan.iter().position(|s| s.id == id)?;
        self.plan.remove(pos);
        Some(pos)
    }

    /// 只记录历史，不影响计数（同轮首个失败之后的其它判定）
    pub fn note_verdict(&mut self, verdict: Verdict, step: &Step) {
        self.history.push(format!("{}: {}", verdict, step.description));
    }

    /// 步骤成功：出计划、记历史；reset_counters 为 false 时不清零（同轮已出现失败）
    pub fn record_success(&mut self, step: &Step, reset_counters: bool) {
        self.remove_step(step.id);
        self.note_verdict(Verdict::Completed, step);
        if reset_counters {
            self.current_fail_count = 0;
            self.uncertain_streak = 0;
        }
    }

    /// 步骤失败：计数 +1，不确定连击中断；连续失败达到 2 次后记录禁止动作
    pub fn record_failure(&mut self, step: &Step) {
        self.current_fail_count += 1;
        self.uncertain_streak = 0;
        self.note_verdict(Verdict::Failed, step);
        if self.current_fail_count >= 2 {
            if let Some(tool) = &step.tool {
                self.forbid(format!("AVOID: {} for '{}'", tool, step.description));
            }
            self.forbid(format!("FAILED APPROACH: {}", step.description));
        }
    }

    /// 步骤结果不确定：计数 +1；同一步骤连续第 2 次不确定时提升为 Failed，返回生效的判定
    pub fn record_uncertain(&mut self, step: &Step) -> Verdict {
        self.current_fail_count += 1;
        self.uncertain_streak += 1;
        self.note_verdict(Verdict::Uncertain, step);
        if self.uncertain_streak >= 2 {
            self.forbid(format!("UNCERTAIN APPROACH: {}", step.description));
            return Verdict::Failed;
        }
        Verdict::Uncertain
    }

    /// 失败步骤被替换或计划被丢弃：不确定连击只针对同一步骤
    pub fn reset_uncertain_streak(&mut self) {
        self.uncertain_streak = 0;
    }

    /// 切换到新的栈顶目标：清空计划与按目标计数；replan_count / step_count 为全局预算不清零
    pub fn reset_for_new_goal(&mut self) {
        self.plan.clear();
        self.current_fail_count = 0;
        self.uncertain_streak = 0;
    }
}

/// 运行上限：全部可按次覆盖
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunLimits {
    pub max_steps: usize,
    pub max_replans: usize,
    pub max_workers: usize,
    pub max_depth: usize,
    pub max_subgoals: usize,
    pub max_retries: u32,
    pub stop_on_error: bool,
}

impl Default for RunLimits {
    fn default() -> Self {
        let goal = GoalLimits::default();
        Self {
            max_steps: 30,
            max_replans: 10,
            max_workers: DEFAULT_MAX_WORKERS,
            max_depth: goal.max_depth,
            max_subgoals: goal.max_subgoals,
            max_retries: goal.max_retries,
            stop_on_error: true,
        }
    }
}

impl RunLimits {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            max_steps: cfg.engine.max_steps,
            max_replans: cfg.engine.max_replans,
            max_workers: cfg.scheduler.max_workers,
            max_depth: cfg.engine.max_depth,
            max_subgoals: cfg.engine.max_subgoals,
            max_retries: cfg.engine.max_retries,
            stop_on_error: cfg.engine.stop_on_error,
        }
    }

    pub fn goal_limits(&self) -> GoalLimits {
        GoalLimits {
            max_depth: self.max_depth,
            max_subgoals: self.max_subgoals,
            max_retries: self.max_retries,
        }
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        let checks = [
            (self.max_steps, "max_steps"),
            (self.max_workers, "max_workers"),
            (self.max_depth, "max_depth"),
            (self.max_subgoals, "max_subgoals"),
            (self.max_retries as usize, "max_retries"),
        ];
        for (value, name) in checks {
            if value == 0 {
                return Err(EngineError::InvalidLimits(format!("{} must be > 0", name)));
            }
        }
        Ok(())
    }
}

/// 终止状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalStatus {
    Success,
    ForcedStop,
    Failure,
}

/// 终止原因
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum TerminationReason {
    GoalAchieved,
    StepLimit(usize),
    ReplanLimit(usize),
    Cancelled,
    /// Planner 无法产出计划，需要调用方介入
    Planning(String),
    /// 已在最大深度仍反复失败
    DepthExhausted(String),
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TerminationReason::GoalAchieved => write!(f, "goal achieved"),
            TerminationReason::StepLimit(n) => write!(f, "step limit reached ({})", n),
            TerminationReason::ReplanLimit(n) => write!(f, "replan limit reached ({})", n),
            TerminationReason::Cancelled => write!(f, "cancelled"),
            TerminationReason::Planning(msg) => write!(f, "planning: {}", msg),
            TerminationReason::DepthExhausted(msg) => write!(f, "depth exhausted: {}", msg),
        }
    }
}

/// run 的最终结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalState {
    pub run_id: Uuid,
    pub status: TerminalStatus,
    pub reason: TerminationReason,
    pub steps: usize,
    pub replans: usize,
    pub goal_stack: GoalStackSnapshot,
    pub state: OrchestratorState,
}

impl TerminalState {
    /// 转为可续跑的快照
    pub fn to_snapshot(&self) -> RunSnapshot {
        RunSnapshot {
            goal_stack: self.goal_stack.clone(),
            state: self.state.clone(),
        }
    }
}

/// 崩溃恢复快照：目标栈 + 运行计数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub goal_stack: GoalStackSnapshot,
    pub state: OrchestratorState,
}
