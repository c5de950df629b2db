//! 目标栈类型定义
//!
//! Goal 是递归分解树中的节点，id 为路径式编号（"main"、"3"、"3.2"、"3.2.1"）。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type GoalId = String;

/// 根目标 id
pub const ROOT_GOAL_ID: &str = "main";

/// 目标状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalStatus {
    Pending,
    InProgress,
    /// 已拆分为子目标，等待子目标全部完成
    Decomposed,
    Completed,
    Failed,
}

/// 子目标描述（由 Planner 生成）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubgoalSpec {
    pub description: String,
}

impl SubgoalSpec {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
        }
    }
}

/// 递归分解树中的目标节点
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Goal {
    pub id: GoalId,
    pub description: String,
    pub parent_id: Option<GoalId>,
    /// 仅在分解时设置一次，之后只推进 cursor
    #[serde(default)]
    pub subgoals: Vec<SubgoalSpec>,
    #[serde(default)]
    pub cursor: usize,
    pub status: GoalStatus,
    #[serde(default)]
    pub fail_count: u32,
    #[serde(default)]
    pub error_context: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Goal {
    pub fn new(id: impl Into<GoalId>, description: impl Into<String>, parent_id: Option<GoalId>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            parent_id,
            subgoals: Vec::new(),
            cursor: 0,
            status: GoalStatus::InProgress,
            fail_count: 0,
            error_context: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// 第 index 个子目标（从 1 开始）的 id：根目标下为 "index"，否则为 "{id}.{index}"
    pub fn child_id(&self, index: usize) -> GoalId {
        if self.id == ROOT_GOAL_ID {
            index.to_string()
        } else {
            format!("{}.{}", self.id, index)
        }
    }
}

/// 目标级失败后的处理建议
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureDecision {
    Retry,
    Decompose,
    Abort,
}

/// 完成当前目标后的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionOutcome {
    /// 同一父目标下推入了下一个子目标
    NextSubtask,
    /// 至少一个父目标随之完成，并在更高层推入了下一个子目标
    ParentComplete,
    /// 栈已清空，根目标完成
    AllComplete,
}

/// 目标栈参数（可调，默认值见 Default）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoalLimits {
    pub max_depth: usize,
    pub max_subgoals: usize,
    pub max_retries: u32,
}

impl Default for GoalLimits {
    fn default() -> Self {
        Self {
            max_depth: 5,
            max_subgoals: 5,
            max_retries: 3,
        }
    }
}

/// 目标栈快照（崩溃恢复 / 审计用），depth 与 current_goal_id 为冗余字段，恢复时忽略
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalStackSnapshot {
    pub stack: Vec<Goal>,
    pub history: Vec<Goal>,
    #[serde(default)]
    pub depth: usize,
    #[serde(default)]
    pub current_goal_id: String,
}
