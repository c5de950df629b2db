//! 调度层类型定义
//!
//! 定义 Step（原子工作单元）、StepResult（执行结果）、依赖图与执行统计。

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 批次内唯一的步骤编号（跨批次不保证唯一）
pub type StepId = u32;

/// 步骤类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// 执行动作
    #[default]
    Execute,
    /// 校验动作
    Verify,
}

/// 原子工作单元：由 Planner 每轮生成，执行完成后丢弃，创建后不再修改
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id: StepId,
    /// 人类可读的意图描述
    pub description: String,
    #[serde(default)]
    pub kind: StepKind,
    /// 工具名（依赖推断使用），无工具时按空字符串处理
    #[serde(default)]
    pub tool: Option<String>,
    /// 工具参数；文件类依赖从 args.path / args.file 读取路径
    #[serde(default)]
    pub args: serde_json::Value,
}

impl Step {
    pub fn new(id: StepId, description: impl Into<String>) -> Self {
        Self {
            id,
            description: description.into(),
            kind: StepKind::Execute,
            tool: None,
            args: serde_json::Value::Null,
        }
    }

    /// 设置工具名
    pub fn with_tool(mut self, tool: impl Into<String>) -> Self {
        self.tool = Some(tool.into());
        self
    }

    /// 设置工具参数
    pub fn with_args(mut self, args: serde_json::Value) -> Self {
        self.args = args;
        self
    }

    /// 设置为校验步骤
    pub fn verify(mut self) -> Self {
        self.kind = StepKind::Verify;
        self
    }

    /// 规范化后的工具名（小写，缺省为空串）
    pub fn tool_name(&self) -> String {
        self.tool.as_deref().unwrap_or_default().to_lowercase()
    }

    /// 参数中的文件路径（path 优先，其次 file）
    pub fn file_path(&self) -> Option<&str> {
        self.args
            .get("path")
            .or_else(|| self.args.get("file"))
            .and_then(|v| v.as_str())
            .filter(|p| !p.is_empty())
    }
}

/// 步骤执行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Completed,
    Failed,
    /// 上游失败导致未执行
    Skipped,
}

/// 单个步骤的执行结果；每轮执行中每个提交的 Step 恰好对应一个
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: StepId,
    pub status: StepStatus,
    /// 执行器返回的不透明载荷
    pub output: serde_json::Value,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,
}

/// 被跳过步骤的统一错误信息
pub const SKIPPED_REASON: &str = "skipped due to previous failure";

impl StepResult {
    pub fn completed(
        step_id: StepId,
        output: serde_json::Value,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    ) -> Self {
        Self {
            step_id,
            status: StepStatus::Completed,
            output,
            error: None,
            started_at: Some(started_at),
            finished_at: Some(finished_at),
            duration_ms: elapsed_ms(started_at, finished_at),
        }
    }

    pub fn failed(
        step_id: StepId,
        error: impl Into<String>,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    ) -> Self {
        Self {
            step_id,
            status: StepStatus::Failed,
            output: serde_json::Value::Null,
            error: Some(error.into()),
            started_at: Some(started_at),
            finished_at: Some(finished_at),
            duration_ms: elapsed_ms(started_at, finished_at),
        }
    }

    pub fn skipped(step_id: StepId) -> Self {
        Self {
            step_id,
            status: StepStatus::Skipped,
            output: serde_json::Value::Null,
            error: Some(SKIPPED_REASON.to_string()),
            started_at: None,
            finished_at: None,
            duration_ms: 0,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.status == StepStatus::Failed
    }
}

fn elapsed_ms(started_at: DateTime<Utc>, finished_at: DateTime<Utc>) -> u64 {
    (finished_at - started_at).num_milliseconds().max(0) as u64
}

/// 依赖图：step -> 它依赖的 steps，以及反向索引
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyGraph {
    pub dependencies: BTreeMap<StepId, BTreeSet<StepId>>,
    pub dependents: BTreeMap<StepId, BTreeSet<StepId>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录 step_id 依赖 depends_on
    pub fn add_dependency(&mut self, step_id: StepId, depends_on: StepId) {
        self.dependencies
            .entry(step_id)
            .or_default()
            .insert(depends_on);
        self.dependents
            .entry(depends_on)
            .or_default()
            .insert(step_id);
    }

    pub fn dependencies_of(&self, step_id: StepId) -> BTreeSet<StepId> {
        self.dependencies.get(&step_id).cloned().unwrap_or_default()
    }

    pub fn dependents_of(&self, step_id: StepId) -> BTreeSet<StepId> {
        self.dependents.get(&step_id).cloned().unwrap_or_default()
    }

    pub fn depends_on(&self, step_id: StepId, other: StepId) -> bool {
        self.dependencies
            .get(&step_id)
            .is_some_and(|deps| deps.contains(&other))
    }

    /// 依赖均已在 finished 中的步骤可执行（无依赖的步骤总是就绪）
    pub fn is_ready(&self, step_id: StepId, finished: &BTreeSet<StepId>) -> bool {
        self.dependencies
            .get(&step_id)
            .map_or(true, |deps| deps.is_subset(finished))
    }
}

/// 一轮执行的统计信息
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExecutionStats {
    pub total_steps: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub avg_duration_ms: f64,
    pub max_duration_ms: u64,
    pub max_workers: usize,
}

impl ExecutionStats {
    pub fn from_results(results: &[StepResult], max_workers: usize) -> Self {
        let count = |status: StepStatus| results.iter().filter(|r| r.status == status).count();
        let durations: Vec<u64> = results
            .iter()
            .filter(|r| r.duration_ms > 0)
            .map(|r| r.duration_ms)
            .collect();
        let avg_duration_ms = if durations.is_empty() {
            0.0
        } else {
            durations.iter().sum::<u64>() as f64 / durations.len() as f64
        };
        Self {
            total_steps: results.len(),
            completed: count(StepStatus::Completed),
            failed: count(StepStatus::Failed),
            skipped: count(StepStatus::Skipped),
            avg_duration_ms,
            max_duration_ms: durations.iter().copied().max().unwrap_or(0),
            max_workers,
        }
    }
}
