//! 递归目标栈
//!
//! 目标以栈（LIFO）方式处理：同一层连续失败达到阈值后拆分为子目标，子目标深度优先推进，
//! 全部完成后回到父目标。子目标按需逐个入栈，完成逻辑用显式循环而不是递归。

use chrono::Utc;

use crate::goal::types::*;

/// 目标栈：stack 顶为当前活动目标，history 为已出栈目标的只追加日志
#[derive(Debug, Clone)]
pub struct GoalStack {
    stack: Vec<Goal>,
    history: Vec<Goal>,
    limits: GoalLimits,
    /// history 保留条数上限，None 为不限
    history_limit: Option<usize>,
}

impl Default for GoalStack {
    fn default() -> Self {
        Self::new(GoalLimits::default())
    }
}

impl GoalStack {
    pub fn new(limits: GoalLimits) -> Self {
        Self {
            stack: Vec::new(),
            history: Vec::new(),
            limits,
            history_limit: None,
        }
    }

    /// 以根目标 "main" 初始化
    pub fn with_root(description: impl Into<String>, limits: GoalLimits) -> Self {
        let mut stack = Self::new(limits);
        stack.push_goal(ROOT_GOAL_ID, description, None);
        stack
    }

    /// 限制 history 条数（超出时丢弃最早的记录）
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = Some(limit);
        self
    }

    pub fn limits(&self) -> GoalLimits {
        self.limits
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    pub fn current_goal(&self) -> Option<&Goal> {
        self.stack.last()
    }

    /// 当前目标 id，栈空时为 "none"
    pub fn current_goal_id(&self) -> String {
        self.current_goal()
            .map(|g| g.id.clone())
            .unwrap_or_else(|| "none".to_string())
    }

    pub fn goals(&self) -> &[Goal] {
        &self.stack
    }

    pub fn history(&self) -> &[Goal] {
        &self.history
    }

    /// 目标路径，如 "main > 3 > 3.2"
    pub fn goal_path(&self) -> String {
        self.stack
            .iter()
            .map(|g| g.id.as_str())
            .collect::<Vec<_>>()
            .join(" > ")
    }

    pub fn push_goal(
        &mut self,
        id: impl Into<GoalId>,
        description: impl Into<String>,
        parent_id: Option<GoalId>,
    ) -> &Goal {
        self.stack.push(Goal::new(id, description, parent_id));
        &self.stack[self.stack.len() - 1]
    }

    /// 弹出当前目标（标记完成并写入 history）
    pub fn pop_goal(&mut self) -> Option<Goal> {
        let mut goal = self.stack.pop()?;
        goal.status = GoalStatus::Completed;
        goal.completed_at = Some(Utc::now());
        self.history.push(goal.clone());
        if let Some(limit) = self.history_limit {
            let overflow = self.history.len().saturating_sub(limit);
            self.history.drain(..overflow);
        }
        Some(goal)
    }

    /// 当前目标失败一次：未达重试上限返回 Retry，达到后可分解则 Decompose，已到最大深度则 Abort
    pub fn handle_failure(&mut self, error_context: &str) -> FailureDecision {
        let depth = self.depth();
        let Some(goal) = self.stack.last_mut() else {
            return FailureDecision::Abort;
        };
        goal.fail_count += 1;
        goal.error_context = Some(error_context.to_string());

        if goal.fail_count < self.limits.max_retries {
            return FailureDecision::Retry;
        }
        if depth >= self.limits.max_depth {
            return FailureDecision::Abort;
        }
        FailureDecision::Decompose
    }

    /// 将当前目标拆分为子目标，只推入第一个；到达深度上限或子目标为空时返回 false
    pub fn decompose(&mut self, subgoals: Vec<SubgoalSpec>, error_context: &str) -> bool {
        if self.depth() >= self.limits.max_depth {
            return false;
        }
        let max_subgoals = self.limits.max_subgoals;
        let Some(current) = self.stack.last_mut() else {
            return false;
        };
        if subgoals.is_empty() {
            return false;
        }

        let mut subgoals = subgoals;
        subgoals.truncate(max_subgoals);
        current.subgoals = subgoals;
        current.cursor = 0;
        current.status = GoalStatus::Decomposed;
        current.error_context = Some(error_context.to_string());

        let child_id = current.child_id(1);
        let description = current.subgoals[0].description.clone();
        let parent_id = current.id.clone();
        self.push_goal(child_id, description, Some(parent_id));
        true
    }

    /// 完成当前目标并推进：父目标还有子目标则推入下一个，否则父目标随之完成，直到栈空
    ///
    /// 栈为空时返回 None；只应在真实完成事件发生时调用。
    pub fn complete_current_subtask(&mut self) -> Option<CompletionOutcome> {
        if self.stack.is_empty() {
            return None;
        }

        let mut cascaded = false;
        loop {
            self.pop_goal();
            let Some(parent) = self.stack.last_mut() else {
                return Some(CompletionOutcome::AllComplete);
            };

            parent.cursor += 1;
            if parent.cursor < parent.subgoals.len() {
                let child_id = parent.child_id(parent.cursor + 1);
                let description = parent.subgoals[parent.cursor].description.clone();
                let parent_id = parent.id.clone();
                self.push_goal(child_id, description, Some(parent_id));
                return Some(if cascaded {
                    CompletionOutcome::ParentComplete
                } else {
                    CompletionOutcome::NextSubtask
                });
            }
            cascaded = true;
        }
    }

    /// 将当前目标标记为失败（终止时留档）
    pub fn mark_current_failed(&mut self, error_context: &str) {
        if let Some(goal) = self.stack.last_mut() {
            goal.status = GoalStatus::Failed;
            goal.error_context = Some(error_context.to_string());
        }
    }

    /// 人类可读的状态摘要
    pub fn status_summary(&self) -> String {
        let Some(goal) = self.current_goal() else {
            return "All goals completed".to_string();
        };
        let mut lines = vec![
            format!("Goal path: {}", self.goal_path()),
            format!("Depth: {}/{}", self.depth(), self.limits.max_depth),
            format!("Current goal [{}]: {}", goal.id, goal.description),
        ];
        if goal.fail_count > 0 {
            lines.push(format!(
                "  Attempts: {}/{}",
                goal.fail_count, self.limits.max_retries
            ));
        }
        if !goal.subgoals.is_empty() {
            lines.push(format!(
                "  Subgoals: {}/{}",
                goal.cursor + 1,
                goal.subgoals.len()
            ));
        }
        lines.join("\n")
    }

    pub fn snapshot(&self) -> GoalStackSnapshot {
        GoalStackSnapshot {
            stack: self.stack.clone(),
            history: self.history.clone(),
            depth: self.depth(),
            current_goal_id: self.current_goal_id(),
        }
    }

    pub fn from_snapshot(snapshot: GoalStackSnapshot, limits: GoalLimits) -> Self {
        Self {
            stack: snapshot.stack,
            history: snapshot.history,
            limits,
            history_limit: None,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.snapshot())
    }

    pub fn from_json(json: &str, limits: GoalLimits) -> Result<Self, serde_json::Error> {
        let snapshot: GoalStackSnapshot = serde_json::from_str(json)?;
        Ok(Self::from_snapshot(snapshot, limits))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn specs(descs: &[&str]) -> Vec<SubgoalSpec> {
        descs.iter().map(|d| SubgoalSpec::new(*d)).collect()
    }

    fn ids(stack: &GoalStack) -> Vec<String> {
        stack.goals().iter().map(|g| g.id.clone()).collect()
    }

    #[test]
    fn test_root_completion() {
        let mut stack = GoalStack::with_root("open the editor", GoalLimits::default());
        assert_eq!(stack.depth(), 1);
        assert_eq!(stack.current_goal_id(), "main");

        assert_eq!(
            stack.complete_current_subtask(),
            Some(CompletionOutcome::AllComplete)
        );
        assert!(stack.is_empty());
        assert_eq!(stack.current_goal_id(), "none");
        assert_eq!(stack.history()[0].status, GoalStatus::Completed);
        assert!(stack.history()[0].completed_at.is_some());
        assert_eq!(stack.complete_current_subtask(), None);
    }

    #[test]
    fn test_failure_then_decompose_then_complete() {
        let mut stack = GoalStack::with_root("search video", GoalLimits::default());
        assert_eq!(stack.handle_failure("e1"), FailureDecision::Retry);
        assert_eq!(stack.handle_failure("e2"), FailureDecision::Retry);
        assert_eq!(stack.handle_failure("e3"), FailureDecision::Decompose);

        assert!(stack.decompose(specs(&["A", "B"]), "too complex"));
        assert_eq!(ids(&stack), vec!["main", "1"]);
        assert_eq!(stack.goals()[0].status, GoalStatus::Decomposed);
        assert_eq!(stack.goals()[0].error_context.as_deref(), Some("too complex"));

        assert_eq!(
            stack.complete_current_subtask(),
            Some(CompletionOutcome::NextSubtask)
        );
        assert_eq!(ids(&stack), vec!["main", "2"]);
        assert_eq!(stack.current_goal().unwrap().description, "B");

        assert_eq!(
            stack.complete_current_subtask(),
            Some(CompletionOutcome::AllComplete)
        );
        assert!(stack.is_empty());
        assert_eq!(stack.history().len(), 3);
    }

    #[test]
    fn test_nested_ids_and_parent_cascade() {
        let mut stack = GoalStack::with_root("main goal", GoalLimits::default());
        assert!(stack.decompose(specs(&["one", "two", "three"]), ""));
        stack.complete_current_subtask();
        stack.complete_current_subtask();
        assert_eq!(stack.current_goal_id(), "3");

        assert!(stack.decompose(specs(&["3a", "3b"]), "search failed"));
        assert_eq!(stack.current_goal_id(), "3.1");
        assert!(stack.decompose(specs(&["3a-x"]), "still failing"));
        assert_eq!(stack.current_goal_id(), "3.1.1");
        assert_eq!(stack.goal_path(), "main > 3 > 3.1 > 3.1.1");

        // 3.1.1 完成带动 3.1 完成，随后推入 3.2
        assert_eq!(
            stack.complete_current_subtask(),
            Some(CompletionOutcome::ParentComplete)
        );
        assert_eq!(ids(&stack), vec!["main", "3", "3.2"]);

        assert_eq!(
            stack.complete_current_subtask(),
            Some(CompletionOutcome::AllComplete)
        );
    }

    #[test]
    fn test_depth_bound() {
        let limits = GoalLimits {
            max_depth: 3,
            max_subgoals: 5,
            max_retries: 1,
        };
        let mut stack = GoalStack::with_root("deep", limits);
        for _ in 0..10 {
            match stack.handle_failure("boom") {
                FailureDecision::Decompose => {
                    assert!(stack.decompose(specs(&["child"]), "boom"));
                }
                FailureDecision::Abort => break,
                FailureDecision::Retry => {}
            }
            assert!(stack.depth() <= limits.max_depth);
        }
        assert_eq!(stack.depth(), 3);
        assert!(!stack.decompose(specs(&["too deep"]), "boom"));
        assert_eq!(stack.handle_failure("boom"), FailureDecision::Abort);
    }

    #[test]
    fn test_decompose_rejects_empty_and_truncates() {
        let limits = GoalLimits {
            max_subgoals: 2,
            ..GoalLimits::default()
        };
        let mut stack = GoalStack::with_root("goal", limits);
        assert!(!stack.decompose(Vec::new(), "nothing"));
        assert_eq!(stack.depth(), 1);

        assert!(stack.decompose(specs(&["a", "b", "c", "d"]), ""));
        assert_eq!(stack.goals()[0].subgoals.len(), 2);
    }

    #[test]
    fn test_history_limit() {
        let mut stack = GoalStack::with_root("goal", GoalLimits::default()).with_history_limit(2);
        stack.decompose(specs(&["a", "b", "c"]), "");
        while stack.complete_current_subtask() != Some(CompletionOutcome::AllComplete) {}
        assert_eq!(stack.history().len(), 2);
        assert_eq!(stack.history()[1].id, "main");
    }

    #[test]
    fn test_snapshot_round_trip() {
        let mut stack = GoalStack::with_root("round trip", GoalLimits::default());
        stack.handle_failure("first");
        stack.decompose(specs(&["a", "b"]), "split");
        stack.complete_current_subtask();

        let json = stack.to_json().unwrap();
        let restored = GoalStack::from_json(&json, GoalLimits::default()).unwrap();

        assert_eq!(restored.depth(), stack.depth());
        assert_eq!(restored.current_goal_id(), stack.current_goal_id());
        assert_eq!(
            restored.current_goal().unwrap().description,
            stack.current_goal().unwrap().description
        );
        assert_eq!(restored.snapshot(), stack.snapshot());
    }

    #[test]
    fn test_status_summary_mentions_path() {
        let mut stack = GoalStack::with_root("summary", GoalLimits::default());
        stack.handle_failure("oops");
        let summary = stack.status_summary();
        assert!(summary.contains("Goal path: main"));
        assert!(summary.contains("Attempts: 1/3"));
    }
}
