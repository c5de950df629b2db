//! 步骤依赖分析
//!
//! 对同一批次内的每个有序对（前 p，后 s）判断 s 是否依赖 p；无法证明独立时默认依赖（正确性优先于并行度）。

use std::collections::HashSet;

use crate::config::SchedulerSection;
use crate::workflow::types::*;

/// 依赖分析器：持有依赖对、独立工具、文件工具与应用工具规则表
#[derive(Debug, Clone)]
pub struct DependencyAnalyzer {
    dependent_pairs: HashSet<(String, String)>,
    independent_tools: HashSet<String>,
    file_tools: HashSet<String>,
    write_tools: HashSet<String>,
    app_openers: HashSet<String>,
    app_interactions: HashSet<String>,
}

impl Default for DependencyAnalyzer {
    fn default() -> Self {
        Self::from_config(&SchedulerSection::default())
    }
}

fn lowered(items: &[String]) -> HashSet<String> {
    items.iter().map(|s| s.to_lowercase()).collect()
}

impl DependencyAnalyzer {
    /// 从 [scheduler] 配置段构建规则表（工具名统一小写）
    pub fn from_config(config: &SchedulerSection) -> Self {
        Self {
            dependent_pairs: config
                .dependent_pairs
                .iter()
                .map(|(a, b)| (a.to_lowercase(), b.to_lowercase()))
                .collect(),
            independent_tools: lowered(&config.independent_tools),
            file_tools: lowered(&config.file_tools),
            write_tools: lowered(&config.write_tools),
            app_openers: lowered(&config.app_openers),
            app_interactions: lowered(&config.app_interactions),
        }
    }

    /// 追加一个已知依赖对
    pub fn with_dependent_pair(mut self, before: &str, after: &str) -> Self {
        self.dependent_pairs
            .insert((before.to_lowercase(), after.to_lowercase()));
        self
    }

    /// 追加一个只读独立工具
    pub fn with_independent_tool(mut self, tool: &str) -> Self {
        self.independent_tools.insert(tool.to_lowercase());
        self
    }

    /// 构建依赖图；纯函数，同一输入顺序结果确定
    pub fn analyze(&self, steps: &[Step]) -> DependencyGraph {
        let mut graph = DependencyGraph::new();
        for (i, step) in steps.iter().enumerate() {
            for prev in &steps[..i] {
                if prev.id != step.id && self.has_dependency(prev, step) {
                    graph.add_dependency(step.id, prev.id);
                }
            }
        }
        graph
    }

    /// 判断后一步 step 是否依赖前一步 prev
    pub fn has_dependency(&self, prev: &Step, step: &Step) -> bool {
        let prev_tool = prev.tool_name();
        let tool = step.tool_name();

        if self
            .dependent_pairs
            .contains(&(prev_tool.clone(), tool.clone()))
        {
            return true;
        }

        if self.independent_tools.contains(&tool) && self.independent_tools.contains(&prev_tool) {
            return false;
        }

        if self.has_file_dependency(prev, &prev_tool, step, &tool) {
            return true;
        }

        if self.app_openers.contains(&prev_tool) && self.app_interactions.contains(&tool) {
            return true;
        }

        // 未被任何规则证明独立
        true
    }

    fn has_file_dependency(&self, prev: &Step, prev_tool: &str, step: &Step, tool: &str) -> bool {
        if !self.file_tools.contains(tool) || !self.file_tools.contains(prev_tool) {
            return false;
        }
        let same_file = matches!(
            (prev.file_path(), step.file_path()),
            (Some(a), Some(b)) if a == b
        );
        same_file && (self.write_tools.contains(tool) || self.write_tools.contains(prev_tool))
    }
}
