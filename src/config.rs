//! 引擎配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `HIVE__*` 覆盖（双下划线表示嵌套，如 `HIVE__ENGINE__MAX_STEPS=50`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub scheduler: SchedulerSection,
}

/// [engine] 段：编排循环的预算上限
#[derive(Debug, Clone, Deserialize)]
pub struct EngineSection {
    /// 单次运行最多执行的步骤数
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    /// 单次运行最多重新规划次数
    #[serde(default = "default_max_replans")]
    pub max_replans: usize,
    /// 目标栈最大深度（main 计 1 层）
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    /// 单次分解最多子目标数
    #[serde(default = "default_max_subgoals")]
    pub max_subgoals: usize,
    /// 目标级失败多少次后分解
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_stop_on_error")]
    pub stop_on_error: bool,
}

fn default_max_steps() -> usize {
    30
}

fn default_max_replans() -> usize {
    10
}

fn default_max_depth() -> usize {
    5
}

fn default_max_subgoals() -> usize {
    5
}

fn default_max_retries() -> u32 {
    3
}

fn default_stop_on_error() -> bool {
    true
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            max_replans: default_max_replans(),
            max_depth: default_max_depth(),
            max_subgoals: default_max_subgoals(),
            max_retries: default_max_retries(),
            stop_on_error: default_stop_on_error(),
        }
    }
}

/// [scheduler] 段：并发度、单步超时与依赖推断规则表
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerSection {
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// 单步执行超时（秒），0 表示不限制
    #[serde(default)]
    pub step_timeout_secs: u64,
    /// 已知有序依赖对 [前, 后]
    #[serde(default = "default_dependent_pairs")]
    pub dependent_pairs: Vec<(String, String)>,
    /// 无副作用的只读工具，两两之间可并行
    #[serde(default = "default_independent_tools")]
    pub independent_tools: Vec<String>,
    #[serde(default = "default_file_tools")]
    pub file_tools: Vec<String>,
    /// file_tools 中会写文件的工具
    #[serde(default = "default_write_tools")]
    pub write_tools: Vec<String>,
    #[serde(default = "default_app_openers")]
    pub app_openers: Vec<String>,
    #[serde(default = "default_app_interactions")]
    pub app_interactions: Vec<String>,
}

fn default_max_workers() -> usize {
    4
}

fn default_dependent_pairs() -> Vec<(String, String)> {
    [
        ("open_app", "click"),
        ("open_app", "type_text"),
        ("browser_open_url", "browser_click_element"),
        ("browser_open_url", "browser_type_text"),
        ("take_screenshot", "vision_analyze"),
        ("write_file", "read_file"),
    ]
    .into_iter()
    .map(|(a, b)| (a.to_string(), b.to_string()))
    .collect()
}

fn default_independent_tools() -> Vec<String> {
    vec![
        "get_clipboard".into(),
        "get_monitors_info".into(),
        "get_open_windows".into(),
        "list_processes".into(),
        "get_system_stats".into(),
    ]
}

fn default_file_tools() -> Vec<String> {
    vec!["read_file".into(), "write_file".into(), "copy_file".into()]
}

fn default_write_tools() -> Vec<String> {
    vec!["write_file".into(), "copy_file".into()]
}

fn default_app_openers() -> Vec<String> {
    vec![
        "open_app".into(),
        "native_open_app".into(),
        "activate_app".into(),
    ]
}

fn default_app_interactions() -> Vec<String> {
    vec![
        "click".into(),
        "type_text".into(),
        "press_key".into(),
        "native_click_ui".into(),
    ]
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            step_timeout_secs: 0,
            dependent_pairs: default_dependent_pairs(),
            independent_tools: default_independent_tools(),
            file_tools: default_file_tools(),
            write_tools: default_write_tools(),
            app_openers: default_app_openers(),
            app_interactions: default_app_interactions(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 HIVE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 HIVE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("HIVE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_limits() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.engine.max_steps, 30);
        assert_eq!(cfg.engine.max_replans, 10);
        assert_eq!(cfg.engine.max_depth, 5);
        assert_eq!(cfg.engine.max_subgoals, 5);
        assert_eq!(cfg.engine.max_retries, 3);
        assert!(cfg.engine.stop_on_error);
        assert_eq!(cfg.scheduler.max_workers, 4);
        assert!(cfg
            .scheduler
            .dependent_pairs
            .contains(&("open_app".to_string(), "click".to_string())));
    }

    #[test]
    fn test_load_explicit_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hive.toml");
        std::fs::write(
            &path,
            "[engine]\nmax_steps = 7\n\n[scheduler]\nmax_workers = 2\nindependent_tools = [\"ls\"]\n",
        )
        .unwrap();

        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.engine.max_steps, 7);
        assert_eq!(cfg.engine.max_replans, 10);
        assert_eq!(cfg.scheduler.max_workers, 2);
        assert_eq!(cfg.scheduler.independent_tools, vec!["ls".to_string()]);
        assert_eq!(cfg.scheduler.file_tools.len(), 3);
    }
}
