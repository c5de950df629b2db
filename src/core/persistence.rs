//! 运行快照持久化
//!
//! 将 RunSnapshot（目标栈 + 运行计数）写入/从 JSON 文件加载，用于崩溃后续跑。

use std::path::{Path, PathBuf};

use crate::core::state::RunSnapshot;

/// 单文件 JSON 快照存储
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 加载快照；文件不存在时返回 None
    pub fn load(&self) -> anyhow::Result<Option<RunSnapshot>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let data = std::fs::read_to_string(&self.path)?;
        Ok(Some(serde_json::from_str(&data)?))
    }

    /// 写入快照；父目录不存在时自动创建
    pub fn save(&self, snapshot: &RunSnapshot) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(snapshot)?)?;
        tracing::debug!("Snapshot saved to {}", self.path.display());
        Ok(())
    }

    /// 删除快照（运行正常结束后调用）
    pub fn clear(&self) -> anyhow::Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}
