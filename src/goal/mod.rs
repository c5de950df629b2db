//! 递归目标分解：Goal 类型与目标栈

pub mod stack;
pub mod types;

pub use stack::GoalStack;
pub use types::*;
