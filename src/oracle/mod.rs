//! Oracle 层：Planner / Executor / Verifier 抽象与 Mock 实现

pub mod mock;
pub mod traits;

pub use mock::{EchoExecutor, FixedVerifier, OutcomeVerifier, SplitPlanner};
pub use traits::{Executor, Planner, Verdict, Verifier};
