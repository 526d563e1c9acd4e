pub mod engine;
pub mod pricing;
pub mod sizing;
pub mod state;

pub use engine::ExecutionHandle;
pub use state::SideExecutionState;
