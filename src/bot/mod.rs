pub mod agent;
pub mod kelly;
pub mod risk;

pub use agent::AgentLoop;
