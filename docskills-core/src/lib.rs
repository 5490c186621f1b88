//! docskills library exports

pub mod agents;
pub mod catalog;
pub mod config;
pub mod context;
pub mod error;
pub mod fetch;
pub mod io;
pub mod ops;
pub mod telemetry;

pub use agents::Agent;
pub use config::{ProjectConfig, Settings};
pub use ops::SkillManager;
