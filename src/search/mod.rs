//! Search requests and the orchestrator that runs them

mod config;
mod orchestrator;

pub use config::{
    ExperienceLevel, JobConfig, JobConfigInput, JobType, OutputFormat, ProfileConfig,
    ProfileConfigInput, SearchConfig, SearchKind, SearchRequest, SearchType, ValidationError,
};
pub use orchestrator::SearchOrchestrator;
