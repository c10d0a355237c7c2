//! Data model shared by every other crate in this workspace: the request a
//! user's job step carries, the node's static configuration, facts about
//! the running job, and the orchestrator's view of a container.

pub mod cli;
pub mod container;
pub mod error;
pub mod job_info;
pub mod node_config;
pub mod step_request;
pub mod ternary;

pub use cli::StepRequestBuilder;
pub use container::{Container, ImportMethod};
pub use error::{Error, Result};
pub use job_info::JobInfo;
pub use node_config::{ContainerScope, NodeConfig};
pub use step_request::{ContainerNameRequest, MountEntry, NameMode, StepRequest};
pub use ternary::Ternary;
