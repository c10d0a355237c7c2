//! Subprocess plumbing for talking to the `enroot` runtime helper and its
//! optional external importer: fork/exec, environment sanitisation,
//! config-script emission, and container-listing parsing.

pub mod client;
pub mod config_emitter;
pub mod env;
pub mod error;
pub mod helper;
pub mod importer;
pub mod registry;

pub use error::{Error, Result};
