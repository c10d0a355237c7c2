//! Cross-process coordination primitives shared by every task process of a
//! job step: the anonymous-mmap region with its robust mutex and handshake
//! counters, and namespace/cwd fd capture for namespace reuse.

pub mod error;
pub mod namespace;
pub mod region;

pub use error::{Error, Result};
pub use namespace::{capture_cwd, capture_namespaces, close_best_effort, CapturedNamespaces};
pub use region::SharedRegion;
