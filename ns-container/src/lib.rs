//! Per-job mount-namespace isolation: base preparation, creation via a
//! fork/semaphore handshake, join/join-external, and deletion.
//!
//! Linux-only by design: mount namespaces are a Linux kernel feature with
//! no portable equivalent, so this crate refuses to build anywhere else
//! rather than compiling a silently-inert stub.

#[cfg(not(target_os = "linux"))]
compile_error!("ns-container only builds on Linux: mount namespaces are a Linux-only kernel feature");

pub mod cleanup;
pub mod config;
pub mod engine;
pub mod error;
pub mod paths;
mod sem;

pub use config::NamespaceConfig;
pub use error::NsError;
pub use paths::JobPaths;
