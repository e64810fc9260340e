//! Error taxonomy for the namespace engine.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NsError {
    #[error("base mount preparation failed: {0}")]
    BaseMountFailed(String),

    #[error("namespace-create child failed: {0}")]
    ChildFailed(String),

    #[error("job directory exists but .active is missing for job {0}")]
    NamespaceBroken(u32),

    #[error("namespace subsystem not supported on this platform")]
    NotSupported,

    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("io error on {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Nix(#[from] nix::Error),
}
