//! Error taxonomy for the signer facade, job credential, bcast credential,
//! and network credential.

use thiserror::Error;

/// Errors the provider behind the signer facade can raise.
#[derive(Debug, Error)]
pub enum SignerError {
    #[error("signature verification failed")]
    Invalid,
    #[error("signer provider error: {0}")]
    Provider(String),
}

/// Errors surfaced by `cred-core`'s public operations.
///
/// Contract violations (nil inputs, "nobody" uids, version mismatch,
/// missing init) are `InvalidArgument`/`NotInitialized`. Operational errors
/// (signer rejection, expiry, replay miss) are the remaining typed variants.
#[derive(Debug, Error)]
pub enum CredError {
    #[error("credential signature or state invalid")]
    InvalidCredential,

    #[error("credential expired")]
    CredentialExpired,

    #[error("signer facade not initialized")]
    NotInitialized,

    #[error("signer rejected the sign request")]
    SignFailed,

    #[error("bcast block rejected: not found in replay cache")]
    ReplayRejected,

    #[error("host {0:?} not present in hostlist")]
    HostNotInList(String),

    #[error("host index out of range")]
    IndexOutOfRange,

    #[error("no cores selected for this host")]
    NoCoresSelected,

    #[error("gres data missing for this host")]
    GresMissing,

    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error(transparent)]
    Signer(#[from] SignerError),
}
