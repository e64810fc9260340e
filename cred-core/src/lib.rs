//! Job-credential and bcast-credential object model, signer facade, and
//! replay cache.
//!
//! The cryptographic signer, the byte-level wire encoder, hostlist range
//! parsing, and GRES descriptions are out-of-scope collaborators; this
//! crate defines the seams (`signer::CredentialSigner`,
//! `hostlist::HostListResolver`, `gres::GresExtractor`) a concrete
//! implementation plugs into.

pub mod bcast_cred;
pub mod config;
pub mod error;
pub mod gres;
pub mod hostlist;
pub mod job_cred;
pub mod net_cred;
pub mod runlength;
pub mod signer;

pub use bcast_cred::{BcastCredential, BcastCredentialArgs, BcastFlags, ReplayCache};
pub use config::CredConfig;
pub use error::{CredError, SignerError};
pub use job_cred::{IdentityResolver, JobCredential, JobCredentialArgs, JobCredentialView, NullIdentityResolver};
pub use net_cred::NetworkCredential;
pub use signer::{CredentialSigner, SignedBody, SignerFacade, FACADE};
