//! Signer facade: the 7-operation plugin contract a concrete signer (e.g.
//! `cred-signer-ed25519`) must implement, plus the process-wide singleton
//! that binds one provider for the process lifetime.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::SystemTime;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;

use crate::bcast_cred::BcastCredentialArgs;
use crate::error::{CredError, SignerError};
use crate::job_cred::JobCredentialArgs;

/// An encoded body paired with the signature produced or verified over it.
#[derive(Debug, Clone)]
pub struct SignedBody {
    pub body: Vec<u8>,
    pub signature: Vec<u8>,
}

/// The plugin contract a concrete signer backend implements: the seven
/// operations a signer provider must support.
pub trait CredentialSigner: Send + Sync {
    /// Produce an opaque signature over `buf`.
    fn sign(&self, buf: &[u8]) -> Result<Vec<u8>, SignerError>;

    /// Verify `signature` over `buf`.
    fn verify_sign(&self, buf: &[u8], signature: &[u8]) -> Result<(), SignerError>;

    /// Build the encoded body (and, if `sign` is true, a signature) for a
    /// job credential argument bundle.
    fn create(
        &self,
        arg: &JobCredentialArgs,
        sign: bool,
        version: u16,
    ) -> Result<SignedBody, SignerError>;

    /// Decode a transported job-credential buffer into its argument bundle
    /// and signed body. Does not itself verify; callers call `verify_sign`.
    fn unpack(&self, buffer: &[u8], version: u16) -> Result<(JobCredentialArgs, SignedBody), SignerError>;

    /// Build an opaque blob embedding `addrs` and a signature.
    fn create_net_cred(&self, addrs: &[SocketAddr], version: u16) -> Result<Vec<u8>, SignerError>;

    /// Recover the address list from a blob iff its signature is valid.
    fn extract_net_cred(&self, blob: &[u8], version: u16) -> Result<Vec<SocketAddr>, SignerError>;

    /// Decode a transported bcast-credential buffer into its argument
    /// bundle and signature.
    fn sbcast_unpack(
        &self,
        buffer: &[u8],
        version: u16,
    ) -> Result<(BcastCredentialArgs, Vec<u8>), SignerError>;

    /// A stable identifier for the key currently in use, for logging only.
    fn key_id(&self) -> String;

    /// Human-readable provider name, e.g. `"ed25519"`.
    fn name(&self) -> &str;
}

/// Process-wide binding of exactly one [`CredentialSigner`] provider.
///
/// A signer is selected once (matching `cred_type`) and held for the life
/// of the process; swapping providers at runtime is out of scope — a
/// credential signed under one provider cannot be reconstructed under
/// another.
pub struct SignerFacade {
    provider: OnceCell<Arc<dyn CredentialSigner>>,
    restart_time: OnceCell<SystemTime>,
    init_lock: Mutex<()>,
}

impl SignerFacade {
    const fn new() -> Self {
        SignerFacade {
            provider: OnceCell::new(),
            restart_time: OnceCell::new(),
            init_lock: Mutex::new(()),
        }
    }

    /// Bind `provider` as the process-wide signer. Idempotent: a second
    /// call after one has succeeded is a no-op.
    pub fn init(&self, provider: Arc<dyn CredentialSigner>) {
        let _guard = self.init_lock.lock();
        if self.provider.get().is_some() {
            return;
        }
        let _ = self.restart_time.set(SystemTime::now());
        let _ = self.provider.set(provider);
    }

    /// Fetch the bound provider, or `NotInitialized` if `init` was never
    /// called.
    pub fn get(&self) -> Result<Arc<dyn CredentialSigner>, CredError> {
        self.provider
            .get()
            .cloned()
            .ok_or(CredError::NotInitialized)
    }

    /// The wall-clock time this process's signer facade was initialized.
    /// Used as a floor for any credential's observed creation time: a
    /// credential claiming to predate this can't have been signed by the
    /// provider currently bound.
    pub fn restart_time(&self) -> Option<SystemTime> {
        self.restart_time.get().copied()
    }
}

/// The single process-wide facade instance.
pub static FACADE: SignerFacade = SignerFacade::new();

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bcast_cred::BcastCredentialArgs;
    use crate::job_cred::JobCredentialArgs;

    struct NullSigner;

    impl CredentialSigner for NullSigner {
        fn sign(&self, buf: &[u8]) -> Result<Vec<u8>, SignerError> {
            Ok(buf.to_vec())
        }
        fn verify_sign(&self, buf: &[u8], signature: &[u8]) -> Result<(), SignerError> {
            if buf == signature {
                Ok(())
            } else {
                Err(SignerError::Invalid)
            }
        }
        fn create(&self, _arg: &JobCredentialArgs, _sign: bool, _version: u16) -> Result<SignedBody, SignerError> {
            Err(SignerError::Provider("unused in this test".to_string()))
        }
        fn unpack(&self, _buffer: &[u8], _version: u16) -> Result<(JobCredentialArgs, SignedBody), SignerError> {
            Err(SignerError::Provider("unused in this test".to_string()))
        }
        fn create_net_cred(&self, _addrs: &[SocketAddr], _version: u16) -> Result<Vec<u8>, SignerError> {
            Err(SignerError::Provider("unused in this test".to_string()))
        }
        fn extract_net_cred(&self, _blob: &[u8], _version: u16) -> Result<Vec<SocketAddr>, SignerError> {
            Err(SignerError::Provider("unused in this test".to_string()))
        }
        fn sbcast_unpack(&self, _buffer: &[u8], _version: u16) -> Result<(BcastCredentialArgs, Vec<u8>), SignerError> {
            Err(SignerError::Provider("unused in this test".to_string()))
        }
        fn key_id(&self) -> String {
            "null".to_string()
        }
        fn name(&self) -> &str {
            "null"
        }
    }

    #[test]
    fn uninitialized_facade_reports_not_initialized() {
        let facade = SignerFacade::new();
        assert!(matches!(facade.get(), Err(CredError::NotInitialized)));
    }

    #[test]
    fn init_is_idempotent_and_sets_restart_time() {
        let facade = SignerFacade::new();
        facade.init(Arc::new(NullSigner));
        let t1 = facade.restart_time();
        facade.init(Arc::new(NullSigner));
        let t2 = facade.restart_time();
        assert_eq!(t1, t2);
        assert!(facade.get().is_ok());
    }
}
