//! Network credential: thin wrapper delegating address-list sign/extract
//! to the signer facade.

use std::net::SocketAddr;

use crate::error::CredError;
use crate::signer::FACADE;

pub struct NetworkCredential;

impl NetworkCredential {
    /// Build an opaque blob embedding `addrs` and a signature.
    pub fn make(addrs: &[SocketAddr], version: u16) -> Result<Vec<u8>, CredError> {
        if addrs.is_empty() {
            return Err(CredError::InvalidArgument("addrs must not be empty"));
        }
        let facade = FACADE.get()?;
        facade
            .create_net_cred(addrs, version)
            .map_err(|_| CredError::SignFailed)
    }

    /// Recover the address list from `blob` iff its signature is valid.
    pub fn extract(blob: &[u8], version: u16) -> Result<Vec<SocketAddr>, CredError> {
        if blob.is_empty() {
            return Err(CredError::InvalidArgument("blob must not be empty"));
        }
        let facade = FACADE.get()?;
        facade
            .extract_net_cred(blob, version)
            .map_err(|_| CredError::InvalidCredential)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_addrs_before_calling_facade() {
        let err = NetworkCredential::make(&[], 1).unwrap_err();
        assert!(matches!(err, CredError::InvalidArgument(_)));
    }

    #[test]
    fn rejects_empty_blob_before_calling_facade() {
        let err = NetworkCredential::extract(&[], 1).unwrap_err();
        assert!(matches!(err, CredError::InvalidArgument(_)));
    }
}
