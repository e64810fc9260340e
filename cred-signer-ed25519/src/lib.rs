//! The shipped `CredentialSigner` provider: Ed25519 signatures over
//! JCS-canonicalized argument bundles, wrapped in a small versioned JSON
//! envelope that stands in for the out-of-scope byte-level wire encoder.
//!
//! Canonicalize with an empty signature field, sign over the canonical
//! bytes, then carry the signature alongside the canonical form.

mod canonical;

use std::net::SocketAddr;

use cred_core::bcast_cred::BcastCredentialArgs;
use cred_core::job_cred::JobCredentialArgs;
use cred_core::signer::{CredentialSigner, SignedBody};
use cred_core::SignerError;
use ed25519_dalek::{Signature, Signer as _, SigningKey, Verifier as _, VerifyingKey};
use rand::rngs::OsRng;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

#[derive(Serialize, Deserialize)]
struct Envelope<T> {
    version: u16,
    args: T,
    signature: Vec<u8>,
}

/// An Ed25519-backed signer. Holds one keypair for the process lifetime;
/// rotating keys means constructing a new provider and re-initializing the
/// facade, which happens once at process start, not mid-process.
///
/// `signing_key` is absent on a verify-only instance (a compute node that
/// was only ever handed the verifying key): such an instance can still
/// back the full `CredentialSigner` contract for verification operations,
/// and errors out of `sign`/`create`/`create_net_cred` with `sign: true`.
pub struct Ed25519Signer {
    signing_key: Option<SigningKey>,
    verifying_key: VerifyingKey,
}

impl Ed25519Signer {
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        let verifying_key = signing_key.verifying_key();
        Ed25519Signer { signing_key: Some(signing_key), verifying_key }
    }

    /// Load a signer from a 32-byte secret seed, e.g. one read from an
    /// issuer's configured key file.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(seed);
        let verifying_key = signing_key.verifying_key();
        Ed25519Signer { signing_key: Some(signing_key), verifying_key }
    }

    /// Build a verify-only instance from a 32-byte verifying key, e.g. one
    /// a compute node fetched from the issuer's `/pubkey` endpoint. Never
    /// able to sign.
    pub fn from_verifying_key_bytes(bytes: [u8; 32]) -> Result<Self, SignerError> {
        let verifying_key =
            VerifyingKey::from_bytes(&bytes).map_err(|e| SignerError::Provider(e.to_string()))?;
        Ok(Ed25519Signer { signing_key: None, verifying_key })
    }

    pub fn verifying_key_bytes(&self) -> [u8; 32] {
        self.verifying_key.to_bytes()
    }

    fn sign_bytes(&self, buf: &[u8]) -> Result<Vec<u8>, SignerError> {
        let key = self
            .signing_key
            .as_ref()
            .ok_or_else(|| SignerError::Provider("signer is verify-only: no private key loaded".to_string()))?;
        Ok(key.sign(buf).to_bytes().to_vec())
    }

    fn verify_bytes(&self, buf: &[u8], signature: &[u8]) -> Result<(), SignerError> {
        let sig = Signature::from_slice(signature).map_err(|e| SignerError::Provider(e.to_string()))?;
        self.verifying_key
            .verify(buf, &sig)
            .map_err(|_| SignerError::Invalid)
    }

    fn build_envelope<T: Serialize>(
        &self,
        args: &T,
        sign: bool,
        version: u16,
    ) -> Result<SignedBody, SignerError> {
        let canonical = canonical::canonicalize(args).map_err(|e| SignerError::Provider(e.to_string()))?;
        let signature = if sign { self.sign_bytes(canonical.as_bytes())? } else { Vec::new() };
        let envelope = Envelope { version, args, signature: signature.clone() };
        let body = serde_json::to_vec(&envelope).map_err(|e| SignerError::Provider(e.to_string()))?;
        Ok(SignedBody { body, signature })
    }

    fn open_envelope<T: Serialize + DeserializeOwned>(
        &self,
        buffer: &[u8],
        version: u16,
    ) -> Result<(T, Vec<u8>), SignerError> {
        let envelope: Envelope<T> =
            serde_json::from_slice(buffer).map_err(|e| SignerError::Provider(e.to_string()))?;
        if envelope.version != version {
            return Err(SignerError::Provider(format!(
                "version mismatch: buffer is v{}, expected v{version}",
                envelope.version
            )));
        }
        Ok((envelope.args, envelope.signature))
    }
}

impl CredentialSigner for Ed25519Signer {
    fn sign(&self, buf: &[u8]) -> Result<Vec<u8>, SignerError> {
        self.sign_bytes(buf)
    }

    fn verify_sign(&self, buf: &[u8], signature: &[u8]) -> Result<(), SignerError> {
        self.verify_bytes(buf, signature)
    }

    fn create(&self, arg: &JobCredentialArgs, sign: bool, version: u16) -> Result<SignedBody, SignerError> {
        self.build_envelope(arg, sign, version)
    }

    fn unpack(&self, buffer: &[u8], version: u16) -> Result<(JobCredentialArgs, SignedBody), SignerError> {
        let (args, signature): (JobCredentialArgs, Vec<u8>) = self.open_envelope(buffer, version)?;
        let canonical = canonical::canonicalize(&args).map_err(|e| SignerError::Provider(e.to_string()))?;
        Ok((args, SignedBody { body: canonical.into_bytes(), signature }))
    }

    fn create_net_cred(&self, addrs: &[SocketAddr], version: u16) -> Result<Vec<u8>, SignerError> {
        let addrs = addrs.to_vec();
        Ok(self.build_envelope(&addrs, true, version)?.body)
    }

    fn extract_net_cred(&self, blob: &[u8], version: u16) -> Result<Vec<SocketAddr>, SignerError> {
        let (addrs, signature): (Vec<SocketAddr>, Vec<u8>) = self.open_envelope(blob, version)?;
        let canonical = canonical::canonicalize(&addrs).map_err(|e| SignerError::Provider(e.to_string()))?;
        self.verify_bytes(canonical.as_bytes(), &signature)?;
        Ok(addrs)
    }

    fn sbcast_unpack(
        &self,
        buffer: &[u8],
        version: u16,
    ) -> Result<(BcastCredentialArgs, Vec<u8>), SignerError> {
        self.open_envelope(buffer, version)
    }

    fn key_id(&self) -> String {
        hex_encode(&self.verifying_key.to_bytes())
    }

    fn name(&self) -> &str {
        "ed25519"
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_only_signer_can_verify_but_not_sign() {
        let full = Ed25519Signer::generate();
        let sig = full.sign(b"hello").unwrap();

        let verify_only = Ed25519Signer::from_verifying_key_bytes(full.verifying_key_bytes()).unwrap();
        assert!(verify_only.verify_sign(b"hello", &sig).is_ok());
        assert!(verify_only.sign(b"hello").is_err());
    }

    #[test]
    fn sign_then_verify_round_trips() {
        let signer = Ed25519Signer::generate();
        let sig = signer.sign(b"hello").unwrap();
        assert!(signer.verify_sign(b"hello", &sig).is_ok());
        assert!(signer.verify_sign(b"hellp", &sig).is_err());
    }

    #[test]
    fn net_cred_round_trips() {
        let signer = Ed25519Signer::generate();
        let addrs: Vec<SocketAddr> = vec!["127.0.0.1:8080".parse().unwrap()];
        let blob = signer.create_net_cred(&addrs, 1).unwrap();
        let decoded = signer.extract_net_cred(&blob, 1).unwrap();
        assert_eq!(decoded, addrs);
    }

    #[test]
    fn net_cred_rejects_wrong_version() {
        let signer = Ed25519Signer::generate();
        let addrs: Vec<SocketAddr> = vec!["127.0.0.1:8080".parse().unwrap()];
        let blob = signer.create_net_cred(&addrs, 1).unwrap();
        assert!(signer.extract_net_cred(&blob, 2).is_err());
    }

    #[test]
    fn bcast_credential_round_trips_through_pack_and_unpack() {
        use cred_core::bcast_cred::{self, BcastCredential, BcastCredentialArgs, BcastFlags};
        use cred_core::config::CredConfig;
        use cred_core::job_cred::NullIdentityResolver;
        use cred_core::signer::FACADE;
        use std::time::{Duration, SystemTime};

        FACADE.init(std::sync::Arc::new(Ed25519Signer::generate()));

        let args = BcastCredentialArgs {
            job_id: 7,
            het_job_id: None,
            step_id: 0,
            uid: 1000,
            gid: 1000,
            user_name: None,
            gids: None,
            nodes: "node[1-2]".to_string(),
            created_at_epoch: 0,
            expiry_epoch: 0,
        };
        let expiry = SystemTime::now() + Duration::from_secs(60);
        let config = CredConfig::default();
        let cred = BcastCredential::build(args.clone(), expiry, &config, &NullIdentityResolver).unwrap();

        let wire = cred.pack(1);
        let decoded = BcastCredential::unpack(&wire, 1).unwrap();

        let out = bcast_cred::extract(&decoded, 1, BcastFlags::NONE, SystemTime::now()).unwrap();
        assert_eq!(out.job_id, args.job_id);
        assert_eq!(out.nodes, args.nodes);
    }

    #[test]
    fn tampered_blob_fails_verification() {
        let signer = Ed25519Signer::generate();
        let addrs: Vec<SocketAddr> = vec!["127.0.0.1:8080".parse().unwrap()];
        let blob = signer.create_net_cred(&addrs, 1).unwrap();
        let mut tampered: Envelope<Vec<SocketAddr>> = serde_json::from_slice(&blob).unwrap();
        tampered.args.push("10.0.0.1:9".parse().unwrap());
        let tampered_blob = serde_json::to_vec(&tampered).unwrap();
        assert!(signer.extract_net_cred(&tampered_blob, 1).is_err());
    }
}
