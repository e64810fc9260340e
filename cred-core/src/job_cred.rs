//! Job credential: data model, creation, verification, per-node projection,
//! transport, and the reader-writer concurrency contract.

use std::time::{Duration, SystemTime};

use parking_lot::{RwLock, RwLockReadGuard};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{CredConfig, DEFAULT_EXPIRATION_WINDOW, MIN_EXPIRATION_WINDOW};
use crate::error::CredError;
use crate::gres::{ArrayIndexedGres, GresExtractor};
use crate::hostlist::{HostListResolver, SimpleHostList};
use crate::runlength::{core_window, format_core_range};
use crate::signer::FACADE;

/// Sentinel uid/gid meaning "no real principal"; credentials naming it are
/// rejected outright.
pub const NOBODY: u32 = 0xFFFE;

/// Sentinel step id identifying a job's batch script step.
pub const BATCH_SCRIPT: u32 = 0xFFFF_FFFE;

/// Resolves supplementary identity (user name, group list) for a uid/gid
/// pair when `enable_nss`/`send_gids` asks for it and the caller didn't
/// already provide one. The out-of-scope collaborator is the process's
/// NSS/group-cache lookup; this trait is the seam.
pub trait IdentityResolver: Send + Sync {
    fn resolve(&self, uid: u32, gid: u32) -> Option<ResolvedIdentity>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResolvedIdentity {
    pub user_name: String,
    pub gids: Vec<u32>,
}

/// An identity resolver that never synthesizes anything; used when the
/// caller already supplies `user_name`/`gids` on the argument bundle.
pub struct NullIdentityResolver;

impl IdentityResolver for NullIdentityResolver {
    fn resolve(&self, _uid: u32, _gid: u32) -> Option<ResolvedIdentity> {
        None
    }
}

/// Per-host memory allocation table in run-length form: `counts[i]` applies
/// to `rep[i]` consecutive hosts.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemRunLength {
    pub counts: Vec<u64>,
    pub rep: Vec<u32>,
}

impl MemRunLength {
    /// Value applying to run-length index `idx`, or `None` if out of range
    /// or zero/absent (the "fall back to job limit" trigger).
    pub fn at(&self, idx: usize) -> Option<u64> {
        match self.counts.get(idx) {
            Some(&0) | None => None,
            Some(&v) => Some(v),
        }
    }
}

/// The full argument bundle behind a job credential. Passthrough metadata
/// fields (account/alias list/comment/...) carry no behavior in this
/// subsystem; they exist so round-tripping a bundle doesn't silently drop
/// data a real scheduler attached.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobCredentialArgs {
    pub job_id: u32,
    pub step_id: u32,
    pub het_job_id: Option<u32>,

    pub uid: u32,
    pub gid: u32,
    pub user_name: Option<String>,
    pub gids: Option<Vec<u32>>,

    pub job_nhosts: u32,
    pub job_hostlist: String,
    pub step_hostlist: String,

    pub sockets_per_node: Vec<u32>,
    pub cores_per_socket: Vec<u32>,
    pub sock_core_rep_count: Vec<u32>,
    #[serde(skip)]
    pub core_array_size: u32,

    pub job_core_bitmap: Vec<bool>,
    pub step_core_bitmap: Vec<bool>,

    pub job_mem_alloc: MemRunLength,
    pub step_mem_alloc: MemRunLength,

    pub job_gres: Value,
    pub step_gres: Value,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_account: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub job_alias_list: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_comment: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub job_constraints: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub job_licenses: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_partition: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_reservation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_std_in: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_std_out: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_std_err: Option<String>,
}

struct JobCredentialInner {
    args: JobCredentialArgs,
    body: Vec<u8>,
    signature: Vec<u8>,
    verified: bool,
    created_at: SystemTime,
    expiry_window: Duration,
    buf_version: u16,
}

/// A signed, immutable-after-signing job-launch credential.
///
/// `magic` is checked on verification and flipped to a distinct sentinel
/// on drop; Rust's ownership already rules out use-after-free, but the
/// tag still catches a double-drop or a stray transmute in debug builds.
pub struct JobCredential {
    inner: RwLock<JobCredentialInner>,
    magic: u32,
}

const MAGIC: u32 = 0x4352_4544; // "CRED"
const MAGIC_DEAD: u32 = 0xDEAD_0000;

/// A scoped read view into a verified credential's argument bundle.
/// Dropping it releases the read lock; callers never release anything
/// by hand.
pub struct JobCredentialView<'a> {
    guard: RwLockReadGuard<'a, JobCredentialInner>,
}

impl<'a> JobCredentialView<'a> {
    pub fn args(&self) -> &JobCredentialArgs {
        &self.guard.args
    }

    pub fn verified(&self) -> bool {
        self.guard.verified
    }

    pub fn signature(&self) -> &[u8] {
        &self.guard.signature
    }
}

impl JobCredential {
    /// Build and, if `sign` is true, sign a new credential from `args`.
    ///
    /// Rejects `uid`/`gid == NOBODY` before any signer call, computes
    /// `core_array_size` with a run-sum-then-advance loop, optionally
    /// resolves identity, then delegates body construction to the signer
    /// facade's `create` operation.
    pub fn build(
        mut args: JobCredentialArgs,
        config: &CredConfig,
        identity: &dyn IdentityResolver,
        sign: bool,
        version: u16,
    ) -> Result<Self, CredError> {
        if args.uid == NOBODY {
            return Err(CredError::InvalidArgument("uid is the nobody sentinel"));
        }
        if args.gid == NOBODY {
            return Err(CredError::InvalidArgument("gid is the nobody sentinel"));
        }

        args.core_array_size = compute_core_array_size(&args.sock_core_rep_count, args.job_nhosts);

        let synthesized = if args.user_name.is_none() && (config.enable_nss || config.send_gids) {
            identity.resolve(args.uid, args.gid)
        } else {
            None
        };
        if let Some(id) = &synthesized {
            args.user_name = Some(id.user_name.clone());
            args.gids = Some(id.gids.clone());
        }

        let facade = FACADE.get()?;
        let signed = facade
            .create(&args, sign, version)
            .map_err(|_| CredError::SignFailed)?;

        // Synthesized identity is scratch for the signer call only; it is
        // not part of the durable argument bundle.
        if synthesized.is_some() {
            args.user_name = None;
            args.gids = None;
        }

        let window = clamp_window(config.expire_window_secs());

        Ok(JobCredential {
            inner: RwLock::new(JobCredentialInner {
                args,
                body: signed.body,
                signature: signed.signature,
                verified: sign,
                created_at: SystemTime::now(),
                expiry_window: Duration::from_secs(window),
                buf_version: version,
            }),
            magic: MAGIC,
        })
    }

    /// Verify at the current wall-clock time; see [`Self::verify_at`].
    pub fn verify(&self) -> Result<JobCredentialView<'_>, CredError> {
        self.verify_at(SystemTime::now())
    }

    /// Require `verified == true`, `created_at` no earlier than
    /// [`Self::restart_floor`], and `now` within `[creation, creation +
    /// window]`; returns a scoped read view on success.
    pub fn verify_at(&self, now: SystemTime) -> Result<JobCredentialView<'_>, CredError> {
        debug_assert_eq!(self.magic, MAGIC, "use of destroyed JobCredential");
        let guard = self.inner.read();
        if !guard.verified {
            return Err(CredError::InvalidCredential);
        }
        if let Some(floor) = Self::restart_floor() {
            if guard.created_at < floor {
                return Err(CredError::InvalidCredential);
            }
        }
        let expiry = guard.created_at + guard.expiry_window;
        if now > expiry {
            return Err(CredError::CredentialExpired);
        }
        Ok(JobCredentialView { guard })
    }

    /// The earliest `created_at` a credential may claim: the signer
    /// facade's restart time, or `None` if the facade was never
    /// initialized. A credential claiming to predate a process restart
    /// could not have been signed by the provider currently bound, since a
    /// restart means a provider was (re)selected after that point.
    pub fn restart_floor() -> Option<SystemTime> {
        FACADE.restart_time()
    }

    /// Compressed-list core allocations for `host` in the job and step
    /// bitmaps, per `format_core_allocs`.
    pub fn core_format_for_host(&self, host: &str) -> Result<(String, String), CredError> {
        let guard = self.inner.read();
        let args = &guard.args;
        let hostlist = SimpleHostList::from_csv(&args.job_hostlist);
        let host_index = hostlist
            .find(host)
            .ok_or_else(|| CredError::HostNotInList(host.to_string()))?;

        let (first, last) = core_window(
            &args.sockets_per_node,
            &args.cores_per_socket,
            &args.sock_core_rep_count,
            host_index,
        )?;

        let job = format_core_range(&args.job_core_bitmap, first, last);
        let step = format_core_range(&args.step_core_bitmap, first, last);
        if job.is_empty() && step.is_empty() {
            tracing::warn!(%host, "no cores selected for host");
        }
        Ok((job, step))
    }

    /// Job and step memory allocation, in MB, for `host`.
    ///
    /// Batch steps always use run-index 0 regardless of node name. Otherwise
    /// the step limit, if present and non-zero, wins; else the job limit.
    pub fn mem_alloc_for_host(&self, host: &str) -> Result<(u64, u64), CredError> {
        let guard = self.inner.read();
        let args = &guard.args;

        let job_idx = if args.step_id == BATCH_SCRIPT {
            0
        } else {
            SimpleHostList::from_csv(&args.job_hostlist)
                .find(host)
                .ok_or_else(|| CredError::HostNotInList(host.to_string()))? as usize
                - 1
        };
        let job_mem = args.job_mem_alloc.at(job_idx).unwrap_or(0);

        let step_mem = if args.step_id == BATCH_SCRIPT {
            args.step_mem_alloc.at(0).unwrap_or(job_mem)
        } else {
            let step_idx = SimpleHostList::from_csv(&args.step_hostlist).find(host);
            match step_idx {
                Some(idx) => args.step_mem_alloc.at(idx as usize - 1).unwrap_or(job_mem),
                None => job_mem,
            }
        };

        Ok((job_mem, step_mem))
    }

    /// Job and step GRES projections for `host_index` (0-origin), via the
    /// default array-indexed extractor.
    pub fn gres_for_host(&self, host_index: usize) -> Result<(Value, Value), CredError> {
        self.gres_for_host_with(&ArrayIndexedGres, host_index)
    }

    pub fn gres_for_host_with(
        &self,
        extractor: &dyn GresExtractor,
        host_index: usize,
    ) -> Result<(Value, Value), CredError> {
        let guard = self.inner.read();
        let job = extractor.extract_job(&guard.args.job_gres, host_index)?;
        let step = extractor.extract_step(&guard.args.step_gres, host_index)?;
        Ok((job, step))
    }

    /// Write the stored encoded body, asserting `version` matches the
    /// version this credential was built with. A mismatch is fatal: the
    /// scheduler must re-encode, never re-frame.
    pub fn pack(&self, version: u16) -> Result<Vec<u8>, CredError> {
        let guard = self.inner.read();
        if guard.buf_version != version {
            return Err(CredError::InvalidArgument(
                "pack version does not match the version this credential was built with",
            ));
        }
        Ok(guard.body.clone())
    }

    /// Decode and verify a transported credential, delegating body parsing
    /// to the signer facade's `unpack` operation.
    pub fn unpack(
        buffer: &[u8],
        version: u16,
        config: &CredConfig,
    ) -> Result<Self, CredError> {
        let facade = FACADE.get()?;
        let (mut args, signed) = facade.unpack(buffer, version).map_err(|_| CredError::InvalidCredential)?;
        args.core_array_size = compute_core_array_size(&args.sock_core_rep_count, args.job_nhosts);

        let verified = facade.verify_sign(&signed.body, &signed.signature).is_ok();
        let window = clamp_window(config.expire_window_secs());

        Ok(JobCredential {
            inner: RwLock::new(JobCredentialInner {
                args,
                body: signed.body,
                signature: signed.signature,
                verified,
                created_at: SystemTime::now(),
                expiry_window: Duration::from_secs(window),
                buf_version: version,
            }),
            magic: MAGIC,
        })
    }
}

impl Drop for JobCredential {
    fn drop(&mut self) {
        debug_assert_eq!(self.magic, MAGIC, "JobCredential dropped twice or corrupted");
        self.magic = MAGIC_DEAD;
    }
}

/// Sum `sock_core_rep_count` until the running total reaches `job_nhosts`,
/// then advance by one more: the number of run entries actually consumed.
fn compute_core_array_size(sock_core_rep_count: &[u32], job_nhosts: u32) -> u32 {
    let mut sum = 0u32;
    let mut i = 0usize;
    if !sock_core_rep_count.is_empty() {
        while i < job_nhosts as usize && i < sock_core_rep_count.len() {
            sum += sock_core_rep_count[i];
            if sum >= job_nhosts {
                break;
            }
            i += 1;
        }
        i += 1;
    }
    i as u32
}

fn clamp_window(secs: u64) -> u64 {
    if secs < MIN_EXPIRATION_WINDOW {
        DEFAULT_EXPIRATION_WINDOW
    } else {
        secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SignerError;
    use crate::signer::{CredentialSigner, SignedBody};
    use std::net::SocketAddr;
    use std::sync::Arc;

    #[derive(Serialize, Deserialize)]
    struct TestEnvelope {
        version: u16,
        args: JobCredentialArgs,
        signature: Vec<u8>,
    }

    /// A `CredentialSigner` whose "signature" is just an echo of the
    /// canonical bytes it was asked to sign, enough to exercise the
    /// facade/credential plumbing without pulling in real cryptography.
    struct TestSigner;

    impl CredentialSigner for TestSigner {
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

        fn create(&self, arg: &JobCredentialArgs, sign: bool, version: u16) -> Result<SignedBody, SignerError> {
            let canonical =
                serde_json::to_vec(arg).map_err(|e| SignerError::Provider(e.to_string()))?;
            let signature = if sign { self.sign(&canonical)? } else { Vec::new() };
            let envelope = TestEnvelope { version, args: arg.clone(), signature: signature.clone() };
            let body = serde_json::to_vec(&envelope).map_err(|e| SignerError::Provider(e.to_string()))?;
            Ok(SignedBody { body, signature })
        }

        fn unpack(&self, buffer: &[u8], version: u16) -> Result<(JobCredentialArgs, SignedBody), SignerError> {
            let envelope: TestEnvelope =
                serde_json::from_slice(buffer).map_err(|e| SignerError::Provider(e.to_string()))?;
            if envelope.version != version {
                return Err(SignerError::Provider("version mismatch".to_string()));
            }
            let canonical =
                serde_json::to_vec(&envelope.args).map_err(|e| SignerError::Provider(e.to_string()))?;
            Ok((envelope.args, SignedBody { body: canonical, signature: envelope.signature }))
        }

        fn create_net_cred(&self, _addrs: &[SocketAddr], _version: u16) -> Result<Vec<u8>, SignerError> {
            Err(SignerError::Provider("unused in this test".to_string()))
        }

        fn extract_net_cred(&self, _blob: &[u8], _version: u16) -> Result<Vec<SocketAddr>, SignerError> {
            Err(SignerError::Provider("unused in this test".to_string()))
        }

        fn sbcast_unpack(
            &self,
            _buffer: &[u8],
            _version: u16,
        ) -> Result<(crate::bcast_cred::BcastCredentialArgs, Vec<u8>), SignerError> {
            Err(SignerError::Provider("unused in this test".to_string()))
        }

        fn key_id(&self) -> String {
            "test".to_string()
        }

        fn name(&self) -> &str {
            "test"
        }
    }

    fn install_test_signer() {
        FACADE.init(Arc::new(TestSigner));
    }

    fn sample_args() -> JobCredentialArgs {
        JobCredentialArgs {
            job_id: 42,
            step_id: 0,
            het_job_id: None,
            uid: 1000,
            gid: 1000,
            user_name: None,
            gids: None,
            job_nhosts: 2,
            job_hostlist: "node[0-1]".to_string(),
            step_hostlist: "node[0-1]".to_string(),
            sockets_per_node: vec![1, 1],
            cores_per_socket: vec![4, 4],
            sock_core_rep_count: vec![2],
            core_array_size: 0,
            job_core_bitmap: vec![true; 8],
            step_core_bitmap: vec![true; 8],
            job_mem_alloc: MemRunLength::default(),
            step_mem_alloc: MemRunLength::default(),
            job_gres: Value::Null,
            step_gres: Value::Null,
            job_account: None,
            job_alias_list: Vec::new(),
            job_comment: None,
            job_constraints: Vec::new(),
            job_licenses: Vec::new(),
            job_partition: None,
            job_reservation: None,
            job_std_in: None,
            job_std_out: None,
            job_std_err: None,
        }
    }

    #[test]
    fn round_trips_through_pack_and_unpack() {
        install_test_signer();
        let config = CredConfig::default();
        let cred = JobCredential::build(sample_args(), &config, &NullIdentityResolver, true, 1).unwrap();

        let wire = cred.pack(1).unwrap();
        let decoded = JobCredential::unpack(&wire, 1, &config).unwrap();
        let view = decoded.verify().unwrap();

        let expected_core_array_size =
            compute_core_array_size(&sample_args().sock_core_rep_count, sample_args().job_nhosts);

        assert_eq!(view.args().job_id, sample_args().job_id);
        assert_eq!(view.args().job_hostlist, sample_args().job_hostlist);
        assert_eq!(view.args().core_array_size, expected_core_array_size);
        assert!(view.verified());
    }

    #[test]
    fn expiry_is_monotone_in_elapsed_time() {
        install_test_signer();
        let config = CredConfig::default();
        let cred = JobCredential::build(sample_args(), &config, &NullIdentityResolver, true, 1).unwrap();

        let now = SystemTime::now();
        assert!(cred.verify_at(now).is_ok());
        let past_expiry = now + Duration::from_secs(config.expire_window_secs() + 1);
        assert!(matches!(cred.verify_at(past_expiry), Err(CredError::CredentialExpired)));
    }

    #[test]
    fn tampered_wire_bytes_fail_verification() {
        install_test_signer();
        let config = CredConfig::default();
        let cred = JobCredential::build(sample_args(), &config, &NullIdentityResolver, true, 1).unwrap();

        let wire = cred.pack(1).unwrap();
        let mut envelope: TestEnvelope = serde_json::from_slice(&wire).unwrap();
        envelope.signature[0] ^= 0xFF;
        let tampered = serde_json::to_vec(&envelope).unwrap();

        let decoded = JobCredential::unpack(&tampered, 1, &config).unwrap();
        assert!(decoded.verify().is_err());
    }

    #[test]
    fn nobody_uid_and_gid_are_rejected() {
        install_test_signer();
        let config = CredConfig::default();

        let mut args = sample_args();
        args.uid = NOBODY;
        assert!(matches!(
            JobCredential::build(args, &config, &NullIdentityResolver, true, 1),
            Err(CredError::InvalidArgument(_))
        ));

        let mut args = sample_args();
        args.gid = NOBODY;
        assert!(matches!(
            JobCredential::build(args, &config, &NullIdentityResolver, true, 1),
            Err(CredError::InvalidArgument(_))
        ));
    }

    #[test]
    fn core_array_size_stops_one_past_the_reaching_run() {
        assert_eq!(compute_core_array_size(&[1, 1], 2), 2);
        assert_eq!(compute_core_array_size(&[2, 3, 1], 4), 2);
        assert_eq!(compute_core_array_size(&[], 4), 0);
    }

    #[test]
    fn mem_run_length_zero_or_missing_is_none() {
        let rl = MemRunLength { counts: vec![0, 512], rep: vec![1, 1] };
        assert_eq!(rl.at(0), None);
        assert_eq!(rl.at(1), Some(512));
        assert_eq!(rl.at(5), None);
    }
}
