//! Bcast credential: file-broadcast credential envelope, the non-cryptographic
//! `hash32` cache key, and the process-wide replay cache.

use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::CredConfig;
use crate::error::CredError;
use crate::job_cred::{IdentityResolver, NOBODY};
use crate::signer::FACADE;

/// Bitflags recognized by [`extract`]. Hand-rolled: the only flag this
/// subsystem inspects is `SO` (shared-object transfer), so a dedicated
/// crate dependency isn't warranted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BcastFlags(u32);

impl BcastFlags {
    pub const NONE: BcastFlags = BcastFlags(0);
    pub const SO: BcastFlags = BcastFlags(1);

    pub fn contains(self, other: BcastFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for BcastFlags {
    type Output = BcastFlags;
    fn bitor(self, rhs: BcastFlags) -> BcastFlags {
        BcastFlags(self.0 | rhs.0)
    }
}

/// The argument bundle behind a bcast credential. `created_at_epoch` and
/// `expiry_epoch` travel as part of the signed args themselves (rather than
/// as out-of-band parameters supplied again at verification time) so the
/// receiver can recompute exactly the bytes that were signed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BcastCredentialArgs {
    pub job_id: u32,
    pub het_job_id: Option<u32>,
    pub step_id: u32,
    pub uid: u32,
    pub gid: u32,
    pub user_name: Option<String>,
    pub gids: Option<Vec<u32>>,
    pub nodes: String,
    pub created_at_epoch: u64,
    pub expiry_epoch: u64,
}

#[derive(Serialize)]
struct WireEnvelope<'a> {
    version: u16,
    args: &'a BcastCredentialArgs,
    signature: &'a [u8],
}

struct BcastCredentialInner {
    args: BcastCredentialArgs,
    signature: Vec<u8>,
    verified: bool,
    created_at: SystemTime,
    expiry: SystemTime,
}

/// A signed, immutable-after-signing file-broadcast credential.
pub struct BcastCredential {
    inner: parking_lot::RwLock<BcastCredentialInner>,
}

impl BcastCredential {
    /// Build and sign a new bcast credential. If `config.send_gids` is on,
    /// `user_name`/`gids` are resynthesized from `identity` before signing
    /// so a stale caller-supplied group list never gets signed over.
    pub fn build(
        mut args: BcastCredentialArgs,
        expiry: SystemTime,
        config: &CredConfig,
        identity: &dyn IdentityResolver,
    ) -> Result<Self, CredError> {
        if args.uid == NOBODY {
            return Err(CredError::InvalidArgument("uid is the nobody sentinel"));
        }
        if args.gid == NOBODY {
            return Err(CredError::InvalidArgument("gid is the nobody sentinel"));
        }

        if config.send_gids {
            if let Some(identity_result) = identity.resolve(args.uid, args.gid) {
                args.user_name = Some(identity_result.user_name);
                args.gids = Some(identity_result.gids);
            }
        }

        let created_at = SystemTime::now();
        args.created_at_epoch = epoch_secs(created_at);
        args.expiry_epoch = epoch_secs(expiry);

        let body = canonical_bytes(&args);
        let facade = FACADE.get()?;
        let signature = facade.sign(&body).map_err(|_| CredError::SignFailed)?;

        Ok(BcastCredential {
            inner: parking_lot::RwLock::new(BcastCredentialInner {
                args,
                signature,
                verified: true,
                created_at,
                expiry,
            }),
        })
    }

    /// Decode a transported buffer via the signer facade and verify its
    /// signature against the recomputed canonical bytes of the decoded
    /// args, without touching the replay cache (that happens on [`extract`]).
    pub fn unpack(buffer: &[u8], version: u16) -> Result<Self, CredError> {
        let facade = FACADE.get()?;
        let (args, signature) = facade
            .sbcast_unpack(buffer, version)
            .map_err(|_| CredError::InvalidCredential)?;

        let body = canonical_bytes(&args);
        let verified = facade.verify_sign(&body, &signature).is_ok();
        let created_at = UNIX_EPOCH + std::time::Duration::from_secs(args.created_at_epoch);
        let expiry = UNIX_EPOCH + std::time::Duration::from_secs(args.expiry_epoch);

        Ok(BcastCredential {
            inner: parking_lot::RwLock::new(BcastCredentialInner {
                args,
                signature,
                verified,
                created_at,
                expiry,
            }),
        })
    }

    /// Serialize into the wire envelope a signer provider's `sbcast_unpack`
    /// expects: `{version, args, signature}`. Shares its JSON shape with
    /// `cred-signer-ed25519`'s internal envelope by convention, not by type
    /// reuse, since that type is private to the provider crate.
    pub fn pack(&self, version: u16) -> Vec<u8> {
        let guard = self.inner.read();
        let envelope = WireEnvelope { version, args: &guard.args, signature: &guard.signature };
        serde_json::to_vec(&envelope).expect("bcast wire envelope is always serializable")
    }
}

fn canonical_bytes(args: &BcastCredentialArgs) -> Vec<u8> {
    serde_json::to_vec(args).expect("bcast credential args are always serializable")
}

fn epoch_secs(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

/// Sum over 16-bit big-endian-style chunks of `signature`: `hash +=
/// (byte[i] << 8) + byte[i+1]`, zero-padding the last chunk if the
/// signature length is odd. This exact arithmetic is a fixed cache-key
/// format; do not substitute a different hash.
pub fn hash32(signature: &[u8]) -> u32 {
    let mut hash: u32 = 0;
    let mut i = 0;
    while i < signature.len() {
        let hi = signature[i] as u32;
        let lo = signature.get(i + 1).copied().unwrap_or(0) as u32;
        hash = hash.wrapping_add((hi << 8) + lo);
        i += 2;
    }
    hash
}

#[derive(Debug, Clone, Copy)]
struct BcastCacheEntry {
    expiry: SystemTime,
    hash: u32,
}

/// Process-wide replay cache for multi-block bcast transfers: a single
/// lock-guarded ordered list, lazy-GC'd on lookup.
#[derive(Default)]
pub struct ReplayCache {
    entries: Mutex<Vec<BcastCacheEntry>>,
}

impl ReplayCache {
    pub const fn new() -> Self {
        ReplayCache { entries: Mutex::new(Vec::new()) }
    }

    fn insert(&self, expiry: SystemTime, hash: u32) {
        self.entries.lock().push(BcastCacheEntry { expiry, hash });
    }

    /// Accept iff an entry with matching `expiry` and `hash` exists;
    /// any entry already past `now` is dropped during the same scan.
    fn check_and_gc(&self, now: SystemTime, expiry: SystemTime, hash: u32) -> bool {
        let mut entries = self.entries.lock();
        let mut found = false;
        entries.retain(|e| {
            if e.expiry <= now {
                false
            } else {
                if e.expiry == expiry && e.hash == hash {
                    found = true;
                }
                true
            }
        });
        found
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

/// The process-wide replay cache singleton: one ordered cache per process,
/// shared by every bcast transfer it verifies.
pub static REPLAY_CACHE: ReplayCache = ReplayCache::new();

/// Verify or replay-check block `block_no` of `cred`'s transfer.
///
/// 1. Reject if expired.
/// 2. For the first block of a non-shared-object transfer, require
///    `verified` and insert a cache entry.
/// 3. Otherwise accept iff a matching `(expiry, hash32(signature))` cache
///    entry exists, garbage-collecting expired entries during the scan.
/// 4. Reject "nobody" uid/gid.
/// 5. Return a deep copy of the argument bundle.
pub fn extract(
    cred: &BcastCredential,
    block_no: u32,
    flags: BcastFlags,
    now: SystemTime,
) -> Result<BcastCredentialArgs, CredError> {
    extract_with_cache(cred, &REPLAY_CACHE, block_no, flags, now)
}

pub fn extract_with_cache(
    cred: &BcastCredential,
    cache: &ReplayCache,
    block_no: u32,
    flags: BcastFlags,
    now: SystemTime,
) -> Result<BcastCredentialArgs, CredError> {
    let guard = cred.inner.read();

    if now > guard.expiry {
        return Err(CredError::CredentialExpired);
    }

    if block_no == 1 && !flags.contains(BcastFlags::SO) {
        if !guard.verified {
            return Err(CredError::InvalidCredential);
        }
        cache.insert(guard.expiry, hash32(&guard.signature));
    } else {
        let hash = hash32(&guard.signature);
        if !cache.check_and_gc(now, guard.expiry, hash) {
            return Err(CredError::ReplayRejected);
        }
    }

    if guard.args.uid == NOBODY || guard.args.gid == NOBODY {
        return Err(CredError::InvalidArgument("nobody uid/gid in bcast credential"));
    }

    Ok(guard.args.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash32_matches_known_vector() {
        assert_eq!(hash32(&[0x01, 0x02, 0x03]), 0x0402);
    }

    #[test]
    fn hash32_zero_pads_odd_length() {
        assert_eq!(hash32(&[0xAB]), 0xAB00);
    }

    #[test]
    fn replay_cache_matches_on_expiry_and_hash() {
        let cache = ReplayCache::new();
        let now = SystemTime::now();
        let expiry = now + std::time::Duration::from_secs(60);
        cache.insert(expiry, 0x402);
        assert!(cache.check_and_gc(now, expiry, 0x402));
        assert!(!cache.check_and_gc(now, expiry, 0x403));
    }

    #[test]
    fn replay_cache_gcs_expired_entries_during_scan() {
        let cache = ReplayCache::new();
        let now = SystemTime::now();
        let past = now - std::time::Duration::from_secs(1);
        cache.insert(past, 0x402);
        assert!(!cache.check_and_gc(now, past, 0x402));
        assert_eq!(cache.len(), 0);
    }
}
