//! Compute-node control CLI: verify credentials issued by `cred-issuer`
//! and drive a job's mount-namespace lifecycle.
//!
//! Usage:
//!   nodectl ns prepare-base --basepath /var/spool/ns
//!   nodectl ns create --basepath /var/spool/ns --job-id 42
//!   nodectl ns join --basepath /var/spool/ns --job-id 42 --uid 1000
//!   nodectl ns delete --basepath /var/spool/ns --job-id 42
//!   nodectl cred verify-job --pubkey-hex <64 hex chars> --body-hex <hex>

use std::collections::HashMap;
use std::time::SystemTime;

use clap::{Args, Parser, Subcommand};
use cred_core::bcast_cred::{self, BcastFlags};
use cred_core::job_cred::JobCredential;
use cred_core::signer::FACADE;
use cred_core::CredConfig;
use cred_signer_ed25519::Ed25519Signer;
use ns_container::config::NamespaceConfig;
use ns_container::engine;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "nodectl")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Mount-namespace lifecycle operations for this node.
    Ns {
        #[command(subcommand)]
        action: NsAction,
    },
    /// Verify a credential transported from the issuer.
    Cred {
        #[command(subcommand)]
        action: CredAction,
    },
}

#[derive(Subcommand)]
enum NsAction {
    /// Prepare this node's shared namespace base (once per boot).
    PrepareBase(NsBaseArgs),
    /// Tear down the shared namespace base.
    TeardownBase(NsBaseArgs),
    /// Create (or observe already-created) a job's pinned mount namespace.
    Create(NsJobArgs),
    /// Join the calling process to a job's namespace, marking it active.
    Join {
        #[command(flatten)]
        job: NsJobArgs,
        #[arg(long)]
        uid: u32,
    },
    /// Open a job's namespace file without joining the current process.
    JoinExternal(NsJobArgs),
    /// Delete a job's namespace and its on-disk state.
    Delete(NsJobArgs),
}

#[derive(Args)]
struct NsBaseArgs {
    #[arg(long, env = "NODECTL_NS_BASEPATH")]
    basepath: String,
    #[arg(long)]
    auto_basepath: bool,
    #[arg(long)]
    initscript: Option<String>,
    #[arg(long)]
    cray_native: bool,
}

#[derive(Args)]
struct NsJobArgs {
    #[command(flatten)]
    base: NsBaseArgs,
    #[arg(long)]
    job_id: u32,
}

impl NsBaseArgs {
    fn into_config(self) -> anyhow::Result<NamespaceConfig> {
        let mut map = HashMap::new();
        map.insert("namespace.basepath".to_string(), self.basepath);
        if self.auto_basepath {
            map.insert("namespace.auto_basepath".to_string(), "true".to_string());
        }
        if let Some(script) = self.initscript {
            map.insert("namespace.initscript".to_string(), script);
        }
        if self.cray_native {
            map.insert("namespace.cray_native".to_string(), "true".to_string());
        }
        Ok(NamespaceConfig::from_map(&map)?)
    }
}

#[derive(Subcommand)]
enum CredAction {
    /// Verify a job credential and print its per-host core/mem/gres view.
    VerifyJob {
        #[command(flatten)]
        signer: SignerArgs,
        #[arg(long)]
        body_hex: String,
        #[arg(long, default_value_t = 1)]
        version: u16,
        #[arg(long)]
        host: Option<String>,
    },
    /// Verify (and replay-check) a bcast credential block.
    VerifyBcast {
        #[command(flatten)]
        signer: SignerArgs,
        #[arg(long)]
        body_hex: String,
        #[arg(long, default_value_t = 1)]
        version: u16,
        #[arg(long, default_value_t = 1)]
        block_no: u32,
        /// Shared-object transfer (suppresses first-block cache seeding).
        #[arg(long)]
        so: bool,
    },
}

#[derive(Args)]
struct SignerArgs {
    /// 64 hex characters: the issuer's raw Ed25519 verifying key.
    #[arg(long, env = "NODECTL_ISSUER_PUBKEY")]
    pubkey_hex: String,
    #[arg(long, default_value_t = 120)]
    cred_expire: u64,
    #[arg(long)]
    enable_nss: bool,
    #[arg(long)]
    disable_send_gids: bool,
}

impl SignerArgs {
    fn install_facade(&self) -> anyhow::Result<()> {
        let bytes = decode_hex(&self.pubkey_hex)?;
        let key: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| anyhow::anyhow!("--pubkey-hex must decode to exactly 32 bytes"))?;
        let signer = Ed25519Signer::from_verifying_key_bytes(key).map_err(|e| anyhow::anyhow!(e.to_string()))?;
        FACADE.init(std::sync::Arc::new(signer));
        Ok(())
    }

    fn config(&self) -> CredConfig {
        let mut map = HashMap::new();
        map.insert("auth_info.cred_expire".to_string(), self.cred_expire.to_string());
        if self.enable_nss {
            map.insert("launch_params.enable_nss".to_string(), "true".to_string());
        }
        if self.disable_send_gids {
            map.insert("launch_params.disable_send_gids".to_string(), "true".to_string());
        }
        CredConfig::from_map(&map)
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("nodectl=info".parse()?))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Ns { action } => run_ns(action),
        Command::Cred { action } => run_cred(action),
    }
}

fn run_ns(action: NsAction) -> anyhow::Result<()> {
    match action {
        NsAction::PrepareBase(base) => {
            engine::prepare_base(&base.into_config()?)?;
            tracing::info!("namespace base prepared");
        }
        NsAction::TeardownBase(base) => {
            engine::teardown_base(&base.into_config()?)?;
            tracing::info!("namespace base torn down");
        }
        NsAction::Create(job) => {
            let job_id = job.job_id;
            engine::create(&job.base.into_config()?, job_id)?;
            tracing::info!(job_id, "job namespace created");
        }
        NsAction::Join { job, uid } => {
            let job_id = job.job_id;
            engine::join(&job.base.into_config()?, job_id, uid)?;
            tracing::info!(job_id, uid, "joined job namespace");
        }
        NsAction::JoinExternal(job) => {
            let job_id = job.job_id;
            let file = engine::join_external(&job.base.into_config()?, job_id)?;
            // Print the fd number so a wrapper script can `setns` from it
            // without going through a second nodectl invocation.
            use std::os::unix::io::AsRawFd;
            println!("{}", file.as_raw_fd());
        }
        NsAction::Delete(job) => {
            let job_id = job.job_id;
            engine::delete(&job.base.into_config()?, job_id)?;
            tracing::info!(job_id, "job namespace deleted");
        }
    }
    Ok(())
}

fn run_cred(action: CredAction) -> anyhow::Result<()> {
    match action {
        CredAction::VerifyJob { signer, body_hex, version, host } => {
            signer.install_facade()?;
            let config = signer.config();
            let buffer = decode_hex(&body_hex)?;
            let cred = JobCredential::unpack(&buffer, version, &config)?;
            let view = cred.verify()?;
            println!("job_id={} step_id={} uid={}", view.args().job_id, view.args().step_id, view.args().uid);
            drop(view);

            if let Some(host) = host {
                let (job_cores, step_cores) = cred.core_format_for_host(&host)?;
                let (job_mem, step_mem) = cred.mem_alloc_for_host(&host)?;
                println!("host={host} job_cores={job_cores} step_cores={step_cores} job_mem={job_mem} step_mem={step_mem}");
            }
        }
        CredAction::VerifyBcast { signer, body_hex, version, block_no, so } => {
            signer.install_facade()?;
            let buffer = decode_hex(&body_hex)?;
            let cred = cred_core::bcast_cred::BcastCredential::unpack(&buffer, version)?;
            let flags = if so { BcastFlags::SO } else { BcastFlags::NONE };
            let args = bcast_cred::extract(&cred, block_no, flags, SystemTime::now())?;
            println!("job_id={} step_id={} nodes={}", args.job_id, args.step_id, args.nodes);
        }
    }
    Ok(())
}

fn decode_hex(s: &str) -> anyhow::Result<Vec<u8>> {
    if s.len() % 2 != 0 {
        anyhow::bail!("hex string has odd length");
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).map_err(|e| anyhow::anyhow!(e)))
        .collect()
}
