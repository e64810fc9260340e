//! Credential issuer service: the control-plane side of the signer facade.
//!
//! Holds the process's signing key, serves its public key for out-of-band
//! distribution to compute nodes, and builds/signs job and bcast
//! credentials on request. A compute-node daemon never signs; it only
//! verifies, via the same `cred-signer-ed25519` provider initialized with
//! the verifying key half (see `nodectl`).
//!
//! Usage:
//!   cred-issuer --listen 0.0.0.0:7003 --cred-expire 120
//!
//! Routes:
//!   GET  /health              — liveness check
//!   GET  /pubkey              — provider name, key id, raw verifying key
//!   POST /credentials/job     — build + sign a job credential
//!   POST /credentials/bcast   — build + sign a bcast credential

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use clap::Parser;
use cred_core::bcast_cred::{BcastCredential, BcastCredentialArgs};
use cred_core::job_cred::{JobCredential, JobCredentialArgs, NullIdentityResolver};
use cred_core::signer::FACADE;
use cred_core::CredConfig;
use cred_signer_ed25519::Ed25519Signer;
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
struct Args {
    /// Listen address for the HTTP service.
    #[arg(long, default_value = "127.0.0.1:7003")]
    listen: String,

    /// Credential expiration window in seconds (`auth_info.cred_expire`).
    #[arg(long, default_value_t = 120)]
    cred_expire: u64,

    /// Resolve and embed user_name/gids on every credential (`launch_params.enable_nss`).
    #[arg(long)]
    enable_nss: bool,

    /// Suppress gid embedding even when a caller supplies one (`launch_params.disable_send_gids`).
    #[arg(long)]
    disable_send_gids: bool,

    /// Wire protocol version stamped on every credential this issuer signs.
    #[arg(long, default_value_t = 1)]
    version: u16,

    /// Path to a 32-byte Ed25519 seed file. Without one, an ephemeral
    /// keypair is generated at startup and lost on restart — fine for
    /// a single long-lived process, useless across restarts.
    #[arg(long, env = "CRED_ISSUER_SEED_FILE")]
    seed_file: Option<PathBuf>,
}

struct IssuerState {
    config: CredConfig,
    version: u16,
    key_id: String,
    verifying_key: [u8; 32],
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let json_logs = std::env::var("CRED_ISSUER_LOG_JSON").unwrap_or_default() == "1";
    let filter = EnvFilter::from_default_env().add_directive("cred_issuer=info".parse()?);
    if json_logs {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let args = Args::parse();

    let signer = match &args.seed_file {
        Some(path) => {
            let raw = std::fs::read(path)?;
            let seed: [u8; 32] = raw
                .as_slice()
                .try_into()
                .map_err(|_| anyhow::anyhow!("{} is not a 32-byte seed", path.display()))?;
            tracing::info!(path = %path.display(), "loaded signing key from seed file");
            Ed25519Signer::from_seed(&seed)
        }
        None => {
            tracing::warn!("no --seed-file given, generating an ephemeral signing key for this process only");
            Ed25519Signer::generate()
        }
    };
    let verifying_key = signer.verifying_key_bytes();

    FACADE.init(Arc::new(signer));
    let facade = FACADE.get().expect("facade was just initialized");
    let key_id = facade.key_id();

    let mut config = CredConfig::default();
    config_apply_cli(&mut config, &args);

    tracing::info!(key_id = %key_id, listen = %args.listen, "credential issuer starting");

    let state = Arc::new(IssuerState {
        config,
        version: args.version,
        key_id,
        verifying_key,
    });

    let app = Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/pubkey", get(pubkey))
        .route("/credentials/job", post(issue_job_credential))
        .route("/credentials/bcast", post(issue_bcast_credential))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&args.listen).await?;
    tracing::info!("listening on {}", args.listen);
    axum::serve(listener, app).await?;
    Ok(())
}

/// `CredConfig` has no CLI-aware constructor of its own (its `from_map`
/// reads the flat key=value form nodes load from a config file); this
/// binary has typed `clap` flags instead, so apply them directly.
fn config_apply_cli(config: &mut CredConfig, args: &Args) {
    let mut map = std::collections::HashMap::new();
    map.insert("auth_info.cred_expire".to_string(), args.cred_expire.to_string());
    if args.enable_nss {
        map.insert("launch_params.enable_nss".to_string(), "true".to_string());
    }
    if args.disable_send_gids {
        map.insert("launch_params.disable_send_gids".to_string(), "true".to_string());
    }
    *config = CredConfig::from_map(&map);
}

#[derive(Serialize)]
struct PubkeyResponse {
    provider: &'static str,
    key_id: String,
    verifying_key_hex: String,
}

async fn pubkey(State(state): State<Arc<IssuerState>>) -> Json<PubkeyResponse> {
    Json(PubkeyResponse {
        provider: "ed25519",
        key_id: state.key_id.clone(),
        verifying_key_hex: state.verifying_key.iter().map(|b| format!("{b:02x}")).collect(),
    })
}

type ApiError = (StatusCode, Json<serde_json::Value>);

fn bad_request(msg: impl std::fmt::Display) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(serde_json::json!({ "error": msg.to_string() })))
}

#[derive(Deserialize)]
struct JobCredentialRequest {
    args: JobCredentialArgs,
    #[serde(default = "default_true")]
    sign: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Serialize)]
struct JobCredentialResponse {
    version: u16,
    body_hex: String,
}

async fn issue_job_credential(
    State(state): State<Arc<IssuerState>>,
    Json(req): Json<JobCredentialRequest>,
) -> Result<Json<JobCredentialResponse>, ApiError> {
    let cred = JobCredential::build(req.args, &state.config, &NullIdentityResolver, req.sign, state.version)
        .map_err(bad_request)?;
    let body = cred.pack(state.version).map_err(bad_request)?;

    Ok(Json(JobCredentialResponse {
        version: state.version,
        body_hex: body.iter().map(|b| format!("{b:02x}")).collect(),
    }))
}

#[derive(Deserialize)]
struct BcastCredentialRequest {
    args: BcastCredentialArgs,
    expire_in_secs: u64,
}

#[derive(Serialize)]
struct BcastCredentialResponse {
    version: u16,
    body_hex: String,
}

async fn issue_bcast_credential(
    State(state): State<Arc<IssuerState>>,
    Json(req): Json<BcastCredentialRequest>,
) -> Result<Json<BcastCredentialResponse>, ApiError> {
    let expiry = SystemTime::now() + Duration::from_secs(req.expire_in_secs);
    let cred = BcastCredential::build(req.args, expiry, &state.config, &NullIdentityResolver)
        .map_err(bad_request)?;
    let body = cred.pack(state.version);

    Ok(Json(BcastCredentialResponse {
        version: state.version,
        body_hex: body.iter().map(|b| format!("{b:02x}")).collect(),
    }))
}
