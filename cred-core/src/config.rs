//! The enumerated configuration keys, parsed from a flat key=value map.
//! The map's own source (file, env, control-plane push) is node-local
//! configuration parsing, which is out of scope as a format — only these
//! keys' names and effects are in scope.

use std::collections::HashMap;

/// Minimum accepted `auth_info.cred_expire`, in seconds.
pub const MIN_EXPIRATION_WINDOW: u64 = 5;
/// Default expiration window used when the configured value is missing or
/// below `MIN_EXPIRATION_WINDOW`.
pub const DEFAULT_EXPIRATION_WINDOW: u64 = 120;

/// Resolved credential-subsystem configuration.
#[derive(Debug, Clone)]
pub struct CredConfig {
    cred_expire: u64,
    pub enable_nss: bool,
    pub send_gids: bool,
    pub cred_type: String,
}

impl Default for CredConfig {
    fn default() -> Self {
        CredConfig {
            cred_expire: DEFAULT_EXPIRATION_WINDOW,
            enable_nss: false,
            send_gids: true,
            cred_type: "cred/ed25519".to_string(),
        }
    }
}

impl CredConfig {
    /// Parse from a flat `key=value` map, e.g. the contents of
    /// `AuthInfo`/`LaunchParams`-style config lines split on `;`/`,`.
    pub fn from_map(map: &HashMap<String, String>) -> Self {
        let mut cfg = CredConfig::default();

        if let Some(v) = map.get("auth_info.cred_expire") {
            match v.parse::<u64>() {
                Ok(secs) if secs >= MIN_EXPIRATION_WINDOW => cfg.cred_expire = secs,
                Ok(secs) => {
                    tracing::error!(
                        configured = secs,
                        minimum = MIN_EXPIRATION_WINDOW,
                        "auth_info.cred_expire invalid, using default"
                    );
                    cfg.cred_expire = DEFAULT_EXPIRATION_WINDOW;
                }
                Err(_) => {
                    tracing::error!(value = %v, "auth_info.cred_expire not an integer, using default");
                    cfg.cred_expire = DEFAULT_EXPIRATION_WINDOW;
                }
            }
        }

        if let Some(v) = map.get("launch_params.enable_nss") {
            cfg.enable_nss = is_truthy(v);
        }
        if let Some(v) = map.get("launch_params.disable_send_gids") {
            if is_truthy(v) {
                cfg.send_gids = false;
            }
        }
        if let Some(v) = map.get("cred_type") {
            cfg.cred_type = v.clone();
        }

        cfg
    }

    pub fn expire_window_secs(&self) -> u64 {
        self.cred_expire
    }
}

fn is_truthy(v: &str) -> bool {
    matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
