//! Enumerated `namespace.*` configuration keys.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::error::NsError;

#[derive(Debug, Clone)]
pub struct NamespaceConfig {
    pub basepath: PathBuf,
    pub auto_basepath: bool,
    pub initscript: Option<PathBuf>,
    /// Cray-native builds are exempt from all mount work by design;
    /// every engine entry point becomes a no-op returning `Ok(())`.
    pub cray_native: bool,
}

impl NamespaceConfig {
    /// Parse from a flat `key=value` map. `namespace.basepath` is
    /// mandatory and must be absolute.
    pub fn from_map(map: &HashMap<String, String>) -> Result<Self, NsError> {
        let basepath = map
            .get("namespace.basepath")
            .ok_or(NsError::InvalidArgument("namespace.basepath is mandatory"))?;
        let basepath = PathBuf::from(basepath);
        if !basepath.is_absolute() {
            return Err(NsError::InvalidArgument("namespace.basepath must be absolute"));
        }

        let auto_basepath = map
            .get("namespace.auto_basepath")
            .map(|v| is_truthy(v))
            .unwrap_or(false);

        let initscript = map.get("namespace.initscript").map(PathBuf::from);

        let cray_native = map
            .get("namespace.cray_native")
            .map(|v| is_truthy(v))
            .unwrap_or(false);

        Ok(NamespaceConfig { basepath, auto_basepath, initscript, cray_native })
    }

    pub fn job_mount(&self, job_id: u32) -> PathBuf {
        self.basepath.join(job_id.to_string())
    }
}

fn is_truthy(v: &str) -> bool {
    matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_missing_basepath() {
        let map = HashMap::new();
        assert!(NamespaceConfig::from_map(&map).is_err());
    }

    #[test]
    fn rejects_relative_basepath() {
        let mut map = HashMap::new();
        map.insert("namespace.basepath".to_string(), "relative/path".to_string());
        assert!(NamespaceConfig::from_map(&map).is_err());
    }

    #[test]
    fn accepts_absolute_basepath() {
        let mut map = HashMap::new();
        map.insert("namespace.basepath".to_string(), "/var/run/slurm/ns".to_string());
        let cfg = NamespaceConfig::from_map(&map).unwrap();
        assert_eq!(cfg.job_mount(42), PathBuf::from("/var/run/slurm/ns/42"));
    }
}
